//! Domain objects handed to the engine.
//!
//! The engine reads objects only through [`SeedObject`], so any metadata
//! model can feed it. [`Blockette`] is the owned model this crate ships:
//! tests and drivers build objects with it, the synthesizer creates its
//! summary blockettes with it, the reader decodes into it, and the
//! transcoder snapshots every incoming object into one before writing.

use std::fmt;

use tracing::warn;

use crate::layout::{self, BlocketteLayout, FieldRole, Layouts, RepeatGroup};
use crate::types::FieldValue;
use crate::{ExportError, Result};

/// Accessor contract of a domain object.
///
/// Field indices are positions in the type's [`BlocketteLayout`]. Scalar
/// fields are read at repetition 0.
pub trait SeedObject {
    fn type_code(&self) -> u16;

    fn num_fields(&self) -> usize;

    fn field_value(&self, field: usize, repetition: usize) -> Option<&FieldValue>;

    /// Declared repetition count held in `count_field`. May be negative or
    /// larger than what the object stores; the transcoder rejects both.
    fn field_repeat_count(&self, count_field: usize) -> i64 {
        self.field_value(count_field, 0)
            .and_then(FieldValue::as_int)
            .unwrap_or(0)
    }

    /// One repetition of a repeating group, `None` past the stored values.
    fn field_group(&self, group: &RepeatGroup, repetition: usize) -> Option<Vec<FieldValue>> {
        group
            .fields
            .clone()
            .map(|f| self.field_value(f, repetition).cloned())
            .collect()
    }

    /// Original identifier held in a dictionary key or reference field.
    fn dictionary_lookup(&self, field: usize, repetition: usize) -> Option<i64> {
        self.field_value(field, repetition).and_then(FieldValue::as_int)
    }

    /// Trailing bytes written after the fields (encoded waveform samples).
    fn attached_payload(&self) -> Option<&[u8]> {
        None
    }
}

/// Owned blockette: one value list per layout field.
#[derive(Debug, Clone, PartialEq)]
pub struct Blockette {
    layout: &'static BlocketteLayout,
    values: Vec<Vec<FieldValue>>,
    payload: Option<Vec<u8>>,
}

impl Blockette {
    /// Empty blockette; unset scalars transcode as their format default.
    pub fn new(layout: &'static BlocketteLayout) -> Self {
        Self {
            layout,
            values: vec![Vec::new(); layout.fields.len()],
            payload: None,
        }
    }

    /// Empty blockette of a standard SEED type.
    pub fn standard(code: u16) -> Result<Self> {
        layout::standard(code)
            .map(Self::new)
            .ok_or(ExportError::UnknownBlockette(code))
    }

    /// Read every field of `object` into an owned, validated copy.
    ///
    /// Repeat counts are checked against the stored repetitions, unset
    /// scalars take their format default and computed fields are zeroed
    /// until the transcoder fills them.
    pub fn snapshot(object: &dyn SeedObject, layouts: &Layouts) -> Result<Self> {
        let code = object.type_code();
        let layout = layouts.get(code)?;
        if object.num_fields() > layout.fields.len() {
            return Err(ExportError::malformed(
                code,
                format!(
                    "object has {} fields, layout has {}",
                    object.num_fields(),
                    layout.fields.len()
                ),
            ));
        }

        let mut snap = Self::new(layout);
        for (i, spec) in layout.fields.iter().enumerate() {
            if spec.repeat.is_some() {
                continue;
            }
            let value = match spec.role {
                FieldRole::Computed(_) => FieldValue::Int(0),
                _ => object
                    .field_value(i, 0)
                    .cloned()
                    .unwrap_or_else(|| spec.format.default_value()),
            };
            snap.values[i] = vec![value];
        }

        for group in layout.groups() {
            let count_name = layout.fields[group.count_field].name;
            let declared = object.field_repeat_count(group.count_field);
            if declared < 0 {
                return Err(ExportError::malformed(
                    code,
                    format!("{count_name} is negative ({declared})"),
                ));
            }
            for rep in 0..declared as usize {
                let values = object.field_group(&group, rep).ok_or_else(|| {
                    ExportError::malformed(
                        code,
                        format!("{count_name} = {declared} but only {rep} repetitions stored"),
                    )
                })?;
                for (field, value) in group.fields.clone().zip(values) {
                    snap.values[field].push(value);
                }
            }
            snap.values[group.count_field] = vec![FieldValue::Int(declared)];
        }

        snap.payload = object.attached_payload().map(<[u8]>::to_vec);
        Ok(snap)
    }

    pub fn layout(&self) -> &'static BlocketteLayout {
        self.layout
    }

    pub fn code(&self) -> u16 {
        self.layout.code
    }

    fn index(&self, name: &str) -> Result<usize> {
        self.layout.field_index(name).ok_or_else(|| {
            ExportError::malformed(self.layout.code, format!("no field named {name}"))
        })
    }

    /// Set a scalar field.
    pub fn set(&mut self, name: &str, value: impl Into<FieldValue>) -> Result<()> {
        let i = self.index(name)?;
        self.values[i] = vec![value.into()];
        Ok(())
    }

    /// Set every repetition of one repeating field and update its count.
    pub fn set_repeated(&mut self, name: &str, values: Vec<FieldValue>) -> Result<()> {
        let i = self.index(name)?;
        let count = self.layout.fields[i].repeat.ok_or_else(|| {
            ExportError::malformed(self.layout.code, format!("{name} does not repeat"))
        })?;
        self.values[count] = vec![FieldValue::Int(values.len() as i64)];
        self.values[i] = values;
        Ok(())
    }

    /// Chaining form of [`Blockette::set`]; unknown names are logged and skipped.
    pub fn with(mut self, name: &str, value: impl Into<FieldValue>) -> Self {
        if let Err(e) = self.set(name, value) {
            warn!(error = %e, "field ignored");
        }
        self
    }

    /// Chaining form of [`Blockette::set_repeated`].
    pub fn with_repeated<V: Into<FieldValue>>(mut self, name: &str, values: Vec<V>) -> Self {
        let values = values.into_iter().map(Into::into).collect();
        if let Err(e) = self.set_repeated(name, values) {
            warn!(error = %e, "field ignored");
        }
        self
    }

    pub fn with_payload(mut self, payload: Vec<u8>) -> Self {
        self.payload = Some(payload);
        self
    }

    /// First value of a field by name.
    pub fn get(&self, name: &str) -> Option<&FieldValue> {
        self.layout
            .field_index(name)
            .and_then(|i| self.values[i].first())
    }

    /// All repetitions of a field by name.
    pub fn get_repeated(&self, name: &str) -> &[FieldValue] {
        match self.layout.field_index(name) {
            Some(i) => &self.values[i],
            None => &[],
        }
    }

    pub fn text(&self, name: &str) -> Option<&str> {
        self.get(name).and_then(FieldValue::as_text)
    }

    pub fn int(&self, name: &str) -> Option<i64> {
        self.get(name).and_then(FieldValue::as_int)
    }

    pub fn payload(&self) -> Option<&[u8]> {
        self.payload.as_deref()
    }

    pub(crate) fn values(&self, field: usize) -> &[FieldValue] {
        &self.values[field]
    }

    pub(crate) fn values_mut(&mut self, field: usize) -> &mut Vec<FieldValue> {
        &mut self.values[field]
    }

    pub(crate) fn set_payload(&mut self, payload: Option<Vec<u8>>) {
        self.payload = payload;
    }

    /// Number of repetitions stored for the group counted by `count_field`.
    pub(crate) fn stored_repetitions(&self, count_field: usize) -> usize {
        self.layout
            .fields
            .iter()
            .position(|f| f.repeat == Some(count_field))
            .map_or(0, |i| self.values[i].len())
    }
}

impl SeedObject for Blockette {
    fn type_code(&self) -> u16 {
        self.layout.code
    }

    fn num_fields(&self) -> usize {
        self.values.len()
    }

    fn field_value(&self, field: usize, repetition: usize) -> Option<&FieldValue> {
        self.values.get(field).and_then(|v| v.get(repetition))
    }

    fn attached_payload(&self) -> Option<&[u8]> {
        self.payload.as_deref()
    }
}

impl fmt::Display for Blockette {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:03} {}", self.layout.code, self.layout.name)?;
        for (spec, values) in self.layout.fields.iter().zip(&self.values) {
            match values.as_slice() {
                [] => {}
                [single] if spec.repeat.is_none() => write!(f, " {}={}", spec.name, single)?,
                many => write!(f, " {}[{}]", spec.name, many.len())?,
            }
        }
        Ok(())
    }
}
