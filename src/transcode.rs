//! Record transcoder.
//!
//! Serializes snapshots ([`Blockette`]) into control-header or data-record
//! bytes and places them in the [`RecordBuffer`]. Control blockettes whose
//! repeating group would push them past the twin threshold are split into
//! a head and a *twin* carrying the unwritten repetitions; the twin goes
//! back on the work list and is handled like a newly arrived object.

use std::collections::VecDeque;
use std::io::Write;

use tracing::debug;

use crate::blockette::Blockette;
use crate::buffer::{RECORD_HEADER_LENGTH, RecordBuffer};
use crate::dictionary::Resequencer;
use crate::layout::{
    CONTROL_HEADER_LENGTH, Computed, DATA_BLOCKETTE_HEADER_LENGTH, FIXED_SECTION_LENGTH,
    FieldFormat, FieldRole, FieldSpec, LayoutKind, MAX_CONTROL_LENGTH, RepeatGroup,
};
use crate::types::FieldValue;
use crate::{ExportError, Result};

/// Split a control blockette once it grows past this many bytes.
pub const DEFAULT_TWIN_THRESHOLD: usize = 9000;

/// Waveform payloads start on this boundary within the logical record.
pub const DATA_ALIGNMENT: usize = 64;

/// Record offset of the first data blockette (header plus fixed section).
pub const FIRST_BLOCKETTE_OFFSET: usize = RECORD_HEADER_LENGTH + FIXED_SECTION_LENGTH;

/// Where a transcoded object landed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Placement {
    /// Sequence number of the record the object starts in.
    pub record: u32,
    /// 1 unless the object was twinned.
    pub pieces: usize,
}

#[derive(Debug, Clone, Copy)]
pub struct Transcoder {
    threshold: usize,
    logical_length: usize,
    pad: u8,
}

impl Transcoder {
    pub fn new(threshold: usize, logical_length: usize, pad: u8) -> Self {
        Self {
            threshold,
            logical_length,
            pad,
        }
    }

    fn record_length_exp(&self) -> i64 {
        self.logical_length.trailing_zeros() as i64
    }

    /// Write one control blockette, twinning it as often as needed.
    pub fn control<W: Write>(
        &self,
        object: Blockette,
        buffer: &mut RecordBuffer<W>,
        dictionary: &mut Resequencer,
    ) -> Result<Placement> {
        let mut pending = VecDeque::from([object]);
        let mut first = None;
        let mut pieces = 0;

        while let Some(object) = pending.pop_front() {
            let object = match self.split_point(&object) {
                Some((group, written)) => {
                    let (head, tail) = twin(&object, &group, written);
                    debug!(
                        code = object.code(),
                        written,
                        remaining = tail.values(group.fields.start).len(),
                        "blockette twinned"
                    );
                    pending.push_front(tail);
                    head
                }
                None => object,
            };
            let bytes = self.encode_control(&object, dictionary)?;
            let record = buffer.write_object(object.layout().section, &bytes)?;
            first.get_or_insert(record);
            pieces += 1;
        }

        Ok(Placement {
            record: first.unwrap_or_else(|| buffer.next_fresh_sequence()),
            pieces,
        })
    }

    /// Write a fixed section plus its data blockettes as one data record.
    pub fn data<W: Write>(&self, mold: &[Blockette], buffer: &mut RecordBuffer<W>) -> Result<Placement> {
        let (kind, body) = self.encode_data(mold)?;
        let record = buffer.write_record(kind, &body)?;
        Ok(Placement { record, pieces: 1 })
    }

    /// Find where a repeating group crosses the threshold: the group and
    /// how many of its repetitions stay in the head.
    pub fn split_point(&self, object: &Blockette) -> Option<(RepeatGroup, usize)> {
        let layout = object.layout();
        if layout.kind != LayoutKind::Control {
            return None;
        }
        let groups = layout.groups();
        let mut size = CONTROL_HEADER_LENGTH;
        let mut i = 0;
        while i < layout.fields.len() {
            if let Some(group) = groups.iter().find(|g| g.fields.start == i) {
                let reps = object.values(group.fields.start).len();
                for rep in 0..reps {
                    size += group
                        .fields
                        .clone()
                        .map(|f| encoded_len(&layout.fields[f], object.values(f).get(rep)))
                        .sum::<usize>();
                    if size > self.threshold && rep + 1 < reps {
                        return Some((group.clone(), rep + 1));
                    }
                }
                i = group.fields.end;
                continue;
            }
            size += encoded_len(&layout.fields[i], object.values(i).first());
            i += 1;
        }
        None
    }

    /// `TTTLLLL` plus fields, dictionary fields resequenced.
    pub fn encode_control(&self, object: &Blockette, dictionary: &mut Resequencer) -> Result<Vec<u8>> {
        let layout = object.layout();
        let code = layout.code;
        let groups = layout.groups();
        let mut body = Vec::new();

        let mut i = 0;
        while i < layout.fields.len() {
            if let Some(group) = groups.iter().find(|g| g.fields.start == i) {
                let reps = object.values(group.fields.start).len();
                for rep in 0..reps {
                    for f in group.fields.clone() {
                        let value = object.values(f).get(rep).ok_or_else(|| {
                            ExportError::malformed(
                                code,
                                format!("{} is missing repetition {rep}", layout.fields[f].name),
                            )
                        })?;
                        self.encode_value(code, &layout.fields[f], value, dictionary, &mut body)?;
                    }
                }
                i = group.fields.end;
                continue;
            }

            let spec = &layout.fields[i];
            let value = match spec.role {
                FieldRole::Count => FieldValue::Int(object.stored_repetitions(i) as i64),
                FieldRole::Computed(what) => self.computed(what),
                _ => object
                    .values(i)
                    .first()
                    .cloned()
                    .unwrap_or_else(|| spec.format.default_value()),
            };
            self.encode_value(code, spec, &value, dictionary, &mut body)?;
            i += 1;
        }

        let total = CONTROL_HEADER_LENGTH + body.len();
        if total > MAX_CONTROL_LENGTH {
            return Err(ExportError::size(
                code,
                format!("{total} bytes exceeds {MAX_CONTROL_LENGTH} after twinning: {object}"),
            ));
        }
        let mut out = format!("{code:03}{total:04}").into_bytes();
        out.extend_from_slice(&body);
        Ok(out)
    }

    fn encode_value(
        &self,
        code: u16,
        spec: &FieldSpec,
        value: &FieldValue,
        dictionary: &mut Resequencer,
        out: &mut Vec<u8>,
    ) -> Result<()> {
        match spec.role {
            FieldRole::DictionaryKey(dict) | FieldRole::DictionaryRef(dict) => {
                let original = value.as_int().ok_or_else(|| {
                    ExportError::malformed(code, format!("{} is not an identifier", spec.name))
                })?;
                // 0 means "no reference" and is kept as is
                let index = if original == 0 {
                    0
                } else {
                    dictionary.resolve(dict, original)
                };
                encode_field(code, spec, &FieldValue::Int(index), out)
            }
            _ => encode_field(code, spec, value, out),
        }
    }

    fn computed(&self, what: Computed) -> FieldValue {
        match what {
            Computed::RecordLengthExp => FieldValue::Int(self.record_length_exp()),
            Computed::WordOrder => FieldValue::Int(1),
            // data-record offsets are filled by encode_data
            Computed::BlocketteCount | Computed::DataOffset | Computed::FirstBlockette => {
                FieldValue::Int(0)
            }
        }
    }

    /// Body of a data record (everything after the 8-byte record header)
    /// and the record's quality character.
    pub fn encode_data(&self, mold: &[Blockette]) -> Result<(char, Vec<u8>)> {
        let Some((lead, blockettes)) = mold.split_first() else {
            return Err(ExportError::Ordering("empty data record".into()));
        };
        if lead.layout().kind != LayoutKind::FixedHeader {
            return Err(ExportError::Ordering(format!(
                "data record must start with a fixed section, got {:03}",
                lead.code()
            )));
        }
        if let Some(stray) = blockettes
            .iter()
            .find(|b| b.layout().kind != LayoutKind::DataBlockette)
        {
            return Err(ExportError::Ordering(format!(
                "blockette {:03} cannot follow a fixed section",
                stray.code()
            )));
        }
        if blockettes.len() > u8::MAX as usize {
            return Err(ExportError::size(lead.code(), "too many data blockettes"));
        }

        // record offsets of each blockette
        let mut starts = Vec::with_capacity(blockettes.len());
        let mut offset = FIRST_BLOCKETTE_OFFSET;
        for b in blockettes {
            starts.push(offset);
            offset += DATA_BLOCKETTE_HEADER_LENGTH + fixed_body_len(b);
        }

        let payload = lead.payload().unwrap_or(&[]);
        let data_offset = if payload.is_empty() {
            0
        } else {
            offset.div_ceil(DATA_ALIGNMENT) * DATA_ALIGNMENT
        };
        if data_offset + payload.len() > self.logical_length {
            return Err(ExportError::size(
                lead.code(),
                format!(
                    "payload of {} bytes at offset {data_offset} exceeds {}-byte record: {lead}",
                    payload.len(),
                    self.logical_length
                ),
            ));
        }

        let mut body = Vec::with_capacity(self.logical_length - RECORD_HEADER_LENGTH);
        let mut quality = 'D';
        for (i, spec) in lead.layout().fields.iter().enumerate() {
            let value = match spec.role {
                FieldRole::RecordIndicator => {
                    if let Some(c) = lead
                        .values(i)
                        .first()
                        .and_then(FieldValue::as_text)
                        .and_then(|s| s.chars().next())
                    {
                        quality = c;
                    }
                    continue;
                }
                FieldRole::Computed(Computed::BlocketteCount) => FieldValue::Int(blockettes.len() as i64),
                FieldRole::Computed(Computed::DataOffset) => FieldValue::Int(data_offset as i64),
                FieldRole::Computed(Computed::FirstBlockette) => FieldValue::Int(if blockettes.is_empty() {
                    0
                } else {
                    FIRST_BLOCKETTE_OFFSET as i64
                }),
                FieldRole::Computed(what) => self.computed(what),
                _ => scalar(lead, i),
            };
            encode_field(lead.code(), spec, &value, &mut body)?;
        }

        for (k, b) in blockettes.iter().enumerate() {
            let next = starts.get(k + 1).copied().unwrap_or(0) as u16;
            body.extend_from_slice(&b.code().to_be_bytes());
            body.extend_from_slice(&next.to_be_bytes());
            for (i, spec) in b.layout().fields.iter().enumerate() {
                let value = match spec.role {
                    FieldRole::Computed(what) => self.computed(what),
                    _ => scalar(b, i),
                };
                encode_field(b.code(), spec, &value, &mut body)?;
            }
        }

        if data_offset > 0 {
            body.resize(data_offset - RECORD_HEADER_LENGTH, self.pad);
            body.extend_from_slice(payload);
        }
        Ok((quality, body))
    }
}

fn scalar(object: &Blockette, field: usize) -> FieldValue {
    object
        .values(field)
        .first()
        .cloned()
        .unwrap_or_else(|| object.layout().fields[field].format.default_value())
}

fn fixed_body_len(object: &Blockette) -> usize {
    object
        .layout()
        .fields
        .iter()
        .map(|f| f.format.width().unwrap_or(0))
        .sum()
}

/// Split `object` at repetition `written` of `group`.
///
/// The head keeps the first `written` repetitions of the group and every
/// group before it; the twin keeps the rest of the group and every group
/// after it. Scalar fields are copied into both.
pub fn twin(object: &Blockette, group: &RepeatGroup, written: usize) -> (Blockette, Blockette) {
    let mut head = object.clone();
    let mut tail = object.clone();
    for g in object.layout().groups() {
        for f in g.fields.clone() {
            if g.count_field == group.count_field {
                head.values_mut(f).truncate(written);
                let moved = written.min(tail.values(f).len());
                tail.values_mut(f).drain(..moved);
            } else if g.fields.start < group.fields.start {
                tail.values_mut(f).clear();
            } else {
                head.values_mut(f).clear();
            }
        }
        let head_reps = head.stored_repetitions(g.count_field);
        let tail_reps = tail.stored_repetitions(g.count_field);
        *head.values_mut(g.count_field) = vec![FieldValue::Int(head_reps as i64)];
        *tail.values_mut(g.count_field) = vec![FieldValue::Int(tail_reps as i64)];
    }
    tail.set_payload(None);
    (head, tail)
}

/// Encoded size of one field value.
pub fn encoded_len(spec: &FieldSpec, value: Option<&FieldValue>) -> usize {
    match spec.format {
        FieldFormat::Variable { .. } => value.and_then(FieldValue::as_text).map_or(0, str::len) + 1,
        FieldFormat::Time => {
            value
                .and_then(FieldValue::as_time)
                .map_or(0, |t| t.to_seed_ascii().len())
                + 1
        }
        other => other.width().unwrap_or(0),
    }
}

/// Serialize one field value in its wire format.
pub fn encode_field(code: u16, spec: &FieldSpec, value: &FieldValue, out: &mut Vec<u8>) -> Result<()> {
    let name = spec.name;
    let wrong = |expected: &str| {
        ExportError::malformed(code, format!("{name} expects {expected}, got {value}"))
    };
    let too_wide = |text: &str, width: usize| {
        ExportError::malformed(code, format!("{name} value {text:?} exceeds {width} characters"))
    };
    let int = || value.as_int().ok_or_else(|| wrong("an integer"));
    let binary = |min: i64, max: i64| {
        let v = int()?;
        if v < min || v > max {
            return Err(ExportError::malformed(
                code,
                format!("{name} value {v} outside {min}..={max}"),
            ));
        }
        Ok(v)
    };

    match spec.format {
        FieldFormat::Integer { width } => {
            let text = format!("{:0width$}", int()?);
            if text.len() > width {
                return Err(too_wide(&text, width));
            }
            out.extend_from_slice(text.as_bytes());
        }
        FieldFormat::Decimal { width, precision } => {
            let v = value.as_float().ok_or_else(|| wrong("a number"))?;
            let text = format!("{v:>width$.precision$}");
            if text.len() > width || !v.is_finite() {
                return Err(too_wide(&text, width));
            }
            out.extend_from_slice(text.as_bytes());
        }
        FieldFormat::Exponent { width, precision } => {
            let v = value.as_float().ok_or_else(|| wrong("a number"))?;
            let text = format!("{:>width$}", format_exponent(v, precision));
            if text.len() > width || !v.is_finite() {
                return Err(too_wide(&text, width));
            }
            out.extend_from_slice(text.as_bytes());
        }
        FieldFormat::Fixed { width } => {
            let text = value.as_text().ok_or_else(|| wrong("text"))?;
            if text.len() > width {
                return Err(too_wide(text, width));
            }
            out.extend_from_slice(format!("{text:<width$}").as_bytes());
        }
        FieldFormat::Variable { max } => {
            let text = value.as_text().ok_or_else(|| wrong("text"))?;
            if text.len() > max {
                return Err(too_wide(text, max));
            }
            if text.contains('~') {
                return Err(ExportError::malformed(code, format!("{name} contains '~'")));
            }
            out.extend_from_slice(text.as_bytes());
            out.push(b'~');
        }
        FieldFormat::Time => {
            let t = value.as_time().ok_or_else(|| wrong("a time"))?;
            out.extend_from_slice(t.to_seed_ascii().as_bytes());
            out.push(b'~');
        }
        FieldFormat::UByte => out.push(binary(0, u8::MAX as i64)? as u8),
        FieldFormat::Byte => out.push(binary(i8::MIN as i64, i8::MAX as i64)? as i8 as u8),
        FieldFormat::UWord => {
            out.extend_from_slice(&(binary(0, u16::MAX as i64)? as u16).to_be_bytes())
        }
        FieldFormat::Word => out.extend_from_slice(
            &(binary(i16::MIN as i64, i16::MAX as i64)? as i16).to_be_bytes(),
        ),
        FieldFormat::Long => out.extend_from_slice(
            &(binary(i32::MIN as i64, i32::MAX as i64)? as i32).to_be_bytes(),
        ),
        FieldFormat::BinaryTime => {
            let t = value.as_time().ok_or_else(|| wrong("a time"))?;
            let mut buf = [0u8; 10];
            t.write_binary(&mut buf);
            out.extend_from_slice(&buf);
        }
    }
    Ok(())
}

/// `1.23450E+02` style; negative mantissas carry a leading `-`.
pub fn format_exponent(value: f64, precision: usize) -> String {
    let raw = format!("{value:.precision$E}");
    match raw.split_once('E') {
        Some((mantissa, exp)) => {
            let exp: i32 = exp.parse().unwrap_or(0);
            let sign = if exp < 0 { '-' } else { '+' };
            format!("{mantissa}E{sign}{:02}", exp.abs())
        }
        None => raw,
    }
}
