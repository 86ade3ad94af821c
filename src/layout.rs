//! Blockette field layouts.
//!
//! A [`BlocketteLayout`] lists the fields of one blockette type in wire
//! order, excluding the type/length (or type/next-offset) header which the
//! transcoder writes itself. Fields that repeat point at the count field
//! that governs them; all fields sharing a count form one contiguous
//! repeating group.
//!
//! [`Layouts`] is the registry the engine consults. [`Layouts::standard`]
//! covers the control headers a full SEED volume needs plus the data-record
//! fixed section (type 999) and blockettes 1000 and 1001.

use std::collections::HashMap;
use std::ops::Range;

use crate::time::BTime;
use crate::types::FieldValue;
use crate::{ExportError, Result};

/// Longest control blockette the 4-digit length field can describe.
pub const MAX_CONTROL_LENGTH: usize = 9999;

/// Type code (3 digits) plus length (4 digits).
pub const CONTROL_HEADER_LENGTH: usize = 7;

/// Data record fixed section after the record header, in bytes.
pub const FIXED_SECTION_LENGTH: usize = 40;

/// Type code (u16) plus next-blockette offset (u16).
pub const DATA_BLOCKETTE_HEADER_LENGTH: usize = 4;

/// Wire format of one field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldFormat {
    /// Zero-padded decimal integer.
    Integer { width: usize },
    /// Fixed-point decimal, right-justified.
    Decimal { width: usize, precision: usize },
    /// `#.####E-##` float, right-justified.
    Exponent { width: usize, precision: usize },
    /// Left-justified text, space padded.
    Fixed { width: usize },
    /// `~`-terminated text of at most `max` characters.
    Variable { max: usize },
    /// `~`-terminated `YYYY,DDD,HH:MM:SS.FFFF`.
    Time,
    UByte,
    Byte,
    UWord,
    Word,
    Long,
    /// 10-byte binary BTIME.
    BinaryTime,
}

impl FieldFormat {
    /// Encoded width, `None` for `~`-terminated formats.
    pub fn width(self) -> Option<usize> {
        match self {
            Self::Integer { width }
            | Self::Decimal { width, .. }
            | Self::Exponent { width, .. }
            | Self::Fixed { width } => Some(width),
            Self::Variable { .. } | Self::Time => None,
            Self::UByte | Self::Byte => Some(1),
            Self::UWord | Self::Word => Some(2),
            Self::Long => Some(4),
            Self::BinaryTime => Some(10),
        }
    }

    /// Value written when an object leaves a scalar field unset.
    pub fn default_value(self) -> FieldValue {
        match self {
            Self::Fixed { .. } | Self::Variable { .. } => FieldValue::Text(String::new()),
            Self::Time | Self::BinaryTime => FieldValue::Time(BTime::epoch()),
            Self::Decimal { .. } | Self::Exponent { .. } => FieldValue::Float(0.0),
            _ => FieldValue::Int(0),
        }
    }
}

/// Values the transcoder derives from the volume layout rather than the object.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Computed {
    /// log2 of the logical record length.
    RecordLengthExp,
    /// 1 = big endian, the only order written.
    WordOrder,
    BlocketteCount,
    DataOffset,
    FirstBlockette,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldRole {
    Plain,
    /// Number of repetitions of the group that points here.
    Count,
    /// The object's own identifier in dictionary `type`.
    DictionaryKey(u16),
    /// A cross-reference into dictionary `type`.
    DictionaryRef(u16),
    Computed(Computed),
    /// Lives in the logical record header (data quality character).
    RecordIndicator,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FieldSpec {
    pub name: &'static str,
    pub format: FieldFormat,
    pub role: FieldRole,
    /// Index of the count field if this field repeats.
    pub repeat: Option<usize>,
}

impl FieldSpec {
    pub const fn new(name: &'static str, format: FieldFormat) -> Self {
        Self {
            name,
            format,
            role: FieldRole::Plain,
            repeat: None,
        }
    }

    pub const fn int(name: &'static str, width: usize) -> Self {
        Self::new(name, FieldFormat::Integer { width })
    }

    pub const fn dec(name: &'static str, width: usize, precision: usize) -> Self {
        Self::new(name, FieldFormat::Decimal { width, precision })
    }

    pub const fn exp(name: &'static str, width: usize, precision: usize) -> Self {
        Self::new(name, FieldFormat::Exponent { width, precision })
    }

    pub const fn fixed(name: &'static str, width: usize) -> Self {
        Self::new(name, FieldFormat::Fixed { width })
    }

    pub const fn var(name: &'static str, max: usize) -> Self {
        Self::new(name, FieldFormat::Variable { max })
    }

    pub const fn time(name: &'static str) -> Self {
        Self::new(name, FieldFormat::Time)
    }

    pub const fn count(self) -> Self {
        Self {
            role: FieldRole::Count,
            ..self
        }
    }

    pub const fn key(self, dictionary: u16) -> Self {
        Self {
            role: FieldRole::DictionaryKey(dictionary),
            ..self
        }
    }

    pub const fn refers(self, dictionary: u16) -> Self {
        Self {
            role: FieldRole::DictionaryRef(dictionary),
            ..self
        }
    }

    pub const fn computed(self, what: Computed) -> Self {
        Self {
            role: FieldRole::Computed(what),
            ..self
        }
    }

    pub const fn indicator(self) -> Self {
        Self {
            role: FieldRole::RecordIndicator,
            ..self
        }
    }

    pub const fn repeats(self, count_field: usize) -> Self {
        Self {
            repeat: Some(count_field),
            ..self
        }
    }
}

/// How a blockette is framed on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LayoutKind {
    /// ASCII control header with `TTTLLLL` prefix.
    Control,
    /// Data record fixed section, no prefix.
    FixedHeader,
    /// Binary data blockette with type/next-offset prefix.
    DataBlockette,
}

/// A repeating field group.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RepeatGroup {
    pub count_field: usize,
    pub fields: Range<usize>,
}

#[derive(Debug, PartialEq, Eq)]
pub struct BlocketteLayout {
    pub code: u16,
    pub name: &'static str,
    pub kind: LayoutKind,
    /// Record type character of the section this blockette lives in.
    pub section: char,
    pub fields: &'static [FieldSpec],
}

impl BlocketteLayout {
    pub fn field_index(&self, name: &str) -> Option<usize> {
        self.fields.iter().position(|f| f.name == name)
    }

    /// Repeating groups in field order.
    pub fn groups(&self) -> Vec<RepeatGroup> {
        let mut groups: Vec<RepeatGroup> = Vec::new();
        for (i, spec) in self.fields.iter().enumerate() {
            let Some(count_field) = spec.repeat else {
                continue;
            };
            match groups.last_mut() {
                Some(g) if g.count_field == count_field && g.fields.end == i => g.fields.end = i + 1,
                _ => groups.push(RepeatGroup {
                    count_field,
                    fields: i..i + 1,
                }),
            }
        }
        groups
    }

    /// The group whose first field is `field`.
    pub fn group_starting_at(&self, field: usize) -> Option<RepeatGroup> {
        self.groups().into_iter().find(|g| g.fields.start == field)
    }

    /// Structural checks: counts precede their groups, groups are contiguous.
    pub fn check(&self) -> Result<()> {
        let bad = |detail: String| ExportError::Config(format!("layout {:03}: {detail}", self.code));
        let groups = self.groups();
        for (i, g) in groups.iter().enumerate() {
            if groups[..i].iter().any(|o| o.count_field == g.count_field) {
                return Err(bad(format!("group counted by field {} is split", g.count_field)));
            }
            let count = self
                .fields
                .get(g.count_field)
                .ok_or_else(|| bad(format!("count field {} missing", g.count_field)))?;
            if count.role != FieldRole::Count || count.repeat.is_some() {
                return Err(bad(format!("field {} is not a scalar count", count.name)));
            }
            if g.count_field >= g.fields.start {
                return Err(bad(format!("count {} follows its group", count.name)));
            }
        }
        if self.kind == LayoutKind::Control {
            return Ok(());
        }
        // binary layouts are sized from their field widths alone
        let mut body = 0;
        for f in self.fields {
            let width = f
                .format
                .width()
                .ok_or_else(|| bad(format!("field {} has no fixed width", f.name)))?;
            if f.repeat.is_some() {
                return Err(bad(format!("field {} repeats", f.name)));
            }
            if f.role != FieldRole::RecordIndicator {
                body += width;
            }
        }
        if self.kind == LayoutKind::FixedHeader && body != FIXED_SECTION_LENGTH {
            return Err(bad(format!(
                "fixed section is {body} bytes, not {FIXED_SECTION_LENGTH}"
            )));
        }
        Ok(())
    }
}

/// Registry of layouts by type code.
#[derive(Debug, Clone)]
pub struct Layouts {
    by_code: HashMap<u16, &'static BlocketteLayout>,
}

impl Layouts {
    pub fn empty() -> Self {
        Self {
            by_code: HashMap::new(),
        }
    }

    pub fn standard() -> Self {
        let mut layouts = Self::empty();
        for &layout in STANDARD {
            layouts.by_code.insert(layout.code, layout);
        }
        layouts
    }

    /// Add or replace a layout.
    pub fn register(&mut self, layout: &'static BlocketteLayout) -> Result<()> {
        layout.check()?;
        self.by_code.insert(layout.code, layout);
        Ok(())
    }

    pub fn get(&self, code: u16) -> Result<&'static BlocketteLayout> {
        self.by_code
            .get(&code)
            .copied()
            .ok_or(ExportError::UnknownBlockette(code))
    }
}

impl Default for Layouts {
    fn default() -> Self {
        Self::standard()
    }
}

/// Look up a standard layout without a registry.
pub fn standard(code: u16) -> Option<&'static BlocketteLayout> {
    STANDARD.iter().copied().find(|l| l.code == code)
}

const fn control(
    code: u16,
    name: &'static str,
    section: char,
    fields: &'static [FieldSpec],
) -> BlocketteLayout {
    BlocketteLayout {
        code,
        name,
        kind: LayoutKind::Control,
        section,
        fields,
    }
}

static STANDARD: &[&BlocketteLayout] = &[
    &B010, &B011, &B012, &B030, &B031, &B033, &B034, &B050, &B051, &B052, &B053, &B054, &B057,
    &B058, &B070, &B074, &B999, &B1000, &B1001,
];

pub static B010: BlocketteLayout = control(
    10,
    "Volume Identifier",
    'V',
    &[
        FieldSpec::fixed("version", 4),
        FieldSpec::int("record_length", 2).computed(Computed::RecordLengthExp),
        FieldSpec::time("begin"),
        FieldSpec::time("end"),
        FieldSpec::time("volume_time"),
        FieldSpec::var("organization", 80),
        FieldSpec::var("label", 80),
    ],
);

pub static B011: BlocketteLayout = control(
    11,
    "Volume Station Header Index",
    'V',
    &[
        FieldSpec::int("station_count", 3).count(),
        FieldSpec::fixed("station", 5).repeats(0),
        FieldSpec::int("station_record", 6).repeats(0),
    ],
);

pub static B012: BlocketteLayout = control(
    12,
    "Volume Time Span Index",
    'V',
    &[
        FieldSpec::int("span_count", 4).count(),
        FieldSpec::time("span_begin").repeats(0),
        FieldSpec::time("span_end").repeats(0),
        FieldSpec::int("span_record", 6).repeats(0),
    ],
);

pub static B030: BlocketteLayout = control(
    30,
    "Data Format Dictionary",
    'A',
    &[
        FieldSpec::var("name", 50),
        FieldSpec::int("format_code", 4).key(30),
        FieldSpec::int("family", 3),
        FieldSpec::int("key_count", 2).count(),
        FieldSpec::var("decoder_key", 100).repeats(3),
    ],
);

pub static B031: BlocketteLayout = control(
    31,
    "Comment Description",
    'A',
    &[
        FieldSpec::int("comment_code", 4).key(31),
        FieldSpec::fixed("class", 1),
        FieldSpec::var("description", 70),
        FieldSpec::int("units", 3),
    ],
);

pub static B033: BlocketteLayout = control(
    33,
    "Generic Abbreviation",
    'A',
    &[
        FieldSpec::int("lookup", 3).key(33),
        FieldSpec::var("description", 50),
    ],
);

pub static B034: BlocketteLayout = control(
    34,
    "Units Abbreviations",
    'A',
    &[
        FieldSpec::int("lookup", 3).key(34),
        FieldSpec::var("name", 20),
        FieldSpec::var("description", 50),
    ],
);

pub static B050: BlocketteLayout = control(
    50,
    "Station Identifier",
    'S',
    &[
        FieldSpec::fixed("station", 5),
        FieldSpec::dec("latitude", 10, 6),
        FieldSpec::dec("longitude", 11, 6),
        FieldSpec::dec("elevation", 7, 1),
        FieldSpec::int("channel_count", 4),
        FieldSpec::int("comment_count", 3),
        FieldSpec::var("site_name", 60),
        FieldSpec::int("network_id", 3).refers(33),
        FieldSpec::int("long_order", 4),
        FieldSpec::int("short_order", 2),
        FieldSpec::time("start"),
        FieldSpec::time("end"),
        FieldSpec::fixed("update", 1),
        FieldSpec::fixed("network", 2),
    ],
);

pub static B051: BlocketteLayout = control(
    51,
    "Station Comment",
    'S',
    &[
        FieldSpec::time("begin"),
        FieldSpec::time("end"),
        FieldSpec::int("comment_code", 4).refers(31),
        FieldSpec::int("comment_level", 6),
    ],
);

pub static B052: BlocketteLayout = control(
    52,
    "Channel Identifier",
    'S',
    &[
        FieldSpec::fixed("location", 2),
        FieldSpec::fixed("channel", 3),
        FieldSpec::int("subchannel", 4),
        FieldSpec::int("instrument", 3).refers(33),
        FieldSpec::var("comment", 30),
        FieldSpec::int("signal_units", 3).refers(34),
        FieldSpec::int("calibration_units", 3).refers(34),
        FieldSpec::dec("latitude", 10, 6),
        FieldSpec::dec("longitude", 11, 6),
        FieldSpec::dec("elevation", 7, 1),
        FieldSpec::dec("local_depth", 5, 1),
        FieldSpec::dec("azimuth", 5, 1),
        FieldSpec::dec("dip", 5, 1),
        FieldSpec::int("data_format", 4).refers(30),
        FieldSpec::int("record_length", 2).computed(Computed::RecordLengthExp),
        FieldSpec::exp("sample_rate", 10, 4),
        FieldSpec::exp("max_drift", 10, 4),
        FieldSpec::int("comment_count", 4),
        FieldSpec::var("flags", 26),
        FieldSpec::time("start"),
        FieldSpec::time("end"),
        FieldSpec::fixed("update", 1),
    ],
);

pub static B053: BlocketteLayout = control(
    53,
    "Response (Poles & Zeros)",
    'S',
    &[
        FieldSpec::fixed("transfer_type", 1),
        FieldSpec::int("stage", 2),
        FieldSpec::int("input_units", 3).refers(34),
        FieldSpec::int("output_units", 3).refers(34),
        FieldSpec::exp("a0", 12, 5),
        FieldSpec::exp("normalization_frequency", 12, 5),
        FieldSpec::int("zero_count", 3).count(),
        FieldSpec::exp("zero_real", 12, 5).repeats(6),
        FieldSpec::exp("zero_imag", 12, 5).repeats(6),
        FieldSpec::exp("zero_real_error", 12, 5).repeats(6),
        FieldSpec::exp("zero_imag_error", 12, 5).repeats(6),
        FieldSpec::int("pole_count", 3).count(),
        FieldSpec::exp("pole_real", 12, 5).repeats(11),
        FieldSpec::exp("pole_imag", 12, 5).repeats(11),
        FieldSpec::exp("pole_real_error", 12, 5).repeats(11),
        FieldSpec::exp("pole_imag_error", 12, 5).repeats(11),
    ],
);

pub static B054: BlocketteLayout = control(
    54,
    "Response (Coefficients)",
    'S',
    &[
        FieldSpec::fixed("response_type", 1),
        FieldSpec::int("stage", 2),
        FieldSpec::int("input_units", 3).refers(34),
        FieldSpec::int("output_units", 3).refers(34),
        FieldSpec::int("numerator_count", 4).count(),
        FieldSpec::exp("numerator", 12, 5).repeats(4),
        FieldSpec::exp("numerator_error", 12, 5).repeats(4),
        FieldSpec::int("denominator_count", 4).count(),
        FieldSpec::exp("denominator", 12, 5).repeats(7),
        FieldSpec::exp("denominator_error", 12, 5).repeats(7),
    ],
);

pub static B057: BlocketteLayout = control(
    57,
    "Decimation",
    'S',
    &[
        FieldSpec::int("stage", 2),
        FieldSpec::exp("input_rate", 10, 4),
        FieldSpec::int("factor", 5),
        FieldSpec::int("offset", 5),
        FieldSpec::exp("delay", 11, 4),
        FieldSpec::exp("correction", 11, 4),
    ],
);

pub static B058: BlocketteLayout = control(
    58,
    "Channel Sensitivity/Gain",
    'S',
    &[
        FieldSpec::int("stage", 2),
        FieldSpec::exp("sensitivity", 12, 5),
        FieldSpec::exp("frequency", 12, 5),
        FieldSpec::int("history_count", 2).count(),
        FieldSpec::exp("cal_sensitivity", 12, 5).repeats(3),
        FieldSpec::exp("cal_frequency", 12, 5).repeats(3),
        FieldSpec::time("cal_time").repeats(3),
    ],
);

pub static B070: BlocketteLayout = control(
    70,
    "Time Span Identifier",
    'T',
    &[
        FieldSpec::fixed("flag", 1),
        FieldSpec::time("begin"),
        FieldSpec::time("end"),
    ],
);

pub static B074: BlocketteLayout = control(
    74,
    "Time Series Index",
    'T',
    &[
        FieldSpec::fixed("station", 5),
        FieldSpec::fixed("location", 2),
        FieldSpec::fixed("channel", 3),
        FieldSpec::time("series_start"),
        FieldSpec::int("start_record", 6),
        FieldSpec::int("start_subsequence", 2),
        FieldSpec::time("series_end"),
        FieldSpec::int("end_record", 6),
        FieldSpec::int("end_subsequence", 2),
        FieldSpec::int("accelerator_count", 3).count(),
        FieldSpec::time("accelerator_time").repeats(9),
        FieldSpec::int("accelerator_record", 6).repeats(9),
        FieldSpec::int("accelerator_subsequence", 2).repeats(9),
        FieldSpec::fixed("network", 2),
    ],
);

/// Data record fixed section. 999 is not a SEED blockette number; the
/// object model uses it for the 40 bytes that follow the record header.
pub static B999: BlocketteLayout = BlocketteLayout {
    code: 999,
    name: "Fixed Section of Data Header",
    kind: LayoutKind::FixedHeader,
    section: 'D',
    fields: &[
        FieldSpec::fixed("quality", 1).indicator(),
        FieldSpec::fixed("station", 5),
        FieldSpec::fixed("location", 2),
        FieldSpec::fixed("channel", 3),
        FieldSpec::fixed("network", 2),
        FieldSpec::new("start", FieldFormat::BinaryTime),
        FieldSpec::new("sample_count", FieldFormat::UWord),
        FieldSpec::new("rate_factor", FieldFormat::Word),
        FieldSpec::new("rate_multiplier", FieldFormat::Word),
        FieldSpec::new("activity_flags", FieldFormat::UByte),
        FieldSpec::new("io_flags", FieldFormat::UByte),
        FieldSpec::new("quality_flags", FieldFormat::UByte),
        FieldSpec::new("blockette_count", FieldFormat::UByte).computed(Computed::BlocketteCount),
        FieldSpec::new("time_correction", FieldFormat::Long),
        FieldSpec::new("data_offset", FieldFormat::UWord).computed(Computed::DataOffset),
        FieldSpec::new("first_blockette", FieldFormat::UWord).computed(Computed::FirstBlockette),
    ],
};

pub static B1000: BlocketteLayout = BlocketteLayout {
    code: 1000,
    name: "Data Only SEED",
    kind: LayoutKind::DataBlockette,
    section: 'D',
    fields: &[
        FieldSpec::new("encoding", FieldFormat::UByte),
        FieldSpec::new("word_order", FieldFormat::UByte).computed(Computed::WordOrder),
        FieldSpec::new("record_length", FieldFormat::UByte).computed(Computed::RecordLengthExp),
        FieldSpec::new("reserved", FieldFormat::UByte),
    ],
};

pub static B1001: BlocketteLayout = BlocketteLayout {
    code: 1001,
    name: "Data Extension",
    kind: LayoutKind::DataBlockette,
    section: 'D',
    fields: &[
        FieldSpec::new("timing_quality", FieldFormat::UByte),
        FieldSpec::new("microseconds", FieldFormat::Byte),
        FieldSpec::new("reserved", FieldFormat::UByte),
        FieldSpec::new("frame_count", FieldFormat::UByte),
    ],
};
