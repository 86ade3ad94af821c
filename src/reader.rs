//! Iterator-based reader for exported volumes.
//!
//! [`VolumeReader`] walks a byte slice one logical record at a time, joins
//! control blockettes that continue across records and decodes data
//! records into their fixed section, data blockettes and payload. Physical
//! padding (records without a numeric sequence number) is skipped.
//!
//! # Example
//!
//! ```
//! use seed_export::{Layouts, ReadItem, VolumeReader};
//!
//! let mut record = b"000001A ".to_vec();
//! record.extend_from_slice(b"0330016001STS-2~");
//! record.resize(256, b' ');
//!
//! let layouts = Layouts::standard();
//! let items: Vec<_> = VolumeReader::new(&record, 256, &layouts)
//!     .collect::<Result<Vec<_>, _>>()
//!     .unwrap();
//! let ReadItem::Control { blockette, .. } = &items[0] else {
//!     panic!("expected a control blockette");
//! };
//! assert_eq!(blockette.text("description"), Some("STS-2"));
//! ```

use std::collections::VecDeque;

use crate::blockette::Blockette;
use crate::buffer::RECORD_HEADER_LENGTH;
use crate::codec::{self, Samples};
use crate::layout::{
    BlocketteLayout, CONTROL_HEADER_LENGTH, FieldFormat, FieldRole, FieldSpec, LayoutKind, Layouts,
};
use crate::time::BTime;
use crate::types::{EncodingFormat, FieldValue};
use crate::{ExportError, Result};

/// One decoded unit of a volume.
#[derive(Debug, Clone, PartialEq)]
pub enum ReadItem {
    Control {
        /// Record the blockette starts in.
        sequence: u32,
        record_type: char,
        blockette: Blockette,
    },
    Data {
        sequence: u32,
        header: Blockette,
        blockettes: Vec<Blockette>,
        /// Bytes from the data offset to the end of the record.
        payload: Vec<u8>,
    },
}

impl ReadItem {
    pub fn sequence(&self) -> u32 {
        match self {
            Self::Control { sequence, .. } | Self::Data { sequence, .. } => *sequence,
        }
    }

    /// Decode the payload of a data record through its blockette 1000.
    pub fn samples(&self) -> Result<Option<Samples>> {
        let Self::Data {
            header,
            blockettes,
            payload,
            ..
        } = self
        else {
            return Ok(None);
        };
        let Some(b1000) = blockettes.iter().find(|b| b.code() == 1000) else {
            return Ok(None);
        };
        let code = b1000.int("encoding").unwrap_or(0) as u8;
        let encoding = EncodingFormat::from_code(code)?;
        let count = header.int("sample_count").unwrap_or(0) as usize;
        codec::decode_samples(payload, encoding, count).map(Some)
    }
}

/// Iterator over the blockettes and data records of a volume.
pub struct VolumeReader<'a> {
    data: &'a [u8],
    logical_length: usize,
    layouts: &'a Layouts,
    offset: usize,
    /// Bytes of a control blockette continued in the next record.
    carry: Vec<u8>,
    carry_sequence: u32,
    carry_type: char,
    ready: VecDeque<ReadItem>,
}

impl<'a> VolumeReader<'a> {
    pub fn new(data: &'a [u8], logical_length: usize, layouts: &'a Layouts) -> Self {
        Self {
            data,
            logical_length,
            layouts,
            offset: 0,
            carry: Vec::new(),
            carry_sequence: 0,
            carry_type: ' ',
            ready: VecDeque::new(),
        }
    }

    fn read_record(&mut self, record: &[u8]) -> Result<()> {
        let Some(sequence) = parse_digits(&record[..6]) else {
            return Ok(());
        };
        let sequence = sequence as u32;
        let kind = record[6] as char;
        let continuation = record[7] == b'*';
        let body = &record[RECORD_HEADER_LENGTH..];

        match kind {
            'D' | 'R' | 'Q' | 'M' => {
                if !self.carry.is_empty() {
                    return Err(ExportError::InvalidRecord(format!(
                        "record {sequence} interrupts a blockette continued from record {}",
                        self.carry_sequence
                    )));
                }
                let item = self.read_data(sequence, kind, record)?;
                self.ready.push_back(item);
            }
            'V' | 'A' | 'S' | 'T' => {
                let mut start = sequence;
                if continuation {
                    if self.carry.is_empty() || kind != self.carry_type {
                        return Err(ExportError::InvalidRecord(format!(
                            "record {sequence} continues nothing"
                        )));
                    }
                    start = self.carry_sequence;
                } else if !self.carry.is_empty() {
                    return Err(ExportError::InvalidRecord(format!(
                        "blockette from record {} not continued in record {sequence}",
                        self.carry_sequence
                    )));
                }
                self.carry.extend_from_slice(body);
                self.read_control(kind, start, sequence)?;
            }
            other => {
                return Err(ExportError::InvalidRecord(format!(
                    "record {sequence} has unknown type {other:?}"
                )));
            }
        }
        Ok(())
    }

    /// Decode every complete blockette in the carry buffer; keep a cut-off
    /// one for the next record and drop padding.
    fn read_control(&mut self, kind: char, mut start: u32, sequence: u32) -> Result<()> {
        let mut pos = 0;
        loop {
            let rest = &self.carry[pos..];
            let Some((code, length)) = control_header(rest) else {
                self.carry.clear();
                return Ok(());
            };
            if length > rest.len() {
                self.carry.drain(..pos);
                self.carry_sequence = start;
                self.carry_type = kind;
                return Ok(());
            }
            let layout = self.layouts.get(code)?;
            let blockette = decode_control(layout, &rest[..length])?;
            self.ready.push_back(ReadItem::Control {
                sequence: start,
                record_type: kind,
                blockette,
            });
            pos += length;
            start = sequence;
        }
    }

    fn read_data(&self, sequence: u32, kind: char, record: &[u8]) -> Result<ReadItem> {
        let header_layout = self.layouts.get(999)?;
        let mut header = Blockette::new(header_layout);
        let mut cursor = FieldCursor::new(999, &record[RECORD_HEADER_LENGTH..]);
        for (i, spec) in header_layout.fields.iter().enumerate() {
            let value = match spec.role {
                FieldRole::RecordIndicator => FieldValue::Text(kind.to_string()),
                _ => cursor.field(spec)?,
            };
            *header.values_mut(i) = vec![value];
        }

        let count = header.int("blockette_count").unwrap_or(0);
        let mut offset = header.int("first_blockette").unwrap_or(0) as usize;
        let mut blockettes = Vec::new();
        for _ in 0..count {
            if offset == 0 {
                break;
            }
            let head = record
                .get(offset..offset + 4)
                .ok_or(ExportError::RecordTooShort {
                    expected: offset + 4,
                    actual: record.len(),
                })?;
            let code = u16::from_be_bytes([head[0], head[1]]);
            let next = u16::from_be_bytes([head[2], head[3]]) as usize;
            let layout = self.layouts.get(code)?;
            if layout.kind != LayoutKind::DataBlockette {
                return Err(ExportError::InvalidRecord(format!(
                    "blockette {code:03} inside data record {sequence}"
                )));
            }
            let mut b = Blockette::new(layout);
            let mut cursor = FieldCursor::new(code, &record[offset + 4..]);
            for (i, spec) in layout.fields.iter().enumerate() {
                *b.values_mut(i) = vec![cursor.field(spec)?];
            }
            blockettes.push(b);
            offset = next;
        }

        let data_offset = header.int("data_offset").unwrap_or(0) as usize;
        let payload = match data_offset {
            0 => Vec::new(),
            start => record
                .get(start..)
                .ok_or(ExportError::RecordTooShort {
                    expected: start,
                    actual: record.len(),
                })?
                .to_vec(),
        };
        Ok(ReadItem::Data {
            sequence,
            header,
            blockettes,
            payload,
        })
    }
}

impl Iterator for VolumeReader<'_> {
    type Item = Result<ReadItem>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if let Some(item) = self.ready.pop_front() {
                return Some(Ok(item));
            }
            let end = self.offset + self.logical_length;
            if end > self.data.len() {
                if self.carry.is_empty() {
                    return None;
                }
                let missing = self.carry.len();
                self.carry.clear();
                return Some(Err(ExportError::RecordTooShort {
                    expected: missing + 1,
                    actual: missing,
                }));
            }
            let data = self.data;
            let record = &data[self.offset..end];
            self.offset = end;
            if let Err(e) = self.read_record(record) {
                // stop iteration
                self.offset = self.data.len();
                self.carry.clear();
                self.ready.clear();
                return Some(Err(e));
            }
        }
    }
}

fn parse_digits(bytes: &[u8]) -> Option<u64> {
    if bytes.is_empty() || !bytes.iter().all(u8::is_ascii_digit) {
        return None;
    }
    std::str::from_utf8(bytes).ok()?.parse().ok()
}

/// Type and total length from a `TTTLLLL` prefix.
fn control_header(bytes: &[u8]) -> Option<(u16, usize)> {
    let header = bytes.get(..CONTROL_HEADER_LENGTH)?;
    let code = parse_digits(&header[..3])? as u16;
    let length = parse_digits(&header[3..])? as usize;
    (length >= CONTROL_HEADER_LENGTH).then_some((code, length))
}

/// Decode one control blockette, prefix included.
pub fn decode_control(layout: &'static BlocketteLayout, bytes: &[u8]) -> Result<Blockette> {
    let groups = layout.groups();
    let mut b = Blockette::new(layout);
    let mut cursor = FieldCursor::new(layout.code, &bytes[CONTROL_HEADER_LENGTH.min(bytes.len())..]);
    let mut i = 0;
    while i < layout.fields.len() {
        if let Some(group) = groups.iter().find(|g| g.fields.start == i) {
            let reps = b
                .values(group.count_field)
                .first()
                .and_then(FieldValue::as_int)
                .unwrap_or(0);
            for _ in 0..reps {
                for f in group.fields.clone() {
                    let value = cursor.field(&layout.fields[f])?;
                    b.values_mut(f).push(value);
                }
            }
            i = group.fields.end;
            continue;
        }
        *b.values_mut(i) = vec![cursor.field(&layout.fields[i])?];
        i += 1;
    }
    Ok(b)
}

struct FieldCursor<'a> {
    code: u16,
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> FieldCursor<'a> {
    fn new(code: u16, bytes: &'a [u8]) -> Self {
        Self { code, bytes, pos: 0 }
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8]> {
        let slice = self
            .bytes
            .get(self.pos..self.pos + n)
            .ok_or(ExportError::RecordTooShort {
                expected: self.pos + n,
                actual: self.bytes.len(),
            })?;
        self.pos += n;
        Ok(slice)
    }

    fn text(&mut self, n: usize) -> Result<&'a str> {
        let code = self.code;
        let bytes = self.take(n)?;
        std::str::from_utf8(bytes)
            .map_err(|_| ExportError::malformed(code, "field is not ASCII"))
    }

    fn variable(&mut self) -> Result<&'a str> {
        let rest = &self.bytes[self.pos.min(self.bytes.len())..];
        let end = rest.iter().position(|&b| b == b'~').ok_or_else(|| {
            ExportError::malformed(self.code, "variable field missing '~'")
        })?;
        let text = self.text(end)?;
        self.pos += 1;
        Ok(text)
    }

    fn field(&mut self, spec: &FieldSpec) -> Result<FieldValue> {
        let code = self.code;
        let number_error = |text: &str| {
            ExportError::malformed(code, format!("{} holds {text:?}", spec.name))
        };
        Ok(match spec.format {
            FieldFormat::Integer { width } => {
                let text = self.text(width)?.trim();
                FieldValue::Int(if text.is_empty() {
                    0
                } else {
                    text.parse().map_err(|_| number_error(text))?
                })
            }
            FieldFormat::Decimal { width, .. } | FieldFormat::Exponent { width, .. } => {
                let text = self.text(width)?.trim();
                FieldValue::Float(text.parse().map_err(|_| number_error(text))?)
            }
            FieldFormat::Fixed { width } => FieldValue::Text(self.text(width)?.trim_end().to_string()),
            FieldFormat::Variable { .. } => FieldValue::Text(self.variable()?.to_string()),
            FieldFormat::Time => FieldValue::Time(BTime::parse_seed_ascii(self.variable()?)?),
            FieldFormat::UByte => FieldValue::Int(self.take(1)?[0] as i64),
            FieldFormat::Byte => FieldValue::Int(self.take(1)?[0] as i8 as i64),
            FieldFormat::UWord => {
                let b = self.take(2)?;
                FieldValue::Int(u16::from_be_bytes([b[0], b[1]]) as i64)
            }
            FieldFormat::Word => {
                let b = self.take(2)?;
                FieldValue::Int(i16::from_be_bytes([b[0], b[1]]) as i64)
            }
            FieldFormat::Long => {
                let b = self.take(4)?;
                FieldValue::Int(i32::from_be_bytes([b[0], b[1], b[2], b[3]]) as i64)
            }
            FieldFormat::BinaryTime => FieldValue::Time(BTime::read_binary(self.take(10)?)),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(sequence: u32, kind: char, continuation: bool, body: &[u8], length: usize) -> Vec<u8> {
        let mut r = format!("{sequence:06}{kind}{}", if continuation { '*' } else { ' ' }).into_bytes();
        r.extend_from_slice(body);
        r.resize(length, b' ');
        r
    }

    #[test]
    fn test_joins_continued_blockette() {
        let blockette = b"0330032001Streckeisen STS-2 VBB~";
        let mut data = record(1, 'A', false, &blockette[..20], 28);
        data.extend(record(2, 'A', true, &blockette[20..], 28));
        let layouts = Layouts::standard();
        let items: Vec<ReadItem> = VolumeReader::new(&data, 28, &layouts)
            .collect::<Result<_>>()
            .unwrap();
        assert_eq!(items.len(), 1);
        let ReadItem::Control {
            sequence,
            record_type,
            blockette,
        } = &items[0]
        else {
            panic!("expected control item");
        };
        assert_eq!(*sequence, 1);
        assert_eq!(*record_type, 'A');
        assert_eq!(blockette.int("lookup"), Some(1));
        assert_eq!(blockette.text("description"), Some("Streckeisen STS-2 VBB"));
    }

    #[test]
    fn test_skips_filler_records() {
        let mut data = record(1, 'A', false, b"0330012001X~", 64);
        data.extend(vec![b' '; 128]);
        let layouts = Layouts::standard();
        let items: Vec<_> = VolumeReader::new(&data, 64, &layouts).collect();
        assert_eq!(items.len(), 1);
        assert!(items[0].is_ok());
    }

    #[test]
    fn test_dangling_continuation_is_error() {
        let data = record(1, 'A', true, b"0330012001X~", 64);
        let layouts = Layouts::standard();
        let first = VolumeReader::new(&data, 64, &layouts).next().unwrap();
        assert!(matches!(first, Err(ExportError::InvalidRecord(_))));
    }

    #[test]
    fn test_repeating_groups_follow_counts() {
        let body = b"0110032002ANMO 000003CCM  000004";
        let data = record(1, 'V', false, body, 64);
        let layouts = Layouts::standard();
        let item = VolumeReader::new(&data, 64, &layouts).next().unwrap().unwrap();
        let ReadItem::Control { blockette, .. } = item else {
            panic!("expected control item");
        };
        assert_eq!(blockette.int("station_count"), Some(2));
        assert_eq!(
            blockette.get_repeated("station"),
            &[FieldValue::from("ANMO"), FieldValue::from("CCM")]
        );
        assert_eq!(blockette.get_repeated("station_record")[1], FieldValue::Int(4));
    }

    #[test]
    fn test_unknown_blockette_stops_iteration() {
        let mut data = record(1, 'A', false, b"0990012001X~", 64);
        data.extend(record(2, 'A', false, b"0330012001X~", 64));
        let layouts = Layouts::standard();
        let items: Vec<_> = VolumeReader::new(&data, 64, &layouts).collect();
        assert_eq!(items.len(), 1);
        assert!(matches!(items[0], Err(ExportError::UnknownBlockette(99))));
    }
}
