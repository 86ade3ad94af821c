//! Waveform sample transform.
//!
//! The engine treats encoded samples as an opaque payload. This module
//! produces and interprets those payloads for the uncompressed encodings,
//! always in big-endian word order.

use crate::types::EncodingFormat;
use crate::{ExportError, Result};

/// Sample data.
#[derive(Debug, Clone, PartialEq)]
pub enum Samples {
    Int(Vec<i32>),
    Float(Vec<f32>),
    Double(Vec<f64>),
}

impl Samples {
    pub fn len(&self) -> usize {
        match self {
            Samples::Int(v) => v.len(),
            Samples::Float(v) => v.len(),
            Samples::Double(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Encode samples into payload bytes.
pub fn encode_samples(samples: &Samples, encoding: EncodingFormat) -> Result<Vec<u8>> {
    let mismatch = || {
        ExportError::malformed(
            1000,
            format!("{encoding} encoding does not accept these samples"),
        )
    };
    let mut data = Vec::with_capacity(samples.len() * encoding.sample_width());
    match (encoding, samples) {
        (EncodingFormat::Int16, Samples::Int(v)) => {
            for &val in v {
                let s = i16::try_from(val).map_err(|_| {
                    ExportError::malformed(1000, format!("sample {val} overflows INT16"))
                })?;
                data.extend_from_slice(&s.to_be_bytes());
            }
        }
        (EncodingFormat::Int32, Samples::Int(v)) => {
            v.iter().for_each(|val| data.extend_from_slice(&val.to_be_bytes()));
        }
        (EncodingFormat::Float32, Samples::Float(v)) => {
            v.iter().for_each(|val| data.extend_from_slice(&val.to_be_bytes()));
        }
        (EncodingFormat::Float64, Samples::Double(v)) => {
            v.iter().for_each(|val| data.extend_from_slice(&val.to_be_bytes()));
        }
        _ => return Err(mismatch()),
    }
    Ok(data)
}

/// Decode `num_samples` samples from the start of `data`.
pub fn decode_samples(data: &[u8], encoding: EncodingFormat, num_samples: usize) -> Result<Samples> {
    let width = encoding.sample_width();
    let needed = num_samples * width;
    if data.len() < needed {
        return Err(ExportError::RecordTooShort {
            expected: needed,
            actual: data.len(),
        });
    }
    let words = data[..needed].chunks_exact(width);
    Ok(match encoding {
        EncodingFormat::Int16 => {
            Samples::Int(words.map(|w| i16::from_be_bytes([w[0], w[1]]) as i32).collect())
        }
        EncodingFormat::Int32 => {
            Samples::Int(words.map(|w| i32::from_be_bytes([w[0], w[1], w[2], w[3]])).collect())
        }
        EncodingFormat::Float32 => {
            Samples::Float(words.map(|w| f32::from_be_bytes([w[0], w[1], w[2], w[3]])).collect())
        }
        EncodingFormat::Float64 => Samples::Double(
            words
                .map(|w| f64::from_be_bytes([w[0], w[1], w[2], w[3], w[4], w[5], w[6], w[7]]))
                .collect(),
        ),
    })
}
