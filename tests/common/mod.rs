//! Fixtures shared by the integration tests.

#![allow(dead_code)]

use seed_export::{
    BTime, Blockette, EncodingFormat, Layouts, ReadItem, Samples, VolumeReader, encode_samples,
};
use tracing_subscriber::EnvFilter;

/// Route engine logs to the test harness; `RUST_LOG=seed_export=debug` shows them.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

pub fn t0() -> BTime {
    BTime::new(2025, 100, 12, 0, 0, 0)
}

pub fn abbreviations() -> Vec<Blockette> {
    vec![
        Blockette::standard(33)
            .unwrap()
            .with("lookup", 1i64)
            .with("description", "Global Seismograph Network"),
        Blockette::standard(33)
            .unwrap()
            .with("lookup", 2i64)
            .with("description", "Streckeisen STS-1"),
        Blockette::standard(34)
            .unwrap()
            .with("lookup", 1i64)
            .with("name", "M/S")
            .with("description", "Velocity in Meters Per Second"),
        Blockette::standard(34)
            .unwrap()
            .with("lookup", 2i64)
            .with("name", "COUNTS")
            .with("description", "Digital Counts"),
    ]
}

pub fn station(name: &str) -> Blockette {
    Blockette::standard(50)
        .unwrap()
        .with("station", name)
        .with("latitude", 34.9459)
        .with("longitude", -106.4572)
        .with("elevation", 1850.0)
        .with("channel_count", 1i64)
        .with("site_name", "Albuquerque, New Mexico, USA")
        .with("network_id", 1i64)
        .with("long_order", 3210i64)
        .with("short_order", 10i64)
        .with("start", BTime::new(2024, 1, 0, 0, 0, 0))
        .with("end", BTime::new(2599, 365, 23, 59, 59, 0))
        .with("update", "N")
        .with("network", "IU")
}

pub fn channel(code: &str) -> Blockette {
    Blockette::standard(52)
        .unwrap()
        .with("location", "00")
        .with("channel", code)
        .with("instrument", 2i64)
        .with("comment", "")
        .with("signal_units", 1i64)
        .with("calibration_units", 1i64)
        .with("latitude", 34.9459)
        .with("longitude", -106.4572)
        .with("elevation", 1850.0)
        .with("local_depth", 100.0)
        .with("azimuth", 0.0)
        .with("dip", -90.0)
        .with("sample_rate", 20.0)
        .with("max_drift", 0.0005)
        .with("flags", "CG")
        .with("start", BTime::new(2024, 1, 0, 0, 0, 0))
        .with("update", "N")
}

pub fn responses() -> Vec<Blockette> {
    vec![
        Blockette::standard(53)
            .unwrap()
            .with("transfer_type", "A")
            .with("stage", 1i64)
            .with("input_units", 1i64)
            .with("output_units", 2i64)
            .with("a0", 3.94818e3)
            .with("normalization_frequency", 0.02)
            .with_repeated("zero_real", vec![0.0, 0.0])
            .with_repeated("zero_imag", vec![0.0, 0.0])
            .with_repeated("zero_real_error", vec![0.0, 0.0])
            .with_repeated("zero_imag_error", vec![0.0, 0.0])
            .with_repeated("pole_real", vec![-0.0123, -0.0123, -39.18])
            .with_repeated("pole_imag", vec![0.0123, -0.0123, 49.12])
            .with_repeated("pole_real_error", vec![0.0, 0.0, 0.0])
            .with_repeated("pole_imag_error", vec![0.0, 0.0, 0.0]),
        Blockette::standard(54)
            .unwrap()
            .with("response_type", "D")
            .with("stage", 2i64)
            .with("input_units", 1i64)
            .with("output_units", 2i64)
            .with_repeated("numerator", vec![0.25, 0.5, 0.25])
            .with_repeated("numerator_error", vec![0.0, 0.0, 0.0]),
        Blockette::standard(57)
            .unwrap()
            .with("stage", 2i64)
            .with("input_rate", 40.0)
            .with("factor", 2i64)
            .with("offset", 0i64)
            .with("delay", 0.025)
            .with("correction", 0.025),
        Blockette::standard(58)
            .unwrap()
            .with("stage", 0i64)
            .with("sensitivity", 2.5e9)
            .with("frequency", 0.02),
    ]
}

/// A fixed section plus blockette 1000 holding INT32 samples at 20 Hz.
pub fn data_record(channel: &str, start: BTime, samples: Vec<i32>) -> Vec<Blockette> {
    let count = samples.len() as i64;
    let payload = encode_samples(&Samples::Int(samples), EncodingFormat::Int32).unwrap();
    vec![
        Blockette::standard(999)
            .unwrap()
            .with("quality", "D")
            .with("station", "ANMO")
            .with("location", "00")
            .with("channel", channel)
            .with("network", "IU")
            .with("start", start)
            .with("sample_count", count)
            .with("rate_factor", 20i64)
            .with("rate_multiplier", 1i64)
            .with_payload(payload),
        Blockette::standard(1000)
            .unwrap()
            .with("encoding", EncodingFormat::Int32.to_code() as i64),
    ]
}

pub fn ramp(n: usize) -> Vec<i32> {
    (0..n as i32).map(|i| i * 7 - 300).collect()
}

pub fn read_all(bytes: &[u8], logical_length: usize, layouts: &Layouts) -> Vec<ReadItem> {
    VolumeReader::new(bytes, logical_length, layouts)
        .collect::<Result<Vec<_>, _>>()
        .unwrap()
}

/// Sequence numbers of every non-filler logical record, in file order.
pub fn sequences(bytes: &[u8], logical_length: usize) -> Vec<u32> {
    bytes
        .chunks(logical_length)
        .filter_map(|r| std::str::from_utf8(&r[..6]).ok()?.parse().ok())
        .collect()
}

pub fn controls(items: &[ReadItem], code: u16) -> Vec<&Blockette> {
    items
        .iter()
        .filter_map(|item| match item {
            ReadItem::Control { blockette, .. } if blockette.code() == code => Some(blockette),
            _ => None,
        })
        .collect()
}
