//! Export a complete volume and read every object back.

mod common;

use common::*;
use seed_export::{
    Blockette, BuilderConfig, ExportEngine, FieldRole, FieldValue, Layouts, ReadItem, Samples,
    SeedFormat, SeedOptions, VecSource, export_volume,
};

fn same_value(a: &FieldValue, b: &FieldValue) -> bool {
    match (a, b) {
        (FieldValue::Float(_), _) | (_, FieldValue::Float(_)) => {
            match (a.as_float(), b.as_float()) {
                (Some(x), Some(y)) => (x - y).abs() <= 1e-9 * x.abs().max(1.0),
                _ => false,
            }
        }
        _ => a == b,
    }
}

/// Every field the source object set must come back unchanged; computed
/// and counted fields are derived by the writer and skipped.
fn assert_same_fields(expected: &Blockette, actual: &Blockette) {
    assert_eq!(expected.code(), actual.code());
    for spec in expected.layout().fields {
        if matches!(
            spec.role,
            FieldRole::Computed(_) | FieldRole::RecordIndicator | FieldRole::Count
        ) {
            continue;
        }
        let want = expected.get_repeated(spec.name);
        if want.is_empty() {
            continue;
        }
        let got = actual.get_repeated(spec.name);
        assert_eq!(want.len(), got.len(), "{:03} {}", expected.code(), spec.name);
        for (w, g) in want.iter().zip(got) {
            assert!(
                same_value(w, g),
                "{:03} {}: wrote {w}, read {g}",
                expected.code(),
                spec.name
            );
        }
    }
}

fn metadata() -> Vec<Blockette> {
    let mut objects = abbreviations();
    objects.push(station("ANMO"));
    objects.push(channel("BHZ"));
    objects.extend(responses());
    objects.push(channel("BH1").with("azimuth", 90.0).with("dip", 0.0));
    objects.extend(responses());
    objects
}

#[test]
fn metadata_survives_export() {
    init_tracing();
    let objects = metadata();
    let config = BuilderConfig::new()
        .with_logical_length(512)
        .with_physical_length(4096);
    let mut engine = ExportEngine::new(config, SeedFormat::new(SeedOptions::default())).unwrap();
    let volume =
        export_volume(&mut engine, &mut VecSource::new(objects.clone()), Vec::new()).unwrap();

    let items = read_all(&volume.sink, 512, &Layouts::standard());
    let read: Vec<&Blockette> = items
        .iter()
        .filter_map(|item| match item {
            ReadItem::Control { blockette, .. } if !matches!(blockette.code(), 10..=12) => {
                Some(blockette)
            }
            _ => None,
        })
        .collect();

    assert_eq!(read.len(), objects.len());
    for (expected, actual) in objects.iter().zip(read) {
        assert_same_fields(expected, actual);
    }
}

#[test]
fn control_record_types_follow_sections() {
    let config = BuilderConfig::new()
        .with_logical_length(512)
        .with_physical_length(4096);
    let mut engine = ExportEngine::new(config, SeedFormat::default()).unwrap();
    let mut objects = metadata();
    objects.extend(data_record("BHZ", t0(), ramp(50)));
    let volume = export_volume(&mut engine, &mut VecSource::new(objects), Vec::new()).unwrap();

    let items = read_all(&volume.sink, 512, &Layouts::standard());
    let mut kinds: Vec<char> = items
        .iter()
        .map(|item| match item {
            ReadItem::Control { record_type, .. } => *record_type,
            ReadItem::Data { .. } => 'D',
        })
        .collect();
    kinds.dedup();
    assert_eq!(kinds, vec!['V', 'A', 'S', 'T', 'D']);
}

#[test]
fn waveforms_survive_export() {
    let config = BuilderConfig::new()
        .with_logical_length(1024)
        .with_physical_length(4096);
    let mut engine = ExportEngine::new(config, SeedFormat::default()).unwrap();

    let first = ramp(200);
    let second: Vec<i32> = ramp(200).into_iter().map(|s| -s).collect();
    let mut objects = vec![station("ANMO"), channel("BHZ")];
    objects.extend(data_record("BHZ", t0(), first.clone()));
    objects.extend(data_record("BHZ", t0().add_ticks(10 * 10_000), second.clone()));
    let volume = export_volume(&mut engine, &mut VecSource::new(objects), Vec::new()).unwrap();

    let items = read_all(&volume.sink, 1024, &Layouts::standard());
    let samples: Vec<Samples> = items
        .iter()
        .filter_map(|item| item.samples().unwrap())
        .collect();
    assert_eq!(samples, vec![Samples::Int(first), Samples::Int(second)]);

    let headers: Vec<&Blockette> = items
        .iter()
        .filter_map(|item| match item {
            ReadItem::Data { header, .. } => Some(header),
            _ => None,
        })
        .collect();
    assert_eq!(headers[1].get("start").and_then(FieldValue::as_time), Some(t0().add_ticks(100_000)));
    assert_eq!(headers[0].int("sample_count"), Some(200));
    assert_eq!(headers[0].int("blockette_count"), Some(1));
    assert_eq!(headers[0].int("first_blockette"), Some(48));
    assert_eq!(headers[0].text("quality"), Some("D"));

    // contiguous records form one series
    let index = controls(&items, 74);
    assert_eq!(index.len(), 1);
    assert_eq!(index[0].int("start_record"), Some(headers_record(&items, 0)));
    assert_eq!(index[0].int("end_record"), Some(headers_record(&items, 1)));
}

fn headers_record(items: &[ReadItem], nth: usize) -> i64 {
    items
        .iter()
        .filter(|item| matches!(item, ReadItem::Data { .. }))
        .nth(nth)
        .map(|item| item.sequence() as i64)
        .unwrap()
}

#[test]
fn pad_byte_fills_unused_space() {
    let config = BuilderConfig::new()
        .with_logical_length(256)
        .with_physical_length(1024)
        .with_pad_byte(0)
        .with_script("(33),<");
    let mut engine = ExportEngine::new(config, SeedFormat::default()).unwrap();
    let objects = abbreviations().into_iter().take(1).collect();
    let volume = export_volume(&mut engine, &mut VecSource::new(objects), Vec::new()).unwrap();

    assert_eq!(volume.sink.len(), 1024);
    assert!(volume.sink[256..].iter().all(|&b| b == 0));
    let items = read_all(&volume.sink, 256, &Layouts::standard());
    assert_eq!(items.len(), 1);
}
