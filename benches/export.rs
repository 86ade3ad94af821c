use criterion::{Criterion, Throughput, black_box, criterion_group, criterion_main};
use seed_export::{
    BTime, Blockette, BuilderConfig, EncodingFormat, ExportEngine, Layouts, Samples, SeedFormat,
    SeedOptions, VecSource, VolumeReader, encode_samples, export_volume,
};

/// Smooth seismic-like samples with a little variation.
fn seismic_samples(n: usize) -> Vec<i32> {
    (0..n)
        .map(|i| {
            let drift = (i as f64 * 0.05).sin() * 50.0;
            let noise = ((i as f64 * 1.7).sin() * 10.0) as i32;
            1000 + drift as i32 + noise
        })
        .collect()
}

/// One station, one channel with a 400-pole response, then `records`
/// contiguous data records of 200 samples each.
fn volume_objects(records: usize) -> Vec<Blockette> {
    let start = BTime::new(2025, 100, 12, 0, 0, 0);
    let poles: Vec<f64> = (0..400).map(|i| -0.01 * (i + 1) as f64).collect();
    let mut objects = vec![
        Blockette::standard(33)
            .unwrap()
            .with("lookup", 5i64)
            .with("description", "Streckeisen STS-2"),
        Blockette::standard(34)
            .unwrap()
            .with("lookup", 8i64)
            .with("name", "M/S"),
        Blockette::standard(50)
            .unwrap()
            .with("station", "ANMO")
            .with("network", "IU")
            .with("start", start),
        Blockette::standard(52)
            .unwrap()
            .with("location", "00")
            .with("channel", "BHZ")
            .with("instrument", 5i64)
            .with("signal_units", 8i64)
            .with("sample_rate", 20.0),
        Blockette::standard(53)
            .unwrap()
            .with("transfer_type", "A")
            .with("input_units", 8i64)
            .with("output_units", 8i64)
            .with_repeated("pole_real", poles.clone())
            .with_repeated("pole_imag", poles.clone())
            .with_repeated("pole_real_error", vec![0.0; poles.len()])
            .with_repeated("pole_imag_error", vec![0.0; poles.len()]),
    ];
    let payload = encode_samples(&Samples::Int(seismic_samples(200)), EncodingFormat::Int32).unwrap();
    for k in 0..records {
        objects.push(
            Blockette::standard(999)
                .unwrap()
                .with("station", "ANMO")
                .with("location", "00")
                .with("channel", "BHZ")
                .with("network", "IU")
                .with("start", start.add_ticks(k as i64 * 10 * 10_000))
                .with("sample_count", 200i64)
                .with("rate_factor", 20i64)
                .with("rate_multiplier", 1i64)
                .with_payload(payload.clone()),
        );
        objects.push(
            Blockette::standard(1000)
                .unwrap()
                .with("encoding", EncodingFormat::Int32.to_code() as i64),
        );
    }
    objects
}

fn config() -> BuilderConfig {
    BuilderConfig::new()
        .with_logical_length(1024)
        .with_physical_length(8192)
}

fn bench_export(c: &mut Criterion) {
    let mut group = c.benchmark_group("export");

    for records in [10usize, 100] {
        let objects = volume_objects(records);
        group.throughput(Throughput::Elements(records as u64));
        group.bench_function(format!("full_volume/{records}rec"), |b| {
            let mut engine = ExportEngine::new(config(), SeedFormat::new(SeedOptions::default())).unwrap();
            let mut source = VecSource::new(objects.clone());
            b.iter(|| {
                export_volume(&mut engine, black_box(&mut source), Vec::new())
                    .unwrap()
                    .sink
            })
        });
    }

    group.finish();
}

fn bench_reader(c: &mut Criterion) {
    let mut engine = ExportEngine::new(config(), SeedFormat::default()).unwrap();
    let volume = export_volume(&mut engine, &mut VecSource::new(volume_objects(100)), Vec::new()).unwrap();
    let layouts = Layouts::standard();

    let mut group = c.benchmark_group("reader");
    group.throughput(Throughput::Bytes(volume.sink.len() as u64));
    group.bench_function("volume/100rec", |b| {
        b.iter(|| {
            VolumeReader::new(black_box(&volume.sink), 1024, &layouts)
                .map(|item| item.unwrap())
                .count()
        })
    });
    group.finish();
}

criterion_group!(benches, bench_export, bench_reader);
criterion_main!(benches);
