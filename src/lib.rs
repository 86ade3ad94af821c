//! SEED volume writer.
//!
//! A scripted engine that turns a stream of station metadata and waveform
//! blockettes into a SEED volume: fixed-length logical records grouped
//! into physical records, with continuation records, twinning of
//! oversized blockettes and per-volume renumbering of dictionary
//! references. Every volume is produced in two passes: a suppressed
//! simulation that learns record numbers, then the transcription that
//! writes bytes with the volume header already patched.
//!
//! # Exporting a volume
//!
//! ```
//! use seed_export::{
//!     export_volume, BTime, Blockette, BuilderConfig, ExportEngine, SeedFormat, SeedOptions,
//!     VecSource,
//! };
//!
//! let objects = vec![
//!     Blockette::standard(33).unwrap()
//!         .with("lookup", 12i64)
//!         .with("description", "Streckeisen STS-2"),
//!     Blockette::standard(50).unwrap()
//!         .with("station", "ANMO")
//!         .with("site_name", "Albuquerque, New Mexico")
//!         .with("start", BTime::new(2025, 1, 0, 0, 0, 0)),
//!     Blockette::standard(52).unwrap()
//!         .with("location", "00")
//!         .with("channel", "BHZ")
//!         .with("instrument", 12i64)
//!         .with("sample_rate", 20.0),
//! ];
//!
//! let config = BuilderConfig::new().with_physical_length(4096);
//! let mut engine = ExportEngine::new(config, SeedFormat::new(SeedOptions::default())).unwrap();
//! let volume = export_volume(&mut engine, &mut VecSource::new(objects), Vec::new()).unwrap();
//!
//! // volume header, abbreviations, station: one record each
//! assert_eq!(volume.sink.len(), 3 * 4096);
//! assert_eq!(&volume.sink[..8], b"000001V ");
//! assert_eq!(volume.simulation.sections, volume.transcription.sections);
//! ```
//!
//! # Reading it back
//!
//! ```
//! use seed_export::{
//!     run_pass, Blockette, BuilderConfig, ExportEngine, Layouts, Pass, ReadItem, SeedFormat,
//!     VecSource, VolumeReader,
//! };
//!
//! let config = BuilderConfig::new()
//!     .with_logical_length(512)
//!     .with_physical_length(512)
//!     .with_script("(33),<");
//! let mut engine = ExportEngine::new(config, SeedFormat::default()).unwrap();
//! let mut source = VecSource::new(vec![
//!     Blockette::standard(33).unwrap()
//!         .with("lookup", 40i64)
//!         .with("description", "Geotech KS-54000"),
//! ]);
//!
//! engine.start_volume(Vec::new()).unwrap();
//! run_pass(&mut engine, &mut source, Pass::Transcription).unwrap();
//! let bytes = engine.finish().unwrap();
//!
//! let layouts = Layouts::standard();
//! let items: Vec<ReadItem> = VolumeReader::new(&bytes, 512, &layouts)
//!     .collect::<Result<_, _>>()
//!     .unwrap();
//! let ReadItem::Control { blockette, .. } = &items[0] else { unreachable!() };
//! // dictionary keys are renumbered from 1 within the volume
//! assert_eq!(blockette.int("lookup"), Some(1));
//! assert_eq!(blockette.text("description"), Some("Geotech KS-54000"));
//! ```

pub mod blockette;
pub mod buffer;
pub mod codec;
pub mod config;
pub mod dictionary;
pub mod driver;
pub mod engine;
pub mod error;
pub mod layout;
pub mod reader;
pub mod script;
pub mod seed;
pub mod synth;
pub mod time;
pub mod transcode;
pub mod types;

pub use blockette::{Blockette, SeedObject};
pub use buffer::{RecordBuffer, RecordGeometry};
pub use codec::{Samples, decode_samples, encode_samples};
pub use config::{BuilderConfig, SeedOptions};
pub use dictionary::Resequencer;
pub use driver::{ExportedVolume, ObjectSource, VecSource, export_volume, run_pass};
pub use engine::{ExportEngine, ExportFormat, Pass, PassReport, Session};
pub use error::{ExportError, Result};
pub use layout::{BlocketteLayout, FieldFormat, FieldRole, FieldSpec, Layouts};
pub use reader::{ReadItem, VolumeReader};
pub use script::{ExportScript, ScriptCursor};
pub use seed::{FULL_VOLUME_SCRIPT, SeedFormat};
pub use synth::Synthesizer;
pub use time::BTime;
pub use types::{EncodingFormat, FieldValue};
