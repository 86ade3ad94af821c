//! SEED volume format.
//!
//! [`SeedFormat`] implements [`ExportFormat`] for full SEED volumes: it
//! enforces the station/channel/response ordering, feeds the
//! [`Synthesizer`] at the script's checkpoints and writes the synthesized
//! volume header and time span index during transcription.

use std::collections::BTreeMap;
use std::io::{self, Write};

use tracing::{debug, trace};

use crate::blockette::Blockette;
use crate::buffer::RecordBuffer;
use crate::config::SeedOptions;
use crate::dictionary::Resequencer;
use crate::engine::{ExportFormat, Pass, Session};
use crate::synth::{DataMark, HEADER_SECTION, Synthesizer, TIMESPAN_SECTION};
use crate::{ExportError, Result};

/// Plan for a complete volume: header, abbreviations, stations with their
/// channels and responses, time span index, then data.
pub const FULL_VOLUME_SCRIPT: &str = "reset,header,<,\
begin:abbreviations,(30),(31),(33),(34),<,end:abbreviations,\
begin:stations,(50,station,(51),(52,((53),(54),(57),(58))),<),end:stations,\
timespans,<,\
begin:data,([999,1000,1001],series),series_end,end:data,\
patch,<<";

const TRIGGERS: &[&str] = &[
    "reset",
    "station",
    "series",
    "series_end",
    HEADER_SECTION,
    TIMESPAN_SECTION,
    "patch",
];

#[derive(Debug, Clone, Default)]
pub struct SeedFormat {
    options: SeedOptions,
    synth: Synthesizer,
    /// Last control object written this pass, with its starting record.
    last_control: Option<(Blockette, u32)>,
    last_data: Option<DataMark>,
    station_seen: bool,
    channel_seen: bool,
}

impl SeedFormat {
    pub fn new(options: SeedOptions) -> Self {
        Self {
            options,
            ..Self::default()
        }
    }

    pub fn options(&self) -> &SeedOptions {
        &self.options
    }

    pub fn synthesizer(&self) -> &Synthesizer {
        &self.synth
    }

    fn check_order(&mut self, code: u16) -> Result<()> {
        match code {
            50 => {
                self.station_seen = true;
                self.channel_seen = false;
            }
            51 | 52 if !self.station_seen => {
                return Err(ExportError::Ordering(format!(
                    "blockette {code:03} arrived before any station"
                )));
            }
            52 => self.channel_seen = true,
            53..=58 if !self.channel_seen => {
                return Err(ExportError::Ordering(format!(
                    "response blockette {code:03} arrived before any channel"
                )));
            }
            _ => {}
        }
        Ok(())
    }

    fn write_synthesized<W: Write>(
        &mut self,
        session: &mut Session<W>,
        name: &'static str,
    ) -> Result<()> {
        match session.pass() {
            Pass::Simulation => {
                self.synth.note_insert(name, session.next_record());
                Ok(())
            }
            Pass::Transcription => {
                if !self.synth.is_patched() {
                    return Err(ExportError::Ordering(format!(
                        "{name} needs record numbers from a patched simulation pass"
                    )));
                }
                let blockettes = match name {
                    HEADER_SECTION => self.synth.header_blockettes(&self.options),
                    _ => self.synth.timespan_blockettes(),
                };
                let start = session.next_record();
                self.synth.begin_section(name, start);
                let count = blockettes.len();
                for b in blockettes {
                    session.transcode(vec![b])?;
                }
                self.synth.end_section(name, session.next_record())?;
                debug!(section = name, blockettes = count, start, "synthesized section written");
                Ok(())
            }
        }
    }

    /// Size the synthesized sections by writing them into a scratch buffer.
    fn patch<W: Write>(&mut self, session: &mut Session<W>) -> Result<()> {
        if session.pass() != Pass::Simulation {
            return Ok(());
        }
        self.synth.close_series();
        let transcoder = session.transcoder();
        let mut lengths = BTreeMap::new();
        for name in [HEADER_SECTION, TIMESPAN_SECTION] {
            let mut scratch = RecordBuffer::new(session.buffer().geometry(), io::sink())?;
            scratch.set_suppressed(true)?;
            let mut dictionary = Resequencer::new();
            let blockettes = match name {
                HEADER_SECTION => self.synth.header_blockettes(&self.options),
                _ => self.synth.timespan_blockettes(),
            };
            for b in blockettes {
                transcoder.control(b, &mut scratch, &mut dictionary)?;
            }
            scratch.pad_logical()?;
            lengths.insert(name, scratch.records_closed() as u32);
        }
        debug!(
            header = lengths[HEADER_SECTION],
            timespans = lengths[TIMESPAN_SECTION],
            "synthesized sections sized"
        );
        self.synth.patch(&lengths);
        Ok(())
    }
}

impl ExportFormat for SeedFormat {
    fn accepts_trigger(&self, name: &str) -> bool {
        TRIGGERS.contains(&name) || name.starts_with("begin:") || name.starts_with("end:")
    }

    fn start_volume(&mut self) -> Result<()> {
        self.synth.reset();
        self.last_control = None;
        self.last_data = None;
        self.station_seen = false;
        self.channel_seen = false;
        Ok(())
    }

    fn begin_pass<W: Write>(&mut self, _session: &mut Session<W>) -> Result<()> {
        self.last_control = None;
        self.last_data = None;
        self.station_seen = false;
        self.channel_seen = false;
        self.synth.begin_pass();
        Ok(())
    }

    fn transcode<W: Write>(&mut self, session: &mut Session<W>, mold: Vec<Blockette>) -> Result<()> {
        let Some(lead) = mold.first() else {
            return Ok(());
        };
        self.check_order(lead.code())?;
        let lead = lead.clone();
        let placement = session.transcode(mold)?;
        trace!(code = lead.code(), record = placement.record, "transcoded");
        if lead.code() == 999 {
            self.last_data = Some(DataMark::from_header(&lead, placement.record)?);
        } else {
            self.last_control = Some((lead, placement.record));
        }
        Ok(())
    }

    fn on_trigger<W: Write>(&mut self, session: &mut Session<W>, name: &str) -> Result<()> {
        let simulating = session.pass() == Pass::Simulation;
        match name {
            "reset" => {
                if simulating {
                    self.synth.reset();
                }
            }
            "station" => {
                if let Some((object, record)) = self.last_control.take() {
                    if simulating && object.code() == 50 {
                        self.synth
                            .observe_station(object.text("station").unwrap_or(""), record);
                    }
                }
            }
            "series" => {
                if let Some(mark) = self.last_data.take() {
                    if simulating {
                        self.synth.observe_series(mark);
                    }
                }
            }
            "series_end" => {
                if simulating {
                    self.synth.close_series();
                }
            }
            HEADER_SECTION => self.write_synthesized(session, HEADER_SECTION)?,
            TIMESPAN_SECTION => self.write_synthesized(session, TIMESPAN_SECTION)?,
            "patch" => self.patch(session)?,
            other => {
                if let Some(section) = other.strip_prefix("begin:") {
                    self.synth.begin_section(section, session.next_record());
                } else if let Some(section) = other.strip_prefix("end:") {
                    self.synth.end_section(section, session.next_record())?;
                } else {
                    return Err(ExportError::Script(format!("unknown trigger {other:?}")));
                }
            }
        }
        Ok(())
    }

    fn section_lengths(&self) -> BTreeMap<String, u32> {
        self.synth.section_lengths()
    }
}
