//! Format-independent export engine.
//!
//! [`ExportEngine`] walks the compiled script with a [`ScriptCursor`],
//! collects supplied objects into a mold and hands each finished mold to an
//! [`ExportFormat`]. Everything that belongs to one volume lives in a
//! [`Session`] created by [`ExportEngine::start_volume`] and dropped by
//! [`ExportEngine::finish`], so nothing leaks from one volume into the next.

use std::collections::BTreeMap;
use std::io::Write;
use std::mem;

use tracing::{debug, trace};

use crate::blockette::{Blockette, SeedObject};
use crate::buffer::RecordBuffer;
use crate::config::BuilderConfig;
use crate::dictionary::Resequencer;
use crate::layout::LayoutKind;
use crate::script::{Cue, ExportScript, ScriptCursor};
use crate::transcode::{Placement, Transcoder};
use crate::{ExportError, Result};

/// Which of the two passes over a volume is running.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Pass {
    /// Output suppressed; record numbers are learned.
    Simulation,
    /// Output written.
    Transcription,
}

/// Per-volume state threaded through every format call.
pub struct Session<W: Write> {
    buffer: RecordBuffer<W>,
    dictionary: Resequencer,
    transcoder: Transcoder,
    pass: Pass,
    pen_up: bool,
}

impl<W: Write> Session<W> {
    fn new(config: &BuilderConfig, sink: W) -> Result<Self> {
        Ok(Self {
            buffer: RecordBuffer::new(config.geometry(), sink)?,
            dictionary: Resequencer::new(),
            transcoder: Transcoder::new(
                config.twin_threshold,
                config.logical_length,
                config.pad_byte,
            ),
            pass: Pass::Simulation,
            pen_up: false,
        })
    }

    pub fn pass(&self) -> Pass {
        self.pass
    }

    pub fn buffer(&self) -> &RecordBuffer<W> {
        &self.buffer
    }

    pub fn buffer_mut(&mut self) -> &mut RecordBuffer<W> {
        &mut self.buffer
    }

    pub fn dictionary(&self) -> &Resequencer {
        &self.dictionary
    }

    pub fn transcoder(&self) -> Transcoder {
        self.transcoder
    }

    /// Sequence number the next object would start in, if it opened a record.
    pub fn next_record(&self) -> u32 {
        self.buffer.next_fresh_sequence()
    }

    /// Write a mold: a data record when it leads with a fixed section,
    /// otherwise each control object in turn.
    pub fn transcode(&mut self, mold: Vec<Blockette>) -> Result<Placement> {
        let Some(lead) = mold.first() else {
            return Err(ExportError::Ordering("empty mold".into()));
        };
        if lead.layout().kind == LayoutKind::FixedHeader {
            return self.transcoder.data(&mold, &mut self.buffer);
        }

        let mut placement: Option<Placement> = None;
        for object in mold {
            if object.layout().kind != LayoutKind::Control {
                return Err(ExportError::Ordering(format!(
                    "blockette {:03} needs a fixed section before it",
                    object.code()
                )));
            }
            let placed = self
                .transcoder
                .control(object, &mut self.buffer, &mut self.dictionary)?;
            match placement.as_mut() {
                Some(p) => p.pieces += placed.pieces,
                None => placement = Some(placed),
            }
        }
        placement.ok_or_else(|| ExportError::Ordering("empty mold".into()))
    }

    fn apply_pen(&mut self) -> Result<()> {
        let suppressed = self.pass == Pass::Simulation || self.pen_up;
        if suppressed != self.buffer.is_suppressed() {
            trace!(suppressed, "pen toggled");
            self.buffer.set_suppressed(suppressed)?;
        }
        Ok(())
    }
}

/// One output format driven by the engine.
pub trait ExportFormat {
    /// Whether `name` is a trigger this format handles.
    fn accepts_trigger(&self, name: &str) -> bool;

    /// Drop everything learned from the previous volume.
    fn start_volume(&mut self) -> Result<()> {
        Ok(())
    }

    fn begin_pass<W: Write>(&mut self, _session: &mut Session<W>) -> Result<()> {
        Ok(())
    }

    /// Write one finished mold.
    fn transcode<W: Write>(&mut self, session: &mut Session<W>, mold: Vec<Blockette>) -> Result<()>;

    fn on_trigger<W: Write>(&mut self, session: &mut Session<W>, name: &str) -> Result<()>;

    fn end_pass<W: Write>(&mut self, _session: &mut Session<W>) -> Result<()> {
        Ok(())
    }

    fn finish_volume<W: Write>(&mut self, _session: &mut Session<W>) -> Result<()> {
        Ok(())
    }

    /// Length in logical records of each named section seen this pass.
    fn section_lengths(&self) -> BTreeMap<String, u32> {
        BTreeMap::new()
    }
}

/// Record counts observed over one pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PassReport {
    pub pass: Pass,
    /// Logical records closed during the pass.
    pub records: u64,
    pub sections: BTreeMap<String, u32>,
}

pub struct ExportEngine<F: ExportFormat, W: Write> {
    config: BuilderConfig,
    script: ExportScript,
    cursor: ScriptCursor,
    format: F,
    session: Option<Session<W>>,
    mold: Vec<Blockette>,
    in_group: bool,
    requested: Option<u16>,
}

impl<F: ExportFormat, W: Write> std::fmt::Debug for ExportEngine<F, W> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExportEngine")
            .field("config", &self.config)
            .field("script", &self.script)
            .field("in_group", &self.in_group)
            .field("requested", &self.requested)
            .finish_non_exhaustive()
    }
}

impl<F: ExportFormat, W: Write> ExportEngine<F, W> {
    /// Validate `config` and check every script trigger against `format`.
    pub fn new(config: BuilderConfig, format: F) -> Result<Self> {
        let script = config.validate()?;
        if let Some(name) = script.triggers().find(|t| !format.accepts_trigger(t)) {
            return Err(ExportError::Script(format!("unknown trigger {name:?}")));
        }
        let cursor = ScriptCursor::new(config.max_loop_depth);
        Ok(Self {
            config,
            script,
            cursor,
            format,
            session: None,
            mold: Vec::new(),
            in_group: false,
            requested: None,
        })
    }

    pub fn config(&self) -> &BuilderConfig {
        &self.config
    }

    pub fn script(&self) -> &ExportScript {
        &self.script
    }

    pub fn format(&self) -> &F {
        &self.format
    }

    pub fn format_mut(&mut self) -> &mut F {
        &mut self.format
    }

    pub fn session(&self) -> Option<&Session<W>> {
        self.session.as_ref()
    }

    /// Open a volume on `sink`. Nothing is written until a pass runs.
    pub fn start_volume(&mut self, sink: W) -> Result<()> {
        self.config.validate()?;
        self.format.start_volume()?;
        self.session = Some(Session::new(&self.config, sink)?);
        debug!(
            logical = self.config.logical_length,
            physical = self.config.physical_length,
            "volume started"
        );
        Ok(())
    }

    fn session_mut(&mut self) -> Result<&mut Session<W>> {
        self.session
            .as_mut()
            .ok_or_else(|| ExportError::Ordering("no volume started".into()))
    }

    /// Reset all per-pass state and start walking the script from the top.
    pub fn begin_pass(&mut self, pass: Pass) -> Result<()> {
        self.cursor.reset();
        self.mold.clear();
        self.in_group = false;
        self.requested = None;

        let Some(session) = self.session.as_mut() else {
            return Err(ExportError::Ordering("no volume started".into()));
        };
        session.buffer.reset();
        session.dictionary.reset();
        session.pass = pass;
        session.pen_up = false;
        session.apply_pen()?;
        debug!(?pass, "pass started");
        self.format.begin_pass(session)
    }

    /// Advance the script to the next object request. `None` once the
    /// script is exhausted.
    pub fn next_type(&mut self) -> Result<Option<u16>> {
        if let Some(code) = self.requested {
            return Err(ExportError::Ordering(format!(
                "type {code:03} was requested but never built"
            )));
        }
        loop {
            match self.cursor.next(&self.script)? {
                Cue::Supply(code) => {
                    self.requested = Some(code);
                    return Ok(Some(code));
                }
                Cue::GroupStart => self.in_group = true,
                Cue::GroupEnd => {
                    self.in_group = false;
                    self.flush_mold()?;
                }
                Cue::EndLogical => {
                    self.flush_mold()?;
                    self.session_mut()?.buffer.pad_logical()?;
                }
                Cue::EndPhysical => {
                    self.flush_mold()?;
                    self.session_mut()?.buffer.end_physical()?;
                }
                Cue::PenUp => self.set_pen(true)?,
                Cue::PenDown => self.set_pen(false)?,
                Cue::Trigger(name) => {
                    self.flush_mold()?;
                    let Some(session) = self.session.as_mut() else {
                        return Err(ExportError::Ordering("no volume started".into()));
                    };
                    trace!(trigger = %name, "trigger");
                    self.format.on_trigger(session, &name)?;
                }
                Cue::End => {
                    self.flush_mold()?;
                    return Ok(None);
                }
            }
        }
    }

    /// Supply the object requested by the last [`ExportEngine::next_type`],
    /// or `None` when the source has nothing of that type.
    pub fn build(&mut self, object: Option<&dyn SeedObject>) -> Result<()> {
        let Some(requested) = self.requested.take() else {
            return Err(ExportError::Ordering("build without a pending request".into()));
        };
        let Some(object) = object else {
            return Ok(());
        };
        if object.type_code() != requested {
            return Err(ExportError::Ordering(format!(
                "expected blockette {requested:03}, got {:03}",
                object.type_code()
            )));
        }
        self.cursor.credit();
        self.mold.push(Blockette::snapshot(object, &self.config.layouts)?);
        if !self.in_group {
            self.flush_mold()?;
        }
        Ok(())
    }

    fn set_pen(&mut self, up: bool) -> Result<()> {
        self.flush_mold()?;
        let session = self.session_mut()?;
        session.pen_up = up;
        session.apply_pen()
    }

    fn flush_mold(&mut self) -> Result<()> {
        if self.mold.is_empty() {
            return Ok(());
        }
        let mold = mem::take(&mut self.mold);
        let Some(session) = self.session.as_mut() else {
            return Err(ExportError::Ordering("no volume started".into()));
        };
        self.format.transcode(session, mold)
    }

    /// Close the pass: pending mold, open record and physical record.
    pub fn end_pass(&mut self) -> Result<PassReport> {
        self.flush_mold()?;
        let Some(session) = self.session.as_mut() else {
            return Err(ExportError::Ordering("no volume started".into()));
        };
        self.format.end_pass(session)?;
        session.buffer.end_physical()?;
        let report = PassReport {
            pass: session.pass,
            records: session.buffer.records_closed(),
            sections: self.format.section_lengths(),
        };
        debug!(pass = ?report.pass, records = report.records, "pass finished");
        Ok(report)
    }

    /// Complete the volume and hand back the sink.
    pub fn finish(&mut self) -> Result<W> {
        let Some(mut session) = self.session.take() else {
            return Err(ExportError::Ordering("no volume started".into()));
        };
        self.format.finish_volume(&mut session)?;
        session.buffer.finish()?;
        debug!(written = session.buffer.records_written(), "volume finished");
        Ok(session.buffer.into_sink())
    }

    /// Drop the open volume without completing it.
    pub fn abandon(&mut self) {
        if self.session.take().is_some() {
            debug!("volume abandoned");
        }
        self.mold.clear();
        self.requested = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Records molds and triggers instead of interpreting them.
    #[derive(Default)]
    struct Recorder {
        molds: Vec<Vec<u16>>,
        triggers: Vec<String>,
    }

    impl ExportFormat for Recorder {
        fn accepts_trigger(&self, name: &str) -> bool {
            name == "mark"
        }

        fn transcode<W: Write>(&mut self, session: &mut Session<W>, mold: Vec<Blockette>) -> Result<()> {
            self.molds.push(mold.iter().map(Blockette::code).collect());
            session.transcode(mold).map(|_| ())
        }

        fn on_trigger<W: Write>(&mut self, _session: &mut Session<W>, name: &str) -> Result<()> {
            self.triggers.push(name.to_string());
            Ok(())
        }
    }

    fn engine(script: &str) -> ExportEngine<Recorder, Vec<u8>> {
        let config = BuilderConfig::new()
            .with_logical_length(256)
            .with_physical_length(256)
            .with_script(script);
        ExportEngine::new(config, Recorder::default()).unwrap()
    }

    fn abbreviation(lookup: i64) -> Blockette {
        Blockette::standard(33)
            .unwrap()
            .with("lookup", lookup)
            .with("description", "STS-1")
    }

    #[test]
    fn test_unknown_trigger_rejected_at_construction() {
        let config = BuilderConfig::new().with_script("(33),launch");
        let err = ExportEngine::<Recorder, Vec<u8>>::new(config, Recorder::default());
        assert!(matches!(err, Err(ExportError::Script(_))));
    }

    #[test]
    fn test_pass_needs_a_volume() {
        let mut engine = engine("(33)");
        assert!(matches!(
            engine.begin_pass(Pass::Transcription),
            Err(ExportError::Ordering(_))
        ));
        assert!(engine.finish().is_err());
    }

    #[test]
    fn test_request_protocol() {
        let mut first = engine("(33),mark");
        first.start_volume(Vec::new()).unwrap();
        first.begin_pass(Pass::Transcription).unwrap();
        assert!(matches!(first.build(None), Err(ExportError::Ordering(_))));
        assert_eq!(first.next_type().unwrap(), Some(33));
        // asking again without building
        assert!(matches!(first.next_type(), Err(ExportError::Ordering(_))));

        let wrong = Blockette::standard(34).unwrap();
        let mut second = engine("(33),mark");
        second.start_volume(Vec::new()).unwrap();
        second.begin_pass(Pass::Transcription).unwrap();
        assert_eq!(second.next_type().unwrap(), Some(33));
        assert!(matches!(second.build(Some(&wrong)), Err(ExportError::Ordering(_))));
    }

    #[test]
    fn test_groups_collect_one_mold() {
        let mut engine = engine("33,[34,33],mark");
        let supplied = [abbreviation(1), Blockette::standard(34).unwrap(), abbreviation(2)];
        let mut next = supplied.iter().peekable();

        engine.start_volume(Vec::new()).unwrap();
        engine.begin_pass(Pass::Transcription).unwrap();
        while let Some(code) = engine.next_type().unwrap() {
            let object = next.next_if(|o| o.code() == code);
            engine.build(object.map(|o| o as &dyn SeedObject)).unwrap();
        }
        let report = engine.end_pass().unwrap();

        assert_eq!(engine.format().molds, vec![vec![33], vec![34, 33]]);
        assert_eq!(engine.format().triggers, vec!["mark".to_string()]);
        assert_eq!(report.records, 1);
        assert_eq!(report.pass, Pass::Transcription);
    }

    #[test]
    fn test_simulation_writes_nothing() {
        let mut engine = engine("(33),<");
        engine.start_volume(Vec::new()).unwrap();
        for pass in [Pass::Simulation, Pass::Transcription] {
            engine.begin_pass(pass).unwrap();
            let mut supplied = vec![abbreviation(7)];
            while let Some(_code) = engine.next_type().unwrap() {
                let object = supplied.pop();
                engine.build(object.as_ref().map(|o| o as &dyn SeedObject)).unwrap();
            }
            let report = engine.end_pass().unwrap();
            assert_eq!(report.records, 1);
            if pass == Pass::Simulation {
                assert_eq!(engine.session().unwrap().buffer().records_written(), 0);
            }
        }
        let bytes = engine.finish().unwrap();
        assert_eq!(bytes.len(), 256);
        assert_eq!(&bytes[..8], b"000001A ");
    }

    #[test]
    fn test_abandon_drops_the_session() {
        let mut engine = engine("(33)");
        engine.start_volume(Vec::new()).unwrap();
        engine.begin_pass(Pass::Simulation).unwrap();
        assert_eq!(engine.next_type().unwrap(), Some(33));
        engine.abandon();
        assert!(engine.session().is_none());
        // a fresh volume starts cleanly
        engine.start_volume(Vec::new()).unwrap();
        engine.begin_pass(Pass::Transcription).unwrap();
        assert_eq!(engine.next_type().unwrap(), Some(33));
    }
}
