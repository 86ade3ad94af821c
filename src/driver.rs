//! Two-pass volume driver.

use std::io::Write;

use tracing::warn;

use crate::blockette::{Blockette, SeedObject};
use crate::engine::{ExportEngine, ExportFormat, Pass, PassReport};
use crate::{ExportError, Result};

/// Supplies domain objects in script order.
pub trait ObjectSource {
    /// The next object if it is of type `code`, without consuming anything
    /// otherwise.
    fn supply(&mut self, code: u16) -> Option<&dyn SeedObject>;

    /// Start over for the next pass.
    fn rewind(&mut self);

    /// Type of the next unconsumed object.
    fn remaining(&self) -> Option<u16>;
}

/// Objects held in a vector, consumed front to back.
#[derive(Debug, Clone, Default)]
pub struct VecSource<T = Blockette> {
    objects: Vec<T>,
    position: usize,
}

impl<T: SeedObject> VecSource<T> {
    pub fn new(objects: Vec<T>) -> Self {
        Self {
            objects,
            position: 0,
        }
    }

    pub fn push(&mut self, object: T) {
        self.objects.push(object);
    }

    pub fn len(&self) -> usize {
        self.objects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }
}

impl<T: SeedObject> ObjectSource for VecSource<T> {
    fn supply(&mut self, code: u16) -> Option<&dyn SeedObject> {
        let object = self.objects.get(self.position)?;
        if object.type_code() != code {
            return None;
        }
        self.position += 1;
        Some(object)
    }

    fn rewind(&mut self) {
        self.position = 0;
    }

    fn remaining(&self) -> Option<u16> {
        self.objects.get(self.position).map(SeedObject::type_code)
    }
}

/// Output of [`export_volume`].
#[derive(Debug)]
pub struct ExportedVolume<W> {
    pub sink: W,
    pub simulation: PassReport,
    pub transcription: PassReport,
}

/// Walk the script once over `source`.
pub fn run_pass<F, W, S>(engine: &mut ExportEngine<F, W>, source: &mut S, pass: Pass) -> Result<PassReport>
where
    F: ExportFormat,
    W: Write,
    S: ObjectSource + ?Sized,
{
    engine.begin_pass(pass)?;
    while let Some(code) = engine.next_type()? {
        engine.build(source.supply(code))?;
    }
    if let Some(code) = source.remaining() {
        return Err(ExportError::Ordering(format!(
            "blockette {code:03} was never requested by the script"
        )));
    }
    engine.end_pass()
}

/// Export one volume: a suppressed simulation pass, then the transcription
/// pass that writes to `sink`. On error the volume is abandoned and the
/// sink dropped; whatever it holds must be discarded.
pub fn export_volume<F, W, S>(
    engine: &mut ExportEngine<F, W>,
    source: &mut S,
    sink: W,
) -> Result<ExportedVolume<W>>
where
    F: ExportFormat,
    W: Write,
    S: ObjectSource + ?Sized,
{
    engine.start_volume(sink)?;
    let passes = run_pass(engine, source, Pass::Simulation).and_then(|simulation| {
        source.rewind();
        let transcription = run_pass(engine, source, Pass::Transcription)?;
        Ok((simulation, transcription))
    });
    let (simulation, transcription) = match passes {
        Ok(reports) => reports,
        Err(e) => {
            warn!(error = %e, "volume export failed");
            engine.abandon();
            return Err(e);
        }
    };
    if simulation.sections != transcription.sections {
        warn!(
            simulation = ?simulation.sections,
            transcription = ?transcription.sections,
            "section lengths differ between passes"
        );
    }
    let sink = engine.finish()?;
    Ok(ExportedVolume {
        sink,
        simulation,
        transcription,
    })
}
