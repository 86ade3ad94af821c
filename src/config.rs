//! Builder configuration.

use tracing::debug;

use crate::buffer::RecordGeometry;
use crate::layout::{BlocketteLayout, Layouts, MAX_CONTROL_LENGTH};
use crate::script::ExportScript;
use crate::seed::FULL_VOLUME_SCRIPT;
use crate::time::BTime;
use crate::transcode::DEFAULT_TWIN_THRESHOLD;
use crate::{ExportError, Result};

pub const DEFAULT_LOGICAL_LENGTH: usize = 4096;
pub const DEFAULT_PHYSICAL_LENGTH: usize = 32768;
pub const DEFAULT_MAX_LOOP_DEPTH: usize = 8;

/// Settings shared by every volume a builder produces.
#[derive(Debug, Clone)]
pub struct BuilderConfig {
    pub logical_length: usize,
    pub physical_length: usize,
    /// Fill byte for record tails and unused physical slots.
    pub pad_byte: u8,
    /// Control blockettes are twinned once they grow past this many bytes.
    pub twin_threshold: usize,
    pub max_loop_depth: usize,
    pub layouts: Layouts,
    /// Plan string, compiled by [`BuilderConfig::validate`].
    pub script: String,
}

impl Default for BuilderConfig {
    fn default() -> Self {
        Self {
            logical_length: DEFAULT_LOGICAL_LENGTH,
            physical_length: DEFAULT_PHYSICAL_LENGTH,
            pad_byte: b' ',
            twin_threshold: DEFAULT_TWIN_THRESHOLD,
            max_loop_depth: DEFAULT_MAX_LOOP_DEPTH,
            layouts: Layouts::standard(),
            script: FULL_VOLUME_SCRIPT.to_string(),
        }
    }
}

impl BuilderConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_logical_length(mut self, length: usize) -> Self {
        self.logical_length = length;
        self
    }

    pub fn with_physical_length(mut self, length: usize) -> Self {
        self.physical_length = length;
        self
    }

    pub fn with_pad_byte(mut self, pad: u8) -> Self {
        self.pad_byte = pad;
        self
    }

    pub fn with_twin_threshold(mut self, threshold: usize) -> Self {
        self.twin_threshold = threshold;
        self
    }

    pub fn with_max_loop_depth(mut self, depth: usize) -> Self {
        self.max_loop_depth = depth;
        self
    }

    pub fn with_script(mut self, script: impl Into<String>) -> Self {
        self.script = script.into();
        self
    }

    pub fn with_layouts(mut self, layouts: Layouts) -> Self {
        self.layouts = layouts;
        self
    }

    /// Register one more layout on top of the current registry.
    pub fn with_layout(mut self, layout: &'static BlocketteLayout) -> Result<Self> {
        self.layouts.register(layout)?;
        Ok(self)
    }

    pub fn geometry(&self) -> RecordGeometry {
        RecordGeometry {
            logical_length: self.logical_length,
            physical_length: self.physical_length,
            pad: self.pad_byte,
        }
    }

    /// Check every setting and compile the script.
    pub fn validate(&self) -> Result<ExportScript> {
        let logical = self.logical_length;
        if !logical.is_power_of_two() || !(256..=65536).contains(&logical) {
            return Err(ExportError::Config(format!(
                "logical record length {logical} is not a power of two in 256..=65536"
            )));
        }
        self.geometry().ratio()?;
        if self.twin_threshold == 0 || self.twin_threshold >= MAX_CONTROL_LENGTH {
            return Err(ExportError::Config(format!(
                "twin threshold {} must be in 1..{MAX_CONTROL_LENGTH}",
                self.twin_threshold
            )));
        }
        if self.max_loop_depth == 0 {
            return Err(ExportError::Config("loop depth limit must be at least 1".into()));
        }

        let script = ExportScript::compile(&self.script)?;
        if script.depth() > self.max_loop_depth {
            return Err(ExportError::LoopDepth {
                depth: script.depth(),
                limit: self.max_loop_depth,
            });
        }
        debug!(
            logical = logical,
            physical = self.physical_length,
            tokens = script.tokens().len(),
            "configuration validated"
        );
        Ok(script)
    }
}

/// Text written into the volume identifier blockette (010).
#[derive(Debug, Clone, PartialEq)]
pub struct SeedOptions {
    pub version: String,
    pub organization: String,
    pub label: String,
    pub volume_time: BTime,
}

impl Default for SeedOptions {
    fn default() -> Self {
        Self {
            version: "02.4".to_string(),
            organization: String::new(),
            label: String::new(),
            volume_time: BTime::epoch(),
        }
    }
}

impl SeedOptions {
    pub fn with_organization(mut self, organization: impl Into<String>) -> Self {
        self.organization = organization.into();
        self
    }

    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = label.into();
        self
    }

    pub fn with_volume_time(mut self, time: BTime) -> Self {
        self.volume_time = time;
        self
    }
}
