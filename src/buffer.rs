//! Record buffer manager.
//!
//! Owns the logical record being filled, the queue of completed logical
//! records, and the position inside the current physical record. Every
//! logical record starts with an 8-byte header: a 6-digit sequence number,
//! the record type character, and a continuation marker (`*` when the
//! record carries the tail of an object started in the previous one).

use std::collections::VecDeque;
use std::io::Write;

use tracing::trace;

use crate::layout::CONTROL_HEADER_LENGTH;
use crate::{ExportError, Result};

/// Sequence number, type character, continuation marker.
pub const RECORD_HEADER_LENGTH: usize = 8;

/// A control object never starts in fewer free bytes than this.
pub const MIN_TAIL_RESERVE: usize = CONTROL_HEADER_LENGTH;

const MAX_SEQUENCE: u32 = 999_999;

/// One fixed-size logical record under construction.
#[derive(Debug, Clone)]
pub struct LogicalRecord {
    sequence: u32,
    kind: char,
    bytes: Vec<u8>,
    position: usize,
}

impl LogicalRecord {
    fn open(sequence: u32, kind: char, continuation: bool, length: usize) -> Self {
        let mut bytes = Vec::with_capacity(length);
        bytes.extend_from_slice(format!("{sequence:06}").as_bytes());
        bytes.push(kind as u8);
        bytes.push(if continuation { b'*' } else { b' ' });
        bytes.resize(length, 0);
        Self {
            sequence,
            kind,
            bytes,
            position: RECORD_HEADER_LENGTH,
        }
    }

    pub fn sequence(&self) -> u32 {
        self.sequence
    }

    pub fn kind(&self) -> char {
        self.kind
    }

    pub fn remaining(&self) -> usize {
        self.bytes.len() - self.position
    }

    /// True while nothing follows the header.
    pub fn is_empty(&self) -> bool {
        self.position == RECORD_HEADER_LENGTH
    }

    fn put(&mut self, data: &[u8]) {
        self.bytes[self.position..self.position + data.len()].copy_from_slice(data);
        self.position += data.len();
    }

    fn fill(&mut self, pad: u8) {
        self.bytes[self.position..].fill(pad);
        self.position = self.bytes.len();
    }
}

/// Buffer configuration fixed for the builder's lifetime.
#[derive(Debug, Clone, Copy)]
pub struct RecordGeometry {
    pub logical_length: usize,
    pub physical_length: usize,
    pub pad: u8,
}

impl RecordGeometry {
    /// Logical records per physical record.
    pub fn ratio(&self) -> Result<usize> {
        if self.logical_length <= RECORD_HEADER_LENGTH + MIN_TAIL_RESERVE {
            return Err(ExportError::Config(format!(
                "logical record length {} leaves no room for data",
                self.logical_length
            )));
        }
        if self.physical_length == 0 || self.physical_length % self.logical_length != 0 {
            return Err(ExportError::Config(format!(
                "physical record length {} is not a multiple of logical record length {}",
                self.physical_length, self.logical_length
            )));
        }
        Ok(self.physical_length / self.logical_length)
    }
}

/// Logical record assembly plus physical record output.
pub struct RecordBuffer<W: Write> {
    geometry: RecordGeometry,
    per_physical: usize,
    current: Option<LogicalRecord>,
    queue: VecDeque<LogicalRecord>,
    next_sequence: u32,
    /// Logical records already written into the open physical record.
    physical_fill: usize,
    suppressed: bool,
    closed: u64,
    written: u64,
    sink: W,
}

impl<W: Write> RecordBuffer<W> {
    pub fn new(geometry: RecordGeometry, sink: W) -> Result<Self> {
        let per_physical = geometry.ratio()?;
        Ok(Self {
            geometry,
            per_physical,
            current: None,
            queue: VecDeque::new(),
            next_sequence: 1,
            physical_fill: 0,
            suppressed: false,
            closed: 0,
            written: 0,
            sink,
        })
    }

    pub fn geometry(&self) -> RecordGeometry {
        self.geometry
    }

    /// Forget all records and start numbering at 1 again.
    pub fn reset(&mut self) {
        self.current = None;
        self.queue.clear();
        self.next_sequence = 1;
        self.physical_fill = 0;
        self.suppressed = false;
        self.closed = 0;
    }

    pub fn is_suppressed(&self) -> bool {
        self.suppressed
    }

    /// Complete the open physical record under the old state, then switch.
    /// The sink only ever receives whole physical records, so a record
    /// started with the pen down is filled out before the pen lifts.
    pub fn set_suppressed(&mut self, suppressed: bool) -> Result<()> {
        if suppressed != self.suppressed {
            self.end_physical()?;
        }
        self.suppressed = suppressed;
        Ok(())
    }

    pub fn current(&self) -> Option<&LogicalRecord> {
        self.current.as_ref()
    }

    /// Sequence number the next freshly opened record will carry once the
    /// current one is closed.
    pub fn next_fresh_sequence(&self) -> u32 {
        match &self.current {
            Some(rec) => wrap(rec.sequence + 1),
            None => self.next_sequence,
        }
    }

    /// Logical records closed since the last reset.
    pub fn records_closed(&self) -> u64 {
        self.closed
    }

    /// Logical records handed to the sink over the buffer's lifetime.
    pub fn records_written(&self) -> u64 {
        self.written
    }

    fn open(&mut self, kind: char, continuation: bool) {
        let sequence = self.next_sequence;
        self.next_sequence = wrap(sequence + 1);
        self.current = Some(LogicalRecord::open(
            sequence,
            kind,
            continuation,
            self.geometry.logical_length,
        ));
    }

    /// Append one serialized control object, spilling into continuation
    /// records as needed. Returns the sequence number of the record the
    /// object starts in.
    pub fn write_object(&mut self, kind: char, bytes: &[u8]) -> Result<u32> {
        if let Some(cur) = &self.current {
            if cur.kind != kind || cur.remaining() < MIN_TAIL_RESERVE {
                self.pad_logical()?;
            }
        }

        let mut start = None;
        let mut offset = 0;
        let mut continuation = false;
        while offset < bytes.len() {
            if self.current.is_none() {
                self.open(kind, continuation);
            }
            let Some(cur) = self.current.as_mut() else {
                continue;
            };
            let n = cur.remaining().min(bytes.len() - offset);
            cur.put(&bytes[offset..offset + n]);
            start.get_or_insert(cur.sequence);
            offset += n;
            if offset < bytes.len() {
                self.pad_logical()?;
                continuation = true;
            }
        }
        Ok(start.unwrap_or_else(|| self.next_fresh_sequence()))
    }

    /// Write a record that owns a whole logical record (a data record).
    pub fn write_record(&mut self, kind: char, body: &[u8]) -> Result<u32> {
        let room = self.geometry.logical_length - RECORD_HEADER_LENGTH;
        if body.len() > room {
            return Err(ExportError::InvalidRecord(format!(
                "record body of {} bytes exceeds {room}",
                body.len()
            )));
        }
        self.pad_logical()?;
        self.open(kind, false);
        let mut sequence = 0;
        if let Some(cur) = self.current.as_mut() {
            cur.put(body);
            sequence = cur.sequence;
        }
        self.pad_logical()?;
        Ok(sequence)
    }

    /// Close the current logical record, filling its tail with the pad byte.
    /// A record holding nothing but its header is still closed; callers that
    /// end a record nobody opened get a no-op.
    pub fn pad_logical(&mut self) -> Result<()> {
        let Some(mut rec) = self.current.take() else {
            return Ok(());
        };
        rec.fill(self.geometry.pad);
        trace!(sequence = rec.sequence, kind = %rec.kind, "logical record closed");
        self.queue.push_back(rec);
        self.closed += 1;
        if self.physical_fill + self.queue.len() >= self.per_physical {
            self.flush_physical()?;
        }
        Ok(())
    }

    /// Move queued records into the open physical record, at most until it
    /// is full. Returns how many were moved.
    pub fn flush_physical(&mut self) -> Result<usize> {
        let room = self.per_physical - self.physical_fill;
        let take = room.min(self.queue.len());
        for _ in 0..take {
            if let Some(rec) = self.queue.pop_front() {
                self.emit(&rec.bytes)?;
            }
        }
        self.physical_fill = (self.physical_fill + take) % self.per_physical;
        if take > 0 {
            trace!(records = take, suppressed = self.suppressed, "physical flush");
        }
        Ok(take)
    }

    /// Close the current logical record and complete the physical record,
    /// padding unused logical slots.
    pub fn end_physical(&mut self) -> Result<()> {
        self.pad_logical()?;
        while !self.queue.is_empty() {
            self.flush_physical()?;
        }
        if self.physical_fill > 0 {
            let slots = self.per_physical - self.physical_fill;
            if !self.suppressed {
                let filler = vec![self.geometry.pad; slots * self.geometry.logical_length];
                self.sink.write_all(&filler)?;
            }
            self.physical_fill = 0;
        }
        Ok(())
    }

    /// Complete the volume and flush the sink.
    pub fn finish(&mut self) -> Result<()> {
        self.end_physical()?;
        self.sink.flush()?;
        Ok(())
    }

    fn emit(&mut self, bytes: &[u8]) -> Result<()> {
        if self.suppressed {
            return Ok(());
        }
        self.sink.write_all(bytes)?;
        self.written += 1;
        Ok(())
    }

    pub fn sink(&self) -> &W {
        &self.sink
    }

    pub fn into_sink(self) -> W {
        self.sink
    }
}

fn wrap(sequence: u32) -> u32 {
    if sequence > MAX_SEQUENCE { 1 } else { sequence }
}
