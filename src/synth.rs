//! Volume header synthesis.
//!
//! During the simulation pass the synthesizer collects station transitions,
//! contiguous time series and section boundaries. At the `patch` checkpoint
//! it learns how many records the volume header (010/011/012) and the time
//! span index (070/074) will take and shifts every collected record number
//! past those sections. The transcription pass then writes the summary
//! blockettes with final numbers.

use std::collections::BTreeMap;
use std::fmt;

use tracing::debug;

use crate::blockette::Blockette;
use crate::config::SeedOptions;
use crate::layout::{B010, B011, B012, B070, B074};
use crate::time::{BTime, TICKS_PER_SECOND};
use crate::types::{FieldValue, sample_rate};
use crate::{ExportError, Result};

/// Gaps up to this many ticks still count as contiguous.
pub const CONTIGUITY_TOLERANCE: i64 = TICKS_PER_SECOND;

pub const HEADER_SECTION: &str = "header";
pub const TIMESPAN_SECTION: &str = "timespans";

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SeriesKey {
    pub network: String,
    pub station: String,
    pub location: String,
    pub channel: String,
}

impl fmt::Display for SeriesKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}.{}", self.network, self.station, self.location, self.channel)
    }
}

/// Time covered by one data record and where it landed.
#[derive(Debug, Clone, PartialEq)]
pub struct DataMark {
    pub key: SeriesKey,
    pub start: BTime,
    pub end: BTime,
    pub record: u32,
}

impl DataMark {
    /// Read key, start time and duration from a fixed data section.
    pub fn from_header(header: &Blockette, record: u32) -> Result<Self> {
        let text = |name: &str| header.text(name).unwrap_or("").trim().to_string();
        let start = header
            .get("start")
            .and_then(FieldValue::as_time)
            .ok_or_else(|| ExportError::malformed(header.code(), "fixed section has no start time"))?;
        let samples = header.int("sample_count").unwrap_or(0);
        let factor = header.int("rate_factor").unwrap_or(0);
        let multiplier = header.int("rate_multiplier").unwrap_or(0);
        let rate = sample_rate(factor as i16, multiplier as i16);
        let end = if rate > 0.0 {
            start.add_ticks((samples as f64 / rate * TICKS_PER_SECOND as f64).round() as i64)
        } else {
            start
        };
        Ok(Self {
            key: SeriesKey {
                network: text("network"),
                station: text("station"),
                location: text("location"),
                channel: text("channel"),
            },
            start,
            end,
            record,
        })
    }
}

/// One contiguous run of data records for a channel.
#[derive(Debug, Clone, PartialEq)]
pub struct SeriesDescriptor {
    pub key: SeriesKey,
    pub start: BTime,
    pub end: BTime,
    pub start_record: u32,
    pub end_record: u32,
}

impl SeriesDescriptor {
    fn open(mark: DataMark) -> Self {
        Self {
            key: mark.key,
            start: mark.start,
            end: mark.end,
            start_record: mark.record,
            end_record: mark.record,
        }
    }

    fn continues(&self, mark: &DataMark) -> bool {
        self.key == mark.key
            && (mark.start.to_ticks() - self.end.to_ticks()).abs() <= CONTIGUITY_TOLERANCE
    }
}

/// A synthesized section: where the transcription pass inserts it, in
/// simulation record numbers, and how long it is.
#[derive(Debug, Clone, PartialEq, Eq)]
struct Insert {
    name: &'static str,
    position: u32,
    length: u32,
}

#[derive(Debug, Clone, Default)]
pub struct Synthesizer {
    stations: Vec<(String, u32)>,
    last_station: Option<String>,
    series: Vec<SeriesDescriptor>,
    open: Option<SeriesDescriptor>,
    inserts: Vec<Insert>,
    sections: Vec<(String, u32, Option<u32>)>,
    patched: bool,
}

impl Synthesizer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Forget everything: a new simulation starts.
    pub fn reset(&mut self) {
        *self = Self::default();
    }

    /// Clear section marks; collected bookkeeping survives.
    pub fn begin_pass(&mut self) {
        self.sections.clear();
    }

    pub fn is_patched(&self) -> bool {
        self.patched
    }

    pub fn stations(&self) -> &[(String, u32)] {
        &self.stations
    }

    /// Closed time series, in order.
    pub fn series(&self) -> &[SeriesDescriptor] {
        &self.series
    }

    /// Station index entry when the name differs from the last one seen.
    pub fn observe_station(&mut self, name: &str, record: u32) {
        let name = name.trim();
        if self.last_station.as_deref() == Some(name) {
            return;
        }
        self.stations.push((name.to_string(), record));
        self.last_station = Some(name.to_string());
    }

    /// Extend the open series or close it and open a new one.
    pub fn observe_series(&mut self, mark: DataMark) {
        match self.open.as_mut() {
            Some(open) if open.continues(&mark) => {
                open.end = mark.end;
                open.end_record = mark.record;
            }
            _ => {
                self.close_series();
                self.open = Some(SeriesDescriptor::open(mark));
            }
        }
    }

    pub fn close_series(&mut self) {
        if let Some(open) = self.open.take() {
            debug!(series = %open.key, start = %open.start, end = %open.end, "time series closed");
            self.series.push(open);
        }
    }

    pub fn begin_section(&mut self, name: &str, record: u32) {
        self.sections.push((name.to_string(), record, None));
    }

    pub fn end_section(&mut self, name: &str, record: u32) -> Result<()> {
        let open = self
            .sections
            .iter_mut()
            .rev()
            .find(|(n, _, end)| n == name && end.is_none())
            .ok_or_else(|| ExportError::Ordering(format!("section {name} ended before it began")))?;
        open.2 = Some(record);
        Ok(())
    }

    /// Length in records of each completed section.
    pub fn section_lengths(&self) -> BTreeMap<String, u32> {
        self.sections
            .iter()
            .filter_map(|(name, start, end)| end.map(|end| (name.clone(), end.saturating_sub(*start))))
            .collect()
    }

    /// Remember where a synthesized section goes.
    pub fn note_insert(&mut self, name: &'static str, position: u32) {
        self.inserts.push(Insert {
            name,
            position,
            length: 0,
        });
    }

    /// Shift every collected record number by the lengths of the
    /// synthesized sections placed at or before it. `lengths` maps section
    /// names to their size in records.
    pub fn patch(&mut self, lengths: &BTreeMap<&'static str, u32>) {
        for insert in &mut self.inserts {
            insert.length = lengths.get(insert.name).copied().unwrap_or(0);
        }
        let inserts = self.inserts.clone();
        let shift = |record: u32| -> u32 {
            inserts
                .iter()
                .filter(|i| i.position <= record)
                .map(|i| i.length)
                .sum::<u32>()
                + record
        };
        for (_, record) in &mut self.stations {
            *record = shift(*record);
        }
        for s in &mut self.series {
            s.start_record = shift(s.start_record);
            s.end_record = shift(s.end_record);
        }
        // final position of each insert: earlier inserts before it push it back
        for k in 0..self.inserts.len() {
            let before: u32 = inserts[..k]
                .iter()
                .filter(|i| i.position <= inserts[k].position)
                .map(|i| i.length)
                .sum();
            self.inserts[k].position += before;
        }
        for insert in &self.inserts {
            self.sections
                .push((insert.name.to_string(), 0, Some(insert.length)));
        }
        self.patched = true;
        debug!(
            stations = self.stations.len(),
            series = self.series.len(),
            inserts = self.inserts.len(),
            "record numbers patched"
        );
    }

    /// Final record number of a synthesized section, once patched.
    pub fn insert_position(&self, name: &str) -> Option<u32> {
        self.inserts
            .iter()
            .find(|i| i.name == name)
            .map(|i| i.position)
    }

    fn span(&self) -> Option<(BTime, BTime)> {
        let begin = self.series.iter().map(|s| s.start).min()?;
        let end = self.series.iter().map(|s| s.end).max()?;
        Some((begin, end))
    }

    /// Volume identifier, station index and time span index.
    pub fn header_blockettes(&self, options: &SeedOptions) -> Vec<Blockette> {
        let (begin, end) = self.span().unwrap_or((BTime::epoch(), BTime::epoch()));
        let identifier = Blockette::new(&B010)
            .with("version", options.version.as_str())
            .with("begin", begin)
            .with("end", end)
            .with("volume_time", options.volume_time)
            .with("organization", options.organization.as_str())
            .with("label", options.label.as_str());

        let stations = Blockette::new(&B011)
            .with_repeated(
                "station",
                self.stations.iter().map(|(name, _)| name.as_str()).collect(),
            )
            .with_repeated(
                "station_record",
                self.stations.iter().map(|&(_, r)| r as i64).collect(),
            );

        let mut spans = Blockette::new(&B012);
        if self.span().is_some() {
            let record = self.insert_position(TIMESPAN_SECTION).unwrap_or(0) as i64;
            spans = spans
                .with_repeated("span_begin", vec![begin])
                .with_repeated("span_end", vec![end])
                .with_repeated("span_record", vec![record]);
        }
        vec![identifier, stations, spans]
    }

    /// Time span identifier plus one series index per time series. Empty
    /// when no data was seen.
    pub fn timespan_blockettes(&self) -> Vec<Blockette> {
        let Some((begin, end)) = self.span() else {
            return Vec::new();
        };
        let mut out = vec![
            Blockette::new(&B070)
                .with("flag", "P")
                .with("begin", begin)
                .with("end", end),
        ];
        for s in &self.series {
            out.push(
                Blockette::new(&B074)
                    .with("station", s.key.station.as_str())
                    .with("location", s.key.location.as_str())
                    .with("channel", s.key.channel.as_str())
                    .with("series_start", s.start)
                    .with("start_record", s.start_record as i64)
                    .with("start_subsequence", 1i64)
                    .with("series_end", s.end)
                    .with("end_record", s.end_record as i64)
                    .with("end_subsequence", 1i64)
                    .with("accelerator_count", 0i64)
                    .with("network", s.key.network.as_str()),
            );
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(channel: &str) -> SeriesKey {
        SeriesKey {
            network: "IU".into(),
            station: "ANMO".into(),
            location: "00".into(),
            channel: channel.into(),
        }
    }

    fn mark(channel: &str, start_s: i64, len_s: i64, record: u32) -> DataMark {
        let t0 = BTime::new(2025, 100, 0, 0, 0, 0);
        DataMark {
            key: key(channel),
            start: t0.add_ticks(start_s * TICKS_PER_SECOND),
            end: t0.add_ticks((start_s + len_s) * TICKS_PER_SECOND),
            record,
        }
    }

    #[test]
    fn test_contiguous_records_extend_series() {
        let mut s = Synthesizer::new();
        s.observe_series(mark("BHZ", 0, 5, 10));
        s.observe_series(mark("BHZ", 5, 5, 11));
        s.close_series();
        assert_eq!(s.series().len(), 1);
        assert_eq!(s.series()[0].start_record, 10);
        assert_eq!(s.series()[0].end_record, 11);
    }

    #[test]
    fn test_gap_and_channel_change_break_series() {
        let mut s = Synthesizer::new();
        s.observe_series(mark("BHZ", 0, 5, 10));
        s.observe_series(mark("BHZ", 15, 5, 11));
        s.observe_series(mark("BHN", 20, 5, 12));
        s.close_series();
        let records: Vec<(u32, u32)> = s
            .series()
            .iter()
            .map(|d| (d.start_record, d.end_record))
            .collect();
        assert_eq!(records, vec![(10, 10), (11, 11), (12, 12)]);
    }

    #[test]
    fn test_tolerance_is_one_second() {
        let mut s = Synthesizer::new();
        let first = mark("BHZ", 0, 5, 1);
        let mut second = mark("BHZ", 5, 5, 2);
        second.start = second.start.add_ticks(TICKS_PER_SECOND);
        s.observe_series(first);
        s.observe_series(second);
        s.close_series();
        assert_eq!(s.series().len(), 1);
    }

    #[test]
    fn test_station_transitions_only() {
        let mut s = Synthesizer::new();
        s.observe_station("ANMO", 3);
        s.observe_station("ANMO ", 4);
        s.observe_station("CCM", 7);
        assert_eq!(s.stations(), &[("ANMO".to_string(), 3), ("CCM".to_string(), 7)]);
    }

    #[test]
    fn test_patch_shifts_by_preceding_inserts() {
        let mut s = Synthesizer::new();
        s.note_insert(HEADER_SECTION, 1);
        s.observe_station("ANMO", 3);
        s.note_insert(TIMESPAN_SECTION, 5);
        s.observe_series(mark("BHZ", 0, 5, 5));
        s.observe_series(mark("BHZ", 5, 5, 6));
        s.close_series();

        let lengths = BTreeMap::from([(HEADER_SECTION, 2), (TIMESPAN_SECTION, 1)]);
        s.patch(&lengths);

        assert!(s.is_patched());
        assert_eq!(s.stations()[0].1, 5);
        assert_eq!(s.series()[0].start_record, 8);
        assert_eq!(s.series()[0].end_record, 9);
        assert_eq!(s.insert_position(HEADER_SECTION), Some(1));
        assert_eq!(s.insert_position(TIMESPAN_SECTION), Some(7));
        assert_eq!(s.section_lengths()[TIMESPAN_SECTION], 1);
    }

    #[test]
    fn test_summary_blockettes() {
        let mut s = Synthesizer::new();
        s.observe_station("ANMO", 2);
        s.observe_series(mark("BHZ", 0, 5, 4));
        s.close_series();
        let header = s.header_blockettes(&SeedOptions::default());
        assert_eq!(header.len(), 3);
        assert_eq!(header[1].int("station_count"), Some(1));
        assert_eq!(header[2].int("span_count"), Some(1));

        let spans = s.timespan_blockettes();
        assert_eq!(spans.len(), 2);
        assert_eq!(spans[1].text("channel"), Some("BHZ"));
        assert_eq!(spans[1].int("start_record"), Some(4));
    }

    #[test]
    fn test_data_mark_duration() {
        let header = Blockette::standard(999)
            .unwrap()
            .with("station", "ANMO")
            .with("channel", "BHZ")
            .with("start", BTime::new(2025, 100, 0, 0, 0, 0))
            .with("sample_count", 100i64)
            .with("rate_factor", 20i64)
            .with("rate_multiplier", 1i64);
        let mark = DataMark::from_header(&header, 9).unwrap();
        assert_eq!(mark.end.to_ticks() - mark.start.to_ticks(), 5 * TICKS_PER_SECOND);
        assert_eq!(mark.key.station, "ANMO");
        assert_eq!(mark.key.network, "");
    }
}
