//! SEED timestamps.
//!
//! [`BTime`] is the SEED time representation: year, day-of-year and a
//! 0.0001-second fraction. Control headers carry it as variable-length
//! ASCII (`YYYY,DDD,HH:MM:SS.FFFF`), data records as the 10-byte binary
//! BTIME structure. For contiguity checks a time converts to *ticks*,
//! 0.0001-second units counted from 1970-001.

use std::fmt;

use crate::{ExportError, Result};

/// Ticks per second (SEED resolution is 0.0001 s).
pub const TICKS_PER_SECOND: i64 = 10_000;
const TICKS_PER_DAY: i64 = 86_400 * TICKS_PER_SECOND;

/// SEED timestamp.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct BTime {
    pub year: u16,
    pub day: u16, // 1-366
    pub hour: u8,
    pub minute: u8,
    pub second: u8,
    pub fract: u16, // 0.0001 second units
}

impl BTime {
    /// 1970-001 00:00:00.0000.
    pub fn epoch() -> Self {
        Self {
            year: 1970,
            day: 1,
            hour: 0,
            minute: 0,
            second: 0,
            fract: 0,
        }
    }

    pub fn new(year: u16, day: u16, hour: u8, minute: u8, second: u8, fract: u16) -> Self {
        Self {
            year,
            day,
            hour,
            minute,
            second,
            fract,
        }
    }

    /// Ticks (0.0001 s) since 1970-001.
    pub fn to_ticks(self) -> i64 {
        let days = days_before_year(self.year as i64) + self.day as i64 - 1;
        let seconds = self.hour as i64 * 3600 + self.minute as i64 * 60 + self.second as i64;
        days * TICKS_PER_DAY + seconds * TICKS_PER_SECOND + self.fract as i64
    }

    /// Inverse of [`BTime::to_ticks`].
    pub fn from_ticks(ticks: i64) -> Self {
        let mut days = ticks.div_euclid(TICKS_PER_DAY);
        let mut rem = ticks.rem_euclid(TICKS_PER_DAY);

        let mut year: i64 = 1970;
        while days < 0 {
            year -= 1;
            days += days_in_year(year);
        }
        while days >= days_in_year(year) {
            days -= days_in_year(year);
            year += 1;
        }

        let fract = rem % TICKS_PER_SECOND;
        rem /= TICKS_PER_SECOND;
        Self {
            year: year as u16,
            day: days as u16 + 1,
            hour: (rem / 3600) as u8,
            minute: (rem / 60 % 60) as u8,
            second: (rem % 60) as u8,
            fract: fract as u16,
        }
    }

    /// Shift by a (possibly negative) number of ticks.
    pub fn add_ticks(self, ticks: i64) -> Self {
        Self::from_ticks(self.to_ticks() + ticks)
    }

    /// Control-header form without the `~` terminator.
    pub fn to_seed_ascii(self) -> String {
        format!(
            "{:04},{:03},{:02}:{:02}:{:02}.{:04}",
            self.year, self.day, self.hour, self.minute, self.second, self.fract
        )
    }

    /// Parse the control-header form. Trailing components may be omitted,
    /// as in `1988,001` or `1988,001,12:30`.
    pub fn parse_seed_ascii(text: &str) -> Result<Self> {
        let bad = || ExportError::InvalidRecord(format!("bad SEED time {text:?}"));
        let mut parts = text.splitn(3, ',');
        let year = parts.next().ok_or_else(bad)?.trim().parse().map_err(|_| bad())?;
        let day = parts.next().ok_or_else(bad)?.trim().parse().map_err(|_| bad())?;
        let mut time = Self::new(year, day, 0, 0, 0, 0);

        if let Some(clock) = parts.next().filter(|c| !c.is_empty()) {
            let (hms, fract) = match clock.split_once('.') {
                Some((hms, fract)) => (hms, Some(fract)),
                None => (clock, None),
            };
            let mut fields = hms.split(':');
            if let Some(h) = fields.next() {
                time.hour = h.parse().map_err(|_| bad())?;
            }
            if let Some(m) = fields.next() {
                time.minute = m.parse().map_err(|_| bad())?;
            }
            if let Some(s) = fields.next() {
                time.second = s.parse().map_err(|_| bad())?;
            }
            if let Some(f) = fract {
                // right-pad to four digits: ".5" is 5000 ticks
                let digits: String = f.chars().chain("0000".chars()).take(4).collect();
                time.fract = digits.parse().map_err(|_| bad())?;
            }
        }
        Ok(time)
    }

    /// Write the 10-byte binary BTIME (big-endian).
    pub fn write_binary(&self, dest: &mut [u8]) {
        dest[0..2].copy_from_slice(&self.year.to_be_bytes());
        dest[2..4].copy_from_slice(&self.day.to_be_bytes());
        dest[4] = self.hour;
        dest[5] = self.minute;
        dest[6] = self.second;
        dest[7] = 0; // unused
        dest[8..10].copy_from_slice(&self.fract.to_be_bytes());
    }

    pub fn read_binary(src: &[u8]) -> Self {
        Self {
            year: u16::from_be_bytes([src[0], src[1]]),
            day: u16::from_be_bytes([src[2], src[3]]),
            hour: src[4],
            minute: src[5],
            second: src[6],
            fract: u16::from_be_bytes([src[8], src[9]]),
        }
    }
}

impl Default for BTime {
    fn default() -> Self {
        Self::epoch()
    }
}

impl fmt::Display for BTime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:04}-{:03} {:02}:{:02}:{:02}.{:04}",
            self.year, self.day, self.hour, self.minute, self.second, self.fract
        )
    }
}

fn is_leap(year: i64) -> bool {
    (year % 4 == 0 && year % 100 != 0) || year % 400 == 0
}

fn days_in_year(year: i64) -> i64 {
    if is_leap(year) { 366 } else { 365 }
}

/// Days from 1970-01-01 to January 1st of `year`.
fn days_before_year(year: i64) -> i64 {
    let y = year - 1;
    y * 365 + y.div_euclid(4) - y.div_euclid(100) + y.div_euclid(400) - 719_162
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_epoch_is_zero_ticks() {
        assert_eq!(BTime::epoch().to_ticks(), 0);
        assert_eq!(BTime::from_ticks(0), BTime::epoch());
    }

    #[test]
    fn test_ticks_roundtrip_across_leap_year() {
        let bt = BTime::new(2024, 366, 23, 59, 59, 9999);
        assert_eq!(BTime::from_ticks(bt.to_ticks()), bt);

        let next = bt.add_ticks(1);
        assert_eq!(next, BTime::new(2025, 1, 0, 0, 0, 0));
    }

    #[test]
    fn test_add_ticks_before_epoch() {
        let bt = BTime::epoch().add_ticks(-TICKS_PER_SECOND);
        assert_eq!(bt, BTime::new(1969, 365, 23, 59, 59, 0));
    }

    #[test]
    fn test_seed_ascii_roundtrip() {
        let bt = BTime::new(2025, 100, 12, 30, 45, 1234);
        let text = bt.to_seed_ascii();
        assert_eq!(text, "2025,100,12:30:45.1234");
        assert_eq!(BTime::parse_seed_ascii(&text).unwrap(), bt);
    }

    #[test]
    fn test_parse_truncated_ascii() {
        assert_eq!(
            BTime::parse_seed_ascii("1988,001").unwrap(),
            BTime::new(1988, 1, 0, 0, 0, 0)
        );
        assert_eq!(
            BTime::parse_seed_ascii("1988,001,12:30").unwrap(),
            BTime::new(1988, 1, 12, 30, 0, 0)
        );
        assert_eq!(
            BTime::parse_seed_ascii("1988,001,12:30:10.5").unwrap(),
            BTime::new(1988, 1, 12, 30, 10, 5000)
        );
        assert!(BTime::parse_seed_ascii("garbage").is_err());
    }

    #[test]
    fn test_binary_roundtrip() {
        let bt = BTime::new(2024, 15, 10, 30, 45, 1234);
        let mut buf = [0u8; 10];
        bt.write_binary(&mut buf);
        assert_eq!(&buf[0..2], &2024u16.to_be_bytes());
        assert_eq!(BTime::read_binary(&buf), bt);
    }

    #[test]
    fn test_display() {
        let bt = BTime::new(2024, 15, 10, 30, 0, 5000);
        assert_eq!(format!("{bt}"), "2024-015 10:30:00.5000");
    }
}
