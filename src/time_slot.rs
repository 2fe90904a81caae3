use std::{fmt, str::FromStr, sync::LazyLock};

use chrono::{NaiveTime, Timelike};
use regex::Regex;
use thiserror::Error;

static TIME_SLOT_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?:^|\D)(\d{1,2}):(\d{2})\s*[-到至]\s*(\d{1,2}):(\d{2})(?:\D|$)")
        .expect("The time slot pattern is a valid regex.")
});

#[derive(Debug, Error, PartialEq, Eq)]
pub enum InvalidTimeSlot {
    #[error("`{0}` does not look like HH:MM-HH:MM")]
    NoMatch(String),

    #[error("{hour:02}:{minute:02} is not a valid time of day")]
    OutOfRange { hour: u32, minute: u32 },
}

/// A start/end clock-time range attached to a study task.
///
/// Nothing forces `end` after `start`; a slot such as `23:30-00:30` is kept
/// as written and reported through [`TimeSlot::crosses_midnight`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeSlot {
    start: NaiveTime,
    end: NaiveTime,
}

impl TimeSlot {
    pub fn new(start: NaiveTime, end: NaiveTime) -> Self {
        Self {
            start: truncate_to_minute(start),
            end: truncate_to_minute(end),
        }
    }

    /// Lenient parse: any malformed input is simply "no time slot".
    pub fn parse(text: &str) -> Option<Self> {
        text.parse().ok()
    }

    pub fn start(&self) -> NaiveTime {
        self.start
    }

    pub fn end(&self) -> NaiveTime {
        self.end
    }

    pub fn crosses_midnight(&self) -> bool {
        self.end < self.start
    }

    pub fn duration_minutes(&self) -> i64 {
        let minutes = (self.end - self.start).num_minutes();
        if self.crosses_midnight() {
            minutes + 24 * 60
        } else {
            minutes
        }
    }
}

impl FromStr for TimeSlot {
    type Err = InvalidTimeSlot;

    fn from_str(text: &str) -> Result<Self, Self::Err> {
        let caps = TIME_SLOT_PATTERN
            .captures(text)
            .ok_or_else(|| InvalidTimeSlot::NoMatch(text.to_owned()))?;

        let start = time_of_day(&caps[1], &caps[2])?;
        let end = time_of_day(&caps[3], &caps[4])?;

        Ok(Self::new(start, end))
    }
}

impl fmt::Display for TimeSlot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.start.format("%H:%M"), self.end.format("%H:%M"))
    }
}

fn time_of_day(hour: &str, minute: &str) -> Result<NaiveTime, InvalidTimeSlot> {
    // The pattern only captures one or two ASCII digits, so these parses cannot fail.
    let hour: u32 = hour.parse().unwrap_or(u32::MAX);
    let minute: u32 = minute.parse().unwrap_or(u32::MAX);

    NaiveTime::from_hms_opt(hour, minute, 0).ok_or(InvalidTimeSlot::OutOfRange { hour, minute })
}

fn truncate_to_minute(time: NaiveTime) -> NaiveTime {
    NaiveTime::from_hms_opt(time.hour(), time.minute(), 0).unwrap_or(time)
}
