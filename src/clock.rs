use std::{sync::Arc, time::Duration};

use chrono::{DateTime, LocalResult, NaiveDate, NaiveDateTime, NaiveTime, Offset, TimeDelta, TimeZone, Utc};
use chrono_tz::Tz;

pub trait Clock: Send + Sync + 'static {
    fn now(&self) -> DateTime<Tz>;

    fn today(&self) -> NaiveDate {
        self.now().date_naive()
    }
}

/// Wall-clock time in a fixed IANA time zone.
pub struct SystemClock {
    tz: Tz,
}

impl SystemClock {
    pub fn new(tz: Tz) -> Self {
        Self { tz }
    }
}

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Tz> {
        Utc::now().with_timezone(&self.tz)
    }
}

/// A clock that follows tokio's time source, so it advances together with a
/// paused test runtime.
pub struct VirtualClock {
    origin: DateTime<Tz>,
    started: tokio::time::Instant,
}

impl VirtualClock {
    pub fn new(origin: DateTime<Tz>) -> Self {
        Self {
            origin,
            started: tokio::time::Instant::now(),
        }
    }
}

impl Clock for VirtualClock {
    fn now(&self) -> DateTime<Tz> {
        let elapsed = TimeDelta::from_std(self.started.elapsed()).unwrap_or(TimeDelta::zero());
        self.origin + elapsed
    }
}

/// Maps a local wall-clock reading onto an instant. Ambiguous readings take
/// the earliest instant; readings inside a DST gap are shifted forward by the
/// gap length.
pub fn resolve_local(tz: Tz, naive: NaiveDateTime) -> DateTime<Tz> {
    match tz.from_local_datetime(&naive) {
        LocalResult::Single(instant) => instant,
        LocalResult::Ambiguous(earliest, _) => earliest,
        LocalResult::None => {
            let offset_before_gap = tz
                .offset_from_local_datetime(&(naive - TimeDelta::days(1)))
                .earliest()
                .map(|offset| offset.fix().local_minus_utc())
                .unwrap_or(0);

            tz.from_utc_datetime(&(naive - TimeDelta::seconds(i64::from(offset_before_gap))))
        }
    }
}

pub fn at_time_on(tz: Tz, date: NaiveDate, time: NaiveTime) -> DateTime<Tz> {
    resolve_local(tz, date.and_time(time))
}

pub fn next_day(date: NaiveDate) -> NaiveDate {
    date.succ_opt().unwrap_or(date)
}

/// `YYYY-MM-DD`, used for storage keys and as the relay's date bucket.
pub fn date_key(date: NaiveDate) -> String {
    date.format("%Y-%m-%d").to_string()
}

pub fn parse_date_key(key: &str) -> Option<NaiveDate> {
    NaiveDate::parse_from_str(key.trim(), "%Y-%m-%d").ok()
}

pub fn until_next_day(clock: &dyn Clock) -> Duration {
    let now = clock.now();
    let midnight = at_time_on(now.timezone(), next_day(now.date_naive()), NaiveTime::MIN);

    (midnight - now)
        .to_std()
        .unwrap_or(Duration::from_secs(60))
}

/// Longest wait between two looks at the calendar date.
pub const DAY_CHECK_INTERVAL: Duration = Duration::from_secs(60);

/// Reports calendar day changes of a clock.
///
/// The date is re-read at least every [`DAY_CHECK_INTERVAL`], so a wall clock
/// that jumps past midnight (after a suspend, say) is noticed within a minute
/// rather than after the full monotonic wait.
pub struct DayWatcher {
    clock: Arc<dyn Clock>,
    current: NaiveDate,
}

impl DayWatcher {
    pub fn new(clock: Arc<dyn Clock>, current: NaiveDate) -> Self {
        Self { clock, current }
    }

    pub fn current(&self) -> NaiveDate {
        self.current
    }

    /// Waits until the clock's date differs from the last reported one and
    /// returns the new date. Dropping the future loses nothing.
    pub async fn changed(&mut self) -> NaiveDate {
        loop {
            let wait = until_next_day(self.clock.as_ref()).min(DAY_CHECK_INTERVAL);
            tokio::time::sleep(wait).await;

            let today = self.clock.today();
            if today != self.current {
                self.current = today;
                return today;
            }
        }
    }
}
