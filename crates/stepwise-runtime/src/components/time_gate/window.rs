use chrono::{DateTime, Datelike, Duration, NaiveDate, NaiveTime, TimeZone, Timelike, Utc, Weekday};
use chrono_tz::Tz;
use serde::Deserialize;

use stepwise_core::{Result, StepError};

/// Days scanned forward when looking for the next window start.
const SCAN_DAYS: i64 = 8;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GateMode {
    /// Let payloads through only inside the window.
    Include,
    /// Hold payloads while inside the window.
    Exclude,
}

/// A daily `[start, end)` window on selected weekdays.
///
/// When `start > end` the window wraps midnight. Both halves belong to the
/// local day they fall on, so a `22:00-06:00` window on Monday covers Monday
/// `00:00-06:00` and Monday `22:00-24:00`.
#[derive(Debug, Clone, PartialEq)]
pub struct TimeWindow {
    start: u32,
    end: u32,
    days: Vec<Weekday>,
    timezone: Tz,
}

impl TimeWindow {
    pub fn new(start: u32, end: u32, days: Vec<Weekday>, timezone: Tz) -> Result<Self> {
        if start >= 24 * 60 || end >= 24 * 60 {
            return Err(StepError::Config("window time out of range".into()));
        }
        if start == end {
            return Err(StepError::Config(
                "time window start and end must differ".into(),
            ));
        }
        if days.is_empty() {
            return Err(StepError::Config("time window needs at least one day".into()));
        }
        Ok(Self {
            start,
            end,
            days,
            timezone,
        })
    }

    fn overnight(&self) -> bool {
        self.start > self.end
    }

    fn allowed(&self, day: Weekday) -> bool {
        self.days.contains(&day)
    }

    pub fn contains(&self, now: DateTime<Utc>) -> bool {
        let local = now.with_timezone(&self.timezone);
        if !self.allowed(local.weekday()) {
            return false;
        }

        let minute = local.hour() * 60 + local.minute();
        if self.overnight() {
            minute >= self.start || minute < self.end
        } else {
            minute >= self.start && minute < self.end
        }
    }

    /// The next instant the gate opens, `now` when it is already open.
    pub fn next_boundary(&self, mode: GateMode, now: DateTime<Utc>) -> Result<DateTime<Utc>> {
        match mode {
            GateMode::Include => self.next_include_boundary(now),
            GateMode::Exclude => self.next_exclude_boundary(now),
        }
    }

    fn next_include_boundary(&self, now: DateTime<Utc>) -> Result<DateTime<Utc>> {
        if self.contains(now) {
            return Ok(now);
        }

        let today = now.with_timezone(&self.timezone).date_naive();
        for offset in 0..SCAN_DAYS {
            let date = today + Duration::days(offset);
            if !self.allowed(date.weekday()) {
                continue;
            }
            // The early half of an overnight window opens at local midnight.
            if self.overnight() {
                let midnight = self.at(date, 0)?;
                if midnight > now {
                    return Ok(midnight);
                }
            }
            let start = self.at(date, self.start)?;
            if start > now {
                return Ok(start);
            }
        }

        Err(StepError::Internal(format!(
            "no window start within {} days",
            SCAN_DAYS
        )))
    }

    fn next_exclude_boundary(&self, now: DateTime<Utc>) -> Result<DateTime<Utc>> {
        if !self.contains(now) {
            return Ok(now);
        }

        let local = now.with_timezone(&self.timezone);
        let minute = local.hour() * 60 + local.minute();
        let date = local.date_naive();
        if self.overnight() && minute >= self.start {
            let next = date + Duration::days(1);
            // The late half closes at midnight unless the next day continues it.
            if !self.allowed(next.weekday()) {
                return self.at(next, 0);
            }
            return self.at(next, self.end);
        }
        self.at(date, self.end)
    }

    /// Local `minute` of `date` as a UTC instant.
    fn at(&self, date: NaiveDate, minute: u32) -> Result<DateTime<Utc>> {
        let time = NaiveTime::from_hms_opt(minute / 60, minute % 60, 0)
            .ok_or_else(|| StepError::Internal(format!("invalid minute of day {}", minute)))?;
        let naive = date.and_time(time);

        // Skipped local times (DST gaps) resolve to the first valid instant after.
        let local = self
            .timezone
            .from_local_datetime(&naive)
            .earliest()
            .or_else(|| {
                self.timezone
                    .from_local_datetime(&(naive + Duration::hours(1)))
                    .earliest()
            })
            .ok_or_else(|| {
                StepError::Internal(format!("{} does not exist in {}", naive, self.timezone))
            })?;

        Ok(local.with_timezone(&Utc))
    }
}

/// Parse `HH:MM` into minutes of day.
pub fn parse_time(value: &str) -> Result<u32> {
    let time = NaiveTime::parse_from_str(value, "%H:%M")
        .map_err(|e| StepError::Config(format!("invalid time '{}': {}", value, e)))?;
    Ok(time.hour() * 60 + time.minute())
}

pub fn parse_day(value: &str) -> Result<Weekday> {
    value
        .parse::<Weekday>()
        .map_err(|_| StepError::Config(format!("invalid day '{}'", value)))
}

pub fn parse_timezone(value: &str) -> Result<Tz> {
    value
        .parse::<Tz>()
        .map_err(|_| StepError::Config(format!("unknown timezone '{}'", value)))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn utc(s: &str) -> DateTime<Utc> {
        DateTime::parse_from_rfc3339(s).unwrap().with_timezone(&Utc)
    }

    fn business_hours(days: Vec<Weekday>) -> TimeWindow {
        TimeWindow::new(9 * 60, 17 * 60, days, chrono_tz::UTC).unwrap()
    }

    #[test]
    fn test_parse_helpers() {
        assert_eq!(parse_time("09:30").unwrap(), 570);
        assert!(parse_time("25:00").is_err());
        assert_eq!(parse_day("monday").unwrap(), Weekday::Mon);
        assert_eq!(parse_day("Fri").unwrap(), Weekday::Fri);
        assert!(parse_day("someday").is_err());
        assert!(parse_timezone("Europe/Berlin").is_ok());
        assert!(parse_timezone("Mars/Olympus").is_err());
    }

    #[test]
    fn test_invalid_windows() {
        assert!(TimeWindow::new(600, 600, vec![Weekday::Mon], chrono_tz::UTC).is_err());
        assert!(TimeWindow::new(600, 700, vec![], chrono_tz::UTC).is_err());
    }

    #[test]
    fn test_include_outside_days_scans_to_next_monday() {
        // 2024-01-02 is a Tuesday.
        let window = business_hours(vec![Weekday::Mon]);
        let boundary = window
            .next_boundary(GateMode::Include, utc("2024-01-02T10:00:00Z"))
            .unwrap();
        assert_eq!(boundary, utc("2024-01-08T09:00:00Z"));
    }

    #[test]
    fn test_include_inside_window_is_now() {
        let window = business_hours(vec![Weekday::Tue]);
        let now = utc("2024-01-02T10:00:00Z");
        assert_eq!(window.next_boundary(GateMode::Include, now).unwrap(), now);
    }

    #[test]
    fn test_include_before_start_same_day() {
        let window = business_hours(vec![Weekday::Tue]);
        let boundary = window
            .next_boundary(GateMode::Include, utc("2024-01-02T07:15:00Z"))
            .unwrap();
        assert_eq!(boundary, utc("2024-01-02T09:00:00Z"));
    }

    #[test]
    fn test_include_after_end_wraps_to_next_week() {
        let window = business_hours(vec![Weekday::Tue]);
        let boundary = window
            .next_boundary(GateMode::Include, utc("2024-01-02T17:00:00Z"))
            .unwrap();
        assert_eq!(boundary, utc("2024-01-09T09:00:00Z"));
    }

    #[test]
    fn test_exclude_inside_window_waits_for_end() {
        let window = business_hours(vec![Weekday::Tue]);
        let boundary = window
            .next_boundary(GateMode::Exclude, utc("2024-01-02T10:00:00Z"))
            .unwrap();
        assert_eq!(boundary, utc("2024-01-02T17:00:00Z"));

        let outside = utc("2024-01-02T18:00:00Z");
        assert_eq!(
            window.next_boundary(GateMode::Exclude, outside).unwrap(),
            outside
        );
    }

    #[test]
    fn test_overnight_window() {
        let window =
            TimeWindow::new(22 * 60, 6 * 60, vec![Weekday::Tue], chrono_tz::UTC).unwrap();

        assert!(window.contains(utc("2024-01-02T23:30:00Z")));
        assert!(window.contains(utc("2024-01-02T05:59:00Z")));
        assert!(!window.contains(utc("2024-01-02T12:00:00Z")));
        assert!(!window.contains(utc("2024-01-03T01:00:00Z")));

        let boundary = window
            .next_boundary(GateMode::Exclude, utc("2024-01-02T23:30:00Z"))
            .unwrap();
        assert_eq!(boundary, utc("2024-01-03T00:00:00Z"));

        let boundary = window
            .next_boundary(GateMode::Exclude, utc("2024-01-02T03:00:00Z"))
            .unwrap();
        assert_eq!(boundary, utc("2024-01-02T06:00:00Z"));
    }

    #[test]
    fn test_overnight_exclude_runs_into_allowed_next_day() {
        let window = TimeWindow::new(
            22 * 60,
            6 * 60,
            vec![Weekday::Tue, Weekday::Wed],
            chrono_tz::UTC,
        )
        .unwrap();
        let boundary = window
            .next_boundary(GateMode::Exclude, utc("2024-01-02T23:30:00Z"))
            .unwrap();
        assert_eq!(boundary, utc("2024-01-03T06:00:00Z"));
    }

    #[test]
    fn test_overnight_include_opens_at_midnight() {
        // Monday 23:00; Tuesday's early half starts at 00:00.
        let window =
            TimeWindow::new(22 * 60, 6 * 60, vec![Weekday::Tue], chrono_tz::UTC).unwrap();
        let boundary = window
            .next_boundary(GateMode::Include, utc("2024-01-01T23:00:00Z"))
            .unwrap();
        assert_eq!(boundary, utc("2024-01-02T00:00:00Z"));

        let boundary = window
            .next_boundary(GateMode::Include, utc("2024-01-02T07:00:00Z"))
            .unwrap();
        assert_eq!(boundary, utc("2024-01-02T22:00:00Z"));

        let boundary = window
            .next_boundary(GateMode::Include, utc("2024-01-03T01:00:00Z"))
            .unwrap();
        assert_eq!(boundary, utc("2024-01-09T00:00:00Z"));
    }

    #[test]
    fn test_boundary_agrees_with_contains() {
        let berlin = parse_timezone("Europe/Berlin").unwrap();
        let windows = vec![
            TimeWindow::new(22 * 60, 6 * 60, vec![Weekday::Tue], chrono_tz::UTC).unwrap(),
            TimeWindow::new(
                22 * 60,
                6 * 60,
                vec![Weekday::Tue, Weekday::Wed, Weekday::Sat],
                chrono_tz::UTC,
            )
            .unwrap(),
            TimeWindow::new(23 * 60, 30, vec![Weekday::Mon, Weekday::Fri], berlin).unwrap(),
            business_hours(vec![Weekday::Mon, Weekday::Thu]),
        ];
        let minute = chrono::Duration::minutes(1);
        let first = utc("2024-01-01T00:00:00Z");

        for window in &windows {
            for step in 0..(8 * 24 * 4) {
                let now = first + chrono::Duration::minutes(15 * step);
                let open = window.contains(now);

                let include = window.next_boundary(GateMode::Include, now).unwrap();
                if include == now {
                    assert!(open, "{:?} include at {}", window, now);
                } else {
                    assert!(!open, "{:?} include at {}", window, now);
                    assert!(include > now);
                    assert!(window.contains(include), "{:?} include {}", window, include);
                    assert!(!window.contains(include - minute), "{:?} include {}", window, include);
                }

                let exclude = window.next_boundary(GateMode::Exclude, now).unwrap();
                if exclude == now {
                    assert!(!open, "{:?} exclude at {}", window, now);
                } else {
                    assert!(open, "{:?} exclude at {}", window, now);
                    assert!(exclude > now);
                    assert!(!window.contains(exclude), "{:?} exclude {}", window, exclude);
                    assert!(window.contains(exclude - minute), "{:?} exclude {}", window, exclude);
                }
            }
        }
    }

    #[test]
    fn test_timezone_is_respected() {
        // 09:00 in Berlin is 08:00 UTC in winter.
        let berlin = parse_timezone("Europe/Berlin").unwrap();
        let window = TimeWindow::new(9 * 60, 17 * 60, vec![Weekday::Tue], berlin).unwrap();
        let boundary = window
            .next_boundary(GateMode::Include, utc("2024-01-02T07:00:00Z"))
            .unwrap();
        assert_eq!(boundary, utc("2024-01-02T08:00:00Z"));
    }
}
