//! Seven-slot day-time lists (`7:05,7:05,7:05,7:05,7:05,10,-`).

use std::fmt;

use chrono::{DateTime, Datelike, Duration, FixedOffset, NaiveTime, Weekday};
use powermgmt_core::config::DayOrder;

use crate::error::ScheduleError;

/// Time of day at 5-minute resolution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TimeOfDay(u16);

impl TimeOfDay {
    /// `None` unless `hour < 24`, `minute < 60` and `minute` is a multiple of 5.
    pub const fn new(hour: u16, minute: u16) -> Option<Self> {
        if hour < 24 && minute < 60 && minute % 5 == 0 {
            Some(Self(hour * 60 + minute))
        } else {
            None
        }
    }

    pub fn hour(&self) -> u16 {
        self.0 / 60
    }

    pub fn minute(&self) -> u16 {
        self.0 % 60
    }

    pub fn minutes_from_midnight(&self) -> i64 {
        i64::from(self.0)
    }

    fn parse(entry: &str) -> Result<Self, ScheduleError> {
        let (hour_part, minute_part) = match entry.split_once(':') {
            Some((h, m)) => (h, Some(m)),
            None => (entry, None),
        };
        if hour_part.is_empty() || hour_part.len() > 2 || !hour_part.bytes().all(|b| b.is_ascii_digit()) {
            return Err(ScheduleError::DayList(format!("'{entry}' is not H or H:MM")));
        }
        let hour: u16 = hour_part
            .parse()
            .map_err(|_| ScheduleError::DayList(format!("'{entry}' is not H or H:MM")))?;
        let minute: u16 = match minute_part {
            None => 0,
            Some(m) if m.len() == 2 && m.bytes().all(|b| b.is_ascii_digit()) => m
                .parse()
                .map_err(|_| ScheduleError::DayList(format!("'{entry}' is not H or H:MM")))?,
            Some(_) => {
                return Err(ScheduleError::DayList(format!(
                    "'{entry}' minutes must be two digits"
                )))
            }
        };
        if hour > 23 {
            return Err(ScheduleError::DayList(format!("'{entry}' hour out of range 0-23")));
        }
        if minute > 59 || minute % 5 != 0 {
            return Err(ScheduleError::DayList(format!(
                "'{entry}' minutes must be a multiple of 5"
            )));
        }
        Ok(Self(hour * 60 + minute))
    }
}

impl fmt::Display for TimeOfDay {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{:02}", self.hour(), self.minute())
    }
}

/// One optional time per weekday.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DayTimeList {
    /// Indexed by `Weekday::num_days_from_monday`, whatever order the tag used.
    slots: [Option<TimeOfDay>; 7],
}

impl DayTimeList {
    pub fn new(slots_from_monday: [Option<TimeOfDay>; 7]) -> Self {
        Self {
            slots: slots_from_monday,
        }
    }

    /// The same time on Monday to Friday, nothing at the weekend.
    pub fn weekdays(time: TimeOfDay) -> Self {
        let mut slots = [None; 7];
        for slot in slots.iter_mut().take(5) {
            *slot = Some(time);
        }
        Self { slots }
    }

    pub fn every_day(time: TimeOfDay) -> Self {
        Self {
            slots: [Some(time); 7],
        }
    }

    /// Parse the seven comma-separated entries of a tag value.
    ///
    /// Each entry is `-` or `*` (nothing that day), `H` or `H:MM`.
    pub fn parse(value: &str, order: DayOrder) -> Result<Self, ScheduleError> {
        let entries: Vec<&str> = value.split([',', '/']).map(str::trim).collect();
        if entries.len() != 7 {
            return Err(ScheduleError::DayList(format!(
                "expected 7 entries, got {}",
                entries.len()
            )));
        }

        let mut slots = [None; 7];
        for (position, entry) in entries.iter().enumerate() {
            let time = match *entry {
                "-" | "*" => None,
                other => Some(TimeOfDay::parse(other)?),
            };
            slots[weekday_at(position, order).num_days_from_monday() as usize] = time;
        }
        Ok(Self { slots })
    }

    pub fn slot(&self, weekday: Weekday) -> Option<TimeOfDay> {
        self.slots[weekday.num_days_from_monday() as usize]
    }

    /// Every listed time in `(start, end]`, oldest first, read in the window's offset.
    pub fn fires_in(
        &self,
        start: DateTime<FixedOffset>,
        end: DateTime<FixedOffset>,
    ) -> Vec<DateTime<FixedOffset>> {
        let offset = *start.offset();
        let last_day = end.date_naive();
        let mut day = start.date_naive();
        let mut fires = Vec::new();

        while day <= last_day {
            if let Some(time) = self.slot(day.weekday()) {
                let local = day.and_time(NaiveTime::MIN) + Duration::minutes(time.minutes_from_midnight());
                if let Some(at) = local.and_local_timezone(offset).single() {
                    if at > start && at <= end {
                        fires.push(at);
                    }
                }
            }
            day = match day.succ_opt() {
                Some(next) => next,
                None => break,
            };
        }
        fires
    }

    pub fn latest_in(
        &self,
        start: DateTime<FixedOffset>,
        end: DateTime<FixedOffset>,
    ) -> Option<DateTime<FixedOffset>> {
        self.fires_in(start, end).pop()
    }
}

impl fmt::Display for DayTimeList {
    /// Monday-first rendering.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let rendered: Vec<String> = self
            .slots
            .iter()
            .map(|slot| slot.map_or_else(|| "-".to_string(), |t| t.to_string()))
            .collect();
        f.write_str(&rendered.join(","))
    }
}

fn weekday_at(position: usize, order: DayOrder) -> Weekday {
    let first = match order {
        DayOrder::MondayFirst => Weekday::Mon,
        DayOrder::SundayFirst => Weekday::Sun,
    };
    (0..position).fold(first, |day, _| day.succ())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn utc(y: i32, m: u32, d: u32, h: u32, min: u32) -> DateTime<FixedOffset> {
        FixedOffset::east_opt(0)
            .unwrap()
            .with_ymd_and_hms(y, m, d, h, min, 0)
            .unwrap()
    }

    #[test]
    fn parses_monday_first_list() {
        let list = DayTimeList::parse("7:05,7:05,7:05,7:05,7:05,10,-", DayOrder::MondayFirst).unwrap();
        assert_eq!(list.slot(Weekday::Mon), TimeOfDay::new(7, 5));
        assert_eq!(list.slot(Weekday::Sat), TimeOfDay::new(10, 0));
        assert_eq!(list.slot(Weekday::Sun), None);
    }

    #[test]
    fn parses_sunday_first_list() {
        let list = DayTimeList::parse("-,7:05,7:05,7:05,7:05,7:05,10", DayOrder::SundayFirst).unwrap();
        assert_eq!(list.slot(Weekday::Sun), None);
        assert_eq!(list.slot(Weekday::Mon), TimeOfDay::new(7, 5));
        assert_eq!(list.slot(Weekday::Sat), TimeOfDay::new(10, 0));
    }

    #[test]
    fn star_and_dash_mean_no_action() {
        let list = DayTimeList::parse("*,-,*,-,*,-,*", DayOrder::MondayFirst).unwrap();
        for day in [Weekday::Mon, Weekday::Tue, Weekday::Sun] {
            assert_eq!(list.slot(day), None);
        }
    }

    #[test]
    fn rejects_malformed_lists() {
        let bad = [
            "7,7,7,7,7,7",        // six entries
            "7,7,7,7,7,7,7,7",    // eight entries
            "7:03,7,7,7,7,7,7",   // not a multiple of 5
            "24,7,7,7,7,7,7",     // hour out of range
            "7:5,7,7,7,7,7,7",    // single-digit minutes
            "7am,7,7,7,7,7,7",
            ",7,7,7,7,7,7",
        ];
        for value in bad {
            assert!(
                DayTimeList::parse(value, DayOrder::MondayFirst).is_err(),
                "{value} should be rejected"
            );
        }
    }

    #[test]
    fn latest_in_uses_half_open_window() {
        let list = DayTimeList::weekdays(TimeOfDay::new(8, 0).unwrap());
        // 2026-03-02 is a Monday.
        let fire = utc(2026, 3, 2, 8, 0);
        assert_eq!(list.latest_in(utc(2026, 3, 2, 7, 55), fire), Some(fire));
        // Start is exclusive.
        assert_eq!(list.latest_in(fire, utc(2026, 3, 2, 8, 5)), None);
        // Saturday has no entry.
        assert_eq!(list.latest_in(utc(2026, 3, 7, 7, 55), utc(2026, 3, 7, 8, 0)), None);
    }

    #[test]
    fn latest_in_crosses_midnight() {
        let list = DayTimeList::every_day(TimeOfDay::new(0, 0).unwrap());
        let start = utc(2026, 3, 2, 23, 55);
        let end = utc(2026, 3, 3, 0, 0);
        assert_eq!(list.latest_in(start, end), Some(end));
    }

    #[test]
    fn display_is_monday_first() {
        let list = DayTimeList::parse("-,7:05,7:05,7:05,7:05,7:05,10", DayOrder::SundayFirst).unwrap();
        assert_eq!(list.to_string(), "7:05,7:05,7:05,7:05,7:05,10:00,-");
    }
}
