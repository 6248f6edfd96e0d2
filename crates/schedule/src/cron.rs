//! Standard 5-field cron rules on top of the `cron` crate.
//!
//! The `cron` crate wants 6 fields (seconds first) and numbers weekdays
//! 1-7 from Sunday. Tag values use standard cron, where 0 and 7 are Sunday
//! and 1 is Monday, so the weekday field is rewritten into day names before
//! it is handed over.

use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, FixedOffset};
use cron::Schedule;

use crate::error::ScheduleError;

const DAY_NAMES: [&str; 7] = ["SUN", "MON", "TUE", "WED", "THU", "FRI", "SAT"];
const MONTH_NAMES: [&str; 12] = [
    "JAN", "FEB", "MAR", "APR", "MAY", "JUN", "JUL", "AUG", "SEP", "OCT", "NOV", "DEC",
];

/// A validated 5-field cron expression.
#[derive(Clone)]
pub struct CronRule {
    expression: String,
    schedule: Schedule,
}

impl CronRule {
    pub fn parse(expression: &str) -> Result<Self, ScheduleError> {
        let fields: Vec<&str> = expression.split_whitespace().collect();
        if fields.len() != 5 {
            return Err(ScheduleError::Cron(format!(
                "expected 5 fields (min hour dom month dow), got {}",
                fields.len()
            )));
        }

        let ranges: [(&str, u32, u32, &[&str]); 5] = [
            ("minute", 0, 59, &[]),
            ("hour", 0, 23, &[]),
            ("day-of-month", 1, 31, &[]),
            ("month", 1, 12, &MONTH_NAMES),
            ("day-of-week", 0, 7, &DAY_NAMES),
        ];
        let mut expanded = Vec::with_capacity(5);
        for (field, (name, min, max, names)) in fields.iter().zip(ranges.iter()) {
            let values = expand_field(field, *min, *max, names)
                .ok_or_else(|| ScheduleError::Cron(format!("invalid {name} field '{field}'")))?;
            expanded.push(values);
        }

        // Hand the crate explicit lists so its own field dialect never matters.
        let mut normalized = vec!["0".to_string()];
        for (i, (field, values)) in fields.iter().zip(expanded.iter()).enumerate() {
            let rendered = if *field == "*" || *field == "?" {
                "*".to_string()
            } else if i == 4 {
                // 7 and 0 both mean Sunday.
                let days: BTreeSet<usize> = values.iter().map(|d| (*d % 7) as usize).collect();
                days.iter().map(|d| DAY_NAMES[*d]).collect::<Vec<_>>().join(",")
            } else {
                values.iter().map(u32::to_string).collect::<Vec<_>>().join(",")
            };
            normalized.push(rendered);
        }
        let normalized = normalized.join(" ");

        let schedule = Schedule::from_str(&normalized)
            .map_err(|e| ScheduleError::Cron(format!("'{expression}': {e}")))?;

        Ok(Self {
            expression: fields.join(" "),
            schedule,
        })
    }

    pub fn expression(&self) -> &str {
        &self.expression
    }

    /// Every fire time in `(start, end]`, oldest first.
    pub fn fires_in(
        &self,
        start: DateTime<FixedOffset>,
        end: DateTime<FixedOffset>,
    ) -> Vec<DateTime<FixedOffset>> {
        self.schedule
            .after(&start)
            .take_while(|fire| *fire <= end)
            .collect()
    }

    pub fn latest_in(
        &self,
        start: DateTime<FixedOffset>,
        end: DateTime<FixedOffset>,
    ) -> Option<DateTime<FixedOffset>> {
        self.fires_in(start, end).pop()
    }
}

impl fmt::Debug for CronRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("CronRule").field(&self.expression).finish()
    }
}

impl PartialEq for CronRule {
    fn eq(&self, other: &Self) -> bool {
        self.expression == other.expression
    }
}

impl fmt::Display for CronRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.expression)
    }
}

/// Expand one cron field into the values it selects.
///
/// Supports `*`, `?`, `N`, `N-M`, `*/S`, `N-M/S`, `N/S`, comma lists and the
/// given upper-case `names` (index 0 is `min`). Returns `None` if malformed or
/// out of range.
fn expand_field(field: &str, min: u32, max: u32, names: &[&str]) -> Option<BTreeSet<u32>> {
    let mut values = BTreeSet::new();
    for part in field.split(',') {
        if part.is_empty() {
            return None;
        }

        let (range_part, step) = match part.split_once('/') {
            Some((r, s)) => match s.parse::<u32>() {
                Ok(v) if v > 0 => (r, v),
                _ => return None,
            },
            None => (part, 1),
        };

        let (lo, hi) = if range_part == "*" || range_part == "?" {
            (min, max)
        } else if let Some((a, b)) = range_part.split_once('-') {
            let lo = field_value(a, min, names)?;
            let hi = field_value(b, min, names)?;
            if lo > hi {
                return None;
            }
            (lo, hi)
        } else {
            let v = field_value(range_part, min, names)?;
            // `N/S` runs from N to the end of the range.
            if part.contains('/') {
                (v, max)
            } else {
                (v, v)
            }
        };

        if lo < min || hi > max {
            return None;
        }
        values.extend((lo..=hi).step_by(step as usize));
    }
    Some(values)
}

fn field_value(token: &str, min: u32, names: &[&str]) -> Option<u32> {
    if let Ok(v) = token.parse::<u32>() {
        return Some(v);
    }
    let upper = token.to_ascii_uppercase();
    names
        .iter()
        .position(|n| *n == upper)
        .map(|i| min + i as u32)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Datelike, TimeZone, Weekday};

    fn at(y: i32, m: u32, d: u32, h: u32, min: u32) -> DateTime<FixedOffset> {
        FixedOffset::east_opt(0)
            .unwrap()
            .with_ymd_and_hms(y, m, d, h, min, 0)
            .unwrap()
    }

    #[test]
    fn weekday_numbers_follow_standard_cron() {
        // 1-5 must be Monday to Friday, not Sunday to Thursday.
        let rule = CronRule::parse("0 8 * * 1-5").unwrap();
        // 2026-03-01 is a Sunday.
        assert_eq!(at(2026, 3, 1, 0, 0).weekday(), Weekday::Sun);
        assert!(rule.latest_in(at(2026, 3, 1, 7, 55), at(2026, 3, 1, 8, 0)).is_none());
        assert!(rule.latest_in(at(2026, 3, 2, 7, 55), at(2026, 3, 2, 8, 0)).is_some());
        assert!(rule.latest_in(at(2026, 3, 6, 7, 55), at(2026, 3, 6, 8, 0)).is_some());
        assert!(rule.latest_in(at(2026, 3, 7, 7, 55), at(2026, 3, 7, 8, 0)).is_none());
    }

    #[test]
    fn sunday_as_zero_or_seven() {
        for expr in ["30 9 * * 0", "30 9 * * 7", "30 9 * * SUN"] {
            let rule = CronRule::parse(expr).unwrap();
            assert!(
                rule.latest_in(at(2026, 3, 1, 9, 25), at(2026, 3, 1, 9, 30)).is_some(),
                "{expr} should fire on Sunday"
            );
        }
    }

    #[test]
    fn latest_in_returns_last_fire() {
        let rule = CronRule::parse("45 7,16 * * *").unwrap();
        let fire = rule.latest_in(at(2026, 3, 2, 7, 0), at(2026, 3, 2, 17, 0)).unwrap();
        assert_eq!(fire, at(2026, 3, 2, 16, 45));
    }

    #[test]
    fn window_start_is_exclusive() {
        let rule = CronRule::parse("15 8 * * *").unwrap();
        assert!(rule.latest_in(at(2026, 3, 2, 8, 15), at(2026, 3, 2, 8, 20)).is_none());
        assert!(rule.latest_in(at(2026, 3, 2, 8, 10), at(2026, 3, 2, 8, 15)).is_some());
    }

    #[test]
    fn rejects_invalid_expressions() {
        for expr in [
            "0 8 * *",
            "0 8 * * * *",
            "60 8 * * *",
            "0 24 * * *",
            "0 8 0 * *",
            "0 8 * 13 *",
            "0 8 * * 8",
            "0 8 * * 5-1",
            "*/0 8 * * *",
            "a b c d e",
        ] {
            assert!(CronRule::parse(expr).is_err(), "{expr} should be rejected");
        }
    }

    #[test]
    fn accepts_steps_and_names() {
        assert!(CronRule::parse("*/15 8-18 * * MON-FRI").is_ok());
        assert!(CronRule::parse("0 */4 * * *").is_ok());
        assert!(CronRule::parse("0 0 1 JAN,JUL *").is_ok());
    }
}
