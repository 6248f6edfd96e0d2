//! Named schedule presets and the rule tables they stand for.

use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::daylist::{DayTimeList, TimeOfDay};
use crate::error::ScheduleError;
use crate::evaluator::{DesiredState, PowerRule, RulePair};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Preset {
    /// On 08:00, off 18:00, Monday to Friday. No power-on on public holidays.
    BusinessHours,
    /// On 08:00, off 22:00, Monday to Friday.
    BusinessHoursExtended,
    AlwaysOn,
    AlwaysOff,
    /// Off at 00:00 every day, never started.
    OffAtMidnight,
    None,
}

/// What a preset asks the evaluator to do.
#[derive(Debug, Clone, PartialEq)]
pub enum PresetPlan {
    /// Re-asserted every tick.
    Fixed(DesiredState),
    Rules(RulePair),
    Untouched,
}

impl Preset {
    pub const ALL: [Preset; 6] = [
        Preset::BusinessHours,
        Preset::BusinessHoursExtended,
        Preset::AlwaysOn,
        Preset::AlwaysOff,
        Preset::OffAtMidnight,
        Preset::None,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Preset::BusinessHours => "BusinessHours",
            Preset::BusinessHoursExtended => "BusinessHoursExtended",
            Preset::AlwaysOn => "AlwaysOn",
            Preset::AlwaysOff => "AlwaysOff",
            Preset::OffAtMidnight => "OffAtMidnight",
            Preset::None => "None",
        }
    }

    pub fn plan(&self) -> PresetPlan {
        match self {
            Preset::AlwaysOn => PresetPlan::Fixed(DesiredState::On),
            Preset::AlwaysOff => PresetPlan::Fixed(DesiredState::Off),
            Preset::None => PresetPlan::Untouched,
            Preset::BusinessHours => PresetPlan::Rules(RulePair {
                on: weekdays_at(8),
                off: weekdays_at(18),
                skip_on_holidays: true,
            }),
            Preset::BusinessHoursExtended => PresetPlan::Rules(RulePair {
                on: weekdays_at(8),
                off: weekdays_at(22),
                skip_on_holidays: false,
            }),
            Preset::OffAtMidnight => PresetPlan::Rules(RulePair {
                on: None,
                off: TimeOfDay::new(0, 0).map(|t| PowerRule::DayList(DayTimeList::every_day(t))),
                skip_on_holidays: false,
            }),
        }
    }
}

fn weekdays_at(hour: u16) -> Option<PowerRule> {
    TimeOfDay::new(hour, 0).map(|t| PowerRule::DayList(DayTimeList::weekdays(t)))
}

impl FromStr for Preset {
    type Err = ScheduleError;

    /// Exact, case-sensitive match.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|p| p.as_str() == s)
            .ok_or(ScheduleError::UnknownPreset)
    }
}

impl fmt::Display for Preset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Local dates on which holiday-aware power-ons are skipped.
#[derive(Debug, Clone, Default)]
pub struct HolidayCalendar {
    dates: BTreeSet<NaiveDate>,
}

impl HolidayCalendar {
    pub fn new(dates: impl IntoIterator<Item = NaiveDate>) -> Self {
        Self {
            dates: dates.into_iter().collect(),
        }
    }

    pub fn is_holiday(&self, date: NaiveDate) -> bool {
        self.dates.contains(&date)
    }

    pub fn len(&self) -> usize {
        self.dates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.dates.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Weekday;

    #[test]
    fn presets_match_case_sensitively() {
        for preset in Preset::ALL {
            assert_eq!(preset.as_str().parse::<Preset>().unwrap(), preset);
        }
        assert!("businesshours".parse::<Preset>().is_err());
        assert!("Buisness".parse::<Preset>().is_err());
        assert!(" AlwaysOn".parse::<Preset>().is_err());
    }

    #[test]
    fn business_hours_rule_table() {
        let PresetPlan::Rules(rules) = Preset::BusinessHours.plan() else {
            panic!("expected rules");
        };
        assert!(rules.skip_on_holidays);
        let Some(PowerRule::DayList(on)) = rules.on else {
            panic!("expected day list");
        };
        assert_eq!(on.slot(Weekday::Mon), TimeOfDay::new(8, 0));
        assert_eq!(on.slot(Weekday::Sat), None);
        let Some(PowerRule::DayList(off)) = rules.off else {
            panic!("expected day list");
        };
        assert_eq!(off.slot(Weekday::Fri), TimeOfDay::new(18, 0));
    }

    #[test]
    fn extended_hours_ignore_holidays() {
        let PresetPlan::Rules(rules) = Preset::BusinessHoursExtended.plan() else {
            panic!("expected rules");
        };
        assert!(!rules.skip_on_holidays);
    }

    #[test]
    fn fixed_presets() {
        assert_eq!(Preset::AlwaysOn.plan(), PresetPlan::Fixed(DesiredState::On));
        assert_eq!(Preset::AlwaysOff.plan(), PresetPlan::Fixed(DesiredState::Off));
        assert_eq!(Preset::None.plan(), PresetPlan::Untouched);
    }
}
