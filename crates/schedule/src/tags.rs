//! Tag set → [`Schedule`].
//!
//! `Schedule` wins when present. Otherwise `PowerOn` and `PowerOff` are parsed
//! independently. A resource without any of the three is left alone.

use std::collections::BTreeMap;

use powermgmt_core::config::DayOrder;
use powermgmt_core::{
    PowerMgmtError, ResourceDescriptor, TagCheckFinding, TAG_POWER_OFF, TAG_POWER_ON, TAG_SCHEDULE,
};

use crate::error::ScheduleError;
use crate::evaluator::{PowerRule, RulePair, Schedule};
use crate::preset::Preset;

/// A tag whose value failed to parse.
#[derive(Debug, Clone, PartialEq)]
pub struct TagError {
    pub tag: &'static str,
    pub value: String,
    pub reason: ScheduleError,
}

impl From<TagError> for PowerMgmtError {
    fn from(e: TagError) -> Self {
        PowerMgmtError::TagValidation {
            tag: e.tag.to_string(),
            value: e.value,
            reason: e.reason.to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct TagParser {
    day_order: DayOrder,
}

impl TagParser {
    pub fn new(day_order: DayOrder) -> Self {
        Self { day_order }
    }

    pub fn parse(&self, tags: &BTreeMap<String, String>) -> Result<Schedule, TagError> {
        if let Some(value) = tags.get(TAG_SCHEDULE) {
            return value
                .parse::<Preset>()
                .map(Schedule::NamedPreset)
                .map_err(|reason| TagError {
                    tag: TAG_SCHEDULE,
                    value: value.clone(),
                    reason,
                });
        }

        let on = self.parse_rule(tags, TAG_POWER_ON)?;
        let off = self.parse_rule(tags, TAG_POWER_OFF)?;
        if on.is_none() && off.is_none() {
            return Ok(Schedule::untouched());
        }
        Ok(Schedule::PowerTags(RulePair {
            on,
            off,
            skip_on_holidays: false,
        }))
    }

    fn parse_rule(
        &self,
        tags: &BTreeMap<String, String>,
        tag: &'static str,
    ) -> Result<Option<PowerRule>, TagError> {
        let Some(value) = tags.get(tag) else {
            return Ok(None);
        };
        PowerRule::parse(value, self.day_order)
            .map(Some)
            .map_err(|reason| TagError {
                tag,
                value: value.clone(),
                reason,
            })
    }

    /// Parse a discovered resource's tags, reporting failures as a finding.
    pub fn check(&self, resource: &ResourceDescriptor) -> Result<Schedule, TagCheckFinding> {
        self.parse(&resource.tags).map_err(|e| TagCheckFinding {
            resource_id: resource.id.clone(),
            kind: resource.kind,
            tag: e.tag.to_string(),
            value: e.value,
            reason: e.reason.to_string(),
        })
    }
}

impl Default for TagParser {
    fn default() -> Self {
        Self::new(DayOrder::MondayFirst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use powermgmt_core::{PowerState, ResourceKind};

    fn tags(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
        pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect()
    }

    #[test]
    fn schedule_tag_takes_precedence() {
        let parser = TagParser::default();
        let schedule = parser
            .parse(&tags(&[("Schedule", "AlwaysOn"), ("PowerOff", "0 18 * * *")]))
            .unwrap();
        assert_eq!(schedule, Schedule::NamedPreset(Preset::AlwaysOn));
    }

    #[test]
    fn no_power_tags_means_untouched() {
        let parser = TagParser::default();
        let schedule = parser.parse(&tags(&[("env", "dev")])).unwrap();
        assert!(schedule.is_untouched());
    }

    #[test]
    fn mixed_forms_parse_independently() {
        let parser = TagParser::default();
        let schedule = parser
            .parse(&tags(&[
                ("PowerOn", "7:05,7:05,7:05,7:05,7:05,10,-"),
                ("PowerOff", "15 8,17 * * *"),
            ]))
            .unwrap();
        let Schedule::PowerTags(pair) = schedule else {
            panic!("expected power tags");
        };
        assert!(matches!(pair.on, Some(PowerRule::DayList(_))));
        assert!(matches!(pair.off, Some(PowerRule::Cron(_))));
    }

    #[test]
    fn only_power_off_is_allowed() {
        let parser = TagParser::default();
        let schedule = parser.parse(&tags(&[("PowerOff", "0 0 * * *")])).unwrap();
        let Schedule::PowerTags(pair) = schedule else {
            panic!("expected power tags");
        };
        assert!(pair.on.is_none());
        assert!(pair.off.is_some());
    }

    #[test]
    fn misspelled_preset_is_a_finding() {
        let parser = TagParser::default();
        let resource = ResourceDescriptor::new(
            "/subscriptions/s/resourceGroups/rg/providers/Microsoft.Compute/virtualMachines/vm1",
            ResourceKind::VirtualMachine,
            PowerState::Running,
        )
        .with_tag("Schedule", "Buisness");
        let finding = parser.check(&resource).unwrap_err();
        assert_eq!(finding.tag, "Schedule");
        assert_eq!(finding.value, "Buisness");
        assert!(finding.reason.contains("unknown schedule preset"));
    }

    #[test]
    fn bad_power_on_fails_closed_even_with_good_power_off() {
        let parser = TagParser::default();
        let err = parser
            .parse(&tags(&[("PowerOn", "7:03,7,7,7,7,7,7"), ("PowerOff", "0 18 * * *")]))
            .unwrap_err();
        assert_eq!(err.tag, "PowerOn");
        assert!(matches!(err.reason, ScheduleError::DayList(_)));
    }

    #[test]
    fn garbage_reports_both_forms() {
        let parser = TagParser::default();
        let err = parser.parse(&tags(&[("PowerOff", "whenever")])).unwrap_err();
        assert!(matches!(err.reason, ScheduleError::Unrecognized { .. }));
        let core: PowerMgmtError = err.into();
        assert!(core.to_string().contains("whenever"));
    }
}
