//! Reconciliation: desired power state for one tick, and the action it implies.
//!
//! A [`Schedule`] is evaluated against an [`EvalWindow`]. Fixed presets
//! always produce the same desired state, so a resource switched by hand is
//! put back on the next tick. Rule-based schedules only have an opinion when
//! one of their times falls inside the window; otherwise the resource keeps
//! whatever state it is in.

mod window;

#[cfg(test)]
mod tests;

pub use window::{align_down, EvalWindow};

use std::fmt;

use chrono::{DateTime, FixedOffset, Utc};
use powermgmt_core::config::{CatchUpPolicy, DayOrder, ScheduleConfig};
use powermgmt_core::{PowerAction, PowerState, ResourceKind};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::cron::CronRule;
use crate::daylist::DayTimeList;
use crate::error::ScheduleError;
use crate::preset::{HolidayCalendar, Preset, PresetPlan};

// ── Schedule model ──────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DesiredState {
    On,
    Off,
    NoOpinion,
}

/// One side (PowerOn or PowerOff) of a tagged schedule.
#[derive(Debug, Clone, PartialEq)]
pub enum PowerRule {
    DayList(DayTimeList),
    Cron(CronRule),
}

impl PowerRule {
    /// Parse a `PowerOn`/`PowerOff` value as a day list, or failing that, a cron expression.
    pub fn parse(value: &str, order: DayOrder) -> Result<Self, ScheduleError> {
        let value = value.trim();
        let day_list_err = match DayTimeList::parse(value, order) {
            Ok(list) => return Ok(PowerRule::DayList(list)),
            Err(e) => e,
        };
        let cron_err = match CronRule::parse(value) {
            Ok(rule) => return Ok(PowerRule::Cron(rule)),
            Err(e) => e,
        };
        // Report the error for the form the value most resembles.
        if value.split_whitespace().count() == 5 {
            Err(cron_err)
        } else if value.contains(',') && !value.contains(' ') {
            Err(day_list_err)
        } else {
            Err(ScheduleError::Unrecognized {
                day_list: day_list_err.to_string(),
                cron: cron_err.to_string(),
            })
        }
    }

    pub fn fires_in(
        &self,
        start: DateTime<FixedOffset>,
        end: DateTime<FixedOffset>,
    ) -> Vec<DateTime<FixedOffset>> {
        match self {
            PowerRule::DayList(list) => list.fires_in(start, end),
            PowerRule::Cron(rule) => rule.fires_in(start, end),
        }
    }
}

impl fmt::Display for PowerRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PowerRule::DayList(list) => write!(f, "day list {list}"),
            PowerRule::Cron(rule) => write!(f, "cron '{rule}'"),
        }
    }
}

/// Independent power-on and power-off rules.
#[derive(Debug, Clone, PartialEq)]
pub struct RulePair {
    pub on: Option<PowerRule>,
    pub off: Option<PowerRule>,
    /// Drop power-on times that land on a public holiday.
    pub skip_on_holidays: bool,
}

/// A resource's schedule, resolved from its tags.
#[derive(Debug, Clone, PartialEq)]
pub enum Schedule {
    NamedPreset(Preset),
    /// From `PowerOn`/`PowerOff`. Each side may independently be a day list or cron.
    PowerTags(RulePair),
}

impl Schedule {
    pub fn untouched() -> Self {
        Schedule::NamedPreset(Preset::None)
    }

    pub fn is_untouched(&self) -> bool {
        matches!(self, Schedule::NamedPreset(Preset::None))
            || matches!(self, Schedule::PowerTags(RulePair { on: None, off: None, .. }))
    }
}

impl fmt::Display for Schedule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Schedule::NamedPreset(p) => write!(f, "preset {p}"),
            Schedule::PowerTags(pair) => {
                let on = pair.on.as_ref().map_or("-".to_string(), |r| r.to_string());
                let off = pair.off.as_ref().map_or("-".to_string(), |r| r.to_string());
                write!(f, "on: {on}; off: {off}")
            }
        }
    }
}

/// Desired state for one instant, with the rule that decided it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScheduleEvaluation {
    pub desired: DesiredState,
    pub rule: Option<String>,
    /// The scheduled time that fired, for rule-based schedules.
    pub fired_at: Option<DateTime<Utc>>,
}

impl ScheduleEvaluation {
    fn no_opinion() -> Self {
        Self {
            desired: DesiredState::NoOpinion,
            rule: None,
            fired_at: None,
        }
    }
}

// ── Evaluator ───────────────────────────────────────────────────────

/// Evaluates schedules in the local time the tags were written in.
#[derive(Debug, Clone)]
pub struct Evaluator {
    offset: FixedOffset,
    holidays: HolidayCalendar,
    tick: chrono::Duration,
    catch_up: CatchUpPolicy,
    catch_up_max: chrono::Duration,
}

impl Evaluator {
    pub fn new(offset: FixedOffset, tick: chrono::Duration) -> Self {
        Self {
            offset,
            holidays: HolidayCalendar::default(),
            tick,
            catch_up: CatchUpPolicy::Skip,
            catch_up_max: tick,
        }
    }

    pub fn from_config(config: &ScheduleConfig) -> Result<Self, ScheduleError> {
        let offset = config.offset().ok_or_else(|| {
            ScheduleError::Context(format!(
                "UTC offset of {} minutes is out of range",
                config.utc_offset_minutes
            ))
        })?;
        if config.tick_minutes == 0 {
            return Err(ScheduleError::Context("tick must be at least one minute".into()));
        }
        Ok(Self::new(offset, config.tick())
            .with_holidays(HolidayCalendar::new(config.public_holidays.iter().copied()))
            .with_catch_up(
                config.catch_up,
                chrono::Duration::minutes(i64::from(config.catch_up_max_minutes)),
            ))
    }

    pub fn with_holidays(mut self, holidays: HolidayCalendar) -> Self {
        self.holidays = holidays;
        self
    }

    pub fn with_catch_up(mut self, policy: CatchUpPolicy, max: chrono::Duration) -> Self {
        self.catch_up = policy;
        self.catch_up_max = max;
        self
    }

    pub fn tick(&self) -> chrono::Duration {
        self.tick
    }

    /// Window evaluated for the tick at `tick_at`.
    pub fn window(&self, tick_at: DateTime<Utc>, previous_tick: Option<DateTime<Utc>>) -> EvalWindow {
        EvalWindow::for_tick(tick_at, self.tick, previous_tick, self.catch_up, self.catch_up_max)
    }

    pub fn evaluate(&self, schedule: &Schedule, window: &EvalWindow) -> ScheduleEvaluation {
        match schedule {
            Schedule::NamedPreset(preset) => match preset.plan() {
                PresetPlan::Fixed(desired) => ScheduleEvaluation {
                    desired,
                    rule: Some(format!("preset {preset}")),
                    fired_at: None,
                },
                PresetPlan::Untouched => ScheduleEvaluation::no_opinion(),
                PresetPlan::Rules(pair) => self.evaluate_rules(&pair, window),
            },
            Schedule::PowerTags(pair) => self.evaluate_rules(pair, window),
        }
    }

    fn evaluate_rules(&self, pair: &RulePair, window: &EvalWindow) -> ScheduleEvaluation {
        let start = window.start.with_timezone(&self.offset);
        let end = window.end.with_timezone(&self.offset);

        let on = pair.on.as_ref().and_then(|rule| {
            rule.fires_in(start, end)
                .into_iter()
                .filter(|fire| {
                    let holiday = pair.skip_on_holidays && self.holidays.is_holiday(fire.date_naive());
                    if holiday {
                        debug!(date = %fire.date_naive(), "Skipping power-on on public holiday");
                    }
                    !holiday
                })
                .last()
                .map(|fire| (fire, rule))
        });
        let off = pair.off.as_ref().and_then(|rule| {
            rule.fires_in(start, end).pop().map(|fire| (fire, rule))
        });

        let (desired, (fire, rule)) = match (on, off) {
            // Later time wins; a tie goes to off.
            (Some(on), Some(off)) if on.0 > off.0 => (DesiredState::On, on),
            (_, Some(off)) => (DesiredState::Off, off),
            (Some(on), None) => (DesiredState::On, on),
            (None, None) => return ScheduleEvaluation::no_opinion(),
        };
        ScheduleEvaluation {
            desired,
            rule: Some(rule.to_string()),
            fired_at: Some(fire.with_timezone(&Utc)),
        }
    }
}

/// The action needed to move `observed` towards `desired`, if any.
///
/// Idempotent: a resource already in (or moving to) the desired state yields `None`.
pub fn decide_action(
    desired: DesiredState,
    observed: PowerState,
    kind: ResourceKind,
) -> Option<PowerAction> {
    match desired {
        DesiredState::On if kind.accepts_start(observed) => Some(PowerAction::Start),
        DesiredState::Off if kind.accepts_stop(observed) => Some(PowerAction::Stop),
        _ => None,
    }
}
