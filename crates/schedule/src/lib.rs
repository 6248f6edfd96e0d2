//! Schedule resolution and reconciliation for tag-driven power management.

pub mod cron;
pub mod daylist;
pub mod error;
pub mod evaluator;
pub mod preset;
pub mod tags;

pub use cron::CronRule;
pub use daylist::{DayTimeList, TimeOfDay};
pub use error::ScheduleError;
pub use evaluator::{
    align_down, decide_action, DesiredState, EvalWindow, Evaluator, PowerRule, RulePair, Schedule,
    ScheduleEvaluation,
};
pub use preset::{HolidayCalendar, Preset, PresetPlan};
pub use tags::{TagError, TagParser};
