use thiserror::Error;

/// Why a schedule tag value could not be parsed.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ScheduleError {
    #[error("unknown schedule preset (expected one of BusinessHours, BusinessHoursExtended, AlwaysOn, AlwaysOff, OffAtMidnight, None)")]
    UnknownPreset,

    #[error("day list: {0}")]
    DayList(String),

    #[error("cron: {0}")]
    Cron(String),

    #[error("not a 7-entry day list ({day_list}) or a 5-field cron expression ({cron})")]
    Unrecognized { day_list: String, cron: String },

    #[error("invalid evaluation context: {0}")]
    Context(String),
}
