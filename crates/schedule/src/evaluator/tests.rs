use std::collections::BTreeMap;

use chrono::{DateTime, Duration, FixedOffset, NaiveDate, TimeZone, Utc};
use powermgmt_core::config::{CatchUpPolicy, DayOrder};
use powermgmt_core::{PowerAction, PowerState, ResourceKind};

use super::*;
use crate::preset::{HolidayCalendar, Preset};
use crate::tags::TagParser;

// ── Helpers ─────────────────────────────────────────────────────────

fn utc_evaluator() -> Evaluator {
    Evaluator::new(FixedOffset::east_opt(0).unwrap(), Duration::minutes(5))
}

/// 2026-03-02 is a Monday; 2026-03-08 is the following Sunday.
fn at(day: u32, h: u32, m: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 3, day, h, m, 0).unwrap()
}

fn schedule(pairs: &[(&str, &str)], order: DayOrder) -> Schedule {
    let tags: BTreeMap<String, String> =
        pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect();
    TagParser::new(order).parse(&tags).unwrap()
}

fn desired_at(eval: &Evaluator, schedule: &Schedule, now: DateTime<Utc>) -> DesiredState {
    eval.evaluate(schedule, &eval.window(now, None)).desired
}

// ── Presets ─────────────────────────────────────────────────────────

#[test]
fn always_on_reasserts_every_tick() {
    let eval = utc_evaluator();
    let s = Schedule::NamedPreset(Preset::AlwaysOn);
    for now in [at(2, 3, 17), at(4, 12, 0), at(8, 23, 55)] {
        assert_eq!(desired_at(&eval, &s, now), DesiredState::On);
    }
}

#[test]
fn always_on_start_is_idempotent() {
    let eval = utc_evaluator();
    let s = Schedule::NamedPreset(Preset::AlwaysOn);
    let desired = desired_at(&eval, &s, at(2, 9, 0));
    let kind = ResourceKind::VirtualMachine;

    assert_eq!(decide_action(desired, PowerState::Stopped, kind), Some(PowerAction::Start));
    assert_eq!(decide_action(desired, PowerState::Starting, kind), None);
    assert_eq!(decide_action(desired, PowerState::Running, kind), None);
}

#[test]
fn none_preset_never_has_an_opinion() {
    let eval = utc_evaluator();
    let s = Schedule::NamedPreset(Preset::None);
    assert_eq!(desired_at(&eval, &s, at(2, 8, 0)), DesiredState::NoOpinion);
}

#[test]
fn business_hours_on_and_off() {
    let eval = utc_evaluator();
    let s = Schedule::NamedPreset(Preset::BusinessHours);
    assert_eq!(desired_at(&eval, &s, at(2, 8, 0)), DesiredState::On);
    assert_eq!(desired_at(&eval, &s, at(2, 12, 0)), DesiredState::NoOpinion);
    assert_eq!(desired_at(&eval, &s, at(2, 18, 0)), DesiredState::Off);
    // Saturday.
    assert_eq!(desired_at(&eval, &s, at(7, 8, 0)), DesiredState::NoOpinion);
}

#[test]
fn business_hours_skip_power_on_on_holidays() {
    let holiday = NaiveDate::from_ymd_opt(2026, 3, 2).unwrap();
    let eval = utc_evaluator().with_holidays(HolidayCalendar::new([holiday]));

    let s = Schedule::NamedPreset(Preset::BusinessHours);
    assert_eq!(desired_at(&eval, &s, at(2, 8, 0)), DesiredState::NoOpinion);
    assert_eq!(desired_at(&eval, &s, at(2, 18, 0)), DesiredState::Off);

    let extended = Schedule::NamedPreset(Preset::BusinessHoursExtended);
    assert_eq!(desired_at(&eval, &extended, at(2, 8, 0)), DesiredState::On);
    assert_eq!(desired_at(&eval, &extended, at(2, 22, 0)), DesiredState::Off);
}

#[test]
fn off_at_midnight_only_stops() {
    let eval = utc_evaluator();
    let s = Schedule::NamedPreset(Preset::OffAtMidnight);
    assert_eq!(desired_at(&eval, &s, at(3, 0, 0)), DesiredState::Off);
    assert_eq!(desired_at(&eval, &s, at(3, 8, 0)), DesiredState::NoOpinion);
}

// ── Day lists ───────────────────────────────────────────────────────

#[test]
fn day_list_monday_first() {
    let eval = utc_evaluator();
    let s = schedule(&[("PowerOn", "7:05,7:05,7:05,7:05,7:05,10,-")], DayOrder::MondayFirst);

    assert_eq!(desired_at(&eval, &s, at(2, 7, 5)), DesiredState::On);
    assert_eq!(desired_at(&eval, &s, at(7, 10, 0)), DesiredState::On);
    // Every Sunday tick.
    let mut now = at(8, 0, 0);
    while now < at(9, 0, 0) {
        assert_eq!(desired_at(&eval, &s, now), DesiredState::NoOpinion, "at {now}");
        now += Duration::minutes(5);
    }
}

#[test]
fn day_list_sunday_first() {
    let eval = utc_evaluator();
    // Same weekly plan written Sunday-first.
    let s = schedule(&[("PowerOn", "-,7:05,7:05,7:05,7:05,7:05,10")], DayOrder::SundayFirst);

    assert_eq!(desired_at(&eval, &s, at(2, 7, 5)), DesiredState::On);
    assert_eq!(desired_at(&eval, &s, at(7, 10, 0)), DesiredState::On);
    let mut now = at(8, 0, 0);
    while now < at(9, 0, 0) {
        assert_eq!(desired_at(&eval, &s, now), DesiredState::NoOpinion, "at {now}");
        now += Duration::minutes(5);
    }
}

#[test]
fn day_list_ordering_changes_meaning() {
    let eval = utc_evaluator();
    let value = "7:05,7:05,7:05,7:05,7:05,10,-";
    let sunday_first = schedule(&[("PowerOn", value)], DayOrder::SundayFirst);
    // Read Sunday-first, the first slot is Sunday and Saturday has nothing.
    assert_eq!(desired_at(&eval, &sunday_first, at(8, 7, 5)), DesiredState::On);
    assert_eq!(desired_at(&eval, &sunday_first, at(7, 10, 0)), DesiredState::NoOpinion);
}

#[test]
fn unaligned_now_uses_enclosing_tick() {
    let eval = utc_evaluator();
    let s = schedule(&[("PowerOn", "7:05,7:05,7:05,7:05,7:05,10,-")], DayOrder::MondayFirst);
    // 07:08 aligns down to the 07:05 tick, whose window ends at 07:05.
    let now = Utc.with_ymd_and_hms(2026, 3, 2, 7, 8, 30).unwrap();
    assert_eq!(desired_at(&eval, &s, now), DesiredState::On);
    // The next tick no longer sees it.
    assert_eq!(desired_at(&eval, &s, at(2, 7, 10)), DesiredState::NoOpinion);
}

#[test]
fn day_list_in_local_time() {
    // Tags written in UTC+13.
    let eval = Evaluator::new(FixedOffset::east_opt(13 * 3600).unwrap(), Duration::minutes(5));
    let s = schedule(&[("PowerOn", "8,8,8,8,8,-,-")], DayOrder::MondayFirst);
    // Monday 08:00 local is Sunday 19:00 UTC.
    assert_eq!(desired_at(&eval, &s, at(1, 19, 0)), DesiredState::On);
    assert_eq!(desired_at(&eval, &s, at(2, 8, 0)), DesiredState::NoOpinion);
}

// ── Cron pairs ──────────────────────────────────────────────────────

#[test]
fn cron_pair_on_off_and_quiet() {
    let eval = utc_evaluator();
    let s = schedule(
        &[("PowerOn", "45 7,16 * * *"), ("PowerOff", "15 8,17 * * *")],
        DayOrder::MondayFirst,
    );

    assert_eq!(desired_at(&eval, &s, at(2, 7, 45)), DesiredState::On);
    assert_eq!(desired_at(&eval, &s, at(2, 8, 15)), DesiredState::Off);
    assert_eq!(desired_at(&eval, &s, at(2, 12, 0)), DesiredState::NoOpinion);
    assert_eq!(desired_at(&eval, &s, at(2, 16, 45)), DesiredState::On);
    assert_eq!(desired_at(&eval, &s, at(2, 17, 15)), DesiredState::Off);
}

#[test]
fn no_opinion_leaves_observed_state_alone() {
    let kind = ResourceKind::VirtualMachine;
    for observed in [PowerState::Running, PowerState::Stopped, PowerState::Unknown] {
        assert_eq!(decide_action(DesiredState::NoOpinion, observed, kind), None);
    }
}

#[test]
fn evaluation_records_rule_and_fire_time() {
    let eval = utc_evaluator();
    let s = schedule(&[("PowerOff", "15 8,17 * * *")], DayOrder::MondayFirst);
    let result = eval.evaluate(&s, &eval.window(at(2, 8, 15), None));
    assert_eq!(result.fired_at, Some(at(2, 8, 15)));
    assert!(result.rule.unwrap().contains("15 8,17 * * *"));
}

// ── Conflicts and catch-up ──────────────────────────────────────────

#[test]
fn later_rule_wins_within_window() {
    let eval = utc_evaluator().with_catch_up(CatchUpPolicy::CatchUp, Duration::minutes(60));
    let s = schedule(
        &[("PowerOn", "30 8 * * *"), ("PowerOff", "10 8 * * *")],
        DayOrder::MondayFirst,
    );
    // Window (08:00, 08:45] holds off 08:10 then on 08:30.
    let window = eval.window(at(2, 8, 45), Some(at(2, 8, 0)));
    assert_eq!(eval.evaluate(&s, &window).desired, DesiredState::On);
}

#[test]
fn simultaneous_on_and_off_resolves_to_off() {
    let eval = utc_evaluator();
    let s = schedule(
        &[("PowerOn", "0 8 * * *"), ("PowerOff", "0 8 * * *")],
        DayOrder::MondayFirst,
    );
    assert_eq!(desired_at(&eval, &s, at(2, 8, 0)), DesiredState::Off);
}

#[test]
fn missed_tick_is_skipped_by_default() {
    let eval = utc_evaluator();
    let s = Schedule::NamedPreset(Preset::BusinessHours);
    // The 08:00 tick never ran; the 08:30 tick only covers (08:25, 08:30].
    let window = eval.window(at(2, 8, 30), Some(at(2, 7, 55)));
    assert_eq!(eval.evaluate(&s, &window).desired, DesiredState::NoOpinion);
}

#[test]
fn missed_tick_is_applied_under_catch_up() {
    let eval = utc_evaluator().with_catch_up(CatchUpPolicy::CatchUp, Duration::minutes(60));
    let s = Schedule::NamedPreset(Preset::BusinessHours);
    let window = eval.window(at(2, 8, 30), Some(at(2, 7, 55)));
    assert_eq!(eval.evaluate(&s, &window).desired, DesiredState::On);

    // Beyond the catch-up bound the missed time is lost.
    let window = eval.window(at(2, 9, 30), Some(at(2, 7, 55)));
    assert_eq!(eval.evaluate(&s, &window).desired, DesiredState::NoOpinion);
}

// ── Action decision ─────────────────────────────────────────────────

#[test]
fn stop_not_reissued_while_stopping() {
    let kind = ResourceKind::ManagedCluster;
    assert_eq!(decide_action(DesiredState::Off, PowerState::Running, kind), Some(PowerAction::Stop));
    assert_eq!(decide_action(DesiredState::Off, PowerState::Stopping, kind), None);
    assert_eq!(decide_action(DesiredState::Off, PowerState::Stopped, kind), None);
}

#[test]
fn flexible_server_waits_for_settled_state() {
    let kind = ResourceKind::FlexibleDatabaseServer;
    assert_eq!(decide_action(DesiredState::On, PowerState::Unknown, kind), None);
    assert_eq!(decide_action(DesiredState::On, PowerState::Stopped, kind), Some(PowerAction::Start));
    assert_eq!(decide_action(DesiredState::Off, PowerState::Starting, kind), None);
}

#[test]
fn allocated_but_stopped_vm_is_left_alone() {
    let kind = ResourceKind::VirtualMachine;
    assert_eq!(decide_action(DesiredState::On, PowerState::Unknown, kind), None);
    assert_eq!(decide_action(DesiredState::Off, PowerState::Unknown, kind), None);
    assert_eq!(decide_action(DesiredState::On, PowerState::Stopped, kind), Some(PowerAction::Start));
    assert_eq!(decide_action(DesiredState::Off, PowerState::Running, kind), Some(PowerAction::Stop));
}
