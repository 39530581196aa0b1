//! Scheduler (spec.md §4.8): time-of-day windows that start/stop strategies.
//!
//! No timezone-conversion crate is part of the teacher's stack (see
//! `transfer::manager::in_quiet_period`'s plain `NaiveTime` comparison), so
//! `timezone` is carried as a label only; window comparisons use the
//! `DateTime<Utc>` passed in directly, same precedent as the transfer
//! manager's quiet period.

use chrono::{DateTime, Datelike, NaiveTime, Utc, Weekday};

#[derive(Debug, Clone)]
pub struct ActiveWindow {
    pub start: String,
    pub end: String,
    pub days: Vec<Weekday>,
}

#[derive(Debug, Clone)]
pub struct ScheduledStrategy {
    pub strategy_id: String,
    pub timezone: String,
    pub windows: Vec<ActiveWindow>,
}

impl ScheduledStrategy {
    /// True iff `now` falls within some window whose day set includes today.
    pub fn should_be_active(&self, now: DateTime<Utc>) -> bool {
        let today = now.weekday();
        let t = now.time();
        self.windows.iter().any(|w| {
            if !w.days.contains(&today) {
                return false;
            }
            let (Ok(start), Ok(end)) = (
                NaiveTime::parse_from_str(&w.start, "%H:%M"),
                NaiveTime::parse_from_str(&w.end, "%H:%M"),
            ) else {
                return false;
            };
            if start <= end {
                t >= start && t <= end
            } else {
                t >= start || t <= end
            }
        })
    }

    /// Next time (within 7 days) this schedule transitions into active.
    pub fn next_start(&self, from: DateTime<Utc>) -> Option<DateTime<Utc>> {
        self.next_transition(from, true)
    }

    /// Next time (within 7 days) this schedule transitions out of active.
    pub fn next_stop(&self, from: DateTime<Utc>) -> Option<DateTime<Utc>> {
        self.next_transition(from, false)
    }

    fn next_transition(&self, from: DateTime<Utc>, into_active: bool) -> Option<DateTime<Utc>> {
        let mut cursor = from;
        let mut was_active = self.should_be_active(cursor);
        for _ in 0..(7 * 24 * 60) {
            cursor += chrono::Duration::minutes(1);
            let is_active = self.should_be_active(cursor);
            if is_active != was_active && is_active == into_active {
                return Some(cursor);
            }
            was_active = is_active;
        }
        None
    }
}

pub struct Scheduler {
    schedules: Vec<ScheduledStrategy>,
}

#[derive(Debug, PartialEq, Eq)]
pub enum ScheduleTransition {
    Start,
    Stop,
}

impl Scheduler {
    pub fn new() -> Self {
        Self { schedules: Vec::new() }
    }

    pub fn add(&mut self, schedule: ScheduledStrategy) {
        self.schedules.push(schedule);
    }

    pub fn remove(&mut self, strategy_id: &str) {
        self.schedules.retain(|s| s.strategy_id != strategy_id);
    }

    /// Evaluate every schedule against `now`, given each strategy's current
    /// running state, and return the transitions that must fire.
    pub fn tick(&self, now: DateTime<Utc>, currently_running: impl Fn(&str) -> bool) -> Vec<(String, ScheduleTransition)> {
        let mut transitions = Vec::new();
        for schedule in &self.schedules {
            let should_be_active = schedule.should_be_active(now);
            let is_running = currently_running(&schedule.strategy_id);
            if should_be_active && !is_running {
                transitions.push((schedule.strategy_id.clone(), ScheduleTransition::Start));
            } else if !should_be_active && is_running {
                transitions.push((schedule.strategy_id.clone(), ScheduleTransition::Stop));
            }
        }
        transitions
    }
}

impl Default for Scheduler {
    fn default() -> Self {
        Self::new()
    }
}
