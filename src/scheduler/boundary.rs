use chrono::{Duration as ChronoDuration, DurationRound, NaiveDateTime, NaiveTime, Timelike};
use std::time::Duration;

/// Time from `now` until the next occurrence of `target`. Zero at `target`.
fn time_until(now: NaiveTime, target: NaiveTime) -> ChronoDuration {
    if now <= target {
        target - now
    } else {
        ChronoDuration::days(1) - (now - target)
    }
}

fn next_top_of_hour(now: NaiveDateTime) -> NaiveDateTime {
    now.duration_trunc(ChronoDuration::hours(1)).unwrap_or(now) + ChronoDuration::hours(1)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Recurrence {
    Daily,
    /// Every top of hour; work only runs when the hour is in `start..=end`.
    HourlyWithinWindow { start: u32, end: u32 },
}

/// Next fire point of one scheduler loop.
#[derive(Debug, Clone)]
pub struct ScheduleBoundary {
    pub target: NaiveTime,
    pub recurrence: Recurrence,
    pub last_fire: Option<NaiveDateTime>,
}

impl ScheduleBoundary {
    pub fn daily(target: NaiveTime) -> Self {
        Self {
            target,
            recurrence: Recurrence::Daily,
            last_fire: None,
        }
    }

    pub fn hourly(start: u32, end: u32) -> Self {
        Self {
            target: NaiveTime::MIN,
            recurrence: Recurrence::HourlyWithinWindow { start, end },
            last_fire: None,
        }
    }

    fn period(&self) -> ChronoDuration {
        match self.recurrence {
            Recurrence::Daily => ChronoDuration::days(1),
            Recurrence::HourlyWithinWindow { .. } => ChronoDuration::hours(1),
        }
    }

    /// The next boundary at or after `now` that has not fired yet.
    pub fn next_fire(&self, now: NaiveDateTime) -> NaiveDateTime {
        let mut next = match self.recurrence {
            Recurrence::Daily => now + time_until(now.time(), self.target),
            Recurrence::HourlyWithinWindow { .. } => next_top_of_hour(now),
        };
        if let Some(last) = self.last_fire {
            while next <= last {
                next += self.period();
            }
        }
        next
    }

    /// Sleep needed from `now` until `next_fire(now)`.
    pub fn delay_from(&self, now: NaiveDateTime) -> Duration {
        (self.next_fire(now) - now).to_std().unwrap_or_default()
    }

    /// Whether work should run for the boundary at `fire_at`.
    pub fn is_active(&self, fire_at: NaiveDateTime) -> bool {
        match self.recurrence {
            Recurrence::Daily => true,
            Recurrence::HourlyWithinWindow { start, end } => {
                (start..=end).contains(&fire_at.hour())
            }
        }
    }

    pub fn mark_fired(&mut self, fire_at: NaiveDateTime) {
        self.last_fire = Some(fire_at);
    }
}
