use chrono::{Local, NaiveDateTime, Timelike};

/// Source of "now" for future-seance filtering.
pub trait Clock {
    fn now(&self) -> NaiveDateTime;
}

/// Wall clock in local time, truncated to the second (seance timestamps carry no
/// sub-second part).
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> NaiveDateTime {
        let now = Local::now().naive_local();
        now.with_nanosecond(0).unwrap_or(now)
    }
}

pub struct FixedClock(pub NaiveDateTime);

impl Clock for FixedClock {
    fn now(&self) -> NaiveDateTime {
        self.0
    }
}

pub fn from_config(fixed_now: Option<NaiveDateTime>) -> Box<dyn Clock> {
    match fixed_now {
        Some(t) => Box::new(FixedClock(t)),
        None => Box::new(SystemClock),
    }
}
