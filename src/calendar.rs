//! Week-pattern calendar maths.
//!
//! Two weekday conventions coexist:
//! - `IsoWeekday`: 1 = Monday .. 7 = Sunday, used when generating seances.
//! - `SundayWeekday`: 0 = Sunday .. 6 = Saturday, stored on classes (`jour_semaine`).
//!
//! Both convert through `chrono::Weekday`; nothing compares the raw numbers directly.

use chrono::{Datelike, Duration, NaiveDate, NaiveDateTime, NaiveTime, Weekday};

use crate::error::SchedError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IsoWeekday(u8);

impl IsoWeekday {
    pub fn new(n: i64) -> Result<Self, SchedError> {
        if (1..=7).contains(&n) {
            Ok(IsoWeekday(n as u8))
        } else {
            Err(SchedError::Validation(format!(
                "jourSemaine must be between 1 (Monday) and 7 (Sunday), got {n}"
            )))
        }
    }

    pub fn get(self) -> u8 {
        self.0
    }

    pub fn weekday(self) -> Weekday {
        // 1..=7 always maps.
        Weekday::try_from(self.0 - 1).unwrap_or(Weekday::Mon)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SundayWeekday(u8);

impl SundayWeekday {
    pub fn new(n: i64) -> Result<Self, SchedError> {
        if (0..=6).contains(&n) {
            Ok(SundayWeekday(n as u8))
        } else {
            Err(SchedError::Validation(format!(
                "jourSemaine must be between 0 (Sunday) and 6 (Saturday), got {n}"
            )))
        }
    }

    pub fn get(self) -> u8 {
        self.0
    }

    pub fn weekday(self) -> Weekday {
        match self.0 {
            0 => Weekday::Sun,
            n => Weekday::try_from(n - 1).unwrap_or(Weekday::Mon),
        }
    }
}

impl From<Weekday> for IsoWeekday {
    fn from(w: Weekday) -> Self {
        IsoWeekday(w.number_from_monday() as u8)
    }
}

impl From<Weekday> for SundayWeekday {
    fn from(w: Weekday) -> Self {
        SundayWeekday(w.num_days_from_sunday() as u8)
    }
}

impl From<SundayWeekday> for IsoWeekday {
    fn from(d: SundayWeekday) -> Self {
        IsoWeekday::from(d.weekday())
    }
}

impl From<IsoWeekday> for SundayWeekday {
    fn from(d: IsoWeekday) -> Self {
        SundayWeekday::from(d.weekday())
    }
}

/// Parses `HH:MM` (24h). Seconds are always zero.
pub fn parse_hhmm(raw: &str) -> Result<NaiveTime, SchedError> {
    let bad = || SchedError::Validation(format!("heureDebut must be HH:MM, got {raw:?}"));
    let (h, m) = raw.trim().split_once(':').ok_or_else(bad)?;
    if h.is_empty() || h.len() > 2 || m.len() != 2 {
        return Err(bad());
    }
    let h: u32 = h.parse().map_err(|_| bad())?;
    let m: u32 = m.parse().map_err(|_| bad())?;
    NaiveTime::from_hms_opt(h, m, 0).ok_or_else(bad)
}

pub fn format_hhmm(t: NaiveTime) -> String {
    t.format("%H:%M").to_string()
}

/// First day of week 1 for `year`: the first Monday on or after January 1st.
pub fn week_anchor(year: i32) -> Result<NaiveDate, SchedError> {
    let jan1 = NaiveDate::from_ymd_opt(year, 1, 1)
        .ok_or_else(|| SchedError::Validation(format!("year {year} out of range")))?;
    let dow = jan1.weekday().num_days_from_sunday() as i64;
    Ok(jan1 + Duration::days((8 - dow) % 7))
}

/// Calendar date of `weekday` in pattern week `week` (1-based) of `year`.
pub fn pattern_date(year: i32, week: u32, weekday: IsoWeekday) -> Result<NaiveDate, SchedError> {
    if week == 0 {
        return Err(SchedError::Validation("week numbers start at 1".into()));
    }
    let anchor = week_anchor(year)?;
    let offset = (week as i64 - 1) * 7 + (weekday.get() as i64 - 1);
    Ok(anchor + Duration::days(offset))
}

/// Keeps the date, replaces the time of day with `time` (seconds zeroed).
pub fn with_time(date: NaiveDate, time: NaiveTime) -> NaiveDateTime {
    date.and_time(time)
}
