use serde::Serialize;

use crate::error::SchedError;

pub const DATE_HEURE_FMT: &str = "%Y-%m-%dT%H:%M:%S";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SeanceStatut {
    Programmed,
    Done,
    Cancelled,
}

impl SeanceStatut {
    pub fn as_str(self) -> &'static str {
        match self {
            SeanceStatut::Programmed => "programmed",
            SeanceStatut::Done => "done",
            SeanceStatut::Cancelled => "cancelled",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "programmed" => Some(SeanceStatut::Programmed),
            "done" => Some(SeanceStatut::Done),
            "cancelled" => Some(SeanceStatut::Cancelled),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PresenceStatut {
    Present,
    Absent,
    NoStatus,
    Awaiting,
}

impl PresenceStatut {
    pub fn as_str(self) -> &'static str {
        match self {
            PresenceStatut::Present => "present",
            PresenceStatut::Absent => "absent",
            PresenceStatut::NoStatus => "no_status",
            PresenceStatut::Awaiting => "awaiting",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "present" => Some(PresenceStatut::Present),
            "absent" => Some(PresenceStatut::Absent),
            "no_status" => Some(PresenceStatut::NoStatus),
            "awaiting" => Some(PresenceStatut::Awaiting),
            _ => None,
        }
    }
}

/// Replacement request life cycle. `Open` is the only non-terminal state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RrStatus {
    Open,
    Completed,
    Cancelled,
}

impl RrStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            RrStatus::Open => "open",
            RrStatus::Completed => "completed",
            RrStatus::Cancelled => "cancelled",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "open" => Some(RrStatus::Open),
            "completed" => Some(RrStatus::Completed),
            "cancelled" => Some(RrStatus::Cancelled),
            _ => None,
        }
    }

    pub fn is_terminal(self) -> bool {
        !matches!(self, RrStatus::Open)
    }

    /// Returns the state to persist. Re-applying the current state is a no-op;
    /// leaving a terminal state is refused.
    pub fn transition_to(self, next: RrStatus) -> Result<RrStatus, SchedError> {
        match (self, next) {
            (a, b) if a == b => Ok(a),
            (RrStatus::Open, RrStatus::Completed) | (RrStatus::Open, RrStatus::Cancelled) => {
                Ok(next)
            }
            (from, to) => Err(SchedError::InvalidTransition {
                from: from.as_str(),
                to: to.as_str(),
            }),
        }
    }
}

/// Kind of replacement. The set is open: unknown labels are kept verbatim.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RrType {
    SameWeek,
    EveningRecuperation,
    Other(String),
}

impl RrType {
    pub fn as_str(&self) -> &str {
        match self {
            RrType::SameWeek => "same_week",
            RrType::EveningRecuperation => "evening_recuperation",
            RrType::Other(s) => s.as_str(),
        }
    }

    pub fn parse(raw: &str) -> Self {
        match raw.trim() {
            "same_week" => RrType::SameWeek,
            "evening_recuperation" => RrType::EveningRecuperation,
            other => RrType::Other(other.to_string()),
        }
    }
}

impl Serialize for RrType {
    fn serialize<S: serde::Serializer>(&self, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(self.as_str())
    }
}

/// Decodes the `semaines_seances` column: a JSON array of positive integers.
pub fn decode_week_set(raw: &str) -> Result<Vec<u32>, SchedError> {
    let t = raw.trim();
    if t.is_empty() {
        return Ok(Vec::new());
    }
    let v: serde_json::Value = serde_json::from_str(t)
        .map_err(|_| SchedError::Validation("semainesSeances must be a JSON array".into()))?;
    week_set_from_json(&v)
}

/// Highest pattern week a class may name: a yearly pattern spans at most 53 weeks
/// counted from the first Monday of the year.
pub const MAX_PATTERN_WEEK: u64 = 53;

/// Validates a JSON value as a week set. Order is kept; duplicates are dropped.
pub fn week_set_from_json(v: &serde_json::Value) -> Result<Vec<u32>, SchedError> {
    let arr = v
        .as_array()
        .ok_or_else(|| SchedError::Validation("semainesSeances must be an array".into()))?;
    let mut out: Vec<u32> = Vec::with_capacity(arr.len());
    for item in arr {
        let n = item
            .as_u64()
            .filter(|n| (1..=MAX_PATTERN_WEEK).contains(n))
            .ok_or_else(|| {
                SchedError::Validation(format!(
                    "semainesSeances entries must be week numbers from 1 to {MAX_PATTERN_WEEK} \
                     (the length of a yearly pattern), got {item}"
                ))
            })?;
        let n = n as u32;
        if !out.contains(&n) {
            out.push(n);
        }
    }
    Ok(out)
}

pub fn encode_week_set(weeks: &[u32]) -> String {
    serde_json::to_string(weeks).unwrap_or_else(|_| "[]".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn rr_open_moves_to_either_terminal_state() {
        assert_eq!(
            RrStatus::Open.transition_to(RrStatus::Completed).unwrap(),
            RrStatus::Completed
        );
        assert_eq!(
            RrStatus::Open.transition_to(RrStatus::Cancelled).unwrap(),
            RrStatus::Cancelled
        );
    }

    #[test]
    fn rr_terminal_states_are_stable() {
        for from in [RrStatus::Completed, RrStatus::Cancelled] {
            for to in [RrStatus::Open, RrStatus::Completed, RrStatus::Cancelled] {
                let res = from.transition_to(to);
                if from == to {
                    assert_eq!(res.unwrap(), from);
                } else {
                    assert!(matches!(res, Err(SchedError::InvalidTransition { .. })));
                }
            }
        }
    }

    #[test]
    fn rr_type_keeps_unknown_labels() {
        assert_eq!(RrType::parse("same_week"), RrType::SameWeek);
        assert_eq!(RrType::parse("stage_vacances").as_str(), "stage_vacances");
        assert_eq!(
            serde_json::to_value(RrType::EveningRecuperation).unwrap(),
            json!("evening_recuperation")
        );
    }

    #[test]
    fn week_set_round_trips_and_keeps_order() {
        let weeks = decode_week_set("[3, 1, 2, 3]").expect("decode");
        assert_eq!(weeks, vec![3, 1, 2]);
        assert_eq!(decode_week_set(&encode_week_set(&weeks)).unwrap(), weeks);
        assert_eq!(decode_week_set("").unwrap(), Vec::<u32>::new());
    }

    #[test]
    fn week_set_rejects_non_positive_and_non_integers() {
        assert!(decode_week_set("[0]").is_err());
        assert!(decode_week_set("[1.5]").is_err());
        assert!(decode_week_set("[-2]").is_err());
        assert!(decode_week_set("{\"a\":1}").is_err());
    }

    #[test]
    fn week_set_names_the_year_limit() {
        assert_eq!(decode_week_set("[53]").unwrap(), vec![53]);
        match decode_week_set("[54]") {
            Err(SchedError::Validation(msg)) => {
                assert!(msg.contains("from 1 to 53"), "{msg}");
                assert!(msg.contains("got 54"), "{msg}");
            }
            other => panic!("expected a validation error, got {other:?}"),
        }
    }
}
