use std::time::Duration;

use chrono::NaiveDateTime;
use rusqlite::Connection;
use serde_json::{Map, Value as JsonValue};

use crate::db;
use crate::model::RrType;

pub const LOG_ENV: &str = "ECOLED_LOG";
pub const NOW_ENV: &str = "ECOLED_NOW";
pub const CASCADE_TIMEOUT_ENV: &str = "ECOLED_CASCADE_TIMEOUT_MS";

const DEFAULT_CASCADE_TIMEOUT_MS: u64 = 10_000;

/// Process-level configuration, read once at startup.
#[derive(Debug, Clone)]
pub struct Config {
    pub log_filter: String,
    pub fixed_now: Option<NaiveDateTime>,
    pub cascade_timeout: Duration,
    /// Messages for env values that were present but unusable. Logged after the
    /// logger is initialised.
    pub rejected: Vec<String>,
}

impl Config {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(get: impl Fn(&str) -> Option<String>) -> Self {
        let log_filter = get(LOG_ENV)
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .unwrap_or_else(|| "info".to_string());

        let mut rejected = Vec::new();
        let fixed_now = get(NOW_ENV).and_then(|raw| {
            let parsed = parse_fixed_now(&raw);
            if parsed.is_none() {
                rejected.push(format!(
                    "ignoring {NOW_ENV}={raw:?}: expected YYYY-MM-DDTHH:MM[:SS]"
                ));
            }
            parsed
        });

        let cascade_timeout = match get(CASCADE_TIMEOUT_ENV) {
            None => DEFAULT_CASCADE_TIMEOUT_MS,
            Some(raw) => match raw.trim().parse::<u64>() {
                Ok(ms) if ms > 0 => ms,
                _ => {
                    rejected.push(format!(
                        "ignoring {CASCADE_TIMEOUT_ENV}={raw:?}: expected a positive integer"
                    ));
                    DEFAULT_CASCADE_TIMEOUT_MS
                }
            },
        };

        Config {
            log_filter,
            fixed_now,
            cascade_timeout: Duration::from_millis(cascade_timeout),
            rejected,
        }
    }
}

fn parse_fixed_now(raw: &str) -> Option<NaiveDateTime> {
    let t = raw.trim();
    NaiveDateTime::parse_from_str(t, "%Y-%m-%dT%H:%M:%S")
        .or_else(|_| NaiveDateTime::parse_from_str(t, "%Y-%m-%dT%H:%M"))
        .ok()
}

/// Workspace-level scheduling defaults, stored under `setup.scheduling`.
#[derive(Clone, Debug)]
pub struct SchedulingDefaults {
    pub default_rr_type: RrType,
    pub default_penalize_rr: bool,
    pub min_year: i32,
    pub max_year: i32,
    pub default_duree_seance: i64,
}

impl Default for SchedulingDefaults {
    fn default() -> Self {
        SchedulingDefaults {
            default_rr_type: RrType::SameWeek,
            default_penalize_rr: true,
            min_year: 2000,
            max_year: 2100,
            default_duree_seance: 60,
        }
    }
}

pub const SCHEDULING_SECTION: &str = "setup.scheduling";

fn load_setup_section(conn: &Connection, key: &str) -> anyhow::Result<Map<String, JsonValue>> {
    match db::settings_get_json(conn, key)? {
        None => Ok(Map::new()),
        Some(JsonValue::Object(obj)) => Ok(obj),
        Some(other) => anyhow::bail!("settings {key} must be an object, got {other}"),
    }
}

pub fn load_scheduling_defaults(conn: &Connection) -> anyhow::Result<SchedulingDefaults> {
    let base = SchedulingDefaults::default();
    let obj = load_setup_section(conn, SCHEDULING_SECTION)?;

    let default_rr_type = obj
        .get("defaultRrType")
        .and_then(|v| v.as_str())
        .map(|s| s.trim())
        .filter(|s| !s.is_empty())
        .map(RrType::parse)
        .unwrap_or(base.default_rr_type);
    let default_penalize_rr = obj
        .get("defaultPenalizeRr")
        .and_then(|v| v.as_bool())
        .unwrap_or(base.default_penalize_rr);
    let min_year = obj
        .get("minYear")
        .and_then(|v| v.as_i64())
        .and_then(|v| i32::try_from(v).ok())
        .unwrap_or(base.min_year);
    let max_year = obj
        .get("maxYear")
        .and_then(|v| v.as_i64())
        .and_then(|v| i32::try_from(v).ok())
        .filter(|v| *v >= min_year)
        .unwrap_or(base.max_year.max(min_year));
    let default_duree_seance = obj
        .get("defaultDureeSeance")
        .and_then(|v| v.as_i64())
        .filter(|v| *v > 0)
        .unwrap_or(base.default_duree_seance);

    Ok(SchedulingDefaults {
        default_rr_type,
        default_penalize_rr,
        min_year,
        max_year,
        default_duree_seance,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |k| map.get(k).cloned()
    }

    #[test]
    fn env_defaults_apply_when_unset() {
        let cfg = Config::from_lookup(lookup(&[]));
        assert_eq!(cfg.log_filter, "info");
        assert!(cfg.fixed_now.is_none());
        assert_eq!(cfg.cascade_timeout, Duration::from_millis(10_000));
    }

    #[test]
    fn env_fixed_now_accepts_minutes_or_seconds() {
        let cfg = Config::from_lookup(lookup(&[(NOW_ENV, "2025-03-01T09:30")]));
        assert_eq!(
            cfg.fixed_now.map(|d| d.to_string()),
            Some("2025-03-01 09:30:00".to_string())
        );
        let cfg = Config::from_lookup(lookup(&[(NOW_ENV, "not a date"), (CASCADE_TIMEOUT_ENV, "0")]));
        assert!(cfg.fixed_now.is_none());
        assert_eq!(cfg.cascade_timeout, Duration::from_millis(10_000));
        assert_eq!(cfg.rejected.len(), 2);
    }

    #[test]
    fn scheduling_defaults_read_from_settings() {
        let conn = db::open_in_memory().expect("open db");
        assert_eq!(load_scheduling_defaults(&conn).expect("defaults").max_year, 2100);

        db::settings_set_json(
            &conn,
            SCHEDULING_SECTION,
            &json!({ "defaultRrType": "evening_recuperation", "defaultPenalizeRr": false, "minYear": 2020, "maxYear": 2010 }),
        )
        .expect("set settings");
        let d = load_scheduling_defaults(&conn).expect("defaults");
        assert_eq!(d.default_rr_type, RrType::EveningRecuperation);
        assert!(!d.default_penalize_rr);
        assert_eq!(d.min_year, 2020);
        // max below min falls back.
        assert_eq!(d.max_year, 2100);
    }

    #[test]
    fn corrupt_scheduling_section_is_an_error() {
        let conn = db::open_in_memory().expect("open db");
        conn.execute(
            "INSERT INTO settings(key, value_json) VALUES(?, ?)",
            (SCHEDULING_SECTION, "{not json"),
        )
        .expect("insert raw");
        assert!(load_scheduling_defaults(&conn).is_err());

        db::settings_set_json(&conn, SCHEDULING_SECTION, &json!([1, 2])).expect("set settings");
        assert!(load_scheduling_defaults(&conn).is_err());
    }
}
