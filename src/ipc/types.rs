use std::path::PathBuf;
use std::time::Duration;

use rusqlite::Connection;
use serde::Deserialize;

use crate::clock::{self, Clock};
use crate::config::Config;

#[derive(Debug, Deserialize, Clone)]
pub struct Request {
    pub id: String,
    pub method: String,
    #[serde(default)]
    pub params: serde_json::Value,
    /// Identity verified by the parent shell. Absent for anonymous reads.
    #[serde(default)]
    pub caller: Option<Caller>,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(rename_all = "camelCase")]
pub struct Caller {
    pub user_id: String,
    #[serde(default)]
    pub is_admin: bool,
}

pub struct AppState {
    pub workspace: Option<PathBuf>,
    pub db: Option<Connection>,
    pub clock: Box<dyn Clock>,
    pub cascade_timeout: Duration,
}

impl AppState {
    pub fn new(cfg: &Config) -> Self {
        AppState {
            workspace: None,
            db: None,
            clock: clock::from_config(cfg.fixed_now),
            cascade_timeout: cfg.cascade_timeout,
        }
    }
}
