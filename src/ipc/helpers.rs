use rusqlite::Connection;
use serde_json::Value as JsonValue;

use crate::ipc::error::{err, HandlerErr};
use crate::ipc::types::{AppState, Request};

pub fn db_conn<'a>(state: &'a AppState, req: &Request) -> Result<&'a Connection, serde_json::Value> {
    state
        .db
        .as_ref()
        .ok_or_else(|| err(&req.id, "no_workspace", "select a workspace first", None))
}

/// Admin-only methods need a verified caller with the admin flag.
pub fn require_admin(req: &Request) -> Result<(), HandlerErr> {
    match &req.caller {
        Some(c) if c.is_admin => Ok(()),
        Some(c) => Err(HandlerErr {
            code: "forbidden",
            message: format!("{} requires an admin caller", req.method),
            details: Some(serde_json::json!({ "userId": c.user_id })),
        }),
        None => Err(HandlerErr {
            code: "forbidden",
            message: format!("{} requires an authenticated caller", req.method),
            details: None,
        }),
    }
}

pub fn require_caller(req: &Request) -> Result<(), HandlerErr> {
    match &req.caller {
        Some(_) => Ok(()),
        None => Err(HandlerErr {
            code: "forbidden",
            message: format!("{} requires an authenticated caller", req.method),
            details: None,
        }),
    }
}

pub fn required_str(params: &JsonValue, key: &str) -> Result<String, HandlerErr> {
    params
        .get(key)
        .and_then(|v| v.as_str())
        .map(|v| v.trim().to_string())
        .filter(|s| !s.is_empty())
        .ok_or_else(|| HandlerErr::bad_params(format!("missing {}", key)))
}

pub fn required_i64(params: &JsonValue, key: &str) -> Result<i64, HandlerErr> {
    params
        .get(key)
        .and_then(|v| v.as_i64())
        .ok_or_else(|| HandlerErr::bad_params(format!("missing or non-integer {}", key)))
}

pub fn parse_bool(v: Option<&JsonValue>, key: &str) -> Result<Option<bool>, HandlerErr> {
    match v {
        None => Ok(None),
        Some(v) if v.is_null() => Ok(None),
        Some(v) => v
            .as_bool()
            .map(Some)
            .ok_or_else(|| HandlerErr::bad_params(format!("{} must be boolean", key))),
    }
}

/// `None` when absent, `Some(None)` for explicit null or blank, `Some(Some(s))` otherwise.
pub fn parse_nullable_string(
    v: Option<&JsonValue>,
    key: &str,
) -> Result<Option<Option<String>>, HandlerErr> {
    match v {
        None => Ok(None),
        Some(v) if v.is_null() => Ok(Some(None)),
        Some(v) => {
            let s = v
                .as_str()
                .ok_or_else(|| HandlerErr::bad_params(format!("{} must be string or null", key)))?
                .trim()
                .to_string();
            if s.is_empty() {
                Ok(Some(None))
            } else {
                Ok(Some(Some(s)))
            }
        }
    }
}

pub fn parse_opt_string(v: Option<&JsonValue>, key: &str) -> Result<Option<String>, HandlerErr> {
    Ok(parse_nullable_string(v, key)?.flatten())
}

pub fn parse_opt_i64(v: Option<&JsonValue>, key: &str) -> Result<Option<i64>, HandlerErr> {
    match v {
        None => Ok(None),
        Some(v) if v.is_null() => Ok(None),
        Some(v) => v
            .as_i64()
            .map(Some)
            .ok_or_else(|| HandlerErr::bad_params(format!("{} must be integer or null", key))),
    }
}

pub fn parse_string_array(v: Option<&JsonValue>, key: &str) -> Result<Option<Vec<String>>, HandlerErr> {
    let Some(raw) = v else {
        return Ok(None);
    };
    if raw.is_null() {
        return Ok(None);
    }
    let arr = raw
        .as_array()
        .ok_or_else(|| HandlerErr::bad_params(format!("{} must be array of strings", key)))?;
    let mut out = Vec::with_capacity(arr.len());
    for item in arr {
        let s = item
            .as_str()
            .ok_or_else(|| HandlerErr::bad_params(format!("{} must be array of strings", key)))?
            .trim()
            .to_string();
        if !s.is_empty() {
            out.push(s);
        }
    }
    Ok(Some(out))
}
