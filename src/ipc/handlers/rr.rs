use crate::config;
use crate::ipc::error::{ok, HandlerErr};
use crate::ipc::helpers::{
    db_conn, parse_bool, parse_nullable_string, parse_opt_string, require_admin, require_caller,
    required_str,
};
use crate::ipc::types::{AppState, Request};
use crate::model::{RrStatus, RrType};
use crate::rr::{self, NewRr, RrFilter, RrPatch};
use chrono::NaiveDateTime;
use rusqlite::Connection;
use serde::Serialize;
use serde_json::json;

fn to_json<T: Serialize>(value: &T) -> Result<serde_json::Value, HandlerErr> {
    serde_json::to_value(value).map_err(|e| HandlerErr::from(anyhow::Error::from(e)))
}

fn rr_create(
    conn: &Connection,
    params: &serde_json::Value,
    now: NaiveDateTime,
) -> Result<serde_json::Value, HandlerErr> {
    let new = NewRr {
        eleve_id: required_str(params, "eleveId")?,
        origin_seance_id: required_str(params, "originSeanceId")?,
        destination_seance_id: required_str(params, "destinationSeanceId")?,
        notes: parse_opt_string(params.get("notes"), "notes")?,
        rr_type: parse_opt_string(params.get("rrType"), "rrType")?.map(|s| RrType::parse(&s)),
        penalize_rr: parse_bool(params.get("penalizeRR"), "penalizeRR")?,
    };
    let defaults = config::load_scheduling_defaults(conn)?;
    let view = rr::create(conn, &new, &defaults, now)?;
    to_json(&view)
}

fn rr_list(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let status = match parse_opt_string(params.get("status"), "status")? {
        Some(raw) => Some(RrStatus::parse(&raw).ok_or_else(|| {
            HandlerErr::bad_params("status must be one of open, completed, cancelled")
        })?),
        None => None,
    };
    let filter = RrFilter {
        eleve_id: parse_opt_string(params.get("eleveId"), "eleveId")?,
        seance_id: parse_opt_string(params.get("seanceId"), "seanceId")?,
        status,
    };
    let rrs = rr::list(conn, &filter)?;
    Ok(json!({ "replacementRequests": to_json(&rrs)? }))
}

fn rr_get(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let id = required_str(params, "rrId")?;
    to_json(&rr::get(conn, &id)?)
}

fn rr_update(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let id = required_str(params, "rrId")?;
    let status = match params.get("status") {
        None => None,
        Some(v) if v.is_null() => None,
        Some(v) => Some(
            v.as_str()
                .ok_or_else(|| HandlerErr::bad_params("status must be a string"))?
                .to_string(),
        ),
    };
    let patch = RrPatch {
        status,
        notes: parse_nullable_string(params.get("notes"), "notes")?,
    };
    to_json(&rr::update(conn, &id, &patch)?)
}

fn rr_delete(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let id = required_str(params, "rrId")?;
    let deleted = rr::delete(conn, &id)?;
    Ok(json!({ "deleted": to_json(&deleted)? }))
}

fn handle_rr_create(state: &mut AppState, req: &Request) -> serde_json::Value {
    let now = state.clock.now();
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(resp) => return resp,
    };
    match require_caller(req).and_then(|_| rr_create(conn, &req.params, now)) {
        Ok(result) => ok(&req.id, result),
        Err(error) => error.response(&req.id),
    }
}

fn handle_rr_list(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(resp) => return resp,
    };
    match require_caller(req).and_then(|_| rr_list(conn, &req.params)) {
        Ok(result) => ok(&req.id, result),
        Err(error) => error.response(&req.id),
    }
}

fn handle_rr_get(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(resp) => return resp,
    };
    match require_caller(req).and_then(|_| rr_get(conn, &req.params)) {
        Ok(result) => ok(&req.id, result),
        Err(error) => error.response(&req.id),
    }
}

fn handle_rr_update(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(resp) => return resp,
    };
    match require_admin(req).and_then(|_| rr_update(conn, &req.params)) {
        Ok(result) => ok(&req.id, result),
        Err(error) => error.response(&req.id),
    }
}

fn handle_rr_delete(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(resp) => return resp,
    };
    match require_admin(req).and_then(|_| rr_delete(conn, &req.params)) {
        Ok(result) => ok(&req.id, result),
        Err(error) => error.response(&req.id),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "rr.create" => Some(handle_rr_create(state, req)),
        "rr.list" => Some(handle_rr_list(state, req)),
        "rr.get" => Some(handle_rr_get(state, req)),
        "rr.update" => Some(handle_rr_update(state, req)),
        "rr.delete" => Some(handle_rr_delete(state, req)),
        _ => None,
    }
}
