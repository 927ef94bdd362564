use crate::ipc::error::{ok, HandlerErr};
use crate::ipc::helpers::{db_conn, require_admin, required_str};
use crate::ipc::types::{AppState, Request};
use log::info;
use rusqlite::Connection;
use serde_json::json;
use uuid::Uuid;

fn eleves_list(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let classe_id = params.get("classeId").and_then(|v| v.as_str());
    let mut stmt = conn.prepare(
        "SELECT e.id, e.last_name, e.first_name,
           (SELECT COUNT(*) FROM classe_eleves ce WHERE ce.eleve_id = e.id) AS class_count
         FROM eleves e
         WHERE ?1 IS NULL OR e.id IN (SELECT eleve_id FROM classe_eleves WHERE classe_id = ?1)
         ORDER BY e.last_name, e.first_name",
    )?;
    let eleves = stmt
        .query_map([classe_id], |r| {
            Ok(json!({
                "id": r.get::<_, String>(0)?,
                "lastName": r.get::<_, String>(1)?,
                "firstName": r.get::<_, String>(2)?,
                "classCount": r.get::<_, i64>(3)?
            }))
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(json!({ "eleves": eleves }))
}

fn eleves_create(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let last_name = required_str(params, "lastName")?;
    let first_name = required_str(params, "firstName")?;
    let id = Uuid::new_v4().to_string();
    conn.execute(
        "INSERT INTO eleves(id, last_name, first_name) VALUES(?, ?, ?)",
        (&id, &last_name, &first_name),
    )?;
    info!("eleve {id} created");
    Ok(json!({ "eleveId": id, "lastName": last_name, "firstName": first_name }))
}

fn eleves_delete(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let eleve_id = required_str(params, "eleveId")?;
    let exists: i64 = conn.query_row("SELECT COUNT(*) FROM eleves WHERE id = ?", [&eleve_id], |r| r.get(0))?;
    if exists == 0 {
        return Err(HandlerErr::not_found("eleve"));
    }

    let tx = conn.unchecked_transaction()?;
    // No ON DELETE CASCADE; dependency order.
    tx.execute("DELETE FROM replacement_requests WHERE eleve_id = ?", [&eleve_id])?;
    tx.execute("DELETE FROM presences WHERE eleve_id = ?", [&eleve_id])?;
    tx.execute("DELETE FROM classe_eleves WHERE eleve_id = ?", [&eleve_id])?;
    tx.execute("DELETE FROM eleves WHERE id = ?", [&eleve_id])?;
    tx.commit()?;
    info!("eleve {eleve_id} deleted");
    Ok(json!({ "ok": true }))
}

fn handle_eleves_list(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return ok(&req.id, json!({ "eleves": [] }));
    };
    match eleves_list(conn, &req.params) {
        Ok(result) => ok(&req.id, result),
        Err(error) => error.response(&req.id),
    }
}

fn handle_eleves_create(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(resp) => return resp,
    };
    match require_admin(req).and_then(|_| eleves_create(conn, &req.params)) {
        Ok(result) => ok(&req.id, result),
        Err(error) => error.response(&req.id),
    }
}

fn handle_eleves_delete(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(resp) => return resp,
    };
    match require_admin(req).and_then(|_| eleves_delete(conn, &req.params)) {
        Ok(result) => ok(&req.id, result),
        Err(error) => error.response(&req.id),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "eleves.list" => Some(handle_eleves_list(state, req)),
        "eleves.create" => Some(handle_eleves_create(state, req)),
        "eleves.delete" => Some(handle_eleves_delete(state, req)),
        _ => None,
    }
}
