use crate::error::on_unique_violation;
use crate::ipc::error::{ok, HandlerErr};
use crate::ipc::helpers::{db_conn, parse_bool, require_admin, required_str};
use crate::ipc::types::{AppState, Request};
use log::info;
use rusqlite::Connection;
use serde_json::json;
use uuid::Uuid;

fn users_list(conn: &Connection) -> Result<serde_json::Value, HandlerErr> {
    let mut stmt = conn.prepare(
        "SELECT
           u.id, u.name, u.email, u.is_admin,
           (SELECT COUNT(*) FROM classes c WHERE c.teacher_id = u.id) AS class_count
         FROM users u
         ORDER BY u.name",
    )?;
    let users = stmt
        .query_map([], |r| {
            Ok(json!({
                "id": r.get::<_, String>(0)?,
                "name": r.get::<_, String>(1)?,
                "email": r.get::<_, String>(2)?,
                "isAdmin": r.get::<_, i64>(3)? != 0,
                "classCount": r.get::<_, i64>(4)?
            }))
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(json!({ "users": users }))
}

fn users_create(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let name = required_str(params, "name")?;
    let email = required_str(params, "email")?.to_ascii_lowercase();
    if !email.contains('@') {
        return Err(HandlerErr::bad_params("email must contain @"));
    }
    let is_admin = parse_bool(params.get("isAdmin"), "isAdmin")?.unwrap_or(false);

    let id = Uuid::new_v4().to_string();
    conn.execute(
        "INSERT INTO users(id, name, email, is_admin) VALUES(?, ?, ?, ?)",
        (&id, &name, &email, is_admin as i64),
    )
    .map_err(|e| on_unique_violation(e, format!("user with email {email}")))?;
    info!("user {id} created");
    Ok(json!({ "userId": id, "name": name, "email": email, "isAdmin": is_admin }))
}

fn handle_users_list(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return ok(&req.id, json!({ "users": [] }));
    };
    match users_list(conn) {
        Ok(result) => ok(&req.id, result),
        Err(error) => error.response(&req.id),
    }
}

fn handle_users_create(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(resp) => return resp,
    };
    match require_admin(req).and_then(|_| users_create(conn, &req.params)) {
        Ok(result) => ok(&req.id, result),
        Err(error) => error.response(&req.id),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "users.list" => Some(handle_users_list(state, req)),
        "users.create" => Some(handle_users_create(state, req)),
        _ => None,
    }
}
