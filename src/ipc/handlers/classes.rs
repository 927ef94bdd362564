use std::time::Instant;

use crate::calendar::{self, SundayWeekday};
use crate::cascade::{self, ClasseUpdate};
use crate::config;
use crate::db;
use crate::ipc::error::{err, ok, HandlerErr};
use crate::ipc::helpers::{
    db_conn, parse_bool, parse_nullable_string, parse_opt_i64, parse_string_array, require_admin,
    required_str,
};
use crate::ipc::types::{AppState, Request};
use crate::model;
use log::info;
use rusqlite::{Connection, OptionalExtension};
use serde_json::json;
use uuid::Uuid;

fn handle_classes_list(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return ok(&req.id, json!({ "classes": [] }));
    };

    // Correlated subqueries avoid double-counting from joins.
    let mut stmt = match conn.prepare(
        "SELECT
           c.id,
           c.name,
           c.teacher_id,
           (SELECT COUNT(*) FROM classe_eleves ce WHERE ce.classe_id = c.id) AS eleve_count,
           (SELECT COUNT(*) FROM seances s WHERE s.classe_id = c.id) AS seance_count
         FROM classes c
         ORDER BY c.name",
    ) {
        Ok(s) => s,
        Err(e) => return HandlerErr::from(e).response(&req.id),
    };

    let rows = stmt
        .query_map([], |row| {
            Ok(json!({
                "id": row.get::<_, String>(0)?,
                "name": row.get::<_, String>(1)?,
                "teacherId": row.get::<_, Option<String>>(2)?,
                "eleveCount": row.get::<_, i64>(3)?,
                "seanceCount": row.get::<_, i64>(4)?
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>());

    match rows {
        Ok(classes) => ok(&req.id, json!({ "classes": classes })),
        Err(e) => HandlerErr::from(e).response(&req.id),
    }
}

/// Full class view: template fields plus nested teacher, eleves and seances.
pub fn classe_json(conn: &Connection, classe_id: &str) -> Result<serde_json::Value, HandlerErr> {
    let row = conn
        .query_row(
            "SELECT c.name, c.duree_seance, c.semaines_seances, c.jour_semaine, c.heure_debut,
                    c.rr_possibles, c.is_recuperation, c.teacher_id, c.level, c.type_cours,
                    c.location, c.salle, u.name, u.email
             FROM classes c
             LEFT JOIN users u ON u.id = c.teacher_id
             WHERE c.id = ?",
            [classe_id],
            |r| {
                let teacher_id: Option<String> = r.get(7)?;
                let teacher = match &teacher_id {
                    Some(id) => json!({
                        "id": id,
                        "name": r.get::<_, Option<String>>(12)?,
                        "email": r.get::<_, Option<String>>(13)?
                    }),
                    None => serde_json::Value::Null,
                };
                Ok((
                    json!({
                        "id": classe_id,
                        "name": r.get::<_, String>(0)?,
                        "dureeSeance": r.get::<_, i64>(1)?,
                        "jourSemaine": r.get::<_, Option<i64>>(3)?,
                        "heureDebut": r.get::<_, Option<String>>(4)?,
                        "rrPossibles": r.get::<_, i64>(5)? != 0,
                        "isRecuperation": r.get::<_, i64>(6)? != 0,
                        "teacherId": teacher_id,
                        "teacher": teacher,
                        "level": r.get::<_, Option<String>>(8)?,
                        "typeCours": r.get::<_, Option<String>>(9)?,
                        "location": r.get::<_, Option<String>>(10)?,
                        "salle": r.get::<_, Option<String>>(11)?
                    }),
                    r.get::<_, String>(2)?,
                ))
            },
        )
        .optional()?;
    let Some((mut classe, semaines_raw)) = row else {
        return Err(HandlerErr::not_found("classe"));
    };
    let weeks = model::decode_week_set(&semaines_raw)?;
    classe["semainesSeances"] = json!(weeks);

    let mut stmt = conn.prepare(
        "SELECT e.id, e.last_name, e.first_name
         FROM classe_eleves ce
         JOIN eleves e ON e.id = ce.eleve_id
         WHERE ce.classe_id = ?
         ORDER BY e.last_name, e.first_name",
    )?;
    let eleves = stmt
        .query_map([classe_id], |r| {
            Ok(json!({
                "id": r.get::<_, String>(0)?,
                "lastName": r.get::<_, String>(1)?,
                "firstName": r.get::<_, String>(2)?
            }))
        })?
        .collect::<Result<Vec<_>, _>>()?;

    let mut stmt = conn.prepare(
        "SELECT id, date_heure, duree, statut, week_number, rr_possibles, present_teacher_id
         FROM seances
         WHERE classe_id = ?
         ORDER BY date_heure",
    )?;
    let seances = stmt
        .query_map([classe_id], |r| {
            Ok(json!({
                "id": r.get::<_, String>(0)?,
                "dateHeure": r.get::<_, String>(1)?,
                "duree": r.get::<_, i64>(2)?,
                "statut": r.get::<_, String>(3)?,
                "weekNumber": r.get::<_, Option<i64>>(4)?,
                "rrPossibles": r.get::<_, i64>(5)? != 0,
                "presentTeacherId": r.get::<_, Option<String>>(6)?
            }))
        })?
        .collect::<Result<Vec<_>, _>>()?;

    classe["eleves"] = json!(eleves);
    classe["seances"] = json!(seances);
    Ok(classe)
}

fn parse_jour_semaine(v: Option<&serde_json::Value>) -> Result<Option<Option<SundayWeekday>>, HandlerErr> {
    match v {
        None => Ok(None),
        Some(v) if v.is_null() => Ok(Some(None)),
        Some(v) => {
            let n = v.as_i64().ok_or_else(|| {
                HandlerErr::bad_params("jourSemaine must be an integer between 0 and 6, or null")
            })?;
            Ok(Some(Some(SundayWeekday::new(n)?)))
        }
    }
}

fn parse_heure_debut(v: Option<&serde_json::Value>) -> Result<Option<Option<chrono::NaiveTime>>, HandlerErr> {
    match parse_nullable_string(v, "heureDebut")? {
        None => Ok(None),
        Some(None) => Ok(Some(None)),
        Some(Some(s)) => Ok(Some(Some(calendar::parse_hhmm(&s)?))),
    }
}

/// Reads every template field present in `params`.
fn parse_classe_update(params: &serde_json::Value) -> Result<ClasseUpdate, HandlerErr> {
    let name = match parse_nullable_string(params.get("name"), "name")? {
        Some(None) => return Err(HandlerErr::bad_params("name must not be empty")),
        other => other.flatten(),
    };
    let semaines_seances = match params.get("semainesSeances") {
        None => None,
        Some(v) if v.is_null() => Some(Vec::new()),
        Some(v) => Some(model::week_set_from_json(v)?),
    };
    Ok(ClasseUpdate {
        name,
        duree_seance: parse_opt_i64(params.get("dureeSeance"), "dureeSeance")?,
        semaines_seances,
        jour_semaine: parse_jour_semaine(params.get("jourSemaine"))?,
        heure_debut: parse_heure_debut(params.get("heureDebut"))?,
        rr_possibles: parse_bool(params.get("rrPossibles"), "rrPossibles")?,
        is_recuperation: parse_bool(params.get("isRecuperation"), "isRecuperation")?,
        teacher_id: parse_nullable_string(params.get("teacherId"), "teacherId")?,
        level: parse_nullable_string(params.get("level"), "level")?,
        type_cours: parse_nullable_string(params.get("typeCours"), "typeCours")?,
        location: parse_nullable_string(params.get("location"), "location")?,
        salle: parse_nullable_string(params.get("salle"), "salle")?,
        eleve_ids: parse_string_array(params.get("eleveIds"), "eleveIds")?,
    })
}

fn classes_create(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let name = required_str(params, "name")?;
    let defaults = config::load_scheduling_defaults(conn)?;
    let fields = parse_classe_update(params)?;
    let duree = fields.duree_seance.unwrap_or(defaults.default_duree_seance);

    let classe_id = Uuid::new_v4().to_string();
    cascade::create_classe(conn, &classe_id, &name, duree, &fields)?;
    classe_json(conn, &classe_id)
}

fn classes_get(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let classe_id = required_str(params, "classeId")?;
    classe_json(conn, &classe_id)
}

fn classes_update(state: &AppState, conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let classe_id = required_str(params, "classeId")?;
    let update = parse_classe_update(params)?;
    let now = state.clock.now();
    let deadline = Instant::now() + state.cascade_timeout;
    let report = cascade::update_classe(conn, &classe_id, &update, now, Some(deadline))?;
    let mut classe = classe_json(conn, &classe_id)?;
    classe["cascade"] = json!({
        "futureSeances": report.future_seances,
        "presencesAdded": report.presences_added,
        "presencesRemoved": report.presences_removed
    });
    Ok(classe)
}

fn classes_delete(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let classe_id = required_str(params, "classeId")?;
    if !db::classe_exists(conn, &classe_id)? {
        return Err(HandlerErr::not_found("classe"));
    }

    let tx = conn.unchecked_transaction()?;
    // Explicitly delete in dependency order (no ON DELETE CASCADE).
    tx.execute(
        "DELETE FROM replacement_requests
         WHERE origin_seance_id IN (SELECT id FROM seances WHERE classe_id = ?1)
            OR destination_seance_id IN (SELECT id FROM seances WHERE classe_id = ?1)",
        [&classe_id],
    )?;
    tx.execute(
        "DELETE FROM presences WHERE seance_id IN (SELECT id FROM seances WHERE classe_id = ?)",
        [&classe_id],
    )?;
    tx.execute("DELETE FROM seances WHERE classe_id = ?", [&classe_id])?;
    tx.execute("DELETE FROM classe_eleves WHERE classe_id = ?", [&classe_id])?;
    tx.execute("DELETE FROM classes WHERE id = ?", [&classe_id])?;
    tx.commit()?;

    info!("classe {classe_id} deleted");
    Ok(json!({ "ok": true }))
}

fn handle_classes_create(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(resp) => return resp,
    };
    match require_admin(req).and_then(|_| classes_create(conn, &req.params)) {
        Ok(result) => ok(&req.id, result),
        Err(error) => error.response(&req.id),
    }
}

fn handle_classes_get(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(resp) => return resp,
    };
    match classes_get(conn, &req.params) {
        Ok(result) => ok(&req.id, result),
        Err(error) => error.response(&req.id),
    }
}

fn handle_classes_update(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    match require_admin(req).and_then(|_| classes_update(state, conn, &req.params)) {
        Ok(result) => ok(&req.id, result),
        Err(error) => error.response(&req.id),
    }
}

fn handle_classes_delete(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(resp) => return resp,
    };
    match require_admin(req).and_then(|_| classes_delete(conn, &req.params)) {
        Ok(result) => ok(&req.id, result),
        Err(error) => error.response(&req.id),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "classes.list" => Some(handle_classes_list(state, req)),
        "classes.create" => Some(handle_classes_create(state, req)),
        "classes.get" => Some(handle_classes_get(state, req)),
        "classes.update" => Some(handle_classes_update(state, req)),
        "classes.delete" => Some(handle_classes_delete(state, req)),
        _ => None,
    }
}
