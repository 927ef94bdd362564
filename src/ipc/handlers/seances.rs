use chrono::{NaiveDateTime, NaiveTime};

use crate::calendar::{self, IsoWeekday, SundayWeekday};
use crate::config;
use crate::db;
use crate::error::on_unique_violation;
use crate::generate::{self, GenerateRequest};
use crate::ipc::error::{ok, HandlerErr};
use crate::ipc::helpers::{
    db_conn, parse_bool, parse_nullable_string, parse_opt_i64, require_admin, required_i64,
    required_str,
};
use crate::ipc::types::{AppState, Request};
use crate::model::{PresenceStatut, SeanceStatut, DATE_HEURE_FMT};
use log::info;
use rusqlite::{Connection, OptionalExtension, Row};
use serde_json::json;
use uuid::Uuid;

const SELECT_SEANCE: &str = "SELECT s.id, s.classe_id, c.name, s.date_heure, s.duree, s.statut,
       s.week_number, s.rr_possibles, s.present_teacher_id, c.teacher_id
     FROM seances s
     JOIN classes c ON c.id = s.classe_id";

fn seance_from_row(r: &Row<'_>) -> rusqlite::Result<serde_json::Value> {
    let present: Option<String> = r.get(8)?;
    let default_teacher: Option<String> = r.get(9)?;
    Ok(json!({
        "id": r.get::<_, String>(0)?,
        "classeId": r.get::<_, String>(1)?,
        "classeName": r.get::<_, String>(2)?,
        "dateHeure": r.get::<_, String>(3)?,
        "duree": r.get::<_, i64>(4)?,
        "statut": r.get::<_, String>(5)?,
        "weekNumber": r.get::<_, Option<i64>>(6)?,
        "rrPossibles": r.get::<_, i64>(7)? != 0,
        "presentTeacherId": present,
        // per-seance override wins over the class default
        "effectiveTeacherId": present.clone().or(default_teacher)
    }))
}

fn seance_json(conn: &Connection, seance_id: &str) -> Result<serde_json::Value, HandlerErr> {
    let sql = format!("{SELECT_SEANCE} WHERE s.id = ?");
    conn.query_row(&sql, [seance_id], seance_from_row)
        .optional()?
        .ok_or_else(|| HandlerErr::not_found("seance"))
}

fn parse_date_heure(raw: &str) -> Result<NaiveDateTime, HandlerErr> {
    let t = raw.trim();
    NaiveDateTime::parse_from_str(t, DATE_HEURE_FMT)
        .or_else(|_| NaiveDateTime::parse_from_str(t, "%Y-%m-%dT%H:%M"))
        .map_err(|_| HandlerErr::bad_params("dateHeure must be YYYY-MM-DDTHH:MM[:SS]"))
}

/// Weekday and start time for generation. Omitted params fall back to the class
/// template, whose weekday is stored Sunday-based.
fn generation_slot(
    conn: &Connection,
    classe_id: &str,
    params: &serde_json::Value,
) -> Result<(IsoWeekday, NaiveTime), HandlerErr> {
    let jour = parse_opt_i64(params.get("jourSemaine"), "jourSemaine")?;
    let heure = params.get("heureDebut").and_then(|v| v.as_str());
    if let (Some(j), Some(h)) = (jour, heure) {
        return Ok((IsoWeekday::new(j)?, calendar::parse_hhmm(h)?));
    }

    let template: Option<(Option<i64>, Option<String>)> = conn
        .query_row(
            "SELECT jour_semaine, heure_debut FROM classes WHERE id = ?",
            [classe_id],
            |r| Ok((r.get(0)?, r.get(1)?)),
        )
        .optional()?;
    let Some((class_jour, class_heure)) = template else {
        return Err(HandlerErr::not_found("classe"));
    };
    let jour_semaine = match (jour, class_jour) {
        (Some(j), _) => IsoWeekday::new(j)?,
        (None, Some(j)) => IsoWeekday::from(SundayWeekday::new(j)?),
        (None, None) => return Err(HandlerErr::bad_params("missing jourSemaine")),
    };
    let heure_debut = match heure.map(str::to_string).or(class_heure) {
        Some(h) => calendar::parse_hhmm(&h)?,
        None => return Err(HandlerErr::bad_params("missing heureDebut")),
    };
    Ok((jour_semaine, heure_debut))
}

fn seances_generate(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let classe_id = required_str(params, "classeId")?;
    let annee = required_i64(params, "annee")?;
    let annee = i32::try_from(annee).map_err(|_| HandlerErr::bad_params("annee out of range"))?;
    let (jour_semaine, heure_debut) = generation_slot(conn, &classe_id, params)?;

    let defaults = config::load_scheduling_defaults(conn)?;
    let outcome = generate::generate_seances(
        conn,
        &GenerateRequest {
            classe_id,
            annee,
            jour_semaine,
            heure_debut,
        },
        &defaults,
    )?;
    Ok(json!({
        "created": outcome.created,
        "skipped": outcome.skipped,
        "seanceIds": outcome.seance_ids
    }))
}

fn seances_list(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let classe_id = required_str(params, "classeId")?;
    if !db::classe_exists(conn, &classe_id)? {
        return Err(HandlerErr::not_found("classe"));
    }
    let from = params.get("from").and_then(|v| v.as_str());
    let sql = format!(
        "{SELECT_SEANCE} WHERE s.classe_id = ?1 AND (?2 IS NULL OR s.date_heure >= ?2) ORDER BY s.date_heure"
    );
    let mut stmt = conn.prepare(&sql)?;
    let seances = stmt
        .query_map((&classe_id, from), seance_from_row)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(json!({ "seances": seances }))
}

fn seances_get(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let seance_id = required_str(params, "seanceId")?;
    seance_json(conn, &seance_id)
}

/// Manual creation of a single seance outside the weekly pattern.
fn seances_create(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let classe_id = required_str(params, "classeId")?;
    let date_heure = parse_date_heure(&required_str(params, "dateHeure")?)?;
    let template: Option<(i64, i64)> = conn
        .query_row(
            "SELECT duree_seance, rr_possibles FROM classes WHERE id = ?",
            [&classe_id],
            |r| Ok((r.get(0)?, r.get(1)?)),
        )
        .optional()?;
    let Some((default_duree, rr_possibles)) = template else {
        return Err(HandlerErr::not_found("classe"));
    };
    let duree = parse_opt_i64(params.get("duree"), "duree")?.unwrap_or(default_duree);
    if duree <= 0 {
        return Err(HandlerErr::bad_params("duree must be positive"));
    }
    let rr_possibles = parse_bool(params.get("rrPossibles"), "rrPossibles")?.unwrap_or(rr_possibles != 0);
    let stamp = date_heure.format(DATE_HEURE_FMT).to_string();

    let seance_id = Uuid::new_v4().to_string();
    let tx = conn.unchecked_transaction()?;
    tx.execute(
        "INSERT INTO seances(id, classe_id, date_heure, duree, statut, rr_possibles)
         VALUES(?, ?, ?, ?, ?, ?)",
        (
            &seance_id,
            &classe_id,
            &stamp,
            duree,
            SeanceStatut::Programmed.as_str(),
            rr_possibles as i64,
        ),
    )
    .map_err(|e| on_unique_violation(e, format!("seance for this classe at {stamp}")))?;
    for eleve_id in db::enrolled_eleve_ids(&tx, &classe_id)? {
        tx.execute(
            "INSERT INTO presences(id, seance_id, eleve_id, statut) VALUES(?, ?, ?, ?)",
            (
                Uuid::new_v4().to_string(),
                &seance_id,
                &eleve_id,
                PresenceStatut::NoStatus.as_str(),
            ),
        )?;
    }
    tx.commit()?;
    info!("seance {seance_id} created for classe {classe_id} at {stamp}");
    seance_json(conn, &seance_id)
}

/// Per-seance overrides: status, present teacher, RR eligibility, duration.
fn seances_update(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let seance_id = required_str(params, "seanceId")?;
    let exists: i64 = conn.query_row("SELECT COUNT(*) FROM seances WHERE id = ?", [&seance_id], |r| r.get(0))?;
    if exists == 0 {
        return Err(HandlerErr::not_found("seance"));
    }

    let statut = match params.get("statut").and_then(|v| v.as_str()) {
        Some(raw) => Some(SeanceStatut::parse(raw).ok_or_else(|| {
            HandlerErr::bad_params("statut must be one of programmed, done, cancelled")
        })?),
        None => None,
    };
    let present_teacher = parse_nullable_string(params.get("presentTeacherId"), "presentTeacherId")?;
    if let Some(Some(teacher_id)) = &present_teacher {
        let known: i64 = conn.query_row("SELECT COUNT(*) FROM users WHERE id = ?", [teacher_id], |r| r.get(0))?;
        if known == 0 {
            return Err(HandlerErr::not_found("teacher"));
        }
    }
    let rr_possibles = parse_bool(params.get("rrPossibles"), "rrPossibles")?;
    let duree = parse_opt_i64(params.get("duree"), "duree")?;
    if matches!(duree, Some(d) if d <= 0) {
        return Err(HandlerErr::bad_params("duree must be positive"));
    }

    let tx = conn.unchecked_transaction()?;
    if let Some(s) = statut {
        tx.execute("UPDATE seances SET statut = ? WHERE id = ?", (s.as_str(), &seance_id))?;
    }
    if let Some(t) = &present_teacher {
        tx.execute("UPDATE seances SET present_teacher_id = ? WHERE id = ?", (t, &seance_id))?;
    }
    if let Some(flag) = rr_possibles {
        tx.execute("UPDATE seances SET rr_possibles = ? WHERE id = ?", (flag as i64, &seance_id))?;
    }
    if let Some(d) = duree {
        tx.execute("UPDATE seances SET duree = ? WHERE id = ?", (d, &seance_id))?;
    }
    tx.commit()?;
    seance_json(conn, &seance_id)
}

fn seances_renumber(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let classe_id = required_str(params, "classeId")?;
    let count = generate::renumber_weeks(conn, &classe_id)?;
    Ok(json!({ "count": count }))
}

fn handle_seances_generate(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(resp) => return resp,
    };
    match require_admin(req).and_then(|_| seances_generate(conn, &req.params)) {
        Ok(result) => ok(&req.id, result),
        Err(error) => error.response(&req.id),
    }
}

fn handle_seances_list(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return ok(&req.id, json!({ "seances": [] }));
    };
    match seances_list(conn, &req.params) {
        Ok(result) => ok(&req.id, result),
        Err(error) => error.response(&req.id),
    }
}

fn handle_seances_get(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(resp) => return resp,
    };
    match seances_get(conn, &req.params) {
        Ok(result) => ok(&req.id, result),
        Err(error) => error.response(&req.id),
    }
}

fn handle_seances_create(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(resp) => return resp,
    };
    match require_admin(req).and_then(|_| seances_create(conn, &req.params)) {
        Ok(result) => ok(&req.id, result),
        Err(error) => error.response(&req.id),
    }
}

fn handle_seances_update(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(resp) => return resp,
    };
    match require_admin(req).and_then(|_| seances_update(conn, &req.params)) {
        Ok(result) => ok(&req.id, result),
        Err(error) => error.response(&req.id),
    }
}

fn handle_seances_renumber(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(resp) => return resp,
    };
    match require_admin(req).and_then(|_| seances_renumber(conn, &req.params)) {
        Ok(result) => ok(&req.id, result),
        Err(error) => error.response(&req.id),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "seances.generate" => Some(handle_seances_generate(state, req)),
        "seances.list" => Some(handle_seances_list(state, req)),
        "seances.get" => Some(handle_seances_get(state, req)),
        "seances.create" => Some(handle_seances_create(state, req)),
        "seances.update" => Some(handle_seances_update(state, req)),
        "seances.renumber" => Some(handle_seances_renumber(state, req)),
        _ => None,
    }
}
