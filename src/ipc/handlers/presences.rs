use std::collections::HashMap;

use crate::ipc::error::{ok, HandlerErr};
use crate::ipc::helpers::{db_conn, parse_nullable_string, require_caller, required_str};
use crate::ipc::types::{AppState, Request};
use crate::model::{PresenceStatut, RrStatus};
use crate::rr::{self, RrView};
use rusqlite::{Connection, OptionalExtension};
use serde_json::json;
use uuid::Uuid;

fn rr_tag(side: &str, rr: &RrView) -> serde_json::Value {
    json!({
        "side": side,
        "rrId": rr.id,
        "status": rr.status.as_str()
    })
}

/// Roster of a seance: its own presences plus any RR arrivals, tagged with the RR end.
fn presences_for_seance(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let seance_id = required_str(params, "seanceId")?;
    let known: Option<String> = conn
        .query_row("SELECT date_heure FROM seances WHERE id = ?", [&seance_id], |r| r.get(0))
        .optional()?;
    let Some(date_heure) = known else {
        return Err(HandlerErr::not_found("seance"));
    };

    let rrs = rr::seance_view(conn, &seance_id)?;

    // Open arrivals predating a roster change may lack a row; give them one.
    let tx = conn.unchecked_transaction()?;
    for rr in rrs.destination.iter().filter(|rr| rr.status == RrStatus::Open) {
        tx.execute(
            "INSERT OR IGNORE INTO presences(id, seance_id, eleve_id, statut) VALUES(?, ?, ?, ?)",
            (
                Uuid::new_v4().to_string(),
                &seance_id,
                &rr.eleve_id,
                PresenceStatut::NoStatus.as_str(),
            ),
        )?;
    }
    tx.commit()?;

    // A student could be both leaving and arriving through different RRs; the arrival wins.
    let mut tags: HashMap<&str, (&str, &RrView)> = HashMap::new();
    for rr in &rrs.origin {
        tags.insert(rr.eleve_id.as_str(), ("origin", rr));
    }
    for rr in rrs.destination.iter().filter(|rr| rr.status != RrStatus::Cancelled) {
        tags.insert(rr.eleve_id.as_str(), ("destination", rr));
    }

    let mut stmt = conn.prepare(
        "SELECT p.id, p.eleve_id, e.last_name, e.first_name, p.statut, p.notes
         FROM presences p
         JOIN eleves e ON e.id = p.eleve_id
         WHERE p.seance_id = ?
         ORDER BY e.last_name, e.first_name",
    )?;
    let rows = stmt
        .query_map([&seance_id], |r| {
            Ok((
                r.get::<_, String>(0)?,
                r.get::<_, String>(1)?,
                r.get::<_, String>(2)?,
                r.get::<_, String>(3)?,
                r.get::<_, String>(4)?,
                r.get::<_, Option<String>>(5)?,
            ))
        })?
        .collect::<Result<Vec<_>, _>>()?;

    let mut presences = Vec::with_capacity(rows.len());
    for (id, eleve_id, last, first, statut, notes) in rows {
        let stored = PresenceStatut::parse(&statut).unwrap_or(PresenceStatut::NoStatus);
        let tag = tags.get(eleve_id.as_str());
        let display = match tag {
            Some(("origin", rr))
                if !rr.status.is_terminal() && stored == PresenceStatut::NoStatus =>
            {
                PresenceStatut::Awaiting
            }
            _ => stored,
        };
        presences.push(json!({
            "id": id,
            "eleveId": eleve_id,
            "displayName": format!("{}, {}", last, first),
            "statut": display.as_str(),
            "storedStatut": stored.as_str(),
            "notes": notes,
            "rr": tag.map(|(side, rr)| rr_tag(side, rr))
        }));
    }

    Ok(json!({
        "seanceId": seance_id,
        "dateHeure": date_heure,
        "presences": presences
    }))
}

fn presences_update(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let seance_id = required_str(params, "seanceId")?;
    let eleve_id = required_str(params, "eleveId")?;
    let statut = match params.get("statut").and_then(|v| v.as_str()) {
        Some(raw) => Some(PresenceStatut::parse(raw).ok_or_else(|| {
            HandlerErr::bad_params("statut must be one of present, absent, no_status, awaiting")
        })?),
        None => None,
    };
    let notes = parse_nullable_string(params.get("notes"), "notes")?;

    let tx = conn.unchecked_transaction()?;
    let presence_id: Option<String> = tx
        .query_row(
            "SELECT id FROM presences WHERE seance_id = ? AND eleve_id = ?",
            (&seance_id, &eleve_id),
            |r| r.get(0),
        )
        .optional()?;
    let Some(presence_id) = presence_id else {
        return Err(HandlerErr::not_found("presence"));
    };

    let mut synced = 0;
    if let Some(s) = statut {
        tx.execute("UPDATE presences SET statut = ? WHERE id = ?", (s.as_str(), &presence_id))?;
        synced = rr::sync_dest_statut(&tx, &seance_id, &eleve_id, s)?;
    }
    if let Some(n) = &notes {
        tx.execute("UPDATE presences SET notes = ? WHERE id = ?", (n, &presence_id))?;
    }
    tx.commit()?;

    let (statut, notes): (String, Option<String>) = conn.query_row(
        "SELECT statut, notes FROM presences WHERE id = ?",
        [&presence_id],
        |r| Ok((r.get(0)?, r.get(1)?)),
    )?;
    Ok(json!({
        "id": presence_id,
        "seanceId": seance_id,
        "eleveId": eleve_id,
        "statut": statut,
        "notes": notes,
        "rrSynced": synced
    }))
}

fn handle_presences_for_seance(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(resp) => return resp,
    };
    match require_caller(req).and_then(|_| presences_for_seance(conn, &req.params)) {
        Ok(result) => ok(&req.id, result),
        Err(error) => error.response(&req.id),
    }
}

fn handle_presences_update(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(resp) => return resp,
    };
    match require_caller(req).and_then(|_| presences_update(conn, &req.params)) {
        Ok(result) => ok(&req.id, result),
        Err(error) => error.response(&req.id),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "presences.forSeance" => Some(handle_presences_for_seance(state, req)),
        "presences.update" => Some(handle_presences_update(state, req)),
        _ => None,
    }
}
