//! Replacement requests: a dual-enrolled eleve attends a destination seance in place
//! of (or on top of) their origin seance.

use chrono::NaiveDateTime;
use log::{info, warn};
use rusqlite::{Connection, OptionalExtension, Row};
use serde::Serialize;
use uuid::Uuid;

use crate::config::SchedulingDefaults;
use crate::error::SchedError;
use crate::model::{PresenceStatut, RrStatus, RrType, DATE_HEURE_FMT};

#[derive(Debug, Clone)]
pub struct NewRr {
    pub eleve_id: String,
    pub origin_seance_id: String,
    pub destination_seance_id: String,
    pub notes: Option<String>,
    pub rr_type: Option<RrType>,
    pub penalize_rr: Option<bool>,
}

/// Mutable fields. `notes: Some(None)` clears the note.
#[derive(Debug, Clone, Default)]
pub struct RrPatch {
    pub status: Option<String>,
    pub notes: Option<Option<String>>,
}

#[derive(Debug, Clone, Default)]
pub struct RrFilter {
    pub eleve_id: Option<String>,
    pub seance_id: Option<String>,
    pub status: Option<RrStatus>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EleveSummary {
    pub id: String,
    pub name: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SeanceSummary {
    pub id: String,
    pub date_heure: String,
    pub classe_id: String,
    pub classe_name: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RrView {
    pub id: String,
    pub eleve_id: String,
    pub origin_seance_id: String,
    pub destination_seance_id: String,
    pub status: RrStatus,
    pub dest_statut: PresenceStatut,
    pub rr_type: RrType,
    #[serde(rename = "penalizeRR")]
    pub penalize_rr: bool,
    pub notes: Option<String>,
    pub created_at: String,
    pub eleve: EleveSummary,
    pub origin: SeanceSummary,
    pub destination: SeanceSummary,
}

/// RRs touching one seance, split by which end the seance is.
#[derive(Debug, Clone, Default, Serialize)]
pub struct SeanceRrView {
    pub origin: Vec<RrView>,
    pub destination: Vec<RrView>,
}

const SELECT_VIEW: &str = "SELECT
       rr.id, rr.eleve_id, rr.origin_seance_id, rr.destination_seance_id,
       rr.status, rr.dest_statut, rr.rr_type, rr.penalize_rr, rr.notes, rr.created_at,
       e.last_name, e.first_name,
       so.date_heure, so.classe_id, co.name,
       sd.date_heure, sd.classe_id, cd.name
     FROM replacement_requests rr
     JOIN eleves e ON e.id = rr.eleve_id
     JOIN seances so ON so.id = rr.origin_seance_id
     JOIN classes co ON co.id = so.classe_id
     JOIN seances sd ON sd.id = rr.destination_seance_id
     JOIN classes cd ON cd.id = sd.classe_id";

fn view_from_row(r: &Row<'_>) -> rusqlite::Result<RrView> {
    let status: String = r.get(4)?;
    let dest_statut: String = r.get(5)?;
    let rr_type: String = r.get(6)?;
    let last: String = r.get(10)?;
    let first: String = r.get(11)?;
    Ok(RrView {
        id: r.get(0)?,
        eleve_id: r.get(1)?,
        origin_seance_id: r.get(2)?,
        destination_seance_id: r.get(3)?,
        // Stored values are only ever written through the enums.
        status: RrStatus::parse(&status).unwrap_or(RrStatus::Open),
        dest_statut: PresenceStatut::parse(&dest_statut).unwrap_or(PresenceStatut::NoStatus),
        rr_type: RrType::parse(&rr_type),
        penalize_rr: r.get::<_, i64>(7)? != 0,
        notes: r.get(8)?,
        created_at: r.get(9)?,
        eleve: EleveSummary {
            id: r.get(1)?,
            name: format!("{}, {}", last, first),
        },
        origin: SeanceSummary {
            id: r.get(2)?,
            date_heure: r.get(12)?,
            classe_id: r.get(13)?,
            classe_name: r.get(14)?,
        },
        destination: SeanceSummary {
            id: r.get(3)?,
            date_heure: r.get(15)?,
            classe_id: r.get(16)?,
            classe_name: r.get(17)?,
        },
    })
}

fn seance_classe(conn: &Connection, seance_id: &str) -> Result<Option<String>, SchedError> {
    Ok(conn
        .query_row(
            "SELECT classe_id FROM seances WHERE id = ?",
            [seance_id],
            |r| r.get::<_, String>(0),
        )
        .optional()?)
}

fn is_enrolled(conn: &Connection, classe_id: &str, eleve_id: &str) -> Result<bool, SchedError> {
    Ok(conn
        .query_row(
            "SELECT 1 FROM classe_eleves WHERE classe_id = ? AND eleve_id = ?",
            (classe_id, eleve_id),
            |r| r.get::<_, i64>(0),
        )
        .optional()?
        .is_some())
}

/// Creates an open RR. The eleve must be enrolled in the classes owning both
/// seances; the destination presence is materialised in the same transaction.
pub fn create(
    conn: &Connection,
    new: &NewRr,
    defaults: &SchedulingDefaults,
    now: NaiveDateTime,
) -> Result<RrView, SchedError> {
    if new.origin_seance_id == new.destination_seance_id {
        return Err(SchedError::Validation(
            "destinationSeanceId must differ from originSeanceId".into(),
        ));
    }
    let origin_classe =
        seance_classe(conn, &new.origin_seance_id)?.ok_or(SchedError::NotFound("origin seance"))?;
    let dest_classe = seance_classe(conn, &new.destination_seance_id)?
        .ok_or(SchedError::NotFound("destination seance"))?;

    let in_origin = is_enrolled(conn, &origin_classe, &new.eleve_id)?;
    let in_dest = is_enrolled(conn, &dest_classe, &new.eleve_id)?;
    if !(in_origin && in_dest) {
        warn!(
            "rr refused: eleve {} enrolled in origin classe {}: {}, destination classe {}: {}",
            new.eleve_id, origin_classe, in_origin, dest_classe, in_dest
        );
        return Err(SchedError::Invariant(
            "eleve must be enrolled in both the origin and the destination classes".into(),
        ));
    }

    let rr_type = new
        .rr_type
        .clone()
        .unwrap_or_else(|| defaults.default_rr_type.clone());
    let penalize_rr = new.penalize_rr.unwrap_or(defaults.default_penalize_rr);
    let id = Uuid::new_v4().to_string();

    let tx = conn.unchecked_transaction()?;
    tx.execute(
        "INSERT OR IGNORE INTO presences(id, seance_id, eleve_id, statut) VALUES(?, ?, ?, ?)",
        (
            Uuid::new_v4().to_string(),
            &new.destination_seance_id,
            &new.eleve_id,
            PresenceStatut::NoStatus.as_str(),
        ),
    )?;
    let dest_statut: String = tx.query_row(
        "SELECT statut FROM presences WHERE seance_id = ? AND eleve_id = ?",
        (&new.destination_seance_id, &new.eleve_id),
        |r| r.get(0),
    )?;
    tx.execute(
        "INSERT INTO replacement_requests(
           id, eleve_id, origin_seance_id, destination_seance_id,
           status, dest_statut, rr_type, penalize_rr, notes, created_at
         ) VALUES(?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        (
            &id,
            &new.eleve_id,
            &new.origin_seance_id,
            &new.destination_seance_id,
            RrStatus::Open.as_str(),
            &dest_statut,
            rr_type.as_str(),
            penalize_rr as i64,
            &new.notes,
            now.format(DATE_HEURE_FMT).to_string(),
        ),
    )?;
    tx.commit()?;

    info!(
        "rr {}: eleve {} from seance {} to seance {}",
        id, new.eleve_id, new.origin_seance_id, new.destination_seance_id
    );
    get(conn, &id)
}

pub fn get(conn: &Connection, id: &str) -> Result<RrView, SchedError> {
    let sql = format!("{SELECT_VIEW} WHERE rr.id = ?");
    conn.query_row(&sql, [id], view_from_row)
        .optional()?
        .ok_or(SchedError::NotFound("replacement request"))
}

/// Newest first.
pub fn list(conn: &Connection, filter: &RrFilter) -> Result<Vec<RrView>, SchedError> {
    let mut clauses: Vec<&str> = Vec::new();
    let mut params: Vec<String> = Vec::new();
    if let Some(eleve_id) = &filter.eleve_id {
        clauses.push("rr.eleve_id = ?");
        params.push(eleve_id.clone());
    }
    if let Some(seance_id) = &filter.seance_id {
        clauses.push("(rr.origin_seance_id = ? OR rr.destination_seance_id = ?)");
        params.push(seance_id.clone());
        params.push(seance_id.clone());
    }
    if let Some(status) = filter.status {
        clauses.push("rr.status = ?");
        params.push(status.as_str().to_string());
    }
    let where_sql = if clauses.is_empty() {
        String::new()
    } else {
        format!(" WHERE {}", clauses.join(" AND "))
    };
    let sql = format!("{SELECT_VIEW}{where_sql} ORDER BY rr.created_at DESC, rr.rowid DESC");
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt
        .query_map(rusqlite::params_from_iter(params), view_from_row)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

/// Updates `status` and/or `notes`. Unknown statuses are rejected before any write;
/// leaving a terminal status is refused.
pub fn update(conn: &Connection, id: &str, patch: &RrPatch) -> Result<RrView, SchedError> {
    let requested = match &patch.status {
        Some(raw) => Some(RrStatus::parse(raw).ok_or_else(|| {
            SchedError::Validation(format!(
                "status must be one of open, completed, cancelled (got {raw:?})"
            ))
        })?),
        None => None,
    };

    let tx = conn.unchecked_transaction()?;
    let current: String = tx
        .query_row(
            "SELECT status FROM replacement_requests WHERE id = ?",
            [id],
            |r| r.get(0),
        )
        .optional()?
        .ok_or(SchedError::NotFound("replacement request"))?;
    let current = RrStatus::parse(&current).unwrap_or(RrStatus::Open);

    if let Some(next) = requested {
        let next = current.transition_to(next).map_err(|e| {
            warn!("rr {id}: {e}");
            e
        })?;
        tx.execute(
            "UPDATE replacement_requests SET status = ? WHERE id = ?",
            (next.as_str(), id),
        )?;
        if next != current {
            info!("rr {id}: {} -> {}", current.as_str(), next.as_str());
        }
    }
    if let Some(notes) = &patch.notes {
        tx.execute(
            "UPDATE replacement_requests SET notes = ? WHERE id = ?",
            (notes, id),
        )?;
    }
    tx.commit()?;

    get(conn, id)
}

/// Removes the RR row only; presences it caused to exist stay in place.
pub fn delete(conn: &Connection, id: &str) -> Result<RrView, SchedError> {
    let view = get(conn, id)?;
    conn.execute("DELETE FROM replacement_requests WHERE id = ?", [id])?;
    info!("rr {id}: deleted");
    Ok(view)
}

pub fn seance_view(conn: &Connection, seance_id: &str) -> Result<SeanceRrView, SchedError> {
    let all = list(
        conn,
        &RrFilter {
            seance_id: Some(seance_id.to_string()),
            ..RrFilter::default()
        },
    )?;
    let (origin, destination): (Vec<_>, Vec<_>) = all
        .into_iter()
        .partition(|rr| rr.origin_seance_id == seance_id);
    Ok(SeanceRrView {
        origin,
        destination,
    })
}

/// Refreshes the cached `dest_statut` of every RR pointing at this presence.
pub fn sync_dest_statut(
    conn: &Connection,
    seance_id: &str,
    eleve_id: &str,
    statut: PresenceStatut,
) -> Result<usize, SchedError> {
    Ok(conn.execute(
        "UPDATE replacement_requests SET dest_statut = ?
         WHERE destination_seance_id = ? AND eleve_id = ?",
        (statut.as_str(), seance_id, eleve_id),
    )?)
}
