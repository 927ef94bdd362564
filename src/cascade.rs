//! Creates classes, applies class template edits and propagates them to future seances.
//!
//! Everything runs in one `BEGIN IMMEDIATE` transaction: the class row, the
//! per-field seance updates, the enrollment replacement and the presence
//! reconciliation commit together or not at all. SQLite serialises writers, so two
//! concurrent edits of the same class apply one after the other and the last commit
//! wins on overlapping fields.

use std::collections::HashSet;
use std::time::Instant;

use chrono::{NaiveDateTime, NaiveTime};
use log::{debug, info};
use rusqlite::types::Value;
use rusqlite::{Connection, Transaction, TransactionBehavior};
use uuid::Uuid;

use crate::calendar::{self, SundayWeekday};
use crate::db;
use crate::error::{self, SchedError};
use crate::model::{self, PresenceStatut, DATE_HEURE_FMT};

/// Partial class update. `None` leaves the field alone; for nullable columns the
/// inner `Option` distinguishes "set to NULL" from "set to a value".
#[derive(Debug, Clone, Default)]
pub struct ClasseUpdate {
    pub name: Option<String>,
    pub duree_seance: Option<i64>,
    pub semaines_seances: Option<Vec<u32>>,
    pub jour_semaine: Option<Option<SundayWeekday>>,
    pub heure_debut: Option<Option<NaiveTime>>,
    pub rr_possibles: Option<bool>,
    pub is_recuperation: Option<bool>,
    pub teacher_id: Option<Option<String>>,
    pub level: Option<Option<String>>,
    pub type_cours: Option<Option<String>>,
    pub location: Option<Option<String>>,
    pub salle: Option<Option<String>>,
    pub eleve_ids: Option<Vec<String>>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CascadeReport {
    pub future_seances: usize,
    pub presences_added: usize,
    pub presences_removed: usize,
}

struct Deadline(Option<Instant>);

impl Deadline {
    fn check(&self) -> Result<(), SchedError> {
        match self.0 {
            Some(limit) if Instant::now() > limit => Err(SchedError::Timeout),
            _ => Ok(()),
        }
    }
}

struct FutureSeance {
    id: String,
    date_heure: NaiveDateTime,
}

/// Updates the class `classe_id` and cascades to every seance with
/// `date_heure >= now`. Past seances are never touched.
///
/// `deadline` bounds the whole operation; exceeding it rolls everything back.
pub fn update_classe(
    conn: &Connection,
    classe_id: &str,
    update: &ClasseUpdate,
    now: NaiveDateTime,
    deadline: Option<Instant>,
) -> Result<CascadeReport, SchedError> {
    let deadline = Deadline(deadline);
    let new_roster = validate(conn, update)?;

    // Dropped without commit on any early return below, which rolls back.
    let tx = Transaction::new_unchecked(conn, TransactionBehavior::Immediate)?;
    if !db::classe_exists(&tx, classe_id)? {
        return Err(SchedError::NotFound("classe"));
    }
    let report = apply(&tx, classe_id, update, new_roster.as_deref(), now, &deadline)?;
    deadline.check()?;
    tx.commit()?;

    info!(
        "classe {}: updated, cascaded to {} future seances (+{} / -{} presences)",
        classe_id, report.future_seances, report.presences_added, report.presences_removed
    );
    Ok(report)
}

/// Inserts a new class and applies its remaining template fields and roster in the
/// same transaction. A new class has no seances, so nothing cascades.
pub fn create_classe(
    conn: &Connection,
    classe_id: &str,
    name: &str,
    duree_seance: i64,
    fields: &ClasseUpdate,
) -> Result<(), SchedError> {
    if duree_seance <= 0 {
        return Err(SchedError::Validation("dureeSeance must be positive".into()));
    }
    let new_roster = validate(conn, fields)?;

    let tx = Transaction::new_unchecked(conn, TransactionBehavior::Immediate)?;
    tx.execute(
        "INSERT INTO classes(id, name, duree_seance) VALUES(?, ?, ?)",
        (classe_id, name, duree_seance),
    )
    .map_err(|e| error::on_unique_violation(e, format!("classe {classe_id}")))?;
    let fields = ClasseUpdate {
        name: None,
        duree_seance: None,
        ..fields.clone()
    };
    apply(
        &tx,
        classe_id,
        &fields,
        new_roster.as_deref(),
        NaiveDateTime::MAX,
        &Deadline(None),
    )?;
    tx.commit()?;

    info!("classe {classe_id} created");
    Ok(())
}

/// Checks everything that can be rejected before a transaction is opened. Returns
/// the deduplicated roster when one is given.
fn validate(conn: &Connection, update: &ClasseUpdate) -> Result<Option<Vec<String>>, SchedError> {
    if let Some(d) = update.duree_seance {
        if d <= 0 {
            return Err(SchedError::Validation("dureeSeance must be positive".into()));
        }
    }
    if let Some(Some(teacher_id)) = &update.teacher_id {
        if !user_exists(conn, teacher_id)? {
            return Err(SchedError::NotFound("teacher"));
        }
    }
    let new_roster = update.eleve_ids.as_deref().map(dedupe);
    if let Some(ids) = &new_roster {
        for id in ids {
            if !eleve_exists(conn, id)? {
                return Err(SchedError::Validation(format!("unknown eleve {id}")));
            }
        }
    }
    Ok(new_roster)
}

fn apply(
    tx: &Transaction<'_>,
    classe_id: &str,
    update: &ClasseUpdate,
    new_roster: Option<&[String]>,
    now: NaiveDateTime,
    deadline: &Deadline,
) -> Result<CascadeReport, SchedError> {
    update_classe_row(tx, classe_id, update)?;
    deadline.check()?;

    // Read once and reused by every step below.
    let future = future_seances(tx, classe_id, now)?;
    let mut report = CascadeReport {
        future_seances: future.len(),
        ..CascadeReport::default()
    };

    if !future.is_empty() {
        if let Some(flag) = update.rr_possibles {
            bulk_set(tx, "rr_possibles", flag as i64, &future)?;
        }
        if let Some(duree) = update.duree_seance {
            bulk_set(tx, "duree", duree, &future)?;
        }
        if let Some(teacher_id) = &update.teacher_id {
            bulk_set(tx, "present_teacher_id", teacher_id.clone(), &future)?;
        }
        if let Some(Some(time)) = update.heure_debut {
            for s in &future {
                deadline.check()?;
                let moved = calendar::with_time(s.date_heure.date(), time)
                    .format(DATE_HEURE_FMT)
                    .to_string();
                tx.execute("UPDATE seances SET date_heure = ? WHERE id = ?", (&moved, &s.id))
                    .map_err(|e| error::on_unique_violation(e, format!("seance at {moved}")))?;
            }
        }
    }
    deadline.check()?;

    if let Some(roster) = new_roster {
        replace_enrollment(tx, classe_id, roster)?;
        for s in &future {
            deadline.check()?;
            let (added, removed) = reconcile_presences(tx, &s.id, roster)?;
            debug!(
                "seance {}: {} presences added, {} removed",
                s.id, added, removed
            );
            report.presences_added += added;
            report.presences_removed += removed;
        }
    }
    Ok(report)
}

fn dedupe(ids: &[String]) -> Vec<String> {
    let mut seen = HashSet::new();
    ids.iter()
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty() && seen.insert(s.clone()))
        .collect()
}

fn user_exists(conn: &Connection, id: &str) -> rusqlite::Result<bool> {
    conn.query_row("SELECT COUNT(*) FROM users WHERE id = ?", [id], |r| {
        r.get::<_, i64>(0)
    })
    .map(|n| n > 0)
}

fn eleve_exists(conn: &Connection, id: &str) -> rusqlite::Result<bool> {
    conn.query_row("SELECT COUNT(*) FROM eleves WHERE id = ?", [id], |r| {
        r.get::<_, i64>(0)
    })
    .map(|n| n > 0)
}

fn update_classe_row(
    tx: &Transaction<'_>,
    classe_id: &str,
    u: &ClasseUpdate,
) -> Result<(), SchedError> {
    let mut sets: Vec<&'static str> = Vec::new();
    let mut values: Vec<Value> = Vec::new();

    fn opt_text(v: &Option<String>) -> Value {
        match v {
            Some(s) => Value::Text(s.clone()),
            None => Value::Null,
        }
    }

    if let Some(name) = &u.name {
        sets.push("name = ?");
        values.push(Value::Text(name.clone()));
    }
    if let Some(d) = u.duree_seance {
        sets.push("duree_seance = ?");
        values.push(Value::Integer(d));
    }
    if let Some(weeks) = &u.semaines_seances {
        sets.push("semaines_seances = ?");
        values.push(Value::Text(model::encode_week_set(weeks)));
    }
    if let Some(jour) = u.jour_semaine {
        sets.push("jour_semaine = ?");
        values.push(match jour {
            Some(j) => Value::Integer(j.get() as i64),
            None => Value::Null,
        });
    }
    if let Some(heure) = u.heure_debut {
        sets.push("heure_debut = ?");
        values.push(match heure {
            Some(t) => Value::Text(calendar::format_hhmm(t)),
            None => Value::Null,
        });
    }
    if let Some(flag) = u.rr_possibles {
        sets.push("rr_possibles = ?");
        values.push(Value::Integer(flag as i64));
    }
    if let Some(flag) = u.is_recuperation {
        sets.push("is_recuperation = ?");
        values.push(Value::Integer(flag as i64));
    }
    if let Some(v) = &u.teacher_id {
        sets.push("teacher_id = ?");
        values.push(opt_text(v));
    }
    if let Some(v) = &u.level {
        sets.push("level = ?");
        values.push(opt_text(v));
    }
    if let Some(v) = &u.type_cours {
        sets.push("type_cours = ?");
        values.push(opt_text(v));
    }
    if let Some(v) = &u.location {
        sets.push("location = ?");
        values.push(opt_text(v));
    }
    if let Some(v) = &u.salle {
        sets.push("salle = ?");
        values.push(opt_text(v));
    }

    if sets.is_empty() {
        return Ok(());
    }
    let sql = format!("UPDATE classes SET {} WHERE id = ?", sets.join(", "));
    values.push(Value::Text(classe_id.to_string()));
    tx.execute(&sql, rusqlite::params_from_iter(values))?;
    Ok(())
}

fn future_seances(
    tx: &Transaction<'_>,
    classe_id: &str,
    now: NaiveDateTime,
) -> Result<Vec<FutureSeance>, SchedError> {
    let mut stmt = tx.prepare(
        "SELECT id, date_heure FROM seances
         WHERE classe_id = ? AND date_heure >= ?
         ORDER BY date_heure",
    )?;
    let rows = stmt
        .query_map((classe_id, now.format(DATE_HEURE_FMT).to_string()), |r| {
            Ok((r.get::<_, String>(0)?, r.get::<_, String>(1)?))
        })?
        .collect::<Result<Vec<_>, _>>()?;

    rows.into_iter()
        .map(|(id, raw)| {
            let date_heure = NaiveDateTime::parse_from_str(&raw, DATE_HEURE_FMT).map_err(|e| {
                SchedError::Internal(anyhow::anyhow!("seance {id} has bad date_heure {raw:?}: {e}"))
            })?;
            Ok(FutureSeance { id, date_heure })
        })
        .collect()
}

fn bulk_set<V: rusqlite::ToSql>(
    tx: &Transaction<'_>,
    column: &'static str,
    value: V,
    future: &[FutureSeance],
) -> Result<(), SchedError> {
    let sql = format!("UPDATE seances SET {column} = ? WHERE id = ?");
    let mut stmt = tx.prepare(&sql)?;
    for s in future {
        stmt.execute((&value, &s.id))?;
    }
    Ok(())
}

fn replace_enrollment(
    tx: &Transaction<'_>,
    classe_id: &str,
    roster: &[String],
) -> Result<(), SchedError> {
    tx.execute("DELETE FROM classe_eleves WHERE classe_id = ?", [classe_id])?;
    let mut stmt = tx.prepare("INSERT INTO classe_eleves(classe_id, eleve_id) VALUES(?, ?)")?;
    for eleve_id in roster {
        stmt.execute((classe_id, eleve_id))?;
    }
    Ok(())
}

/// Brings the presences of one seance in line with `roster`: missing eleves get a
/// `no_status` row, eleves no longer enrolled lose theirs, the rest are untouched.
fn reconcile_presences(
    tx: &Transaction<'_>,
    seance_id: &str,
    roster: &[String],
) -> Result<(usize, usize), SchedError> {
    let existing: HashSet<String> = {
        let mut stmt = tx.prepare("SELECT eleve_id FROM presences WHERE seance_id = ?")?;
        let ids = stmt
            .query_map([seance_id], |r| r.get::<_, String>(0))?
            .collect::<Result<HashSet<_>, _>>()?;
        ids
    };
    let wanted: HashSet<&str> = roster.iter().map(|s| s.as_str()).collect();

    let to_add: Vec<&str> = roster
        .iter()
        .map(|s| s.as_str())
        .filter(|id| !existing.contains(*id))
        .collect();
    let to_delete: Vec<&str> = existing
        .iter()
        .map(|s| s.as_str())
        .filter(|id| !wanted.contains(id))
        .collect();

    {
        let mut insert = tx.prepare(
            "INSERT INTO presences(id, seance_id, eleve_id, statut) VALUES(?, ?, ?, ?)",
        )?;
        for eleve_id in &to_add {
            insert.execute((
                Uuid::new_v4().to_string(),
                seance_id,
                eleve_id,
                PresenceStatut::NoStatus.as_str(),
            ))?;
        }
    }
    {
        let mut delete = tx.prepare("DELETE FROM presences WHERE seance_id = ? AND eleve_id = ?")?;
        for eleve_id in &to_delete {
            delete.execute((seance_id, eleve_id))?;
        }
    }

    Ok((to_add.len(), to_delete.len()))
}
