//! Expands a class's recurring week pattern into dated seances.

use chrono::{NaiveDateTime, NaiveTime};
use log::{debug, info};
use rusqlite::{Connection, OptionalExtension};
use uuid::Uuid;

use crate::calendar::{self, IsoWeekday};
use crate::config::SchedulingDefaults;
use crate::db;
use crate::error::SchedError;
use crate::model::{self, PresenceStatut, SeanceStatut, DATE_HEURE_FMT};

#[derive(Debug, Clone)]
pub struct GenerateRequest {
    pub classe_id: String,
    pub annee: i32,
    pub jour_semaine: IsoWeekday,
    pub heure_debut: NaiveTime,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlannedSeance {
    pub date_heure: NaiveDateTime,
    pub duree: i64,
    pub week_number: u32,
}

#[derive(Debug, Clone, Default)]
pub struct GenerateOutcome {
    pub created: usize,
    pub skipped: usize,
    pub seance_ids: Vec<String>,
}

/// Computes the seances for `weeks` without touching the database.
///
/// The output is sorted by date and `week_number` is the 1-based position in that
/// order, so an unordered or sparse pattern such as `[4, 1, 2]` still numbers 1, 2, 3.
pub fn plan_seances(
    weeks: &[u32],
    annee: i32,
    jour_semaine: IsoWeekday,
    heure_debut: NaiveTime,
    duree: i64,
) -> Result<Vec<PlannedSeance>, SchedError> {
    let mut dates = Vec::with_capacity(weeks.len());
    for &week in weeks {
        let date = calendar::pattern_date(annee, week, jour_semaine)?;
        dates.push(calendar::with_time(date, heure_debut));
    }
    dates.sort();
    dates.dedup();

    Ok(dates
        .into_iter()
        .enumerate()
        .map(|(i, date_heure)| PlannedSeance {
            date_heure,
            duree,
            week_number: i as u32 + 1,
        })
        .collect())
}

struct ClasseTemplate {
    duree_seance: i64,
    semaines_seances: String,
    rr_possibles: bool,
}

fn load_template(conn: &Connection, classe_id: &str) -> Result<ClasseTemplate, SchedError> {
    conn.query_row(
        "SELECT duree_seance, semaines_seances, rr_possibles FROM classes WHERE id = ?",
        [classe_id],
        |r| {
            Ok(ClasseTemplate {
                duree_seance: r.get(0)?,
                semaines_seances: r.get(1)?,
                rr_possibles: r.get::<_, i64>(2)? != 0,
            })
        },
    )
    .optional()?
    .ok_or(SchedError::NotFound("classe"))
}

/// Inserts one seance per pattern week for `req.annee`.
///
/// Seances colliding with an existing (classe, date) pair are skipped, so running the
/// generation twice leaves the same set as running it once. Every seance actually
/// inserted gets a `no_status` presence for each currently enrolled eleve.
pub fn generate_seances(
    conn: &Connection,
    req: &GenerateRequest,
    defaults: &SchedulingDefaults,
) -> Result<GenerateOutcome, SchedError> {
    if req.annee < defaults.min_year || req.annee > defaults.max_year {
        return Err(SchedError::Validation(format!(
            "annee must be between {} and {}",
            defaults.min_year, defaults.max_year
        )));
    }

    let template = load_template(conn, &req.classe_id)?;
    let weeks = model::decode_week_set(&template.semaines_seances)?;
    let planned = plan_seances(
        &weeks,
        req.annee,
        req.jour_semaine,
        req.heure_debut,
        template.duree_seance,
    )?;
    if planned.is_empty() {
        info!("classe {}: empty week pattern, nothing to generate", req.classe_id);
        return Ok(GenerateOutcome::default());
    }

    let tx = conn.unchecked_transaction()?;
    let enrolled = db::enrolled_eleve_ids(&tx, &req.classe_id)?;
    let mut outcome = GenerateOutcome::default();
    {
        let mut insert_seance = tx.prepare(
            "INSERT OR IGNORE INTO seances(
               id, classe_id, date_heure, duree, statut, week_number, rr_possibles, present_teacher_id
             ) VALUES(?, ?, ?, ?, ?, ?, ?, NULL)",
        )?;
        let mut insert_presence = tx.prepare(
            "INSERT OR IGNORE INTO presences(id, seance_id, eleve_id, statut) VALUES(?, ?, ?, ?)",
        )?;

        for p in &planned {
            let seance_id = Uuid::new_v4().to_string();
            let inserted = insert_seance.execute((
                &seance_id,
                &req.classe_id,
                p.date_heure.format(DATE_HEURE_FMT).to_string(),
                p.duree,
                SeanceStatut::Programmed.as_str(),
                p.week_number as i64,
                template.rr_possibles as i64,
            ))?;
            if inserted == 0 {
                debug!(
                    "classe {}: seance at {} already exists, skipped",
                    req.classe_id, p.date_heure
                );
                outcome.skipped += 1;
                continue;
            }
            for eleve_id in &enrolled {
                insert_presence.execute((
                    Uuid::new_v4().to_string(),
                    &seance_id,
                    eleve_id,
                    PresenceStatut::NoStatus.as_str(),
                ))?;
            }
            outcome.created += 1;
            outcome.seance_ids.push(seance_id);
        }
    }
    tx.commit()?;

    info!(
        "classe {}: generated {} seances for {} ({} skipped)",
        req.classe_id, outcome.created, req.annee, outcome.skipped
    );
    Ok(outcome)
}

/// Rewrites `week_number` for every seance of a class so it follows date order.
pub fn renumber_weeks(conn: &Connection, classe_id: &str) -> Result<usize, SchedError> {
    if !db::classe_exists(conn, classe_id)? {
        return Err(SchedError::NotFound("classe"));
    }
    let tx = conn.unchecked_transaction()?;
    let ids = {
        let mut stmt =
            tx.prepare("SELECT id FROM seances WHERE classe_id = ? ORDER BY date_heure, id")?;
        let ids = stmt
            .query_map([classe_id], |r| r.get::<_, String>(0))?
            .collect::<Result<Vec<_>, _>>()?;
        ids
    };
    for (i, id) in ids.iter().enumerate() {
        tx.execute(
            "UPDATE seances SET week_number = ? WHERE id = ?",
            (i as i64 + 1, id),
        )?;
    }
    tx.commit()?;
    Ok(ids.len())
}
