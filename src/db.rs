use rusqlite::{Connection, OptionalExtension};
use std::collections::HashSet;
use std::path::Path;

pub const DB_FILE: &str = "ecole.sqlite3";

pub fn open_db(workspace: &Path) -> anyhow::Result<Connection> {
    std::fs::create_dir_all(workspace)?;
    let db_path = workspace.join(DB_FILE);
    let conn = Connection::open(db_path)?;
    init_schema(&conn)?;
    Ok(conn)
}

#[cfg(test)]
pub fn open_in_memory() -> anyhow::Result<Connection> {
    let conn = Connection::open_in_memory()?;
    init_schema(&conn)?;
    Ok(conn)
}

fn init_schema(conn: &Connection) -> anyhow::Result<()> {
    conn.execute("PRAGMA foreign_keys = ON", [])?;
    // Concurrent writers (another daemon on the same workspace) wait instead of failing.
    conn.busy_timeout(std::time::Duration::from_secs(5))?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS settings(
            key TEXT PRIMARY KEY,
            value_json TEXT NOT NULL
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS users(
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL,
            email TEXT NOT NULL UNIQUE,
            is_admin INTEGER NOT NULL DEFAULT 0
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS eleves(
            id TEXT PRIMARY KEY,
            last_name TEXT NOT NULL,
            first_name TEXT NOT NULL
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS classes(
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL,
            duree_seance INTEGER NOT NULL CHECK (duree_seance > 0),
            semaines_seances TEXT NOT NULL DEFAULT '[]',
            jour_semaine INTEGER CHECK (jour_semaine BETWEEN 0 AND 6),
            heure_debut TEXT,
            rr_possibles INTEGER NOT NULL DEFAULT 0,
            is_recuperation INTEGER NOT NULL DEFAULT 0,
            teacher_id TEXT,
            level TEXT,
            type_cours TEXT,
            location TEXT,
            salle TEXT,
            FOREIGN KEY(teacher_id) REFERENCES users(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_classes_teacher ON classes(teacher_id)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS classe_eleves(
            classe_id TEXT NOT NULL,
            eleve_id TEXT NOT NULL,
            PRIMARY KEY(classe_id, eleve_id),
            FOREIGN KEY(classe_id) REFERENCES classes(id),
            FOREIGN KEY(eleve_id) REFERENCES eleves(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_classe_eleves_eleve ON classe_eleves(eleve_id)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS seances(
            id TEXT PRIMARY KEY,
            classe_id TEXT NOT NULL,
            date_heure TEXT NOT NULL,
            duree INTEGER NOT NULL,
            statut TEXT NOT NULL DEFAULT 'programmed',
            week_number INTEGER,
            rr_possibles INTEGER NOT NULL DEFAULT 0,
            present_teacher_id TEXT,
            FOREIGN KEY(classe_id) REFERENCES classes(id),
            FOREIGN KEY(present_teacher_id) REFERENCES users(id),
            UNIQUE(classe_id, date_heure)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_seances_class_date ON seances(classe_id, date_heure)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS presences(
            id TEXT PRIMARY KEY,
            seance_id TEXT NOT NULL,
            eleve_id TEXT NOT NULL,
            statut TEXT NOT NULL DEFAULT 'no_status',
            notes TEXT,
            FOREIGN KEY(seance_id) REFERENCES seances(id),
            FOREIGN KEY(eleve_id) REFERENCES eleves(id),
            UNIQUE(seance_id, eleve_id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_presences_eleve ON presences(eleve_id)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS replacement_requests(
            id TEXT PRIMARY KEY,
            eleve_id TEXT NOT NULL,
            origin_seance_id TEXT NOT NULL,
            destination_seance_id TEXT NOT NULL,
            status TEXT NOT NULL DEFAULT 'open',
            dest_statut TEXT NOT NULL DEFAULT 'no_status',
            rr_type TEXT NOT NULL DEFAULT 'same_week',
            penalize_rr INTEGER NOT NULL DEFAULT 1,
            notes TEXT,
            created_at TEXT NOT NULL,
            FOREIGN KEY(eleve_id) REFERENCES eleves(id),
            FOREIGN KEY(origin_seance_id) REFERENCES seances(id),
            FOREIGN KEY(destination_seance_id) REFERENCES seances(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_rr_origin ON replacement_requests(origin_seance_id)",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_rr_destination ON replacement_requests(destination_seance_id)",
        [],
    )?;

    Ok(())
}

pub fn settings_get_json(conn: &Connection, key: &str) -> anyhow::Result<Option<serde_json::Value>> {
    let raw: Option<String> = conn
        .query_row(
            "SELECT value_json FROM settings WHERE key = ?",
            [key],
            |r| r.get(0),
        )
        .optional()?;
    match raw {
        Some(s) => Ok(Some(serde_json::from_str(&s)?)),
        None => Ok(None),
    }
}

pub fn settings_set_json(conn: &Connection, key: &str, value: &serde_json::Value) -> anyhow::Result<()> {
    conn.execute(
        "INSERT INTO settings(key, value_json) VALUES(?, ?)
         ON CONFLICT(key) DO UPDATE SET value_json = excluded.value_json",
        (key, serde_json::to_string(value)?),
    )?;
    Ok(())
}

pub fn classe_exists(conn: &Connection, classe_id: &str) -> rusqlite::Result<bool> {
    conn.query_row("SELECT 1 FROM classes WHERE id = ?", [classe_id], |r| {
        r.get::<_, i64>(0)
    })
    .optional()
    .map(|v| v.is_some())
}

pub fn enrolled_eleve_ids(conn: &Connection, classe_id: &str) -> rusqlite::Result<HashSet<String>> {
    let mut stmt = conn.prepare("SELECT eleve_id FROM classe_eleves WHERE classe_id = ?")?;
    let ids = stmt
        .query_map([classe_id], |r| r.get::<_, String>(0))?
        .collect::<Result<HashSet<_>, _>>()?;
    Ok(ids)
}
