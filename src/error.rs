use thiserror::Error;

/// Failures of the scheduling core (generation, cascade, replacement requests).
#[derive(Debug, Error)]
pub enum SchedError {
    #[error("{0}")]
    Validation(String),
    #[error("{0} not found")]
    NotFound(&'static str),
    #[error("{0}")]
    Invariant(String),
    #[error("cannot move replacement request from {from} to {to}")]
    InvalidTransition {
        from: &'static str,
        to: &'static str,
    },
    #[error("{0} already exists")]
    AlreadyExists(String),
    #[error("operation exceeded its deadline and was rolled back")]
    Timeout,
    #[error(transparent)]
    Db(#[from] rusqlite::Error),
    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl SchedError {
    pub fn code(&self) -> &'static str {
        match self {
            SchedError::Validation(_) => "bad_params",
            SchedError::NotFound(_) => "not_found",
            SchedError::Invariant(_) => "invariant_violation",
            SchedError::InvalidTransition { .. } => "invalid_transition",
            SchedError::AlreadyExists(_) => "already_exists",
            SchedError::Timeout => "timeout",
            SchedError::Db(_) => "db_query_failed",
            SchedError::Internal(_) => "internal",
        }
    }

    /// Whether the message can be shown to the caller as-is.
    pub fn is_internal(&self) -> bool {
        matches!(self, SchedError::Db(_) | SchedError::Internal(_))
    }
}

/// Maps a unique-constraint violation to `AlreadyExists`, leaving other errors alone.
pub fn on_unique_violation(e: rusqlite::Error, what: impl Into<String>) -> SchedError {
    match &e {
        rusqlite::Error::SqliteFailure(f, _)
            if f.extended_code == rusqlite::ffi::SQLITE_CONSTRAINT_UNIQUE
                || f.extended_code == rusqlite::ffi::SQLITE_CONSTRAINT_PRIMARYKEY =>
        {
            SchedError::AlreadyExists(what.into())
        }
        _ => SchedError::Db(e),
    }
}
