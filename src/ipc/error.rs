use log::error;
use serde_json::json;

use crate::error::SchedError;

pub fn ok(id: &str, result: serde_json::Value) -> serde_json::Value {
    json!({
        "id": id,
        "ok": true,
        "result": result
    })
}

pub fn err(
    id: &str,
    code: &str,
    message: impl Into<String>,
    details: Option<serde_json::Value>,
) -> serde_json::Value {
    let mut error = json!({
        "code": code,
        "message": message.into(),
    });
    if let Some(d) = details {
        error["details"] = d;
    }
    json!({
        "id": id,
        "ok": false,
        "error": error,
    })
}

#[derive(Debug)]
pub struct HandlerErr {
    pub code: &'static str,
    pub message: String,
    pub details: Option<serde_json::Value>,
}

impl HandlerErr {
    pub fn bad_params(message: impl Into<String>) -> Self {
        HandlerErr {
            code: "bad_params",
            message: message.into(),
            details: None,
        }
    }

    pub fn not_found(what: &str) -> Self {
        HandlerErr {
            code: "not_found",
            message: format!("{what} not found"),
            details: None,
        }
    }

    pub fn response(self, id: &str) -> serde_json::Value {
        err(id, self.code, self.message, self.details)
    }
}

impl From<SchedError> for HandlerErr {
    fn from(e: SchedError) -> Self {
        let code = e.code();
        if e.is_internal() {
            error!("{code}: {e:#}");
            return HandlerErr {
                code,
                message: "internal error, see daemon log".to_string(),
                details: None,
            };
        }
        let details = match &e {
            SchedError::InvalidTransition { from, to } => Some(json!({ "from": from, "to": to })),
            _ => None,
        };
        HandlerErr {
            code,
            message: e.to_string(),
            details,
        }
    }
}

impl From<rusqlite::Error> for HandlerErr {
    fn from(e: rusqlite::Error) -> Self {
        SchedError::Db(e).into()
    }
}

impl From<anyhow::Error> for HandlerErr {
    fn from(e: anyhow::Error) -> Self {
        SchedError::Internal(e).into()
    }
}
