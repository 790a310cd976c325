use serde_json::json;

use crate::snapshot::SnapshotError;

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

#[derive(Debug, thiserror::Error)]
#[error("{code}: {message}")]
pub struct HandlerErr {
    pub code: &'static str,
    pub message: String,
    pub details: Option<serde_json::Value>,
}

impl HandlerErr {
    pub fn new(code: &'static str, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            details: None,
        }
    }

    pub fn with_details(mut self, details: serde_json::Value) -> Self {
        self.details = Some(details);
        self
    }

    pub fn bad_params(message: impl Into<String>) -> Self {
        Self::new("bad_params", message)
    }

    pub fn not_found(what: &str) -> Self {
        Self::new("not_found", format!("{} not found", what))
    }

    pub fn forbidden(message: impl Into<String>) -> Self {
        Self::new("forbidden", message)
    }

    /// Write failures; unique/foreign key violations surface as `conflict`.
    pub fn db_write(e: rusqlite::Error, table: &str) -> Self {
        let code = if e.sqlite_error_code() == Some(rusqlite::ErrorCode::ConstraintViolation) {
            "conflict"
        } else {
            "db_update_failed"
        };
        Self::new(code, e.to_string()).with_details(json!({ "table": table }))
    }

    pub fn response(self, id: &str) -> serde_json::Value {
        err(id, self.code, self.message, self.details)
    }
}

impl From<rusqlite::Error> for HandlerErr {
    fn from(e: rusqlite::Error) -> Self {
        Self::new("db_query_failed", e.to_string())
    }
}

impl From<SnapshotError> for HandlerErr {
    fn from(e: SnapshotError) -> Self {
        match e {
            SnapshotError::NotFound(what) => Self::not_found(what),
            SnapshotError::BadStoredValue { table, value } => {
                Self::new("db_query_failed", format!("invalid stored value: {}", value))
                    .with_details(json!({ "table": table }))
            }
            SnapshotError::Db(e) => e.into(),
        }
    }
}
