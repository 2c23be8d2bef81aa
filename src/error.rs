#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum InputError {
    #[error("{field} must not be negative (got {value})")]
    Negative { field: &'static str, value: i64 },

    #[error("attended ({attended}) exceeds conducted ({conducted}) for {course}")]
    AttendedExceedsConducted {
        course: String,
        attended: i64,
        conducted: i64,
    },

    #[error("present ({present}) exceeds total ({total})")]
    PresentExceedsTotal { present: i64, total: i64 },

    #[error("target percentage must be a number between 0 and 100 (got {0})")]
    TargetOutOfRange(f64),
}

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Migration failed: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    #[error("Failed to decode stored value for {key}: {source}")]
    Decode {
        key: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("Failed to encode value for {key}: {source}")]
    Encode {
        key: String,
        #[source]
        source: serde_json::Error,
    },
}

#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error("HTTP request failed: {0}")]
    Request(#[from] reqwest::Error),

    // user-facing text from the backend
    #[error("{0}")]
    Rejected(String),

    #[error("Unexpected response from ERP backend: {0}")]
    Malformed(String),

    #[error("Request superseded by a newer one")]
    Superseded,
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("{0} must be set")]
    Missing(&'static str),

    #[error("{name} has an invalid value {value:?}")]
    Invalid { name: &'static str, value: String },
}
