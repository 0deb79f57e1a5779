use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Sqlx(#[from] sqlx::Error),

    #[error(transparent)]
    Migrate(#[from] sqlx::migrate::MigrateError),

    /// A target that is neither a callable nor a `module.symbol` string.
    #[error("{target} is not callable: {reason}")]
    TypeMismatch { target: String, reason: String },

    /// A `module.symbol` string that does not resolve to a known function.
    #[error("cannot import {path}: {reason}")]
    ImportFailure { path: String, reason: String },

    /// A registry entry that already carries a database identity.
    #[error("Task {task_id} has already been registered")]
    AlreadyRegistered { task_id: i64 },

    #[error("invalid schedule suffix {suffix:?}: {reason}")]
    InvalidSuffix { suffix: String, reason: String },

    #[error("task not found: {task_id}")]
    TaskNotFound { task_id: i64 },

    #[error("schedule not found: {schedule_id}")]
    ScheduleNotFound { schedule_id: i64 },

    #[error("{message}")]
    Message { message: String },

    #[error("{context}: {source}")]
    External {
        context: String,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },
}

impl Error {
    #[must_use]
    pub fn message(message: impl Into<String>) -> Self {
        Self::Message {
            message: message.into(),
        }
    }

    #[must_use]
    pub fn type_mismatch(target: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::TypeMismatch {
            target: target.into(),
            reason: reason.into(),
        }
    }

    #[must_use]
    pub fn import_failure(path: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::ImportFailure {
            path: path.into(),
            reason: reason.into(),
        }
    }

    #[must_use]
    pub fn invalid_suffix(suffix: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidSuffix {
            suffix: suffix.into(),
            reason: reason.into(),
        }
    }

    #[must_use]
    pub fn external(
        context: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::External {
            context: context.into(),
            source: Box::new(source),
        }
    }
}

impl qregistry_common::FromMessage for Error {
    fn from_message(message: String) -> Self {
        Self::Message { message }
    }
}

pub type Result<T> = std::result::Result<T, Error>;

qregistry_common::impl_context!();
