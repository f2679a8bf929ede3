use actix_web::{error::BlockingError, http::StatusCode, HttpResponse, ResponseError};
use serde::Serialize;
use thiserror::Error;

/// Message body shared by every error response.
#[derive(Debug, Serialize)]
pub struct Res {
    pub message: String,
}

#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("この時間帯は満員です")]
    SlotFull { event_id: i32, event_time: String },

    #[error("この企画は既に予約済みです")]
    AlreadyReserved,

    #[error("このニックネームは既に使用されています")]
    NicknameTaken,

    #[error("{0}")]
    Validation(String),

    #[error("ユーザーIDが不正です")]
    InvalidUserId,

    #[error("ログインが必要です")]
    MissingIdentity,

    #[error("パスワードが違います")]
    InvalidCredentials,

    #[error("{0}が見つかりません")]
    NotFound(&'static str),

    #[error("database error: {0}")]
    Database(#[from] diesel::result::Error),

    #[error("connection pool error: {0}")]
    Pool(#[from] r2d2::Error),

    #[error("blocking task failed")]
    Blocking(#[from] BlockingError),

    #[error("malformed stored data: {0}")]
    Json(#[from] serde_json::Error),
}

impl ServiceError {
    pub fn validation(message: impl Into<String>) -> Self {
        ServiceError::Validation(message.into())
    }

    fn is_internal(&self) -> bool {
        matches!(
            self,
            ServiceError::Database(_) | ServiceError::Pool(_) | ServiceError::Blocking(_) | ServiceError::Json(_)
        )
    }
}

impl ResponseError for ServiceError {
    fn status_code(&self) -> StatusCode {
        match self {
            ServiceError::SlotFull { .. } | ServiceError::AlreadyReserved | ServiceError::NicknameTaken => {
                StatusCode::CONFLICT
            }
            ServiceError::Validation(_) | ServiceError::InvalidUserId => StatusCode::BAD_REQUEST,
            ServiceError::MissingIdentity | ServiceError::InvalidCredentials => StatusCode::UNAUTHORIZED,
            ServiceError::NotFound(_) => StatusCode::NOT_FOUND,
            ServiceError::Database(_) | ServiceError::Pool(_) | ServiceError::Blocking(_) | ServiceError::Json(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    fn error_response(&self) -> HttpResponse {
        // Infrastructure details stay in the log
        let message = if self.is_internal() {
            log::error!("request failed: {:?}", self);
            "通信エラーが発生しました。時間をおいて再度お試しください".to_string()
        } else {
            self.to_string()
        };

        HttpResponse::build(self.status_code()).json(Res { message })
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("{0} should be set")]
    Missing(&'static str),

    #[error("invalid value for {key}: {reason}")]
    Invalid { key: &'static str, reason: String },
}

#[derive(Debug, Error)]
pub enum CatalogError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse {path}: {source}")]
    Parse {
        path: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("invalid event {id}: {reason}")]
    InvalidEvent { id: i32, reason: String },

    #[error("duplicate {kind} id {id}")]
    DuplicateId { kind: &'static str, id: i32 },
}
