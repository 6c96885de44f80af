use thiserror::Error;
use warp::http::StatusCode;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DispatchError {
  #[error("invalid or missing callbox token")]
  Unauthorized,

  #[error("{0}")]
  Validation(String),

  #[error("callbox not found: {0}, register first")]
  WorkerNotFound(String),

  #[error("transaction not found: {0}")]
  TransactionNotFound(String),

  #[error("transaction {transaction_id} is assigned to another callbox")]
  OwnershipConflict {
    transaction_id: String,
    assigned_to: Option<String>,
    callbox_id: String,
  },

  #[error("configuration error: {0}")]
  Config(String),
}

impl DispatchError {
  pub fn status_code(&self) -> StatusCode {
    match self {
      DispatchError::Unauthorized => StatusCode::UNAUTHORIZED,
      DispatchError::Validation(_) => StatusCode::BAD_REQUEST,
      DispatchError::WorkerNotFound(_) | DispatchError::TransactionNotFound(_) => StatusCode::NOT_FOUND,
      DispatchError::OwnershipConflict { .. } => StatusCode::FORBIDDEN,
      DispatchError::Config(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
  }

  pub fn code(&self) -> &'static str {
    match self {
      DispatchError::Unauthorized => "UNAUTHORIZED",
      DispatchError::Validation(_) => "VALIDATION_ERROR",
      DispatchError::WorkerNotFound(_) => "CALLBOX_NOT_FOUND",
      DispatchError::TransactionNotFound(_) => "TRANSACTION_NOT_FOUND",
      DispatchError::OwnershipConflict { .. } => "OWNERSHIP_CONFLICT",
      DispatchError::Config(_) => "CONFIG_ERROR",
    }
  }
}

impl warp::reject::Reject for DispatchError {}

pub type Result<T> = std::result::Result<T, DispatchError>;
