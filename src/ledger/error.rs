use thiserror::Error;

/// Failure taxonomy shared by every ledger operation and both transports.
#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("{0}")]
    Validation(String),

    #[error("{0}")]
    InvalidArgument(String),

    #[error("{0}")]
    NotFound(String),

    #[error("installment {0} has already been paid")]
    AlreadyPaid(String),

    #[error("{0}")]
    NoOp(String),

    #[error("{0}")]
    Consistency(String),

    #[error("{0}")]
    InvalidState(String),

    #[error("internal error: {0:#}")]
    Internal(#[from] anyhow::Error),
}

impl LedgerError {
    /// Machine-readable kind carried in every failure envelope.
    pub fn kind(&self) -> &'static str {
        match self {
            LedgerError::Validation(_) => "validation",
            LedgerError::InvalidArgument(_) => "invalid_argument",
            LedgerError::NotFound(_) => "not_found",
            LedgerError::AlreadyPaid(_) => "already_paid",
            LedgerError::NoOp(_) => "no_op",
            LedgerError::Consistency(_) => "consistency",
            LedgerError::InvalidState(_) => "invalid_state",
            LedgerError::Internal(_) => "internal",
        }
    }

    pub fn validation(message: impl Into<String>) -> Self {
        LedgerError::Validation(message.into())
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        LedgerError::NotFound(message.into())
    }
}

pub type Result<T> = std::result::Result<T, LedgerError>;
