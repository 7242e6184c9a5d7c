//! Fleet error types

use crate::jobs::JobStoreError;
use thermal_printer::PrintError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum FleetError {
    /// Encoding or transport failure
    #[error(transparent)]
    Print(#[from] PrintError),

    /// Durable job store failure
    #[error(transparent)]
    Store(#[from] JobStoreError),

    /// Unknown job id or printer ip
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),
}

impl FleetError {
    pub fn invalid(msg: impl Into<String>) -> Self {
        Self::InvalidArgument(msg.into())
    }

    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            Self::NotFound(_) | Self::Print(PrintError::NotFound(_))
        )
    }

    pub fn is_invalid_argument(&self) -> bool {
        matches!(
            self,
            Self::InvalidArgument(_) | Self::Print(PrintError::InvalidArgument(_))
        )
    }
}

pub type FleetResult<T> = Result<T, FleetError>;
