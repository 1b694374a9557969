// Crate-wide error type

use crate::drive::EncodingError;
use crate::failsafe::FailsafeError;
use crate::link::LinkError;

#[derive(Debug, thiserror::Error)]
pub enum ControlError {
    #[error("Encoding error: {0}")]
    Encoding(#[from] EncodingError),

    #[error(transparent)]
    Link(#[from] LinkError),

    #[error(transparent)]
    Failsafe(#[from] FailsafeError),
}

pub type Result<T> = std::result::Result<T, ControlError>;
