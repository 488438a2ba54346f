use crate::hw::error_fmt::ca_error;
use thiserror::Error;

pub type OsStatus = i32;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum DeviceError {
    #[error("no CoreAudio device bound")]
    Unbound,

    #[error("{}", ca_error(.op, *.status))]
    Hardware { op: &'static str, status: OsStatus },

    #[error("{0} already registered")]
    AlreadyRegistered(&'static str),

    #[error("no {0} registered")]
    NotRegistered(&'static str),

    #[error("device does not support changing {0}")]
    Unsupported(&'static str),

    #[error("invalid {0}")]
    InvalidArgument(&'static str),

    #[error("{what}: expected {expected}, hardware reports {reported}")]
    VerificationMismatch {
        what: &'static str,
        expected: String,
        reported: String,
    },
}

impl DeviceError {
    pub fn hardware(op: &'static str, status: OsStatus) -> Self {
        DeviceError::Hardware { op, status }
    }
}
