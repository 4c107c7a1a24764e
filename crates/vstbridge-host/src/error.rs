//! Error types for the host process.

use std::path::PathBuf;
use thiserror::Error;
use vstbridge_protocol::Status;

/// Where a plugin load attempt failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadStage {
    Resolving,
    Linking,
    Factory,
    ClassScan,
    Instantiation,
    Initialization,
}

impl std::fmt::Display for LoadStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LoadStage::Resolving => write!(f, "resolving bundle"),
            LoadStage::Linking => write!(f, "linking module"),
            LoadStage::Factory => write!(f, "getting factory"),
            LoadStage::ClassScan => write!(f, "scanning classes"),
            LoadStage::Instantiation => write!(f, "creating instance"),
            LoadStage::Initialization => write!(f, "initializing component"),
        }
    }
}

#[derive(Error, Debug)]
pub enum HostError {
    #[error("plugin load failed while {stage}: {path}\n  reason: {reason}")]
    LoadFailed {
        path: PathBuf,
        stage: LoadStage,
        reason: String,
    },

    #[error("no plugin loaded")]
    NotLoaded,

    #[error("audio not initialized")]
    NotInitialized,

    #[error("invalid parameter: {0}")]
    InvalidParam(String),

    #[error("shared memory error: {0}")]
    SharedMemory(String),

    #[error("plugin interface absent: {0}")]
    InterfaceAbsent(&'static str),

    #[error("audio engine error: {0}")]
    Audio(String),

    #[error("process call failed: code {0:#x}")]
    ProcessFailed(i32),

    #[error("editor error: {0}")]
    Editor(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl HostError {
    /// The wire status this error maps to. Recoverable errors keep the
    /// session; the caller replies with this status and carries on.
    pub fn status(&self) -> Status {
        match self {
            HostError::NotLoaded => Status::NotLoaded,
            HostError::NotInitialized => Status::NotInitialized,
            HostError::InvalidParam(_) => Status::InvalidParam,
            _ => Status::Error,
        }
    }
}

pub type Result<T> = std::result::Result<T, HostError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_mapping() {
        assert_eq!(HostError::NotLoaded.status(), Status::NotLoaded);
        assert_eq!(HostError::NotInitialized.status(), Status::NotInitialized);
        assert_eq!(
            HostError::InvalidParam("x".into()).status(),
            Status::InvalidParam
        );
        assert_eq!(HostError::ProcessFailed(1).status(), Status::Error);
        assert_eq!(
            HostError::InterfaceAbsent("edit controller").status(),
            Status::Error
        );
    }

    #[test]
    fn load_stage_display() {
        assert_eq!(LoadStage::Resolving.to_string(), "resolving bundle");
        assert_eq!(LoadStage::Factory.to_string(), "getting factory");
        assert_eq!(LoadStage::Instantiation.to_string(), "creating instance");
    }
}
