use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadStage {
    Bundle,
    Library,
    Factory,
    Component,
    Controller,
    Initialization,
}

impl std::fmt::Display for LoadStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LoadStage::Bundle => write!(f, "resolving bundle"),
            LoadStage::Library => write!(f, "opening library"),
            LoadStage::Factory => write!(f, "getting factory"),
            LoadStage::Component => write!(f, "creating component"),
            LoadStage::Controller => write!(f, "creating controller"),
            LoadStage::Initialization => write!(f, "initializing"),
        }
    }
}

/// Which half of a persisted plugin state a failure refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StateSegment {
    Component,
    Controller,
}

impl std::fmt::Display for StateSegment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StateSegment::Component => write!(f, "component"),
            StateSegment::Controller => write!(f, "controller"),
        }
    }
}

#[derive(Error, Debug)]
pub enum BridgeError {
    #[error("VST3 module load failed at {stage} stage: {path}\n  Reason: {reason}")]
    ModuleLoad {
        path: PathBuf,
        stage: LoadStage,
        reason: String,
    },

    #[error("Plugin instantiation failed: {0}")]
    Instantiation(String),

    #[error("Malformed plugin state: {0}")]
    MalformedState(String),

    #[error("Plugin rejected {0} state")]
    StateRejected(StateSegment),

    #[error("Plugin failed to write {0} state")]
    StateUnavailable(StateSegment),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, BridgeError>;
