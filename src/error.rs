//! Crate-wide error type.
//! Recoverable per-cycle conditions (board not visible, awaiting
//! calibration, opponent's turn) are modeled as states, not errors;
//! only genuine faults end up here.

use std::time::Duration;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("screen capture failed: {0}")]
    Capture(String),

    #[error("no monitors found")]
    NoMonitor,

    #[error("config file {path}: {reason}")]
    Config { path: String, reason: String },

    #[error("template store: {0}")]
    Template(String),

    #[error(
        "engine binary not found; install stockfish or pass --engine with an explicit path"
    )]
    EngineNotFound,

    #[error("failed to start engine: {0}")]
    EngineSpawn(#[source] std::io::Error),

    #[error("engine protocol error: {0}")]
    EngineProtocol(String),

    #[error("engine did not answer within {0:?}")]
    EngineTimeout(Duration),

    #[error("malformed move notation: {0}")]
    InvalidMove(String),
}

pub type Result<T> = std::result::Result<T, Error>;
