use thiserror::Error;

use crate::{header::HeaderError, plot::PlotError, profile::ProfileError, reference::ReferenceError};

#[derive(Debug, Error)]
pub enum SimError {
    #[error("IO error")]
    IoError(#[from] std::io::Error),
    #[error(transparent)]
    ProfileError(#[from] ProfileError),
    #[error(transparent)]
    HeaderError(#[from] HeaderError),
    #[error(transparent)]
    ReferenceError(#[from] ReferenceError),
    #[error(transparent)]
    PlotError(#[from] PlotError),
    #[error("Invalid loop configuration: {0}")]
    ConfigError(#[from] sw_pll::ConfigError),
    #[error("JSON error")]
    JsonError(#[from] serde_json::Error),
    #[error("Reference disagreed on {0} ticks")]
    NotEquivalent(usize),
    #[error("Loop never locked")]
    NeverLocked,
}
