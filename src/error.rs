//! Error kinds surfaced at the crate API boundary.
//!
//! ioctl-level detail stays in `anyhow` context chains; these enums name
//! the conditions the signalling layer is expected to distinguish.

use thiserror::Error;

use crate::fe::sys::fe_delivery_system;

/// A single tune attempt through a delivery-system adapter failed
#[derive(Error, Debug)]
pub enum TuneError {
    #[error("frontend device could not be opened")]
    DeviceOpen(#[source] anyhow::Error),
    #[error("frontend rejected the property sequence")]
    PropertySet(#[source] anyhow::Error),
    #[error("DiSEqC switch sequence failed")]
    Diseqc(#[source] anyhow::Error),
    #[error("no adapter for delivery system {0}")]
    UnsupportedSystem(fe_delivery_system),
}

/// A frontend operation exhausted its retry budget
#[derive(Error, Debug)]
pub enum FrontendError {
    #[error("tuning failed after retries")]
    TuneFailed(#[source] TuneError),
    #[error("DVR tap could not be opened")]
    TapOpen(#[source] anyhow::Error),
    #[error("PES filter setup failed for PID {pid}")]
    FilterSetup {
        pid: u16,
        #[source]
        source: anyhow::Error,
    },
}

/// Probing a tuner at startup failed; the tuner is excluded from the pool
#[derive(Error, Debug)]
#[error("tuner unavailable: {path}")]
pub struct DeviceUnavailable {
    pub path: String,
    #[source]
    pub source: anyhow::Error,
}

/// Stream facade failures reported to the signalling layer
#[derive(Error, Debug)]
pub enum StreamError {
    #[error("streaming worker could not be spawned")]
    Spawn(#[source] std::io::Error),
    #[error("worker did not acknowledge pause in time")]
    PauseTimeout,
    #[error(transparent)]
    Frontend(#[from] FrontendError),
}
