//! Per-standard delivery system adapters. Each adapter turns the logical
//! tuning parameters into the frontend property sequence:
//! CLEAR, the DiSEqC switch dialogue (satellite only), the
//! system-specific property list, TUNE.

mod dvbc;
mod dvbs;
mod dvbt;

pub use dvbc::Dvbc;
pub use dvbs::Dvbs;
pub use dvbt::Dvbt;

use crate::device::StreamId;
use crate::error::TuneError;
use crate::fe::sys::fe_delivery_system;
use crate::fe::FeDevice;
use crate::tuning::TuningParams;

pub trait DeliverySystem: Send + Sync {
    fn capable_of(&self, system: fe_delivery_system) -> bool;

    /// One tune attempt; the frontend retries around this
    fn tune(
        &self,
        stream_id: StreamId,
        fe: &FeDevice,
        params: &TuningParams,
    ) -> Result<(), TuneError>;
}
