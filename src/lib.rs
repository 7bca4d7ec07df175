//! Bridges local DVB tuners to remote clients: tune a multiplex, filter
//! the requested PIDs through the kernel demux, frame the transport
//! stream into RTP packets and push them over UDP, reporting signal
//! state on demand.
//!
//! The building blocks, bottom up: [`fe`] and [`dmx`] wrap the Linux
//! DVB-API v5 character devices; [`delivery`] turns logical tuning
//! parameters into frontend property sequences; [`tuner`] combines one
//! frontend/dvr/demux triple into a [`device::Device`]; [`stream`]
//! owns the per-stream pipeline (frontend state machine, packet ring,
//! streaming worker, client binding).

pub mod delivery;
pub mod descramble;
pub mod device;
pub mod dmx;
pub mod error;
pub mod fe;
pub mod rtp;
pub mod stream;
pub mod tuner;
pub mod tuning;

pub use {
    descramble::Descrambler,
    device::{enumerate, Device, SignalStats, StreamId, TunerPaths},
    error::{FrontendError, StreamError, TuneError},
    fe::FeDevice,
    rtp::{PacketBuffer, Ring},
    stream::{Frontend, Stream, StreamClient, StreamState},
    tuner::{DvbTuner, TunerConfig},
    tuning::{DeliveryParams, Lnb, PidTable, Polarization, TuningParams},
};
