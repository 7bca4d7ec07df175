//! Kernel ABI for the DVB demux device (`linux/dvb/dmx.h`)

use bitflags::bitflags;
use strum::FromRepr;

pub use {DmxInput::*, DmxOutput::*, DmxTsPes::*};

/// Output of the demux
#[repr(u32)]
#[allow(non_camel_case_types)]
#[derive(Debug, Copy, Clone, PartialEq, Eq, FromRepr)]
pub enum DmxOutput {
    /// Streaming directly to decoder
    DMX_OUT_DECODER = 0,
    /// Output going to a memory buffer, read back from this demux device
    DMX_OUT_TAP = 1,
    /// Output multiplexed into a new TS, read back from the logical DVR
    /// device which carries all filters set up with this output
    DMX_OUT_TS_TAP = 2,
    /// Like DMX_OUT_TS_TAP but retrieved from the demux device
    DMX_OUT_TSDEMUX_TAP = 3,
}

/// Input of the demux
#[repr(u32)]
#[allow(non_camel_case_types)]
#[derive(Debug, Copy, Clone, PartialEq, Eq, FromRepr)]
pub enum DmxInput {
    DMX_IN_FRONTEND = 0,
    DMX_IN_DVR = 1,
}

/// PES filter type
#[repr(u32)]
#[allow(non_camel_case_types)]
#[derive(Debug, Copy, Clone, PartialEq, Eq, FromRepr)]
pub enum DmxTsPes {
    DMX_PES_AUDIO0 = 0,
    DMX_PES_VIDEO0 = 1,
    DMX_PES_TELETEXT0 = 2,
    DMX_PES_SUBTITLE0 = 3,
    DMX_PES_PCR0 = 4,
    DMX_PES_AUDIO1 = 5,
    DMX_PES_VIDEO1 = 6,
    DMX_PES_TELETEXT1 = 7,
    DMX_PES_SUBTITLE1 = 8,
    DMX_PES_PCR1 = 9,
    DMX_PES_AUDIO2 = 10,
    DMX_PES_VIDEO2 = 11,
    DMX_PES_TELETEXT2 = 12,
    DMX_PES_SUBTITLE2 = 13,
    DMX_PES_PCR2 = 14,
    DMX_PES_AUDIO3 = 15,
    DMX_PES_VIDEO3 = 16,
    DMX_PES_TELETEXT3 = 17,
    DMX_PES_SUBTITLE3 = 18,
    DMX_PES_PCR3 = 19,
    /// any other PID
    DMX_PES_OTHER = 20,
}

bitflags! {
    /// Flags for the demux filter
    #[repr(C)]
    pub struct DmxFilterFlags : u32 {
        /// Only deliver sections where the CRC check succeeded
        const DMX_CHECK_CRC = 1;
        /// Disable the filter after one section has been delivered
        const DMX_ONESHOT = 2;
        /// Start filtering without waiting for a `DMX_START`
        const DMX_IMMEDIATE_START = 4;
    }
}

/// Packetized Elementary Stream filter parameters; filtering is by PID
/// only, no header or payload matching
#[repr(C)]
#[derive(Debug, Copy, Clone)]
pub struct DmxPesFilterParams {
    /// PID to be filtered. 8192 passes the whole multiplex
    pub pid: u16,
    pub input: DmxInput,
    pub output: DmxOutput,
    pub pes_type: DmxTsPes,
    pub flags: DmxFilterFlags,
}
