//! Kernel ABI for the DVB frontend device (`linux/dvb/frontend.h`).
//!
//! Display strings on the tuning enums follow the SAT>IP attribute
//! encodings so they can be printed straight into describe strings and
//! parsed back from them.

use std::mem;
use std::os::raw::{c_char, c_void};

use anyhow::Context;
use bitflags::bitflags;
use strum::{Display, EnumString, FromRepr};

pub use {
    fe_code_rate::*, fe_delivery_system::*, fe_guard_interval::*, fe_hierarchy::*,
    fe_modulation::*, fe_pilot::*, fe_rolloff::*, fe_sec_mini_cmd::*, fe_sec_tone_mode::*,
    fe_sec_voltage::*, fe_spectral_inversion::*, fe_transmit_mode::*, fe_type::*,
};

bitflags! {
    /// Frontend capabilities
    #[repr(C)]
    pub struct fe_caps : u32 {
        const FE_IS_STUPID = 0x0;
        const FE_CAN_INVERSION_AUTO = 0x1;
        const FE_CAN_FEC_1_2 = 0x2;
        const FE_CAN_FEC_2_3 = 0x4;
        const FE_CAN_FEC_3_4 = 0x8;
        const FE_CAN_FEC_4_5 = 0x10;
        const FE_CAN_FEC_5_6 = 0x20;
        const FE_CAN_FEC_6_7 = 0x40;
        const FE_CAN_FEC_7_8 = 0x80;
        const FE_CAN_FEC_8_9 = 0x100;
        const FE_CAN_FEC_AUTO = 0x200;
        const FE_CAN_QPSK = 0x400;
        const FE_CAN_QAM_16 = 0x800;
        const FE_CAN_QAM_32 = 0x1000;
        const FE_CAN_QAM_64 = 0x2000;
        const FE_CAN_QAM_128 = 0x4000;
        const FE_CAN_QAM_256 = 0x8000;
        const FE_CAN_QAM_AUTO = 0x10000;
        const FE_CAN_TRANSMISSION_MODE_AUTO = 0x20000;
        const FE_CAN_BANDWIDTH_AUTO = 0x40000;
        const FE_CAN_GUARD_INTERVAL_AUTO = 0x80000;
        const FE_CAN_HIERARCHY_AUTO = 0x100000;
        const FE_CAN_8VSB = 0x200000;
        const FE_CAN_16VSB = 0x400000;
        const FE_HAS_EXTENDED_CAPS = 0x800000;
        const FE_CAN_MULTISTREAM = 0x4000000;
        const FE_CAN_TURBO_FEC = 0x8000000;
        const FE_CAN_2G_MODULATION = 0x10000000;
        const FE_NEEDS_BENDING = 0x20000000;
        const FE_CAN_RECOVER = 0x40000000;
        const FE_CAN_MUTE_TS = 0x80000000;
    }
}

bitflags! {
    /// Frontend lock status as reported by `FE_READ_STATUS`
    #[repr(C)]
    pub struct fe_status : u32 {
        const FE_NONE = 0x00;
        const FE_HAS_SIGNAL = 0x01;
        const FE_HAS_CARRIER = 0x02;
        const FE_HAS_VITERBI = 0x04;
        const FE_HAS_SYNC = 0x08;
        const FE_HAS_LOCK = 0x10;
        const FE_TIMEDOUT = 0x20;
        const FE_REINIT = 0x40;
    }
}

/// DEPRECATED frontend type, still needed to enumerate delivery systems
/// on kernels without `DTV_ENUM_DELSYS`
#[repr(u32)]
#[allow(non_camel_case_types)]
#[derive(Debug, PartialEq, Eq, Copy, Clone, FromRepr)]
pub enum fe_type {
    FE_QPSK = 0,
    FE_QAM = 1,
    FE_OFDM = 2,
    FE_ATSC = 3,
}

/// Frontend properties and capabilities, filled in by `FE_GET_INFO`.
/// Frequencies are in Hz for terrestrial/cable and kHz for satellite.
#[repr(C)]
#[derive(Debug)]
pub struct FeInfo {
    pub name: [c_char; 128],
    pub fe_type: fe_type,
    pub frequency_min: u32,
    pub frequency_max: u32,
    pub frequency_stepsize: u32,
    pub frequency_tolerance: u32,
    pub symbol_rate_min: u32,
    pub symbol_rate_max: u32,
    pub symbol_rate_tolerance: u32,
    pub notifier_delay: u32,
    pub caps: fe_caps,
}

impl Default for FeInfo {
    #[inline]
    fn default() -> Self {
        unsafe { mem::zeroed::<Self>() }
    }
}

/// DiSEqC master command: 3 byte header (framing, address, command) plus
/// up to 3 bytes of data
#[repr(C)]
#[derive(Debug)]
pub struct DiseqcMasterCmd {
    pub msg: [u8; 6],
    pub len: u8,
}

impl Default for DiseqcMasterCmd {
    #[inline]
    fn default() -> Self {
        unsafe { mem::zeroed::<Self>() }
    }
}

/// DC voltage used to feed the LNBf. 13V selects vertical/right circular
/// polarization, 18V horizontal/left circular.
#[repr(u32)]
#[allow(non_camel_case_types)]
#[derive(Debug, Copy, Clone, PartialEq, Eq, FromRepr)]
pub enum fe_sec_voltage {
    SEC_VOLTAGE_13 = 0,
    SEC_VOLTAGE_18 = 1,
    SEC_VOLTAGE_OFF = 2,
}

#[repr(u32)]
#[allow(non_camel_case_types)]
#[derive(Debug, Copy, Clone, PartialEq, Eq, FromRepr)]
pub enum fe_sec_tone_mode {
    SEC_TONE_ON = 0,
    SEC_TONE_OFF = 1,
}

/// Mini-DiSEqC 22kHz burst, selecting satellite A or B
#[repr(u32)]
#[allow(non_camel_case_types)]
#[derive(Debug, Copy, Clone, PartialEq, Eq, FromRepr)]
pub enum fe_sec_mini_cmd {
    SEC_MINI_A = 0,
    SEC_MINI_B = 1,
}

#[repr(u32)]
#[allow(non_camel_case_types)]
#[derive(Debug, Copy, Clone, PartialEq, Eq, FromRepr)]
pub enum fe_spectral_inversion {
    INVERSION_OFF = 0,
    INVERSION_ON = 1,
    INVERSION_AUTO = 2,
}

#[repr(u32)]
#[allow(non_camel_case_types)]
#[derive(Display, EnumString, Debug, Copy, Clone, PartialEq, Eq, FromRepr)]
pub enum fe_code_rate {
    #[strum(to_string = "none")]
    FEC_NONE = 0,
    #[strum(to_string = "1/2")]
    FEC_1_2 = 1,
    #[strum(to_string = "2/3")]
    FEC_2_3 = 2,
    #[strum(to_string = "3/4")]
    FEC_3_4 = 3,
    #[strum(to_string = "4/5")]
    FEC_4_5 = 4,
    #[strum(to_string = "5/6")]
    FEC_5_6 = 5,
    #[strum(to_string = "6/7")]
    FEC_6_7 = 6,
    #[strum(to_string = "7/8")]
    FEC_7_8 = 7,
    #[strum(to_string = "8/9")]
    FEC_8_9 = 8,
    #[strum(to_string = "auto")]
    FEC_AUTO = 9,
    #[strum(to_string = "3/5")]
    FEC_3_5 = 10,
    #[strum(to_string = "9/10")]
    FEC_9_10 = 11,
    #[strum(to_string = "2/5")]
    FEC_2_5 = 12,
    #[strum(to_string = "1/4")]
    FEC_1_4 = 13,
    #[strum(to_string = "1/3")]
    FEC_1_3 = 14,
}

/// Modulation/constellation. Display strings are the SAT>IP `mtype`
/// encodings.
#[repr(u32)]
#[allow(non_camel_case_types)]
#[derive(Display, EnumString, Debug, Copy, Clone, PartialEq, Eq, FromRepr)]
pub enum fe_modulation {
    #[strum(to_string = "qpsk")]
    QPSK = 0,
    #[strum(to_string = "16qam")]
    QAM_16 = 1,
    #[strum(to_string = "32qam")]
    QAM_32 = 2,
    #[strum(to_string = "64qam")]
    QAM_64 = 3,
    #[strum(to_string = "128qam")]
    QAM_128 = 4,
    #[strum(to_string = "256qam")]
    QAM_256 = 5,
    #[strum(to_string = "auto")]
    QAM_AUTO = 6,
    #[strum(to_string = "8vsb")]
    VSB_8 = 7,
    #[strum(to_string = "16vsb")]
    VSB_16 = 8,
    #[strum(to_string = "8psk")]
    PSK_8 = 9,
    #[strum(to_string = "16apsk")]
    APSK_16 = 10,
    #[strum(to_string = "32apsk")]
    APSK_32 = 11,
    #[strum(to_string = "dqpsk")]
    DQPSK = 12,
    #[strum(to_string = "4qamnr")]
    QAM_4_NR = 13,
}

#[repr(u32)]
#[allow(non_camel_case_types)]
#[derive(Display, EnumString, Debug, Copy, Clone, PartialEq, Eq, FromRepr)]
pub enum fe_transmit_mode {
    #[strum(to_string = "2k")]
    TRANSMISSION_MODE_2K = 0,
    #[strum(to_string = "8k")]
    TRANSMISSION_MODE_8K = 1,
    #[strum(to_string = "auto")]
    TRANSMISSION_MODE_AUTO = 2,
    #[strum(to_string = "4k")]
    TRANSMISSION_MODE_4K = 3,
    #[strum(to_string = "1k")]
    TRANSMISSION_MODE_1K = 4,
    #[strum(to_string = "16k")]
    TRANSMISSION_MODE_16K = 5,
    #[strum(to_string = "32k")]
    TRANSMISSION_MODE_32K = 6,
    #[strum(to_string = "c1")]
    TRANSMISSION_MODE_C1 = 7,
    #[strum(to_string = "c3780")]
    TRANSMISSION_MODE_C3780 = 8,
}

/// Guard interval. Display strings are the SAT>IP `gi` encodings
/// (fraction with the slash elided).
#[repr(u32)]
#[allow(non_camel_case_types)]
#[derive(Display, EnumString, Debug, Copy, Clone, PartialEq, Eq, FromRepr)]
pub enum fe_guard_interval {
    #[strum(to_string = "132")]
    GUARD_INTERVAL_1_32 = 0,
    #[strum(to_string = "116")]
    GUARD_INTERVAL_1_16 = 1,
    #[strum(to_string = "18")]
    GUARD_INTERVAL_1_8 = 2,
    #[strum(to_string = "14")]
    GUARD_INTERVAL_1_4 = 3,
    #[strum(to_string = "auto")]
    GUARD_INTERVAL_AUTO = 4,
    #[strum(to_string = "1128")]
    GUARD_INTERVAL_1_128 = 5,
    #[strum(to_string = "19128")]
    GUARD_INTERVAL_19_128 = 6,
    #[strum(to_string = "19256")]
    GUARD_INTERVAL_19_256 = 7,
}

#[repr(u32)]
#[allow(non_camel_case_types)]
#[derive(Display, EnumString, Debug, Copy, Clone, PartialEq, Eq, FromRepr)]
pub enum fe_hierarchy {
    #[strum(to_string = "none")]
    HIERARCHY_NONE = 0,
    #[strum(to_string = "1")]
    HIERARCHY_1 = 1,
    #[strum(to_string = "2")]
    HIERARCHY_2 = 2,
    #[strum(to_string = "4")]
    HIERARCHY_4 = 3,
    #[strum(to_string = "auto")]
    HIERARCHY_AUTO = 4,
}

#[repr(u32)]
#[allow(non_camel_case_types)]
#[derive(Display, EnumString, Debug, Copy, Clone, PartialEq, Eq, FromRepr)]
pub enum fe_pilot {
    #[strum(to_string = "on")]
    PILOT_ON = 0,
    #[strum(to_string = "off")]
    PILOT_OFF = 1,
    #[strum(to_string = "auto")]
    PILOT_AUTO = 2,
}

#[repr(u32)]
#[allow(non_camel_case_types)]
#[derive(Display, EnumString, Debug, Copy, Clone, PartialEq, Eq, FromRepr)]
pub enum fe_rolloff {
    #[strum(to_string = "0.35")]
    ROLLOFF_35 = 0,
    #[strum(to_string = "0.20")]
    ROLLOFF_20 = 1,
    #[strum(to_string = "0.25")]
    ROLLOFF_25 = 2,
    #[strum(to_string = "auto")]
    ROLLOFF_AUTO = 3,
}

/// Delivery systems. Display strings are the SAT>IP `msys` encodings.
#[repr(u32)]
#[allow(non_camel_case_types)]
#[derive(Display, EnumString, Debug, Copy, Clone, PartialEq, Eq, FromRepr, Hash)]
pub enum fe_delivery_system {
    #[strum(to_string = "none")]
    SYS_UNDEFINED = 0,
    #[strum(to_string = "dvbc")]
    SYS_DVBC_ANNEX_A = 1,
    #[strum(to_string = "dvbcb")]
    SYS_DVBC_ANNEX_B = 2,
    #[strum(to_string = "dvbt")]
    SYS_DVBT = 3,
    #[strum(to_string = "dss")]
    SYS_DSS = 4,
    #[strum(to_string = "dvbs")]
    SYS_DVBS = 5,
    #[strum(to_string = "dvbs2")]
    SYS_DVBS2 = 6,
    #[strum(to_string = "dvbh")]
    SYS_DVBH = 7,
    #[strum(to_string = "isdbt")]
    SYS_ISDBT = 8,
    #[strum(to_string = "isdbs")]
    SYS_ISDBS = 9,
    #[strum(to_string = "isdbc")]
    SYS_ISDBC = 10,
    #[strum(to_string = "atsc")]
    SYS_ATSC = 11,
    #[strum(to_string = "atscmh")]
    SYS_ATSCMH = 12,
    #[strum(to_string = "dtmb")]
    SYS_DTMB = 13,
    #[strum(to_string = "cmmb")]
    SYS_CMMB = 14,
    #[strum(to_string = "dab")]
    SYS_DAB = 15,
    #[strum(to_string = "dvbt2")]
    SYS_DVBT2 = 16,
    #[strum(to_string = "turbo")]
    SYS_TURBO = 17,
    #[strum(to_string = "dvbcc")]
    SYS_DVBC_ANNEX_C = 18,
    #[strum(to_string = "dvbc2")]
    SYS_DVBC2 = 19,
}

/* DTV property commands (the subset this crate emits or queries) */

pub const DTV_UNDEFINED: u32 = 0;
pub const DTV_TUNE: u32 = 1;
pub const DTV_CLEAR: u32 = 2;
pub const DTV_FREQUENCY: u32 = 3;
pub const DTV_MODULATION: u32 = 4;
pub const DTV_BANDWIDTH_HZ: u32 = 5;
pub const DTV_INVERSION: u32 = 6;
pub const DTV_SYMBOL_RATE: u32 = 8;
pub const DTV_INNER_FEC: u32 = 9;
pub const DTV_VOLTAGE: u32 = 10;
pub const DTV_TONE: u32 = 11;
pub const DTV_PILOT: u32 = 12;
pub const DTV_ROLLOFF: u32 = 13;
pub const DTV_DELIVERY_SYSTEM: u32 = 17;
pub const DTV_API_VERSION: u32 = 35;
pub const DTV_CODE_RATE_HP: u32 = 36;
pub const DTV_CODE_RATE_LP: u32 = 37;
pub const DTV_GUARD_INTERVAL: u32 = 38;
pub const DTV_TRANSMISSION_MODE: u32 = 39;
pub const DTV_HIERARCHY: u32 = 40;
pub const DTV_STREAM_ID: u32 = 42;
pub const DTV_ENUM_DELSYS: u32 = 44;

/// num of properties cannot exceed DTV_IOCTL_MAX_MSGS per ioctl
pub const DTV_IOCTL_MAX_MSGS: usize = 64;

pub const MAX_DTV_STATS: usize = 4;

#[repr(C, packed)]
#[derive(Copy, Clone)]
pub struct DtvStat {
    pub scale: u8,
    pub value: i64,
}

#[repr(C, packed)]
#[derive(Copy, Clone)]
pub struct DtvFeStats {
    pub len: u8,
    pub stat: [DtvStat; MAX_DTV_STATS],
}

#[repr(C)]
#[derive(Copy, Clone)]
pub struct DtvPropertyBuffer {
    pub data: [u8; 32],
    pub len: u32,
    __reserved1: [u32; 3],
    __reserved2: *mut c_void,
}

#[repr(C)]
#[derive(Copy, Clone)]
pub union DtvPropertyData {
    pub data: u32,
    pub st: DtvFeStats,
    pub buffer: DtvPropertyBuffer,
}

/// One slot of a `FE_SET_PROPERTY`/`FE_GET_PROPERTY` command sequence,
/// laid out exactly like `struct dtv_property`
#[repr(C, packed)]
#[derive(Copy, Clone)]
pub struct DtvProperty {
    pub cmd: u32,
    __reserved: [u32; 3],
    pub u: DtvPropertyData,
    pub result: i32,
}

impl DtvProperty {
    /// Property carrying a plain `u32` argument
    #[inline]
    pub fn new(cmd: u32, data: u32) -> Self {
        let mut p = unsafe { mem::zeroed::<Self>() };
        p.cmd = cmd;
        p.u.data = data;
        p
    }

    /// Property with no argument (`DTV_TUNE`, `DTV_CLEAR`, queries)
    #[inline]
    pub fn query(cmd: u32) -> Self {
        Self::new(cmd, 0)
    }

    #[inline]
    pub fn data(&self) -> u32 {
        unsafe { self.u.data }
    }

    /// Interprets the property buffer as a `DTV_ENUM_DELSYS` reply
    pub fn delivery_systems(&self) -> anyhow::Result<Vec<fe_delivery_system>> {
        let buffer = unsafe { self.u.buffer };
        let len = std::cmp::min(buffer.len as usize, buffer.data.len());
        buffer.data[..len]
            .iter()
            .map(|&v| {
                fe_delivery_system::from_repr(v as u32)
                    .with_context(|| format!("FE: unknown delivery system {}", v))
            })
            .collect()
    }
}

#[repr(C)]
pub struct DtvProperties {
    pub num: u32,
    pub props: *mut DtvProperty,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    #[cfg(target_pointer_width = "64")]
    fn property_layout_matches_kernel() {
        // struct dtv_property is packed: 4 (cmd) + 12 (reserved)
        // + 56 (union, sized by the buffer arm) + 4 (result)
        assert_eq!(mem::size_of::<DtvPropertyData>(), 56);
        assert_eq!(mem::size_of::<DtvProperty>(), 76);
    }

    #[test]
    fn stats_layout_is_packed() {
        assert_eq!(mem::size_of::<DtvStat>(), 9);
        assert_eq!(mem::size_of::<DtvFeStats>(), 37);
    }

    #[test]
    fn satip_encodings() {
        assert_eq!(SYS_DVBS2.to_string(), "dvbs2");
        assert_eq!(PSK_8.to_string(), "8psk");
        assert_eq!(FEC_3_4.to_string(), "3/4");
        assert_eq!(ROLLOFF_35.to_string(), "0.35");
        assert_eq!(PILOT_AUTO.to_string(), "auto");
        assert_eq!("dvbt2".parse::<fe_delivery_system>().unwrap(), SYS_DVBT2);
        assert_eq!("256qam".parse::<fe_modulation>().unwrap(), QAM_256);
        assert_eq!("9/10".parse::<fe_code_rate>().unwrap(), FEC_9_10);
    }

    #[test]
    fn property_roundtrip() {
        let p = DtvProperty::new(DTV_SYMBOL_RATE, 22_000_000);
        assert_eq!({ p.cmd }, DTV_SYMBOL_RATE);
        assert_eq!(p.data(), 22_000_000);
    }
}
