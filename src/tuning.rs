//! Mutable per-stream tuning state shared between the signalling layer
//! and the frontend: the tuning parameter block, the PID table, and the
//! SAT>IP describe string built from both.

use itertools::Itertools;

use crate::device::{FilterHandle, SignalStats, StreamId};
use crate::fe::sys::*;

/// Valid PIDs are 13 bits, 0..=8191
pub const MAX_PIDS: usize = 8192;

/// Continuity counter sentinel meaning "no packet seen yet"
const CC_UNSET: u8 = 0x80;

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Polarization {
    Horizontal,
    Vertical,
    CircularLeft,
    CircularRight,
}

impl Polarization {
    /// 13V band (vertical linear, right circular)
    #[inline]
    pub fn is_vertical(self) -> bool {
        matches!(self, Polarization::Vertical | Polarization::CircularRight)
    }
}

/// LNB local oscillator frequencies, in kHz. Defaults to a universal
/// Ku-band LNB.
#[derive(Debug, Copy, Clone)]
pub struct Lnb {
    pub lof_low: u32,
    pub lof_high: u32,
    pub lof_switch: u32,
}

impl Default for Lnb {
    fn default() -> Self {
        Lnb {
            lof_low: 9_750_000,
            lof_high: 10_600_000,
            lof_switch: 11_700_000,
        }
    }
}

#[derive(Debug, Clone)]
pub struct SatelliteParams {
    pub polarization: Polarization,
    /// Symbol rate in symbols per second
    pub symbol_rate: u32,
    pub fec: fe_code_rate,
    pub modulation: fe_modulation,
    pub rolloff: fe_rolloff,
    pub pilot: fe_pilot,
    /// DiSEqC switch source index
    pub src: u8,
    pub lnb: Lnb,
}

#[derive(Debug, Clone)]
pub struct TerrestrialParams {
    pub bandwidth_hz: u32,
    pub transmission_mode: fe_transmit_mode,
    pub guard_interval: fe_guard_interval,
    pub fec: fe_code_rate,
    pub modulation: fe_modulation,
    pub hierarchy: fe_hierarchy,
    pub plp_id: u32,
    pub t2_system_id: u32,
    /// 0 = SISO, 1 = MISO
    pub siso_miso: u8,
}

#[derive(Debug, Clone)]
pub struct CableParams {
    pub bandwidth_hz: u32,
    /// Symbol rate in symbols per second
    pub symbol_rate: u32,
    pub modulation: fe_modulation,
    pub fec: fe_code_rate,
    pub c2_tuning_frequency_type: u32,
    pub data_slice: u32,
    pub plp_id: u32,
    pub inversion: fe_spectral_inversion,
}

/// Per-standard tuning parameters
#[derive(Debug, Clone)]
pub enum DeliveryParams {
    None,
    Satellite(SatelliteParams),
    Terrestrial(TerrestrialParams),
    Cable(CableParams),
}

/// The tuning parameter block for one stream. `frequency` is kept in kHz
/// for every system (the kernel's satellite unit); terrestrial and cable
/// adapters convert to Hz when emitting properties.
#[derive(Debug, Clone)]
pub struct TuningParams {
    pub system: fe_delivery_system,
    pub frequency: u32,
    pub delivery: DeliveryParams,
    dirty: bool,
}

impl Default for TuningParams {
    fn default() -> Self {
        TuningParams {
            system: SYS_UNDEFINED,
            frequency: 0,
            delivery: DeliveryParams::None,
            dirty: false,
        }
    }
}

impl TuningParams {
    pub fn new(system: fe_delivery_system, frequency: u32, delivery: DeliveryParams) -> Self {
        TuningParams {
            system,
            frequency,
            delivery,
            dirty: true,
        }
    }

    #[inline]
    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    #[inline]
    pub fn mark_dirty(&mut self) {
        self.dirty = true;
    }

    #[inline]
    pub fn clear_dirty(&mut self) {
        self.dirty = false;
    }
}

/// One PID slot
#[derive(Debug)]
pub struct PidEntry {
    pub desired: bool,
    pub is_pmt: bool,
    pub filter: Option<FilterHandle>,
    pub packet_count: u64,
    pub cc: u8,
    pub cc_errors: u32,
}

impl Default for PidEntry {
    fn default() -> Self {
        PidEntry {
            desired: false,
            is_pmt: false,
            filter: None,
            packet_count: 0,
            cc: CC_UNSET,
            cc_errors: 0,
        }
    }
}

/// Fixed-capacity map from PID to filter state, with a dirty flag the
/// reconciler clears once it has converged
pub struct PidTable {
    entries: Vec<PidEntry>,
    dirty: bool,
}

impl Default for PidTable {
    fn default() -> Self {
        Self::new()
    }
}

impl PidTable {
    pub fn new() -> Self {
        let mut entries = Vec::with_capacity(MAX_PIDS);
        entries.resize_with(MAX_PIDS, PidEntry::default);
        PidTable {
            entries,
            dirty: false,
        }
    }

    #[inline]
    pub fn entry(&self, pid: u16) -> &PidEntry {
        &self.entries[pid as usize]
    }

    #[inline]
    pub fn entry_mut(&mut self, pid: u16) -> &mut PidEntry {
        &mut self.entries[pid as usize]
    }

    /// Marks a PID as wanted or unwanted; any actual change dirties the
    /// table
    pub fn set_desired(&mut self, pid: u16, desired: bool) {
        let entry = &mut self.entries[pid as usize];
        if entry.desired != desired {
            entry.desired = desired;
            self.dirty = true;
        }
    }

    pub fn set_pmt(&mut self, pid: u16, is_pmt: bool) {
        self.entries[pid as usize].is_pmt = is_pmt;
    }

    /// Replaces the whole desired set
    pub fn set_desired_set(&mut self, pids: &[u16]) {
        for pid in 0..MAX_PIDS as u16 {
            self.set_desired(pid, false);
        }
        for &pid in pids {
            self.set_desired(pid, true);
        }
    }

    /// Clears the per-PID counters and continuity state
    pub fn reset_entry(&mut self, pid: u16) {
        let entry = &mut self.entries[pid as usize];
        entry.packet_count = 0;
        entry.cc = CC_UNSET;
        entry.cc_errors = 0;
    }

    /// Updates packet and continuity counters for one received TS packet
    pub fn account(&mut self, pid: u16, cc: u8) {
        let entry = &mut self.entries[pid as usize];
        entry.packet_count += 1;
        if entry.cc != CC_UNSET && ((entry.cc + 1) & 0x0f) != cc {
            entry.cc_errors += 1;
        }
        entry.cc = cc;
    }

    pub fn desired_pids(&self) -> impl Iterator<Item = u16> + '_ {
        self.entries
            .iter()
            .enumerate()
            .filter(|(_, e)| e.desired)
            .map(|(pid, _)| pid as u16)
    }

    /// Comma separated desired PID list for the describe string
    pub fn desired_csv(&self) -> String {
        self.desired_pids().map(|pid| pid.to_string()).join(",")
    }

    /// Number of PIDs with an installed filter
    pub fn active_filters(&self) -> usize {
        self.entries.iter().filter(|e| e.filter.is_some()).count()
    }

    #[inline]
    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    #[inline]
    pub fn mark_dirty(&mut self) {
        self.dirty = true;
    }

    #[inline]
    pub fn clear_dirty(&mut self) {
        self.dirty = false;
    }
}

/// Builds the SAT>IP attribute describe string for one stream.
///
/// `NONE` is returned while no delivery system is configured. Frequencies
/// are printed in MHz with two decimals, symbol rates in ksym/s.
pub fn describe(
    stream_id: StreamId,
    params: &TuningParams,
    signal: &SignalStats,
    pid_csv: &str,
) -> String {
    let freq = params.frequency as f64 / 1000.0;
    let lock = signal.has_lock() as u8;

    match (&params.delivery, params.system) {
        (DeliveryParams::Satellite(sat), SYS_DVBS) | (DeliveryParams::Satellite(sat), SYS_DVBS2) => {
            format!(
                "ver=1.0;src={};tuner={},{},{},{},{:.2},{},{},{},{},{},{},{};pids={}",
                sat.src,
                stream_id + 1,
                signal.strength,
                lock,
                signal.snr,
                freq,
                if sat.polarization.is_vertical() { 'v' } else { 'h' },
                params.system,
                sat.modulation,
                sat.pilot,
                sat.rolloff,
                sat.symbol_rate / 1000,
                sat.fec,
                pid_csv
            )
        }
        (DeliveryParams::Terrestrial(ter), SYS_DVBT) | (DeliveryParams::Terrestrial(ter), SYS_DVBT2) => {
            format!(
                "ver=1.1;tuner={},{},{},{},{:.2},{:.3},{},{},{},{},{},{},{},{};pids={}",
                stream_id + 1,
                signal.strength,
                lock,
                signal.snr,
                freq,
                ter.bandwidth_hz as f64 / 1_000_000.0,
                params.system,
                ter.transmission_mode,
                ter.modulation,
                ter.guard_interval,
                ter.fec,
                ter.plp_id,
                ter.t2_system_id,
                ter.siso_miso,
                pid_csv
            )
        }
        (DeliveryParams::Cable(cab), SYS_DVBC_ANNEX_A)
        | (DeliveryParams::Cable(cab), SYS_DVBC_ANNEX_B)
        | (DeliveryParams::Cable(cab), SYS_DVBC_ANNEX_C)
        | (DeliveryParams::Cable(cab), SYS_DVBC2) => {
            format!(
                "ver=1.2;tuner={},{},{},{},{:.2},{:.3},{},{},{},{},{},{},{};pids={}",
                stream_id + 1,
                signal.strength,
                lock,
                signal.snr,
                freq,
                cab.bandwidth_hz as f64 / 1_000_000.0,
                params.system,
                cab.modulation,
                cab.symbol_rate / 1000,
                cab.c2_tuning_frequency_type,
                cab.data_slice,
                cab.plp_id,
                cab.inversion as u32,
                pid_csv
            )
        }
        _ => "NONE".to_owned(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sat_params() -> TuningParams {
        TuningParams::new(
            SYS_DVBS2,
            11_493_750,
            DeliveryParams::Satellite(SatelliteParams {
                polarization: Polarization::Vertical,
                symbol_rate: 22_000_000,
                fec: FEC_3_4,
                modulation: PSK_8,
                rolloff: ROLLOFF_35,
                pilot: PILOT_AUTO,
                src: 0,
                lnb: Lnb::default(),
            }),
        )
    }

    fn locked_signal() -> SignalStats {
        SignalStats {
            status: fe_status::FE_HAS_LOCK | fe_status::FE_HAS_SIGNAL,
            strength: 210,
            snr: 12,
            ber: 0,
            unc: 0,
        }
    }

    #[test]
    fn describe_satellite() {
        let desc = describe(0, &sat_params(), &locked_signal(), "");
        assert_eq!(
            desc,
            "ver=1.0;src=0;tuner=1,210,1,12,11493.75,v,dvbs2,8psk,auto,0.35,22000,3/4;pids="
        );
    }

    #[test]
    fn describe_satellite_roundtrip() {
        let params = sat_params();
        let desc = describe(0, &params, &locked_signal(), "0,17,18");

        let (head, pids) = desc.split_once(";pids=").unwrap();
        assert_eq!(pids, "0,17,18");
        let tuner = head.split_once("tuner=").unwrap().1;
        let fields: Vec<&str> = tuner.split(',').collect();
        assert_eq!(fields.len(), 12);

        let freq: f64 = fields[4].parse().unwrap();
        assert!((freq - 11_493.75).abs() < 0.01);
        assert_eq!(fields[5], "v");
        assert_eq!(fields[6].parse::<fe_delivery_system>().unwrap(), SYS_DVBS2);
        assert_eq!(fields[7].parse::<fe_modulation>().unwrap(), PSK_8);
        assert_eq!(fields[8].parse::<fe_pilot>().unwrap(), PILOT_AUTO);
        assert_eq!(fields[9].parse::<fe_rolloff>().unwrap(), ROLLOFF_35);
        assert_eq!(fields[10].parse::<u32>().unwrap(), 22_000);
        assert_eq!(fields[11].parse::<fe_code_rate>().unwrap(), FEC_3_4);
    }

    #[test]
    fn describe_unconfigured_is_none() {
        let desc = describe(3, &TuningParams::default(), &SignalStats::default(), "");
        assert_eq!(desc, "NONE");
    }

    #[test]
    fn describe_terrestrial() {
        let params = TuningParams::new(
            SYS_DVBT2,
            474_000,
            DeliveryParams::Terrestrial(TerrestrialParams {
                bandwidth_hz: 8_000_000,
                transmission_mode: TRANSMISSION_MODE_32K,
                guard_interval: GUARD_INTERVAL_1_128,
                fec: FEC_2_3,
                modulation: QAM_256,
                hierarchy: HIERARCHY_NONE,
                plp_id: 1,
                t2_system_id: 0,
                siso_miso: 0,
            }),
        );
        let desc = describe(1, &params, &locked_signal(), "0");
        assert_eq!(
            desc,
            "ver=1.1;tuner=2,210,1,12,474.00,8.000,dvbt2,32k,256qam,1128,2/3,1,0,0;pids=0"
        );
    }

    #[test]
    fn pid_table_dirty_tracking() {
        let mut table = PidTable::new();
        assert!(!table.is_dirty());

        table.set_desired(0, true);
        table.set_desired(8191, true);
        assert!(table.is_dirty());
        assert_eq!(table.desired_csv(), "0,8191");

        table.clear_dirty();
        // no-op mutation does not re-dirty
        table.set_desired(0, true);
        assert!(!table.is_dirty());

        table.set_desired(0, false);
        assert!(table.is_dirty());
        assert_eq!(table.desired_csv(), "8191");
    }

    #[test]
    fn continuity_accounting() {
        let mut table = PidTable::new();
        table.account(256, 3);
        table.account(256, 4);
        table.account(256, 5);
        assert_eq!(table.entry(256).packet_count, 3);
        assert_eq!(table.entry(256).cc_errors, 0);

        // skip two counters
        table.account(256, 8);
        assert_eq!(table.entry(256).cc_errors, 1);

        // wrap 15 -> 0 is legal
        table.account(256, 15);
        assert_eq!(table.entry(256).cc_errors, 2);
        table.account(256, 0);
        assert_eq!(table.entry(256).cc_errors, 2);
    }
}
