//! The concrete DVB tuner: one frontend/dvr/demux triple driven through
//! the [`Device`] contract.
//!
//! Internally the control path (frontend handle, adapters) and the data
//! path (DVR tap) are guarded by separate locks, so a worker blocked in
//! `poll(2)` on the tap never delays tuning, signal reads or teardown
//! preparation, and vice versa.

use std::sync::Mutex;
use std::thread;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};

use crate::delivery::{DeliverySystem, Dvbc, Dvbs, Dvbt};
use crate::device::{Device, FilterHandle, SignalStats, StreamId, TunerPaths};
use crate::dmx::{DmxDevice, DvrDevice};
use crate::error::{DeviceUnavailable, TuneError};
use crate::fe::sys::*;
use crate::fe::FeDevice;
use crate::rtp::PacketBuffer;
use crate::tuning::TuningParams;

const FILTER_ATTEMPTS: usize = 4;
const FILTER_BACKOFF: Duration = Duration::from_millis(350);

const DVR_BUFFER_MIN: u32 = 10 * 188 * 1024;
const DVR_BUFFER_MAX: u32 = 80 * 188 * 1024;

#[derive(Debug, Clone)]
pub struct TunerConfig {
    /// Kernel-side DVR ring size, clamped to `10..=80` notional TS
    /// packets worth of kilobytes
    pub dvr_buffer_size: u32,
    /// Extra wait after the DiSEqC master command, for cascaded switches
    pub diseqc_wait: Duration,
}

impl Default for TunerConfig {
    fn default() -> Self {
        TunerConfig {
            dvr_buffer_size: 40 * 188 * 1024,
            diseqc_wait: Duration::from_millis(0),
        }
    }
}

impl TunerConfig {
    fn clamped_dvr_size(&self) -> u32 {
        self.dvr_buffer_size.max(DVR_BUFFER_MIN).min(DVR_BUFFER_MAX)
    }
}

/// Advertised capability counts per second-generation-relevant subsystem
#[derive(Debug, Default, Copy, Clone, PartialEq, Eq)]
pub struct DeliveryCounts {
    pub dvbs2: usize,
    pub dvbt: usize,
    pub dvbt2: usize,
    pub dvbc: usize,
    pub dvbc2: usize,
}

impl DeliveryCounts {
    fn tally(systems: &[fe_delivery_system]) -> Self {
        let mut counts = DeliveryCounts::default();
        for system in systems {
            match system {
                SYS_DVBS2 => counts.dvbs2 += 1,
                SYS_DVBT => counts.dvbt += 1,
                SYS_DVBT2 => counts.dvbt2 += 1,
                SYS_DVBC_ANNEX_A | SYS_DVBC_ANNEX_B | SYS_DVBC_ANNEX_C => {
                    counts.dvbc = 1;
                }
                SYS_DVBC2 => counts.dvbc2 += 1,
                _ => {}
            }
        }
        counts
    }

    /// Accumulates this tuner's counts into a pool-wide total
    pub fn add_to(&self, total: &mut DeliveryCounts) {
        total.dvbs2 += self.dvbs2;
        total.dvbt += self.dvbt;
        total.dvbt2 += self.dvbt2;
        total.dvbc += self.dvbc;
        total.dvbc2 += self.dvbc2;
    }
}

pub struct DvbTuner {
    paths: TunerPaths,
    name: String,
    counts: DeliveryCounts,
    adapters: Vec<Box<dyn DeliverySystem>>,
    config: TunerConfig,
    ctl: Mutex<Option<FeDevice>>,
    tap: Mutex<Option<DvrDevice>>,
}

impl DvbTuner {
    /// Opens the frontend read-only, reads its identity and delivery
    /// systems, instantiates the matching adapters and closes the
    /// handle again. A tuner that cannot be probed is excluded from the
    /// pool.
    pub fn probe(paths: TunerPaths, config: TunerConfig) -> Result<Self, DeviceUnavailable> {
        Self::probe_inner(&paths, config).map_err(|source| DeviceUnavailable {
            path: paths.frontend.display().to_string(),
            source,
        })
    }

    fn probe_inner(paths: &TunerPaths, config: TunerConfig) -> Result<Self> {
        let fe = FeDevice::open_ro(&paths.frontend)?;
        let info = fe.query_info()?;
        drop(fe);

        log::info!("Frontend Name: {}", info.name);
        for system in &info.delivery_systems {
            log::info!("Frontend Type: {:?}", system);
        }
        log::info!(
            "Frontend Freq: {} Hz to {} Hz",
            info.frequency_range.start,
            info.frequency_range.end
        );
        log::info!(
            "Frontend srat: {} symbols/s to {} symbols/s",
            info.symbolrate_range.start,
            info.symbolrate_range.end
        );

        let counts = DeliveryCounts::tally(&info.delivery_systems);

        let mut adapters: Vec<Box<dyn DeliverySystem>> = Vec::new();
        if info
            .delivery_systems
            .iter()
            .any(|s| matches!(s, SYS_DVBS | SYS_DVBS2))
        {
            adapters.push(Box::new(Dvbs::new(config.diseqc_wait)));
        }
        if counts.dvbt > 0 || counts.dvbt2 > 0 {
            adapters.push(Box::new(Dvbt));
        }
        if counts.dvbc > 0 || counts.dvbc2 > 0 {
            adapters.push(Box::new(Dvbc));
        }
        if adapters.is_empty() {
            anyhow::bail!("no supported delivery systems");
        }

        Ok(DvbTuner {
            paths: paths.clone(),
            name: info.name,
            counts,
            adapters,
            config,
            ctl: Mutex::new(None),
            tap: Mutex::new(None),
        })
    }

    #[inline]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[inline]
    pub fn paths(&self) -> &TunerPaths {
        &self.paths
    }

    #[inline]
    pub fn delivery_counts(&self) -> DeliveryCounts {
        self.counts
    }
}

impl Device for DvbTuner {
    fn open(&self) -> Result<(), TuneError> {
        let mut ctl = self.ctl.lock().unwrap();
        if ctl.is_none() {
            let fe = FeDevice::open_rw(&self.paths.frontend).map_err(TuneError::DeviceOpen)?;
            log::info!("Opened {} for tuning", self.paths.frontend.display());
            *ctl = Some(fe);
        }
        Ok(())
    }

    fn tune(&self, stream_id: StreamId, params: &TuningParams) -> Result<(), TuneError> {
        let ctl = self.ctl.lock().unwrap();
        let fe = ctl
            .as_ref()
            .ok_or_else(|| TuneError::DeviceOpen(anyhow!("frontend not open")))?;
        let adapter = self
            .adapters
            .iter()
            .find(|a| a.capable_of(params.system))
            .ok_or(TuneError::UnsupportedSystem(params.system))?;
        adapter.tune(stream_id, fe, params)
    }

    fn open_tap(&self) -> Result<()> {
        let mut tap = self.tap.lock().unwrap();
        if tap.is_none() {
            let dvr = DvrDevice::open(&self.paths.dvr)?;
            if let Err(e) = dvr.set_buffer_size(self.config.clamped_dvr_size()) {
                log::error!("DMX_SET_BUFFER_SIZE failed: {:#}", e);
            }
            log::info!("Opened {}", self.paths.dvr.display());
            *tap = Some(dvr);
        }
        Ok(())
    }

    fn close_tap(&self) {
        *self.tap.lock().unwrap() = None;
    }

    fn is_data_available(&self, timeout: Duration) -> bool {
        {
            let tap = self.tap.lock().unwrap();
            if let Some(dvr) = tap.as_ref() {
                return dvr.poll_readable(timeout);
            }
        }
        // no tap yet: keep the caller's pacing without holding the lock
        thread::sleep(timeout);
        false
    }

    fn read_ts_packet(&self, buffer: &mut PacketBuffer) -> bool {
        let tap = self.tap.lock().unwrap();
        let dvr = match tap.as_ref() {
            Some(dvr) => dvr,
            None => return false,
        };
        let bytes = dvr.read(buffer.write_region());
        if bytes == 0 {
            return false;
        }
        buffer.commit(bytes);
        buffer.is_ready()
    }

    fn set_pid_filter(&self, _stream_id: StreamId, pid: u16) -> Result<FilterHandle> {
        let dmx = DmxDevice::open(&self.paths.demux)?;
        let mut attempt = 0;
        loop {
            match dmx.set_ts_filter(pid) {
                Ok(()) => return Ok(FilterHandle::new(dmx)),
                Err(e) => {
                    attempt += 1;
                    if attempt >= FILTER_ATTEMPTS {
                        return Err(e);
                    }
                    thread::sleep(FILTER_BACKOFF);
                }
            }
        }
    }

    fn clear_pid_filter(&self, stream_id: StreamId, pid: u16, handle: FilterHandle) {
        if let Some(dmx) = handle.into_inner() {
            if let Err(e) = dmx.stop() {
                log::warn!("Stream: {}, DMX_STOP failed for PID {}: {:#}", stream_id, pid, e);
            }
        }
        log::debug!("Stream: {}, Remove filter PID: {:04}", stream_id, pid);
    }

    fn read_signal(&self) -> Result<SignalStats> {
        let ctl = self.ctl.lock().unwrap();
        let fe = ctl.as_ref().context("frontend not open")?;

        let status = fe.read_status()?;
        // some frontends do not support every statistics ioctl
        let strength = fe.read_signal_strength().unwrap_or(0);
        let snr = fe.read_snr().unwrap_or(0);
        let ber = fe.read_ber().unwrap_or(0);
        let unc = fe.read_unc().unwrap_or(0);

        Ok(SignalStats {
            status,
            strength: ((strength as u32 * 240) / 0xffff) as u16,
            snr: ((snr as u32 * 15) / 0xffff) as u16,
            ber,
            unc,
        })
    }

    fn teardown(&self, stream_id: StreamId) {
        *self.tap.lock().unwrap() = None;
        *self.ctl.lock().unwrap() = None;
        log::info!("Stream: {}, Closed {}", stream_id, self.paths.frontend.display());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dvr_size_clamping() {
        let mut config = TunerConfig::default();
        assert_eq!(config.clamped_dvr_size(), 40 * 188 * 1024);

        config.dvr_buffer_size = 1;
        assert_eq!(config.clamped_dvr_size(), DVR_BUFFER_MIN);

        config.dvr_buffer_size = u32::MAX;
        assert_eq!(config.clamped_dvr_size(), DVR_BUFFER_MAX);
    }

    #[test]
    fn capability_tally() {
        let counts = DeliveryCounts::tally(&[SYS_DVBS, SYS_DVBS2, SYS_DVBT, SYS_DVBT2]);
        assert_eq!(counts.dvbs2, 1);
        assert_eq!(counts.dvbt, 1);
        assert_eq!(counts.dvbt2, 1);
        assert_eq!(counts.dvbc, 0);

        // cable annexes count once
        let counts = DeliveryCounts::tally(&[SYS_DVBC_ANNEX_A, SYS_DVBC_ANNEX_C]);
        assert_eq!(counts.dvbc, 1);

        let mut total = DeliveryCounts::default();
        counts.add_to(&mut total);
        counts.add_to(&mut total);
        assert_eq!(total.dvbc, 2);
    }
}
