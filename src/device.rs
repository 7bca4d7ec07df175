//! The capability interface a stream drives its tuner through, plus the
//! one-shot enumeration of DVB adapters at startup.

use std::fs;
use std::os::unix::fs::FileTypeExt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::dmx::DmxDevice;
use crate::error::TuneError;
use crate::fe::sys::fe_status;
use crate::rtp::PacketBuffer;
use crate::tuning::TuningParams;

pub type StreamId = usize;

/// Last-read signal snapshot. Strength is normalized to `0..=240` and SNR
/// to `0..=15`, the ranges the SAT>IP describe attributes use.
#[derive(Debug, Copy, Clone)]
pub struct SignalStats {
    pub status: fe_status,
    pub strength: u16,
    pub snr: u16,
    pub ber: u32,
    pub unc: u32,
}

impl Default for SignalStats {
    fn default() -> Self {
        SignalStats {
            status: fe_status::FE_NONE,
            strength: 0,
            snr: 0,
            ber: 0,
            unc: 0,
        }
    }
}

impl SignalStats {
    #[inline]
    pub fn has_lock(&self) -> bool {
        self.status.contains(fe_status::FE_HAS_LOCK)
    }
}

/// An installed PID filter. For the DVB tuner this owns the demux handle;
/// closing the handle releases the kernel filter.
#[derive(Debug)]
pub struct FilterHandle(Option<DmxDevice>);

impl FilterHandle {
    pub(crate) fn new(dmx: DmxDevice) -> Self {
        FilterHandle(Some(dmx))
    }

    /// A handle without a backing demux device, for device variants that
    /// track filters internally
    pub fn unbound() -> Self {
        FilterHandle(None)
    }

    pub(crate) fn into_inner(self) -> Option<DmxDevice> {
        self.0
    }
}

/// Polymorphic interface over tuner hardware. The concrete variant in
/// this crate is [`crate::tuner::DvbTuner`]; file or loopback variants
/// share the contract.
///
/// Implementations synchronize internally: the control path (open, tune,
/// filters, signal) and the data path (`is_data_available`,
/// `read_ts_packet`) must be callable from different threads, and the
/// data path must never wait on a blocked control operation.
pub trait Device: Send + Sync {
    /// Opens the control handle; a no-op when already open
    fn open(&self) -> Result<(), TuneError>;

    /// One tune attempt through the matching delivery-system adapter
    fn tune(&self, stream_id: StreamId, params: &TuningParams) -> Result<(), TuneError>;

    /// Opens the TS tap and applies the configured buffer size; a no-op
    /// when already open
    fn open_tap(&self) -> anyhow::Result<()>;

    fn close_tap(&self);

    /// Bounded wait for the tap to become readable
    fn is_data_available(&self, timeout: Duration) -> bool;

    /// One read into the buffer's write region, whole 188-byte units.
    /// Returns whether the buffer is now full. A failed or empty read
    /// returns `false`; the caller re-enters its poll loop.
    fn read_ts_packet(&self, buffer: &mut PacketBuffer) -> bool;

    /// Installs a PES filter for `pid`, retrying transient failures
    fn set_pid_filter(&self, stream_id: StreamId, pid: u16) -> anyhow::Result<FilterHandle>;

    /// Stops and releases a previously installed filter
    fn clear_pid_filter(&self, stream_id: StreamId, pid: u16, handle: FilterHandle);

    /// Reads the signal snapshot; sub-readings that fail yield zeros
    fn read_signal(&self) -> anyhow::Result<SignalStats>;

    /// Closes control and tap handles
    fn teardown(&self, stream_id: StreamId);
}

/// Device node paths of one tuner
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TunerPaths {
    pub frontend: PathBuf,
    pub dvr: PathBuf,
    pub demux: PathBuf,
}

/// Parses `frontend<N>` out of a device node name
fn frontend_number(name: &str) -> Option<u32> {
    name.strip_prefix("frontend")?.parse().ok()
}

/// One-shot recursive walk of a `/dev/dvb`-style tree, alphabetically
/// ordered. Every character device named `frontend<N>` registers a
/// `(frontend, dvr, demux)` triple from its directory. Hotplug after
/// startup is not observed.
pub fn enumerate<P: AsRef<Path>>(path: P) -> Vec<TunerPaths> {
    let path = path.as_ref();
    log::info!("Detecting frontends in: {}", path.display());
    let mut found = Vec::new();
    scan_dir(path, &mut found);
    log::info!("Frontends found: {}", found.len());
    found
}

fn scan_dir(dir: &Path, found: &mut Vec<TunerPaths>) {
    let entries = match fs::read_dir(dir) {
        Ok(iter) => {
            let mut entries: Vec<_> = iter.filter_map(|e| e.ok()).collect();
            entries.sort_by_key(|e| e.file_name());
            entries
        }
        Err(_) => return,
    };

    for entry in entries {
        let path = entry.path();
        let file_type = match entry.metadata() {
            Ok(m) => m.file_type(),
            Err(_) => continue,
        };
        if file_type.is_dir() {
            scan_dir(&path, found);
        } else if file_type.is_char_device() {
            let name = entry.file_name();
            let number = match name.to_str().and_then(frontend_number) {
                Some(n) => n,
                None => continue,
            };
            let dir = path.parent().unwrap_or(dir);
            found.push(TunerPaths {
                frontend: path.clone(),
                dvr: dir.join(format!("dvr{}", number)),
                demux: dir.join(format!("demux{}", number)),
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frontend_names() {
        assert_eq!(frontend_number("frontend0"), Some(0));
        assert_eq!(frontend_number("frontend12"), Some(12));
        assert_eq!(frontend_number("dvr0"), None);
        assert_eq!(frontend_number("frontend"), None);
        assert_eq!(frontend_number("demux1"), None);
    }

    #[test]
    fn enumerate_empty_tree() {
        let dir = tempfile::tempdir().unwrap();
        // regular files are not tuners
        fs::write(dir.path().join("frontend0"), b"").unwrap();
        assert!(enumerate(dir.path()).is_empty());
    }
}
