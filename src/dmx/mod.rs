pub mod sys;

use std::fs::{File, OpenOptions};
use std::os::unix::fs::OpenOptionsExt;
use std::os::unix::io::{AsRawFd, RawFd};
use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use nix::poll::{poll, PollFd, PollFlags};
use nix::{ioctl_none_bad, ioctl_write_int_bad, ioctl_write_ptr, request_code_none};

use sys::*;

/// An open demux character device holding one PES filter
#[derive(Debug)]
pub struct DmxDevice {
    file: File,
}

impl AsRawFd for DmxDevice {
    #[inline]
    fn as_raw_fd(&self) -> RawFd {
        self.file.as_raw_fd()
    }
}

impl DmxDevice {
    /// Attempts to open the demux device in read-write mode
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .custom_flags(::nix::libc::O_NONBLOCK)
            .open(path)
            .with_context(|| format!("DMX: failed to open device {}", path.display()))?;

        Ok(DmxDevice { file })
    }

    /// Installs a PES filter for one PID, routed from the frontend to the
    /// DVR tap and started immediately
    pub fn set_ts_filter(&self, pid: u16) -> Result<()> {
        let filter = DmxPesFilterParams {
            pid,
            input: DMX_IN_FRONTEND,
            output: DMX_OUT_TS_TAP,
            pes_type: DMX_PES_OTHER,
            flags: DmxFilterFlags::DMX_IMMEDIATE_START,
        };
        self.set_pes_filter(&filter)
    }

    /// Attempts to set demux PES filter parameters
    pub fn set_pes_filter(&self, filter: &DmxPesFilterParams) -> Result<()> {
        // DMX_SET_PES_FILTER
        ioctl_write_ptr!(
            #[inline]
            ioctl_call,
            b'o',
            44,
            DmxPesFilterParams
        );

        unsafe { ioctl_call(self.as_raw_fd(), filter as *const _) }
            .context("DMX: set PES filter")?;

        Ok(())
    }

    /// Stops the filtering operation
    pub fn stop(&self) -> Result<()> {
        // DMX_STOP
        ioctl_none_bad!(
            #[inline]
            ioctl_call,
            request_code_none!(b'o', 42)
        );

        unsafe { ioctl_call(self.as_raw_fd()) }.context("DMX: stop")?;

        Ok(())
    }
}

/// An open DVR character device: the tap that yields the multiplexed TS
/// for every PES filter routed to `DMX_OUT_TS_TAP`
#[derive(Debug)]
pub struct DvrDevice {
    file: File,
}

impl AsRawFd for DvrDevice {
    #[inline]
    fn as_raw_fd(&self) -> RawFd {
        self.file.as_raw_fd()
    }
}

impl DvrDevice {
    /// Attempts to open the DVR device in read-only non-blocking mode
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let file = OpenOptions::new()
            .read(true)
            .custom_flags(::nix::libc::O_NONBLOCK)
            .open(path)
            .with_context(|| format!("DVR: failed to open device {}", path.display()))?;

        Ok(DvrDevice { file })
    }

    /// Attempts to set the size of the circular buffer used for the tap.
    /// The kernel default is two maximum sized sections (2 * 4096 bytes),
    /// far too small for a full transponder.
    pub fn set_buffer_size(&self, size: u32) -> Result<()> {
        // DMX_SET_BUFFER_SIZE
        ioctl_write_int_bad!(
            #[inline]
            ioctl_call,
            request_code_none!(b'o', 45)
        );

        unsafe { ioctl_call(self.as_raw_fd(), size as _) }.context("DVR: set buffer size")?;

        Ok(())
    }

    /// Waits up to `timeout` for the tap to become readable
    pub fn poll_readable(&self, timeout: Duration) -> bool {
        let mut fds = [PollFd::new(
            self.as_raw_fd(),
            PollFlags::POLLIN | PollFlags::POLLPRI,
        )];
        matches!(poll(&mut fds, timeout.as_millis() as i32), Ok(n) if n > 0)
    }

    /// Reads as many whole bytes as fit into `buf`. Returns 0 on EAGAIN
    /// so the caller re-enters its poll loop.
    pub fn read(&self, buf: &mut [u8]) -> usize {
        match nix::unistd::read(self.as_raw_fd(), buf) {
            Ok(n) => n,
            Err(_) => 0,
        }
    }
}
