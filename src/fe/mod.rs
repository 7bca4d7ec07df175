pub mod sys;

use std::ffi::CStr;
use std::fmt;
use std::fs::{File, OpenOptions};
use std::ops::Range;
use std::os::unix::fs::{FileTypeExt, OpenOptionsExt};
use std::os::unix::io::{AsRawFd, RawFd};
use std::path::{Path, PathBuf};

use anyhow::{bail, ensure, Context, Result};
use nix::{ioctl_read, ioctl_write_int_bad, ioctl_write_ptr, request_code_none};

use sys::*;

/// An open frontend character device
#[derive(Debug)]
pub struct FeDevice {
    path: PathBuf,
    file: File,
}

impl AsRawFd for FeDevice {
    #[inline]
    fn as_raw_fd(&self) -> RawFd {
        self.file.as_raw_fd()
    }
}

/// Identity and capabilities of a frontend, read once at probe time
#[derive(Debug, Clone)]
pub struct FeDeviceInfo {
    pub name: String,
    pub delivery_systems: Vec<fe_delivery_system>,
    pub frequency_range: Range<u32>,
    pub symbolrate_range: Range<u32>,
    pub caps: fe_caps,
}

impl fmt::Display for FeDeviceInfo {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        writeln!(f, "Frontend: {}", self.name)?;

        write!(f, "Delivery system:")?;
        for v in &self.delivery_systems {
            write!(f, " {}", v)?;
        }
        writeln!(f)?;

        writeln!(
            f,
            "Frequency range: {} .. {}",
            self.frequency_range.start / 1000,
            self.frequency_range.end / 1000
        )?;

        write!(
            f,
            "Symbolrate range: {} .. {}",
            self.symbolrate_range.start / 1000,
            self.symbolrate_range.end / 1000
        )
    }
}

impl FeDevice {
    fn open_file(path: &Path, is_write: bool) -> Result<File> {
        let file = OpenOptions::new()
            .read(true)
            .write(is_write)
            .custom_flags(::nix::libc::O_NONBLOCK)
            .open(path)
            .with_context(|| format!("FE: failed to open device {}", path.display()))?;

        Ok(file)
    }

    /// Attempts to open the frontend device in read-only mode
    pub fn open_ro<P: AsRef<Path>>(path: P) -> Result<FeDevice> {
        let path = path.as_ref();
        Ok(FeDevice {
            path: path.to_owned(),
            file: Self::open_file(path, false)?,
        })
    }

    /// Attempts to open the frontend device in read-write mode
    pub fn open_rw<P: AsRef<Path>>(path: P) -> Result<FeDevice> {
        let path = path.as_ref();
        Ok(FeDevice {
            path: path.to_owned(),
            file: Self::open_file(path, true)?,
        })
    }

    #[inline]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Reads the frontend identity and its supported delivery systems.
    ///
    /// Enumeration goes through `DTV_ENUM_DELSYS`; kernels with
    /// DVB API <= 5.4 reject that property, in which case the list is
    /// reconstructed from the deprecated frontend type plus the
    /// `FE_CAN_2G_MODULATION` capability bit.
    pub fn query_info(&self) -> Result<FeDeviceInfo> {
        let metadata = self.file.metadata().context("FE: get device metadata")?;
        ensure!(
            metadata.file_type().is_char_device(),
            "FE: path is not to char device"
        );

        let mut feinfo = FeInfo::default();

        // FE_GET_INFO
        ioctl_read!(
            #[inline]
            ioctl_call,
            b'o',
            61,
            FeInfo
        );
        unsafe { ioctl_call(self.as_raw_fd(), &mut feinfo as *mut _) }.context("FE: get info")?;

        let mut name = String::new();
        if let Some(len) = feinfo.name.iter().position(|&b| b == 0) {
            let cstr = unsafe { CStr::from_ptr(feinfo.name[..len + 1].as_ptr()) };
            if let Ok(s) = cstr.to_str() {
                name = s.to_owned();
            }
        }

        let delivery_systems = match self.enum_delivery_systems() {
            Ok(list) => list,
            Err(e) => {
                log::debug!(
                    "FE: {}: DTV_ENUM_DELSYS not supported ({}), using legacy type mapping",
                    self.path.display(),
                    e
                );
                Self::legacy_delivery_systems(feinfo.fe_type, feinfo.caps)?
            }
        };

        Ok(FeDeviceInfo {
            name,
            delivery_systems,
            frequency_range: feinfo.frequency_min..feinfo.frequency_max,
            symbolrate_range: feinfo.symbol_rate_min..feinfo.symbol_rate_max,
            caps: feinfo.caps,
        })
    }

    fn enum_delivery_systems(&self) -> Result<Vec<fe_delivery_system>> {
        let mut props = [DtvProperty::query(DTV_ENUM_DELSYS)];
        self.get_properties(&mut props)?;
        props[0].delivery_systems()
    }

    /// Delivery system list for DVB API <= 5.4 drivers
    fn legacy_delivery_systems(
        fe_type: fe_type,
        caps: fe_caps,
    ) -> Result<Vec<fe_delivery_system>> {
        let second_gen = caps.contains(fe_caps::FE_CAN_2G_MODULATION);
        let mut list = Vec::new();
        match fe_type {
            FE_QPSK => {
                if second_gen {
                    list.push(SYS_DVBS2);
                }
                list.push(SYS_DVBS);
            }
            FE_OFDM => {
                if second_gen {
                    list.push(SYS_DVBT2);
                }
                list.push(SYS_DVBT);
            }
            FE_QAM => {
                list.push(SYS_DVBC_ANNEX_A);
            }
            FE_ATSC => {
                if caps.intersects(
                    fe_caps::FE_CAN_QAM_64 | fe_caps::FE_CAN_QAM_256 | fe_caps::FE_CAN_QAM_AUTO,
                ) {
                    list.push(SYS_DVBC_ANNEX_B);
                } else {
                    bail!("FE: frontend does not have any known delivery systems");
                }
            }
        }
        Ok(list)
    }

    /// Sets properties on the frontend device
    pub fn set_properties(&self, cmdseq: &[DtvProperty]) -> Result<()> {
        ensure!(
            cmdseq.len() <= DTV_IOCTL_MAX_MSGS,
            "FE: too many properties in one command sequence"
        );

        let cmd = DtvProperties {
            num: cmdseq.len() as u32,
            props: cmdseq.as_ptr() as *mut DtvProperty,
        };

        // FE_SET_PROPERTY
        ioctl_write_ptr!(
            #[inline]
            ioctl_call,
            b'o',
            82,
            DtvProperties
        );
        unsafe { ioctl_call(self.as_raw_fd(), &cmd as *const _) }.context("FE: set properties")?;

        Ok(())
    }

    /// Gets properties from the frontend device
    pub fn get_properties(&self, cmdseq: &mut [DtvProperty]) -> Result<()> {
        ensure!(
            cmdseq.len() <= DTV_IOCTL_MAX_MSGS,
            "FE: too many properties in one command sequence"
        );

        let mut cmd = DtvProperties {
            num: cmdseq.len() as u32,
            props: cmdseq.as_mut_ptr(),
        };

        // FE_GET_PROPERTY
        ioctl_read!(
            #[inline]
            ioctl_call,
            b'o',
            83,
            DtvProperties
        );
        unsafe { ioctl_call(self.as_raw_fd(), &mut cmd as *mut _) }
            .context("FE: get properties")?;

        Ok(())
    }

    /// Returns frontend status flags
    pub fn read_status(&self) -> Result<fe_status> {
        let mut result: u32 = 0;

        // FE_READ_STATUS
        ioctl_read!(
            #[inline]
            ioctl_call,
            b'o',
            69,
            u32
        );
        unsafe { ioctl_call(self.as_raw_fd(), &mut result as *mut _) }
            .context("FE: read status")?;

        fe_status::from_bits(result).context("FE: invalid status bits")
    }

    /// Reads the relative signal strength (DVBv3 API)
    pub fn read_signal_strength(&self) -> Result<u16> {
        let mut result: u16 = 0;

        // FE_READ_SIGNAL_STRENGTH
        ioctl_read!(
            #[inline]
            ioctl_call,
            b'o',
            71,
            u16
        );
        unsafe { ioctl_call(self.as_raw_fd(), &mut result as *mut _) }
            .context("FE: read signal strength")?;

        Ok(result)
    }

    /// Reads the relative signal-to-noise ratio (DVBv3 API)
    pub fn read_snr(&self) -> Result<u16> {
        let mut result: u16 = 0;

        // FE_READ_SNR
        ioctl_read!(
            #[inline]
            ioctl_call,
            b'o',
            72,
            u16
        );
        unsafe { ioctl_call(self.as_raw_fd(), &mut result as *mut _) }.context("FE: read snr")?;

        Ok(result)
    }

    /// Reads the bit error counter (DVBv3 API)
    pub fn read_ber(&self) -> Result<u32> {
        let mut result: u32 = 0;

        // FE_READ_BER
        ioctl_read!(
            #[inline]
            ioctl_call,
            b'o',
            70,
            u32
        );
        unsafe { ioctl_call(self.as_raw_fd(), &mut result as *mut _) }.context("FE: read ber")?;

        Ok(result)
    }

    /// Reads the uncorrected blocks counter (DVBv3 API)
    pub fn read_unc(&self) -> Result<u32> {
        let mut result: u32 = 0;

        // FE_READ_UNCORRECTED_BLOCKS
        ioctl_read!(
            #[inline]
            ioctl_call,
            b'o',
            73,
            u32
        );
        unsafe { ioctl_call(self.as_raw_fd(), &mut result as *mut _) }
            .context("FE: read uncorrected blocks")?;

        Ok(result)
    }

    /// Turns the continuous 22kHz tone on or off
    pub fn set_tone(&self, value: fe_sec_tone_mode) -> Result<()> {
        // FE_SET_TONE
        ioctl_write_int_bad!(
            #[inline]
            ioctl_call,
            request_code_none!(b'o', 66)
        );

        unsafe { ioctl_call(self.as_raw_fd(), value as _) }.context("FE: set tone")?;

        Ok(())
    }

    /// Sets the DC voltage level for the LNB
    pub fn set_voltage(&self, value: fe_sec_voltage) -> Result<()> {
        // FE_SET_VOLTAGE
        ioctl_write_int_bad!(
            #[inline]
            ioctl_call,
            request_code_none!(b'o', 67)
        );

        unsafe { ioctl_call(self.as_raw_fd(), value as _) }.context("FE: set voltage")?;

        Ok(())
    }

    /// Sends a DiSEqC master command of up to 6 bytes
    pub fn diseqc_master_cmd(&self, msg: &[u8]) -> Result<()> {
        let mut cmd = DiseqcMasterCmd::default();
        debug_assert!(msg.len() <= cmd.msg.len());

        cmd.msg[0..msg.len()].copy_from_slice(msg);
        cmd.len = msg.len() as u8;

        // FE_DISEQC_SEND_MASTER_CMD
        ioctl_write_ptr!(ioctl_call, b'o', 63, DiseqcMasterCmd);
        unsafe { ioctl_call(self.as_raw_fd(), &cmd as *const _) }
            .context("FE: diseqc master cmd")?;

        Ok(())
    }

    /// Sends a mini-DiSEqC 22kHz burst
    pub fn diseqc_burst(&self, burst: fe_sec_mini_cmd) -> Result<()> {
        // FE_DISEQC_SEND_BURST
        ioctl_write_int_bad!(
            #[inline]
            ioctl_call,
            request_code_none!(b'o', 65)
        );

        unsafe { ioctl_call(self.as_raw_fd(), burst as _) }.context("FE: diseqc burst")?;

        Ok(())
    }
}
