//! DVB-S/S2: LNB band selection and the DiSEqC committed-switch dialogue,
//! followed by the satellite property list.

use std::thread;
use std::time::Duration;

use anyhow::Result;

use crate::device::StreamId;
use crate::error::TuneError;
use crate::fe::sys::*;
use crate::fe::FeDevice;
use crate::tuning::{DeliveryParams, Lnb, Polarization, SatelliteParams, TuningParams};

use super::DeliverySystem;

/// Settle time between the steps of the DiSEqC dialogue
const DISEQC_SETTLE: Duration = Duration::from_millis(15);

pub struct Dvbs {
    /// Extra wait after the master command, for cascaded switches
    diseqc_wait: Duration,
}

impl Dvbs {
    pub fn new(diseqc_wait: Duration) -> Self {
        Dvbs { diseqc_wait }
    }

    fn send_diseqc(
        &self,
        stream_id: StreamId,
        fe: &FeDevice,
        sat: &SatelliteParams,
        hiband: bool,
    ) -> Result<()> {
        log::debug!("Stream: {}, Sending DiSEqC", stream_id);

        fe.set_tone(SEC_TONE_OFF)?;
        fe.set_voltage(if sat.polarization.is_vertical() {
            SEC_VOLTAGE_13
        } else {
            SEC_VOLTAGE_18
        })?;
        thread::sleep(DISEQC_SETTLE);

        fe.diseqc_master_cmd(&[
            0xe0,
            0x10,
            0x38,
            diseqc_data(sat.src, hiband, sat.polarization),
        ])?;
        thread::sleep(self.diseqc_wait);
        thread::sleep(DISEQC_SETTLE);

        fe.diseqc_burst(diseqc_burst(sat.src))?;
        thread::sleep(DISEQC_SETTLE);

        fe.set_tone(if hiband { SEC_TONE_ON } else { SEC_TONE_OFF })?;
        Ok(())
    }
}

impl DeliverySystem for Dvbs {
    fn capable_of(&self, system: fe_delivery_system) -> bool {
        matches!(system, SYS_DVBS | SYS_DVBS2)
    }

    fn tune(
        &self,
        stream_id: StreamId,
        fe: &FeDevice,
        params: &TuningParams,
    ) -> Result<(), TuneError> {
        let sat = match &params.delivery {
            DeliveryParams::Satellite(sat) => sat,
            _ => return Err(TuneError::UnsupportedSystem(params.system)),
        };

        let (hiband, ifreq) = band_select(params.frequency, &sat.lnb);

        fe.set_properties(&[DtvProperty::query(DTV_CLEAR)])
            .map_err(TuneError::PropertySet)?;

        self.send_diseqc(stream_id, fe, sat, hiband)
            .map_err(TuneError::Diseqc)?;

        log::debug!("Stream: {}, Start tuning", stream_id);
        let cmdseq = [
            DtvProperty::new(DTV_DELIVERY_SYSTEM, params.system as u32),
            DtvProperty::new(DTV_FREQUENCY, ifreq),
            DtvProperty::new(DTV_MODULATION, sat.modulation as u32),
            DtvProperty::new(DTV_SYMBOL_RATE, sat.symbol_rate),
            DtvProperty::new(DTV_INNER_FEC, sat.fec as u32),
            DtvProperty::new(DTV_INVERSION, INVERSION_AUTO as u32),
            DtvProperty::new(DTV_ROLLOFF, sat.rolloff as u32),
            DtvProperty::new(DTV_PILOT, PILOT_AUTO as u32),
            DtvProperty::query(DTV_TUNE),
        ];
        fe.set_properties(&cmdseq).map_err(TuneError::PropertySet)
    }
}

/// Selects the LNB band and computes the intermediate frequency, both in
/// kHz. Frequencies below the low LOF are downlink-inverted.
fn band_select(freq: u32, lnb: &Lnb) -> (bool, u32) {
    if lnb.lof_switch > 0 && lnb.lof_high > 0 && freq >= lnb.lof_switch {
        (true, freq - lnb.lof_high)
    } else if freq < lnb.lof_low {
        (false, lnb.lof_low - freq)
    } else {
        (false, freq - lnb.lof_low)
    }
}

/// Data byte of the committed DiSEqC command: high nibble 0xf0, low
/// nibble is input position, polarization and band bits
fn diseqc_data(src: u8, hiband: bool, polarization: Polarization) -> u8 {
    0xf0 | ((src.wrapping_mul(4)) & 0x0f)
        | (hiband as u8)
        | if polarization.is_vertical() { 0 } else { 2 }
}

/// Burst A selects the even switch group, burst B the odd one
fn diseqc_burst(src: u8) -> fe_sec_mini_cmd {
    if (src / 4) % 2 == 1 {
        SEC_MINI_B
    } else {
        SEC_MINI_A
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn band_selection() {
        let lnb = Lnb::default();
        // below the switchover: low band
        let (hiband, ifreq) = band_select(11_493_750, &lnb);
        assert!(!hiband);
        assert_eq!(ifreq, 11_493_750 - 9_750_000);

        // at and above the switchover: high band
        let (hiband, ifreq) = band_select(11_700_000, &lnb);
        assert!(hiband);
        assert_eq!(ifreq, 1_100_000);

        // C-band style inversion below the low LOF
        let (hiband, ifreq) = band_select(3_700_000, &Lnb {
            lof_low: 5_150_000,
            lof_high: 0,
            lof_switch: 0,
        });
        assert!(!hiband);
        assert_eq!(ifreq, 1_450_000);
    }

    #[test]
    fn committed_command_data() {
        // source 0, low band, vertical: all selection bits clear
        assert_eq!(diseqc_data(0, false, Polarization::Vertical), 0xf0);
        // source 5, low band, horizontal
        assert_eq!(diseqc_data(5, false, Polarization::Horizontal), 0xf6);
        // source 0, high band, horizontal
        assert_eq!(diseqc_data(0, true, Polarization::Horizontal), 0xf3);
        // circular right behaves as vertical
        assert_eq!(diseqc_data(0, false, Polarization::CircularRight), 0xf0);
    }

    #[test]
    fn burst_alternates_by_switch_group() {
        assert_eq!(diseqc_burst(0), SEC_MINI_A);
        assert_eq!(diseqc_burst(3), SEC_MINI_A);
        assert_eq!(diseqc_burst(4), SEC_MINI_B);
        assert_eq!(diseqc_burst(5), SEC_MINI_B);
        assert_eq!(diseqc_burst(8), SEC_MINI_A);
    }
}
