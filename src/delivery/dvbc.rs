//! DVB-C/C2 property sequence

use crate::device::StreamId;
use crate::error::TuneError;
use crate::fe::sys::*;
use crate::fe::FeDevice;
use crate::tuning::{DeliveryParams, TuningParams};

use super::DeliverySystem;

pub struct Dvbc;

impl DeliverySystem for Dvbc {
    fn capable_of(&self, system: fe_delivery_system) -> bool {
        matches!(
            system,
            SYS_DVBC_ANNEX_A | SYS_DVBC_ANNEX_B | SYS_DVBC_ANNEX_C | SYS_DVBC2
        )
    }

    fn tune(
        &self,
        stream_id: StreamId,
        fe: &FeDevice,
        params: &TuningParams,
    ) -> Result<(), TuneError> {
        let cab = match &params.delivery {
            DeliveryParams::Cable(cab) => cab,
            _ => return Err(TuneError::UnsupportedSystem(params.system)),
        };

        fe.set_properties(&[DtvProperty::query(DTV_CLEAR)])
            .map_err(TuneError::PropertySet)?;

        log::debug!("Stream: {}, Start tuning", stream_id);
        let cmdseq = [
            DtvProperty::new(DTV_DELIVERY_SYSTEM, params.system as u32),
            DtvProperty::new(DTV_FREQUENCY, params.frequency * 1000),
            DtvProperty::new(DTV_MODULATION, cab.modulation as u32),
            DtvProperty::new(DTV_SYMBOL_RATE, cab.symbol_rate),
            DtvProperty::new(DTV_INNER_FEC, cab.fec as u32),
            DtvProperty::new(DTV_INVERSION, cab.inversion as u32),
            DtvProperty::query(DTV_TUNE),
        ];
        fe.set_properties(&cmdseq).map_err(TuneError::PropertySet)
    }
}
