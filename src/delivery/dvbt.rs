//! DVB-T/T2 property sequence. The low-priority code rate is emitted as
//! AUTO; it only matters for hierarchical transmission.

use crate::device::StreamId;
use crate::error::TuneError;
use crate::fe::sys::*;
use crate::fe::FeDevice;
use crate::tuning::{DeliveryParams, TuningParams};

use super::DeliverySystem;

pub struct Dvbt;

impl DeliverySystem for Dvbt {
    fn capable_of(&self, system: fe_delivery_system) -> bool {
        matches!(system, SYS_DVBT | SYS_DVBT2)
    }

    fn tune(
        &self,
        stream_id: StreamId,
        fe: &FeDevice,
        params: &TuningParams,
    ) -> Result<(), TuneError> {
        let ter = match &params.delivery {
            DeliveryParams::Terrestrial(ter) => ter,
            _ => return Err(TuneError::UnsupportedSystem(params.system)),
        };

        fe.set_properties(&[DtvProperty::query(DTV_CLEAR)])
            .map_err(TuneError::PropertySet)?;

        log::debug!("Stream: {}, Start tuning", stream_id);
        let mut cmdseq = vec![
            DtvProperty::new(DTV_DELIVERY_SYSTEM, params.system as u32),
            DtvProperty::new(DTV_FREQUENCY, params.frequency * 1000),
            DtvProperty::new(DTV_BANDWIDTH_HZ, ter.bandwidth_hz),
            DtvProperty::new(DTV_CODE_RATE_HP, ter.fec as u32),
            DtvProperty::new(DTV_CODE_RATE_LP, FEC_AUTO as u32),
            DtvProperty::new(DTV_MODULATION, ter.modulation as u32),
            DtvProperty::new(DTV_TRANSMISSION_MODE, ter.transmission_mode as u32),
            DtvProperty::new(DTV_GUARD_INTERVAL, ter.guard_interval as u32),
            DtvProperty::new(DTV_HIERARCHY, ter.hierarchy as u32),
        ];
        if params.system == SYS_DVBT2 {
            cmdseq.push(DtvProperty::new(DTV_STREAM_ID, ter.plp_id));
        }
        cmdseq.push(DtvProperty::query(DTV_TUNE));

        fe.set_properties(&cmdseq).map_err(TuneError::PropertySet)
    }
}
