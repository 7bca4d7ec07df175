//! Facade and worker behavior, driven end to end against a loopback
//! device that synthesizes transport stream data.

use std::collections::HashSet;
use std::net::UdpSocket;
use std::sync::atomic::{AtomicU8, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use dvbstream::device::{Device, FilterHandle, SignalStats, StreamId};
use dvbstream::error::TuneError;
use dvbstream::fe::sys::fe_status;
use dvbstream::rtp::{PacketBuffer, RTP_HEADER_SIZE, TS_PACKET_SIZE};
use dvbstream::stream::{Frontend, Stream, StreamState};
use dvbstream::tuning::{
    DeliveryParams, Lnb, Polarization, SatelliteParams, TuningParams,
};
use dvbstream::fe::sys::{FEC_3_4, PILOT_AUTO, PSK_8, ROLLOFF_35, SYS_DVBS2};

/// A tuner that locks instantly and produces an endless run of TS
/// packets on PID 256
struct LoopbackDevice {
    filters: Mutex<HashSet<u16>>,
    tunes: AtomicUsize,
    taps: AtomicUsize,
    cc: AtomicU8,
}

impl LoopbackDevice {
    fn new() -> Arc<Self> {
        Arc::new(LoopbackDevice {
            filters: Mutex::new(HashSet::new()),
            tunes: AtomicUsize::new(0),
            taps: AtomicUsize::new(0),
            cc: AtomicU8::new(0),
        })
    }

    fn filters(&self) -> HashSet<u16> {
        self.filters.lock().unwrap().clone()
    }

    fn tunes(&self) -> usize {
        self.tunes.load(Ordering::SeqCst)
    }
}

impl Device for LoopbackDevice {
    fn open(&self) -> Result<(), TuneError> {
        Ok(())
    }

    fn tune(&self, _stream_id: StreamId, _params: &TuningParams) -> Result<(), TuneError> {
        self.tunes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn open_tap(&self) -> anyhow::Result<()> {
        self.taps.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn close_tap(&self) {}

    fn is_data_available(&self, _timeout: Duration) -> bool {
        // pace the producer so tests do not spin flat out
        thread::sleep(Duration::from_millis(1));
        true
    }

    fn read_ts_packet(&self, buffer: &mut PacketBuffer) -> bool {
        let region = buffer.write_region();
        let len = region.len();
        for packet in region.chunks_exact_mut(TS_PACKET_SIZE) {
            let cc = self.cc.fetch_add(1, Ordering::SeqCst) & 0x0f;
            packet[0] = 0x47;
            packet[1] = 0x01; // PID 256 high bits
            packet[2] = 0x00;
            packet[3] = 0x10 | cc;
        }
        buffer.commit(len);
        buffer.is_ready()
    }

    fn set_pid_filter(&self, _stream_id: StreamId, pid: u16) -> anyhow::Result<FilterHandle> {
        self.filters.lock().unwrap().insert(pid);
        Ok(FilterHandle::unbound())
    }

    fn clear_pid_filter(&self, _stream_id: StreamId, pid: u16, _handle: FilterHandle) {
        self.filters.lock().unwrap().remove(&pid);
    }

    fn read_signal(&self) -> anyhow::Result<SignalStats> {
        Ok(SignalStats {
            status: fe_status::FE_HAS_SIGNAL | fe_status::FE_HAS_LOCK,
            strength: 200,
            snr: 11,
            ber: 0,
            unc: 0,
        })
    }

    fn teardown(&self, _stream_id: StreamId) {}
}

fn satellite_tuning() -> TuningParams {
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

#[test]
fn pid_filters_converge_on_desired_set() {
    let device = LoopbackDevice::new();
    let mut stream = Stream::new(0, device.clone(), None);
    stream.update_tuning(satellite_tuning());

    stream.set_desired_pids(&[0, 17, 256, 257]);
    stream.set_pmt(17, true);
    stream.update().unwrap();
    assert_eq!(
        device.filters(),
        [0, 17, 256, 257].iter().copied().collect()
    );
    assert_eq!(stream.active_filters(), 4);
    assert_eq!(device.tunes(), 1);

    // drop two, keep two
    stream.set_desired_pids(&[0, 256]);
    stream.update().unwrap();
    assert_eq!(device.filters(), [0, 256].iter().copied().collect());
    assert_eq!(stream.active_filters(), 2);

    // nothing dirty: update performs no further tuning or filter work
    stream.update().unwrap();
    assert_eq!(device.tunes(), 1);
    assert_eq!(stream.active_filters(), 2);

    stream.teardown();
    assert!(device.filters().is_empty());
    assert_eq!(stream.state(), StreamState::Terminated);
}

#[test]
fn pmt_flag_annotates_installed_filter() {
    let device = LoopbackDevice::new();
    let mut frontend = Frontend::new(device.clone());
    frontend.set_tuning(satellite_tuning());
    frontend.pids_mut().set_desired(0, true);
    frontend.pids_mut().set_desired(17, true);
    frontend.pids_mut().set_pmt(17, true);
    frontend.update(7).unwrap();

    // the PMT-flagged entry went through the install branch with its
    // annotation, the plain one without
    assert!(frontend.pids().entry(17).is_pmt);
    assert!(frontend.pids().entry(17).filter.is_some());
    assert!(!frontend.pids().entry(0).is_pmt);
    assert!(frontend.pids().entry(0).filter.is_some());

    frontend.teardown(7);
    assert!(device.filters().is_empty());
}

#[test]
fn boundary_pids_roundtrip() {
    let device = LoopbackDevice::new();
    let mut stream = Stream::new(1, device.clone(), None);
    stream.update_tuning(satellite_tuning());

    stream.set_desired_pids(&[0, 8191]);
    stream.update().unwrap();
    assert_eq!(device.filters(), [0, 8191].iter().copied().collect());

    stream.teardown();
}

#[test]
fn streams_rtp_to_bound_client() {
    let receiver = UdpSocket::bind("127.0.0.1:0").unwrap();
    receiver
        .set_read_timeout(Some(Duration::from_secs(2)))
        .unwrap();

    let device = LoopbackDevice::new();
    let mut stream = Stream::new(2, device.clone(), None);
    stream.update_tuning(satellite_tuning());
    stream.set_desired_pids(&[256]);
    stream.update().unwrap();
    stream.set_client(receiver.local_addr().unwrap()).unwrap();
    stream.start().unwrap();
    assert_eq!(stream.state(), StreamState::Running);

    let mut packet = [0u8; 2048];
    let mut sequences = Vec::new();
    for _ in 0..5 {
        let (len, _) = receiver.recv_from(&mut packet).unwrap();
        assert_eq!(len, RTP_HEADER_SIZE + 7 * TS_PACKET_SIZE);
        // RTP fixed header: version 2, payload type 33 (MP2T)
        assert_eq!(packet[0], 0x80);
        assert_eq!(packet[1], 33);
        let ssrc = u32::from_be_bytes([packet[8], packet[9], packet[10], packet[11]]);
        assert_eq!(ssrc, stream.ssrc());
        // payload is whole TS packets
        let payload = &packet[RTP_HEADER_SIZE..len];
        assert_eq!(payload.len() % TS_PACKET_SIZE, 0);
        for ts in payload.chunks_exact(TS_PACKET_SIZE) {
            assert_eq!(ts[0], 0x47);
        }
        sequences.push(u16::from_be_bytes([packet[2], packet[3]]));
    }
    for pair in sequences.windows(2) {
        assert_eq!(pair[1], pair[0].wrapping_add(1));
    }

    assert!(stream.bytes_streamed() > 0);
    stream.teardown();
    assert_eq!(stream.state(), StreamState::Terminated);
}

#[test]
fn pause_acknowledges_and_resumes_without_retune() {
    let device = LoopbackDevice::new();
    let mut stream = Stream::new(3, device.clone(), None);
    stream.update_tuning(satellite_tuning());
    stream.set_desired_pids(&[0]);
    stream.update().unwrap();
    stream.start().unwrap();

    thread::sleep(Duration::from_millis(50));
    let started = std::time::Instant::now();
    stream.pause().unwrap();
    assert_eq!(stream.state(), StreamState::Paused);
    // the worker observes the request within one poll interval
    assert!(started.elapsed() < Duration::from_millis(500));

    // the monitor keeps working while paused
    let signal = stream.monitor_signal(false);
    assert!(signal.has_lock());

    // resume does not retune
    let tunes = device.tunes();
    stream.start().unwrap();
    assert_eq!(stream.state(), StreamState::Running);
    stream.update().unwrap();
    assert_eq!(device.tunes(), tunes);

    stream.teardown();
}

#[test]
fn retune_keeps_filters_installed() {
    let device = LoopbackDevice::new();
    let mut stream = Stream::new(4, device.clone(), None);
    stream.update_tuning(satellite_tuning());
    stream.set_desired_pids(&[0, 100]);
    stream.update().unwrap();
    assert_eq!(device.tunes(), 1);

    stream.start().unwrap();
    thread::sleep(Duration::from_millis(20));

    // frequency change while streaming
    let mut params = satellite_tuning();
    params.frequency = 12_187_500;
    stream.update_tuning(params);
    stream.update().unwrap();

    assert_eq!(device.tunes(), 2);
    // the PID table was untouched, filters stay installed
    assert_eq!(device.filters(), [0, 100].iter().copied().collect());

    stream.teardown();
}

#[test]
fn describe_reflects_tuning_and_signal() {
    let device = LoopbackDevice::new();
    let mut stream = Stream::new(0, device.clone(), None);
    assert_eq!(stream.describe(), "NONE");

    stream.update_tuning(satellite_tuning());
    stream.set_desired_pids(&[0, 17]);
    stream.update().unwrap();
    stream.monitor_signal(false);

    assert_eq!(
        stream.describe(),
        "ver=1.0;src=0;tuner=1,200,1,11,11493.75,v,dvbs2,8psk,auto,0.35,22000,3/4;pids=0,17"
    );
    stream.teardown();
}
