//! The per-stream streaming worker: polls the device for TS data, fills
//! the packet ring, descrambles and drains ready buffers to the client.

use std::sync::atomic::Ordering;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::descramble::Descrambler;
use crate::device::{Device, StreamId};
use crate::rtp::{Ring, TS_PACKET_SIZE};

use super::{Control, Frontend, StreamClient, StreamState};

/// Bounded wait on the device per loop iteration; also the worst-case
/// latency for observing a state change while idle on data
const POLL_TIMEOUT: Duration = Duration::from_millis(100);

pub(crate) struct WorkerContext {
    pub id: StreamId,
    pub device: Arc<dyn Device>,
    pub frontend: Arc<Mutex<Frontend>>,
    pub control: Arc<Control>,
    pub client: Arc<Mutex<Option<StreamClient>>>,
    pub descrambler: Option<Arc<dyn Descrambler>>,
}

pub(crate) fn run(context: WorkerContext, ssrc: u32, timestamp: u32) {
    raise_priority(context.id);
    let mut ring = Ring::new(ssrc, timestamp);

    loop {
        if !await_running(&context) {
            break;
        }
        if context.control.ring_reset.swap(false, Ordering::AcqRel) {
            ring.restart();
        }

        if !context.device.is_data_available(POLL_TIMEOUT) {
            continue;
        }
        if !context.device.read_ts_packet(ring.write_buffer()) {
            continue;
        }

        // one buffer completed
        account_packets(&context, ring.write_buffer().payload());
        if let Some(descrambler) = &context.descrambler {
            descrambler.descramble(context.id, ring.write_buffer());
        }
        if ring.advance_write() {
            context.control.overwrites.fetch_add(1, Ordering::Relaxed);
            log::warn!("Stream: {}, Packet ring overwrote an unsent buffer", context.id);
        }
        drain(&context, &mut ring);
    }

    log::debug!("Stream: {}, Streaming worker exited", context.id);
}

/// Observes the state ladder. Returns false once the stream is
/// terminated; parks on the condvar while paused.
fn await_running(context: &WorkerContext) -> bool {
    let mut state = context.control.state.lock().unwrap();
    loop {
        match *state {
            StreamState::Running => return true,
            StreamState::Terminated => return false,
            StreamState::PauseRequested => {
                *state = StreamState::Paused;
                context.control.wakeup.notify_all();
                if let Some(descrambler) = &context.descrambler {
                    descrambler.stop(context.id);
                }
                log::debug!("Stream: {}, Worker paused", context.id);
            }
            StreamState::Paused => {
                state = context.control.wakeup.wait(state).unwrap();
            }
        }
    }
}

/// Pushes every ready buffer in order to the bound client. Without a
/// client the ready prefix is discarded so the producer keeps moving.
fn drain(context: &WorkerContext, ring: &mut Ring) {
    let mut guard = context.client.lock().unwrap();
    match guard.as_mut() {
        Some(client) => {
            while let Some(buffer) = ring.pop_ready() {
                if let Err(e) = client.send(buffer.as_rtp()) {
                    log::debug!("Stream: {}, UDP send failed: {}", context.id, e);
                }
            }
        }
        None => while ring.pop_ready().is_some() {},
    }
}

/// Per-PID packet and continuity accounting. Best effort: the data path
/// never waits on the frontend lock.
fn account_packets(context: &WorkerContext, payload: &[u8]) {
    let mut frontend = match context.frontend.try_lock() {
        Ok(guard) => guard,
        Err(_) => return,
    };
    for packet in payload.chunks_exact(TS_PACKET_SIZE) {
        if packet[0] != 0x47 {
            continue;
        }
        let pid = u16::from(packet[1] & 0x1f) << 8 | u16::from(packet[2]);
        let cc = packet[3] & 0x0f;
        frontend.pids_mut().account(pid, cc);
    }
}

fn raise_priority(stream_id: StreamId) {
    let rc = unsafe { nix::libc::setpriority(nix::libc::PRIO_PROCESS as _, 0, -5) };
    if rc != 0 {
        log::debug!("Stream: {}, Could not raise worker thread priority", stream_id);
    }
}
