//! The per-stream pipeline: the frontend state machine that keeps the
//! tuner converged on the requested tuning and PID state, and the stream
//! facade the signalling layer drives.

mod worker;

use std::io;
use std::net::{SocketAddr, UdpSocket};
use std::process;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::thread;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use crate::descramble::Descrambler;
use crate::device::{Device, SignalStats, StreamId};
use crate::error::{FrontendError, StreamError};
use crate::tuning::{self, PidTable, TuningParams, MAX_PIDS};

const TUNE_ATTEMPTS: usize = 4;
const TUNE_BACKOFF: Duration = Duration::from_millis(450);
const LOCK_ATTEMPTS: usize = 4;
const LOCK_INTERVAL: Duration = Duration::from_millis(150);
const TAP_ATTEMPTS: usize = 4;
const TAP_BACKOFF: Duration = Duration::from_millis(150);
const PAUSE_TIMEOUT: Duration = Duration::from_millis(2500);

/// Worker/facade handshake states
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum StreamState {
    Paused,
    Running,
    PauseRequested,
    Terminated,
}

pub(crate) struct Control {
    pub(crate) state: Mutex<StreamState>,
    pub(crate) wakeup: Condvar,
    pub(crate) ring_reset: AtomicBool,
    pub(crate) overwrites: AtomicU64,
}

/// Owns the device plus the mutable tuning/PID state and keeps them
/// converged. Lives behind the stream's frontend lock; every operation
/// here is serialized against the others.
pub struct Frontend {
    device: Arc<dyn Device>,
    tuning: TuningParams,
    pids: PidTable,
    signal: SignalStats,
    tuned: bool,
}

impl Frontend {
    pub fn new(device: Arc<dyn Device>) -> Self {
        Frontend {
            device,
            tuning: TuningParams::default(),
            pids: PidTable::new(),
            signal: SignalStats::default(),
            tuned: false,
        }
    }

    /// Replaces the tuning block; the next `update` retunes
    pub fn set_tuning(&mut self, mut params: TuningParams) {
        params.mark_dirty();
        self.tuning = params;
    }

    #[inline]
    pub fn tuning(&self) -> &TuningParams {
        &self.tuning
    }

    #[inline]
    pub fn pids(&self) -> &PidTable {
        &self.pids
    }

    #[inline]
    pub fn pids_mut(&mut self) -> &mut PidTable {
        &mut self.pids
    }

    #[inline]
    pub fn signal(&self) -> SignalStats {
        self.signal
    }

    #[inline]
    pub fn is_tuned(&self) -> bool {
        self.tuned
    }

    /// Applies pending changes: retunes when the tuning block is dirty,
    /// then reconciles the PID filters when the table is dirty. Dirty
    /// flags survive a failed phase, so the next call reapplies
    /// everything.
    pub fn update(&mut self, stream_id: StreamId) -> Result<(), FrontendError> {
        log::debug!("Stream: {}, Updating frontend...", stream_id);

        if self.tuning.is_dirty() {
            self.tuned = false;
            self.device.close_tap();
        }

        self.setup_and_tune(stream_id)?;

        if self.pids.is_dirty() {
            log::info!("Stream: {}, Updating PID filters...", stream_id);
            self.reconcile(stream_id)?;
            self.pids.clear_dirty();
        }

        log::debug!("Stream: {}, Updating frontend (Finished)", stream_id);
        Ok(())
    }

    fn setup_and_tune(&mut self, stream_id: StreamId) -> Result<(), FrontendError> {
        if !self.tuned {
            self.device.open().map_err(FrontendError::TuneFailed)?;

            let mut attempt = 0;
            loop {
                match self.device.tune(stream_id, &self.tuning) {
                    Ok(()) => break,
                    Err(e) => {
                        attempt += 1;
                        if attempt >= TUNE_ATTEMPTS {
                            return Err(FrontendError::TuneFailed(e));
                        }
                        thread::sleep(TUNE_BACKOFF);
                    }
                }
            }
            self.tuning.clear_dirty();

            log::info!("Stream: {}, Waiting on lock...", stream_id);
            for _ in 0..LOCK_ATTEMPTS {
                if let Ok(signal) = self.device.read_signal() {
                    self.signal = signal;
                    if signal.has_lock() {
                        self.tuned = true;
                        log::info!(
                            "Stream: {}, Tuned and locked (FE status 0x{:02X})",
                            stream_id,
                            signal.status.bits()
                        );
                        break;
                    }
                    log::info!(
                        "Stream: {}, Not locked yet   (FE status 0x{:02X})...",
                        stream_id,
                        signal.status.bits()
                    );
                }
                thread::sleep(LOCK_INTERVAL);
            }
            // A missing lock is not fatal: the stream may start and the
            // monitor reflects lock acquisition later.
        }

        let mut attempt = 0;
        loop {
            match self.device.open_tap() {
                Ok(()) => break,
                Err(e) => {
                    attempt += 1;
                    if attempt >= TAP_ATTEMPTS {
                        return Err(FrontendError::TapOpen(e));
                    }
                    thread::sleep(TAP_BACKOFF);
                }
            }
        }
        Ok(())
    }

    /// Drives the device to match the desired PID set: installs filters
    /// for newly wanted PIDs, stops and closes dropped ones. Idempotent.
    fn reconcile(&mut self, stream_id: StreamId) -> Result<(), FrontendError> {
        let device = Arc::clone(&self.device);
        for pid in 0..MAX_PIDS as u16 {
            let (desired, installed) = {
                let entry = self.pids.entry(pid);
                (entry.desired, entry.filter.is_some())
            };
            if desired && !installed {
                let handle = device
                    .set_pid_filter(stream_id, pid)
                    .map_err(|source| FrontendError::FilterSetup { pid, source })?;
                let entry = self.pids.entry_mut(pid);
                entry.filter = Some(handle);
                log::debug!(
                    "Stream: {}, Set filter PID: {:04}{}",
                    stream_id,
                    pid,
                    if entry.is_pmt { " - PMT" } else { "" }
                );
            } else if !desired && installed {
                log::debug!(
                    "Stream: {}, Remove filter PID: {:04} - Packet Count: {}",
                    stream_id,
                    pid,
                    self.pids.entry(pid).packet_count
                );
                let handle = self.pids.entry_mut(pid).filter.take().unwrap();
                device.clear_pid_filter(stream_id, pid, handle);
                self.pids.reset_entry(pid);
            }
        }
        Ok(())
    }

    /// Closes every bound filter, resets counters and releases the
    /// device handles
    pub fn teardown(&mut self, stream_id: StreamId) {
        let device = Arc::clone(&self.device);
        for pid in 0..MAX_PIDS as u16 {
            if let Some(handle) = self.pids.entry_mut(pid).filter.take() {
                device.clear_pid_filter(stream_id, pid, handle);
                self.pids.reset_entry(pid);
            }
        }
        // desired PIDs stay; a later update would reinstall them
        self.pids.mark_dirty();
        self.tuned = false;
        device.teardown(stream_id);
    }

    /// Refreshes the signal snapshot; safe to call while streaming
    pub fn monitor_signal(&mut self, show_status: bool) -> SignalStats {
        match self.device.read_signal() {
            Ok(signal) => {
                self.signal = signal;
                if show_status {
                    log::info!(
                        "status {:02x} | signal {:3}% | snr {:3}% | ber {} | unc {} | Locked {}",
                        signal.status.bits(),
                        signal.strength,
                        signal.snr,
                        signal.ber,
                        signal.unc,
                        signal.has_lock() as u8
                    );
                }
            }
            Err(e) => {
                log::error!("FE_READ_STATUS failed: {:#}", e);
            }
        }
        self.signal
    }

    /// SAT>IP describe attribute string for this stream
    pub fn describe(&self, stream_id: StreamId) -> String {
        tuning::describe(
            stream_id,
            &self.tuning,
            &self.signal,
            &self.pids.desired_csv(),
        )
    }
}

/// The bound egress endpoint of a stream
pub struct StreamClient {
    addr: SocketAddr,
    socket: UdpSocket,
    bytes_streamed: u64,
    last_active: Instant,
}

impl StreamClient {
    pub fn new(addr: SocketAddr) -> io::Result<Self> {
        Ok(StreamClient {
            addr,
            socket: UdpSocket::bind(("0.0.0.0", 0))?,
            bytes_streamed: 0,
            last_active: Instant::now(),
        })
    }

    pub(crate) fn send(&mut self, packet: &[u8]) -> io::Result<()> {
        self.socket.send_to(packet, self.addr)?;
        self.bytes_streamed += packet.len() as u64;
        self.last_active = Instant::now();
        Ok(())
    }

    #[inline]
    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    #[inline]
    pub fn bytes_streamed(&self) -> u64 {
        self.bytes_streamed
    }

    #[inline]
    pub fn last_active(&self) -> Instant {
        self.last_active
    }
}

/// One active stream: identity, client binding, frontend and worker.
/// This is the object the signalling layer holds.
pub struct Stream {
    id: StreamId,
    ssrc: u32,
    timestamp_seed: u32,
    device: Arc<dyn Device>,
    frontend: Arc<Mutex<Frontend>>,
    control: Arc<Control>,
    client: Arc<Mutex<Option<StreamClient>>>,
    descrambler: Option<Arc<dyn Descrambler>>,
    worker: Option<JoinHandle<()>>,
}

impl Stream {
    pub fn new(
        id: StreamId,
        device: Arc<dyn Device>,
        descrambler: Option<Arc<dyn Descrambler>>,
    ) -> Self {
        let ssrc = process::id().wrapping_shl(8) ^ id as u32;
        Stream {
            id,
            ssrc,
            timestamp_seed: ssrc.wrapping_mul(0x9e37_79b9),
            frontend: Arc::new(Mutex::new(Frontend::new(Arc::clone(&device)))),
            control: Arc::new(Control {
                state: Mutex::new(StreamState::Paused),
                wakeup: Condvar::new(),
                ring_reset: AtomicBool::new(true),
                overwrites: AtomicU64::new(0),
            }),
            client: Arc::new(Mutex::new(None)),
            device,
            descrambler,
            worker: None,
        }
    }

    #[inline]
    pub fn id(&self) -> StreamId {
        self.id
    }

    #[inline]
    pub fn ssrc(&self) -> u32 {
        self.ssrc
    }

    /// Binds the egress endpoint the worker sends to
    pub fn set_client(&self, addr: SocketAddr) -> io::Result<()> {
        *self.client.lock().unwrap() = Some(StreamClient::new(addr)?);
        Ok(())
    }

    pub fn client_addr(&self) -> Option<SocketAddr> {
        self.client.lock().unwrap().as_ref().map(|c| c.addr())
    }

    pub fn bytes_streamed(&self) -> u64 {
        self.client
            .lock()
            .unwrap()
            .as_ref()
            .map(|c| c.bytes_streamed())
            .unwrap_or(0)
    }

    /// Replaces the tuning block under the frontend lock; applied by the
    /// next `update`
    pub fn update_tuning(&self, params: TuningParams) {
        self.frontend.lock().unwrap().set_tuning(params);
    }

    /// Replaces the desired PID set under the frontend lock; applied by
    /// the next `update`
    pub fn set_desired_pids(&self, pids: &[u16]) {
        self.frontend.lock().unwrap().pids_mut().set_desired_set(pids);
    }

    pub fn add_pid(&self, pid: u16) {
        self.frontend.lock().unwrap().pids_mut().set_desired(pid, true);
    }

    pub fn remove_pid(&self, pid: u16) {
        self.frontend.lock().unwrap().pids_mut().set_desired(pid, false);
    }

    /// Flags a PID as carrying a PMT, annotating its filter install log
    /// line; the signalling layer learns this from the PAT it requested
    pub fn set_pmt(&self, pid: u16, is_pmt: bool) {
        self.frontend.lock().unwrap().pids_mut().set_pmt(pid, is_pmt);
    }

    /// Applies pending tuning/PID changes to the hardware
    pub fn update(&self) -> Result<(), FrontendError> {
        self.frontend.lock().unwrap().update(self.id)
    }

    /// Starts or resumes streaming; spawns the worker on first use
    pub fn start(&mut self) -> Result<(), StreamError> {
        self.control.ring_reset.store(true, Ordering::Release);

        if self.worker.is_none() {
            let context = worker::WorkerContext {
                id: self.id,
                device: Arc::clone(&self.device),
                frontend: Arc::clone(&self.frontend),
                control: Arc::clone(&self.control),
                client: Arc::clone(&self.client),
                descrambler: self.descrambler.clone(),
            };
            let ssrc = self.ssrc;
            let timestamp = self.timestamp_seed;
            let handle = thread::Builder::new()
                .name(format!("stream{}", self.id))
                .spawn(move || worker::run(context, ssrc, timestamp))
                .map_err(StreamError::Spawn)?;
            self.worker = Some(handle);
        }

        *self.control.state.lock().unwrap() = StreamState::Running;
        self.control.wakeup.notify_all();

        match self.client_addr() {
            Some(addr) => log::info!("Stream: {}, Start stream to {}", self.id, addr),
            None => log::info!("Stream: {}, Start stream (no client bound)", self.id),
        }
        Ok(())
    }

    /// Resumes a paused stream; ring indices rewind, sequence numbers do
    /// not
    pub fn restart(&mut self) -> Result<(), StreamError> {
        log::info!("Stream: {}, Restart stream", self.id);
        self.start()
    }

    /// Requests a pause and waits for the worker to acknowledge. On
    /// timeout the state is forced to `Paused` and the failure reported.
    pub fn pause(&self) -> Result<(), StreamError> {
        let mut state = self.control.state.lock().unwrap();
        if *state != StreamState::Running {
            return Ok(());
        }
        *state = StreamState::PauseRequested;
        self.control.wakeup.notify_all();

        let deadline = Instant::now() + PAUSE_TIMEOUT;
        while *state != StreamState::Paused {
            let now = Instant::now();
            if now >= deadline {
                *state = StreamState::Paused;
                log::error!("Stream: {}, Pause stream TIMEOUT", self.id);
                return Err(StreamError::PauseTimeout);
            }
            let (guard, _) = self
                .control
                .wakeup
                .wait_timeout(state, deadline - now)
                .unwrap();
            state = guard;
        }
        drop(state);

        log::info!(
            "Stream: {}, Paused stream (Streamed {:.3} MBytes)",
            self.id,
            self.bytes_streamed() as f64 / (1024.0 * 1024.0)
        );
        Ok(())
    }

    /// Stops the worker, tears down the frontend and releases the client
    /// binding
    pub fn teardown(&mut self) {
        *self.control.state.lock().unwrap() = StreamState::Terminated;
        self.control.wakeup.notify_all();

        if let Some(handle) = self.worker.take() {
            let _ = handle.join();
        }
        if let Some(descrambler) = &self.descrambler {
            descrambler.stop(self.id);
        }
        self.frontend.lock().unwrap().teardown(self.id);
        *self.client.lock().unwrap() = None;
        log::info!("Stream: {}, Destroy stream", self.id);
    }

    pub fn state(&self) -> StreamState {
        *self.control.state.lock().unwrap()
    }

    pub fn monitor_signal(&self, show_status: bool) -> SignalStats {
        self.frontend.lock().unwrap().monitor_signal(show_status)
    }

    pub fn describe(&self) -> String {
        self.frontend.lock().unwrap().describe(self.id)
    }

    /// Ready buffers lost to a lapped consumer since stream creation
    pub fn overwrites(&self) -> u64 {
        self.control.overwrites.load(Ordering::Relaxed)
    }

    /// Number of PIDs with an installed kernel filter
    pub fn active_filters(&self) -> usize {
        self.frontend.lock().unwrap().pids().active_filters()
    }

    pub fn is_tuned(&self) -> bool {
        self.frontend.lock().unwrap().is_tuned()
    }
}

impl Drop for Stream {
    fn drop(&mut self) {
        if self.worker.is_some() {
            self.teardown();
        }
    }
}
