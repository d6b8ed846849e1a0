//! The stream core: state machine, worker loops, and the public interface.
//!
//! A [`Stream`] owns two background workers. The writer drains the outbound
//! byte buffer into sealed frames, publishes them, and keeps at most
//! `window` frames in flight; the reader polls the substrate for the next
//! expected frame, extracts acknowledgements, and reassembles payload bytes
//! in index order. Callers interact only through `read`/`write`/`close` and
//! the deadline setters; the workers coordinate through a small set of
//! single-slot signals.

use std::collections::HashSet;
use std::fmt;
use std::sync::{Arc, Weak};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use bytes::BytesMut;
use tokio::sync::{watch, Notify};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

use crate::core::constants::{
    DEFAULT_POLL_INTERVAL, DEFAULT_TID_PREFIX, DEFAULT_TIMEOUT, DEFAULT_WINDOW,
    DEFAULT_WRITE_BUF_FRAMES, NETWORK_TAG,
};
use crate::core::error::{StoreError, StreamError};
use crate::core::traits::{EpochClock, MessageStore};
use crate::crypto::kdf::{tid, KeySchedule};
use crate::frame::{self, Frame, FrameGeometry, FrameKind};
use crate::timer::{unix_now_ms, TimerQueue, TimerTarget};

/// Delivery discipline of a stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    /// Ordered, acknowledged, retransmitted.
    Reliable,
    /// Fire-and-forget: no acknowledgements, no retransmissions. Declared
    /// for parity with the wire format; intentionally minimal.
    Scramble,
}

/// State of one direction of a stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HalfState {
    /// Frames flow.
    Open,
    /// A close was requested; the writer is draining toward a terminal
    /// frame. (Only the write half passes through this state.)
    Closing,
    /// The terminal frame has been published or observed.
    Closed,
}

/// Stream construction parameters.
#[derive(Debug, Clone)]
pub struct StreamConfig {
    /// Delivery discipline.
    pub mode: Mode,
    /// Sliding-window width: unacknowledged frames the writer may keep in
    /// flight. Must be at least 1.
    pub window: u64,
    /// Soft cap on the outbound buffer, in frame payloads. `write` blocks
    /// once the buffer holds this many frames' worth of bytes.
    pub write_buf_frames: usize,
    /// Fallback timeout for blocking calls when no deadline is set.
    pub default_timeout: Duration,
    /// Pause between substrate fetch attempts while the next frame has not
    /// arrived.
    pub poll_interval: Duration,
    /// Domain-separation prefix mixed into every storage address. Both
    /// peers must use the same value.
    pub tid_prefix: Vec<u8>,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            mode: Mode::Reliable,
            window: DEFAULT_WINDOW,
            write_buf_frames: DEFAULT_WRITE_BUF_FRAMES,
            default_timeout: DEFAULT_TIMEOUT,
            poll_interval: DEFAULT_POLL_INTERVAL,
            tid_prefix: DEFAULT_TID_PREFIX.to_vec(),
        }
    }
}

/// An opaque stream endpoint address.
///
/// Derived deterministically from one of the handshake secrets, so both
/// peers compute the same pair of addresses without exchanging them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamAddr {
    address: String,
}

impl StreamAddr {
    /// The network-family tag.
    pub fn network(&self) -> &'static str {
        NETWORK_TAG
    }

    /// The address string.
    pub fn as_str(&self) -> &str {
        &self.address
    }
}

impl fmt::Display for StreamAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.address)
    }
}

/// A point-in-time snapshot of the stream's counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StreamStats {
    /// Next inbound frame index to fetch.
    pub read_idx: u64,
    /// Next outbound frame index to publish.
    pub write_idx: u64,
    /// Highest acknowledgement this side has sent.
    pub ack_idx: u64,
    /// Outbound frames awaiting acknowledgement.
    pub outstanding: usize,
    /// Receive-half state.
    pub read_state: HalfState,
    /// Send-half state.
    pub write_state: HalfState,
}

/// Mutable stream state, guarded by the stream mutex.
struct State {
    write_buf: BytesMut,
    read_buf: BytesMut,
    f_read_idx: u64,
    f_write_idx: u64,
    f_ack_idx: u64,
    rstate: HalfState,
    wstate: HalfState,
    read_deadline: Option<Instant>,
    write_deadline: Option<Instant>,
    fatal: Option<StreamError>,
}

/// Worker/caller wakeups. Each is a single-slot coalescing signal: posting
/// while a previous post is still pending is a no-op.
struct Signals {
    /// Writer: data buffered, ack owed, or teardown requested.
    on_flush: Notify,
    /// Writer: outstanding frames were acknowledged.
    on_ack: Notify,
    /// Blocked `write` callers: the writer made forward progress.
    on_write: Notify,
    /// Blocked `read` callers: bytes arrived or the half closed.
    on_read: Notify,
    /// Blocked callers: a deadline changed; recompute the wait.
    on_deadline: Notify,
}

/// A published frame awaiting acknowledgement, queued for retransmission.
struct PendingFrame {
    frame: Frame,
}

struct Inner {
    store: Arc<dyn MessageStore>,
    clock: Arc<dyn EpochClock>,
    cfg: StreamConfig,
    geometry: FrameGeometry,
    keys: KeySchedule,
    laddr: StreamAddr,
    raddr: StreamAddr,
    state: Mutex<State>,
    /// Outbound frame indices not yet cumulatively acknowledged. Its own
    /// lock; never held across a substrate operation.
    outstanding: Mutex<HashSet<u64>>,
    timers: TimerQueue<PendingFrame>,
    sig: Signals,
    /// Becomes true once the writer has published the terminal frame.
    closed_tx: watch::Sender<bool>,
    halt: CancellationToken,
}

/// Timer-queue callback: re-publish a frame if it is still unacknowledged.
struct Retransmit {
    inner: Weak<Inner>,
}

#[async_trait]
impl TimerTarget<PendingFrame> for Retransmit {
    async fn expired(&self, pending: PendingFrame) {
        let Some(inner) = self.inner.upgrade() else {
            return;
        };
        let still_waiting = inner
            .outstanding
            .lock()
            .contains(&pending.frame.id);
        if !still_waiting {
            return;
        }
        inner.republish(pending).await;
    }
}

/// A reliable, authenticated byte stream over a key-addressable store.
///
/// Construction derives all key material from the two handshake secrets and
/// starts the worker tasks, so it must happen inside a tokio runtime. Wrap
/// the stream in an [`Arc`] to read and write from different tasks.
///
/// Dropping the stream aborts it; call [`close`](Stream::close) first for a
/// clean shutdown that flushes buffered data and publishes the terminal
/// frame.
pub struct Stream {
    inner: Arc<Inner>,
}

impl Stream {
    /// Open a stream with default configuration.
    ///
    /// Each peer passes its own handshake secret first; the secrets should
    /// carry at least 32 bytes of entropy each.
    pub fn new(
        store: Arc<dyn MessageStore>,
        clock: Arc<dyn EpochClock>,
        my_secret: &[u8],
        their_secret: &[u8],
    ) -> Result<Self, StreamError> {
        Self::with_config(store, clock, my_secret, their_secret, StreamConfig::default())
    }

    /// Open a stream with explicit configuration.
    pub fn with_config(
        store: Arc<dyn MessageStore>,
        clock: Arc<dyn EpochClock>,
        my_secret: &[u8],
        their_secret: &[u8],
        cfg: StreamConfig,
    ) -> Result<Self, StreamError> {
        if cfg.window == 0 {
            return Err(StreamError::Config("window must be at least 1".into()));
        }
        let geometry = FrameGeometry::for_substrate(store.payload_size())?;
        let keys = KeySchedule::derive(my_secret, their_secret);
        let laddr = StreamAddr {
            address: BASE64.encode(keys.local_addr_material()),
        };
        let raddr = StreamAddr {
            address: BASE64.encode(keys.remote_addr_material()),
        };

        let inner = Arc::new_cyclic(|weak: &Weak<Inner>| {
            let timers = TimerQueue::new(Arc::new(Retransmit {
                inner: weak.clone(),
            }));
            Inner {
                store,
                clock,
                cfg,
                geometry,
                keys,
                laddr,
                raddr,
                state: Mutex::new(State {
                    write_buf: BytesMut::new(),
                    read_buf: BytesMut::new(),
                    f_read_idx: 0,
                    f_write_idx: 0,
                    f_ack_idx: 0,
                    rstate: HalfState::Open,
                    wstate: HalfState::Open,
                    read_deadline: None,
                    write_deadline: None,
                    fatal: None,
                }),
                outstanding: Mutex::new(HashSet::new()),
                timers,
                sig: Signals {
                    on_flush: Notify::new(),
                    on_ack: Notify::new(),
                    on_write: Notify::new(),
                    on_read: Notify::new(),
                    on_deadline: Notify::new(),
                },
                closed_tx: watch::channel(false).0,
                halt: CancellationToken::new(),
            }
        });

        tokio::spawn(reader_loop(inner.clone()));
        tokio::spawn(writer_loop(inner.clone()));
        Ok(Self { inner })
    }

    /// Read reassembled bytes into `buf`.
    ///
    /// Blocks until at least one byte is available, the receive half
    /// closes, a deadline elapses, or the stream halts. Returns the number
    /// of bytes copied; `Ok(0)` means end of stream (or, with no deadline
    /// set, that the default timeout passed with nothing to read). A short
    /// read is not end of stream.
    pub async fn read(&self, buf: &mut [u8]) -> Result<usize, StreamError> {
        if buf.is_empty() {
            return Ok(0);
        }
        let inner = &self.inner;
        loop {
            let mut st = inner.state.lock();
            if let Some(err) = &st.fatal {
                return Err(err.clone());
            }
            if let Some(deadline) = st.read_deadline {
                if Instant::now() >= deadline {
                    return Err(StreamError::DeadlineExceeded);
                }
            }
            if !st.read_buf.is_empty() {
                let n = buf.len().min(st.read_buf.len());
                let bytes = st.read_buf.split_to(n);
                buf[..n].copy_from_slice(&bytes);
                return Ok(n);
            }
            if st.rstate == HalfState::Closed {
                return Ok(0);
            }
            if st.wstate == HalfState::Closed && inner.cfg.mode == Mode::Reliable {
                return Ok(0);
            }
            if inner.halt.is_cancelled() {
                return Ok(0);
            }

            let has_deadline = st.read_deadline.is_some();
            let wait_until = st
                .read_deadline
                .unwrap_or_else(|| Instant::now() + inner.cfg.default_timeout);
            let readable = inner.sig.on_read.notified();
            let deadline_changed = inner.sig.on_deadline.notified();
            tokio::pin!(readable, deadline_changed);
            readable.as_mut().enable();
            deadline_changed.as_mut().enable();
            drop(st);

            tokio::select! {
                _ = &mut readable => {}
                _ = &mut deadline_changed => {}
                _ = inner.halt.cancelled() => {}
                _ = tokio::time::sleep_until(wait_until) => {
                    if has_deadline {
                        return Err(StreamError::DeadlineExceeded);
                    }
                    return Ok(0);
                }
            }
        }
    }

    /// Queue `buf` for transmission.
    ///
    /// Never returns a short count: if the outbound buffer is at its soft
    /// cap, the call blocks until the writer makes forward progress, then
    /// buffers everything. Fails with [`StreamError::Closed`] once the send
    /// half is closing or closed.
    pub async fn write(&self, buf: &[u8]) -> Result<usize, StreamError> {
        if buf.is_empty() {
            return Ok(0);
        }
        let inner = &self.inner;
        let mut closed_rx = inner.closed_tx.subscribe();
        loop {
            let mut st = inner.state.lock();
            if let Some(err) = &st.fatal {
                return Err(err.clone());
            }
            if st.wstate != HalfState::Open || inner.halt.is_cancelled() {
                return Err(StreamError::Closed);
            }
            if let Some(deadline) = st.write_deadline {
                if Instant::now() >= deadline {
                    return Err(StreamError::DeadlineExceeded);
                }
            }

            let cap = inner.cfg.write_buf_frames * inner.geometry.max_payload;
            if st.write_buf.len() < cap {
                st.write_buf.extend_from_slice(buf);
                drop(st);
                inner.sig.on_flush.notify_one();
                return Ok(buf.len());
            }

            let has_deadline = st.write_deadline.is_some();
            let wait_until = st
                .write_deadline
                .unwrap_or_else(|| Instant::now() + inner.cfg.default_timeout);
            let progressed = inner.sig.on_write.notified();
            let deadline_changed = inner.sig.on_deadline.notified();
            tokio::pin!(progressed, deadline_changed);
            progressed.as_mut().enable();
            deadline_changed.as_mut().enable();
            drop(st);

            tokio::select! {
                _ = &mut progressed => {}
                _ = &mut deadline_changed => {}
                // Fall through on close and halt so the loop re-checks
                // `fatal` first; a corrupted stream reports corruption,
                // not a plain close.
                _ = closed_rx.wait_for(|closed| *closed) => {}
                _ = inner.halt.cancelled() => {}
                _ = tokio::time::sleep_until(wait_until) => {
                    if has_deadline {
                        return Err(StreamError::DeadlineExceeded);
                    }
                    return Err(StreamError::Closed);
                }
            }
        }
    }

    /// Close the stream.
    ///
    /// Stops the receive half, marks the send half as closing, and blocks
    /// until the writer has drained the outbound buffer and published the
    /// terminal frame. Idempotent; only the first call blocks.
    pub async fn close(&self) -> Result<(), StreamError> {
        let inner = &self.inner;
        let mut closed_rx = inner.closed_tx.subscribe();
        {
            let mut st = inner.state.lock();
            st.rstate = HalfState::Closed;
            if st.wstate != HalfState::Open {
                return Ok(());
            }
            st.wstate = HalfState::Closing;
        }
        inner.sig.on_flush.notify_one();
        inner.sig.on_read.notify_one();

        tokio::select! {
            _ = closed_rx.wait_for(|closed| *closed) => {}
            _ = inner.halt.cancelled() => {}
        }
        Ok(())
    }

    /// Set both the read and write deadlines. `None` disables them.
    ///
    /// Deadlines are absolute and apply to pending as well as future
    /// operations; a blocked call observes the change immediately.
    pub fn set_deadline(&self, deadline: Option<Instant>) {
        {
            let mut st = self.inner.state.lock();
            st.read_deadline = deadline;
            st.write_deadline = deadline;
        }
        self.inner.sig.on_deadline.notify_waiters();
    }

    /// Set the deadline for `read` calls. `None` disables it.
    pub fn set_read_deadline(&self, deadline: Option<Instant>) {
        {
            let mut st = self.inner.state.lock();
            st.read_deadline = deadline;
        }
        self.inner.sig.on_deadline.notify_waiters();
    }

    /// Set the deadline for `write` calls. `None` disables it.
    pub fn set_write_deadline(&self, deadline: Option<Instant>) {
        {
            let mut st = self.inner.state.lock();
            st.write_deadline = deadline;
        }
        self.inner.sig.on_deadline.notify_waiters();
    }

    /// The local endpoint address.
    pub fn local_addr(&self) -> &StreamAddr {
        &self.inner.laddr
    }

    /// The remote endpoint address.
    pub fn remote_addr(&self) -> &StreamAddr {
        &self.inner.raddr
    }

    /// Snapshot the stream counters.
    pub fn stats(&self) -> StreamStats {
        let st = self.inner.state.lock();
        let outstanding = self
            .inner
            .outstanding
            .lock()
            .len();
        StreamStats {
            read_idx: st.f_read_idx,
            write_idx: st.f_write_idx,
            ack_idx: st.f_ack_idx,
            outstanding,
            read_state: st.rstate,
            write_state: st.wstate,
        }
    }

    /// Abort the stream: cancel the workers and the retransmission queue
    /// and wake every blocked caller with an end-of-stream result.
    pub fn halt(&self) {
        self.inner.shutdown();
    }
}

impl Drop for Stream {
    fn drop(&mut self) {
        self.inner.shutdown();
    }
}

impl fmt::Debug for Stream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Stream")
            .field("laddr", &self.inner.laddr.address)
            .field("raddr", &self.inner.raddr.address)
            .finish_non_exhaustive()
    }
}

impl Inner {
    /// Absolute deadline (unix ms) for retransmitting a frame published
    /// now: the rest of the current epoch plus two full periods.
    fn retransmit_priority(&self) -> u64 {
        let info = self.clock.now();
        let delay = info.remaining + self.clock.period() * 2;
        unix_now_ms() + delay.as_millis() as u64
    }

    /// Seal and publish a freshly assembled frame, then advance the write
    /// index and arm retransmission.
    async fn tx_frame(&self, frame: &Frame) -> Result<(), StreamError> {
        let key = self.keys.tx_frame_key(frame.id);
        let sealed = frame::seal(frame, &key, &self.geometry)?;
        let address = tid(&self.cfg.tid_prefix, &self.keys.tx_frame_id(frame.id));

        {
            let mut st = self.state.lock();
            if frame.ack > st.f_ack_idx {
                st.f_ack_idx = frame.ack;
            }
        }

        trace!(frame = frame.id, kind = ?frame.kind, len = frame.payload.len(), "publishing frame");
        if let Err(err) = self.store.put(address, sealed).await {
            // The retransmission timer repairs a lost publish in reliable
            // mode; in scramble mode the frame is simply gone.
            warn!(frame = frame.id, %err, "publish failed");
        }

        {
            let mut st = self.state.lock();
            st.f_write_idx += 1;
        }

        if self.cfg.mode == Mode::Reliable {
            self.outstanding.lock().insert(frame.id);
            self.timers.push(
                self.retransmit_priority(),
                PendingFrame {
                    frame: frame.clone(),
                },
            );
        }
        Ok(())
    }

    /// Re-publish a still-unacknowledged frame: same identifier, same key,
    /// fresh nonce. The write index does not move.
    async fn republish(&self, pending: PendingFrame) {
        let key = self.keys.tx_frame_key(pending.frame.id);
        let sealed = match frame::seal(&pending.frame, &key, &self.geometry) {
            Ok(sealed) => sealed,
            Err(err) => {
                warn!(frame = pending.frame.id, %err, "retransmit seal failed");
                return;
            }
        };
        let address = tid(&self.cfg.tid_prefix, &self.keys.tx_frame_id(pending.frame.id));
        debug!(frame = pending.frame.id, "retransmitting unacknowledged frame");
        if let Err(err) = self.store.put(address, sealed).await {
            warn!(frame = pending.frame.id, %err, "retransmit publish failed");
        }
        self.timers.push(self.retransmit_priority(), pending);
    }

    /// Try to fetch and open the inbound frame at `idx`.
    ///
    /// `Ok(None)` means the frame is not available yet (or the fetch failed
    /// transiently); decrypt or decode failure is fatal corruption.
    async fn fetch_frame(&self, idx: u64) -> Result<Option<Frame>, StreamError> {
        let address = tid(&self.cfg.tid_prefix, &self.keys.rx_frame_id(idx));
        let ciphertext = match self.store.get(address).await {
            Ok(value) => value,
            Err(StoreError::NotFound) => return Ok(None),
            Err(err) => {
                debug!(frame = idx, %err, "fetch failed, will retry");
                return Ok(None);
            }
        };
        let key = self.keys.rx_frame_key(idx);
        match frame::open(&ciphertext, &key, idx) {
            Ok(frame) => Ok(Some(frame)),
            Err(err) => {
                warn!(frame = idx, %err, "inbound frame failed authentication");
                Err(StreamError::Corrupted)
            }
        }
    }

    /// Prune the outstanding set up to the peer's cumulative ack and wake
    /// the writer if anything was released.
    fn process_ack(&self, frame: &Frame) {
        let acked = {
            let mut outstanding = self.outstanding.lock();
            let before = outstanding.len();
            outstanding.retain(|&i| i > frame.ack);
            outstanding.len() != before
        };
        if acked {
            trace!(ack = frame.ack, "outstanding frames acknowledged");
            self.sig.on_ack.notify_one();
        }
    }

    /// Record an unrecoverable error and tear the stream down.
    fn fail(&self, err: StreamError) {
        {
            let mut st = self.state.lock();
            st.fatal.get_or_insert(err);
        }
        self.shutdown();
    }

    /// Cancel workers, blocked callers, and the retransmission queue.
    ///
    /// Clean closure does not come through here: after both halves close
    /// the workers exit on their own, and retransmission of frames the
    /// peer has not fetched yet continues until the owner drops the
    /// stream.
    fn shutdown(&self) {
        self.halt.cancel();
        self.timers.halt();
    }
}

/// Reader worker: fetch frames in index order and reassemble the inbound
/// byte stream. Runs until halt or the receive half closes.
async fn reader_loop(inner: Arc<Inner>) {
    trace!("reader worker started");
    loop {
        if inner.halt.is_cancelled() {
            return;
        }

        let idx = {
            let st = inner.state.lock();
            match st.rstate {
                HalfState::Closed => {
                    // Peer sent its terminal frame (or close was requested
                    // locally); leave a final deferred ack with the writer.
                    if inner.cfg.mode == Mode::Reliable && st.f_read_idx > st.f_ack_idx {
                        inner.sig.on_flush.notify_one();
                    }
                    drop(st);
                    debug!("reader worker: receive half closed");
                    return;
                }
                HalfState::Open | HalfState::Closing => {
                    if inner.cfg.mode == Mode::Reliable
                        && st.f_read_idx - st.f_ack_idx >= inner.cfg.window
                    {
                        inner.sig.on_flush.notify_one();
                    }
                }
            }
            st.f_read_idx
        };

        let frame = match inner.fetch_frame(idx).await {
            Ok(Some(frame)) => frame,
            Ok(None) => {
                tokio::select! {
                    _ = tokio::time::sleep(inner.cfg.poll_interval) => {}
                    _ = inner.halt.cancelled() => return,
                }
                continue;
            }
            Err(err) => {
                inner.fail(err);
                return;
            }
        };

        trace!(frame = frame.id, kind = ?frame.kind, len = frame.payload.len(), "frame received");
        if inner.cfg.mode == Mode::Reliable {
            inner.process_ack(&frame);
        }

        let terminal = frame.kind == FrameKind::End;
        {
            let mut st = inner.state.lock();
            st.read_buf.extend_from_slice(&frame.payload);
            if terminal {
                st.rstate = HalfState::Closed;
            } else {
                st.f_read_idx += 1;
            }
        }
        inner.sig.on_read.notify_one();
    }
}

/// Writer worker: drain the outbound buffer into frames, honoring the
/// window, ack obligations, and teardown. Runs until halt or until it has
/// published the terminal frame.
async fn writer_loop(inner: Arc<Inner>) {
    trace!("writer worker started");

    enum Action {
        Closed,
        Wait,
        Send {
            frame: Frame,
            must_ack: bool,
            must_teardown: bool,
        },
    }

    loop {
        if inner.halt.is_cancelled() {
            return;
        }

        let action = {
            let mut st = inner.state.lock();
            if st.wstate == HalfState::Closed {
                Action::Closed
            } else {
                let mut must_ack = false;
                let mut must_teardown = false;

                if inner.cfg.mode == Mode::Reliable {
                    if st.f_read_idx - st.f_ack_idx >= inner.cfg.window {
                        must_ack = true;
                    }
                    if (st.rstate == HalfState::Closed || st.wstate == HalfState::Closing)
                        && st.write_buf.is_empty()
                    {
                        must_teardown = true;
                        if st.f_read_idx > st.f_ack_idx {
                            must_ack = true;
                        }
                    }
                } else if st.wstate == HalfState::Closing && st.write_buf.is_empty() {
                    must_teardown = true;
                }

                let should_wait = if !must_ack && !must_teardown {
                    let window_full = inner.cfg.mode == Mode::Reliable
                        && inner.outstanding.lock().len() as u64 >= inner.cfg.window;
                    window_full || st.write_buf.is_empty()
                } else {
                    false
                };

                if should_wait {
                    Action::Wait
                } else {
                    let take = st.write_buf.len().min(inner.geometry.max_payload);
                    let payload = st.write_buf.split_to(take).to_vec();
                    let kind = if must_teardown {
                        FrameKind::End
                    } else if st.f_write_idx == 0 {
                        FrameKind::Start
                    } else {
                        FrameKind::Data
                    };
                    let frame = Frame {
                        id: st.f_write_idx,
                        kind,
                        ack: st.f_read_idx,
                        payload,
                    };
                    Action::Send {
                        frame,
                        must_ack,
                        must_teardown,
                    }
                }
            }
        };

        match action {
            Action::Closed => {
                debug!("writer worker: terminal frame published");
                inner.closed_tx.send_replace(true);
                return;
            }
            Action::Wait => {
                let flushed = inner.sig.on_flush.notified();
                let acked = inner.sig.on_ack.notified();
                tokio::pin!(flushed, acked);
                flushed.as_mut().enable();
                acked.as_mut().enable();
                tokio::select! {
                    _ = &mut flushed => {}
                    _ = &mut acked => {}
                    _ = inner.halt.cancelled() => return,
                }
            }
            Action::Send {
                frame,
                must_ack,
                must_teardown,
            } => {
                if frame.payload.is_empty() && !must_ack && !must_teardown {
                    continue;
                }

                if let Err(err) = inner.tx_frame(&frame).await {
                    warn!(%err, "frame transmit failed");
                    inner.fail(err);
                    return;
                }

                if must_teardown {
                    let mut st = inner.state.lock();
                    st.wstate = HalfState::Closed;
                }
                inner.sig.on_write.notify_one();
            }
        }
    }
}
