//! End-to-end loopback tests: two streams sharing one in-process store.
//!
//! Covers the full exchange (write, windowed transfer, retransmission after
//! loss, corruption teardown, close ordering, deadlines) against stores
//! that behave, lose values, or mangle them.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::time::{sleep, timeout, Instant};

use dropline::{
    HalfState, MemStore, MessageStore, Mode, StoreError, StoreKey, Stream, StreamConfig,
    StreamError, SystemEpochClock,
};

const ALICE: &[u8] = b"alice handshake secret, >=32 bytes..";
const BOB: &[u8] = b"bob handshake secret, also 32+ bytes";

fn init_logging() {
    let _ = tracing_subscriber::fmt().try_init();
}

fn test_config() -> StreamConfig {
    StreamConfig {
        poll_interval: Duration::from_millis(5),
        default_timeout: Duration::from_secs(10),
        ..StreamConfig::default()
    }
}

fn test_clock() -> Arc<SystemEpochClock> {
    // Short epochs so retransmission kicks in within a few hundred ms.
    Arc::new(SystemEpochClock::new(Duration::from_millis(50)))
}

fn pair_on(store: Arc<dyn MessageStore>) -> (Stream, Stream) {
    init_logging();
    let clock = test_clock();
    let alice =
        Stream::with_config(store.clone(), clock.clone(), ALICE, BOB, test_config()).unwrap();
    let bob = Stream::with_config(store, clock, BOB, ALICE, test_config()).unwrap();
    (alice, bob)
}

async fn read_to_end(stream: &Stream) -> Vec<u8> {
    let mut data = Vec::new();
    let mut buf = [0u8; 256];
    loop {
        let n = stream.read(&mut buf).await.unwrap();
        if n == 0 {
            return data;
        }
        data.extend_from_slice(&buf[..n]);
    }
}

async fn eventually(what: &str, mut cond: impl FnMut() -> bool) {
    for _ in 0..500 {
        if cond() {
            return;
        }
        sleep(Duration::from_millis(10)).await;
    }
    panic!("timed out waiting for {what}");
}

/// Reports success for the nth `put` (1-based) but discards the value, as
/// a store that loses data would.
struct VanishingStore {
    inner: MemStore,
    vanish_nth: usize,
    puts: AtomicUsize,
}

impl VanishingStore {
    fn new(inner: MemStore, vanish_nth: usize) -> Self {
        Self {
            inner,
            vanish_nth,
            puts: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl MessageStore for VanishingStore {
    fn payload_size(&self) -> usize {
        self.inner.payload_size()
    }

    async fn put(&self, key: StoreKey, value: Vec<u8>) -> Result<(), StoreError> {
        let n = self.puts.fetch_add(1, Ordering::SeqCst) + 1;
        if n == self.vanish_nth {
            return Ok(());
        }
        self.inner.put(key, value).await
    }

    async fn get(&self, key: StoreKey) -> Result<Vec<u8>, StoreError> {
        self.inner.get(key).await
    }
}

/// Flips one ciphertext bit in the nth `put` (1-based) before storing it.
struct CorruptingStore {
    inner: MemStore,
    corrupt_nth: usize,
    puts: AtomicUsize,
}

impl CorruptingStore {
    fn new(inner: MemStore, corrupt_nth: usize) -> Self {
        Self {
            inner,
            corrupt_nth,
            puts: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl MessageStore for CorruptingStore {
    fn payload_size(&self) -> usize {
        self.inner.payload_size()
    }

    async fn put(&self, key: StoreKey, mut value: Vec<u8>) -> Result<(), StoreError> {
        let n = self.puts.fetch_add(1, Ordering::SeqCst) + 1;
        if n == self.corrupt_nth {
            let mid = value.len() / 2;
            value[mid] ^= 0x01;
        }
        self.inner.put(key, value).await
    }

    async fn get(&self, key: StoreKey) -> Result<Vec<u8>, StoreError> {
        self.inner.get(key).await
    }
}

#[tokio::test]
async fn s1_loopback_round_trip() {
    let store = Arc::new(MemStore::new(1000));
    let (alice, bob) = pair_on(store);

    alice.write(b"HELLO").await.unwrap();
    alice.close().await.unwrap();

    let data = timeout(Duration::from_secs(5), read_to_end(&bob))
        .await
        .expect("transfer stalled");
    assert_eq!(data, b"HELLO");

    // Bob's side acknowledges through the terminal frame: payload frame 0,
    // End frame 1.
    eventually("terminal ack", || bob.stats().ack_idx == 1).await;
}

#[tokio::test]
async fn s2_windowed_burst() {
    // 64-byte substrate values leave exactly 8 payload bytes per frame, so
    // 24 bytes take three full frames.
    let store = Arc::new(MemStore::new(64));
    let (alice, bob) = pair_on(store);
    let alice = Arc::new(alice);

    let payload = b"aaaabbbbccccddddeeeeffff";

    let window_high = Arc::new(AtomicUsize::new(0));
    let monitor = {
        let alice = alice.clone();
        let window_high = window_high.clone();
        tokio::spawn(async move {
            loop {
                window_high.fetch_max(alice.stats().outstanding, Ordering::SeqCst);
                sleep(Duration::from_millis(1)).await;
            }
        })
    };

    alice.write(payload).await.unwrap();

    let mut data = Vec::new();
    let mut buf = [0u8; 64];
    let deadline = Instant::now() + Duration::from_secs(10);
    while data.len() < payload.len() {
        assert!(Instant::now() < deadline, "transfer stalled");
        let n = bob.read(&mut buf).await.unwrap();
        data.extend_from_slice(&buf[..n]);
    }
    monitor.abort();

    assert_eq!(data, payload);
    assert!(
        window_high.load(Ordering::SeqCst) <= 3,
        "outstanding window exceeded: {}",
        window_high.load(Ordering::SeqCst)
    );
}

#[tokio::test]
async fn s3_lost_frame_recovery() {
    // Alice publishes frames 0, 1, then the terminal frame; the second put
    // (frame 1) never lands in the store and must be retransmitted.
    let store = Arc::new(VanishingStore::new(MemStore::new(64), 2));
    let (alice, bob) = pair_on(store);

    let payload = b"0123456789abcdef"; // two full 8-byte frames
    alice.write(payload).await.unwrap();
    alice.close().await.unwrap();

    let data = timeout(Duration::from_secs(10), read_to_end(&bob))
        .await
        .expect("retransmission never repaired the stream");
    assert_eq!(data, payload);
    drop(alice);
}

#[tokio::test]
async fn s4_corruption_is_fatal() {
    // One flipped ciphertext bit in alice's first frame.
    let store = Arc::new(CorruptingStore::new(MemStore::new(1000), 1));
    let (alice, bob) = pair_on(store);

    alice.write(b"poisoned").await.unwrap();

    let mut buf = [0u8; 16];
    let err = timeout(Duration::from_secs(5), async {
        loop {
            match bob.read(&mut buf).await {
                Ok(_) => sleep(Duration::from_millis(5)).await,
                Err(err) => return err,
            }
        }
    })
    .await
    .expect("corruption was never surfaced");
    assert_eq!(err, StreamError::Corrupted);

    // Neither half advances past the poisoned frame, and the error is
    // sticky.
    assert_eq!(bob.stats().read_idx, 0);
    assert_eq!(bob.read(&mut buf).await, Err(StreamError::Corrupted));
    assert_eq!(bob.write(b"x").await, Err(StreamError::Corrupted));
}

#[tokio::test]
async fn s5_close_ordering() {
    let store = Arc::new(MemStore::new(1000));
    let (alice, bob) = pair_on(store);

    alice.write(b"BYE").await.unwrap();
    alice.close().await.unwrap();

    let mut buf = [0u8; 8];
    let n = bob.read(&mut buf).await.unwrap();
    assert_eq!(&buf[..n], b"BYE"); // payload precedes end-of-stream
    assert_eq!(bob.read(&mut buf).await.unwrap(), 0);
    assert_eq!(bob.read(&mut buf).await.unwrap(), 0); // and stays there
}

#[tokio::test]
async fn s6_read_deadline_on_empty_stream() {
    let store = Arc::new(MemStore::new(1000));
    let (alice, bob) = pair_on(store);

    bob.set_read_deadline(Some(Instant::now() + Duration::from_millis(50)));
    let started = Instant::now();
    let mut buf = [0u8; 8];
    assert_eq!(
        bob.read(&mut buf).await,
        Err(StreamError::DeadlineExceeded)
    );
    assert!(started.elapsed() >= Duration::from_millis(45));

    // Clearing the deadline restores normal blocking reads.
    bob.set_read_deadline(None);
    alice.write(b"late").await.unwrap();
    let n = timeout(Duration::from_secs(5), bob.read(&mut buf))
        .await
        .expect("read stalled")
        .unwrap();
    assert_eq!(&buf[..n], b"late");
}

#[tokio::test]
async fn peer_close_completes_the_handshake() {
    let store = Arc::new(MemStore::new(1000));
    let (alice, bob) = pair_on(store);

    alice.write(b"final words").await.unwrap();
    alice.close().await.unwrap();

    // Observing alice's terminal frame closes bob's receive half and makes
    // bob's writer answer with its own terminal frame, unprompted.
    let data = read_to_end(&bob).await;
    assert_eq!(data, b"final words");
    eventually("bob's terminal frame", || {
        bob.stats().write_state == HalfState::Closed
    })
    .await;
    assert_eq!(bob.write(b"too late").await, Err(StreamError::Closed));
}

#[tokio::test]
async fn bidirectional_transfer() {
    let store = Arc::new(MemStore::new(1000));
    let (alice, bob) = pair_on(store);

    alice.write(b"ping from alice").await.unwrap();
    bob.write(b"pong from bob").await.unwrap();

    let mut buf = [0u8; 64];
    let n = bob.read(&mut buf).await.unwrap();
    assert_eq!(&buf[..n], b"ping from alice");
    let n = alice.read(&mut buf).await.unwrap();
    assert_eq!(&buf[..n], b"pong from bob");
}

#[tokio::test]
async fn write_deadline_fires_when_peer_never_acks() {
    // No peer stream at all: after `window` frames in flight the writer
    // stalls and the outbound buffer stays at its cap.
    init_logging();
    let store = Arc::new(MemStore::new(64));
    let alice = Stream::with_config(store, test_clock(), ALICE, BOB, test_config()).unwrap();

    // Soft cap is 42 frames x 8 bytes; overfill so draining three frames
    // into the window still leaves the buffer full.
    alice.write(&[0x61; 360]).await.unwrap();
    eventually("window to fill", || alice.stats().outstanding == 3).await;

    alice.set_write_deadline(Some(Instant::now() + Duration::from_millis(50)));
    assert_eq!(
        alice.write(b"more").await,
        Err(StreamError::DeadlineExceeded)
    );
}

#[tokio::test]
async fn scramble_mode_is_fire_and_forget() {
    let store = Arc::new(MemStore::new(1000));
    let clock = test_clock();
    let cfg = StreamConfig {
        mode: Mode::Scramble,
        ..test_config()
    };
    let alice =
        Stream::with_config(store.clone(), clock.clone(), ALICE, BOB, cfg.clone()).unwrap();
    let bob = Stream::with_config(store, clock, BOB, ALICE, cfg).unwrap();

    alice.write(b"no receipts").await.unwrap();

    let mut buf = [0u8; 32];
    let n = timeout(Duration::from_secs(5), bob.read(&mut buf))
        .await
        .expect("read stalled")
        .unwrap();
    assert_eq!(&buf[..n], b"no receipts");

    // Nothing is tracked for retransmission and no acks ever flow.
    assert_eq!(alice.stats().outstanding, 0);
    assert_eq!(bob.stats().ack_idx, 0);
}

#[tokio::test]
async fn counters_stay_monotonic() {
    let store = Arc::new(MemStore::new(64));
    let (alice, bob) = pair_on(store);
    let bob = Arc::new(bob);

    let monitor = {
        let bob = bob.clone();
        tokio::spawn(async move {
            let mut last = bob.stats();
            loop {
                let now = bob.stats();
                assert!(now.read_idx >= last.read_idx);
                assert!(now.write_idx >= last.write_idx);
                assert!(now.ack_idx >= last.ack_idx);
                assert!(now.ack_idx <= now.read_idx);
                last = now;
                sleep(Duration::from_millis(1)).await;
            }
        })
    };

    alice.write(&[0x62; 80]).await.unwrap();
    alice.close().await.unwrap();
    let data = timeout(Duration::from_secs(10), read_to_end(&bob))
        .await
        .expect("transfer stalled");
    assert_eq!(data, vec![0x62; 80]);

    monitor.abort();
    let joined = monitor.await;
    assert!(
        joined.is_ok() || joined.unwrap_err().is_cancelled(),
        "counter monotonicity violated"
    );
}
