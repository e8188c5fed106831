//! Navdata receiver
//!
//! One worker thread owns the navdata socket. It sends the handshake, then
//! loops receiving datagrams, decoding them, and handing the frames to the
//! registered subscribers. Every receive timeout resends the handshake; that
//! is the only reconnection mechanism.

use std::io;
use std::net::{SocketAddr, UdpSocket};
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU64, Ordering};
use std::sync::mpsc::{self, Receiver};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use log::{debug, error, info, trace, warn};
use ardlibgs::{is_timeout, ArdError, ArdResult, NavData, MAX_PACKET_SIZE, NAVDATA_HANDSHAKE};

/// Socket side of the receiver
pub trait TelemetryTransport: Send + Sync + 'static {
    /// Send the 4-byte handshake to the vehicle's navdata port
    fn send_handshake(&self) -> io::Result<()>;

    /// Block for one datagram, failing with a timeout error when none arrives
    fn recv(&self, buf: &mut [u8]) -> io::Result<usize>;
}

/// UDP navdata socket
pub struct UdpTelemetryTransport {
    socket: UdpSocket,
    vehicle: SocketAddr,
    timeout: Duration,
}

impl UdpTelemetryTransport {
    pub fn bind(vehicle: SocketAddr, timeout: Duration) -> ArdResult<Self> {
        let bind_addr: SocketAddr = if vehicle.is_ipv4() {
            SocketAddr::from(([0, 0, 0, 0], 0))
        } else {
            SocketAddr::from(([0u16; 8], 0))
        };
        let socket = UdpSocket::bind(bind_addr)?;
        socket.set_read_timeout(Some(timeout))?;
        socket.set_nonblocking(false)?;
        Ok(Self {
            socket,
            vehicle,
            timeout,
        })
    }

    pub fn local_addr(&self) -> ArdResult<SocketAddr> {
        Ok(self.socket.local_addr()?)
    }
}

impl TelemetryTransport for UdpTelemetryTransport {
    fn send_handshake(&self) -> io::Result<()> {
        self.socket.send_to(&NAVDATA_HANDSHAKE, self.vehicle).map(|_| ())
    }

    /// Datagrams from other hosts are dropped without extending the wait:
    /// the call still times out one receive timeout after it began.
    fn recv(&self, buf: &mut [u8]) -> io::Result<usize> {
        let deadline = Instant::now() + self.timeout;
        let mut shortened = false;

        let result = loop {
            match self.socket.recv_from(buf) {
                Ok((n, from)) if from.ip() == self.vehicle.ip() => break Ok(n),
                Ok((n, from)) => {
                    trace!("Dropping {} bytes from unexpected sender {}", n, from);
                    let remaining = deadline.saturating_duration_since(Instant::now());
                    if remaining.is_zero() {
                        break Err(io::Error::from(io::ErrorKind::TimedOut));
                    }
                    if let Err(e) = self.socket.set_read_timeout(Some(remaining)) {
                        break Err(e);
                    }
                    shortened = true;
                }
                Err(e) => break Err(e),
            }
        };

        if shortened {
            self.socket.set_read_timeout(Some(self.timeout))?;
        }
        result
    }
}

/// Cooperative stop request shared with the worker
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    cancelled: Arc<AtomicBool>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }
}

/// Handle returned by `SubscriberRegistry::add`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriberId(pub u64);

/// Callback receiving each dispatched frame
pub type Subscriber = Arc<dyn Fn(&NavData) + Send + Sync>;

/// Ordered set of subscribers, safe to change while frames are dispatched
#[derive(Default)]
pub struct SubscriberRegistry {
    next_id: AtomicU64,
    subscribers: Mutex<Vec<(SubscriberId, Subscriber)>>,
}

impl SubscriberRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Vec<(SubscriberId, Subscriber)>> {
        // A subscriber list is still consistent after a panic elsewhere
        self.subscribers.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn add<F>(&self, callback: F) -> SubscriberId
    where
        F: Fn(&NavData) + Send + Sync + 'static,
    {
        let id = SubscriberId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.lock().push((id, Arc::new(callback)));
        id
    }

    /// Subscribe through a channel. The subscription removes itself once
    /// the receiver is dropped.
    pub fn subscribe_channel(self: &Arc<Self>) -> (SubscriberId, Receiver<NavData>) {
        let (tx, rx) = mpsc::channel();
        let tx = Mutex::new(tx);
        let registry = Arc::downgrade(self);
        let id = SubscriberId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let callback = move |frame: &NavData| {
            let sent = match tx.lock() {
                Ok(tx) => tx.send(frame.clone()).is_ok(),
                Err(_) => false,
            };
            if !sent {
                if let Some(registry) = registry.upgrade() {
                    registry.remove(id);
                }
            }
        };
        self.lock().push((id, Arc::new(callback)));
        (id, rx)
    }

    pub fn remove(&self, id: SubscriberId) -> bool {
        let mut subscribers = self.lock();
        let before = subscribers.len();
        subscribers.retain(|(sid, _)| *sid != id);
        subscribers.len() != before
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Copy of the current subscribers, in registration order
    pub fn snapshot(&self) -> Vec<Subscriber> {
        self.lock().iter().map(|(_, s)| Arc::clone(s)).collect()
    }

    /// Deliver `frame` to a snapshot of the subscribers. The lock is not held
    /// while callbacks run, so they may add or remove subscribers.
    pub fn dispatch(&self, frame: &NavData) -> usize {
        let snapshot = self.snapshot();
        for subscriber in &snapshot {
            if panic::catch_unwind(AssertUnwindSafe(|| subscriber(frame))).is_err() {
                error!("Navdata subscriber panicked on frame {}", frame.sequence);
            }
        }
        snapshot.len()
    }
}

/// What one loop iteration did
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopEvent {
    /// Frame decoded and delivered to this many subscribers
    Dispatched(usize),
    /// Frame decoded but inside the dispatch interval
    Throttled,
    /// Datagram could not be decoded
    Malformed,
    /// Receive timed out and the handshake was resent
    Handshake,
    /// Any other transport error
    TransportError,
}

/// Body of the receiver worker
pub struct ReceiveLoop<T: TelemetryTransport> {
    transport: Arc<T>,
    subscribers: Arc<SubscriberRegistry>,
    interval_ms: Arc<AtomicI64>,
    cancel: CancelToken,
    last_dispatch: Option<Instant>,
    buf: Vec<u8>,
}

impl<T: TelemetryTransport> ReceiveLoop<T> {
    pub fn new(
        transport: Arc<T>,
        subscribers: Arc<SubscriberRegistry>,
        interval_ms: Arc<AtomicI64>,
        cancel: CancelToken,
    ) -> Self {
        Self {
            transport,
            subscribers,
            interval_ms,
            cancel,
            last_dispatch: None,
            buf: vec![0u8; MAX_PACKET_SIZE],
        }
    }

    /// Run until cancelled
    pub fn run(mut self) {
        info!("Starting navdata receiver");
        self.handshake();

        while !self.cancel.is_cancelled() {
            self.step();
        }

        info!("Stopped navdata receiver");
    }

    fn handshake(&self) {
        if let Err(e) = self.transport.send_handshake() {
            warn!("Navdata handshake failed: {}", e);
        }
    }

    /// Receive and handle a single datagram
    pub fn step(&mut self) -> LoopEvent {
        let n = match self.transport.recv(&mut self.buf) {
            Ok(n) => n,
            Err(e) if is_timeout(&e) => {
                debug!("Navdata connection reset");
                self.handshake();
                return LoopEvent::Handshake;
            }
            Err(e) => {
                error!("Navdata read failed: {}", e);
                return LoopEvent::TransportError;
            }
        };

        let frame = match NavData::decode(&self.buf[..n]) {
            Ok(frame) => frame,
            Err(e) => {
                debug!("Failed to parse navdata: {}", e);
                return LoopEvent::Malformed;
            }
        };

        let now = Instant::now();
        if !self.due(now) {
            return LoopEvent::Throttled;
        }

        trace!("Navdata {:?}", frame);
        let delivered = self.subscribers.dispatch(&frame);
        self.last_dispatch = Some(now);
        LoopEvent::Dispatched(delivered)
    }

    fn due(&self, now: Instant) -> bool {
        let interval_ms = self.interval_ms.load(Ordering::Relaxed);
        match self.last_dispatch {
            _ if interval_ms <= 0 => true,
            // The first frame after start goes out without waiting an interval
            None => true,
            Some(last) => now.duration_since(last) > Duration::from_millis(interval_ms as u64),
        }
    }
}

/// Receiver lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReceiverState {
    Idle,
    Running,
    Stopped,
}

struct Worker {
    state: ReceiverState,
    /// A start() is joining the previous worker; other starts back off
    restarting: bool,
    cancel: Option<CancelToken>,
    handle: Option<JoinHandle<()>>,
}

/// Owns the navdata transport and at most one worker thread
pub struct TelemetryReceiver<T: TelemetryTransport = UdpTelemetryTransport> {
    transport: Arc<T>,
    subscribers: Arc<SubscriberRegistry>,
    interval_ms: Arc<AtomicI64>,
    worker: Mutex<Worker>,
}

impl TelemetryReceiver<UdpTelemetryTransport> {
    /// Bind a navdata socket for `vehicle`
    pub fn bind(vehicle: SocketAddr, timeout: Duration, interval_ms: i64) -> ArdResult<Self> {
        let transport = UdpTelemetryTransport::bind(vehicle, timeout)?;
        Ok(Self::new(transport, interval_ms))
    }
}

impl<T: TelemetryTransport> TelemetryReceiver<T> {
    pub fn new(transport: T, interval_ms: i64) -> Self {
        Self {
            transport: Arc::new(transport),
            subscribers: Arc::new(SubscriberRegistry::new()),
            interval_ms: Arc::new(AtomicI64::new(interval_ms)),
            worker: Mutex::new(Worker {
                state: ReceiverState::Idle,
                restarting: false,
                cancel: None,
                handle: None,
            }),
        }
    }

    fn worker(&self) -> MutexGuard<'_, Worker> {
        self.worker.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn subscribers(&self) -> &Arc<SubscriberRegistry> {
        &self.subscribers
    }

    pub fn subscribe<F>(&self, callback: F) -> SubscriberId
    where
        F: Fn(&NavData) + Send + Sync + 'static,
    {
        self.subscribers.add(callback)
    }

    pub fn unsubscribe(&self, id: SubscriberId) -> bool {
        self.subscribers.remove(id)
    }

    pub fn state(&self) -> ReceiverState {
        self.worker().state
    }

    pub fn interval_ms(&self) -> i64 {
        self.interval_ms.load(Ordering::Relaxed)
    }

    /// Change the dispatch interval, takes effect on the next frame
    pub fn set_interval_ms(&self, interval_ms: i64) {
        self.interval_ms.store(interval_ms, Ordering::Relaxed);
    }

    /// Start the worker. Does nothing while already running. After a stop
    /// the previous worker is joined first, which can take up to one
    /// receive timeout.
    pub fn start(&self) -> ArdResult<()> {
        let previous = {
            let mut worker = self.worker();
            if worker.state == ReceiverState::Running || worker.restarting {
                debug!("Navdata receiver already running");
                return Ok(());
            }
            let previous = worker.handle.take();
            worker.restarting = previous.is_some();
            previous
        };

        if let Some(handle) = previous {
            if handle.join().is_err() {
                error!("Previous navdata receiver panicked");
            }
        }

        let mut worker = self.worker();
        worker.restarting = false;
        if worker.state == ReceiverState::Running {
            return Ok(());
        }

        let cancel = CancelToken::new();
        let receive_loop = ReceiveLoop::new(
            Arc::clone(&self.transport),
            Arc::clone(&self.subscribers),
            Arc::clone(&self.interval_ms),
            cancel.clone(),
        );
        let handle = thread::Builder::new()
            .name("navdata".to_string())
            .spawn(move || receive_loop.run())
            .map_err(|e| ArdError::Receiver(format!("failed to spawn receiver: {}", e)))?;

        worker.state = ReceiverState::Running;
        worker.cancel = Some(cancel);
        worker.handle = Some(handle);
        Ok(())
    }

    /// Ask the worker to stop. Returns immediately; the worker notices at
    /// the top of its next iteration.
    pub fn stop(&self) {
        let mut worker = self.worker();
        if worker.state != ReceiverState::Running {
            return;
        }
        if let Some(cancel) = worker.cancel.take() {
            cancel.cancel();
        }
        worker.state = ReceiverState::Stopped;
        info!("Navdata receiver stop requested");
    }

    /// Stop and wait for the worker to exit
    pub fn stop_and_join(&self) {
        self.stop();
        let handle = self.worker().handle.take();
        if let Some(handle) = handle {
            if handle.join().is_err() {
                error!("Navdata receiver panicked");
            }
        }
    }
}

impl<T: TelemetryTransport> Drop for TelemetryReceiver<T> {
    fn drop(&mut self) {
        self.stop();
    }
}
