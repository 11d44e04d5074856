use std::collections::HashMap;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use log::{debug, error, trace};
use parking_lot::{Condvar, Mutex};

use crate::gpio::gpiomem::{DetectKind, GpioRegisters};
use crate::gpio::{CallbackId, Edge, EdgeError, HalError, Level, WaitError};

/// A qualifying transition reported by an [`EdgeSource`].
///
/// [`EdgeSource`]: trait.EdgeSource.html
#[derive(Debug, PartialEq, Eq, Copy, Clone)]
pub struct EdgeEvent {
    /// Logic level observed after the transition.
    pub level: Level,
    /// When the transition was observed. Debouncing is based on this timestamp.
    pub timestamp: Instant,
}

// Messages received by a pin's monitor thread.
#[derive(Debug)]
enum Msg {
    Edge(EdgeEvent),
    Stop,
}

/// Delivers transitions from an [`EdgeSource`] to a pin's monitor.
///
/// [`EdgeSource`]: trait.EdgeSource.html
#[derive(Clone)]
pub struct EdgeSink {
    sender: Sender<Msg>,
}

impl EdgeSink {
    /// Forwards `event` to the monitor.
    ///
    /// Returns `false` once the monitor has shut down, after which the source
    /// should stop watching.
    pub fn send(&self, event: EdgeEvent) -> bool {
        self.sender.send(Msg::Edge(event)).is_ok()
    }
}

impl fmt::Debug for EdgeSink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EdgeSink").finish_non_exhaustive()
    }
}

/// OS or hardware wake source for edge detection.
///
/// `watch` starts reporting transitions on `pin` that match `edge`, until the
/// returned [`EdgeWatch`] is stopped. Sources must not report transitions that
/// don't match the armed edge.
///
/// [`EdgeWatch`]: trait.EdgeWatch.html
pub trait EdgeSource: fmt::Debug + Send + Sync {
    fn watch(&self, pin: u16, edge: Edge, sink: EdgeSink) -> Result<Box<dyn EdgeWatch>, EdgeError>;
}

/// An active watch started by an [`EdgeSource`].
///
/// [`EdgeSource`]: trait.EdgeSource.html
pub trait EdgeWatch: Send {
    /// Stops watching and releases any OS resources held by the watch.
    fn stop(&mut self) -> Result<(), EdgeError>;
}

type Callback = Box<dyn FnMut(u8) + Send>;

#[derive(Debug, Default)]
struct Status {
    debounce: Option<Duration>,
    detected: bool,
    last_accepted: Option<Instant>,
    events: u64,
    cancelled: bool,
}

// State shared between the engine, the pin's monitor thread and any waiters.
struct WatchState {
    pin: u16,
    channel: u8,
    status: Mutex<Status>,
    wake: Condvar,
    callbacks: Mutex<Vec<(CallbackId, Arc<Mutex<Callback>>)>>,
}

impl fmt::Debug for WatchState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WatchState")
            .field("pin", &self.pin)
            .field("channel", &self.channel)
            .field("status", &self.status)
            .field("callbacks", &self.callbacks.lock().len())
            .finish()
    }
}

impl WatchState {
    // Applies the debounce interval and records the transition when accepted.
    fn accept(&self, event: &EdgeEvent) -> bool {
        let mut status = self.status.lock();

        if status.cancelled {
            return false;
        }

        if let (Some(debounce), Some(last)) = (status.debounce, status.last_accepted) {
            if event.timestamp.saturating_duration_since(last) < debounce {
                trace!("Pin {}: discarded bounce at {:?}", self.pin, event.timestamp);
                return false;
            }
        }

        status.detected = true;
        status.last_accepted = Some(event.timestamp);
        status.events += 1;
        self.wake.notify_all();

        trace!("Pin {}: accepted {} edge", self.pin, event.level);

        true
    }

    fn dispatch(&self) {
        // Callbacks are free to register or remove callbacks, so don't hold the list.
        let callbacks: Vec<(CallbackId, Arc<Mutex<Callback>>)> = self.callbacks.lock().clone();

        for (id, callback) in callbacks {
            let result = panic::catch_unwind(AssertUnwindSafe(|| {
                let mut callback = callback.lock();
                (*callback)(self.channel)
            }));

            if result.is_err() {
                error!(
                    "Callback {:?} for channel {} panicked, continuing with the remaining callbacks",
                    id, self.channel
                );
            }
        }
    }

    // Number of transitions accepted so far.
    fn events(&self) -> u64 {
        self.status.lock().events
    }

    // Blocks until a transition beyond the first `events` is accepted.
    fn wait(&self, events: u64, timeout: Option<Duration>) -> Result<(), WaitError> {
        let deadline = timeout.map(|timeout| Instant::now() + timeout);
        let mut status = self.status.lock();

        loop {
            // An accepted transition wins over cancellation and timeout.
            if status.events != events {
                return Ok(());
            }

            if status.cancelled {
                return Err(WaitError::Cancelled);
            }

            match deadline {
                Some(deadline) => {
                    if self.wake.wait_until(&mut status, deadline).timed_out() {
                        if status.events != events {
                            return Ok(());
                        }

                        if status.cancelled {
                            return Err(WaitError::Cancelled);
                        }

                        return Err(WaitError::Timeout);
                    }
                }
                None => self.wake.wait(&mut status),
            }
        }
    }

    fn cancel(&self) {
        self.callbacks.lock().clear();

        let mut status = self.status.lock();
        status.cancelled = true;
        self.wake.notify_all();
    }
}

fn monitor(state: Arc<WatchState>, receiver: Receiver<Msg>) {
    while let Ok(Msg::Edge(event)) = receiver.recv() {
        if state.accept(&event) {
            state.dispatch();
        }
    }

    trace!("Pin {}: monitor stopped", state.pin);
}

struct Watcher {
    edge: Edge,
    state: Arc<WatchState>,
    permanent: bool,
    waiters: usize,
    sender: Sender<Msg>,
    watch: Box<dyn EdgeWatch>,
    monitor: Option<JoinHandle<()>>,
}

impl fmt::Debug for Watcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Watcher")
            .field("edge", &self.edge)
            .field("state", &self.state)
            .field("permanent", &self.permanent)
            .field("waiters", &self.waiters)
            .field("monitor", &self.monitor)
            .finish()
    }
}

impl Watcher {
    fn shutdown(mut self) {
        if let Err(e) = self.watch.stop() {
            error!("Failed to stop watching pin {}: {}", self.state.pin, e);
        }

        self.state.cancel();
        self.sender.send(Msg::Stop).ok();

        if let Some(monitor) = self.monitor.take() {
            // A callback may disarm its own pin, in which case the monitor exits on its own.
            if monitor.thread().id() != thread::current().id() && monitor.join().is_err() {
                error!("Monitor thread for pin {} panicked", self.state.pin);
            }
        }

        debug!("Pin {}: edge detection disarmed", self.state.pin);
    }
}

/// Per-pin edge watchers.
pub(crate) struct EdgeEngine {
    source: Arc<dyn EdgeSource>,
    watchers: Mutex<HashMap<u16, Watcher>>,
    // Serializes watcher creation, so `watchers` isn't held while a source
    // sets up a watch.
    spawning: Mutex<()>,
    next_callback: AtomicU64,
}

impl fmt::Debug for EdgeEngine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EdgeEngine")
            .field("source", &self.source)
            .field("watchers", &self.watchers)
            .finish()
    }
}

impl EdgeEngine {
    pub(crate) fn new(source: Arc<dyn EdgeSource>) -> EdgeEngine {
        EdgeEngine {
            source,
            watchers: Mutex::new(HashMap::new()),
            spawning: Mutex::new(()),
            next_callback: AtomicU64::new(1),
        }
    }

    fn spawn_watcher(
        &self,
        pin: u16,
        channel: u8,
        edge: Edge,
        debounce: Option<Duration>,
        permanent: bool,
    ) -> Result<Watcher, EdgeError> {
        let (sender, receiver) = mpsc::channel();
        let state = Arc::new(WatchState {
            pin,
            channel,
            status: Mutex::new(Status {
                debounce,
                ..Status::default()
            }),
            wake: Condvar::new(),
            callbacks: Mutex::new(Vec::new()),
        });

        // Start the monitor before the source, so no transition gets lost.
        let monitor = thread::Builder::new()
            .name(format!("gpio-edge-{}", pin))
            .spawn({
                let state = state.clone();
                move || monitor(state, receiver)
            })?;

        let watch = match self.source.watch(pin, edge, EdgeSink { sender: sender.clone() }) {
            Ok(watch) => watch,
            Err(e) => {
                sender.send(Msg::Stop).ok();
                monitor.join().ok();
                return Err(e);
            }
        };

        debug!(
            "Pin {}: armed {:?} edge detection (debounce {:?})",
            pin, edge, debounce
        );

        Ok(Watcher {
            edge,
            state,
            permanent,
            waiters: 0,
            sender,
            watch,
            monitor: Some(monitor),
        })
    }

    /// Arms edge detection on `pin`. Re-arming with the same edge is a no-op.
    pub(crate) fn arm(
        &self,
        pin: u16,
        channel: u8,
        edge: Edge,
        debounce: Option<Duration>,
    ) -> Result<(), EdgeError> {
        if let Some(result) = self.make_permanent(pin, edge, debounce) {
            return result;
        }

        let _spawning = self.spawning.lock();

        // Another thread may have armed the pin while we waited.
        if let Some(result) = self.make_permanent(pin, edge, debounce) {
            return result;
        }

        let watcher = self.spawn_watcher(pin, channel, edge, debounce, true)?;
        self.watchers.lock().insert(pin, watcher);

        Ok(())
    }

    // Arms an existing watcher permanently. A watcher that only served waiters
    // takes on the debounce interval of the first permanent arm. Returns `None`
    // if the pin has no watcher.
    fn make_permanent(
        &self,
        pin: u16,
        edge: Edge,
        debounce: Option<Duration>,
    ) -> Option<Result<(), EdgeError>> {
        let mut watchers = self.watchers.lock();
        let watcher = watchers.get_mut(&pin)?;

        if watcher.edge != edge {
            return Some(Err(EdgeError::Conflict));
        }

        if !watcher.permanent {
            watcher.permanent = true;
            watcher.state.status.lock().debounce = debounce;
        }

        Some(Ok(()))
    }

    /// Returns `true` if `pin` has an armed watcher.
    pub(crate) fn is_armed(&self, pin: u16) -> bool {
        self.watchers.lock().contains_key(&pin)
    }

    /// Disarms `pin`, waking any waiters with a cancellation. Returns `false` if
    /// the pin wasn't armed.
    pub(crate) fn disarm(&self, pin: u16) -> bool {
        let watcher = self.watchers.lock().remove(&pin);

        match watcher {
            Some(watcher) => {
                watcher.shutdown();
                true
            }
            None => false,
        }
    }

    /// Disarms every pin.
    pub(crate) fn disarm_all(&self) {
        let watchers: Vec<Watcher> = self.watchers.lock().drain().map(|(_, w)| w).collect();

        for watcher in watchers {
            watcher.shutdown();
        }
    }

    /// Registers a callback on a pin armed through [`arm`].
    ///
    /// [`arm`]: #method.arm
    pub(crate) fn add_callback(&self, pin: u16, callback: Callback) -> Result<CallbackId, EdgeError> {
        let watchers = self.watchers.lock();

        match watchers.get(&pin) {
            Some(watcher) if watcher.permanent => {
                let id = CallbackId(self.next_callback.fetch_add(1, Ordering::Relaxed));
                watcher
                    .state
                    .callbacks
                    .lock()
                    .push((id, Arc::new(Mutex::new(callback))));

                Ok(id)
            }
            _ => Err(EdgeError::NotArmed),
        }
    }

    pub(crate) fn remove_callback(&self, id: CallbackId) -> bool {
        let watchers = self.watchers.lock();

        for watcher in watchers.values() {
            let mut callbacks = watcher.state.callbacks.lock();
            if let Some(index) = callbacks.iter().position(|(cb_id, _)| *cb_id == id) {
                callbacks.remove(index);
                return true;
            }
        }

        false
    }

    /// Reads and clears the pin's detected flag.
    pub(crate) fn detected(&self, pin: u16) -> bool {
        let watchers = self.watchers.lock();

        match watchers.get(&pin) {
            Some(watcher) => std::mem::take(&mut watcher.state.status.lock().detected),
            None => false,
        }
    }

    // Registers a waiter on an existing watcher, along with the number of
    // transitions it had accepted at that point. Returns `None` if the pin has
    // no watcher.
    fn join_waiters(
        &self,
        pin: u16,
        edge: Edge,
    ) -> Option<Result<(Arc<WatchState>, u64), WaitError>> {
        let mut watchers = self.watchers.lock();
        let watcher = watchers.get_mut(&pin)?;

        if watcher.edge != edge {
            return Some(Err(WaitError::Conflict));
        }

        watcher.waiters += 1;

        Some(Ok((watcher.state.clone(), watcher.state.events())))
    }

    /// Blocks until a transition matching `edge` is accepted on `pin`.
    ///
    /// Arms a transient watcher if the pin isn't armed yet, which is disarmed
    /// again once the last transient waiter returns.
    pub(crate) fn wait(
        &self,
        pin: u16,
        channel: u8,
        edge: Edge,
        debounce: Option<Duration>,
        timeout: Option<Duration>,
    ) -> Result<(), WaitError> {
        let (state, events) = match self.join_waiters(pin, edge) {
            Some(joined) => joined?,
            None => {
                let _spawning = self.spawning.lock();

                match self.join_waiters(pin, edge) {
                    Some(joined) => joined?,
                    None => {
                        let mut watcher = self
                            .spawn_watcher(pin, channel, edge, debounce, false)
                            .map_err(WaitError::Internal)?;
                        watcher.waiters = 1;

                        // Every transition the new watcher accepts counts.
                        let state = watcher.state.clone();
                        self.watchers.lock().insert(pin, watcher);
                        (state, 0)
                    }
                }
            }
        };

        let result = state.wait(events, timeout);

        let released = {
            let mut watchers = self.watchers.lock();

            match watchers.get_mut(&pin) {
                // The pin may have been disarmed and re-armed while we were waiting.
                Some(watcher) if Arc::ptr_eq(&watcher.state, &state) => {
                    watcher.waiters -= 1;
                    if watcher.waiters == 0 && !watcher.permanent {
                        watchers.remove(&pin)
                    } else {
                        None
                    }
                }
                _ => None,
            }
        };

        if let Some(watcher) = released {
            watcher.shutdown();
        }

        result
    }
}

impl Drop for EdgeEngine {
    fn drop(&mut self) {
        self.disarm_all();
    }
}

/// Edge detection through the Broadcom event detect registers.
///
/// The rising and falling edge enable bits are set for the armed edge, and the
/// event status register is polled at a fixed interval on a dedicated thread.
#[derive(Debug)]
pub(crate) struct RegisterPoll {
    chip: Arc<dyn GpioRegisters>,
    interval: Duration,
}

impl RegisterPoll {
    pub(crate) fn new(chip: Arc<dyn GpioRegisters>, interval: Duration) -> RegisterPoll {
        RegisterPoll { chip, interval }
    }

    fn detect_kinds(edge: Edge) -> &'static [DetectKind] {
        match edge {
            Edge::Rising => &[DetectKind::Rising],
            Edge::Falling => &[DetectKind::Falling],
            Edge::Both => &[DetectKind::Rising, DetectKind::Falling],
        }
    }

    fn disable(chip: &dyn GpioRegisters, pin: u16, edge: Edge) -> Result<(), HalError> {
        for kind in Self::detect_kinds(edge) {
            chip.set_detect(pin, *kind, false)?;
        }

        Ok(())
    }
}

impl EdgeSource for RegisterPoll {
    fn watch(&self, pin: u16, edge: Edge, sink: EdgeSink) -> Result<Box<dyn EdgeWatch>, EdgeError> {
        for kind in Self::detect_kinds(edge) {
            if let Err(e) = self.chip.set_detect(pin, *kind, true) {
                Self::disable(self.chip.as_ref(), pin, edge).ok();
                return Err(EdgeError::Hal(e));
            }
        }

        let (stop, stopped) = mpsc::channel::<()>();
        let chip = self.chip.clone();
        let interval = self.interval;

        let poll_thread = thread::Builder::new()
            .name(format!("gpio-poll-{}", pin))
            .spawn(move || -> Result<(), HalError> {
                loop {
                    match stopped.recv_timeout(interval) {
                        Err(RecvTimeoutError::Timeout) => {}
                        _ => return Ok(()),
                    }

                    if chip.event_detected(pin)? {
                        let event = EdgeEvent {
                            level: chip.level(pin),
                            timestamp: Instant::now(),
                        };

                        if !sink.send(event) {
                            return Ok(());
                        }
                    }
                }
            })?;

        Ok(Box::new(RegisterPollWatch {
            chip: self.chip.clone(),
            pin,
            edge,
            stop: Some(stop),
            poll_thread: Some(poll_thread),
        }))
    }
}

struct RegisterPollWatch {
    chip: Arc<dyn GpioRegisters>,
    pin: u16,
    edge: Edge,
    stop: Option<Sender<()>>,
    poll_thread: Option<JoinHandle<Result<(), HalError>>>,
}

impl EdgeWatch for RegisterPollWatch {
    fn stop(&mut self) -> Result<(), EdgeError> {
        // Dropping the sender wakes the poll thread.
        self.stop.take();

        if let Some(poll_thread) = self.poll_thread.take() {
            match poll_thread.join() {
                Ok(result) => result?,
                Err(_) => return Err(EdgeError::ThreadPanic),
            }
        }

        RegisterPoll::disable(self.chip.as_ref(), self.pin, self.edge)?;

        Ok(())
    }
}
