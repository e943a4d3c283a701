//! Event loop
//!
//! A single-threaded reactor for network input streams and deferred
//! work. It owns registered sockets (interest mask plus callback), a
//! monotonic timer heap, a deferred-work queue, and an idle queue that
//! drains completely before every wait. The audio threads never touch
//! it.
//!
//! The loop runs a current-thread tokio runtime; socket readiness
//! comes from [`AsyncFd`] and the cross-thread wake
//! ([`EventLoopHandle::break_loop`], [`EventLoopHandle::defer`]) is a
//! [`Notify`], the async analog of the classic self-pipe.
//!
//! Socket callbacks run with edge-ish readiness: a callback must
//! consume all available data before returning. Mutating the monitor
//! set from inside a socket callback goes through
//! [`EventLoopHandle::defer`], which is applied before the next
//! dispatch; a cancelled monitor is therefore never called again.

use std::collections::{BinaryHeap, HashMap, VecDeque};
use std::future::Future;
use std::os::unix::io::RawFd;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use tokio::io::unix::AsyncFd;
use tokio::io::Interest as TokioInterest;
use tokio::sync::Notify;
use tracing::{debug, trace, warn};

/// What a socket monitor wants to be woken for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Interest {
    Read,
    Write,
    ReadWrite,
}

impl Interest {
    fn to_tokio(self) -> TokioInterest {
        match self {
            Interest::Read => TokioInterest::READABLE,
            Interest::Write => TokioInterest::WRITABLE,
            Interest::ReadWrite => TokioInterest::READABLE | TokioInterest::WRITABLE,
        }
    }
}

/// The readiness a callback is invoked with.
#[derive(Debug, Clone, Copy, Default)]
pub struct Readiness {
    pub readable: bool,
    pub writable: bool,
}

/// Socket callback: return false to unregister the monitor.
pub type SocketCallback = Box<dyn FnMut(&EventLoopHandle, Readiness) -> bool + Send>;

/// Timer, idle, and deferred callbacks get exclusive access to the
/// loop and may mutate any monitor set directly.
pub type LoopCallback = Box<dyn FnOnce(&mut EventLoop) + Send>;

struct HandleShared {
    notify: Notify,
    quit: AtomicBool,
    deferred: Mutex<VecDeque<LoopCallback>>,
}

/// Thread-safe handle to a running (or not yet running) [`EventLoop`].
#[derive(Clone)]
pub struct EventLoopHandle {
    shared: Arc<HandleShared>,
}

impl EventLoopHandle {
    /// Stop the loop at the next chance. Non-blocking; the loop may
    /// still be finishing a callback when this returns.
    pub fn break_loop(&self) {
        self.shared.quit.store(true, Ordering::Release);
        self.shared.notify.notify_one();
    }

    /// Schedule `f` to run on the loop thread before the next wait.
    pub fn defer(&self, f: impl FnOnce(&mut EventLoop) + Send + 'static) {
        self.shared
            .deferred
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push_back(Box::new(f));
        self.shared.notify.notify_one();
    }
}

struct SocketEntry {
    fd: RawFd,
    interest: Interest,
    /// Taken out during dispatch so the callback can be re-entrant
    /// with respect to the entry map.
    callback: Option<SocketCallback>,
    /// Created lazily on the loop thread inside the runtime.
    async_fd: Option<AsyncFd<RawFd>>,
}

#[derive(PartialEq, Eq)]
struct TimerKey {
    due: Instant,
    token: u64,
}

impl Ord for TimerKey {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        // reversed: BinaryHeap is a max-heap, we want the earliest due
        other.due.cmp(&self.due).then(other.token.cmp(&self.token))
    }
}

impl PartialOrd for TimerKey {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

enum Wake {
    Notified,
    Timer,
    Socket(u64, Readiness),
}

/// The reactor. Construct it, register monitors, then call
/// [`EventLoop::run`] on a dedicated thread.
pub struct EventLoop {
    handle: EventLoopHandle,

    sockets: HashMap<u64, SocketEntry>,

    timer_heap: BinaryHeap<TimerKey>,
    timers: HashMap<u64, LoopCallback>,

    idle: VecDeque<(u64, LoopCallback)>,

    next_token: u64,

    /// Cached per-iteration monotonic time.
    now: Instant,
}

impl EventLoop {
    pub fn new() -> Self {
        Self {
            handle: EventLoopHandle {
                shared: Arc::new(HandleShared {
                    notify: Notify::new(),
                    quit: AtomicBool::new(false),
                    deferred: Mutex::new(VecDeque::new()),
                }),
            },
            sockets: HashMap::new(),
            timer_heap: BinaryHeap::new(),
            timers: HashMap::new(),
            idle: VecDeque::new(),
            next_token: 1,
            now: Instant::now(),
        }
    }

    pub fn handle(&self) -> EventLoopHandle {
        self.handle.clone()
    }

    /// The cached time of the current iteration.
    pub fn now(&self) -> Instant {
        self.now
    }

    fn token(&mut self) -> u64 {
        let t = self.next_token;
        self.next_token += 1;
        t
    }

    /// Watch `fd` for `interest`. The fd must stay valid until the
    /// monitor is removed; the caller keeps ownership.
    pub fn register_socket(
        &mut self,
        fd: RawFd,
        interest: Interest,
        callback: impl FnMut(&EventLoopHandle, Readiness) -> bool + Send + 'static,
    ) -> u64 {
        let token = self.token();
        self.sockets.insert(
            token,
            SocketEntry { fd, interest, callback: Some(Box::new(callback)), async_fd: None },
        );
        trace!(token, fd, "socket registered");
        token
    }

    /// Change a monitor's interest mask.
    pub fn modify_socket(&mut self, token: u64, interest: Interest) {
        if let Some(entry) = self.sockets.get_mut(&token) {
            entry.interest = interest;
            entry.async_fd = None; // re-created with the new interest
        }
    }

    /// Remove a monitor. Effective immediately: the callback will not
    /// run after this returns.
    pub fn remove_socket(&mut self, token: u64) {
        if self.sockets.remove(&token).is_some() {
            trace!(token, "socket removed");
        }
    }

    /// Run `callback` after `delay`.
    pub fn add_timer(
        &mut self,
        delay: Duration,
        callback: impl FnOnce(&mut EventLoop) + Send + 'static,
    ) -> u64 {
        let token = self.token();
        self.timer_heap.push(TimerKey { due: Instant::now() + delay, token });
        self.timers.insert(token, Box::new(callback));
        token
    }

    /// Cancel a pending timer. Effective immediately.
    pub fn cancel_timer(&mut self, token: u64) {
        self.timers.remove(&token);
    }

    /// Run `callback` once before the next wait. The idle queue is
    /// drained completely, including entries added while draining.
    pub fn add_idle(
        &mut self,
        callback: impl FnOnce(&mut EventLoop) + Send + 'static,
    ) -> u64 {
        let token = self.token();
        self.idle.push_back((token, Box::new(callback)));
        token
    }

    pub fn cancel_idle(&mut self, token: u64) {
        self.idle.retain(|(t, _)| *t != token);
    }

    fn quitting(&self) -> bool {
        self.handle.shared.quit.load(Ordering::Acquire)
    }

    /// The main function: loops until [`EventLoopHandle::break_loop`].
    pub fn run(&mut self) {
        let rt = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .expect("failed to build event loop runtime");

        debug!("event loop running");
        rt.block_on(self.main_loop());
        debug!("event loop stopped");
    }

    async fn main_loop(&mut self) {
        while !self.quitting() {
            self.now = Instant::now();

            self.run_deferred();
            if self.quitting() {
                break;
            }

            self.run_idle();
            if self.quitting() {
                break;
            }

            let next_due = self.dispatch_timers();

            // make sure every monitor has its AsyncFd inside the
            // runtime context
            for entry in self.sockets.values_mut() {
                if entry.async_fd.is_none() {
                    match AsyncFd::with_interest(entry.fd, entry.interest.to_tokio()) {
                        Ok(afd) => entry.async_fd = Some(afd),
                        Err(e) => warn!(fd = entry.fd, %e, "cannot watch fd"),
                    }
                }
            }

            let wake = self.wait(next_due).await;

            match wake {
                Wake::Notified | Wake::Timer => {}
                Wake::Socket(token, readiness) => self.dispatch_socket(token, readiness),
            }
        }
    }

    async fn wait(&self, next_due: Option<Instant>) -> Wake {
        let notify = &self.handle.shared.notify;

        let mut socket_futures: Vec<Pin<Box<dyn Future<Output = (u64, Readiness)> + '_>>> =
            Vec::new();
        for (&token, entry) in &self.sockets {
            if let Some(afd) = &entry.async_fd {
                socket_futures.push(Box::pin(wait_ready(token, afd, entry.interest)));
            }
        }

        let sockets = async {
            if socket_futures.is_empty() {
                futures::future::pending::<(u64, Readiness)>().await
            } else {
                futures::future::select_all(socket_futures).await.0
            }
        };

        let timer = async {
            match next_due {
                Some(due) => tokio::time::sleep_until(due.into()).await,
                None => futures::future::pending::<()>().await,
            }
        };

        tokio::select! {
            _ = notify.notified() => Wake::Notified,
            _ = timer => Wake::Timer,
            (token, readiness) = sockets => Wake::Socket(token, readiness),
        }
    }

    fn run_deferred(&mut self) {
        loop {
            let deferred = {
                let mut queue = self
                    .handle
                    .shared
                    .deferred
                    .lock()
                    .unwrap_or_else(|e| e.into_inner());
                std::mem::take(&mut *queue)
            };
            if deferred.is_empty() {
                return;
            }
            for f in deferred {
                f(self);
                if self.quitting() {
                    return;
                }
            }
        }
    }

    fn run_idle(&mut self) {
        while let Some((_, callback)) = self.idle.pop_front() {
            callback(self);
            if self.quitting() {
                return;
            }
        }
    }

    /// Fire every due timer; returns the next deadline, if any.
    fn dispatch_timers(&mut self) -> Option<Instant> {
        while let Some(head) = self.timer_heap.peek() {
            if head.due > self.now {
                // skip deadlines whose timer was cancelled
                if self.timers.contains_key(&head.token) {
                    return Some(head.due);
                }
                self.timer_heap.pop();
                continue;
            }

            let token = head.token;
            self.timer_heap.pop();
            if let Some(callback) = self.timers.remove(&token) {
                callback(self);
                self.now = Instant::now();
            }
        }
        None
    }

    fn dispatch_socket(&mut self, token: u64, readiness: Readiness) {
        // the monitor may have been cancelled by a deferred op that ran
        // after readiness was observed
        let Some(mut callback) = self.sockets.get_mut(&token).and_then(|e| e.callback.take())
        else {
            return;
        };

        let keep = callback(&self.handle, readiness);

        if !keep {
            self.sockets.remove(&token);
            return;
        }
        if let Some(entry) = self.sockets.get_mut(&token) {
            entry.callback = Some(callback);
        }
    }
}

impl Default for EventLoop {
    fn default() -> Self {
        Self::new()
    }
}

async fn wait_ready(token: u64, afd: &AsyncFd<RawFd>, interest: Interest) -> (u64, Readiness) {
    match interest {
        Interest::Read => match afd.readable().await {
            Ok(mut guard) => {
                guard.clear_ready();
                (token, Readiness { readable: true, writable: false })
            }
            Err(_) => (token, Readiness { readable: true, writable: false }),
        },
        Interest::Write => match afd.writable().await {
            Ok(mut guard) => {
                guard.clear_ready();
                (token, Readiness { readable: false, writable: true })
            }
            Err(_) => (token, Readiness { readable: false, writable: true }),
        },
        Interest::ReadWrite => {
            tokio::select! {
                r = afd.readable() => {
                    if let Ok(mut guard) = r {
                        guard.clear_ready();
                    }
                    (token, Readiness { readable: true, writable: false })
                }
                w = afd.writable() => {
                    if let Ok(mut guard) = w {
                        guard.clear_ready();
                    }
                    (token, Readiness { readable: false, writable: true })
                }
            }
        }
    }
}
