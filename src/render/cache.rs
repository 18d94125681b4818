
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

pub mod loader;
pub mod proxy;
pub mod registry;

pub use self::loader::Loader;
pub use self::proxy::{Proxy, ProxyEvent, ProxyEventKind, ProxyEvents, ProxyState};
pub use self::registry::{ProxyRegistry, ResolveOptions};


pub const DEFAULT_IDLE_THRESHOLD: Duration = Duration::from_millis(5000);
pub const DEFAULT_THROTTLE: Duration = Duration::from_millis(5);
pub const DEFAULT_PRIORITY: i32 = 1000;


#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct LoaderConfig {
    /// How long a non-persistent resource may go untouched before it is evicted.
    pub idle_threshold: Duration,
    /// Sleep between two iterations of the worker loop.
    pub throttle: Duration,
    /// Priority given to freshly resolved proxies. Lower is more urgent.
    pub default_priority: i32,
}

impl Default for LoaderConfig {
    fn default() -> Self {
        Self {
            idle_threshold: DEFAULT_IDLE_THRESHOLD,
            throttle: DEFAULT_THROTTLE,
            default_priority: DEFAULT_PRIORITY,
        }
    }
}


/// Monotonic milliseconds, shared by a loader and every proxy it hands out.
pub trait Clock: Send + Sync + 'static {
    fn now_ms(&self) -> u64;
}


pub struct MonotonicClock {
    origin: Instant,
}

impl MonotonicClock {
    pub fn new() -> Self {
        Self { origin: Instant::now() }
    }
}

impl Default for MonotonicClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for MonotonicClock {
    fn now_ms(&self) -> u64 {
        self.origin.elapsed().as_millis() as u64
    }
}


/// A clock that only moves when told to.
#[derive(Default)]
pub struct ManualClock {
    now: AtomicU64,
}

impl ManualClock {
    pub fn new(start_ms: u64) -> Self {
        Self { now: AtomicU64::new(start_ms) }
    }

    pub fn advance(&self, by: Duration) {
        self.now.fetch_add(by.as_millis() as u64, Ordering::AcqRel);
    }

    pub fn set(&self, now_ms: u64) {
        self.now.store(now_ms, Ordering::Release);
    }
}

impl Clock for ManualClock {
    fn now_ms(&self) -> u64 {
        self.now.load(Ordering::Acquire)
    }
}
