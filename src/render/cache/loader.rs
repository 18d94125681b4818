//! Background loading and idle eviction of [`Proxy`] resources.
//!
//! A [`Loader`] owns two queues. The load queue holds proxies waiting to be
//! decoded; the unload queue holds loaded, non-persistent proxies that are
//! candidates for eviction. One worker, running on the context the driver
//! provides, alternates between the two:
//!
//! 1. pick the most urgent queued proxy (lowest priority, ties going to the
//!    most recently touched) and decode it, outside of any lock;
//! 2. evict the longest-idle loaded proxy if it has gone untouched for longer
//!    than the idle threshold and nobody holds its resource at that moment;
//! 3. sleep for the throttle interval.
//!
//! Failures never leave the worker: they become a proxy state plus an event.
//! A decode call that hangs stalls the worker, eviction included.

use std::cmp::Reverse;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use anyhow::anyhow;
use parking_lot::Mutex;

use crate::events::Event;
use crate::render::cache::proxy::{Proxy, ProxyEvent, ProxyEventKind, ProxyState};
use crate::render::cache::{Clock, LoaderConfig, MonotonicClock};
use crate::render::driver::{DecodeError, Driver};


pub const WORKER_NAME: &str = "tex-stream-loader";


/// Handle to one loader engine. Cloning is cheap; the worker stops once
/// every handle is gone or [`Loader::shutdown`] is called.
pub struct Loader<D: Driver> {
    shared: Arc<Shared<D>>,
}

impl<D: Driver> Clone for Loader<D> {
    fn clone(&self) -> Self {
        Self { shared: self.shared.clone() }
    }
}


pub(crate) struct Shared<D: Driver> {
    driver: D,
    config: LoaderConfig,
    clock: Arc<dyn Clock>,
    running: AtomicBool,

    load_queue: Mutex<Vec<Arc<Proxy<D>>>>,
    unload_queue: Mutex<Vec<Arc<Proxy<D>>>>,

    // resources of proxies dropped while still resident; destroyed on the worker
    orphans: Mutex<Vec<D::Resource>>,

    events: Event<ProxyEvent>,
}


impl<D: Driver> Loader<D> {

    pub fn new(driver: D, config: LoaderConfig) -> anyhow::Result<Self> {
        Self::with_clock(driver, config, Arc::new(MonotonicClock::new()))
    }

    pub fn with_clock(driver: D, config: LoaderConfig, clock: Arc<dyn Clock>) -> anyhow::Result<Self> {
        let shared = Arc::new(Shared {
            driver,
            config,
            clock,
            running: AtomicBool::new(true),
            load_queue: Mutex::new(Vec::new()),
            unload_queue: Mutex::new(Vec::new()),
            orphans: Mutex::new(Vec::new()),
            events: Event::new("loader"),
        });

        let worker = Arc::downgrade(&shared);
        let throttle = config.throttle;
        shared.driver.create_worker_context(WORKER_NAME, Box::new(move || {
            log::debug!("{} started", WORKER_NAME);
            run_worker(worker, throttle);
            log::debug!("{} stopped", WORKER_NAME);
        }))?;

        Ok(Self { shared })
    }

    pub fn config(&self) -> &LoaderConfig {
        &self.shared.config
    }

    pub fn driver(&self) -> &D {
        &self.shared.driver
    }

    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.shared.clock
    }

    pub fn now_ms(&self) -> u64 {
        self.shared.clock.now_ms()
    }

    /// Every proxy event of this loader, whatever the proxy.
    pub fn events(&self) -> &Event<ProxyEvent> {
        &self.shared.events
    }

    pub fn is_running(&self) -> bool {
        self.shared.running.load(Ordering::Acquire)
    }

    /// Stops the worker after its current iteration.
    pub fn shutdown(&self) {
        self.shared.running.store(false, Ordering::Release);
    }

    pub(crate) fn create_proxy(&self, identity: &str, persistent: bool, queued: bool) -> Arc<Proxy<D>> {
        let state = if queued { ProxyState::Queued } else { ProxyState::NotLoaded };
        Arc::new(Proxy::new(
            identity,
            persistent,
            state,
            self.shared.config.default_priority,
            self.shared.clock.clone(),
            Arc::downgrade(&self.shared),
        ))
    }

    /// Adds a `Queued` proxy to the load queue, pulling it off the unload
    /// queue first if it was waiting there. Proxies in any other state are
    /// left where they are; use [`Loader::request`] to move them to `Queued`.
    pub fn enqueue_load(&self, proxy: &Arc<Proxy<D>>) {
        self.shared.enqueue_load(proxy)
    }

    /// Moves a requestable proxy to `Queued` and enqueues it.
    pub fn request(&self, proxy: &Arc<Proxy<D>>) -> bool {
        self.shared.request(proxy)
    }

    /// Drops a proxy from the load queue, or schedules a loaded one for
    /// release. A decode already in progress is not interrupted.
    pub fn cancel(&self, proxy: &Arc<Proxy<D>>) {
        self.shared.cancel(proxy)
    }

    /// Runs one iteration of the worker body on the calling thread.
    ///
    /// This is what the worker does between two sleeps; drivers that do not
    /// spawn a context of their own pump the loader through it.
    pub fn tick(&self) {
        self.shared.tick()
    }

    pub fn pending_loads(&self) -> Vec<Arc<Proxy<D>>> {
        self.shared.load_queue.lock().clone()
    }

    pub fn pending_unloads(&self) -> Vec<Arc<Proxy<D>>> {
        self.shared.unload_queue.lock().clone()
    }

    pub fn orphan_count(&self) -> usize {
        self.shared.orphans.lock().len()
    }
}


fn run_worker<D: Driver>(shared: Weak<Shared<D>>, throttle: std::time::Duration) {
    loop {
        match shared.upgrade() {
            Some(shared) if shared.running.load(Ordering::Acquire) => shared.tick(),
            _ => return,
        }
        std::thread::sleep(throttle);
    }
}


impl<D: Driver> Shared<D> {

    pub(crate) fn request(&self, proxy: &Arc<Proxy<D>>) -> bool {
        let from = proxy.state();
        if !from.is_requestable() || !proxy.try_transition(from, ProxyState::Queued) {
            return false;
        }

        self.enqueue_load(proxy);
        true
    }

    fn enqueue_load(&self, proxy: &Arc<Proxy<D>>) {
        if proxy.state() != ProxyState::Queued {
            return;
        }

        remove(&mut self.unload_queue.lock(), proxy);

        let mut load_queue = self.load_queue.lock();
        if proxy.state() == ProxyState::Queued && !contains(&load_queue, proxy) {
            load_queue.push(proxy.clone());
        }
    }

    pub(crate) fn cancel(&self, proxy: &Arc<Proxy<D>>) {
        {
            let mut load_queue = self.load_queue.lock();
            if remove(&mut load_queue, proxy).is_some() {
                proxy.set_state(ProxyState::NotLoaded);
                log::debug!("cancelled queued load of {}", proxy.identity());
            }
        }

        let mut unload_queue = self.unload_queue.lock();
        if proxy.state() == ProxyState::Loaded && !proxy.is_persistent() && !contains(&unload_queue, proxy) {
            unload_queue.push(proxy.clone());
        }
    }

    pub(crate) fn adopt_orphan(&self, resource: D::Resource) {
        self.orphans.lock().push(resource);
    }

    fn tick(&self) {
        self.destroy_orphans();
        self.load_step();
        self.evict_step();
    }

    fn destroy_orphans(&self) {
        let orphans = std::mem::take(&mut *self.orphans.lock());
        if !orphans.is_empty() {
            log::debug!("destroying {} orphaned resource(s)", orphans.len());
        }
        for resource in orphans {
            self.driver.destroy(resource);
        }
    }

    fn load_step(&self) {
        let proxy = {
            let mut load_queue = self.load_queue.lock();

            // WTF: `last_touched` keeps moving under our feet while callers
            // touch proxies, so the comparison runs on a frozen copy.
            for proxy in load_queue.iter() {
                proxy.snapshot_last_touched();
            }

            let best = load_queue
                .iter()
                .enumerate()
                .min_by_key(|(_, proxy)| (proxy.priority(), Reverse(proxy.last_touched_shadow())))
                .map(|(index, _)| index);

            match best {
                Some(index) => load_queue.remove(index),
                None => return,
            }
        };

        match self.decode(proxy.identity()) {
            Ok(resource) => {
                // WTF: attach and push under one lock, otherwise a cancel in
                // between sees `Loaded` and queues the proxy a second time.
                // A `Queued` proxy has no resource to hold on to, so its write
                // lock is free up to a momentary peek.
                let mut unload_queue = self.unload_queue.lock();
                proxy.attach(resource);
                if !proxy.is_persistent() && !contains(&unload_queue, &proxy) {
                    unload_queue.push(proxy.clone());
                }
                drop(unload_queue);

                log::debug!("loaded {}", proxy.identity());
                self.notify(&proxy, ProxyEventKind::Loaded);
            }

            Err(error) if error.is_recoverable() => {
                log::warn!("could not load {}, marked for retry: {}", proxy.identity(), error);
                proxy.set_state(ProxyState::Retry);
                self.notify(&proxy, ProxyEventKind::Retry);
            }

            Err(error) => {
                log::error!("unexpected failure while loading {}: {:#}", proxy.identity(), error);
                proxy.set_state(ProxyState::Error);
                self.notify(&proxy, ProxyEventKind::Error);
            }
        }
    }

    fn decode(&self, identity: &str) -> Result<D::Resource, DecodeError> {
        match panic::catch_unwind(AssertUnwindSafe(|| self.driver.decode(identity))) {
            Ok(result) => result,
            Err(payload) => {
                let reason = payload
                    .downcast_ref::<&str>()
                    .map(|s| s.to_string())
                    .or_else(|| payload.downcast_ref::<String>().cloned())
                    .unwrap_or_else(|| "unknown panic".to_owned());
                Err(anyhow!("driver panicked while decoding {}: {}", identity, reason).into())
            }
        }
    }

    fn evict_step(&self) {
        let now = self.clock.now_ms();
        let threshold = self.config.idle_threshold.as_millis() as u64;

        let (proxy, resource) = {
            let mut unload_queue = self.unload_queue.lock();

            let idlest = unload_queue
                .iter()
                .enumerate()
                .min_by_key(|(_, proxy)| proxy.last_touched())
                .map(|(index, proxy)| (index, proxy.last_touched()));

            let index = match idlest {
                Some((index, last_touched)) if now.saturating_sub(last_touched) > threshold => index,
                _ => return,
            };

            // WTF: leaving the queue and leaving `Loaded` have to happen under
            // this lock, or a concurrent cancel re-queues a proxy on its way
            // out. Waiting on a reader here would stall every queue operation,
            // so a resource in use right now just survives this iteration.
            let resource = match unload_queue[index].try_detach() {
                Some(resource) => resource,
                None => {
                    log::trace!("{} is being read, not evicting it yet", unload_queue[index].identity());
                    return;
                }
            };

            (unload_queue.remove(index), resource)
        };

        if let Some(resource) = resource {
            self.driver.destroy(resource);
        }
        log::debug!("unloaded {} after {} ms idle", proxy.identity(), now.saturating_sub(proxy.last_touched()));
        self.notify(&proxy, ProxyEventKind::Unloaded);
    }

    fn notify(&self, proxy: &Proxy<D>, kind: ProxyEventKind) {
        let event = ProxyEvent {
            identity: proxy.identity_arc(),
            kind,
        };

        // already logged by the event; the worker keeps going regardless
        let _ = proxy.events().of(kind).trigger(event.clone());
        let _ = self.events.trigger(event);
    }
}


impl<D: Driver> Drop for Shared<D> {
    fn drop(&mut self) {
        for resource in self.orphans.get_mut().drain(..) {
            self.driver.destroy(resource);
        }

        // once we're gone these proxies can't hand their resources back
        for proxy in self.unload_queue.get_mut().drain(..) {
            if let Some(resource) = proxy.detach() {
                self.driver.destroy(resource);
            }
        }
    }
}


fn contains<D: Driver>(queue: &[Arc<Proxy<D>>], proxy: &Arc<Proxy<D>>) -> bool {
    queue.iter().any(|other| Arc::ptr_eq(other, proxy))
}

fn remove<D: Driver>(queue: &mut Vec<Arc<Proxy<D>>>, proxy: &Arc<Proxy<D>>) -> Option<Arc<Proxy<D>>> {
    let index = queue.iter().position(|other| Arc::ptr_eq(other, proxy))?;
    Some(queue.remove(index))
}
