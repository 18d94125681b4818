
use std::sync::atomic::{AtomicI32, AtomicU64, AtomicU8, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::{MappedRwLockReadGuard, RwLock, RwLockReadGuard};

use crate::events::Event;
use crate::render::cache::loader::Shared;
use crate::render::cache::Clock;
use crate::render::driver::Driver;


#[repr(u8)]
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum ProxyState {
    NotLoaded = 0,
    Queued = 1,
    Loaded = 2,
    /// Decoding hit an i/o problem. Stays here until someone queues it again.
    Retry = 3,
    /// Decoding failed for good. Stays here until someone queues it again.
    Error = 4,
}

impl ProxyState {
    fn from_u8(raw: u8) -> Self {
        match raw {
            0 => ProxyState::NotLoaded,
            1 => ProxyState::Queued,
            2 => ProxyState::Loaded,
            3 => ProxyState::Retry,
            _ => ProxyState::Error,
        }
    }

    /// States a caller may (re-)queue from.
    pub fn is_requestable(self) -> bool {
        matches!(self, ProxyState::NotLoaded | ProxyState::Retry | ProxyState::Error)
    }
}


#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum ProxyEventKind {
    Loaded,
    Unloaded,
    Retry,
    Error,
}


#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ProxyEvent {
    pub identity: Arc<str>,
    pub kind: ProxyEventKind,
}


pub struct ProxyEvents {
    pub loaded: Event<ProxyEvent>,
    pub unloaded: Event<ProxyEvent>,
    pub retry: Event<ProxyEvent>,
    pub error: Event<ProxyEvent>,
}

impl ProxyEvents {
    fn new() -> Self {
        Self {
            loaded: Event::new("proxy-loaded"),
            unloaded: Event::new("proxy-unloaded"),
            retry: Event::new("proxy-retry"),
            error: Event::new("proxy-error"),
        }
    }

    pub fn of(&self, kind: ProxyEventKind) -> &Event<ProxyEvent> {
        match kind {
            ProxyEventKind::Loaded => &self.loaded,
            ProxyEventKind::Unloaded => &self.unloaded,
            ProxyEventKind::Retry => &self.retry,
            ProxyEventKind::Error => &self.error,
        }
    }
}


/// Stand-in for a resource that may or may not be resident right now.
///
/// Only the loader moves a proxy between states. Callers signal use with
/// [`Proxy::touch`] (or [`Proxy::fetch`], which also requests a load) and
/// read the resource through [`Proxy::resource`].
pub struct Proxy<D: Driver> {
    identity: Arc<str>,
    persistent: bool,

    state: AtomicU8,
    priority: AtomicI32,
    last_touched: AtomicU64,
    last_touched_shadow: AtomicU64,

    // WTF: `state` only ever enters or leaves `Loaded` while this lock is held
    // for writing, so holding a read guard pins the two together.
    resource: RwLock<Option<D::Resource>>,

    events: ProxyEvents,
    clock: Arc<dyn Clock>,
    loader: Weak<Shared<D>>,
}


impl<D: Driver> Proxy<D> {

    pub(crate) fn new(
        identity: &str,
        persistent: bool,
        state: ProxyState,
        priority: i32,
        clock: Arc<dyn Clock>,
        loader: Weak<Shared<D>>,
    ) -> Self {
        let now = clock.now_ms();
        Self {
            identity: identity.into(),
            persistent,
            state: AtomicU8::new(state as u8),
            priority: AtomicI32::new(priority),
            last_touched: AtomicU64::new(now),
            last_touched_shadow: AtomicU64::new(now),
            resource: RwLock::new(None),
            events: ProxyEvents::new(),
            clock,
            loader,
        }
    }

    pub fn identity(&self) -> &str {
        &self.identity
    }

    pub(crate) fn identity_arc(&self) -> Arc<str> {
        self.identity.clone()
    }

    pub fn is_persistent(&self) -> bool {
        self.persistent
    }

    pub fn state(&self) -> ProxyState {
        ProxyState::from_u8(self.state.load(Ordering::Acquire))
    }

    pub fn priority(&self) -> i32 {
        self.priority.load(Ordering::Relaxed)
    }

    /// Lower is more urgent.
    pub fn set_priority(&self, priority: i32) {
        self.priority.store(priority, Ordering::Relaxed);
    }

    pub fn last_touched(&self) -> u64 {
        self.last_touched.load(Ordering::Acquire)
    }

    /// Marks the proxy as in use right now, postponing its eviction.
    pub fn touch(&self) {
        self.last_touched.store(self.clock.now_ms(), Ordering::Release);
    }

    pub fn events(&self) -> &ProxyEvents {
        &self.events
    }

    /// The resident resource, if any. The proxy cannot be evicted while the
    /// guard is alive, so don't keep it past the frame.
    pub fn resource(&self) -> Option<MappedRwLockReadGuard<'_, D::Resource>> {
        RwLockReadGuard::try_map(self.resource.read(), |slot| slot.as_ref()).ok()
    }

    pub fn is_resident(&self) -> bool {
        self.resource.read().is_some()
    }

    /// What a renderer calls every frame it draws this proxy: touches it,
    /// asks for a load if it isn't resident nor on its way, and hands back
    /// the resource when there is one.
    pub fn fetch(self: &Arc<Self>) -> Option<MappedRwLockReadGuard<'_, D::Resource>> {
        self.touch();
        if self.state() == ProxyState::NotLoaded {
            self.queue();
        }
        self.resource()
    }

    /// Puts a `NotLoaded`, `Retry` or `Error` proxy back on the load queue.
    ///
    /// Returns `false` if the proxy was already queued or loaded, or if its
    /// loader is gone.
    pub fn queue(self: &Arc<Self>) -> bool {
        match self.loader.upgrade() {
            Some(shared) => shared.request(self),
            None => false,
        }
    }

    pub fn cancel(self: &Arc<Self>) {
        if let Some(shared) = self.loader.upgrade() {
            shared.cancel(self);
        }
    }

    pub(crate) fn try_transition(&self, from: ProxyState, to: ProxyState) -> bool {
        self.state
            .compare_exchange(from as u8, to as u8, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    pub(crate) fn set_state(&self, state: ProxyState) {
        debug_assert!(state != ProxyState::Loaded, "Loaded goes through attach()");
        let _slot = self.resource.write();
        self.state.store(state as u8, Ordering::Release);
    }

    pub(crate) fn attach(&self, resource: D::Resource) {
        let mut slot = self.resource.write();
        *slot = Some(resource);
        self.state.store(ProxyState::Loaded as u8, Ordering::Release);
    }

    pub(crate) fn detach(&self) -> Option<D::Resource> {
        let mut slot = self.resource.write();
        let resource = slot.take();
        self.state.store(ProxyState::NotLoaded as u8, Ordering::Release);
        resource
    }

    /// Like [`Proxy::detach`], but gives up with `None` instead of waiting
    /// while someone holds the resource.
    pub(crate) fn try_detach(&self) -> Option<Option<D::Resource>> {
        let mut slot = self.resource.try_write()?;
        let resource = slot.take();
        self.state.store(ProxyState::NotLoaded as u8, Ordering::Release);
        Some(resource)
    }

    pub(crate) fn snapshot_last_touched(&self) {
        self.last_touched_shadow.store(self.last_touched(), Ordering::Relaxed);
    }

    pub(crate) fn last_touched_shadow(&self) -> u64 {
        self.last_touched_shadow.load(Ordering::Relaxed)
    }
}


impl<D: Driver> Drop for Proxy<D> {
    fn drop(&mut self) {
        let resource = match self.resource.get_mut().take() {
            Some(resource) => resource,
            None => return,
        };

        match self.loader.upgrade() {
            Some(shared) => shared.adopt_orphan(resource),
            None => log::debug!("{} dropped after its loader, releasing in place", self.identity),
        }
    }
}


impl<D: Driver> std::fmt::Debug for Proxy<D> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Proxy")
            .field("identity", &self.identity)
            .field("state", &self.state())
            .field("priority", &self.priority())
            .field("persistent", &self.persistent)
            .field("last_touched", &self.last_touched())
            .finish()
    }
}
