
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Weak};

use chashmap::CHashMap;

use crate::render::cache::loader::Loader;
use crate::render::cache::proxy::Proxy;
use crate::render::driver::Driver;


// Dead entries are swept after this many insertions.
const SWEEP_INTERVAL: usize = 256;


#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct ResolveOptions {
    /// Queue the proxy for loading right away when it is created.
    pub auto_queue: bool,
    /// Exempt the proxy from idle eviction.
    pub persistent: bool,
}

impl Default for ResolveOptions {
    fn default() -> Self {
        Self {
            auto_queue: true,
            persistent: false,
        }
    }
}

impl ResolveOptions {
    pub fn persistent() -> Self {
        Self {
            persistent: true,
            ..Self::default()
        }
    }

    pub fn deferred() -> Self {
        Self {
            auto_queue: false,
            ..Self::default()
        }
    }
}


/// Hands out at most one live [`Proxy`] per identity.
///
/// The registry only keeps weak references: once nobody holds a proxy
/// anymore (the loader's queues count as holders), resolving the same
/// identity again builds a fresh one.
pub struct ProxyRegistry<D: Driver> {
    loader: Loader<D>,

    // WTF: CHashMap locks per key, which is what makes `resolve` atomic for
    // one identity without serializing lookups of unrelated ones.
    entries: CHashMap<String, Weak<Proxy<D>>>,
    insertions: AtomicUsize,
}


impl<D: Driver> ProxyRegistry<D> {

    pub fn new(loader: Loader<D>) -> Self {
        Self {
            loader,
            entries: CHashMap::new(),
            insertions: AtomicUsize::new(0),
        }
    }

    pub fn loader(&self) -> &Loader<D> {
        &self.loader
    }

    pub fn resolve(&self, identity: &str) -> Arc<Proxy<D>> {
        self.resolve_with(identity, ResolveOptions::default())
    }

    pub fn resolve_with(&self, identity: &str, options: ResolveOptions) -> Arc<Proxy<D>> {
        let mut found = None;
        let mut created = false;

        self.entries.alter(identity.to_owned(), |entry| {
            if let Some(proxy) = entry.as_ref().and_then(Weak::upgrade) {
                found = Some(proxy);
                return entry;
            }

            let proxy = self.loader.create_proxy(identity, options.persistent, options.auto_queue);
            let weak = Arc::downgrade(&proxy);
            found = Some(proxy);
            created = true;
            Some(weak)
        });

        let proxy = match found {
            Some(proxy) => proxy,
            // alter always runs its closure
            None => unreachable!(),
        };

        if created {
            log::trace!("created proxy for {}", identity);
            if options.auto_queue {
                self.loader.enqueue_load(&proxy);
            }
            if self.insertions.fetch_add(1, Ordering::Relaxed) % SWEEP_INTERVAL == SWEEP_INTERVAL - 1 {
                self.sweep();
            }
        }

        proxy
    }

    /// The live proxy for `identity`, without creating one.
    pub fn get(&self, identity: &str) -> Option<Arc<Proxy<D>>> {
        self.entries.get(identity).and_then(|entry| entry.upgrade())
    }

    pub fn cancel(&self, proxy: &Arc<Proxy<D>>) {
        self.loader.cancel(proxy)
    }

    /// Forgets entries whose proxy is gone. Returns how many were removed.
    pub fn sweep(&self) -> usize {
        let before = self.entries.len();
        self.entries.retain(|_, entry| entry.strong_count() > 0);
        let removed = before.saturating_sub(self.entries.len());
        if removed > 0 {
            log::trace!("swept {} dead proxy entries", removed);
        }
        removed
    }

    /// Number of entries, including dead ones not swept yet.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
