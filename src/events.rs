//! Synchronous notification channel.
//!
//! An [`Event`] delivers each triggered message to its listeners on the thread
//! that triggered it. A listener that fails stops delivery of that message to
//! every listener registered after it, and the failure is handed back to the
//! caller of [`Event::trigger`]. Callers that must keep running (the loader's
//! worker, for one) log the error and carry on.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use futures::channel::mpsc;
use parking_lot::{Mutex, RwLock};


#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);


type Listener<T> = Arc<dyn Fn(&T) -> anyhow::Result<()> + Send + Sync>;
type OneShot<T> = Box<dyn FnOnce(&T) -> anyhow::Result<()> + Send>;


pub struct Event<T> {
    name: String,
    postpone: AtomicBool,
    next_id: AtomicU64,
    trigger_count: AtomicU64,

    // WTF: delivery works on a snapshot of this list, so a listener is free
    // to register or cancel listeners on the very event it is handling.
    listeners: RwLock<Vec<(ListenerId, Listener<T>)>>,
    one_shots: Mutex<Vec<(ListenerId, OneShot<T>)>>,
    streams: Mutex<Vec<mpsc::UnboundedSender<T>>>,
    messages: Mutex<Vec<T>>,
}


impl<T: Clone + Send + 'static> Event<T> {

    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            postpone: AtomicBool::new(false),
            next_id: AtomicU64::new(0),
            trigger_count: AtomicU64::new(0),
            listeners: RwLock::new(Vec::new()),
            one_shots: Mutex::new(Vec::new()),
            streams: Mutex::new(Vec::new()),
            messages: Mutex::new(Vec::new()),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Number of times [`Event::trigger`] has been called.
    pub fn trigger_count(&self) -> u64 {
        self.trigger_count.load(Ordering::Relaxed)
    }

    pub fn listener_count(&self) -> usize {
        self.listeners.read().len() + self.one_shots.lock().len()
    }

    pub fn is_postponed(&self) -> bool {
        self.postpone.load(Ordering::Acquire)
    }

    /// While postponed, triggered messages are buffered until [`Event::deliver`].
    pub fn set_postpone(&self, postpone: bool) {
        self.postpone.store(postpone, Ordering::Release);
    }

    pub fn listen<F>(&self, listener: F) -> ListenerId
    where
        F: Fn(&T) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        let id = self.next_id();
        self.listeners.write().push((id, Arc::new(listener)));
        id
    }

    /// Registers a listener that is removed after it has been called once.
    pub fn listen_once<F>(&self, listener: F) -> ListenerId
    where
        F: FnOnce(&T) -> anyhow::Result<()> + Send + 'static,
    {
        let id = self.next_id();
        self.one_shots.lock().push((id, Box::new(listener)));
        id
    }

    /// Removes a listener. Returns `false` if it was not registered (anymore).
    pub fn cancel(&self, id: ListenerId) -> bool {
        {
            let mut listeners = self.listeners.write();
            if let Some(index) = listeners.iter().position(|(other, _)| *other == id) {
                listeners.remove(index);
                return true;
            }
        }

        let mut one_shots = self.one_shots.lock();
        match one_shots.iter().position(|(other, _)| *other == id) {
            Some(index) => {
                one_shots.remove(index);
                true
            }
            None => false,
        }
    }

    /// Subscribes through a channel instead of a callback.
    ///
    /// Stream subscribers receive every delivered message before the callback
    /// listeners run, so a failing listener never hides a message from them.
    pub fn stream(&self) -> mpsc::UnboundedReceiver<T> {
        let (sender, receiver) = mpsc::unbounded();
        self.streams.lock().push(sender);
        receiver
    }

    pub fn trigger(&self, message: T) -> anyhow::Result<()> {
        self.trigger_count.fetch_add(1, Ordering::Relaxed);

        if self.is_postponed() {
            if self.has_subscribers() {
                self.messages.lock().push(message);
            }
            return Ok(());
        }

        self.dispatch(&message)
    }

    /// Delivers messages buffered while postponed. Does nothing otherwise.
    pub fn deliver(&self) -> anyhow::Result<()> {
        if !self.is_postponed() {
            return Ok(());
        }

        let pending = std::mem::take(&mut *self.messages.lock());
        for message in &pending {
            self.dispatch(message)?;
        }
        Ok(())
    }

    fn dispatch(&self, message: &T) -> anyhow::Result<()> {
        self.streams
            .lock()
            .retain(|sender| sender.unbounded_send(message.clone()).is_ok());

        let listeners: Vec<Listener<T>> = self.listeners
            .read()
            .iter()
            .map(|(_, listener)| listener.clone())
            .collect();

        for listener in listeners {
            if let Err(error) = listener(message) {
                log::error!("listener on event '{}' failed: {:#}", self.name, error);
                return Err(error);
            }
        }

        let mut one_shots = std::mem::take(&mut *self.one_shots.lock()).into_iter();
        while let Some((_, listener)) = one_shots.next() {
            if let Err(error) = listener(message) {
                log::error!("one-shot listener on event '{}' failed: {:#}", self.name, error);

                // the ones we never got to stay registered
                let mut registered = self.one_shots.lock();
                let added_meanwhile = std::mem::take(&mut *registered);
                registered.extend(one_shots);
                registered.extend(added_meanwhile);
                return Err(error);
            }
        }

        Ok(())
    }

    fn has_subscribers(&self) -> bool {
        !self.listeners.read().is_empty()
            || !self.one_shots.lock().is_empty()
            || !self.streams.lock().is_empty()
    }

    fn next_id(&self) -> ListenerId {
        ListenerId(self.next_id.fetch_add(1, Ordering::Relaxed))
    }
}


impl<T> std::fmt::Debug for Event<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Event")
            .field("name", &self.name)
            .field("trigger_count", &self.trigger_count.load(Ordering::Relaxed))
            .finish()
    }
}
