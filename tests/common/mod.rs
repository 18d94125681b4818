#![allow(dead_code)]

use std::collections::HashMap;
use std::io;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::anyhow;
use parking_lot::Mutex;

use tex_stream::render::cache::{Loader, LoaderConfig, ManualClock, ProxyRegistry};
use tex_stream::{DecodeError, Driver, ProxyEvent};


#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Outcome {
    Succeed,
    IoFailure,
    OtherFailure,
    Panic,
}


/// A fake GPU resource; `serial` is unique per decode.
#[derive(Debug, PartialEq, Eq)]
pub struct FakeTexture {
    pub identity: String,
    pub serial: u64,
}


#[derive(Default)]
pub struct Journal {
    pub decoded: Vec<String>,
    pub destroyed: Vec<u64>,
}


/// Driver whose decode outcome is scripted per identity.
///
/// With `spawn == false` no worker context is created and tests pump the
/// loader with `Loader::tick`.
pub struct ScriptedDriver {
    pub spawn: bool,
    pub outcomes: Mutex<HashMap<String, Outcome>>,
    pub journal: Arc<Mutex<Journal>>,
    serial: AtomicU64,
}

impl ScriptedDriver {
    pub fn manual() -> Self {
        Self::with_spawn(false)
    }

    pub fn threaded() -> Self {
        Self::with_spawn(true)
    }

    fn with_spawn(spawn: bool) -> Self {
        Self {
            spawn,
            outcomes: Mutex::new(HashMap::new()),
            journal: Arc::new(Mutex::new(Journal::default())),
            serial: AtomicU64::new(0),
        }
    }

    pub fn script(self, identity: &str, outcome: Outcome) -> Self {
        self.outcomes.lock().insert(identity.to_owned(), outcome);
        self
    }
}

impl Driver for ScriptedDriver {
    type Resource = FakeTexture;

    fn create_worker_context(&self, name: &str, body: Box<dyn FnOnce() + Send>) -> anyhow::Result<()> {
        if self.spawn {
            std::thread::Builder::new().name(name.to_owned()).spawn(body)?;
        }
        Ok(())
    }

    fn decode(&self, identity: &str) -> Result<FakeTexture, DecodeError> {
        self.journal.lock().decoded.push(identity.to_owned());

        let outcome = self.outcomes.lock().get(identity).copied().unwrap_or(Outcome::Succeed);
        match outcome {
            Outcome::Succeed => Ok(FakeTexture {
                identity: identity.to_owned(),
                serial: self.serial.fetch_add(1, Ordering::Relaxed),
            }),
            Outcome::IoFailure => Err(io::Error::new(io::ErrorKind::NotFound, identity.to_owned()).into()),
            Outcome::OtherFailure => Err(anyhow!("corrupt image: {}", identity).into()),
            Outcome::Panic => panic!("decoder blew up on {}", identity),
        }
    }

    fn destroy(&self, resource: FakeTexture) {
        self.journal.lock().destroyed.push(resource.serial);
    }
}


pub struct Harness {
    pub clock: Arc<ManualClock>,
    pub registry: ProxyRegistry<ScriptedDriver>,
    pub journal: Arc<Mutex<Journal>>,
    pub events: Arc<Mutex<Vec<ProxyEvent>>>,
}

impl Harness {
    pub fn new(driver: ScriptedDriver) -> Self {
        Self::with_config(driver, LoaderConfig::default())
    }

    pub fn with_config(driver: ScriptedDriver, config: LoaderConfig) -> Self {
        let clock = Arc::new(ManualClock::new(0));
        let journal = driver.journal.clone();
        let loader = Loader::with_clock(driver, config, clock.clone())
            .expect("loader construction");

        let events = Arc::new(Mutex::new(Vec::new()));
        let sink = events.clone();
        loader.events().listen(move |event: &ProxyEvent| {
            sink.lock().push(event.clone());
            Ok(())
        });

        Self {
            clock,
            registry: ProxyRegistry::new(loader),
            journal,
            events,
        }
    }

    pub fn loader(&self) -> &Loader<ScriptedDriver> {
        self.registry.loader()
    }

    pub fn tick(&self) {
        self.loader().tick();
    }

    pub fn advance(&self, ms: u64) {
        self.clock.advance(Duration::from_millis(ms));
    }

    pub fn events_for(&self, identity: &str) -> Vec<ProxyEvent> {
        self.events
            .lock()
            .iter()
            .filter(|event| &*event.identity == identity)
            .cloned()
            .collect()
    }

    pub fn decoded(&self) -> Vec<String> {
        self.journal.lock().decoded.clone()
    }

    pub fn destroyed(&self) -> Vec<u64> {
        self.journal.lock().destroyed.clone()
    }
}


/// Polls `condition` until it holds or `timeout` runs out.
pub fn wait_until(timeout: Duration, mut condition: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(2));
    }
    condition()
}
