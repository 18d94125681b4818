//! Streams images from disk or the network into GPU memory without blocking
//! the render loop, and releases them again once they go unused.
//!
//! Callers resolve an identity (a path or URL) to a [`Proxy`] through a
//! [`ProxyRegistry`], touch it every frame they draw it, and read its resource
//! once the background [`Loader`] has made it resident.

pub mod events;
pub mod render;

pub use crate::events::{Event, ListenerId};
pub use crate::render::cache::{Clock, ManualClock, MonotonicClock};
pub use crate::render::{
    DecodeError,
    Driver,
    Loader,
    LoaderConfig,
    Proxy,
    ProxyEvent,
    ProxyEventKind,
    ProxyRegistry,
    ProxyState,
    ResolveOptions,
};
