
pub mod cache;
pub mod core;
pub mod driver;

pub use self::cache::{
    Loader,
    LoaderConfig,
    Proxy,
    ProxyEvent,
    ProxyEventKind,
    ProxyRegistry,
    ProxyState,
    ResolveOptions,
};
pub use self::driver::{DecodeError, Driver};
