
use std::io;
use std::path::{Path, PathBuf};

pub mod bitmaps;
pub mod textures;

pub use self::bitmaps::{Bitmap, CpuDriver};
pub use self::textures::{GpuDriver, Texture};


pub const DEFAULT_ROOT: &str = "assets/textures";


/// The graphics-side collaborator of a [`Loader`](crate::render::cache::Loader).
///
/// All `decode` and `destroy` calls are made from the context returned by
/// `create_worker_context`, never from caller threads.
pub trait Driver: Send + Sync + 'static {
    type Resource: Send + Sync + 'static;

    /// Starts `body` on the execution context resources must be created and
    /// destroyed on. `body` returns once the owning loader shuts down.
    fn create_worker_context(&self, name: &str, body: Box<dyn FnOnce() + Send>) -> anyhow::Result<()> {
        std::thread::Builder::new()
            .name(name.to_owned())
            .spawn(body)?;
        Ok(())
    }

    fn decode(&self, identity: &str) -> Result<Self::Resource, DecodeError>;

    /// Called exactly once for every resource `decode` handed out.
    fn destroy(&self, resource: Self::Resource);
}


#[derive(Debug, thiserror::Error)]
pub enum DecodeError {
    /// Transport or file trouble; worth asking for again later.
    #[error("i/o failure: {0}")]
    Io(#[from] io::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl DecodeError {
    pub fn is_recoverable(&self) -> bool {
        matches!(self, DecodeError::Io(_))
    }
}

impl From<image::ImageError> for DecodeError {
    fn from(error: image::ImageError) -> Self {
        match error {
            image::ImageError::IoError(error) => DecodeError::Io(error),
            other => DecodeError::Other(other.into()),
        }
    }
}


/// Turns identities into bytes: `http(s)://` over the network, anything else from disk.
pub struct Source {
    root: PathBuf,
    http: reqwest::blocking::Client,
}

impl Source {

    pub fn new(root: impl Into<PathBuf>) -> anyhow::Result<Self> {
        let http = reqwest::blocking::Client::builder()
            .user_agent(concat!("tex-stream/", env!("CARGO_PKG_VERSION")))
            .build()?;

        Ok(Self {
            root: root.into(),
            http,
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn path_of(&self, identity: &str) -> PathBuf {
        let path = Path::new(identity.strip_prefix("file://").unwrap_or(identity));
        if path.is_absolute() {
            path.to_owned()
        } else {
            self.root.join(path)
        }
    }

    pub fn read(&self, identity: &str) -> io::Result<Vec<u8>> {
        if identity.starts_with("http://") || identity.starts_with("https://") {
            return self.fetch(identity);
        }

        std::fs::read(self.path_of(identity))
    }

    fn fetch(&self, url: &str) -> io::Result<Vec<u8>> {
        let response = self.http
            .get(url)
            .send()
            .and_then(|response| response.error_for_status())
            .map_err(|error| io::Error::new(io::ErrorKind::Other, error))?;

        let bytes = response
            .bytes()
            .map_err(|error| io::Error::new(io::ErrorKind::Other, error))?;

        Ok(bytes.to_vec())
    }
}
