
use std::path::PathBuf;

use crate::render::driver::{DecodeError, Driver, Source};


/// Decoded pixels kept in host memory, 4 bytes per pixel.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Bitmap {
    pub width: u32,
    pub height: u32,
    pub pixels: Vec<u8>,
}

impl Bitmap {
    pub fn byte_size(&self) -> usize {
        self.pixels.len()
    }
}


/// Headless driver: decodes into [`Bitmap`]s and never touches a GPU.
pub struct CpuDriver {
    source: Source,
}

impl CpuDriver {
    pub fn new(root: impl Into<PathBuf>) -> anyhow::Result<Self> {
        Ok(Self { source: Source::new(root)? })
    }

    pub fn source(&self) -> &Source {
        &self.source
    }
}

impl Driver for CpuDriver {
    type Resource = Bitmap;

    fn decode(&self, identity: &str) -> Result<Bitmap, DecodeError> {
        let bytes = self.source.read(identity)?;
        let img = image::load_from_memory(&bytes)?.into_rgba8();

        let (width, height) = img.dimensions();
        log::trace!("decoded {} into {}x{} bitmap", identity, width, height);

        Ok(Bitmap {
            width,
            height,
            pixels: img.into_raw(),
        })
    }

    fn destroy(&self, bitmap: Bitmap) {
        log::trace!("releasing {} byte bitmap", bitmap.byte_size());
    }
}
