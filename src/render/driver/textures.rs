
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::anyhow;

use crate::render::driver::{DecodeError, Driver, Source};


enum Raw {
    VecU8(Vec<u8>),
    VecF32(Vec<f32>),
}


pub struct Texture {
    pub handle: wgpu::Texture,
    pub view: wgpu::TextureView,
    pub size: wgpu::Extent3d,
    pub format: wgpu::TextureFormat,
}

impl Texture {
    pub fn byte_size(&self) -> u64 {
        let bpp = self.format.block_copy_size(None).unwrap_or(4) as u64;
        bpp * self.size.width as u64 * self.size.height as u64
    }
}


/// Decodes images and uploads them as sampled 2d textures.
pub struct GpuDriver {
    device: Arc<wgpu::Device>,
    queue: Arc<wgpu::Queue>,
    source: Source,
}

impl GpuDriver {

    pub fn new(device: Arc<wgpu::Device>, queue: Arc<wgpu::Queue>, root: impl Into<PathBuf>) -> anyhow::Result<Self> {
        Ok(Self {
            device,
            queue,
            source: Source::new(root)?,
        })
    }

    pub fn device(&self) -> &wgpu::Device {
        &self.device
    }

    fn upload(&self, name: &str, img: image::DynamicImage) -> Result<Texture, DecodeError> {
        use image::ColorType;

        let (width, height) = (img.width(), img.height());

        let max = self.device.limits().max_texture_dimension_2d;
        if width == 0 || height == 0 || width > max || height > max {
            return Err(anyhow!("{} is {}x{}, outside of 1..={} texels per side", name, width, height, max).into());
        }

        // WTF: 16-bit channels get squashed to 8 bits here; Rgba16Unorm
        // would need a device feature we don't ask for.
        let (raw, format, bpp) = match img.color() {
            ColorType::Rgb32F | ColorType::Rgba32F =>
                ( Raw::VecF32(img.into_rgba32f().into_raw())
                , wgpu::TextureFormat::Rgba32Float
                , 16),

            _ =>
                ( Raw::VecU8(img.into_rgba8().into_raw())
                , wgpu::TextureFormat::Rgba8UnormSrgb
                , 4),
        };

        let raw_bytes: &[u8] = match &raw {
            Raw::VecU8(v) => v,
            Raw::VecF32(v) => bytemuck::cast_slice(v),
        };

        let size = wgpu::Extent3d { width, height, depth_or_array_layers: 1 };

        let handle = self.device.create_texture(&wgpu::TextureDescriptor {
            label: Some(name),
            size,
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format,
            usage: wgpu::TextureUsages::COPY_DST | wgpu::TextureUsages::TEXTURE_BINDING,
            view_formats: &[],
        });

        self.queue.write_texture(
            wgpu::ImageCopyTexture {
                texture: &handle,
                mip_level: 0,
                origin: wgpu::Origin3d::ZERO,
                aspect: wgpu::TextureAspect::All,
            },
            raw_bytes,
            wgpu::ImageDataLayout {
                offset: 0,
                bytes_per_row: Some(bpp * width),
                rows_per_image: Some(height),
            },
            size,
        );

        // flush the staged write instead of waiting for the next frame's submit
        self.queue.submit(std::iter::empty());

        let view = handle.create_view(&wgpu::TextureViewDescriptor {
            label: Some(name),
            ..Default::default()
        });

        Ok(Texture {
            handle,
            view,
            size,
            format,
        })
    }
}

impl Driver for GpuDriver {
    type Resource = Texture;

    fn decode(&self, identity: &str) -> Result<Texture, DecodeError> {
        let bytes = self.source.read(identity)?;
        let img = image::load_from_memory(&bytes)?;
        self.upload(identity, img)
    }

    fn destroy(&self, texture: Texture) {
        log::trace!("destroying {}x{} texture", texture.size.width, texture.size.height);
        texture.handle.destroy();
    }
}
