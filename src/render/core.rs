
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::anyhow;

use crate::render::cache::{Loader, LoaderConfig, ProxyRegistry};
use crate::render::driver::GpuDriver;


/// Headless rendering context: a device, its queue, and the texture
/// streaming cache that uploads into them.
pub struct Core {
    pub device: Arc<wgpu::Device>,
    pub queue: Arc<wgpu::Queue>,
    pub adapter_info: wgpu::AdapterInfo,
    pub textures: ProxyRegistry<GpuDriver>,
}


impl Core {

    pub async fn init(root: impl Into<PathBuf>, config: LoaderConfig) -> anyhow::Result<Self> {

        let instance = wgpu::Instance::new(wgpu::InstanceDescriptor::default());

        let adapter = instance.request_adapter(
            &wgpu::RequestAdapterOptions {
                power_preference: wgpu::PowerPreference::default(),
                compatible_surface: None,
                force_fallback_adapter: false,
            },
        )
        .await
        .ok_or_else(|| anyhow!("no graphics adapter available"))?;

        let adapter_info = adapter.get_info();
        log::info!("using adapter {} ({:?})", adapter_info.name, adapter_info.backend);

        let (device, queue) = adapter.request_device(
            &Default::default(),
            None, // trace_path
        )
        .await?;

        let device = Arc::new(device);
        let queue = Arc::new(queue);

        let driver = GpuDriver::new(device.clone(), queue.clone(), root)?;
        let textures = ProxyRegistry::new(Loader::new(driver, config)?);

        Ok(Self {
            device,
            queue,
            adapter_info,
            textures,
        })
    }

    pub fn block_on_init(root: impl Into<PathBuf>, config: LoaderConfig) -> anyhow::Result<Self> {
        futures::executor::block_on(Self::init(root, config))
    }
}


impl Drop for Core {
    fn drop(&mut self) {
        // the worker holds no strong handle, but don't leave it sleeping on a dead device
        self.textures.loader().shutdown();
    }
}
