
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;

use tex_stream::render::cache::{Loader, LoaderConfig, ProxyRegistry, ResolveOptions};
use tex_stream::render::core::Core;
use tex_stream::render::driver::{self, CpuDriver, Driver};
use tex_stream::{Proxy, ProxyEvent};


/// Streams images through the texture cache for a number of simulated frames.
#[derive(Debug, Parser)]
#[command(version, about)]
struct Args {
    /// Decode into host memory instead of uploading to a GPU
    #[arg(long)]
    cpu: bool,

    /// Directory relative identities are looked up in
    #[arg(long, default_value = driver::DEFAULT_ROOT)]
    root: PathBuf,

    /// Evict resources that went untouched for this long
    #[arg(long, default_value_t = 5000)]
    idle_ms: u64,

    /// Pause between two iterations of the loader
    #[arg(long, default_value_t = 5)]
    throttle_ms: u64,

    /// Number of frames to simulate
    #[arg(long, default_value_t = 600)]
    frames: u32,

    /// Length of one frame
    #[arg(long, default_value_t = 16)]
    frame_ms: u64,

    /// Touch every proxy during the first N frames only (defaults to all of them)
    #[arg(long)]
    touch_frames: Option<u32>,

    /// Exempt everything from idle eviction
    #[arg(long)]
    persistent: bool,

    /// Paths or URLs to stream
    #[arg(required = true)]
    identities: Vec<String>,
}


fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::parse();
    let config = LoaderConfig {
        idle_threshold: Duration::from_millis(args.idle_ms),
        throttle: Duration::from_millis(args.throttle_ms),
        ..LoaderConfig::default()
    };

    if args.cpu {
        let driver = CpuDriver::new(&args.root)?;
        let registry = ProxyRegistry::new(Loader::new(driver, config)?);
        simulate(&registry, &args);
        registry.loader().shutdown();
    } else {
        let core = Core::block_on_init(&args.root, config)?;
        simulate(&core.textures, &args);
    }

    Ok(())
}


fn simulate<D: Driver>(registry: &ProxyRegistry<D>, args: &Args) {
    registry.loader().events().listen(|event: &ProxyEvent| {
        log::info!("{:?}: {}", event.kind, event.identity);
        Ok(())
    });

    let options = ResolveOptions {
        persistent: args.persistent,
        ..ResolveOptions::default()
    };

    let proxies: Vec<Arc<Proxy<D>>> = args.identities
        .iter()
        .map(|identity| registry.resolve_with(identity, options))
        .collect();

    let touch_frames = args.touch_frames.unwrap_or(args.frames);
    let frame = Duration::from_millis(args.frame_ms);

    for index in 0..args.frames {
        if index < touch_frames {
            for proxy in &proxies {
                // draw whatever is resident; the rest shows up on a later frame
                let _ = proxy.fetch();
            }
        }
        std::thread::sleep(frame);
    }

    for proxy in &proxies {
        println!("{:<48} {:?}", proxy.identity(), proxy.state());
    }
}
