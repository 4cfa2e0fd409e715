//! Simulated render loop driving the uniform buffer pool.
//!
//! ```sh
//! cargo run --example frame_loop --release
//! cargo run --example frame_loop --release -- --frames 600 --draws 64 --strategy deferred-cpu-copy
//! ```
//!
//! Falls back to host-memory buffers when no GPU adapter is available.

use std::sync::Arc;
use std::time::Instant;

use bytemuck::{Pod, Zeroable};
use ubpool::{
    BufferDevice, HostDevice, PackedUniforms, PoolConfig, ShaderStage, UniformBufferLayout,
    UniformBufferPool, UniformContents, UploadStrategy, UsageMode, WgpuDevice,
};

#[repr(C)]
#[derive(Clone, Copy, Pod, Zeroable)]
struct DrawParams {
    transform: [[f32; 4]; 4],
    tint: [f32; 4],
}

#[repr(C)]
#[derive(Clone, Copy, Pod, Zeroable)]
struct ViewParams {
    view_proj: [[f32; 4]; 4],
    time: f32,
    _pad: [f32; 3],
}

struct Args {
    frames: u64,
    draws: usize,
    safe_frames: usize,
    strategy: UploadStrategy,
    host: bool,
}

fn parse_args() -> Args {
    let mut args = Args {
        frames: 240,
        draws: 32,
        safe_frames: ubpool::config::DEFAULT_SAFE_FRAMES,
        strategy: UploadStrategy::from_env().unwrap_or_default(),
        host: false,
    };

    let raw: Vec<String> = std::env::args().skip(1).collect();
    let mut i = 0;
    while i < raw.len() {
        match raw[i].as_str() {
            "--frames" => {
                i += 1;
                args.frames = raw[i].parse().expect("invalid --frames");
            }
            "--draws" => {
                i += 1;
                args.draws = raw[i].parse().expect("invalid --draws");
            }
            "--safe-frames" => {
                i += 1;
                args.safe_frames = raw[i].parse().expect("invalid --safe-frames");
            }
            "--strategy" => {
                i += 1;
                args.strategy = raw[i].parse().expect("invalid --strategy");
            }
            "--host" => args.host = true,
            "-h" | "--help" => {
                eprintln!(
                    "ubpool frame_loop: simulated uniform buffer traffic

Usage: cargo run --example frame_loop --release -- [options]

Options:
  --frames <n>         Frames to simulate (default: 240)
  --draws <n>          Draw calls per frame (default: 32)
  --safe-frames <n>    Frames before a pooled buffer is reused (default: 5)
  --strategy <s>       immediate-gpu-copy | deferred-cpu-copy
  --host               Use host-memory buffers even if a GPU is present
  -h, --help           Show this help"
                );
                std::process::exit(0);
            }
            other => {
                eprintln!("Unknown argument: {other}");
                std::process::exit(1);
            }
        }
        i += 1;
    }
    args
}

fn run<D: BufferDevice>(device: D, cli: &Args) -> ubpool::Result<()> {
    let config = PoolConfig::new(cli.safe_frames, cli.strategy)?;
    let mut uniforms = UniformBufferPool::new(device, config)?;

    let draw_layout = Arc::new(UniformBufferLayout::for_type::<DrawParams>("draw"));
    let view_layout = Arc::new(UniformBufferLayout::for_type::<ViewParams>("view"));
    let mut packed = PackedUniforms::new();

    let mut view = ViewParams::zeroed();
    let persistent_view = uniforms.create_uniform_buffer(
        &view_layout,
        UniformContents::from_pod(&view),
        UsageMode::MultiFrame,
    )?;

    let t0 = Instant::now();
    for frame in 0..cli.frames {
        uniforms.begin_frame();
        view.time = frame as f32 / 60.0;

        for draw in 0..cli.draws {
            let mut params = DrawParams::zeroed();
            params.transform[3][0] = draw as f32;
            params.tint = [1.0, draw as f32 / cli.draws as f32, view.time.fract(), 1.0];

            let ub = uniforms.create_uniform_buffer(
                &draw_layout,
                UniformContents::from_pod(&params),
                UsageMode::SingleFrame,
            )?;
            if cli.strategy == UploadStrategy::DeferredCpuCopy {
                let len = draw_layout.constant_buffer_size as usize;
                packed.stage(ShaderStage::Vertex, 0, &ub, 0..len)?;
                packed.stage(ShaderStage::Fragment, 0, &ub, 64..len)?;
                packed.commit(ShaderStage::Vertex, &mut uniforms)?;
                packed.commit(ShaderStage::Fragment, &mut uniforms)?;
            }
        }
    }
    let elapsed = t0.elapsed().as_secs_f64();

    let stats = uniforms.pool().stats();
    println!(
        "{} frames x {} draws in {elapsed:.3}s ({})",
        cli.frames, cli.draws, cli.strategy
    );
    println!(
        "  pool: {} buffers, {} bytes, {} hits, {} misses, {} in flight",
        uniforms.pool().len(),
        stats.bytes_allocated,
        stats.hits,
        stats.misses,
        uniforms.recycler().in_flight_total()
    );
    drop(persistent_view);
    uniforms.shutdown();
    Ok(())
}

#[tokio::main]
async fn main() -> ubpool::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "ubpool=info".parse().unwrap()),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = parse_args();

    if cli.host {
        return run(HostDevice::new(), &cli);
    }
    match ubpool::init_gpu().await {
        Ok(gpu) => run(WgpuDevice::from_context(&gpu), &cli),
        Err(e) => {
            eprintln!("No GPU available ({e}), using host buffers");
            run(HostDevice::new(), &cli)
        }
    }
}
