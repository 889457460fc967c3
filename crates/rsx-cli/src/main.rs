//! Replays a recorded RSX FIFO command stream against a logging-only
//! backend, for offline inspection of draw batching and register traffic.

use std::cell::RefCell;
use std::path::PathBuf;

use clap::Parser;
use rsx::{
    Address, Backend, Environment, FirstCount, GuestMemory, NullSink, Primitive, QueryId,
    ReportSink, Rsx,
};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(about = "replay a recorded RSX FIFO command stream", version)]
struct Args {
    /// Flat binary memory image containing both the command stream and the
    /// DMA control block, as big-endian 32-bit words.
    image: PathBuf,

    /// Byte offset of the `{put, get}` control block inside the image.
    #[arg(long, default_value_t = 0)]
    control_base: u32,

    /// Byte offset to start fetching commands from.
    #[arg(long)]
    get: u32,

    /// Byte offset one past the last valid command word.
    #[arg(long)]
    put: u32,

    /// Stop after this many FIFO iterations even if not idle.
    #[arg(long, default_value_t = 1_000_000)]
    max_steps: u64,
}

struct ImageMemory {
    words: RefCell<Vec<u32>>,
}

impl ImageMemory {
    fn load(path: &PathBuf) -> std::io::Result<Self> {
        let bytes = std::fs::read(path)?;
        let words = bytes
            .chunks(4)
            .map(|chunk| {
                let mut word = [0u8; 4];
                word[..chunk.len()].copy_from_slice(chunk);
                u32::from_be_bytes(word)
            })
            .collect();
        Ok(Self { words: RefCell::new(words) })
    }
}

impl GuestMemory for ImageMemory {
    fn io_translate(&self, offset: u32) -> Option<u32> {
        Some(offset)
    }

    fn read32(&self, addr: Address) -> u32 {
        self.words.borrow().get((addr.value() / 4) as usize).copied().unwrap_or(0)
    }

    fn write32(&self, addr: Address, value: u32) {
        let idx = (addr.value() / 4) as usize;
        let mut words = self.words.borrow_mut();
        if idx >= words.len() {
            words.resize(idx + 1, 0);
        }
        words[idx] = value;
    }
}

/// Logs everything instead of rendering it.
struct LoggingBackend;

impl Backend for LoggingBackend {
    fn do_local_task(&mut self, idle: bool) {
        tracing::trace!(idle, "local task pulse");
    }

    fn begin_occlusion_query(&mut self, query: QueryId) {
        tracing::debug!(?query, "begin occlusion query");
    }

    fn end_occlusion_query(&mut self, query: QueryId) {
        tracing::debug!(?query, "end occlusion query");
    }

    fn check_occlusion_query_status(&mut self, _query: QueryId) -> bool {
        true
    }

    fn get_occlusion_query_result(&mut self, _query: QueryId) -> u32 {
        0
    }

    fn discard_occlusion_query(&mut self, query: QueryId) {
        tracing::debug!(?query, "discard occlusion query");
    }

    fn copy_render_targets_to_memory(&mut self) {
        tracing::debug!("copy render targets to memory");
    }

    fn copy_depth_stencil_buffer_to_memory(&mut self) {
        tracing::debug!("copy depth/stencil buffer to memory");
    }

    fn supports_multidraw(&self) -> bool {
        true
    }

    fn supports_native_ui(&self) -> bool {
        false
    }

    fn draw(&mut self, primitive: Primitive, ranges: &[FirstCount]) {
        tracing::info!(?primitive, ?ranges, "draw");
    }

    fn configure(&mut self, reg: u16, value: u32) {
        tracing::trace!(reg, value, "configure");
    }
}

struct LoggingReportSink;

impl ReportSink for LoggingReportSink {
    fn write_report(&mut self, addr: Address, value: u32, timestamp: u64) {
        tracing::info!(?addr, value, timestamp, "zcull report write");
    }
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let args = Args::parse();
    let mem = ImageMemory::load(&args.image)?;

    let control_base = Address(args.control_base);
    mem.write32(control_base, args.put);
    mem.write32(control_base.offset(4), args.get);

    let mut rsx = Rsx::new(control_base, args.get, Environment::default());
    let mut backend = LoggingBackend;
    let mut capture = NullSink;
    let mut reports = LoggingReportSink;

    let mut idle_streak = 0u32;
    for step in 0..args.max_steps {
        rsx.run_once(&mem, &mut backend, &mut capture, &mut reports)?;
        if rsx.interp.stats().fifo_is_idle {
            idle_streak += 1;
            if idle_streak >= 2 {
                tracing::info!(step, "fifo idle; stopping replay");
                break;
            }
        } else {
            idle_streak = 0;
        }
    }

    Ok(())
}
