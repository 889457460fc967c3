//! Emulated front-end of a fixed-function/programmable GPU command
//! processor: decodes a FIFO command stream from guest memory, tracks
//! method register and vertex-layout state, batches draw calls, and drives
//! occlusion queries, handing everything backend-visible off to a
//! [`Backend`] implementation supplied by the embedder.

pub mod address;
pub mod backend;
pub mod batcher;
pub mod capture;
pub mod config;
pub mod interp;
pub mod memory;
pub mod registers;
pub mod tiled;
pub mod vblank;
pub mod vertex;
pub mod zcull;

pub use address::Address;
pub use backend::{Backend, QueryId};
pub use batcher::DrawBatcher;
pub use capture::{DrawStateSnapshot, FrameCaptureSink, NullSink, RecordingSink};
pub use config::Environment;
pub use interp::{DmaControlBlock, InterpError, Interpreter, InterpreterStats, PauseControl};
pub use memory::{GuestMemory, MemoryBridge, MemoryContext, TranslateError};
pub use registers::{DrawClause, DrawCommand, FirstCount, Primitive, RegisterFile};
pub use tiled::{CompressionError, CompressionMode, TiledRegion};
pub use vblank::{VblankDriver, VblankSink};
pub use vertex::{VertexDataType, VertexInputLayout, VertexLayoutError};
pub use zcull::{ReportSink, ReportType, ZcullController};

/// Ties the interpreter, its configuration and its companion vblank thread
/// together into the object an embedder constructs once per guest context.
pub struct Rsx {
    pub interp: Interpreter,
    pub env: Environment,
    vblank: Option<VblankDriver>,
}

impl Rsx {
    pub fn new(control_base: Address, initial_get: u32, env: Environment) -> Self {
        Self {
            interp: Interpreter::new(control_base, initial_get),
            env,
            vblank: None,
        }
    }

    /// Start the vblank companion thread. A no-op if already started.
    pub fn start_vblank<S: VblankSink>(&mut self, sink: S) {
        if self.vblank.is_none() {
            self.vblank = Some(VblankDriver::start(sink));
        }
    }

    pub fn vblank_count(&self) -> Option<u64> {
        self.vblank.as_ref().map(VblankDriver::vblank_count)
    }

    /// Run one FIFO iteration, pausing the vblank thread for its duration so
    /// neither side observes the other mid-update.
    pub fn run_once<M, B, C, R>(
        &mut self,
        mem: &M,
        backend: &mut B,
        capture: &mut C,
        reports: &mut R,
    ) -> Result<(), InterpError>
    where
        M: GuestMemory,
        B: Backend,
        C: FrameCaptureSink,
        R: ReportSink,
    {
        if let Some(vblank) = &self.vblank {
            vblank.pause();
            let result = self.interp.run_once(mem, backend, capture, reports);
            vblank.unpause();
            result
        } else {
            self.interp.run_once(mem, backend, capture, reports)
        }
    }

    pub fn shutdown(mut self) {
        if let Some(vblank) = self.vblank.take() {
            vblank.shutdown();
        }
    }
}
