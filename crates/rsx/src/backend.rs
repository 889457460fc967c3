//! The rendering backend contract: everything the interpreter calls into
//! but never implements itself (texture upload, shader compilation, surface
//! management live on the other side of this trait).

use crate::registers::{FirstCount, Primitive};

/// Opaque handle to a ZCULL occlusion query owned by the backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct QueryId(pub u32);

pub trait Backend {
    fn on_init_thread(&mut self) {}
    fn on_exit(&mut self) {}
    fn on_task(&mut self) {}

    /// Per-loop pulse; `idle` is true when `put == get`.
    fn do_local_task(&mut self, idle: bool);

    fn begin_occlusion_query(&mut self, query: QueryId);
    fn end_occlusion_query(&mut self, query: QueryId);
    fn check_occlusion_query_status(&mut self, query: QueryId) -> bool;
    fn get_occlusion_query_result(&mut self, query: QueryId) -> u32;
    fn discard_occlusion_query(&mut self, query: QueryId);

    fn copy_render_targets_to_memory(&mut self);
    fn copy_depth_stencil_buffer_to_memory(&mut self);

    fn supports_multidraw(&self) -> bool;
    fn supports_native_ui(&self) -> bool;

    /// One coalesced draw: a single `BEGIN`/`END` pair wrapping every range.
    fn draw(&mut self, primitive: Primitive, ranges: &[FirstCount]);

    /// A register write the batcher decided not to suppress.
    fn configure(&mut self, reg: u16, value: u32);
}
