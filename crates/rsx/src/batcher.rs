//! Deferred `BEGIN`/`END` collapsing. Replaying every draw call through the
//! backend immediately would destroy multidraw throughput; this coalesces
//! compatible, back-to-back draws into a single backend call while never
//! merging ranges in a way that would corrupt a strip/fan primitive.

use crate::backend::Backend;
use crate::registers::{reg, FirstCount, Primitive, RegisterEffect, RegisterFile};

#[derive(Default)]
pub struct DrawBatcher {
    deferred_primitive_type: Option<Primitive>,
    deferred_begin_end: i32,
    has_deferred_call: bool,
    deferred_stack: Vec<FirstCount>,
    consumed: usize,
}

impl DrawBatcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_live(&self) -> bool {
        self.deferred_primitive_type.is_some()
    }

    /// Feeds one `(reg, value)` write through the batcher. `regs.decode` is
    /// always invoked; whether `backend` observes the write depends on the
    /// batching decision.
    pub fn process(&mut self, reg: u16, value: u32, regs: &mut RegisterFile, backend: &mut impl Backend) {
        let is_noop = regs.test(reg, value);
        regs.decode(reg, value);

        match reg {
            reg::SET_BEGIN_END => self.handle_begin_end(value, regs, backend),
            reg::DRAW_ARRAYS | reg::DRAW_INDEX_ARRAY => self.absorb_new_ranges(regs, backend),
            reg::INVALIDATE_VERTEX_FILE => {}
            _ => match regs.classify(reg) {
                RegisterEffect::Configure if self.is_live() && is_noop => {
                    // suppressed: no-op write to a whitelisted register during a live batch
                }
                _ => {
                    if self.is_live() {
                        self.flush(regs, backend);
                    }
                    backend.configure(reg, value);
                }
            },
        }
    }

    fn handle_begin_end(&mut self, value: u32, regs: &mut RegisterFile, backend: &mut impl Backend) {
        if value != 0 {
            let requested = regs.clause.primitive;
            let collapses = backend.supports_multidraw()
                && self.deferred_primitive_type.is_some()
                && self.deferred_primitive_type == requested;

            if collapses {
                self.deferred_begin_end += 1;
            } else {
                if self.deferred_primitive_type.is_some() {
                    self.flush(regs, backend);
                }
                self.deferred_primitive_type = requested;
                self.deferred_begin_end = 1;
            }
        } else {
            self.deferred_begin_end -= 1;
            self.has_deferred_call = true;

            if !backend.supports_multidraw() {
                self.flush(regs, backend);
                self.close_batch(regs);
            }
        }
    }

    fn absorb_new_ranges(&mut self, regs: &mut RegisterFile, backend: &mut impl Backend) {
        let disjoint = regs.clause.is_disjoint_primitive();
        let total = regs.clause.first_count_commands.len();

        while self.consumed < total {
            let fc = regs.clause.first_count_commands[self.consumed];
            self.consumed += 1;

            if disjoint {
                self.deferred_stack.push(fc);
                continue;
            }

            match self.deferred_stack.last().copied() {
                Some(last) if last.first + last.count == fc.first => {
                    self.deferred_stack.last_mut().expect("checked Some above").count += fc.count;
                }
                Some(last) => {
                    tracing::warn!(
                        prev_first = last.first,
                        prev_count = last.count,
                        next_first = fc.first,
                        "non-continuous vertex range on a non-disjoint primitive; splitting batch"
                    );
                    self.flush(regs, backend);
                    self.deferred_stack.push(fc);
                }
                None => self.deferred_stack.push(fc),
            }
        }
    }

    fn flush(&mut self, regs: &mut RegisterFile, backend: &mut impl Backend) {
        if self.deferred_stack.is_empty() {
            return;
        }

        let Some(primitive) = self.deferred_primitive_type else {
            return;
        };

        backend.draw(primitive, &self.deferred_stack);
        self.deferred_stack.clear();
        self.has_deferred_call = false;

        if self.deferred_begin_end <= 0 {
            self.close_batch(regs);
        }
    }

    fn close_batch(&mut self, regs: &mut RegisterFile) {
        self.deferred_primitive_type = None;
        self.consumed = 0;
        self.deferred_begin_end = 0;
        regs.clause.first_count_commands.clear();
    }

    /// Called by the interpreter at the end of a command chain: emits any
    /// draw still pending so nothing is lost across a yield.
    pub fn flush_pending(&mut self, regs: &mut RegisterFile, backend: &mut impl Backend) {
        if self.has_deferred_call {
            self.flush(regs, backend);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;

    #[derive(Default)]
    struct RecordingBackend {
        draws: RefCell<Vec<(Primitive, Vec<FirstCount>)>>,
        multidraw: bool,
    }

    impl Backend for RecordingBackend {
        fn do_local_task(&mut self, _idle: bool) {}
        fn begin_occlusion_query(&mut self, _query: crate::backend::QueryId) {}
        fn end_occlusion_query(&mut self, _query: crate::backend::QueryId) {}
        fn check_occlusion_query_status(&mut self, _query: crate::backend::QueryId) -> bool {
            true
        }
        fn get_occlusion_query_result(&mut self, _query: crate::backend::QueryId) -> u32 {
            0
        }
        fn discard_occlusion_query(&mut self, _query: crate::backend::QueryId) {}
        fn copy_render_targets_to_memory(&mut self) {}
        fn copy_depth_stencil_buffer_to_memory(&mut self) {}
        fn supports_multidraw(&self) -> bool {
            self.multidraw
        }
        fn supports_native_ui(&self) -> bool {
            false
        }
        fn draw(&mut self, primitive: Primitive, ranges: &[FirstCount]) {
            self.draws.borrow_mut().push((primitive, ranges.to_vec()));
        }
        fn configure(&mut self, _reg: u16, _value: u32) {}
    }

    fn begin_end(value: u32) -> (u16, u32) {
        (reg::SET_BEGIN_END, value)
    }

    fn draw_arrays(first: u32, count: u32) -> (u16, u32) {
        (reg::DRAW_ARRAYS, ((count - 1) << 24) | first)
    }

    #[test]
    fn adjacent_strip_ranges_merge_into_one_draw() {
        let mut regs = RegisterFile::new();
        let mut backend = RecordingBackend { multidraw: true, ..Default::default() };
        let mut batcher = DrawBatcher::new();

        // triangle_strip == 6
        let (r, v) = begin_end(6);
        batcher.process(r, v, &mut regs, &mut backend);
        let (r, v) = draw_arrays(0, 3);
        batcher.process(r, v, &mut regs, &mut backend);
        let (r, v) = begin_end(0);
        batcher.process(r, v, &mut regs, &mut backend);

        let (r, v) = begin_end(6);
        batcher.process(r, v, &mut regs, &mut backend);
        let (r, v) = draw_arrays(3, 3);
        batcher.process(r, v, &mut regs, &mut backend);
        let (r, v) = begin_end(0);
        batcher.process(r, v, &mut regs, &mut backend);

        batcher.flush_pending(&mut regs, &mut backend);

        let draws = backend.draws.borrow();
        assert_eq!(draws.len(), 1);
        assert_eq!(draws[0].1, vec![FirstCount { first: 0, count: 6 }]);
    }

    #[test]
    fn non_adjacent_strip_ranges_split() {
        let mut regs = RegisterFile::new();
        let mut backend = RecordingBackend { multidraw: true, ..Default::default() };
        let mut batcher = DrawBatcher::new();

        let (r, v) = begin_end(6);
        batcher.process(r, v, &mut regs, &mut backend);
        let (r, v) = draw_arrays(0, 3);
        batcher.process(r, v, &mut regs, &mut backend);
        let (r, v) = draw_arrays(10, 3);
        batcher.process(r, v, &mut regs, &mut backend);
        let (r, v) = begin_end(0);
        batcher.process(r, v, &mut regs, &mut backend);

        batcher.flush_pending(&mut regs, &mut backend);

        assert_eq!(backend.draws.borrow().len(), 2);
    }

    #[test]
    fn noop_whitelisted_write_does_not_flush() {
        let mut regs = RegisterFile::new();
        let mut backend = RecordingBackend { multidraw: true, ..Default::default() };
        let mut batcher = DrawBatcher::new();

        let (r, v) = begin_end(5); // triangles, disjoint
        batcher.process(r, v, &mut regs, &mut backend);
        let (r, v) = draw_arrays(0, 3);
        batcher.process(r, v, &mut regs, &mut backend);

        batcher.process(reg::SURFACE_FORMAT, 0, &mut regs, &mut backend);
        batcher.process(reg::SURFACE_FORMAT, 0, &mut regs, &mut backend);

        assert!(backend.draws.borrow().is_empty());
    }
}
