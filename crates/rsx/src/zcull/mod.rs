//! Occlusion query ("ZCULL") lifecycle: a producer/consumer ring of queries
//! with time-to-service deadlines, forward chaining of un-consumed writers,
//! tag-scoped statistics buckets, and read barriers.

use std::collections::VecDeque;

use rustc_hash::FxHashMap;

use crate::address::Address;
use crate::backend::{Backend, QueryId};

pub const QUERY_POOL_SIZE: usize = 128;
pub const MIN_ZCULL_CYCLES_DELAY: u64 = 500;
pub const MAX_ZCULL_CYCLES_DELAY: u64 = 1_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ReportType {
    ZpassPixelCount,
    ZcullStats,
    ZcullStats1,
    ZcullStats2,
    ZcullStats3,
}

/// Somewhere in guest memory a resolved report value is written.
pub trait ReportSink {
    fn write_report(&mut self, addr: Address, value: u32, timestamp: u64);
}

#[derive(Debug, Default, Clone, Copy)]
struct Query {
    active: bool,
    pending: bool,
    owned: bool,
    num_draws: u32,
}

#[derive(Debug, Clone, Copy)]
struct PendingWrite {
    sink: Address,
    counter_tag: u32,
    ty: ReportType,
    due_tsc: u64,
    query: Option<usize>,
    /// Some(seq) when an earlier stub has been retroactively claimed by a
    /// later `read_report` call; only a writer with `forwarder == None`
    /// performs the actual guest-memory write.
    forwarder: Option<u64>,
}

pub struct ZcullController {
    pool: Vec<Query>,
    active: Option<usize>,
    pending: VecDeque<PendingWrite>,
    next_seq: u64,
    statistics_map: FxHashMap<u32, u32>,
    statistics_tag_id: u32,
    tsc: u64,
    cycles_delay: u64,
    enabled: bool,
    rendering_enabled: bool,
    testing_enabled: bool,
    surface_bound: bool,
}

impl ZcullController {
    pub fn new() -> Self {
        Self {
            pool: vec![Query::default(); QUERY_POOL_SIZE],
            active: None,
            pending: VecDeque::new(),
            next_seq: 0,
            statistics_map: FxHashMap::default(),
            statistics_tag_id: 0,
            tsc: 0,
            cycles_delay: MIN_ZCULL_CYCLES_DELAY,
            enabled: false,
            rendering_enabled: true,
            testing_enabled: false,
            surface_bound: false,
        }
    }

    /// `check_zcull_status`: testing is active only while rendering is
    /// enabled, at least one of pixel/stats testing is requested, and the
    /// bound ZCULL region overlaps the current zeta surface.
    pub fn notify_rendering_enabled(&mut self, enabled: bool, backend: &mut impl Backend) {
        self.rendering_enabled = enabled;
        self.recompute(backend);
    }

    pub fn notify_testing_enabled(&mut self, enabled: bool, backend: &mut impl Backend) {
        self.testing_enabled = enabled;
        self.recompute(backend);
    }

    pub fn notify_surface_changed(&mut self, overlaps_zeta: bool, backend: &mut impl Backend) {
        self.surface_bound = overlaps_zeta;
        self.recompute(backend);
    }

    fn recompute(&mut self, backend: &mut impl Backend) {
        let should = self.rendering_enabled && self.testing_enabled && self.surface_bound;
        self.set_enabled(should);
        self.set_active(should, backend);
    }

    pub fn set_enabled(&mut self, enabled: bool) {
        self.enabled = enabled;
    }

    /// At most one active query exists at any time.
    pub fn set_active(&mut self, state: bool, backend: &mut impl Backend) {
        if !self.enabled {
            return;
        }

        if state {
            if self.active.is_none() {
                let q = self.allocate_new_query(backend);
                backend.begin_occlusion_query(QueryId(q as u32));
                self.pool[q].active = true;
                self.active = Some(q);
            }
        } else if let Some(q) = self.active.take() {
            if self.pool[q].num_draws > 0 {
                backend.end_occlusion_query(QueryId(q as u32));
                self.pool[q].active = false;
                self.pool[q].pending = true;
                self.push_pending(Address(0), self.statistics_tag_id, ReportType::ZpassPixelCount, None, Some(q));
            } else {
                self.pool[q].active = false;
            }
        }
    }

    pub fn on_draw(&mut self) {
        if let Some(q) = self.active {
            self.pool[q].num_draws += 1;
        }
    }

    fn allocate_new_query(&mut self, backend: &mut impl Backend) -> usize {
        if let Some(idx) = self.free_slot() {
            return idx;
        }

        self.tsc += MAX_ZCULL_CYCLES_DELAY;
        self.drain_update_only(backend);

        if let Some(idx) = self.free_slot() {
            return idx;
        }

        tracing::error!(pool_size = QUERY_POOL_SIZE, "zcull query pool exhausted; discarding pending writes");
        self.discard_all_pending(backend);
        self.statistics_map.insert(self.statistics_tag_id, 1);
        0
    }

    fn free_slot(&self) -> Option<usize> {
        self.pool.iter().position(|q| !q.active && !q.pending)
    }

    fn discard_all_pending(&mut self, backend: &mut impl Backend) {
        for pw in self.pending.drain(..) {
            if let Some(q) = pw.query {
                backend.discard_occlusion_query(QueryId(q as u32));
                self.pool[q].pending = false;
                self.pool[q].active = false;
            }
        }
    }

    fn push_pending(
        &mut self,
        sink: Address,
        counter_tag: u32,
        ty: ReportType,
        due_tsc: Option<u64>,
        query: Option<usize>,
    ) -> u64 {
        let seq = self.next_seq;
        self.next_seq += 1;
        let due = due_tsc.unwrap_or(self.tsc + self.cycles_delay);
        self.pending.push_back(PendingWrite {
            sink,
            counter_tag,
            ty,
            due_tsc: due,
            query,
            forwarder: None,
        });
        seq
    }

    /// Ends the active query (if any), chains a fresh one so counting
    /// continues without a gap, and enqueues a pending write. Any trailing
    /// unclaimed stubs left by an earlier `set_active(false)` without a
    /// guest read are retroactively claimed into this same report.
    pub fn read_report(&mut self, sink: Address, ty: ReportType, backend: &mut impl Backend) {
        let resolved_query = if let Some(q) = self.active.take() {
            backend.end_occlusion_query(QueryId(q as u32));
            self.pool[q].active = false;
            self.pool[q].pending = true;
            Some(q)
        } else {
            None
        };

        let due = self.tsc + self.cycles_delay;
        let new_seq = self.push_pending(sink, self.statistics_tag_id, ty, Some(due), resolved_query);

        for writer in self.pending.iter_mut().rev().skip(1) {
            if !writer.sink.is_null() {
                break;
            }
            writer.sink = sink;
            writer.counter_tag = self.statistics_tag_id;
            writer.due_tsc = due;
            writer.ty = ty;
            writer.forwarder = Some(new_seq);
        }
        if let Some(q) = resolved_query {
            self.pool[q].owned = true;
        }

        let nq = self.allocate_new_query(backend);
        backend.begin_occlusion_query(QueryId(nq as u32));
        self.pool[nq].active = true;
        self.active = Some(nq);
    }

    fn resolve_and_emit(&mut self, pw: PendingWrite, backend: &mut impl Backend, out: &mut impl ReportSink) {
        let Some(q) = pw.query else { return };

        let bucket = self.statistics_map.entry(pw.counter_tag).or_insert(0);
        if *bucket == 0 && self.pool[q].num_draws > 0 {
            *bucket = backend.get_occlusion_query_result(QueryId(q as u32));
        }
        let value = *bucket;

        self.pool[q].pending = false;
        backend.discard_occlusion_query(QueryId(q as u32));

        if pw.forwarder.is_none() && !pw.sink.is_null() {
            out.write_report(pw.sink, normalize(pw.ty, value != 0), pw.due_tsc);
        }
    }

    /// Drains all *claimed* pending writes in arrival order; any trailing
    /// unclaimed stub is preserved for a future `read_report` to claim.
    pub fn sync(&mut self, backend: &mut impl Backend, out: &mut impl ReportSink) {
        let mut preserved = VecDeque::new();
        while let Some(pw) = self.pending.pop_front() {
            if pw.sink.is_null() {
                preserved.push_back(pw);
                continue;
            }
            self.resolve_and_emit(pw, backend, out);
        }
        self.pending = preserved;
        self.prune_statistics();
        self.cycles_delay = MIN_ZCULL_CYCLES_DELAY;
    }

    /// Called once per interpreter iteration; retires writers whose
    /// deadline has passed without blocking on ones that aren't ready.
    pub fn update(&mut self, backend: &mut impl Backend, out: &mut impl ReportSink) {
        self.tsc += 1;
        let mut last_tag: Option<u32> = None;

        loop {
            let Some(pw) = self.pending.front() else { break };
            if pw.sink.is_null() {
                break;
            }

            if let Some(prev) = last_tag {
                if pw.counter_tag != prev && prev != self.statistics_tag_id {
                    self.statistics_map.remove(&prev);
                }
            }
            last_tag = Some(pw.counter_tag);

            if pw.due_tsc > self.tsc {
                let ready = pw.query.is_some_and(|q| backend.check_occlusion_query_status(QueryId(q as u32)));
                if !ready {
                    break;
                }
            }

            let pw = self.pending.pop_front().expect("front checked above");
            self.resolve_and_emit(pw, backend, out);
        }
    }

    /// `drain_update_only`: advance the logical clock without ever touching
    /// guest memory, used while scanning for a free pool slot.
    fn drain_update_only(&mut self, backend: &mut impl Backend) {
        struct NullSink;
        impl ReportSink for NullSink {
            fn write_report(&mut self, _addr: Address, _value: u32, _timestamp: u64) {}
        }
        self.update(backend, &mut NullSink);
    }

    pub fn read_barrier(&mut self, addr: Address, range: u32, backend: &mut impl Backend, out: &mut impl ReportSink) {
        let end = addr.value().wrapping_add(range);
        let hits = self
            .pending
            .iter()
            .any(|pw| !pw.sink.is_null() && pw.sink.value() >= addr.value() && pw.sink.value() < end);
        if hits {
            self.sync(backend, out);
        }
    }

    pub fn clear(&mut self) {
        self.statistics_tag_id += 1;
        self.statistics_map.insert(self.statistics_tag_id, 0);
        self.pending.retain(|pw| !pw.sink.is_null());
    }

    pub fn clear_zcull_stats(&mut self, disable_zcull_queries: bool) {
        if !disable_zcull_queries {
            self.clear();
        }
    }

    pub fn get_zcull_stats(&mut self, ty: ReportType, sink: Address, backend: &mut impl Backend) {
        self.read_report(sink, ty, backend);
    }

    fn prune_statistics(&mut self) {
        let keep = self.statistics_tag_id;
        self.statistics_map.retain(|&tag, _| tag == keep);
    }
}

impl Default for ZcullController {
    fn default() -> Self {
        Self::new()
    }
}

fn normalize(ty: ReportType, passed: bool) -> u32 {
    match ty {
        ReportType::ZpassPixelCount => {
            if passed {
                0xFFFF
            } else {
                0
            }
        }
        ReportType::ZcullStats3 => {
            if passed {
                0
            } else {
                0xFFFF
            }
        }
        ReportType::ZcullStats | ReportType::ZcullStats1 | ReportType::ZcullStats2 => 0xFFFF_FFFF,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;

    #[derive(Default)]
    struct StubBackend {
        results: RefCell<FxHashMap<u32, u32>>,
    }

    impl Backend for StubBackend {
        fn do_local_task(&mut self, _idle: bool) {}
        fn begin_occlusion_query(&mut self, _query: QueryId) {}
        fn end_occlusion_query(&mut self, _query: QueryId) {}
        fn check_occlusion_query_status(&mut self, _query: QueryId) -> bool {
            true
        }
        fn get_occlusion_query_result(&mut self, query: QueryId) -> u32 {
            self.results.borrow().get(&query.0).copied().unwrap_or(1)
        }
        fn discard_occlusion_query(&mut self, _query: QueryId) {}
        fn copy_render_targets_to_memory(&mut self) {}
        fn copy_depth_stencil_buffer_to_memory(&mut self) {}
        fn supports_multidraw(&self) -> bool {
            true
        }
        fn supports_native_ui(&self) -> bool {
            false
        }
        fn draw(&mut self, _primitive: crate::registers::Primitive, _ranges: &[crate::registers::FirstCount]) {}
        fn configure(&mut self, _reg: u16, _value: u32) {}
    }

    #[derive(Default)]
    struct RecordingSink {
        writes: Vec<(Address, u32)>,
    }

    impl ReportSink for RecordingSink {
        fn write_report(&mut self, addr: Address, value: u32, _timestamp: u64) {
            self.writes.push((addr, value));
        }
    }

    #[test]
    fn single_report_round_trips() {
        let mut backend = StubBackend::default();
        let mut sink = RecordingSink::default();
        let mut zcull = ZcullController::new();
        zcull.set_enabled(true);
        zcull.set_active(true, &mut backend);
        zcull.on_draw();

        zcull.read_report(Address(0x1000), ReportType::ZpassPixelCount, &mut backend);
        zcull.sync(&mut backend, &mut sink);

        assert_eq!(sink.writes.len(), 1);
        assert_eq!(sink.writes[0].0, Address(0x1000));
        assert_eq!(sink.writes[0].1, 0xFFFF);
    }

    #[test]
    fn back_to_back_reports_chain_without_losing_order() {
        let mut backend = StubBackend::default();
        let mut sink = RecordingSink::default();
        let mut zcull = ZcullController::new();
        zcull.set_enabled(true);
        zcull.set_active(true, &mut backend);
        zcull.on_draw();

        zcull.read_report(Address(0x100), ReportType::ZpassPixelCount, &mut backend);
        zcull.read_report(Address(0x200), ReportType::ZpassPixelCount, &mut backend);
        zcull.sync(&mut backend, &mut sink);

        assert_eq!(sink.writes.len(), 2);
        assert_eq!(sink.writes[0].0, Address(0x100));
        assert_eq!(sink.writes[1].0, Address(0x200));
    }

    #[test]
    fn read_barrier_flushes_matching_sink() {
        let mut backend = StubBackend::default();
        let mut sink = RecordingSink::default();
        let mut zcull = ZcullController::new();
        zcull.set_enabled(true);
        zcull.set_active(true, &mut backend);
        zcull.on_draw();
        zcull.read_report(Address(0x400), ReportType::ZpassPixelCount, &mut backend);

        zcull.read_barrier(Address(0x400), 4, &mut backend, &mut sink);
        assert_eq!(sink.writes.len(), 1);
    }
}
