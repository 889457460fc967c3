//! The FIFO command processor: jump/call/return control flow inside guest
//! memory, fault recovery, and the dispatch loop that feeds the batcher.

pub mod word;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use easyerr::Error;

use crate::address::Address;
use crate::backend::Backend;
use crate::batcher::DrawBatcher;
use crate::capture::FrameCaptureSink;
use crate::memory::{GuestMemory, MemoryBridge, MemoryContext, TranslateError};
use crate::registers::{reg, RegisterFile};
use crate::zcull::{ReportSink, ZcullController};
use word::DecodedWord;

const MAX_CALL_DEPTH: usize = 64;
const MAX_MEM_FAULTS: u32 = 3;
const MEM_FAULT_RETRY_SLEEP: Duration = Duration::from_millis(10);

#[derive(Debug, Error)]
pub enum InterpError {
    #[error(transparent)]
    Translate(TranslateError),
}

/// The guest-facing DMA control block: `put`/`get`/`ref` words.
pub struct DmaControlBlock {
    pub base: Address,
}

impl DmaControlBlock {
    pub fn put(&self, mem: &impl GuestMemory) -> u32 {
        mem.read32(self.base)
    }

    pub fn get(&self, mem: &impl GuestMemory) -> u32 {
        mem.read32(self.base.offset(4))
    }

    pub fn publish_get(&self, mem: &impl GuestMemory, value: u32) {
        mem.write32(self.base.offset(4), value);
    }
}

/// Two atomic flags implementing a spin-lock pause protocol: an outside
/// thread sets `lock` and spins on `ack`; the interpreter checks `lock` once
/// per iteration, acknowledges, and spins until it is released.
#[derive(Default)]
pub struct PauseControl {
    lock: AtomicBool,
    ack: AtomicBool,
}

impl PauseControl {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn request_pause(&self) {
        self.lock.store(true, Ordering::Release);
        while !self.ack.load(Ordering::Acquire) {
            std::hint::spin_loop();
        }
    }

    pub fn unpause(&self) {
        self.lock.store(false, Ordering::Release);
    }

    fn honor(&self) {
        if self.lock.load(Ordering::Acquire) {
            self.ack.store(true, Ordering::Release);
            while self.lock.load(Ordering::Acquire) {
                std::hint::spin_loop();
            }
            self.ack.store(false, Ordering::Release);
        }
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct InterpreterStats {
    pub fifo_is_idle: bool,
    pub fifo_idle_timestamp: u64,
}

pub struct Interpreter {
    pub regs: RegisterFile,
    pub batcher: DrawBatcher,
    pub zcull: ZcullController,
    control: DmaControlBlock,
    pause: Arc<PauseControl>,
    command_context: MemoryContext,
    internal_get: u32,
    restore_point: u32,
    call_stack: Vec<u32>,
    mem_faults_count: u32,
    invalid_command_interrupt_raised: bool,
    sync_point_requested: bool,
    running: bool,
    stats: InterpreterStats,
}

impl Interpreter {
    pub fn new(control_base: Address, initial_get: u32) -> Self {
        Self {
            regs: RegisterFile::new(),
            batcher: DrawBatcher::new(),
            zcull: ZcullController::new(),
            control: DmaControlBlock { base: control_base },
            pause: PauseControl::new(),
            command_context: MemoryContext::Main,
            internal_get: initial_get,
            restore_point: initial_get,
            call_stack: Vec::new(),
            mem_faults_count: 0,
            invalid_command_interrupt_raised: false,
            sync_point_requested: false,
            running: true,
            stats: InterpreterStats::default(),
        }
    }

    pub fn pause_control(&self) -> Arc<PauseControl> {
        Arc::clone(&self.pause)
    }

    pub fn stats(&self) -> InterpreterStats {
        self.stats
    }

    pub fn request_sync_point(&mut self) {
        self.sync_point_requested = true;
    }

    pub fn stop(&mut self) {
        self.running = false;
    }

    pub fn internal_get(&self) -> u32 {
        self.internal_get
    }

    /// One pass of the main loop (§4.3, steps 1-13).
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
        self.pause.honor();

        let put = self.control.put(mem);
        let idle = put == self.internal_get;
        backend.do_local_task(idle);

        self.zcull.update(backend, reports);

        if self.sync_point_requested {
            self.sync_point_requested = false;
            match MemoryBridge::new(mem).phys_addr(self.internal_get, self.command_context) {
                Ok(_) => self.restore_point = self.internal_get,
                Err(error) => {
                    tracing::warn!(%error, get = self.internal_get, "sync point requested on unmapped get; keeping previous restore point");
                }
            }
        }

        self.control.publish_get(mem, self.internal_get);

        if put == self.internal_get || !self.running {
            self.batcher.flush_pending(&mut self.regs, backend);
            self.stats.fifo_is_idle = put == self.internal_get;
            return Ok(());
        }
        self.stats.fifo_is_idle = false;

        let Some(cmd_addr) = self.translate_or_fault(mem, self.internal_get)? else {
            return Ok(());
        };
        let word = mem.read32(cmd_addr);

        match word::decode(word, self.internal_get) {
            DecodedWord::Nop => self.internal_get += 4,
            DecodedWord::Jump { target } => self.internal_get = target,
            DecodedWord::Call { target, return_to } => {
                if self.call_stack.len() >= MAX_CALL_DEPTH {
                    tracing::error!(depth = self.call_stack.len(), "fifo call stack overflow; dropping call");
                } else {
                    self.call_stack.push(return_to);
                }
                self.internal_get = target;
            }
            DecodedWord::Return => match self.call_stack.pop() {
                Some(addr) => self.internal_get = addr,
                None => {
                    tracing::warn!("RETURN with an empty call stack; draining to put");
                    self.internal_get = put;
                }
            },
            DecodedWord::Method { first, count, non_increment, unaligned } => {
                self.invalid_command_interrupt_raised = false;

                let Some(args_base) = self.translate_or_fault(mem, self.internal_get + 4)? else {
                    return Ok(());
                };

                for i in 0..count {
                    let reg_id = if non_increment { first } else { first + i };
                    let value = mem.read32(args_base.offset(u32::from(i) * 4));

                    capture.record_method(reg_id, value);
                    self.batcher.process(reg_id, value, &mut self.regs, backend);

                    if matches!(reg_id, reg::DRAW_ARRAYS | reg::DRAW_INDEX_ARRAY) {
                        self.zcull.on_draw();
                    }

                    if self.invalid_command_interrupt_raised {
                        break;
                    }
                }

                if unaligned && self.invalid_command_interrupt_raised {
                    self.internal_get = self.restore_point;
                } else {
                    self.internal_get += (u32::from(count) + 1) * 4;
                }
            }
        }

        Ok(())
    }

    fn translate_or_fault<M: GuestMemory>(&mut self, mem: &M, offset: u32) -> Result<Option<Address>, InterpError> {
        match MemoryBridge::new(mem).phys_addr(offset, self.command_context) {
            Ok(addr) => {
                self.mem_faults_count = 0;
                Ok(Some(addr))
            }
            Err(TranslateError::UnmappedGuestMemory { .. }) => {
                self.mem_faults_count += 1;
                if self.mem_faults_count >= MAX_MEM_FAULTS {
                    tracing::error!(offset, "fifo memory fault limit reached; resetting to restore point");
                    self.internal_get = self.restore_point;
                    self.mem_faults_count = 0;
                    self.invalid_command_interrupt_raised = true;
                } else {
                    tracing::trace!(offset, faults = self.mem_faults_count, "unmapped fifo read; retrying");
                    std::thread::sleep(MEM_FAULT_RETRY_SLEEP);
                }
                Ok(None)
            }
            Err(other) => Err(InterpError::Translate(other)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::QueryId;
    use crate::capture::NullSink;
    use crate::registers::{FirstCount, Primitive};
    use std::cell::RefCell;
    use std::collections::HashMap;

    struct FlatMemory {
        words: RefCell<HashMap<u32, u32>>,
    }

    impl FlatMemory {
        fn new() -> Self {
            Self { words: RefCell::new(HashMap::new()) }
        }

        fn set(&self, addr: u32, value: u32) {
            self.words.borrow_mut().insert(addr, value);
        }
    }

    impl GuestMemory for FlatMemory {
        fn io_translate(&self, offset: u32) -> Option<u32> {
            Some(offset)
        }
        fn read32(&self, addr: Address) -> u32 {
            self.words.borrow().get(&addr.value()).copied().unwrap_or(0)
        }
        fn write32(&self, addr: Address, value: u32) {
            self.words.borrow_mut().insert(addr.value(), value);
        }
    }

    #[derive(Default)]
    struct RecordingBackend {
        draws: RefCell<Vec<(Primitive, Vec<FirstCount>)>>,
    }

    impl Backend for RecordingBackend {
        fn do_local_task(&mut self, _idle: bool) {}
        fn begin_occlusion_query(&mut self, _query: QueryId) {}
        fn end_occlusion_query(&mut self, _query: QueryId) {}
        fn check_occlusion_query_status(&mut self, _query: QueryId) -> bool {
            true
        }
        fn get_occlusion_query_result(&mut self, _query: QueryId) -> u32 {
            1
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
        fn draw(&mut self, primitive: Primitive, ranges: &[FirstCount]) {
            self.draws.borrow_mut().push((primitive, ranges.to_vec()));
        }
        fn configure(&mut self, _reg: u16, _value: u32) {}
    }

    #[derive(Default)]
    struct NullReports;
    impl ReportSink for NullReports {
        fn write_report(&mut self, _addr: Address, _value: u32, _timestamp: u64) {}
    }

    #[test]
    fn fifo_conservation_without_jumps() {
        let mem = FlatMemory::new();
        // method word: triangles(5)<<24? reuse SET_BEGIN_END encoding via reg shortcuts below
        let base = 0x1000u32;
        mem.set(base, (1u32 << 18) | (u32::from(reg::SURFACE_FORMAT) << 2)); // count=1
        mem.set(base + 4, 7);

        let control_base = Address(0x5000);
        mem.set(0x5000, base + 8); // put
        mem.set(0x5004, base); // get

        let mut interp = Interpreter::new(control_base, base);
        let mut backend = RecordingBackend::default();
        let mut capture = NullSink;
        let mut reports = NullReports;

        interp.run_once(&mem, &mut backend, &mut capture, &mut reports).unwrap();
        assert_eq!(interp.internal_get(), base + 8);
    }

    #[test]
    fn call_then_return_resumes_after_call() {
        let mem = FlatMemory::new();
        let a = 0x2000u32;
        let b = 0x3000u32;

        mem.set(a, b | 0b10); // CALL to b
        mem.set(b, 0x0002_0000); // RETURN

        let control_base = Address(0x5000);
        mem.set(0x5000, a + 4); // put (enough room, though we stop after return)
        mem.set(0x5004, a);

        let mut interp = Interpreter::new(control_base, a);
        let mut backend = RecordingBackend::default();
        let mut capture = NullSink;
        let mut reports = NullReports;

        interp.run_once(&mem, &mut backend, &mut capture, &mut reports).unwrap(); // CALL
        assert_eq!(interp.internal_get(), b);
        interp.run_once(&mem, &mut backend, &mut capture, &mut reports).unwrap(); // RETURN
        assert_eq!(interp.internal_get(), a + 4);
    }
}
