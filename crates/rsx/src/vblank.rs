//! A companion thread that ticks a monotonic vblank counter at ~60 Hz and
//! drives the guest-facing interrupt sink. Independent from the interpreter
//! thread; the global pause protocol uses two atomic flags, not a mutex, so
//! pausing never blocks on whatever the vblank thread happens to be doing.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

pub trait VblankSink: Send + 'static {
    fn on_vblank(&mut self, count: u64);
}

struct Shared {
    running: AtomicBool,
    freeze_requested: AtomicBool,
    freeze_acknowledged: AtomicBool,
    vblank_count: AtomicU64,
}

pub struct VblankDriver {
    shared: Arc<Shared>,
    handle: Option<JoinHandle<()>>,
}

impl VblankDriver {
    pub fn start<S: VblankSink>(mut sink: S) -> Self {
        let shared = Arc::new(Shared {
            running: AtomicBool::new(true),
            freeze_requested: AtomicBool::new(false),
            freeze_acknowledged: AtomicBool::new(false),
            vblank_count: AtomicU64::new(0),
        });

        let worker_shared = Arc::clone(&shared);
        let handle = std::thread::Builder::new()
            .name("rsx-vblank".into())
            .spawn(move || {
                let sleeper = spin_sleep::SpinSleeper::default();
                let period = Duration::from_secs_f64(1.0 / 60.0);

                while worker_shared.running.load(Ordering::Acquire) {
                    if worker_shared.freeze_requested.load(Ordering::Acquire) {
                        worker_shared.freeze_acknowledged.store(true, Ordering::Release);
                        while worker_shared.freeze_requested.load(Ordering::Acquire) {
                            std::hint::spin_loop();
                        }
                        worker_shared.freeze_acknowledged.store(false, Ordering::Release);
                        continue;
                    }

                    sleeper.sleep(period);
                    let count = worker_shared.vblank_count.fetch_add(1, Ordering::AcqRel) + 1;
                    sink.on_vblank(count);
                }
            })
            .expect("failed to spawn vblank thread");

        Self { shared, handle: Some(handle) }
    }

    /// Scoped acquisition of an interpreter freeze: blocks until the vblank
    /// thread acknowledges before returning.
    pub fn pause(&self) {
        self.shared.freeze_requested.store(true, Ordering::Release);
        while !self.shared.freeze_acknowledged.load(Ordering::Acquire) {
            std::hint::spin_loop();
        }
    }

    pub fn unpause(&self) {
        self.shared.freeze_requested.store(false, Ordering::Release);
    }

    pub fn vblank_count(&self) -> u64 {
        self.shared.vblank_count.load(Ordering::Acquire)
    }

    pub fn shutdown(mut self) {
        self.shared.running.store(false, Ordering::Release);
        self.unpause();
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}
