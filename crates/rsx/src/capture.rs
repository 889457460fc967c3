//! Optional recording of decoded draw states, for tooling / replay.

use crate::registers::{FirstCount, Primitive};

#[derive(Debug, Clone)]
pub struct DrawStateSnapshot {
    pub color_buffer: u32,
    pub depth_stencil: u32,
    pub primitive: Primitive,
    pub ranges: Vec<FirstCount>,
    pub vertex_count: u32,
    pub index_bytes: u32,
    pub programs: Vec<u32>,
    pub name: String,
}

pub trait FrameCaptureSink {
    fn is_capturing(&self) -> bool;
    fn record_draw(&mut self, snapshot: DrawStateSnapshot);
    fn record_method(&mut self, reg: u16, value: u32);
}

/// In-memory sink for tests and offline tooling.
#[derive(Debug, Default)]
pub struct RecordingSink {
    pub capturing: bool,
    pub draws: Vec<DrawStateSnapshot>,
    pub trace: Vec<(u16, u32)>,
}

impl FrameCaptureSink for RecordingSink {
    fn is_capturing(&self) -> bool {
        self.capturing
    }

    fn record_draw(&mut self, snapshot: DrawStateSnapshot) {
        if self.capturing {
            self.draws.push(snapshot);
        }
    }

    fn record_method(&mut self, reg: u16, value: u32) {
        if self.capturing {
            self.trace.push((reg, value));
        }
    }
}

/// A sink that records nothing; the default when no capture is requested.
#[derive(Debug, Default)]
pub struct NullSink;

impl FrameCaptureSink for NullSink {
    fn is_capturing(&self) -> bool {
        false
    }

    fn record_draw(&mut self, _snapshot: DrawStateSnapshot) {}
    fn record_method(&mut self, _reg: u16, _value: u32) {}
}
