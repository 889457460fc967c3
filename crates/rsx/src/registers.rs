//! The method-register file: a bank of command registers, the current draw
//! clause they describe, and the per-slot vertex attribute inputs.

use crate::memory::MemoryContext;
use crate::vertex::{ArrayInfo, PushBuffer, SlotInput, VertexDataType, SLOT_COUNT};

/// Size of the emulated register bank (real hardware has roughly 4,000 live
/// methods; register ids here are abstracted, not a faithful NV4097 map).
pub const REGISTER_COUNT: usize = 0x2000;

pub mod reg {
    pub const SET_BEGIN_END: u16 = 0x0ffc;
    pub const DRAW_ARRAYS: u16 = 0x0600;
    pub const DRAW_INDEX_ARRAY: u16 = 0x0601;
    pub const INVALIDATE_VERTEX_FILE: u16 = 0x05c0;
    pub const ARRAY_ELEMENT_BASE: u16 = 0x0a00; // + slot, immediate push-buffer writes
    pub const VERTEX_DATA_ARRAY_FORMAT_BASE: u16 = 0x0700; // + slot
    pub const VERTEX_DATA_ARRAY_OFFSET_BASE: u16 = 0x0180; // + slot
    pub const VERTEX_CONSTANT_REGISTER_BASE: u16 = 0x0c00; // + slot
    pub const INLINE_ARRAY: u16 = 0x1e00;

    pub const SURFACE_CLIP_HORIZONTAL: u16 = 0x0208;
    pub const SURFACE_CLIP_VERTICAL: u16 = 0x020c;
    pub const VIEWPORT_SCALE_BASE: u16 = 0x0a20; // x,y,z,w

    pub const TEXTURE_OFFSET_BASE: u16 = 0x1000; // 16 slots * 8 words
    pub const TEXTURE_CONTROL_A_BASE: u16 = 0x1100; // 16 slots * 1 word
    pub const TEXTURE_CONTROL_B_BASE: u16 = 0x1120; // 16 slots * 1 word
    pub const VERTEX_TEXTURE_OFFSET_BASE: u16 = 0x1200; // 4 slots

    pub const SURFACE_COLOR_OFFSET_BASE: u16 = 0x0210; // 4
    pub const SURFACE_ZETA_OFFSET: u16 = 0x0220;
    pub const SURFACE_CONTEXT_DMA_BASE: u16 = 0x0224; // 5
    pub const SURFACE_FORMAT: u16 = 0x0230;
    pub const SURFACE_PITCH_BASE: u16 = 0x0234; // 5
}

/// Whether a register write triggers backend-visible effects the batcher
/// must reason about.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegisterEffect {
    /// No backend-visible effect; decoding already applied it.
    None,
    /// Ends a deferred draw; the batcher owns emission.
    DrawCommit,
    /// A configuration write the batcher may suppress when it is a no-op.
    Configure,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::FromRepr)]
#[repr(u32)]
pub enum Primitive {
    Points = 1,
    Lines,
    LineLoop,
    LineStrip,
    Triangles,
    TriangleStrip,
    TriangleFan,
    Quads,
    QuadStrip,
    Polygon,
}

impl Primitive {
    /// True iff independent `(first, count)` ranges may be concatenated
    /// without corrupting the primitive's topology.
    pub fn is_disjoint(self) -> bool {
        !matches!(
            self,
            Primitive::LineLoop
                | Primitive::LineStrip
                | Primitive::Polygon
                | Primitive::QuadStrip
                | Primitive::TriangleFan
                | Primitive::TriangleStrip
        )
    }

    fn from_raw(value: u32) -> Option<Primitive> {
        Primitive::from_repr(value)
    }
}

/// A single contiguous vertex range.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FirstCount {
    pub first: u32,
    pub count: u32,
}

/// The kind of data backing a draw: modeled as a tagged sum rather than a
/// base class, since the three kinds never share behavior beyond dispatch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DrawCommand {
    #[default]
    None,
    Array,
    Indexed,
    InlinedArray,
}

#[derive(Debug, Clone, Default)]
pub struct DrawClause {
    pub command: DrawCommand,
    pub primitive: Option<Primitive>,
    pub first_count_commands: Vec<FirstCount>,
    pub inline_vertex_array: Vec<u32>,
    pub is_immediate_draw: bool,
}

impl DrawClause {
    pub fn is_disjoint_primitive(&self) -> bool {
        self.primitive.is_some_and(Primitive::is_disjoint)
    }

    pub fn clear(&mut self) {
        self.command = DrawCommand::None;
        self.first_count_commands.clear();
        self.inline_vertex_array.clear();
        self.is_immediate_draw = false;
    }
}

pub struct RegisterFile {
    raw: Box<[u32]>,
    pub clause: DrawClause,
    pub slots: [SlotInput; SLOT_COUNT],
}

impl RegisterFile {
    pub fn new() -> Self {
        Self {
            raw: vec![0u32; REGISTER_COUNT].into_boxed_slice(),
            clause: DrawClause::default(),
            slots: Default::default(),
        }
    }

    pub fn raw(&self, reg: u16) -> u32 {
        self.raw.get(reg as usize).copied().unwrap_or(0)
    }

    /// Whether writing `value` to `reg` would be a no-op.
    pub fn test(&self, reg: u16, value: u32) -> bool {
        self.raw(reg) == value
    }

    pub fn classify(&self, reg: u16) -> RegisterEffect {
        if reg == reg::SET_BEGIN_END {
            RegisterEffect::DrawCommit
        } else if is_skippable_window(reg) {
            RegisterEffect::Configure
        } else {
            RegisterEffect::None
        }
    }

    /// Applies a register write: records the raw value and updates any
    /// structural state (draw clause, push buffers, array info) the write
    /// implies. Always runs, independent of batching decisions.
    pub fn decode(&mut self, reg: u16, value: u32) {
        if let Some(slot) = index_in_window(reg, reg::VERTEX_DATA_ARRAY_OFFSET_BASE, SLOT_COUNT) {
            let location = if value & 1 != 0 {
                MemoryContext::Main
            } else {
                MemoryContext::Local
            };
            let array = self.slots[slot].array.get_or_insert(ArrayInfo {
                base_offset: 0,
                location,
                stride: 0,
                element_count: 0,
                ty: VertexDataType::F32,
                divisor: 1,
            });
            array.base_offset = value & !1;
            array.location = location;
        } else if let Some(slot) = index_in_window(reg, reg::VERTEX_DATA_ARRAY_FORMAT_BASE, SLOT_COUNT) {
            let stride = ((value >> 8) & 0xff) as u8;
            let element_count = (value & 0xf) as u8;
            let ty = vertex_type_from_raw((value >> 4) & 0xf);
            let array = self.slots[slot].array.get_or_insert(ArrayInfo {
                base_offset: 0,
                location: MemoryContext::Local,
                stride: 0,
                element_count: 0,
                ty: VertexDataType::F32,
                divisor: 1,
            });
            array.stride = stride;
            array.element_count = element_count;
            array.ty = ty;
        } else if let Some(slot) = index_in_window(reg, reg::VERTEX_CONSTANT_REGISTER_BASE, SLOT_COUNT) {
            self.slots[slot].constant_size = ((value & 0xf) as u8).max(self.slots[slot].constant_size);
        } else if let Some(slot) = index_in_window(reg, reg::ARRAY_ELEMENT_BASE, SLOT_COUNT) {
            let element_count = self.slots[slot].push_buffer.element_count.max(1);
            let component = (self.raw(reg) >> 28) as u8 % element_count;
            let ty = self.slots[slot]
                .push_buffer
                .ty
                .unwrap_or(VertexDataType::F32);
            self.slots[slot]
                .push_buffer
                .append_vertex_data(component, ty, element_count, value);
            self.clause.is_immediate_draw = true;
        } else if reg == reg::DRAW_ARRAYS {
            self.clause.command = DrawCommand::Array;
            self.clause.first_count_commands.push(FirstCount {
                first: value & 0x00ff_ffff,
                count: (value >> 24) + 1,
            });
        } else if reg == reg::DRAW_INDEX_ARRAY {
            self.clause.command = DrawCommand::Indexed;
            self.clause.first_count_commands.push(FirstCount {
                first: value & 0x00ff_ffff,
                count: (value >> 24) + 1,
            });
        } else if reg == reg::INLINE_ARRAY {
            self.clause.command = DrawCommand::InlinedArray;
            self.clause.inline_vertex_array.push(value);
        } else if reg == reg::SET_BEGIN_END {
            if value != 0 {
                self.clause.primitive = Primitive::from_raw(value);
            }
        } else if reg == reg::INVALIDATE_VERTEX_FILE {
            for slot in &mut self.slots {
                slot.push_buffer.clear();
            }
        }

        if let Some(slot) = self.raw.get_mut(reg as usize) {
            *slot = value;
        }
    }

    pub fn surface_clip_width(&self) -> u32 {
        self.raw(reg::SURFACE_CLIP_HORIZONTAL) & 0xffff
    }

    pub fn surface_clip_height(&self) -> u32 {
        self.raw(reg::SURFACE_CLIP_VERTICAL) & 0xffff
    }

    pub fn viewport_scale_x(&self) -> f32 {
        f32::from_bits(self.raw(reg::VIEWPORT_SCALE_BASE))
    }
}

impl Default for RegisterFile {
    fn default() -> Self {
        Self::new()
    }
}

fn vertex_type_from_raw(value: u32) -> VertexDataType {
    match value {
        0 => VertexDataType::S1,
        1 => VertexDataType::F32,
        2 => VertexDataType::Sf,
        3 => VertexDataType::Ub,
        4 => VertexDataType::S16k,
        5 => VertexDataType::Cmp,
        6 => VertexDataType::Ub256,
        _ => VertexDataType::F32,
    }
}

fn index_in_window(reg: u16, base: u16, count: usize) -> Option<usize> {
    let offset = reg.checked_sub(base)? as usize;
    (offset < count).then_some(offset)
}

/// Register windows documented as skippable: writing a value that would be
/// a no-op never forces a flush of a live deferred batch.
pub fn is_skippable_window(reg: u16) -> bool {
    index_in_window(reg, reg::TEXTURE_OFFSET_BASE, SLOT_COUNT * 8).is_some()
        || index_in_window(reg, reg::TEXTURE_CONTROL_A_BASE, SLOT_COUNT).is_some()
        || index_in_window(reg, reg::TEXTURE_CONTROL_B_BASE, SLOT_COUNT).is_some()
        || index_in_window(reg, reg::VERTEX_TEXTURE_OFFSET_BASE, 4).is_some()
        || reg == reg::SURFACE_CLIP_HORIZONTAL
        || reg == reg::SURFACE_CLIP_VERTICAL
        || index_in_window(reg, reg::SURFACE_COLOR_OFFSET_BASE, 4).is_some()
        || reg == reg::SURFACE_ZETA_OFFSET
        || index_in_window(reg, reg::SURFACE_CONTEXT_DMA_BASE, 5).is_some()
        || reg == reg::SURFACE_FORMAT
        || index_in_window(reg, reg::SURFACE_PITCH_BASE, 5).is_some()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn draw_arrays_appends_range_and_sets_command() {
        let mut regs = RegisterFile::new();
        regs.decode(reg::DRAW_ARRAYS, (2u32 << 24) | 5);
        assert_eq!(regs.clause.command, DrawCommand::Array);
        assert_eq!(
            regs.clause.first_count_commands,
            vec![FirstCount { first: 5, count: 3 }]
        );
    }

    #[test]
    fn test_reports_noop_writes() {
        let mut regs = RegisterFile::new();
        regs.decode(reg::SURFACE_FORMAT, 7);
        assert!(regs.test(reg::SURFACE_FORMAT, 7));
        assert!(!regs.test(reg::SURFACE_FORMAT, 8));
    }

    #[test]
    fn skippable_windows_cover_texture_and_surface_regs() {
        assert!(is_skippable_window(reg::TEXTURE_OFFSET_BASE));
        assert!(is_skippable_window(reg::SURFACE_PITCH_BASE + 4));
        assert!(!is_skippable_window(reg::DRAW_ARRAYS));
    }
}
