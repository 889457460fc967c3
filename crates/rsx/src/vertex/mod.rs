//! Vertex input layout analysis: classifies the 16 attribute slots into
//! interleaved persistent blocks, volatile push buffers, or referenced
//! constant registers, and computes the memory a draw will need.

mod layout;

pub use layout::{analyze, fill_vertex_layout_state, write_vertex_data_to_memory};

use easyerr::Error;

use crate::memory::MemoryContext;
use crate::registers::{DrawClause, DrawCommand};

pub const SLOT_COUNT: usize = 16;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VertexDataType {
    F32,
    S16k,
    S1,
    Sf,
    Ub,
    Cmp,
    Ub256,
}

impl VertexDataType {
    /// Size in bytes of a single packed attribute for a given element count.
    pub fn host_size(self, element_count: u8) -> Result<u32, VertexLayoutError> {
        match self {
            VertexDataType::F32 => Ok(padded_element_size(element_count) * 4),
            VertexDataType::S16k | VertexDataType::S1 | VertexDataType::Sf => {
                Ok(padded_element_size(element_count) * 2)
            }
            VertexDataType::Ub => Ok(padded_element_size(element_count)),
            VertexDataType::Cmp => Ok(4),
            VertexDataType::Ub256 => {
                if element_count == 4 {
                    Ok(4)
                } else {
                    Err(VertexLayoutError::WrongVectorSize {
                        expected: 4,
                        actual: element_count,
                    })
                }
            }
        }
    }
}

/// `size == 3` is padded to 4 elements; everything else passes through.
fn padded_element_size(element_count: u8) -> u32 {
    if element_count == 3 {
        4
    } else {
        u32::from(element_count)
    }
}

#[derive(Debug, Error)]
pub enum VertexLayoutError {
    #[error("attribute vector size {actual} is not valid here (expected {expected})")]
    WrongVectorSize { expected: u8, actual: u8 },
    #[error("vertex data type {ty:?} cannot be used with element count {count}")]
    BadVertexDataType { ty: VertexDataType, count: u8 },
}

/// Where the `(first, count)` ranges pull this slot's vertex data from.
#[derive(Debug, Clone, Copy)]
pub struct ArrayInfo {
    pub base_offset: u32,
    pub location: MemoryContext,
    pub stride: u8,
    pub element_count: u8,
    pub ty: VertexDataType,
    pub divisor: u32,
}

impl ArrayInfo {
    pub fn is_enabled(&self) -> bool {
        self.element_count > 0
    }
}

/// Immediate-mode per-attribute storage filled by register writes.
#[derive(Debug, Default, Clone)]
pub struct PushBuffer {
    pub ty: Option<VertexDataType>,
    pub element_count: u8,
    pub vertex_count: u32,
    pub data: Vec<u8>,
}

impl PushBuffer {
    pub fn byte_size(&self) -> u32 {
        self.data.len() as u32
    }

    /// Append one component write; when the last component of a vertex
    /// arrives, the vertex count advances.
    pub fn append_vertex_data(&mut self, component: u8, ty: VertexDataType, element_count: u8, value: u32) {
        self.ty = Some(ty);
        self.element_count = element_count;
        self.data.extend_from_slice(&value.to_ne_bytes());
        if component + 1 == element_count {
            self.vertex_count += 1;
        }
    }

    pub fn clear(&mut self) {
        self.data.clear();
        self.vertex_count = 0;
    }
}

/// Per-slot classification input: the array binding, any push-buffer data
/// accumulated so far, and whether a constant ("register vertex") fallback
/// of a given size is configured.
#[derive(Debug, Default, Clone)]
pub struct SlotInput {
    pub array: Option<ArrayInfo>,
    pub push_buffer: PushBuffer,
    pub constant_size: u8,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttributePlacement {
    None,
    Persistent,
    Transient,
}

#[derive(Debug, Clone)]
pub struct InterleavedBlock {
    pub base_offset: u32,
    pub location: MemoryContext,
    pub attribute_stride: u32,
    pub locations: Vec<usize>,
    pub interleaved: bool,
    pub single_vertex: bool,
    pub min_divisor: u32,
    pub all_modulus: bool,
}

#[derive(Debug, Clone, Copy)]
pub struct VolatileBlock {
    pub slot: usize,
    pub size_bytes: u32,
}

#[derive(Debug, Clone)]
pub struct VertexInputLayout {
    pub interleaved_blocks: Vec<InterleavedBlock>,
    pub volatile_blocks: Vec<VolatileBlock>,
    pub referenced_registers: Vec<usize>,
    pub attribute_placement: [AttributePlacement; SLOT_COUNT],
}

#[derive(Debug, Clone, Copy)]
pub struct AttributeDescriptor {
    pub ty: VertexDataType,
    pub element_count: u8,
    pub offset_in_layout: u32,
    pub attribute_word: u32,
}

pub(crate) fn is_inlined(clause: &DrawClause) -> bool {
    matches!(clause.command, DrawCommand::InlinedArray)
}
