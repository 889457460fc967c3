use bitos::bitos;

use super::{
    ArrayInfo, AttributeDescriptor, AttributePlacement, InterleavedBlock, SlotInput, VertexInputLayout,
    VertexLayoutError, VolatileBlock, SLOT_COUNT,
};
use crate::registers::DrawClause;

/// The packed per-slot attribute word emitted alongside a descriptor: stride,
/// per-vertex divisor, the modulo-vs-divide frequency mode, and the
/// volatile/byte-swap flags, all in one machine word.
#[bitos(32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct AttributeWord {
    #[bits(0..8)]
    stride: u8,
    #[bits(8)]
    swap: bool,
    #[bits(9)]
    volatile: bool,
    #[bits(10..12)]
    frequency: u8,
    #[bits(12)]
    all_modulus: bool,
    #[bits(16..24)]
    divisor: u8,
}

/// Partitions the 16 attribute slots per the classification rules: push
/// buffers and referenced constants are transient, array-backed attributes
/// are persistent and merge into shared interleaved blocks where possible.
pub fn analyze(slots: &[SlotInput; SLOT_COUNT], clause: &DrawClause) -> Result<VertexInputLayout, VertexLayoutError> {
    let mut layout = VertexInputLayout {
        interleaved_blocks: Vec::new(),
        volatile_blocks: Vec::new(),
        referenced_registers: Vec::new(),
        attribute_placement: [AttributePlacement::None; SLOT_COUNT],
    };

    if super::is_inlined(clause) {
        // A single interleaved block synthesized from every enabled slot.
        let mut stride = 0u32;
        let mut locations = Vec::new();
        for (slot, input) in slots.iter().enumerate() {
            if let Some(array) = &input.array {
                if array.is_enabled() {
                    stride += array.ty.host_size(array.element_count)?;
                    locations.push(slot);
                    layout.attribute_placement[slot] = AttributePlacement::Transient;
                }
            }
        }

        if !locations.is_empty() {
            layout.interleaved_blocks.push(InterleavedBlock {
                base_offset: 0,
                location: slots[locations[0]].array.unwrap().location,
                attribute_stride: stride,
                locations,
                interleaved: true,
                single_vertex: false,
                min_divisor: 1,
                all_modulus: false,
            });
        }

        return Ok(layout);
    }

    for (slot, input) in slots.iter().enumerate() {
        if !input.push_buffer.data.is_empty() {
            layout.attribute_placement[slot] = AttributePlacement::Transient;
            layout.volatile_blocks.push(VolatileBlock {
                slot,
                size_bytes: input.push_buffer.byte_size(),
            });
            continue;
        }

        let array_enabled = input.array.as_ref().is_some_and(ArrayInfo::is_enabled);

        if !array_enabled && input.constant_size > 0 {
            layout.attribute_placement[slot] = AttributePlacement::Transient;
            layout.referenced_registers.push(slot);
            continue;
        }

        if array_enabled {
            let array = input.array.expect("array_enabled implies array is Some");
            layout.attribute_placement[slot] = AttributePlacement::Persistent;
            merge_into_interleaved_block(&mut layout.interleaved_blocks, slot, &array)?;
        }
    }

    Ok(layout)
}

fn merge_into_interleaved_block(
    blocks: &mut Vec<InterleavedBlock>,
    slot: usize,
    array: &ArrayInfo,
) -> Result<(), VertexLayoutError> {
    let stride = if array.stride == 0 {
        array.ty.host_size(array.element_count)?
    } else {
        u32::from(array.stride)
    };

    for block in blocks.iter_mut() {
        let within_stride = array.base_offset.abs_diff(block.base_offset) <= block.attribute_stride;
        if block.attribute_stride == stride && within_stride {
            block.base_offset = block.base_offset.min(array.base_offset);
            block.locations.push(slot);
            block.min_divisor = block.min_divisor.min(array.divisor.max(1));
            block.all_modulus = block.all_modulus && array.divisor > 1;
            return Ok(());
        }
    }

    blocks.push(InterleavedBlock {
        base_offset: array.base_offset,
        location: array.location,
        attribute_stride: stride,
        locations: vec![slot],
        interleaved: array.stride != 0,
        single_vertex: array.stride == 0,
        min_divisor: array.divisor.max(1),
        all_modulus: array.divisor > 1,
    });

    Ok(())
}

fn unique_vertex_count(block: &InterleavedBlock, vertex_count: u32) -> u32 {
    if block.single_vertex {
        1
    } else if block.all_modulus {
        block.min_divisor
    } else {
        vertex_count.div_ceil(block.min_divisor.max(1))
    }
}

/// Total persistent + volatile bytes a draw with `vertex_count` vertices
/// will need, per the memory-requirement rule in the analyzer design.
pub fn memory_requirement(
    layout: &VertexInputLayout,
    slots: &[SlotInput; SLOT_COUNT],
    vertex_count: u32,
    is_immediate_draw: bool,
    inline_stride: u32,
) -> u32 {
    let persistent: u32 = layout
        .interleaved_blocks
        .iter()
        .map(|b| b.attribute_stride * unique_vertex_count(b, vertex_count))
        .sum();

    let mut volatile = 0u32;
    if is_immediate_draw {
        volatile += layout
            .volatile_blocks
            .iter()
            .map(|b| b.size_bytes)
            .sum::<u32>();
    }
    volatile += 16 * layout.referenced_registers.len() as u32;
    volatile += inline_stride * vertex_count;

    let _ = slots;
    persistent + volatile
}

/// Packs a descriptor's attribute word: stride, divisor, modulo flag,
/// repeat frequency and volatile/byte-swap bits.
fn pack_attribute_word(stride: u32, divisor: u32, all_modulus: bool, volatile: bool, swap: bool) -> u32 {
    AttributeWord::from_bits(0)
        .with_stride((stride & 0xff) as u8)
        .with_divisor(divisor.min(0xff) as u8)
        .with_all_modulus(all_modulus)
        .with_frequency((divisor.min(3) & 0b11) as u8)
        .with_volatile(volatile)
        .with_swap(swap)
        .to_bits()
}

/// Emits a 4-field descriptor per enabled slot: `{type, size,
/// offset_in_layout, attribute_word}`.
pub fn fill_vertex_layout_state(
    layout: &VertexInputLayout,
    slots: &[SlotInput; SLOT_COUNT],
) -> [Option<AttributeDescriptor>; SLOT_COUNT] {
    let mut descriptors: [Option<AttributeDescriptor>; SLOT_COUNT] = [None; SLOT_COUNT];

    for block in &layout.interleaved_blocks {
        let mut offset = 0u32;
        for &slot in &block.locations {
            let Some(array) = &slots[slot].array else { continue };
            let size = array.ty.host_size(array.element_count).unwrap_or(0);
            let byte_ty = matches!(
                array.ty,
                super::VertexDataType::Ub | super::VertexDataType::Ub256
            );
            let word = pack_attribute_word(
                block.attribute_stride,
                block.min_divisor,
                block.all_modulus,
                false,
                !byte_ty,
            );
            descriptors[slot] = Some(AttributeDescriptor {
                ty: array.ty,
                element_count: array.element_count,
                offset_in_layout: offset,
                attribute_word: word,
            });
            offset += size;
        }
    }

    let mut volatile_offset = 0u32;
    for vb in &layout.volatile_blocks {
        let input = &slots[vb.slot];
        let ty = input.push_buffer.ty.unwrap_or(super::VertexDataType::F32);
        let byte_ty = matches!(ty, super::VertexDataType::Ub | super::VertexDataType::Ub256);
        let word = pack_attribute_word(0, 1, false, true, !byte_ty);
        descriptors[vb.slot] = Some(AttributeDescriptor {
            ty,
            element_count: input.push_buffer.element_count,
            offset_in_layout: volatile_offset,
            attribute_word: word,
        });
        volatile_offset += vb.size_bytes;
    }

    descriptors
}

/// Writes every enabled slot's push-buffer bytes into `dst` at the offsets
/// `fill_vertex_layout_state` reported, so that reading `dst` back at those
/// offsets reproduces each attribute's source bytes (round-trip property).
pub fn write_vertex_data_to_memory(
    layout: &VertexInputLayout,
    slots: &[SlotInput; SLOT_COUNT],
    dst: &mut [u8],
) {
    let descriptors = fill_vertex_layout_state(layout, slots);
    for vb in &layout.volatile_blocks {
        let Some(descriptor) = descriptors[vb.slot] else { continue };
        let start = descriptor.offset_in_layout as usize;
        let bytes = &slots[vb.slot].push_buffer.data;
        if start + bytes.len() <= dst.len() {
            dst[start..start + bytes.len()].copy_from_slice(bytes);
        }
    }
}
