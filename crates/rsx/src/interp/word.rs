//! Command word decoding: jump/call/return control flow and the generic
//! method-write encoding.

const OLD_JUMP_MASK: u32 = 0x2000_0003;
const OLD_JUMP_TAG: u32 = 0x2000_0000;
const OLD_JUMP_TARGET_MASK: u32 = 0x1fff_fffc;
const NEW_JUMP_TAG_BIT: u32 = 0x8000_0000;
const NEW_JUMP_TARGET_MASK: u32 = 0xffff_fffc;
const CALL_LOW_BITS: u32 = 0b10;
const RETURN_CMD: u32 = 0x0002_0000;
const NON_INCREMENT_BIT: u32 = 0x4000_0000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecodedWord {
    Nop,
    Jump { target: u32 },
    Call { target: u32, return_to: u32 },
    Return,
    Method { first: u16, count: u16, non_increment: bool, unaligned: bool },
}

/// Decodes one command word. `current_get` is the address the word was read
/// from, used to compute the return address for `CALL`.
pub fn decode(word: u32, current_get: u32) -> DecodedWord {
    if word == 0 {
        return DecodedWord::Nop;
    }

    if word & OLD_JUMP_MASK == OLD_JUMP_TAG {
        return DecodedWord::Jump { target: word & OLD_JUMP_TARGET_MASK };
    }

    if word & NEW_JUMP_TAG_BIT != 0 {
        return DecodedWord::Jump { target: word & NEW_JUMP_TARGET_MASK };
    }

    if word & 0b11 == CALL_LOW_BITS {
        return DecodedWord::Call {
            target: word & !0b11,
            return_to: current_get + 4,
        };
    }

    if word == RETURN_CMD {
        return DecodedWord::Return;
    }

    DecodedWord::Method {
        first: ((word & 0xfffc) >> 2) as u16,
        count: ((word >> 18) & 0x7ff) as u16,
        non_increment: word & NON_INCREMENT_BIT != 0,
        unaligned: word & 0b11 != 0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_is_nop() {
        assert_eq!(decode(0, 0x1000), DecodedWord::Nop);
    }

    #[test]
    fn old_jump_masks_target() {
        let word = OLD_JUMP_TAG | 0x40;
        assert_eq!(decode(word, 0), DecodedWord::Jump { target: 0x40 });
    }

    #[test]
    fn call_pushes_return_address() {
        let word = 0x8000 | CALL_LOW_BITS;
        assert_eq!(
            decode(word, 0x2000),
            DecodedWord::Call { target: 0x8000, return_to: 0x2004 }
        );
    }

    #[test]
    fn return_is_recognized() {
        assert_eq!(decode(RETURN_CMD, 0), DecodedWord::Return);
    }

    #[test]
    fn method_extracts_first_and_count() {
        let word = (5u32 << 18) | (100 << 2);
        match decode(word, 0) {
            DecodedWord::Method { first, count, non_increment, unaligned } => {
                assert_eq!(first, 100);
                assert_eq!(count, 5);
                assert!(!non_increment);
                assert!(!unaligned);
            }
            other => panic!("expected Method, got {other:?}"),
        }
    }
}
