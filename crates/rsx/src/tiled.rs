//! Read/write of compressed/tiled surface regions.

use easyerr::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompressionMode {
    Disabled,
    C32_2x1,
    C32_2x2,
}

#[derive(Debug, Error)]
pub enum CompressionError {
    #[error("compression mode {raw} is not implemented")]
    UnsupportedCompression { raw: u32 },
}

impl CompressionMode {
    pub fn from_raw(raw: u32) -> Result<Self, CompressionError> {
        match raw {
            0 => Ok(CompressionMode::Disabled),
            1 => Ok(CompressionMode::C32_2x1),
            2 => Ok(CompressionMode::C32_2x2),
            _ => Err(CompressionError::UnsupportedCompression { raw }),
        }
    }
}

/// A rectangular tiled region: `tile_pitch` bytes per row, `(offset_x,
/// offset_y)` the top-left corner within it.
pub struct TiledRegion<'a> {
    pub mode: CompressionMode,
    pub tile_pitch: u32,
    pub offset_x: u32,
    pub offset_y: u32,
    pub data: &'a mut [u8],
}

impl TiledRegion<'_> {
    fn row_offset(&self, y: u32) -> usize {
        ((self.offset_y + y) * self.tile_pitch + self.offset_x * 4) as usize
    }

    /// Writes one row of 32-bit pixels (`src`, already native-endian words)
    /// starting at `(offset_x, offset_y + y)`.
    pub fn write_row(&mut self, y: u32, src: &[u32]) {
        match self.mode {
            CompressionMode::Disabled | CompressionMode::C32_2x1 => {
                let start = self.row_offset(y);
                for (i, pixel) in src.iter().enumerate() {
                    let at = start + i * 4;
                    if at + 4 <= self.data.len() {
                        self.data[at..at + 4].copy_from_slice(&pixel.to_ne_bytes());
                    }
                }
            }
            CompressionMode::C32_2x2 => {
                // each source pixel replicates to a 2x2 host pattern
                for (i, pixel) in src.iter().enumerate() {
                    for dy in 0..2u32 {
                        let start = self.row_offset(y * 2 + dy);
                        let at = start + (i * 2) * 4;
                        for dx in 0..2usize {
                            let at = at + dx * 4;
                            if at + 4 <= self.data.len() {
                                self.data[at..at + 4].copy_from_slice(&pixel.to_ne_bytes());
                            }
                        }
                    }
                }
            }
        }
    }

    /// Reads one row back; for `C32_2x2` takes the top-left sample of each
    /// 2x2 replicated block.
    pub fn read_row(&self, y: u32, dst: &mut [u32]) {
        match self.mode {
            CompressionMode::Disabled | CompressionMode::C32_2x1 => {
                let start = self.row_offset(y);
                for (i, out) in dst.iter_mut().enumerate() {
                    let at = start + i * 4;
                    if at + 4 <= self.data.len() {
                        *out = u32::from_ne_bytes(self.data[at..at + 4].try_into().expect("4 bytes"));
                    }
                }
            }
            CompressionMode::C32_2x2 => {
                let start = self.row_offset(y * 2);
                for (i, out) in dst.iter_mut().enumerate() {
                    let at = start + (i * 2) * 4;
                    if at + 4 <= self.data.len() {
                        *out = u32::from_ne_bytes(self.data[at..at + 4].try_into().expect("4 bytes"));
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn disabled_round_trips() {
        let mut buf = vec![0u8; 64];
        let mut region = TiledRegion {
            mode: CompressionMode::Disabled,
            tile_pitch: 16,
            offset_x: 0,
            offset_y: 0,
            data: &mut buf,
        };
        region.write_row(0, &[1, 2, 3, 4]);
        let mut out = [0u32; 4];
        region.read_row(0, &mut out);
        assert_eq!(out, [1, 2, 3, 4]);
    }

    #[test]
    fn c32_2x2_reads_top_left_sample() {
        let mut buf = vec![0u8; 256];
        let mut region = TiledRegion {
            mode: CompressionMode::C32_2x2,
            tile_pitch: 64,
            offset_x: 0,
            offset_y: 0,
            data: &mut buf,
        };
        region.write_row(0, &[0xAAAA_AAAA, 0xBBBB_BBBB]);
        let mut out = [0u32; 2];
        region.read_row(0, &mut out);
        assert_eq!(out, [0xAAAA_AAAA, 0xBBBB_BBBB]);
    }

    #[test]
    fn unknown_mode_rejected() {
        assert!(matches!(
            CompressionMode::from_raw(9),
            Err(CompressionError::UnsupportedCompression { raw: 9 })
        ));
    }
}
