//! P9813 frame encoding
//!
//! A P9813 transaction is a 32-bit zero start frame, one 32-bit data word per
//! chip in the chain, and a 32-bit zero end frame that latches the new values.
//! Each data word is `[flag, blue, green, red]` where the flag byte carries
//! two fixed high bits followed by the inverted top two bits of blue, green
//! and red. The chip silently ignores words whose flag does not check out.

use serde::{Deserialize, Serialize};

/// Fixed high bits of every data word's flag byte
const FLAG_BITS: u8 = 0b11_00_00_00;
const FRAME_START: [u8; 4] = [0x00, 0x00, 0x00, 0x00];
const FRAME_END: [u8; 4] = [0x00, 0x00, 0x00, 0x00];

/// Bytes per chip data word
pub const WORD_LEN: usize = 4;

/// Channels driven by one chip
pub const CHANNEL_COUNT: usize = 3;

/// An RGB value for one chip
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Color {
    pub r: u8,
    pub g: u8,
    pub b: u8,
}

impl Color {
    pub const OFF: Color = Color::new(0, 0, 0);

    pub const fn new(r: u8, g: u8, b: u8) -> Self {
        Color { r, g, b }
    }

    /// Intensity of channel `index` (0 = red, 1 = green, 2 = blue)
    pub fn channel(&self, index: usize) -> Option<u8> {
        match index {
            0 => Some(self.r),
            1 => Some(self.g),
            2 => Some(self.b),
            _ => None,
        }
    }

    /// Copy of this color with channel `index` replaced.
    /// Out-of-range indices leave the color unchanged.
    pub fn with_channel(mut self, index: usize, intensity: u8) -> Self {
        match index {
            0 => self.r = intensity,
            1 => self.g = intensity,
            2 => self.b = intensity,
            _ => {}
        }
        self
    }
}

impl From<(u8, u8, u8)> for Color {
    fn from((r, g, b): (u8, u8, u8)) -> Self {
        Color { r, g, b }
    }
}

/// Flag byte for one data word
pub fn flag_byte(color: Color) -> u8 {
    let b_bits = !(color.b >> 6) & 0b11;
    let g_bits = !(color.g >> 6) & 0b11;
    let r_bits = !(color.r >> 6) & 0b11;

    FLAG_BITS | (b_bits << 4) | (g_bits << 2) | r_bits
}

/// One complete on-wire transaction
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    bytes: Vec<u8>,
}

impl Frame {
    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// Number of chip data words carried
    pub fn chips(&self) -> usize {
        (self.bytes.len() - FRAME_START.len() - FRAME_END.len()) / WORD_LEN
    }

    /// Split the frame into pieces no longer than `max` bytes, in wire order
    pub fn chunks(&self, max: usize) -> std::slice::Chunks<'_, u8> {
        self.bytes.chunks(max.max(1))
    }
}

/// Encode a chain of colors, first element nearest the controller
pub fn encode(colors: &[Color]) -> Frame {
    let mut bytes =
        Vec::with_capacity(FRAME_START.len() + colors.len() * WORD_LEN + FRAME_END.len());

    bytes.extend_from_slice(&FRAME_START);
    for &color in colors {
        bytes.extend_from_slice(&[flag_byte(color), color.b, color.g, color.r]);
    }
    bytes.extend_from_slice(&FRAME_END);

    Frame { bytes }
}
