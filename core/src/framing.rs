use crate::threshold::Level;
use crate::{DATA_SLOTS, IDLE_SLOTS};

/// Slot pattern of one character frame: preamble + 8 data slots + idle.
///
/// The preamble is a start marker only; the receiver does not match it and
/// relies on the shared slot count to know where the data slots sit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FrameLayout {
    preamble: Vec<Level>,
}

impl FrameLayout {
    pub fn new(preamble: Vec<Level>) -> Self {
        Self { preamble }
    }

    pub fn preamble(&self) -> &[Level] {
        &self.preamble
    }

    pub fn preamble_slots(&self) -> usize {
        self.preamble.len()
    }

    /// Frame slot index of data bit `k` (0 = MSB).
    pub fn data_slot(&self, k: usize) -> usize {
        self.preamble.len() + k
    }

    /// Data bit carried by frame slot `slot`, if any.
    pub fn data_bit_index(&self, slot: usize) -> Option<usize> {
        slot.checked_sub(self.preamble.len())
            .filter(|&k| k < DATA_SLOTS)
    }

    pub fn idle_slot(&self) -> usize {
        self.preamble.len() + DATA_SLOTS
    }

    /// Total slots a frame occupies, idle slot included.
    pub fn slot_count(&self) -> usize {
        self.preamble.len() + DATA_SLOTS + IDLE_SLOTS
    }
}

impl Default for FrameLayout {
    fn default() -> Self {
        Self::new(vec![Level::Low, Level::High])
    }
}

/// Bits of `byte`, most significant first.
pub fn bits_msb_first(byte: u8) -> [bool; 8] {
    let mut bits = [false; 8];
    for (i, bit) in bits.iter_mut().enumerate() {
        *bit = (byte >> (7 - i)) & 1 == 1;
    }
    bits
}

/// Big-endian interpretation of up to 8 bits.
pub fn byte_from_bits(bits: &[bool]) -> u8 {
    bits.iter()
        .take(8)
        .fold(0u8, |acc, &bit| (acc << 1) | bit as u8)
}

/// Bytes map to characters one-to-one (Latin-1).
pub fn byte_to_char(byte: u8) -> char {
    char::from(byte)
}

pub fn char_to_byte(c: char) -> Option<u8> {
    u8::try_from(u32::from(c)).ok()
}

/// Decoded bits waiting for a full byte.
///
/// Holds 0-7 bits between calls; the push that brings it to 8 returns the
/// byte and leaves it empty.
#[derive(Debug, Default, Clone)]
pub struct BitAccumulator {
    bits: Vec<bool>,
}

impl BitAccumulator {
    pub fn new() -> Self {
        Self {
            bits: Vec::with_capacity(8),
        }
    }

    pub fn push(&mut self, bit: bool) -> Option<u8> {
        self.bits.push(bit);
        if self.bits.len() == 8 {
            let byte = byte_from_bits(&self.bits);
            self.bits.clear();
            Some(byte)
        } else {
            None
        }
    }

    pub fn len(&self) -> usize {
        self.bits.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bits.is_empty()
    }

    pub fn clear(&mut self) {
        self.bits.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bits_of_h() {
        let bits = bits_msb_first(b'H');
        assert_eq!(bits, [false, true, false, false, true, false, false, false]);
        assert_eq!(byte_from_bits(&bits), b'H');
    }

    #[test]
    fn test_accumulator_flushes_at_eight() {
        let mut acc = BitAccumulator::new();
        let bits = bits_msb_first(0xA5);
        for &bit in &bits[..7] {
            assert_eq!(acc.push(bit), None);
        }
        assert_eq!(acc.len(), 7);
        assert_eq!(acc.push(bits[7]), Some(0xA5));
        assert!(acc.is_empty());
    }

    #[test]
    fn test_frame_layout_slots() {
        let layout = FrameLayout::default();
        assert_eq!(layout.preamble_slots(), 2);
        assert_eq!(layout.data_slot(0), 2);
        assert_eq!(layout.data_slot(7), 9);
        assert_eq!(layout.idle_slot(), 10);
        assert_eq!(layout.slot_count(), 11);

        assert_eq!(layout.data_bit_index(1), None);
        assert_eq!(layout.data_bit_index(2), Some(0));
        assert_eq!(layout.data_bit_index(9), Some(7));
        assert_eq!(layout.data_bit_index(10), None);
    }

    #[test]
    fn test_empty_preamble() {
        let layout = FrameLayout::new(Vec::new());
        assert_eq!(layout.data_slot(0), 0);
        assert_eq!(layout.slot_count(), 9);
    }

    #[test]
    fn test_char_mapping() {
        assert_eq!(char_to_byte('H'), Some(0x48));
        assert_eq!(char_to_byte('\u{e9}'), Some(0xE9));
        assert_eq!(char_to_byte('\u{263a}'), None);
        assert_eq!(byte_to_char(0xE9), '\u{e9}');
    }
}
