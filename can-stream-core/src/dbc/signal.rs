//! Signal definitions and bit layout
//!
//! A signal describes a bit-packed field inside a CAN message payload. The
//! DBC start bit uses sawtooth numbering; the derived `msb`/`lsb` positions
//! are absolute bit positions (byte-major, LSB-0 within each byte) that the
//! codec and the message byte mask both walk.

use serde::{Deserialize, Serialize};

/// Role of a signal within its message
///
/// A Multiplexor's decoded value selects which Multiplexed siblings are
/// valid in a given frame. At most one Multiplexor exists per message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SignalType {
    Normal,
    Multiplexed,
    Multiplexor,
}

impl SignalType {
    /// Sort rank used by `Message::update()`: Multiplexor first, then
    /// multiplex groups, then normal signals
    pub(crate) fn sort_rank(self) -> u8 {
        match self {
            SignalType::Multiplexor => 0,
            SignalType::Multiplexed => 1,
            SignalType::Normal => 2,
        }
    }
}

/// Colors cycled through for signal visualization, by sorted position
const SIGNAL_PALETTE: [(u8, u8, u8); 8] = [
    (0x1f, 0x77, 0xb4),
    (0xff, 0x7f, 0x0e),
    (0x2c, 0xa0, 0x2c),
    (0xd6, 0x27, 0x28),
    (0x94, 0x67, 0xbd),
    (0x8c, 0x56, 0x4b),
    (0xe3, 0x77, 0xc2),
    (0x7f, 0x7f, 0x7f),
];

/// A CAN signal definition
///
/// `msb`, `lsb`, `precision` and `color` are derived; callers mutate the
/// declared fields and the owning `Message::update()` recomputes the rest.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Signal {
    /// Signal name, unique within its message
    pub name: String,
    /// Role within the message
    pub signal_type: SignalType,
    /// Start bit in DBC sawtooth numbering
    pub start_bit: u32,
    /// Length in bits
    pub size: u32,
    /// Byte order (false = big-endian / Motorola)
    pub is_little_endian: bool,
    /// Two's-complement interpretation of the raw value
    pub is_signed: bool,
    /// Scale factor from raw to physical value
    pub factor: f64,
    /// Offset added after scaling
    pub offset: f64,
    /// Minimum physical value
    pub min: f64,
    /// Maximum physical value
    pub max: f64,
    /// Engineering unit (e.g. "km/h", "V"); empty if none
    pub unit: String,
    /// Receiver node name; empty if none
    pub receiver: String,
    /// Selector value for Multiplexed signals (m<k> in DBC)
    pub multiplex_value: i64,
    /// Index of the owning message's Multiplexor signal, if any.
    /// Lookup-only back-reference, recomputed on every structural change.
    pub multiplexor: Option<usize>,
    /// Derived: most significant bit position
    pub msb: u32,
    /// Derived: least significant bit position
    pub lsb: u32,
    /// Derived: display decimals, from the factor
    pub precision: usize,
    /// Derived: visualization color, from the sorted position
    pub color: (u8, u8, u8),
}

impl Signal {
    /// Create a signal with the given layout and default scaling
    pub fn new(name: impl Into<String>, start_bit: u32, size: u32) -> Self {
        let mut sig = Self {
            name: name.into(),
            signal_type: SignalType::Normal,
            start_bit,
            size,
            is_little_endian: true,
            is_signed: false,
            factor: 1.0,
            offset: 0.0,
            min: 0.0,
            max: 0.0,
            unit: String::new(),
            receiver: String::new(),
            multiplex_value: 0,
            multiplexor: None,
            msb: 0,
            lsb: 0,
            precision: 0,
            color: SIGNAL_PALETTE[0],
        };
        sig.update_derived(0);
        sig
    }

    /// Recompute msb/lsb, precision and color. `position` is the signal's
    /// index in the message's sorted signal list.
    pub(crate) fn update_derived(&mut self, position: usize) {
        let span = self.size.max(1) - 1;
        if self.is_little_endian {
            self.lsb = self.start_bit;
            self.msb = self.start_bit + span;
        } else {
            self.msb = self.start_bit;
            self.lsb = flip_bit_pos(flip_bit_pos(self.start_bit) + span);
        }
        self.precision = num_decimals(self.factor);
        self.color = SIGNAL_PALETTE[position % SIGNAL_PALETTE.len()];
    }

    /// Inclusive byte range occupied by this signal
    pub fn byte_range(&self) -> (usize, usize) {
        let a = (self.msb / 8) as usize;
        let b = (self.lsb / 8) as usize;
        (a.min(b), a.max(b))
    }
}

/// Mirror a bit position within its byte (sawtooth <-> linear numbering)
pub(crate) fn flip_bit_pos(pos: u32) -> u32 {
    8 * (pos / 8) + 7 - pos % 8
}

/// Number of decimals in the shortest representation of `x`
fn num_decimals(x: f64) -> usize {
    let text = format!("{}", x);
    text.split('.').nth(1).map_or(0, |frac| frac.len())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_flip_bit_pos() {
        assert_eq!(flip_bit_pos(0), 7);
        assert_eq!(flip_bit_pos(7), 0);
        assert_eq!(flip_bit_pos(8), 15);
        assert_eq!(flip_bit_pos(22), 17);
    }

    #[test]
    fn test_little_endian_msb_lsb() {
        let mut sig = Signal::new("SPEED", 0, 16);
        sig.update_derived(0);
        assert_eq!(sig.lsb, 0);
        assert_eq!(sig.msb, 15);
        assert_eq!(sig.byte_range(), (0, 1));
    }

    #[test]
    fn test_big_endian_msb_lsb() {
        // Motorola signal at sawtooth start bit 7, 16 bits: byte 0 then byte 1
        let mut sig = Signal::new("COUNTER", 7, 16);
        sig.is_little_endian = false;
        sig.update_derived(0);
        assert_eq!(sig.msb, 7);
        assert_eq!(sig.lsb, 8);
        assert_eq!(sig.byte_range(), (0, 1));
    }

    #[test]
    fn test_big_endian_single_byte() {
        let mut sig = Signal::new("FLAG", 7, 8);
        sig.is_little_endian = false;
        sig.update_derived(0);
        assert_eq!(sig.msb, 7);
        assert_eq!(sig.lsb, 0);
        assert_eq!(sig.byte_range(), (0, 0));
    }

    #[test]
    fn test_precision_from_factor() {
        let mut sig = Signal::new("V", 0, 16);
        sig.factor = 0.01;
        sig.update_derived(0);
        assert_eq!(sig.precision, 2);

        sig.factor = 1.0;
        sig.update_derived(0);
        assert_eq!(sig.precision, 0);

        sig.factor = 0.125;
        sig.update_derived(0);
        assert_eq!(sig.precision, 3);
    }

    #[test]
    fn test_palette_cycles() {
        let mut sig = Signal::new("A", 0, 8);
        sig.update_derived(0);
        let first = sig.color;
        sig.update_derived(SIGNAL_PALETTE.len());
        assert_eq!(sig.color, first);
        sig.update_derived(1);
        assert_ne!(sig.color, first);
    }
}
