//! Bit-level signal codec
//!
//! Extracts and packs physical signal values from raw payload bytes given a
//! signal's layout. This is the per-frame hot path: out-of-range reads
//! degrade to 0 and multiplex mismatches report "no value" — nothing here
//! allocates or returns an error.

use crate::dbc::{Message, Signal};

/// Extract the raw (unscaled) integer value of a signal
///
/// Walks payload bytes from the signal's msb byte toward its lsb byte
/// (downward for little-endian, upward for big-endian), clipping each byte
/// to the valid sub-range and accumulating MSB-first. Reads past the end of
/// `data` contribute nothing, so a signal laid out beyond the payload
/// decodes to 0.
pub fn get_raw_value(data: &[u8], sig: &Signal) -> i64 {
    let mut ret: i64 = 0;
    let mut i = (sig.msb / 8) as i64;
    let mut bits = sig.size as i64;
    while i >= 0 && (i as usize) < data.len() && bits > 0 {
        let byte = i as usize;
        let lsb = if (sig.lsb / 8) as usize == byte {
            sig.lsb % 8
        } else {
            0
        };
        let msb = if (sig.msb / 8) as usize == byte {
            sig.msb % 8
        } else {
            7
        };
        let width = (msb - lsb + 1) as i64;
        let chunk = ((data[byte] >> lsb) as u64) & ((1u64 << width) - 1);
        ret |= (chunk << (bits - width)) as i64;
        bits -= width;
        i += if sig.is_little_endian { -1 } else { 1 };
    }
    // A full 64-bit read is already sign-complete
    if sig.is_signed && sig.size > 0 && sig.size < 64 {
        let sign_bit = 1i64 << (sig.size - 1);
        ret |= -(ret & sign_bit);
    }
    ret
}

/// Decode a signal to its physical value
pub fn decode(data: &[u8], sig: &Signal) -> f64 {
    get_raw_value(data, sig) as f64 * sig.factor + sig.offset
}

/// Decode a signal honoring multiplexing
///
/// For a Multiplexed signal, the linked Multiplexor is decoded first and
/// compared against the signal's selector; a mismatch yields `None` rather
/// than an error.
pub fn get_value(data: &[u8], msg: &Message, sig: &Signal) -> Option<f64> {
    if let Some(mux_idx) = sig.multiplexor {
        let mux = msg.signals.get(mux_idx)?;
        if get_raw_value(data, mux) != sig.multiplex_value {
            return None;
        }
    }
    Some(decode(data, sig))
}

/// Pack a physical value into the payload, the algebraic inverse of
/// `decode`. Bits outside the payload are dropped, mirroring the read path.
pub fn encode(data: &mut [u8], sig: &Signal, value: f64) {
    let raw = ((value - sig.offset) / sig.factor).round() as i64;
    let raw = if sig.size >= 64 {
        raw as u64
    } else {
        (raw as u64) & ((1u64 << sig.size) - 1)
    };

    let mut i = (sig.msb / 8) as i64;
    let mut bits = sig.size as i64;
    while i >= 0 && (i as usize) < data.len() && bits > 0 {
        let byte = i as usize;
        let lsb = if (sig.lsb / 8) as usize == byte {
            sig.lsb % 8
        } else {
            0
        };
        let msb = if (sig.msb / 8) as usize == byte {
            sig.msb % 8
        } else {
            7
        };
        let width = (msb - lsb + 1) as i64;
        let mask = ((1u16 << width) - 1) as u8;
        let chunk = ((raw >> (bits - width)) as u8) & mask;
        data[byte] = (data[byte] & !(mask << lsb)) | (chunk << lsb);
        bits -= width;
        i += if sig.is_little_endian { -1 } else { 1 };
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dbc::SignalType;

    fn le_signal(start_bit: u32, size: u32) -> Signal {
        Signal::new("S", start_bit, size)
    }

    fn be_signal(start_bit: u32, size: u32) -> Signal {
        let mut sig = Signal::new("S", start_bit, size);
        sig.is_little_endian = false;
        sig.update_derived(0);
        sig
    }

    #[test]
    fn test_little_endian_cross_byte() {
        let data = [0xAB, 0xCD, 0xEF, 0x12];
        assert_eq!(get_raw_value(&data, &le_signal(0, 16)), 0xCDAB);
        assert_eq!(get_raw_value(&data, &le_signal(0, 8)), 0xAB);
    }

    #[test]
    fn test_big_endian_cross_byte() {
        let data = [0xAB, 0xCD, 0xEF, 0x12];
        assert_eq!(get_raw_value(&data, &be_signal(7, 16)), 0xABCD);
        assert_eq!(get_raw_value(&data, &be_signal(7, 8)), 0xAB);
    }

    #[test]
    fn test_sub_byte_extraction() {
        // 4 bits at bit 4 of byte 0
        let data = [0xA5];
        assert_eq!(get_raw_value(&data, &le_signal(4, 4)), 0x0A);
        assert_eq!(get_raw_value(&data, &le_signal(0, 4)), 0x05);
    }

    #[test]
    fn test_sign_extension() {
        let mut sig = le_signal(0, 8);
        sig.is_signed = true;
        assert_eq!(get_raw_value(&[0xFF], &sig), -1);
        assert_eq!(get_raw_value(&[0x7F], &sig), 127);

        let mut sig16 = le_signal(0, 16);
        sig16.is_signed = true;
        assert_eq!(get_raw_value(&[0x00, 0x80], &sig16), -32768);
    }

    #[test]
    fn test_out_of_range_decodes_to_zero() {
        let data = [0xFF, 0xFF];
        let sig = le_signal(32, 8); // byte 4, beyond the payload
        assert_eq!(get_raw_value(&data, &sig), 0);
        assert_eq!(decode(&data, &sig), 0.0);
    }

    #[test]
    fn test_speed_example() {
        // SPEED: start 0, 16 bits LE, factor 0.01 => payload 0x2710 = 100.00
        let mut sig = Signal::new("SPEED", 0, 16);
        sig.factor = 0.01;
        sig.update_derived(0);
        let data = [0x10, 0x27, 0, 0, 0, 0, 0, 0];
        let value = decode(&data, &sig);
        assert!((value - 100.0).abs() < 1e-9);
    }

    #[test]
    fn test_factor_offset() {
        let mut sig = le_signal(0, 8);
        sig.factor = 0.5;
        sig.offset = -40.0;
        assert_eq!(decode(&[200], &sig), 60.0);
    }

    #[test]
    fn test_multiplexed_no_value() {
        let mut msg = Message::new(0x100, "MUXED", 8);
        let mut mux = Signal::new("MUX", 0, 8);
        mux.signal_type = SignalType::Multiplexor;
        let mut speed = Signal::new("SPEED", 8, 16);
        speed.signal_type = SignalType::Multiplexed;
        speed.multiplex_value = 0;
        msg.signals = vec![mux, speed];
        msg.update();

        let speed = msg.signal("SPEED").unwrap();
        // MUX decodes to 1, SPEED is m0 -> no value
        let data = [0x01, 0x10, 0x27, 0, 0, 0, 0, 0];
        assert_eq!(get_value(&data, &msg, speed), None);
        // MUX decodes to 0 -> value present
        let data = [0x00, 0x10, 0x27, 0, 0, 0, 0, 0];
        assert_eq!(get_value(&data, &msg, speed), Some(10000.0));
        // Non-multiplexed signals always decode
        let mux = msg.multiplexor_signal().unwrap();
        assert_eq!(get_value(&data, &msg, mux), Some(0.0));
    }

    #[test]
    fn test_encode_decode_round_trip_le() {
        let mut sig = Signal::new("S", 4, 12);
        sig.factor = 0.25;
        sig.offset = -10.0;
        sig.update_derived(0);

        let mut data = [0u8; 8];
        encode(&mut data, &sig, 333.25);
        let back = decode(&data, &sig);
        assert!((back - 333.25).abs() <= sig.factor);
    }

    #[test]
    fn test_encode_decode_round_trip_be() {
        let mut sig = Signal::new("S", 7, 10);
        sig.is_little_endian = false;
        sig.is_signed = true;
        sig.factor = 0.5;
        sig.update_derived(0);

        let mut data = [0u8; 8];
        encode(&mut data, &sig, -100.5);
        let back = decode(&data, &sig);
        assert!((back - -100.5).abs() <= sig.factor);
    }

    #[test]
    fn test_encode_preserves_other_bits() {
        let sig = le_signal(8, 8);
        let mut data = [0xFF; 4];
        encode(&mut data, &sig, 0.0);
        assert_eq!(data, [0xFF, 0x00, 0xFF, 0xFF]);
    }
}
