// SPDX-FileCopyrightText: Copyright (c) 2017-2024 slowtec GmbH <post@slowtec.de>
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Packing and unpacking of coil states
//!
//! Coil and discrete-input sequences travel packed eight per byte, where
//! item `i` occupies bit `i % 8` of byte `i / 8`. Trailing bits of the
//! last byte are zero.

use super::Coil;

/// Number of bytes required to transfer `bit_count` packed coils.
pub(crate) const fn packed_len(bit_count: usize) -> usize {
    (bit_count + 7) / 8
}

/// Pack a sequence of coil states into wire bytes.
pub(crate) fn pack_coils(coils: &[Coil]) -> Vec<u8> {
    let mut packed = vec![0; packed_len(coils.len())];
    for (i, coil) in coils.iter().enumerate() {
        if *coil {
            packed[i / 8] |= 1 << (i % 8);
        }
    }
    packed
}

/// Unpack `count` coil states from wire bytes.
///
/// The caller must have verified that `bytes` holds at least
/// `packed_len(count)` bytes.
pub(crate) fn unpack_coils(bytes: &[u8], count: u16) -> Vec<Coil> {
    (0..usize::from(count))
        .map(|i| (bytes[i / 8] >> (i % 8)) & 0b1 != 0)
        .collect()
}

/// The wire representation of a single coil state.
pub(crate) const fn coil_to_u16(coil: Coil) -> u16 {
    if coil {
        0xFF00
    } else {
        0x0000
    }
}

/// Map the wire representation of a single coil state.
///
/// Any value other than `0xFF00` and `0x0000` is invalid.
pub(crate) const fn u16_to_coil(value: u16) -> Option<Coil> {
    match value {
        0xFF00 => Some(true),
        0x0000 => Some(false),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn convert_coil_to_u16() {
        assert_eq!(coil_to_u16(true), 0xFF00);
        assert_eq!(coil_to_u16(false), 0x0000);
    }

    #[test]
    fn convert_u16_to_coil() {
        assert_eq!(u16_to_coil(0xFF00), Some(true));
        assert_eq!(u16_to_coil(0x0000), Some(false));
        assert_eq!(u16_to_coil(0x00FF), None);
        assert_eq!(u16_to_coil(0x0001), None);
    }

    #[test]
    fn pack_some_coils() {
        assert_eq!(pack_coils(&[]), &[]);
        assert_eq!(pack_coils(&[true]), &[0b_1]);
        assert_eq!(pack_coils(&[false]), &[0b_0]);
        assert_eq!(pack_coils(&[true, false]), &[0b_01]);
        assert_eq!(pack_coils(&[false, true]), &[0b_10]);
        assert_eq!(pack_coils(&[true, true]), &[0b_11]);
        assert_eq!(pack_coils(&[true; 8]), &[0b_1111_1111]);
        assert_eq!(pack_coils(&[true; 9]), &[255, 1]);
        assert_eq!(pack_coils(&[false; 8]), &[0]);
        assert_eq!(pack_coils(&[false; 9]), &[0, 0]);
    }

    #[test]
    fn unpack_some_coils() {
        assert_eq!(unpack_coils(&[], 0), &[]);
        assert_eq!(unpack_coils(&[0b1], 1), &[true]);
        assert_eq!(unpack_coils(&[0b01], 2), &[true, false]);
        assert_eq!(unpack_coils(&[0b10], 2), &[false, true]);
        assert_eq!(
            unpack_coils(&[0xff, 0b11], 10),
            &[true, true, true, true, true, true, true, true, true, true]
        );
    }

    #[test]
    fn pack_unpack_roundtrip() {
        let coils: Vec<Coil> = (0..2000).map(|i| i % 3 == 0).collect();
        let packed = pack_coils(&coils);
        assert_eq!(packed.len(), 250);
        assert_eq!(unpack_coils(&packed, 2000), coils);
    }
}
