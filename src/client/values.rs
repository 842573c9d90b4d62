// SPDX-FileCopyrightText: Copyright (c) 2017-2024 slowtec GmbH <post@slowtec.de>
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Typed value accessors layered on register operations
//!
//! Multi-register values are assembled from 16-bit registers along two
//! independent axes: the byte order within each register and the word
//! order across registers. The pure Modbus convention is big-endian
//! bytes with the most significant word first.

use crate::{
    error::Result,
    frame::{Address, Word},
};

use super::{Context, Reader as _, Writer as _};

/// Byte ordering within each 16-bit register.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ByteOrder {
    /// Most significant byte first (pure Modbus).
    #[default]
    BigEndian,
    /// Least significant byte first.
    LittleEndian,
}

/// Which register of a multi-register value holds the most significant
/// word.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum WordOrder {
    /// The first register holds the most significant word (pure Modbus).
    #[default]
    HighWordFirst,
    /// The first register holds the least significant word.
    LowWordFirst,
}

const fn apply_byte_order(word: Word, byte_order: ByteOrder) -> Word {
    match byte_order {
        ByteOrder::BigEndian => word,
        ByteOrder::LittleEndian => word.swap_bytes(),
    }
}

pub(crate) fn u32_to_words(value: u32, byte_order: ByteOrder, word_order: WordOrder) -> [Word; 2] {
    let high = (value >> 16) as Word;
    let low = (value & 0xFFFF) as Word;
    let (first, second) = match word_order {
        WordOrder::HighWordFirst => (high, low),
        WordOrder::LowWordFirst => (low, high),
    };
    [
        apply_byte_order(first, byte_order),
        apply_byte_order(second, byte_order),
    ]
}

pub(crate) fn u32_from_words(words: [Word; 2], byte_order: ByteOrder, word_order: WordOrder) -> u32 {
    let first = apply_byte_order(words[0], byte_order);
    let second = apply_byte_order(words[1], byte_order);
    let (high, low) = match word_order {
        WordOrder::HighWordFirst => (first, second),
        WordOrder::LowWordFirst => (second, first),
    };
    u32::from(high) << 16 | u32::from(low)
}

pub(crate) fn u64_to_words(value: u64, byte_order: ByteOrder, word_order: WordOrder) -> [Word; 4] {
    let mut words = [
        (value >> 48) as Word,
        (value >> 32) as Word,
        (value >> 16) as Word,
        (value & 0xFFFF) as Word,
    ];
    if word_order == WordOrder::LowWordFirst {
        words.reverse();
    }
    for word in &mut words {
        *word = apply_byte_order(*word, byte_order);
    }
    words
}

pub(crate) fn u64_from_words(words: [Word; 4], byte_order: ByteOrder, word_order: WordOrder) -> u64 {
    let mut words = words.map(|word| apply_byte_order(word, byte_order));
    if word_order == WordOrder::LowWordFirst {
        words.reverse();
    }
    words
        .into_iter()
        .fold(0, |acc, word| acc << 16 | u64::from(word))
}

/// Bytes travel packed two per register. Under big-endian byte order
/// byte `2i` occupies the most significant half of register `i`, under
/// little-endian the least significant half.
pub(crate) fn bytes_to_words(bytes: &[u8], byte_order: ByteOrder) -> Vec<Word> {
    bytes
        .chunks(2)
        .map(|chunk| {
            let first = chunk[0];
            let second = chunk.get(1).copied().unwrap_or(0);
            apply_byte_order(u16::from_be_bytes([first, second]), byte_order)
        })
        .collect()
}

pub(crate) fn words_to_bytes(words: &[Word], byte_order: ByteOrder) -> Vec<u8> {
    words
        .iter()
        .flat_map(|word| apply_byte_order(*word, byte_order).to_be_bytes())
        .collect()
}

fn words_pair(words: &[Word]) -> [Word; 2] {
    [words[0], words[1]]
}

fn words_quad(words: &[Word]) -> [Word; 4] {
    [words[0], words[1], words[2], words[3]]
}

/// Typed accessors for 32/64-bit integers, IEEE-754 floats, byte
/// sequences and strings. All of them respect the context's configured
/// [`ByteOrder`] and [`WordOrder`] and reduce to plain register
/// operations on the wire.
impl Context {
    /// Read an `u32` from two holding registers.
    pub async fn read_u32(&mut self, addr: Address) -> Result<u32> {
        let words = self.read_holding_registers(addr, 2).await?;
        Ok(u32_from_words(
            words_pair(&words),
            self.byte_order,
            self.word_order,
        ))
    }

    /// Read an `u32` from two input registers.
    pub async fn read_input_u32(&mut self, addr: Address) -> Result<u32> {
        let words = self.read_input_registers(addr, 2).await?;
        Ok(u32_from_words(
            words_pair(&words),
            self.byte_order,
            self.word_order,
        ))
    }

    /// Write an `u32` to two holding registers.
    pub async fn write_u32(&mut self, addr: Address, value: u32) -> Result<()> {
        let words = u32_to_words(value, self.byte_order, self.word_order);
        self.write_multiple_registers(addr, &words).await
    }

    /// Read an `i32` from two holding registers.
    pub async fn read_i32(&mut self, addr: Address) -> Result<i32> {
        Ok(self.read_u32(addr).await? as i32)
    }

    /// Read an `i32` from two input registers.
    pub async fn read_input_i32(&mut self, addr: Address) -> Result<i32> {
        Ok(self.read_input_u32(addr).await? as i32)
    }

    /// Write an `i32` to two holding registers.
    pub async fn write_i32(&mut self, addr: Address, value: i32) -> Result<()> {
        self.write_u32(addr, value as u32).await
    }

    /// Read an `u64` from four holding registers.
    pub async fn read_u64(&mut self, addr: Address) -> Result<u64> {
        let words = self.read_holding_registers(addr, 4).await?;
        Ok(u64_from_words(
            words_quad(&words),
            self.byte_order,
            self.word_order,
        ))
    }

    /// Read an `u64` from four input registers.
    pub async fn read_input_u64(&mut self, addr: Address) -> Result<u64> {
        let words = self.read_input_registers(addr, 4).await?;
        Ok(u64_from_words(
            words_quad(&words),
            self.byte_order,
            self.word_order,
        ))
    }

    /// Write an `u64` to four holding registers.
    pub async fn write_u64(&mut self, addr: Address, value: u64) -> Result<()> {
        let words = u64_to_words(value, self.byte_order, self.word_order);
        self.write_multiple_registers(addr, &words).await
    }

    /// Read an `i64` from four holding registers.
    pub async fn read_i64(&mut self, addr: Address) -> Result<i64> {
        Ok(self.read_u64(addr).await? as i64)
    }

    /// Read an `i64` from four input registers.
    pub async fn read_input_i64(&mut self, addr: Address) -> Result<i64> {
        Ok(self.read_input_u64(addr).await? as i64)
    }

    /// Write an `i64` to four holding registers.
    pub async fn write_i64(&mut self, addr: Address, value: i64) -> Result<()> {
        self.write_u64(addr, value as u64).await
    }

    /// Read an `f32` from two holding registers.
    pub async fn read_f32(&mut self, addr: Address) -> Result<f32> {
        Ok(f32::from_bits(self.read_u32(addr).await?))
    }

    /// Read an `f32` from two input registers.
    pub async fn read_input_f32(&mut self, addr: Address) -> Result<f32> {
        Ok(f32::from_bits(self.read_input_u32(addr).await?))
    }

    /// Write an `f32` to two holding registers.
    pub async fn write_f32(&mut self, addr: Address, value: f32) -> Result<()> {
        self.write_u32(addr, value.to_bits()).await
    }

    /// Read an `f64` from four holding registers.
    pub async fn read_f64(&mut self, addr: Address) -> Result<f64> {
        Ok(f64::from_bits(self.read_u64(addr).await?))
    }

    /// Read an `f64` from four input registers.
    pub async fn read_input_f64(&mut self, addr: Address) -> Result<f64> {
        Ok(f64::from_bits(self.read_input_u64(addr).await?))
    }

    /// Write an `f64` to four holding registers.
    pub async fn write_f64(&mut self, addr: Address, value: f64) -> Result<()> {
        self.write_u64(addr, value.to_bits()).await
    }

    /// Read `count` bytes from holding registers, two bytes per
    /// register.
    pub async fn read_bytes(&mut self, addr: Address, count: u16) -> Result<Vec<u8>> {
        let quantity = count.div_ceil(2);
        let words = self.read_holding_registers(addr, quantity).await?;
        let mut bytes = words_to_bytes(&words, self.byte_order);
        bytes.truncate(count.into());
        Ok(bytes)
    }

    /// Write bytes to holding registers, two bytes per register. An
    /// odd number of bytes pads the last register with zero.
    pub async fn write_bytes(&mut self, addr: Address, bytes: &[u8]) -> Result<()> {
        let words = bytes_to_words(bytes, self.byte_order);
        self.write_multiple_registers(addr, &words).await
    }

    /// Read a string of up to `max_len` bytes, truncated at the first
    /// NUL byte.
    pub async fn read_string(&mut self, addr: Address, max_len: u16) -> Result<String> {
        let mut bytes = self.read_bytes(addr, max_len).await?;
        if let Some(nul) = bytes.iter().position(|&byte| byte == 0) {
            bytes.truncate(nul);
        }
        Ok(String::from_utf8_lossy(&bytes).into_owned())
    }

    /// Write a string to holding registers.
    pub async fn write_string(&mut self, addr: Address, value: &str) -> Result<()> {
        self.write_bytes(addr, value.as_bytes()).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn u32_layout_big_endian_high_word_first() {
        assert_eq!(
            u32_to_words(0x1234_5678, ByteOrder::BigEndian, WordOrder::HighWordFirst),
            [0x1234, 0x5678]
        );
    }

    #[test]
    fn u32_layout_low_word_first() {
        assert_eq!(
            u32_to_words(0x1234_5678, ByteOrder::BigEndian, WordOrder::LowWordFirst),
            [0x5678, 0x1234]
        );
    }

    #[test]
    fn u32_layout_little_endian_swaps_within_words_only() {
        // Byte order swaps the bytes of each 16-bit word but leaves
        // the word sequence unchanged.
        assert_eq!(
            u32_to_words(
                0x1234_5678,
                ByteOrder::LittleEndian,
                WordOrder::HighWordFirst
            ),
            [0x3412, 0x7856]
        );
        assert_eq!(
            u32_to_words(
                0x1234_5678,
                ByteOrder::LittleEndian,
                WordOrder::LowWordFirst
            ),
            [0x7856, 0x3412]
        );
    }

    #[test]
    fn u64_layout() {
        assert_eq!(
            u64_to_words(
                0x0123_4567_89AB_CDEF,
                ByteOrder::BigEndian,
                WordOrder::HighWordFirst
            ),
            [0x0123, 0x4567, 0x89AB, 0xCDEF]
        );
        assert_eq!(
            u64_to_words(
                0x0123_4567_89AB_CDEF,
                ByteOrder::BigEndian,
                WordOrder::LowWordFirst
            ),
            [0xCDEF, 0x89AB, 0x4567, 0x0123]
        );
    }

    #[test]
    fn value_roundtrips_all_orders() {
        for byte_order in [ByteOrder::BigEndian, ByteOrder::LittleEndian] {
            for word_order in [WordOrder::HighWordFirst, WordOrder::LowWordFirst] {
                let words = u32_to_words(0xDEAD_BEEF, byte_order, word_order);
                assert_eq!(u32_from_words(words, byte_order, word_order), 0xDEAD_BEEF);
                let words = u64_to_words(0x0123_4567_89AB_CDEF, byte_order, word_order);
                assert_eq!(
                    u64_from_words(words, byte_order, word_order),
                    0x0123_4567_89AB_CDEF
                );
            }
        }
    }

    #[test]
    fn f32_bit_pattern() {
        // 25.0 in IEEE 754 is 0x41C80000.
        let words = u32_to_words(
            25.0f32.to_bits(),
            ByteOrder::BigEndian,
            WordOrder::HighWordFirst,
        );
        assert_eq!(words, [0x41C8, 0x0000]);
    }

    #[test]
    fn byte_packing() {
        // Byte 2i sits at the MSB of register i under big-endian byte
        // order, at the LSB under little-endian.
        assert_eq!(
            bytes_to_words(&[0x41, 0x42, 0x43], ByteOrder::BigEndian),
            vec![0x4142, 0x4300]
        );
        assert_eq!(
            bytes_to_words(&[0x41, 0x42, 0x43], ByteOrder::LittleEndian),
            vec![0x4241, 0x0043]
        );
        assert_eq!(
            words_to_bytes(&[0x4142, 0x4300], ByteOrder::BigEndian),
            vec![0x41, 0x42, 0x43, 0x00]
        );
        assert_eq!(
            words_to_bytes(&[0x4241, 0x0043], ByteOrder::LittleEndian),
            vec![0x41, 0x42, 0x43, 0x00]
        );
    }

    #[test]
    fn bytes_roundtrip() {
        let bytes = b"slowtec!".to_vec();
        for byte_order in [ByteOrder::BigEndian, ByteOrder::LittleEndian] {
            let words = bytes_to_words(&bytes, byte_order);
            assert_eq!(words_to_bytes(&words, byte_order), bytes);
        }
    }
}
