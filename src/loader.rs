//! Memory image loader
//!
//! Reads the text format common to Verilog memory initialisation
//! files: whitespace-separated tokens, where `@hhhh` moves the load
//! address and every other token is one hexadecimal byte stored at the
//! current address. A `#` starts a comment that runs to the end of the
//! line. Bytes addressed outside the memory are silently discarded.

use std::io::{self, BufRead};

use crate::memory::{Memory, MEMORY_SIZE};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum LoadError {
    #[error("failed reading the memory image: {0}")]
    Io(#[from] io::Error),
    #[error("bad byte token '{0}' in memory image")]
    BadByte(String),
    #[error("bad address token '@{0}' in memory image")]
    BadAddress(String),
}

/// If the line ends in a comment, remove it. If the result contains
/// any non-whitespace characters, return it as Some. Otherwise, return
/// None. (Covers empty lines and comment-only lines.)
fn get_non_comment(line: String) -> Option<String> {
    let without_comment = &line[0..line.find('#').unwrap_or(line.len())];
    if without_comment.trim().is_empty() {
        None
    } else {
        Some(without_comment.to_string())
    }
}

/// Load a memory image into memory from a reader
pub fn load_image<R: BufRead>(reader: R, memory: &mut Memory) -> Result<(), LoadError> {
    let mut address: u32 = 0;
    // A bare '@' takes its address from the following token
    let mut address_pending = false;
    for line in reader.lines() {
        let Some(line) = get_non_comment(line?) else {
            continue;
        };
        for token in line.split_whitespace() {
            if address_pending {
                address_pending = false;
                address = parse_address(token)?;
                continue;
            }
            if let Some(rest) = token.strip_prefix('@') {
                if rest.is_empty() {
                    address_pending = true;
                } else {
                    address = parse_address(rest)?;
                }
                continue;
            }
            let byte = u8::from_str_radix(token, 16)
                .map_err(|_| LoadError::BadByte(token.to_string()))?;
            if (address as usize) < MEMORY_SIZE {
                memory.set_byte(address, byte);
                address += 1;
            }
        }
    }
    Ok(())
}

fn parse_address(token: &str) -> Result<u32, LoadError> {
    u32::from_str_radix(token, 16).map_err(|_| LoadError::BadAddress(token.to_string()))
}

#[cfg(test)]
mod tests {

    use super::*;
    use crate::memory::Wordsize;

    fn load_str(text: &str) -> Memory {
        let mut memory = Memory::new();
        load_image(text.as_bytes(), &mut memory).unwrap();
        memory
    }

    #[test]
    fn check_bytes_load_at_successive_addresses() {
        let memory = load_str("13 05 f0 0f");
        assert_eq!(memory.read(0, Wordsize::Word).unwrap(), 0x0ff00513);
    }

    #[test]
    fn check_address_directive() {
        let memory = load_str("@400 78 56 34 12");
        assert_eq!(memory.read(0x400, Wordsize::Word).unwrap(), 0x12345678);
        assert_eq!(memory.read(0, Wordsize::Word).unwrap(), 0);
    }

    #[test]
    fn check_detached_address_directive() {
        let memory = load_str("@ 10\nff fe");
        assert_eq!(memory.read(0x10, Wordsize::Byte).unwrap(), 0xff);
        assert_eq!(memory.read(0x11, Wordsize::Byte).unwrap(), 0xfe);
    }

    #[test]
    fn check_single_digit_bytes_and_comments() {
        let memory = load_str("# image header\n1 a 7f # trailing note\n");
        assert_eq!(memory.read(0, Wordsize::Byte).unwrap(), 0x1);
        assert_eq!(memory.read(1, Wordsize::Byte).unwrap(), 0xa);
        assert_eq!(memory.read(2, Wordsize::Byte).unwrap(), 0x7f);
    }

    #[test]
    fn check_out_of_range_bytes_are_discarded() {
        let top = MEMORY_SIZE as u32 - 1;
        let memory = load_str(&format!("@{top:x} aa bb cc"));
        assert_eq!(memory.read(top, Wordsize::Byte).unwrap(), 0xaa);
        // bb and cc fell outside memory and were dropped
    }

    #[test]
    fn check_bad_byte_token_is_reported() {
        let mut memory = Memory::new();
        let result = load_image("zz".as_bytes(), &mut memory);
        assert!(matches!(result, Err(LoadError::BadByte(_))));
    }
}
