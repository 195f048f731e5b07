//! Parsing of register and memory dumps printed by the debugger.
//!
//! Register dumps are sequences of `(NAME: HEX)` groups such as
//!
//! ```text
//!     ( PC: 0c000)  ( R4: 00000)  ( R8: 00000)  (R12: 00000)
//!     ( SP: 02400)  ( R5: 05a08)  ( R9: 0ffff)  (R13: 00000)
//! ```
//!
//! and memory dumps are rows of the form
//!
//! ```text
//!     02400: 31 40 00 24 b2 40 80 5a  |1@.$.@.Z|
//! ```

use std::collections::BTreeMap;

use lazy_static::lazy_static;
use regex::Regex;

use crate::{Error, Result};

lazy_static! {
    static ref REGISTER_RE: Regex =
        Regex::new(r"(?i)\(\s*(PC|SP|SR|R[0-9]+)\s*:\s*([0-9A-F]+)\s*\)")
            .expect("register pattern is valid");
    static ref MEMORY_ROW_RE: Regex =
        Regex::new(r"(?i)\s*([0-9A-F]+):([\s0-9A-F]+)\|.*\|").expect("memory pattern is valid");
    static ref ERROR_CODE_RE: Regex =
        Regex::new(r"\(error = ([0-9]+)\)").expect("error code pattern is valid");
}

/// Memory contents parsed from a dump.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MemoryDump {
    /// Address of the first row, if any row was found
    pub base: Option<u32>,
    /// Values of all rows, in order
    pub data: Vec<u32>,
}

/// Map a register name to its index: PC=0, SP=1, SR=2, R<n>=n.
pub fn register_index(name: &str) -> Result<usize> {
    let upper = name.to_ascii_uppercase();
    match upper.as_str() {
        "PC" => Ok(0),
        "SP" => Ok(1),
        "SR" => Ok(2),
        _ => upper
            .strip_prefix('R')
            .and_then(|n| n.parse().ok())
            .ok_or_else(|| Error::ParseError(format!("unknown register identifier: {name:?}"))),
    }
}

/// Parse a register dump into values ordered by register index.
///
/// The result holds one entry per register found, sorted by index; absent
/// registers leave no hole, so only index 0 (the program counter) has a fixed
/// position when the dump is complete.
pub fn parse_registers(text: &str) -> Result<Vec<u32>> {
    Ok(parse_register_map(text)?.into_values().collect())
}

/// Parse a register dump into values keyed by register index.
pub fn parse_register_map(text: &str) -> Result<BTreeMap<usize, u32>> {
    let mut registers = BTreeMap::new();
    for caps in REGISTER_RE.captures_iter(text) {
        let name = &caps[1];
        let index = register_index(name)?;
        let value = parse_hex(&caps[2])?;
        if registers.insert(index, value).is_some() {
            return Err(Error::ParseError(format!(
                "duplicate register {name:?} in {text:?}"
            )));
        }
    }
    Ok(registers)
}

/// Parse a row-oriented memory dump.
pub fn parse_memory(text: &str) -> Result<MemoryDump> {
    let mut base = None;
    let mut data = Vec::new();
    for caps in MEMORY_ROW_RE.captures_iter(text) {
        let address = parse_hex(&caps[1])?;
        base.get_or_insert(address);
        for value in caps[2].split_whitespace() {
            data.push(parse_hex(value)?);
        }
    }
    Ok(MemoryDump { base, data })
}

/// Find the last `(error = N)` code in debugger output.
pub fn extract_error_code(text: &str) -> Option<u32> {
    ERROR_CODE_RE
        .captures_iter(text)
        .last()
        .and_then(|caps| caps[1].parse().ok())
}

fn parse_hex(digits: &str) -> Result<u32> {
    u32::from_str_radix(digits, 16)
        .map_err(|e| Error::ParseError(format!("bad hex value {digits:?}: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_register_index() {
        assert_eq!(register_index("PC").unwrap(), 0);
        assert_eq!(register_index("sp").unwrap(), 1);
        assert_eq!(register_index("Sr").unwrap(), 2);
        assert_eq!(register_index("R15").unwrap(), 15);
        assert!(register_index("CG").is_err());
    }

    #[test]
    fn test_parse_registers_ordered_by_index() {
        let regs = parse_registers("(R4: 0001) (PC: 00AB) (SP: 0400)").unwrap();
        assert_eq!(regs, vec![0x00AB, 0x0400, 0x0001]);
    }

    #[test]
    fn test_parse_registers_full_dump() {
        let text = concat!(
            "    ( PC: 0c000)  ( R4: 00000)  ( R8: 00000)  (R12: 00000)\r\n",
            "    ( SP: 02400)  ( R5: 05a08)  ( R9: 0ffff)  (R13: 00000)\r\n",
            "    ( SR: 00000)  ( R6: 00000)  (R10: 00000)  (R14: 00000)\r\n",
            "    ( R3: 00000)  ( R7: 00000)  (R11: 00000)  (R15: 00012)\r\n",
            "main:\r\n",
            "    0c000: 31 40 00 24      MOV     #0x2400, SP\r\n",
        );
        let regs = parse_registers(text).unwrap();
        assert_eq!(regs.len(), 16);
        assert_eq!(regs[0], 0xc000);
        assert_eq!(regs[1], 0x2400);
        assert_eq!(regs[5], 0x5a08);
        assert_eq!(regs[15], 0x12);
    }

    #[test]
    fn test_parse_register_map_keeps_indices() {
        let regs = parse_register_map("(R4: 0001) (SP: 0400)").unwrap();
        assert_eq!(regs.get(&0), None);
        assert_eq!(regs.get(&1), Some(&0x0400));
        assert_eq!(regs.get(&4), Some(&0x0001));
    }

    #[test]
    fn test_parse_registers_duplicate() {
        let result = parse_registers("(PC: 1) (PC: 2)");
        assert!(matches!(result, Err(Error::ParseError(_))));
    }

    #[test]
    fn test_parse_registers_duplicate_across_case() {
        assert!(parse_registers("(pc: 1) (PC: 2)").is_err());
    }

    #[test]
    fn test_parse_registers_empty() {
        assert_eq!(parse_registers("no registers here").unwrap(), Vec::<u32>::new());
    }

    #[test]
    fn test_parse_memory_two_rows() {
        let text = concat!(
            "    02400: 31 40 00 24 b2 40 80 5a 5c 01 3f 40 00 00 0f 93 |1@.$.@.Z\\.?@....|\r\n",
            "    02410: 0a 24 2d 43                                     |.$-C|\r\n",
        );
        let dump = parse_memory(text).unwrap();
        assert_eq!(dump.base, Some(0x2400));
        assert_eq!(dump.data.len(), 20);
        assert_eq!(&dump.data[..4], &[0x31, 0x40, 0x00, 0x24]);
        assert_eq!(&dump.data[16..], &[0x0a, 0x24, 0x2d, 0x43]);
    }

    #[test]
    fn test_parse_memory_without_rows() {
        let dump = parse_memory("nothing to see").unwrap();
        assert_eq!(dump.base, None);
        assert!(dump.data.is_empty());
    }

    #[test]
    fn test_extract_last_error_code() {
        let log = "tilib: MSP430_Initialize: Interface Communication error (error = 35)\n\
                   tilib: device initialization failed (error = 57)\n";
        assert_eq!(extract_error_code(log), Some(57));
        assert_eq!(extract_error_code("clean exit"), None);
    }

    proptest! {
        /// Arbitrary debugger output never panics the parsers.
        #[test]
        fn parsers_never_panic(text in "\\PC{0,200}") {
            let _ = parse_registers(&text);
            let _ = parse_memory(&text);
            let _ = extract_error_code(&text);
        }

        /// Distinct registers always come back in index order.
        #[test]
        fn registers_sorted_by_index(
            values in proptest::collection::btree_map(3usize..16, any::<u16>(), 0..13)
        ) {
            let text: String = values
                .iter()
                .rev()
                .map(|(n, v)| format!("(R{n}: {v:05x}) "))
                .collect();
            let regs = parse_registers(&text).unwrap();
            let expected: Vec<u32> = values.values().map(|v| u32::from(*v)).collect();
            prop_assert_eq!(regs, expected);
        }
    }
}
