//! CRC command implementation.

use anyhow::Result;

use crate::CliError;

/// Parse hex bytes, ignoring an optional `0x` prefix and common separators.
pub(crate) fn parse_hex_bytes(input: &str) -> Result<Vec<u8>, CliError> {
    let digits: String = input
        .trim()
        .trim_start_matches("0x")
        .trim_start_matches("0X")
        .chars()
        .filter(|c| !matches!(c, ' ' | ':' | '-' | '_' | ','))
        .collect();

    if let Some(c) = digits.chars().find(|c| !c.is_ascii_hexdigit()) {
        return Err(CliError::Usage(format!("invalid hex digit '{c}'")));
    }
    if digits.len() % 2 != 0 {
        return Err(CliError::Usage(format!(
            "hex input has an odd number of digits ({})",
            digits.len()
        )));
    }

    (0..digits.len())
        .step_by(2)
        .map(|i| {
            u8::from_str_radix(&digits[i..i + 2], 16)
                .map_err(|e| CliError::Usage(format!("invalid hex byte: {e}")))
        })
        .collect()
}

/// CRC command implementation.
pub(crate) fn cmd_crc(hex: &str) -> Result<()> {
    let bytes = parse_hex_bytes(hex)?;
    println!("0x{:04X}", bleota::checksum(&bytes));
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_hex_bytes_with_separators() {
        assert_eq!(parse_hex_bytes("0x0102ff").unwrap(), vec![1, 2, 0xFF]);
        assert_eq!(parse_hex_bytes("31 32:33-34").unwrap(), b"1234".to_vec());
        assert!(parse_hex_bytes("").unwrap().is_empty());
    }

    #[test]
    fn test_parse_hex_bytes_rejects_bad_input() {
        assert!(matches!(parse_hex_bytes("123"), Err(CliError::Usage(_))));
        assert!(matches!(parse_hex_bytes("zz"), Err(CliError::Usage(_))));
        assert!(matches!(parse_hex_bytes("aé1"), Err(CliError::Usage(_))));
    }

    #[test]
    fn test_check_vector() {
        let bytes = parse_hex_bytes("313233343536373839").unwrap();
        assert_eq!(bleota::checksum(&bytes), 0x31C3);
    }
}
