use clap::{Args, Subcommand};

use crate::exit::{usage_error, CliResult};
use crate::output::OutputFormat;

mod catalog;
mod crc;
mod decode;
mod version;

#[derive(Subcommand)]
pub enum Command {
    /// Print version and build information
    Version(VersionArgs),
    /// Decode a hex dump of TLV parameter elements or a full wire message
    Decode(DecodeArgs),
    /// Compute bus checksums (CRC7 and CRC16-CCITT) over hex bytes
    Crc(CrcArgs),
    /// List the command and status catalogues
    Catalog(CatalogArgs),
}

#[derive(Args)]
pub struct VersionArgs {
    /// Include build metadata and enabled features
    #[arg(long)]
    pub extended: bool,
}

#[derive(Args)]
pub struct DecodeArgs {
    /// Hex bytes, with or without whitespace (e.g. "02 00 00 02 1f 90 00 00")
    pub hex: String,

    /// Treat the input as a full wire message with an 8-byte header
    #[arg(long, conflicts_with = "count")]
    pub message: bool,

    /// Number of TLV elements to decode (default: walk the whole buffer)
    #[arg(long)]
    pub count: Option<usize>,
}

#[derive(Args)]
pub struct CrcArgs {
    /// Hex bytes to checksum
    pub hex: String,
}

#[derive(Args)]
pub struct CatalogArgs {
    /// List only the command table
    #[arg(long, conflicts_with = "statuses")]
    pub commands: bool,

    /// List only the status table
    #[arg(long)]
    pub statuses: bool,
}

pub fn run(command: Command, format: OutputFormat) -> CliResult<i32> {
    match command {
        Command::Version(args) => version::run(args),
        Command::Decode(args) => decode::run(args, format),
        Command::Crc(args) => crc::run(args, format),
        Command::Catalog(args) => catalog::run(args, format),
    }
}

/// Parse a hex string, ignoring whitespace and `0x` prefixes.
pub fn parse_hex(input: &str) -> CliResult<Vec<u8>> {
    let cleaned: String = input
        .split_whitespace()
        .map(|tok| tok.strip_prefix("0x").unwrap_or(tok))
        .collect();
    if cleaned.is_empty() {
        return Err(usage_error("no hex bytes given"));
    }
    if cleaned.len() % 2 != 0 {
        return Err(usage_error("odd number of hex digits"));
    }

    let mut out = Vec::with_capacity(cleaned.len() / 2);
    let digits = cleaned.as_bytes();
    for pair in digits.chunks_exact(2) {
        let hi = hex_digit(pair[0])?;
        let lo = hex_digit(pair[1])?;
        out.push((hi << 4) | lo);
    }
    Ok(out)
}

fn hex_digit(ch: u8) -> CliResult<u8> {
    match ch {
        b'0'..=b'9' => Ok(ch - b'0'),
        b'a'..=b'f' => Ok(ch - b'a' + 10),
        b'A'..=b'F' => Ok(ch - b'A' + 10),
        other => Err(usage_error(format!(
            "invalid hex digit {:?}",
            char::from(other)
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_hex_accepts_spacing_and_prefixes() {
        assert_eq!(
            parse_hex("0x01 0203  ff").expect("hex should parse"),
            vec![0x01, 0x02, 0x03, 0xff]
        );
    }

    #[test]
    fn test_parse_hex_rejects_odd_length() {
        assert!(parse_hex("abc").is_err());
    }

    #[test]
    fn test_parse_hex_rejects_garbage() {
        assert!(parse_hex("zz").is_err());
    }
}
