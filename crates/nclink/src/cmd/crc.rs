use comfy_table::{presets::UTF8_FULL, ContentArrangement, Table};
use nclink_bus::crc::{crc16, crc7};
use serde::Serialize;

use crate::cmd::{parse_hex, CrcArgs};
use crate::exit::{CliResult, SUCCESS};
use crate::output::OutputFormat;

#[derive(Serialize)]
struct CrcOutput {
    length: usize,
    crc7: String,
    crc16: String,
}

pub fn run(args: CrcArgs, format: OutputFormat) -> CliResult<i32> {
    let bytes = parse_hex(&args.hex)?;
    let output = CrcOutput {
        length: bytes.len(),
        crc7: format!("0x{:02x}", crc7(&bytes)),
        crc16: format!("0x{:04x}", crc16(&bytes)),
    };

    match format {
        OutputFormat::Json => println!(
            "{}",
            serde_json::to_string(&output).unwrap_or_else(|_| "{}".to_string())
        ),
        OutputFormat::Table => {
            let mut table = Table::new();
            table
                .load_preset(UTF8_FULL)
                .set_content_arrangement(ContentArrangement::Dynamic)
                .set_header(vec!["BYTES", "CRC7", "CRC16"])
                .add_row(vec![
                    output.length.to_string(),
                    output.crc7.clone(),
                    output.crc16.clone(),
                ]);
            println!("{table}");
        }
        OutputFormat::Pretty => {
            println!(
                "{} bytes crc7={} crc16={}",
                output.length, output.crc7, output.crc16
            );
        }
    }
    Ok(SUCCESS)
}
