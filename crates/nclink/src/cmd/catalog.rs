use comfy_table::{presets::UTF8_FULL, ContentArrangement, Table};
use nclink_proto::{CmdId, Status};
use serde::Serialize;

use crate::cmd::CatalogArgs;
use crate::exit::{CliResult, SUCCESS};
use crate::output::OutputFormat;

#[derive(Serialize)]
struct CommandEntry {
    id: String,
    name: &'static str,
    module: u8,
}

#[derive(Serialize)]
struct StatusEntry {
    code: u16,
    name: &'static str,
}

#[derive(Serialize)]
struct CatalogOutput {
    commands: Vec<CommandEntry>,
    statuses: Vec<StatusEntry>,
}

pub fn run(args: CatalogArgs, format: OutputFormat) -> CliResult<i32> {
    let commands = if args.statuses {
        Vec::new()
    } else {
        CmdId::all()
            .iter()
            .map(|cmd| CommandEntry {
                id: format!("0x{:04x}", cmd.0),
                name: cmd.name(),
                module: cmd.module(),
            })
            .collect()
    };
    let statuses = if args.commands {
        Vec::new()
    } else {
        Status::all()
            .iter()
            .map(|status| StatusEntry {
                code: status.0,
                name: status.name(),
            })
            .collect()
    };
    let output = CatalogOutput { commands, statuses };

    match format {
        OutputFormat::Json => println!(
            "{}",
            serde_json::to_string(&output).unwrap_or_else(|_| "{}".to_string())
        ),
        OutputFormat::Table => {
            if !output.commands.is_empty() {
                let mut table = Table::new();
                table
                    .load_preset(UTF8_FULL)
                    .set_content_arrangement(ContentArrangement::Dynamic)
                    .set_header(vec!["ID", "NAME", "MODULE"]);
                for cmd in &output.commands {
                    table.add_row(vec![
                        cmd.id.clone(),
                        cmd.name.to_string(),
                        format!("0x{:02x}", cmd.module),
                    ]);
                }
                println!("{table}");
            }
            if !output.statuses.is_empty() {
                let mut table = Table::new();
                table
                    .load_preset(UTF8_FULL)
                    .set_content_arrangement(ContentArrangement::Dynamic)
                    .set_header(vec!["CODE", "NAME"]);
                for status in &output.statuses {
                    table.add_row(vec![status.code.to_string(), status.name.to_string()]);
                }
                println!("{table}");
            }
        }
        OutputFormat::Pretty => {
            for cmd in &output.commands {
                println!("{} {}", cmd.id, cmd.name);
            }
            for status in &output.statuses {
                println!("{} {}", status.code, status.name);
            }
        }
    }
    Ok(SUCCESS)
}
