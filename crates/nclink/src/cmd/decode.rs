use bytes::Bytes;
use comfy_table::{presets::UTF8_FULL, ContentArrangement, Table};
use nclink_codec::{unpack_elements, ParamElem, TlvType, TLV_HEADER_SIZE};
use nclink_proto::{CmdId, MsgHeader, MsgKind, Status, MSG_HEADER_SIZE};
use serde::Serialize;

use crate::cmd::{parse_hex, DecodeArgs};
use crate::exit::{data_error, usage_error, CliResult, SUCCESS};
use crate::output::OutputFormat;

#[derive(Serialize)]
struct HeaderOutput {
    kind: String,
    id: String,
    seq: u16,
    arg: u16,
    count: u8,
    status: Option<String>,
}

#[derive(Serialize)]
struct ElementOutput {
    index: usize,
    r#type: String,
    length: usize,
    value: String,
}

#[derive(Serialize)]
struct DecodeOutput {
    header: Option<HeaderOutput>,
    elements: Vec<ElementOutput>,
}

pub fn run(args: DecodeArgs, format: OutputFormat) -> CliResult<i32> {
    let bytes = parse_hex(&args.hex)?;
    let output = if args.message {
        decode_message(&bytes)?
    } else {
        decode_elements(&bytes, args.count)?
    };
    print_decode(&output, format);
    Ok(SUCCESS)
}

fn decode_message(bytes: &[u8]) -> CliResult<DecodeOutput> {
    let hdr = MsgHeader::decode(bytes).map_err(|err| data_error("bad message header", err))?;
    let payload = &bytes[MSG_HEADER_SIZE..];

    let (status, elements) = match hdr.kind {
        MsgKind::Status => (Some(Status(hdr.arg).name().to_string()), Vec::new()),
        MsgKind::Req | MsgKind::Rsp | MsgKind::Event => {
            let elems = unpack_elements(usize::from(hdr.count), &Bytes::copy_from_slice(payload))
                .map_err(|err| data_error("bad element list", err))?;
            (None, render_elements(&elems))
        }
    };

    Ok(DecodeOutput {
        header: Some(HeaderOutput {
            kind: format!("{:?}", hdr.kind),
            id: id_name(hdr.kind, hdr.id),
            seq: hdr.seq,
            arg: hdr.arg,
            count: hdr.count,
            status,
        }),
        elements,
    })
}

fn decode_elements(bytes: &[u8], count: Option<usize>) -> CliResult<DecodeOutput> {
    let count = match count {
        Some(n) => n,
        None => walk_count(bytes)?,
    };
    let elems = unpack_elements(count, &Bytes::copy_from_slice(bytes))
        .map_err(|err| data_error("bad element list", err))?;
    Ok(DecodeOutput {
        header: None,
        elements: render_elements(&elems),
    })
}

/// Count the TLV elements in a buffer by walking the strides.
fn walk_count(bytes: &[u8]) -> CliResult<usize> {
    let mut off = 0;
    let mut count = 0;
    while off < bytes.len() {
        if bytes.len() - off < TLV_HEADER_SIZE {
            return Err(usage_error("trailing bytes do not form a TLV header"));
        }
        let len = usize::from(u16::from_be_bytes([bytes[off + 2], bytes[off + 3]]));
        let pad = usize::from(bytes[off + 1] & 0x03);
        off += TLV_HEADER_SIZE + len + pad;
        count += 1;
    }
    if off != bytes.len() {
        return Err(usage_error("last element overruns the buffer"));
    }
    Ok(count)
}

fn render_elements(elems: &[ParamElem]) -> Vec<ElementOutput> {
    elems
        .iter()
        .enumerate()
        .map(|(index, elem)| ElementOutput {
            index,
            r#type: format!("{:?}", elem.typ),
            length: elem.len(),
            value: render_value(elem),
        })
        .collect()
}

fn render_value(elem: &ParamElem) -> String {
    match elem.typ {
        TlvType::Integer => match elem.read_i32() {
            Ok(v) => v.to_string(),
            Err(_) => hex_string(&elem.data),
        },
        TlvType::IntegerUnsigned => match elem.read_u64() {
            Ok(v) => v.to_string(),
            Err(_) => hex_string(&elem.data),
        },
        TlvType::IntegerFrac => match elem.read_fract() {
            Ok(v) => format!("{}+{}/65536", v.i, v.f),
            Err(_) => hex_string(&elem.data),
        },
        TlvType::String => match elem.as_str() {
            Ok(s) => s.to_string(),
            Err(_) => hex_string(&elem.data),
        },
        TlvType::Bytes | TlvType::Invalid => hex_string(&elem.data),
    }
}

fn id_name(kind: MsgKind, id: u16) -> String {
    let name = match kind {
        MsgKind::Event => event_name(id),
        _ => CmdId(id).name(),
    };
    if name == "?" {
        format!("0x{id:04x}")
    } else {
        format!("{name} (0x{id:04x})")
    }
}

fn event_name(id: u16) -> &'static str {
    use nclink_proto::EventId;
    match EventId(id) {
        EventId::BOOT => "BOOT",
        EventId::SOCK_IND => "SOCK_IND",
        EventId::SOCK_RX_TCP => "SOCK_RX_TCP",
        EventId::SOCK_RX_UDP => "SOCK_RX_UDP",
        EventId::SOCK_CLOSED => "SOCK_CLOSED",
        EventId::SOCK_TLS => "SOCK_TLS",
        EventId::SOCK_ERROR => "SOCK_ERROR",
        EventId::DNS_RESOLVED => "DNS_RESOLVED",
        EventId::DNS_ERROR => "DNS_ERROR",
        _ => "?",
    }
}

fn hex_string(data: &[u8]) -> String {
    let mut out = String::with_capacity(data.len() * 2);
    for byte in data {
        out.push_str(&format!("{byte:02x}"));
    }
    out
}

fn print_decode(output: &DecodeOutput, format: OutputFormat) {
    match format {
        OutputFormat::Json => println!(
            "{}",
            serde_json::to_string(output).unwrap_or_else(|_| "{}".to_string())
        ),
        OutputFormat::Table => {
            if let Some(hdr) = &output.header {
                let mut table = Table::new();
                table
                    .load_preset(UTF8_FULL)
                    .set_content_arrangement(ContentArrangement::Dynamic)
                    .set_header(vec!["KIND", "ID", "SEQ", "ARG", "COUNT"])
                    .add_row(vec![
                        hdr.kind.clone(),
                        hdr.id.clone(),
                        hdr.seq.to_string(),
                        hdr.status
                            .as_ref()
                            .map(|s| format!("{} ({})", hdr.arg, s))
                            .unwrap_or_else(|| hdr.arg.to_string()),
                        hdr.count.to_string(),
                    ]);
                println!("{table}");
            }
            if !output.elements.is_empty() {
                let mut table = Table::new();
                table
                    .load_preset(UTF8_FULL)
                    .set_content_arrangement(ContentArrangement::Dynamic)
                    .set_header(vec!["#", "TYPE", "LEN", "VALUE"]);
                for elem in &output.elements {
                    table.add_row(vec![
                        elem.index.to_string(),
                        elem.r#type.clone(),
                        elem.length.to_string(),
                        elem.value.clone(),
                    ]);
                }
                println!("{table}");
            }
        }
        OutputFormat::Pretty => {
            if let Some(hdr) = &output.header {
                match &hdr.status {
                    Some(status) => println!(
                        "{} {} seq={} status={} ({})",
                        hdr.kind, hdr.id, hdr.seq, hdr.arg, status
                    ),
                    None => println!(
                        "{} {} seq={} len={} count={}",
                        hdr.kind, hdr.id, hdr.seq, hdr.arg, hdr.count
                    ),
                }
            }
            for elem in &output.elements {
                println!(
                    "[{}] {} len={} value={}",
                    elem.index, elem.r#type, elem.length, elem.value
                );
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_walk_count_follows_padded_strides() {
        // u16 element (2 data bytes + 2 pad) then a 3-byte string (1 pad).
        let bytes = [
            0x02, 0x02, 0x00, 0x02, 0x1f, 0x90, 0x00, 0x00, //
            0x04, 0x01, 0x00, 0x03, b'a', b'b', b'c', 0x00,
        ];
        assert_eq!(walk_count(&bytes).expect("walk should succeed"), 2);
    }

    #[test]
    fn test_walk_count_rejects_overrun() {
        let bytes = [0x02, 0x00, 0x00, 0x08, 0x01, 0x02];
        assert!(walk_count(&bytes).is_err());
    }

    #[test]
    fn test_decode_message_status() {
        // Status for SOCKO seq 3 with code 42 (No Free Sockets).
        let bytes = [0x02, 0x09, 0x01, 0x00, 0x03, 0x00, 0x2a, 0x00];
        let out = decode_message(&bytes).expect("status should decode");
        let hdr = out.header.expect("header expected");
        assert_eq!(hdr.id, "SOCKO (0x0901)");
        assert_eq!(hdr.status.as_deref(), Some("No Free Sockets"));
        assert!(out.elements.is_empty());
    }
}
