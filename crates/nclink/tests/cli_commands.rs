#![cfg(feature = "cli")]

use std::process::Command;

fn nclink(args: &[&str]) -> std::process::Output {
    Command::new(env!("CARGO_BIN_EXE_nclink"))
        .args(args)
        .output()
        .expect("binary should run")
}

fn stdout(output: &std::process::Output) -> String {
    String::from_utf8(output.stdout.clone()).expect("stdout should be utf-8")
}

#[test]
fn version_prints_package_version() {
    let output = nclink(&["version"]);
    assert!(output.status.success());
    assert_eq!(
        stdout(&output).trim(),
        format!("nclink {}", env!("CARGO_PKG_VERSION"))
    );
}

#[test]
fn catalog_json_lists_commands_and_statuses() {
    let output = nclink(&["catalog", "--format", "json"]);
    assert!(output.status.success());
    let text = stdout(&output);
    assert!(text.contains("\"SOCKO\""));
    assert!(text.contains("\"DNSRESOLV\""));
    assert!(text.contains("No Free Sockets"));
}

#[test]
fn catalog_statuses_only_omits_commands() {
    let output = nclink(&["catalog", "--statuses", "--format", "json"]);
    assert!(output.status.success());
    let text = stdout(&output);
    assert!(!text.contains("\"SOCKO\""));
    assert!(text.contains("Socket Sequence Error"));
}

#[test]
fn decode_element_list_renders_values() {
    // One unsigned u16 holding 8080, one 3-byte string.
    let hex = "02 02 00 02 1f 90 00 00 04 01 00 03 61 62 63 00";
    let output = nclink(&["decode", hex, "--format", "json"]);
    assert!(output.status.success());
    let text = stdout(&output);
    assert!(text.contains("\"value\":\"8080\""));
    assert!(text.contains("\"value\":\"abc\""));
}

#[test]
fn decode_message_names_the_status() {
    let output = nclink(&[
        "decode",
        "--message",
        "02 09 01 00 03 00 2a 00",
        "--format",
        "json",
    ]);
    assert!(output.status.success());
    let text = stdout(&output);
    assert!(text.contains("SOCKO"));
    assert!(text.contains("No Free Sockets"));
}

#[test]
fn decode_rejects_bad_hex_with_usage_code() {
    let output = nclink(&["decode", "zz"]);
    assert_eq!(output.status.code(), Some(64));
}

#[test]
fn crc_matches_known_vectors() {
    let output = nclink(&["crc", "40 00 00 00 00", "--format", "json"]);
    assert!(output.status.success());
    assert!(stdout(&output).contains("\"crc7\":\"0x94\""));

    let output = nclink(&["crc", "31 32 33 34 35 36 37 38 39", "--format", "json"]);
    assert!(output.status.success());
    assert!(stdout(&output).contains("\"crc16\":\"0xc331\""));
}
