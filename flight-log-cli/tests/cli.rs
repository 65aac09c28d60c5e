use assert_cmd::Command;
use byteorder::{LittleEndian, WriteBytesExt};
use predicates::prelude::*;
use std::fs;
use std::path::Path;
use tempfile::TempDir;

fn padded(text: &str, len: usize) -> Vec<u8> {
    let mut out = text.as_bytes().to_vec();
    out.resize(len, 0);
    out
}

/// Minimal DataFlash log: FMT, an ATT type and three ATT records
fn write_dataflash_log(path: &Path) {
    let mut log = Vec::new();
    for (type_id, length, name, format, columns) in [
        (0x80u8, 89u8, "FMT", "BBnNZ", "Type,Length,Name,Format,Columns"),
        (1, 15, "ATT", "Qcc", "TimeUS,Roll,Pitch"),
    ] {
        log.extend([0xA3, 0x95, 0x80, type_id, length]);
        log.extend(padded(name, 4));
        log.extend(padded(format, 16));
        log.extend(padded(columns, 64));
    }
    for i in 1..=3u64 {
        log.extend([0xA3, 0x95, 1]);
        log.write_u64::<LittleEndian>(i * 1_000_000).unwrap();
        log.write_i16::<LittleEndian>(250).unwrap();
        log.write_i16::<LittleEndian>(-250).unwrap();
    }
    fs::write(path, log).unwrap();
}

fn cli() -> Command {
    Command::cargo_bin("flight-log-cli").unwrap()
}

#[test]
fn test_cli_version() {
    cli()
        .arg("--version")
        .assert()
        .success()
        .stdout(predicate::str::contains("flight-log-cli"));
}

#[test]
fn test_cli_help() {
    cli()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("run"))
        .stdout(predicate::str::contains("session"));
}

#[test]
fn test_no_command_fails() {
    cli().assert().code(1).stderr(predicate::str::contains("No command given"));
}

#[test]
fn test_missing_input_argument_fails() {
    let temp_dir = TempDir::new().unwrap();
    cli()
        .current_dir(temp_dir.path())
        .arg("run")
        .assert()
        .code(1)
        .stderr(predicate::str::contains("Missing input file"));
}

#[test]
fn test_nonexistent_input_fails_without_output() {
    let temp_dir = TempDir::new().unwrap();
    cli()
        .current_dir(temp_dir.path())
        .args(["run", "missing.bin"])
        .assert()
        .code(1)
        .stderr(predicate::str::contains("does not exist"));

    assert!(!temp_dir.path().join("missing_processed.json").exists());
}

#[test]
fn test_wrong_extension_fails() {
    let temp_dir = TempDir::new().unwrap();
    let input = temp_dir.path().join("flight.tlog");
    write_dataflash_log(&input);

    cli()
        .current_dir(temp_dir.path())
        .arg("run")
        .arg(&input)
        .assert()
        .code(1)
        .stderr(predicate::str::contains(".bin"));

    assert!(!temp_dir.path().join("flight_processed.json").exists());
}

#[test]
fn test_run_writes_default_output() {
    let temp_dir = TempDir::new().unwrap();
    write_dataflash_log(&temp_dir.path().join("flight.bin"));

    cli()
        .current_dir(temp_dir.path())
        .args(["-q", "run", "flight.bin"])
        .assert()
        .success();

    let text = fs::read_to_string(temp_dir.path().join("flight_processed.json")).unwrap();
    let json: serde_json::Value = serde_json::from_str(&text).unwrap();
    for key in ["metadata", "messages", "files", "availableMessages"] {
        assert!(json.get(key).is_some(), "missing key {}", key);
    }
    assert_eq!(json["messages"]["ATT"]["Roll"], serde_json::json!([2.5, 2.5, 2.5]));
    assert_eq!(
        json["messages"]["ATT"]["time_boot_ms"],
        serde_json::json!([1000.0, 2000.0, 3000.0])
    );
    assert_eq!(json["metadata"]["format"], serde_json::json!("dataflash"));
}

#[test]
fn test_run_explicit_output_and_uppercase_extension() {
    let temp_dir = TempDir::new().unwrap();
    let input = temp_dir.path().join("LOG0001.BIN");
    let output = temp_dir.path().join("result.json");
    write_dataflash_log(&input);

    cli()
        .arg("run")
        .arg(&input)
        .arg(&output)
        .assert()
        .success();

    assert!(output.exists());
}

#[test]
fn test_undecodable_log_fails() {
    let temp_dir = TempDir::new().unwrap();
    fs::write(temp_dir.path().join("junk.bin"), vec![0u8; 256]).unwrap();

    cli()
        .current_dir(temp_dir.path())
        .args(["run", "junk.bin"])
        .assert()
        .code(1)
        .stderr(predicate::str::contains("Failed to decode"));

    assert!(!temp_dir.path().join("junk_processed.json").exists());
}

#[test]
fn test_session_over_stdio() {
    let temp_dir = TempDir::new().unwrap();
    let input = temp_dir.path().join("flight.bin");
    write_dataflash_log(&input);
    let config = temp_dir.path().join("config.toml");
    fs::write(&config, "[sink]\nenabled = false\n").unwrap();

    let stdin = format!(
        "{}\nthis is not json\n{}\n",
        serde_json::json!({"action": "parse", "path": input}),
        serde_json::json!({"action": "loadType", "type": "ATT[0]"}),
    );

    cli()
        .arg("-c")
        .arg(&config)
        .arg("session")
        .write_stdin(stdin)
        .assert()
        .success()
        .stdout(predicate::str::contains(r#""messageType":"ATT""#))
        .stdout(predicate::str::contains(r#"{"messagesDoneLoading":true}"#))
        .stderr(predicate::str::contains("bad message"));
}

#[test]
fn test_bad_config_fails() {
    let temp_dir = TempDir::new().unwrap();
    let config = temp_dir.path().join("config.toml");
    fs::write(&config, "[sink\n").unwrap();

    cli()
        .arg("--config")
        .arg(&config)
        .arg("session")
        .assert()
        .code(1)
        .stderr(predicate::str::contains("Failed to parse config file"));
}
