use std::fs;
use std::path::PathBuf;
use std::process::Command;

fn tmp_path(name: &str) -> PathBuf {
    let tmp_dir = std::env::temp_dir().join(format!("lclink-cli-{}", std::process::id()));
    fs::create_dir_all(&tmp_dir).ok();
    tmp_dir.join(name)
}

fn run_lclink(args: &[&str]) -> (bool, String) {
    let output = Command::new(env!("CARGO_BIN_EXE_lclink"))
        .args(args)
        .output()
        .expect("Failed to execute lclink");

    let text = String::from_utf8_lossy(&output.stderr).to_string()
        + &String::from_utf8_lossy(&output.stdout);
    (output.status.success(), text)
}

#[test]
fn test_encode_writes_one_buffer_per_char() {
    let output = tmp_path("encode.wav");
    let (ok, text) = run_lclink(&["encode", "Hi", output.to_str().unwrap()]);
    assert!(ok, "encode failed: {}", text);
    assert!(text.contains("Encoded 2 characters to 40000 samples"), "{}", text);

    // 40000 float samples plus the header
    let file_size = fs::metadata(&output).expect("Output file not created").len();
    assert!(file_size > 40_000 * 4, "File too small: {} bytes", file_size);
    assert!(file_size < 40_000 * 4 + 128, "File too large: {} bytes", file_size);
}

#[test]
fn test_encode_then_decode() {
    let encoded = tmp_path("roundtrip.wav");
    let (ok, text) = run_lclink(&["encode", "LC link", encoded.to_str().unwrap()]);
    assert!(ok, "encode failed: {}", text);

    let (ok, text) = run_lclink(&["decode", encoded.to_str().unwrap()]);
    assert!(ok, "decode failed: {}", text);
    assert!(text.contains("Decoded 7 characters"), "{}", text);
    assert!(text.lines().any(|line| line == "LC link"), "{}", text);
}

#[test]
fn test_decode_with_half_slot_alignment() {
    let encoded = tmp_path("desync.wav");
    run_lclink(&["encode", "H", encoded.to_str().unwrap()]);

    let (ok, text) = run_lclink(&["decode", encoded.to_str().unwrap(), "--alignment", "300"]);
    assert!(ok, "decode failed: {}", text);
    assert!(text.contains("Decoded 1 characters"), "{}", text);
    assert!(!text.lines().any(|line| line == "H"), "{}", text);
}

#[test]
fn test_config_prints_defaults_as_json() {
    let (ok, text) = run_lclink(&["config"]);
    assert!(ok, "config failed: {}", text);
    let start = text.find('{').expect("no JSON in output");
    let json: serde_json::Value = serde_json::from_str(&text[start..]).expect("invalid JSON");
    assert_eq!(json["modulation"]["a_low"], 1.4);
    assert_eq!(json["output"]["sample_rate"], 20_000);
    assert_eq!(json["rendezvous"]["port"], 5555);
}

#[test]
fn test_partial_config_file_keeps_defaults() {
    let path = tmp_path("partial.json");
    fs::write(&path, r#"{ "modulation": { "a_low": 1.3 }, "poll": { "interval_ms": 5 } }"#).unwrap();

    let (ok, text) = run_lclink(&["--config", path.to_str().unwrap(), "config"]);
    assert!(ok, "config failed: {}", text);
    let start = text.find('{').expect("no JSON in output");
    let json: serde_json::Value = serde_json::from_str(&text[start..]).expect("invalid JSON");
    assert_eq!(json["modulation"]["a_low"], 1.3);
    assert_eq!(json["modulation"]["a_high"], 1.6);
    assert_eq!(json["poll"]["interval_ms"], 5);
}

#[test]
fn test_invalid_config_rejected() {
    let path = tmp_path("inverted.json");
    fs::write(&path, r#"{ "modulation": { "a_low": 1.7 } }"#).unwrap();

    let (ok, text) = run_lclink(&["--config", path.to_str().unwrap(), "config"]);
    assert!(!ok, "inverted levels accepted: {}", text);
    assert!(text.contains("InvalidConfig"), "{}", text);
}

#[test]
fn test_loopback_over_sim_bench() {
    // port 0: the rendezvous listener picks a free port
    let path = tmp_path("loopback.json");
    fs::write(
        &path,
        r#"{ "rendezvous": { "port": 0, "timeout_ms": 5000 }, "poll": { "interval_ms": 2, "max_wait_ms": 10000 } }"#,
    )
    .unwrap();

    let (ok, text) = run_lclink(&[
        "--config",
        path.to_str().unwrap(),
        "loopback",
        "ok",
        "--speedup",
        "10",
    ]);
    assert!(ok, "loopback failed: {}", text);
    assert!(text.contains("Sent 2 characters, received 2"), "{}", text);
    assert!(text.lines().any(|line| line == "ok"), "{}", text);
}

#[test]
fn test_loopback_rejects_unencodable_message() {
    let path = tmp_path("loopback-smiley.json");
    fs::write(
        &path,
        r#"{ "rendezvous": { "port": 0, "timeout_ms": 5000 }, "poll": { "interval_ms": 2, "max_wait_ms": 10000 } }"#,
    )
    .unwrap();

    let started = std::time::Instant::now();
    let (ok, text) = run_lclink(&[
        "--config",
        path.to_str().unwrap(),
        "loopback",
        "a\u{263a}",
        "--speedup",
        "10",
    ]);
    assert!(!ok, "unencodable message accepted: {}", text);
    assert!(text.contains("InvalidInput"), "{}", text);
    assert!(started.elapsed() < std::time::Duration::from_secs(5));
}

#[test]
fn test_sweep_rejects_step_finer_than_buffer() {
    let output = tmp_path("sweep-fine.wav");
    let (ok, text) = run_lclink(&["sweep", output.to_str().unwrap(), "--step", "1e-12", "--speedup", "10"]);
    assert!(!ok, "sweep accepted: {}", text);
    assert!(text.contains("InvalidConfig"), "{}", text);
}
