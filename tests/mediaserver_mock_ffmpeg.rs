//! Stand-in for the real codec tool binary in integration tests. Controlled
//! entirely through environment variables so tests can script exit codes,
//! progress lines, and captured argv without touching the real toolchain.
use std::path::PathBuf;
use std::{env, fs};

use serde::Serialize;

#[derive(Serialize)]
struct CapturePayload {
    argv: Vec<String>,
}

fn main() {
    let argv: Vec<String> = env::args().skip(1).collect();

    if let Ok(capture_path) = env::var("MEDIASERVER_MOCK_CAPTURE_PATH") {
        let path = PathBuf::from(capture_path);
        if let Some(parent) = path.parent() {
            let _ = fs::create_dir_all(parent);
        }
        let payload = CapturePayload {
            argv: argv.clone(),
        };
        let json = serde_json::to_string(&payload).expect("capture JSON must serialize");
        fs::write(&path, json).expect("mock tool must write capture file");
    }

    if let Ok(duration) = env::var("MEDIASERVER_MOCK_PROBE_DURATION") {
        eprintln!("Duration: {duration}, start: 0.000000, bitrate: 1000 kb/s");
    }

    if let Ok(stdout_payload) = env::var("MEDIASERVER_MOCK_STDOUT") {
        print!("{stdout_payload}");
    }

    if env::var("MEDIASERVER_MOCK_EMIT_PROGRESS")
        .map(|v| v == "1" || v.eq_ignore_ascii_case("true"))
        .unwrap_or(false)
    {
        eprintln!("Duration: 00:00:10.00, start: 0.000000, bitrate: 1000 kb/s");
        eprintln!(
            "frame=   1 fps=0.0 q=-1.0 size=       0kB time=00:00:02.50 bitrate=   0.0kbits/s speed=1.0x"
        );
        eprintln!(
            "frame=   2 fps=0.0 q=-1.0 size=       0kB time=00:00:07.50 bitrate=   0.0kbits/s speed=1.0x"
        );
        eprintln!(
            "frame=   3 fps=0.0 q=-1.0 size=       0kB time=00:00:10.00 bitrate=   0.0kbits/s speed=1.0x"
        );
    }

    if let Ok(sleep_ms) = env::var("MEDIASERVER_MOCK_SLEEP_MS") {
        if let Ok(ms) = sleep_ms.parse::<u64>() {
            std::thread::sleep(std::time::Duration::from_millis(ms));
        }
    }

    if let Ok(output_path) = env::var("MEDIASERVER_MOCK_WRITE_OUTPUT") {
        let _ = fs::write(output_path, b"mock-media-bytes");
    } else if let Some(last) = argv.last() {
        // Heuristic fallback: if the last argv entry looks like an output
        // path (no leading dash), touch it so existence checks pass.
        if !last.starts_with('-') && !last.is_empty() {
            let _ = fs::write(last, b"mock-media-bytes");
        }
    }

    let exit_code: i32 = env::var("MEDIASERVER_MOCK_EXIT_CODE")
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(0);
    std::process::exit(exit_code);
}
