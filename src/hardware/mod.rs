//! Hardware-capability probing and argv rewriting (§4.9). Probes the codec
//! tool once for accelerated encoders using the same encoder-family naming
//! and rate-control idiom as the engine's `ffmpeg_args::builder` module, then
//! memoizes the result and rewrites `-c:v <name>` argv segments to prefer the
//! best available accelerated encoder.

use std::process::Command;
use std::time::Duration;

use crate::process_ext::run_command_with_timeout_capture_stderr;

/// Platform-ordered candidate list: nvenc, then qsv, then amf, then
/// videotoolbox, each tried for h264 then hevc.
const CANDIDATE_ENCODERS: &[&str] = &[
    "h264_nvenc",
    "hevc_nvenc",
    "h264_qsv",
    "hevc_qsv",
    "h264_amf",
    "hevc_amf",
    "h264_videotoolbox",
    "hevc_videotoolbox",
];

const PROBE_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RateControlMode {
    Crf,
    Constqp,
    Cq,
    Cbr,
}

fn rate_control_for(encoder: &str) -> RateControlMode {
    if encoder.ends_with("_nvenc") {
        RateControlMode::Constqp
    } else if encoder.ends_with("_qsv") {
        RateControlMode::Cq
    } else if encoder.ends_with("_amf") || encoder.ends_with("_videotoolbox") {
        RateControlMode::Cbr
    } else {
        RateControlMode::Crf
    }
}

/// Idiomatic tuning flags for an accelerated encoder at a given speed/quality
/// tradeoff tier. `speed` is one of "fast", "medium", "slow".
fn tuning_flags(encoder: &str, speed: &str) -> Vec<String> {
    let mut flags = Vec::new();
    match rate_control_for(encoder) {
        RateControlMode::Constqp => {
            flags.push("-rc".to_string());
            flags.push("constqp".to_string());
            flags.push("-qp".to_string());
            flags.push("23".to_string());
            flags.push("-preset".to_string());
            flags.push(
                match speed {
                    "fast" => "p1",
                    "slow" => "p7",
                    _ => "p4",
                }
                .to_string(),
            );
        }
        RateControlMode::Cq => {
            flags.push("-global_quality".to_string());
            flags.push("23".to_string());
            flags.push("-preset".to_string());
            flags.push(speed.to_string());
        }
        RateControlMode::Cbr => {
            flags.push("-b:v".to_string());
            flags.push("6M".to_string());
            flags.push("-quality".to_string());
            flags.push(speed.to_string());
        }
        RateControlMode::Crf => {
            flags.push("-crf".to_string());
            flags.push("23".to_string());
            flags.push("-preset".to_string());
            flags.push(speed.to_string());
        }
    }
    flags
}

#[derive(Debug, Clone)]
pub struct HardwareCapabilities {
    pub accelerated_encoders: Vec<String>,
    pub preferred_encoder: Option<String>,
}

impl HardwareCapabilities {
    /// Probes each candidate by running a minimal one-second synthetic
    /// encode against the codec tool's `lavfi` test-source input, accepting
    /// the candidate iff the process exits zero and writes a non-empty file.
    pub fn probe(ffmpeg_bin: &str) -> Self {
        let mut accepted = Vec::new();

        for encoder in CANDIDATE_ENCODERS {
            let output = std::env::temp_dir().join(format!("mediaserver-probe-{encoder}.mp4"));
            let _ = std::fs::remove_file(&output);

            let mut cmd = Command::new(ffmpeg_bin);
            cmd.args([
                "-y",
                "-f",
                "lavfi",
                "-i",
                "color=c=black:s=320x240:d=1",
                "-c:v",
                encoder,
            ])
            .arg(output.as_os_str());

            let result = run_command_with_timeout_capture_stderr(cmd, PROBE_TIMEOUT, 4096);
            let accepted_this = matches!(
                result,
                Ok((status, false, _)) if status.success()
            ) && std::fs::metadata(&output).map(|m| m.len() > 0).unwrap_or(false);

            let _ = std::fs::remove_file(&output);

            if accepted_this {
                tracing::info!(encoder, "accelerated encoder accepted");
                accepted.push(encoder.to_string());
            }
        }

        let preferred = accepted.first().cloned();
        if let Some(preferred) = &preferred {
            tracing::info!(preferred, "hardware capability probe complete");
        } else {
            tracing::info!("no accelerated encoder available, falling back to software encoding");
        }

        Self {
            accelerated_encoders: accepted,
            preferred_encoder: preferred,
        }
    }

    /// Rewrites an assembled argv in place: finds `-c:v <name>` and replaces
    /// `<name>` plus its adjacent tuning flags with the preferred
    /// accelerated encoder and its idiomatic tuning. Leaves argv unchanged
    /// if no accelerated encoder is available or the argv has no `-c:v`.
    pub fn rewrite_argv(&self, argv: &[String], speed: &str) -> Vec<String> {
        let Some(preferred) = &self.preferred_encoder else {
            return argv.to_vec();
        };

        let Some(pos) = argv.iter().position(|a| a == "-c:v") else {
            return argv.to_vec();
        };
        if pos + 1 >= argv.len() {
            return argv.to_vec();
        }

        // Drop any tuning flags immediately following the old encoder name
        // up to (not including) the next flag that isn't one of the known
        // per-encoder tuning flags, or the next `-` flag that starts a
        // different concern (mapping, audio, output path).
        const TUNING_FLAG_NAMES: &[&str] = &[
            "-crf", "-rc", "-qp", "-cq", "-global_quality", "-preset", "-b:v", "-quality",
        ];

        let mut end = pos + 2;
        while end < argv.len() {
            let token = argv[end].as_str();
            if token.starts_with('-') && !TUNING_FLAG_NAMES.contains(&token) {
                break;
            }
            end += 1;
        }

        let mut rewritten = argv[..pos + 1].to_vec();
        rewritten.push(preferred.clone());
        rewritten.extend(tuning_flags(preferred, speed));
        rewritten.extend_from_slice(&argv[end..]);
        rewritten
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rewrite_is_noop_without_preferred_encoder() {
        let caps = HardwareCapabilities {
            accelerated_encoders: vec![],
            preferred_encoder: None,
        };
        let argv = vec!["-c:v".to_string(), "libx264".to_string(), "-crf".to_string(), "23".to_string()];
        assert_eq!(caps.rewrite_argv(&argv, "medium"), argv);
    }

    #[test]
    fn rewrite_replaces_encoder_and_tuning() {
        let caps = HardwareCapabilities {
            accelerated_encoders: vec!["h264_nvenc".to_string()],
            preferred_encoder: Some("h264_nvenc".to_string()),
        };
        let argv = vec![
            "-i".to_string(),
            "in.mp4".to_string(),
            "-c:v".to_string(),
            "libx264".to_string(),
            "-crf".to_string(),
            "23".to_string(),
            "-preset".to_string(),
            "medium".to_string(),
            "out.mp4".to_string(),
        ];
        let rewritten = caps.rewrite_argv(&argv, "fast");
        assert!(rewritten.contains(&"h264_nvenc".to_string()));
        assert!(!rewritten.contains(&"libx264".to_string()));
        assert_eq!(rewritten.last().unwrap(), "out.mp4");
    }
}
