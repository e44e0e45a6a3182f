//! Stderr progress-line parsing (§4.4). Kept as a pure, re-entrant function
//! over a single line so it can be unit tested without a child process, the
//! same split as the engine's `ffmpeg_args::progress` module.

pub(crate) fn parse_duration_line(line: &str) -> Option<f64> {
    let idx = line.find("Duration:")?;
    let rest = &line[idx + "Duration:".len()..];
    let time_str = rest.trim().split(',').next().unwrap_or("").trim();
    if time_str.is_empty() {
        return None;
    }
    let seconds = parse_time_to_seconds(time_str);
    if seconds > 0.0 { Some(seconds) } else { None }
}

pub(crate) fn parse_progress_line(line: &str) -> Option<f64> {
    for token in line.split_whitespace() {
        if let Some(rest) = token.strip_prefix("time=") {
            return Some(parse_time_to_seconds(rest));
        }
        if let Some(rest) = token.strip_prefix("out_time=") {
            return Some(parse_time_to_seconds(rest));
        }
        if let Some(rest) = token.strip_prefix("out_time_ms=") {
            if let Ok(us) = rest.parse::<f64>() {
                return Some(us / 1_000_000.0);
            }
        }
    }
    None
}

fn parse_time_to_seconds(s: &str) -> f64 {
    if s.contains(':') {
        let parts: Vec<&str> = s.split(':').collect();
        if parts.len() == 3 {
            let h = parts[0].parse::<f64>().unwrap_or(0.0);
            let m = parts[1].parse::<f64>().unwrap_or(0.0);
            let sec = parts[2].parse::<f64>().unwrap_or(0.0);
            return h * 3600.0 + m * 60.0 + sec;
        }
    }
    s.parse::<f64>().unwrap_or(0.0)
}

/// Tracks the running state a progress stream needs: the established total
/// duration (from the first `Duration:` line) and the percent derived from
/// each subsequent `time=` line. Streamed progress is clamped to 95 (§3
/// invariant 2); the caller jumps to 100 on successful completion.
#[derive(Debug, Default)]
pub struct ProgressTracker {
    total_seconds: Option<f64>,
    last_percent: f64,
}

impl ProgressTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feeds one line of stderr output. Returns `Some(percent)` when the line
    /// yields a new, non-regressing progress value.
    pub fn feed_line(&mut self, line: &str) -> Option<f64> {
        if self.total_seconds.is_none() {
            if let Some(total) = parse_duration_line(line) {
                self.total_seconds = Some(total);
            }
        }

        let elapsed = parse_progress_line(line)?;
        let total = self.total_seconds?;
        if total <= 0.0 {
            return None;
        }

        let percent = (elapsed / total * 100.0).clamp(0.0, 95.0);
        if percent > self.last_percent {
            self.last_percent = percent;
            Some(percent)
        } else {
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tracks_progress_across_duration_and_time_lines() {
        let mut tracker = ProgressTracker::new();
        assert_eq!(tracker.feed_line("frame=1 fps=0"), None);
        assert_eq!(
            tracker.feed_line("Duration: 00:00:10.00, start: 0.000000, bitrate: 1000 kb/s"),
            None
        );
        let p1 = tracker
            .feed_line("frame=1 time=00:00:02.50 bitrate=100kbits/s")
            .expect("should yield progress");
        assert!((p1 - 25.0).abs() < 0.01);

        let p2 = tracker
            .feed_line("frame=2 time=00:00:09.50 bitrate=100kbits/s")
            .expect("should yield progress");
        assert!(p2 <= 95.0);
        assert!(p2 > p1);
    }

    #[test]
    fn never_regresses() {
        let mut tracker = ProgressTracker::new();
        tracker.feed_line("Duration: 00:00:10.00, start: 0, bitrate: 1 kb/s");
        tracker.feed_line("time=00:00:08.00");
        assert_eq!(tracker.feed_line("time=00:00:03.00"), None);
    }
}
