//! Text-script to timed subtitle synthesis (§4.5.1). Used by
//! `audio_video_subtitle` when the caller supplies a plain-text script
//! instead of an already-timed subtitle file.

#[derive(Debug, Clone, PartialEq)]
pub struct SubtitleCue {
    pub start: f64,
    pub end: f64,
    pub text: String,
}

#[derive(Debug, Clone)]
pub struct WordTiming {
    pub text: String,
    pub start: f64,
    pub end: f64,
}

const MUX_LEAD_IN_DELAY: f64 = 1.0;

/// Splits free text into sentence-like segments at `.`, `!`, `?`, and their
/// full-width counterparts, dropping empty segments produced by trailing
/// punctuation or whitespace runs.
pub fn split_into_segments(text: &str) -> Vec<String> {
    let mut segments = Vec::new();
    let mut current = String::new();
    for ch in text.chars() {
        current.push(ch);
        if matches!(ch, '.' | '!' | '?' | '。' | '!' | '?' | '…') {
            let trimmed = current.trim().to_string();
            if !trimmed.is_empty() {
                segments.push(trimmed);
            }
            current.clear();
        }
    }
    let trailing = current.trim().to_string();
    if !trailing.is_empty() {
        segments.push(trailing);
    }
    segments
}

/// Rhythm-based fallback (§4.5.1): assigns each segment a duration
/// proportional to its length, clamped, when no acoustic alignment is
/// available. A fixed 1 s delay compensates for the codec tool's muxing
/// lead-in.
pub fn rhythm_based_fallback(segments: &[String], total_duration: Option<f64>) -> Vec<SubtitleCue> {
    if segments.is_empty() {
        return Vec::new();
    }

    let total_chars: usize = segments.iter().map(|s| s.chars().count()).sum();
    let durations: Vec<f64> = match total_duration {
        Some(total) if total > 0.0 && total_chars > 0 => {
            let tpc = (0.3_f64).min(0.9 * total / total_chars as f64);
            segments
                .iter()
                .map(|seg| {
                    let raw = seg.chars().count() as f64 * tpc + 0.5;
                    raw.clamp(1.5, 6.0)
                })
                .collect()
        }
        _ => segments
            .iter()
            .map(|seg| (0.15 * seg.chars().count() as f64).max(3.0))
            .collect(),
    };

    let mut cues = Vec::with_capacity(segments.len());
    let mut cursor = MUX_LEAD_IN_DELAY;
    for (segment, duration) in segments.iter().zip(durations) {
        cues.push(SubtitleCue {
            start: cursor,
            end: cursor + duration,
            text: segment.clone(),
        });
        cursor += duration;
    }
    cues
}

/// Strips punctuation and lowercases for similarity comparison.
fn normalize_for_similarity(text: &str) -> String {
    text.chars()
        .filter(|c| c.is_alphanumeric() || c.is_whitespace())
        .collect::<String>()
        .to_lowercase()
}

fn levenshtein(a: &str, b: &str) -> usize {
    let a: Vec<char> = a.chars().collect();
    let b: Vec<char> = b.chars().collect();
    let (n, m) = (a.len(), b.len());
    if n == 0 {
        return m;
    }
    if m == 0 {
        return n;
    }

    let mut prev: Vec<usize> = (0..=m).collect();
    let mut curr = vec![0usize; m + 1];

    for i in 1..=n {
        curr[0] = i;
        for j in 1..=m {
            let cost = if a[i - 1] == b[j - 1] { 0 } else { 1 };
            curr[j] = (prev[j] + 1).min(curr[j - 1] + 1).min(prev[j - 1] + cost);
        }
        std::mem::swap(&mut prev, &mut curr);
    }
    prev[m]
}

/// Similarity in [0, 1]: 1 minus normalized Levenshtein distance over the
/// longer of the two punctuation-stripped, lowercased strings.
fn similarity(a: &str, b: &str) -> f64 {
    let a = normalize_for_similarity(a);
    let b = normalize_for_similarity(b);
    let max_len = a.chars().count().max(b.chars().count());
    if max_len == 0 {
        return 1.0;
    }
    1.0 - levenshtein(&a, &b) as f64 / max_len as f64
}

/// Groups word-level timings into candidate captions at punctuation
/// boundaries, mirroring how a script segment is delimited.
fn group_words_into_candidates(words: &[WordTiming]) -> Vec<SubtitleCue> {
    let mut candidates = Vec::new();
    let mut buffer: Vec<&WordTiming> = Vec::new();

    for word in words {
        buffer.push(word);
        if word.text.ends_with(['.', '!', '?', '。', '…']) {
            candidates.push(merge_words(&buffer));
            buffer.clear();
        }
    }
    if !buffer.is_empty() {
        candidates.push(merge_words(&buffer));
    }
    candidates
}

fn merge_words(words: &[&WordTiming]) -> SubtitleCue {
    let start = words.first().map(|w| w.start).unwrap_or(0.0);
    let end = words.last().map(|w| w.end).unwrap_or(start);
    let text = words
        .iter()
        .map(|w| w.text.as_str())
        .collect::<Vec<_>>()
        .join(" ");
    SubtitleCue { start, end, text }
}

const SIMILARITY_ACCEPT_THRESHOLD: f64 = 0.8;
const TRAILING_DEFAULT_SLOT: f64 = 3.0;

/// Acoustic alignment (§4.5.1): corrects speech-to-text-derived captions
/// against the original script. Walks both lists, merging consecutive
/// acoustic captions while doing so increases similarity to the current
/// script segment, then emits the script's own text with the merged
/// caption's timing.
pub fn acoustic_alignment(script_segments: &[String], words: &[WordTiming]) -> Vec<SubtitleCue> {
    let candidates = group_words_into_candidates(words);
    let mut cues = Vec::with_capacity(script_segments.len());

    let mut candidate_cursor = 0usize;
    for segment in script_segments {
        if candidate_cursor >= candidates.len() {
            let start = cues.last().map(|c: &SubtitleCue| c.end).unwrap_or(0.0);
            cues.push(SubtitleCue {
                start,
                end: start + TRAILING_DEFAULT_SLOT,
                text: segment.clone(),
            });
            continue;
        }

        let mut merged = candidates[candidate_cursor].clone();
        let mut best_similarity = similarity(segment, &merged.text);
        let mut consumed = 1usize;

        while candidate_cursor + consumed < candidates.len() {
            let next = &candidates[candidate_cursor + consumed];
            let widened_text = format!("{} {}", merged.text, next.text);
            let widened_similarity = similarity(segment, &widened_text);
            if widened_similarity > best_similarity && best_similarity < SIMILARITY_ACCEPT_THRESHOLD {
                merged = SubtitleCue {
                    start: merged.start,
                    end: next.end,
                    text: widened_text,
                };
                best_similarity = widened_similarity;
                consumed += 1;
            } else {
                break;
            }
        }

        cues.push(SubtitleCue {
            start: merged.start,
            end: merged.end,
            text: segment.clone(),
        });
        candidate_cursor += consumed;
    }

    cues
}

fn format_timestamp(seconds: f64) -> String {
    let total_ms = (seconds.max(0.0) * 1000.0).round() as u64;
    let ms = total_ms % 1000;
    let total_seconds = total_ms / 1000;
    let s = total_seconds % 60;
    let m = (total_seconds / 60) % 60;
    let h = total_seconds / 3600;
    format!("{h:02}:{m:02}:{s:02},{ms:03}")
}

/// Renders cues in the standard two-line timed-subtitle record format.
pub fn render_srt(cues: &[SubtitleCue]) -> String {
    let mut out = String::new();
    for (index, cue) in cues.iter().enumerate() {
        out.push_str(&format!("{}\n", index + 1));
        out.push_str(&format!(
            "{} --> {}\n",
            format_timestamp(cue.start),
            format_timestamp(cue.end)
        ));
        out.push_str(&cue.text);
        out.push_str("\n\n");
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn splits_on_sentence_punctuation() {
        let segments = split_into_segments("Hello world. How are you? Fine!");
        assert_eq!(segments, vec!["Hello world.", "How are you?", "Fine!"]);
    }

    #[test]
    fn rhythm_fallback_respects_total_duration() {
        let segments = split_into_segments("Hi. Goodbye.");
        let cues = rhythm_based_fallback(&segments, Some(10.0));
        assert_eq!(cues.len(), 2);
        assert!(cues[0].start >= MUX_LEAD_IN_DELAY);
        assert!(cues[1].start >= cues[0].end);
    }

    #[test]
    fn rhythm_fallback_without_duration_uses_length_heuristic() {
        let segments = split_into_segments("A short one. This one is quite a bit longer indeed.");
        let cues = rhythm_based_fallback(&segments, None);
        assert!(cues[1].end - cues[1].start > cues[0].end - cues[0].start);
    }

    #[test]
    fn acoustic_alignment_uses_script_text_with_acoustic_timing() {
        let script = split_into_segments("Hello there friend.");
        let words = vec![
            WordTiming { text: "Hello".into(), start: 0.0, end: 0.4 },
            WordTiming { text: "there".into(), start: 0.4, end: 0.8 },
            WordTiming { text: "friend.".into(), start: 0.8, end: 1.3 },
        ];
        let cues = acoustic_alignment(&script, &words);
        assert_eq!(cues.len(), 1);
        assert_eq!(cues[0].text, "Hello there friend.");
        assert!((cues[0].start - 0.0).abs() < f64::EPSILON);
        assert!((cues[0].end - 1.3).abs() < f64::EPSILON);
    }

    #[test]
    fn render_srt_uses_two_line_record_format() {
        let cues = vec![SubtitleCue { start: 1.0, end: 2.5, text: "hi".into() }];
        let srt = render_srt(&cues);
        assert_eq!(srt, "1\n00:00:01,000 --> 00:00:02,500\nhi\n\n");
    }
}
