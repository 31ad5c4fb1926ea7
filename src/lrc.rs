//! LRC parsing and the time index used to pick the active lyric line.

use crate::error::LineParseError;
use crate::types::LyricLine;
use log::{debug, warn};
use regex::Regex;
use std::sync::{Arc, OnceLock};
use std::time::Duration;

fn timestamp_tag() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    // [mm:ss], [mm:ss.xx] or [mm:ss.xxx]
    RE.get_or_init(|| Regex::new(r"^\[(\d+):(\d{2})(?:\.(\d{2,3}))?\]").expect("valid regex"))
}

fn id_tag() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^\[[A-Za-z#]+:[^\]]*\]$").expect("valid regex"))
}

/// Lines sorted ascending by timestamp. Equal timestamps keep parse order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LyricsIndex {
    lines: Vec<LyricLine>,
}

impl LyricsIndex {
    pub fn new(mut lines: Vec<LyricLine>) -> Self {
        // Source order is not trusted; sort_by_key is stable.
        lines.sort_by_key(|line| line.timestamp);
        Self { lines }
    }

    pub fn empty() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }

    pub fn len(&self) -> usize {
        self.lines.len()
    }

    pub fn lines(&self) -> &[LyricLine] {
        &self.lines
    }

    pub fn get(&self, index: usize) -> Option<&LyricLine> {
        self.lines.get(index)
    }

    pub fn shared_lines(&self) -> Arc<[LyricLine]> {
        Arc::from(self.lines.clone())
    }

    /// Index of the last line whose timestamp is at or before `position`.
    ///
    /// Returns `None` before the first line and for an empty index. For a fixed
    /// index the result never decreases as `position` grows.
    pub fn active_line(&self, position: Duration) -> Option<usize> {
        self.lines
            .partition_point(|line| line.timestamp <= position)
            .checked_sub(1)
    }
}

#[derive(Debug, Clone, Default)]
pub struct ParsedLyrics {
    pub index: LyricsIndex,
    pub errors: Vec<LineParseError>,
}

pub fn parse_lrc(lrc_content: &str) -> ParsedLyrics {
    let mut lines = Vec::new();
    let mut errors = Vec::new();

    // byte order mark left over from a UTF-8 file export
    let lrc_content = lrc_content.strip_prefix('\u{feff}').unwrap_or(lrc_content);

    for (number, raw) in lrc_content.lines().enumerate() {
        let line_number = number + 1;
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            continue;
        }
        if id_tag().is_match(trimmed) {
            debug!("Skipping LRC id tag on line {}: {}", line_number, trimmed);
            continue;
        }

        match parse_timed_line(trimmed) {
            Ok((timestamps, text)) => {
                if text.is_empty() {
                    continue;
                }
                for timestamp in timestamps {
                    lines.push(LyricLine {
                        timestamp,
                        text: text.to_string(),
                    });
                }
            }
            Err(reason) => {
                let error = LineParseError {
                    line_number,
                    line: raw.to_string(),
                    reason,
                };
                warn!("Skipping lyric line: {}", error);
                errors.push(error);
            }
        }
    }

    ParsedLyrics {
        index: LyricsIndex::new(lines),
        errors,
    }
}

// One or more leading timestamp tags followed by the lyric text.
fn parse_timed_line(line: &str) -> Result<(Vec<Duration>, &str), String> {
    let mut rest = line;
    let mut timestamps = Vec::new();

    while let Some(caps) = timestamp_tag().captures(rest) {
        let minutes: u64 = caps[1]
            .parse()
            .map_err(|_| format!("minutes out of range: {}", &caps[1]))?;
        let seconds: u64 = caps[2]
            .parse()
            .map_err(|_| format!("invalid seconds: {}", &caps[2]))?;
        if seconds >= 60 {
            return Err(format!("seconds out of range: {}", seconds));
        }
        let millis = match caps.get(3) {
            Some(frac) if frac.as_str().len() == 2 => {
                frac.as_str().parse::<u64>().unwrap_or(0) * 10
            }
            Some(frac) => frac.as_str().parse::<u64>().unwrap_or(0),
            None => 0,
        };

        let total_ms = minutes
            .checked_mul(60_000)
            .and_then(|ms| ms.checked_add(seconds * 1000 + millis))
            .ok_or_else(|| "timestamp overflow".to_string())?;
        timestamps.push(Duration::from_millis(total_ms));

        rest = &rest[caps[0].len()..];
    }

    if timestamps.is_empty() {
        return Err(if line.starts_with('[') {
            "malformed timestamp".to_string()
        } else {
            "missing timestamp".to_string()
        });
    }

    Ok((timestamps, rest.trim()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn line(ms: u64, text: &str) -> LyricLine {
        LyricLine {
            timestamp: Duration::from_millis(ms),
            text: text.to_string(),
        }
    }

    #[test]
    fn parses_centisecond_timestamp() {
        let parsed = parse_lrc("[01:02.50]Hello");
        assert_eq!(parsed.index.lines(), &[line(62_500, "Hello")]);
        assert!(parsed.errors.is_empty());
    }

    #[test]
    fn parses_millisecond_and_bare_timestamps() {
        let parsed = parse_lrc("[00:01.234]milli\n[00:03]bare");
        assert_eq!(
            parsed.index.lines(),
            &[line(1_234, "milli"), line(3_000, "bare")]
        );
    }

    #[test]
    fn drops_lines_without_text() {
        let parsed = parse_lrc("[00:00.00]\n[00:01.00]   \n[00:02.00]kept");
        assert_eq!(parsed.index.lines(), &[line(2_000, "kept")]);
        assert!(parsed.errors.is_empty());
    }

    #[test]
    fn records_malformed_lines_and_keeps_going() {
        let parsed = parse_lrc(
            "[00:01.00]one\n[1:2.5]broken\nno tag at all\n[00:75.00]bad seconds\n[00:02.00]two",
        );
        assert_eq!(parsed.index.lines(), &[line(1_000, "one"), line(2_000, "two")]);

        let numbers: Vec<usize> = parsed.errors.iter().map(|e| e.line_number).collect();
        assert_eq!(numbers, vec![2, 3, 4]);
        assert_eq!(parsed.errors[0].reason, "malformed timestamp");
        assert_eq!(parsed.errors[1].reason, "missing timestamp");
    }

    #[test]
    fn leading_byte_order_mark_is_ignored() {
        let parsed = parse_lrc("\u{feff}[00:01.00]first\n[00:02.00]second");
        assert_eq!(
            parsed.index.lines(),
            &[line(1_000, "first"), line(2_000, "second")]
        );
        assert!(parsed.errors.is_empty());
    }

    #[test]
    fn skips_id_tags_silently() {
        let parsed = parse_lrc("[ar:Someone]\n[ti:Title]\n[00:01.00]line");
        assert_eq!(parsed.index.len(), 1);
        assert!(parsed.errors.is_empty());
    }

    #[test]
    fn repeated_tags_share_text() {
        let parsed = parse_lrc("[00:10.00][00:30.00]chorus\n[00:20.00]verse");
        assert_eq!(
            parsed.index.lines(),
            &[line(10_000, "chorus"), line(20_000, "verse"), line(30_000, "chorus")]
        );
    }

    #[test]
    fn sorts_out_of_order_input_stably() {
        let parsed = parse_lrc("[00:05.00]c\n[00:01.00]a\n[00:05.00]d\n[00:02.00]b");
        let texts: Vec<&str> = parsed.index.lines().iter().map(|l| l.text.as_str()).collect();
        assert_eq!(texts, vec!["a", "b", "c", "d"]);
    }

    #[test]
    fn sorting_twice_is_idempotent() {
        let once = parse_lrc("[00:03.00]x\n[00:01.00]y\n[00:03.00]z\n[00:00.50]w").index;
        let twice = LyricsIndex::new(once.lines().to_vec());
        assert_eq!(once, twice);
    }

    #[test]
    fn timestamps_do_not_drift_across_many_lines() {
        let content: String = (0..600)
            .map(|i| format!("[{:02}:{:02}.10]l{}\n", i / 60, i % 60, i))
            .collect();
        let parsed = parse_lrc(&content);
        let last = parsed.index.get(599).unwrap();
        assert_eq!(last.timestamp, Duration::from_millis(599_100));
    }

    #[test]
    fn empty_index_has_no_active_line() {
        let index = LyricsIndex::empty();
        assert_eq!(index.active_line(Duration::ZERO), None);
        assert_eq!(index.active_line(Duration::from_secs(500)), None);
    }

    #[test]
    fn resolves_last_line_at_or_before_position() {
        let index = LyricsIndex::new(vec![line(0, "a"), line(2_000, "b"), line(5_000, "c")]);
        assert_eq!(index.active_line(Duration::from_millis(0)), Some(0));
        assert_eq!(index.active_line(Duration::from_millis(1_500)), Some(0));
        assert_eq!(index.active_line(Duration::from_millis(2_000)), Some(1));
        assert_eq!(index.active_line(Duration::from_millis(4_000)), Some(1));
        assert_eq!(index.active_line(Duration::from_millis(9_000)), Some(2));

        let late = LyricsIndex::new(vec![line(1_000, "a")]);
        assert_eq!(late.active_line(Duration::from_millis(999)), None);
    }

    #[test]
    fn resolver_is_monotonic() {
        let index = LyricsIndex::new(vec![
            line(500, "a"),
            line(500, "b"),
            line(1_200, "c"),
            line(4_000, "d"),
            line(4_001, "e"),
        ]);
        let mut previous: Option<usize> = None;
        for ms in (0..6_000).step_by(7) {
            let current = index.active_line(Duration::from_millis(ms));
            assert!(current >= previous, "regressed at {}ms", ms);
            previous = current;
        }
        // equal timestamps resolve to the later duplicate
        assert_eq!(index.active_line(Duration::from_millis(500)), Some(1));
    }
}
