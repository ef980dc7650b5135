//! Minimal server-sent-events wire handling for the live-score stream.
//!
//! The server pushes UTF-8 text events separated by a blank line. Only the
//! `data:` field carries score payloads; comment lines (leading `:`) and any
//! other fields are keep-alive filler and ignored.

use crate::model::MatchScoreUpdate;

/// One decoded event body.
#[derive(Debug, Clone, PartialEq)]
pub enum StreamEvent {
    /// Empty body, comment, or JSON without a `match_id` — ignore entirely.
    KeepAlive,
    Update(MatchScoreUpdate),
}

/// Incremental SSE frame splitter. Network chunks arrive at arbitrary
/// boundaries; `push` buffers them and yields the bodies of all events whose
/// terminating blank line has been seen.
#[derive(Debug, Default)]
pub struct SseParser {
    buf: Vec<u8>,
}

impl SseParser {
    pub fn new() -> Self {
        SseParser::default()
    }

    /// Feed a raw chunk, returning the data bodies of every completed event.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<String> {
        self.buf.extend_from_slice(chunk);
        let mut bodies = Vec::new();
        while let Some((event_end, frame_end)) = find_blank_line(&self.buf) {
            let frame: Vec<u8> = self.buf.drain(..frame_end).collect();
            let block = String::from_utf8_lossy(&frame[..event_end]);
            bodies.push(extract_data(&block));
        }
        bodies
    }
}

/// Locate the first blank line: returns (end of event text, end of frame).
fn find_blank_line(buf: &[u8]) -> Option<(usize, usize)> {
    for (i, b) in buf.iter().enumerate() {
        if *b != b'\n' {
            continue;
        }
        let rest = &buf[i + 1..];
        if rest.starts_with(b"\n") {
            return Some((i, i + 2));
        }
        if rest.starts_with(b"\r\n") {
            return Some((i, i + 3));
        }
    }
    None
}

/// Concatenate the `data:` lines of one event block, skipping comments and
/// non-data fields. Multi-line data joins with '\n' per the SSE format.
fn extract_data(block: &str) -> String {
    let mut data = String::new();
    for line in block.split('\n') {
        let line = line.strip_suffix('\r').unwrap_or(line);
        if line.starts_with(':') {
            continue;
        }
        if let Some(value) = line.strip_prefix("data:") {
            if !data.is_empty() {
                data.push('\n');
            }
            data.push_str(value.strip_prefix(' ').unwrap_or(value));
        }
    }
    data
}

/// Decode one event body. Empty/whitespace/comment bodies and JSON objects
/// lacking a `match_id` are keep-alives; anything else must parse as a
/// `MatchScoreUpdate` or is a (locally swallowed) parse error.
pub fn decode_event(body: &str) -> Result<StreamEvent, serde_json::Error> {
    let trimmed = body.trim();
    if trimmed.is_empty() || trimmed.starts_with(':') {
        return Ok(StreamEvent::KeepAlive);
    }
    let value: serde_json::Value = serde_json::from_str(trimmed)?;
    if value.get("match_id").is_none() {
        return Ok(StreamEvent::KeepAlive);
    }
    let update: MatchScoreUpdate = serde_json::from_value(value)?;
    Ok(StreamEvent::Update(update))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Sport;

    const UPDATE_JSON: &str = r#"{"match_id":7,"sport":"football","timestamp":"2026-03-01T14:05:00Z","data":{"score1":2,"score2":1}}"#;

    #[test]
    fn test_push_splits_events_on_blank_line() {
        let mut p = SseParser::new();
        let bodies = p.push(b"data: one\n\ndata: two\n\n");
        assert_eq!(bodies, vec!["one".to_string(), "two".to_string()]);
    }

    #[test]
    fn test_push_handles_arbitrary_chunk_boundaries() {
        let mut p = SseParser::new();
        assert!(p.push(b"data: par").is_empty());
        assert!(p.push(b"tial\n").is_empty());
        let bodies = p.push(b"\n");
        assert_eq!(bodies, vec!["partial".to_string()]);
    }

    #[test]
    fn test_push_handles_crlf_frames() {
        let mut p = SseParser::new();
        let bodies = p.push(b"data: x\r\n\r\ndata: y\r\n\r\n");
        assert_eq!(bodies, vec!["x".to_string(), "y".to_string()]);
    }

    #[test]
    fn test_comment_lines_are_dropped() {
        let mut p = SseParser::new();
        let bodies = p.push(b": keep-alive\n\n");
        assert_eq!(bodies, vec![String::new()]);
    }

    #[test]
    fn test_multiline_data_joins_with_newline() {
        let mut p = SseParser::new();
        let bodies = p.push(b"data: a\ndata: b\n\n");
        assert_eq!(bodies, vec!["a\nb".to_string()]);
    }

    #[test]
    fn test_event_and_id_fields_are_ignored() {
        let mut p = SseParser::new();
        let bodies = p.push(b"event: score\nid: 42\ndata: payload\n\n");
        assert_eq!(bodies, vec!["payload".to_string()]);
    }

    #[test]
    fn test_decode_empty_and_comment_are_keep_alive() {
        assert_eq!(decode_event("").unwrap(), StreamEvent::KeepAlive);
        assert_eq!(decode_event("   \n ").unwrap(), StreamEvent::KeepAlive);
        assert_eq!(decode_event(": ping").unwrap(), StreamEvent::KeepAlive);
    }

    #[test]
    fn test_decode_without_match_id_is_keep_alive() {
        assert_eq!(
            decode_event(r#"{"heartbeat":true}"#).unwrap(),
            StreamEvent::KeepAlive
        );
    }

    #[test]
    fn test_decode_valid_update() {
        match decode_event(UPDATE_JSON).unwrap() {
            StreamEvent::Update(u) => {
                assert_eq!(u.match_id, 7);
                assert_eq!(u.sport, Sport::Football);
                assert_eq!(u.data["score1"], 2);
            }
            other => panic!("expected update, got {other:?}"),
        }
    }

    #[test]
    fn test_decode_malformed_json_is_an_error() {
        assert!(decode_event("{not json").is_err());
    }
}
