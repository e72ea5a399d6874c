use regex::Regex;
use serde_json::{Map, Value};
use std::sync::LazyLock;

use kubetap_types::{LogFormat, LogLevel, ParsedLogLine};

/// klog header: `I0101 12:00:00.000000     1 file.go:42] rest`
static KLOG_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^([IWEF])(\d{4})\s+(\d{2}:\d{2}:\d{2}\.\d+)\s+(\d+)\s+([^\s\]]+:\d+)\]\s?(.*)$")
        .expect("valid klog regex")
});

/// `key=value`, `key="quoted value"` or a bare `"quoted message"`
static PAIR_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"([A-Za-z_][\w.\-/]*)=("(?:[^"\\]|\\.)*"|[^\s"]*)|"((?:[^"\\]|\\.)*)""#)
        .expect("valid pair regex")
});

/// Level field names for structured lines
const STRUCTURED_LEVEL_KEYS: &[&str] = &["level", "severity", "lvl", "log_level"];

/// Level field names for key=value lines
const KV_LEVEL_KEYS: &[&str] = &["level", "lvl", "severity"];

/// Key under which a bare quoted message is stored
const MESSAGE_KEY: &str = "msg";

/// Classifier that recognizes the shape of a log line for display.
///
/// Attempts run in order and the first match wins: structured, then
/// klog-style positional, then key=value, then plain. The earlier formats
/// are unambiguous by prefix; key=value detection needs at least two pairs
/// because prose can contain a stray `=`.
pub struct LogClassifier;

impl LogClassifier {
    pub fn classify(line: &str) -> ParsedLogLine {
        Self::try_structured(line)
            .or_else(|| Self::try_positional(line))
            .or_else(|| Self::try_key_value(line))
            .unwrap_or_else(|| ParsedLogLine::plain(line))
    }

    fn try_structured(line: &str) -> Option<ParsedLogLine> {
        let trimmed = line.trim();
        if !trimmed.starts_with('{') && !trimmed.starts_with('[') {
            return None;
        }

        let value: Value = serde_json::from_str(trimmed).ok()?;
        let rendered = serde_json::to_string_pretty(&value).unwrap_or_else(|_| trimmed.to_string());

        let (level, structured_data) = match value {
            Value::Object(fields) => (Self::level_from_fields(&fields), Some(fields)),
            _ => (LogLevel::Unknown, None),
        };

        Some(ParsedLogLine {
            format: LogFormat::Structured,
            level,
            rendered,
            structured_data,
        })
    }

    fn try_positional(line: &str) -> Option<ParsedLogLine> {
        let caps = KLOG_RE.captures(line)?;

        let level = match &caps[1] {
            "I" => LogLevel::Info,
            "W" => LogLevel::Warn,
            _ => LogLevel::Error,
        };
        let source = &caps[5];
        let (pairs, _) = Self::parse_pairs(&caps[6]);

        let mut rendered = format!("source: {}", source);
        for (key, value) in &pairs {
            rendered.push_str(&format!("\n{}: {}", key, value));
        }

        let mut data = Map::new();
        data.insert("date".to_string(), Value::String(caps[2].to_string()));
        data.insert("time".to_string(), Value::String(caps[3].to_string()));
        data.insert("thread".to_string(), Value::String(caps[4].to_string()));
        data.insert("source".to_string(), Value::String(source.to_string()));
        for (key, value) in pairs {
            data.insert(key, Value::String(value));
        }

        Some(ParsedLogLine {
            format: LogFormat::PositionalLeveled,
            level,
            rendered,
            structured_data: Some(data),
        })
    }

    fn try_key_value(line: &str) -> Option<ParsedLogLine> {
        if !line.contains('=') {
            return None;
        }

        let (pairs, kv_count) = Self::parse_pairs(line);
        if kv_count < 2 {
            return None;
        }

        let level = pairs
            .iter()
            .find(|(key, _)| KV_LEVEL_KEYS.iter().any(|k| key.eq_ignore_ascii_case(k)))
            .map(|(_, value)| LogLevel::from_label(value))
            .unwrap_or(LogLevel::Unknown);

        let rendered = pairs
            .iter()
            .map(|(key, value)| format!("{}: {}", key, value))
            .collect::<Vec<_>>()
            .join("\n");

        let data = pairs
            .into_iter()
            .map(|(key, value)| (key, Value::String(value)))
            .collect();

        Some(ParsedLogLine {
            format: LogFormat::LeveledKv,
            level,
            rendered,
            structured_data: Some(data),
        })
    }

    /// Extract pairs in order of appearance, plus how many of them were
    /// real `key=value` tokens. A bare quoted string becomes the `msg` pair;
    /// quoted values are unescaped.
    fn parse_pairs(text: &str) -> (Vec<(String, String)>, usize) {
        let mut pairs = Vec::new();
        let mut kv_count = 0;

        for caps in PAIR_RE.captures_iter(text) {
            if let (Some(key), Some(value)) = (caps.get(1), caps.get(2)) {
                kv_count += 1;
                pairs.push((key.as_str().to_string(), unquote(value.as_str())));
            } else if let Some(msg) = caps.get(3) {
                pairs.push((MESSAGE_KEY.to_string(), unescape(msg.as_str())));
            }
        }

        (pairs, kv_count)
    }

    fn level_from_fields(fields: &Map<String, Value>) -> LogLevel {
        for wanted in STRUCTURED_LEVEL_KEYS {
            let found = fields
                .iter()
                .find(|(key, _)| key.eq_ignore_ascii_case(wanted))
                .and_then(|(_, value)| value.as_str());
            if let Some(label) = found {
                return LogLevel::from_label(label);
            }
        }
        LogLevel::Unknown
    }
}

fn unquote(value: &str) -> String {
    match value.strip_prefix('"').and_then(|v| v.strip_suffix('"')) {
        Some(inner) => unescape(inner),
        None => value.to_string(),
    }
}

fn unescape(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut chars = s.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('n') => out.push('\n'),
            Some('t') => out.push('\t'),
            Some(other) => out.push(other),
            None => out.push('\\'),
        }
    }
    out
}
