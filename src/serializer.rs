//! On-disk encoding of a flat snapshot. Defaults to a properties file.
//!
//! Implement [`Serializer`] if you need a different format. A flat JSON
//! object encoding ships alongside the properties one.

use crate::change::Snapshot;
use crate::error::{Error, Result};

/// Converts snapshots to/from bytes for persistence.
pub trait Serializer: Send + Sync {
    /// Encode a snapshot to bytes.
    fn serialize(&self, data: &Snapshot) -> Result<Vec<u8>>;

    /// Decode bytes back into a snapshot. Malformed input is an error, never
    /// an empty snapshot.
    fn deserialize(&self, bytes: &[u8]) -> Result<Snapshot>;
}

// ---- properties --------------------------------------------------------------

/// `key=value` lines with `#`/`!` comments and backslash escapes, compatible
/// with the usual properties-file conventions. Written as UTF-8; `\uXXXX`
/// escapes are accepted on read.
#[derive(Debug, Clone, Default)]
pub struct PropertiesSerializer {
    header: Option<String>,
}

impl PropertiesSerializer {
    /// Properties encoding without a header comment.
    pub fn new() -> Self {
        Self::default()
    }

    /// Properties encoding that starts every file with `# <header>`.
    pub fn with_header(header: impl Into<String>) -> Self {
        Self {
            header: Some(header.into()),
        }
    }
}

impl Serializer for PropertiesSerializer {
    fn serialize(&self, data: &Snapshot) -> Result<Vec<u8>> {
        let mut out = String::new();
        if let Some(header) = &self.header {
            for line in header.lines() {
                out.push_str("# ");
                out.push_str(line);
                out.push('\n');
            }
        }
        for (key, value) in data {
            escape_into(&mut out, key, true);
            out.push('=');
            escape_into(&mut out, value, false);
            out.push('\n');
        }
        Ok(out.into_bytes())
    }

    fn deserialize(&self, bytes: &[u8]) -> Result<Snapshot> {
        let text = std::str::from_utf8(bytes)
            .map_err(|e| Error::Parse(format!("store file is not valid UTF-8: {e}")))?;
        parse_properties(text)
    }
}

fn escape_into(out: &mut String, s: &str, is_key: bool) {
    for (i, c) in s.chars().enumerate() {
        match c {
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            '\x0c' => out.push_str("\\f"),
            '=' | ':' | '#' | '!' => {
                out.push('\\');
                out.push(c);
            }
            ' ' if is_key || i == 0 => out.push_str("\\ "),
            c if c.is_control() => {
                let mut buf = [0u16; 2];
                for unit in c.encode_utf16(&mut buf) {
                    out.push_str(&format!("\\u{unit:04X}"));
                }
            }
            c => out.push(c),
        }
    }
}

/// Joins continuation lines: a line ending in an odd number of backslashes
/// continues on the next one, whose leading whitespace is dropped.
fn logical_lines(text: &str) -> Vec<(usize, String)> {
    let mut lines = Vec::new();
    let mut current: Option<(usize, String)> = None;
    for (idx, raw) in text.lines().enumerate() {
        let line = match &current {
            Some(_) => raw.trim_start_matches([' ', '\t', '\x0c']),
            None => {
                let trimmed = raw.trim_start_matches([' ', '\t', '\x0c']);
                if trimmed.is_empty() || trimmed.starts_with('#') || trimmed.starts_with('!') {
                    continue;
                }
                trimmed
            }
        };
        let trailing = line.chars().rev().take_while(|&c| c == '\\').count();
        let (body, continues) = if trailing % 2 == 1 {
            (&line[..line.len() - 1], true)
        } else {
            (line, false)
        };
        let entry = current.get_or_insert_with(|| (idx + 1, String::new()));
        entry.1.push_str(body);
        if !continues {
            if let Some(done) = current.take() {
                lines.push(done);
            }
        }
    }
    if let Some(done) = current.take() {
        lines.push(done);
    }
    lines
}

fn parse_properties(text: &str) -> Result<Snapshot> {
    let mut snapshot = Snapshot::new();
    for (lineno, line) in logical_lines(text) {
        let (key, value) = split_entry(&line);
        let key = unescape(key, lineno)?;
        let value = unescape(value, lineno)?;
        snapshot.insert(key, value);
    }
    Ok(snapshot)
}

/// Splits a logical line at the first unescaped `=`, `:` or whitespace.
fn split_entry(line: &str) -> (&str, &str) {
    let bytes = line.as_bytes();
    let mut i = 0;
    let mut key_end = line.len();
    while i < bytes.len() {
        match bytes[i] {
            b'\\' => i += 2,
            b'=' | b':' | b' ' | b'\t' | b'\x0c' => {
                key_end = i;
                break;
            }
            _ => i += 1,
        }
    }
    let key_end = key_end.min(line.len());
    let mut rest = line[key_end..].trim_start_matches([' ', '\t', '\x0c']);
    if let Some(stripped) = rest.strip_prefix(['=', ':']) {
        rest = stripped.trim_start_matches([' ', '\t', '\x0c']);
    }
    (&line[..key_end], rest)
}

fn unescape(s: &str, lineno: usize) -> Result<String> {
    let mut out = String::with_capacity(s.len());
    let mut chars = s.chars();
    let mut pending_high: Option<u16> = None;
    while let Some(c) = chars.next() {
        if c != '\\' {
            no_pending_surrogate(&mut pending_high, lineno)?;
            out.push(c);
            continue;
        }
        let Some(esc) = chars.next() else {
            break;
        };
        if esc == 'u' {
            let hex: String = chars.by_ref().take(4).collect();
            let unit = (hex.len() == 4)
                .then(|| u16::from_str_radix(&hex, 16).ok())
                .flatten()
                .ok_or_else(|| {
                    Error::Parse(format!("line {lineno}: malformed \\u escape {hex:?}"))
                })?;
            match (pending_high.take(), unit) {
                (Some(high), 0xDC00..=0xDFFF) => {
                    let decoded = char::decode_utf16([high, unit])
                        .next()
                        .and_then(|r| r.ok())
                        .ok_or_else(|| {
                            Error::Parse(format!("line {lineno}: invalid surrogate pair"))
                        })?;
                    out.push(decoded);
                }
                (Some(_), _) => {
                    return Err(Error::Parse(format!("line {lineno}: unpaired surrogate")))
                }
                (None, 0xD800..=0xDBFF) => pending_high = Some(unit),
                (None, 0xDC00..=0xDFFF) => {
                    return Err(Error::Parse(format!("line {lineno}: unpaired surrogate")))
                }
                (None, _) => {
                    // non-surrogate BMP units are always valid scalars
                    out.push(char::from_u32(u32::from(unit)).unwrap_or('\u{FFFD}'));
                }
            }
            continue;
        }
        no_pending_surrogate(&mut pending_high, lineno)?;
        out.push(match esc {
            't' => '\t',
            'n' => '\n',
            'r' => '\r',
            'f' => '\x0c',
            other => other,
        });
    }
    no_pending_surrogate(&mut pending_high, lineno)?;
    Ok(out)
}

fn no_pending_surrogate(pending: &mut Option<u16>, lineno: usize) -> Result<()> {
    if pending.take().is_some() {
        return Err(Error::Parse(format!("line {lineno}: unpaired surrogate")));
    }
    Ok(())
}

// ---- json --------------------------------------------------------------------

/// Flat JSON object encoding with optional pretty-printing.
#[derive(Debug, Clone, Default)]
pub struct JsonSerializer {
    pretty: bool,
}

impl JsonSerializer {
    /// Compact JSON (single line, no extra whitespace).
    pub fn new() -> Self {
        Self::default()
    }

    /// Pretty-printed JSON with indentation.
    pub fn pretty() -> Self {
        Self { pretty: true }
    }
}

impl Serializer for JsonSerializer {
    fn serialize(&self, data: &Snapshot) -> Result<Vec<u8>> {
        let bytes = if self.pretty {
            serde_json::to_vec_pretty(data)
        } else {
            serde_json::to_vec(data)
        };
        bytes.map_err(Error::from)
    }

    fn deserialize(&self, bytes: &[u8]) -> Result<Snapshot> {
        serde_json::from_slice(bytes).map_err(Error::from)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn decode(text: &str) -> Result<Snapshot> {
        PropertiesSerializer::new().deserialize(text.as_bytes())
    }

    #[test]
    fn reads_comments_separators_and_blank_lines() {
        let snap = decode("# header\n! bang comment\n\na=1\nb : 2\nc 3\n  d=\n").unwrap();
        assert_eq!(snap.get("a").map(String::as_str), Some("1"));
        assert_eq!(snap.get("b").map(String::as_str), Some("2"));
        assert_eq!(snap.get("c").map(String::as_str), Some("3"));
        assert_eq!(snap.get("d").map(String::as_str), Some(""));
        assert_eq!(snap.len(), 4);
    }

    #[test]
    fn escapes_survive_a_write_and_read() {
        let mut snap = Snapshot::new();
        snap.insert("app/we ird=key:#".into(), " leading space\\and\nnewline=".into());
        snap.insert("tab\tkey".into(), "ünïcode ✓".into());
        let ser = PropertiesSerializer::with_header("prefs");
        let bytes = ser.serialize(&snap).unwrap();
        let text = String::from_utf8(bytes.clone()).unwrap();
        assert!(text.starts_with("# prefs\n"));
        assert_eq!(text.lines().count(), 3);
        assert_eq!(ser.deserialize(&bytes).unwrap(), snap);
    }

    #[test]
    fn continuation_lines_are_joined() {
        let snap = decode("long = one \\\n      two\nnext=x\n").unwrap();
        assert_eq!(snap.get("long").map(String::as_str), Some("one two"));
        assert_eq!(snap.get("next").map(String::as_str), Some("x"));
    }

    #[test]
    fn unicode_escapes_decode() {
        let snap = decode("k=\\u0041\\uD83D\\uDE00\n").unwrap();
        assert_eq!(snap.get("k").map(String::as_str), Some("A\u{1F600}"));
    }

    #[test]
    fn malformed_unicode_escape_is_a_parse_error() {
        assert!(matches!(decode("k=\\u12G4\n"), Err(Error::Parse(_))));
        assert!(matches!(decode("k=\\uD83D\n"), Err(Error::Parse(_))));
    }

    #[test]
    fn invalid_utf8_is_a_parse_error() {
        let err = PropertiesSerializer::new()
            .deserialize(&[b'k', b'=', 0xff, 0xfe])
            .unwrap_err();
        assert!(matches!(err, Error::Parse(_)));
    }

    #[test]
    fn json_pretty_and_compact() {
        let mut snap = Snapshot::new();
        snap.insert("a/b".into(), "1".into());
        let compact = JsonSerializer::new().serialize(&snap).unwrap();
        assert!(!compact.contains(&b'\n'));
        let pretty = JsonSerializer::pretty().serialize(&snap).unwrap();
        assert!(pretty.contains(&b'\n'));
        assert_eq!(JsonSerializer::new().deserialize(&pretty).unwrap(), snap);
    }

    #[test]
    fn json_garbage_is_a_parse_error() {
        assert!(matches!(
            JsonSerializer::new().deserialize(b"{not json"),
            Err(Error::Parse(_))
        ));
    }
}
