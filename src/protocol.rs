//! Protocol message framing, parsing and quoting.
//!
//! Commands are single lines terminated by CRLF. Replies are one or more
//! lines, each starting with a 3-digit status code followed by a separator:
//!
//! - `250 text` final line of the reply
//! - `250-text` more lines follow
//! - `250+text` a data block follows, terminated by a line holding a single `.`

use crate::error::{ControlError, Result, StatusCode};
use std::borrow::Cow;
use std::collections::HashMap;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncReadExt};
use tracing::trace;

/// Line terminator used in both directions.
pub const LINE_ENDING: &str = "\r\n";

/// Longest reply line accepted, terminator included.
pub const MAX_LINE_LEN: usize = 64 * 1024;

/// The kind of a reply line, given by the character after the status code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LineKind {
    /// `code SP text`: the last line of a reply.
    Final,
    /// `code - text`: more lines follow.
    Mid,
    /// `code + text`: a dot-terminated data block follows.
    Data,
}

impl LineKind {
    /// Map a separator character to a line kind.
    pub fn from_separator(separator: char) -> Option<Self> {
        match separator {
            ' ' => Some(LineKind::Final),
            '-' => Some(LineKind::Mid),
            '+' => Some(LineKind::Data),
            _ => None,
        }
    }

    /// The separator character for this kind.
    pub fn separator(&self) -> char {
        match self {
            LineKind::Final => ' ',
            LineKind::Mid => '-',
            LineKind::Data => '+',
        }
    }
}

/// A single reply line.
///
/// For [`LineKind::Data`] lines, `text` holds the header text followed by
/// every line of the data block, joined with `\n`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReplyLine {
    /// The 3-digit status code.
    pub code: u16,
    /// Which of the three line forms this is.
    pub kind: LineKind,
    /// The text content of the line.
    pub text: String,
}

impl ReplyLine {
    /// Parse a reply line (without its line terminator).
    pub fn parse(line: &str) -> Result<Self> {
        if line.len() < 4 || !line.is_char_boundary(3) || !line.is_char_boundary(4) {
            return Err(ControlError::Protocol(format!(
                "Reply line too short: '{}'",
                line
            )));
        }

        let digits = &line[..3];
        if !digits.bytes().all(|b| b.is_ascii_digit()) {
            return Err(ControlError::Protocol(format!(
                "Invalid status code in: '{}'",
                line
            )));
        }
        let code: u16 = digits.parse().map_err(|_| {
            ControlError::Protocol(format!("Invalid status code in: '{}'", line))
        })?;

        let separator = line[3..].chars().next().unwrap_or('\0');
        let kind = LineKind::from_separator(separator).ok_or_else(|| {
            ControlError::Protocol(format!(
                "Invalid separator '{}' in: '{}'",
                separator, line
            ))
        })?;

        Ok(ReplyLine {
            code,
            kind,
            text: line[4..].to_string(),
        })
    }

    /// Check if this is the final line of a reply.
    pub fn is_end(&self) -> bool {
        self.kind == LineKind::Final
    }

    /// Check if this line carries a data block.
    pub fn is_data(&self) -> bool {
        self.kind == LineKind::Data
    }

    /// Check if this is a mid-reply line.
    pub fn is_mid(&self) -> bool {
        self.kind == LineKind::Mid
    }
}

/// A complete reply, potentially spanning multiple lines.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reply {
    /// The status code shared by every line.
    pub code: u16,
    /// All reply lines in arrival order.
    pub lines: Vec<ReplyLine>,
}

impl Reply {
    /// Build a reply from its lines.
    ///
    /// Fails if there are no lines, if any line's code differs from the
    /// first one, or if the last line is not a final line.
    pub fn new(lines: Vec<ReplyLine>) -> Result<Self> {
        let first = lines
            .first()
            .ok_or_else(|| ControlError::Protocol("Empty reply".to_string()))?;
        let code = first.code;

        if let Some(other) = lines.iter().find(|l| l.code != code) {
            return Err(ControlError::Protocol(format!(
                "Reply code changed from {} to {} mid-reply",
                code, other.code
            )));
        }

        if !lines.last().map(ReplyLine::is_end).unwrap_or(false) {
            return Err(ControlError::Protocol(
                "Reply is missing its final line".to_string(),
            ));
        }

        Ok(Reply { code, lines })
    }

    /// Get the status code as an enum.
    pub fn status_code(&self) -> StatusCode {
        StatusCode::from_u16(self.code)
    }

    /// Check if this reply indicates success.
    pub fn is_success(&self) -> bool {
        self.status_code().is_success()
    }

    /// All line texts (data blocks included) joined with `\n`.
    pub fn message(&self) -> String {
        self.lines
            .iter()
            .map(|l| l.text.as_str())
            .collect::<Vec<_>>()
            .join("\n")
    }

    /// Get the first line's text.
    pub fn first_line(&self) -> &str {
        self.lines.first().map(|l| l.text.as_str()).unwrap_or("")
    }

    /// Find the value of the first `key=value` line of the reply.
    ///
    /// For a data-block line `key=` the value is the block content.
    pub fn value(&self, key: &str) -> Option<&str> {
        self.lines.iter().find_map(|line| {
            let rest = line.text.strip_prefix(key)?.strip_prefix('=')?;
            if line.is_data() {
                Some(rest.strip_prefix('\n').unwrap_or(rest))
            } else {
                Some(rest)
            }
        })
    }

    /// Return the reply if its code equals `expected`, else a
    /// [`ControlError::CommandRejected`] carrying the code and text verbatim.
    pub fn expect_code(self, expected: u16) -> Result<Self> {
        if self.code == expected {
            Ok(self)
        } else {
            Err(ControlError::CommandRejected {
                code: self.code,
                message: self.message(),
            })
        }
    }
}

/// Read one complete reply from `reader`.
///
/// Fails with [`ControlError::Protocol`] if the stream ends before the
/// final line, if a line is malformed, or if the status code changes
/// within the reply.
pub async fn read_reply<R>(reader: &mut R) -> Result<Reply>
where
    R: AsyncBufRead + Unpin,
{
    let mut lines = Vec::new();
    let mut code = None;

    loop {
        let raw = read_protocol_line(reader).await?.ok_or_else(|| {
            ControlError::Protocol("Connection closed before final reply line".to_string())
        })?;
        trace!("Received line: {}", redact(&raw));

        let mut line = ReplyLine::parse(&raw)?;
        match code {
            None => code = Some(line.code),
            Some(expected) if expected != line.code => {
                return Err(ControlError::Protocol(format!(
                    "Reply code changed from {} to {} mid-reply",
                    expected, line.code
                )));
            }
            Some(_) => {}
        }

        if line.is_data() {
            let block = read_data_block(reader).await?;
            line.text.push('\n');
            line.text.push_str(&block.join("\n"));
        }

        let is_end = line.is_end();
        lines.push(line);
        if is_end {
            break;
        }
    }

    Reply::new(lines)
}

/// Read the lines of a data block up to (not including) the lone `.`.
async fn read_data_block<R>(reader: &mut R) -> Result<Vec<String>>
where
    R: AsyncBufRead + Unpin,
{
    let mut block = Vec::new();
    loop {
        let line = read_protocol_line(reader).await?.ok_or_else(|| {
            ControlError::Protocol("Connection closed inside data block".to_string())
        })?;
        if line == "." {
            return Ok(block);
        }
        trace!("Received data: {}", redact(&line));
        // Leading dots are doubled on the wire.
        let line = match line.strip_prefix('.') {
            Some(rest) if rest.starts_with('.') => rest.to_string(),
            _ => line,
        };
        block.push(line);
    }
}

/// Read one line without its terminator. `None` at end of stream.
async fn read_protocol_line<R>(reader: &mut R) -> Result<Option<String>>
where
    R: AsyncBufRead + Unpin,
{
    let mut buf = Vec::new();
    let bytes_read = (&mut *reader)
        .take(MAX_LINE_LEN as u64)
        .read_until(b'\n', &mut buf)
        .await?;
    if bytes_read == 0 {
        return Ok(None);
    }
    if buf.last() != Some(&b'\n') {
        if buf.len() >= MAX_LINE_LEN {
            return Err(ControlError::Protocol(format!(
                "Reply line exceeds {} bytes",
                MAX_LINE_LEN
            )));
        }
        return Err(ControlError::Protocol(format!(
            "Connection closed mid-line: '{}'",
            String::from_utf8_lossy(&buf)
        )));
    }
    let mut line = String::from_utf8(buf)
        .map_err(|_| ControlError::Protocol("Reply line is not valid UTF-8".to_string()))?;
    let trimmed = line.trim_end_matches(['\r', '\n']).len();
    line.truncate(trimmed);
    Ok(Some(line))
}

/// Terminate a single command line for sending.
///
/// The protocol is strictly line oriented, so a line containing CR or LF is
/// rejected rather than silently split into several commands.
pub fn encode_command(line: &str) -> Result<String> {
    if line.contains(['\r', '\n']) {
        return Err(ControlError::InvalidArgument(
            "Command contains a line terminator".to_string(),
        ));
    }
    let mut encoded = String::with_capacity(line.len() + LINE_ENDING.len());
    encoded.push_str(line);
    encoded.push_str(LINE_ENDING);
    Ok(encoded)
}

/// Join a keyword and its arguments into one command line.
pub fn format_command(keyword: &str, args: &[&str]) -> String {
    let mut cmd = keyword.to_string();
    for arg in args {
        cmd.push(' ');
        cmd.push_str(arg);
    }
    cmd
}

/// Quote a string as a protocol string literal.
pub fn quote(s: &str) -> String {
    let mut result = String::with_capacity(s.len() + 2);
    result.push('"');

    for c in s.chars() {
        match c {
            '"' => result.push_str("\\\""),
            '\\' => result.push_str("\\\\"),
            '\n' => result.push_str("\\n"),
            '\r' => result.push_str("\\r"),
            '\t' => result.push_str("\\t"),
            _ => result.push(c),
        }
    }

    result.push('"');
    result
}

/// Decode a protocol string literal. The input must be exactly one quoted
/// string.
pub fn unquote(s: &str) -> Result<String> {
    let (value, rest) = parse_quoted_string(s)?;
    if !rest.is_empty() {
        return Err(ControlError::Protocol(format!(
            "Trailing data after quoted string: '{}'",
            s
        )));
    }
    Ok(value)
}

/// Parse a quoted string at the start of `s`, returning the decoded value and
/// the remaining input.
fn parse_quoted_string(s: &str) -> Result<(String, &str)> {
    let body = s
        .strip_prefix('"')
        .ok_or_else(|| ControlError::Protocol(format!("Expected quoted string: '{}'", s)))?;

    let mut bytes = Vec::with_capacity(body.len());
    let mut iter = body.char_indices();

    while let Some((idx, c)) = iter.next() {
        match c {
            '"' => {
                let value = String::from_utf8(bytes).map_err(|_| {
                    ControlError::Protocol(format!("Quoted string is not UTF-8: '{}'", s))
                })?;
                return Ok((value, &body[idx + 1..]));
            }
            '\\' => {
                let (_, next) = iter.next().ok_or_else(|| {
                    ControlError::Protocol(format!("Unterminated escape in: '{}'", s))
                })?;
                match next {
                    'n' => bytes.push(b'\n'),
                    'r' => bytes.push(b'\r'),
                    't' => bytes.push(b'\t'),
                    '0'..='7' => {
                        // Octal escape of up to three digits.
                        let mut value = next as u32 - '0' as u32;
                        for _ in 0..2 {
                            match iter.clone().next() {
                                Some((_, d @ '0'..='7')) => {
                                    value = value * 8 + (d as u32 - '0' as u32);
                                    iter.next();
                                }
                                _ => break,
                            }
                        }
                        let byte = u8::try_from(value).map_err(|_| {
                            ControlError::Protocol(format!("Octal escape out of range in: '{}'", s))
                        })?;
                        bytes.push(byte);
                    }
                    other => push_char(&mut bytes, other),
                }
            }
            other => push_char(&mut bytes, other),
        }
    }

    Err(ControlError::Protocol(format!(
        "Unterminated quoted string: '{}'",
        s
    )))
}

fn push_char(bytes: &mut Vec<u8>, c: char) {
    let mut buf = [0u8; 4];
    bytes.extend_from_slice(c.encode_utf8(&mut buf).as_bytes());
}

/// Parse space-separated `KEY=value` pairs, where values may be quoted.
///
/// Bare words without `=` are skipped.
pub fn parse_key_value_pairs(text: &str) -> Result<HashMap<String, String>> {
    let mut result = HashMap::new();
    let mut remaining = text.trim_start();

    while !remaining.is_empty() {
        let word_end = remaining.find(' ').unwrap_or(remaining.len());
        let eq = match remaining[..word_end].find('=') {
            Some(eq) => eq,
            None => {
                remaining = remaining[word_end..].trim_start();
                continue;
            }
        };

        let key = remaining[..eq].to_string();
        let after = &remaining[eq + 1..];

        let (value, rest) = if after.starts_with('"') {
            parse_quoted_string(after)?
        } else {
            let end = after.find(' ').unwrap_or(after.len());
            (after[..end].to_string(), &after[end..])
        };

        result.insert(key, value);
        remaining = rest.trim_start();
    }

    Ok(result)
}

/// Mask credentials and private keys in a command or reply line so it can
/// be logged.
pub fn redact(line: &str) -> Cow<'_, str> {
    if let Some(rest) = line.strip_prefix("AUTHENTICATE ") {
        if !rest.is_empty() {
            return Cow::Borrowed("AUTHENTICATE <redacted>");
        }
    }

    if let Some(rest) = line.strip_prefix("ADD_ONION ") {
        let (key_spec, tail) = rest.split_once(' ').unwrap_or((rest, ""));
        if let Some((key_type, _)) = key_spec.split_once(':') {
            if key_type != "NEW" {
                let redacted = format!("ADD_ONION {}:<redacted> {}", key_type, tail);
                return Cow::Owned(redacted.trim_end().to_string());
            }
        }
    }

    if let Some(idx) = line.find("PrivateKey=") {
        let (head, value) = line.split_at(idx + "PrivateKey=".len());
        let key_type = value.split_once(':').map(|(t, _)| t).unwrap_or("");
        return Cow::Owned(format!("{}{}:<redacted>", head, key_type));
    }

    Cow::Borrowed(line)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_redact_secrets() {
        assert_eq!(redact("AUTHENTICATE \"hunter2\""), "AUTHENTICATE <redacted>");
        assert_eq!(redact("AUTHENTICATE 0A1B"), "AUTHENTICATE <redacted>");
        assert_eq!(redact("AUTHENTICATE"), "AUTHENTICATE");
        assert_eq!(
            redact("ADD_ONION ED25519-V3:c2VjcmV0 Port=80,127.0.0.1:80"),
            "ADD_ONION ED25519-V3:<redacted> Port=80,127.0.0.1:80"
        );
        assert_eq!(
            redact("ADD_ONION NEW:BEST Port=80,127.0.0.1:80"),
            "ADD_ONION NEW:BEST Port=80,127.0.0.1:80"
        );
        assert_eq!(
            redact("250-PrivateKey=RSA1024:MIICXAIBAAKBgQ"),
            "250-PrivateKey=RSA1024:<redacted>"
        );
        assert_eq!(redact("250 OK"), "250 OK");
    }

    async fn decode(raw: &str) -> Result<Reply> {
        let mut reader = raw.as_bytes();
        read_reply(&mut reader).await
    }

    #[test]
    fn test_reply_line_parsing() {
        let line = ReplyLine::parse("250 OK").unwrap();
        assert_eq!(line.code, 250);
        assert_eq!(line.kind, LineKind::Final);
        assert_eq!(line.text, "OK");
        assert!(line.is_end());

        let mid = ReplyLine::parse("250-version=0.4.8.10").unwrap();
        assert!(mid.is_mid());

        let data = ReplyLine::parse("250+config-text=").unwrap();
        assert!(data.is_data());
    }

    #[test]
    fn test_reply_line_too_short() {
        assert!(ReplyLine::parse("25").is_err());
        assert!(ReplyLine::parse("250").is_err());
        assert!(ReplyLine::parse("").is_err());
    }

    #[test]
    fn test_reply_line_invalid_code() {
        assert!(ReplyLine::parse("ABC OK").is_err());
        assert!(ReplyLine::parse("+25 OK").is_err());
    }

    #[test]
    fn test_reply_line_invalid_separator() {
        assert!(ReplyLine::parse("250/OK").is_err());
    }

    #[test]
    fn test_reply_line_empty_text() {
        let line = ReplyLine::parse("250 ").unwrap();
        assert_eq!(line.code, 250);
        assert!(line.text.is_empty());
    }

    #[test]
    fn test_separator_roundtrip() {
        for kind in [LineKind::Final, LineKind::Mid, LineKind::Data] {
            assert_eq!(LineKind::from_separator(kind.separator()), Some(kind));
        }
        assert_eq!(LineKind::from_separator('='), None);
    }

    #[tokio::test]
    async fn test_decode_single_line() {
        let reply = decode("250 OK\r\n").await.unwrap();
        assert_eq!(reply.code, 250);
        assert_eq!(reply.message(), "OK");
        assert_eq!(reply.lines.len(), 1);
    }

    #[tokio::test]
    async fn test_decode_multi_line() {
        let reply = decode("250-ServiceID=abc\r\n250 OK\r\n").await.unwrap();
        assert_eq!(reply.code, 250);
        assert_eq!(reply.message(), "ServiceID=abc\nOK");
        assert_eq!(reply.value("ServiceID"), Some("abc"));
    }

    #[tokio::test]
    async fn test_decode_data_block() {
        let raw = "250+config-text=\r\nSocksPort 9050\r\n..hidden\r\n.\r\n250 OK\r\n";
        let reply = decode(raw).await.unwrap();
        assert_eq!(reply.lines.len(), 2);
        assert_eq!(
            reply.message(),
            "config-text=\nSocksPort 9050\n.hidden\nOK"
        );
        assert_eq!(reply.value("config-text"), Some("SocksPort 9050\n.hidden"));
    }

    #[tokio::test]
    async fn test_decode_bare_newlines() {
        let reply = decode("250-a=1\n250 OK\n").await.unwrap();
        assert_eq!(reply.message(), "a=1\nOK");
    }

    #[tokio::test]
    async fn test_decode_truncated() {
        let err = decode("250-ServiceID=abc\r\n").await.unwrap_err();
        assert!(matches!(err, ControlError::Protocol(_)));

        let err = decode("").await.unwrap_err();
        assert!(matches!(err, ControlError::Protocol(_)));

        let err = decode("250 OK").await.unwrap_err();
        assert!(matches!(err, ControlError::Protocol(_)));
    }

    #[tokio::test]
    async fn test_decode_truncated_data_block() {
        let err = decode("250+data=\r\nline\r\n").await.unwrap_err();
        assert!(matches!(err, ControlError::Protocol(_)));
    }

    #[tokio::test]
    async fn test_decode_invalid_utf8() {
        let mut raw: &[u8] = b"250-version=\xff\xfe\r\n250 OK\r\n";
        let err = read_reply(&mut raw).await.unwrap_err();
        assert!(matches!(err, ControlError::Protocol(_)), "got {:?}", err);
    }

    #[tokio::test]
    async fn test_decode_overlong_line() {
        let raw = format!("250-a={}\r\n250 OK\r\n", "x".repeat(MAX_LINE_LEN));
        let err = decode(&raw).await.unwrap_err();
        assert!(matches!(err, ControlError::Protocol(_)), "got {:?}", err);

        let raw = format!("250-a={}\r\n250 OK\r\n", "x".repeat(1000));
        assert_eq!(decode(&raw).await.unwrap().code, 250);
    }

    #[tokio::test]
    async fn test_decode_code_mismatch() {
        let err = decode("250-a=1\r\n550 nope\r\n").await.unwrap_err();
        assert!(matches!(err, ControlError::Protocol(_)));
    }

    #[tokio::test]
    async fn test_decode_leaves_following_reply() {
        let raw = "250 OK\r\n552 Unknown\r\n";
        let mut reader = raw.as_bytes();
        let first = read_reply(&mut reader).await.unwrap();
        let second = read_reply(&mut reader).await.unwrap();
        assert_eq!(first.code, 250);
        assert_eq!(second.code, 552);
        assert_eq!(second.message(), "Unknown");
    }

    #[test]
    fn test_reply_new_rejects_bad_shapes() {
        assert!(Reply::new(vec![]).is_err());

        let no_final = vec![ReplyLine::parse("250-a=1").unwrap()];
        assert!(Reply::new(no_final).is_err());
    }

    #[test]
    fn test_expect_code() {
        let ok = Reply::new(vec![ReplyLine::parse("250 OK").unwrap()]).unwrap();
        assert!(ok.expect_code(250).is_ok());

        let rejected =
            Reply::new(vec![ReplyLine::parse("550 Unrecognized command").unwrap()]).unwrap();
        match rejected.expect_code(250) {
            Err(ControlError::CommandRejected { code, message }) => {
                assert_eq!(code, 550);
                assert_eq!(message, "Unrecognized command");
            }
            other => panic!("unexpected: {:?}", other),
        }
    }

    #[test]
    fn test_encode_command() {
        assert_eq!(encode_command("GETINFO version").unwrap(), "GETINFO version\r\n");
        assert!(matches!(
            encode_command("GETINFO version\r\nSIGNAL HALT"),
            Err(ControlError::InvalidArgument(_))
        ));
        assert!(encode_command("A\nB").is_err());
    }

    #[test]
    fn test_format_command() {
        assert_eq!(format_command("SIGNAL", &["NEWNYM"]), "SIGNAL NEWNYM");
        assert_eq!(format_command("AUTHENTICATE", &[]), "AUTHENTICATE");
    }

    #[test]
    fn test_quote() {
        assert_eq!(quote("simple"), "\"simple\"");
        assert_eq!(quote(""), "\"\"");
        assert_eq!(quote("with\"quote"), "\"with\\\"quote\"");
        assert_eq!(quote("back\\slash"), "\"back\\\\slash\"");
        assert_eq!(quote("tab\there"), "\"tab\\there\"");
        assert_eq!(quote("newline\nhere"), "\"newline\\nhere\"");
    }

    #[test]
    fn test_quote_unquote_roundtrip() {
        for s in ["p@5s\"w0rd", "", "a\\b", "C:\\\\Tor\\\"x\"", "multi\nline\r\t", "ünïcode"] {
            assert_eq!(unquote(&quote(s)).unwrap(), s);
        }
    }

    #[test]
    fn test_unquote_errors() {
        assert!(unquote("noquotes").is_err());
        assert!(unquote("\"unterminated").is_err());
        assert!(unquote("\"trailing\" junk").is_err());
        assert!(unquote("\"dangling\\").is_err());
    }

    #[test]
    fn test_unquote_octal() {
        assert_eq!(unquote("\"a\\101b\"").unwrap(), "aAb");
        assert_eq!(unquote("\"\\303\\251\"").unwrap(), "é");
    }

    #[test]
    fn test_key_value_parsing() {
        let pairs = parse_key_value_pairs("KEY1=value1 KEY2=\"quoted value\"").unwrap();
        assert_eq!(pairs.get("KEY1"), Some(&"value1".to_string()));
        assert_eq!(pairs.get("KEY2"), Some(&"quoted value".to_string()));
    }

    #[test]
    fn test_key_value_skips_bare_words() {
        let pairs = parse_key_value_pairs("METHODS=NULL bare COOKIEFILE=\"/a b/c\"").unwrap();
        assert_eq!(pairs.len(), 2);
        assert_eq!(pairs.get("COOKIEFILE"), Some(&"/a b/c".to_string()));
    }

    #[test]
    fn test_key_value_empty() {
        assert!(parse_key_value_pairs("").unwrap().is_empty());
    }

    #[test]
    fn test_key_value_with_backslash() {
        let pairs = parse_key_value_pairs(r#"PATH="C:\\Windows""#).unwrap();
        assert_eq!(pairs.get("PATH"), Some(&"C:\\Windows".to_string()));
    }

    #[test]
    fn test_key_value_unterminated() {
        assert!(parse_key_value_pairs("A=\"open").is_err());
    }
}
