//! STOMP 1.2 frame codec: text command, `name:value` headers, NUL-terminated
//! body. Heart-beat newlines between frames are tolerated and skipped.

use thiserror::Error;

/// Upper bound for a single frame; a peer that exceeds it is broken.
pub const MAX_FRAME_LEN: usize = 256 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    Connect,
    Connected,
    Subscribe,
    Unsubscribe,
    Send,
    Message,
    Error,
    Receipt,
    Disconnect,
}

impl Command {
    pub fn as_str(&self) -> &'static str {
        match self {
            Command::Connect => "CONNECT",
            Command::Connected => "CONNECTED",
            Command::Subscribe => "SUBSCRIBE",
            Command::Unsubscribe => "UNSUBSCRIBE",
            Command::Send => "SEND",
            Command::Message => "MESSAGE",
            Command::Error => "ERROR",
            Command::Receipt => "RECEIPT",
            Command::Disconnect => "DISCONNECT",
        }
    }

    fn from_line(line: &str) -> Result<Self, FrameDecodeError> {
        match line {
            "CONNECT" => Ok(Command::Connect),
            "CONNECTED" => Ok(Command::Connected),
            "SUBSCRIBE" => Ok(Command::Subscribe),
            "UNSUBSCRIBE" => Ok(Command::Unsubscribe),
            "SEND" => Ok(Command::Send),
            "MESSAGE" => Ok(Command::Message),
            "ERROR" => Ok(Command::Error),
            "RECEIPT" => Ok(Command::Receipt),
            "DISCONNECT" => Ok(Command::Disconnect),
            other => Err(FrameDecodeError::UnknownCommand(other.to_owned())),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub command: Command,
    pub headers: Vec<(String, String)>,
    pub body: String,
}

impl Frame {
    pub fn connect(host: &str) -> Self {
        Self {
            command: Command::Connect,
            headers: vec![
                ("accept-version".to_owned(), "1.2".to_owned()),
                ("host".to_owned(), host.to_owned()),
                ("heart-beat".to_owned(), "0,0".to_owned()),
            ],
            body: String::new(),
        }
    }

    pub fn subscribe(id: &str, destination: &str) -> Self {
        Self {
            command: Command::Subscribe,
            headers: vec![
                ("id".to_owned(), id.to_owned()),
                ("destination".to_owned(), destination.to_owned()),
                ("ack".to_owned(), "auto".to_owned()),
            ],
            body: String::new(),
        }
    }

    pub fn unsubscribe(id: &str) -> Self {
        Self {
            command: Command::Unsubscribe,
            headers: vec![("id".to_owned(), id.to_owned())],
            body: String::new(),
        }
    }

    pub fn send(destination: &str, body: String) -> Self {
        Self {
            command: Command::Send,
            headers: vec![
                ("destination".to_owned(), destination.to_owned()),
                ("content-type".to_owned(), "application/json".to_owned()),
            ],
            body,
        }
    }

    pub fn disconnect() -> Self {
        Self {
            command: Command::Disconnect,
            headers: Vec::new(),
            body: String::new(),
        }
    }

    /// First header with the given name, if any.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(header, _)| header == name)
            .map(|(_, value)| value.as_str())
    }

    pub fn destination(&self) -> Option<&str> {
        self.header("destination")
    }

    /// Serializes the frame, appending `content-length` when a body is
    /// present so binary-safe peers never scan for the terminator.
    pub fn encode(&self) -> Vec<u8> {
        // CONNECT headers are exempt from escaping per the protocol.
        let escape = self.command != Command::Connect;

        let mut out = Vec::with_capacity(64 + self.body.len());
        out.extend_from_slice(self.command.as_str().as_bytes());
        out.push(b'\n');
        for (name, value) in &self.headers {
            let line = if escape {
                format!("{}:{}", escape_header(name), escape_header(value))
            } else {
                format!("{name}:{value}")
            };
            out.extend_from_slice(line.as_bytes());
            out.push(b'\n');
        }
        if !self.body.is_empty() {
            out.extend_from_slice(format!("content-length:{}", self.body.len()).as_bytes());
            out.push(b'\n');
        }
        out.push(b'\n');
        out.extend_from_slice(self.body.as_bytes());
        out.push(0);
        out
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FrameDecodeError {
    #[error("unknown command {0:?}")]
    UnknownCommand(String),
    #[error("malformed header line {0:?}")]
    MalformedHeader(String),
    #[error("frame body is not valid UTF-8")]
    BodyNotUtf8,
    #[error("frame body is not NUL-terminated where content-length said it ends")]
    MissingTerminator,
    #[error("frame exceeds the {MAX_FRAME_LEN} byte limit")]
    Oversized,
}

/// Incremental decoder over a raw byte stream. Feed whatever the socket
/// yields; `next` returns one frame at a time once enough bytes arrived.
/// A decode error is fatal for the stream, the decoder does not resync.
#[derive(Debug, Default)]
pub struct FrameDecoder {
    buffer: Vec<u8>,
}

impl FrameDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn feed(&mut self, bytes: &[u8]) {
        self.buffer.extend_from_slice(bytes);
    }

    pub fn next(&mut self) -> Result<Option<Frame>, FrameDecodeError> {
        // Anything before the command line can only be heart-beat newlines.
        match self
            .buffer
            .iter()
            .position(|byte| *byte != b'\n' && *byte != b'\r')
        {
            Some(start) => {
                if start > 0 {
                    self.buffer.drain(..start);
                }
            }
            None => {
                self.buffer.clear();
                return Ok(None);
            }
        }

        let Some((headers_len, body_start)) = split_headers(&self.buffer) else {
            return self.incomplete();
        };

        let header_text = std::str::from_utf8(&self.buffer[..headers_len])
            .map_err(|_| FrameDecodeError::MalformedHeader("<non-utf8>".to_owned()))?;
        let mut lines = header_text.split('\n').map(|line| line.trim_end_matches('\r'));
        let command = Command::from_line(lines.next().unwrap_or_default())?;
        let unescape_values = command != Command::Connected;

        let mut headers = Vec::new();
        let mut content_length = None;
        for line in lines {
            if line.is_empty() {
                continue;
            }
            let Some((name, value)) = line.split_once(':') else {
                return Err(FrameDecodeError::MalformedHeader(line.to_owned()));
            };
            let (name, value) = if unescape_values {
                (unescape_header(name)?, unescape_header(value)?)
            } else {
                (name.to_owned(), value.to_owned())
            };
            if name == "content-length" {
                let length = value
                    .trim()
                    .parse::<usize>()
                    .map_err(|_| FrameDecodeError::MalformedHeader(line.to_owned()))?;
                content_length = Some(length);
            }
            headers.push((name, value));
        }

        let terminator = match content_length {
            Some(length) => {
                let end = body_start.checked_add(length).ok_or(FrameDecodeError::Oversized)?;
                if end >= self.buffer.len() {
                    return self.incomplete();
                }
                if self.buffer[end] != 0 {
                    return Err(FrameDecodeError::MissingTerminator);
                }
                end
            }
            None => match self.buffer[body_start..].iter().position(|byte| *byte == 0) {
                Some(offset) => body_start + offset,
                None => return self.incomplete(),
            },
        };

        let body = String::from_utf8(self.buffer[body_start..terminator].to_vec())
            .map_err(|_| FrameDecodeError::BodyNotUtf8)?;
        self.buffer.drain(..=terminator);

        Ok(Some(Frame {
            command,
            headers,
            body,
        }))
    }

    fn incomplete(&self) -> Result<Option<Frame>, FrameDecodeError> {
        if self.buffer.len() > MAX_FRAME_LEN {
            return Err(FrameDecodeError::Oversized);
        }
        Ok(None)
    }
}

/// Index of the header section end plus the index where the body starts.
/// Handles both bare LF and CRLF line endings.
fn split_headers(buffer: &[u8]) -> Option<(usize, usize)> {
    let mut i = 0;
    while i < buffer.len() {
        if buffer[i] == b'\n' {
            let mut j = i + 1;
            if j < buffer.len() && buffer[j] == b'\r' {
                j += 1;
            }
            if j < buffer.len() && buffer[j] == b'\n' {
                return Some((i, j + 1));
            }
        }
        i += 1;
    }
    None
}

fn escape_header(raw: &str) -> String {
    let mut escaped = String::with_capacity(raw.len());
    for ch in raw.chars() {
        match ch {
            '\\' => escaped.push_str("\\\\"),
            '\r' => escaped.push_str("\\r"),
            '\n' => escaped.push_str("\\n"),
            ':' => escaped.push_str("\\c"),
            other => escaped.push(other),
        }
    }
    escaped
}

fn unescape_header(raw: &str) -> Result<String, FrameDecodeError> {
    let mut unescaped = String::with_capacity(raw.len());
    let mut chars = raw.chars();
    while let Some(ch) = chars.next() {
        if ch != '\\' {
            unescaped.push(ch);
            continue;
        }
        match chars.next() {
            Some('\\') => unescaped.push('\\'),
            Some('r') => unescaped.push('\r'),
            Some('n') => unescaped.push('\n'),
            Some('c') => unescaped.push(':'),
            _ => return Err(FrameDecodeError::MalformedHeader(raw.to_owned())),
        }
    }
    Ok(unescaped)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn decode_all(bytes: &[u8]) -> Vec<Frame> {
        let mut decoder = FrameDecoder::new();
        decoder.feed(bytes);
        let mut frames = Vec::new();
        while let Some(frame) = decoder.next().expect("decode should succeed") {
            frames.push(frame);
        }
        frames
    }

    #[test]
    fn encodes_connect_frame() {
        let bytes = Frame::connect("plantcare").encode();

        assert_eq!(
            bytes,
            b"CONNECT\naccept-version:1.2\nhost:plantcare\nheart-beat:0,0\n\n\0"
        );
    }

    #[test]
    fn encodes_send_with_content_length() {
        let bytes = Frame::send("/app/chat.send", "{\"a\":1}".to_owned()).encode();
        let text = String::from_utf8_lossy(&bytes);

        assert!(text.starts_with("SEND\n"));
        assert!(text.contains("destination:/app/chat.send\n"));
        assert!(text.contains("content-length:7\n"));
        assert!(text.ends_with("{\"a\":1}\0"));
    }

    #[test]
    fn decodes_connected_frame() {
        let frames = decode_all(b"CONNECTED\nversion:1.2\nserver:broker/1.0\n\n\0");

        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].command, Command::Connected);
        assert_eq!(frames[0].header("version"), Some("1.2"));
        assert!(frames[0].body.is_empty());
    }

    #[test]
    fn content_length_makes_embedded_nul_safe() {
        let body = "hi\0there";
        let mut raw = format!(
            "MESSAGE\ndestination:/topic/public\ncontent-length:{}\n\n{}",
            body.len(),
            body
        )
        .into_bytes();
        raw.push(0);

        let frames = decode_all(&raw);

        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].destination(), Some("/topic/public"));
        assert_eq!(frames[0].body, body);
    }

    #[test]
    fn decodes_frame_fed_byte_by_byte() {
        let raw = b"MESSAGE\ndestination:/topic/public\n\nhello\0";
        let mut decoder = FrameDecoder::new();

        for (i, byte) in raw.iter().enumerate() {
            decoder.feed(std::slice::from_ref(byte));
            let frame = decoder.next().expect("decode should succeed");
            if i + 1 < raw.len() {
                assert!(frame.is_none(), "frame completed early at byte {i}");
            } else {
                assert_eq!(frame.expect("final byte completes the frame").body, "hello");
            }
        }
    }

    #[test]
    fn decodes_two_frames_from_one_read() {
        let frames =
            decode_all(b"MESSAGE\ndestination:/topic/public\n\nfirst\0MESSAGE\ndestination:/topic/public\n\nsecond\0");

        assert_eq!(frames.len(), 2);
        assert_eq!(frames[0].body, "first");
        assert_eq!(frames[1].body, "second");
    }

    #[test]
    fn skips_heart_beat_newlines_between_frames() {
        let frames = decode_all(b"\n\r\n\nCONNECTED\nversion:1.2\n\n\0\n\nMESSAGE\ndestination:/topic/public\n\nhi\0\n");

        assert_eq!(frames.len(), 2);
        assert_eq!(frames[1].body, "hi");
    }

    #[test]
    fn accepts_crlf_line_endings() {
        let frames = decode_all(b"CONNECTED\r\nversion:1.2\r\n\r\n\0");

        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].header("version"), Some("1.2"));
    }

    #[test]
    fn header_escaping_round_trips() {
        let frame = Frame::send("/app/chat.send", String::new());
        let mut frame = frame;
        frame
            .headers
            .push(("note".to_owned(), "a:b\nline\\end".to_owned()));

        let decoded = {
            let mut bytes = frame.encode();
            // Re-tag as MESSAGE so the decoder unescapes it.
            bytes.splice(..4, b"MESSAGE".iter().copied());
            decode_all(&bytes)
        };

        assert_eq!(decoded[0].header("note"), Some("a:b\nline\\end"));
    }

    #[test]
    fn rejects_unknown_command() {
        let mut decoder = FrameDecoder::new();
        decoder.feed(b"BOGUS\n\n\0");

        assert_eq!(
            decoder.next(),
            Err(FrameDecodeError::UnknownCommand("BOGUS".to_owned()))
        );
    }

    #[test]
    fn rejects_header_line_without_separator() {
        let mut decoder = FrameDecoder::new();
        decoder.feed(b"MESSAGE\nbroken header\n\n\0");

        assert!(matches!(
            decoder.next(),
            Err(FrameDecodeError::MalformedHeader(_))
        ));
    }

    #[test]
    fn rejects_body_not_ending_in_nul() {
        let mut decoder = FrameDecoder::new();
        decoder.feed(b"MESSAGE\ncontent-length:2\n\nhix\0");

        assert_eq!(decoder.next(), Err(FrameDecodeError::MissingTerminator));
    }

    #[test]
    fn rejects_oversized_frame() {
        let mut decoder = FrameDecoder::new();
        decoder.feed(b"MESSAGE\ndestination:/topic/public\n\n");
        decoder.feed(&vec![b'x'; MAX_FRAME_LEN + 1]);

        assert_eq!(decoder.next(), Err(FrameDecodeError::Oversized));
    }

    #[test]
    fn rejects_invalid_escape_sequence() {
        let mut decoder = FrameDecoder::new();
        decoder.feed(b"MESSAGE\nnote:bad\\tescape\n\n\0");

        assert!(matches!(
            decoder.next(),
            Err(FrameDecodeError::MalformedHeader(_))
        ));
    }
}
