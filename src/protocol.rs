//! AMI frame codec: stream splitting and frame parsing

use crate::{
    buffer::AmiBuffer,
    constants::{
        EVENT_PREFIX, FRAME_TERMINATOR, LINE_TERMINATOR, MAX_FRAME_SIZE, RESPONSE_PREFIX,
    },
    error::{AmiError, AmiResult},
    fields::Fields,
    headers::FieldName,
};
use tracing::{trace, warn};

/// Frame classification derived from the first line
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageKind {
    /// First line starts with `Event: `
    Event,
    /// First line starts with `Response: `
    Response,
    /// Anything else; never delivered past the reader
    Unknown,
}

impl MessageKind {
    /// Classify a frame by its first-line prefix (case-sensitive).
    pub fn classify(frame: &str) -> Self {
        if frame.starts_with(EVENT_PREFIX) {
            MessageKind::Event
        } else if frame.starts_with(RESPONSE_PREFIX) {
            MessageKind::Response
        } else {
            MessageKind::Unknown
        }
    }
}

/// Parsed AMI frame
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AmiMessage {
    /// Message kind
    pub kind: MessageKind,
    /// Message fields in arrival order
    pub fields: Fields,
}

impl AmiMessage {
    /// Parse one frame's text into an ordered field map.
    ///
    /// Lines without a colon are logged and skipped. Field names have
    /// surrounding whitespace and every hyphen removed; values are trimmed.
    /// Repeated names are joined with `\n` (see [`Fields::append`]).
    pub fn parse(frame: &str) -> Self {
        let kind = MessageKind::classify(frame);
        let mut fields = Fields::new();

        for line in frame.lines() {
            if line
                .trim()
                .is_empty()
            {
                continue;
            }
            match parse_line(line) {
                Ok((name, value)) => fields.append(name, value),
                Err(e) => warn!("[RECV] {}", e),
            }
        }

        Self { kind, fields }
    }

    /// Correlation token echoed by the server, if any.
    pub fn action_id(&self) -> Option<&str> {
        self.fields
            .get(FieldName::ActionId)
    }
}

/// Split a `Name: Value` line on its first colon.
pub fn parse_line(line: &str) -> AmiResult<(String, String)> {
    let Some(colon_pos) = line.find(':') else {
        return Err(AmiError::MalformedFrame {
            line: line.to_string(),
        });
    };
    let name: String = line[..colon_pos]
        .trim()
        .chars()
        .filter(|c| *c != '-')
        .collect();
    let value = line[colon_pos + 1..]
        .trim()
        .to_string();
    Ok((name, value))
}

/// Outcome of one [`split_frame`] call
#[derive(Debug, PartialEq, Eq)]
pub enum Split<'a> {
    /// A complete frame (terminator excluded) and how many bytes it used,
    /// including the terminator and any line breaks around it
    Frame { frame: &'a [u8], consumed: usize },
    /// No complete frame yet. `consumed` counts leading line breaks that may
    /// be discarded; everything after them must be kept for the next call.
    NeedMore { consumed: usize },
}

fn is_line_break(byte: &u8) -> bool {
    *byte == b'\r' || *byte == b'\n'
}

/// Find the next frame in `data`.
///
/// Frames end at a blank line (`\r\n\r\n`). Stray line breaks before a frame
/// and extra line breaks after its terminator are skipped, so servers that
/// pad frames with additional blank lines split identically regardless of
/// where TCP chunk boundaries fall. With `at_eof`, a non-empty unterminated
/// remainder is returned as the final frame.
pub fn split_frame(data: &[u8], at_eof: bool) -> Split<'_> {
    split_frame_from(data, at_eof, 0)
}

/// [`split_frame`] that skips the first `scanned` bytes of `data`, already
/// known to hold no terminator, when searching.
fn split_frame_from(data: &[u8], at_eof: bool, scanned: usize) -> Split<'_> {
    let start = data
        .iter()
        .take_while(|b| is_line_break(b))
        .count();
    let rest = &data[start..];

    let terminator = FRAME_TERMINATOR.as_bytes();
    // Back up so a terminator straddling the previous read is still found.
    let from = scanned
        .saturating_sub(start)
        .saturating_sub(terminator.len() - 1)
        .min(rest.len());
    if let Some(end) = rest[from..]
        .windows(terminator.len())
        .position(|window| window == terminator)
        .map(|offset| from + offset)
    {
        let after = end + terminator.len();
        let padding = rest[after..]
            .iter()
            .take_while(|b| is_line_break(b))
            .count();
        return Split::Frame {
            frame: &rest[..end],
            consumed: start + after + padding,
        };
    }

    if at_eof && !rest.is_empty() {
        return Split::Frame {
            frame: rest,
            consumed: data.len(),
        };
    }

    Split::NeedMore { consumed: start }
}

/// Incremental AMI stream parser
///
/// Accumulates raw socket bytes and yields complete frames. A partial frame
/// stays buffered verbatim until the rest of it arrives.
pub struct AmiParser {
    buffer: AmiBuffer,
    /// Leading bytes of the buffer already searched without finding a
    /// terminator
    scanned: usize,
}

impl AmiParser {
    /// Create new parser
    pub fn new() -> Self {
        Self {
            buffer: AmiBuffer::new(),
            scanned: 0,
        }
    }

    /// Add data to the parser buffer
    pub fn add_data(&mut self, data: &[u8]) -> AmiResult<()> {
        self.buffer
            .extend_from_slice(data);
        self.buffer
            .check_size_limits()?;
        Ok(())
    }

    /// Take a single `\r\n`-terminated line (used for the server greeting).
    pub fn take_line(&mut self) -> Option<String> {
        let end = self
            .buffer
            .find(LINE_TERMINATOR.as_bytes())?;
        let line = String::from_utf8_lossy(&self.buffer.data()[..end]).into_owned();
        self.buffer
            .advance(end + LINE_TERMINATOR.len());
        self.buffer
            .compact();
        self.scanned = 0;
        Some(line)
    }

    /// Try to extract the next complete frame from the buffer.
    pub fn next_frame(&mut self) -> AmiResult<Option<String>> {
        self.split(false)
    }

    /// Drain whatever is left once the peer has closed the stream.
    pub fn finish(&mut self) -> AmiResult<Option<String>> {
        self.split(true)
    }

    fn split(&mut self, at_eof: bool) -> AmiResult<Option<String>> {
        let (frame, consumed) = match split_frame_from(self.buffer.data(), at_eof, self.scanned) {
            Split::Frame { frame, consumed } => {
                (Some(String::from_utf8_lossy(frame).into_owned()), consumed)
            }
            Split::NeedMore { consumed } => (None, consumed),
        };

        self.buffer
            .advance(consumed);
        self.buffer
            .compact();
        self.scanned = if frame.is_some() {
            0
        } else {
            self.buffer
                .len()
        };

        if frame.is_none() && self.buffer.len() > MAX_FRAME_SIZE {
            return Err(AmiError::protocol_error(format!(
                "Unterminated frame of {} bytes exceeds limit {}",
                self.buffer.len(),
                MAX_FRAME_SIZE
            )));
        }

        if let Some(frame) = &frame {
            trace!("[RECV] Split frame of {} bytes", frame.len());
        }
        Ok(frame)
    }

    /// Bytes currently buffered.
    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }
}

impl Default for AmiParser {
    fn default() -> Self {
        Self::new()
    }
}
