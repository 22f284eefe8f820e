//! `+IPD` frame demultiplexer and CRLF line splitter.
//!
//! Pure byte-stream state machine: the reader task feeds every chunk it
//! reads from the UART and gets back, in stream order, the complete
//! control lines and data frames contained so far.
//!
//! ```text
//! "\r\nOK\r\n+IPD,0,5:hello\r\nSEND OK\r\n"
//!          │      │               │
//!          ▼      ▼               ▼
//!   Line("OK")  Frame(0,"hello")  Line("SEND OK")
//! ```
//!
//! A frame is only emitted once its whole payload has arrived, so the
//! result does not depend on how the stream was chunked.

use log::warn;

use super::channels::LinkId;
use crate::error::LinkError;

const IPD_TAG: &[u8] = b"+IPD,";

/// Longest `+IPD,...:` header accepted (id, length, peer address, port).
const MAX_HEADER_LEN: usize = 64;

/// Inbound data frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub link_id: LinkId,
    pub payload: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DemuxEvent {
    /// Complete non-empty reply line, CRLF stripped.
    Line(String),
    Frame(Frame),
    /// A `+IPD,` header that could not be parsed and was skipped.
    Malformed,
}

/// Parsed `+IPD` header; `body_at` is the payload offset.
#[derive(Debug, PartialEq, Eq)]
struct Header {
    link_id: LinkId,
    len: usize,
    body_at: usize,
}

pub struct FrameDemultiplexer {
    acc: Vec<u8>,
    max_line: usize,
    max_frame: usize,
}

impl FrameDemultiplexer {
    pub fn new(max_line: usize, max_frame: usize) -> Self {
        Self {
            acc: Vec::with_capacity(max_line),
            max_line: max_line.max(1),
            max_frame,
        }
    }

    /// Bytes held back waiting for a line end or the rest of a frame.
    pub fn buffered(&self) -> usize {
        self.acc.len()
    }

    /// Drop everything buffered (stream resynchronisation).
    pub fn reset(&mut self) {
        self.acc.clear();
    }

    /// Append `data` and return every event it completes.
    pub fn feed(&mut self, data: &[u8]) -> Vec<DemuxEvent> {
        self.acc.extend_from_slice(data);
        let mut events = Vec::new();

        loop {
            let Some(pos) = find(&self.acc, IPD_TAG) else {
                self.drain_lines(&mut events);
                break;
            };

            if pos > 0 {
                // +IPD always starts a fresh line; whatever precedes it is
                // complete text.
                let head: Vec<u8> = self.acc.drain(..pos).collect();
                self.split_head(&head, &mut events);
            }

            match self.parse_header() {
                Ok(None) => break,
                Ok(Some(Header {
                    link_id,
                    len,
                    body_at,
                })) => {
                    if self.acc.len() < body_at + len {
                        break;
                    }
                    let payload = self.acc[body_at..body_at + len].to_vec();
                    self.acc.drain(..body_at + len);
                    events.push(DemuxEvent::Frame(Frame { link_id, payload }));
                }
                Err(e) => {
                    warn!(
                        "RX: {}: {:?}",
                        e,
                        String::from_utf8_lossy(&self.acc[..self.acc.len().min(24)])
                    );
                    self.acc.drain(..IPD_TAG.len());
                    events.push(DemuxEvent::Malformed);
                }
            }
        }

        events
    }

    /// Parse the header at the start of the accumulator.  `Ok(None)` until
    /// the colon arrives.
    fn parse_header(&self) -> Result<Option<Header>, LinkError> {
        let fields_end = self.acc.len().min(MAX_HEADER_LEN);
        let Some(colon) = self.acc[IPD_TAG.len()..fields_end]
            .iter()
            .position(|&b| b == b':')
            .map(|i| i + IPD_TAG.len())
        else {
            return if self.acc.len() < MAX_HEADER_LEN {
                Ok(None)
            } else {
                Err(LinkError::FrameHeaderMalformed)
            };
        };

        let fields = core::str::from_utf8(&self.acc[IPD_TAG.len()..colon])
            .map_err(|_| LinkError::FrameHeaderMalformed)?;
        let mut parts = fields.split(',').map(str::trim);
        let (id, len) = match (parts.next(), parts.next()) {
            // Single-connection form: +IPD,<len>:
            (Some(len), None) => (Some(0), len.parse::<usize>().ok()),
            (Some(id), Some(len)) => (id.parse::<LinkId>().ok(), len.parse::<usize>().ok()),
            _ => (None, None),
        };
        match (id, len) {
            (Some(link_id), Some(len)) if len <= self.max_frame => Ok(Some(Header {
                link_id,
                len,
                body_at: colon + 1,
            })),
            _ => Err(LinkError::FrameHeaderMalformed),
        }
    }

    /// Lines preceding a frame header; an unterminated fragment counts.
    fn split_head(&self, head: &[u8], events: &mut Vec<DemuxEvent>) {
        let mut rest = head;
        while let Some(end) = find(rest, b"\r\n") {
            self.push_line(&rest[..end], events);
            rest = &rest[end + 2..];
        }
        self.push_line(rest, events);
    }

    fn drain_lines(&mut self, events: &mut Vec<DemuxEvent>) {
        let mut consumed = 0;
        while let Some(end) = find(&self.acc[consumed..], b"\r\n") {
            self.push_line(&self.acc[consumed..consumed + end], events);
            consumed += end + 2;
        }
        self.acc.drain(..consumed);

        // The send prompt is not CRLF terminated.
        if self.acc == b">" || self.acc == b"> " {
            events.push(DemuxEvent::Line(">".into()));
            self.acc.clear();
            return;
        }

        // Unterminated run: keep a truncated line, drop the excess but
        // hold back enough to still spot a header straddling the cut.
        let keep_tail = IPD_TAG.len() - 1;
        if self.acc.len() > self.max_line + keep_tail {
            self.push_line(&self.acc[..self.max_line], events);
            let tail_at = self.acc.len() - keep_tail;
            self.acc.drain(..tail_at);
        }
    }

    fn push_line(&self, raw: &[u8], events: &mut Vec<DemuxEvent>) {
        let raw = raw.strip_suffix(b"\r").unwrap_or(raw);
        let raw = &raw[..raw.len().min(self.max_line)];
        if raw.iter().all(|b| b.is_ascii_whitespace()) {
            return;
        }
        events.push(DemuxEvent::Line(
            String::from_utf8_lossy(raw).trim_end().to_string(),
        ));
    }
}

/// Position of the first occurrence of `needle` in `hay`.
pub fn find(hay: &[u8], needle: &[u8]) -> Option<usize> {
    if needle.is_empty() || hay.len() < needle.len() {
        return None;
    }
    hay.windows(needle.len()).position(|w| w == needle)
}

/// The first `{` through the last `}` of `bytes`, if both exist in order.
pub fn json_span(bytes: &[u8]) -> Option<&[u8]> {
    let start = bytes.iter().position(|&b| b == b'{')?;
    let end = bytes.iter().rposition(|&b| b == b'}')?;
    (end > start).then(|| &bytes[start..=end])
}

/// Decode the structured record carried by a frame payload or line.
pub fn decode_record(bytes: &[u8]) -> Result<serde_json::Value, LinkError> {
    let span = json_span(bytes).ok_or(LinkError::FramePayloadDecode)?;
    serde_json::from_slice(span).map_err(|_| LinkError::FramePayloadDecode)
}
