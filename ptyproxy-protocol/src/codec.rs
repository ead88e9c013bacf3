//! Newline-delimited JSON framing
//!
//! The helper speaks one JSON object per line. [`LineCodec`] turns the raw
//! stdout byte stream into [`Message`]s and encodes outgoing messages as
//! complete lines.
//!
//! A line that fails to decode does not end the stream: it is yielded as an
//! `Err(FrameError)` item and decoding continues with the next line. Only I/O
//! failures surface as [`CodecError`].

use std::cmp;
use std::io::Write;

use bytes::{Buf, BufMut, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

use crate::messages::Message;

/// Default maximum line length (16 MB)
pub const MAX_LINE_LENGTH: usize = 16 * 1024 * 1024;

/// Bytes of a rejected line kept in its [`FrameError`]
const EXCERPT_LENGTH: usize = 256;

/// Fatal codec error
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Json(#[from] serde_json::Error),
}

/// A single line that could not be turned into a message
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FrameError {
    #[error("Malformed line ({reason}): {line}")]
    Malformed { line: String, reason: String },

    #[error("Line exceeds {max} bytes, discarded")]
    LineTooLong { max: usize },

    #[error("Stream ended inside a line: {line}")]
    Unterminated { line: String },
}

/// One decoded frame: a message, or the reason a line was rejected
pub type Frame = Result<Message, FrameError>;

/// Codec for the helper's line protocol
#[derive(Debug, Clone)]
pub struct LineCodec {
    max_length: usize,
    /// Where the next newline scan starts, so partial lines are not rescanned
    next_index: usize,
    /// Dropping the tail of an oversized line
    discarding: bool,
}

impl LineCodec {
    pub fn new() -> Self {
        Self::with_max_length(MAX_LINE_LENGTH)
    }

    pub fn with_max_length(max_length: usize) -> Self {
        Self {
            max_length,
            next_index: 0,
            discarding: false,
        }
    }

    pub fn max_length(&self) -> usize {
        self.max_length
    }
}

impl Default for LineCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl Decoder for LineCodec {
    type Item = Frame;
    type Error = CodecError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        loop {
            let read_to = cmp::min(self.max_length.saturating_add(1), src.len());
            let newline = src[self.next_index..read_to]
                .iter()
                .position(|b| *b == b'\n');

            match (self.discarding, newline) {
                (true, Some(offset)) => {
                    src.advance(self.next_index + offset + 1);
                    self.discarding = false;
                    self.next_index = 0;
                }
                (true, None) => {
                    src.advance(read_to);
                    self.next_index = 0;
                    if src.is_empty() {
                        return Ok(None);
                    }
                }
                (false, Some(offset)) => {
                    let end = self.next_index + offset;
                    self.next_index = 0;
                    let line = src.split_to(end + 1);
                    let line = trim_line(&line[..end]);
                    if line.is_empty() {
                        continue;
                    }
                    return Ok(Some(parse_line(line)));
                }
                (false, None) if src.len() > self.max_length => {
                    self.discarding = true;
                    self.next_index = 0;
                    return Ok(Some(Err(FrameError::LineTooLong {
                        max: self.max_length,
                    })));
                }
                (false, None) => {
                    self.next_index = read_to;
                    return Ok(None);
                }
            }
        }
    }

    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        if let Some(frame) = self.decode(src)? {
            return Ok(Some(frame));
        }

        self.next_index = 0;
        if self.discarding {
            self.discarding = false;
            src.clear();
            return Ok(None);
        }

        let rest = src.split_to(src.len());
        let line = trim_line(&rest);
        if line.is_empty() {
            return Ok(None);
        }
        Ok(Some(Err(FrameError::Unterminated {
            line: excerpt(line),
        })))
    }
}

impl Encoder<Message> for LineCodec {
    type Error = CodecError;

    fn encode(&mut self, item: Message, dst: &mut BytesMut) -> Result<(), Self::Error> {
        let mut writer = dst.writer();
        serde_json::to_writer(&mut writer, &item)?;
        writer.write_all(b"\n")?;
        Ok(())
    }
}

/// Strip a trailing carriage return and surrounding whitespace
fn trim_line(line: &[u8]) -> &[u8] {
    let start = line
        .iter()
        .position(|b| !b.is_ascii_whitespace())
        .unwrap_or(line.len());
    let end = line
        .iter()
        .rposition(|b| !b.is_ascii_whitespace())
        .map_or(start, |i| i + 1);
    &line[start..end]
}

fn parse_line(line: &[u8]) -> Frame {
    serde_json::from_slice(line).map_err(|e| FrameError::Malformed {
        line: excerpt(line),
        reason: e.to_string(),
    })
}

/// Printable head of a rejected line
fn excerpt(line: &[u8]) -> String {
    if line.len() <= EXCERPT_LENGTH {
        return String::from_utf8_lossy(line).into_owned();
    }
    format!(
        "{}... ({} bytes)",
        String::from_utf8_lossy(&line[..EXCERPT_LENGTH]),
        line.len()
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::messages::PtyId;
    use futures::StreamExt;
    use std::collections::HashMap;
    use tokio_util::codec::FramedRead;

    const STREAM: &str = concat!(
        "{\"type\":\"created\",\"id\":3}\n",
        "{\"type\":\"output\",\"id\":3,\"data\":\"hello\\r\\n\"}\n",
        "{\"type\":\"output\",\"id\":3,\"data\":\"caf\u{e9} \u{2603}\"}\n",
        "{\"type\":\"created\",\"id\":9}\n",
        "{\"type\":\"closed\",\"id\":3}\n",
    );

    fn decode_all(codec: &mut LineCodec, buf: &mut BytesMut) -> Vec<Frame> {
        let mut frames = Vec::new();
        while let Some(frame) = codec.decode(buf).unwrap() {
            frames.push(frame);
        }
        frames
    }

    fn decode_in_chunks(bytes: &[u8], chunk: usize) -> Vec<Frame> {
        let mut codec = LineCodec::new();
        let mut buf = BytesMut::new();
        let mut frames = Vec::new();
        for piece in bytes.chunks(chunk) {
            buf.extend_from_slice(piece);
            frames.extend(decode_all(&mut codec, &mut buf));
        }
        assert!(buf.is_empty(), "unconsumed bytes: {:?}", buf);
        frames
    }

    #[test]
    fn test_decode_single_line() {
        let mut codec = LineCodec::new();
        let mut buf = BytesMut::from(&b"{\"type\":\"created\",\"id\":7}\n"[..]);

        let frame = codec.decode(&mut buf).unwrap().unwrap();
        assert_eq!(
            frame,
            Ok(Message::Created {
                id: 7,
                request_id: None
            })
        );
        assert!(buf.is_empty());
        assert!(codec.decode(&mut buf).unwrap().is_none());
    }

    #[test]
    fn test_partial_line_waits_for_newline() {
        let mut codec = LineCodec::new();
        let mut buf = BytesMut::from(&b"{\"type\":\"closed\","[..]);

        assert!(codec.decode(&mut buf).unwrap().is_none());
        assert_eq!(buf.len(), 17);

        buf.extend_from_slice(b"\"id\":2}\n");
        let frame = codec.decode(&mut buf).unwrap().unwrap();
        assert_eq!(frame, Ok(Message::Closed { id: 2 }));
    }

    #[test]
    fn test_chunk_size_does_not_change_result() {
        let bytes = STREAM.as_bytes();
        let whole = decode_in_chunks(bytes, bytes.len());
        assert_eq!(whole.len(), 5);

        for chunk in 1..bytes.len() {
            assert_eq!(
                decode_in_chunks(bytes, chunk),
                whole,
                "chunk size {} changed the decoded sequence",
                chunk
            );
        }
    }

    #[test]
    fn test_split_inside_multibyte_character() {
        let bytes = "{\"type\":\"output\",\"id\":1,\"data\":\"\u{2603}\"}\n".as_bytes();
        let snowman = bytes.iter().position(|b| *b == 0xE2).unwrap();

        let mut codec = LineCodec::new();
        let mut buf = BytesMut::from(&bytes[..snowman + 1]);
        assert!(codec.decode(&mut buf).unwrap().is_none());
        buf.extend_from_slice(&bytes[snowman + 1..]);

        let frame = codec.decode(&mut buf).unwrap().unwrap();
        assert_eq!(
            frame,
            Ok(Message::Output {
                id: 1,
                data: "\u{2603}".into()
            })
        );
    }

    #[test]
    fn test_malformed_line_does_not_stop_decoding() {
        let mut codec = LineCodec::new();
        let mut buf = BytesMut::from(
            &b"{\"type\":\"created\",\"id\":1}\nnot json\n{\"type\":\"closed\",\"id\":1}\n"[..],
        );

        let frames = decode_all(&mut codec, &mut buf);
        assert_eq!(frames.len(), 3);
        assert!(frames[0].is_ok());
        match &frames[1] {
            Err(FrameError::Malformed { line, .. }) => assert_eq!(line, "not json"),
            other => panic!("expected malformed frame, got {:?}", other),
        }
        assert_eq!(frames[2], Ok(Message::Closed { id: 1 }));
    }

    #[test]
    fn test_malformed_line_is_truncated() {
        let mut codec = LineCodec::new();
        let mut raw = vec![b'x'; 10_000];
        raw.push(b'\n');
        let mut buf = BytesMut::from(&raw[..]);

        match codec.decode(&mut buf).unwrap().unwrap() {
            Err(FrameError::Malformed { line, .. }) => {
                assert!(line.starts_with(&"x".repeat(EXCERPT_LENGTH)));
                assert!(line.ends_with("... (10000 bytes)"));
                assert!(line.len() < 300);
            }
            other => panic!("expected malformed frame, got {:?}", other),
        }
    }

    #[test]
    fn test_invalid_utf8_is_malformed() {
        let mut codec = LineCodec::new();
        let mut buf = BytesMut::from(&b"{\"type\":\"output\",\"id\":1,\"data\":\"\xff\"}\n"[..]);

        let frame = codec.decode(&mut buf).unwrap().unwrap();
        assert!(matches!(frame, Err(FrameError::Malformed { .. })));
    }

    #[test]
    fn test_crlf_and_blank_lines() {
        let mut codec = LineCodec::new();
        let mut buf = BytesMut::from(&b"\n\r\n{\"type\":\"closed\",\"id\":4}\r\n\n"[..]);

        let frames = decode_all(&mut codec, &mut buf);
        assert_eq!(frames, vec![Ok(Message::Closed { id: 4 })]);
        assert!(buf.is_empty());
    }

    #[test]
    fn test_line_too_long_is_discarded() {
        let mut codec = LineCodec::with_max_length(32);
        let long = format!("{{\"type\":\"output\",\"id\":1,\"data\":\"{}\"}}\n", "x".repeat(64));
        let mut buf = BytesMut::from(long.as_bytes());
        buf.extend_from_slice(b"{\"type\":\"closed\",\"id\":1}\n");

        let frames = decode_all(&mut codec, &mut buf);
        assert_eq!(
            frames,
            vec![
                Err(FrameError::LineTooLong { max: 32 }),
                Ok(Message::Closed { id: 1 }),
            ]
        );
    }

    #[test]
    fn test_line_too_long_across_chunks() {
        let mut codec = LineCodec::with_max_length(30);
        let mut buf = BytesMut::from("a".repeat(40).as_bytes());

        let frame = codec.decode(&mut buf).unwrap().unwrap();
        assert_eq!(frame, Err(FrameError::LineTooLong { max: 30 }));
        assert!(codec.decode(&mut buf).unwrap().is_none());

        buf.extend_from_slice(b"bbbb\n{\"type\":\"closed\",\"id\":2}\n");
        let frame = codec.decode(&mut buf).unwrap().unwrap();
        assert_eq!(frame, Ok(Message::Closed { id: 2 }));
    }

    #[test]
    fn test_decode_eof_reports_unterminated_tail() {
        let mut codec = LineCodec::new();
        let mut buf = BytesMut::from(&b"{\"type\":\"closed\",\"id\":1}\n{\"type\":\"clo"[..]);

        assert_eq!(
            codec.decode_eof(&mut buf).unwrap().unwrap(),
            Ok(Message::Closed { id: 1 })
        );
        let tail = codec.decode_eof(&mut buf).unwrap().unwrap();
        assert_eq!(
            tail,
            Err(FrameError::Unterminated {
                line: "{\"type\":\"clo".into()
            })
        );
        assert!(codec.decode_eof(&mut buf).unwrap().is_none());
    }

    #[test]
    fn test_encode_appends_newline() {
        let mut codec = LineCodec::new();
        let mut buf = BytesMut::new();

        codec
            .encode(
                Message::Write {
                    id: 7,
                    data: "a\nb".into(),
                },
                &mut buf,
            )
            .unwrap();
        codec.encode(Message::Terminate, &mut buf).unwrap();

        let text = std::str::from_utf8(&buf).unwrap();
        let lines: Vec<&str> = text.split_terminator('\n').collect();
        assert_eq!(lines.len(), 2);
        assert!(text.ends_with('\n'));

        let write: serde_json::Value = serde_json::from_str(lines[0]).unwrap();
        assert_eq!(write["type"], "write");
        assert_eq!(write["id"], 7);
        assert_eq!(write["data"], "a\nb");
        assert_eq!(lines[1], r#"{"type":"terminate"}"#);
    }

    #[test]
    fn test_encoded_create_decodes_back() {
        let mut codec = LineCodec::new();
        let mut buf = BytesMut::new();
        let mut env = HashMap::new();
        env.insert("TERM".to_string(), "xterm-256color".to_string());
        let msg = Message::create(vec!["/bin/sh".into()], 30, 100, env);

        codec.encode(msg.clone(), &mut buf).unwrap();
        assert_eq!(codec.decode(&mut buf).unwrap().unwrap(), Ok(msg));
    }

    #[tokio::test]
    async fn test_framed_read_over_stream() {
        let frames: Vec<Frame> = FramedRead::new(STREAM.as_bytes(), LineCodec::new())
            .map(|r| r.unwrap())
            .collect()
            .await;

        let ids: Vec<Option<PtyId>> = frames
            .iter()
            .map(|f| f.as_ref().ok().and_then(Message::id))
            .collect();
        assert_eq!(ids, vec![Some(3), Some(3), Some(3), Some(9), Some(3)]);
    }
}
