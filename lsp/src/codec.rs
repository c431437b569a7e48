//! JSON-RPC framing codec for LSP communication.
//!
//! LSP uses `Content-Length: N\r\n\r\n{json}` framing regardless of whether
//! the bytes travel over a child's stdio or a TCP socket. [`FrameReader`] and
//! [`FrameWriter`] work over any async byte stream.

use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader};

/// Maximum frame size (16 MiB). Rendered panels can be large.
const MAX_FRAME_BYTES: usize = 16 * 1024 * 1024;

const CONTENT_LENGTH: &str = "Content-Length";

#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    #[error("I/O error on LSP stream")]
    Io(#[from] std::io::Error),
    #[error("unexpected EOF while reading headers")]
    TruncatedHeaders,
    #[error("missing Content-Length header")]
    MissingContentLength,
    #[error("invalid Content-Length value: {0:?}")]
    InvalidContentLength(String),
    #[error("Content-Length {0} exceeds maximum {max}", max = MAX_FRAME_BYTES)]
    FrameTooLarge(usize),
    #[error("malformed JSON-RPC body")]
    Json(#[from] serde_json::Error),
}

/// Reads framed JSON-RPC messages.
pub struct FrameReader<R> {
    reader: BufReader<R>,
}

impl<R: AsyncRead + Unpin> FrameReader<R> {
    pub fn new(reader: R) -> Self {
        Self {
            reader: BufReader::new(reader),
        }
    }

    /// Read the next frame.
    ///
    /// `Ok(None)` means the peer closed the stream between frames.
    pub async fn read_frame(&mut self) -> Result<Option<serde_json::Value>, CodecError> {
        let Some(content_length) = self.read_headers().await? else {
            return Ok(None);
        };
        if content_length > MAX_FRAME_BYTES {
            return Err(CodecError::FrameTooLarge(content_length));
        }

        let mut body = vec![0u8; content_length];
        self.reader.read_exact(&mut body).await?;
        Ok(Some(serde_json::from_slice(&body)?))
    }

    async fn read_headers(&mut self) -> Result<Option<usize>, CodecError> {
        let mut content_length = None;
        let mut line = String::new();
        let mut started = false;

        loop {
            line.clear();
            if self.reader.read_line(&mut line).await? == 0 {
                if started {
                    return Err(CodecError::TruncatedHeaders);
                }
                return Ok(None);
            }
            started = true;

            let header = line.trim();
            if header.is_empty() {
                break;
            }
            let Some((key, value)) = header.split_once(':') else {
                continue;
            };
            if key.trim().eq_ignore_ascii_case(CONTENT_LENGTH) {
                let value = value.trim();
                content_length = Some(
                    value
                        .parse()
                        .map_err(|_| CodecError::InvalidContentLength(value.to_string()))?,
                );
            }
        }

        content_length
            .map(Some)
            .ok_or(CodecError::MissingContentLength)
    }
}

/// Writes framed JSON-RPC messages.
pub struct FrameWriter<W> {
    writer: W,
}

impl<W: AsyncWrite + Unpin> FrameWriter<W> {
    pub fn new(writer: W) -> Self {
        Self { writer }
    }

    pub async fn write_frame(&mut self, msg: &serde_json::Value) -> Result<(), CodecError> {
        let body = serde_json::to_vec(msg)?;
        let header = format!("{CONTENT_LENGTH}: {}\r\n\r\n", body.len());
        self.writer.write_all(header.as_bytes()).await?;
        self.writer.write_all(&body).await?;
        self.writer.flush().await?;
        Ok(())
    }

    /// Flush and close the underlying stream.
    pub async fn close(mut self) -> Result<(), CodecError> {
        self.writer.shutdown().await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn encode(msgs: &[serde_json::Value]) -> Vec<u8> {
        let mut buf = Vec::new();
        let mut writer = FrameWriter::new(&mut buf);
        for msg in msgs {
            writer.write_frame(msg).await.unwrap();
        }
        buf
    }

    #[tokio::test]
    async fn reads_back_consecutive_frames() {
        let first = serde_json::json!({"jsonrpc": "2.0", "id": 1, "method": "initialize"});
        let second = serde_json::json!({
            "jsonrpc": "2.0",
            "method": "magpiebridge/showHTML",
            "params": "<html><body>é</body></html>"
        });
        let buf = encode(&[first.clone(), second.clone()]).await;

        let mut reader = FrameReader::new(buf.as_slice());
        assert_eq!(reader.read_frame().await.unwrap().unwrap(), first);
        assert_eq!(reader.read_frame().await.unwrap().unwrap(), second);
        assert!(reader.read_frame().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn content_length_counts_bytes() {
        let msg = serde_json::json!({"k": "é"});
        let buf = encode(std::slice::from_ref(&msg)).await;
        let body = serde_json::to_string(&msg).unwrap();
        let text = String::from_utf8(buf).unwrap();
        assert!(text.starts_with(&format!("Content-Length: {}\r\n\r\n", body.len())));
    }

    #[tokio::test]
    async fn header_name_is_case_insensitive_and_extra_headers_ignored() {
        let body = r#"{"jsonrpc":"2.0","id":7}"#;
        let frame = format!(
            "Content-Type: application/vscode-jsonrpc; charset=utf-8\r\ncontent-length: {}\r\n\r\n{body}",
            body.len()
        );
        let mut reader = FrameReader::new(frame.as_bytes());
        assert_eq!(reader.read_frame().await.unwrap().unwrap()["id"], 7);
    }

    #[tokio::test]
    async fn eof_inside_headers_is_an_error() {
        let mut reader = FrameReader::new(&b"Content-Length: 10\r\n"[..]);
        assert!(matches!(
            reader.read_frame().await,
            Err(CodecError::TruncatedHeaders)
        ));
    }

    #[tokio::test]
    async fn missing_or_invalid_length_is_rejected() {
        let mut reader = FrameReader::new(&b"Content-Type: x\r\n\r\n{}"[..]);
        assert!(matches!(
            reader.read_frame().await,
            Err(CodecError::MissingContentLength)
        ));

        let mut reader = FrameReader::new(&b"Content-Length: ten\r\n\r\n"[..]);
        assert!(matches!(
            reader.read_frame().await,
            Err(CodecError::InvalidContentLength(_))
        ));
    }

    #[tokio::test]
    async fn oversized_frame_is_rejected_before_allocating() {
        let header = format!("Content-Length: {}\r\n\r\n", MAX_FRAME_BYTES + 1);
        let mut reader = FrameReader::new(header.as_bytes());
        assert!(matches!(
            reader.read_frame().await,
            Err(CodecError::FrameTooLarge(_))
        ));
    }

    #[tokio::test]
    async fn short_body_and_bad_json_are_errors() {
        let mut reader = FrameReader::new(&b"Content-Length: 100\r\n\r\nhello"[..]);
        assert!(matches!(reader.read_frame().await, Err(CodecError::Io(_))));

        let mut reader = FrameReader::new(&b"Content-Length: 5\r\n\r\nhello"[..]);
        assert!(matches!(reader.read_frame().await, Err(CodecError::Json(_))));
    }
}
