//! RESP2 framing: one reader and one writer for the whole wire surface.
//!
//! Reading understands array commands (`*<n>` of bulk strings, with a
//! simple-string fallback element) and inline commands (a whitespace-split
//! line). Limit violations are a distinct error from ordinary protocol
//! garbage because the server closes the connection on them.
//!
//! Writing goes through a per-command buffer that the connection flushes
//! once per reply.

use thiserror::Error;
use tokio::io::{AsyncBufRead, AsyncReadExt};

/// Largest accepted command array.
pub const MAX_ARRAY_LEN: i64 = 1024;

/// Largest accepted bulk string payload.
pub const MAX_BULK_LEN: i64 = 524_288;

/// Largest accepted inline command line.
pub const MAX_INLINE_LEN: usize = 64 * 1024;

/// Cap on header lines (`*<n>`, `$<len>`); they only carry small integers.
const MAX_HEADER_LINE: usize = 64;

/// RESP read errors.
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// Malformed input; the connection survives.
    #[error("{0}")]
    Malformed(String),

    /// A length or line limit was exceeded; the connection is closed.
    #[error("{0}")]
    LimitExceeded(String),

    /// Peer closed the connection.
    #[error("connection closed")]
    Closed,

    /// Transport failure.
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
}

/// Read the first byte of the next command.
///
/// This is the idle wait between commands; EOF here is a clean disconnect.
pub async fn read_first_byte<R>(reader: &mut R) -> Result<u8, ProtocolError>
where
    R: AsyncBufRead + Unpin,
{
    let mut byte = [0u8; 1];
    match reader.read_exact(&mut byte).await {
        Ok(_) => Ok(byte[0]),
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => Err(ProtocolError::Closed),
        Err(e) => Err(e.into()),
    }
}

/// Read the remainder of a command whose first byte is already consumed.
///
/// Returns `None` for an empty command (null array or blank inline line).
pub async fn read_command<R>(
    reader: &mut R,
    first: u8,
) -> Result<Option<Vec<Vec<u8>>>, ProtocolError>
where
    R: AsyncBufRead + Unpin,
{
    if first == b'*' {
        read_array(reader).await
    } else {
        read_inline(reader, first).await
    }
}

async fn read_array<R>(reader: &mut R) -> Result<Option<Vec<Vec<u8>>>, ProtocolError>
where
    R: AsyncBufRead + Unpin,
{
    let line = read_line(reader, MAX_HEADER_LINE, "array header").await?;
    let count = parse_int(&line, "array length")?;
    if count == -1 {
        return Ok(None);
    }
    if count < 0 {
        return Err(ProtocolError::Malformed(format!(
            "invalid array length {}",
            count
        )));
    }
    if count > MAX_ARRAY_LEN {
        return Err(ProtocolError::LimitExceeded(format!(
            "array length {} exceeds maximum {}",
            count, MAX_ARRAY_LEN
        )));
    }

    let mut argv = Vec::with_capacity(count as usize);
    for _ in 0..count {
        let kind = read_first_byte(reader).await.map_err(|e| match e {
            // EOF mid-command is malformed, not a clean close.
            ProtocolError::Closed => ProtocolError::Malformed("truncated command".to_string()),
            other => other,
        })?;
        match kind {
            b'$' => {
                let line = read_line(reader, MAX_HEADER_LINE, "bulk header").await?;
                let len = parse_int(&line, "bulk length")?;
                if len == -1 {
                    // Null bulk element reads as empty.
                    argv.push(Vec::new());
                    continue;
                }
                if len < 0 {
                    return Err(ProtocolError::Malformed(format!(
                        "invalid bulk length {}",
                        len
                    )));
                }
                if len > MAX_BULK_LEN {
                    return Err(ProtocolError::LimitExceeded(format!(
                        "bulk length {} exceeds maximum {}",
                        len, MAX_BULK_LEN
                    )));
                }
                let mut payload = vec![0u8; len as usize + 2];
                reader
                    .read_exact(&mut payload)
                    .await
                    .map_err(|_| ProtocolError::Malformed("truncated bulk string".to_string()))?;
                if &payload[len as usize..] != b"\r\n" {
                    return Err(ProtocolError::Malformed(
                        "bulk string missing terminator".to_string(),
                    ));
                }
                payload.truncate(len as usize);
                argv.push(payload);
            }
            // Simple-string fallback element.
            b'+' => {
                let line = read_line(reader, MAX_INLINE_LEN, "simple string").await?;
                argv.push(line);
            }
            other => {
                return Err(ProtocolError::Malformed(format!(
                    "unexpected element type '{}'",
                    other as char
                )));
            }
        }
    }
    Ok(Some(argv))
}

async fn read_inline<R>(reader: &mut R, first: u8) -> Result<Option<Vec<Vec<u8>>>, ProtocolError>
where
    R: AsyncBufRead + Unpin,
{
    let mut line = read_line(reader, MAX_INLINE_LEN, "inline command").await?;
    line.insert(0, first);

    let argv: Vec<Vec<u8>> = line
        .split(|b| b.is_ascii_whitespace())
        .filter(|part| !part.is_empty())
        .map(|part| part.to_vec())
        .collect();
    if argv.is_empty() {
        Ok(None)
    } else {
        Ok(Some(argv))
    }
}

/// Read up to `\n`, stripping the terminator (and a preceding `\r`).
async fn read_line<R>(
    reader: &mut R,
    max: usize,
    what: &str,
) -> Result<Vec<u8>, ProtocolError>
where
    R: AsyncBufRead + Unpin,
{
    let mut line = Vec::new();
    loop {
        let mut byte = [0u8; 1];
        match reader.read_exact(&mut byte).await {
            Ok(_) => {}
            Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
                return Err(ProtocolError::Malformed(format!("truncated {}", what)));
            }
            Err(e) => return Err(e.into()),
        }
        if byte[0] == b'\n' {
            if line.last() == Some(&b'\r') {
                line.pop();
            }
            return Ok(line);
        }
        line.push(byte[0]);
        if line.len() > max {
            return Err(ProtocolError::LimitExceeded(format!(
                "{} exceeds {} bytes",
                what, max
            )));
        }
    }
}

fn parse_int(line: &[u8], what: &str) -> Result<i64, ProtocolError> {
    std::str::from_utf8(line)
        .ok()
        .and_then(|s| s.trim().parse::<i64>().ok())
        .ok_or_else(|| ProtocolError::Malformed(format!("invalid {}", what)))
}

/// Buffered RESP reply writer; one flush per command.
#[derive(Debug, Default)]
pub struct RespWriter {
    buf: Vec<u8>,
}

impl RespWriter {
    /// Fresh empty buffer.
    pub fn new() -> Self {
        RespWriter::default()
    }

    /// `+<text>\r\n`
    pub fn simple(&mut self, text: &str) {
        self.buf.push(b'+');
        self.buf.extend_from_slice(text.as_bytes());
        self.crlf();
    }

    /// `-<text>\r\n`
    pub fn error(&mut self, text: &str) {
        self.buf.push(b'-');
        self.buf.extend_from_slice(text.as_bytes());
        self.crlf();
    }

    /// `:<n>\r\n`
    pub fn integer(&mut self, n: i64) {
        self.buf.push(b':');
        self.buf.extend_from_slice(n.to_string().as_bytes());
        self.crlf();
    }

    /// `$<len>\r\n<bytes>\r\n`
    pub fn bulk(&mut self, bytes: &[u8]) {
        self.buf.push(b'$');
        self.buf
            .extend_from_slice(bytes.len().to_string().as_bytes());
        self.crlf();
        self.buf.extend_from_slice(bytes);
        self.crlf();
    }

    /// `$-1\r\n`
    pub fn null_bulk(&mut self) {
        self.buf.extend_from_slice(b"$-1\r\n");
    }

    /// `*<n>\r\n`
    pub fn array_header(&mut self, n: usize) {
        self.buf.push(b'*');
        self.buf.extend_from_slice(n.to_string().as_bytes());
        self.crlf();
    }

    /// Everything buffered so far.
    pub fn as_bytes(&self) -> &[u8] {
        &self.buf
    }

    /// True when nothing was written.
    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    fn crlf(&mut self) {
        self.buf.extend_from_slice(b"\r\n");
    }
}
