//! Text header exchanged at the start of every upload.
//!
//! # Wire format
//!
//! ```text
//! CLIENT -> SERVER (once per connection):
//!   <file_name> LF <file_size as decimal ASCII> LF LF
//!   [file_size bytes: raw file data]
//! ```
//!
//! The file name is a bare base name and must not contain whitespace. The
//! size carries no sign. There is no reply from the server.

use std::io;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::CHUNK_SIZE;
use crate::error::TransferError;

/// Two-byte sequence ending the header (an empty line after the size).
pub const TERMINATOR: &[u8; 2] = b"\n\n";

/// A decoded upload header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileHeader {
    /// Base name of the file, no directory component.
    pub file_name: String,
    /// Number of body bytes following the header.
    pub file_size: u64,
}

impl FileHeader {
    pub fn new(file_name: impl Into<String>, file_size: u64) -> Self {
        Self {
            file_name: file_name.into(),
            file_size,
        }
    }

    /// Encodes the header as `name LF size LF LF`.
    ///
    /// The name is written verbatim; callers must ensure it holds no line feed.
    pub fn encode(&self) -> Vec<u8> {
        format!("{}\n{}\n\n", self.file_name, self.file_size).into_bytes()
    }

    /// Decodes a header from the start of `buf`.
    ///
    /// Reads a whitespace-delimited name token, a whitespace-delimited size
    /// token, then consumes exactly two delimiter bytes. Returns the header and
    /// the number of bytes consumed.
    pub fn decode(buf: &[u8]) -> Result<(Self, usize), TransferError> {
        let mut pos = 0;

        let name = next_token(buf, &mut pos).ok_or_else(|| malformed("missing file name"))?;
        let size = next_token(buf, &mut pos).ok_or_else(|| malformed("missing file size"))?;

        if !size.iter().all(u8::is_ascii_digit) {
            return Err(malformed(format!(
                "invalid file size {:?}",
                String::from_utf8_lossy(size)
            )));
        }
        let file_size = std::str::from_utf8(size)
            .ok()
            .and_then(|s| s.parse::<u64>().ok())
            .ok_or_else(|| malformed("file size out of range"))?;

        let terminator = buf
            .get(pos..pos + TERMINATOR.len())
            .ok_or_else(|| malformed("missing header terminator"))?;
        if !terminator.iter().all(u8::is_ascii_whitespace) {
            return Err(malformed("unexpected bytes after file size"));
        }

        let file_name = String::from_utf8(name.to_vec())
            .map_err(|e| malformed(format!("invalid UTF-8 file name: {e}")))?;

        Ok((
            Self {
                file_name,
                file_size,
            },
            pos + TERMINATOR.len(),
        ))
    }
}

/// Returns the offset of the first header terminator in `buf`.
pub fn find_terminator(buf: &[u8]) -> Option<usize> {
    buf.windows(TERMINATOR.len()).position(|w| w == TERMINATOR)
}

/// Writes the encoded header to the stream.
pub async fn write_header<W: AsyncWrite + Unpin>(
    writer: &mut W,
    header: &FileHeader,
) -> Result<(), TransferError> {
    writer
        .write_all(&header.encode())
        .await
        .map_err(TransferError::Write)
}

/// Reads until the header terminator is seen, then decodes the header.
///
/// Any bytes received past the header belong to the body and are returned
/// alongside it. Fails with `MalformedHeader` once more than `max_len` bytes
/// arrive without a terminator.
pub async fn read_header<R: AsyncRead + Unpin>(
    reader: &mut R,
    max_len: usize,
) -> Result<(FileHeader, Vec<u8>), TransferError> {
    let mut buf = Vec::with_capacity(256);
    let mut chunk = [0u8; CHUNK_SIZE];
    let mut scanned = 0;

    loop {
        if let Some(offset) = find_terminator(&buf[scanned..]) {
            let end = scanned + offset + TERMINATOR.len();
            let (header, consumed) = FileHeader::decode(&buf[..end])?;
            let leftover = buf.split_off(consumed);
            return Ok((header, leftover));
        }
        // The terminator may straddle two reads.
        scanned = buf.len().saturating_sub(TERMINATOR.len() - 1);

        if buf.len() > max_len {
            return Err(malformed(format!(
                "no terminator within {max_len} bytes"
            )));
        }

        let n = reader.read(&mut chunk).await.map_err(TransferError::Read)?;
        if n == 0 {
            return Err(TransferError::Read(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                "connection closed before header terminator",
            )));
        }
        buf.extend_from_slice(&chunk[..n]);
    }
}

fn next_token<'a>(buf: &'a [u8], pos: &mut usize) -> Option<&'a [u8]> {
    while *pos < buf.len() && buf[*pos].is_ascii_whitespace() {
        *pos += 1;
    }
    let start = *pos;
    while *pos < buf.len() && !buf[*pos].is_ascii_whitespace() {
        *pos += 1;
    }
    (start < *pos).then(|| &buf[start..*pos])
}

fn malformed(msg: impl Into<String>) -> TransferError {
    TransferError::MalformedHeader(msg.into())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encode_layout() {
        let header = FileHeader::new("a.bin", 10_000);
        assert_eq!(header.encode(), b"a.bin\n10000\n\n");
    }

    #[test]
    fn header_roundtrip() {
        for header in [
            FileHeader::new("a.bin", 10_000),
            FileHeader::new("empty.txt", 0),
            FileHeader::new("big.iso", u64::MAX),
            FileHeader::new("données.txt", 7),
        ] {
            let encoded = header.encode();
            let (decoded, consumed) = FileHeader::decode(&encoded).unwrap();
            assert_eq!(decoded, header);
            assert_eq!(consumed, encoded.len());
        }
    }

    #[test]
    fn decode_stops_after_terminator() {
        let (header, consumed) = FileHeader::decode(b"x.txt\n3\n\nabc").unwrap();
        assert_eq!(header, FileHeader::new("x.txt", 3));
        assert_eq!(consumed, 9);
    }

    #[test]
    fn decode_rejects_non_digit_size() {
        let err = FileHeader::decode(b"a.bin\n12ab\n\n").unwrap_err();
        assert!(matches!(err, TransferError::MalformedHeader(_)));
    }

    #[test]
    fn decode_rejects_signed_size() {
        assert!(matches!(
            FileHeader::decode(b"a.bin\n+12\n\n"),
            Err(TransferError::MalformedHeader(_))
        ));
        assert!(matches!(
            FileHeader::decode(b"a.bin\n-12\n\n"),
            Err(TransferError::MalformedHeader(_))
        ));
    }

    #[test]
    fn decode_rejects_oversized_number() {
        let err = FileHeader::decode(b"a.bin\n99999999999999999999999\n\n").unwrap_err();
        assert!(matches!(err, TransferError::MalformedHeader(_)));
    }

    #[test]
    fn decode_requires_two_terminator_bytes() {
        assert!(matches!(
            FileHeader::decode(b"a.bin\n12\n"),
            Err(TransferError::MalformedHeader(_))
        ));
        assert!(matches!(
            FileHeader::decode(b"a.bin\n12"),
            Err(TransferError::MalformedHeader(_))
        ));
    }

    #[test]
    fn decode_splits_names_on_whitespace() {
        // "my" becomes the name and "file.txt" the size token.
        let err = FileHeader::decode(b"my file.txt\n12\n\n").unwrap_err();
        assert!(matches!(err, TransferError::MalformedHeader(_)));
    }

    #[test]
    fn decode_rejects_missing_fields() {
        assert!(FileHeader::decode(b"\n\n").is_err());
        assert!(FileHeader::decode(b"only_name\n\n").is_err());
    }

    #[test]
    fn decode_rejects_invalid_utf8_name() {
        let err = FileHeader::decode(b"\xff\xfe\n1\n\n").unwrap_err();
        assert!(matches!(err, TransferError::MalformedHeader(_)));
    }

    #[test]
    fn terminator_search() {
        assert_eq!(find_terminator(b"a\n5\n\nbody"), Some(3));
        assert_eq!(find_terminator(b"a\n5\n"), None);
        assert_eq!(find_terminator(b""), None);
    }

    #[tokio::test]
    async fn write_header_sends_encoding() {
        let mut buf = Vec::new();
        write_header(&mut buf, &FileHeader::new("notes.md", 42))
            .await
            .unwrap();
        assert_eq!(buf, b"notes.md\n42\n\n");
    }

    #[tokio::test]
    async fn read_header_returns_leftover_body() {
        let mut cursor = &b"a.bin\n5\n\nhello"[..];
        let (header, leftover) = read_header(&mut cursor, 4096).await.unwrap();
        assert_eq!(header, FileHeader::new("a.bin", 5));
        assert_eq!(leftover, b"hello");
    }

    #[tokio::test]
    async fn read_header_across_split_reads() {
        let (mut client, mut server) = tokio::io::duplex(64);
        let writer = tokio::spawn(async move {
            for part in [&b"split.bin\n1"[..], b"2\n", b"\nrest"] {
                client.write_all(part).await.unwrap();
                client.flush().await.unwrap();
                tokio::task::yield_now().await;
            }
        });

        let (header, leftover) = read_header(&mut server, 4096).await.unwrap();
        writer.await.unwrap();

        assert_eq!(header, FileHeader::new("split.bin", 12));
        // The body may or may not have arrived with the terminator.
        assert!(b"rest".starts_with(&leftover));
    }

    #[tokio::test]
    async fn read_header_eof_before_terminator() {
        let mut cursor = &b"a.bin\n5\n"[..];
        let err = read_header(&mut cursor, 4096).await.unwrap_err();
        assert_eq!(err.io_kind(), Some(io::ErrorKind::UnexpectedEof));
        assert!(matches!(err, TransferError::Read(_)));
    }

    #[tokio::test]
    async fn read_header_enforces_max_len() {
        let junk = vec![b'x'; 10_000];
        let mut cursor = &junk[..];
        let err = read_header(&mut cursor, 64).await.unwrap_err();
        assert!(matches!(err, TransferError::MalformedHeader(_)));
    }
}
