//! Stream path header
//!
//! Every stream starts with the path it is addressed to, before any
//! application payload.
//!
//! Wire format:
//! - 2 bytes: path length N (big-endian)
//! - N bytes: UTF-8 path

use bytes::{BufMut, BytesMut};
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Longest encodable path
pub const MAX_PATH_LEN: usize = u16::MAX as usize;

/// Path header errors
#[derive(Debug, Error)]
pub enum PathError {
    #[error("path too long: {0} bytes (max {MAX_PATH_LEN})")]
    TooLong(usize),
    #[error("path header truncated")]
    Truncated,
    #[error("path is not valid UTF-8")]
    InvalidUtf8,
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Append the encoded header for `path` to `dst`
pub fn encode_path(path: &str, dst: &mut BytesMut) -> Result<(), PathError> {
    if path.len() > MAX_PATH_LEN {
        return Err(PathError::TooLong(path.len()));
    }

    dst.reserve(2 + path.len());
    dst.put_u16(path.len() as u16);
    dst.put_slice(path.as_bytes());
    Ok(())
}

/// Write the path header in a single write
pub async fn write_path<W>(w: &mut W, path: &str) -> Result<(), PathError>
where
    W: AsyncWrite + Unpin + ?Sized,
{
    let mut buf = BytesMut::new();
    encode_path(path, &mut buf)?;
    w.write_all(&buf).await?;
    w.flush().await?;
    Ok(())
}

/// Read exactly one path header, leaving the payload untouched
pub async fn read_path<R>(r: &mut R) -> Result<String, PathError>
where
    R: AsyncRead + Unpin + ?Sized,
{
    let len = r.read_u16().await.map_err(eof_as_truncated)? as usize;

    let mut raw = vec![0u8; len];
    r.read_exact(&mut raw).await.map_err(eof_as_truncated)?;

    String::from_utf8(raw).map_err(|_| PathError::InvalidUtf8)
}

fn eof_as_truncated(e: std::io::Error) -> PathError {
    if e.kind() == std::io::ErrorKind::UnexpectedEof {
        PathError::Truncated
    } else {
        PathError::Io(e)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_layout() {
        let mut buf = BytesMut::new();
        encode_path("/echo", &mut buf).unwrap();
        assert_eq!(&buf[..], &[0, 5, b'/', b'e', b'c', b'h', b'o']);
    }

    #[test]
    fn test_encode_rejects_oversized_path() {
        let path = "x".repeat(MAX_PATH_LEN + 1);
        let mut buf = BytesMut::new();
        assert!(matches!(
            encode_path(&path, &mut buf),
            Err(PathError::TooLong(n)) if n == MAX_PATH_LEN + 1
        ));
        assert!(buf.is_empty());
    }

    #[tokio::test]
    async fn test_read_leaves_payload() {
        let mut wire: &[u8] = &[0, 3, b'/', b'a', b'b', b'h', b'i'];
        assert_eq!(read_path(&mut wire).await.unwrap(), "/ab");
        assert_eq!(wire, b"hi");
    }

    #[tokio::test]
    async fn test_empty_path() {
        let mut wire: &[u8] = &[0, 0];
        assert_eq!(read_path(&mut wire).await.unwrap(), "");
    }

    #[tokio::test]
    async fn test_truncated_header() {
        let mut short_len: &[u8] = &[0];
        assert!(matches!(
            read_path(&mut short_len).await,
            Err(PathError::Truncated)
        ));

        let mut short_body: &[u8] = &[0, 9, b'/', b'e'];
        assert!(matches!(
            read_path(&mut short_body).await,
            Err(PathError::Truncated)
        ));
    }

    #[tokio::test]
    async fn test_invalid_utf8() {
        let mut wire: &[u8] = &[0, 2, 0xc3, 0x28];
        assert!(matches!(
            read_path(&mut wire).await,
            Err(PathError::InvalidUtf8)
        ));
    }

    #[tokio::test]
    async fn test_write_then_read_over_pipe() {
        let (mut a, mut b) = tokio::io::duplex(64);
        write_path(&mut a, "/graph/edge").await.unwrap();
        assert_eq!(read_path(&mut b).await.unwrap(), "/graph/edge");
    }
}
