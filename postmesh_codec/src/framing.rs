use postmesh_common::Error;
use serde::{de::DeserializeOwned, Serialize};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Hard cap on a single frame's declared length. Guards against a
/// corrupted or malicious length prefix causing an unbounded allocation;
/// every real record in this protocol is far smaller.
pub const MAX_FRAME_LEN: u32 = 64 * 1024 * 1024;

/// Writes one length-prefixed, bincode-encoded record.
pub async fn write_val<T, W>(w: &mut W, val: &T) -> postmesh_common::Result<()>
where
    T: Serialize,
    W: AsyncWrite + Unpin,
{
    let bytes = bincode::serialize(val).map_err(|e| Error::Encoding(e.to_string()))?;
    let len: u32 = bytes
        .len()
        .try_into()
        .map_err(|_| Error::Encoding("record too large to frame".to_string()))?;
    w.write_all(&len.to_be_bytes()).await?;
    w.write_all(&bytes).await?;
    Ok(())
}

/// Reads one length-prefixed, bincode-encoded record.
pub async fn read_val<T, R>(r: &mut R) -> postmesh_common::Result<T>
where
    T: DeserializeOwned,
    R: AsyncRead + Unpin,
{
    let mut len_buf = [0u8; 4];
    r.read_exact(&mut len_buf).await?;
    let len = u32::from_be_bytes(len_buf);
    if len > MAX_FRAME_LEN {
        return Err(Error::ProtocolViolation(format!(
            "frame length {len} exceeds max {MAX_FRAME_LEN}"
        )));
    }
    let mut buf = vec![0u8; len as usize];
    r.read_exact(&mut buf).await?;
    bincode::deserialize(&buf).map_err(|e| Error::Encoding(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn round_trips_through_an_in_memory_pipe() {
        let mut buf = Vec::new();
        write_val(&mut buf, &42i32).await.unwrap();
        let mut cursor = std::io::Cursor::new(buf);
        let got: i32 = read_val(&mut cursor).await.unwrap();
        assert_eq!(got, 42);
    }

    #[tokio::test]
    async fn rejects_frame_len_over_cap() {
        let mut buf = Vec::new();
        buf.extend_from_slice(&(MAX_FRAME_LEN + 1).to_be_bytes());
        let mut cursor = std::io::Cursor::new(buf);
        let err = read_val::<i32, _>(&mut cursor).await.unwrap_err();
        assert!(matches!(err, Error::ProtocolViolation(_)));
    }
}
