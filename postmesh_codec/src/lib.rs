//! # postmesh_codec
//! Bit-exact framing of every record that crosses a client<->broker or
//! broker<->broker connection.
//!
//! Framing is a `u32` big-endian byte-length prefix followed by a
//! `bincode`-encoded payload: an explicit, portable codec rather than a
//! language-native object serializer, so the record shapes stay byte-for-byte
//! stable across reimplementations.

mod framing;
mod message;

pub use framing::{read_val, write_val, MAX_FRAME_LEN};
pub use message::{Message, MessageType, MessageValue};

use postmesh_common::{ConnectionInfo, Packet, PostInfo, Result, TopicToken};
use tokio::io::{AsyncRead, AsyncWrite};

/// Sentinel `postCount` that signals "keep-alive, no finite backfill to
/// expect" on an INITIALISE_CONSUMER stream.
pub const KEEP_ALIVE_POST_COUNT: i32 = i32::MAX;

pub async fn write_message<W: AsyncWrite + Unpin>(w: &mut W, msg: &Message) -> Result<()> {
    write_val(w, msg).await
}

pub async fn read_message<R: AsyncRead + Unpin>(r: &mut R) -> Result<Message> {
    read_val(r).await
}

pub async fn write_bool<W: AsyncWrite + Unpin>(w: &mut W, val: bool) -> Result<()> {
    write_val(w, &val).await
}

pub async fn read_bool<R: AsyncRead + Unpin>(r: &mut R) -> Result<bool> {
    read_val(r).await
}

pub async fn write_post_count<W: AsyncWrite + Unpin>(w: &mut W, count: i32) -> Result<()> {
    write_val(w, &count).await
}

pub async fn read_post_count<R: AsyncRead + Unpin>(r: &mut R) -> Result<i32> {
    read_val(r).await
}

pub async fn write_post_info<W: AsyncWrite + Unpin>(w: &mut W, info: &PostInfo) -> Result<()> {
    write_val(w, info).await
}

pub async fn read_post_info<R: AsyncRead + Unpin>(r: &mut R) -> Result<PostInfo> {
    read_val(r).await
}

pub async fn write_packet<W: AsyncWrite + Unpin>(w: &mut W, packet: &Packet) -> Result<()> {
    write_val(w, packet).await
}

pub async fn read_packet<R: AsyncRead + Unpin>(r: &mut R) -> Result<Packet> {
    read_val(r).await
}

pub async fn write_connection_info<W: AsyncWrite + Unpin>(
    w: &mut W,
    ci: &ConnectionInfo,
) -> Result<()> {
    write_val(w, ci).await
}

pub async fn read_connection_info<R: AsyncRead + Unpin>(r: &mut R) -> Result<ConnectionInfo> {
    read_val(r).await
}

pub async fn write_topic_token<W: AsyncWrite + Unpin>(w: &mut W, token: &TopicToken) -> Result<()> {
    write_val(w, token).await
}

pub async fn read_topic_token<R: AsyncRead + Unpin>(r: &mut R) -> Result<TopicToken> {
    read_val(r).await
}
