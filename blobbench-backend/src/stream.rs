//! Payload stream type and helpers.

use bytes::{Bytes, BytesMut};
use futures_util::stream::BoxStream;
use futures_util::{StreamExt, TryStreamExt};

/// Type alias for the byte streams passed to and returned from backends.
pub type PayloadStream = BoxStream<'static, std::io::Result<Bytes>>;

/// Creates a single-chunk [`PayloadStream`] from a byte slice.
pub fn make_stream(contents: &[u8]) -> PayloadStream {
    let bytes = Bytes::copy_from_slice(contents);
    futures_util::stream::once(async move { Ok(bytes) }).boxed()
}

/// Collects a [`PayloadStream`] into a contiguous buffer.
pub async fn read_to_bytes(stream: PayloadStream) -> std::io::Result<Bytes> {
    let buffer: BytesMut = stream.try_collect().await?;
    Ok(buffer.freeze())
}
