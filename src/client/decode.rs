//! Streaming gzip decoding for fragment bodies.
//!
//! Upstreams may respond with `content-encoding: gzip`; the composer decodes
//! transparently so clients always receive plain bytes. Decoding is
//! incremental: each compressed chunk is fed to the decoder as it arrives and
//! whatever inflates is yielded immediately.
//!
//! A corrupt stream must never take down the page: decoder errors terminate
//! the fragment body cleanly (the stream simply ends) and are logged, not
//! propagated.

use crate::error::Result;
use bytes::Bytes;
use flate2::write::GzDecoder;
use futures::Stream;
use std::io::Write;
use std::pin::Pin;
use std::task::{Context, Poll};

/// A `Stream<Bytes>` adapter inflating a gzip-compressed inner stream.
pub struct GzipDecodeStream<S> {
    inner: S,
    decoder: Option<GzDecoder<Vec<u8>>>,
    done: bool,
}

impl<S> GzipDecodeStream<S> {
    /// Wrap a compressed byte stream.
    pub fn new(inner: S) -> Self {
        GzipDecodeStream {
            inner,
            decoder: Some(GzDecoder::new(Vec::new())),
            done: false,
        }
    }
}

impl<S> Stream for GzipDecodeStream<S>
where
    S: Stream<Item = Result<Bytes>> + Unpin,
{
    type Item = Result<Bytes>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        loop {
            if this.done {
                return Poll::Ready(None);
            }
            match Pin::new(&mut this.inner).poll_next(cx) {
                Poll::Ready(Some(Ok(chunk))) => {
                    let Some(decoder) = this.decoder.as_mut() else {
                        continue;
                    };
                    match decoder.write_all(&chunk) {
                        Ok(()) => {
                            let inflated = std::mem::take(decoder.get_mut());
                            if !inflated.is_empty() {
                                return Poll::Ready(Some(Ok(Bytes::from(inflated))));
                            }
                        }
                        Err(err) => {
                            tracing::warn!(error = %err, "gzip decode failed, truncating fragment body");
                            this.done = true;
                            return Poll::Ready(None);
                        }
                    }
                }
                Poll::Ready(Some(Err(err))) => {
                    this.done = true;
                    return Poll::Ready(Some(Err(err)));
                }
                Poll::Ready(None) => {
                    this.done = true;
                    if let Some(mut decoder) = this.decoder.take() {
                        match decoder.try_finish() {
                            Ok(()) => {
                                let inflated = std::mem::take(decoder.get_mut());
                                if !inflated.is_empty() {
                                    return Poll::Ready(Some(Ok(Bytes::from(inflated))));
                                }
                            }
                            Err(err) => {
                                tracing::warn!(error = %err, "gzip stream ended mid-member");
                            }
                        }
                    }
                    return Poll::Ready(None);
                }
                Poll::Pending => return Poll::Pending,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use flate2::write::GzEncoder;
    use flate2::Compression;
    use futures::StreamExt;

    fn gzip(data: &[u8]) -> Vec<u8> {
        let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(data).unwrap();
        encoder.finish().unwrap()
    }

    async fn collect(stream: impl Stream<Item = Result<Bytes>> + Unpin) -> Vec<u8> {
        let mut out = Vec::new();
        let mut stream = stream;
        while let Some(item) = stream.next().await {
            out.extend_from_slice(&item.unwrap());
        }
        out
    }

    #[tokio::test]
    async fn test_decodes_single_chunk() {
        let compressed = gzip(b"GZIPPED");
        let inner = futures::stream::iter(vec![Ok(Bytes::from(compressed))]);
        let decoded = collect(GzipDecodeStream::new(inner)).await;
        assert_eq!(decoded, b"GZIPPED");
    }

    #[tokio::test]
    async fn test_decodes_split_chunks() {
        let compressed = gzip(b"hello streaming world");
        let mid = compressed.len() / 2;
        let inner = futures::stream::iter(vec![
            Ok(Bytes::copy_from_slice(&compressed[..mid])),
            Ok(Bytes::copy_from_slice(&compressed[mid..])),
        ]);
        let decoded = collect(GzipDecodeStream::new(inner)).await;
        assert_eq!(decoded, b"hello streaming world");
    }

    #[tokio::test]
    async fn test_corrupt_stream_ends_cleanly() {
        let inner = futures::stream::iter(vec![Ok(Bytes::from_static(b"not gzip at all"))]);
        let mut stream = GzipDecodeStream::new(inner);
        while let Some(item) = stream.next().await {
            assert!(item.is_ok());
        }
    }

    #[tokio::test]
    async fn test_truncated_stream_ends_cleanly() {
        let compressed = gzip(b"cut short");
        let inner = futures::stream::iter(vec![Ok(Bytes::copy_from_slice(&compressed[..8]))]);
        let decoded = collect(GzipDecodeStream::new(inner)).await;
        // Nothing usable inflates from a truncated header, and nothing panics.
        assert!(decoded.is_empty());
    }
}
