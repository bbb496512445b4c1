//! Output stream assembly.
//!
//! The assembler owns the writing side of the response body channel and the
//! document shell. Writes happen strictly in document order: doctype and
//! `<html><head>`, head content, the client-runtime scripts, `<body>` and
//! body content, the drain region, then `</body></html>`. A send failure
//! means the downstream client disconnected; the orchestrator treats that as
//! a cancellation signal.

use crate::error::{Result, WeaveError};
use crate::server::config::ComposerConfig;
use bytes::Bytes;
use std::convert::Infallible;
use tokio::sync::mpsc;

/// Item type flowing into the response body stream.
pub(crate) type OutputChunk = std::result::Result<Bytes, Infallible>;

/// Writer for the composed output stream.
pub(crate) struct Assembler {
    tx: mpsc::Sender<OutputChunk>,
}

impl Assembler {
    /// Create an assembler and the receiving end of its byte channel.
    pub(crate) fn channel(capacity: usize) -> (Self, mpsc::Receiver<OutputChunk>) {
        let (tx, rx) = mpsc::channel(capacity);
        (Assembler { tx }, rx)
    }

    /// Write one chunk. Empty chunks are skipped.
    pub(crate) async fn write(&self, bytes: impl Into<Bytes>) -> Result<()> {
        let bytes = bytes.into();
        if bytes.is_empty() {
            return Ok(());
        }
        self.tx
            .send(Ok(bytes))
            .await
            .map_err(|_| WeaveError::ClientDisconnected)
    }

    /// Doctype (when present) and the opening `<html><head>`.
    pub(crate) async fn open_document(&self, doctype: Option<&Bytes>) -> Result<()> {
        if let Some(doctype) = doctype {
            self.write(doctype.clone()).await?;
        }
        self.write(Bytes::from_static(b"<html><head>")).await
    }

    /// The client-runtime scripts at the end of `<head>`.
    ///
    /// An inline `pipe_definition` replaces the external loader entirely;
    /// with neither configured, nothing is emitted.
    pub(crate) async fn write_runtime(&self, config: &ComposerConfig) -> Result<()> {
        if let Some(definition) = &config.pipe_definition {
            self.write(Bytes::from_static(b"<script>")).await?;
            self.write(definition.clone()).await?;
            return self.write(Bytes::from_static(b"</script>")).await;
        }
        if let Some(url) = &config.amd_loader_url {
            self.write(format!(
                "<link rel=\"preload\" href=\"{url}\" as=\"script\"><script src=\"{url}\"></script>"
            ))
            .await?;
        }
        Ok(())
    }

    /// Close the head and open the body.
    pub(crate) async fn open_body(&self) -> Result<()> {
        self.write(Bytes::from_static(b"</head><body>")).await
    }

    /// Close the document after the drain region has flushed.
    pub(crate) async fn close_document(&self) -> Result<()> {
        self.write(Bytes::from_static(b"</body></html>")).await
    }
}
