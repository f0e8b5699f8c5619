//! Streaming response body that records how a transfer ended

use axum::body::Bytes;
use chrono::Utc;
use futures_util::Stream;
use std::io;
use std::pin::Pin;
use std::task::{Context, Poll};
use tokio::fs::File;
use tokio::io::{AsyncReadExt, Take};
use tokio_util::io::ReaderStream;

use crate::transfer_log::{TransferEvent, TransferLog, TransferStatus};

/// File bytes streamed to the client, followed by a log event
///
/// The completion event is recorded once exactly `expected` bytes have been
/// handed to the connection. A read error, a short read (the file shrank
/// after it was opened) or dropping the body early (client went away)
/// records the same event with status `failed` instead.
pub struct TransferBody {
    inner: ReaderStream<Take<File>>,
    log: TransferLog,
    /// Completion event; taken once the outcome is known
    completion: Option<TransferEvent>,
    expected: u64,
    sent: u64,
}

impl TransferBody {
    /// Stream `expected` bytes from the file's current position
    pub fn new(file: File, expected: u64, log: TransferLog, completion: TransferEvent) -> Self {
        Self {
            inner: ReaderStream::new(file.take(expected)),
            log,
            completion: Some(completion),
            expected,
            sent: 0,
        }
    }

    fn finish(&mut self, succeeded: bool) {
        let Some(mut event) = self.completion.take() else {
            return;
        };

        event.timestamp = Utc::now();
        if !succeeded {
            tracing::warn!(
                path = %event.logical_path,
                client = %event.client_address,
                sent = self.sent,
                expected = self.expected,
                "Transfer interrupted"
            );
            event.status = TransferStatus::Failed;
        }

        if let Err(e) = self.log.record(event) {
            tracing::error!("Failed to submit transfer event: {}", e);
        }
    }
}

impl Stream for TransferBody {
    type Item = io::Result<Bytes>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = &mut *self;

        match Pin::new(&mut this.inner).poll_next(cx) {
            Poll::Ready(Some(Ok(chunk))) => {
                this.sent += chunk.len() as u64;
                Poll::Ready(Some(Ok(chunk)))
            }
            Poll::Ready(Some(Err(e))) => {
                this.finish(false);
                Poll::Ready(Some(Err(e)))
            }
            Poll::Ready(None) => {
                if this.completion.is_none() {
                    return Poll::Ready(None);
                }
                if this.sent == this.expected {
                    this.finish(true);
                    Poll::Ready(None)
                } else {
                    this.finish(false);
                    Poll::Ready(Some(Err(io::Error::new(
                        io::ErrorKind::UnexpectedEof,
                        "file ended before the advertised length",
                    ))))
                }
            }
            Poll::Pending => Poll::Pending,
        }
    }
}

impl Drop for TransferBody {
    fn drop(&mut self) {
        if self.completion.is_some() {
            self.finish(false);
        }
    }
}
