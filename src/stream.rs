//! Single-producer single-consumer byte streams between stages.
//!
//! A stream is an unbounded ordered channel of byte chunks. Dropping or
//! closing the `StreamWriter` is the only end-of-stream signal; the reader
//! then returns `Ok(0)` once buffered bytes are drained. Both ends also watch
//! the pipeline's `CancellationToken` and fail with a cancellation error
//! instead of blocking once it is raised.

use crossbeam_channel::{select, Receiver, Sender};
use std::io::{self, Read, Write};

use crate::cancel::CancellationToken;

const CANCELLED_MESSAGE: &str = "pipeline cancelled";

/// Create a connected writer/reader pair.
pub fn byte_stream(
    name: &'static str,
    cancel: &CancellationToken,
) -> (StreamWriter, StreamReader) {
    let (tx, rx) = crossbeam_channel::unbounded();
    (
        StreamWriter {
            name,
            tx: Some(tx),
            cancel: cancel.clone(),
            written: 0,
        },
        StreamReader {
            name,
            rx,
            cancel: cancel.clone(),
            pending: Vec::new(),
            offset: 0,
            read: 0,
        },
    )
}

/// Error returned by stream ends after cancellation.
pub fn cancelled_error() -> io::Error {
    io::Error::new(io::ErrorKind::ConnectionAborted, CANCELLED_MESSAGE)
}

pub fn is_cancelled_error(err: &io::Error) -> bool {
    err.kind() == io::ErrorKind::ConnectionAborted
        && err
            .get_ref()
            .is_some_and(|inner| inner.to_string() == CANCELLED_MESSAGE)
}

pub struct StreamWriter {
    name: &'static str,
    tx: Option<Sender<Vec<u8>>>,
    cancel: CancellationToken,
    written: u64,
}

impl StreamWriter {
    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn bytes_written(&self) -> u64 {
        self.written
    }

    /// Close the write end. Idempotent; dropping the writer has the same effect.
    pub fn close(&mut self) {
        if self.tx.take().is_some() {
            log::debug!(
                "stream {}: closed after {} bytes",
                self.name,
                self.written
            );
        }
    }
}

impl Write for StreamWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if self.cancel.is_cancelled() {
            return Err(cancelled_error());
        }
        let Some(tx) = self.tx.as_ref() else {
            return Err(io::Error::new(
                io::ErrorKind::BrokenPipe,
                format!("stream {} is closed", self.name),
            ));
        };
        if buf.is_empty() {
            return Ok(0);
        }
        tx.send(buf.to_vec()).map_err(|_| {
            io::Error::new(
                io::ErrorKind::BrokenPipe,
                format!("stream {} reader is gone", self.name),
            )
        })?;
        self.written += buf.len() as u64;
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl Drop for StreamWriter {
    fn drop(&mut self) {
        self.close();
    }
}

pub struct StreamReader {
    name: &'static str,
    rx: Receiver<Vec<u8>>,
    cancel: CancellationToken,
    pending: Vec<u8>,
    offset: usize,
    read: u64,
}

impl StreamReader {
    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn bytes_read(&self) -> u64 {
        self.read
    }

    fn refill(&mut self) -> io::Result<bool> {
        if self.cancel.is_cancelled() {
            return Err(cancelled_error());
        }
        select! {
            recv(self.rx) -> chunk => match chunk {
                Ok(chunk) => {
                    self.pending = chunk;
                    self.offset = 0;
                    Ok(true)
                }
                Err(_) => Ok(false),
            },
            recv(self.cancel.signal()) -> _ => Err(cancelled_error()),
        }
    }
}

impl Read for StreamReader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }
        while self.offset >= self.pending.len() {
            if !self.refill()? {
                return Ok(0);
            }
        }
        let available = &self.pending[self.offset..];
        let n = available.len().min(buf.len());
        buf[..n].copy_from_slice(&available[..n]);
        self.offset += n;
        self.read += n as u64;
        Ok(n)
    }
}
