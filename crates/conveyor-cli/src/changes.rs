//! NDJSON change event input.

use async_trait::async_trait;
use conveyor_core::change::ChangeEvent;
use conveyor_core::ports::ChangeSource;
use conveyor_core::Result;
use std::time::Duration;
use tokio::io::{AsyncBufRead, AsyncBufReadExt};
use tokio::time::sleep;
use tracing::warn;

/// Reads one JSON change event per line. Blank lines are skipped and
/// malformed lines are logged and skipped.
///
/// In follow mode the source never ends: at end of input it polls for
/// appended lines, and a trailing partial line waits for its newline.
pub struct NdjsonChanges<R> {
    reader: R,
    buf: Vec<u8>,
    line_number: usize,
    follow: Option<Duration>,
}

impl<R: AsyncBufRead + Unpin> NdjsonChanges<R> {
    pub fn new(reader: R) -> Self {
        Self {
            reader,
            buf: Vec::new(),
            line_number: 0,
            follow: None,
        }
    }

    /// Keep polling at `interval` once input is exhausted.
    pub fn follow(mut self, interval: Duration) -> Self {
        self.follow = Some(interval);
        self
    }
}

#[async_trait]
impl<R: AsyncBufRead + Unpin + Send> ChangeSource for NdjsonChanges<R> {
    async fn next_change(&mut self) -> Result<Option<ChangeEvent>> {
        loop {
            let read = self.reader.read_until(b'\n', &mut self.buf).await?;
            if read == 0 || self.buf.last() != Some(&b'\n') {
                match self.follow {
                    Some(interval) => {
                        sleep(interval).await;
                        continue;
                    }
                    None if self.buf.is_empty() => return Ok(None),
                    None => {}
                }
            }

            let raw = std::mem::take(&mut self.buf);
            self.line_number += 1;
            let line = String::from_utf8_lossy(&raw);
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            match serde_json::from_str::<ChangeEvent>(line) {
                Ok(change) => return Ok(Some(change)),
                Err(e) => warn!(
                    line = self.line_number,
                    error = %e,
                    "Skipping malformed change event"
                ),
            }
        }
    }
}
