//! Progress-tracking reader.
//!
//! [`ProgressReader`] wraps any [`AsyncRead`] and reports how far a transfer
//! has got. Observations are handed to a [`ProgressSink`] every time another
//! `interval` bytes have passed through, plus exactly once at end of stream.

use std::io;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;

use tokio::io::{AsyncRead, ReadBuf};
use tokio::time::Instant;
use tracing::info;

/// Default reporting interval: 10 MiB
pub const DEFAULT_INTERVAL: u64 = 10 * 1024 * 1024;

/// One progress observation.
#[derive(Debug, Clone, PartialEq)]
pub struct TransferProgress {
    /// Bytes read so far
    pub bytes_read: u64,
    /// Expected total, when known
    pub total: Option<u64>,
    /// Time since the reader was created
    pub elapsed: Duration,
    /// Average throughput since the start
    pub bytes_per_sec: f64,
    /// Share of `total` read so far, in percent
    pub percent: Option<f64>,
    /// Estimated time left at the average throughput
    pub eta: Option<Duration>,
    /// Whether this is the end-of-stream observation
    pub finished: bool,
}

/// Receives progress observations.
pub trait ProgressSink: Send + Sync {
    /// Record one observation
    fn record(&self, progress: &TransferProgress);
}

/// Logs observations through `tracing` with human-scaled units.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingProgressSink;

impl ProgressSink for TracingProgressSink {
    fn record(&self, progress: &TransferProgress) {
        let downloaded = format_bytes(progress.bytes_read);
        let elapsed = Duration::from_secs(progress.elapsed.as_secs_f64().round() as u64);
        let speed = format_speed(progress.bytes_per_sec);

        match (progress.total, progress.percent) {
            (Some(total), Some(percent)) => {
                let eta = progress
                    .eta
                    .map(|eta| format!("{:?}", Duration::from_secs(eta.as_secs_f64().round() as u64)))
                    .unwrap_or_else(|| "unknown".to_string());
                info!(
                    downloaded = %downloaded,
                    elapsed = ?elapsed,
                    speed = %speed,
                    total = %format_bytes(total),
                    percentage = %format!("{:.1}%", percent),
                    estimated_remaining = %eta,
                    "Download progress"
                );
            }
            _ => {
                info!(
                    downloaded = %downloaded,
                    elapsed = ?elapsed,
                    speed = %speed,
                    "Download progress"
                );
            }
        }
    }
}

/// An [`AsyncRead`] adapter that counts bytes and reports progress.
pub struct ProgressReader<R> {
    inner: R,
    total: Option<u64>,
    bytes_read: u64,
    last_reported: u64,
    interval: u64,
    started: Instant,
    finished: bool,
    sink: Arc<dyn ProgressSink>,
}

impl<R: AsyncRead + Unpin> ProgressReader<R> {
    /// Wrap `inner`. A `total` of `None` or `Some(0)` means the size is unknown.
    pub fn new(inner: R, total: Option<u64>, sink: Arc<dyn ProgressSink>) -> Self {
        Self {
            inner,
            total: total.filter(|&t| t > 0),
            bytes_read: 0,
            last_reported: 0,
            interval: DEFAULT_INTERVAL,
            started: Instant::now(),
            finished: false,
            sink,
        }
    }

    /// Report every `bytes` bytes instead of every 10 MiB.
    pub fn with_interval(mut self, bytes: u64) -> Self {
        self.interval = bytes.max(1);
        self
    }

    /// Bytes read so far
    pub fn bytes_read(&self) -> u64 {
        self.bytes_read
    }

    /// Unwrap the inner reader
    pub fn into_inner(self) -> R {
        self.inner
    }

    fn snapshot(&self, finished: bool) -> TransferProgress {
        let elapsed = self.started.elapsed();
        let secs = elapsed.as_secs_f64();
        let bytes_per_sec = if secs > 0.0 {
            self.bytes_read as f64 / secs
        } else {
            0.0
        };

        let percent = self
            .total
            .map(|total| self.bytes_read as f64 / total as f64 * 100.0);
        let eta = match self.total {
            // Absurd totals give no ETA rather than an out-of-range duration
            Some(total) if bytes_per_sec > 0.0 => {
                let remaining = total.saturating_sub(self.bytes_read) as f64;
                Duration::try_from_secs_f64(remaining / bytes_per_sec).ok()
            }
            _ => None,
        };

        TransferProgress {
            bytes_read: self.bytes_read,
            total: self.total,
            elapsed,
            bytes_per_sec,
            percent,
            eta,
            finished,
        }
    }

    fn report(&mut self, finished: bool) {
        let progress = self.snapshot(finished);
        self.sink.record(&progress);
        self.last_reported = self.bytes_read;
    }
}

impl<R: AsyncRead + Unpin> AsyncRead for ProgressReader<R> {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        let before = buf.filled().len();
        let had_room = buf.remaining() > 0;

        match Pin::new(&mut this.inner).poll_read(cx, buf) {
            Poll::Ready(Ok(())) => {
                let n = (buf.filled().len() - before) as u64;
                this.bytes_read += n;

                if n == 0 && had_room {
                    if !this.finished {
                        this.finished = true;
                        this.report(true);
                    }
                } else if this.bytes_read - this.last_reported >= this.interval {
                    this.report(false);
                }
                Poll::Ready(Ok(()))
            }
            other => other,
        }
    }
}

const UNIT: f64 = 1024.0;

/// Render a byte count with 1024-based units: `512 B`, `1.50 KB`, `2.00 GB`.
pub fn format_bytes(bytes: u64) -> String {
    if bytes < 1024 {
        return format!("{} B", bytes);
    }
    scaled(bytes as f64, &["KB", "MB", "GB", "TB"])
}

/// Render a throughput with 1024-based units: `900 B/s`, `1.25 MB/s`.
pub fn format_speed(bytes_per_sec: f64) -> String {
    if bytes_per_sec < UNIT {
        return format!("{:.0} B/s", bytes_per_sec);
    }
    scaled(bytes_per_sec, &["KB/s", "MB/s", "GB/s", "TB/s"])
}

fn scaled(value: f64, units: &[&str]) -> String {
    let mut value = value / UNIT;
    let mut unit = 0;
    while value >= UNIT && unit + 1 < units.len() {
        value /= UNIT;
        unit += 1;
    }
    format!("{:.2} {}", value, units[unit])
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use tokio::io::AsyncReadExt;

    #[derive(Default)]
    struct Recorder(Mutex<Vec<TransferProgress>>);

    impl ProgressSink for Recorder {
        fn record(&self, progress: &TransferProgress) {
            self.0.lock().push(progress.clone());
        }
    }

    #[tokio::test]
    async fn test_small_transfer_reports_once_at_eof() {
        let data = vec![b'a'; 100];
        let recorder = Arc::new(Recorder::default());
        let mut reader = ProgressReader::new(&data[..], Some(100), recorder.clone())
            .with_interval(1024 * 1024);

        let mut out = Vec::new();
        reader.read_to_end(&mut out).await.unwrap();
        // A further read past EOF must not report again
        let n = reader.read(&mut [0u8; 8]).await.unwrap();

        assert_eq!(n, 0);
        assert_eq!(out.len(), 100);
        assert_eq!(reader.bytes_read(), 100);
        let seen = recorder.0.lock();
        assert_eq!(seen.len(), 1);
        assert!(seen[0].finished);
        assert_eq!(seen[0].bytes_read, 100);
        assert_eq!(seen[0].percent, Some(100.0));
    }

    #[tokio::test]
    async fn test_reports_each_interval() {
        let data = vec![0u8; 100];
        let recorder = Arc::new(Recorder::default());
        let mut reader = ProgressReader::new(&data[..], None, recorder.clone()).with_interval(30);

        let mut chunk = [0u8; 10];
        loop {
            if reader.read(&mut chunk).await.unwrap() == 0 {
                break;
            }
        }

        let seen = recorder.0.lock();
        let points: Vec<u64> = seen.iter().map(|p| p.bytes_read).collect();
        assert_eq!(points, vec![30, 60, 90, 100]);
        assert!(seen.last().unwrap().finished);
    }

    #[tokio::test]
    async fn test_unknown_total_has_no_percent_or_eta() {
        let data = vec![b'b'; 50];
        let recorder = Arc::new(Recorder::default());
        let mut reader = ProgressReader::new(&data[..], Some(0), recorder.clone()).with_interval(10);

        let mut out = Vec::new();
        reader.read_to_end(&mut out).await.unwrap();

        let seen = recorder.0.lock();
        assert!(!seen.is_empty());
        for progress in seen.iter() {
            assert_eq!(progress.total, None);
            assert_eq!(progress.percent, None);
            assert_eq!(progress.eta, None);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_throughput_and_eta() {
        let (mut tx, rx) = tokio::io::duplex(64);
        let recorder = Arc::new(Recorder::default());
        let mut reader = ProgressReader::new(rx, Some(2048), recorder.clone()).with_interval(1024);

        tokio::time::advance(Duration::from_secs(2)).await;
        tokio::io::AsyncWriteExt::write_all(&mut tx, &[0u8; 64]).await.unwrap();

        let mut buf = vec![0u8; 64];
        let mut total = 0;
        while total < 1024 {
            total += reader.read(&mut buf).await.unwrap();
            if total < 1024 {
                tokio::io::AsyncWriteExt::write_all(&mut tx, &[0u8; 64]).await.unwrap();
            }
        }

        let seen = recorder.0.lock();
        assert_eq!(seen.len(), 1);
        let progress = &seen[0];
        assert_eq!(progress.bytes_read, 1024);
        assert_eq!(progress.elapsed, Duration::from_secs(2));
        assert_eq!(progress.bytes_per_sec, 512.0);
        assert_eq!(progress.percent, Some(50.0));
        assert_eq!(progress.eta, Some(Duration::from_secs(2)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_huge_total_has_no_eta() {
        let data = [0u8; 4];
        let recorder = Arc::new(Recorder::default());
        let mut reader = ProgressReader::new(&data[..], Some(u64::MAX), recorder.clone()).with_interval(1);

        tokio::time::advance(Duration::from_secs(4)).await;
        let n = reader.read(&mut [0u8; 4]).await.unwrap();

        assert_eq!(n, 4);
        let seen = recorder.0.lock();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].bytes_per_sec, 1.0);
        assert_eq!(seen[0].eta, None);
        assert!(seen[0].percent.is_some());
    }

    #[test]
    fn test_format_bytes() {
        assert_eq!(format_bytes(0), "0 B");
        assert_eq!(format_bytes(1023), "1023 B");
        assert_eq!(format_bytes(1024), "1.00 KB");
        assert_eq!(format_bytes(1536), "1.50 KB");
        assert_eq!(format_bytes(1024 * 1024), "1.00 MB");
        assert_eq!(format_bytes(5 * 1024 * 1024 * 1024), "5.00 GB");
        assert_eq!(format_bytes(2 * 1024u64.pow(4)), "2.00 TB");
    }

    #[test]
    fn test_format_speed() {
        assert_eq!(format_speed(0.0), "0 B/s");
        assert_eq!(format_speed(512.4), "512 B/s");
        assert_eq!(format_speed(2048.0), "2.00 KB/s");
        assert_eq!(format_speed(1.5 * 1024.0 * 1024.0), "1.50 MB/s");
    }
}
