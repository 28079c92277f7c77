use async_trait::async_trait;
use std::time::Duration;
use tokio::sync::mpsc;
use voxflow_foundation::error::CaptureError;

use crate::ring_buffer::AudioConsumer;

/// How long the ring-buffer source sleeps when no samples are available.
/// New blocks arrive every few tens of milliseconds at capture rates, so a
/// 10ms poll checks at least once per block without spinning.
const IDLE_POLL: Duration = Duration::from_millis(10);

/// A continuous source of fixed-sample-rate audio blocks. The orchestrator's
/// capture loop is the sole owner; nothing else pulls from a running source.
#[async_trait]
pub trait CaptureSource: Send {
    /// Pull the next block of samples. `Ok(None)` means the source has ended
    /// (closed or drained); an `Err` whose `is_fatal()` is true means audio
    /// cannot be obtained at all.
    async fn next_block(&mut self) -> Result<Option<Vec<f32>>, CaptureError>;

    /// Release the underlying device/stream. Subsequent reads return
    /// `Ok(None)`.
    fn close(&mut self);
}

/// Channel-backed capture source. Used by tests and by synthetic feeds; the
/// sender side is the "device".
pub struct ChannelSource {
    rx: mpsc::Receiver<Vec<f32>>,
    closed: bool,
}

impl ChannelSource {
    pub fn new(rx: mpsc::Receiver<Vec<f32>>) -> Self {
        Self { rx, closed: false }
    }

    /// Convenience constructor returning the feeding sender alongside the
    /// source.
    pub fn channel(buffer: usize) -> (mpsc::Sender<Vec<f32>>, Self) {
        let (tx, rx) = mpsc::channel(buffer);
        (tx, Self::new(rx))
    }
}

#[async_trait]
impl CaptureSource for ChannelSource {
    async fn next_block(&mut self) -> Result<Option<Vec<f32>>, CaptureError> {
        if self.closed {
            return Ok(None);
        }
        Ok(self.rx.recv().await)
    }

    fn close(&mut self) {
        self.closed = true;
        self.rx.close();
    }
}

/// Capture source reading from the consumer half of an [`AudioRingBuffer`],
/// for callback-fed devices that write from a real-time thread.
pub struct RingBufferSource {
    consumer: AudioConsumer,
    read_block: usize,
    closed: bool,
}

impl RingBufferSource {
    pub fn new(consumer: AudioConsumer, read_block: usize) -> Self {
        Self {
            consumer,
            read_block: read_block.max(1),
            closed: false,
        }
    }
}

#[async_trait]
impl CaptureSource for RingBufferSource {
    async fn next_block(&mut self) -> Result<Option<Vec<f32>>, CaptureError> {
        let mut buf = vec![0.0f32; self.read_block];
        loop {
            if self.closed {
                return Ok(None);
            }
            let n = self.consumer.read(&mut buf);
            if n > 0 {
                buf.truncate(n);
                return Ok(Some(buf));
            }
            if self.consumer.is_abandoned() {
                // Producer gone and buffer drained: end of stream
                return Ok(None);
            }
            tokio::time::sleep(IDLE_POLL).await;
        }
    }

    fn close(&mut self) {
        self.closed = true;
    }
}
