//! Audio-side building blocks: the capture source contract, a real-time
//! safe ring buffer for callback-fed sources, and the window segmenter.

pub mod capture;
pub mod ring_buffer;
pub mod segmenter;

pub use capture::{CaptureSource, ChannelSource, RingBufferSource};
pub use ring_buffer::{AudioConsumer, AudioProducer, AudioRingBuffer};
pub use segmenter::{AudioWindow, SegmenterConfig, WindowSegmenter};

/// Standard sample rate for pipeline processing (Hz)
pub const SAMPLE_RATE_HZ: u32 = 16_000;
