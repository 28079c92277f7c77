use rtrb::{Consumer, Producer, RingBuffer};
use tracing::warn;
use voxflow_foundation::error::CaptureError;

/// Audio ring buffer using rtrb (real-time safe). The producer half lives on
/// the capture callback side; the consumer half feeds the async pipeline.
pub struct AudioRingBuffer {
    producer: Producer<f32>,
    consumer: Consumer<f32>,
}

impl AudioRingBuffer {
    pub fn new(capacity: usize) -> Self {
        let (producer, consumer) = RingBuffer::new(capacity);
        Self { producer, consumer }
    }

    /// Split into producer and consumer for separate threads.
    pub fn split(self) -> (AudioProducer, AudioConsumer) {
        (
            AudioProducer {
                producer: self.producer,
            },
            AudioConsumer {
                consumer: self.consumer,
            },
        )
    }
}

/// Producer half (for the capture callback). Writes never block.
pub struct AudioProducer {
    producer: Producer<f32>,
}

impl AudioProducer {
    pub fn write(&mut self, samples: &[f32]) -> Result<usize, CaptureError> {
        let mut chunk = match self.producer.write_chunk(samples.len()) {
            Ok(chunk) => chunk,
            Err(_) => {
                warn!(
                    "Ring buffer overflow: tried to write {} samples, buffer full",
                    samples.len()
                );
                return Err(CaptureError::Overflow {
                    count: samples.len(),
                });
            }
        };

        // Write may wrap; fill both slices
        let (first, second) = chunk.as_mut_slices();
        let split = first.len();
        first.copy_from_slice(&samples[..split]);
        second.copy_from_slice(&samples[split..]);
        chunk.commit_all();
        Ok(samples.len())
    }

    /// Free slots remaining.
    pub fn slots(&self) -> usize {
        self.producer.slots()
    }
}

/// Consumer half (for the processing side). Reads never block.
pub struct AudioConsumer {
    consumer: Consumer<f32>,
}

impl AudioConsumer {
    /// Read up to `buffer.len()` samples; returns how many were copied.
    pub fn read(&mut self, buffer: &mut [f32]) -> usize {
        let available = self.consumer.slots().min(buffer.len());
        if available == 0 {
            return 0;
        }
        let chunk = match self.consumer.read_chunk(available) {
            Ok(chunk) => chunk,
            Err(_) => return 0,
        };

        let len = chunk.len();
        let (first, second) = chunk.as_slices();
        let split = first.len();
        buffer[..split].copy_from_slice(first);
        buffer[split..split + second.len()].copy_from_slice(second);
        chunk.commit_all();
        len
    }

    /// Whether the producer half has been dropped.
    pub fn is_abandoned(&self) -> bool {
        self.consumer.is_abandoned()
    }

    pub fn slots(&self) -> usize {
        self.consumer.slots()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn write_then_read_round_trips() {
        let rb = AudioRingBuffer::new(64);
        let (mut prod, mut cons) = rb.split();

        let input: Vec<f32> = (0..32).map(|i| i as f32 / 32.0).collect();
        assert_eq!(prod.write(&input).unwrap(), 32);

        let mut out = vec![0.0f32; 64];
        let n = cons.read(&mut out);
        assert_eq!(n, 32);
        assert_eq!(&out[..32], &input[..]);
    }

    #[test]
    fn overflow_is_reported() {
        let rb = AudioRingBuffer::new(16);
        let (mut prod, _cons) = rb.split();
        assert!(prod.write(&[0.0; 16]).is_ok());
        let err = prod.write(&[0.0; 8]).unwrap_err();
        assert!(matches!(err, CaptureError::Overflow { count: 8 }));
    }

    #[test]
    fn wrap_around_preserves_order() {
        let rb = AudioRingBuffer::new(8);
        let (mut prod, mut cons) = rb.split();
        let mut out = vec![0.0f32; 8];

        prod.write(&[1.0; 6]).unwrap();
        assert_eq!(cons.read(&mut out[..6]), 6);
        // This write wraps the internal cursor
        prod.write(&[2.0, 3.0, 4.0, 5.0]).unwrap();
        let n = cons.read(&mut out);
        assert_eq!(n, 4);
        assert_eq!(&out[..4], &[2.0, 3.0, 4.0, 5.0]);
    }

    #[test]
    fn abandoned_when_producer_dropped() {
        let rb = AudioRingBuffer::new(8);
        let (prod, cons) = rb.split();
        assert!(!cons.is_abandoned());
        drop(prod);
        assert!(cons.is_abandoned());
    }
}
