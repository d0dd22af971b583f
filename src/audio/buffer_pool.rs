// BufferPool - lock-free buffer pool with dual SPSC queues
//
// Moves captured audio from the capture callback to the feature extraction
// worker without allocating on the capture thread.
//
// - DATA_QUEUE: capture side pushes filled buffers, analysis side consumes
// - POOL_QUEUE: analysis side returns empty buffers, capture side recycles
//
// Buffers are cleared and refilled by the capture side, so their length is
// the number of valid samples (at most the pre-allocated capacity).

use rtrb::{Consumer, Producer};

/// Audio buffer type - pre-allocated vector of f32 samples
pub type AudioBuffer = Vec<f32>;

/// Capture-side half: take empty buffers, hand back filled ones
pub struct CaptureChannels {
    pub data_producer: Producer<AudioBuffer>,
    pub pool_consumer: Consumer<AudioBuffer>,
}

impl CaptureChannels {
    /// Copy `samples` into a recycled buffer and publish it.
    ///
    /// Returns false when no empty buffer was available (the analysis side is
    /// behind) and the samples were dropped.
    pub fn publish(&mut self, samples: &[f32]) -> bool {
        match self.pool_consumer.pop() {
            Ok(mut buffer) => {
                buffer.clear();
                buffer.extend_from_slice(samples);
                self.data_producer.push(buffer).is_ok()
            }
            Err(_) => false,
        }
    }

    /// Publish the first channel of an interleaved frame slice.
    pub fn publish_first_channel(&mut self, data: &[f32], channel_count: usize) -> bool {
        if channel_count <= 1 {
            return self.publish(data);
        }
        match self.pool_consumer.pop() {
            Ok(mut buffer) => {
                buffer.clear();
                buffer.extend(data.chunks(channel_count).map(|frame| frame[0]));
                self.data_producer.push(buffer).is_ok()
            }
            Err(_) => false,
        }
    }
}

/// Analysis-side half: consume filled buffers, return them empty
pub struct AnalysisChannels {
    pub data_consumer: Consumer<AudioBuffer>,
    pub pool_producer: Producer<AudioBuffer>,
}

/// Split buffer pool channels for producer/consumer separation
pub struct BufferPoolChannels {
    pub data_producer: Producer<AudioBuffer>,
    pub data_consumer: Consumer<AudioBuffer>,
    pub pool_producer: Producer<AudioBuffer>,
    pub pool_consumer: Consumer<AudioBuffer>,
}

impl BufferPoolChannels {
    /// Separate the queues into the halves owned by each thread
    pub fn split(self) -> (CaptureChannels, AnalysisChannels) {
        (
            CaptureChannels {
                data_producer: self.data_producer,
                pool_consumer: self.pool_consumer,
            },
            AnalysisChannels {
                data_consumer: self.data_consumer,
                pool_producer: self.pool_producer,
            },
        )
    }
}

/// Lock-free buffer pool using dual SPSC ring buffers
pub struct BufferPool;

impl BufferPool {
    /// Create the pool with every buffer pre-allocated in the pool queue
    ///
    /// # Arguments
    /// * `buffer_count` - Number of buffers to pre-allocate
    /// * `buffer_size` - Capacity of each buffer in f32 samples
    ///
    /// # Panics
    /// Panics if buffer_count is 0 or buffer_size is 0
    #[allow(clippy::new_ret_no_self)]
    pub fn new(buffer_count: usize, buffer_size: usize) -> BufferPoolChannels {
        assert!(buffer_count > 0, "buffer_count must be greater than 0");
        assert!(buffer_size > 0, "buffer_size must be greater than 0");

        let (mut pool_producer, pool_consumer) = rtrb::RingBuffer::new(buffer_count);
        let (data_producer, data_consumer) = rtrb::RingBuffer::new(buffer_count);

        // The pool queue has exactly buffer_count slots, so every push fits
        for _ in 0..buffer_count {
            let buffer = Vec::with_capacity(buffer_size);
            if pool_producer.push(buffer).is_err() {
                break;
            }
        }

        BufferPoolChannels {
            data_producer,
            data_consumer,
            pool_producer,
            pool_consumer,
        }
    }
}
