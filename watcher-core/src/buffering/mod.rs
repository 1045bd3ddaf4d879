//! Lock-free SPSC ring buffers between device callbacks and the engine.
//!
//! Uses `ringbuf::HeapRb<f32>`, whose `push_slice` / `pop_slice` are
//! wait-free and safe to call from a real-time audio callback.

use ringbuf::{traits::Split, HeapRb};

pub use ringbuf::traits::{Consumer, Observer, Producer};

pub type SampleProducer = ringbuf::HeapProd<f32>;
pub type SampleConsumer = ringbuf::HeapCons<f32>;

/// Microphone ring: 2^20 samples ≈ 21.8 s at 48 kHz, comfortably above the
/// maximum recording length at typical device rates.
pub const CAPTURE_RING_CAPACITY: usize = 1 << 20;

/// Speaker ring: 2^21 samples ≈ 43.7 s at 48 kHz. A whole TTS reply usually
/// arrives faster than real time.
pub const PLAYBACK_RING_CAPACITY: usize = 1 << 21;

pub fn create_sample_ring(capacity: usize) -> (SampleProducer, SampleConsumer) {
    HeapRb::<f32>::new(capacity).split()
}
