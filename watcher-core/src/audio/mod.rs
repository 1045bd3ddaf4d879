//! Host audio collaborators.
//!
//! | type | implements | backend |
//! |------|------------|---------|
//! | [`CpalCapture`] | `CaptureDevice` | cpal input stream (`audio-cpal`) |
//! | [`CpalPlayback`] | `PlaybackDevice` | cpal output stream (`audio-cpal`) |
//! | [`WavCapture`] | `CaptureDevice` | 16-bit WAV file via hound |
//!
//! # Threading note
//!
//! `cpal::Stream` is `!Send` on most platforms (COM on Windows, CoreAudio on
//! macOS). The cpal types therefore open their stream on a dedicated owner
//! thread and only keep `Send` handles (ring buffer halves, flags, the join
//! handle) themselves, which lets them satisfy the `Send` bound of the
//! device traits.
//!
//! Device callbacks never allocate or lock; they only touch the SPSC rings
//! from [`crate::buffering`].

pub mod capture;
pub mod device;
pub mod playback;
pub mod resample;
pub mod wav;

pub use capture::CpalCapture;
pub use device::{list_input_devices, list_output_devices, DeviceInfo};
pub use playback::CpalPlayback;
pub use resample::RateConverter;
pub use wav::WavCapture;

pub fn f32_to_i16(sample: f32) -> i16 {
    (sample.clamp(-1.0, 1.0) * i16::MAX as f32) as i16
}

pub fn i16_to_f32(sample: i16) -> f32 {
    sample as f32 / 32768.0
}

/// Append `samples` as 16-bit little-endian PCM.
pub fn encode_pcm16(samples: &[f32], out: &mut Vec<u8>) {
    out.reserve(samples.len() * 2);
    for &s in samples {
        out.extend_from_slice(&f32_to_i16(s).to_le_bytes());
    }
}

/// Append the samples of 16-bit little-endian PCM. A trailing odd byte is
/// ignored.
pub fn decode_pcm16(bytes: &[u8], out: &mut Vec<f32>) {
    out.reserve(bytes.len() / 2);
    out.extend(
        bytes
            .chunks_exact(2)
            .map(|b| i16_to_f32(i16::from_le_bytes([b[0], b[1]]))),
    );
}

/// Average interleaved frames down to mono.
pub fn mix_to_mono(interleaved: &[f32], channels: usize, out: &mut Vec<f32>) {
    if channels <= 1 {
        out.extend_from_slice(interleaved);
        return;
    }
    out.extend(
        interleaved
            .chunks_exact(channels)
            .map(|frame| frame.iter().sum::<f32>() / channels as f32),
    );
}
