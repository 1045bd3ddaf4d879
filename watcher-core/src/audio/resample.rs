//! Sample-rate conversion using a rubato `FastFixedIn` resampler.
//!
//! Host devices rarely run at the protocol rates (16 kHz capture, 24 kHz
//! TTS). `RateConverter` sits between the device and the protocol in both
//! directions. Equal rates give a passthrough with no rubato session.
//!
//! ```ignore
//! let mut rc = RateConverter::new(48_000, 16_000, 960)?;
//! let out = rc.process(&raw_samples); // Vec<f32> at 16 kHz
//! ```

use rubato::{FastFixedIn, PolynomialDegree, Resampler};
use tracing::{debug, error};

use crate::error::{Result, WatcherError};

/// Converts f32 mono audio from one fixed sample rate to another.
pub struct RateConverter {
    from_rate: u32,
    to_rate: u32,
    /// `None` in passthrough mode.
    resampler: Option<FastFixedIn<f32>>,
    /// Partial input held between calls.
    input_buf: Vec<f32>,
    chunk_size: usize,
    /// `[1][output_frames_max]`.
    output_buf: Vec<Vec<f32>>,
}

impl RateConverter {
    /// `chunk_size` is the input frame count handed to rubato per call.
    ///
    /// # Errors
    /// `WatcherError::AudioDevice` if rubato fails to initialise.
    pub fn new(from_rate: u32, to_rate: u32, chunk_size: usize) -> Result<Self> {
        if from_rate == 0 || to_rate == 0 || chunk_size == 0 {
            return Err(WatcherError::Config(format!(
                "invalid resampler setup: {from_rate} Hz -> {to_rate} Hz, chunk {chunk_size}"
            )));
        }
        if from_rate == to_rate {
            return Ok(Self {
                from_rate,
                to_rate,
                resampler: None,
                input_buf: Vec::new(),
                chunk_size,
                output_buf: Vec::new(),
            });
        }

        let resampler = FastFixedIn::<f32>::new(
            to_rate as f64 / from_rate as f64,
            1.0,
            PolynomialDegree::Cubic,
            chunk_size,
            1,
        )
        .map_err(|e| WatcherError::AudioDevice(format!("resampler init: {e}")))?;
        let output_buf = vec![vec![0f32; resampler.output_frames_max()]; 1];

        debug!(from_rate, to_rate, chunk_size, "resampler ready");

        Ok(Self {
            from_rate,
            to_rate,
            resampler: Some(resampler),
            input_buf: Vec::with_capacity(chunk_size * 2),
            chunk_size,
            output_buf,
        })
    }

    /// Convert `samples`; output may be empty until a full chunk is buffered.
    pub fn process(&mut self, samples: &[f32]) -> Vec<f32> {
        let Some(resampler) = self.resampler.as_mut() else {
            return samples.to_vec();
        };

        self.input_buf.extend_from_slice(samples);
        let mut result = Vec::new();
        while self.input_buf.len() >= self.chunk_size {
            let input = &self.input_buf[..self.chunk_size];
            match resampler.process_into_buffer(&[input], &mut self.output_buf, None) {
                Ok((_consumed, produced)) => {
                    result.extend_from_slice(&self.output_buf[0][..produced]);
                }
                Err(e) => error!("resampler process error: {e}"),
            }
            self.input_buf.drain(..self.chunk_size);
        }
        result
    }

    /// Zero-pad and convert whatever partial chunk is buffered, returning
    /// only the samples that correspond to real input.
    pub fn flush(&mut self) -> Vec<f32> {
        if self.resampler.is_none() || self.input_buf.is_empty() {
            self.input_buf.clear();
            return Vec::new();
        }
        let real = self.input_buf.len();
        let keep = (real as u64 * self.to_rate as u64 / self.from_rate as u64) as usize;
        let pad = vec![0f32; self.chunk_size - real];
        let mut out = self.process(&pad);
        out.truncate(keep);
        out
    }

    pub fn reset(&mut self) {
        self.input_buf.clear();
        if let Some(resampler) = self.resampler.as_mut() {
            resampler.reset();
        }
    }

    pub fn is_passthrough(&self) -> bool {
        self.resampler.is_none()
    }

    pub fn from_rate(&self) -> u32 {
        self.from_rate
    }

    pub fn to_rate(&self) -> u32 {
        self.to_rate
    }
}
