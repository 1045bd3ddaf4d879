//! WAV-file capture source for headless runs and tests.
//!
//! Reads a 16-bit integer WAV, mixes it to mono and converts it to the
//! protocol capture rate. Every `start` rewinds to the beginning of the
//! file, so one file can be "spoken" repeatedly.

use std::{fs::File, io::BufReader, path::Path};

use hound::{SampleFormat, WavReader};
use tracing::{debug, info};

use super::{encode_pcm16, i16_to_f32, mix_to_mono, resample::RateConverter};
use crate::{
    error::{Result, WatcherError},
    voice::CaptureDevice,
};

pub struct WavCapture {
    reader: WavReader<BufReader<File>>,
    channels: usize,
    converter: RateConverter,
    started: bool,
    exhausted: bool,
    pending: Vec<u8>,
    interleaved: Vec<f32>,
    mono: Vec<f32>,
}

impl WavCapture {
    /// # Errors
    /// `WatcherError::Capture` if the file cannot be opened or is not
    /// 16-bit integer PCM.
    pub fn open(path: impl AsRef<Path>, target_rate: u32) -> Result<Self> {
        let path = path.as_ref();
        let reader = WavReader::open(path)
            .map_err(|e| WatcherError::Capture(format!("{}: {e}", path.display())))?;
        let spec = reader.spec();
        if spec.sample_format != SampleFormat::Int || spec.bits_per_sample != 16 {
            return Err(WatcherError::Capture(format!(
                "{}: expected 16-bit integer PCM, got {}-bit {:?}",
                path.display(),
                spec.bits_per_sample,
                spec.sample_format
            )));
        }
        let converter = RateConverter::new(
            spec.sample_rate,
            target_rate,
            (spec.sample_rate / 50).max(1) as usize,
        )?;
        info!(
            path = %path.display(),
            sample_rate = spec.sample_rate,
            channels = spec.channels,
            "wav capture source ready"
        );
        Ok(Self {
            reader,
            channels: spec.channels.max(1) as usize,
            converter,
            started: false,
            exhausted: false,
            pending: Vec::new(),
            interleaved: Vec::new(),
            mono: Vec::new(),
        })
    }

    /// Pull source frames until `want` output bytes are pending or the file
    /// ends.
    fn fill(&mut self, want: usize) -> Result<()> {
        let ratio = self.converter.from_rate() as f64 / self.converter.to_rate() as f64;
        while self.pending.len() < want && !self.exhausted {
            let missing_samples = (want - self.pending.len()).div_ceil(2);
            let frames = ((missing_samples as f64 * ratio).ceil() as usize).max(1);

            self.interleaved.clear();
            for sample in self.reader.samples::<i16>().take(frames * self.channels) {
                let sample = sample.map_err(|e| WatcherError::Capture(e.to_string()))?;
                self.interleaved.push(i16_to_f32(sample));
            }

            self.mono.clear();
            mix_to_mono(&self.interleaved, self.channels, &mut self.mono);
            let converted = self.converter.process(&self.mono);
            encode_pcm16(&converted, &mut self.pending);

            if self.interleaved.len() < frames * self.channels {
                let tail = self.converter.flush();
                encode_pcm16(&tail, &mut self.pending);
                self.exhausted = true;
                debug!("wav capture source exhausted");
            }
        }
        Ok(())
    }
}

impl CaptureDevice for WavCapture {
    fn start(&mut self) -> Result<()> {
        self.reader
            .seek(0)
            .map_err(|e| WatcherError::Capture(format!("rewind failed: {e}")))?;
        self.converter.reset();
        self.pending.clear();
        self.exhausted = false;
        self.started = true;
        Ok(())
    }

    fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        if !self.started {
            return Err(WatcherError::Capture("wav source not started".into()));
        }
        self.fill(buf.len())?;
        let n = buf.len().min(self.pending.len()) & !1;
        buf[..n].copy_from_slice(&self.pending[..n]);
        self.pending.drain(..n);
        Ok(n)
    }

    fn stop(&mut self) -> Result<()> {
        self.started = false;
        self.pending.clear();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write_wav(name: &str, sample_rate: u32, channels: u16, frames: usize) -> std::path::PathBuf {
        let path = std::env::temp_dir().join(format!("watcher-{}-{name}.wav", std::process::id()));
        let spec = hound::WavSpec {
            channels,
            sample_rate,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };
        let mut writer = hound::WavWriter::create(&path, spec).unwrap();
        for i in 0..frames {
            for _ in 0..channels {
                writer.write_sample((i % 100) as i16 * 100).unwrap();
            }
        }
        writer.finalize().unwrap();
        path
    }

    #[test]
    fn reads_whole_frames_then_reports_end() {
        let path = write_wav("mono16k", 16_000, 1, 3000);
        let mut source = WavCapture::open(&path, 16_000).unwrap();
        source.start().unwrap();

        let mut buf = [0u8; 1920];
        let mut total = 0;
        loop {
            let n = source.read(&mut buf).unwrap();
            if n == 0 {
                break;
            }
            assert_eq!(n % 2, 0);
            total += n;
        }
        assert_eq!(total, 6000);

        source.stop().unwrap();
        let _ = std::fs::remove_file(path);
    }

    #[test]
    fn start_rewinds_to_the_beginning() {
        let path = write_wav("rewind", 16_000, 1, 1000);
        let mut source = WavCapture::open(&path, 16_000).unwrap();
        source.start().unwrap();
        let mut first = [0u8; 64];
        source.read(&mut first).unwrap();
        while source.read(&mut [0u8; 512]).unwrap() > 0 {}

        source.start().unwrap();
        let mut again = [0u8; 64];
        assert_eq!(source.read(&mut again).unwrap(), 64);
        assert_eq!(first, again);
        let _ = std::fs::remove_file(path);
    }

    #[test]
    fn stereo_48k_is_mixed_and_downsampled() {
        let path = write_wav("stereo48k", 48_000, 2, 48_000);
        let mut source = WavCapture::open(&path, 16_000).unwrap();
        source.start().unwrap();
        let mut total = 0;
        let mut buf = [0u8; 1920];
        loop {
            let n = source.read(&mut buf).unwrap();
            if n == 0 {
                break;
            }
            total += n;
        }
        // About one second of 16 kHz mono.
        assert!((total as i64 - 32_000).abs() < 1_000, "total={total}");
        let _ = std::fs::remove_file(path);
    }

    #[test]
    fn read_before_start_fails() {
        let path = write_wav("unstarted", 16_000, 1, 100);
        let mut source = WavCapture::open(&path, 16_000).unwrap();
        assert!(source.read(&mut [0u8; 4]).is_err());
        let _ = std::fs::remove_file(path);
    }

    #[test]
    fn rejects_float_wav() {
        let path = std::env::temp_dir().join(format!("watcher-{}-float.wav", std::process::id()));
        let spec = hound::WavSpec {
            channels: 1,
            sample_rate: 16_000,
            bits_per_sample: 32,
            sample_format: hound::SampleFormat::Float,
        };
        let mut writer = hound::WavWriter::create(&path, spec).unwrap();
        writer.write_sample(0.25f32).unwrap();
        writer.finalize().unwrap();
        assert!(WavCapture::open(&path, 16_000).is_err());
        let _ = std::fs::remove_file(path);
    }
}
