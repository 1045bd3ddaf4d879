//! Microphone capture via cpal.
//!
//! The input callback mixes to mono and pushes f32 samples into an SPSC
//! ring at the device rate. `read` drains the ring on the engine thread,
//! resamples to the protocol capture rate and hands out 16-bit LE PCM.

use std::thread::JoinHandle;

use crossbeam_channel::Sender;
use tracing::{info, warn};

use super::{encode_pcm16, resample::RateConverter};
use crate::{
    buffering::{create_sample_ring, Consumer, SampleConsumer, SampleProducer, CAPTURE_RING_CAPACITY},
    error::{Result, WatcherError},
    voice::CaptureDevice,
};

#[cfg(feature = "audio-cpal")]
type StreamGuard = cpal::Stream;
#[cfg(not(feature = "audio-cpal"))]
type StreamGuard = ();

/// Samples drained from the ring per pass.
const DRAIN_CHUNK: usize = 960;

struct Worker {
    stop_tx: Sender<()>,
    handle: JoinHandle<()>,
}

struct Session {
    consumer: SampleConsumer,
    converter: RateConverter,
}

pub struct CpalCapture {
    preferred_device: Option<String>,
    target_rate: u32,
    worker: Option<Worker>,
    session: Option<Session>,
    scratch: Vec<f32>,
    pending: Vec<u8>,
}

impl CpalCapture {
    /// `target_rate` is the rate `read` delivers (protocol capture rate).
    pub fn new(preferred_device: Option<String>, target_rate: u32) -> Self {
        Self {
            preferred_device,
            target_rate,
            worker: None,
            session: None,
            scratch: vec![0f32; DRAIN_CHUNK],
            pending: Vec::new(),
        }
    }
}

impl CaptureDevice for CpalCapture {
    fn start(&mut self) -> Result<()> {
        if self.worker.is_some() {
            return Ok(());
        }

        let (producer, consumer) = create_sample_ring(CAPTURE_RING_CAPACITY);
        let (open_tx, open_rx) = crossbeam_channel::bounded::<Result<u32>>(1);
        let (stop_tx, stop_rx) = crossbeam_channel::bounded::<()>(1);
        let preferred = self.preferred_device.clone();

        // The stream is created and dropped on this thread only.
        let handle = std::thread::Builder::new()
            .name("watcher-capture".into())
            .spawn(move || {
                let stream = match open_input_stream(producer, preferred.as_deref()) {
                    Ok((stream, rate)) => {
                        let _ = open_tx.send(Ok(rate));
                        stream
                    }
                    Err(e) => {
                        let _ = open_tx.send(Err(e));
                        return;
                    }
                };
                let _ = stop_rx.recv();
                drop(stream);
            })?;

        let device_rate = match open_rx.recv() {
            Ok(Ok(rate)) => rate,
            Ok(Err(e)) => {
                let _ = handle.join();
                return Err(e);
            }
            Err(_) => {
                let _ = handle.join();
                return Err(WatcherError::AudioStream("capture thread died".into()));
            }
        };

        let converter = match RateConverter::new(device_rate, self.target_rate, (device_rate / 50) as usize) {
            Ok(converter) => converter,
            Err(e) => {
                let _ = stop_tx.send(());
                let _ = handle.join();
                return Err(e);
            }
        };

        info!(device_rate, target_rate = self.target_rate, "microphone open");
        self.pending.clear();
        self.session = Some(Session {
            consumer,
            converter,
        });
        self.worker = Some(Worker { stop_tx, handle });
        Ok(())
    }

    fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        let Some(session) = self.session.as_mut() else {
            return Err(WatcherError::Capture("microphone not started".into()));
        };

        loop {
            let n = session.consumer.pop_slice(&mut self.scratch);
            if n == 0 {
                break;
            }
            let converted = session.converter.process(&self.scratch[..n]);
            encode_pcm16(&converted, &mut self.pending);
            if n < self.scratch.len() {
                break;
            }
        }

        let n = buf.len().min(self.pending.len()) & !1;
        buf[..n].copy_from_slice(&self.pending[..n]);
        self.pending.drain(..n);
        Ok(n)
    }

    fn stop(&mut self) -> Result<()> {
        self.session = None;
        self.pending.clear();
        if let Some(worker) = self.worker.take() {
            let _ = worker.stop_tx.send(());
            if worker.handle.join().is_err() {
                return Err(WatcherError::AudioStream("capture thread panicked".into()));
            }
            info!("microphone closed");
        }
        Ok(())
    }
}

impl Drop for CpalCapture {
    fn drop(&mut self) {
        if let Err(e) = self.stop() {
            warn!(error = %e, "microphone shutdown failed");
        }
    }
}

#[cfg(feature = "audio-cpal")]
fn open_input_stream(
    mut producer: SampleProducer,
    preferred: Option<&str>,
) -> Result<(StreamGuard, u32)> {
    use cpal::{
        traits::{DeviceTrait, StreamTrait},
        SampleFormat, StreamConfig,
    };
    use tracing::error;

    use super::{device::select_input, i16_to_f32, mix_to_mono};
    use crate::buffering::Producer;

    let device = select_input(preferred)?;
    info!(
        device = device.name().unwrap_or_default().as_str(),
        "opening input device"
    );

    let supported = device
        .default_input_config()
        .map_err(|e| WatcherError::AudioDevice(e.to_string()))?;
    let sample_rate = supported.sample_rate().0;
    let channels = supported.channels() as usize;
    let config: StreamConfig = supported.config();

    let mut mono: Vec<f32> = Vec::with_capacity(DRAIN_CHUNK * 4);
    let mut widened: Vec<f32> = Vec::with_capacity(DRAIN_CHUNK * 4 * channels);

    let mut push = move |samples: &[f32]| {
        mono.clear();
        mix_to_mono(samples, channels, &mut mono);
        let written = producer.push_slice(&mono);
        if written < mono.len() {
            warn!("capture ring full: dropped {} samples", mono.len() - written);
        }
    };

    let stream = match supported.sample_format() {
        SampleFormat::F32 => device.build_input_stream(
            &config,
            move |data: &[f32], _info| push(data),
            |err| error!("input stream error: {err}"),
            None,
        ),
        SampleFormat::I16 => device.build_input_stream(
            &config,
            move |data: &[i16], _info| {
                widened.clear();
                widened.extend(data.iter().map(|s| i16_to_f32(*s)));
                push(&widened);
            },
            |err| error!("input stream error: {err}"),
            None,
        ),
        SampleFormat::U8 => device.build_input_stream(
            &config,
            move |data: &[u8], _info| {
                widened.clear();
                widened.extend(data.iter().map(|s| (*s as f32 - 128.0) / 128.0));
                push(&widened);
            },
            |err| error!("input stream error: {err}"),
            None,
        ),
        fmt => {
            return Err(WatcherError::AudioStream(format!(
                "unsupported sample format: {fmt:?}"
            )))
        }
    }
    .map_err(|e| WatcherError::AudioStream(e.to_string()))?;

    stream
        .play()
        .map_err(|e| WatcherError::AudioStream(e.to_string()))?;
    Ok((stream, sample_rate))
}

#[cfg(not(feature = "audio-cpal"))]
fn open_input_stream(
    _producer: SampleProducer,
    _preferred: Option<&str>,
) -> Result<(StreamGuard, u32)> {
    Err(WatcherError::AudioStream(
        "compiled without audio-cpal feature".into(),
    ))
}
