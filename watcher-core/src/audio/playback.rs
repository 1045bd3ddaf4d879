//! Speaker output via cpal.
//!
//! `write` decodes 16-bit PCM at the source rate, converts to the device
//! rate and pushes into an SPSC ring. The output callback pops one mono
//! sample per frame and copies it to every channel, emitting silence when
//! the ring runs dry.

use std::{
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    thread::JoinHandle,
    time::{Duration, Instant},
};

use crossbeam_channel::Sender;
use tracing::{debug, info, warn};

use super::{decode_pcm16, resample::RateConverter};
use crate::{
    buffering::{
        create_sample_ring, Producer, SampleConsumer, SampleProducer, PLAYBACK_RING_CAPACITY,
    },
    error::{Result, WatcherError},
    voice::PlaybackDevice,
};

#[cfg(feature = "audio-cpal")]
type StreamGuard = cpal::Stream;
#[cfg(not(feature = "audio-cpal"))]
type StreamGuard = ();

/// Upper bound on how long a stopped stream keeps playing queued audio.
const DRAIN_LIMIT: Duration = Duration::from_secs(5);
const DRAIN_POLL: Duration = Duration::from_millis(20);

struct Session {
    producer: SampleProducer,
    converter: RateConverter,
    device_rate: u32,
    stop_tx: Sender<()>,
    /// Detached on stop; the thread exits once the ring drains.
    _handle: JoinHandle<()>,
}

pub struct CpalPlayback {
    preferred_device: Option<String>,
    source_rate: u32,
    session: Option<Session>,
    samples: Vec<f32>,
}

impl CpalPlayback {
    pub fn new(preferred_device: Option<String>, source_rate: u32) -> Self {
        Self {
            preferred_device,
            source_rate,
            session: None,
            samples: Vec::new(),
        }
    }

    fn converter_for(source_rate: u32, device_rate: u32) -> Result<RateConverter> {
        RateConverter::new(source_rate, device_rate, (source_rate / 50).max(1) as usize)
    }
}

impl PlaybackDevice for CpalPlayback {
    fn set_sample_rate(&mut self, rate: u32) -> Result<()> {
        if rate == 0 {
            return Err(WatcherError::Playback("sample rate must be non-zero".into()));
        }
        self.source_rate = rate;
        if let Some(session) = self.session.as_mut() {
            session.converter = Self::converter_for(rate, session.device_rate)?;
        }
        Ok(())
    }

    fn start(&mut self) -> Result<()> {
        if self.session.is_some() {
            return Ok(());
        }

        let (producer, consumer) = create_sample_ring(PLAYBACK_RING_CAPACITY);
        let (open_tx, open_rx) = crossbeam_channel::bounded::<Result<u32>>(1);
        let (stop_tx, stop_rx) = crossbeam_channel::bounded::<()>(1);
        let preferred = self.preferred_device.clone();
        let idle = Arc::new(AtomicBool::new(true));

        let handle = std::thread::Builder::new()
            .name("watcher-playback".into())
            .spawn(move || {
                let stream = match open_output_stream(consumer, preferred.as_deref(), idle.clone()) {
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
                let deadline = Instant::now() + DRAIN_LIMIT;
                while !idle.load(Ordering::Acquire) && Instant::now() < deadline {
                    std::thread::sleep(DRAIN_POLL);
                }
                drop(stream);
                debug!("speaker stream released");
            })?;

        let device_rate = match open_rx.recv() {
            Ok(Ok(rate)) => rate,
            Ok(Err(e)) => {
                let _ = handle.join();
                return Err(e);
            }
            Err(_) => {
                let _ = handle.join();
                return Err(WatcherError::AudioStream("playback thread died".into()));
            }
        };

        let converter = match Self::converter_for(self.source_rate, device_rate) {
            Ok(converter) => converter,
            Err(e) => {
                let _ = stop_tx.send(());
                let _ = handle.join();
                return Err(e);
            }
        };

        info!(device_rate, source_rate = self.source_rate, "speaker open");
        self.session = Some(Session {
            producer,
            converter,
            device_rate,
            stop_tx,
            _handle: handle,
        });
        Ok(())
    }

    fn write(&mut self, data: &[u8]) -> Result<usize> {
        let Some(session) = self.session.as_mut() else {
            return Err(WatcherError::Playback("speaker not started".into()));
        };

        self.samples.clear();
        decode_pcm16(data, &mut self.samples);
        let converted = session.converter.process(&self.samples);
        let written = session.producer.push_slice(&converted);
        if written < converted.len() {
            warn!(
                "playback ring full: dropped {} samples",
                converted.len() - written
            );
        }
        Ok(data.len())
    }

    fn stop(&mut self) -> Result<()> {
        if let Some(mut session) = self.session.take() {
            let tail = session.converter.flush();
            session.producer.push_slice(&tail);
            let _ = session.stop_tx.send(());
            info!("speaker closing");
        }
        Ok(())
    }
}

impl Drop for CpalPlayback {
    fn drop(&mut self) {
        let _ = self.stop();
    }
}

#[cfg(feature = "audio-cpal")]
fn open_output_stream(
    mut consumer: SampleConsumer,
    preferred: Option<&str>,
    idle: Arc<AtomicBool>,
) -> Result<(StreamGuard, u32)> {
    use cpal::{
        traits::{DeviceTrait, StreamTrait},
        SampleFormat, StreamConfig,
    };
    use tracing::error;

    use super::{device::select_output, f32_to_i16};
    use crate::buffering::Consumer;

    let device = select_output(preferred)?;
    info!(
        device = device.name().unwrap_or_default().as_str(),
        "opening output device"
    );

    let supported = device
        .default_output_config()
        .map_err(|e| WatcherError::AudioDevice(e.to_string()))?;
    let sample_rate = supported.sample_rate().0;
    let channels = (supported.channels() as usize).max(1);
    let config: StreamConfig = supported.config();

    let stream = match supported.sample_format() {
        SampleFormat::F32 => device.build_output_stream(
            &config,
            move |data: &mut [f32], _info| {
                let mut missing = 0usize;
                for frame in data.chunks_exact_mut(channels) {
                    let sample = consumer.try_pop().unwrap_or_else(|| {
                        missing += 1;
                        0.0
                    });
                    frame.fill(sample);
                }
                idle.store(missing > 0, Ordering::Release);
            },
            |err| error!("output stream error: {err}"),
            None,
        ),
        SampleFormat::I16 => device.build_output_stream(
            &config,
            move |data: &mut [i16], _info| {
                let mut missing = 0usize;
                for frame in data.chunks_exact_mut(channels) {
                    let sample = consumer.try_pop().unwrap_or_else(|| {
                        missing += 1;
                        0.0
                    });
                    frame.fill(f32_to_i16(sample));
                }
                idle.store(missing > 0, Ordering::Release);
            },
            |err| error!("output stream error: {err}"),
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
fn open_output_stream(
    _consumer: SampleConsumer,
    _preferred: Option<&str>,
    _idle: Arc<AtomicBool>,
) -> Result<(StreamGuard, u32)> {
    Err(WatcherError::AudioStream(
        "compiled without audio-cpal feature".into(),
    ))
}
