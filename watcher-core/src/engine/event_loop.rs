//! The engine thread.
//!
//! ## Per-event steps
//!
//! ```text
//! TransportEvent::State   → display + TTS reset on disconnect
//! TransportEvent::Text    → decode → Router (non-JSON ends TTS)
//! TransportEvent::Binary  → TtsPlayer::on_audio_chunk
//! ControlEvent::Voice     → VoiceRecorder::process_event
//! tick                    → recording timeout, VoiceRecorder::tick,
//!                           TTS inactivity timeout
//! ```
//!
//! Each step ends by broadcasting a `DeviceStatusEvent` if the observable
//! state changed.

use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};
use std::time::Instant;

use crossbeam_channel::{select, Receiver};
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use super::DeviceContext;
use crate::{
    error::{DecodeError, Result},
    glue::{display::DisplayUpdate, Emoji},
    ipc::events::{ConnectionState, ControlEvent, DeviceStatusEvent, TransportEvent},
    protocol,
    voice::{ChunkOutcome, VoiceEvent, VoiceState},
};

pub struct DeviceLoop {
    ctx: Arc<DeviceContext>,
    transport_rx: Receiver<TransportEvent>,
    control_rx: Receiver<ControlEvent>,
    status_tx: broadcast::Sender<DeviceStatusEvent>,
    connection: ConnectionState,
    published: Option<(ConnectionState, VoiceState, bool)>,
}

impl DeviceLoop {
    pub fn new(
        ctx: Arc<DeviceContext>,
        transport_rx: Receiver<TransportEvent>,
        control_rx: Receiver<ControlEvent>,
        status_tx: broadcast::Sender<DeviceStatusEvent>,
    ) -> Self {
        Self {
            ctx,
            transport_rx,
            control_rx,
            status_tx,
            connection: ConnectionState::Disconnected,
            published: None,
        }
    }

    /// Run until `running` clears, a `Shutdown` arrives or a channel closes.
    pub fn run(mut self, running: Arc<AtomicBool>) {
        info!("engine loop started");
        let ticker = crossbeam_channel::tick(self.ctx.config.tick_interval);
        let transport_rx = self.transport_rx.clone();
        let control_rx = self.control_rx.clone();

        let mut alive = true;
        while alive && running.load(Ordering::SeqCst) {
            select! {
                recv(transport_rx) -> msg => match msg {
                    Ok(event) => self.handle_transport_event(event),
                    Err(_) => {
                        warn!("transport event channel closed");
                        alive = false;
                    }
                },
                recv(control_rx) -> msg => match msg {
                    Ok(ControlEvent::Voice(event)) => self.handle_voice_event(event),
                    Ok(ControlEvent::Shutdown) | Err(_) => alive = false,
                },
                recv(ticker) -> _ => self.on_tick(Instant::now()),
            }
        }
        info!("engine loop exited");
    }

    pub fn handle_transport_event(&mut self, event: TransportEvent) {
        match event {
            TransportEvent::State(state) => self.on_connection_state(state),
            TransportEvent::Text(text) => {
                let decoded = protocol::decode(text.as_bytes());
                if matches!(decoded, Err(DecodeError::Malformed(_)))
                    && self.ctx.player.playback_end()
                {
                    info!("non-JSON text frame ended TTS playback");
                }
                let kind = self.ctx.router.dispatch(decoded);
                debug!(kind = kind.tag(), "text frame routed");
            }
            TransportEvent::Binary(data) => match self.ctx.player.on_audio_chunk(&data) {
                Ok(ChunkOutcome::Started) => {
                    log_display(self.ctx.display.set_emoji(Emoji::Speaking));
                }
                Ok(ChunkOutcome::Continued | ChunkOutcome::Ignored) => {}
                Err(e) => debug!(error = %e, bytes = data.len(), "TTS chunk dropped"),
            },
        }
        self.publish_status();
    }

    pub fn handle_voice_event(&mut self, event: VoiceEvent) {
        let before = self.ctx.recorder.state();
        let after = self.ctx.recorder.process_event(event);
        match (before, after) {
            (VoiceState::Idle, VoiceState::Recording) => {
                log_display(self.ctx.display.show("Recording...", Emoji::Normal));
            }
            (VoiceState::Recording, VoiceState::Idle) => {
                log_display(self.ctx.display.show("Processing...", Emoji::Thinking));
            }
            _ => {}
        }
        self.publish_status();
    }

    pub fn on_tick(&mut self, now: Instant) {
        if self.ctx.recorder.check_timeout(now) {
            log_display(self.ctx.display.show("Processing...", Emoji::Thinking));
        }
        if let Err(e) = self.ctx.recorder.tick() {
            debug!(error = %e, "capture tick failed");
        }
        if self.ctx.player.check_timeout(now) {
            log_display(self.ctx.display.set_emoji(Emoji::Standby));
        }
        self.publish_status();
    }

    fn on_connection_state(&mut self, state: ConnectionState) {
        let previous = std::mem::replace(&mut self.connection, state);
        match state {
            ConnectionState::Connected => {
                info!("connected to server");
                log_display(self.ctx.display.show("Connected", Emoji::Happy));
            }
            ConnectionState::Disconnected | ConnectionState::Error => {
                if self.ctx.player.playback_end() {
                    info!("connection lost, TTS playback ended");
                }
                if previous == ConnectionState::Connected {
                    warn!(?state, "connection lost");
                    log_display(self.ctx.display.show("Disconnected", Emoji::Standby));
                }
            }
            ConnectionState::Connecting => debug!("connecting"),
        }
    }

    fn publish_status(&mut self) {
        let current = (
            self.connection,
            self.ctx.recorder.state(),
            self.ctx.player.is_playing(),
        );
        if self.published == Some(current) {
            return;
        }
        self.published = Some(current);
        let _ = self.status_tx.send(DeviceStatusEvent {
            connection: current.0,
            voice: current.1,
            tts_playing: current.2,
            detail: None,
        });
    }
}

fn log_display(result: Result<DisplayUpdate>) {
    if let Err(e) = result {
        warn!(error = %e, "display update failed");
    }
}
