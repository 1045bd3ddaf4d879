//! Router handler table for a complete device.

use std::sync::Arc;

use tracing::{info, warn};

use super::display::{parse_status, state_to_emoji, DisplayController, DisplayUpdate, Emoji};
use super::servo::ServoBridge;
use super::RebootHandle;
use crate::error::Result;
use crate::router::Handlers;
use crate::voice::TtsPlayer;

/// Collaborators the handlers act on.
#[derive(Clone)]
pub struct DeviceGlue {
    pub display: Arc<DisplayController>,
    pub servo: Arc<ServoBridge>,
    pub reboot: Arc<dyn RebootHandle>,
    pub player: Arc<TtsPlayer>,
}

pub fn build_handlers(glue: &DeviceGlue) -> Handlers {
    let servo = Arc::clone(&glue.servo);
    let display = Arc::clone(&glue.display);
    let status_display = Arc::clone(&glue.display);
    let status_player = Arc::clone(&glue.player);
    let reboot = Arc::clone(&glue.reboot);
    let asr_display = Arc::clone(&glue.display);
    let reply_display = Arc::clone(&glue.display);
    let end_display = Arc::clone(&glue.display);
    let end_player = Arc::clone(&glue.player);
    let error_display = Arc::clone(&glue.display);

    Handlers {
        on_servo: Some(Box::new(move |cmd| {
            // Failures are counted by the bridge.
            let _ = servo.send_servo(cmd.x, cmd.y);
        })),
        on_display: Some(Box::new(move |cmd| {
            log_display(display.update(Some(&cmd.text), Some(&cmd.emoji), cmd.size));
        })),
        on_status: Some(Box::new(move |cmd| {
            let (state, message) = parse_status(&cmd.text);
            log_display(status_display.update(
                Some(message),
                Some(state_to_emoji(state).name()),
                0,
            ));
            if state == "idle" && status_player.playback_end() {
                info!("TTS ended by idle status");
            }
        })),
        on_capture: Some(Box::new(|cmd| {
            info!(quality = cmd.quality, "capture requested, no camera on this device");
        })),
        on_reboot: Some(Box::new(move || {
            warn!("reboot requested by server");
            reboot.request_reboot();
        })),
        on_asr_result: Some(Box::new(move |msg| {
            log_display(asr_display.show(&msg.text, Emoji::Analyzing));
        })),
        on_bot_reply: Some(Box::new(move |msg| {
            log_display(reply_display.show(&msg.text, Emoji::Speaking));
        })),
        on_tts_end: Some(Box::new(move || {
            end_player.playback_end();
            log_display(end_display.set_emoji(Emoji::Happy));
        })),
        on_error: Some(Box::new(move |notice| {
            warn!(code = notice.code, message = %notice.message, "server reported error");
            log_display(error_display.show(&notice.message, Emoji::Sad));
        })),
    }
}

fn log_display(result: Result<DisplayUpdate>) {
    if let Err(e) = result {
        warn!(error = %e, "display update failed");
    }
}
