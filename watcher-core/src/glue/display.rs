//! Screen state: current text and expression, rendered through a panel.

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::Result;

/// Font size used when a command asks for size 0.
pub const DEFAULT_FONT_SIZE: u32 = 24;
/// Characters of text kept as the current display text.
pub const MAX_TEXT_CHARS: usize = 127;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Emoji {
    #[default]
    Normal,
    Happy,
    Sad,
    Surprised,
    Angry,
    Thinking,
    Analyzing,
    Speaking,
    Standby,
}

impl Emoji {
    /// Case-insensitive name lookup; unrecognized names fall back to `Normal`.
    pub fn from_name(name: &str) -> Self {
        const ALL: [Emoji; 9] = [
            Emoji::Normal,
            Emoji::Happy,
            Emoji::Sad,
            Emoji::Surprised,
            Emoji::Angry,
            Emoji::Thinking,
            Emoji::Analyzing,
            Emoji::Speaking,
            Emoji::Standby,
        ];
        ALL.into_iter()
            .find(|e| e.name().eq_ignore_ascii_case(name))
            .unwrap_or_default()
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::Normal => "normal",
            Self::Happy => "happy",
            Self::Sad => "sad",
            Self::Surprised => "surprised",
            Self::Angry => "angry",
            Self::Thinking => "thinking",
            Self::Analyzing => "analyzing",
            Self::Speaking => "speaking",
            Self::Standby => "standby",
        }
    }
}

/// Expression shown for a status state word.
pub fn state_to_emoji(state: &str) -> Emoji {
    match state {
        "thinking" => Emoji::Analyzing,
        "speaking" => Emoji::Speaking,
        "error" => Emoji::Sad,
        _ => Emoji::Standby,
    }
}

/// Split `"[state] message"` into its parts. Text without a bracketed
/// prefix has an empty state.
pub fn parse_status(text: &str) -> (&str, &str) {
    let trimmed = text.trim_start();
    if let Some(rest) = trimmed.strip_prefix('[') {
        if let Some(end) = rest.find(']') {
            return (rest[..end].trim(), rest[end + 1..].trim_start());
        }
    }
    ("", text)
}

/// Rendering backend (LCD, terminal, UI bridge).
pub trait DisplayPanel: Send + 'static {
    fn show_text(&mut self, text: &str, font_size: u32) -> Result<()>;
    fn show_emoji(&mut self, emoji: Emoji) -> Result<()>;
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct DisplayState {
    pub text: String,
    pub emoji: Emoji,
}

/// Which parts of the screen an update changed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DisplayUpdate {
    pub text_updated: bool,
    pub emoji_updated: bool,
}

pub struct DisplayController {
    panel: Mutex<Box<dyn DisplayPanel>>,
    state: Mutex<DisplayState>,
}

impl DisplayController {
    pub fn new(panel: Box<dyn DisplayPanel>) -> Self {
        Self {
            panel: Mutex::new(panel),
            state: Mutex::new(DisplayState::default()),
        }
    }

    /// Update text and/or expression. `size <= 0` selects the default font.
    ///
    /// # Errors
    /// Panel failures; state is only recorded for parts that rendered.
    pub fn update(
        &self,
        text: Option<&str>,
        emoji: Option<&str>,
        size: i32,
    ) -> Result<DisplayUpdate> {
        let mut result = DisplayUpdate::default();
        let mut panel = self.panel.lock();

        if let Some(text) = text {
            let font_size = u32::try_from(size)
                .ok()
                .filter(|s| *s > 0)
                .unwrap_or(DEFAULT_FONT_SIZE);
            panel.show_text(text, font_size)?;
            self.state.lock().text = text.chars().take(MAX_TEXT_CHARS).collect();
            result.text_updated = true;
        }

        if let Some(name) = emoji {
            let emoji = Emoji::from_name(name);
            panel.show_emoji(emoji)?;
            self.state.lock().emoji = emoji;
            result.emoji_updated = true;
        }

        debug!(?result, "display updated");
        Ok(result)
    }

    /// Show text and an expression together at the default font size.
    pub fn show(&self, text: &str, emoji: Emoji) -> Result<DisplayUpdate> {
        self.update(Some(text), Some(emoji.name()), 0)
    }

    pub fn set_emoji(&self, emoji: Emoji) -> Result<DisplayUpdate> {
        self.update(None, Some(emoji.name()), 0)
    }

    pub fn current(&self) -> DisplayState {
        self.state.lock().clone()
    }
}
