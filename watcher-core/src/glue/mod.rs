//! Application glue: the side-effecting collaborators behind router handlers.
//!
//! | module | collaborator |
//! |--------|--------------|
//! | [`display`] | screen text + expression |
//! | [`servo`] | serial link to the pan/tilt controller |
//! | [`button`] | push-to-talk debounce |
//! | [`handlers`] | builds the router's handler table from the above |

pub mod button;
pub mod display;
pub mod handlers;
pub mod servo;

pub use button::Debouncer;
pub use display::{DisplayController, DisplayPanel, Emoji};
pub use handlers::{build_handlers, DeviceGlue};
pub use servo::{format_servo_command, SerialLink, ServoBridge};

/// Restart request raised by a `reboot` command.
///
/// On the desktop this rebuilds the engine session rather than the process.
pub trait RebootHandle: Send + Sync + 'static {
    fn request_reboot(&self);
}
