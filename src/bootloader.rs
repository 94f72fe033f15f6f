//! Handshake with the NCP standalone boot-loader menu.
//!
//! **Example** - Arming the boot-loader for an upload, then running the new
//! image:
//! ```ignore
//! let settings = SettingsBuilder::new().finalize();
//! let mut handshake = Handshake::new(&mut port, &settings);
//! handshake.begin()?;
//! // ... Xmodem transfer ...
//! handshake.reboot_device()?;
//! ```

mod events;
mod state_machine;
mod states;
mod window;

use std::{io, sync::atomic::AtomicBool};

use thiserror::Error;

use crate::{settings::Settings, transport::Transport};
use events::{Goal, Outcome};
use states::Link;

pub use window::WINDOW_CAPACITY;

// =============================================================================
// Public Interface
// =============================================================================

/// Reasons for a handshake to fail. None of them is retried: the device is
/// not where the handshake expects it to be, and it may need a power cycle.
#[derive(Error, Debug)]
pub enum HandshakeError {
    #[error("serial link error: {0}")]
    Io(#[from] io::Error),
    #[error("timed out waiting for the {waiting_for} after {received} bytes")]
    Timeout {
        waiting_for: &'static str,
        received: usize,
    },
    #[error("no menu prompt in the first {0} bytes")]
    PromptNotSeen(usize),
    #[error("no transfer start character in the first {0} bytes")]
    StartNotSeen(usize),
    #[error("the handshake was cancelled")]
    Cancelled,
    #[error("handshake ended without an outcome")]
    Incomplete,
}

/// Drives the boot-loader menu over a borrowed transport.
pub struct Handshake<'a> {
    transport: &'a mut dyn Transport,
    settings: &'a Settings,
    cancel: Option<&'a AtomicBool>,
}
impl<'a> Handshake<'a> {
    pub fn new(transport: &'a mut dyn Transport, settings: &'a Settings) -> Self {
        Handshake {
            transport,
            settings,
            cancel: None,
        }
    }

    /// Give up before the next byte is sent or awaited once `cancel` is set.
    pub fn with_cancel(mut self, cancel: &'a AtomicBool) -> Self {
        self.cancel = Some(cancel);
        self
    }

    /// Bring the boot-loader to its menu, select the upload command and wait
    /// until its Xmodem receiver has started. On success the start character
    /// has been consumed and the first block can be sent right away.
    pub fn begin(&mut self) -> Result<(), HandshakeError> {
        match self.run(Goal::Download) {
            Outcome::Armed => Ok(()),
            Outcome::Failed(error) => Err(error),
            Outcome::RunCommandSent => Err(HandshakeError::Incomplete),
        }
    }

    /// Bring the boot-loader back to its menu and tell it to run the
    /// application image. The device is considered rebooted as soon as the
    /// command is written.
    pub fn reboot_device(&mut self) -> Result<(), HandshakeError> {
        match self.run(Goal::Run) {
            Outcome::RunCommandSent => Ok(()),
            Outcome::Failed(error) => Err(error),
            Outcome::Armed => Err(HandshakeError::Incomplete),
        }
    }

    fn run(&mut self, goal: Goal) -> Outcome {
        let mut link = Link {
            transport: &mut *self.transport,
            settings: self.settings,
            cancel: self.cancel,
        };
        state_machine::run(goal, &mut link)
    }
}

// =============================================================================
// Unit Tests
// =============================================================================
