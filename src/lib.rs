//! Ncpboot reflashes a network co-processor (NCP) attached to a host over a
//! serial link. It extracts the boot-loader image from an OTA container
//! file, brings the NCP standalone boot-loader to its upload command, pushes
//! the image with Xmodem-CRC and finally tells the device to run it.
//!
//! A firmware update is an irreversible, retry-sensitive exchange: a framing
//! or timing mistake can leave the device without a bootable application.
//! The crate is therefore split into small, independently testable pieces:
//!
//! * [`ota`] finds the byte range of a tagged sub-image in a container,
//! * [`bootloader`] synchronizes with the boot-loader menu, arms an upload
//!   and later runs the new image,
//! * [`xmodem`] frames the image into 128-byte blocks and drives the
//!   ACK/NAK/retry protocol,
//! * [`transfer`] composes them into one update and reports progress.
//!
//! Everything talks to the device through the [`Transport`] trait, which is
//! implemented for [`serialport`] ports and can be scripted in tests. A
//! transfer is synchronous and owns the transport for its whole duration;
//! there is no global state, so several devices can be flashed from separate
//! threads.
//!
//! The boot-loader handshake is implemented as a state machine with the
//! following characteristics:
//!
//! * Can only be in one state at any time.
//! * Each state can have its own associated data if needed.
//! * Transitions between states are triggered via typed **events** and
//!   follow defined semantics.
//! * Only explicitly defined transitions are permitted, as implementations of
//!   the `From` trait converting an event into the next state. Any other
//!   transition is detected at compile time.
//! * Transitioning from one state to another consumes the original state.
//!   Data is carried to the next state by attaching it to the event.

pub mod bootloader;
pub mod ota;
mod settings;
pub mod transfer;
mod transport;
mod utils;
pub mod xmodem;

pub use settings::{Settings, SettingsBuilder};
pub use transfer::{Phase, RebootStatus, Transfer, TransferError, TransferReport};
pub use transport::Transport;
pub use utils::{available_ports, open_and_setup_port};
