//! Xmodem-CRC sender.
//!
//! The engine turns an arbitrarily chunked byte stream into 128-byte blocks
//! and pushes them one at a time to the receiver, waiting for each block to be
//! acknowledged before sending the next:
//!
//! ```text
//!  sender                                receiver
//!     <───────────────── 'C' ─────────────── (unless started immediately)
//!     ── SOH 01 FE <128 bytes> CRC ──────>
//!     <───────────────── ACK ───────────────
//!     ── SOH 02 FD <128 bytes> CRC ──────>
//!     <───────────────── NAK ───────────────
//!     ── SOH 02 FD <128 bytes> CRC ──────>   (same block again)
//!     <───────────────── ACK ───────────────
//!     ── EOT ────────────────────────────>
//!     <───────────────── ACK ───────────────
//! ```
//!
//! The block number is a single byte and wraps from 255 to 0, exactly like
//! the receivers in the field expect.

mod block;
mod crc;

use std::{
    io,
    sync::atomic::{AtomicBool, Ordering},
    time::{Duration, Instant},
};

use log::{debug, info, log_enabled, trace, warn, Level::Debug};
use thiserror::Error;

use crate::{settings::Settings, transport::Transport, utils::hex_view};
use block::BlockBuffer;

pub use block::frame_block;
pub use self::crc::crc16;

/// Start of a 128-byte block.
pub const SOH: u8 = 0x01;
/// End of transmission.
pub const EOT: u8 = 0x04;
pub const ACK: u8 = 0x06;
pub const NAK: u8 = 0x15;
/// Cancel, sent by the receiver to abort the transfer.
pub const CAN: u8 = 0x18;
/// Sent by the receiver to start a CRC mode transfer.
pub const START: u8 = b'C';
/// Payload size of a block.
pub const BLOCK_SIZE: usize = 128;
/// Size of a framed block on the wire.
pub const FRAME_LEN: usize = 3 + BLOCK_SIZE + 2;
/// Fill byte completing the last block.
pub const PAD: u8 = 0xFF;

// =============================================================================
// Public Interface
// =============================================================================

/// Where a session stands.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum SessionState {
    /// No transfer in progress. Nothing can be sent.
    Uninitialized,
    /// Waiting for the receiver's start character before the first block.
    AwaitingStart,
    Sending,
}

/// Everything that aborts a session. A rejected block is only an error once
/// it has been rejected on every allowed attempt.
#[derive(Error, Debug)]
pub enum XmodemError {
    #[error("serial link error: {0}")]
    Io(#[from] io::Error),
    #[error("no transfer session in progress")]
    NotInitialized,
    #[error("expected the start character, received {0:#04x}")]
    UnexpectedStart(u8),
    #[error("the receiver did not start within {0:?}")]
    StartTimeout(Duration),
    #[error("block {block} was not acknowledged after {attempts} attempts")]
    RetriesExhausted { block: u8, attempts: usize },
    #[error("the receiver cancelled the transfer")]
    CancelledByReceiver,
    #[error("the transfer was cancelled")]
    Cancelled,
}

/// Counters of a session, kept after it ends.
#[derive(Debug, Default, Copy, Clone, Eq, PartialEq)]
pub struct SessionStats {
    /// Blocks acknowledged by the receiver.
    pub blocks_acked: usize,
    /// Blocks sent again after a NAK, a timeout or an unexpected answer.
    pub retransmissions: usize,
    /// Whether the receiver acknowledged the end of transmission.
    pub eot_acknowledged: bool,
}

/// An Xmodem sender over a borrowed transport.
pub struct Xmodem<'a> {
    transport: &'a mut dyn Transport,
    settings: &'a Settings,
    state: SessionState,
    buffer: BlockBuffer,
    block_number: u8,
    stats: SessionStats,
    watchdog: Option<&'a mut dyn FnMut()>,
    cancel: Option<&'a AtomicBool>,
}
impl<'a> Xmodem<'a> {
    /// Create a sender. It starts `Uninitialized`: call
    /// [`init_session`](Self::init_session) before sending data.
    pub fn new(transport: &'a mut dyn Transport, settings: &'a Settings) -> Self {
        Xmodem {
            transport,
            settings,
            state: SessionState::Uninitialized,
            buffer: BlockBuffer::new(),
            block_number: 1,
            stats: SessionStats::default(),
            watchdog: None,
            cancel: None,
        }
    }

    /// Call `watchdog` before every block attempt.
    pub fn with_watchdog(mut self, watchdog: &'a mut dyn FnMut()) -> Self {
        self.watchdog = Some(watchdog);
        self
    }

    /// Abort between blocks once `cancel` is set.
    pub fn with_cancel(mut self, cancel: &'a AtomicBool) -> Self {
        self.cancel = Some(cancel);
        self
    }

    /// Start a new session. With `start_immediately`, the receiver is known
    /// to be ready (its start character was already consumed) and the first
    /// block goes out right away; otherwise the first call to
    /// [`send_data`](Self::send_data) waits for the start character.
    pub fn init_session(&mut self, start_immediately: bool) {
        self.state = if start_immediately {
            SessionState::Sending
        } else {
            SessionState::AwaitingStart
        };
        self.buffer.clear();
        self.block_number = 1;
        self.stats = SessionStats::default();
        debug!("xmodem session started in {:?}", self.state);
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn stats(&self) -> SessionStats {
        self.stats
    }

    /// Number of the next block to be sent.
    pub fn block_number(&self) -> u8 {
        self.block_number
    }

    /// Queue `data` for sending, transmitting every block that gets full.
    ///
    /// With `is_final`, the last partial block is padded and sent, then the
    /// end of transmission is signalled and the session ends. A missing
    /// acknowledgement of the end of transmission is only reported in the
    /// [`stats`](Self::stats) since all the data went through.
    ///
    /// Any error ends the session. Blocks acknowledged before the error stay
    /// written on the device.
    pub fn send_data(&mut self, data: &[u8], is_final: bool) -> Result<(), XmodemError> {
        let result = self.send_data_inner(data, is_final);
        if result.is_err() || is_final {
            self.state = SessionState::Uninitialized;
        }
        result
    }

    fn send_data_inner(&mut self, data: &[u8], is_final: bool) -> Result<(), XmodemError> {
        match self.state {
            SessionState::Uninitialized => return Err(XmodemError::NotInitialized),
            SessionState::AwaitingStart => {
                self.wait_for_start()?;
                self.state = SessionState::Sending;
            }
            SessionState::Sending => {}
        }

        let mut rest = data;
        loop {
            self.check_cancelled()?;
            let taken = self.buffer.fill(rest);
            rest = &rest[taken..];
            if self.buffer.is_full() {
                self.send_block()?;
            }
            if rest.is_empty() {
                break;
            }
        }

        if is_final {
            if !self.buffer.is_empty() {
                self.check_cancelled()?;
                trace!("padding last block after {} bytes", self.buffer.len());
                self.buffer.pad(PAD);
                self.send_block()?;
            }
            self.end_transmission()?;
        }
        Ok(())
    }

    fn wait_for_start(&mut self) -> Result<(), XmodemError> {
        let timeout = self.settings.start_timeout;
        match self.transport.recv_timeout(timeout)? {
            Some(START) => {
                debug!("receiver started");
                Ok(())
            }
            Some(byte) => Err(XmodemError::UnexpectedStart(byte)),
            None => Err(XmodemError::StartTimeout(timeout)),
        }
    }

    fn check_cancelled(&self) -> Result<(), XmodemError> {
        match self.cancel {
            Some(flag) if flag.load(Ordering::SeqCst) => {
                info!("transfer cancelled before block {}", self.block_number);
                Err(XmodemError::Cancelled)
            }
            _ => Ok(()),
        }
    }

    /// Send the full buffer as the current block until it is acknowledged or
    /// the attempts run out. A block is never interrupted once started.
    fn send_block(&mut self) -> Result<(), XmodemError> {
        let number = self.block_number;
        let frame = frame_block(number, self.buffer.data());
        if log_enabled!(Debug) {
            debug!("block {}:\n{}", number, hex_view(&frame));
        }

        let attempts = self.settings.max_attempts;
        for attempt in 1..=attempts {
            if let Some(watchdog) = self.watchdog.as_mut() {
                watchdog();
            }
            trace!("block {} attempt {}/{}", number, attempt, attempts);
            self.transport.send(&frame)?;

            match self.await_response()? {
                Some(ACK) => {
                    self.stats.blocks_acked += 1;
                    self.block_number = number.wrapping_add(1);
                    self.buffer.clear();
                    return Ok(());
                }
                Some(CAN) => return Err(XmodemError::CancelledByReceiver),
                Some(NAK) => debug!("block {} rejected", number),
                Some(other) => debug!("block {} answered with {:#04x}", number, other),
                None => debug!("block {} not answered", number),
            }
            if attempt < attempts {
                self.stats.retransmissions += 1;
            }
        }

        Err(XmodemError::RetriesExhausted {
            block: number,
            attempts,
        })
    }

    fn end_transmission(&mut self) -> Result<(), XmodemError> {
        if let Some(watchdog) = self.watchdog.as_mut() {
            watchdog();
        }
        self.transport.send(&[EOT])?;
        match self.await_response()? {
            Some(ACK) => {
                self.stats.eot_acknowledged = true;
                info!(
                    "transfer complete, {} blocks, {} retransmissions",
                    self.stats.blocks_acked, self.stats.retransmissions
                );
            }
            answer => warn!("end of transmission not acknowledged ({:?})", answer),
        }
        Ok(())
    }

    /// Read the receiver's answer to a block, skipping the start characters
    /// left over from the start of the transfer. `None` when nothing else
    /// came within the block timeout.
    fn await_response(&mut self) -> io::Result<Option<u8>> {
        let deadline = Instant::now() + self.settings.block_timeout;
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            match self.transport.recv_timeout(remaining)? {
                Some(START) if !remaining.is_zero() => trace!("skipping start character"),
                answer => return Ok(answer),
            }
        }
    }
}

// =============================================================================
// Unit Tests
// =============================================================================
