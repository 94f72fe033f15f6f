//! States for the boot-loader menu handshake state machine.
//!
//! This modules is private and restricted to the
//! [`bootloader`](crate::bootloader) scope. The public interface of the
//! handshake is provided by [`bootloader`](crate::bootloader).
//!
//! ```ignore
//! use super::states::*;
//! ```
//!
//! Refer to the [`state_machine`](super::state_machine) module for an overview
//! of states, events and transitions.

use std::sync::atomic::{AtomicBool, Ordering};

use log::{debug, info, trace};

use super::events::*;
use super::window::SyncWindow;
use super::HandshakeError;
use crate::{settings::Settings, transport::Transport, xmodem::START};

// =============================================================================
// Crate-Public Interface
// =============================================================================

/// What every state gets to work with: the link to the device, the settings
/// and the optional cancellation flag. Borrowed for the whole handshake.
pub(crate) struct Link<'a> {
    pub transport: &'a mut dyn Transport,
    pub settings: &'a Settings,
    pub cancel: Option<&'a AtomicBool>,
}
impl Link<'_> {
    fn cancelled(&self) -> bool {
        self.cancel.map_or(false, |flag| flag.load(Ordering::SeqCst))
    }
}

/// Trait adding the ability for a state to be `run` after a transition into it.
pub(crate) trait Runnable {
    /// A state implements this method so it can be `run` after the state
    /// machine transitions into it.
    ///
    /// During this call, the state does its work over the `link` and, when
    /// finished, requests a transition to a `new state` by returning the
    /// appropriate `event`. The event is consumed to create the new state
    /// using the corresponding [`From`] trait implementation.
    fn run(&mut self, goal: Goal, link: &mut Link<'_>) -> Event;
}

// Idle State ==================================================================

/// The initial state of the handshake.
///
/// The boot-loader may have printed its menu long ago, or be half way
/// through printing it. Sending the provoke byte makes it print the prompt
/// again so there is something fresh to synchronize on.
///
///  * **[`AwaitPromptEvent`] => [`AwaitingPromptState`]** once the provoke
///    byte is out,
///  * **[`DoneEvent`] => [`DoneState`]** if it could not be sent, or the
///    handshake was cancelled.
#[derive(Debug)]
pub(crate) struct IdleState {}
impl Runnable for IdleState {
    fn run(&mut self, goal: Goal, link: &mut Link<'_>) -> Event {
        info!("=> Idle ({:?})", goal);
        if link.cancelled() {
            return Event::failed(goal, HandshakeError::Cancelled);
        }
        match link.transport.send(&[link.settings.provoke_byte]) {
            Ok(()) => Event::AwaitPrompt(AwaitPromptEvent { goal }),
            Err(e) => Event::failed(goal, e.into()),
        }
    }
}

// AwaitingPrompt State ========================================================

/// Reads the boot-loader output byte by byte into a [`SyncWindow`] until its
/// tail matches the menu prompt.
///
/// Gives up when the prompt byte budget is exhausted, or when any single byte
/// takes longer than the handshake byte timeout to arrive.
///
///  * **[`PromptSeenEvent`] => [`PromptSeenState`]** on a match,
///  * **[`DoneEvent`] => [`DoneState`]** otherwise.
#[derive(Debug)]
pub(crate) struct AwaitingPromptState {
    pub window: SyncWindow,
}
impl Runnable for AwaitingPromptState {
    fn run(&mut self, goal: Goal, link: &mut Link<'_>) -> Event {
        info!("=> Awaiting Prompt");
        let settings = link.settings;

        for received in 1..=settings.prompt_byte_budget {
            if link.cancelled() {
                return Event::failed(goal, HandshakeError::Cancelled);
            }
            match link.transport.recv_timeout(settings.handshake_byte_timeout) {
                Ok(Some(byte)) => {
                    trace!("menu <- {:#04x} {:?}", byte, byte as char);
                    self.window.push(byte);
                    if self.window.ends_with(&settings.prompt) {
                        return Event::PromptSeen(PromptSeenEvent { goal, received });
                    }
                }
                Ok(None) => {
                    return Event::failed(
                        goal,
                        HandshakeError::Timeout {
                            waiting_for: "menu prompt",
                            received: received - 1,
                        },
                    )
                }
                Err(e) => return Event::failed(goal, e.into()),
            }
        }

        Event::failed(
            goal,
            HandshakeError::PromptNotSeen(settings.prompt_byte_budget),
        )
    }
}

// PromptSeen State ============================================================

/// The boot-loader is sitting at its menu. Sends the one command byte
/// matching the handshake goal.
///
///  * **[`AwaitStartEvent`] => [`AwaitingStartState`]** after the download
///    command,
///  * **[`DoneEvent`] => [`DoneState`]** after the run command, which needs
///    no confirmation, or when the command could not be sent or the
///    handshake was cancelled.
#[derive(Debug)]
pub(crate) struct PromptSeenState {}
impl Runnable for PromptSeenState {
    fn run(&mut self, goal: Goal, link: &mut Link<'_>) -> Event {
        info!("=> Prompt Seen");
        let command = match goal {
            Goal::Download => link.settings.download_command,
            Goal::Run => link.settings.run_command,
        };
        if link.cancelled() {
            return Event::failed(goal, HandshakeError::Cancelled);
        }
        debug!("menu -> {:?}", command as char);

        if let Err(e) = link.transport.send(&[command]) {
            return Event::failed(goal, e.into());
        }
        match goal {
            Goal::Download => Event::AwaitStart(AwaitStartEvent { goal }),
            Goal::Run => Event::Done(DoneEvent {
                goal,
                outcome: Outcome::RunCommandSent,
            }),
        }
    }
}

// AwaitingStart State =========================================================

/// Waits for the Xmodem start character the boot-loader emits once it is
/// ready to receive. Whatever it prints before that (the command echo, a
/// banner) is skipped, within the start byte budget.
///
///  * **[`DoneEvent`] => [`DoneState`]** in all cases, armed or failed.
#[derive(Debug)]
pub(crate) struct AwaitingStartState {}
impl Runnable for AwaitingStartState {
    fn run(&mut self, goal: Goal, link: &mut Link<'_>) -> Event {
        info!("=> Awaiting Xmodem Start");
        let settings = link.settings;

        for received in 1..=settings.start_byte_budget {
            if link.cancelled() {
                return Event::failed(goal, HandshakeError::Cancelled);
            }
            match link.transport.recv_timeout(settings.start_timeout) {
                Ok(Some(START)) => {
                    return Event::Done(DoneEvent {
                        goal,
                        outcome: Outcome::Armed,
                    })
                }
                Ok(Some(byte)) => trace!("skipping {:#04x} {:?}", byte, byte as char),
                Ok(None) => {
                    return Event::failed(
                        goal,
                        HandshakeError::Timeout {
                            waiting_for: "transfer start character",
                            received: received - 1,
                        },
                    )
                }
                Err(e) => return Event::failed(goal, e.into()),
            }
        }

        Event::failed(goal, HandshakeError::StartNotSeen(settings.start_byte_budget))
    }
}

// Done State ==================================================================

/// Reached when the handshake completes (normally or abnormally).
///
/// This state goes into a 2-phase execution: it first runs like any other state to report the
/// outcome, then triggers the [`ExitEvent`] to terminate the event loop.
#[derive(Debug)]
pub(crate) struct DoneState {
    /// Taken by the state machine when it exits.
    pub outcome: Option<Outcome>,
    /// When `true` instructs the state machine to exit its event loop.
    pub should_exit: bool,
}
impl Runnable for DoneState {
    fn run(&mut self, goal: Goal, _link: &mut Link<'_>) -> Event {
        let outcome = self
            .outcome
            .take()
            .unwrap_or(Outcome::Failed(HandshakeError::Incomplete));
        match &outcome {
            Outcome::Failed(error) => info!("=> Done ({:?}) with errors: {}", goal, error),
            _ => info!("=> Done ({:?}) with no errors", goal),
        }
        Event::Exit(ExitEvent { goal, outcome })
    }
}
