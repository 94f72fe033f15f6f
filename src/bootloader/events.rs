//! Events for the boot-loader menu handshake state machine.
//!
//! This modules is private and restricted to the
//! [`bootloader`](crate::bootloader) scope. The public interface of the
//! handshake is provided by [`bootloader`](crate::bootloader).
//!
//! ```ignore
//! use super::events::*;
//! ```
//!
//! Refer to the [`state_machine`](super::state_machine) module for an overview
//! of states, events and transitions.

use super::HandshakeError;

// =============================================================================
// Crate-Public Interface
// =============================================================================

/// What the handshake is for. Both goals go through the menu prompt; they
/// differ in the command sent once the prompt is seen.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub(crate) enum Goal {
    /// Arm the boot-loader for an Xmodem upload.
    Download,
    /// Leave the boot-loader and run the application image.
    Run,
}

/// How a handshake ended.
#[derive(Debug)]
pub(crate) enum Outcome {
    /// The boot-loader sent the Xmodem start character and is waiting for the
    /// first block.
    Armed,
    /// The run command was written to the boot-loader.
    RunCommandSent,
    Failed(HandshakeError),
}

// AwaitPromptEvent ============================================================

/// Event fired to trigger a transition to [`AwaitingPromptState`].
///
/// This event happens while at the [`IdleState`] after the byte provoking the
/// boot-loader into printing its menu has been sent.
///
/// [`AwaitingPromptState`]: super::states::AwaitingPromptState
/// [`IdleState`]: super::states::IdleState
#[derive(Debug)]
pub(crate) struct AwaitPromptEvent {
    pub goal: Goal,
}

// PromptSeenEvent =============================================================

/// Event fired to trigger a transition to [`PromptSeenState`], once the tail
/// of the received bytes matches the menu prompt.
///
/// [`PromptSeenState`]: super::states::PromptSeenState
#[derive(Debug)]
pub(crate) struct PromptSeenEvent {
    pub goal: Goal,
    /// Number of bytes received before the prompt was complete.
    pub received: usize,
}

// AwaitStartEvent =============================================================

/// Event fired to trigger a transition to [`AwaitingStartState`], after the
/// download command has been sent.
///
/// [`AwaitingStartState`]: super::states::AwaitingStartState
#[derive(Debug)]
pub(crate) struct AwaitStartEvent {
    pub goal: Goal,
}

// DoneEvent ===================================================================

/// Event fired when the handshake completes, successfully or not. It
/// triggers a transition to the `Done` state.
///
/// Any timeout or I/O error in any state ends the handshake immediately.
/// Nothing is retried: the device is not in a state the handshake
/// understands and more bytes could be taken as menu commands.
#[derive(Debug)]
pub(crate) struct DoneEvent {
    pub goal: Goal,
    pub outcome: Outcome,
}

// ExitEvent ===================================================================

/// The last event of the handshake state machine, terminating its event loop
/// and handing the outcome back to the caller.
#[derive(Debug)]
pub(crate) struct ExitEvent {
    pub goal: Goal,
    pub outcome: Outcome,
}

// Events enum =================================================================

/// Events that can be triggered within the handshake state machine.
#[derive(Debug)]
pub(crate) enum Event {
    AwaitPrompt(AwaitPromptEvent),
    PromptSeen(PromptSeenEvent),
    AwaitStart(AwaitStartEvent),
    Done(DoneEvent),
    Exit(ExitEvent),
}
impl Event {
    /// Shorthand for a failed [`DoneEvent`].
    pub(crate) fn failed(goal: Goal, error: HandshakeError) -> Self {
        Event::Done(DoneEvent {
            goal,
            outcome: Outcome::Failed(error),
        })
    }
}
