//! Boot-loader menu handshake state machine.
//!
//! The standalone boot-loader has no framed protocol of its own. It presents
//! a menu meant for humans and takes single-character commands. The
//! handshake synchronizes on the menu prompt, sends one command, and for an
//! upload waits until the Xmodem receiver is started.
//!
//! ```text
//!   Idle ──provoke sent──> AwaitingPrompt ──prompt──> PromptSeen
//!                                                        │
//!          ┌──────────── run command sent ───────────────┤
//!          │                                             │ download command sent
//!          v                                             v
//!        Done <──────────── 'C' received ─────── AwaitingStart
//!          ^
//!          └── any timeout, budget exhausted or I/O error, from any state
//! ```

use super::events::*;
use super::states::*;
use super::window::SyncWindow;
use super::HandshakeError;

// =============================================================================
// Crate-Public Interface
// =============================================================================

/// Runs one handshake over `link` until it is done, and returns how it
/// ended.
pub(crate) fn run(goal: Goal, link: &mut Link<'_>) -> Outcome {
    let mut sm = HandshakeStates::Idle(HandshakeSM::new(goal));
    loop {
        sm = sm.step(link);
        if let HandshakeStates::Done(done) = &mut sm {
            if done.state.should_exit {
                return done
                    .state
                    .outcome
                    .take()
                    .unwrap_or(Outcome::Failed(HandshakeError::Incomplete));
            }
        }
    }
}

// =============================================================================
// Private stuff
// =============================================================================

/// The raw handshake state machine. The goal is shared by all the states;
/// the link is lent to each state while it runs.
#[derive(Debug)]
struct HandshakeSM<S: Runnable> {
    goal: Goal,
    state: S,
}
impl<S: Runnable> HandshakeSM<S> {
    fn run(&mut self, link: &mut Link<'_>) -> Event {
        self.state.run(self.goal, link)
    }
}

/// The state machine starts in the `IdleState`.
impl HandshakeSM<IdleState> {
    fn new(goal: Goal) -> Self {
        HandshakeSM {
            goal,
            state: IdleState {},
        }
    }
}

/// An enum wrapper around the states of the handshake state machine.
#[derive(Debug)]
enum HandshakeStates {
    Idle(HandshakeSM<IdleState>),
    AwaitingPrompt(HandshakeSM<AwaitingPromptState>),
    PromptSeen(HandshakeSM<PromptSeenState>),
    AwaitingStart(HandshakeSM<AwaitingStartState>),
    Done(HandshakeSM<DoneState>),
}
impl HandshakeStates {
    /// The unit of work in the state machine event loop: run the current
    /// state and turn the event it returns into the next state. Only the
    /// transitions listed here exist; any other pairing is a bug.
    fn step(&mut self, link: &mut Link<'_>) -> Self {
        match self {
            HandshakeStates::Idle(sm) => match sm.run(link) {
                Event::AwaitPrompt(ev) => HandshakeStates::AwaitingPrompt(ev.into()),
                Event::Done(ev) => HandshakeStates::Done(ev.into()),
                event => unreachable!("illegal event {:#?} at current state {:#?}", event, sm),
            },
            HandshakeStates::AwaitingPrompt(sm) => match sm.run(link) {
                Event::PromptSeen(ev) => HandshakeStates::PromptSeen(ev.into()),
                Event::Done(ev) => HandshakeStates::Done(ev.into()),
                event => unreachable!("illegal event {:#?} at current state {:#?}", event, sm),
            },
            HandshakeStates::PromptSeen(sm) => match sm.run(link) {
                Event::AwaitStart(ev) => HandshakeStates::AwaitingStart(ev.into()),
                Event::Done(ev) => HandshakeStates::Done(ev.into()),
                event => unreachable!("illegal event {:#?} at current state {:#?}", event, sm),
            },
            HandshakeStates::AwaitingStart(sm) => match sm.run(link) {
                Event::Done(ev) => HandshakeStates::Done(ev.into()),
                event => unreachable!("illegal event {:#?} at current state {:#?}", event, sm),
            },
            HandshakeStates::Done(sm) => match sm.run(link) {
                Event::Exit(ev) => HandshakeStates::Done(ev.into()),
                event => unreachable!("illegal event {:#?} at current state {:#?}", event, sm),
            },
        }
    }
}

// -----------------------------------------------------------------------------
// State from Event transitions
// -----------------------------------------------------------------------------

impl From<AwaitPromptEvent> for HandshakeSM<AwaitingPromptState> {
    fn from(event: AwaitPromptEvent) -> HandshakeSM<AwaitingPromptState> {
        HandshakeSM {
            goal: event.goal,
            state: AwaitingPromptState {
                window: SyncWindow::new(),
            },
        }
    }
}

impl From<PromptSeenEvent> for HandshakeSM<PromptSeenState> {
    fn from(event: PromptSeenEvent) -> HandshakeSM<PromptSeenState> {
        log::debug!("prompt seen after {} bytes", event.received);
        HandshakeSM {
            goal: event.goal,
            state: PromptSeenState {},
        }
    }
}

impl From<AwaitStartEvent> for HandshakeSM<AwaitingStartState> {
    fn from(event: AwaitStartEvent) -> HandshakeSM<AwaitingStartState> {
        HandshakeSM {
            goal: event.goal,
            state: AwaitingStartState {},
        }
    }
}

impl From<DoneEvent> for HandshakeSM<DoneState> {
    fn from(event: DoneEvent) -> HandshakeSM<DoneState> {
        HandshakeSM {
            goal: event.goal,
            state: DoneState {
                outcome: Some(event.outcome),
                should_exit: false,
            },
        }
    }
}
impl From<ExitEvent> for HandshakeSM<DoneState> {
    fn from(event: ExitEvent) -> HandshakeSM<DoneState> {
        HandshakeSM {
            goal: event.goal,
            state: DoneState {
                outcome: Some(event.outcome),
                should_exit: true,
            },
        }
    }
}
