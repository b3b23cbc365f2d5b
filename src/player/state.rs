//! Command validation against the player state
//!
//! Every command is checked twice: once when it is submitted, which only
//! turns away commands that arrive while a transition is in flight, and
//! once by the executor right before it runs, against the full table.

use crate::player::{Command, PlaybackStatus, PlayerState};
use crate::utils::error::{CCPlayerError, Result};

/// Outcome of validating a command
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Transition {
    /// Run the command
    Apply,

    /// Succeed without touching anything
    NoOp,
}

fn reject(command: &Command, state: &PlayerState) -> CCPlayerError {
    CCPlayerError::InvalidTransition {
        command: command.name(),
        state: state.to_string(),
    }
}

/// Submission-time check
///
/// Release is always admitted.
pub(crate) fn admit(command: &Command, state: &PlayerState) -> Result<()> {
    if matches!(command, Command::Release) {
        return Ok(());
    }

    match state {
        PlayerState::Preparing => Err(reject(command, state)),
        PlayerState::Ready { status, .. } if status.is_busy() => Err(CCPlayerError::Busy {
            command: command.name(),
        }),
        _ => Ok(()),
    }
}

/// Execution-time check
pub(crate) fn validate(command: &Command, state: &PlayerState) -> Result<Transition> {
    use PlaybackStatus::*;

    let (media, status) = match state {
        PlayerState::Empty => {
            return match command {
                Command::Prepare(_) => Ok(Transition::Apply),
                Command::Release => Ok(Transition::NoOp),
                _ => Err(reject(command, state)),
            }
        }
        PlayerState::Preparing => {
            return match command {
                Command::Release => Ok(Transition::Apply),
                _ => Err(reject(command, state)),
            }
        }
        PlayerState::Ready { media, status } => (media, *status),
    };

    if matches!(command, Command::Release) {
        return Ok(Transition::Apply);
    }
    if status.is_busy() {
        return Err(CCPlayerError::Busy {
            command: command.name(),
        });
    }

    // Still images have nothing to play.
    if matches!(command, Command::Play | Command::Pause | Command::Resume)
        && !media.is_continuous()
    {
        return Ok(Transition::NoOp);
    }

    let transition = match (command, status) {
        (Command::Prepare(_), _) => return Err(reject(command, state)),

        (Command::Play, Playing) => Transition::NoOp,
        (Command::Play, Stopped | Paused | Completed) => Transition::Apply,

        (Command::Pause, Playing) => Transition::Apply,
        (Command::Pause, Paused) => Transition::NoOp,

        (Command::Resume, Paused) => Transition::Apply,

        (Command::Stop, Stopped) => Transition::NoOp,
        (Command::Stop, Playing | Paused | Completed) => Transition::Apply,

        (Command::SeekTo(_), Playing | Paused | Stopped | Completed) => Transition::Apply,

        _ => return Err(reject(command, state)),
    };

    Ok(transition)
}
