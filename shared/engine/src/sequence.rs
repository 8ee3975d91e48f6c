//! Scripted "sequenced deployment" command list.
//!
//! Instructions have the form `<delaySeconds>:<command>[:args]`. The whole
//! list is parsed up front into [`DeployCommand`] values so that a malformed
//! instruction aborts the match before anything runs, instead of mid-script.

use thiserror::Error;

#[derive(Clone, Debug, PartialEq)]
pub enum DeployCommand {
    /// Fire the next non-empty stage.
    Stage,
    /// Toggle an action group, or set it when a state is given.
    ActionGroup { group: u8, state: Option<bool> },
    /// Toggle the autopilots, or set them when a state is given.
    TogglePilot { enabled: Option<bool> },
    /// Toggle guard mode, or set it when a state is given.
    ToggleGuard { enabled: Option<bool> },
    /// Throttle in percent.
    SetThrottle { percent: f64 },
    RemoveDebris,
    RemoveFairings,
    /// Arm the periodic GM intervention.
    EnableGm,
    ActivateEngines,
    /// Trim vessel masses for parity.
    MassTrim,
    ScaleGravity { scale: f64 },
}

impl std::fmt::Display for DeployCommand {
    /// Canonical instruction form, shown in the status feed as each step
    /// runs.
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            DeployCommand::Stage => write!(f, "Stage"),
            DeployCommand::ActionGroup { group, state: None } => write!(f, "ActionGroup:{group}"),
            DeployCommand::ActionGroup {
                group,
                state: Some(state),
            } => write!(f, "ActionGroup:{group}:{}", *state as u8),
            DeployCommand::TogglePilot { enabled: None } => write!(f, "TogglePilot"),
            DeployCommand::TogglePilot {
                enabled: Some(enabled),
            } => write!(f, "TogglePilot:{}", *enabled as u8),
            DeployCommand::ToggleGuard { enabled: None } => write!(f, "ToggleGuard"),
            DeployCommand::ToggleGuard {
                enabled: Some(enabled),
            } => write!(f, "ToggleGuard:{}", *enabled as u8),
            DeployCommand::SetThrottle { percent } => write!(f, "SetThrottle:{percent}"),
            DeployCommand::RemoveDebris => write!(f, "RemoveDebris"),
            DeployCommand::RemoveFairings => write!(f, "RemoveFairings"),
            DeployCommand::EnableGm => write!(f, "EnableGM"),
            DeployCommand::ActivateEngines => write!(f, "ActivateEngines"),
            DeployCommand::MassTrim => write!(f, "MassTrim"),
            DeployCommand::ScaleGravity { scale } => write!(f, "HackGravity:{scale}"),
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct DeployStep {
    /// Seconds to wait after the previous step completes.
    pub delay: f64,
    pub command: DeployCommand,
}

#[derive(Debug, Error, PartialEq)]
pub enum SequenceError {
    #[error("instruction not parsed correctly: {0:?}")]
    Malformed(String),
    #[error("unknown command in instruction {0:?}")]
    UnknownCommand(String),
    #[error("bad argument in instruction {0:?}: {1}")]
    BadArgument(String, String),
}

fn parse_state(instruction: &str, arg: &str) -> Result<bool, SequenceError> {
    match arg {
        "0" => Ok(false),
        _ if arg.parse::<i32>().is_ok() => Ok(true),
        _ => Err(SequenceError::BadArgument(
            instruction.to_string(),
            format!("expected a numeric state, got {arg:?}"),
        )),
    }
}

fn parse_number<T: std::str::FromStr>(instruction: &str, arg: &str) -> Result<T, SequenceError> {
    arg.parse().map_err(|_| {
        SequenceError::BadArgument(instruction.to_string(), format!("bad number {arg:?}"))
    })
}

pub fn parse_step(instruction: &str) -> Result<DeployStep, SequenceError> {
    let parts: Vec<&str> = instruction.split(':').collect();
    if parts.len() < 2 {
        return Err(SequenceError::Malformed(instruction.to_string()));
    }
    let delay: f64 = parse_number(instruction, parts[0])?;
    let args = &parts[2..];
    let arity = |min: usize, max: usize| -> Result<(), SequenceError> {
        if args.len() < min || args.len() > max {
            Err(SequenceError::Malformed(instruction.to_string()))
        } else {
            Ok(())
        }
    };
    let command = match parts[1] {
        "Stage" => {
            arity(0, 0)?;
            DeployCommand::Stage
        }
        "ActionGroup" => {
            arity(1, 2)?;
            let group = parse_number(instruction, args[0])?;
            let state = match args.get(1) {
                Some(arg) => Some(parse_state(instruction, arg)?),
                None => None,
            };
            DeployCommand::ActionGroup { group, state }
        }
        "TogglePilot" => {
            arity(0, 1)?;
            let enabled = match args.first() {
                Some(arg) => Some(parse_state(instruction, arg)?),
                None => None,
            };
            DeployCommand::TogglePilot { enabled }
        }
        "ToggleGuard" => {
            arity(0, 1)?;
            let enabled = match args.first() {
                Some(arg) => Some(parse_state(instruction, arg)?),
                None => None,
            };
            DeployCommand::ToggleGuard { enabled }
        }
        "SetThrottle" => {
            arity(1, 1)?;
            DeployCommand::SetThrottle {
                percent: parse_number(instruction, args[0])?,
            }
        }
        "RemoveDebris" => {
            arity(0, 0)?;
            DeployCommand::RemoveDebris
        }
        "RemoveFairings" => {
            arity(0, 0)?;
            DeployCommand::RemoveFairings
        }
        "EnableGM" => {
            arity(0, 0)?;
            DeployCommand::EnableGm
        }
        "ActivateEngines" => {
            arity(0, 0)?;
            DeployCommand::ActivateEngines
        }
        "MassTrim" => {
            arity(0, 0)?;
            DeployCommand::MassTrim
        }
        "HackGravity" => {
            arity(1, 1)?;
            DeployCommand::ScaleGravity {
                scale: parse_number(instruction, args[0])?,
            }
        }
        _ => return Err(SequenceError::UnknownCommand(instruction.to_string())),
    };
    Ok(DeployStep { delay, command })
}

pub fn parse_sequence<S: AsRef<str>>(instructions: &[S]) -> Result<Vec<DeployStep>, SequenceError> {
    instructions.iter().map(|s| parse_step(s.as_ref())).collect()
}

/// Walks a parsed sequence, yielding each command once its cumulative delay
/// has elapsed. Polled once per engine tick.
#[derive(Debug)]
pub struct SequenceRunner {
    steps: Vec<DeployStep>,
    next_index: usize,
    next_step_time: f64,
}

impl SequenceRunner {
    pub fn new(steps: Vec<DeployStep>, now: f64) -> Self {
        let first_delay = steps.first().map(|s| s.delay).unwrap_or(0.0);
        SequenceRunner {
            steps,
            next_index: 0,
            next_step_time: now + first_delay,
        }
    }

    pub fn finished(&self) -> bool {
        self.next_index >= self.steps.len()
    }

    /// The next command due at `now`, if any. Steps whose delays have all
    /// elapsed are returned one per call, in order.
    pub fn poll(&mut self, now: f64) -> Option<DeployCommand> {
        if self.finished() || now < self.next_step_time {
            return None;
        }
        let command = self.steps[self.next_index].command.clone();
        self.next_index += 1;
        if let Some(step) = self.steps.get(self.next_index) {
            self.next_step_time = now + step.delay;
        }
        Some(command)
    }
}
