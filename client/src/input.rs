//! Console input for the command-line controller
//!
//! One command per line. Continuous control goes to the dispatcher, servo
//! configuration goes through the session façade.

use crate::registry::Channel;
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Command {
    Steering(f32),
    Throttle(f32),
    AddServo(Channel),
    RemoveServo(Channel),
    MinWidth(Channel, f32),
    MaxWidth(Channel, f32),
    IdleSteering(Channel, f32),
    Smoothing(Channel, f32),
    Rebuild,
    Reset,
    Status,
    Help,
    Quit,
}

#[derive(Debug, Error, PartialEq)]
pub enum InputError {
    #[error("unknown command '{0}', type 'help'")]
    UnknownCommand(String),

    #[error("'{command}' expects {expected}")]
    MissingArgument {
        command: &'static str,
        expected: &'static str,
    },

    #[error("could not parse '{0}' as a number")]
    InvalidNumber(String),
}

pub const HELP: &str = "\
s <0..1>            set steering
t <0..1>            set throttle
add <pin>           add a servo with default settings
rm <pin>            remove a servo
min <pin> <us>      set minimum pulse width
max <pin> <us>      set maximum pulse width
idle <pin> <0..1>   set steering used when the link goes quiet
smooth <pin> <s>    set smoothing (negative disables)
rebuild             resend every servo to the server
reset               remove all servos
status              show cached servos
quit                leave";

/// Parses one console line; blank lines are `Ok(None)`
pub fn parse_command(line: &str) -> Result<Option<Command>, InputError> {
    let mut words = line.split_whitespace();
    let Some(name) = words.next() else {
        return Ok(None);
    };

    let command = match name.to_ascii_lowercase().as_str() {
        "s" | "steer" => Command::Steering(number(words.next(), "s", "a value")?),
        "t" | "throttle" => Command::Throttle(number(words.next(), "t", "a value")?),
        "add" => Command::AddServo(number(words.next(), "add", "a pin")?),
        "rm" | "remove" => Command::RemoveServo(number(words.next(), "rm", "a pin")?),
        "min" => {
            let pin = number(words.next(), "min", "a pin and a width")?;
            Command::MinWidth(pin, number(words.next(), "min", "a pin and a width")?)
        }
        "max" => {
            let pin = number(words.next(), "max", "a pin and a width")?;
            Command::MaxWidth(pin, number(words.next(), "max", "a pin and a width")?)
        }
        "idle" => {
            let pin = number(words.next(), "idle", "a pin and a value")?;
            Command::IdleSteering(pin, number(words.next(), "idle", "a pin and a value")?)
        }
        "smooth" => {
            let pin = number(words.next(), "smooth", "a pin and a value")?;
            Command::Smoothing(pin, number(words.next(), "smooth", "a pin and a value")?)
        }
        "rebuild" => Command::Rebuild,
        "reset" => Command::Reset,
        "status" => Command::Status,
        "help" | "?" => Command::Help,
        "q" | "quit" | "exit" => Command::Quit,
        other => return Err(InputError::UnknownCommand(other.to_string())),
    };

    Ok(Some(command))
}

fn number<T: std::str::FromStr>(
    word: Option<&str>,
    command: &'static str,
    expected: &'static str,
) -> Result<T, InputError> {
    let word = word.ok_or(InputError::MissingArgument { command, expected })?;
    word.parse()
        .map_err(|_| InputError::InvalidNumber(word.to_string()))
}
