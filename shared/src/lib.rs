use bincode::Options;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Size of every framed message on the wire
pub const FRAME_LEN: usize = 12;
pub const DEFAULT_KEEP_ALIVE_MS: u64 = 200;
pub const DEFAULT_CONNECT_TIMEOUT_MS: u64 = 5000;

#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("unknown instruction opcode {0}")]
    UnknownInstruction(i32),

    #[error("frame encoding failed: {0}")]
    Encoding(#[from] bincode::Error),
}

/// Opcodes understood by the servo server
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(i32)]
pub enum Instruction {
    Success = 0,
    ErrorUnknown = 1,
    ErrorPassword = 2,
    ErrorTimeout = 3,
    ErrorInvalidData = 4,

    AddServo = 5,
    RmServo = 6,
    SetSmoothing = 7,
    SetMinWidth = 8,
    SetMaxWidth = 9,
    SetSteering = 10,

    SetTimeout = 11,
    KeepAlive = 12,
    Authenticate = 13,
    Quit = 14,
    SetDefaultSteering = 15,
    Reset = 16,
}

impl Instruction {
    pub const ALL: [Instruction; 17] = [
        Instruction::Success,
        Instruction::ErrorUnknown,
        Instruction::ErrorPassword,
        Instruction::ErrorTimeout,
        Instruction::ErrorInvalidData,
        Instruction::AddServo,
        Instruction::RmServo,
        Instruction::SetSmoothing,
        Instruction::SetMinWidth,
        Instruction::SetMaxWidth,
        Instruction::SetSteering,
        Instruction::SetTimeout,
        Instruction::KeepAlive,
        Instruction::Authenticate,
        Instruction::Quit,
        Instruction::SetDefaultSteering,
        Instruction::Reset,
    ];

    pub fn opcode(self) -> i32 {
        self as i32
    }

    pub fn is_error(self) -> bool {
        matches!(
            self,
            Instruction::ErrorUnknown
                | Instruction::ErrorPassword
                | Instruction::ErrorTimeout
                | Instruction::ErrorInvalidData
        )
    }
}

impl TryFrom<i32> for Instruction {
    type Error = ProtocolError;

    fn try_from(opcode: i32) -> Result<Self, Self::Error> {
        usize::try_from(opcode)
            .ok()
            .and_then(|index| Instruction::ALL.get(index).copied())
            .ok_or(ProtocolError::UnknownInstruction(opcode))
    }
}

/// One protocol message: an instruction and two 32-bit parameters
///
/// Command messages carry the channel in `param1` and the value in `param2`.
/// Float values travel as their IEEE-754 bit pattern.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Message {
    pub instruction: Instruction,
    pub param1: i32,
    pub param2: i32,
}

impl Message {
    pub fn new(instruction: Instruction) -> Self {
        Self::with_params(instruction, 0, 0)
    }

    pub fn with_param(instruction: Instruction, param1: i32) -> Self {
        Self::with_params(instruction, param1, 0)
    }

    pub fn with_params(instruction: Instruction, param1: i32, param2: i32) -> Self {
        Self {
            instruction,
            param1,
            param2,
        }
    }

    pub fn with_float(instruction: Instruction, param1: i32, value: f32) -> Self {
        Self::with_params(instruction, param1, value.to_bits() as i32)
    }

    /// Reads `param2` back as the float whose bits it holds
    pub fn float_param(&self) -> f32 {
        f32::from_bits(self.param2 as u32)
    }
}

/// Wire layout of a frame, before the opcode is validated
#[derive(Debug, Serialize, Deserialize)]
struct RawFrame {
    instruction: i32,
    param1: i32,
    param2: i32,
}

fn wire_options() -> impl Options {
    bincode::DefaultOptions::new()
        .with_big_endian()
        .with_fixint_encoding()
}

pub fn encode(message: &Message) -> Result<[u8; FRAME_LEN], ProtocolError> {
    let raw = RawFrame {
        instruction: message.instruction.opcode(),
        param1: message.param1,
        param2: message.param2,
    };

    let mut frame = [0u8; FRAME_LEN];
    wire_options().serialize_into(&mut frame[..], &raw)?;
    Ok(frame)
}

pub fn decode(frame: &[u8; FRAME_LEN]) -> Result<Message, ProtocolError> {
    let raw: RawFrame = wire_options().deserialize(frame)?;

    Ok(Message {
        instruction: Instruction::try_from(raw.instruction)?,
        param1: raw.param1,
        param2: raw.param2,
    })
}
