//! Status word definitions for APDU responses

use std::fmt;

/// Status Word (SW1-SW2) from an APDU response
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct StatusWord {
    /// First status byte (SW1)
    pub sw1: u8,
    /// Second status byte (SW2)
    pub sw2: u8,
}

/// Named outcome of a status word
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusCategory {
    /// `9000`
    Success,
    /// `61xx`: SW2 more response bytes are available via GET RESPONSE
    MoreData(u8),
    /// `6Cxx`: wrong Le, SW2 carries the correct length
    WrongLength(u8),
    /// `63Cx`: verification failed, x retries remaining
    RetriesRemaining(u8),
    /// `6A82`
    FileNotFound,
    /// `6A86`
    IncorrectP1P2,
    /// `6982`
    SecurityNotSatisfied,
    /// `6985`
    ConditionsNotSatisfied,
    /// `6D00`
    InstructionNotSupported,
    /// Anything outside the fixed table
    Unknown(u16),
}

impl StatusWord {
    /// Create a new status word
    pub const fn new(sw1: u8, sw2: u8) -> Self {
        Self { sw1, sw2 }
    }

    /// Create from a u16 value (SW1 | SW2)
    pub const fn from_u16(status: u16) -> Self {
        Self {
            sw1: (status >> 8) as u8,
            sw2: status as u8,
        }
    }

    /// Convert to a u16 value (SW1 | SW2)
    pub const fn to_u16(&self) -> u16 {
        ((self.sw1 as u16) << 8) | (self.sw2 as u16)
    }

    /// Check if this status word indicates success (90 00)
    pub const fn is_success(&self) -> bool {
        self.sw1 == 0x90 && self.sw2 == 0x00
    }

    /// Check if more response data is available (61 XX)
    pub const fn is_more_data_available(&self) -> bool {
        self.sw1 == 0x61
    }

    /// Translate into a named outcome
    pub const fn categorize(&self) -> StatusCategory {
        match (self.sw1, self.sw2) {
            (0x90, 0x00) => StatusCategory::Success,
            (0x61, n) => StatusCategory::MoreData(n),
            (0x6C, n) => StatusCategory::WrongLength(n),
            (0x63, n) if n & 0xF0 == 0xC0 => StatusCategory::RetriesRemaining(n & 0x0F),
            (0x6A, 0x82) => StatusCategory::FileNotFound,
            (0x6A, 0x86) => StatusCategory::IncorrectP1P2,
            (0x69, 0x82) => StatusCategory::SecurityNotSatisfied,
            (0x69, 0x85) => StatusCategory::ConditionsNotSatisfied,
            (0x6D, 0x00) => StatusCategory::InstructionNotSupported,
            _ => StatusCategory::Unknown(self.to_u16()),
        }
    }

    /// Get a description of this status word
    pub const fn description(&self) -> &'static str {
        match (self.sw1, self.sw2) {
            (0x90, 0x00) => "Success",
            (0x61, _) => "More data available",
            (0x62, 0x83) => "Selected file invalidated",
            (0x63, n) if (n & 0xF0) == 0xC0 => "Counter value",
            (0x65, 0x81) => "Memory failure",
            (0x67, 0x00) => "Wrong length",
            (0x68, 0x82) => "Secure messaging not supported",
            (0x69, 0x82) => "Security status not satisfied",
            (0x69, 0x83) => "Authentication method blocked",
            (0x69, 0x85) => "Conditions of use not satisfied",
            (0x69, 0x86) => "Command not allowed",
            (0x69, 0x88) => "SM data objects incorrect",
            (0x6A, 0x80) => "Incorrect parameters in the data field",
            (0x6A, 0x81) => "Function not supported",
            (0x6A, 0x82) => "File not found",
            (0x6A, 0x84) => "Not enough memory space in the file",
            (0x6A, 0x86) => "Incorrect parameters P1-P2",
            (0x6A, 0x88) => "Referenced data not found",
            (0x6B, 0x00) => "Wrong parameters P1-P2",
            (0x6C, _) => "Wrong Le field",
            (0x6D, 0x00) => "Instruction code not supported or invalid",
            (0x6E, 0x00) => "Class not supported",
            (0x6F, 0x00) => "No precise diagnosis",
            _ => "Unknown status word",
        }
    }
}

impl From<u16> for StatusWord {
    fn from(value: u16) -> Self {
        Self::from_u16(value)
    }
}

impl From<StatusWord> for u16 {
    fn from(value: StatusWord) -> Self {
        value.to_u16()
    }
}

impl fmt::Display for StatusWord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:02X}{:02X} ({})",
            self.sw1,
            self.sw2,
            self.description()
        )
    }
}

/// Commonly used status words
pub mod sw {
    use super::StatusWord;

    /// Success
    pub const SUCCESS: StatusWord = StatusWord::new(0x90, 0x00);
    /// Wrong length
    pub const WRONG_LENGTH: StatusWord = StatusWord::new(0x67, 0x00);
    /// Security status not satisfied
    pub const SECURITY_NOT_SATISFIED: StatusWord = StatusWord::new(0x69, 0x82);
    /// Authentication method blocked
    pub const AUTH_METHOD_BLOCKED: StatusWord = StatusWord::new(0x69, 0x83);
    /// Conditions of use not satisfied
    pub const CONDITIONS_NOT_SATISFIED: StatusWord = StatusWord::new(0x69, 0x85);
    /// Incorrect data field
    pub const WRONG_DATA: StatusWord = StatusWord::new(0x6A, 0x80);
    /// File or application not found
    pub const FILE_NOT_FOUND: StatusWord = StatusWord::new(0x6A, 0x82);
    /// Incorrect parameters P1-P2
    pub const INCORRECT_P1P2: StatusWord = StatusWord::new(0x6A, 0x86);
    /// Referenced data not found
    pub const REFERENCED_DATA_NOT_FOUND: StatusWord = StatusWord::new(0x6A, 0x88);
    /// Instruction not supported
    pub const INS_NOT_SUPPORTED: StatusWord = StatusWord::new(0x6D, 0x00);
}
