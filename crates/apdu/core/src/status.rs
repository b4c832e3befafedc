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

impl StatusWord {
    /// Create a new status word
    pub const fn new(sw1: u8, sw2: u8) -> Self {
        Self { sw1, sw2 }
    }

    /// Convert to a u16 value (SW1 | SW2)
    pub const fn to_u16(&self) -> u16 {
        ((self.sw1 as u16) << 8) | (self.sw2 as u16)
    }

    /// Lowercase four-digit hex form, as it appears at the end of a response
    /// trace (`9000`, `6a88`)
    pub fn to_hex(&self) -> String {
        format!("{:04x}", self.to_u16())
    }

    /// Check if this status word indicates success (90 00)
    pub const fn is_success(&self) -> bool {
        self.sw1 == 0x90 && self.sw2 == 0x00
    }

    /// Check if this status word belongs to the verification-failed family
    /// (63 Cx), where `x` is the number of remaining tries
    pub const fn is_verify_failed(&self) -> bool {
        self.sw1 == 0x63 && (self.sw2 & 0xF0) == 0xC0
    }

    /// Remaining tries when SW1 = 63 and SW2 = Cx
    pub const fn remaining_tries(&self) -> Option<u8> {
        if self.is_verify_failed() {
            Some(self.sw2 & 0x0F)
        } else {
            None
        }
    }

    /// Check if this status word indicates the challenge was already consumed (69 84)
    pub const fn is_referenced_data_invalidated(&self) -> bool {
        self.sw1 == 0x69 && self.sw2 == 0x84
    }

    /// Check if this status word indicates an incorrect P1 or P2 parameter (6A 86)
    pub const fn is_incorrect_p1p2(&self) -> bool {
        self.sw1 == 0x6A && self.sw2 == 0x86
    }

    /// Check if this status word indicates referenced data not found (6A 88)
    pub const fn is_referenced_data_not_found(&self) -> bool {
        self.sw1 == 0x6A && self.sw2 == 0x88
    }
}

impl fmt::Display for StatusWord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:02X}{:02X}", self.sw1, self.sw2)
    }
}
