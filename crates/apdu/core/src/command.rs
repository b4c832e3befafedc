//! APDU command representation
//!
//! Fob commands are fixed byte templates with at most one variable field, so
//! a command is kept as its raw encoding rather than as parsed fields. The
//! header accessors read the first four bytes.

use std::fmt;

use bytes::{BufMut, Bytes, BytesMut};

/// Error for APDU command construction
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum CommandError {
    /// The hex encoding was invalid
    #[error("Invalid command hex: {0}")]
    InvalidHex(#[from] hex::FromHexError),

    /// The command is shorter than the four header bytes
    #[error("Invalid command length: {0}")]
    InvalidLength(usize),

    /// Data longer than a short APDU can carry
    #[error("Data too long: {0} bytes (max 255)")]
    DataTooLong(usize),
}

/// A raw APDU command
#[derive(Clone, PartialEq, Eq)]
pub struct Command {
    bytes: Bytes,
}

impl Command {
    /// Build a command from its hex encoding
    pub fn from_hex(encoded: &str) -> Result<Self, CommandError> {
        let bytes = hex::decode(encoded)?;
        Self::from_bytes(bytes)
    }

    /// Build a command from raw bytes
    pub fn from_bytes(bytes: impl Into<Bytes>) -> Result<Self, CommandError> {
        let bytes = bytes.into();
        if bytes.len() < 4 {
            return Err(CommandError::InvalidLength(bytes.len()));
        }
        Ok(Self { bytes })
    }

    /// Build a command from a fixed template
    ///
    /// # Panics
    /// Panics if `bytes` is shorter than the four header bytes.
    pub const fn from_static(bytes: &'static [u8]) -> Self {
        assert!(bytes.len() >= 4, "command template shorter than its header");
        Self {
            bytes: Bytes::from_static(bytes),
        }
    }

    /// Build a case 3 command: header, Lc and data
    pub fn new_with_data(
        cla: u8,
        ins: u8,
        p1: u8,
        p2: u8,
        data: &[u8],
    ) -> Result<Self, CommandError> {
        let lc = u8::try_from(data.len()).map_err(|_| CommandError::DataTooLong(data.len()))?;

        let mut buffer = BytesMut::with_capacity(5 + data.len());
        buffer.put_u8(cla);
        buffer.put_u8(ins);
        buffer.put_u8(p1);
        buffer.put_u8(p2);
        buffer.put_u8(lc);
        buffer.put_slice(data);

        Ok(Self {
            bytes: buffer.freeze(),
        })
    }

    /// Command class (CLA)
    pub fn class(&self) -> u8 {
        self.bytes[0]
    }

    /// Instruction code (INS)
    pub fn instruction(&self) -> u8 {
        self.bytes[1]
    }

    /// Raw encoding
    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// Uppercase hex encoding
    pub fn to_hex(&self) -> String {
        hex::encode_upper(&self.bytes)
    }
}

impl fmt::Debug for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Command").field(&self.to_hex()).finish()
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hex_literal::hex;

    #[test]
    fn test_from_hex() {
        let cmd = Command::from_hex("800E000000").unwrap();
        assert_eq!(cmd.class(), 0x80);
        assert_eq!(cmd.instruction(), 0x0E);
        assert_eq!(cmd.as_bytes(), hex!("800E000000"));
        assert_eq!(cmd.to_hex(), "800E000000");
    }

    #[test]
    fn test_rejects_short_and_invalid() {
        assert_eq!(
            Command::from_hex("00A4").unwrap_err(),
            CommandError::InvalidLength(2)
        );
        assert!(matches!(
            Command::from_hex("00A4000G"),
            Err(CommandError::InvalidHex(_))
        ));
    }

    #[test]
    fn test_new_with_data() {
        let cmd = Command::new_with_data(0x00, 0x82, 0x00, 0x00, &hex!("0102030405060708")).unwrap();
        assert_eq!(cmd.to_hex(), "00820000080102030405060708");

        let too_long = vec![0u8; 256];
        assert_eq!(
            Command::new_with_data(0x00, 0x82, 0x00, 0x00, &too_long).unwrap_err(),
            CommandError::DataTooLong(256)
        );
    }
}
