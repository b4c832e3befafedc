//! Fixed command set of the fob applet
//!
//! Every command is a literal template; only the external authentication
//! cryptogram and the written key are substituted in.

use std::fmt;

use fob_apdu_core::{Command, CommandError};

/// Manufacturer default key of a blank fob
pub const DEFAULT_KEY: &str = "FFFFFFFFFFFFFFFF";

/// Key record header written in front of the secret by [`add_secret`]
const KEY_RECORD_HEADER: [u8; 5] = [0x39, 0xF0, 0xF1, 0xAA, 0xFF];

/// A protocol step, as shown to the operator
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Step {
    /// Select the master file
    SelectMf,
    /// Ask the card for a challenge
    GetChallenge,
    /// Answer the challenge with the host cryptogram
    ExternalAuthentication,
    /// Erase the key file
    CleanData,
    /// Create the key file
    CreateFile,
    /// Write the new secret
    AddSecret,
}

impl Step {
    /// Operator-facing name of the step
    pub const fn label(self) -> &'static str {
        match self {
            Self::SelectMf => "Select MF",
            Self::GetChallenge => "Get random numbers",
            Self::ExternalAuthentication => "External Authentication",
            Self::CleanData => "Clean data",
            Self::CreateFile => "Create file",
            Self::AddSecret => "Add secret",
        }
    }

    /// Whether the session rejects anything but `9000` for this step
    ///
    /// Authentication and file creation answers are branched on by the
    /// caller, so they come back unchecked.
    pub const fn is_checked(self) -> bool {
        !matches!(self, Self::ExternalAuthentication | Self::CreateFile)
    }
}

impl fmt::Display for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// `00A40000023F00`
pub const fn select_mf() -> Command {
    Command::from_static(&[0x00, 0xA4, 0x00, 0x00, 0x02, 0x3F, 0x00])
}

/// `008400000400000000`
pub const fn get_challenge() -> Command {
    Command::from_static(&[0x00, 0x84, 0x00, 0x00, 0x04, 0x00, 0x00, 0x00, 0x00])
}

/// `0082000008` followed by the 8-byte cryptogram
pub fn external_authenticate(cryptogram: &[u8; 8]) -> Result<Command, CommandError> {
    Command::new_with_data(0x00, 0x82, 0x00, 0x00, cryptogram)
}

/// `800E000000`
pub const fn clean_data() -> Command {
    Command::from_static(&[0x80, 0x0E, 0x00, 0x00, 0x00])
}

/// `80E00000073F005001F1FFFF`
pub const fn create_file() -> Command {
    Command::from_static(&[
        0x80, 0xE0, 0x00, 0x00, 0x07, 0x3F, 0x00, 0x50, 0x01, 0xF1, 0xFF, 0xFF,
    ])
}

/// `80D40100 Lc 39F0F1AAFF <key>` with `Lc = 5 + key length`
pub fn add_secret(key: &[u8]) -> Result<Command, CommandError> {
    let mut data = Vec::with_capacity(KEY_RECORD_HEADER.len() + key.len());
    data.extend_from_slice(&KEY_RECORD_HEADER);
    data.extend_from_slice(key);
    Command::new_with_data(0x80, 0xD4, 0x01, 0x00, &data)
}

#[cfg(test)]
mod tests {
    use super::*;
    use hex_literal::hex;

    #[test]
    fn test_fixed_templates() {
        assert_eq!(select_mf().to_hex(), "00A40000023F00");
        assert_eq!(get_challenge().to_hex(), "008400000400000000");
        assert_eq!(clean_data().to_hex(), "800E000000");
        assert_eq!(create_file().to_hex(), "80E00000073F005001F1FFFF");
    }

    #[test]
    fn test_external_authenticate() {
        let cmd = external_authenticate(&hex!("0102030405060708")).unwrap();
        assert_eq!(cmd.to_hex(), "00820000080102030405060708");
    }

    #[test]
    fn test_add_secret_lc() {
        let single = add_secret(&hex!("FFFFFFFFFFFFFFFF")).unwrap();
        assert_eq!(single.to_hex(), "80D401000D39F0F1AAFFFFFFFFFFFFFFFFFF");

        let triple = add_secret(&hex!("95FD677E92AA7C051E70928A3D5C0D95")).unwrap();
        assert_eq!(
            triple.to_hex(),
            "80D401001539F0F1AAFF95FD677E92AA7C051E70928A3D5C0D95"
        );
    }

    #[test]
    fn test_checked_steps() {
        assert!(Step::SelectMf.is_checked());
        assert!(Step::AddSecret.is_checked());
        assert!(!Step::ExternalAuthentication.is_checked());
        assert!(!Step::CreateFile.is_checked());
        assert_eq!(Step::GetChallenge.to_string(), "Get random numbers");
    }
}
