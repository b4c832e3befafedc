//! Fob records and their lifecycle flags

use serde::{Deserialize, Serialize};

/// One physical fob as tracked by the store
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Fob {
    /// Store-assigned id, stable across runs
    pub id: u64,
    /// 8 hex character serial read from the ATR
    pub serial: String,
    /// Key believed to be provisioned on the card
    #[serde(default)]
    pub secret: Option<String>,
    /// Most recent protocol step and its outcome
    #[serde(default)]
    pub last_operation: String,
    /// The secret write was confirmed by the card
    #[serde(default)]
    pub initialized: bool,
    /// The registry accepted serial and secret
    #[serde(default)]
    pub uploaded: bool,
    /// Key sent in a write whose outcome is unknown
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pending_secret: Option<String>,
}

impl Fob {
    /// A fresh record for `serial`
    pub fn new(id: u64, serial: impl Into<String>) -> Self {
        Self {
            id,
            serial: serial.into(),
            secret: None,
            last_operation: String::new(),
            initialized: false,
            uploaded: false,
            pending_secret: None,
        }
    }

    /// Serial as shown to operators
    pub fn display_number(&self) -> String {
        display_number(&self.serial)
    }

    /// Initialized but not yet accepted by the registry
    pub const fn awaits_upload(&self) -> bool {
        self.initialized && !self.uploaded
    }
}

/// Decimal rendering of a hex serial, zero-padded to 10 digits
///
/// Serials that are not hex are returned unchanged.
pub fn display_number(serial: &str) -> String {
    u64::from_str_radix(serial, 16).map_or_else(|_| serial.to_string(), |n| format!("{n:010}"))
}

/// Changes to apply to a [`Fob`]
///
/// Lifecycle flags can only be raised, so they are expressed as `mark_*`
/// operations rather than values.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FobPatch {
    /// New `last_operation`
    pub last_operation: Option<String>,
    /// New `secret`
    pub secret: Option<String>,
    /// New `pending_secret`; `Some(None)` clears it
    pub pending_secret: Option<Option<String>>,
    /// Raise `initialized`
    pub initialized: bool,
    /// Raise `uploaded`
    pub uploaded: bool,
}

impl FobPatch {
    /// Record the latest protocol step
    pub fn last_operation(label: impl Into<String>) -> Self {
        Self {
            last_operation: Some(label.into()),
            ..Self::default()
        }
    }

    /// Record a secret about to be written
    pub fn pending(secret: impl Into<String>) -> Self {
        Self {
            pending_secret: Some(Some(secret.into())),
            ..Self::default()
        }
    }

    /// Forget the pending secret
    pub fn clear_pending() -> Self {
        Self {
            pending_secret: Some(None),
            ..Self::default()
        }
    }

    /// The card confirmed the write of `secret`
    pub fn initialized(secret: impl Into<String>) -> Self {
        Self {
            secret: Some(secret.into()),
            pending_secret: Some(None),
            initialized: true,
            ..Self::default()
        }
    }

    /// The registry accepted the fob
    pub fn uploaded() -> Self {
        Self {
            uploaded: true,
            ..Self::default()
        }
    }
}
