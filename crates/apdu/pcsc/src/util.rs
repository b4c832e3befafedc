//! Utility functions for PC/SC operations

/// Whether `error` means the context is dead and must be established again
///
/// Windows stops the PC/SC service when the last reader is unplugged, which
/// invalidates every context opened before.
pub(crate) const fn is_service_lost(error: &pcsc::Error) -> bool {
    matches!(error, pcsc::Error::NoService | pcsc::Error::ServiceStopped)
}

/// Extract the fob serial from an ATR
///
/// Fobs carry their 4-byte serial, least significant byte first, just before
/// the ATR check byte. The serial is rendered most significant byte first as
/// 8 lowercase hex characters. Returns `None` when the ATR is too short to
/// hold one.
pub fn serial_from_atr(atr: &[u8]) -> Option<String> {
    if atr.len() < 5 {
        return None;
    }
    let end = atr.len() - 1;
    let mut serial = atr[end - 4..end].to_vec();
    serial.reverse();
    Some(hex::encode(serial))
}

#[cfg(test)]
mod tests {
    use super::*;
    use hex_literal::hex;

    #[test]
    fn test_serial_from_atr() {
        assert_eq!(
            serial_from_atr(&hex!("3B8F80011234AB9C")).as_deref(),
            Some("ab341201")
        );
        // Leading zero bytes keep their two digits
        assert_eq!(
            serial_from_atr(&hex!("3B0A0B0C0D0E")).as_deref(),
            Some("0d0c0b0a")
        );
        assert_eq!(
            serial_from_atr(&hex!("3B01020304")).as_deref(),
            Some("0302013b")
        );
    }

    #[test]
    fn test_short_atr() {
        assert_eq!(serial_from_atr(&hex!("3B010203")), None);
        assert_eq!(serial_from_atr(&[]), None);
    }
}
