//! APDU response parsing
//!
//! A response is the payload followed by the two status bytes. Fobs answer
//! every command with at least the status word; anything shorter is reported
//! as [`ResponseError::Incomplete`].

use bytes::Bytes;
use tracing::{debug, trace};

use crate::status::StatusWord;

/// Error for APDU response parsing
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ResponseError {
    /// Fewer than two bytes, so no status word
    #[error("Incomplete response: no status word")]
    Incomplete,
}

/// Parsed APDU response
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
    payload: Bytes,
    status: StatusWord,
}

impl Response {
    /// Parse response from raw bytes (including status word)
    pub fn from_bytes(data: &Bytes) -> Result<Self, ResponseError> {
        let (status, payload) = extract_status_and_payload(data)?;

        trace!(
            sw1 = format_args!("{:#04x}", status.sw1),
            sw2 = format_args!("{:#04x}", status.sw2),
            payload_len = payload.len(),
            "Parsed APDU response"
        );

        Ok(Self {
            payload: data.slice(..payload.len()),
            status,
        })
    }

    /// Response payload without the status word
    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    /// Status word
    pub const fn status(&self) -> StatusWord {
        self.status
    }

    /// Check if the response indicates success
    pub const fn is_success(&self) -> bool {
        self.status.is_success()
    }
}

/// Extract status word and payload from raw APDU response data
///
/// # Errors
/// Returns an error if the data is too short to contain a valid status word.
pub fn extract_status_and_payload(data: &[u8]) -> Result<(StatusWord, &[u8]), ResponseError> {
    if data.len() < 2 {
        debug!("Response too short: {} bytes", data.len());
        return Err(ResponseError::Incomplete);
    }

    let len = data.len();
    let status = StatusWord::new(data[len - 2], data[len - 1]);
    Ok((status, &data[..len - 2]))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_response_from_bytes() {
        let data = Bytes::from_static(&[0x01, 0x02, 0x03, 0x04, 0x90, 0x00]);
        let resp = Response::from_bytes(&data).unwrap();
        assert_eq!(resp.payload(), &[0x01, 0x02, 0x03, 0x04]);
        assert!(resp.is_success());

        let data = Bytes::from_static(&[0x6A, 0x88]);
        let resp = Response::from_bytes(&data).unwrap();
        assert!(resp.payload().is_empty());
        assert_eq!(resp.status(), StatusWord::new(0x6A, 0x88));
        assert!(!resp.is_success());

        let data = Bytes::from_static(&[0x90]);
        assert_eq!(Response::from_bytes(&data), Err(ResponseError::Incomplete));
        assert_eq!(
            Response::from_bytes(&Bytes::new()),
            Err(ResponseError::Incomplete)
        );
    }

    #[test]
    fn test_extract_status_and_payload() {
        let data = [0x01, 0x02, 0x03, 0x90, 0x00];
        let (status, payload) = extract_status_and_payload(&data).unwrap();
        assert_eq!(status, StatusWord::new(0x90, 0x00));
        assert_eq!(payload, &[0x01, 0x02, 0x03]);
    }
}
