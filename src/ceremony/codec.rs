// SPDX-License-Identifier: AGPL-3.0-or-later
//! One-time-pad codec for DR operation tokens
//!
//! The node returns the token XORed with the OTP and base64 encoded. XOR is
//! its own inverse, so [`encode`] and [`decode`] share [`xor`].

use base64::alphabet;
use base64::engine::general_purpose::{GeneralPurpose, GeneralPurposeConfig, STANDARD};
use base64::engine::DecodePaddingMode;
use base64::Engine as _;
use std::fmt;

use crate::error::ProtocolError;

/// Standard alphabet that accepts the token with or without trailing `=`
const TOKEN_ENGINE: GeneralPurpose = GeneralPurpose::new(
    &alphabet::STANDARD,
    GeneralPurposeConfig::new().with_decode_padding_mode(DecodePaddingMode::Indifferent),
);

/// Plaintext DR operation token, presented once to promote or update-primary
#[derive(Clone, PartialEq, Eq)]
pub struct OperationToken(String);

impl OperationToken {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for OperationToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("OperationToken(<redacted>)")
    }
}

/// Byte-wise XOR of two equal-length inputs
pub fn xor(data: &[u8], otp: &[u8]) -> Result<Vec<u8>, ProtocolError> {
    if data.len() != otp.len() {
        return Err(ProtocolError::LengthMismatch {
            decoded_len: data.len(),
            otp_len: otp.len(),
        });
    }
    Ok(data.iter().zip(otp).map(|(d, k)| d ^ k).collect())
}

/// Recover the operation token from `encoded_token` and the attempt's OTP
pub fn decode(encoded: &str, otp: &str) -> Result<OperationToken, ProtocolError> {
    let unpadded = encoded.trim().trim_end_matches('=');
    let decoded = TOKEN_ENGINE
        .decode(unpadded)
        .map_err(|e| ProtocolError::InvalidEncoding {
            message: e.to_string(),
        })?;

    let plain = xor(&decoded, otp.as_bytes())?;
    String::from_utf8(plain)
        .map(OperationToken)
        .map_err(|_| ProtocolError::InvalidUtf8)
}

/// Inverse of [`decode`]: XOR with the OTP, then base64 encode
pub fn encode(plain: &[u8], otp: &str) -> Result<String, ProtocolError> {
    Ok(STANDARD.encode(xor(plain, otp.as_bytes())?))
}
