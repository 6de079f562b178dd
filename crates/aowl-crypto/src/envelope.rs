//! Versioned binary envelope
//!
//! ```text
//! [0..4)        format version, u32 little-endian (currently 1)
//! [4..16)       IV (12 bytes)
//! [16..len-16)  ciphertext
//! [len-16..len) GCM tag (16 bytes)
//! ```

use crate::error::{CryptoError, CryptoResult};
use crate::{FORMAT_VERSION, IV_SIZE, MIN_ENVELOPE_SIZE, TAG_SIZE};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncryptedEnvelope {
    pub format_version: u32,
    pub iv: [u8; IV_SIZE],
    pub ciphertext: Vec<u8>,
    pub tag: [u8; TAG_SIZE],
}

impl EncryptedEnvelope {
    /// Assemble an envelope from raw parts, checking IV and tag sizes.
    pub fn from_parts(iv: &[u8], ciphertext: Vec<u8>, tag: &[u8]) -> CryptoResult<Self> {
        let iv: [u8; IV_SIZE] = iv
            .try_into()
            .map_err(|_| CryptoError::InvalidIvLength(iv.len()))?;
        let tag: [u8; TAG_SIZE] = tag.try_into().map_err(|_| {
            CryptoError::InvalidDataFormat(format!(
                "tag is {} bytes (expected {TAG_SIZE})",
                tag.len()
            ))
        })?;
        Ok(Self {
            format_version: FORMAT_VERSION,
            iv,
            ciphertext,
            tag,
        })
    }

    /// Parse the wire form.
    pub fn from_bytes(data: &[u8]) -> CryptoResult<Self> {
        if data.len() < MIN_ENVELOPE_SIZE {
            return Err(CryptoError::InvalidDataFormat(format!(
                "envelope too short: {} bytes (minimum {MIN_ENVELOPE_SIZE})",
                data.len()
            )));
        }

        let (version_bytes, rest) = data.split_at(4);
        let mut version = [0u8; 4];
        version.copy_from_slice(version_bytes);
        let format_version = u32::from_le_bytes(version);
        if format_version != FORMAT_VERSION {
            return Err(CryptoError::UnsupportedVersion(format_version));
        }

        let (iv, rest) = rest.split_at(IV_SIZE);
        let (ciphertext, tag) = rest.split_at(rest.len() - TAG_SIZE);

        let mut envelope = Self::from_parts(iv, ciphertext.to_vec(), tag)?;
        envelope.format_version = format_version;
        Ok(envelope)
    }

    /// Serialize to the wire form.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.wire_len());
        out.extend_from_slice(&self.format_version.to_le_bytes());
        out.extend_from_slice(&self.iv);
        out.extend_from_slice(&self.ciphertext);
        out.extend_from_slice(&self.tag);
        out
    }

    /// Total wire length
    pub fn wire_len(&self) -> usize {
        4 + IV_SIZE + self.ciphertext.len() + TAG_SIZE
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> EncryptedEnvelope {
        EncryptedEnvelope::from_parts(&[1u8; IV_SIZE], vec![9, 8, 7], &[2u8; TAG_SIZE]).unwrap()
    }

    #[test]
    fn test_wire_layout() {
        let bytes = sample().to_bytes();

        assert_eq!(bytes.len(), 4 + 12 + 3 + 16);
        assert_eq!(&bytes[0..4], &1u32.to_le_bytes());
        assert_eq!(&bytes[4..16], &[1u8; 12]);
        assert_eq!(&bytes[16..19], &[9, 8, 7]);
        assert_eq!(&bytes[19..], &[2u8; 16]);
    }

    #[test]
    fn test_parse_minimum_size() {
        let envelope =
            EncryptedEnvelope::from_parts(&[0u8; IV_SIZE], Vec::new(), &[0u8; TAG_SIZE]).unwrap();
        let bytes = envelope.to_bytes();
        assert_eq!(bytes.len(), MIN_ENVELOPE_SIZE);

        let parsed = EncryptedEnvelope::from_bytes(&bytes).unwrap();
        assert!(parsed.ciphertext.is_empty());
    }

    #[test]
    fn test_too_short() {
        let result = EncryptedEnvelope::from_bytes(&[1u8; MIN_ENVELOPE_SIZE - 1]);
        assert!(matches!(result, Err(CryptoError::InvalidDataFormat(_))));
    }

    #[test]
    fn test_unknown_version() {
        let mut bytes = sample().to_bytes();
        bytes[0..4].copy_from_slice(&2u32.to_le_bytes());

        assert_eq!(
            EncryptedEnvelope::from_bytes(&bytes),
            Err(CryptoError::UnsupportedVersion(2))
        );
    }

    #[test]
    fn test_bad_iv_length() {
        let result = EncryptedEnvelope::from_parts(&[0u8; 8], vec![], &[0u8; TAG_SIZE]);
        assert_eq!(result, Err(CryptoError::InvalidIvLength(8)));
    }
}
