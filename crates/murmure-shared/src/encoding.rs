//! Byte/string conversions used on the wire: base64 for binary envelope
//! fields, base58 for chat-keys, UTF-8 for inner payloads.

use base64::engine::general_purpose::STANDARD;
use base64::Engine;

use crate::error::CodecError;

pub fn encode_b64(data: &[u8]) -> String {
    STANDARD.encode(data)
}

pub fn decode_b64(s: &str) -> Result<Vec<u8>, CodecError> {
    Ok(STANDARD.decode(s.trim())?)
}

pub fn encode_b58(data: &[u8]) -> String {
    bs58::encode(data).into_string()
}

pub fn decode_b58(s: &str) -> Result<Vec<u8>, CodecError> {
    Ok(bs58::decode(s.trim()).into_vec()?)
}

/// Decode a base58 chat-key into its raw 32-byte public key.
pub fn decode_chat_key(s: &str) -> Result<[u8; 32], CodecError> {
    let bytes = decode_b58(s)?;
    bytes
        .try_into()
        .map_err(|_| CodecError::bad_input("chat-key must decode to 32 bytes"))
}

pub fn utf8_bytes(s: &str) -> Vec<u8> {
    s.as_bytes().to_vec()
}

pub fn utf8_string(bytes: &[u8]) -> Result<String, CodecError> {
    String::from_utf8(bytes.to_vec()).map_err(|e| CodecError::BadInput(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_b64_roundtrip() {
        let data = b"chiffrement de bout en bout";
        assert_eq!(decode_b64(&encode_b64(data)).unwrap(), data);
    }

    #[test]
    fn test_b64_rejects_garbage() {
        assert!(decode_b64("not!!base64@@").is_err());
    }

    #[test]
    fn test_b58_roundtrip() {
        let key = [0x42u8; 32];
        let encoded = encode_b58(&key);
        assert_eq!(decode_chat_key(&encoded).unwrap(), key);
    }

    #[test]
    fn test_chat_key_wrong_length() {
        let encoded = encode_b58(&[1u8; 16]);
        assert!(decode_chat_key(&encoded).is_err());
    }

    #[test]
    fn test_utf8_roundtrip() {
        let s = "héllo wörld";
        assert_eq!(utf8_string(&utf8_bytes(s)).unwrap(), s);
    }
}
