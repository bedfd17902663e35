//! Opaque, tamper-evident codes for upstream asset ids.
//!
//! The token is `base64url(nonce || ciphertext)` where the plaintext is the
//! asset id's big-endian bytes with leading zeros stripped.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine as _;
use chacha20poly1305::{aead::Aead, ChaCha20Poly1305, Key, KeyInit, Nonce};

use crate::error::MediaError;

const KEY_LEN: usize = 32;
const NONCE_LEN: usize = 12;

pub struct AssetCodec {
    cipher: ChaCha20Poly1305,
}

fn random_bytes<const N: usize>() -> Result<[u8; N], MediaError> {
    let mut bytes = [0u8; N];
    getrandom::fill(&mut bytes)
        .map_err(|err| MediaError::Io(std::io::Error::other(format!("getrandom: {err}"))))?;
    Ok(bytes)
}

fn parse_key_hex(key_hex: &str) -> Result<[u8; KEY_LEN], MediaError> {
    let key_hex = key_hex.trim();
    if key_hex.len() != KEY_LEN * 2 || !key_hex.is_ascii() {
        return Err(MediaError::Validation(format!(
            "asset code key must be {} hex characters",
            KEY_LEN * 2
        )));
    }
    let mut key = [0u8; KEY_LEN];
    for (index, byte) in key.iter_mut().enumerate() {
        let pair = &key_hex[index * 2..index * 2 + 2];
        *byte = u8::from_str_radix(pair, 16).map_err(|_| {
            MediaError::Validation(format!("asset code key has non-hex characters: {pair}"))
        })?;
    }
    Ok(key)
}

impl AssetCodec {
    pub fn from_hex_key(key_hex: &str) -> Result<Self, MediaError> {
        let key = parse_key_hex(key_hex)?;
        Ok(Self {
            cipher: ChaCha20Poly1305::new(Key::from_slice(&key)),
        })
    }

    /// Fresh random key, hex encoded, for new configurations.
    pub fn generate_key_hex() -> Result<String, MediaError> {
        let key: [u8; KEY_LEN] = random_bytes()?;
        Ok(key.iter().map(|byte| format!("{byte:02x}")).collect())
    }

    pub fn encode(&self, asset_id: u64) -> Result<String, MediaError> {
        let id_bytes = asset_id.to_be_bytes();
        let first_significant = id_bytes
            .iter()
            .position(|byte| *byte != 0)
            .unwrap_or(id_bytes.len());
        let nonce: [u8; NONCE_LEN] = random_bytes()?;
        let ciphertext = self
            .cipher
            .encrypt(Nonce::from_slice(&nonce), &id_bytes[first_significant..])
            .map_err(|_| MediaError::InvalidAssetCode)?;

        let mut token = Vec::with_capacity(NONCE_LEN + ciphertext.len());
        token.extend_from_slice(&nonce);
        token.extend_from_slice(&ciphertext);
        Ok(URL_SAFE_NO_PAD.encode(token))
    }

    /// Encodes a catalog asset id given as text, as found in cache file names.
    pub fn encode_str(&self, asset_id: &str) -> Result<String, MediaError> {
        let asset_id = asset_id
            .trim()
            .parse::<u64>()
            .map_err(|_| MediaError::Validation(format!("asset id {asset_id:?} is not numeric")))?;
        self.encode(asset_id)
    }

    pub fn decode(&self, code: &str) -> Result<u64, MediaError> {
        let token = URL_SAFE_NO_PAD
            .decode(code.trim())
            .map_err(|_| MediaError::InvalidAssetCode)?;
        if token.len() <= NONCE_LEN {
            return Err(MediaError::InvalidAssetCode);
        }
        let (nonce, ciphertext) = token.split_at(NONCE_LEN);
        let plaintext = self
            .cipher
            .decrypt(Nonce::from_slice(nonce), ciphertext)
            .map_err(|_| MediaError::InvalidAssetCode)?;
        if plaintext.len() > 8 {
            return Err(MediaError::InvalidAssetCode);
        }
        Ok(plaintext
            .iter()
            .fold(0u64, |value, byte| (value << 8) | u64::from(*byte)))
    }
}

#[cfg(test)]
mod tests {
    use super::AssetCodec;
    use crate::error::MediaError;
    use base64::engine::general_purpose::URL_SAFE_NO_PAD;
    use base64::Engine as _;

    const KEY: &str = "000102030405060708090a0b0c0d0e0f101112131415161718191a1b1c1d1e1f";

    #[test]
    fn test_encode_decode_restores_asset_id() {
        let codec = AssetCodec::from_hex_key(KEY).expect("valid key");
        for asset_id in [0u64, 1, 255, 256, 612_345_678, u64::MAX] {
            let code = codec.encode(asset_id).expect("encode");
            assert!(code
                .chars()
                .all(|ch| ch.is_ascii_alphanumeric() || ch == '-' || ch == '_'));
            assert_eq!(codec.decode(&code).ok(), Some(asset_id));
        }
    }

    #[test]
    fn test_codes_are_randomized_per_encode() {
        let codec = AssetCodec::from_hex_key(KEY).expect("valid key");
        let first = codec.encode(612_345_678).expect("encode");
        let second = codec.encode(612_345_678).expect("encode");
        assert_ne!(first, second);
    }

    #[test]
    fn test_tampered_or_foreign_codes_are_rejected() {
        let codec = AssetCodec::from_hex_key(KEY).expect("valid key");
        let code = codec.encode(42).expect("encode");
        let mut bytes = URL_SAFE_NO_PAD.decode(&code).expect("base64");
        let last = bytes.len() - 1;
        bytes[last] ^= 0x01;
        let tampered = URL_SAFE_NO_PAD.encode(bytes);
        assert!(matches!(
            codec.decode(&tampered),
            Err(MediaError::InvalidAssetCode)
        ));

        let other_key = AssetCodec::generate_key_hex().expect("random key");
        let other = AssetCodec::from_hex_key(&other_key).expect("valid key");
        assert!(other.decode(&code).is_err());
        assert!(codec.decode("not a code!").is_err());
        assert!(codec.decode("").is_err());
    }

    #[test]
    fn test_rejects_malformed_keys_and_ids() {
        assert!(AssetCodec::from_hex_key("abcd").is_err());
        assert!(AssetCodec::from_hex_key(&"zz".repeat(32)).is_err());
        let codec = AssetCodec::from_hex_key(KEY).expect("valid key");
        assert!(matches!(
            codec.encode_str("12a"),
            Err(MediaError::Validation(_))
        ));
        let code = codec.encode_str(" 98765 ").expect("numeric id");
        assert_eq!(codec.decode(&code).ok(), Some(98_765));
    }
}
