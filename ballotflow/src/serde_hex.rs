use ed25519_dalek::PublicKey;
use ed25519_dalek::Signature;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::borrow::Cow;
use std::convert::TryFrom;

pub use hex_buffer_serde::Hex;

// a single-purpose type for use in `#[serde(with)]`
pub enum EdPublicKeyHex {}

impl Hex<PublicKey> for EdPublicKeyHex {
    type Error = String;

    fn create_bytes(public_key: &PublicKey) -> Cow<'_, [u8]> {
        public_key.as_ref().into()
    }

    fn from_bytes(bytes: &[u8]) -> Result<PublicKey, String> {
        PublicKey::from_bytes(bytes).map_err(|e| format!("{}", e))
    }
}

// a single-purpose type for use in `#[serde(with)]`
pub enum EdSignatureHex {}

impl Hex<Signature> for EdSignatureHex {
    type Error = String;

    fn create_bytes(sig: &Signature) -> Cow<'_, [u8]> {
        let bytes = sig.to_bytes().to_vec();
        Cow::from(bytes)
    }

    fn from_bytes(bytes: &[u8]) -> Result<Signature, String> {
        Signature::try_from(bytes).map_err(|e| format!("{}", e))
    }
}

#[derive(Serialize, Deserialize)]
struct HexKey(#[serde(with = "EdPublicKeyHex")] PublicKey);

/// Key lists, each entry encoded with `EdPublicKeyHex`
pub mod ed_public_keys_hex {
    use super::*;

    pub fn serialize<S>(keys: &[PublicKey], serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.collect_seq(keys.iter().map(|key| HexKey(*key)))
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Vec<PublicKey>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let keys = Vec::<HexKey>::deserialize(deserializer)?;
        Ok(keys.into_iter().map(|key| key.0).collect())
    }
}

#[cfg(test)]
mod tests {

    use super::*;

    #[derive(Serialize, Deserialize, Debug, PartialEq)]
    struct Admins {
        #[serde(with = "EdPublicKeyHex")]
        owner: PublicKey,
        #[serde(with = "ed_public_keys_hex")]
        keys: Vec<PublicKey>,
    }

    #[test]
    fn test_keys_as_hex_strings() {
        let (_, owner) = crate::generate_keypair();
        let (_, other) = crate::generate_keypair();
        let admins = Admins {
            owner,
            keys: vec![owner, other],
        };

        let json = serde_json::to_value(&admins).unwrap();
        assert_eq!(json["owner"], hex::encode(owner.as_bytes()));
        assert_eq!(json["keys"][1], hex::encode(other.as_bytes()));

        let back: Admins = serde_json::from_value(json).unwrap();
        assert_eq!(back, admins);

        // Short keys are refused
        let bad = serde_json::json!({ "owner": "abcd", "keys": [] });
        assert!(serde_json::from_value::<Admins>(bad).is_err());
    }
}
