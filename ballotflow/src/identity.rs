use crate::*;
use ed25519_dalek::ExpandedSecretKey;
use ed25519_dalek::PublicKey;
use ed25519_dalek::SecretKey;
use ed25519_dalek::Signature;
use hkdf::Hkdf;
use sha2::Sha256;

/// Reference to a key held by an identity provider (derivation index)
pub type KeyRef = u32;

/// Holds entity and voter key material and signs on their behalf.
///
/// Key material never leaves the provider; callers only ever see public keys,
/// addresses and signatures.
pub trait IdentityProvider {
    fn public_key(&self, key: KeyRef) -> Result<PublicKey, Error>;

    fn sign(&self, payload: &[u8], key: KeyRef) -> Result<Signature, Error>;

    /// Account address of the key: the last 20 bytes of the public key digest
    fn address(&self, key: KeyRef) -> Result<Address, Error> {
        let public_key = self.public_key(key)?;
        Ok(address_of(&public_key))
    }
}

pub fn address_of(public_key: &PublicKey) -> Address {
    let digest = sha256(&[public_key.as_bytes()]);
    let mut address = [0u8; 20];
    address.copy_from_slice(&digest[12..]);
    Address(address)
}

/// Derivation path for the key at `index`
pub fn derivation_path(index: KeyRef) -> String {
    format!("m/44'/60'/0'/0/{}", index)
}

/// Deterministic keyring deriving ed25519 keys from a seed.
///
/// Key 0 is conventionally the entity, keys 1..=N the voters.
#[derive(Clone)]
pub struct Keyring {
    seed: Vec<u8>,
    max_index: Option<KeyRef>,
}

impl Keyring {
    pub fn from_seed(seed: &[u8]) -> Self {
        Keyring {
            seed: seed.to_vec(),
            max_index: None,
        }
    }

    /// Restrict the keyring to keys `0..=max_index`
    pub fn with_max_index(mut self, max_index: KeyRef) -> Self {
        self.max_index = Some(max_index);
        self
    }

    fn secret_key(&self, key: KeyRef) -> Result<SecretKey, Error> {
        if let Some(max) = self.max_index {
            if key > max {
                return Err(Error::UnknownKey(key));
            }
        }

        let hk = Hkdf::<Sha256>::new(Some(&b"ballotflow keyring"[..]), &self.seed);
        let mut okm = [0u8; 32];
        hk.expand(derivation_path(key).as_bytes(), &mut okm)
            .map_err(|_| Error::UnknownKey(key))?;

        Ok(SecretKey::from_bytes(&okm)?)
    }
}

impl IdentityProvider for Keyring {
    fn public_key(&self, key: KeyRef) -> Result<PublicKey, Error> {
        let secret = self.secret_key(key)?;
        Ok((&secret).into())
    }

    fn sign(&self, payload: &[u8], key: KeyRef) -> Result<Signature, Error> {
        let secret = self.secret_key(key)?;
        let public: PublicKey = (&secret).into();
        let expanded: ExpandedSecretKey = (&secret).into();
        Ok(expanded.sign(payload, &public))
    }
}

#[cfg(test)]
mod tests {

    use super::*;

    #[test]
    fn test_keyring_is_deterministic() {
        let keyring = Keyring::from_seed(b"whale pyramid cross pilot");
        let again = Keyring::from_seed(b"whale pyramid cross pilot");

        assert_eq!(keyring.public_key(3).unwrap(), again.public_key(3).unwrap());
        assert_ne!(keyring.public_key(3).unwrap(), keyring.public_key(4).unwrap());
        assert_eq!(keyring.address(1).unwrap(), again.address(1).unwrap());

        let other = Keyring::from_seed(b"another seed");
        assert_ne!(keyring.public_key(0).unwrap(), other.public_key(0).unwrap());
    }

    #[test]
    fn test_keyring_signs() {
        let keyring = Keyring::from_seed(b"seed").with_max_index(2);
        let public = keyring.public_key(2).unwrap();
        let sig = keyring.sign(b"hello", 2).unwrap();
        public.verify_strict(b"hello", &sig).unwrap();
        assert!(public.verify_strict(b"goodbye", &sig).is_err());

        assert!(matches!(keyring.public_key(3), Err(Error::UnknownKey(3))));
    }

    #[test]
    fn test_derivation_path() {
        assert_eq!(derivation_path(7), "m/44'/60'/0'/0/7");
    }
}
