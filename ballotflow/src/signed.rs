use crate::*;
use ed25519_dalek::PublicKey;
use ed25519_dalek::Signature;
use serde::Serialize;
use std::ops::Deref;

/// A payload that is signed before it is sent to the network
pub trait Signable: Serialize {
    /// The public key expected to have signed this payload
    fn public(&self) -> PublicKey;

    fn as_bytes(&self) -> Result<Vec<u8>, Error> {
        Ok(serde_cbor::to_vec(&self)?)
    }
}

/// A generic signed payload
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct Signed<T: Signable> {
    pub tx: T,

    #[serde(with = "EdSignatureHex")]
    pub sig: Signature,
}

impl<T: Signable> Signed<T> {
    /// Sign a payload with the identity's key, producing a Signed<T>
    pub fn sign<I: IdentityProvider + ?Sized>(
        identity: &I,
        key: KeyRef,
        payload: T,
    ) -> Result<Self, Error> {
        let public_key = identity.public_key(key)?;
        if public_key != payload.public() {
            return Err(Error::MismatchedPublicKeys);
        }

        let serialized = payload.as_bytes()?;
        let sig = identity.sign(&serialized, key)?;

        Ok(Signed { tx: payload, sig })
    }

    /// Verify the signature on a signed payload
    pub fn verify_signature(&self) -> Result<(), Error> {
        let serialized = self.tx.as_bytes()?;
        Ok(self.tx.public().verify_strict(&serialized, &self.sig)?)
    }

    /// Get the inner unsigned payload
    pub fn inner(&self) -> &T {
        &self.tx
    }
}

impl<T: Signable> AsRef<T> for Signed<T> {
    fn as_ref(&self) -> &T {
        &self.tx
    }
}

impl<T: Signable> Deref for Signed<T> {
    type Target = T;

    fn deref(&self) -> &Self::Target {
        &self.tx
    }
}
