use crate::*;
use serde::{de, Deserialize, Deserializer, Serialize, Serializer};
use std::convert::TryInto;
use std::str::FromStr;

/// Define a fixed-length opaque identifier, encoded on the wire as lowercase hex.
macro_rules! hex_identifier {
    ($(#[$meta:meta])* $name:ident, $len:expr) => {
        $(#[$meta])*
        #[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
        pub struct $name(pub [u8; $len]);

        impl $name {
            pub const LEN: usize = $len;

            pub fn from_bytes(bytes: &[u8]) -> Result<Self, Error> {
                let array: [u8; $len] = bytes.try_into().map_err(|_| Error::IdentifierBadLen)?;
                Ok($name(array))
            }

            pub fn to_array(&self) -> [u8; $len] {
                self.0
            }

            pub fn as_bytes(&self) -> &[u8] {
                &self.0
            }
        }

        impl FromStr for $name {
            type Err = Error;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                let s = s.strip_prefix("0x").unwrap_or(s);
                let bytes = hex::decode(s).map_err(|_| Error::IdentifierBadHex)?;
                $name::from_bytes(&bytes)
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
                write!(f, "{}", hex::encode(self.0))
            }
        }

        impl Serialize for $name {
            fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
            where
                S: Serializer,
            {
                serializer.serialize_str(&self.to_string())
            }
        }

        impl<'de> Deserialize<'de> for $name {
            fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
            where
                D: Deserializer<'de>,
            {
                let s = String::deserialize(deserializer)?;
                $name::from_str(&s).map_err(de::Error::custom)
            }
        }

        impl From<$name> for [u8; $len] {
            fn from(item: $name) -> Self {
                item.0
            }
        }

        impl AsRef<[u8]> for $name {
            fn as_ref(&self) -> &[u8] {
                &self.0
            }
        }
    };
}

hex_identifier!(
    /// Identifier of a voting process, assigned by the network at creation
    ProcessId,
    32
);

hex_identifier!(
    /// Identifier of a census, derived from its admin key and name
    CensusId,
    32
);

hex_identifier!(
    /// Merkle root of a census claim set at a point in time
    CensusRoot,
    32
);

hex_identifier!(
    /// One-way digest of a voter public key, the unit stored in a census
    Claim,
    32
);

hex_identifier!(
    /// Deterministic per-(voter, process) value used to reject duplicate votes
    Nullifier,
    32
);

hex_identifier!(
    /// Hash of a node in a census Merkle tree
    MerkleNode,
    32
);

hex_identifier!(
    /// Identifier of an entity, derived from its address
    EntityId,
    32
);

hex_identifier!(
    /// Account address of an identity
    Address,
    20
);

impl EntityId {
    pub fn from_address(address: &Address) -> Self {
        EntityId(sha256(&[address.as_bytes()]))
    }
}
