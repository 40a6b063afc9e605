use crate::*;
use ed25519_dalek::PublicKey;
use log::{debug, info, warn};
use std::collections::BTreeSet;

/// Digest a voter public key into a census claim
pub fn digest_claim(public_key: &PublicKey) -> Claim {
    Claim(sha256(&[public_key.as_bytes()]))
}

fn leaf_hash(claim: &Claim) -> [u8; 32] {
    sha256(&[&[0x00u8][..], claim.as_bytes()])
}

fn node_hash(left: &[u8; 32], right: &[u8; 32]) -> [u8; 32] {
    sha256(&[&[0x01u8][..], &left[..], &right[..]])
}

fn next_level(level: &[[u8; 32]]) -> Vec<[u8; 32]> {
    level
        .chunks(2)
        .map(|pair| match pair {
            [left, right] => node_hash(left, right),
            [single] => *single,
            _ => unreachable!(),
        })
        .collect()
}

/// Merkle commitment over a census claim set.
///
/// Claims are kept sorted and de-duplicated, so the root is a function of
/// the claim *set*: inserting a claim that is already present leaves the
/// root unchanged. An odd node at the end of a level is promoted as is.
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
pub struct MerkleTree {
    claims: BTreeSet<Claim>,
}

impl MerkleTree {
    pub fn new<T: IntoIterator<Item = Claim>>(claims: T) -> Self {
        MerkleTree {
            claims: claims.into_iter().collect(),
        }
    }

    /// Insert a claim, returning false if it was already present
    pub fn insert(&mut self, claim: Claim) -> bool {
        self.claims.insert(claim)
    }

    pub fn contains(&self, claim: &Claim) -> bool {
        self.claims.contains(claim)
    }

    pub fn len(&self) -> usize {
        self.claims.len()
    }

    pub fn is_empty(&self) -> bool {
        self.claims.is_empty()
    }

    pub fn claims(&self) -> impl Iterator<Item = &Claim> {
        self.claims.iter()
    }

    fn leaves(&self) -> Vec<[u8; 32]> {
        self.claims.iter().map(leaf_hash).collect()
    }

    /// Root of the tree. The empty tree has an all-zero root.
    pub fn root(&self) -> CensusRoot {
        let mut level = self.leaves();
        if level.is_empty() {
            return CensusRoot([0; 32]);
        }
        while level.len() > 1 {
            level = next_level(&level);
        }
        CensusRoot(level[0])
    }

    /// Membership proof for `claim`, or None if it is not in the tree
    pub fn prove(&self, claim: &Claim) -> Option<MerkleProof> {
        let mut index = self.claims.iter().position(|c| c == claim)?;
        let mut level = self.leaves();
        let mut siblings = Vec::new();

        while level.len() > 1 {
            let sibling = index ^ 1;
            if sibling < level.len() {
                let side = if index % 2 == 0 { Side::Right } else { Side::Left };
                siblings.push(ProofStep {
                    side,
                    hash: MerkleNode(level[sibling]),
                });
            }
            level = next_level(&level);
            index /= 2;
        }

        Some(MerkleProof { siblings })
    }
}

/// Which side of the running hash a sibling sits on
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Side {
    Left,
    Right,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct ProofStep {
    pub side: Side,
    pub hash: MerkleNode,
}

/// Proof that a claim belongs to the claim set committed by one specific root
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct MerkleProof {
    pub siblings: Vec<ProofStep>,
}

impl MerkleProof {
    /// Recompute the root from `claim` and compare it with `root`
    pub fn verify(&self, root: &CensusRoot, claim: &Claim) -> bool {
        let mut acc = leaf_hash(claim);
        for step in self.siblings.iter() {
            acc = match step.side {
                Side::Left => node_hash(&step.hash.0, &acc),
                Side::Right => node_hash(&acc, &step.hash.0),
            };
        }
        acc == root.0
    }
}

/// Request to create a named census
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct CensusCreate {
    pub name: String,

    #[serde(with = "ed_public_keys_hex")]
    pub admin_keys: Vec<PublicKey>,

    #[serde(with = "EdPublicKeyHex")]
    pub public_key: PublicKey,
}

impl CensusCreate {
    /// The census id the network assigns to this request
    pub fn census_id(&self) -> CensusId {
        CensusId(sha256(&[self.public_key.as_bytes(), self.name.as_bytes()]))
    }
}

impl Signable for CensusCreate {
    fn public(&self) -> PublicKey {
        self.public_key
    }
}

/// Request to add claims to a census
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct CensusAddClaims {
    pub census_id: CensusId,
    pub claims: Vec<Claim>,

    #[serde(with = "EdPublicKeyHex")]
    pub public_key: PublicKey,
}

impl Signable for CensusAddClaims {
    fn public(&self) -> PublicKey {
        self.public_key
    }
}

/// Request to make the current claim set of a census public
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct CensusPublish {
    pub census_id: CensusId,

    #[serde(with = "EdPublicKeyHex")]
    pub public_key: PublicKey,
}

impl Signable for CensusPublish {
    fn public(&self) -> PublicKey {
        self.public_key
    }
}

/// Outcome of adding a batch of claims
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
pub struct AddClaimsResult {
    /// Number of claims newly added to the census
    pub added: usize,
    pub invalid_claims: Vec<InvalidClaim>,
}

/// A census whose claim set has been published
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct PublishedCensus {
    pub census_id: CensusId,
    pub root: CensusRoot,
    pub locator: String,
    pub size: u64,
    pub invalid_claims: Vec<InvalidClaim>,
}

/// Builds and publishes a census on behalf of an admin identity
pub struct CensusBuilder<'a, G: ?Sized, I: ?Sized> {
    gateway: &'a G,
    identity: &'a I,
    admin: KeyRef,
}

impl<'a, G, I> CensusBuilder<'a, G, I>
where
    G: NetworkGateway + ?Sized,
    I: IdentityProvider + ?Sized,
{
    pub fn new(gateway: &'a G, identity: &'a I, admin: KeyRef) -> Self {
        CensusBuilder {
            gateway,
            identity,
            admin,
        }
    }

    /// Create a census. Fails with `DuplicateCensusName` if the name is taken.
    pub async fn create(&self, name: &str, admin_keys: &[PublicKey]) -> Result<CensusId, Error> {
        let request = CensusCreate {
            name: name.to_string(),
            admin_keys: admin_keys.to_vec(),
            public_key: self.identity.public_key(self.admin)?,
        };
        let request = Signed::sign(self.identity, self.admin, request)?;
        let census_id = self.gateway.census_create(request).await?;
        info!("Added census \"{}\" with ID {}", name, census_id);
        Ok(census_id)
    }

    /// Digest hex-encoded voter public keys into claims and add them.
    ///
    /// Malformed keys are reported in `invalid_claims` and the valid ones are
    /// still committed.
    pub async fn add_claims<S: AsRef<str>>(
        &self,
        census_id: CensusId,
        voter_keys: &[S],
    ) -> Result<AddClaimsResult, Error> {
        let mut invalid_claims = Vec::new();
        let mut claims = Vec::with_capacity(voter_keys.len());
        // Position in `voter_keys` of each entry in `claims`
        let mut positions = Vec::with_capacity(voter_keys.len());

        for (index, key) in voter_keys.iter().enumerate() {
            let key = key.as_ref();
            match parse_public_key(key) {
                Ok(public_key) => {
                    claims.push(digest_claim(&public_key));
                    positions.push(index);
                }
                Err(reason) => invalid_claims.push(InvalidClaim {
                    index,
                    key: key.to_string(),
                    reason,
                }),
            }
        }

        let mut result = AddClaimsResult::default();
        if !claims.is_empty() {
            let request = CensusAddClaims {
                census_id,
                claims,
                public_key: self.identity.public_key(self.admin)?,
            };
            let request = Signed::sign(self.identity, self.admin, request)?;
            result = self.gateway.census_add_claims(request).await?;

            // The network reports positions within the batch it received
            for invalid in result.invalid_claims.iter_mut() {
                if let Some(&original) = positions.get(invalid.index) {
                    invalid.key = voter_keys[original].as_ref().to_string();
                    invalid.index = original;
                }
            }
        }
        result.invalid_claims.extend(invalid_claims);
        result.invalid_claims.sort_by_key(|c| c.index);

        info!("Added {} claims to {}", result.added, census_id);
        if !result.invalid_claims.is_empty() {
            warn!("Invalid claims: {:?}", result.invalid_claims);
        }
        Ok(result)
    }

    /// Current root of the census. Always fetched, never cached.
    pub async fn root(&self, census_id: CensusId) -> Result<CensusRoot, Error> {
        let root = self.gateway.census_root(census_id).await?;
        debug!("Census {} root is {}", census_id, root);
        Ok(root)
    }

    /// Publish the current claim set, returning its locator
    pub async fn publish(&self, census_id: CensusId) -> Result<String, Error> {
        let request = CensusPublish {
            census_id,
            public_key: self.identity.public_key(self.admin)?,
        };
        let request = Signed::sign(self.identity, self.admin, request)?;
        let locator = self.gateway.census_publish(request).await?;
        info!("Census {} published on {}", census_id, locator);
        Ok(locator)
    }

    /// Membership proof for `claim` against the snapshot committed by `root`
    pub async fn prove_membership(
        &self,
        root: CensusRoot,
        claim: Claim,
    ) -> Result<MerkleProof, Error> {
        prove_membership(self.gateway, root, claim).await
    }

    /// Number of claims in the snapshot committed by `root`
    pub async fn size(&self, root: CensusRoot) -> Result<u64, Error> {
        self.gateway.census_size(root).await
    }

    /// Create, populate and publish a census, fetching the root after publishing
    pub async fn build(
        &self,
        name: &str,
        admin_keys: &[PublicKey],
        voter_keys: &[String],
    ) -> Result<PublishedCensus, Error> {
        let census_id = self.create(name, admin_keys).await?;
        let added = self.add_claims(census_id, voter_keys).await?;
        let locator = self.publish(census_id).await?;
        let root = self.root(census_id).await?;
        let size = self.size(root).await?;
        info!("Census Merkle Root {} ({} claims)", root, size);

        Ok(PublishedCensus {
            census_id,
            root,
            locator,
            size,
            invalid_claims: added.invalid_claims,
        })
    }
}

/// Fetch a membership proof from the network and check it locally.
///
/// Any failure to obtain a valid proof is reported as `ProofGenerationFailed`.
pub async fn prove_membership<G: NetworkGateway + ?Sized>(
    gateway: &G,
    root: CensusRoot,
    claim: Claim,
) -> Result<MerkleProof, Error> {
    let proof = match gateway.census_prove_membership(root, claim).await {
        Ok(proof) => proof,
        Err(Error::ConnectionFailure(e)) => return Err(Error::ConnectionFailure(e)),
        Err(e) => {
            debug!("Proof for {} against {} failed: {}", claim, root, e);
            return Err(Error::ProofGenerationFailed { root, claim });
        }
    };
    if !proof.verify(&root, &claim) {
        return Err(Error::ProofGenerationFailed { root, claim });
    }
    Ok(proof)
}

/// Check a membership proof locally against a root snapshot
pub fn verify_membership(root: &CensusRoot, claim: &Claim, proof: &MerkleProof) -> bool {
    proof.verify(root, claim)
}

fn parse_public_key(key: &str) -> Result<PublicKey, String> {
    let key = key.strip_prefix("0x").unwrap_or(key);
    let bytes = hex::decode(key).map_err(|e| format!("invalid hex: {}", e))?;
    PublicKey::from_bytes(&bytes).map_err(|e| format!("invalid public key: {}", e))
}
