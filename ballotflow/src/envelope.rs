use crate::*;
use ed25519_dalek::PublicKey;
use futures::stream::{self, StreamExt};
use log::{debug, info, warn};
use serde::ser::{SerializeStruct, Serializer};
use serde::Serialize;
use std::time::{Duration, SystemTime};

/// Nullifier of a voter in a process: one value per (voter, process) pair
pub fn nullifier(voter: &Address, process_id: &ProcessId) -> Nullifier {
    Nullifier(sha256(&[voter.as_bytes(), process_id.as_bytes()]))
}

/// Unsigned content of a vote envelope
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct PollVote {
    pub process_id: ProcessId,
    pub proof: MerkleProof,
    pub votes: Vec<u32>,

    #[serde(with = "EdPublicKeyHex")]
    pub public_key: PublicKey,
}

impl Signable for PollVote {
    fn public(&self) -> PublicKey {
        self.public_key
    }
}

/// A signed, proof-carrying vote
pub type VoteEnvelope = Signed<PollVote>;

impl Signed<PollVote> {
    pub fn nullifier(&self) -> Nullifier {
        nullifier(&address_of(&self.tx.public_key), &self.tx.process_id)
    }

    pub fn claim(&self) -> Claim {
        digest_claim(&self.tx.public_key)
    }
}

/// Bind a process, a membership proof and the voter's choices, signed by the voter
pub fn package_envelope<I: IdentityProvider + ?Sized>(
    identity: &I,
    voter: KeyRef,
    process_id: ProcessId,
    proof: MerkleProof,
    votes: &[u32],
) -> Result<VoteEnvelope, Error> {
    let vote = PollVote {
        process_id,
        proof,
        votes: votes.to_vec(),
        public_key: identity.public_key(voter)?,
    };
    Signed::sign(identity, voter, vote)
}

/// Acknowledgement of an accepted envelope
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct EnvelopeAck {
    pub nullifier: Nullifier,
    /// Block height at which the envelope was accepted
    pub block: u64,
}

/// Settlement status of an envelope
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Default)]
pub struct EnvelopeStatus {
    pub registered: bool,
    pub block: Option<u64>,
    pub timestamp: Option<SystemTime>,
}

/// How to confirm an envelope after submitting it
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Confirmation {
    /// Do not read the status back
    Skip,
    /// Read the status once; an unregistered envelope is not an error
    Once,
    /// Poll until registered, giving up after `max_attempts` reads
    UntilRegistered { max_attempts: u32 },
}

#[derive(Debug, Clone)]
pub struct SubmitOptions {
    /// Maximum number of voter pipelines in flight at once
    pub concurrency: usize,
    pub poll_interval: Duration,
    pub confirmation: Confirmation,
}

impl Default for SubmitOptions {
    fn default() -> Self {
        SubmitOptions {
            concurrency: 10,
            poll_interval: Duration::from_secs(10),
            confirmation: Confirmation::Skip,
        }
    }
}

/// What happened to one voter's envelope
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct EnvelopeReceipt {
    pub nullifier: Nullifier,
    pub submitted_block: u64,
    pub status: Option<EnvelopeStatus>,
}

#[derive(Debug)]
pub struct VoterOutcome {
    pub voter: KeyRef,
    pub result: Result<EnvelopeReceipt, Error>,
}

impl VoterOutcome {
    pub fn is_registered(&self) -> bool {
        match &self.result {
            Ok(receipt) => receipt.status.as_ref().map_or(false, |s| s.registered),
            Err(_) => false,
        }
    }
}

impl Serialize for VoterOutcome {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let mut state = serializer.serialize_struct("VoterOutcome", 3)?;
        state.serialize_field("voter", &self.voter)?;
        match &self.result {
            Ok(receipt) => {
                state.serialize_field("receipt", receipt)?;
                state.skip_field("error")?;
            }
            Err(e) => {
                state.skip_field("receipt")?;
                state.serialize_field("error", &e.to_string())?;
            }
        }
        state.end()
    }
}

/// Per-voter outcomes of a bulk submission, in the order voters were given
#[derive(Serialize, Debug, Default)]
pub struct BatchReport {
    pub outcomes: Vec<VoterOutcome>,
}

impl BatchReport {
    pub fn succeeded(&self) -> impl Iterator<Item = &VoterOutcome> {
        self.outcomes.iter().filter(|o| o.result.is_ok())
    }

    pub fn failed(&self) -> impl Iterator<Item = &VoterOutcome> {
        self.outcomes.iter().filter(|o| o.result.is_err())
    }

    pub fn registered(&self) -> usize {
        self.outcomes.iter().filter(|o| o.is_registered()).count()
    }
}

/// Builds, submits and confirms vote envelopes for voters of one identity provider
pub struct EnvelopeSubmitter<'a, G: ?Sized, I: ?Sized> {
    gateway: &'a G,
    identity: &'a I,
    options: SubmitOptions,
}

impl<'a, G, I> EnvelopeSubmitter<'a, G, I>
where
    G: NetworkGateway + ?Sized,
    I: IdentityProvider + ?Sized,
{
    pub fn new(gateway: &'a G, identity: &'a I, options: SubmitOptions) -> Self {
        EnvelopeSubmitter {
            gateway,
            identity,
            options,
        }
    }

    /// Fetch the process and make sure it is open
    async fn open_process(&self, process_id: ProcessId) -> Result<ProcessMetadata, Error> {
        let metadata = self.gateway.process_metadata(process_id).await?;
        let canceled = self.gateway.is_canceled(process_id).await?;
        let current_block = self.gateway.current_block_height().await?;
        let state = metadata.state_at(current_block, canceled);
        if state != ProcessState::Open {
            return Err(Error::WindowNotOpen(process_id, state));
        }
        Ok(metadata)
    }

    /// Submit a single voter's envelope. The process must already be open.
    pub async fn submit(
        &self,
        process_id: ProcessId,
        voter: KeyRef,
        votes: &[u32],
    ) -> Result<EnvelopeReceipt, Error> {
        let metadata = self.open_process(process_id).await?;
        self.pipeline(process_id, &metadata, voter, votes).await
    }

    /// Submit envelopes for all `voters` concurrently.
    ///
    /// A failing voter never affects the others; only a process that is not
    /// open fails the whole batch.
    pub async fn submit_batch(
        &self,
        process_id: ProcessId,
        voters: &[KeyRef],
        votes: &[u32],
    ) -> Result<BatchReport, Error> {
        let metadata = self.open_process(process_id).await?;
        info!("Submitting {} vote envelopes", voters.len());

        let metadata = &metadata;
        let mut outcomes: Vec<(usize, VoterOutcome)> = stream::iter(voters.iter().enumerate())
            .map(|(position, &voter)| async move {
                let result = self.pipeline(process_id, metadata, voter, votes).await;
                (position, VoterOutcome { voter, result })
            })
            .buffer_unordered(self.options.concurrency.max(1))
            .collect()
            .await;
        outcomes.sort_by_key(|(position, _)| *position);

        let report = BatchReport {
            outcomes: outcomes.into_iter().map(|(_, outcome)| outcome).collect(),
        };
        info!(
            "{} of {} envelopes accepted",
            report.succeeded().count(),
            report.outcomes.len()
        );
        Ok(report)
    }

    /// Wait for the process to open, then submit for all `voters`
    pub async fn submit_batch_when_open(
        &self,
        process_id: ProcessId,
        voters: &[KeyRef],
        votes: &[u32],
        timeout: Option<Duration>,
    ) -> Result<BatchReport, Error> {
        wait_until_open(self.gateway, process_id, self.options.poll_interval, timeout).await?;
        self.submit_batch(process_id, voters, votes).await
    }

    /// One voter's steps, strictly in order: claim, proof, package, submit, confirm
    async fn pipeline(
        &self,
        process_id: ProcessId,
        metadata: &ProcessMetadata,
        voter: KeyRef,
        votes: &[u32],
    ) -> Result<EnvelopeReceipt, Error> {
        let public_key = self.identity.public_key(voter)?;
        let claim = digest_claim(&public_key);

        let proof = prove_membership(self.gateway, metadata.census.merkle_root, claim).await?;
        let envelope = package_envelope(self.identity, voter, process_id, proof, votes)?;
        let nullifier = envelope.nullifier();

        let ack = match self.gateway.submit_envelope(envelope).await {
            Ok(ack) => ack,
            Err(e) => {
                warn!("Voter {} envelope rejected: {}", voter, e);
                return Err(e);
            }
        };
        debug!("Voter {} envelope {} accepted at block {}", voter, nullifier, ack.block);

        let status = match self.options.confirmation {
            Confirmation::Skip => None,
            Confirmation::Once => Some(self.status(process_id, nullifier).await?),
            Confirmation::UntilRegistered { max_attempts } => {
                Some(self.poll_status(process_id, nullifier, max_attempts).await?)
            }
        };

        Ok(EnvelopeReceipt {
            nullifier,
            submitted_block: ack.block,
            status,
        })
    }

    /// Read an envelope's status once. Not yet registered is a normal answer.
    pub async fn status(
        &self,
        process_id: ProcessId,
        nullifier: Nullifier,
    ) -> Result<EnvelopeStatus, Error> {
        self.gateway.envelope_status(process_id, nullifier).await
    }

    /// Poll an envelope's status until it is registered
    pub async fn poll_status(
        &self,
        process_id: ProcessId,
        nullifier: Nullifier,
        max_attempts: u32,
    ) -> Result<EnvelopeStatus, Error> {
        for attempt in 1..=max_attempts.max(1) {
            let status = self.status(process_id, nullifier).await?;
            if status.registered {
                info!("- Registered: {}", status.registered);
                info!("- Block: {:?}", status.block);
                info!("- Date: {:?}", status.timestamp);
                return Ok(status);
            }
            debug!("Envelope {} not registered yet (attempt {})", nullifier, attempt);
            tokio::time::sleep(self.options.poll_interval).await;
        }
        Err(Error::EnvelopeNotRegistered(nullifier))
    }
}

#[cfg(test)]
mod tests {

    use super::*;

    #[test]
    fn test_nullifier_is_deterministic() {
        let keyring = Keyring::from_seed(b"nullifier");
        let process_id = ProcessId([1; 32]);
        let other_process = ProcessId([2; 32]);
        let voter_1 = keyring.address(1).unwrap();
        let voter_2 = keyring.address(2).unwrap();

        assert_eq!(nullifier(&voter_1, &process_id), nullifier(&voter_1, &process_id));
        assert_ne!(nullifier(&voter_1, &process_id), nullifier(&voter_2, &process_id));
        assert_ne!(nullifier(&voter_1, &process_id), nullifier(&voter_1, &other_process));

        let distinct: std::collections::HashSet<Nullifier> = (1..=50)
            .map(|i| nullifier(&keyring.address(i).unwrap(), &process_id))
            .collect();
        assert_eq!(distinct.len(), 50);
    }

    #[test]
    fn test_package_envelope() {
        let keyring = Keyring::from_seed(b"envelope");
        let claims: Vec<Claim> = (1..=3)
            .map(|i| digest_claim(&keyring.public_key(i).unwrap()))
            .collect();
        let tree = MerkleTree::new(claims.clone());
        let process_id = ProcessId([3; 32]);

        let voter_claim = digest_claim(&keyring.public_key(2).unwrap());
        let proof = tree.prove(&voter_claim).unwrap();
        let envelope = package_envelope(&keyring, 2, process_id, proof, &[1, 2]).unwrap();

        envelope.verify_signature().unwrap();
        assert_eq!(envelope.claim(), voter_claim);
        assert!(envelope.proof.verify(&tree.root(), &envelope.claim()));
        assert_eq!(
            envelope.nullifier(),
            nullifier(&keyring.address(2).unwrap(), &process_id)
        );
    }

    #[test]
    fn test_outcome_serialization() {
        let ok = VoterOutcome {
            voter: 1,
            result: Ok(EnvelopeReceipt {
                nullifier: Nullifier([4; 32]),
                submitted_block: 12,
                status: None,
            }),
        };
        let failed = VoterOutcome {
            voter: 2,
            result: Err(Error::DuplicateVote(Nullifier([5; 32]))),
        };

        let json = serde_json::to_value(&BatchReport {
            outcomes: vec![ok, failed],
        })
        .unwrap();
        assert_eq!(json["outcomes"][0]["receipt"]["submitted_block"], 12);
        assert!(json["outcomes"][1]["error"]
            .as_str()
            .unwrap()
            .contains("already submitted"));
    }
}
