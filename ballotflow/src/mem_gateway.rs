use crate::*;
use ed25519_dalek::PublicKey;
use indexmap::IndexMap;
use log::debug;
use std::collections::HashMap;
use std::convert::TryFrom;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard};
use std::time::{Duration, SystemTime};
use tokio::sync::{Semaphore, SemaphorePermit};
use tokio::time::Instant;

/// Height of the first block produced by a fresh gateway
pub const GENESIS_HEIGHT: u64 = 1000;

struct Census {
    name: String,
    owner: PublicKey,
    admins: Vec<PublicKey>,
    tree: MerkleTree,
}

impl Census {
    fn is_admin(&self, key: &PublicKey) -> bool {
        self.owner == *key || self.admins.contains(key)
    }
}

struct EnvelopeRecord {
    votes: Vec<u32>,
    block: u64,
}

struct Process {
    metadata: ProcessMetadata,
    owner: PublicKey,
    canceled: bool,
    envelopes: IndexMap<Nullifier, EnvelopeRecord>,
}

#[derive(Default)]
struct State {
    entities: HashMap<Address, (EntityMetadata, String)>,
    censuses: HashMap<CensusId, Census>,
    published: HashMap<CensusRoot, MerkleTree>,
    processes: HashMap<ProcessId, Process>,
    extra_blocks: u64,
}

/// An in-memory network, producing one block every `block_time`.
///
/// Block production follows the tokio clock, so tests running with a paused
/// clock drive the chain with virtual time. Envelopes are included in the
/// block after the one they were accepted in.
pub struct MemGateway {
    state: Mutex<State>,
    genesis: Instant,
    genesis_time: SystemTime,
    block_time: Duration,
    latency: Duration,
    capacity: Semaphore,
    connected: AtomicBool,
    in_flight: AtomicUsize,
    peak_in_flight: AtomicUsize,
    cancel_requests: AtomicU64,
}

struct InFlight<'a> {
    counter: &'a AtomicUsize,
    _permit: SemaphorePermit<'a>,
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.counter.fetch_sub(1, Ordering::SeqCst);
    }
}

impl Default for MemGateway {
    fn default() -> Self {
        MemGateway::new(Duration::from_secs(10), 8)
    }
}

impl MemGateway {
    /// A gateway producing a block every `block_time` and serving at most
    /// `capacity` requests at once
    pub fn new(block_time: Duration, capacity: usize) -> Self {
        MemGateway {
            state: Mutex::new(State::default()),
            genesis: Instant::now(),
            genesis_time: SystemTime::now(),
            block_time: block_time.max(Duration::from_millis(1)),
            latency: Duration::from_millis(50),
            capacity: Semaphore::new(capacity.max(1)),
            connected: AtomicBool::new(false),
            in_flight: AtomicUsize::new(0),
            peak_in_flight: AtomicUsize::new(0),
            cancel_requests: AtomicU64::new(0),
        }
    }

    /// Simulated round trip time of every request
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    /// Produce `blocks` extra blocks immediately
    pub fn advance_blocks(&self, blocks: u64) -> Result<(), Error> {
        self.state()?.extra_blocks += blocks;
        Ok(())
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    /// Number of cancel requests that reached the network
    pub fn cancel_requests(&self) -> u64 {
        self.cancel_requests.load(Ordering::SeqCst)
    }

    /// Metadata and locator last published by the entity at `address`
    pub fn entity(&self, address: &Address) -> Result<Option<(EntityMetadata, String)>, Error> {
        Ok(self.state()?.entities.get(address).cloned())
    }

    /// Highest number of requests that were in flight at the same time
    pub fn peak_in_flight(&self) -> usize {
        self.peak_in_flight.load(Ordering::SeqCst)
    }

    fn state(&self) -> Result<MutexGuard<'_, State>, Error> {
        self.state
            .lock()
            .map_err(|_| Error::ConnectionFailure("gateway state poisoned".to_string()))
    }

    async fn round_trip(&self) -> Result<InFlight<'_>, Error> {
        let permit = self
            .capacity
            .acquire()
            .await
            .map_err(|_| Error::ConnectionFailure("gateway closed".to_string()))?;
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak_in_flight.fetch_max(now, Ordering::SeqCst);
        let guard = InFlight {
            counter: &self.in_flight,
            _permit: permit,
        };

        if self.latency > Duration::from_secs(0) {
            tokio::time::sleep(self.latency).await;
        }
        if !self.is_connected() {
            return Err(Error::ConnectionFailure("not connected".to_string()));
        }
        Ok(guard)
    }

    fn height(&self, state: &State) -> u64 {
        let elapsed = Instant::now().duration_since(self.genesis);
        let produced = elapsed.as_millis() / self.block_time.as_millis();
        GENESIS_HEIGHT + produced as u64 + state.extra_blocks
    }

    fn time_at_block(&self, block: u64) -> Result<SystemTime, Error> {
        let blocks = block.saturating_sub(GENESIS_HEIGHT);
        let millis = self.block_time.as_millis().saturating_mul(blocks as u128);
        u64::try_from(millis)
            .ok()
            .and_then(|millis| self.genesis_time.checked_add(Duration::from_millis(millis)))
            .ok_or(Error::TimeOutOfRange(block))
    }

    fn block_at_time(&self, time: SystemTime) -> u64 {
        let elapsed = time
            .duration_since(self.genesis_time)
            .unwrap_or_default();
        GENESIS_HEIGHT + (elapsed.as_millis() / self.block_time.as_millis()) as u64
    }

    fn verify<T: Signable>(request: &Signed<T>) -> Result<(), Error> {
        request.verify_signature()
    }
}

impl NetworkGateway for MemGateway {
    async fn connect(&self) -> Result<(), Error> {
        self.connected.store(true, Ordering::SeqCst);
        debug!("Connected to the in-memory gateway");
        Ok(())
    }

    async fn disconnect(&self) -> Result<(), Error> {
        self.connected.store(false, Ordering::SeqCst);
        debug!("Disconnected from the in-memory gateway");
        Ok(())
    }

    async fn current_block_height(&self) -> Result<u64, Error> {
        let _guard = self.round_trip().await?;
        let state = self.state()?;
        Ok(self.height(&state))
    }

    async fn estimate_block_at_time(&self, time: SystemTime) -> Result<u64, Error> {
        let _guard = self.round_trip().await?;
        let state = self.state()?;
        Ok(self.block_at_time(time).saturating_add(state.extra_blocks))
    }

    async fn estimate_time_at_block(&self, block: u64) -> Result<SystemTime, Error> {
        let _guard = self.round_trip().await?;
        let state = self.state()?;
        self.time_at_block(block.saturating_sub(state.extra_blocks))
    }

    async fn entity_update(&self, update: Signed<EntityUpdate>) -> Result<String, Error> {
        let _guard = self.round_trip().await?;
        Self::verify(&update)?;
        if update.address != address_of(&update.public_key) {
            return Err(Error::Unauthorized);
        }

        let EntityUpdate {
            address, metadata, ..
        } = update.tx;
        let locator = metadata.locator()?;
        let mut state = self.state()?;
        state.entities.insert(address, (metadata, locator.clone()));
        Ok(locator)
    }

    async fn census_create(&self, request: Signed<CensusCreate>) -> Result<CensusId, Error> {
        let _guard = self.round_trip().await?;
        Self::verify(&request)?;

        let census_id = request.census_id();
        let mut state = self.state()?;
        if state.censuses.contains_key(&census_id) {
            return Err(Error::DuplicateCensusName(request.name.clone()));
        }

        let CensusCreate {
            name,
            admin_keys,
            public_key,
        } = request.tx;
        state.censuses.insert(
            census_id,
            Census {
                name,
                owner: public_key,
                admins: admin_keys,
                tree: MerkleTree::default(),
            },
        );
        Ok(census_id)
    }

    async fn census_add_claims(
        &self,
        request: Signed<CensusAddClaims>,
    ) -> Result<AddClaimsResult, Error> {
        let _guard = self.round_trip().await?;
        Self::verify(&request)?;

        let mut state = self.state()?;
        let census = state
            .censuses
            .get_mut(&request.census_id)
            .ok_or(Error::CensusNotFound(request.census_id))?;
        if !census.is_admin(&request.public_key) {
            return Err(Error::Unauthorized);
        }

        let mut result = AddClaimsResult::default();
        for (index, claim) in request.claims.iter().enumerate() {
            // The all-zero value is reserved for the empty tree
            if claim.0 == [0; 32] {
                result.invalid_claims.push(InvalidClaim {
                    index,
                    key: claim.to_string(),
                    reason: "reserved claim value".to_string(),
                });
            } else if census.tree.insert(*claim) {
                result.added += 1;
            }
        }
        debug!(
            "Census \"{}\" now holds {} claims",
            census.name,
            census.tree.len()
        );
        Ok(result)
    }

    async fn census_root(&self, census_id: CensusId) -> Result<CensusRoot, Error> {
        let _guard = self.round_trip().await?;
        let state = self.state()?;
        let census = state
            .censuses
            .get(&census_id)
            .ok_or(Error::CensusNotFound(census_id))?;
        Ok(census.tree.root())
    }

    async fn census_publish(&self, request: Signed<CensusPublish>) -> Result<String, Error> {
        let _guard = self.round_trip().await?;
        Self::verify(&request)?;

        let mut state = self.state()?;
        let census = state
            .censuses
            .get(&request.census_id)
            .ok_or(Error::CensusNotFound(request.census_id))?;
        if !census.is_admin(&request.public_key) {
            return Err(Error::Unauthorized);
        }

        let tree = census.tree.clone();
        let content = serde_cbor::to_vec(&tree)?;
        let locator = format!("mem://census/{}", hex::encode(sha256(&[&content[..]])));
        state.published.insert(tree.root(), tree);
        Ok(locator)
    }

    async fn census_prove_membership(
        &self,
        root: CensusRoot,
        claim: Claim,
    ) -> Result<MerkleProof, Error> {
        let _guard = self.round_trip().await?;
        let state = self.state()?;
        let tree = state
            .published
            .get(&root)
            .ok_or(Error::CensusRootNotFound(root))?;
        tree.prove(&claim)
            .ok_or(Error::ProofGenerationFailed { root, claim })
    }

    async fn census_size(&self, root: CensusRoot) -> Result<u64, Error> {
        let _guard = self.round_trip().await?;
        let state = self.state()?;
        let tree = state
            .published
            .get(&root)
            .ok_or(Error::CensusRootNotFound(root))?;
        Ok(tree.len() as u64)
    }

    async fn process_create(&self, request: Signed<ProcessCreate>) -> Result<ProcessId, Error> {
        let _guard = self.round_trip().await?;
        Self::verify(&request)?;

        let metadata = &request.metadata;
        let signer = EntityId::from_address(&address_of(&request.public_key));
        if metadata.details.entity_id != signer {
            return Err(Error::Unauthorized);
        }
        if metadata.details.questions.is_empty() {
            return Err(Error::InvalidProcess("no questions".to_string()));
        }
        if metadata.number_of_blocks == 0 {
            return Err(Error::InvalidProcess("empty voting window".to_string()));
        }
        if metadata.start_block.checked_add(metadata.number_of_blocks).is_none() {
            return Err(Error::InvalidProcess("voting window past the last block".to_string()));
        }

        let mut state = self.state()?;
        if !state.published.contains_key(&metadata.census.merkle_root) {
            return Err(Error::CensusRootNotFound(metadata.census.merkle_root));
        }
        if metadata.start_block < self.height(&state) {
            return Err(Error::InvalidProcess("start block in the past".to_string()));
        }

        let process_id = request.process_id();
        let ProcessCreate {
            metadata,
            public_key,
            ..
        } = request.tx;
        state.processes.insert(
            process_id,
            Process {
                metadata,
                owner: public_key,
                canceled: false,
                envelopes: IndexMap::new(),
            },
        );
        Ok(process_id)
    }

    async fn process_metadata(&self, process_id: ProcessId) -> Result<ProcessMetadata, Error> {
        let _guard = self.round_trip().await?;
        let state = self.state()?;
        let process = state
            .processes
            .get(&process_id)
            .ok_or(Error::ProcessNotFound(process_id))?;
        Ok(process.metadata.clone())
    }

    async fn envelope_count(&self, process_id: ProcessId) -> Result<u64, Error> {
        let _guard = self.round_trip().await?;
        let state = self.state()?;
        let process = state
            .processes
            .get(&process_id)
            .ok_or(Error::ProcessNotFound(process_id))?;
        Ok(process.envelopes.len() as u64)
    }

    async fn is_canceled(&self, process_id: ProcessId) -> Result<bool, Error> {
        let _guard = self.round_trip().await?;
        let state = self.state()?;
        let process = state
            .processes
            .get(&process_id)
            .ok_or(Error::ProcessNotFound(process_id))?;
        Ok(process.canceled)
    }

    async fn process_cancel(&self, request: Signed<ProcessCancel>) -> Result<(), Error> {
        let _guard = self.round_trip().await?;
        self.cancel_requests.fetch_add(1, Ordering::SeqCst);
        Self::verify(&request)?;

        let mut state = self.state()?;
        let height = self.height(&state);
        let process = state
            .processes
            .get_mut(&request.process_id)
            .ok_or(Error::ProcessNotFound(request.process_id))?;
        if process.owner != request.public_key {
            return Err(Error::Unauthorized);
        }

        let current = process.metadata.state_at(height, process.canceled);
        if current.is_terminal() {
            return Err(Error::AlreadyTerminal(request.process_id, current));
        }
        process.canceled = true;
        Ok(())
    }

    async fn submit_envelope(&self, envelope: VoteEnvelope) -> Result<EnvelopeAck, Error> {
        let _guard = self.round_trip().await?;

        let process_id = envelope.process_id;
        let mut state = self.state()?;
        let height = self.height(&state);
        let process = state
            .processes
            .get_mut(&process_id)
            .ok_or(Error::ProcessNotFound(process_id))?;

        let current = process.metadata.state_at(height, process.canceled);
        if current != ProcessState::Open {
            return Err(Error::WindowNotOpen(process_id, current));
        }

        Self::verify(&envelope)?;

        let root = process.metadata.census.merkle_root;
        if !envelope.proof.verify(&root, &envelope.claim()) {
            return Err(Error::InvalidProof(root));
        }

        let questions = &process.metadata.details.questions;
        if envelope.votes.len() != questions.len() {
            return Err(Error::InvalidVote(format!(
                "expected {} choices, got {}",
                questions.len(),
                envelope.votes.len()
            )));
        }
        for (question, choice) in questions.iter().zip(envelope.votes.iter()) {
            if !question.has_option(*choice) {
                return Err(Error::InvalidVote(format!(
                    "{} is not an option of \"{}\"",
                    choice,
                    question.title()
                )));
            }
        }

        let nullifier = envelope.nullifier();
        if process.envelopes.contains_key(&nullifier) {
            return Err(Error::DuplicateVote(nullifier));
        }
        process.envelopes.insert(
            nullifier,
            EnvelopeRecord {
                votes: envelope.tx.votes,
                block: height,
            },
        );

        Ok(EnvelopeAck {
            nullifier,
            block: height,
        })
    }

    async fn envelope_status(
        &self,
        process_id: ProcessId,
        nullifier: Nullifier,
    ) -> Result<EnvelopeStatus, Error> {
        let _guard = self.round_trip().await?;
        let state = self.state()?;
        let height = self.height(&state);
        let process = state
            .processes
            .get(&process_id)
            .ok_or(Error::ProcessNotFound(process_id))?;

        let status = match process.envelopes.get(&nullifier) {
            Some(record) if record.block < height => {
                let included = record.block + 1;
                EnvelopeStatus {
                    registered: true,
                    block: Some(included),
                    timestamp: Some(self.time_at_block(included.saturating_sub(state.extra_blocks))?),
                }
            }
            _ => EnvelopeStatus::default(),
        };
        Ok(status)
    }

    async fn results_digest(&self, process_id: ProcessId) -> Result<ResultsDigest, Error> {
        let _guard = self.round_trip().await?;
        let state = self.state()?;
        let height = self.height(&state);
        let process = state
            .processes
            .get(&process_id)
            .ok_or(Error::ProcessNotFound(process_id))?;

        let votes: Vec<Vec<u32>> = process
            .envelopes
            .values()
            .filter(|record| record.block < height)
            .map(|record| record.votes.clone())
            .collect();
        Ok(ResultsDigest::compute(
            &process.metadata.details.questions,
            &votes,
        ))
    }
}
