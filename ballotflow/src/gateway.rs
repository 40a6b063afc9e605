use crate::*;
use std::time::SystemTime;

/// Read/write access to the ledger network through a relay node.
///
/// Implementations must tolerate many requests in flight at once over the
/// same session: bulk vote submission shares one gateway across all voter
/// pipelines.
#[allow(async_fn_in_trait)]
pub trait NetworkGateway {
    /// Acquire the session
    async fn connect(&self) -> Result<(), Error>;

    /// Release the session
    async fn disconnect(&self) -> Result<(), Error>;

    async fn current_block_height(&self) -> Result<u64, Error>;

    async fn estimate_block_at_time(&self, time: SystemTime) -> Result<u64, Error>;

    async fn estimate_time_at_block(&self, block: u64) -> Result<SystemTime, Error>;

    /// Replace an entity's metadata, returning the locator of the new version
    async fn entity_update(&self, update: Signed<EntityUpdate>) -> Result<String, Error>;

    async fn census_create(&self, request: Signed<CensusCreate>) -> Result<CensusId, Error>;

    async fn census_add_claims(
        &self,
        request: Signed<CensusAddClaims>,
    ) -> Result<AddClaimsResult, Error>;

    async fn census_root(&self, census_id: CensusId) -> Result<CensusRoot, Error>;

    /// Publish the current claim set of a census, returning its locator
    async fn census_publish(&self, request: Signed<CensusPublish>) -> Result<String, Error>;

    async fn census_prove_membership(
        &self,
        root: CensusRoot,
        claim: Claim,
    ) -> Result<MerkleProof, Error>;

    async fn census_size(&self, root: CensusRoot) -> Result<u64, Error>;

    async fn process_create(&self, request: Signed<ProcessCreate>) -> Result<ProcessId, Error>;

    async fn process_metadata(&self, process_id: ProcessId) -> Result<ProcessMetadata, Error>;

    /// Number of envelopes submitted to a process so far
    async fn envelope_count(&self, process_id: ProcessId) -> Result<u64, Error>;

    async fn is_canceled(&self, process_id: ProcessId) -> Result<bool, Error>;

    async fn process_cancel(&self, request: Signed<ProcessCancel>) -> Result<(), Error>;

    /// Submit a vote envelope. A second envelope with the same nullifier is
    /// rejected with `DuplicateVote`.
    async fn submit_envelope(&self, envelope: VoteEnvelope) -> Result<EnvelopeAck, Error>;

    async fn envelope_status(
        &self,
        process_id: ProcessId,
        nullifier: Nullifier,
    ) -> Result<EnvelopeStatus, Error>;

    async fn results_digest(&self, process_id: ProcessId) -> Result<ResultsDigest, Error>;
}
