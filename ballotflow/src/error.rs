use crate::*;

use thiserror::Error;

/// Error types
#[derive(Debug, Error)]
pub enum Error {
    #[error("ballotflow: gateway unreachable: {0}")]
    ConnectionFailure(String),

    #[error("ballotflow: a census named \"{0}\" already exists for this entity")]
    DuplicateCensusName(String),

    #[error("ballotflow: unable to generate a membership proof for claim {claim} against root {root}")]
    ProofGenerationFailed { root: CensusRoot, claim: Claim },

    #[error("ballotflow: a vote with nullifier {0} was already submitted")]
    DuplicateVote(Nullifier),

    #[error("ballotflow: process {0} is already {1}")]
    AlreadyTerminal(ProcessId, ProcessState),

    #[error("ballotflow: process {0} is not open for voting (state: {1})")]
    WindowNotOpen(ProcessId, ProcessState),

    #[error("ballotflow: invalid identifier - invalid hexidecimal")]
    IdentifierBadHex,

    #[error("ballotflow: invalid identifier - wrong length")]
    IdentifierBadLen,

    #[error("ballotflow: signature error: {0}")]
    SignatureError(#[from] ed25519_dalek::SignatureError),

    #[error("ballotflow: mismatched public keys")]
    MismatchedPublicKeys,

    #[error("ballotflow: signer is not authorized for this operation")]
    Unauthorized,

    #[error("ballotflow: unknown key reference {0}")]
    UnknownKey(KeyRef),

    #[error("ballotflow: CBOR error: {0}")]
    CBOR(#[from] serde_cbor::Error),

    #[error("ballotflow: JSON error: {0}")]
    JSON(#[from] serde_json::Error),

    #[error("ballotflow: census {0} not found")]
    CensusNotFound(CensusId),

    #[error("ballotflow: census root {0} has not been published")]
    CensusRootNotFound(CensusRoot),

    #[error("ballotflow: process {0} not found")]
    ProcessNotFound(ProcessId),

    #[error("ballotflow: invalid vote: {0}")]
    InvalidVote(String),

    #[error("ballotflow: invalid process metadata: {0}")]
    InvalidProcess(String),

    #[error("ballotflow: membership proof does not verify against root {0}")]
    InvalidProof(CensusRoot),

    #[error("ballotflow: process {0} was canceled while waiting for it to open")]
    ProcessCanceled(ProcessId),

    #[error("ballotflow: voting window of process {0} closed before it could be used")]
    WindowClosed(ProcessId),

    #[error("ballotflow: wait for process {0} to open was aborted")]
    WaitAborted(ProcessId),

    #[error("ballotflow: envelope {0} was not registered in time")]
    EnvelopeNotRegistered(Nullifier),

    #[error("ballotflow: block {0} lies beyond any representable time")]
    TimeOutOfRange(u64),
}

impl Error {
    /// Whether retrying the same call may succeed
    pub fn is_retryable(&self) -> bool {
        matches!(self, Error::ConnectionFailure(_))
    }

    /// Whether this is a no-op report rather than a failure
    pub fn is_informational(&self) -> bool {
        matches!(self, Error::AlreadyTerminal(..))
    }
}

/// A claim rejected while populating a census.
///
/// Invalid claims are reported back to the caller, never thrown; the valid
/// claims of the same batch are still committed.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct InvalidClaim {
    /// Position of the key in the submitted batch
    pub index: usize,
    pub key: String,
    pub reason: String,
}
