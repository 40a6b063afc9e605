use crate::*;
use ed25519_dalek::PublicKey;
use log::{debug, info, warn};
use std::future::Future;
use std::time::{Duration, SystemTime};

/// Minimum distance between process creation and its start, so the census
/// has time to propagate through the network.
pub const MIN_START_DELAY: Duration = Duration::from_secs(5 * 60);

/// State of a voting process, always derived from the current block height
#[derive(Serialize, Deserialize, Copy, Debug, Clone, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ProcessState {
    Pending,
    Open,
    Closed,
    Canceled,
}

impl ProcessState {
    /// Derive the state at `current_block` of a process with the given window.
    ///
    /// Cancellation is terminal and wins over the window.
    pub fn at(current_block: u64, start_block: u64, number_of_blocks: u64, canceled: bool) -> Self {
        if canceled {
            ProcessState::Canceled
        } else if current_block < start_block {
            ProcessState::Pending
        } else if current_block < start_block.saturating_add(number_of_blocks) {
            ProcessState::Open
        } else {
            ProcessState::Closed
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, ProcessState::Closed | ProcessState::Canceled)
    }
}

impl std::fmt::Display for ProcessState {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        let name = match self {
            ProcessState::Pending => "pending",
            ProcessState::Open => "open",
            ProcessState::Closed => "closed",
            ProcessState::Canceled => "canceled",
        };
        write!(f, "{}", name)
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct VoteOption {
    pub title: MultiLanguage,
    pub value: u32,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Question {
    #[serde(rename = "type")]
    pub question_type: String,
    pub question: MultiLanguage,
    pub description: MultiLanguage,
    pub vote_options: Vec<VoteOption>,
}

impl Question {
    /// A single-choice question with options valued 0..n in order
    pub fn single_choice(question: &str, description: &str, options: &[&str]) -> Self {
        Question {
            question_type: "single-choice".to_string(),
            question: default_text(question),
            description: default_text(description),
            vote_options: options
                .iter()
                .enumerate()
                .map(|(i, title)| VoteOption {
                    title: default_text(title),
                    value: i as u32,
                })
                .collect(),
        }
    }

    pub fn has_option(&self, value: u32) -> bool {
        self.vote_options.iter().any(|o| o.value == value)
    }

    /// Default-language title of the question
    pub fn title(&self) -> String {
        self.question.get("default").cloned().unwrap_or_default()
    }
}

/// Title, description and questions of a process
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct BallotSpec {
    pub title: String,
    pub description: String,
    pub header_image: String,
    pub questions: Vec<Question>,
}

/// Census binding of a process. Immutable once the process is created.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct CensusBinding {
    pub merkle_root: CensusRoot,
    pub merkle_tree: String,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ProcessDetails {
    pub entity_id: EntityId,
    pub title: MultiLanguage,
    pub description: MultiLanguage,
    pub header_image: String,
    pub stream_url: String,
    pub questions: Vec<Question>,
}

/// Snapshot of a voting process as stored on the network
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ProcessMetadata {
    pub version: String,
    #[serde(rename = "type")]
    pub process_type: String,
    pub start_block: u64,
    pub number_of_blocks: u64,
    pub census: CensusBinding,
    pub details: ProcessDetails,
}

impl ProcessMetadata {
    /// First block at which the process is closed
    pub fn end_block(&self) -> u64 {
        self.start_block.saturating_add(self.number_of_blocks)
    }

    pub fn state_at(&self, current_block: u64, canceled: bool) -> ProcessState {
        ProcessState::at(current_block, self.start_block, self.number_of_blocks, canceled)
    }
}

/// Request to create a voting process
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct ProcessCreate {
    pub metadata: ProcessMetadata,

    /// Random value making the process id unique
    pub nonce: u64,

    #[serde(with = "EdPublicKeyHex")]
    pub public_key: PublicKey,
}

impl ProcessCreate {
    /// The process id the network assigns to this request
    pub fn process_id(&self) -> ProcessId {
        ProcessId(sha256(&[
            self.metadata.details.entity_id.as_bytes(),
            &self.nonce.to_be_bytes(),
        ]))
    }
}

impl Signable for ProcessCreate {
    fn public(&self) -> PublicKey {
        self.public_key
    }
}

/// Request to cancel a voting process
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct ProcessCancel {
    pub process_id: ProcessId,

    #[serde(with = "EdPublicKeyHex")]
    pub public_key: PublicKey,
}

impl Signable for ProcessCancel {
    fn public(&self) -> PublicKey {
        self.public_key
    }
}

/// Overview of a process window, as seen right now
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct ProcessSummary {
    pub state: ProcessState,
    pub start: SystemTime,
    pub end: SystemTime,
    pub census_size: u64,
    pub current_block: u64,
    pub envelope_count: u64,
}

/// Creates, inspects and terminates voting processes of one entity
pub struct ProcessLifecycle<'a, G: ?Sized, I: ?Sized> {
    gateway: &'a G,
    identity: &'a I,
    entity: KeyRef,
}

impl<'a, G, I> ProcessLifecycle<'a, G, I>
where
    G: NetworkGateway + ?Sized,
    I: IdentityProvider + ?Sized,
{
    pub fn new(gateway: &'a G, identity: &'a I, entity: KeyRef) -> Self {
        ProcessLifecycle {
            gateway,
            identity,
            entity,
        }
    }

    /// Create a process bound to a published census.
    ///
    /// `start` is converted to a block height with the network's estimator.
    pub async fn create(
        &self,
        census: &CensusBinding,
        start: SystemTime,
        number_of_blocks: u64,
        ballot: &BallotSpec,
    ) -> Result<ProcessId, Error> {
        let current_block = self.gateway.current_block_height().await?;
        let now = self.gateway.estimate_time_at_block(current_block).await?;
        let lead = start.duration_since(now).unwrap_or_default();
        if lead < MIN_START_DELAY {
            warn!(
                "Process starts in {}s, the census may not have propagated by then",
                lead.as_secs()
            );
        }

        let start_block = self.gateway.estimate_block_at_time(start).await?;
        if start_block.checked_add(number_of_blocks).is_none() {
            return Err(Error::InvalidProcess(format!(
                "a window of {} blocks from block {} runs past the last block",
                number_of_blocks, start_block
            )));
        }
        let address = self.identity.address(self.entity)?;

        let metadata = ProcessMetadata {
            version: "1.0".to_string(),
            process_type: "poll-vote".to_string(),
            start_block,
            number_of_blocks,
            census: census.clone(),
            details: ProcessDetails {
                entity_id: EntityId::from_address(&address),
                title: default_text(&ballot.title),
                description: default_text(&ballot.description),
                header_image: ballot.header_image.clone(),
                stream_url: String::new(),
                questions: ballot.questions.clone(),
            },
        };

        let end_block = metadata.end_block();
        let request = ProcessCreate {
            metadata,
            nonce: rand::random(),
            public_key: self.identity.public_key(self.entity)?,
        };
        let request = Signed::sign(self.identity, self.entity, request)?;
        let process_id = self.gateway.process_create(request).await?;
        info!("Process created: {} (blocks {}..{})", process_id, start_block, end_block);

        Ok(process_id)
    }

    pub async fn metadata(&self, process_id: ProcessId) -> Result<ProcessMetadata, Error> {
        self.gateway.process_metadata(process_id).await
    }

    /// Current state, recomputed from the block height on every call
    pub async fn current_state(&self, process_id: ProcessId) -> Result<ProcessState, Error> {
        current_state(self.gateway, process_id).await
    }

    /// Cancel the process.
    ///
    /// The state is checked first: a process that is already closed or
    /// canceled yields `AlreadyTerminal` without any write to the network.
    pub async fn cancel(&self, process_id: ProcessId) -> Result<(), Error> {
        let state = self.current_state(process_id).await?;
        if state.is_terminal() {
            info!("Process {} already {}", process_id, state);
            return Err(Error::AlreadyTerminal(process_id, state));
        }

        info!("Canceling process {}", process_id);
        let request = ProcessCancel {
            process_id,
            public_key: self.identity.public_key(self.entity)?,
        };
        let request = Signed::sign(self.identity, self.entity, request)?;
        self.gateway.process_cancel(request).await?;
        info!("Process {} canceled", process_id);

        Ok(())
    }

    pub async fn summary(&self, process_id: ProcessId) -> Result<ProcessSummary, Error> {
        summary(self.gateway, process_id).await
    }
}

pub async fn current_state<G: NetworkGateway + ?Sized>(
    gateway: &G,
    process_id: ProcessId,
) -> Result<ProcessState, Error> {
    let metadata = gateway.process_metadata(process_id).await?;
    let canceled = gateway.is_canceled(process_id).await?;
    let current_block = gateway.current_block_height().await?;
    Ok(metadata.state_at(current_block, canceled))
}

pub async fn summary<G: NetworkGateway + ?Sized>(
    gateway: &G,
    process_id: ProcessId,
) -> Result<ProcessSummary, Error> {
    let metadata = gateway.process_metadata(process_id).await?;
    let canceled = gateway.is_canceled(process_id).await?;
    let current_block = gateway.current_block_height().await?;

    let summary = ProcessSummary {
        state: metadata.state_at(current_block, canceled),
        start: gateway.estimate_time_at_block(metadata.start_block).await?,
        end: gateway.estimate_time_at_block(metadata.end_block()).await?,
        census_size: gateway.census_size(metadata.census.merkle_root).await?,
        current_block,
        envelope_count: gateway.envelope_count(process_id).await?,
    };

    info!("- Starting: {:?}", summary.start);
    info!("- Ending: {:?}", summary.end);
    info!("- Census size: {}", summary.census_size);
    info!("- Current block: {}", summary.current_block);
    info!("- Current votes: {}", summary.envelope_count);

    Ok(summary)
}

/// Block until the process is open, polling the block height.
///
/// Gives up with `WaitAborted` once `timeout` elapses, and fails early if the
/// process is canceled or its window closes while waiting.
pub async fn wait_until_open<G: NetworkGateway + ?Sized>(
    gateway: &G,
    process_id: ProcessId,
    poll_interval: Duration,
    timeout: Option<Duration>,
) -> Result<ProcessMetadata, Error> {
    match timeout {
        Some(timeout) => {
            wait_until_open_or(gateway, process_id, poll_interval, tokio::time::sleep(timeout))
                .await
        }
        None => {
            wait_until_open_or(gateway, process_id, poll_interval, futures::future::pending())
                .await
        }
    }
}

/// Like `wait_until_open`, but stops with `WaitAborted` as soon as `abort` completes
pub async fn wait_until_open_or<G, F>(
    gateway: &G,
    process_id: ProcessId,
    poll_interval: Duration,
    abort: F,
) -> Result<ProcessMetadata, Error>
where
    G: NetworkGateway + ?Sized,
    F: Future<Output = ()>,
{
    let metadata = gateway.process_metadata(process_id).await?;

    let poll = poll_until_open(gateway, process_id, &metadata, poll_interval);

    tokio::pin!(abort);
    tokio::pin!(poll);
    tokio::select! {
        res = &mut poll => res,
        _ = &mut abort => {
            warn!("Stopped waiting for process {} to open", process_id);
            Err(Error::WaitAborted(process_id))
        }
    }
}

async fn poll_until_open<G: NetworkGateway + ?Sized>(
    gateway: &G,
    process_id: ProcessId,
    metadata: &ProcessMetadata,
    poll_interval: Duration,
) -> Result<ProcessMetadata, Error> {
    loop {
        let canceled = gateway.is_canceled(process_id).await?;
        let current_block = gateway.current_block_height().await?;
        match metadata.state_at(current_block, canceled) {
            ProcessState::Open => {
                info!("Process {} is open at block {}", process_id, current_block);
                return Ok(metadata.clone());
            }
            ProcessState::Pending => {
                debug!(
                    "Waiting for block {} (current block {})",
                    metadata.start_block, current_block
                );
                tokio::time::sleep(poll_interval).await;
            }
            ProcessState::Canceled => return Err(Error::ProcessCanceled(process_id)),
            ProcessState::Closed => return Err(Error::WindowClosed(process_id)),
        }
    }
}

#[cfg(test)]
mod tests {

    use super::*;

    #[test]
    fn test_state_transitions() {
        let (start, duration) = (100, 50);
        assert_eq!(ProcessState::at(0, start, duration, false), ProcessState::Pending);
        assert_eq!(ProcessState::at(99, start, duration, false), ProcessState::Pending);
        assert_eq!(ProcessState::at(100, start, duration, false), ProcessState::Open);
        assert_eq!(ProcessState::at(149, start, duration, false), ProcessState::Open);
        assert_eq!(ProcessState::at(150, start, duration, false), ProcessState::Closed);
        assert_eq!(ProcessState::at(10_000, start, duration, false), ProcessState::Closed);

        // Canceled is permanent, even once the window elapses
        assert_eq!(ProcessState::at(50, start, duration, true), ProcessState::Canceled);
        assert_eq!(ProcessState::at(120, start, duration, true), ProcessState::Canceled);
        assert_eq!(ProcessState::at(500, start, duration, true), ProcessState::Canceled);

        assert!(ProcessState::Closed.is_terminal());
        assert!(ProcessState::Canceled.is_terminal());
        assert!(!ProcessState::Open.is_terminal());
        assert_eq!(format!("{}", ProcessState::Canceled), "canceled");
    }

    #[test]
    fn test_single_choice_question() {
        let question = Question::single_choice("CEO", "Chief Executive Officer", &["A", "B"]);
        assert_eq!(question.title(), "CEO");
        assert!(question.has_option(0));
        assert!(question.has_option(1));
        assert!(!question.has_option(2));

        let json = serde_json::to_value(&question).unwrap();
        assert_eq!(json["type"], "single-choice");
        assert_eq!(json["voteOptions"][1]["value"], 1);
    }
}
