use crate::*;
use log::{info, warn};
use rand::Rng;
use std::future::Future;
use std::time::Duration;

/// Key of the entity in the identity provider; voters follow at 1..=N
pub const ENTITY_KEY: KeyRef = 0;

/// Parameters of an end-to-end voting workflow
#[derive(Debug, Clone)]
pub struct WorkflowConfig {
    pub entity: EntityMetadata,

    pub census_name: String,

    /// Append a random 6-digit suffix to the census name so repeated runs
    /// against the same network do not collide
    pub randomize_census_name: bool,

    pub voters: u32,

    pub start_delay: Duration,

    pub number_of_blocks: u64,

    pub ballot: BallotSpec,

    /// Choice of every voter, one value per question
    pub choices: Vec<u32>,

    /// Maximum number of voter pipelines in flight
    pub concurrency: usize,

    pub poll_interval: Duration,

    /// Give up waiting for the process to open after this long
    pub open_timeout: Option<Duration>,

    /// Submit the first voter alone and wait for it to register before the bulk submission
    pub diagnostic_vote: bool,

    /// Cancel the process once it has been tallied
    pub cancel_after_tally: bool,

    /// Status reads per envelope before giving up on its registration
    pub confirm_attempts: u32,
}

impl Default for WorkflowConfig {
    fn default() -> Self {
        let mut entity = EntityMetadata::default();
        entity.name = default_text("Ballotflow test entity");
        entity.description = default_text("Entity used to exercise the voting workflow");

        let options = ["Yellow", "Pink", "Abstention", "White"];
        let ballot = BallotSpec {
            title: "E2E process".to_string(),
            description: "E2E process".to_string(),
            header_image: String::new(),
            questions: vec![
                Question::single_choice("CEO", "Chief Executive Officer", &options),
                Question::single_choice("CFO", "Chief Financial Officer", &options),
            ],
        };

        WorkflowConfig {
            entity,
            census_name: "E2E Test census".to_string(),
            randomize_census_name: true,
            voters: 10,
            start_delay: MIN_START_DELAY,
            number_of_blocks: 6 * 60 * 24,
            ballot,
            choices: vec![1, 2],
            concurrency: 10,
            poll_interval: Duration::from_secs(10),
            open_timeout: Some(Duration::from_secs(15 * 60)),
            diagnostic_vote: true,
            cancel_after_tally: false,
            confirm_attempts: 30,
        }
    }
}

impl WorkflowConfig {
    fn submit_options(&self) -> SubmitOptions {
        SubmitOptions {
            concurrency: self.concurrency,
            poll_interval: self.poll_interval,
            confirmation: Confirmation::UntilRegistered {
                max_attempts: self.confirm_attempts,
            },
        }
    }

    fn census_name(&self) -> String {
        if self.randomize_census_name {
            let suffix: u32 = rand::thread_rng().gen_range(0, 1_000_000);
            format!("{} #{:06}", self.census_name, suffix)
        } else {
            self.census_name.clone()
        }
    }
}

/// The gateway session and the identity acting on it, threaded through every step
pub struct Session<'a, G: ?Sized, I: ?Sized> {
    pub gateway: &'a G,
    pub identity: &'a I,
    pub entity: KeyRef,
}

impl<'a, G, I> Session<'a, G, I>
where
    G: NetworkGateway + ?Sized,
    I: IdentityProvider + ?Sized,
{
    pub fn new(gateway: &'a G, identity: &'a I, entity: KeyRef) -> Self {
        Session {
            gateway,
            identity,
            entity,
        }
    }

    pub fn census_builder(&self) -> CensusBuilder<'a, G, I> {
        CensusBuilder::new(self.gateway, self.identity, self.entity)
    }

    pub fn lifecycle(&self) -> ProcessLifecycle<'a, G, I> {
        ProcessLifecycle::new(self.gateway, self.identity, self.entity)
    }

    pub fn submitter(&self, options: SubmitOptions) -> EnvelopeSubmitter<'a, G, I> {
        EnvelopeSubmitter::new(self.gateway, self.identity, options)
    }

    /// Hex-encoded public keys of voters 1..=count
    pub fn voter_keys(&self, count: u32) -> Result<Vec<String>, Error> {
        (1..=count)
            .map(|voter| {
                let public_key = self.identity.public_key(voter)?;
                Ok::<_, Error>(hex::encode(public_key.as_bytes()))
            })
            .collect()
    }
}

/// Result of ending a process on request
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq)]
#[serde(rename_all = "snake_case")]
pub enum CancelOutcome {
    Canceled,
    /// Nothing was written: the process had already ended
    AlreadyTerminal(ProcessState),
}

/// Outputs of every step of a completed workflow
#[derive(Serialize, Debug)]
pub struct WorkflowReport {
    pub entity_locator: String,
    pub census: PublishedCensus,
    pub process_id: ProcessId,
    pub summary: ProcessSummary,
    pub diagnostic: Option<EnvelopeReceipt>,
    pub batch: BatchReport,
    pub tally: Tally,
    pub cancel: Option<CancelOutcome>,
}

impl WorkflowReport {
    /// Number of voters whose envelope is registered
    pub fn registered(&self) -> usize {
        let diagnostic = self
            .diagnostic
            .as_ref()
            .and_then(|receipt| receipt.status.as_ref())
            .map_or(0, |status| status.registered as usize);
        diagnostic + self.batch.registered()
    }
}

/// Run the full voting workflow inside one gateway session.
///
/// The session is released whether the steps succeed or not.
pub async fn run_workflow<G, I>(
    gateway: &G,
    identity: &I,
    config: &WorkflowConfig,
) -> Result<WorkflowReport, Error>
where
    G: NetworkGateway + ?Sized,
    I: IdentityProvider + ?Sized,
{
    run_workflow_or(gateway, identity, config, futures::future::pending()).await
}

/// Like `run_workflow`, but the wait for the process to open stops as soon as
/// `abort` completes
pub async fn run_workflow_or<G, I, F>(
    gateway: &G,
    identity: &I,
    config: &WorkflowConfig,
    abort: F,
) -> Result<WorkflowReport, Error>
where
    G: NetworkGateway + ?Sized,
    I: IdentityProvider + ?Sized,
    F: Future<Output = ()>,
{
    gateway.connect().await?;
    let session = Session::new(gateway, identity, ENTITY_KEY);

    let result = run_steps(&session, config, abort).await;

    if let Err(e) = gateway.disconnect().await {
        warn!("Failed to release the gateway session: {}", e);
    }
    if let Err(e) = &result {
        warn!("Workflow aborted: {}", e);
    }
    result
}

async fn run_steps<G, I, F>(
    session: &Session<'_, G, I>,
    config: &WorkflowConfig,
    abort: F,
) -> Result<WorkflowReport, Error>
where
    G: NetworkGateway + ?Sized,
    I: IdentityProvider + ?Sized,
    F: Future<Output = ()>,
{
    info!("Registering the entity");
    let entity_locator = register_entity(
        session.gateway,
        session.identity,
        session.entity,
        config.entity.clone(),
    )
    .await?;

    info!("Building a census of {} voters", config.voters);
    let voter_keys = session.voter_keys(config.voters)?;
    let admin = session.identity.public_key(session.entity)?;
    let census = session
        .census_builder()
        .build(&config.census_name(), &[admin], &voter_keys)
        .await?;

    info!("Creating the process");
    let binding = CensusBinding {
        merkle_root: census.root,
        merkle_tree: census.locator.clone(),
    };
    // Measured on the network clock rather than the local one
    let current_block = session.gateway.current_block_height().await?;
    let start = session.gateway.estimate_time_at_block(current_block).await? + config.start_delay;
    let lifecycle = session.lifecycle();
    let process_id = lifecycle
        .create(&binding, start, config.number_of_blocks, &config.ballot)
        .await?;
    let summary = lifecycle.summary(process_id).await?;

    info!("Waiting for the process to open");
    let timeout = config.open_timeout;
    let stop = async move {
        let deadline = async move {
            match timeout {
                Some(timeout) => tokio::time::sleep(timeout).await,
                None => futures::future::pending::<()>().await,
            }
        };
        tokio::select! {
            _ = deadline => {}
            _ = abort => {}
        }
    };
    wait_until_open_or(session.gateway, process_id, config.poll_interval, stop).await?;

    let submitter = session.submitter(config.submit_options());
    let mut voters: Vec<KeyRef> = (1..=config.voters).collect();
    let diagnostic = if config.diagnostic_vote && !voters.is_empty() {
        let voter = voters.remove(0);
        info!("Submitting a single vote for voter {}", voter);
        Some(submitter.submit(process_id, voter, &config.choices).await?)
    } else {
        None
    };

    let batch = submitter
        .submit_batch(process_id, &voters, &config.choices)
        .await?;
    for outcome in batch.failed() {
        if let Err(e) = &outcome.result {
            warn!("Voter {} failed: {}", outcome.voter, e);
        }
    }

    let tally = tally(session.gateway, process_id).await?;

    let cancel = if config.cancel_after_tally {
        Some(force_end(session, process_id).await?)
    } else {
        None
    };

    Ok(WorkflowReport {
        entity_locator,
        census,
        process_id,
        summary,
        diagnostic,
        batch,
        tally,
        cancel,
    })
}

/// End a process right away.
///
/// A process that already closed or was canceled is reported as such
/// without a network write.
pub async fn force_end<G, I>(
    session: &Session<'_, G, I>,
    process_id: ProcessId,
) -> Result<CancelOutcome, Error>
where
    G: NetworkGateway + ?Sized,
    I: IdentityProvider + ?Sized,
{
    match session.lifecycle().cancel(process_id).await {
        Ok(()) => Ok(CancelOutcome::Canceled),
        Err(Error::AlreadyTerminal(_, state)) => Ok(CancelOutcome::AlreadyTerminal(state)),
        Err(e) => Err(e),
    }
}

#[cfg(test)]
mod tests {

    use super::*;

    #[test]
    fn test_default_config() {
        let config = WorkflowConfig::default();
        assert_eq!(config.voters, 10);
        assert_eq!(config.number_of_blocks, 8640);
        assert_eq!(config.start_delay, Duration::from_secs(300));
        assert!(!config.cancel_after_tally);

        // Default choices are valid for the default ballot
        assert_eq!(config.choices.len(), config.ballot.questions.len());
        for (question, choice) in config.ballot.questions.iter().zip(config.choices.iter()) {
            assert!(question.has_option(*choice));
        }
    }

    #[test]
    fn test_census_name_suffix() {
        let mut config = WorkflowConfig::default();
        let name = config.census_name();
        assert!(name.starts_with("E2E Test census #"));
        assert_eq!(name.len(), "E2E Test census #".len() + 6);

        config.randomize_census_name = false;
        assert_eq!(config.census_name(), "E2E Test census");
    }

    #[tokio::test]
    async fn test_voter_keys() {
        let gateway = MemGateway::default();
        let keyring = Keyring::from_seed(b"session");
        let session = Session::new(&gateway, &keyring, ENTITY_KEY);

        let keys = session.voter_keys(3).unwrap();
        assert_eq!(keys.len(), 3);
        assert_eq!(keys[0], hex::encode(keyring.public_key(1).unwrap().as_bytes()));
        assert!(session.voter_keys(0).unwrap().is_empty());
    }
}
