use anyhow::{anyhow, Context};
use ballotflow::WorkflowConfig;
use std::env::var;
use std::str::FromStr;
use std::time::Duration;

pub struct Config {
    /// Seed of the keyring holding the entity and voter keys
    pub seed: Vec<u8>,

    /// Block time of the in-memory network
    pub block_time: Duration,

    /// Requests the in-memory network serves at once
    pub gateway_capacity: usize,

    pub workflow: WorkflowConfig,
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        let seed = match var("BALLOTFLOW_SEED") {
            Ok(val) => hex::decode(val).context("BALLOTFLOW_SEED must be hex")?,
            Err(_e) => {
                // Fresh identities on every run
                let (secret, _) = ballotflow::generate_keypair();
                secret.to_bytes().to_vec()
            }
        };

        let block_time = Duration::from_secs(parse("BALLOTFLOW_BLOCK_TIME", 10)?);
        let gateway_capacity = parse("BALLOTFLOW_GATEWAY_CAPACITY", 8)?;

        let defaults = WorkflowConfig::default();
        let open_timeout = match parse("BALLOTFLOW_OPEN_TIMEOUT", 15 * 60)? {
            0 => None,
            secs => Some(Duration::from_secs(secs)),
        };

        let workflow = WorkflowConfig {
            census_name: var("BALLOTFLOW_CENSUS_NAME").unwrap_or(defaults.census_name.clone()),
            voters: parse("BALLOTFLOW_VOTERS", defaults.voters)?,
            start_delay: Duration::from_secs(parse(
                "BALLOTFLOW_START_DELAY",
                defaults.start_delay.as_secs(),
            )?),
            number_of_blocks: parse("BALLOTFLOW_BLOCKS", defaults.number_of_blocks)?,
            concurrency: parse("BALLOTFLOW_CONCURRENCY", defaults.concurrency)?,
            poll_interval: block_time,
            open_timeout,
            diagnostic_vote: parse("BALLOTFLOW_DIAGNOSTIC_VOTE", defaults.diagnostic_vote)?,
            cancel_after_tally: parse(
                "BALLOTFLOW_CANCEL_AFTER_TALLY",
                defaults.cancel_after_tally,
            )?,
            ..defaults
        };

        Ok(Config {
            seed,
            block_time,
            gateway_capacity,
            workflow,
        })
    }
}

fn parse<T: FromStr>(name: &str, default: T) -> anyhow::Result<T> {
    match var(name) {
        Ok(val) => val
            .parse()
            .map_err(|_| anyhow!("{} has an invalid value: {}", name, val)),
        Err(_e) => Ok(default),
    }
}
