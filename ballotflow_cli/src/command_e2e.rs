use crate::Config;
use ballotflow::*;
use log::info;

pub async fn command_e2e(_matches: &clap::ArgMatches<'_>, config: &Config) -> anyhow::Result<()> {
    let gateway = MemGateway::new(config.block_time, config.gateway_capacity);
    let keyring = Keyring::from_seed(&config.seed).with_max_index(config.workflow.voters);

    info!(
        "Running the workflow with {} voters, starting in {}s",
        config.workflow.voters,
        config.workflow.start_delay.as_secs()
    );
    let report = run_workflow(&gateway, &keyring, &config.workflow).await?;

    println!("{}", serde_json::to_string_pretty(&report)?);

    println!("> {} of {} votes registered", report.registered(), config.workflow.voters);
    for question in report.tally.questions.iter() {
        println!("  {}:", question.question);
        for (option, count) in question.tally.iter() {
            println!("    option {} got {} votes", option, count);
        }
    }

    let failed = report.batch.failed().count();
    if failed > 0 {
        anyhow::bail!("{} voters failed to vote", failed);
    }
    Ok(())
}
