use super::*;
use std::time::{Duration, SystemTime};

fn keyring() -> Keyring {
    Keyring::from_seed(b"lava mosquito drift anchor")
}

#[tokio::test(start_paused = true)]
async fn end_to_end_workflow() {
    let gateway = MemGateway::default();
    let keyring = keyring();
    let config = WorkflowConfig::default();

    let report = run_workflow(&gateway, &keyring, &config).await.unwrap();

    // The session is released once the workflow is done
    assert!(!gateway.is_connected());

    // Census of 10 voters, bound to the process
    assert_eq!(report.census.size, 10);
    assert!(report.census.invalid_claims.is_empty());
    assert_eq!(report.summary.census_size, 10);
    assert_eq!(report.summary.state, ProcessState::Pending);
    assert_eq!(report.summary.envelope_count, 0);

    // One diagnostic vote, then the other 9 in bulk
    let diagnostic = report.diagnostic.as_ref().unwrap();
    assert!(diagnostic.status.as_ref().unwrap().registered);
    assert_eq!(report.batch.outcomes.len(), 9);
    assert_eq!(report.batch.failed().count(), 0);
    assert_eq!(report.registered(), 10);

    // Counts sum to the number of voters for every question
    assert_eq!(report.tally.process_id, report.process_id);
    assert_eq!(report.tally.state, ProcessState::Open);
    assert!(!report.tally.is_final());
    for question in report.tally.questions.iter() {
        assert_eq!(question.total(), 10);
    }
    assert_eq!(report.tally.questions[0].tally[&1], 10);
    assert_eq!(report.tally.questions[1].tally[&2], 10);

    // Not canceled unless asked for
    assert_eq!(report.cancel, None);
    assert_eq!(gateway.cancel_requests(), 0);

    // The entity metadata was published
    let address = keyring.address(ENTITY_KEY).unwrap();
    let (metadata, locator) = gateway.entity(&address).unwrap().unwrap();
    assert_eq!(metadata, config.entity);
    assert_eq!(locator, report.entity_locator);

    // The report is printable
    let json = serde_json::to_value(&report).unwrap();
    assert_eq!(json["census"]["size"], 10);
}

#[tokio::test(start_paused = true)]
async fn end_to_end_all_voters_concurrently() {
    let gateway = MemGateway::default();
    let keyring = keyring();
    let config = WorkflowConfig {
        diagnostic_vote: false,
        concurrency: 4,
        ..WorkflowConfig::default()
    };

    let report = run_workflow(&gateway, &keyring, &config).await.unwrap();

    assert!(report.diagnostic.is_none());
    assert_eq!(report.batch.outcomes.len(), 10);
    assert_eq!(report.batch.registered(), 10);
    assert_eq!(report.registered(), 10);

    let voters: Vec<KeyRef> = report.batch.outcomes.iter().map(|o| o.voter).collect();
    assert_eq!(voters, (1..=10).collect::<Vec<KeyRef>>());

    assert!(gateway.peak_in_flight() > 1);
    assert!(gateway.peak_in_flight() <= 4);
}

#[tokio::test(start_paused = true)]
async fn end_to_end_with_cancel() {
    let gateway = MemGateway::default();
    let keyring = keyring();
    let config = WorkflowConfig {
        cancel_after_tally: true,
        ..WorkflowConfig::default()
    };

    let report = run_workflow(&gateway, &keyring, &config).await.unwrap();
    assert_eq!(report.cancel, Some(CancelOutcome::Canceled));
    assert_eq!(gateway.cancel_requests(), 1);

    // Ending it again is a no-op without a second write
    gateway.connect().await.unwrap();
    let session = Session::new(&gateway, &keyring, ENTITY_KEY);
    let again = force_end(&session, report.process_id).await.unwrap();
    assert_eq!(again, CancelOutcome::AlreadyTerminal(ProcessState::Canceled));
    assert_eq!(gateway.cancel_requests(), 1);

    // Canceled stays canceled past the end of the window
    gateway.advance_blocks(config.number_of_blocks).unwrap();
    assert_eq!(
        current_state(&gateway, report.process_id).await.unwrap(),
        ProcessState::Canceled
    );

    // Votes are refused
    let submitter = session.submitter(SubmitOptions::default());
    assert!(matches!(
        submitter.submit(report.process_id, 1, &[1, 2]).await,
        Err(Error::WindowNotOpen(_, ProcessState::Canceled))
    ));
}

#[tokio::test(start_paused = true)]
async fn failed_step_releases_session() {
    let gateway = MemGateway::default();
    let keyring = keyring();
    let config = WorkflowConfig {
        randomize_census_name: false,
        ..WorkflowConfig::default()
    };

    run_workflow(&gateway, &keyring, &config).await.unwrap();

    // Same census name again: census creation fails and nothing after it runs
    let err = run_workflow(&gateway, &keyring, &config).await.unwrap_err();
    assert!(matches!(err, Error::DuplicateCensusName(ref name) if name == "E2E Test census"));
    assert!(!err.is_retryable());
    assert!(!gateway.is_connected());

    // A random suffix avoids the collision
    let config = WorkflowConfig {
        randomize_census_name: true,
        ..config
    };
    run_workflow(&gateway, &keyring, &config).await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn wait_for_open_times_out() {
    let gateway = MemGateway::default();
    let keyring = keyring();
    let config = WorkflowConfig {
        open_timeout: Some(Duration::from_secs(60)),
        ..WorkflowConfig::default()
    };

    let err = run_workflow(&gateway, &keyring, &config).await.unwrap_err();
    assert!(matches!(err, Error::WaitAborted(_)));
    assert!(!gateway.is_connected());
}

#[tokio::test(start_paused = true)]
async fn wait_for_open_can_be_aborted() {
    let gateway = MemGateway::default();
    let keyring = keyring();
    let config = WorkflowConfig {
        open_timeout: None,
        ..WorkflowConfig::default()
    };

    let abort = tokio::time::sleep(Duration::from_secs(30));
    let err = run_workflow_or(&gateway, &keyring, &config, abort)
        .await
        .unwrap_err();
    assert!(matches!(err, Error::WaitAborted(_)));
    assert!(!gateway.is_connected());
}

async fn members(gateway: &MemGateway, keyring: &Keyring, voters: u32) -> PublishedCensus {
    gateway.connect().await.unwrap();
    let session = Session::new(gateway, keyring, ENTITY_KEY);

    let admin = keyring.public_key(ENTITY_KEY).unwrap();
    session
        .census_builder()
        .build("members", &[admin], &session.voter_keys(voters).unwrap())
        .await
        .unwrap()
}

/// A census of `voters` voters and a process over it, starting `lead` blocks from now
async fn setup(
    gateway: &MemGateway,
    keyring: &Keyring,
    voters: u32,
    lead: u64,
    duration: u64,
) -> (PublishedCensus, ProcessId) {
    let census = members(gateway, keyring, voters).await;
    let session = Session::new(gateway, keyring, ENTITY_KEY);

    let height = gateway.current_block_height().await.unwrap();
    let start = gateway.estimate_time_at_block(height + lead).await.unwrap();
    let binding = CensusBinding {
        merkle_root: census.root,
        merkle_tree: census.locator.clone(),
    };
    let process_id = session
        .lifecycle()
        .create(&binding, start, duration, &WorkflowConfig::default().ballot)
        .await
        .unwrap();

    (census, process_id)
}

#[tokio::test(start_paused = true)]
async fn cancel_while_waiting() {
    let gateway = MemGateway::default();
    let keyring = keyring();
    let (_, process_id) = setup(&gateway, &keyring, 3, 30, 100).await;
    let lifecycle = ProcessLifecycle::new(&gateway, &keyring, ENTITY_KEY);

    let poll = Duration::from_secs(10);
    let (waited, canceled) = tokio::join!(
        wait_until_open(&gateway, process_id, poll, None),
        async {
            tokio::time::sleep(Duration::from_secs(60)).await;
            lifecycle.cancel(process_id).await
        }
    );
    canceled.unwrap();
    assert!(matches!(waited, Err(Error::ProcessCanceled(id)) if id == process_id));
}

#[tokio::test(start_paused = true)]
async fn wait_on_elapsed_window() {
    let gateway = MemGateway::default();
    let keyring = keyring();
    let (_, process_id) = setup(&gateway, &keyring, 3, 10, 10).await;

    gateway.advance_blocks(25).unwrap();
    let poll = Duration::from_secs(10);
    assert!(matches!(
        wait_until_open(&gateway, process_id, poll, None).await,
        Err(Error::WindowClosed(_))
    ));

    let lifecycle = ProcessLifecycle::new(&gateway, &keyring, ENTITY_KEY);
    assert!(matches!(
        lifecycle.cancel(process_id).await,
        Err(Error::AlreadyTerminal(_, ProcessState::Closed))
    ));
    assert_eq!(gateway.cancel_requests(), 0);
}

#[tokio::test(start_paused = true)]
async fn late_claims_do_not_reach_existing_process() {
    let gateway = MemGateway::default();
    let keyring = keyring();
    let (census, process_id) = setup(&gateway, &keyring, 5, 10, 100).await;
    let session = Session::new(&gateway, &keyring, ENTITY_KEY);

    // Voter 6 joins the census after the process was created
    let builder = session.census_builder();
    let late = vec![hex::encode(keyring.public_key(6).unwrap().as_bytes())];
    builder.add_claims(census.census_id, &late).await.unwrap();
    builder.publish(census.census_id).await.unwrap();
    let new_root = builder.root(census.census_id).await.unwrap();
    assert_ne!(new_root, census.root);

    // A proof against the new root does not verify against the bound one
    let claim = digest_claim(&keyring.public_key(6).unwrap());
    let proof = builder.prove_membership(new_root, claim).await.unwrap();
    assert!(!verify_membership(&census.root, &claim, &proof));

    let options = SubmitOptions {
        confirmation: Confirmation::UntilRegistered { max_attempts: 5 },
        ..SubmitOptions::default()
    };
    let report = session
        .submitter(options)
        .submit_batch_when_open(process_id, &[1, 2, 3, 4, 5, 6], &[0, 3], None)
        .await
        .unwrap();

    assert_eq!(report.registered(), 5);
    let failed: Vec<KeyRef> = report.failed().map(|o| o.voter).collect();
    assert_eq!(failed, vec![6]);
    assert!(matches!(
        report.outcomes[5].result,
        Err(Error::ProofGenerationFailed { root, .. }) if root == census.root
    ));

    // Resubmitting is rejected; the first envelopes stay registered
    let retry = session
        .submitter(SubmitOptions::default())
        .submit_batch(process_id, &[1, 2], &[1, 1])
        .await
        .unwrap();
    for outcome in retry.outcomes.iter() {
        assert!(matches!(outcome.result, Err(Error::DuplicateVote(_))));
    }
    assert_eq!(gateway.envelope_count(process_id).await.unwrap(), 5);

    let tally = tally(&gateway, process_id).await.unwrap();
    assert_eq!(tally.questions[0].tally[&0], 5);
    assert_eq!(tally.questions[1].tally[&3], 5);
}

#[tokio::test(start_paused = true)]
async fn disconnected_gateway() {
    let gateway = MemGateway::default();
    let keyring = keyring();
    let (_, process_id) = setup(&gateway, &keyring, 3, 10, 100).await;
    gateway.disconnect().await.unwrap();

    let err = current_state(&gateway, process_id).await.unwrap_err();
    assert!(err.is_retryable());

    // Proof failures caused by the connection are not blamed on the voter
    let claim = digest_claim(&keyring.public_key(1).unwrap());
    assert!(matches!(
        prove_membership(&gateway, CensusRoot([1; 32]), claim).await,
        Err(Error::ConnectionFailure(_))
    ));
}

#[tokio::test(start_paused = true)]
async fn summary_reports_window() {
    let gateway = MemGateway::default();
    let keyring = keyring();
    let (_, process_id) = setup(&gateway, &keyring, 4, 30, 8640).await;

    let summary = summary(&gateway, process_id).await.unwrap();
    assert_eq!(summary.state, ProcessState::Pending);
    assert_eq!(summary.census_size, 4);
    assert_eq!(summary.envelope_count, 0);

    let window = summary.end.duration_since(summary.start).unwrap();
    assert_eq!(window, Duration::from_secs(8640 * 10));
    assert!(summary.start > SystemTime::now());
}

#[tokio::test(start_paused = true)]
async fn window_past_last_block_is_refused() {
    log::set_max_level(log::LevelFilter::Info);
    let gateway = MemGateway::default();
    let keyring = keyring();
    let census = members(&gateway, &keyring, 3).await;
    let lifecycle = ProcessLifecycle::new(&gateway, &keyring, ENTITY_KEY);
    let ballot = WorkflowConfig::default().ballot;
    let binding = CensusBinding {
        merkle_root: census.root,
        merkle_tree: census.locator.clone(),
    };

    let height = gateway.current_block_height().await.unwrap();
    let start = gateway.estimate_time_at_block(height + 10).await.unwrap();
    let start_block = gateway.estimate_block_at_time(start).await.unwrap();

    assert!(matches!(
        lifecycle.create(&binding, start, u64::MAX, &ballot).await,
        Err(Error::InvalidProcess(_))
    ));

    // A window ending on the last block is accepted
    let process_id = lifecycle
        .create(&binding, start, u64::MAX - start_block, &ballot)
        .await
        .unwrap();
    let metadata = lifecycle.metadata(process_id).await.unwrap();
    assert_eq!(metadata.end_block(), u64::MAX);
    assert_eq!(
        lifecycle.current_state(process_id).await.unwrap(),
        ProcessState::Pending
    );

    // but its end has no wall-clock time
    assert!(matches!(
        summary(&gateway, process_id).await,
        Err(Error::TimeOutOfRange(u64::MAX))
    ));
}
