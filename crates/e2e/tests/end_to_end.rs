//! End-to-end flow against the simulated dashboard

mod support;

use settlement_common::TransactionStatus;
use settlement_e2e::report::{envelope, EXIT_FAIL, EXIT_PASS, VALIDATION_END, VALIDATION_START};
use settlement_e2e::{run_end_to_end, E2eError, EndToEndReport};

use support::{config_in, Faults, SimDashboard};

async fn run_with(faults: Faults) -> (EndToEndReport, SimDashboard, tempfile::TempDir) {
    let dir = tempfile::tempdir().unwrap();
    let dashboard = SimDashboard::new(faults);
    let report = run_end_to_end(&config_in(dir.path()), &dashboard).await.unwrap();
    (report, dashboard, dir)
}

fn details_of(report: &EndToEndReport, step: u32) -> &str {
    &report.session.results[step as usize - 1].details
}

#[tokio::test(start_paused = true)]
async fn test_healthy_backend_passes_every_step() {
    let (report, dashboard, dir) = run_with(Faults::default()).await;

    let failed: Vec<_> = report.session.results.iter().filter(|r| !r.pass).collect();
    assert!(failed.is_empty(), "unexpected failures: {:#?}", failed);
    assert_eq!(report.session.results.len(), 8);
    assert_eq!(report.exit_code(), EXIT_PASS);
    assert!(report.session.state_inconsistencies.is_empty());
    assert!(report.session.ui_inconsistencies.is_empty());

    let details = &report.session.details;
    let tx = details.transaction_id.unwrap();
    assert!(details.customer_id.unwrap() > 0);
    assert!(details.merchant_id.unwrap() > 0);
    assert_eq!(
        details.transaction_seen_states,
        vec![
            TransactionStatus::Captured,
            TransactionStatus::Processing,
            TransactionStatus::Settled
        ]
    );
    assert_eq!(details.log_count_for_transaction, Some(1));
    assert_eq!(dashboard.log_count(tx), 1);

    assert_eq!(report.session.screenshots.len(), 8);
    for shot in &report.session.screenshots {
        assert!(shot.starts_with(dir.path().join("e2e")), "{}", shot.display());
        assert!(shot.exists(), "{} was not written", shot.display());
    }
    assert!(report.session.results.iter().all(|r| r.screenshot_sha256.is_some()));
}

#[tokio::test(start_paused = true)]
async fn test_report_envelope_is_scrapable() {
    let (report, _dashboard, _dir) = run_with(Faults::default()).await;
    let text = envelope(VALIDATION_START, VALIDATION_END, &report).unwrap();

    let body = text
        .strip_prefix("VALIDATION_RESULT_START\n")
        .and_then(|rest| rest.strip_suffix("\nVALIDATION_RESULT_END"))
        .unwrap();
    let json: serde_json::Value = serde_json::from_str(body).unwrap();
    assert_eq!(json["baseUrl"], "http://dashboard.test");
    assert_eq!(json["results"][4]["title"], "Trigger Settlement");
    assert_eq!(json["results"][4]["screenshot"], "step5_transaction_settled.png");
    assert!(json["customerId"].is_i64());
}

#[tokio::test(start_paused = true)]
async fn test_missed_processing_fails_only_settlement_step() {
    let (report, _dashboard, _dir) = run_with(Faults {
        skip_processing: true,
        ..Default::default()
    })
    .await;

    assert_eq!(report.exit_code(), EXIT_FAIL);
    let failed: Vec<u32> = report.session.results.iter().filter(|r| !r.pass).map(|r| r.step).collect();
    assert_eq!(failed, vec![5]);
    assert_eq!(
        details_of(&report, 5),
        "PROCESSING state was not observed. Seen: CAPTURED, SETTLED"
    );
    assert_eq!(
        report.session.state_inconsistencies,
        vec!["Step 5 (Trigger Settlement): PROCESSING state was not observed. Seen: CAPTURED, SETTLED".to_string()]
    );
}

#[tokio::test(start_paused = true)]
async fn test_duplicate_settlement_is_caught_by_idempotency_step() {
    let (report, dashboard, _dir) = run_with(Faults {
        duplicate_on_retrigger: true,
        ..Default::default()
    })
    .await;

    let step8 = &report.session.results[7];
    assert!(!step8.pass);
    assert!(step8.details.starts_with("Duplicate settlement detected for settled transaction."), "{}", step8.details);
    assert!(report.session.results[6].pass, "attempt 1 is still SETTLED");

    let tx = report.session.details.transaction_id.unwrap();
    assert!(dashboard.log_count(tx) > 1);
}

#[tokio::test(start_paused = true)]
async fn test_double_lock_holder_fails_lock_step() {
    let (report, _dashboard, _dir) = run_with(Faults {
        double_holder: true,
        ..Default::default()
    })
    .await;

    let step6 = &report.session.results[5];
    assert!(!step6.pass);
    assert!(step6.details.contains("multiple lock holders"), "{}", step6.details);
    assert!(report.session.results[7].pass);
}

#[tokio::test(start_paused = true)]
async fn test_rejected_customer_is_attributed_to_backend() {
    let (report, _dashboard, _dir) = run_with(Faults {
        reject_customer: Some("duplicate email".to_string()),
        ..Default::default()
    })
    .await;

    let step2 = &report.session.results[1];
    assert!(!step2.pass);
    assert!(step2.details.starts_with("Customer creation failed:"), "{}", step2.details);
    assert!(step2.details.contains("duplicate email"));

    // the merchant is independent of the customer; everything keyed on the
    // transaction has nothing to work with
    assert!(report.session.results[2].pass);
    assert!(details_of(&report, 4).contains("unavailable because an earlier step failed"));
    assert!(!report.session.results[4].pass);
    assert!(report.session.results[5].pass);

    assert_eq!(report.session.dialogs.len(), 1);
    assert_eq!(
        report.session.ui_inconsistencies,
        vec!["HTTP errors captured: 400 http://dashboard.test/customers".to_string()]
    );
}

#[tokio::test(start_paused = true)]
async fn test_launch_failure_is_fatal() {
    let dir = tempfile::tempdir().unwrap();
    let dashboard = SimDashboard::new(Faults {
        launch_fails: true,
        ..Default::default()
    });
    let err = run_end_to_end(&config_in(dir.path()), &dashboard).await.unwrap_err();
    assert!(matches!(err, E2eError::FatalSetup(_)), "{err}");
}

#[tokio::test(start_paused = true)]
async fn test_bad_credentials_are_fatal() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = config_in(dir.path());
    config.credentials.admin.password = "wrong".to_string();

    let err = run_end_to_end(&config, &SimDashboard::default()).await.unwrap_err();
    match err {
        E2eError::FatalSetup(reason) => assert!(reason.contains("admin"), "{reason}"),
        other => panic!("expected fatal setup error, got {other}"),
    }
}

#[tokio::test(start_paused = true)]
async fn test_settling_after_failed_attempt_breaks_forward_progress() {
    let (report, _dashboard, _dir) = run_with(Faults {
        retry_after_failure: true,
        ..Default::default()
    })
    .await;

    let step5 = &report.session.results[4];
    assert!(!step5.pass);
    assert_eq!(step5.details, "Transaction moved from terminal FAILED to SETTLED");
    assert_eq!(
        report.session.details.transaction_seen_states,
        vec![
            TransactionStatus::Captured,
            TransactionStatus::Processing,
            TransactionStatus::Failed,
            TransactionStatus::Settled
        ]
    );
    // the row did end up SETTLED, only the path there was wrong
    assert_eq!(report.session.details.transaction_terminal_status, Some(TransactionStatus::Settled));
    assert_eq!(details_of(&report, 7), "Expected attemptNumber=1 result SETTLED, found 'FAILED'.");
}

#[tokio::test(start_paused = true)]
async fn test_unauthenticated_run_never_logs_in() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = config_in(dir.path());
    config.end_to_end.authenticate = false;
    let dashboard = SimDashboard::new(Faults {
        open_access: true,
        ..Default::default()
    });

    let report = run_end_to_end(&config, &dashboard).await.unwrap();
    let failed: Vec<_> = report.session.results.iter().filter(|r| !r.pass).collect();
    assert!(failed.is_empty(), "unexpected failures: {:#?}", failed);
    assert_eq!(report.exit_code(), EXIT_PASS);
    assert_eq!(dashboard.logins(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_silently_dropped_customer_is_a_missing_row() {
    let (report, _dashboard, _dir) = run_with(Faults {
        drop_customer: true,
        ..Default::default()
    })
    .await;

    assert!(!report.session.results[1].pass);
    assert_eq!(details_of(&report, 2), "Customer row not found in customers table.");
    assert!(report.session.dialogs.is_empty());
    assert!(report.session.results[2].pass);
}

#[tokio::test(start_paused = true)]
async fn test_retrigger_reopening_settled_transaction_fails_idempotency() {
    let (report, _dashboard, _dir) = run_with(Faults {
        reopen_settled: true,
        ..Default::default()
    })
    .await;

    let failed: Vec<u32> = report.session.results.iter().filter(|r| !r.pass).map(|r| r.step).collect();
    assert_eq!(failed, vec![8]);
    assert_eq!(details_of(&report, 8), "Transaction moved from SETTLED to 'PROCESSING'.");
}
