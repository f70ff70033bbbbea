//! End-to-end scan scenarios over mocked mailboxes

mod common;

use async_trait::async_trait;
use common::*;
use mail_triage::classifier::RuleClassifier;
use mail_triage::client::{LabelInfo, MailboxClient, MessageMetadata};
use mail_triage::error::{Result, TriageError};
use mail_triage::models::{AccountFailure, Category};
use mail_triage::pool::{AccountClient, MailboxPool};
use mail_triage::scanner::{label_budget, ScanOptions, ScanOrchestrator, ScanRequest};
use std::sync::{Arc, Mutex};
use std::time::Duration;

const VERCEL: &str = "Vercel <notifications@vercel.com>";

fn orchestrator(clients: Vec<AccountClient>) -> ScanOrchestrator {
    ScanOrchestrator::new(
        MailboxPool::from_clients(clients),
        RuleClassifier::default(),
        ScanOptions::default(),
    )
}

fn default_request() -> ScanRequest {
    ScanRequest::default()
}

#[tokio::test]
async fn test_zero_accounts_is_hard_failure() {
    let result = orchestrator(vec![]).scan(&default_request()).await;
    assert!(matches!(result, Err(TriageError::NoAccountsConfigured)));
}

#[tokio::test]
async fn test_vercel_build_failure_is_skipped() {
    let client = mock_mailbox(
        vec![],
        vec![create_test_metadata("m1", "t1", VERCEL, "Build failed", 1_000)],
    );

    let report = orchestrator(vec![account_client("work", client)])
        .scan(&default_request())
        .await
        .unwrap();

    assert_eq!(report.total, 1);
    let message = &report.messages[0];
    assert_eq!(message.category, Category::Skip);
    assert!(message.reason.as_deref().unwrap().contains("Vercel"));
    assert_eq!(message.from, "notifications@vercel.com");
    assert_eq!(message.from_name, "Vercel");
    assert_eq!(report.rule_filtered, 1);
}

#[tokio::test]
async fn test_user_label_beats_skip_rule() {
    let client = mock_mailbox(
        vec![create_test_label_info("Label_1", "!Action")],
        vec![create_labeled_metadata("m1", "t1", VERCEL, "Build failed", 1_000, &["Label_1"])],
    );

    let report = orchestrator(vec![account_client("work", client)])
        .scan(&default_request())
        .await
        .unwrap();

    let message = &report.messages[0];
    assert_eq!(message.category, Category::Action);
    assert_eq!(message.reason.as_deref(), Some("Labeled !Action"));
    assert!(message.labels.contains(&"!Action".to_string()));
}

#[tokio::test]
async fn test_skip_and_unclassified_thread_rolls_up_to_unclassified() {
    let client = mock_mailbox(
        vec![],
        vec![
            create_test_metadata("m1", "t1", VERCEL, "Build failed", 1_000),
            create_test_metadata("m3", "t1", "Dana <dana@startup.io>", "Re: Build failed", 2_000),
        ],
    );

    let report = orchestrator(vec![account_client("work", client)])
        .scan(&default_request())
        .await
        .unwrap();

    assert_eq!(report.thread_count, 1);
    let thread = &report.threads[0];
    assert_eq!(thread.category, Category::Unclassified);
    assert_eq!(thread.last_message.id, "m3");
    assert_eq!(thread.message_count, 2);
    assert_eq!(report.rule_filtered, 1);
}

#[tokio::test]
async fn test_failed_account_does_not_abort_others() {
    let healthy = mock_mailbox(
        vec![],
        vec![create_test_metadata("a1", "t1", "Ann <ann@example.com>", "Lunch?", 5_000)],
    );

    let mut broken = MockMailboxClient::new();
    broken.expect_list_labels().returning(|| Ok(vec![]));
    broken.expect_list_message_ids().returning(|_, _| {
        Err(TriageError::AuthError("invalid_grant".to_string()))
    });
    broken.expect_get_message_metadata().never();

    let report = orchestrator(vec![
        account_client("work", healthy),
        account_client("personal", broken),
    ])
    .scan(&default_request())
    .await
    .unwrap();

    assert_eq!(report.accounts_scanned, 1);
    assert_eq!(report.accounts_failed.len(), 1);
    assert_eq!(report.accounts_failed[0].account, "personal");
    assert!(report.accounts_failed[0].error.contains("invalid_grant"));
    assert_eq!(report.total, 1);
    assert_eq!(report.messages[0].account, "work");
}

#[tokio::test]
async fn test_connection_failures_are_reported() {
    let healthy = mock_mailbox(vec![], vec![]);
    let pool = MailboxPool::from_clients(vec![account_client("work", healthy)]).with_failures(vec![
        AccountFailure {
            account: "personal".to_string(),
            error: "Authentication failed: token expired".to_string(),
        },
    ]);

    let report = ScanOrchestrator::new(pool, RuleClassifier::default(), ScanOptions::default())
        .scan(&default_request())
        .await
        .unwrap();

    assert_eq!(report.accounts_scanned, 1);
    assert_eq!(report.accounts_failed[0].account, "personal");
    assert_eq!(report.total, 0);
}

#[tokio::test]
async fn test_only_failed_connections_still_produce_report() {
    let pool = MailboxPool::default().with_failures(vec![AccountFailure {
        account: "personal".to_string(),
        error: "token expired".to_string(),
    }]);

    let report = ScanOrchestrator::new(pool, RuleClassifier::default(), ScanOptions::default())
        .scan(&default_request())
        .await
        .unwrap();

    assert_eq!(report.accounts_scanned, 0);
    assert_eq!(report.accounts_failed.len(), 1);
}

#[tokio::test]
async fn test_fetch_failures_are_counted_and_dropped() {
    let mut client = MockMailboxClient::new();
    client.expect_list_labels().returning(|| Ok(vec![]));
    client
        .expect_list_message_ids()
        .returning(|_, _| Ok(vec!["ok1".to_string(), "gone".to_string(), "ok2".to_string()]));
    client
        .expect_get_message_metadata()
        .times(3)
        .returning(|id| match id {
            "gone" => Err(TriageError::MessageNotFound(id.to_string())),
            _ => Ok(create_test_metadata(id, id, "Ann <ann@example.com>", "Hello", 1_000)),
        });

    let report = orchestrator(vec![account_client("work", client)])
        .scan(&default_request())
        .await
        .unwrap();

    assert_eq!(report.fetch_failures, 1);
    assert_eq!(report.total, 2);
    assert_eq!(report.accounts_scanned, 1);
    assert!(report.accounts_failed.is_empty());
}

#[tokio::test]
async fn test_label_catalog_failure_exposes_raw_ids() {
    let mut client = MockMailboxClient::new();
    client
        .expect_list_labels()
        .returning(|| Err(TriageError::ServerError {
            status: 503,
            message: "backend unavailable".to_string(),
        }));
    client
        .expect_list_message_ids()
        .returning(|_, _| Ok(vec!["m1".to_string()]));
    client.expect_get_message_metadata().returning(|id| {
        Ok(create_labeled_metadata(id, "t1", "Ann <ann@example.com>", "Hello", 1_000, &["Label_1"]))
    });

    let report = orchestrator(vec![account_client("work", client)])
        .scan(&default_request())
        .await
        .unwrap();

    let message = &report.messages[0];
    assert!(message.labels.contains(&"Label_1".to_string()));
    assert_eq!(message.category, Category::Unclassified);
    assert!(report.accounts_failed.is_empty());
}

#[tokio::test]
async fn test_listing_uses_clamped_window_and_result_cap() {
    let queries = Arc::new(Mutex::new(Vec::new()));
    let captured = Arc::clone(&queries);

    let mut client = MockMailboxClient::new();
    client.expect_list_labels().returning(|| Ok(vec![]));
    client
        .expect_list_message_ids()
        .times(1)
        .returning(move |query, max_results| {
            captured.lock().unwrap().push((query.to_string(), max_results));
            Ok(vec![])
        });

    orchestrator(vec![account_client("work", client)])
        .scan(&ScanRequest::new(Some(-5.0)))
        .await
        .unwrap();

    let queries = queries.lock().unwrap();
    let (query, max_results) = &queries[0];
    assert_eq!(
        query,
        "is:unread newer_than:1d -category:promotions -category:social -category:updates -category:forums"
    );
    assert_eq!(*max_results, 50);
}

#[tokio::test]
async fn test_report_records_lookback_days() {
    let client = mock_mailbox(vec![], vec![]);
    let report = orchestrator(vec![account_client("work", client)])
        .scan(&ScanRequest::new(Some(500.0)))
        .await
        .unwrap();
    assert_eq!(report.lookback_days, 90);
}

#[tokio::test]
async fn test_accounts_merge_newest_first() {
    let work = mock_mailbox(
        vec![],
        vec![
            create_test_metadata("w1", "wt1", "Ann <ann@example.com>", "Old", 1_000),
            create_test_metadata("w2", "wt2", "Ann <ann@example.com>", "Newest", 9_000),
        ],
    );
    let personal = mock_mailbox(
        vec![],
        vec![create_test_metadata("p1", "pt1", "Bob <bob@example.com>", "Middle", 5_000)],
    );

    let report = orchestrator(vec![
        account_client("work", work),
        account_client("personal", personal),
    ])
    .scan(&default_request())
    .await
    .unwrap();

    let ids: Vec<&str> = report.messages.iter().map(|m| m.id.as_str()).collect();
    assert_eq!(ids, vec!["w2", "p1", "w1"]);
    let thread_ids: Vec<&str> = report.threads.iter().map(|t| t.id.as_str()).collect();
    assert_eq!(thread_ids, vec!["wt2", "pt1", "wt1"]);
    assert_eq!(report.accounts_scanned, 2);
}

#[tokio::test]
async fn test_repeated_scans_are_deterministic() {
    let build = || {
        let messages = vec![
            create_test_metadata("a", "t1", VERCEL, "Build failed", 3_000),
            create_test_metadata("b", "t1", "Ann <ann@example.com>", "Re: Build failed", 3_000),
            create_test_metadata(
                "c",
                "t2",
                "GitHub <notifications@github.com>",
                "PR merged",
                3_000,
            ),
        ];
        orchestrator(vec![account_client("work", mock_mailbox(vec![], messages))])
    };

    let first = build().scan(&default_request()).await.unwrap();
    let second = build().scan(&default_request()).await.unwrap();

    assert_eq!(first.messages, second.messages);
    assert_eq!(first.threads, second.threads);
    assert_ne!(first.scan_id, second.scan_id);
}

/// Mailbox whose listing never returns in time
struct StalledMailbox;

#[async_trait]
impl MailboxClient for StalledMailbox {
    async fn list_labels(&self) -> Result<Vec<LabelInfo>> {
        Ok(vec![])
    }

    async fn list_message_ids(&self, _query: &str, _max_results: u32) -> Result<Vec<String>> {
        tokio::time::sleep(Duration::from_secs(30)).await;
        Ok(vec![])
    }

    async fn get_message_metadata(&self, id: &str) -> Result<MessageMetadata> {
        Err(TriageError::MessageNotFound(id.to_string()))
    }
}

#[tokio::test]
async fn test_scan_budget_exceeded_is_timeout() {
    let options = ScanOptions {
        timeout: Duration::from_millis(50),
        ..ScanOptions::default()
    };
    let orchestrator = ScanOrchestrator::new(
        MailboxPool::from_clients(vec![AccountClient::new("work", Arc::new(StalledMailbox))]),
        RuleClassifier::default(),
        options,
    );

    let result = orchestrator.scan(&default_request()).await;
    assert!(matches!(result, Err(TriageError::Timeout { .. })));
}

/// Mailbox whose label catalog stalls past the label budget before failing
struct StalledCatalogMailbox;

#[async_trait]
impl MailboxClient for StalledCatalogMailbox {
    async fn list_labels(&self) -> Result<Vec<LabelInfo>> {
        tokio::time::sleep(Duration::from_millis(1_500)).await;
        Err(TriageError::NetworkError("API call timed out".to_string()))
    }

    async fn list_message_ids(&self, _query: &str, _max_results: u32) -> Result<Vec<String>> {
        Ok(vec!["m1".to_string()])
    }

    async fn get_message_metadata(&self, id: &str) -> Result<MessageMetadata> {
        Ok(create_labeled_metadata(
            id,
            "t1",
            "Ann <ann@example.com>",
            "Hello",
            1_000,
            &["Label_1"],
        ))
    }
}

#[tokio::test]
async fn test_stalled_label_catalog_does_not_exhaust_scan_budget() {
    let scan_timeout = Duration::from_secs(1);
    let options = ScanOptions {
        timeout: scan_timeout,
        label_timeout: label_budget(scan_timeout),
        ..ScanOptions::default()
    };
    let orchestrator = ScanOrchestrator::new(
        MailboxPool::from_clients(vec![AccountClient::new(
            "work",
            Arc::new(StalledCatalogMailbox),
        )]),
        RuleClassifier::default(),
        options,
    );

    let report = orchestrator.scan(&default_request()).await.unwrap();

    assert_eq!(report.total, 1);
    assert_eq!(report.accounts_scanned, 1);
    assert!(report.messages[0].labels.contains(&"Label_1".to_string()));
}
