use chrono::Duration;
use serde_json::json;

use courier_domain::status::OutboxStatus;
use courier_outbox::domain::idempotency::idempotency_key;
use courier_outbox::error::OutboxServiceError;
use courier_outbox::usecase::enqueue::{EnqueueInput, EnqueueUseCase};

use crate::helpers::{InMemoryOutboxRepo, queued_entry, t0};

fn slack_hi() -> EnqueueInput {
    EnqueueInput {
        integration_id: Some("slack".to_owned()),
        operation: Some("post_message".to_owned()),
        stable_resource_id: Some("evt-42".to_owned()),
        payload: Some(json!({ "text": "hi" })),
    }
}

#[tokio::test]
async fn should_enqueue_new_entry_as_queued() {
    let repo = InMemoryOutboxRepo::empty();
    let uc = EnqueueUseCase { repo: repo.clone() };

    let out = uc.execute_at(t0(), slack_hi()).await.unwrap();

    assert!(out.created);
    assert_eq!(out.status, OutboxStatus::Queued);
    assert_eq!(out.idempotency_key.len(), 64);

    let entry = repo.get(out.entry_id);
    assert_eq!(entry.attempt_count, 0);
    assert_eq!(entry.next_attempt_at, t0());
    assert_eq!(entry.payload, r#"{"text":"hi"}"#);
    assert!(entry.lease_owner.is_none());
    assert_eq!(repo.write_count(), 1, "first enqueue writes exactly once");
}

#[tokio::test]
async fn should_return_same_entry_on_duplicate_enqueue() {
    let repo = InMemoryOutboxRepo::empty();
    let uc = EnqueueUseCase { repo: repo.clone() };

    let first = uc.execute_at(t0(), slack_hi()).await.unwrap();
    let second = uc
        .execute_at(t0() + Duration::minutes(1), slack_hi())
        .await
        .unwrap();

    assert_eq!(first.entry_id, second.entry_id);
    assert_eq!(first.idempotency_key, second.idempotency_key);
    assert!(!second.created);
    assert_eq!(repo.entries_handle().lock().unwrap().len(), 1);
    assert_eq!(repo.write_count(), 1, "repeat enqueue must not write");
}

#[tokio::test]
async fn should_not_reset_progress_of_existing_entry() {
    let mut existing = queued_entry("slack", "evt-42", t0());
    existing.idempotency_key =
        idempotency_key("slack", "post_message", "evt-42", &json!({ "text": "hi" })).unwrap();
    existing.status = OutboxStatus::RetryScheduled;
    existing.attempt_count = 3;
    existing.next_attempt_at = t0() + Duration::minutes(10);
    existing.last_error = Some("gateway 503".to_owned());
    let repo = InMemoryOutboxRepo::new(vec![existing.clone()]);
    let uc = EnqueueUseCase { repo: repo.clone() };

    let out = uc
        .execute_at(t0() + Duration::minutes(1), slack_hi())
        .await
        .unwrap();

    assert_eq!(out.entry_id, existing.id);
    assert_eq!(out.status, OutboxStatus::RetryScheduled);
    assert_eq!(repo.get(existing.id), existing, "existing entry left untouched");
    assert_eq!(repo.write_count(), 0);
}

#[tokio::test]
async fn should_dedup_payloads_that_differ_only_in_key_order() {
    let repo = InMemoryOutboxRepo::empty();
    let uc = EnqueueUseCase { repo: repo.clone() };
    let mut a = slack_hi();
    a.payload = Some(json!({ "text": "hi", "channel": "C1" }));
    let mut b = slack_hi();
    b.payload = Some(json!({ "channel": "C1", "text": "hi" }));

    let first = uc.execute_at(t0(), a).await.unwrap();
    let second = uc.execute_at(t0(), b).await.unwrap();

    assert_eq!(first.entry_id, second.entry_id);
    assert_eq!(repo.entries_handle().lock().unwrap().len(), 1);
}

#[tokio::test]
async fn should_create_distinct_entries_for_distinct_resources() {
    let repo = InMemoryOutboxRepo::empty();
    let uc = EnqueueUseCase { repo: repo.clone() };
    let mut other = slack_hi();
    other.stable_resource_id = Some("evt-43".to_owned());

    let first = uc.execute_at(t0(), slack_hi()).await.unwrap();
    let second = uc.execute_at(t0(), other).await.unwrap();

    assert_ne!(first.entry_id, second.entry_id);
    assert_ne!(first.idempotency_key, second.idempotency_key);
    assert_eq!(repo.write_count(), 2);
}

#[tokio::test]
async fn should_reject_missing_fields_without_writing() {
    let repo = InMemoryOutboxRepo::empty();
    let uc = EnqueueUseCase { repo: repo.clone() };

    let inputs = [
        EnqueueInput {
            integration_id: None,
            ..slack_hi()
        },
        EnqueueInput {
            operation: Some(String::new()),
            ..slack_hi()
        },
        EnqueueInput {
            stable_resource_id: None,
            ..slack_hi()
        },
        EnqueueInput {
            payload: None,
            ..slack_hi()
        },
    ];
    for input in inputs {
        let result = uc.execute_at(t0(), input).await;
        assert!(
            matches!(result, Err(OutboxServiceError::Validation(_))),
            "expected Validation, got {result:?}"
        );
    }
    assert_eq!(repo.write_count(), 0);
}

#[tokio::test]
async fn should_return_winner_when_concurrent_insert_wins() {
    // Another enqueuer inserted the same key between our lookup and our insert.
    let mut winner = queued_entry("slack", "evt-42", t0());
    winner.idempotency_key =
        idempotency_key("slack", "post_message", "evt-42", &json!({ "text": "hi" })).unwrap();
    let repo = InMemoryOutboxRepo::new(vec![winner.clone()]);
    repo.hide_next_key_lookups(1);
    let uc = EnqueueUseCase { repo: repo.clone() };

    let out = uc.execute_at(t0(), slack_hi()).await.unwrap();

    assert_eq!(out.entry_id, winner.id);
    assert!(!out.created);
    assert_eq!(repo.entries_handle().lock().unwrap().len(), 1);
    assert_eq!(repo.write_count(), 0);
}
