mod helpers;

use futures::stream::TryStreamExt;
use sqlx::Row;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use helpers::*;
use message_inconsistencies::application::services::{
    Context, RunOutcome, RunningOptions, SolveMessageInconsistenciesService,
};
use message_inconsistencies::domain::entities::{MessageFlags, MessageId, MessageUid};
use message_inconsistencies::domain::ports::imap_uid_repository::ImapUidRepository;
use message_inconsistencies::domain::ports::message_id_repository::MessageIdRepository;
use message_inconsistencies::infrastructure::persistence::{
    SqlImapUidRepository, SqlMessageIdRepository,
};

#[tokio::test]
async fn test_imap_uid_scan_pages_in_key_order() {
    let db = setup_test_db().await;
    let repo = SqlImapUidRepository::with_page_size(db.clone(), 2);
    let (m1, m2) = (mailbox(M1), mailbox(M2));
    for (mailbox_id, uid) in [(m2, 1), (m1, 3), (m1, 1), (m2, 2), (m1, 2)] {
        repo.upsert(&entry(mailbox_id, MessageId::new(), uid))
            .await
            .unwrap();
    }

    let scanned: Vec<_> = repo.scan_all().try_collect().await.unwrap();

    let keys: Vec<_> = scanned
        .iter()
        .map(|e| (e.mailbox_id(), e.uid().as_u64()))
        .collect();
    assert_eq!(keys, vec![(m1, 1), (m1, 2), (m1, 3), (m2, 1), (m2, 2)]);

    teardown_test_db(db).await;
}

#[tokio::test]
async fn test_message_id_scan_covers_exact_page_multiples() {
    let db = setup_test_db().await;
    let repo = SqlMessageIdRepository::with_page_size(db.clone(), 2);
    let m1 = mailbox(M1);
    for uid in 1..=4 {
        repo.upsert(&entry(m1, MessageId::new(), uid)).await.unwrap();
    }

    let scanned: Vec<_> = repo.scan_all().try_collect().await.unwrap();

    assert_eq!(scanned.len(), 4);
    let mut message_ids: Vec<String> = scanned.iter().map(|e| e.message_id().serialize()).collect();
    let sorted = {
        let mut sorted = message_ids.clone();
        sorted.sort();
        sorted
    };
    assert_eq!(message_ids, sorted);
    message_ids.dedup();
    assert_eq!(message_ids.len(), 4);

    teardown_test_db(db).await;
}

#[tokio::test]
async fn test_rows_round_trip_through_sqlite() {
    let db = setup_test_db().await;
    let imap_uid = SqlImapUidRepository::new(db.clone());
    let message_id = SqlMessageIdRepository::new(db.clone());
    let (m1, x) = (mailbox(M1), message(X));
    let flags = MessageFlags::empty()
        .with(MessageFlags::SEEN)
        .with("$Important");
    let row = entry_with(m1, x, 42, 7, flags);

    imap_uid.upsert(&row).await.unwrap();
    message_id.upsert(&row).await.unwrap();

    assert_eq!(imap_uid.get(&m1, MessageUid::of(42)).await.unwrap(), Some(row.clone()));
    assert_eq!(message_id.get(&x, &m1).await.unwrap(), Some(row));
    assert_eq!(imap_uid.get(&m1, MessageUid::of(43)).await.unwrap(), None);

    teardown_test_db(db).await;
}

#[tokio::test]
async fn test_upsert_replaces_and_delete_removes() {
    let db = setup_test_db().await;
    let repo = SqlMessageIdRepository::new(db.clone());
    let (m1, x) = (mailbox(M1), message(X));

    repo.upsert(&entry(m1, x, 7)).await.unwrap();
    repo.upsert(&entry(m1, x, 5)).await.unwrap();
    let current = repo.get(&x, &m1).await.unwrap().unwrap();
    assert_eq!(current.uid(), MessageUid::of(5));

    repo.delete(&x, &m1).await.unwrap();
    assert!(repo.get(&x, &m1).await.unwrap().is_none());
    // Deleting a missing row is not an error.
    repo.delete(&x, &m1).await.unwrap();

    teardown_test_db(db).await;
}

#[tokio::test]
async fn test_reconciliation_against_sqlite() {
    let db = setup_test_db().await;
    let imap_uid = Arc::new(SqlImapUidRepository::with_page_size(db.clone(), 3));
    let message_id = Arc::new(SqlMessageIdRepository::with_page_size(db.clone(), 3));
    let (m1, m2, x, y) = (mailbox(M1), mailbox(M2), message(X), message(Y));

    // Missing, stale and orphaned messageId rows plus a few healthy ones.
    imap_uid.upsert(&entry(m1, x, 5)).await.unwrap();
    imap_uid.upsert(&entry(m2, y, 1)).await.unwrap();
    message_id.upsert(&entry(m2, y, 7)).await.unwrap();
    message_id.upsert(&entry(m2, x, 3)).await.unwrap();
    for uid in 10..15 {
        let row = entry(m1, MessageId::new(), uid);
        imap_uid.upsert(&row).await.unwrap();
        message_id.upsert(&row).await.unwrap();
    }

    let service = SolveMessageInconsistenciesService::new(
        imap_uid.clone(),
        message_id.clone(),
        Arc::new(FrozenTimeService::default()),
    );
    let context = Context::new();
    let outcome = service
        .fix_message_inconsistencies(
            &context,
            &RunningOptions::default(),
            &CancellationToken::new(),
        )
        .await
        .unwrap();

    assert_eq!(outcome, RunOutcome::Completed);
    let snapshot = context.snapshot();
    assert_eq!(snapshot.processed_imap_uid_entries, 7);
    assert_eq!(snapshot.added_message_id_entries, 1);
    assert_eq!(snapshot.updated_message_id_entries, 1);
    assert_eq!(snapshot.removed_message_id_entries, 1);
    assert!(snapshot.errors.is_empty());

    assert_eq!(
        message_id.get(&x, &m1).await.unwrap().unwrap().uid(),
        MessageUid::of(5)
    );
    assert_eq!(
        message_id.get(&y, &m2).await.unwrap().unwrap().uid(),
        MessageUid::of(1)
    );
    assert!(message_id.get(&x, &m2).await.unwrap().is_none());

    let context = Context::new();
    service
        .fix_message_inconsistencies(
            &context,
            &RunningOptions::default(),
            &CancellationToken::new(),
        )
        .await
        .unwrap();
    assert_eq!(context.snapshot().total_fixed(), 0);

    teardown_test_db(db).await;
}

#[tokio::test]
async fn test_every_pooled_connection_gets_the_pragmas() {
    let db = setup_test_db().await;

    let mut connections = Vec::new();
    for _ in 0..3 {
        connections.push(db.pool().acquire().await.unwrap());
    }
    for conn in connections.iter_mut() {
        let busy_timeout: i64 = sqlx::query("PRAGMA busy_timeout")
            .fetch_one(&mut **conn)
            .await
            .unwrap()
            .try_get(0)
            .unwrap();
        assert_eq!(busy_timeout, 5000);

        // NORMAL
        let synchronous: i64 = sqlx::query("PRAGMA synchronous")
            .fetch_one(&mut **conn)
            .await
            .unwrap()
            .try_get(0)
            .unwrap();
        assert_eq!(synchronous, 1);
    }
    drop(connections);

    teardown_test_db(db).await;
}
