//! Article lifecycle over the in-memory store.

mod common;

use std::time::Duration;

use assert_matches::assert_matches;
use common::{
    content, create, create_unreviewed, drain, start_engine, start_faulty_engine, wait_for, Faults,
};
use wikigraph_core::article::{ChangeType, ReviewState};
use wikigraph_core::diff::DiffOp;
use wikigraph_core::error::CoreError;
use wikigraph_engine::lifecycle::RejectOutcome;
use wikigraph_engine::EngineError;
use wikigraph_events::EventPayload;

#[tokio::test]
async fn test_create_reviewed_article() {
    let (engine, _store, bus) = start_engine().await;
    let mut events = bus.subscribe();

    let saved = create(&engine, "Western Digital", "They make hard drives.", &["company"]).await;
    assert_eq!(saved.id(), "western-digital");
    assert_eq!(saved.version, 1);
    assert_eq!(saved.change_type, ChangeType::Created);
    assert!(saved.history_entry.is_some());

    let record = engine.articles().get("western-digital").await.unwrap().unwrap();
    assert_eq!(record.version, 1);
    let reviewed = record.article.reviewed.as_ref().unwrap();
    assert_eq!(reviewed.created_by.as_deref(), Some("alice"));
    assert!(!record.article.unreviewed_pending);

    let history = engine.articles().history(record.article.uuid).await.unwrap();
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].updated_time, reviewed.updated_time);
    assert_eq!(history[0].article_id, "western-digital");

    let published = drain(&mut events);
    assert!(published.iter().any(|e| matches!(e, EventPayload::ArticleCreated { id, .. } if id == "western-digital")));
    assert!(published.iter().any(|e| matches!(
        e,
        EventPayload::ArticleChanged { change_type: ChangeType::Created, .. }
    )));

    engine.shutdown().await;
}

#[tokio::test]
async fn test_create_unreviewed_article() {
    let (engine, _store, bus) = start_engine().await;
    let mut events = bus.subscribe();

    let saved = create_unreviewed(&engine, "Mario", "A plumber.", &["character"]).await;
    assert_eq!(saved.change_type, ChangeType::CreatedNeedsReview);
    assert!(saved.history_entry.is_none());

    let record = engine.articles().get("mario").await.unwrap().unwrap();
    assert!(record.article.reviewed.is_none());
    assert!(record.article.unreviewed_pending);
    assert_eq!(record.article.unreviewed_history.len(), 1);
    assert!(engine.articles().history(record.article.uuid).await.unwrap().is_empty());

    let listed = engine.articles().list_unreviewed().await.unwrap();
    assert_eq!(listed.len(), 1);
    assert_eq!(listed[0].id, "mario");
    assert_eq!(engine.articles().unreviewed_count().await.unwrap(), 1);

    assert_matches!(
        wait_for(&mut events, |e| matches!(e, EventPayload::UnreviewedCount { .. })).await,
        EventPayload::UnreviewedCount { count: 1 }
    );

    engine.shutdown().await;
}

#[tokio::test]
async fn test_duplicate_create_is_rejected() {
    let (engine, _store, _bus) = start_engine().await;
    create(&engine, "Mario", "A plumber.", &["character"]).await;

    let err = engine
        .articles()
        .create(content("MARIO", "Again.", &["character"]), "bob", ReviewState::Reviewed)
        .await
        .unwrap_err();
    assert_matches!(err, EngineError::Core(CoreError::AlreadyExists(id)) if id == "mario");
}

#[tokio::test]
async fn test_invalid_content_is_rejected_before_queueing() {
    let (engine, _store, _bus) = start_engine().await;
    let err = engine
        .articles()
        .create(content("!!!", "Body.", &["x"]), "bob", ReviewState::Reviewed)
        .await
        .unwrap_err();
    assert_matches!(err, EngineError::Core(CoreError::InvalidTitle(_)));
    assert!(engine.articles().get("").await.unwrap().is_none());
}

#[tokio::test]
async fn test_rename_moves_article_and_keeps_history() {
    let (engine, _store, bus) = start_engine().await;
    let created = create(&engine, "Mario", "A plumber.", &["character"]).await;
    let uuid = created.article.uuid;
    tokio::time::sleep(Duration::from_millis(5)).await;
    let mut events = bus.subscribe();

    let renamed = engine
        .articles()
        .update(
            "mario",
            created.version,
            content("Super Mario", "A plumber.\nJumps a lot.", &["character", "hero"]),
            "carol",
            ReviewState::Reviewed,
        )
        .await
        .unwrap();
    assert_eq!(renamed.id(), "super-mario");
    assert_eq!(renamed.previous_id.as_deref(), Some("mario"));
    assert!(renamed.cleanup_error.is_none());

    assert!(engine.articles().get("mario").await.unwrap().is_none());
    let record = engine.articles().get("super-mario").await.unwrap().unwrap();
    assert_eq!(record.article.uuid, uuid);
    let reviewed = record.article.reviewed.as_ref().unwrap();
    assert_eq!(reviewed.created_by.as_deref(), Some("alice"));
    assert_eq!(reviewed.updated_by, "carol");

    let history = engine.articles().history(uuid).await.unwrap();
    assert_eq!(history.len(), 2);
    assert_eq!(history[0].article_id, "mario");
    assert_eq!(history[1].article_id, "super-mario");

    let diff = engine
        .articles()
        .history_diff(history[1].entry_id, history[0].entry_id)
        .await
        .unwrap();
    assert_eq!(diff.title, Some(("Mario".to_string(), "Super Mario".to_string())));
    assert_eq!(diff.tags_added, vec!["hero".to_string()]);
    assert!(diff
        .body
        .iter()
        .any(|line| line.op == DiffOp::Added && line.text == "Jumps a lot."));

    let published = drain(&mut events);
    assert!(published.iter().any(|e| matches!(
        e,
        EventPayload::ArticleChanged { id, old_id: Some(old), .. } if id == "super-mario" && old == "mario"
    )));

    engine.shutdown().await;
}

#[tokio::test]
async fn test_rename_onto_existing_article_fails() {
    let (engine, _store, _bus) = start_engine().await;
    let mario = create(&engine, "Mario", "A plumber.", &["character"]).await;
    create(&engine, "Luigi", "His brother.", &["character"]).await;

    let err = engine
        .articles()
        .update("mario", mario.version, content("Luigi", "x", &["a"]), "bob", ReviewState::Reviewed)
        .await
        .unwrap_err();
    assert_matches!(err, EngineError::Core(CoreError::AlreadyExists(id)) if id == "luigi");
    assert!(engine.articles().get("mario").await.unwrap().is_some());
}

#[tokio::test]
async fn test_stale_version_is_a_conflict() {
    let (engine, _store, _bus) = start_engine().await;
    let created = create(&engine, "Mario", "A plumber.", &["character"]).await;
    let updated = engine
        .articles()
        .update(
            "mario",
            created.version,
            content("Mario", "A plumber from Brooklyn.", &["character"]),
            "bob",
            ReviewState::Reviewed,
        )
        .await
        .unwrap();
    assert_eq!(updated.version, 2);

    let err = engine
        .articles()
        .update(
            "mario",
            created.version,
            content("Mario", "Overwritten.", &["character"]),
            "carol",
            ReviewState::Reviewed,
        )
        .await
        .unwrap_err();
    assert_matches!(
        err,
        EngineError::Core(CoreError::VersionConflict { expected: 1, actual: 2, .. })
    );

    let record = engine.articles().get("mario").await.unwrap().unwrap();
    assert_eq!(record.version, 2);
    assert_eq!(
        record.article.reviewed.as_ref().unwrap().body,
        "A plumber from Brooklyn."
    );
}

#[tokio::test]
async fn test_update_missing_article() {
    let (engine, _store, _bus) = start_engine().await;
    let err = engine
        .articles()
        .update("nobody", 1, content("Nobody", "x", &["a"]), "bob", ReviewState::Keep)
        .await
        .unwrap_err();
    assert_matches!(err, EngineError::Core(CoreError::NotFound { .. }));
}

#[tokio::test]
async fn test_keep_stays_unreviewed_while_pending() {
    let (engine, _store, _bus) = start_engine().await;
    let created = create(&engine, "Peach", "A princess.", &["character"]).await;

    let pending = engine
        .articles()
        .update(
            "peach",
            created.version,
            content("Peach", "A princess of the Mushroom Kingdom.", &["character"]),
            "bob",
            ReviewState::Unreviewed,
        )
        .await
        .unwrap();
    assert_eq!(pending.change_type, ChangeType::UpdatedNeedsReview);

    let kept = engine
        .articles()
        .update(
            "peach",
            pending.version,
            content("Peach", "A princess. Rules the Mushroom Kingdom.", &["character"]),
            "bob",
            ReviewState::Keep,
        )
        .await
        .unwrap();
    assert_eq!(kept.change_type, ChangeType::UpdatedNeedsReview);
    assert_eq!(kept.article.unreviewed_history.len(), 2);
    assert_eq!(kept.article.reviewed.as_ref().unwrap().body, "A princess.");
}

#[tokio::test]
async fn test_approve_promotes_pending_changes() {
    let (engine, _store, _bus) = start_engine().await;
    let created = create_unreviewed(&engine, "Luigi", "Mario's brother.", &["character"]).await;

    let approved = engine
        .articles()
        .approve("luigi", created.version, "carol")
        .await
        .unwrap();
    assert_eq!(approved.change_type, ChangeType::Updated);

    let record = engine.articles().get("luigi").await.unwrap().unwrap();
    let reviewed = record.article.reviewed.as_ref().unwrap();
    assert_eq!(reviewed.body, "Mario's brother.");
    assert_eq!(reviewed.updated_by, "carol");
    assert!(!record.article.unreviewed_pending);
    assert!(record.article.unreviewed_history.is_empty());

    let history = engine.articles().history(record.article.uuid).await.unwrap();
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].unreviewed_history.len(), 1);
    assert_eq!(history[0].unreviewed_history[0].updated_by, "bob");

    let err = engine
        .articles()
        .approve("luigi", record.version, "carol")
        .await
        .unwrap_err();
    assert_matches!(err, EngineError::Core(CoreError::Validation(_)));
}

#[tokio::test]
async fn test_reject_restores_reviewed_state() {
    let (engine, _store, _bus) = start_engine().await;
    let created = create(&engine, "Peach", "A princess.", &["character"]).await;
    let pending = engine
        .articles()
        .update(
            "peach",
            created.version,
            content("Peach", "Vandalized.", &["character"]),
            "mallory",
            ReviewState::Unreviewed,
        )
        .await
        .unwrap();

    let outcome = engine
        .articles()
        .reject("peach", pending.version, "carol")
        .await
        .unwrap();
    let saved = assert_matches!(outcome, RejectOutcome::Reverted(saved) => saved);
    assert!(!saved.article.unreviewed_pending);
    assert_eq!(saved.article.unreviewed.as_ref().unwrap().body, "A princess.");
    assert!(saved.article.unreviewed_history.is_empty());
    assert_eq!(engine.articles().unreviewed_count().await.unwrap(), 0);
}

#[tokio::test]
async fn test_reject_undoes_pending_rename() {
    let (engine, _store, bus) = start_engine().await;
    let created = create(&engine, "Mario", "A plumber.", &["character"]).await;
    let pending = engine
        .articles()
        .update(
            "mario",
            created.version,
            content("Super Mario", "A plumber.", &["character"]),
            "mallory",
            ReviewState::Unreviewed,
        )
        .await
        .unwrap();
    assert_eq!(pending.id(), "super-mario");
    let mut events = bus.subscribe();

    let outcome = engine
        .articles()
        .reject("super-mario", pending.version, "carol")
        .await
        .unwrap();
    let saved = assert_matches!(outcome, RejectOutcome::Reverted(saved) => saved);
    assert_eq!(saved.id(), "mario");
    assert_eq!(saved.previous_id.as_deref(), Some("super-mario"));
    assert!(saved.cleanup_error.is_none());

    assert!(engine.articles().get("super-mario").await.unwrap().is_none());
    let record = engine.articles().get("mario").await.unwrap().unwrap();
    assert_eq!(record.article.id, "mario");
    assert_eq!(record.article.title(), Some("Mario"));
    assert_eq!(record.article.uuid, created.article.uuid);
    assert!(!record.article.unreviewed_pending);

    assert!(drain(&mut events).iter().any(|e| matches!(
        e,
        EventPayload::ArticleChanged { id, old_id: Some(old), .. } if id == "mario" && old == "super-mario"
    )));
}

#[tokio::test]
async fn test_reject_cannot_rename_back_onto_taken_id() {
    let (engine, _store, _bus) = start_engine().await;
    let created = create(&engine, "Mario", "A plumber.", &["character"]).await;
    let pending = engine
        .articles()
        .update(
            "mario",
            created.version,
            content("Super Mario", "A plumber.", &["character"]),
            "mallory",
            ReviewState::Unreviewed,
        )
        .await
        .unwrap();
    create(&engine, "Mario", "Another plumber.", &["character"]).await;

    let err = engine
        .articles()
        .reject("super-mario", pending.version, "carol")
        .await
        .unwrap_err();
    assert_matches!(err, EngineError::Core(CoreError::AlreadyExists(id)) if id == "mario");
    let kept = engine.articles().get("super-mario").await.unwrap().unwrap();
    assert!(kept.article.unreviewed_pending);
}

#[tokio::test]
async fn test_failed_history_write_is_reported_and_rename_completes() {
    let (engine, store, _bus) = start_faulty_engine().await;
    let created = create(&engine, "Mario", "A plumber.", &["character"]).await;
    assert!(created.history_error.is_none());
    Faults::set(&store.faults.history_writes);

    let renamed = engine
        .articles()
        .update(
            "mario",
            created.version,
            content("Super Mario", "A plumber.", &["character"]),
            "carol",
            ReviewState::Reviewed,
        )
        .await
        .unwrap();
    assert_eq!(renamed.id(), "super-mario");
    assert!(renamed.history_error.is_some());
    assert!(renamed.cleanup_error.is_none());
    assert!(engine.articles().get("mario").await.unwrap().is_none());
    assert!(engine.articles().get("super-mario").await.unwrap().is_some());

    let history = engine.articles().history(created.article.uuid).await.unwrap();
    assert_eq!(history.len(), 1);

    let luigi = create(&engine, "Luigi", "His brother.", &["character"]).await;
    assert!(luigi.history_error.is_some());
    assert!(engine.articles().get("luigi").await.unwrap().is_some());
}

#[tokio::test]
async fn test_reject_never_reviewed_article_deletes_it() {
    let (engine, _store, _bus) = start_engine().await;
    let created = create_unreviewed(&engine, "Spam", "Buy now.", &["junk"]).await;

    let outcome = engine
        .articles()
        .reject("spam", created.version, "carol")
        .await
        .unwrap();
    assert_matches!(outcome, RejectOutcome::Deleted(deleted) if deleted.id == "spam");
    assert!(engine.articles().get("spam").await.unwrap().is_none());
}

#[tokio::test]
async fn test_delete_keeps_history() {
    let (engine, _store, bus) = start_engine().await;
    let created = create(&engine, "Bowser", "A turtle king.", &["villain"]).await;
    let mut events = bus.subscribe();

    let deleted = engine.articles().delete("bowser", "carol").await.unwrap();
    assert_eq!(deleted.title.as_deref(), Some("Bowser"));
    assert!(engine.articles().get("bowser").await.unwrap().is_none());
    assert_eq!(engine.articles().history(created.article.uuid).await.unwrap().len(), 1);
    assert!(drain(&mut events)
        .iter()
        .any(|e| matches!(e, EventPayload::ArticleDeleted { id, .. } if id == "bowser")));

    assert_matches!(
        engine.articles().delete("bowser", "carol").await,
        Err(EngineError::Core(CoreError::NotFound { .. }))
    );
}

#[tokio::test]
async fn test_resolve_by_title_and_alias() {
    let (engine, _store, _bus) = start_engine().await;
    create(&engine, "Western Digital", "Drives.", &["company", "alias:WD"]).await;
    engine.rebuild_index().await.unwrap();

    let by_title = engine.articles().resolve("Western Digital").await.unwrap().unwrap();
    assert_eq!(by_title.article.id, "western-digital");
    let by_alias = engine.articles().resolve("wd").await.unwrap().unwrap();
    assert_eq!(by_alias.article.id, "western-digital");
    assert!(engine.articles().resolve("seagate").await.unwrap().is_none());
}

#[tokio::test]
async fn test_tag_search_and_counts() {
    let (engine, _store, _bus) = start_engine().await;
    create(&engine, "Mario", "A plumber. #nintendo", &["character", "color:red"]).await;
    create(&engine, "Luigi", "A plumber.", &["character", "color:green"]).await;
    create(&engine, "Zelda", "A princess.", &["princess"]).await;

    let characters = engine.articles().search_by_tag("character", None).await.unwrap();
    let ids: Vec<_> = characters.iter().map(|s| s.id.as_str()).collect();
    assert_eq!(ids, vec!["luigi", "mario"]);

    let red = engine.articles().search_by_tag("color", Some("red")).await.unwrap();
    assert_eq!(red.len(), 1);
    assert_eq!(red[0].id, "mario");

    let hashtag = engine.articles().search_by_tag("nintendo", None).await.unwrap();
    assert_eq!(hashtag.len(), 1);

    let counts = engine.articles().tag_counts().await.unwrap();
    let character = counts.iter().find(|b| b.key == "character").unwrap();
    assert_eq!(character.doc_count, 2);
    let princess = counts.iter().find(|b| b.key == "princess").unwrap();
    assert_eq!(princess.doc_count, 1);
}
