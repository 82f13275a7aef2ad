//! Saving records: ordering, batching, failures and transactions.

use keel_core::{
    AdapterError, CommitOutcome, CommitScope, CoreError, RecordState, RelationshipData, SaveKind,
    StoreConfig, Value,
};
use keel_testkit::prelude::*;

fn none() -> keel_core::Attributes {
    attrs::<Value>([])
}

fn created_types(adapter: &MemoryAdapter) -> Vec<String> {
    adapter
        .calls()
        .into_iter()
        .filter(|call| call.kind() == CallKind::Create)
        .map(|call| call.type_name().to_string())
        .collect()
}

#[tokio::test]
async fn saving_a_new_record_assigns_its_id() {
    let t = TestStore::blog();
    let tom = t.create_record("person", attrs([("name", "Tom")])).unwrap();
    let all = t.all_records_of("person").unwrap();

    t.save(tom).await.unwrap();

    let id = t.id_of(tom).unwrap().unwrap();
    assert_eq!(id, "1001");
    assert_eq!(t.state(tom).unwrap(), RecordState::Saved);
    assert!(!t.is_new(tom).unwrap());
    assert!(!t.is_dirty(tom).unwrap());
    assert_eq!(t.peek("person", "1001"), Some(tom));
    assert_eq!(t.array(all).unwrap().records, vec![tom]);
    assert_eq!(
        t.adapter.stored("person", "1001").unwrap().attributes.get("name"),
        Some(&Value::from("Tom"))
    );
    assert_eq!(t.stats().create_calls, 1);
    assert_eq!(t.stats().saves_succeeded, 1);
}

#[tokio::test]
async fn saving_an_update_sends_the_current_attributes() {
    let t = TestStore::blog();
    let dale = t.push(payloads::person("1", "Dale")).unwrap();
    t.set(dale, "name", "Scumbag Dale").unwrap();
    assert_eq!(t.state(dale).unwrap(), RecordState::Updated);

    t.save(dale).await.unwrap();

    assert_eq!(t.state(dale).unwrap(), RecordState::Saved);
    assert!(t.changed_attributes(dale).unwrap().is_empty());
    assert_eq!(
        t.adapter.calls(),
        vec![Call::Update {
            type_name: "person".to_string(),
            id: "1".to_string()
        }]
    );
    assert_eq!(
        t.adapter.stored("person", "1").unwrap().attributes.get("name"),
        Some(&Value::from("Scumbag Dale"))
    );
}

#[tokio::test]
async fn saving_a_clean_record_sends_nothing() {
    let t = TestStore::blog();
    let dale = t.push(payloads::person("1", "Dale")).unwrap();

    let report = t.commit(CommitScope::Records(vec![dale])).await.unwrap();

    assert_eq!(report.outcome(dale), Some(&CommitOutcome::Unchanged));
    assert!(report.is_success());
    assert!(t.adapter.calls().is_empty());
}

#[tokio::test]
async fn server_stamped_attributes_are_applied() {
    let t = TestStore::blog();
    t.adapter.stamp("person", "role", "member");
    let tom = t.create_record("person", attrs([("name", "Tom")])).unwrap();
    assert_eq!(t.attr(tom, "role").unwrap(), Value::from("reader"));

    t.save(tom).await.unwrap();

    assert_eq!(t.attr(tom, "role").unwrap(), Value::from("member"));
    assert!(!t.is_dirty(tom).unwrap());
}

#[tokio::test]
async fn parents_are_created_before_their_children() {
    let t = TestStore::blog();
    let comment = t.create_record("comment", attrs([("body", "first")])).unwrap();
    let post = t.create_record("post", attrs([("title", "Rails")])).unwrap();
    let author = t.create_record("person", attrs([("name", "Tom")])).unwrap();
    t.set_belongs_to(comment, "post", Some(post)).unwrap();
    t.set_belongs_to(post, "author", Some(author)).unwrap();

    let set = t.commit_set(&CommitScope::AllDirty).unwrap();
    assert_eq!(set.len(), 3);
    assert_eq!(set.kind_of(post.client_id()), Some(SaveKind::Create));

    let report = t.commit(CommitScope::AllDirty).await.unwrap();

    assert_eq!(report.saved(), 3);
    assert_eq!(created_types(&t.adapter), vec!["person", "post", "comment"]);

    let author_id = t.id_of(author).unwrap().unwrap();
    let post_id = t.id_of(post).unwrap().unwrap();
    let stored_post = t.adapter.stored("post", &post_id).unwrap();
    assert_eq!(
        stored_post.relationships.get("author"),
        Some(&RelationshipData::One(Some(ident("person", &author_id))))
    );

    for record in [comment, post, author] {
        assert_eq!(t.state(record).unwrap(), RecordState::Saved);
        assert!(!t.is_dirty(record).unwrap());
    }
    assert_eq!(t.related_one(comment, "post").unwrap(), Some(post));
    assert_eq!(t.related_many(author, "posts").unwrap(), vec![post]);
}

#[tokio::test]
async fn a_failed_parent_fails_its_unsaved_children() {
    let t = TestStore::blog();
    let post = t.create_record("post", none()).unwrap();
    let comment = t.create_record("comment", none()).unwrap();
    t.add_to_has_many(post, "comments", comment).unwrap();
    t.adapter
        .fail_next(CallKind::Create, "post", AdapterError::fatal("server down"));

    let report = t.commit(CommitScope::AllDirty).await.unwrap();

    assert_eq!(report.failed(), 2);
    assert_eq!(created_types(&t.adapter), vec!["post"]);
    assert_eq!(t.state(post).unwrap(), RecordState::Error(SaveKind::Create));
    assert_eq!(t.state(comment).unwrap(), RecordState::Error(SaveKind::Create));
    assert!(t.id_of(comment).unwrap().is_none());
    assert_eq!(t.related_one(comment, "post").unwrap(), Some(post));
}

#[tokio::test]
async fn children_are_deleted_before_their_parents() {
    let t = TestStore::blog();
    let post_payload = seed_post_with_comments(&t.adapter, "1", &["1"]);
    let post = t.push(post_payload).unwrap();
    let comment = t.push(payloads::comment("1", "first", "1")).unwrap();

    t.delete_record(post).unwrap();
    t.delete_record(comment).unwrap();
    assert_eq!(t.state(post).unwrap(), RecordState::DeletedDirty);

    let report = t.commit(CommitScope::AllDirty).await.unwrap();

    assert_eq!(report.saved(), 2);
    let deletes: Vec<String> = t
        .adapter
        .calls()
        .into_iter()
        .filter(|call| call.kind() == CallKind::Delete)
        .map(|call| call.type_name().to_string())
        .collect();
    assert_eq!(deletes, vec!["comment", "post"]);

    for record in [post, comment] {
        assert_eq!(t.state(record).unwrap(), RecordState::DeletedSaved);
        assert!(t.is_deleted(record).unwrap());
        assert!(t.is_live(record));
    }
    assert!(t.adapter.stored("post", "1").is_none());
    assert!(t.adapter.stored("comment", "1").is_none());
    assert!(t.peek("post", "1").is_none());
}

#[tokio::test]
async fn deleting_a_new_record_needs_no_call() {
    let t = TestStore::blog();
    let tom = t.create_record("person", attrs([("name", "Tom")])).unwrap();
    let all = t.all_records_of("person").unwrap();

    t.delete_record(tom).unwrap();

    assert_eq!(t.state(tom).unwrap(), RecordState::DeletedSaved);
    assert!(t.array(all).unwrap().is_empty());
    let report = t.commit(CommitScope::AllDirty).await.unwrap();
    assert!(report.outcomes.is_empty());
    assert!(t.adapter.calls().is_empty());
}

#[tokio::test]
async fn bulk_commit_groups_records_by_type() {
    let t = TestStore::blog();
    t.adapter.set_bulk(true);
    let tom = t.create_record("person", attrs([("name", "Tom")])).unwrap();
    let yehuda = t.create_record("person", attrs([("name", "Yehuda")])).unwrap();
    let rust = t.create_record("tag", attrs([("name", "rust")])).unwrap();

    let report = t.commit(CommitScope::AllDirty).await.unwrap();

    assert_eq!(report.saved(), 3);
    let batches: Vec<Call> = t
        .adapter
        .calls()
        .into_iter()
        .filter(|call| call.kind() == CallKind::Batch)
        .collect();
    assert!(batches.contains(&Call::Batch {
        kind: CallKind::Create,
        type_name: "person".to_string(),
        size: 2
    }));
    assert!(batches.contains(&Call::Batch {
        kind: CallKind::Create,
        type_name: "tag".to_string(),
        size: 1
    }));
    assert_eq!(batches.len(), 2);
    for record in [tom, yehuda, rust] {
        assert!(t.id_of(record).unwrap().is_some());
    }
}

#[tokio::test]
async fn bulk_commit_can_be_turned_off() {
    let t = TestStore::with_config(blog_schema(), StoreConfig::new().bulk_commit(false));
    t.adapter.set_bulk(true);
    t.create_record("person", attrs([("name", "Tom")])).unwrap();
    t.create_record("person", attrs([("name", "Yehuda")])).unwrap();

    t.commit(CommitScope::AllDirty).await.unwrap();

    assert_eq!(t.adapter.calls_of(CallKind::Batch), 0);
    assert_eq!(t.adapter.calls_of(CallKind::Create), 2);
}

#[tokio::test]
async fn one_failure_does_not_touch_the_other_records() {
    let t = TestStore::blog();
    let tom = t.create_record("person", attrs([("name", "Tom")])).unwrap();
    let yehuda = t.create_record("person", attrs([("name", "Yehuda")])).unwrap();
    t.adapter
        .fail_next(CallKind::Create, "person", AdapterError::fatal("timeout"));

    let report = t.commit(CommitScope::AllDirty).await.unwrap();

    assert_eq!(report.saved(), 1);
    assert_eq!(report.failed(), 1);
    assert!(!report.is_success());

    let states = [t.state(tom).unwrap(), t.state(yehuda).unwrap()];
    assert!(states.contains(&RecordState::Saved));
    assert!(states.contains(&RecordState::Error(SaveKind::Create)));
    let failed = if states[0] == RecordState::Saved { yehuda } else { tom };
    assert!(t.is_error(failed).unwrap());
    assert!(t.id_of(failed).unwrap().is_none());
    assert!(matches!(t.adapter_error(failed).unwrap(), Some(AdapterError::Fatal(_))));
    assert_eq!(t.stats().saves_failed, 1);
}

#[tokio::test]
async fn a_failed_update_can_be_edited_and_retried() {
    let t = TestStore::blog();
    let dale = t.push(payloads::person("1", "Dale")).unwrap();
    t.set(dale, "name", "Scumbag Dale").unwrap();
    t.adapter
        .fail_next(CallKind::Update, "person", AdapterError::fatal("server down"));

    let err = t.save(dale).await.unwrap_err();

    assert!(matches!(err, CoreError::Adapter(AdapterError::Fatal(_))));
    assert_eq!(t.state(dale).unwrap(), RecordState::Error(SaveKind::Update));
    assert_eq!(t.attr(dale, "name").unwrap(), Value::from("Scumbag Dale"));

    // Failed records are not picked up again until edited.
    assert!(t.commit_set(&CommitScope::AllDirty).unwrap().is_empty());
    assert!(matches!(
        t.save(dale).await,
        Err(CoreError::InvalidState { .. })
    ));

    t.set(dale, "name", "Dale Again").unwrap();
    assert_eq!(t.state(dale).unwrap(), RecordState::Updated);
    assert!(t.adapter_error(dale).unwrap().is_some());

    t.save(dale).await.unwrap();
    assert_eq!(t.state(dale).unwrap(), RecordState::Saved);
    assert!(t.adapter_error(dale).unwrap().is_none());
}

#[tokio::test]
async fn invalid_records_cannot_be_saved_until_edited() {
    let t = TestStore::blog();
    let tom = t.create_record("person", attrs([("name", "Tom")])).unwrap();
    t.adapter
        .fail_next(CallKind::Create, "person", invalid("name", "is taken"));
    assert!(t.save(tom).await.is_err());

    let err = t.save(tom).await.unwrap_err();

    assert!(matches!(err, CoreError::InvalidState { .. }));
    assert_eq!(t.adapter.calls_of(CallKind::Create), 1);
    assert_eq!(t.stats().saves_invalid, 1);
}

#[tokio::test]
async fn unloading_is_refused_while_a_save_is_in_flight() {
    let t = TestStore::blog();
    let tom = t.create_record("person", attrs([("name", "Tom")])).unwrap();
    t.adapter.pause();

    let (saved, unloaded) = tokio::join!(t.save(tom), async {
        tokio::task::yield_now().await;
        assert!(t.is_saving(tom).unwrap());
        let result = t.unload(tom);
        t.adapter.resume();
        result
    });

    saved.unwrap();
    assert!(matches!(unloaded, Err(CoreError::InvalidState { .. })));
    assert!(t.is_live(tom));
    assert_eq!(t.state(tom).unwrap(), RecordState::Saved);
}

#[tokio::test]
async fn edits_are_refused_while_a_save_is_in_flight() {
    let t = TestStore::blog();
    let tom = t.create_record("person", attrs([("name", "Tom")])).unwrap();
    t.adapter.pause();

    let (saved, edited) = tokio::join!(t.save(tom), async {
        tokio::task::yield_now().await;
        let result = (t.set(tom, "name", "Tomster"), t.rollback(tom));
        t.adapter.resume();
        result
    });

    saved.unwrap();
    assert!(matches!(edited.0, Err(CoreError::InvalidState { .. })));
    assert!(matches!(edited.1, Err(CoreError::InvalidState { .. })));
    assert_eq!(t.attr(tom, "name").unwrap(), Value::from("Tom"));
}

#[tokio::test]
async fn handles_and_transactions_stay_in_their_store() {
    let a = TestStore::blog();
    let b = TestStore::blog();
    let tom = a.create_record("person", attrs([("name", "Tom")])).unwrap();

    assert!(matches!(
        b.save(tom).await,
        Err(CoreError::RecordNotLive { .. })
    ));
    assert!(!b.is_live(tom));

    let transaction = a.begin_transaction(&[tom]).unwrap();
    assert!(matches!(
        b.rollback_transaction(&transaction),
        Err(CoreError::InvalidOperation { .. })
    ));
    assert!(matches!(
        b.commit_transaction(&transaction).await,
        Err(CoreError::InvalidOperation { .. })
    ));
    assert!(b.adapter.calls().is_empty());
}

#[tokio::test]
async fn stores_loading_the_same_record_stay_independent() {
    let a = TestStore::blog();
    let b = TestStore::blog();
    let in_a = a.push(payloads::person("1", "Dale")).unwrap();
    let in_b = b.push(payloads::person("1", "Dale")).unwrap();

    assert_ne!(in_a, in_b);
    assert_eq!(a.peek("person", "1"), Some(in_a));
    assert_eq!(b.peek("person", "1"), Some(in_b));
    assert!(matches!(
        b.attr(in_a, "name"),
        Err(CoreError::RecordNotLive { .. })
    ));

    a.set(in_a, "name", "Scumbag Dale").unwrap();
    assert_eq!(b.attr(in_b, "name").unwrap(), Value::from("Dale"));
    assert!(!b.is_dirty(in_b).unwrap());

    b.push(payloads::person("1", "Dale Jr")).unwrap();
    assert_eq!(a.attr(in_a, "name").unwrap(), Value::from("Scumbag Dale"));

    a.save(in_a).await.unwrap();
    assert_eq!(b.attr(in_b, "name").unwrap(), Value::from("Dale Jr"));
    assert!(b.adapter.calls().is_empty());
    assert_eq!(a.adapter.calls().len(), 1);
}

#[tokio::test]
async fn rolling_back_a_transaction_restores_membership_and_attributes() {
    let t = TestStore::blog();
    let post = t.push(payloads::post("1", "Rails is omakase", &["1", "2"])).unwrap();
    let first = t.push(payloads::comment("1", "first", "1")).unwrap();
    let second = t.push(payloads::comment("2", "second", "1")).unwrap();
    let other = t.push(payloads::post("2", "Other", &[])).unwrap();

    let mut transaction = t.begin_transaction(&[post, first]).unwrap();
    t.add_to_transaction(&mut transaction, other).unwrap();
    assert_eq!(transaction.len(), 3);

    t.set(post, "title", "Omakase is rails").unwrap();
    t.add_to_has_many(other, "comments", first).unwrap();
    assert_eq!(t.related_one(first, "post").unwrap(), Some(other));
    assert!(t.is_dirty(first).unwrap());

    t.rollback_transaction(&transaction).unwrap();

    assert_eq!(t.attr(post, "title").unwrap(), Value::from("Rails is omakase"));
    assert_eq!(t.related_one(first, "post").unwrap(), Some(post));
    let members = t.related_many(post, "comments").unwrap();
    assert_eq!(members.len(), 2);
    assert!(members.contains(&first) && members.contains(&second));
    assert!(t.related_many(other, "comments").unwrap().is_empty());
    for record in [post, first, other] {
        assert!(!t.is_dirty(record).unwrap());
    }
    assert!(t.adapter.calls().is_empty());
}

#[tokio::test]
async fn rolling_back_a_transaction_undeletes() {
    let t = TestStore::blog();
    let dale = t.push(payloads::person("1", "Dale")).unwrap();
    let transaction = t.begin_transaction(&[dale]).unwrap();

    t.delete_record(dale).unwrap();
    assert!(t.is_deleted(dale).unwrap());

    t.rollback_transaction(&transaction).unwrap();
    assert!(!t.is_deleted(dale).unwrap());
    assert_eq!(t.state(dale).unwrap(), RecordState::Saved);
}

#[tokio::test]
async fn committing_a_transaction_saves_its_records() {
    let t = TestStore::blog();
    let dale = t.push(payloads::person("1", "Dale")).unwrap();
    let tom = t.create_record("person", attrs([("name", "Tom")])).unwrap();
    let outsider = t.create_record("tag", attrs([("name", "rust")])).unwrap();

    let transaction = t.begin_transaction(&[dale, tom]).unwrap();
    assert!(transaction.contains(tom));
    assert!(!transaction.contains(outsider));
    t.set(dale, "name", "Scumbag Dale").unwrap();

    let report = t.commit_transaction(&transaction).await.unwrap();

    assert_eq!(report.saved(), 2);
    assert_eq!(t.state(dale).unwrap(), RecordState::Saved);
    assert_eq!(t.state(tom).unwrap(), RecordState::Saved);
    assert_eq!(t.state(outsider).unwrap(), RecordState::Created);
}
