//! End-to-end store scenarios.

use keel_core::{
    ArrayChange, AdapterError, CoreError, RecordState, SaveKind, StoreEventKind, Value,
};
use keel_testkit::prelude::*;

#[test]
fn pushed_records_join_the_all_records_array_immediately() {
    let t = TestStore::blog();
    let people = t.all_records_of("person").unwrap();

    t.push(payloads::person("1", "Scumbag Dale")).unwrap();
    t.push(payloads::person("2", "Scumbag Katz")).unwrap();
    assert_eq!(t.array(people).unwrap().len(), 2);

    t.push(payloads::person("3", "Scumbag Bryn")).unwrap();
    assert_eq!(t.array(people).unwrap().len(), 3);
}

#[test]
fn adding_to_has_many_sets_the_inverse() {
    let t = TestStore::blog();
    let post = t.create_record("post", attrs::<Value>([])).unwrap();
    let comment = t.create_record("comment", attrs::<Value>([])).unwrap();

    t.add_to_has_many(post, "comments", comment).unwrap();

    assert_eq!(t.related_one(comment, "post").unwrap(), Some(post));
    assert_eq!(t.belongs_to(comment, "post").unwrap().target(), Some(post));
    assert_eq!(t.has_many(post, "comments").unwrap().as_slice(), &[comment]);
}

#[test]
fn assigning_the_wrong_type_is_rejected_without_side_effects() {
    let t = TestStore::blog();
    let post = t.create_record("post", attrs([("title", "Rails is omakase")])).unwrap();
    let comment = t.create_record("comment", attrs([("body", "first")])).unwrap();
    let person = t.create_record("person", attrs([("name", "Tom")])).unwrap();
    t.set_belongs_to(comment, "post", Some(post)).unwrap();

    let err = t.set_belongs_to(comment, "post", Some(person)).unwrap_err();

    assert!(matches!(
        err,
        CoreError::RelationshipType { ref expected, ref actual, .. }
            if expected == "post" && actual == "person"
    ));
    assert_eq!(t.related_one(comment, "post").unwrap(), Some(post));
    assert_eq!(t.related_many(post, "comments").unwrap(), vec![comment]);
    assert!(t.related_many(person, "posts").unwrap().is_empty());
}

#[test]
fn filtered_array_follows_attribute_edits() {
    let t = TestStore::blog();
    t.push(payloads::person("1", "Scumbag Dale")).unwrap();
    let katz = t.push(payloads::person("2", "Scumbag Katz")).unwrap();

    let katzes = t
        .filter("person", |record| {
            record.text("name").is_some_and(|name| name.ends_with("Katz"))
        })
        .unwrap();
    assert_eq!(t.array(katzes).unwrap().records, vec![katz]);

    t.set(katz, "name", "Yehuda Katz").unwrap();
    assert_eq!(t.array(katzes).unwrap().len(), 1);

    t.set(katz, "name", "Yehuda Katz-Foo").unwrap();
    assert!(t.array(katzes).unwrap().is_empty());
}

#[tokio::test]
async fn validation_failure_then_edit_returns_to_dirty() {
    let t = TestStore::blog();
    let tom = t.create_record("person", attrs([("name", "Tom")])).unwrap();
    t.adapter
        .fail_next(CallKind::Create, "person", invalid("name", "is already taken"));

    let err = t.save(tom).await.unwrap_err();

    assert!(matches!(err, CoreError::Adapter(AdapterError::ValidationFailed(_))));
    assert_eq!(t.state(tom).unwrap(), RecordState::Invalid(SaveKind::Create));
    assert!(!t.is_valid(tom).unwrap());
    assert!(t.is_dirty(tom).unwrap());
    assert_eq!(
        t.errors(tom).unwrap().get("name").unwrap(),
        &["is already taken".to_string()]
    );
    assert_eq!(t.attr(tom, "name").unwrap(), Value::from("Tom"));

    t.set(tom, "name", "Tomster").unwrap();

    assert_eq!(t.state(tom).unwrap(), RecordState::Created);
    assert!(t.is_valid(tom).unwrap());
    assert!(t.errors(tom).unwrap().get("name").is_none());
    assert!(t.adapter_error(tom).unwrap().is_none());

    // The corrected record saves.
    t.save(tom).await.unwrap();
    assert_eq!(t.state(tom).unwrap(), RecordState::Saved);
    assert!(t.id_of(tom).unwrap().is_some());
}

#[tokio::test]
async fn unloading_removes_a_record_from_every_array_once() {
    let t = TestStore::blog();
    t.adapter.insert_all([
        payloads::person("1", "Scumbag Dale"),
        payloads::person("2", "Scumbag Katz"),
    ]);

    let all = t.all_records_of("person").unwrap();
    let scumbags = t
        .filter("person", |record| {
            record.text("name").is_some_and(|name| name.starts_with("Scumbag"))
        })
        .unwrap();
    let queried = t.query("person", Value::Null).await.unwrap();
    let dale = t.peek("person", "1").unwrap();

    let arrays = [all, scumbags, queried];
    let before: Vec<usize> = arrays.iter().map(|id| t.array(*id).unwrap().len()).collect();
    assert_eq!(before, vec![2, 2, 2]);
    assert_eq!(t.arrays_containing(dale).unwrap().len(), 3);

    t.flush();
    let events = t.subscribe();

    t.unload(dale).unwrap();
    t.flush();

    for (id, len) in arrays.iter().zip(before) {
        assert_eq!(t.array(*id).unwrap().len(), len - 1);
    }

    let notifications: Vec<_> = events
        .try_iter()
        .filter_map(|event| match event.kind {
            StoreEventKind::Array(notification) => Some(notification),
            StoreEventKind::Record(_) => None,
        })
        .collect();
    assert_eq!(notifications.len(), 3);
    for notification in notifications {
        assert!(arrays.contains(&notification.array));
        assert_eq!(notification.changes.len(), 1);
        assert!(matches!(
            notification.changes[0],
            ArrayChange::Removed { record, .. } if record == dale
        ));
    }

    assert!(!t.is_live(dale));
    assert!(matches!(
        t.attr(dale, "name"),
        Err(CoreError::RecordNotLive { .. })
    ));
}
