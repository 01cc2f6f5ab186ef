//! Undo/redo, batching and history pausing.

use livetree::{
    Document, DocumentConfig,
    crdt::{ListUpdate, StorageUpdate},
};
use serde_json::{Map, Value, json};

use crate::helpers::{LIST_ID, Network, items, push, record_notifications};

fn presence(key: &str, value: Value) -> Map<String, Value> {
    Map::from_iter([(key.to_string(), value)])
}

// ===== UNDO / REDO =====

#[test]
fn test_undo_redo_list_push() {
    let mut net = Network::with_list();
    let a = net.add_client();
    let b = net.add_client();

    push(&mut net, a, "a");
    push(&mut net, a, "b");
    net.sync();

    net.doc(a).undo().unwrap();
    assert_eq!(items(&net, a), json!(["a"]));
    assert!(net.doc(a).can_redo());
    net.sync();
    assert_eq!(items(&net, b), json!(["a"]));

    net.doc(a).redo().unwrap();
    assert_eq!(items(&net, a), json!(["a", "b"]));
    net.sync();
    assert_eq!(items(&net, b), json!(["a", "b"]));
    net.assert_converged();
}

#[test]
fn test_undo_redo_is_inverse_for_every_list_operation() {
    let mut net = Network::with_list();
    let a = net.add_client();
    for value in ["a", "b", "c"] {
        push(&mut net, a, value);
    }
    net.sync();
    let start = items(&net, a);

    let edits: Vec<fn(&mut Document)> = vec![
        |doc: &mut Document| doc.list(LIST_ID).unwrap().insert(1, "x").unwrap(),
        |doc: &mut Document| doc.list(LIST_ID).unwrap().delete(0).unwrap(),
        |doc: &mut Document| doc.list(LIST_ID).unwrap().set(2, "C").unwrap(),
        |doc: &mut Document| doc.list(LIST_ID).unwrap().move_item(0, 2).unwrap(),
        |doc: &mut Document| doc.list(LIST_ID).unwrap().clear().unwrap(),
    ];
    for edit in edits {
        edit(net.doc(a));
        let edited = items(&net, a);
        assert_ne!(edited, start);

        net.doc(a).undo().unwrap();
        assert_eq!(items(&net, a), start);
        net.doc(a).redo().unwrap();
        assert_eq!(items(&net, a), edited);
        net.doc(a).undo().unwrap();
        assert_eq!(items(&net, a), start);

        net.sync();
        net.assert_converged();
    }
}

#[test]
fn test_undo_redo_record_fields() {
    let mut net = Network::new(vec![]);
    let a = net.add_client();

    net.doc(a).root().unwrap().set("title", "one").unwrap();
    net.doc(a).root().unwrap().set("title", "two").unwrap();
    net.doc(a).root().unwrap().delete("title").unwrap();

    net.doc(a).undo().unwrap();
    assert_eq!(net.snapshot(a)["title"], "two");
    net.doc(a).undo().unwrap();
    assert_eq!(net.snapshot(a)["title"], "one");
    net.doc(a).undo().unwrap();
    assert!(net.snapshot(a).get("title").is_none());
    assert!(!net.doc(a).can_undo());

    net.doc(a).redo().unwrap();
    net.doc(a).redo().unwrap();
    assert_eq!(net.snapshot(a)["title"], "two");

    net.sync();
    net.assert_converged();
}

#[test]
fn test_undo_with_empty_stack_is_noop() {
    let mut net = Network::with_list();
    let a = net.add_client();
    net.doc(a).undo().unwrap();
    net.doc(a).redo().unwrap();
    assert!(!net.doc(a).has_pending_changes());
}

#[test]
fn test_new_change_clears_redo() {
    let mut net = Network::with_list();
    let a = net.add_client();

    push(&mut net, a, "a");
    net.doc(a).undo().unwrap();
    assert!(net.doc(a).can_redo());

    push(&mut net, a, "b");
    assert!(!net.doc(a).can_redo());
    assert_eq!(items(&net, a), json!(["b"]));
}

#[test]
fn test_remote_changes_are_not_undoable() {
    let mut net = Network::with_list();
    let a = net.add_client();
    let b = net.add_client();

    push(&mut net, a, "a");
    net.sync();

    assert!(!net.doc(b).can_undo());
    net.doc(b).undo().unwrap();
    assert_eq!(items(&net, b), json!(["a"]));
}

#[test]
fn test_undo_stack_is_bounded() {
    let mut net = Network::with_list();
    let a = net.add_client_with(
        DocumentConfig::default()
            .with_throttle_ms(0)
            .with_max_undo_stack(3),
    );

    for value in ["a", "b", "c", "d", "e"] {
        push(&mut net, a, value);
    }
    for _ in 0..5 {
        net.doc(a).undo().unwrap();
    }

    assert_eq!(items(&net, a), json!(["a", "b"]));
    assert!(!net.doc(a).can_undo());
}

// ===== BATCH =====

#[test]
fn test_batch_is_one_undo_entry_and_one_notification() {
    let mut net = Network::with_list();
    let a = net.add_client();
    let seen = record_notifications(net.doc(a));

    net.doc(a)
        .batch(|doc| {
            let mut list = doc.list(LIST_ID)?;
            list.push("a")?;
            list.push("b")?;
            doc.root()?.set("title", "batched")?;
            Ok(())
        })
        .unwrap();

    {
        let seen = seen.lock().unwrap();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].storage.len(), 2);
        let list_update = seen[0]
            .storage
            .iter()
            .find(|update| update.node() == LIST_ID)
            .unwrap();
        let StorageUpdate::List { updates, .. } = list_update else {
            panic!("expected a list update, got {list_update:?}");
        };
        assert_eq!(
            updates,
            &vec![
                ListUpdate::Insert {
                    index: 0,
                    item: json!("a")
                },
                ListUpdate::Insert {
                    index: 1,
                    item: json!("b")
                },
            ]
        );
    }

    net.doc(a).undo().unwrap();
    assert_eq!(items(&net, a), json!([]));
    assert!(net.snapshot(a).get("title").is_none());
    assert!(!net.doc(a).can_undo());

    net.sync();
    net.assert_converged();
}

#[test]
fn test_batch_sends_nothing_until_it_ends() {
    let mut net = Network::with_list();
    let a = net.add_client();

    net.doc(a)
        .batch(|doc| {
            doc.list(LIST_ID)?.push("a")?;
            assert!(doc.is_batching());
            assert!(doc.flush_now().is_empty());
            Ok(())
        })
        .unwrap();

    assert!(!net.doc(a).is_batching());
    assert_eq!(net.doc(a).flush_now().len(), 1);
}

#[test]
fn test_nested_batch_is_a_contract_error() {
    let mut net = Network::with_list();
    let a = net.add_client();

    let err = net
        .doc(a)
        .batch(|doc| doc.batch(|_| Ok(())))
        .unwrap_err();
    assert!(err.is_contract_error());
    assert!(!net.doc(a).is_batching());
}

#[test]
fn test_history_during_batch_is_a_contract_error() {
    let mut net = Network::with_list();
    let a = net.add_client();
    push(&mut net, a, "a");

    let err = net.doc(a).batch(|doc| doc.undo()).unwrap_err();
    assert!(err.is_contract_error());
    let err = net.doc(a).batch(|doc| doc.redo()).unwrap_err();
    assert!(err.is_contract_error());

    assert_eq!(items(&net, a), json!(["a"]));
}

#[test]
fn test_failed_batch_keeps_applied_changes() {
    let mut net = Network::with_list();
    let a = net.add_client();

    let result = net.doc(a).batch(|doc| {
        doc.list(LIST_ID)?.push("kept")?;
        doc.list(LIST_ID)?.delete(7)
    });

    assert!(result.is_err());
    assert_eq!(items(&net, a), json!(["kept"]));
    net.doc(a).undo().unwrap();
    assert_eq!(items(&net, a), json!([]));
}

// ===== PAUSE / RESUME =====

#[test]
fn test_paused_history_coalesces() {
    let mut net = Network::new(vec![]);
    let a = net.add_client();

    net.doc(a).root().unwrap().set("x", 0_i64).unwrap();
    net.doc(a).pause_history();
    for i in 1..=3_i64 {
        net.doc(a).root().unwrap().set("x", i).unwrap();
    }
    net.doc(a).resume_history();
    assert_eq!(net.snapshot(a)["x"], 3);

    net.doc(a).undo().unwrap();
    assert_eq!(net.snapshot(a)["x"], 0);
    net.doc(a).redo().unwrap();
    assert_eq!(net.snapshot(a)["x"], 3);
}

#[test]
fn test_resume_without_changes_records_nothing() {
    let mut net = Network::new(vec![]);
    let a = net.add_client();

    net.doc(a).pause_history();
    net.doc(a).resume_history();
    assert!(!net.doc(a).can_undo());
}

// ===== PRESENCE =====

#[test]
fn test_presence_history() {
    let mut net = Network::new(vec![]);
    let a = net.add_client();

    net.doc(a).update_presence(presence("cursor", json!(1)), true);
    net.doc(a).update_presence(presence("cursor", json!(2)), true);
    net.doc(a).update_presence(presence("name", json!("ada")), false);
    assert_eq!(net.doc(a).presence()["cursor"], 2);

    net.doc(a).undo().unwrap();
    assert_eq!(net.doc(a).presence()["cursor"], 1);
    net.doc(a).undo().unwrap();
    assert!(net.doc(a).presence().get("cursor").is_none());
    assert_eq!(net.doc(a).presence()["name"], "ada");
    assert!(!net.doc(a).can_undo());

    net.doc(a).redo().unwrap();
    assert_eq!(net.doc(a).presence()["cursor"], 1);
}

#[test]
fn test_presence_is_flushed() {
    let mut net = Network::new(vec![]);
    let a = net.add_client();
    let seen = record_notifications(net.doc(a));

    net.doc(a).update_presence(presence("cursor", json!(4)), false);

    assert!(seen.lock().unwrap()[0].presence);
    let messages = net.doc(a).flush_now();
    assert_eq!(
        serde_json::to_value(&messages).unwrap(),
        json!([{"type": "UpdatePresence", "data": {"cursor": 4}}])
    );
}
