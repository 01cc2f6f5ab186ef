//! Record nodes: last-writer-wins keys, nested children and their deltas.

use livetree::{
    Document, LiveValue, Op,
    crdt::{KeyUpdate, StorageUpdate},
    sync::{ClientMessage, ServerMessage},
};
use serde_json::{Map, json};

use crate::helpers::{Network, record_notifications};

fn seeded_root(data: serde_json::Value) -> Network {
    let Some(data) = data.as_object().cloned() else {
        panic!("seed data must be an object");
    };
    Network::new(vec![Op::UpdateRecord {
        id: "root".into(),
        op_id: None,
        data,
    }])
}

// ===== LOCAL OPERATIONS =====

#[test]
fn test_record_set_applies_locally_before_sync() {
    let mut net = Network::new(vec![]);
    let a = net.add_client();
    let b = net.add_client();

    net.doc(a).root().unwrap().set("title", "draft").unwrap();

    assert_eq!(net.snapshot(a)["title"], "draft");
    assert!(net.snapshot(b).get("title").is_none());
    assert!(net.doc(a).has_pending_changes());

    net.sync();
    assert_eq!(net.snapshot(b)["title"], "draft");
    net.assert_converged();
}

#[test]
fn test_record_update_writes_several_keys() {
    let mut net = seeded_root(json!({"a": 1, "b": 2}));
    let a = net.add_client();

    net.doc(a)
        .root()
        .unwrap()
        .update([
            ("b".to_string(), LiveValue::from(20_i64)),
            ("c".to_string(), LiveValue::from(30_i64)),
        ])
        .unwrap();

    assert_eq!(net.snapshot(a), json!({"a": 1, "b": 20, "c": 30}));
    net.sync();
    net.assert_converged();
}

#[test]
fn test_record_nested_only_update_uses_no_spare_op_id() {
    let mut net = Network::new(vec![]);
    let a = net.add_client();

    net.doc(a)
        .root()
        .unwrap()
        .update([(
            "todos".to_string(),
            LiveValue::list([LiveValue::from("write docs")]),
        )])
        .unwrap();
    net.doc(a).root().unwrap().set("title", "draft").unwrap();

    let mut op_ids: Vec<String> = net
        .doc(a)
        .flush_now()
        .into_iter()
        .filter_map(|message| match message {
            ClientMessage::UpdateStorage { ops } => Some(ops),
            _ => None,
        })
        .flatten()
        .filter_map(|op| op.op_id().map(str::to_string))
        .collect();
    op_ids.sort();

    // list create, leaf create, title write
    assert_eq!(op_ids, vec!["1:0", "1:1", "1:2"]);
}

#[test]
fn test_record_delete_missing_key_is_noop() {
    let mut net = Network::new(vec![]);
    let a = net.add_client();
    let seen = record_notifications(net.doc(a));

    net.doc(a).root().unwrap().delete("nothing").unwrap();

    assert!(seen.lock().unwrap().is_empty());
    assert!(!net.doc(a).can_undo());
    assert!(!net.doc(a).has_pending_changes());
}

#[test]
fn test_record_set_reports_key_delta() {
    let mut net = Network::new(vec![]);
    let a = net.add_client();
    let seen = record_notifications(net.doc(a));

    net.doc(a).root().unwrap().set("title", "x").unwrap();
    net.doc(a).root().unwrap().delete("title").unwrap();

    let seen = seen.lock().unwrap();
    assert_eq!(seen.len(), 2);
    assert_eq!(
        seen[0].storage,
        vec![StorageUpdate::record("root", "title", KeyUpdate::Update)]
    );
    assert_eq!(
        seen[1].storage,
        vec![StorageUpdate::record("root", "title", KeyUpdate::Delete)]
    );
}

// ===== NESTED CHILDREN =====

#[test]
fn test_record_nested_children_sync() {
    let mut net = Network::new(vec![]);
    let a = net.add_client();
    let b = net.add_client();

    net.doc(a)
        .root()
        .unwrap()
        .set(
            "profile",
            LiveValue::record([
                ("name", LiveValue::from("Ada")),
                ("tags", LiveValue::list([LiveValue::from("math")])),
            ]),
        )
        .unwrap();
    net.sync();

    assert_eq!(
        net.snapshot(b)["profile"],
        json!({"name": "Ada", "tags": ["math"]})
    );

    net.doc(b)
        .root()
        .unwrap()
        .record("profile")
        .unwrap()
        .set("name", "Grace")
        .unwrap();
    net.doc(b)
        .root()
        .unwrap()
        .record("profile")
        .unwrap()
        .list("tags")
        .unwrap()
        .push("navy")
        .unwrap();
    net.sync();

    assert_eq!(
        net.snapshot(a)["profile"],
        json!({"name": "Grace", "tags": ["math", "navy"]})
    );
    net.assert_converged();
}

#[test]
fn test_record_plain_value_replaces_child_node() {
    let mut net = Network::new(vec![]);
    let a = net.add_client();
    let b = net.add_client();

    net.doc(a)
        .root()
        .unwrap()
        .set("profile", LiveValue::record([("name", LiveValue::from("Ada"))]))
        .unwrap();
    net.sync();
    let child = net.doc(b).root().unwrap().child_id("profile").unwrap();

    net.doc(a).root().unwrap().set("profile", "gone").unwrap();
    net.sync();

    assert_eq!(net.snapshot(b)["profile"], "gone");
    assert!(!net.doc(b).pool().contains(&child));
    assert!(net.server.get(&child).is_none());
    net.assert_converged();
}

#[test]
fn test_record_navigation_errors() {
    let mut net = seeded_root(json!({"plain": 1}));
    let a = net.add_client();

    let err = net.doc(a).root().unwrap().record("missing").unwrap_err();
    assert!(err.is_not_found());

    let err = net.doc(a).root().unwrap().list("plain").unwrap_err();
    assert!(err.is_not_found());

    let err = net.doc(a).list("root").unwrap_err();
    assert!(err.is_crdt_error());
}

#[test]
fn test_record_requires_loaded_storage() {
    let mut doc = Document::default();
    let err = doc.root().unwrap_err();
    assert!(err.is_sync_error());

    doc.connect(1);
    assert!(doc.root().is_err());
}

// ===== CONFLICTS =====

#[test]
fn test_record_concurrent_sets_last_writer_wins() {
    let mut net = Network::new(vec![]);
    let a = net.add_client();
    let b = net.add_client();

    net.doc(a).root().unwrap().set("title", "from a").unwrap();
    net.doc(b).root().unwrap().set("title", "from b").unwrap();

    // A reaches the server first, so B's write is the last one
    net.send(a);
    net.send(b);
    net.deliver(a);
    net.deliver(b);
    net.sync();

    assert_eq!(net.snapshot(a)["title"], "from b");
    net.assert_converged();
}

#[test]
fn test_record_pending_write_ignores_stale_remote() {
    let mut net = Network::new(vec![]);
    let a = net.add_client();
    let b = net.add_client();

    net.doc(a).root().unwrap().set("title", "from a").unwrap();
    net.send(a);
    net.doc(b).root().unwrap().set("title", "from b").unwrap();

    // A's op arrives while B's own write is still in flight
    net.deliver(b);
    assert_eq!(net.snapshot(b)["title"], "from b");

    net.sync();
    assert_eq!(net.snapshot(a)["title"], "from b");
    net.assert_converged();
}

#[test]
fn test_record_delete_and_set_converge_in_both_orders() {
    for delete_first in [true, false] {
        let mut net = seeded_root(json!({"title": "seed"}));
        let a = net.add_client();
        let b = net.add_client();

        net.doc(a).root().unwrap().delete("title").unwrap();
        net.doc(b).root().unwrap().set("title", "kept").unwrap();

        if delete_first {
            net.send(a);
            net.send(b);
        } else {
            net.send(b);
            net.send(a);
        }
        net.sync();

        let expected = if delete_first { json!("kept") } else { json!(null) };
        assert_eq!(
            net.snapshot(a).get("title").cloned().unwrap_or(json!(null)),
            expected,
            "delete_first = {delete_first}"
        );
        net.assert_converged();
    }
}

#[test]
fn test_record_duplicate_delivery_is_idempotent() {
    let mut net = Network::new(vec![]);
    let a = net.add_client();
    let b = net.add_client();

    let ops = vec![Op::UpdateRecord {
        id: "root".into(),
        op_id: Some("9:0".into()),
        data: Map::from_iter([("title".to_string(), json!("twice"))]),
    }];
    for _ in 0..2 {
        net.doc(b)
            .receive(ServerMessage::UpdateStorage { ops: ops.clone() })
            .unwrap();
    }
    assert_eq!(net.snapshot(b)["title"], "twice");
    assert!(net.snapshot(a).get("title").is_none());
}
