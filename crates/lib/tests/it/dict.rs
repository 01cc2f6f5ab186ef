//! Dictionary nodes: every value is a child node, keys follow last-writer-wins.

use livetree::{
    LiveValue,
    crdt::{KeyUpdate, NodeType, StorageUpdate},
};
use serde_json::json;

use crate::helpers::{DICT_ID, Network, record_notifications};

// ===== BASIC DICT OPERATIONS =====

#[test]
fn test_dict_basic_operations() {
    let mut net = Network::with_dict();
    let a = net.add_client();

    {
        let doc = net.doc(a);
        let mut tags = doc.dict(DICT_ID).unwrap();
        assert!(tags.is_empty());
        tags.set("color", "red").unwrap();
        tags.set("size", 3_i64).unwrap();
        assert_eq!(tags.len(), 2);
        assert_eq!(tags.get("color"), Some(json!("red")));
        assert_eq!(tags.keys(), vec!["color".to_string(), "size".to_string()]);

        tags.delete("color").unwrap();
        tags.delete("color").unwrap();
        assert_eq!(tags.to_json(), json!({"size": 3}));
    }

    net.sync();
    assert_eq!(net.server_snapshot()["tags"], json!({"size": 3}));
    net.assert_converged();
}

#[test]
fn test_dict_wraps_plain_values_in_leaves() {
    let mut net = Network::with_dict();
    let a = net.add_client();

    net.doc(a).dict(DICT_ID).unwrap().set("color", "red").unwrap();
    let child = net.doc(a).dict(DICT_ID).unwrap().child_id("color").unwrap();

    assert_eq!(
        net.doc(a).pool().node(&child).unwrap().node_type(),
        NodeType::Leaf
    );
    net.sync();
    assert_eq!(net.server.get(&child).unwrap().node_type(), NodeType::Leaf);
}

#[test]
fn test_dict_nested_values() {
    let mut net = Network::with_dict();
    let a = net.add_client();
    let b = net.add_client();

    net.doc(a)
        .dict(DICT_ID)
        .unwrap()
        .set("owner", LiveValue::record([("name", LiveValue::from("Ada"))]))
        .unwrap();
    net.sync();

    net.doc(b)
        .dict(DICT_ID)
        .unwrap()
        .record("owner")
        .unwrap()
        .set("name", "Grace")
        .unwrap();
    net.sync();

    assert_eq!(net.snapshot(a)["tags"]["owner"], json!({"name": "Grace"}));
    net.assert_converged();
}

#[test]
fn test_dict_set_reports_key_delta() {
    let mut net = Network::with_dict();
    let a = net.add_client();
    let b = net.add_client();
    let seen = record_notifications(net.doc(b));

    net.doc(a).dict(DICT_ID).unwrap().set("color", "red").unwrap();
    net.sync();

    let seen = seen.lock().unwrap();
    assert_eq!(seen.len(), 1);
    assert_eq!(
        seen[0].storage,
        vec![StorageUpdate::dict(DICT_ID, "color", KeyUpdate::Update)]
    );
}

// ===== CONFLICTS =====

#[test]
fn test_dict_concurrent_sets_last_writer_wins() {
    for a_first in [true, false] {
        let mut net = Network::with_dict();
        let a = net.add_client();
        let b = net.add_client();

        net.doc(a).dict(DICT_ID).unwrap().set("color", "red").unwrap();
        net.doc(b).dict(DICT_ID).unwrap().set("color", "blue").unwrap();
        if a_first {
            net.send(a);
            net.send(b);
        } else {
            net.send(b);
            net.send(a);
        }
        net.sync();

        let expected = if a_first { "blue" } else { "red" };
        assert_eq!(net.snapshot(a)["tags"]["color"], expected);
        net.assert_converged();
        // the losing leaf is gone everywhere
        assert_eq!(net.server.len(), net.doc(a).pool().len());
    }
}

#[test]
fn test_dict_set_and_delete_converge_in_both_orders() {
    for delete_first in [true, false] {
        let mut net = Network::with_dict();
        let a = net.add_client();
        let b = net.add_client();
        net.doc(a).dict(DICT_ID).unwrap().set("color", "red").unwrap();
        net.sync();

        net.doc(a).dict(DICT_ID).unwrap().delete("color").unwrap();
        net.doc(b).dict(DICT_ID).unwrap().set("color", "blue").unwrap();
        if delete_first {
            net.send(a);
            net.send(b);
        } else {
            net.send(b);
            net.send(a);
        }
        net.sync();

        // the delete targets the old leaf, so the new value survives either way
        assert_eq!(net.snapshot(a)["tags"], json!({"color": "blue"}));
        net.assert_converged();
    }
}
