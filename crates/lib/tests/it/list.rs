//! Ordered list nodes.
//!
//! Covers local list operations, the two canonical concurrency scenarios
//! (push/push and set/delete) and the shape of the deltas subscribers see.

use livetree::{
    LiveValue,
    crdt::{ListUpdate, StorageUpdate},
};
use serde_json::json;

use crate::helpers::{LIST_ID, Network, items, push, record_notifications};

// ===== BASIC LIST OPERATIONS =====

#[test]
fn test_list_basic_operations() {
    let mut net = Network::with_list();
    let a = net.add_client();

    {
        let doc = net.doc(a);
        let mut list = doc.list(LIST_ID).unwrap();
        assert!(list.is_empty());

        list.push("b").unwrap();
        list.push("d").unwrap();
        list.insert(0, "a").unwrap();
        list.insert(2, "c").unwrap();
        assert_eq!(list.len(), 4);
        assert_eq!(list.get(2), Some(json!("c")));
        assert_eq!(list.get(4), None);
        assert_eq!(list.to_json(), json!(["a", "b", "c", "d"]));

        list.delete(1).unwrap();
        assert_eq!(list.to_json(), json!(["a", "c", "d"]));

        list.set(1, "C").unwrap();
        assert_eq!(list.to_json(), json!(["a", "C", "d"]));
    }

    net.sync();
    assert_eq!(net.server_snapshot()["items"], json!(["a", "C", "d"]));
    net.assert_converged();
}

#[test]
fn test_list_move_item() {
    let mut net = Network::with_list();
    let a = net.add_client();
    let b = net.add_client();
    for value in ["a", "b", "c", "d"] {
        push(&mut net, a, value);
    }
    net.sync();

    net.doc(b).list(LIST_ID).unwrap().move_item(0, 2).unwrap();
    assert_eq!(items(&net, b), json!(["b", "c", "a", "d"]));
    net.doc(b).list(LIST_ID).unwrap().move_item(3, 0).unwrap();
    assert_eq!(items(&net, b), json!(["d", "b", "c", "a"]));

    net.sync();
    assert_eq!(items(&net, a), json!(["d", "b", "c", "a"]));
    net.assert_converged();
}

#[test]
fn test_list_move_to_same_index_is_noop() {
    let mut net = Network::with_list();
    let a = net.add_client();
    push(&mut net, a, "a");
    net.sync();
    let seen = record_notifications(net.doc(a));
    let undo_before = net.doc(a).can_undo();

    net.doc(a).list(LIST_ID).unwrap().move_item(0, 0).unwrap();

    assert!(seen.lock().unwrap().is_empty());
    assert!(!net.doc(a).has_pending_changes());
    assert_eq!(net.doc(a).can_undo(), undo_before);
}

#[test]
fn test_list_clear() {
    let mut net = Network::with_list();
    let a = net.add_client();
    let b = net.add_client();
    for value in ["a", "b", "c"] {
        push(&mut net, a, value);
    }
    net.sync();

    net.doc(b).list(LIST_ID).unwrap().clear().unwrap();
    net.doc(b).list(LIST_ID).unwrap().clear().unwrap();
    net.sync();

    assert_eq!(items(&net, a), json!([]));
    net.assert_converged();
}

#[test]
fn test_list_nested_values() {
    let mut net = Network::with_list();
    let a = net.add_client();
    let b = net.add_client();

    push(
        &mut net,
        a,
        LiveValue::record([
            ("title", LiveValue::from("first")),
            ("done", LiveValue::from(false)),
        ]),
    );
    net.sync();

    net.doc(b)
        .list(LIST_ID)
        .unwrap()
        .record(0)
        .unwrap()
        .set("done", true)
        .unwrap();
    net.sync();

    assert_eq!(items(&net, a), json!([{"title": "first", "done": true}]));
    net.assert_converged();
}

// ===== BOUNDS =====

#[test]
fn test_list_index_bounds_are_contract_errors() {
    let mut net = Network::with_list();
    let a = net.add_client();
    push(&mut net, a, "only");

    let doc = net.doc(a);
    let mut list = doc.list(LIST_ID).unwrap();
    for err in [
        list.insert(2, "x").unwrap_err(),
        list.delete(1).unwrap_err(),
        list.set(1, "x").unwrap_err(),
        list.move_item(0, 1).unwrap_err(),
        list.move_item(1, 0).unwrap_err(),
    ] {
        assert!(err.is_contract_error(), "{err}");
    }
    assert_eq!(list.to_json(), json!(["only"]));

    let err = doc.list(LIST_ID).unwrap().record(5).unwrap_err();
    assert!(err.is_contract_error());
}

// ===== CONCURRENCY SCENARIOS =====

#[test]
fn test_list_concurrent_push_push() {
    let mut net = Network::with_list();
    let a = net.add_client();
    let b = net.add_client();

    push(&mut net, a, "A");
    push(&mut net, b, "B");
    assert_eq!(items(&net, a), json!(["A"]));
    assert_eq!(items(&net, b), json!(["B"]));

    net.send(a);
    net.send(b);
    net.sync();

    assert_eq!(items(&net, a), json!(["A", "B"]));
    assert_eq!(items(&net, b), json!(["A", "B"]));
    net.assert_converged();
}

#[test]
fn test_list_concurrent_insert_between_same_neighbours() {
    let mut net = Network::with_list();
    let a = net.add_client();
    let b = net.add_client();
    push(&mut net, a, "first");
    push(&mut net, a, "last");
    net.sync();

    net.doc(a).list(LIST_ID).unwrap().insert(1, "from a").unwrap();
    net.doc(b).list(LIST_ID).unwrap().insert(1, "from b").unwrap();
    net.send(b);
    net.send(a);
    net.sync();

    assert_eq!(items(&net, a), json!(["first", "from b", "from a", "last"]));
    net.assert_converged();
}

#[test]
fn test_list_concurrent_set_and_delete() {
    for set_first in [true, false] {
        let mut net = Network::with_list();
        let a = net.add_client();
        let b = net.add_client();
        push(&mut net, a, "A");
        net.sync();

        net.doc(a).list(LIST_ID).unwrap().set(0, "B").unwrap();
        net.doc(b).list(LIST_ID).unwrap().delete(0).unwrap();
        assert_eq!(items(&net, a), json!(["B"]));
        assert_eq!(items(&net, b), json!([]));

        if set_first {
            net.send(a);
            net.send(b);
        } else {
            net.send(b);
            net.send(a);
        }
        net.sync();

        assert_eq!(items(&net, a), json!(["B"]), "set_first = {set_first}");
        assert_eq!(items(&net, b), json!(["B"]), "set_first = {set_first}");
        net.assert_converged();
    }
}

#[test]
fn test_list_concurrent_deletes_of_same_item() {
    let mut net = Network::with_list();
    let a = net.add_client();
    let b = net.add_client();
    push(&mut net, a, "x");
    push(&mut net, a, "y");
    net.sync();

    net.doc(a).list(LIST_ID).unwrap().delete(0).unwrap();
    net.doc(b).list(LIST_ID).unwrap().delete(0).unwrap();
    net.sync();

    assert_eq!(items(&net, a), json!(["y"]));
    net.assert_converged();
}

// ===== IMPLICIT DELETES =====

/// On `[X]`, A deletes X and inserts Y at the freed slot while B replaces X with Z.
/// B's replace reaches A first, so Z evicts Y from the slot; the server then shifts
/// Y after Z and A's echo brings Y back.
#[test]
fn test_list_replace_evicts_local_insert_until_its_echo() {
    let mut net = Network::with_list();
    let a = net.add_client();
    let b = net.add_client();
    push(&mut net, a, "X");
    net.sync();

    net.doc(a).list(LIST_ID).unwrap().delete(0).unwrap();
    net.doc(a).list(LIST_ID).unwrap().insert(0, "Y").unwrap();
    net.doc(b).list(LIST_ID).unwrap().set(0, "Z").unwrap();
    assert_eq!(items(&net, a), json!(["Y"]));
    assert_eq!(items(&net, b), json!(["Z"]));

    let seen = record_notifications(net.doc(a));
    net.send(b);
    net.send(a);
    net.deliver(a);

    {
        let seen = seen.lock().unwrap();
        assert_eq!(seen.len(), 2);
        assert_eq!(
            seen[0].storage,
            vec![StorageUpdate::list(
                LIST_ID,
                vec![ListUpdate::Replace {
                    index: 0,
                    item: json!("Z"),
                }]
            )]
        );
        assert_eq!(
            seen[1].storage,
            vec![StorageUpdate::list(
                LIST_ID,
                vec![ListUpdate::Insert {
                    index: 1,
                    item: json!("Y"),
                }]
            )]
        );
    }
    assert_eq!(items(&net, a), json!(["Z", "Y"]));

    net.sync();
    assert_eq!(items(&net, b), json!(["Z", "Y"]));
    net.assert_converged();

    // Undo the insert of Y, then the delete of X.
    net.doc(a).undo().unwrap();
    net.doc(a).undo().unwrap();
    net.sync();
    assert_eq!(items(&net, a), json!(["Z", "X"]));
    net.assert_converged();
}

/// Two concurrent sets on the same slot: the later one at the server wins, and the
/// loser's node is evicted and then dropped by the server's correction.
#[test]
fn test_list_concurrent_sets_on_same_slot() {
    let mut net = Network::with_list();
    let a = net.add_client();
    let b = net.add_client();
    push(&mut net, a, "X");
    net.sync();

    net.doc(a).list(LIST_ID).unwrap().set(0, "S").unwrap();
    net.doc(b).list(LIST_ID).unwrap().set(0, "T").unwrap();

    let seen = record_notifications(net.doc(a));
    net.send(b);
    net.send(a);
    net.deliver(a);

    {
        let seen = seen.lock().unwrap();
        let replaced: Vec<_> = seen
            .iter()
            .flat_map(|notification| notification.storage.clone())
            .collect();
        assert_eq!(
            replaced,
            vec![
                StorageUpdate::list(
                    LIST_ID,
                    vec![ListUpdate::Replace {
                        index: 0,
                        item: json!("T"),
                    }]
                ),
                StorageUpdate::list(
                    LIST_ID,
                    vec![ListUpdate::Replace {
                        index: 0,
                        item: json!("S"),
                    }]
                ),
            ]
        );
    }

    net.sync();
    assert_eq!(items(&net, a), json!(["S"]));
    assert_eq!(items(&net, b), json!(["S"]));
    net.assert_converged();
}

// ===== DELTAS =====

#[test]
fn test_list_remote_set_is_a_single_replace() {
    let mut net = Network::with_list();
    let a = net.add_client();
    let b = net.add_client();
    push(&mut net, a, "old");
    net.sync();
    let seen = record_notifications(net.doc(b));

    net.doc(a).list(LIST_ID).unwrap().set(0, "new").unwrap();
    net.sync();

    let seen = seen.lock().unwrap();
    assert_eq!(seen.len(), 1);
    assert_eq!(
        seen[0].storage,
        vec![StorageUpdate::list(
            LIST_ID,
            vec![ListUpdate::Replace {
                index: 0,
                item: json!("new"),
            }]
        )]
    );
}

#[test]
fn test_list_remote_operations_report_indices() {
    let mut net = Network::with_list();
    let a = net.add_client();
    let b = net.add_client();
    for value in ["a", "b", "c"] {
        push(&mut net, a, value);
    }
    net.sync();
    let seen = record_notifications(net.doc(b));

    net.doc(a).list(LIST_ID).unwrap().move_item(0, 2).unwrap();
    net.sync();
    net.doc(a).list(LIST_ID).unwrap().delete(1).unwrap();
    net.sync();

    let seen = seen.lock().unwrap();
    assert_eq!(seen.len(), 2);
    assert_eq!(
        seen[0].storage,
        vec![StorageUpdate::list(
            LIST_ID,
            vec![ListUpdate::Move {
                index: 2,
                previous_index: 0,
                item: json!("a"),
            }]
        )]
    );
    assert_eq!(
        seen[1].storage,
        vec![StorageUpdate::list(LIST_ID, vec![ListUpdate::Delete { index: 1 }])]
    );
}

#[test]
fn test_list_own_echo_is_silent() {
    let mut net = Network::with_list();
    let a = net.add_client();
    push(&mut net, a, "mine");
    let seen = record_notifications(net.doc(a));

    net.sync();

    assert!(seen.lock().unwrap().is_empty());
    assert!(!net.doc(a).has_pending_changes());
}
