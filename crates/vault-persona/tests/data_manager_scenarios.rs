//! End-to-end seed scenarios for the Data Manager's put/delete/add-pmid/
//! remove-pmid/liveness/churn pipelines, driven entirely through
//! `DataManager::handle_message` and `handle_churn_event` the way a real
//! close group would deliver them.

use std::sync::Arc;

use vault_dispatch::{Dispatcher, GroupSender, LocalRouter};
use vault_persona::{group_for_key, DataManager, DataManagerMessage, PersonaService};
use vault_storage::{KeyedDb, MemoryKeyedDb};
use vault_types::{
    Authority, DataManagerAction, DataManagerValue, Envelope, GroupId, Identity, Key,
    MatrixChange, MessageId, NodeId,
};
use vault_cache::CacheHandler;

fn node(n: u8) -> NodeId {
    Identity::from([n; vault_types::IDENTITY_BYTES])
}

fn key(n: u8) -> Key {
    Key::immutable_chunk(Identity::from([n; vault_types::IDENTITY_BYTES]))
}

fn envelope(id: u64, origin: NodeId, group: GroupId, payload: DataManagerMessage) -> Envelope<DataManagerMessage> {
    Envelope::new(MessageId::new(id), Authority::Group(group), origin, Authority::Group(group), payload)
}

fn build(
    group_size: usize,
    new_owner: Arc<dyn Fn(&Key, &MatrixChange) -> Option<NodeId> + Send + Sync>,
) -> (DataManager, Arc<LocalRouter>, Arc<dyn KeyedDb<DataManagerValue>>) {
    let router = Arc::new(LocalRouter::new(100));
    let dispatcher = Arc::new(Dispatcher::new(router.clone(), GroupSender::new(node(0), node(0))));
    let db: Arc<dyn KeyedDb<DataManagerValue>> = Arc::new(MemoryKeyedDb::new());
    let cache = Arc::new(CacheHandler::new(64));
    (DataManager::new(node(0), group_size, db.clone(), cache, dispatcher, new_owner), router, db)
}

fn no_transfer() -> Arc<dyn Fn(&Key, &MatrixChange) -> Option<NodeId> + Send + Sync> {
    Arc::new(|_, _| None)
}

#[test]
fn scenario_1_put_resolves_and_records_holder() {
    let (mut dm, _router, db) = build(1, no_transfer());
    let k = key(1);
    db.commit(k, DataManagerAction::AddPmid { pmid: node(9), chunk_size: 256 }).unwrap();

    dm.handle_message(envelope(1, node(1), group_for_key(&k), DataManagerMessage::PutRequest { key: k, chunk_size: 256 }));

    let v = db.get(&k).unwrap();
    assert_eq!(v.subscribers, 2);
    assert_eq!(v.all_pmids.len(), 1);
    assert!(v.all_pmids.contains(&node(9)));
}

#[test]
fn scenario_2_delete_to_zero_removes_the_key_and_fans_out() {
    let (mut dm, router, db) = build(1, no_transfer());
    let k = key(2);
    db.commit(k, DataManagerAction::AddPmid { pmid: node(9), chunk_size: 64 }).unwrap();

    dm.handle_message(envelope(1, node(1), group_for_key(&k), DataManagerMessage::DeleteRequest { key: k }));

    assert!(db.get(&k).is_err());
    let sent = router.sent();
    assert!(sent.iter().any(|(authority, _)| *authority == Authority::Single(node(9))));
}

#[test]
fn scenario_3_add_pmid_creates_an_account() {
    let (mut dm, _router, db) = build(1, no_transfer());
    let k = key(3);

    dm.handle_message(envelope(1, node(1), group_for_key(&k), DataManagerMessage::PutResponse { key: k, pmid: node(9), chunk_size: 256 }));

    let v = db.get(&k).unwrap();
    assert_eq!(v.subscribers, 1);
    assert!(v.all_pmids.contains(&node(9)));
}

#[test]
fn scenario_4_remove_pmid_reduces_holder_set() {
    let (mut dm, _router, db) = build(1, no_transfer());
    let k = key(4);
    db.commit(k, DataManagerAction::AddPmid { pmid: node(1), chunk_size: 8 }).unwrap();
    db.commit(k, DataManagerAction::AddPmid { pmid: node(2), chunk_size: 8 }).unwrap();

    dm.handle_message(envelope(1, node(1), group_for_key(&k), DataManagerMessage::PutFailure { key: k, pmid: node(2) }));

    let v = db.get(&k).unwrap();
    assert_eq!(v.subscribers, 1);
    assert!(v.all_pmids.contains(&node(1)));
    assert!(!v.all_pmids.contains(&node(2)));
}

#[test]
fn scenario_5_node_down_then_node_up_restores_liveness() {
    let (mut dm, _router, db) = build(1, no_transfer());
    let k = key(5);
    db.commit(k, DataManagerAction::AddPmid { pmid: node(1), chunk_size: 8 }).unwrap();
    db.commit(k, DataManagerAction::AddPmid { pmid: node(2), chunk_size: 8 }).unwrap();
    db.commit(k, DataManagerAction::SetPmidOnline { pmid: node(1) }).unwrap();
    db.commit(k, DataManagerAction::SetPmidOnline { pmid: node(2) }).unwrap();

    dm.handle_message(envelope(1, node(1), group_for_key(&k), DataManagerMessage::SetPmidOffline { key: k, pmid: node(2) }));
    let after_down = db.get(&k).unwrap();
    assert_eq!(after_down.online_pmids.len(), 1);
    assert!(after_down.online_pmids.contains(&node(1)));

    dm.handle_message(envelope(2, node(1), group_for_key(&k), DataManagerMessage::SetPmidOnline { key: k, pmid: node(2) }));
    let after_up = db.get(&k).unwrap();
    assert_eq!(after_up.online_pmids.len(), 2);
}

#[test]
fn scenario_6_churn_transfer_moves_exactly_the_keys_that_changed_owner() {
    let moved_to = node(250);
    let new_owner: Arc<dyn Fn(&Key, &MatrixChange) -> Option<NodeId> + Send + Sync> =
        Arc::new(move |key, _change| {
            // Two out of every five keys (40 of 100) move to `moved_to`.
            if key.name.as_bytes()[0] % 5 < 2 {
                Some(moved_to)
            } else {
                None
            }
        });
    let (dm, router, db) = build(1, new_owner);

    for n in 0u8..100 {
        let k = key(n);
        db.commit(k, DataManagerAction::AddPmid { pmid: node(1), chunk_size: 8 }).unwrap();
    }

    let change = MatrixChange::new(vec![node(0)], vec![node(0)]);
    dm.handle_churn_event(&change);

    let sent = router.sent();
    let transferred_to_moved: usize = sent
        .iter()
        .filter(|(authority, _)| *authority == Authority::Single(moved_to))
        .count();
    assert_eq!(transferred_to_moved, 1, "all 40 moved keys batch into a single AccountTransfer message");

    for n in 0u8..100 {
        if n % 5 >= 2 {
            assert!(db.get(&key(n)).is_ok());
        }
    }
}
