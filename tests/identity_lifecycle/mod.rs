use std::sync::Arc;
use std::time::Duration;

use identity_allocator::constants::SCOPE_LOCAL;
use identity_allocator::Change;
use identity_allocator::ChangeKind;
use identity_allocator::LocalAllocator;
use identity_allocator::LocalAllocatorConfig;
use identity_allocator::NumericId;
use identity_allocator::Observable;
use tokio_util::sync::CancellationToken;

use crate::common::labels;
use crate::common::node_cache;
use crate::common::wait_until;
use crate::common::InMemoryStore;
use crate::common::LocalRefs;
use crate::common::WAIT_TIMEOUT;

#[tokio::test]
async fn test_identities_propagate_to_every_node() {
    let store = Arc::new(InMemoryStore::default());
    store.put(100, labels(&["k8s:app=web"]));

    let node_a = node_cache(&store, Arc::new(LocalRefs::default()), false);
    let node_b = node_cache(&store, Arc::new(LocalRefs::default()), false);
    for node in [&node_a, &node_b] {
        let list_done = node.start();
        assert!(tokio::time::timeout(WAIT_TIMEOUT, list_done.wait()).await.unwrap());
    }

    let mut feed = node_b.subscribe(CancellationToken::new());
    store.put(101, labels(&["k8s:app=db"]));
    store.delete(100);

    let mut kinds = Vec::new();
    while kinds.len() < 4 {
        let change = tokio::time::timeout(WAIT_TIMEOUT, feed.recv()).await.unwrap().unwrap();
        kinds.push((change.kind(), change.id()));
    }
    assert_eq!(
        kinds,
        vec![
            (ChangeKind::Upsert, Some(NumericId::new(100))),
            (ChangeKind::Sync, None),
            (ChangeKind::Upsert, Some(NumericId::new(101))),
            (ChangeKind::Delete, Some(NumericId::new(100))),
        ]
    );

    wait_until("node a to converge", || node_a.num_entries() == 1).await;
    assert_eq!(node_a.get(&labels(&["k8s:app=db"])), Some(NumericId::new(101)));
    assert_eq!(node_a.get_by_id(NumericId::new(100)), None);

    node_a.stop().await;
    node_b.stop().await;
    assert_eq!(tokio::time::timeout(WAIT_TIMEOUT, feed.recv()).await.unwrap(), None);
}

#[tokio::test]
async fn test_master_key_protection_restores_remote_key() {
    let store = Arc::new(InMemoryStore::default());
    let web = labels(&["k8s:app=web"]);
    store.put(7, web.clone());

    let refs = Arc::new(LocalRefs::default());
    refs.hold(7, web.clone());
    let node = node_cache(&store, refs.clone(), true);
    let list_done = node.start();
    assert!(tokio::time::timeout(WAIT_TIMEOUT, list_done.wait()).await.unwrap());

    let mut feed = node.subscribe(CancellationToken::new());
    let first = tokio::time::timeout(WAIT_TIMEOUT, feed.recv()).await.unwrap();
    assert_eq!(first.map(|c| c.kind()), Some(ChangeKind::Upsert));

    store.fail_next_updates(2);
    store.delete(7);

    wait_until("key to be recreated remotely", || store.get(7).is_some()).await;
    assert_eq!(store.get(7), Some(web.clone()));
    assert!(store.update_calls() >= 3);
    assert_eq!(node.get(&web), Some(NumericId::new(7)));

    // The recreation echoes back as an upsert, never as a delete
    tokio::time::sleep(Duration::from_millis(50)).await;
    let mut rest = Vec::new();
    while let Ok(change) = feed.try_recv() {
        rest.push(change);
    }
    assert!(rest.iter().all(|c| c.kind() != ChangeKind::Delete), "unexpected delete: {rest:?}");

    // Once the node lets go, a remote delete takes effect
    refs.drop_ref(7);
    store.delete(7);
    wait_until("delete to apply", || node.get(&web).is_none()).await;

    node.stop().await;
}

#[tokio::test]
async fn test_local_identities_survive_restart() {
    let config = LocalAllocatorConfig {
        scope: SCOPE_LOCAL,
        min_id: 1,
        max_id: 1000,
    };
    let cidr = labels(&["cidr:10.0.0.0/8"]);
    let host = labels(&["reserved:host"]);

    let before = LocalAllocator::new(config).unwrap();
    before.lookup_or_create(labels(&["cidr:192.168.0.0/16"]), NumericId::INVALID).unwrap();
    let (cidr_id, _) = before.lookup_or_create(cidr.clone(), NumericId::INVALID).unwrap();
    let (host_id, _) = before.lookup_or_create(host.clone(), NumericId::INVALID).unwrap();
    let checkpoint = before.checkpoint();
    before.close();

    // Restart: restored IDs are withheld until their keys come back
    let after = LocalAllocator::new(config).unwrap();
    let restored: Vec<NumericId> = checkpoint.iter().map(|identity| identity.id).collect();
    assert!(after.withhold(&restored).is_empty());

    let (fresh, _) = after.lookup_or_create(labels(&["cidr:172.16.0.0/12"]), NumericId::INVALID).unwrap();
    assert!(!restored.contains(&fresh.id));

    let (host_again, created) = after.lookup_or_create(host.clone(), host_id.id).unwrap();
    assert!(created);
    assert_eq!(host_again.id, host_id.id);
    let (cidr_again, _) = after.lookup_or_create(cidr.clone(), cidr_id.id).unwrap();
    assert_eq!(cidr_again.id, cidr_id.id);

    let mut feed = after.subscribe(CancellationToken::new());
    let mut replayed = 0;
    loop {
        match tokio::time::timeout(WAIT_TIMEOUT, feed.recv()).await.unwrap().unwrap() {
            Change::Sync => break,
            Change::Upsert { .. } => replayed += 1,
            Change::Delete { .. } => panic!("delete in replay"),
        }
    }
    assert_eq!(replayed, 3);
}
