mod common;

use chord_dht::Key;

use common::{connect, fill_fingers, spaced_id, spaced_nodes, Registry};

/// Returns a resource key whose hash falls in `(lo, hi]`.
fn key_in(lo: &Key, hi: &Key, tag: &str) -> String {
    (0..)
        .map(|i| format!("{}-{}", tag, i))
        .find(|key| Key::hash(key.as_bytes()).between_inclusive_end(lo, hi))
        .unwrap()
}

#[test]
fn test_predecessor_failure_replicates_once() {
    let registry = Registry::new();
    let nodes = spaced_nodes(&registry, 4, 2);
    connect(&nodes);

    // nodes[0] owns "f1": its hash falls between the predecessor and the node
    let (owner, predecessor, successor) = (&nodes[0], &nodes[3], &nodes[1]);
    assert!(Key::hash(b"f1").between_inclusive_end(&predecessor.id(), &owner.id()));
    owner.insert_entry("f1", owner.id());
    registry.fail(&predecessor.node_data());

    owner.check_predecessor();
    assert_eq!(owner.predecessor(), None);
    assert_eq!(owner.network().replications("f1"), vec![successor.node_data().addr]);
    assert_eq!(successor.entry("f1"), Some(owner.id()));

    owner.check_predecessor();
    assert_eq!(owner.network().replications("f1").len(), 1);
}

#[test]
fn test_live_predecessor_replicates_nothing() {
    let registry = Registry::new();
    let nodes = spaced_nodes(&registry, 4, 2);
    connect(&nodes);

    nodes[2].insert_entry("f1", Key::rand());
    nodes[2].check_predecessor();

    assert_eq!(nodes[2].predecessor(), Some(nodes[1].node_data()));
    assert!(nodes[2].network().replications("f1").is_empty());
}

#[test]
fn test_predecessor_failure_when_alone_replicates_nothing() {
    let registry = Registry::new();
    let node = registry.add_node(spaced_id(8), 2);
    let predecessor = registry.add_node(spaced_id(4), 2);
    node.set_predecessor(Some(predecessor.node_data()));
    node.insert_entry("f1", Key::rand());

    registry.fail(&predecessor.node_data());
    node.check_predecessor();

    assert_eq!(node.predecessor(), None);
    assert!(node.network().calls().iter().all(|(addr, _)| *addr == predecessor.node_data().addr));
}

#[test]
fn test_notify_hands_over_entries_and_backs_up() {
    let registry = Registry::new();
    let predecessor = registry.add_node(spaced_id(0), 1);
    let candidate = registry.add_node(spaced_id(4), 1);
    let node = registry.add_node(spaced_id(8), 1);
    let successor = registry.add_node(spaced_id(12), 1);

    node.set_predecessor(Some(predecessor.node_data()));
    node.set_successor(successor.node_data());
    candidate.set_successor(node.node_data());

    let handed = key_in(&spaced_id(0), &spaced_id(4), "handed");
    let kept = key_in(&spaced_id(4), &spaced_id(8), "kept");
    node.insert_entry(&handed, predecessor.id());
    node.insert_entry(&kept, successor.id());

    candidate.notify();

    assert_eq!(node.predecessor(), Some(candidate.node_data()));
    assert_eq!(candidate.entry(&handed), Some(predecessor.id()));
    assert_eq!(candidate.entry(&kept), None);
    assert_eq!(successor.entry(&kept), Some(successor.id()));
    assert_eq!(successor.entry(&handed), None);
    assert_eq!(node.network().replications(&handed), vec![candidate.node_data().addr]);
    assert_eq!(node.network().replications(&kept), vec![successor.node_data().addr]);

    // the node keeps its copy of the handed over entry as a replica
    assert_eq!(node.entry(&handed), Some(predecessor.id()));
}

#[test]
fn test_first_notify_hands_over_everything_outside_own_arc() {
    let registry = Registry::new();
    let candidate = registry.add_node(spaced_id(4), 1);
    let node = registry.add_node(spaced_id(8), 1);
    candidate.set_successor(node.node_data());

    let before = key_in(&spaced_id(0), &spaced_id(4), "before");
    let after = key_in(&spaced_id(8), &spaced_id(0), "after");
    let own = key_in(&spaced_id(4), &spaced_id(8), "own");
    for key in &[&before, &after, &own] {
        node.insert_entry(key, node.id());
    }

    candidate.notify();

    assert_eq!(node.predecessor(), Some(candidate.node_data()));
    assert_eq!(candidate.entry(&before), Some(node.id()));
    assert_eq!(candidate.entry(&after), Some(node.id()));
    assert_eq!(candidate.entry(&own), None);
    // alone on the ring, so no backups are pushed
    assert!(node.network().replications(&own).is_empty());
}

#[test]
fn test_rejected_notify_moves_nothing() {
    let registry = Registry::new();
    let node = registry.add_node(spaced_id(8), 1);
    let predecessor = registry.add_node(spaced_id(6), 1);
    let outside = registry.add_node(spaced_id(4), 1);
    node.set_predecessor(Some(predecessor.node_data()));
    outside.set_successor(node.node_data());

    let key = key_in(&spaced_id(0), &spaced_id(4), "outside");
    node.insert_entry(&key, node.id());
    outside.notify();

    assert_eq!(node.predecessor(), Some(predecessor.node_data()));
    assert_eq!(outside.entry(&key), None);
    assert!(node.network().calls().is_empty());
}

#[test]
fn test_store_and_lookup() {
    let registry = Registry::new();
    let nodes = spaced_nodes(&registry, 8, 2);
    connect(&nodes);
    fill_fingers(&nodes, 0..160);

    let key = "report.pdf";
    let responsible = nodes[3].store(key).unwrap();
    let index = nodes
        .iter()
        .position(|node| node.node_data() == responsible)
        .unwrap();
    assert_eq!(responsible, nodes[0].find_successor(&Key::hash(key.as_bytes())));

    let next = &nodes[(index + 1) % nodes.len()];
    assert_eq!(nodes[index].entry(key), Some(nodes[3].id()));
    assert_eq!(next.entry(key), Some(nodes[3].id()));
    assert_eq!(nodes[index].network().replications(key), vec![next.node_data().addr]);

    for node in &nodes {
        assert_eq!(node.lookup(key).unwrap(), Some(nodes[3].id()));
    }
    assert_eq!(nodes[6].lookup("missing.txt").unwrap(), None);
}

#[test]
fn test_lookup_survives_responsible_failure() {
    let registry = Registry::new();
    let nodes = spaced_nodes(&registry, 8, 2);
    connect(&nodes);
    fill_fingers(&nodes, 0..160);

    let key = "movie.mkv";
    let responsible = nodes[1].store(key).unwrap();
    let index = nodes
        .iter()
        .position(|node| node.node_data() == responsible)
        .unwrap();
    let count = nodes.len();
    let predecessor = &nodes[(index + count - 1) % count];
    let next = &nodes[(index + 1) % count];

    registry.fail(&responsible);
    next.check_predecessor();
    predecessor.stabilize();
    assert_eq!(predecessor.successor(), next.node_data());
    assert_eq!(next.predecessor(), Some(predecessor.node_data()));

    let origin = &nodes[(index + 4) % count];
    assert_eq!(origin.lookup(key).unwrap(), Some(nodes[1].id()));
}

#[test]
fn test_store_rejects_empty_key() {
    let registry = Registry::new();
    let nodes = spaced_nodes(&registry, 4, 1);
    connect(&nodes);

    assert!(nodes[0].store("").is_err());
    assert!(nodes.iter().all(|node| node.snapshot().bucket().is_empty()));
}
