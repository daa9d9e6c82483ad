//! Structural tests for GrabTree: sectors, linking, durability and pruning.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use rstest::rstest;

use grabtree::application::Request;
use grabtree::domain::{
    GrabError, GrabItem, GrabTree, NoExclusion, NodeShape, PruneListener, SectorKey, TreeDisplay,
    TreeOptions,
};
use grabtree::util::testing::init_test_setup;

fn client(name: &str) -> SectorKey<String> {
    SectorKey::Client(name.to_string())
}

fn seeded(seed: u64) -> TreeOptions {
    TreeOptions {
        seed: Some(seed),
        ..TreeOptions::default()
    }
}

fn counting_tree(options: TreeOptions) -> (GrabTree<Request>, Arc<AtomicUsize>) {
    init_test_setup();
    let events = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&events);
    let listener: Arc<dyn PruneListener> = Arc::new(move |_tree: u64| {
        counter.fetch_add(1, Ordering::SeqCst);
    });
    (GrabTree::new(options).with_listener(listener), events)
}

// ============================================================
// Concrete scenarios
// ============================================================

#[test]
fn given_two_sectors_when_removing_three_times_then_each_item_returned_once() {
    let (tree, events) = counting_tree(seeded(1));
    let root = tree.root();
    tree.add_keyed(root, client("a"), Request::new(1, "a")).unwrap();
    tree.add_keyed(root, client("a"), Request::new(2, "a")).unwrap();
    tree.add_keyed(root, client("b"), Request::new(3, "b")).unwrap();

    let mut ids: Vec<u64> = (0..3)
        .map(|_| tree.remove_random(&NoExclusion).unwrap().unwrap().id)
        .collect();
    ids.sort();

    assert_eq!(ids, vec![1, 2, 3]);
    assert!(tree.is_empty(root).unwrap());
    assert_eq!(events.load(Ordering::SeqCst), 1);

    // A drained root stays quiet on further calls
    assert!(tree.remove_random(&NoExclusion).unwrap().is_none());
    assert_eq!(events.load(Ordering::SeqCst), 1);
}

#[test]
fn given_leaf_with_finished_item_when_removing_then_returns_none_and_prunes_leaf() {
    let (tree, events) = counting_tree(seeded(2));
    let done = Request::new(1, "a");
    let leaf = tree.insert(&[client("a")], Arc::clone(&done)).unwrap();
    done.finish();

    let picked = tree.remove_random_from(leaf, &NoExclusion).unwrap();

    assert!(picked.is_none());
    assert!(!tree.contains(leaf));
    assert!(!done.link().is_linked());
    assert!(tree.is_empty(tree.root()).unwrap());
    assert_eq!(events.load(Ordering::SeqCst), 1);
}

#[test]
fn given_always_excluding_predicate_when_removing_then_leaf_keeps_its_items() {
    let (tree, events) = counting_tree(seeded(3));
    let leaf = tree.insert(&[client("a")], Request::new(1, "a")).unwrap();
    tree.insert(&[client("a")], Request::new(2, "a")).unwrap();

    let picked = tree.remove_random(&|_: &Request| true).unwrap();

    assert!(picked.is_none());
    assert_eq!(tree.size(leaf).unwrap(), 2);
    assert_eq!(events.load(Ordering::SeqCst), 0);
}

// ============================================================
// Pruning
// ============================================================

#[test]
fn given_leaf_two_levels_deep_when_last_item_taken_then_leaf_and_branch_detach_once() {
    let (tree, events) = counting_tree(seeded(4));
    let path = [1u64.into(), client("a")];
    let leaf = tree.insert(&path, Request::new(7, "a")).unwrap();
    let branch = tree.lookup_child(tree.root(), &SectorKey::Id(1)).unwrap().unwrap();
    assert_eq!(tree.node_count(), 3);
    assert_eq!(tree.depth(), 3);

    let picked = tree.remove_random(&NoExclusion).unwrap().unwrap();

    assert_eq!(picked.id, 7);
    assert!(!tree.contains(leaf));
    assert!(!tree.contains(branch));
    assert_eq!(tree.node_count(), 1);
    assert_eq!(events.load(Ordering::SeqCst), 1);
}

#[test]
fn given_sibling_sector_when_one_leaf_drains_then_pruning_stops_at_branch() {
    let (tree, events) = counting_tree(seeded(5));
    let x = Request::new(1, "a");
    let leaf_a = tree.insert(&[SectorKey::Id(1), client("a")], Arc::clone(&x)).unwrap();
    let leaf_b = tree.insert(&[SectorKey::Id(1), client("b")], Request::new(2, "b")).unwrap();
    let branch = tree.lookup_child(tree.root(), &SectorKey::Id(1)).unwrap().unwrap();

    assert!(tree.remove(&x).unwrap());

    assert!(!tree.contains(leaf_a));
    assert!(tree.contains(leaf_b));
    assert_eq!(tree.size(branch).unwrap(), 1);
    assert_eq!(events.load(Ordering::SeqCst), 0);
}

#[test]
fn given_refilled_leaf_when_maybe_remove_then_keeps_it() {
    let (tree, events) = counting_tree(seeded(6));
    let leaf = tree
        .add_or_get_child(tree.root(), client("a"), NodeShape::Leaf)
        .unwrap();
    tree.add(leaf, Request::new(1, "a")).unwrap();

    tree.maybe_remove(leaf).unwrap();

    assert!(tree.contains(leaf));
    assert_eq!(events.load(Ordering::SeqCst), 0);
}

#[test]
fn given_empty_leaf_when_maybe_remove_then_detaches_and_notifies_owner() {
    let (tree, events) = counting_tree(seeded(7));
    let leaf = tree
        .add_or_get_child(tree.root(), client("a"), NodeShape::Leaf)
        .unwrap();

    tree.maybe_remove(leaf).unwrap();

    assert!(!tree.contains(leaf));
    assert_eq!(events.load(Ordering::SeqCst), 1);
}

#[rstest]
#[case(NodeShape::Branch)]
#[case(NodeShape::Leaf)]
fn given_drained_tree_when_maybe_remove_on_root_then_owner_is_not_notified_again(
    #[case] root: NodeShape,
) {
    let (tree, events) = counting_tree(TreeOptions { root, ..seeded(30) });
    let path = match root {
        NodeShape::Branch => vec![client("a")],
        NodeShape::Leaf => Vec::new(),
    };
    tree.insert(&path, Request::new(1, "a")).unwrap();
    tree.remove_random(&NoExclusion).unwrap().unwrap();
    assert_eq!(events.load(Ordering::SeqCst), 1);

    tree.maybe_remove(tree.root()).unwrap();
    tree.maybe_remove(tree.root()).unwrap();

    assert_eq!(events.load(Ordering::SeqCst), 1);
    assert!(tree.contains(tree.root()));
}

#[test]
fn given_pruned_leaf_when_adding_to_stale_handle_then_unknown_node() {
    let (tree, _) = counting_tree(seeded(8));
    let first = Request::new(1, "a");
    let leaf = tree.insert(&[client("a")], Arc::clone(&first)).unwrap();
    tree.remove(&first).unwrap();

    let err = tree.add(leaf, Request::new(2, "a")).unwrap_err();

    assert_eq!(err, GrabError::UnknownNode(leaf));
    // a fresh insert gets a fresh sector
    let again = tree.insert(&[client("a")], Request::new(3, "a")).unwrap();
    assert_ne!(again, leaf);
}

// ============================================================
// Linking
// ============================================================

#[test]
fn given_linked_item_when_adding_to_other_bag_then_already_linked_and_nothing_changes() {
    let (tree, _) = counting_tree(seeded(9));
    let item = Request::new(1, "a");
    let leaf_a = tree.insert(&[client("a")], Arc::clone(&item)).unwrap();
    let leaf_b = tree.insert(&[client("b")], Request::new(2, "b")).unwrap();

    let into_other = tree.add(leaf_b, Arc::clone(&item));
    let into_same = tree.add(leaf_a, Arc::clone(&item));

    assert!(matches!(into_other, Err(GrabError::AlreadyLinked { bag, .. }) if bag == leaf_a));
    assert!(matches!(into_same, Err(GrabError::AlreadyLinked { .. })));
    assert_eq!(tree.size(leaf_a).unwrap(), 1);
    assert_eq!(tree.size(leaf_b).unwrap(), 1);
    assert_eq!(item.link().placement().map(|p| p.bag), Some(leaf_a));
}

#[test]
fn given_item_linked_in_other_tree_when_inserting_then_no_sector_is_created() {
    let (first, _) = counting_tree(seeded(10));
    let (second, second_events) = counting_tree(seeded(11));
    let item = Request::new(1, "a");
    first.insert(&[client("a")], Arc::clone(&item)).unwrap();

    let err = second.insert(&[SectorKey::Id(3), client("a")], Arc::clone(&item));

    assert!(matches!(err, Err(GrabError::AlreadyLinked { tree, .. }) if tree == first.id()));
    assert_eq!(second.node_count(), 1);
    assert_eq!(second_events.load(Ordering::SeqCst), 0);
}

#[test]
fn given_item_when_removed_explicitly_then_it_can_be_queued_again() {
    let (tree, events) = counting_tree(seeded(12));
    let item = Request::new(1, "a");
    tree.insert(&[client("a")], Arc::clone(&item)).unwrap();

    assert!(tree.remove(&item).unwrap());
    assert!(!tree.remove(&item).unwrap());
    assert!(!item.link().is_linked());
    assert_eq!(events.load(Ordering::SeqCst), 1);

    tree.insert(&[client("b")], Arc::clone(&item)).unwrap();
    assert_eq!(tree.item_count(), 1);
}

// ============================================================
// Invalid arguments and consistency
// ============================================================

#[test]
fn given_anonymous_key_when_adding_child_then_invalid_argument() {
    let (tree, _) = counting_tree(seeded(13));
    let err = tree
        .add_or_get_child(tree.root(), SectorKey::Anonymous, NodeShape::Leaf)
        .unwrap_err();
    assert!(matches!(err, GrabError::InvalidArgument(_)));
}

#[test]
fn given_branch_when_adding_item_directly_then_invalid_argument() {
    let (tree, _) = counting_tree(seeded(14));
    let err = tree.add(tree.root(), Request::new(1, "a")).unwrap_err();
    assert!(matches!(err, GrabError::InvalidArgument(_)));
}

#[test]
fn given_existing_leaf_sector_when_requesting_branch_then_invalid_argument() {
    let (tree, _) = counting_tree(seeded(15));
    let leaf = tree.insert(&[client("a")], Request::new(1, "a")).unwrap();

    let err = tree
        .add_or_get_child(tree.root(), client("a"), NodeShape::Branch)
        .unwrap_err();
    let nested = tree.add_or_get_child(leaf, client("x"), NodeShape::Leaf).unwrap_err();

    assert!(matches!(err, GrabError::InvalidArgument(_)));
    assert!(matches!(nested, GrabError::InvalidArgument(_)));
}

#[test]
fn given_handle_of_other_tree_when_used_then_invalid_argument() {
    let (first, _) = counting_tree(seeded(16));
    let (second, _) = counting_tree(seeded(17));

    let err = second.size(first.root()).unwrap_err();

    assert!(matches!(err, GrabError::InvalidArgument(_)));
}

#[test]
fn given_durable_tree_when_adding_transient_item_then_consistency_error() {
    let (tree, _) = counting_tree(TreeOptions {
        durable: true,
        ..seeded(18)
    });

    let err = tree.insert(&[client("a")], Request::new(1, "a")).unwrap_err();
    tree.insert(&[client("a")], Request::durable(2, "a")).unwrap();

    assert!(matches!(err, GrabError::Consistency(_)));
    assert_eq!(tree.item_count(), 1);
    assert!(tree.is_durable());
}

// ============================================================
// Keys and lookup
// ============================================================

#[test]
fn given_client_sector_when_swapping_key_then_contents_and_handle_are_kept() {
    let (tree, _) = counting_tree(seeded(19));
    let root = tree.root();
    let leaf = tree.insert(&[client("old")], Request::new(1, "old")).unwrap();
    tree.insert(&[client("old")], Request::new(2, "old")).unwrap();

    tree.set_key(leaf, client("new")).unwrap();

    assert_eq!(tree.lookup_child(root, &client("old")).unwrap(), None);
    assert_eq!(tree.lookup_child(root, &client("new")).unwrap(), Some(leaf));
    assert_eq!(tree.size(leaf).unwrap(), 2);
    assert!(tree.remove_random(&NoExclusion).unwrap().is_some());
}

#[test]
fn given_taken_or_non_client_key_when_swapping_then_invalid_argument() {
    let (tree, _) = counting_tree(seeded(20));
    let a = tree.insert(&[client("a")], Request::new(1, "a")).unwrap();
    tree.insert(&[client("b")], Request::new(2, "b")).unwrap();
    let numbered = tree.insert(&[SectorKey::Id(4)], Request::new(3, "c")).unwrap();

    assert!(matches!(
        tree.set_key(a, client("b")),
        Err(GrabError::InvalidArgument(_))
    ));
    assert!(matches!(
        tree.set_key(a, SectorKey::Id(9)),
        Err(GrabError::InvalidArgument(_))
    ));
    assert!(matches!(
        tree.set_key(numbered, client("z")),
        Err(GrabError::InvalidArgument(_))
    ));
}

#[test]
fn given_existing_sector_when_add_or_get_then_returns_same_handle() {
    let (tree, _) = counting_tree(seeded(21));
    let root = tree.root();
    let first = tree.add_or_get_child(root, client("a"), NodeShape::Leaf).unwrap();
    let second = tree.add_or_get_child(root, client("a"), NodeShape::Leaf).unwrap();
    tree.add(first, Request::new(1, "a")).unwrap();

    assert_eq!(first, second);
    assert_eq!(tree.lookup_child(root, &client("a")).unwrap(), Some(first));
    assert_eq!(tree.children(root).unwrap(), vec![(client("a"), first)]);
    assert_eq!(tree.shape(first).unwrap(), NodeShape::Leaf);
}

#[rstest]
#[case(&[1], 1)]
#[case(&[3, 0, 2], 2)]
#[case(&[5, 5, 5, 5], 4)]
fn given_clients_when_inserting_then_one_sector_per_non_empty_client(
    #[case] depths: &[usize],
    #[case] sectors: usize,
) {
    let (tree, _) = counting_tree(seeded(22));
    let mut id = 0;
    for (i, &depth) in depths.iter().enumerate() {
        for _ in 0..depth {
            let name = format!("c{i}");
            tree.insert(&[client(&name)], Request::new(id, name.clone())).unwrap();
            id += 1;
        }
    }

    assert_eq!(tree.size(tree.root()).unwrap(), sectors);
    assert_eq!(tree.item_count(), depths.iter().sum::<usize>());
}

// ============================================================
// Leaf root
// ============================================================

#[test]
fn given_leaf_root_when_drained_then_notifies_once() {
    let (tree, events) = counting_tree(TreeOptions {
        root: NodeShape::Leaf,
        ..seeded(23)
    });
    tree.insert(&[], Request::new(1, "a")).unwrap();
    tree.insert(&[], Request::new(2, "b")).unwrap();

    assert!(tree.remove_random(&NoExclusion).unwrap().is_some());
    assert!(tree.remove_random(&NoExclusion).unwrap().is_some());
    assert!(tree.remove_random(&NoExclusion).unwrap().is_none());

    assert_eq!(events.load(Ordering::SeqCst), 1);
    assert!(tree.contains(tree.root()));
}

#[test]
fn given_leaf_root_when_inserting_with_path_then_invalid_argument() {
    let (tree, _) = counting_tree(TreeOptions {
        root: NodeShape::Leaf,
        ..seeded(24)
    });
    let err = tree.insert(&[client("a")], Request::new(1, "a")).unwrap_err();
    assert!(matches!(err, GrabError::InvalidArgument(_)));
}

#[test]
fn given_populated_tree_when_rendering_then_lists_sectors() {
    let (tree, _) = counting_tree(seeded(25));
    tree.insert(&[SectorKey::Id(2), client("alice")], Request::new(1, "alice")).unwrap();
    tree.insert(&[SectorKey::Id(2), client("bob")], Request::new(2, "bob")).unwrap();

    let rendered = tree.to_tree_string().to_string();

    assert!(rendered.contains("<root> (1 sectors)"), "{rendered}");
    assert!(rendered.contains("#2 (2 sectors)"), "{rendered}");
    assert!(rendered.contains("\"alice\" [1 items]"), "{rendered}");
}

#[test]
fn given_linked_item_when_asking_placement_then_names_its_bag_in_this_tree_only() {
    let (tree, _) = counting_tree(seeded(26));
    let (other, _) = counting_tree(seeded(27));
    let item = Request::new(1, "a");
    let leaf = tree
        .insert(&[SectorKey::Id(1), client("a")], Arc::clone(&item))
        .unwrap();
    tree.insert(&[SectorKey::Id(1), client("b")], Request::new(2, "b")).unwrap();
    let branch = tree.lookup_child(tree.root(), &SectorKey::Id(1)).unwrap().unwrap();

    assert_eq!(tree.placement(&item).map(|p| p.bag), Some(leaf));
    assert_eq!(other.placement(&item), None);
    assert_eq!(tree.item_count_in(branch).unwrap(), 2);
    assert_eq!(tree.item_count_in(leaf).unwrap(), 1);
}
