//! Structural properties of the dependency graph under random edits

use gridcalc_engine::{CellAddress, DependencyGraph};
use proptest::prelude::*;

/// Small address space so random edits collide often
fn address() -> impl Strategy<Value = CellAddress> {
    (0u32..6, 0u16..4).prop_map(|(row, col)| CellAddress::new(row, col))
}

#[derive(Debug, Clone)]
enum Edit {
    Register(CellAddress, Vec<CellAddress>),
    Remove(CellAddress),
}

fn edit() -> impl Strategy<Value = Edit> {
    prop_oneof![
        4 => (address(), prop::collection::vec(address(), 0..4))
            .prop_map(|(cell, deps)| Edit::Register(cell, deps)),
        1 => address().prop_map(Edit::Remove),
    ]
}

fn apply(edits: &[Edit]) -> DependencyGraph {
    let mut graph = DependencyGraph::new();
    for edit in edits {
        match edit {
            Edit::Register(cell, deps) => graph.register_cell(*cell, deps.iter().copied()),
            Edit::Remove(cell) => graph.remove_cell(*cell),
        }
    }
    graph
}

/// A random DAG: every cell only depends on cells with a smaller index
fn dag() -> impl Strategy<Value = Vec<(CellAddress, Vec<CellAddress>)>> {
    prop::collection::vec(prop::collection::vec(any::<prop::sample::Index>(), 0..3), 1..12)
        .prop_map(|rows| {
            rows.iter()
                .enumerate()
                .map(|(i, picks)| {
                    let cell = CellAddress::new(i as u32, 0);
                    let deps = if i == 0 {
                        Vec::new()
                    } else {
                        picks
                            .iter()
                            .map(|p| CellAddress::new(p.index(i) as u32, 0))
                            .collect()
                    };
                    (cell, deps)
                })
                .collect()
        })
}

proptest! {
    #[test]
    fn edges_stay_bidirectional(edits in prop::collection::vec(edit(), 0..40)) {
        let graph = apply(&edits);

        for cell in graph.addresses() {
            let node = graph.node(cell).unwrap();
            for dep in node.depends_on() {
                let upstream = graph.node(*dep);
                prop_assert!(upstream.is_some(), "{} depends on missing {}", cell, dep);
                prop_assert!(upstream.unwrap().dependents().contains(&cell));
            }
            for dependent in node.dependents() {
                let downstream = graph.node(*dependent);
                prop_assert!(downstream.is_some());
                prop_assert!(downstream.unwrap().depends_on().contains(&cell));
            }
        }
    }

    #[test]
    fn topological_order_respects_edges(edges in dag()) {
        let mut graph = DependencyGraph::new();
        for (cell, deps) in &edges {
            graph.register_cell(*cell, deps.iter().copied());
        }

        let result = graph.topological_sort();
        prop_assert!(!result.has_cycle);
        prop_assert_eq!(result.order.len(), graph.len());

        let position = |a: &CellAddress| result.order.iter().position(|x| x == a).unwrap();
        for cell in graph.addresses() {
            for dep in graph.node(cell).unwrap().depends_on() {
                prop_assert!(position(dep) < position(&cell));
            }
        }
        prop_assert!(graph.detect_circular_references().is_empty());
    }

    #[test]
    fn mark_dirty_twice_equals_once(edits in prop::collection::vec(edit(), 0..30), target in address()) {
        let mut once = apply(&edits);
        let mut twice = once.clone();

        once.mark_dirty(target);
        twice.mark_dirty(target);
        twice.mark_dirty(target);

        prop_assert_eq!(once.dirty_queue().collect::<Vec<_>>(), twice.dirty_queue().collect::<Vec<_>>());
        for cell in once.addresses() {
            prop_assert_eq!(once.is_dirty(cell), twice.is_dirty(cell));
        }
    }

    #[test]
    fn cycles_close_on_themselves(edits in prop::collection::vec(edit(), 0..40)) {
        let graph = apply(&edits);
        let cycles = graph.detect_circular_references();

        prop_assert_eq!(cycles.is_empty(), !graph.topological_sort().has_cycle);
        for cycle in cycles {
            prop_assert!(cycle.len() >= 2);
            prop_assert_eq!(cycle.first(), cycle.last());
            for pair in cycle.windows(2) {
                prop_assert!(graph.node(pair[0]).unwrap().depends_on().contains(&pair[1]));
            }
        }
    }
}
