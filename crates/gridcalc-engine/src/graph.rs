//! Dependency tracking for formula calculation

use gridcalc_core::{CellAddress, CellRange};
use std::collections::{btree_set, BTreeMap, BTreeSet, VecDeque};

/// A registered cell in the dependency graph
#[derive(Debug, Clone, PartialEq)]
pub struct DependencyNode {
    address: CellAddress,
    /// Cells this cell's formula reads (precedents)
    depends_on: BTreeSet<CellAddress>,
    /// Cells whose formulas read this cell
    dependents: BTreeSet<CellAddress>,
    is_dirty: bool,
    is_calculating: bool,
    spill_range: Option<CellRange>,
}

impl DependencyNode {
    fn new(address: CellAddress) -> Self {
        Self {
            address,
            depends_on: BTreeSet::new(),
            dependents: BTreeSet::new(),
            is_dirty: true,
            is_calculating: false,
            spill_range: None,
        }
    }

    /// Address of this node
    pub fn address(&self) -> CellAddress {
        self.address
    }

    /// Cells this cell depends on
    pub fn depends_on(&self) -> &BTreeSet<CellAddress> {
        &self.depends_on
    }

    /// Cells that depend on this cell
    pub fn dependents(&self) -> &BTreeSet<CellAddress> {
        &self.dependents
    }

    /// Whether the cell's value is stale
    pub fn is_dirty(&self) -> bool {
        self.is_dirty
    }

    /// Whether an evaluator call for this cell is in flight
    pub fn is_calculating(&self) -> bool {
        self.is_calculating
    }

    /// Range the last computed value spilled into
    pub fn spill_range(&self) -> Option<CellRange> {
        self.spill_range
    }
}

/// Result of [`DependencyGraph::topological_sort`]
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct TopologicalOrder {
    /// Cells in evaluation order; every cell follows the cells it depends on
    pub order: Vec<CellAddress>,
    /// True when some cells could not be ordered because they sit on a cycle
    pub has_cycle: bool,
}

/// Transitive neighbours of a cell
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct DependencyChain {
    /// Every cell this cell reads, directly or indirectly
    pub upstream: Vec<CellAddress>,
    /// Every cell that reads this cell, directly or indirectly
    pub downstream: Vec<CellAddress>,
}

/// Dependency graph for formula cells
///
/// Tracks which cells depend on which other cells, enabling incremental
/// recalculation. The `dependents` sets are kept as the exact transpose of
/// the `depends_on` sets on every mutation.
#[derive(Debug, Default, Clone)]
pub struct DependencyGraph {
    nodes: BTreeMap<CellAddress, DependencyNode>,
    /// Cells marked dirty since the last completed pass
    dirty_queue: BTreeSet<CellAddress>,
}

impl DependencyGraph {
    /// Create a new empty dependency graph
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a cell with the complete list of cells its formula reads
    ///
    /// Any previous edges of `address` are replaced. Referenced cells that are
    /// not yet in the graph get an empty placeholder node, so formulas may
    /// refer to cells that have no content yet. New nodes start dirty.
    pub fn register_cell<I>(&mut self, address: CellAddress, depends_on: I)
    where
        I: IntoIterator<Item = CellAddress>,
    {
        let new_deps: BTreeSet<CellAddress> = depends_on.into_iter().collect();

        let old_deps = std::mem::take(
            &mut self
                .nodes
                .entry(address)
                .or_insert_with(|| DependencyNode::new(address))
                .depends_on,
        );

        for dep in &old_deps {
            if let Some(node) = self.nodes.get_mut(dep) {
                node.dependents.remove(&address);
            }
        }

        for &dep in &new_deps {
            self.nodes
                .entry(dep)
                .or_insert_with(|| DependencyNode::new(dep))
                .dependents
                .insert(address);
        }

        if let Some(node) = self.nodes.get_mut(&address) {
            node.depends_on = new_deps;
        }
    }

    /// Mark a cell and everything downstream of it dirty
    ///
    /// Stops at cells that are already dirty, which also bounds the walk on
    /// cyclic graphs. Unknown addresses are ignored.
    pub fn mark_dirty(&mut self, address: CellAddress) {
        let mut pending = vec![address];

        while let Some(current) = pending.pop() {
            let Some(node) = self.nodes.get_mut(&current) else {
                continue;
            };
            if node.is_dirty {
                continue;
            }
            node.is_dirty = true;
            self.dirty_queue.insert(current);
            pending.extend(node.dependents.iter().copied());
        }
    }

    /// Mark a cell dirty and propagate even if it was already dirty
    ///
    /// Used after the cell's own content changed, where downstream cells must
    /// be invalidated regardless of the cell's current flag.
    pub fn invalidate(&mut self, address: CellAddress) {
        let dependents: Vec<CellAddress> = match self.nodes.get_mut(&address) {
            Some(node) => {
                node.is_dirty = true;
                node.dependents.iter().copied().collect()
            }
            None => return,
        };
        self.dirty_queue.insert(address);

        for dependent in dependents {
            self.mark_dirty(dependent);
        }
    }

    /// Remove a cell and every edge touching it
    pub fn remove_cell(&mut self, address: CellAddress) {
        let Some(node) = self.nodes.remove(&address) else {
            self.dirty_queue.remove(&address);
            return;
        };

        for precedent in &node.depends_on {
            if let Some(n) = self.nodes.get_mut(precedent) {
                n.dependents.remove(&address);
            }
        }

        for dependent in &node.dependents {
            if let Some(n) = self.nodes.get_mut(dependent) {
                n.depends_on.remove(&address);
            }
        }

        self.dirty_queue.remove(&address);
    }

    /// Get cells that directly depend on the given cell
    pub fn get_dependents(&self, address: CellAddress) -> Vec<CellAddress> {
        self.nodes
            .get(&address)
            .map(|n| n.dependents.iter().copied().collect())
            .unwrap_or_default()
    }

    /// Get cells the given cell directly depends on
    pub fn get_dependencies(&self, address: CellAddress) -> Vec<CellAddress> {
        self.nodes
            .get(&address)
            .map(|n| n.depends_on.iter().copied().collect())
            .unwrap_or_default()
    }

    /// Get the full upstream and downstream closure of a cell
    ///
    /// The cell itself is only listed if it lies on a cycle.
    pub fn get_dependency_chain(&self, address: CellAddress) -> DependencyChain {
        DependencyChain {
            upstream: self.transitive(address, |n| &n.depends_on),
            downstream: self.transitive(address, |n| &n.dependents),
        }
    }

    fn transitive<F>(&self, start: CellAddress, edges: F) -> Vec<CellAddress>
    where
        F: Fn(&DependencyNode) -> &BTreeSet<CellAddress>,
    {
        let mut visited = BTreeSet::new();
        let mut pending: Vec<CellAddress> = self
            .nodes
            .get(&start)
            .map(|n| edges(n).iter().copied().collect())
            .unwrap_or_default();

        while let Some(current) = pending.pop() {
            if !visited.insert(current) {
                continue;
            }
            if let Some(node) = self.nodes.get(&current) {
                pending.extend(edges(node).iter().copied());
            }
        }

        visited.into_iter().collect()
    }

    /// Find reference cycles with a depth-first walk over precedents
    ///
    /// Each cycle is reported as the path from the first repeated cell back to
    /// itself, e.g. `[A1, B1, A1]`. Depending on walk order, overlapping
    /// cycles may be reported more than once; this is not a minimal cycle
    /// basis.
    pub fn detect_circular_references(&self) -> Vec<Vec<CellAddress>> {
        let mut cycles = Vec::new();
        let mut visited: BTreeSet<CellAddress> = BTreeSet::new();
        let mut on_stack: BTreeSet<CellAddress> = BTreeSet::new();

        for (&start, start_node) in &self.nodes {
            if visited.contains(&start) {
                continue;
            }

            // Explicit stack of (cell, remaining precedents) keeps deep chains
            // off the call stack.
            let mut frames: Vec<(CellAddress, btree_set::Iter<'_, CellAddress>)> =
                vec![(start, start_node.depends_on.iter())];
            visited.insert(start);
            on_stack.insert(start);

            while let Some((_, deps)) = frames.last_mut() {
                match deps.next().copied() {
                    Some(dep) if on_stack.contains(&dep) => {
                        if let Some(pos) = frames.iter().position(|(addr, _)| *addr == dep) {
                            let mut cycle: Vec<CellAddress> =
                                frames[pos..].iter().map(|(addr, _)| *addr).collect();
                            cycle.push(dep);
                            cycles.push(cycle);
                        }
                    }
                    Some(dep) => {
                        if visited.contains(&dep) {
                            continue;
                        }
                        if let Some(node) = self.nodes.get(&dep) {
                            visited.insert(dep);
                            on_stack.insert(dep);
                            frames.push((dep, node.depends_on.iter()));
                        }
                    }
                    None => {
                        if let Some((addr, _)) = frames.pop() {
                            on_stack.remove(&addr);
                        }
                    }
                }
            }
        }

        cycles
    }

    /// Order all cells so each follows its precedents (Kahn's algorithm)
    ///
    /// Cells on a cycle never reach in-degree zero and are left out of the
    /// order, which is how `has_cycle` is detected.
    pub fn topological_sort(&self) -> TopologicalOrder {
        let mut in_degree: BTreeMap<CellAddress, usize> = self
            .nodes
            .iter()
            .map(|(addr, node)| (*addr, node.depends_on.len()))
            .collect();

        let mut queue: VecDeque<CellAddress> = in_degree
            .iter()
            .filter(|(_, degree)| **degree == 0)
            .map(|(addr, _)| *addr)
            .collect();

        let mut order = Vec::with_capacity(self.nodes.len());

        while let Some(addr) = queue.pop_front() {
            order.push(addr);

            let Some(node) = self.nodes.get(&addr) else {
                continue;
            };
            for dependent in &node.dependents {
                if let Some(degree) = in_degree.get_mut(dependent) {
                    *degree = degree.saturating_sub(1);
                    if *degree == 0 {
                        queue.push_back(*dependent);
                    }
                }
            }
        }

        TopologicalOrder {
            has_cycle: order.len() < self.nodes.len(),
            order,
        }
    }

    /// Get a node by address
    pub fn node(&self, address: CellAddress) -> Option<&DependencyNode> {
        self.nodes.get(&address)
    }

    /// Check if a cell is registered
    pub fn contains(&self, address: CellAddress) -> bool {
        self.nodes.contains_key(&address)
    }

    /// Whether a registered cell is dirty (false for unknown cells)
    pub fn is_dirty(&self, address: CellAddress) -> bool {
        self.nodes.get(&address).is_some_and(|n| n.is_dirty)
    }

    /// Number of nodes currently flagged dirty
    pub fn dirty_count(&self) -> usize {
        self.nodes.values().filter(|n| n.is_dirty).count()
    }

    /// Cells waiting in the dirty queue
    pub fn dirty_queue(&self) -> impl Iterator<Item = CellAddress> + '_ {
        self.dirty_queue.iter().copied()
    }

    /// All registered addresses in row-major order
    pub fn addresses(&self) -> impl Iterator<Item = CellAddress> + '_ {
        self.nodes.keys().copied()
    }

    /// Number of registered cells
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// Check if the graph is empty
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Clear the entire graph
    pub fn clear(&mut self) {
        self.nodes.clear();
        self.dirty_queue.clear();
    }

    pub(crate) fn mark_clean(&mut self, address: CellAddress) {
        if let Some(node) = self.nodes.get_mut(&address) {
            node.is_dirty = false;
        }
    }

    pub(crate) fn set_calculating(&mut self, address: CellAddress, calculating: bool) {
        if let Some(node) = self.nodes.get_mut(&address) {
            node.is_calculating = calculating;
        }
    }

    pub(crate) fn set_spill_range(&mut self, address: CellAddress, range: Option<CellRange>) {
        if let Some(node) = self.nodes.get_mut(&address) {
            node.spill_range = range;
        }
    }

    pub(crate) fn clear_dirty_queue(&mut self) {
        self.dirty_queue.clear();
    }
}
