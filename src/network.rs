//! Multi-level network container.
//!
//! Level 0 holds the observed nodes; each higher level partitions the level
//! below into blocks. Within a level, nodes are bucketed by type, and a
//! block always shares its children's type, so bipartite / k-partite
//! networks partition each type independently.
//!
//! The network owns every node through its [`NodeArena`]; levels and type
//! buckets hold `NodeId` handles in insertion order, which keeps iteration
//! (and therefore every downstream random draw) deterministic.

use crate::error::{Result, SbmError};
use crate::node::{Node, NodeArena, NodeId};
use crate::sampler::Sampler;
use crate::state::StateDump;
use fnv::FnvHashMap;
use log::debug;
use std::collections::BTreeMap;

/// Multi-level, multi-type network of observed nodes and block nodes.
#[derive(Debug)]
pub struct Network {
    arena: NodeArena,
    /// level -> type -> ordered bucket of owning handles
    levels: Vec<Vec<Vec<NodeId>>>,
    types: Vec<String>,
    type_lookup: FnvHashMap<String, usize>,
    /// (id, level) -> handle; ids are unique within a level
    index: FnvHashMap<(String, usize), NodeId>,
    /// Monotone counter minting synthetic block ids; never reset
    block_counter: usize,
}

impl Network {
    /// Create an empty network with a fixed type table and a bare level 0.
    pub fn new<S: AsRef<str>>(types: &[S]) -> Self {
        assert!(!types.is_empty(), "a network needs at least one node type");
        let types: Vec<String> = types.iter().map(|t| t.as_ref().to_string()).collect();
        let type_lookup = types
            .iter()
            .enumerate()
            .map(|(i, t)| (t.clone(), i))
            .collect();
        let mut net = Network {
            arena: NodeArena::new(),
            levels: Vec::new(),
            types,
            type_lookup,
            index: FnvHashMap::default(),
            block_counter: 0,
        };
        net.build_level();
        net
    }

    // =========================================================================
    // Information
    // =========================================================================

    /// Number of node types.
    pub fn num_types(&self) -> usize {
        self.types.len()
    }

    /// Name of a type by its index.
    pub fn type_name(&self, type_index: usize) -> &str {
        &self.types[type_index]
    }

    /// Resolve a type name to its index.
    pub fn type_index(&self, name: &str) -> Result<usize> {
        self.type_lookup
            .get(name)
            .copied()
            .ok_or_else(|| SbmError::UnknownType { name: name.into() })
    }

    /// Number of levels, counting level 0.
    pub fn num_levels(&self) -> usize {
        self.levels.len()
    }

    /// Whether any block level exists above level 0.
    pub fn has_blocks(&self) -> bool {
        self.num_levels() > 1
    }

    /// Total number of nodes across all levels.
    pub fn num_nodes(&self) -> usize {
        self.levels
            .iter()
            .map(|level| level.iter().map(Vec::len).sum::<usize>())
            .sum()
    }

    /// Number of nodes living on one level.
    pub fn num_nodes_at_level(&self, level: usize) -> Result<usize> {
        self.check_level(level)?;
        Ok(self.levels[level].iter().map(Vec::len).sum())
    }

    /// Number of nodes of one type on one level.
    pub fn num_nodes_of_type(&self, type_name: &str, level: usize) -> Result<usize> {
        let t = self.type_index(type_name)?;
        self.check_level(level)?;
        Ok(self.levels[level][t].len())
    }

    /// Borrow a node by handle.
    pub fn node(&self, id: NodeId) -> &Node {
        &self.arena[id]
    }

    /// Resolve an `(id, level)` pair to a handle.
    pub fn node_id(&self, id: &str, level: usize) -> Result<NodeId> {
        self.index
            .get(&(id.to_string(), level))
            .copied()
            .ok_or_else(|| SbmError::UnknownId { id: id.into() })
    }

    /// Snapshot of all node handles on one level, in bucket order.
    pub fn node_ids_at_level(&self, level: usize) -> Result<Vec<NodeId>> {
        self.check_level(level)?;
        Ok(self.levels[level].iter().flatten().copied().collect())
    }

    /// Bucket of handles for one type on one level.
    pub fn nodes_of_type_at_level(&self, type_index: usize, level: usize) -> Result<&[NodeId]> {
        self.check_level(level)?;
        if type_index >= self.num_types() {
            return Err(SbmError::UnknownType {
                name: format!("#{type_index}"),
            });
        }
        Ok(&self.levels[level][type_index])
    }

    // =========================================================================
    // Construction
    // =========================================================================

    /// Insert a node into the `(type, level)` bucket.
    ///
    /// A level one above the current top grows the level stack. Fails with
    /// `DuplicateId` when `(id, level)` is already taken and `UnknownType`
    /// for a name outside the type table.
    pub fn add_node(&mut self, id: &str, type_name: &str, level: usize) -> Result<NodeId> {
        let t = self.type_index(type_name)?;
        if level > self.num_levels() {
            return Err(SbmError::InvalidLevel { level });
        }
        if self.index.contains_key(&(id.to_string(), level)) {
            return Err(SbmError::DuplicateId {
                id: id.into(),
                level,
            });
        }
        if level == self.num_levels() {
            self.build_level();
        }
        let nid = self.arena.insert(Node::new(id, t, level));
        self.levels[level][t].push(nid);
        self.index.insert((id.to_string(), level), nid);
        Ok(nid)
    }

    /// Connect two level-0 nodes by id.
    pub fn add_edge(&mut self, u: &str, v: &str) -> Result<()> {
        let un = self.node_id(u, 0)?;
        let vn = self.node_id(v, 0)?;
        self.add_edge_between(un, vn)
    }

    /// Connect two nodes by handle; they must share a level.
    pub fn add_edge_between(&mut self, u: NodeId, v: NodeId) -> Result<()> {
        self.arena.connect(u, v)
    }

    /// Mint a block node with a synthetic id at a level >= 1.
    pub fn add_block(&mut self, type_index: usize, level: usize) -> Result<NodeId> {
        if level == 0 || level > self.num_levels() {
            return Err(SbmError::InvalidLevel { level });
        }
        if type_index >= self.num_types() {
            return Err(SbmError::UnknownType {
                name: format!("#{type_index}"),
            });
        }
        if level == self.num_levels() {
            self.build_level();
        }
        Ok(self.mint_block(type_index, level))
    }

    fn mint_block(&mut self, type_index: usize, level: usize) -> NodeId {
        // Skip over ids the caller may have taken for their own nodes.
        let id = loop {
            let candidate = format!("b{}", self.block_counter);
            self.block_counter += 1;
            if !self.index.contains_key(&(candidate.clone(), level)) {
                break candidate;
            }
        };
        let nid = self.arena.insert(Node::new(&id, type_index, level));
        self.levels[level][type_index].push(nid);
        self.index.insert((id, level), nid);
        nid
    }

    // =========================================================================
    // Hierarchy management
    // =========================================================================

    /// Append an empty level on top of the stack.
    pub fn build_level(&mut self) {
        self.levels.push(vec![Vec::new(); self.num_types()]);
    }

    /// Append a fresh block level and assign every node of the current top
    /// level a parent in it.
    ///
    /// `None` gives each node its own block; `Some(b)` creates `b` blocks
    /// per type and round-robin-assigns shuffled children, so per-type block
    /// occupancy is balanced to within one. Fails with `Overprovisioned`
    /// when `b` is zero or exceeds the node count of some type.
    pub fn initialize_blocks(
        &mut self,
        num_blocks: Option<usize>,
        sampler: &mut Sampler,
    ) -> Result<()> {
        let child_level = self.num_levels() - 1;
        if let Some(b) = num_blocks {
            for t in 0..self.num_types() {
                let available = self.levels[child_level][t].len();
                if b == 0 || b > available {
                    return Err(SbmError::Overprovisioned {
                        type_name: self.types[t].clone(),
                        requested: b,
                        available,
                    });
                }
            }
        }
        let block_level = self.num_levels();
        self.build_level();
        for t in 0..self.num_types() {
            let mut children = self.levels[child_level][t].clone();
            let b = num_blocks.unwrap_or(children.len());
            let blocks: Vec<NodeId> = (0..b).map(|_| self.mint_block(t, block_level)).collect();
            if num_blocks.is_some() {
                sampler.shuffle(&mut children);
            }
            for (i, &child) in children.iter().enumerate() {
                self.arena.set_parent(child, blocks[i % b]);
            }
        }
        Ok(())
    }

    /// Remove the top block level. Fails with `NoBlocks` at level 0.
    pub fn delete_block_level(&mut self) -> Result<()> {
        if !self.has_blocks() {
            return Err(SbmError::NoBlocks);
        }
        self.pop_level();
        Ok(())
    }

    /// Remove every block level, leaving only the observed nodes.
    pub fn delete_all_blocks(&mut self) {
        while self.has_blocks() {
            self.pop_level();
        }
    }

    fn pop_level(&mut self) {
        let top = self.num_levels() - 1;
        for t in 0..self.num_types() {
            for child in self.levels[top - 1][t].clone() {
                self.arena.clear_parent(child);
            }
        }
        let buckets = self.levels.pop().expect("pop_level below level 0");
        for bucket in buckets {
            for nid in bucket {
                let node = self.arena.remove(nid);
                self.index.remove(&(node.id().to_string(), top));
            }
        }
    }

    /// Remove every block (at any level above 0) that has no children,
    /// detaching it from its own parent first. Returns the removed blocks
    /// by value so the caller may inspect them.
    pub fn clean_empty_blocks(&mut self) -> Vec<Node> {
        let mut removed = Vec::new();
        for level in 1..self.num_levels() {
            for t in 0..self.num_types() {
                let empties: Vec<NodeId> = self.levels[level][t]
                    .iter()
                    .copied()
                    .filter(|&b| !self.arena[b].has_children())
                    .collect();
                if empties.is_empty() {
                    continue;
                }
                self.levels[level][t].retain(|&b| self.arena[b].has_children());
                for b in empties {
                    self.arena.clear_parent(b);
                    let node = self.arena.remove(b);
                    self.index.remove(&(node.id().to_string(), level));
                    removed.push(node);
                }
            }
        }
        if !removed.is_empty() {
            debug!("pruned {} empty block(s)", removed.len());
        }
        removed
    }

    // =========================================================================
    // Re-parenting (delegated to the arena)
    // =========================================================================

    /// Move `child` under a new parent block, keeping degree accounting on
    /// both ancestor chains intact.
    pub fn set_parent(&mut self, child: NodeId, block: NodeId) {
        self.arena.set_parent(child, block);
    }

    /// Re-parent all of `source`'s children under `target`.
    pub fn merge_into(&mut self, target: NodeId, source: NodeId) {
        self.arena.merge_into(target, source);
    }

    /// Multiset of level-`level` ancestors over a node's edges, with
    /// multiplicity. `level` may equal the node's own level (same-level
    /// adjacency); anything below it, or beyond the top level, fails with
    /// `InvalidLevel`.
    pub fn neighbors_at_level(&self, node: NodeId, level: usize) -> Result<Vec<NodeId>> {
        self.check_level(level)?;
        self.arena.neighbors_at_level(node, level)
    }

    /// Histogram of [`neighbors_at_level`](Self::neighbors_at_level).
    pub fn edge_counts_to_level(&self, node: NodeId, level: usize) -> Result<BTreeMap<NodeId, usize>> {
        self.check_level(level)?;
        self.arena.edge_counts_to_level(node, level)
    }

    // =========================================================================
    // State export / import
    // =========================================================================

    /// Export the partition: one entry per node below the top level.
    pub fn get_state(&self) -> StateDump {
        let mut dump = StateDump::with_capacity(self.num_nodes());
        for level in 0..self.num_levels().saturating_sub(1) {
            for bucket in &self.levels[level] {
                for &nid in bucket {
                    let node = &self.arena[nid];
                    if let Some(parent) = node.parent() {
                        dump.push(
                            node.id(),
                            self.types[node.type_index()].clone(),
                            self.arena[parent].id(),
                            level,
                        );
                    }
                }
            }
        }
        dump
    }

    /// Rebuild the hierarchy from a dump produced by
    /// [`get_state`](Self::get_state).
    ///
    /// All existing block levels are dropped, then entries are replayed in
    /// level order: previously unseen parent ids materialize blocks one
    /// level up, of the child's type. Ends with a
    /// [`clean_empty_blocks`](Self::clean_empty_blocks) pass. Entries must
    /// be grouped by ascending level, as `get_state` emits them.
    pub fn update_state(&mut self, dump: &StateDump) -> Result<()> {
        assert!(dump.is_consistent(), "state dump columns must align");
        self.delete_all_blocks();
        for i in 0..dump.len() {
            let level = dump.levels[i];
            let child = self.node_id(&dump.ids[i], level)?;
            let parent_id = &dump.parents[i];
            let existing = self.index.get(&(parent_id.clone(), level + 1)).copied();
            let parent = match existing {
                Some(p) => p,
                None => self.add_node(parent_id, &dump.types[i], level + 1)?,
            };
            self.arena.set_parent(child, parent);
        }
        self.clean_empty_blocks();
        Ok(())
    }

    fn check_level(&self, level: usize) -> Result<()> {
        if level >= self.num_levels() {
            return Err(SbmError::InvalidLevel { level });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn square_net() -> Network {
        // 4-cycle a-b-c-d-a, one type.
        let mut net = Network::new(&["x"]);
        for id in ["a", "b", "c", "d"] {
            net.add_node(id, "x", 0).unwrap();
        }
        for (u, v) in [("a", "b"), ("b", "c"), ("c", "d"), ("d", "a")] {
            net.add_edge(u, v).unwrap();
        }
        net
    }

    #[test]
    fn test_add_node_rejects_duplicates_and_unknown_types() {
        let mut net = Network::new(&["x"]);
        net.add_node("a", "x", 0).unwrap();
        assert!(matches!(
            net.add_node("a", "x", 0),
            Err(SbmError::DuplicateId { .. })
        ));
        assert!(matches!(
            net.add_node("b", "y", 0),
            Err(SbmError::UnknownType { .. })
        ));
    }

    #[test]
    fn test_add_edge_unknown_id() {
        let mut net = Network::new(&["x"]);
        net.add_node("a", "x", 0).unwrap();
        assert!(matches!(
            net.add_edge("a", "zzz"),
            Err(SbmError::UnknownId { .. })
        ));
    }

    #[test]
    fn test_initialize_blocks_one_per_node() {
        let mut net = square_net();
        let mut sampler = Sampler::from_seed(1);
        net.initialize_blocks(None, &mut sampler).unwrap();

        assert_eq!(net.num_levels(), 2);
        assert_eq!(net.num_nodes_at_level(1).unwrap(), 4);
        for nid in net.node_ids_at_level(0).unwrap() {
            let parent = net.node(nid).parent().unwrap();
            assert_eq!(net.node(parent).children().len(), 1);
            assert_eq!(net.node(parent).degree(), net.node(nid).degree());
        }
    }

    #[test]
    fn test_initialize_blocks_round_robin_balance() {
        let mut net = Network::new(&["x"]);
        for i in 0..10 {
            net.add_node(&format!("n{i}"), "x", 0).unwrap();
        }
        let mut sampler = Sampler::from_seed(9);
        net.initialize_blocks(Some(3), &mut sampler).unwrap();

        let mut sizes: Vec<usize> = net
            .node_ids_at_level(1)
            .unwrap()
            .iter()
            .map(|&b| net.node(b).children().len())
            .collect();
        sizes.sort_unstable();
        assert_eq!(sizes, vec![3, 3, 4]);
    }

    #[test]
    fn test_initialize_blocks_overprovisioned() {
        let mut net = square_net();
        let mut sampler = Sampler::from_seed(1);
        assert!(matches!(
            net.initialize_blocks(Some(5), &mut sampler),
            Err(SbmError::Overprovisioned { .. })
        ));
        assert!(matches!(
            net.initialize_blocks(Some(0), &mut sampler),
            Err(SbmError::Overprovisioned { .. })
        ));
        // A failed request must not leave a half-built level behind.
        assert_eq!(net.num_levels(), 1);
    }

    #[test]
    fn test_block_types_partition_independently() {
        let mut net = Network::new(&["u", "v"]);
        for id in ["u1", "u2"] {
            net.add_node(id, "u", 0).unwrap();
        }
        for id in ["v1", "v2", "v3"] {
            net.add_node(id, "v", 0).unwrap();
        }
        let mut sampler = Sampler::from_seed(4);
        net.initialize_blocks(None, &mut sampler).unwrap();

        assert_eq!(net.num_nodes_of_type("u", 1).unwrap(), 2);
        assert_eq!(net.num_nodes_of_type("v", 1).unwrap(), 3);
        for nid in net.node_ids_at_level(0).unwrap() {
            let parent = net.node(nid).parent().unwrap();
            assert_eq!(net.node(parent).type_index(), net.node(nid).type_index());
        }
    }

    #[test]
    fn test_delete_block_level_guard() {
        let mut net = square_net();
        assert!(matches!(net.delete_block_level(), Err(SbmError::NoBlocks)));

        let mut sampler = Sampler::from_seed(1);
        net.initialize_blocks(None, &mut sampler).unwrap();
        net.delete_block_level().unwrap();
        assert_eq!(net.num_levels(), 1);
        for nid in net.node_ids_at_level(0).unwrap() {
            assert!(net.node(nid).parent().is_none());
        }
    }

    #[test]
    fn test_clean_empty_blocks() {
        let mut net = square_net();
        let mut sampler = Sampler::from_seed(1);
        net.initialize_blocks(Some(2), &mut sampler).unwrap();

        // Manually drain one block by moving everyone into the other.
        let blocks = net.node_ids_at_level(1).unwrap();
        let (keep, drain) = (blocks[0], blocks[1]);
        let drain_id = net.node(drain).id().to_string();
        net.merge_into(keep, drain);

        let removed = net.clean_empty_blocks();
        assert_eq!(removed.len(), 1);
        assert_eq!(removed[0].id(), drain_id);
        assert_eq!(net.num_nodes_at_level(1).unwrap(), 1);
        assert_eq!(net.node(keep).children().len(), 4);
    }

    #[test]
    fn test_state_round_trip_preserves_partition() {
        let mut net = square_net();
        let mut sampler = Sampler::from_seed(2);
        net.initialize_blocks(Some(2), &mut sampler).unwrap();

        let before: Vec<(String, String)> = membership(&net);
        let dump = net.get_state();
        assert_eq!(dump.len(), 4);

        net.update_state(&dump).unwrap();
        assert_eq!(membership(&net), before);
    }

    fn membership(net: &Network) -> Vec<(String, String)> {
        net.node_ids_at_level(0)
            .unwrap()
            .iter()
            .map(|&nid| {
                let node = net.node(nid);
                let parent = net.node(node.parent().unwrap());
                (node.id().to_string(), parent.id().to_string())
            })
            .collect()
    }

    #[test]
    fn test_update_state_rejects_unknown_nodes() {
        let mut net = square_net();
        let mut dump = StateDump::default();
        dump.push("ghost", "x", "b0", 0);
        assert!(matches!(
            net.update_state(&dump),
            Err(SbmError::UnknownId { .. })
        ));
    }

    #[test]
    fn test_minted_block_ids_never_repeat() {
        let mut net = square_net();
        let mut sampler = Sampler::from_seed(1);
        net.initialize_blocks(None, &mut sampler).unwrap();
        let first: Vec<String> = net
            .node_ids_at_level(1)
            .unwrap()
            .iter()
            .map(|&b| net.node(b).id().to_string())
            .collect();

        net.delete_block_level().unwrap();
        net.initialize_blocks(None, &mut sampler).unwrap();
        for nid in net.node_ids_at_level(1).unwrap() {
            assert!(!first.contains(&net.node(nid).id().to_string()));
        }
    }
}
