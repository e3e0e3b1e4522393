//! Degree-corrected SBM inference engine.
//!
//! Implements the microcanonical description length, local entropy deltas
//! for single-node moves, the asymmetric ergodic proposal, the
//! Metropolis–Hastings sweep, priority-driven agglomerative merges, and the
//! outer collapse schedule that discovers the number of blocks.
//!
//! # Description length
//!
//! ```text
//! S = -(E + sum_k N_k * ln(k!) + 1/2 * sum_{r,s} e_rs * ln(e_rs / (e_r * e_s)))
//! ```
//!
//! where `E` is the edge count at the node level, `N_k` the number of nodes
//! of degree `k`, `e_r` a block's degree and `e_rs` the edge count between
//! blocks (intra-block connections counted twice). A node move only touches
//! the edge term for the pairs involving its old and new block, so the
//! sweep evaluates moves in time independent of network size on sparse
//! graphs.

use crate::error::{Result, SbmError};
use crate::network::Network;
use crate::node::NodeId;
use crate::sampler::Sampler;
use crate::state::StateDump;
use fnv::FnvHashSet;
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use special::Gamma as SpecialGamma;
use std::collections::{BTreeMap, BinaryHeap};

/// Tuning knobs for one engine. Engine-scoped, never process-global, so
/// independent engines on disjoint networks can run concurrently.
#[derive(Debug, Clone)]
pub struct SbmOptions {
    /// Proposal smoothing; guarantees every block stays reachable. Default: 0.1
    pub eps: f64,
    /// Inverse temperature for move acceptance. Default: 1.5
    pub beta: f64,
    /// Exhaustively enumerate merge candidates instead of sampling. Default: false
    pub greedy: bool,
    /// Merge candidates sampled per block when not greedy. Default: 5
    pub n_checks_per_block: usize,
    /// Per-iteration block reduction ratio of the collapse schedule (> 1). Default: 2.0
    pub sigma: f64,
    /// Random seed. Default: 42
    pub seed: u64,
}

impl Default for SbmOptions {
    fn default() -> Self {
        SbmOptions {
            eps: 0.1,
            beta: 1.5,
            greedy: false,
            n_checks_per_block: 5,
            sigma: 2.0,
            seed: 42,
        }
    }
}

/// Outcome of evaluating one proposed move.
#[derive(Debug, Clone, Copy)]
pub struct Proposal {
    /// Change of the edge-entropy term, (post - pre); larger is more favorable
    pub entropy_delta: f64,
    /// Hastings-corrected acceptance probability, already clamped to [0, 1]
    pub accept_prob: f64,
}

/// Result of one MCMC sweep over a level.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SweepResult {
    /// Ids of the nodes whose block changed, in sweep order
    pub moved_ids: Vec<String>,
    /// Sum of the accepted moves' entropy deltas
    pub entropy_delta: f64,
}

/// Result of one agglomerative merge step.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MergeResult {
    /// Accepted merges as `(absorbed_id, surviving_id)` pairs
    pub merges: Vec<(String, String)>,
    /// Sum of the accepted merges' entropy deltas
    pub entropy_delta: f64,
    /// Description length after the merge
    pub entropy: f64,
}

/// One record of the collapse schedule.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CollapseStep {
    /// Blocks remaining after this step
    pub num_blocks: usize,
    /// Accepted merges as `(absorbed_id, surviving_id)` pairs
    pub merges: Vec<(String, String)>,
    /// Entropy delta accumulated by the merge and any equilibration sweeps
    pub entropy_delta: f64,
    /// Description length at the end of the step
    pub entropy: f64,
    /// Partition snapshot at the end of the step
    pub state: StateDump,
}

/// Merge candidate ranked by entropy delta. A delta tie resolves toward the
/// higher candidate index — the lexicographic order of a max-heap over
/// `(delta, index)` pairs — so the consumption sequence is stable.
#[derive(Debug)]
struct RankedMerge {
    delta: f64,
    index: usize,
}

impl PartialEq for RankedMerge {
    fn eq(&self, other: &Self) -> bool {
        self.index == other.index
    }
}

impl Eq for RankedMerge {}

impl PartialOrd for RankedMerge {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for RankedMerge {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.delta
            .total_cmp(&other.delta)
            .then_with(|| self.index.cmp(&other.index))
    }
}

/// Inference engine owning a network, its options and the sole sampler.
#[derive(Debug)]
pub struct Sbm {
    net: Network,
    opts: SbmOptions,
    sampler: Sampler,
}

impl Sbm {
    /// Wrap a constructed network; the sampler is seeded from the options.
    pub fn new(net: Network, opts: SbmOptions) -> Self {
        let sampler = Sampler::from_seed(opts.seed);
        Sbm { net, opts, sampler }
    }

    /// Borrow the underlying network.
    pub fn network(&self) -> &Network {
        &self.net
    }

    /// Mutably borrow the underlying network.
    pub fn network_mut(&mut self) -> &mut Network {
        &mut self.net
    }

    /// Engine options.
    pub fn options(&self) -> &SbmOptions {
        &self.opts
    }

    /// Give the network back, dropping the engine.
    pub fn into_network(self) -> Network {
        self.net
    }

    // =========================================================================
    // Network pass-throughs
    // =========================================================================

    /// Add an observed node. See [`Network::add_node`].
    pub fn add_node(&mut self, id: &str, type_name: &str) -> Result<NodeId> {
        self.net.add_node(id, type_name, 0)
    }

    /// Connect two observed nodes. See [`Network::add_edge`].
    pub fn add_edge(&mut self, u: &str, v: &str) -> Result<()> {
        self.net.add_edge(u, v)
    }

    /// Seed a fresh block level using the engine's sampler for shuffling.
    /// See [`Network::initialize_blocks`].
    pub fn initialize_blocks(&mut self, num_blocks: Option<usize>) -> Result<()> {
        self.net.initialize_blocks(num_blocks, &mut self.sampler)
    }

    /// Drop every block level. See [`Network::delete_all_blocks`].
    pub fn delete_all_blocks(&mut self) {
        self.net.delete_all_blocks();
    }

    /// Export the partition. See [`Network::get_state`].
    pub fn get_state(&self) -> StateDump {
        self.net.get_state()
    }

    /// Restore a partition. See [`Network::update_state`].
    pub fn update_state(&mut self, dump: &StateDump) -> Result<()> {
        self.net.update_state(dump)
    }

    // =========================================================================
    // Entropy
    // =========================================================================

    /// Exact microcanonical description length at `level`, scored against
    /// the block partition one level up. Used for reporting; the sweep and
    /// merge paths only ever evaluate local deltas.
    pub fn entropy(&self, level: usize) -> Result<f64> {
        if level >= self.net.num_levels() {
            return Err(SbmError::InvalidLevel { level });
        }
        if level + 1 >= self.net.num_levels() {
            return Err(SbmError::NoBlocks);
        }

        let mut total_degree = 0usize;
        let mut degree_counts: BTreeMap<usize, usize> = BTreeMap::new();
        for nid in self.net.node_ids_at_level(level)? {
            let d = self.net.node(nid).degree();
            total_degree += d;
            *degree_counts.entry(d).or_insert(0) += 1;
        }
        // Every edge was counted from both endpoints.
        let num_edges = total_degree as f64 / 2.0;

        let mut degree_term = 0.0;
        for (degree, count) in degree_counts {
            degree_term += count as f64 * SpecialGamma::ln_gamma(degree as f64 + 1.0).0;
        }

        // sum_{r,s} e_rs * ln(e_rs / (e_r * e_s)); each unordered pair shows
        // up once from either side, intra-block counts arrive pre-doubled.
        let block_level = level + 1;
        let mut edge_term = 0.0;
        for r in self.net.node_ids_at_level(block_level)? {
            let e_r = self.net.node(r).degree() as f64;
            for (s, count) in self.net.edge_counts_to_level(r, block_level)? {
                let e_rs = count as f64;
                let e_s = self.net.node(s).degree() as f64;
                edge_term += e_rs * (e_rs / (e_r * e_s)).ln();
            }
        }

        Ok(-(num_edges + degree_term + edge_term / 2.0))
    }

    // =========================================================================
    // Proposal and evaluation
    // =========================================================================

    /// Propose a destination block for `node` one level up.
    ///
    /// A uniformly drawn edge of `node` selects a neighbor `w`; with
    /// probability `eps*|T| / (e_w + eps*|T|)` (where `e_w` is the degree of
    /// `w`'s block and `T` the set of candidate blocks of `node`'s type) the
    /// destination is uniform over `T`, which keeps the chain ergodic.
    /// Otherwise it is drawn from `w`'s block's adjacency multiset, i.e.
    /// proportionally to the edge count between that block and each of its
    /// neighbor blocks — the bias that gives the chain its mixing speed.
    pub fn propose_move(&mut self, node: NodeId) -> Result<NodeId> {
        let node_level = self.net.node(node).level();
        let block_level = node_level + 1;
        if block_level >= self.net.num_levels() {
            return Err(SbmError::NoBlocks);
        }
        let type_index = self.net.node(node).type_index();

        let peers = self.net.neighbors_at_level(node, node_level)?;
        let w = *self.sampler.sample(&peers)?;
        let w_block = self
            .net
            .node(w)
            .parent()
            .ok_or(SbmError::InvalidLevel { level: block_level })?;
        let e_w = self.net.node(w_block).degree() as f64;

        let candidates = self.net.nodes_of_type_at_level(type_index, block_level)?;
        let ergodic = self.opts.eps * candidates.len() as f64;
        if self.sampler.draw_unif() < ergodic / (e_w + ergodic) {
            Ok(*self.sampler.sample(candidates)?)
        } else {
            let pool = self.net.neighbors_at_level(w_block, block_level)?;
            Ok(*self.sampler.sample(&pool)?)
        }
    }

    /// Evaluate moving `node` from its block to `target`.
    ///
    /// Only the edge-entropy contributions of the pairs touching the old and
    /// new block change; both are folded over the two blocks' neighbor
    /// histograms with the moved degree shifted and every other block degree
    /// frozen. Zero edge counts contribute nothing, which is what guards the
    /// logarithms.
    pub fn evaluate_move(&self, node: NodeId, target: NodeId) -> Result<Proposal> {
        let block_level = self.net.node(node).level() + 1;
        let old_block = self
            .net
            .node(node)
            .parent()
            .ok_or(SbmError::InvalidLevel { level: block_level })?;
        if old_block == target {
            return Ok(Proposal {
                entropy_delta: 0.0,
                accept_prob: 1.0,
            });
        }

        let moved_degree = self.net.node(node).degree() as f64;
        let old_pre = self.net.node(old_block).degree() as f64;
        let old_post = old_pre - moved_degree;
        let new_pre = self.net.node(target).degree() as f64;
        let new_post = new_pre + moved_degree;

        let node_edges = self.net.edge_counts_to_level(node, block_level)?;
        let old_edges = self.net.edge_counts_to_level(old_block, block_level)?;
        let new_edges = self.net.edge_counts_to_level(target, block_level)?;

        let mut entropy_pre = 0.0;
        let mut entropy_post = 0.0;
        let mut fold = |edge_pre: f64, shift: f64, deg_pre: f64, deg_post: f64, e_t: f64| {
            if edge_pre > 0.0 {
                entropy_pre += edge_pre * (edge_pre / (deg_pre * e_t)).ln();
            }
            let edge_post = edge_pre + shift;
            if edge_post > 0.0 {
                entropy_post += edge_post * (edge_post / (deg_post * e_t)).ln();
            }
        };
        for (&t, &count) in &old_edges {
            let from_node = node_edges.get(&t).copied().unwrap_or(0) as f64;
            let e_t = self.net.node(t).degree() as f64;
            fold(count as f64, -from_node, old_pre, old_post, e_t);
        }
        for (&t, &count) in &new_edges {
            let from_node = node_edges.get(&t).copied().unwrap_or(0) as f64;
            let e_t = self.net.node(t).degree() as f64;
            fold(count as f64, from_node, new_pre, new_post, e_t);
        }
        let entropy_delta = entropy_post - entropy_pre;

        // Hastings ratio of the asymmetric proposal, with pre-move counts on
        // both sides; the shared denominators cancel to leading order.
        let eps = self.opts.eps;
        let mut forward = 0.0;
        let mut reverse = 0.0;
        for (&t, &count) in &node_edges {
            let n_t = count as f64;
            forward += n_t * (old_edges.get(&t).copied().unwrap_or(0) as f64 + eps);
            reverse += n_t * (new_edges.get(&t).copied().unwrap_or(0) as f64 + eps);
        }
        let ratio = if reverse > 0.0 { forward / reverse } else { 1.0 };

        let accept = (self.opts.beta * entropy_delta).exp() * ratio;
        Ok(Proposal {
            entropy_delta,
            accept_prob: accept.min(1.0),
        })
    }

    // =========================================================================
    // MCMC sweep
    // =========================================================================

    /// One Metropolis–Hastings pass over all nodes of `node_level`, in
    /// shuffled order.
    ///
    /// With `variable_num_blocks`, empty blocks are pruned and a fresh empty
    /// block of the current node's type is minted after every step, so the
    /// chain can both shrink and grow the number of blocks.
    pub fn mcmc_sweep(&mut self, node_level: usize, variable_num_blocks: bool) -> Result<SweepResult> {
        let block_level = node_level + 1;
        if node_level >= self.net.num_levels() {
            return Err(SbmError::InvalidLevel { level: node_level });
        }
        if block_level >= self.net.num_levels() {
            return Err(SbmError::NoBlocks);
        }

        let mut order = self.net.node_ids_at_level(node_level)?;
        self.sampler.shuffle(&mut order);

        let mut result = SweepResult::default();
        for node in order {
            // An isolated node has no edge to seed a proposal; its block
            // assignment is frozen.
            if self.net.node(node).degree() == 0 {
                continue;
            }
            let target = self.propose_move(node)?;
            if self.net.node(node).parent() == Some(target) {
                continue;
            }
            let proposal = self.evaluate_move(node, target)?;
            if self.sampler.draw_unif() < proposal.accept_prob {
                self.net.set_parent(node, target);
                result.moved_ids.push(self.net.node(node).id().to_string());
                result.entropy_delta += proposal.entropy_delta;
            }
            if variable_num_blocks {
                self.net.clean_empty_blocks();
                let type_index = self.net.node(node).type_index();
                self.net.add_block(type_index, block_level)?;
            }
        }
        Ok(result)
    }

    // =========================================================================
    // Agglomerative merging
    // =========================================================================

    /// Re-parent all of `source`'s children under `target`, emptying it.
    /// The emptied block is left for [`Network::clean_empty_blocks`].
    pub fn merge_blocks(&mut self, target: NodeId, source: NodeId) {
        self.net.merge_into(target, source);
    }

    /// Score and execute up to `num_merges` block merges at `block_level`.
    ///
    /// An ephemeral meta level (one meta block per block) is stacked on top
    /// so merges can be scored with the same machinery as node moves:
    /// merging block `g` into block `h` is moving `g` under `h`'s meta
    /// block. Candidates come from full enumeration (`greedy`) or from
    /// `n_checks_per_block` proposal draws per block, are consumed
    /// best-first (largest delta), and a block already absorbed by an
    /// earlier merge is lazily skipped. The meta level is popped and empty
    /// blocks pruned before returning.
    pub fn agglomerative_merge(&mut self, block_level: usize, num_merges: usize) -> Result<MergeResult> {
        if num_merges == 0 {
            return Err(SbmError::ZeroMerges);
        }
        if block_level == 0 || block_level + 1 != self.net.num_levels() {
            return Err(SbmError::InvalidLevel { level: block_level });
        }
        for t in 0..self.net.num_types() {
            let count = self.net.nodes_of_type_at_level(t, block_level)?.len();
            if count < 2 {
                return Err(SbmError::InsufficientBlocks {
                    type_name: self.net.type_name(t).to_string(),
                    level: block_level,
                    count,
                });
            }
        }

        // Give every block its own meta parent.
        self.initialize_blocks(None)?;
        let meta_level = block_level + 1;

        struct Candidate {
            source: NodeId,
            target: NodeId,
            delta: f64,
        }
        let mut candidates: Vec<Candidate> = Vec::new();
        for group in self.net.node_ids_at_level(block_level)? {
            let metas: Vec<NodeId> = if self.opts.greedy {
                let type_index = self.net.node(group).type_index();
                self.net
                    .nodes_of_type_at_level(type_index, meta_level)?
                    .to_vec()
            } else {
                if self.net.node(group).degree() == 0 {
                    continue;
                }
                let mut drawn = Vec::with_capacity(self.opts.n_checks_per_block);
                for _ in 0..self.opts.n_checks_per_block {
                    drawn.push(self.propose_move(group)?);
                }
                drawn
            };
            for meta in metas {
                // Each meta block wraps exactly one block for the whole
                // scoring phase; merges only re-parent children below
                // block_level.
                let target = self.net.node(meta).children()[0];
                if target == group {
                    continue;
                }
                let delta = self.evaluate_move(group, meta)?.entropy_delta;
                candidates.push(Candidate {
                    source: group,
                    target,
                    delta,
                });
            }
        }

        let mut queue: BinaryHeap<RankedMerge> = candidates
            .iter()
            .enumerate()
            .map(|(index, c)| RankedMerge {
                delta: c.delta,
                index,
            })
            .collect();

        let mut consumed: FnvHashSet<NodeId> = FnvHashSet::default();
        let mut merges: Vec<(String, String)> = Vec::new();
        let mut entropy_delta = 0.0;
        while merges.len() < num_merges {
            let best = match queue.pop() {
                Some(best) => best,
                None => break,
            };
            let candidate = &candidates[best.index];
            if consumed.contains(&candidate.source) || consumed.contains(&candidate.target) {
                continue;
            }
            consumed.insert(candidate.source);
            merges.push((
                self.net.node(candidate.source).id().to_string(),
                self.net.node(candidate.target).id().to_string(),
            ));
            self.net.merge_into(candidate.target, candidate.source);
            entropy_delta += candidate.delta;
        }
        debug!(
            "merged {} of {} requested block pair(s) at level {}",
            merges.len(),
            num_merges,
            block_level
        );

        // Tear the meta level down and drop the absorbed blocks.
        self.net.delete_block_level()?;
        self.net.clean_empty_blocks();

        let entropy = self.entropy(block_level - 1)?;
        Ok(MergeResult {
            merges,
            entropy_delta,
            entropy,
        })
    }

    // =========================================================================
    // Collapse schedule
    // =========================================================================

    /// Agglomeratively collapse from one block per node down to
    /// `desired_num_blocks`, optionally equilibrating with MCMC sweeps
    /// between merge steps.
    ///
    /// Each iteration merges `max(1, B - floor(B / sigma))` blocks (capped
    /// so B never undershoots the target) and records a [`CollapseStep`].
    /// `InsufficientBlocks` from the merge ends the schedule early with the
    /// steps accumulated so far; every other error propagates.
    pub fn collapse_blocks(
        &mut self,
        node_level: usize,
        num_mcmc_steps: usize,
        desired_num_blocks: usize,
    ) -> Result<Vec<CollapseStep>> {
        if node_level >= self.net.num_levels() {
            return Err(SbmError::InvalidLevel { level: node_level });
        }
        // Restart from one block per node whatever the current hierarchy is.
        while self.net.num_levels() > node_level + 1 {
            self.net.delete_block_level()?;
        }
        self.initialize_blocks(None)?;
        let block_level = node_level + 1;

        let mut steps: Vec<CollapseStep> = Vec::new();
        let mut remaining = self.net.num_nodes_at_level(block_level)?;
        while remaining > desired_num_blocks {
            let shrunk = (remaining as f64 / self.opts.sigma).floor() as usize;
            let mut num_merges = (remaining - shrunk).max(1);
            if remaining - num_merges < desired_num_blocks {
                num_merges = remaining - desired_num_blocks;
            }

            let merged = match self.agglomerative_merge(block_level, num_merges) {
                Ok(merged) => merged,
                Err(SbmError::InsufficientBlocks {
                    type_name, count, ..
                }) => {
                    warn!(
                        "collapse stopped early: type `{}` is down to {} block(s)",
                        type_name, count
                    );
                    break;
                }
                Err(err) => return Err(err),
            };
            if merged.merges.is_empty() {
                warn!("collapse stopped early: no viable merge candidates");
                break;
            }

            let mut entropy_delta = merged.entropy_delta;
            let mut entropy = merged.entropy;
            if num_mcmc_steps > 0 {
                for _ in 0..num_mcmc_steps {
                    entropy_delta += self.mcmc_sweep(node_level, false)?.entropy_delta;
                }
                self.net.clean_empty_blocks();
                entropy = self.entropy(node_level)?;
            }

            remaining = self.net.num_nodes_at_level(block_level)?;
            info!(
                "collapse step: {} block(s) remain, entropy {:.4}",
                remaining, entropy
            );
            steps.push(CollapseStep {
                num_blocks: remaining,
                merges: merged.merges,
                entropy_delta,
                entropy,
                state: self.net.get_state(),
            });
        }
        Ok(steps)
    }
}
