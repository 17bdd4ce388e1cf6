//! Clusterer
//!
//! Files are nodes; candidate pairs whose evidence reaches the threshold
//! `T` are edges. Components of that graph are candidate groups.
//!
//! A component is kept whole when every member pair has evidence of at
//! least `T - slack` (pairs that were never scored count as 0). Otherwise
//! the weakest edge of its maximum spanning forest is removed, and the
//! parts are cut again until every member pair of each part reaches `T`.
//! This breaks chains where A~B and B~C but A and C are unrelated.
//!
//! The spanning forest is built by Kruskal over a fixed edge order, so the
//! cuts follow a single-linkage dendrogram that does not depend on `T`.
//! The slack exemption is decided per component: a component that loses
//! its weak link at a higher `T` may be kept whole where a lower `T` cut it.

use std::cmp::Ordering;
use std::collections::HashMap;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::config::EngineConfig;
use crate::record::MediaRecord;
use crate::similarity::SimilarityScore;

// ============================================================================
// Best Member Policy
// ============================================================================

/// Which member of a group is suggested to keep.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BestMemberPolicy {
	/// Most pixels
	#[default]
	LargestResolution,
	/// Most bytes
	LargestSize,
	/// Latest modification time
	Newest,
}

impl BestMemberPolicy {
	/// Order two records so that the preferred one sorts first.
	///
	/// Ties fall back to lexicographic path order.
	#[must_use]
	pub fn compare(self, a: &MediaRecord, b: &MediaRecord) -> Ordering {
		let preferred = match self {
			Self::LargestResolution => {
				let pixels = |record: &MediaRecord| record.resolution.map_or(0, |r| r.pixels());
				pixels(b).cmp(&pixels(a))
			}
			Self::LargestSize => b.size().cmp(&a.size()),
			Self::Newest => b.identity.modified.cmp(&a.identity.modified),
		};
		preferred.then_with(|| a.path().cmp(b.path()))
	}

	/// Name used in configuration files.
	#[must_use]
	pub const fn as_str(self) -> &'static str {
		match self {
			Self::LargestResolution => "largest_resolution",
			Self::LargestSize => "largest_size",
			Self::Newest => "newest",
		}
	}
}

impl std::fmt::Display for BestMemberPolicy {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.write_str(self.as_str())
	}
}

impl std::str::FromStr for BestMemberPolicy {
	type Err = String;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		match s {
			"largest_resolution" => Ok(Self::LargestResolution),
			"largest_size" => Ok(Self::LargestSize),
			"newest" => Ok(Self::Newest),
			other => Err(format!(
				"unknown policy `{other}` (expected largest_resolution, largest_size or newest)"
			)),
		}
	}
}

// ============================================================================
// Inputs and Outputs
// ============================================================================

/// A scored candidate pair, by index into the record slice.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScoredPair {
	/// First record index
	pub a: usize,
	/// Second record index
	pub b: usize,
	/// Score of `a` against `b`
	pub score: SimilarityScore,
}

/// Pairwise score justifying group membership.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PairScore {
	/// First file
	pub a: PathBuf,
	/// Second file
	pub b: PathBuf,
	/// Similarity in [0, 1]
	pub score: f64,
	/// Coverage of the winning alignment
	pub confidence: f64,
	/// Alignment shift of `a` relative to `b`
	pub offset: i32,
}

/// Files judged to share source content.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DuplicateGroup {
	/// Suggested member to keep first, the rest in path order
	pub members: Vec<MediaRecord>,
	/// Scores among the members
	pub pair_scores: Vec<PairScore>,
	/// Lowest pairwise score
	pub min_score: f64,
	/// Mean pairwise score
	pub mean_score: f64,
}

impl DuplicateGroup {
	/// The suggested member to keep.
	#[must_use]
	pub fn best(&self) -> Option<&MediaRecord> {
		self.members.first()
	}

	/// Number of members.
	#[must_use]
	pub fn len(&self) -> usize {
		self.members.len()
	}

	/// Whether the group has no members (never true for emitted groups).
	#[must_use]
	pub fn is_empty(&self) -> bool {
		self.members.is_empty()
	}
}

/// Clustering parameters.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ClusterConfig {
	/// Evidence needed for an edge
	pub threshold: f64,
	/// How far below `threshold` a member pair may fall inside an uncut component
	pub slack: f64,
	/// Confidence below which a score is discounted
	pub min_confidence: f64,
	/// Best member selection
	pub policy: BestMemberPolicy,
}

impl ClusterConfig {
	/// Clustering parameters of `config`.
	#[must_use]
	pub fn from_config(config: &EngineConfig) -> Self {
		Self {
			threshold: config.similarity_threshold,
			slack: config.cluster_slack,
			min_confidence: config.min_confidence,
			policy: config.best_member_policy,
		}
	}
}

// ============================================================================
// Union-Find
// ============================================================================

/// Disjoint sets with path compression and union by rank.
#[derive(Debug, Clone)]
pub struct UnionFind {
	parent: Vec<usize>,
	rank: Vec<u8>,
}

impl UnionFind {
	/// `n` singleton sets.
	#[must_use]
	pub fn new(n: usize) -> Self {
		Self {
			parent: (0..n).collect(),
			rank: vec![0; n],
		}
	}

	/// Representative of the set containing `i`.
	pub fn find(&mut self, i: usize) -> usize {
		let mut root = i;
		while self.parent[root] != root {
			root = self.parent[root];
		}
		let mut node = i;
		while self.parent[node] != root {
			let next = self.parent[node];
			self.parent[node] = root;
			node = next;
		}
		root
	}

	/// Merge the sets of `i` and `j`. Returns false if already merged.
	pub fn union(&mut self, i: usize, j: usize) -> bool {
		let (pi, pj) = (self.find(i), self.find(j));
		if pi == pj {
			return false;
		}
		match self.rank[pi].cmp(&self.rank[pj]) {
			Ordering::Less => self.parent[pi] = pj,
			Ordering::Greater => self.parent[pj] = pi,
			Ordering::Equal => {
				self.parent[pj] = pi;
				self.rank[pi] = self.rank[pi].saturating_add(1);
			}
		}
		true
	}
}

// ============================================================================
// Clustering
// ============================================================================

#[derive(Debug, Clone, Copy)]
struct Edge {
	a: usize,
	b: usize,
	evidence: f64,
}

/// Strongest first; equal evidence in index order.
fn edge_order(x: &Edge, y: &Edge) -> Ordering {
	y.evidence
		.total_cmp(&x.evidence)
		.then_with(|| (x.a, x.b).cmp(&(y.a, y.b)))
}

struct Graph {
	/// (min, max) index → (evidence, score oriented min → max)
	pairs: HashMap<(usize, usize), (f64, SimilarityScore)>,
}

impl Graph {
	fn new(pairs: &[ScoredPair], node_count: usize, min_confidence: f64) -> Self {
		let mut map: HashMap<(usize, usize), (f64, SimilarityScore)> = HashMap::new();
		for pair in pairs {
			if pair.a == pair.b || pair.a >= node_count || pair.b >= node_count {
				continue;
			}
			let (key, score) = if pair.a < pair.b {
				((pair.a, pair.b), pair.score)
			} else {
				let mut flipped = pair.score;
				flipped.offset = -flipped.offset;
				((pair.b, pair.a), flipped)
			};
			let evidence = score.evidence(min_confidence);
			let keep = map.get(&key).map_or(true, |(existing, _)| evidence > *existing);
			if keep {
				let _ = map.insert(key, (evidence, score));
			}
		}
		Self { pairs: map }
	}

	fn evidence(&self, a: usize, b: usize) -> f64 {
		let key = if a < b { (a, b) } else { (b, a) };
		self.pairs.get(&key).map_or(0.0, |(evidence, _)| *evidence)
	}

	fn score(&self, a: usize, b: usize) -> Option<&SimilarityScore> {
		self.pairs.get(&(a, b)).map(|(_, score)| score)
	}

	/// Whether every member pair reaches `floor`.
	fn is_tight(&self, nodes: &[usize], floor: f64) -> bool {
		nodes.iter().enumerate().all(|(i, &a)| {
			nodes[i + 1..]
				.iter()
				.all(|&b| self.evidence(a, b) >= floor)
		})
	}
}

/// Partition a component into node sets; `edges` must be in [`edge_order`].
///
/// A component whose members all reach `threshold - slack` is kept whole.
/// Otherwise it is cut along its weakest spanning edges until every part
/// meets `threshold` pairwise.
fn split_component(
	graph: &Graph,
	nodes: Vec<usize>,
	edges: Vec<Edge>,
	config: &ClusterConfig,
	accepted: &mut Vec<Vec<usize>>,
) {
	if graph.is_tight(&nodes, config.threshold - config.slack) {
		accepted.push(nodes);
		return;
	}

	let mut pending = vec![(nodes, edges)];
	while let Some((nodes, mut edges)) = pending.pop() {
		if nodes.len() < 2 {
			continue;
		}
		if graph.is_tight(&nodes, config.threshold) {
			accepted.push(nodes);
			continue;
		}
		// Weakest spanning edge is the last one Kruskal accepted.
		let _ = edges.pop();

		let index: HashMap<usize, usize> = nodes.iter().enumerate().map(|(i, &n)| (n, i)).collect();
		let mut sets = UnionFind::new(nodes.len());
		for edge in &edges {
			let _ = sets.union(index[&edge.a], index[&edge.b]);
		}

		let mut parts: HashMap<usize, (Vec<usize>, Vec<Edge>)> = HashMap::new();
		for &node in &nodes {
			let root = sets.find(index[&node]);
			parts.entry(root).or_default().0.push(node);
		}
		for edge in edges {
			let root = sets.find(index[&edge.a]);
			parts.entry(root).or_default().1.push(edge);
		}

		let mut parts: Vec<(Vec<usize>, Vec<Edge>)> = parts.into_values().collect();
		parts.sort_by_key(|(nodes, _)| nodes.first().copied());
		pending.extend(parts);
	}
}

/// Partition files into duplicate groups.
///
/// `records` are the nodes; `pairs` index into it. Each record ends up in
/// at most one group, and groups of one are never returned. Groups come
/// back ranked by mean score, highest first.
#[must_use]
pub fn cluster(
	records: &[MediaRecord],
	pairs: &[ScoredPair],
	config: &ClusterConfig,
) -> Vec<DuplicateGroup> {
	let graph = Graph::new(pairs, records.len(), config.min_confidence);

	let mut edges: Vec<Edge> = graph
		.pairs
		.iter()
		.filter(|(_, (evidence, _))| *evidence >= config.threshold)
		.map(|(&(a, b), &(evidence, _))| Edge { a, b, evidence })
		.collect();
	edges.sort_by(edge_order);

	// Kruskal: maximum spanning forest over the threshold graph
	let mut forest = UnionFind::new(records.len());
	let spanning: Vec<Edge> = edges
		.into_iter()
		.filter(|edge| forest.union(edge.a, edge.b))
		.collect();

	let mut components: HashMap<usize, (Vec<usize>, Vec<Edge>)> = HashMap::new();
	for edge in spanning {
		let root = forest.find(edge.a);
		components.entry(root).or_default().1.push(edge);
	}
	for node in 0..records.len() {
		let root = forest.find(node);
		if let Some(component) = components.get_mut(&root) {
			component.0.push(node);
		}
	}

	let mut accepted = Vec::new();
	let mut components: Vec<(Vec<usize>, Vec<Edge>)> = components.into_values().collect();
	components.sort_by_key(|(nodes, _)| nodes.first().copied());
	for (nodes, edges) in components {
		split_component(&graph, nodes, edges, config, &mut accepted);
	}

	let mut groups: Vec<DuplicateGroup> = accepted
		.into_iter()
		.map(|nodes| build_group(records, &graph, nodes, config.policy))
		.collect();
	groups.sort_by(|x, y| {
		y.mean_score
			.total_cmp(&x.mean_score)
			.then_with(|| x.members[0].path().cmp(y.members[0].path()))
	});
	groups
}

fn build_group(
	records: &[MediaRecord],
	graph: &Graph,
	mut nodes: Vec<usize>,
	policy: BestMemberPolicy,
) -> DuplicateGroup {
	nodes.sort_by(|&a, &b| records[a].path().cmp(records[b].path()));
	if let Some(best) = (0..nodes.len())
		.min_by(|&i, &j| policy.compare(&records[nodes[i]], &records[nodes[j]]))
	{
		let best = nodes.remove(best);
		nodes.insert(0, best);
	}

	let mut pair_scores = Vec::new();
	for (i, &a) in nodes.iter().enumerate() {
		for &b in &nodes[i + 1..] {
			let (low, high) = if a < b { (a, b) } else { (b, a) };
			if let Some(score) = graph.score(low, high) {
				let offset = if low == a { score.offset } else { -score.offset };
				pair_scores.push(PairScore {
					a: records[a].path().to_path_buf(),
					b: records[b].path().to_path_buf(),
					score: score.score,
					confidence: score.confidence,
					offset,
				});
			}
		}
	}

	let min_score = pair_scores
		.iter()
		.map(|pair| pair.score)
		.fold(f64::INFINITY, f64::min);
	let mean_score = if pair_scores.is_empty() {
		0.0
	} else {
		pair_scores.iter().map(|pair| pair.score).sum::<f64>() / pair_scores.len() as f64
	};

	DuplicateGroup {
		members: nodes.into_iter().map(|node| records[node].clone()).collect(),
		min_score: if min_score.is_finite() { min_score } else { 0.0 },
		mean_score,
		pair_scores,
	}
}
