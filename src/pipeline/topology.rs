use crate::pipeline::error::{PipelineError, PipelineResult};
use crate::pipeline::id::NodeId;
use crate::pipeline::node::Node;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

/// Connection analysis of a set of sibling nodes.
#[derive(Debug, Clone, Default)]
pub struct TopologyPlan {
    /// Node indices in topological order (producers first).
    pub order: Vec<usize>,

    /// Sibling-to-sibling edges (from_idx, to_idx), one per connected socket pair
    pub edges: Vec<(usize, usize)>,

    /// Nodes fed by no sibling: no inputs at all, or an input fed from outside
    pub sources: Vec<usize>,

    /// Nodes without output sockets
    pub sinks: Vec<usize>,

    /// Sinks that no source reaches
    pub unreachable_sinks: Vec<usize>,

    pub stats: PlanStats,
}

/// Statistics about an analysis
#[derive(Debug, Clone, Default)]
pub struct PlanStats {
    pub total_nodes: usize,
    pub edges: usize,
    pub source_nodes: usize,
    pub sink_nodes: usize,
    pub analysis_time_us: u64,
}

impl TopologyPlan {
    /// Analyze the connections between `nodes`.
    ///
    /// Edges are found by following each node's outputs to the inputs they
    /// feed; an input belongs to the sibling whose id its socket id carries.
    pub fn analyze(nodes: &[Arc<dyn Node>]) -> Self {
        let start_time = std::time::Instant::now();
        let n = nodes.len();
        let index: HashMap<NodeId, usize> =
            nodes.iter().enumerate().map(|(i, node)| (node.id(), i)).collect();

        let edges = Self::collect_edges(nodes, &index);
        let (fwd_adj, in_degree) = Self::build_adjacency(n, &edges);
        let sources = Self::identify_sources(nodes, &index);
        let sinks: Vec<usize> = (0..n)
            .filter(|&i| nodes[i].output_names().is_empty())
            .collect();

        let reachable = Self::forward_reachability(&sources, &fwd_adj, n);
        let unreachable_sinks: Vec<usize> = sinks
            .iter()
            .copied()
            .filter(|&sink| !reachable[sink])
            .collect();
        for &sink in &unreachable_sinks {
            tracing::warn!("Sink '{}' is not reachable from any source", nodes[sink].name());
        }

        let order = Self::topological_sort(&fwd_adj, in_degree);

        let stats = PlanStats {
            total_nodes: n,
            edges: edges.len(),
            source_nodes: sources.len(),
            sink_nodes: sinks.len(),
            analysis_time_us: start_time.elapsed().as_micros() as u64,
        };
        tracing::debug!(
            "Topology: {} nodes, {} edges, {} sources, {} sinks ({}us)",
            stats.total_nodes,
            stats.edges,
            stats.source_nodes,
            stats.sink_nodes,
            stats.analysis_time_us
        );

        TopologyPlan {
            order,
            edges,
            sources,
            sinks,
            unreachable_sinks,
            stats,
        }
    }

    /// Whether some nodes could not be ordered.
    pub fn has_cycle(&self) -> bool {
        self.order.len() < self.stats.total_nodes
    }

    pub fn ensure_acyclic(&self) -> PipelineResult<()> {
        if self.has_cycle() {
            Err(PipelineError::CycleDetected)
        } else {
            Ok(())
        }
    }

    /// Consumers before producers. Nodes caught in a cycle come last.
    pub fn start_order(&self) -> Vec<usize> {
        let mut order: Vec<usize> = self.order.iter().rev().copied().collect();
        let mut placed = vec![false; self.stats.total_nodes];
        for &i in &order {
            placed[i] = true;
        }
        order.extend((0..self.stats.total_nodes).filter(|&i| !placed[i]));
        order
    }

    fn collect_edges(nodes: &[Arc<dyn Node>], index: &HashMap<NodeId, usize>) -> Vec<(usize, usize)> {
        let mut edges = Vec::new();
        for (from, node) in nodes.iter().enumerate() {
            for name in node.output_names() {
                let Some(output) = node.output(&name) else {
                    continue;
                };
                for input in output.connected_inputs() {
                    if let Some(&to) = index.get(&input.id().node()) {
                        edges.push((from, to));
                    }
                }
            }
        }
        edges
    }

    /// Build forward adjacency and in-degrees
    fn build_adjacency(n: usize, edges: &[(usize, usize)]) -> (Vec<Vec<usize>>, Vec<usize>) {
        let mut fwd_adj = vec![Vec::new(); n];
        let mut in_degree = vec![0; n];
        for &(from, to) in edges {
            fwd_adj[from].push(to);
            in_degree[to] += 1;
        }
        (fwd_adj, in_degree)
    }

    fn identify_sources(nodes: &[Arc<dyn Node>], index: &HashMap<NodeId, usize>) -> Vec<usize> {
        let mut sources = Vec::new();
        for (idx, node) in nodes.iter().enumerate() {
            let inputs = node.input_names();
            let fed_from_outside = inputs.iter().any(|name| {
                node.input(name)
                    .and_then(|input| input.connected_output())
                    .map(|output| !index.contains_key(&output.id().node()))
                    .unwrap_or(false)
            });
            if inputs.is_empty() || fed_from_outside {
                sources.push(idx);
            }
        }
        sources
    }

    /// Perform forward reachability analysis from sources using DFS
    fn forward_reachability(sources: &[usize], fwd_adj: &[Vec<usize>], n: usize) -> Vec<bool> {
        let mut reachable = vec![false; n];
        let mut stack = Vec::new();

        for &src in sources {
            reachable[src] = true;
            stack.push(src);
        }

        while let Some(node) = stack.pop() {
            for &neighbor in &fwd_adj[node] {
                if !reachable[neighbor] {
                    reachable[neighbor] = true;
                    stack.push(neighbor);
                }
            }
        }

        reachable
    }

    /// Kahn's algorithm
    fn topological_sort(fwd_adj: &[Vec<usize>], mut in_degree: Vec<usize>) -> Vec<usize> {
        let mut queue: VecDeque<usize> = (0..fwd_adj.len()).filter(|&i| in_degree[i] == 0).collect();
        let mut result = Vec::with_capacity(fwd_adj.len());

        while let Some(node) = queue.pop_front() {
            result.push(node);
            for &neighbor in &fwd_adj[node] {
                in_degree[neighbor] -= 1;
                if in_degree[neighbor] == 0 {
                    queue.push_back(neighbor);
                }
            }
        }

        result
    }
}
