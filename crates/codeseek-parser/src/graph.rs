use std::collections::HashMap;

use codeseek_core::CodeChunk;
use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::Direction;

/// Name → chunk lookup used to resolve call names to in-repository definitions.
///
/// Names are not scoped: when two chunks share a short name, the one added
/// later wins.
///
/// # Examples
///
/// ```
/// use std::path::Path;
/// use codeseek_parser::graph::CallRegistry;
/// use codeseek_parser::parser::parse_source;
///
/// let chunks = parse_source(
///     Path::new("mod.py"),
///     "def foo():\n    bar()\n    print('x')\n\n\ndef bar():\n    pass\n",
/// )
/// .unwrap();
/// let registry = CallRegistry::build(&chunks);
/// let resolved = registry.resolve(&chunks[0]);
/// assert_eq!(resolved.internal[0].name(), "bar");
/// assert_eq!(resolved.external, vec!["print"]);
/// ```
#[derive(Debug, Default)]
pub struct CallRegistry<'a> {
    by_name: HashMap<&'a str, &'a CodeChunk>,
}

/// A chunk's calls split into in-repository targets and unresolved names.
#[derive(Debug, Default)]
pub struct Resolution<'a> {
    /// Chunks the calls resolved to, in call-name order.
    pub internal: Vec<&'a CodeChunk>,
    /// Call names with no chunk in the registry (builtins, imports, typos).
    pub external: Vec<&'a str>,
}

impl<'a> CallRegistry<'a> {
    /// Register every chunk under its name.
    pub fn build<I>(chunks: I) -> Self
    where
        I: IntoIterator<Item = &'a CodeChunk>,
    {
        let mut by_name = HashMap::new();
        for chunk in chunks {
            by_name.insert(chunk.name(), chunk);
        }
        Self { by_name }
    }

    pub fn get(&self, name: &str) -> Option<&'a CodeChunk> {
        self.by_name.get(name).copied()
    }

    /// Partition `chunk`'s calls into resolved chunks and external names.
    pub fn resolve<'s>(&'s self, chunk: &'s CodeChunk) -> Resolution<'s> {
        let mut resolution = Resolution::default();
        for name in chunk.calls() {
            match self.get(name) {
                Some(target) => resolution.internal.push(target),
                None => resolution.external.push(name.as_str()),
            }
        }
        resolution
    }

    pub fn len(&self) -> usize {
        self.by_name.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_name.is_empty()
    }
}

/// Directed call graph over a slice of chunks.
///
/// Node `i` is the `i`-th chunk passed to [`CallGraph::build`]. An edge
/// `caller → callee` exists for every call that resolves through the same
/// last-write-wins rule as [`CallRegistry`]. Self-calls are dropped.
///
/// # Examples
///
/// ```
/// use std::path::Path;
/// use codeseek_parser::graph::CallGraph;
/// use codeseek_parser::parser::parse_source;
///
/// let chunks = parse_source(
///     Path::new("mod.py"),
///     "def foo():\n    bar()\n\n\ndef bar():\n    pass\n",
/// )
/// .unwrap();
/// let graph = CallGraph::build(&chunks);
/// assert_eq!(graph.callees(0), vec![1]);
/// assert_eq!(graph.callers(1), vec![0]);
/// ```
#[derive(Debug, Clone, Default)]
pub struct CallGraph {
    graph: DiGraph<(), ()>,
}

impl CallGraph {
    pub fn build<'a, I>(chunks: I) -> Self
    where
        I: IntoIterator<Item = &'a CodeChunk>,
    {
        let chunks: Vec<&CodeChunk> = chunks.into_iter().collect();
        let mut graph = DiGraph::with_capacity(chunks.len(), 0);
        let mut name_to_index: HashMap<&str, NodeIndex> = HashMap::new();

        for chunk in &chunks {
            let idx = graph.add_node(());
            name_to_index.insert(chunk.name(), idx);
        }

        for (i, chunk) in chunks.iter().enumerate() {
            let from = NodeIndex::new(i);
            for name in chunk.calls() {
                let Some(&to) = name_to_index.get(name.as_str()) else {
                    continue;
                };
                if to != from {
                    graph.add_edge(from, to, ());
                }
            }
        }

        Self { graph }
    }

    /// Positions of the chunks that chunk `i` calls, ascending.
    pub fn callees(&self, i: usize) -> Vec<usize> {
        self.neighbors(i, Direction::Outgoing)
    }

    /// Positions of the chunks that call chunk `i`, ascending.
    pub fn callers(&self, i: usize) -> Vec<usize> {
        self.neighbors(i, Direction::Incoming)
    }

    pub fn node_count(&self) -> usize {
        self.graph.node_count()
    }

    pub fn edge_count(&self) -> usize {
        self.graph.edge_count()
    }

    fn neighbors(&self, i: usize, direction: Direction) -> Vec<usize> {
        if i >= self.graph.node_count() {
            return Vec::new();
        }
        let mut out: Vec<usize> = self
            .graph
            .neighbors_directed(NodeIndex::new(i), direction)
            .map(|n| n.index())
            .collect();
        out.sort_unstable();
        out.dedup();
        out
    }
}
