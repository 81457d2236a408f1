//! Dependency graph over a set of chosen or installed records.

use std::collections::{HashMap, HashSet};

use corral_core::record::PackageRecord;
use petgraph::algo::toposort;
use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::visit::EdgeRef;
use petgraph::Direction;

/// Records linked by their dependencies: an edge points from a package to
/// one of its dependencies.
pub struct SolutionGraph<'a> {
    graph: DiGraph<&'a PackageRecord, ()>,
    index: HashMap<&'a str, NodeIndex>,
    roots: Vec<NodeIndex>,
}

impl<'a> SolutionGraph<'a> {
    /// Build a graph. Roots are the `requested` names present in the graph,
    /// or every package nothing depends on when none are.
    pub fn new(records: impl IntoIterator<Item = &'a PackageRecord>, requested: &[String]) -> Self {
        let mut records: Vec<&'a PackageRecord> = records.into_iter().collect();
        records.sort_by(|a, b| a.name.cmp(&b.name));

        let mut graph = DiGraph::new();
        let mut index = HashMap::new();
        for record in records {
            if !index.contains_key(record.name.as_str()) {
                index.insert(record.name.as_str(), graph.add_node(record));
            }
        }
        let nodes: Vec<NodeIndex> = graph.node_indices().collect();
        for from in nodes {
            let record = graph[from];
            for dep in record.dependency_names() {
                if let Some(&to) = index.get(dep) {
                    if to != from && !graph.edges(from).any(|e| e.target() == to) {
                        graph.add_edge(from, to, ());
                    }
                }
            }
        }

        let mut roots: Vec<NodeIndex> = requested
            .iter()
            .filter_map(|name| index.get(name.as_str()).copied())
            .collect();
        roots.dedup();
        if roots.is_empty() {
            roots = graph
                .node_indices()
                .filter(|&n| graph.edges_directed(n, Direction::Incoming).next().is_none())
                .collect();
        }
        Self { graph, index, roots }
    }

    pub fn len(&self) -> usize {
        self.graph.node_count()
    }

    pub fn is_empty(&self) -> bool {
        self.graph.node_count() == 0
    }

    pub fn get(&self, name: &str) -> Option<&'a PackageRecord> {
        self.index.get(name).map(|&idx| self.graph[idx])
    }

    /// Direct dependencies, sorted by name.
    fn dependencies_of(&self, idx: NodeIndex) -> Vec<NodeIndex> {
        self.neighbors(idx, Direction::Outgoing)
    }

    /// Direct dependents, sorted by name.
    fn dependents_of(&self, idx: NodeIndex) -> Vec<NodeIndex> {
        self.neighbors(idx, Direction::Incoming)
    }

    fn neighbors(&self, idx: NodeIndex, direction: Direction) -> Vec<NodeIndex> {
        let mut out: Vec<NodeIndex> = self.graph.neighbors_directed(idx, direction).collect();
        out.sort_by(|a, b| self.graph[*a].name.cmp(&self.graph[*b].name));
        out
    }

    /// Names of the packages that directly depend on `name`.
    pub fn dependents(&self, name: &str) -> Vec<&'a str> {
        let Some(&idx) = self.index.get(name) else {
            return Vec::new();
        };
        self.dependents_of(idx)
            .into_iter()
            .map(|n| self.graph[n].name.as_str())
            .collect()
    }

    /// Records with dependencies before their dependents. Falls back to name
    /// order when the graph has a cycle.
    pub fn dependency_order(&self) -> Vec<&'a PackageRecord> {
        match toposort(&self.graph, None) {
            Ok(order) => order.into_iter().rev().map(|idx| self.graph[idx]).collect(),
            Err(cycle) => {
                tracing::debug!(
                    package = %self.graph[cycle.node_id()].name,
                    "dependency cycle; falling back to name order"
                );
                self.graph.node_indices().map(|idx| self.graph[idx]).collect()
            }
        }
    }

    /// Print the dependency tree from the roots.
    pub fn print_tree(&self, max_depth: Option<usize>) -> String {
        let mut output = String::new();
        for &root in &self.roots {
            output.push_str(&format!("{}\n", node_label(self.graph[root])));
            let mut visited = HashSet::new();
            visited.insert(root);
            let deps = self.dependencies_of(root);
            let count = deps.len();
            for (i, child) in deps.into_iter().enumerate() {
                self.print_subtree(&mut output, child, "", i + 1 == count, 1, max_depth, &mut visited);
            }
        }
        output
    }

    #[allow(clippy::too_many_arguments)]
    fn print_subtree(
        &self,
        output: &mut String,
        idx: NodeIndex,
        prefix: &str,
        is_last: bool,
        depth: usize,
        max_depth: Option<usize>,
        visited: &mut HashSet<NodeIndex>,
    ) {
        let connector = if is_last { "└── " } else { "├── " };
        output.push_str(&format!("{prefix}{connector}{}\n", node_label(self.graph[idx])));

        if max_depth.is_some_and(|max| depth >= max) {
            return;
        }
        if !visited.insert(idx) {
            return;
        }

        let child_prefix = format!("{prefix}{}", if is_last { "    " } else { "│   " });
        let deps = self.dependencies_of(idx);
        let count = deps.len();
        for (i, child) in deps.into_iter().enumerate() {
            self.print_subtree(
                output,
                child,
                &child_prefix,
                i + 1 == count,
                depth + 1,
                max_depth,
                visited,
            );
        }

        visited.remove(&idx);
    }

    /// The chain of packages from a root to `name`, if one exists.
    pub fn find_path(&self, name: &str) -> Option<Vec<&'a PackageRecord>> {
        let &target = self.index.get(name)?;
        for &root in &self.roots {
            let mut path = Vec::new();
            let mut visited = HashSet::new();
            if self.dfs_path(root, target, &mut path, &mut visited) {
                return Some(path.into_iter().map(|idx| self.graph[idx]).collect());
            }
        }
        None
    }

    fn dfs_path(
        &self,
        current: NodeIndex,
        target: NodeIndex,
        path: &mut Vec<NodeIndex>,
        visited: &mut HashSet<NodeIndex>,
    ) -> bool {
        path.push(current);
        if current == target {
            return true;
        }
        if !visited.insert(current) {
            path.pop();
            return false;
        }
        for child in self.dependencies_of(current) {
            if self.dfs_path(child, target, path, visited) {
                return true;
            }
        }
        path.pop();
        false
    }

    /// Print what depends on `name`, recursively.
    pub fn print_inverted_tree(&self, name: &str) -> String {
        let mut output = String::new();
        let Some(&idx) = self.index.get(name) else {
            return output;
        };
        output.push_str(&format!("{}\n", node_label(self.graph[idx])));

        let mut visited = HashSet::new();
        visited.insert(idx);
        let dependents = self.dependents_of(idx);
        let count = dependents.len();
        for (i, dep) in dependents.into_iter().enumerate() {
            self.print_inverted_subtree(&mut output, dep, "", i + 1 == count, &mut visited);
        }
        output
    }

    fn print_inverted_subtree(
        &self,
        output: &mut String,
        idx: NodeIndex,
        prefix: &str,
        is_last: bool,
        visited: &mut HashSet<NodeIndex>,
    ) {
        let connector = if is_last { "└── " } else { "├── " };
        output.push_str(&format!("{prefix}{connector}{}\n", node_label(self.graph[idx])));

        if !visited.insert(idx) {
            return;
        }

        let child_prefix = format!("{prefix}{}", if is_last { "    " } else { "│   " });
        let dependents = self.dependents_of(idx);
        let count = dependents.len();
        for (i, dep) in dependents.into_iter().enumerate() {
            self.print_inverted_subtree(output, dep, &child_prefix, i + 1 == count, visited);
        }

        visited.remove(&idx);
    }
}

impl SolutionGraph<'_> {
    /// Every package that something depends on, followed by its direct
    /// dependents.
    pub fn print_full_inverted_tree(&self) -> String {
        let mut output = String::new();
        for idx in self.graph.node_indices() {
            let dependents = self.dependents_of(idx);
            if dependents.is_empty() {
                continue;
            }
            output.push_str(&format!("{}\n", node_label(self.graph[idx])));
            let count = dependents.len();
            for (i, dep) in dependents.into_iter().enumerate() {
                let connector = if i + 1 == count { "└── " } else { "├── " };
                output.push_str(&format!("{connector}{}\n", node_label(self.graph[dep])));
            }
            output.push('\n');
        }
        output
    }
}

fn node_label(record: &PackageRecord) -> String {
    format!("{} {} {}", record.name, record.version, record.build)
}

#[cfg(test)]
mod tests {
    use super::*;
    use corral_core::spec::MatchSpec;
    use corral_core::version::Version;

    fn rec(name: &str, depends: &[&str]) -> PackageRecord {
        PackageRecord::new(name, Version::parse("1.0").unwrap(), "0")
            .with_depends(depends.iter().map(|d| MatchSpec::parse(d).unwrap()).collect())
    }

    fn sample() -> Vec<PackageRecord> {
        vec![
            rec("app", &["lib", "util"]),
            rec("lib", &["base"]),
            rec("util", &["base"]),
            rec("base", &[]),
        ]
    }

    #[test]
    fn tree_printing() {
        let records = sample();
        let graph = SolutionGraph::new(&records, &["app".to_string()]);
        let tree = graph.print_tree(None);
        let expected = "\
app 1.0 0
├── lib 1.0 0
│   └── base 1.0 0
└── util 1.0 0
    └── base 1.0 0
";
        assert_eq!(tree, expected);
        assert_eq!(graph.print_tree(Some(1)).lines().count(), 3);
    }

    #[test]
    fn roots_default_to_top_level_packages() {
        let records = sample();
        let graph = SolutionGraph::new(&records, &[]);
        assert!(graph.print_tree(None).starts_with("app 1.0 0\n"));
    }

    #[test]
    fn find_path_exists() {
        let records = sample();
        let graph = SolutionGraph::new(&records, &["app".to_string()]);
        let path: Vec<&str> = graph
            .find_path("base")
            .unwrap()
            .iter()
            .map(|r| r.name.as_str())
            .collect();
        assert_eq!(path, vec!["app", "lib", "base"]);
        assert!(graph.find_path("ghost").is_none());
    }

    #[test]
    fn inverted_tree() {
        let records = sample();
        let graph = SolutionGraph::new(&records, &[]);
        let tree = graph.print_inverted_tree("base");
        assert!(tree.starts_with("base 1.0 0\n"));
        assert!(tree.contains("├── lib 1.0 0\n│   └── app 1.0 0\n"));
        assert!(tree.contains("└── util 1.0 0\n    └── app 1.0 0\n"));
        assert_eq!(graph.dependents("base"), vec!["lib", "util"]);

        let full = graph.print_full_inverted_tree();
        assert!(full.starts_with("base 1.0 0\n├── lib 1.0 0\n└── util 1.0 0\n\n"));
        assert!(!full.contains("app 1.0 0\n├"));
    }

    #[test]
    fn dependency_order_puts_dependencies_first() {
        let records = sample();
        let graph = SolutionGraph::new(&records, &[]);
        let order: Vec<&str> = graph.dependency_order().iter().map(|r| r.name.as_str()).collect();
        let pos = |n: &str| order.iter().position(|x| *x == n).unwrap();
        assert!(pos("base") < pos("lib"));
        assert!(pos("lib") < pos("app"));
        assert!(pos("util") < pos("app"));
    }

    #[test]
    fn cycles_fall_back_to_name_order() {
        let records = vec![rec("b", &["a"]), rec("a", &["b"])];
        let graph = SolutionGraph::new(&records, &[]);
        let order: Vec<&str> = graph.dependency_order().iter().map(|r| r.name.as_str()).collect();
        assert_eq!(order, vec!["a", "b"]);
        assert_eq!(graph.len(), 2);
    }
}
