//! Operation: display the dependency tree of an environment.

use corral_core::environment::EnvironmentState;
use corral_core::spec::MatchSpec;
use corral_solver::graph::SolutionGraph;
use corral_util::errors::CorralError;

/// Options for `corral tree`.
#[derive(Debug, Clone, Default)]
pub struct TreeOptions {
    /// Maximum tree depth to display.
    pub depth: Option<usize>,
    /// Show the path from a requested package to this one.
    pub why: Option<String>,
    /// Show dependents instead of dependencies.
    pub inverted: bool,
    /// Root the tree (or inverted tree) at this package.
    pub package: Option<String>,
}

/// Render the dependency tree of the installed packages.
///
/// Roots are the packages in the request history; when none of those are
/// installed, every package nothing depends on.
pub fn tree(state: &EnvironmentState, opts: &TreeOptions) -> miette::Result<String> {
    if state.packages.is_empty() {
        return Ok("Environment is empty.\n".to_string());
    }

    let roots: Vec<String> = match &opts.package {
        Some(name) => vec![name.to_lowercase()],
        None => state.requested_specs()?.into_iter().map(|s: MatchSpec| s.name).collect(),
    };
    let graph = SolutionGraph::new(&state.packages, &roots);

    if let Some(target) = &opts.why {
        let target = target.to_lowercase();
        let Some(path) = graph.find_path(&target) else {
            return Ok(format!("Package '{target}' is not reachable from the requested packages.\n"));
        };
        let mut out = format!("Path to {target}:\n");
        for (i, record) in path.iter().enumerate() {
            out.push_str(&format!("{}{} {} {}\n", "  ".repeat(i), record.name, record.version, record.build));
        }
        return Ok(out);
    }

    if let Some(name) = &opts.package {
        if graph.get(name.to_lowercase().as_str()).is_none() {
            return Err(CorralError::Generic {
                message: format!("Package '{name}' is not installed"),
            }
            .into());
        }
    }

    if opts.inverted {
        return Ok(match &opts.package {
            Some(name) => graph.print_inverted_tree(&name.to_lowercase()),
            None => graph.print_full_inverted_tree(),
        });
    }
    Ok(graph.print_tree(opts.depth))
}
