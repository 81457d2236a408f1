//! Operations: query the repository index (`search`, `depends`, `whoneeds`).

use corral_core::record::PackageRecord;
use corral_core::spec::MatchSpec;
use corral_solver::{RepositoryIndex, SolverRequest};
use corral_util::errors::CorralError;
use serde::Serialize;

use crate::context::SolveContext;

/// Every record matching `spec`, grouped by name, oldest version first.
pub fn search(index: &RepositoryIndex, spec: &str) -> miette::Result<Vec<PackageRecord>> {
    let parsed = MatchSpec::parse(spec)?;
    let mut found: Vec<PackageRecord> = index.search(&parsed).into_iter().cloned().collect();
    if found.is_empty() {
        return Err(CorralError::PackagesNotFound {
            specs: vec![spec.to_string()],
        }
        .into());
    }
    // Buckets are preference-ordered; listings read better ascending.
    found.sort_by(|a, b| {
        a.name
            .cmp(&b.name)
            .then_with(|| a.version.cmp(&b.version))
            .then_with(|| a.build_number.cmp(&b.build_number))
            .then_with(|| a.build.cmp(&b.build))
            .then_with(|| a.channel.cmp(&b.channel))
    });
    Ok(found)
}

/// Dependencies of the preferred record matching a spec.
#[derive(Debug, Clone, Serialize)]
pub struct DependsReport {
    pub record: PackageRecord,
    /// Direct dependency specs as published.
    pub depends: Vec<String>,
    /// The full solved closure, when requested.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resolved: Option<Vec<PackageRecord>>,
}

/// Show what a package depends on. With `resolve`, solve the spec on its
/// own and report every record the solution pulls in.
pub async fn depends(
    ctx: &SolveContext,
    spec: &str,
    resolve: bool,
    timeout_ms: Option<i64>,
) -> miette::Result<DependsReport> {
    let parsed = MatchSpec::parse(spec)?;
    let record = ctx
        .index
        .search(&parsed)
        .into_iter()
        .next()
        .cloned()
        .ok_or_else(|| CorralError::PackagesNotFound {
            specs: vec![spec.to_string()],
        })?;

    let resolved = if resolve {
        let request = SolverRequest::new(vec![MatchSpec::for_record(&record)]);
        let (_, solution) = ctx.solve(request, timeout_ms).await?;
        Some(
            solution
                .records()
                .filter(|r| r.name != record.name && !r.is_virtual())
                .cloned()
                .collect(),
        )
    } else {
        None
    };

    Ok(DependsReport {
        depends: record.depends.iter().map(ToString::to_string).collect(),
        record,
        resolved,
    })
}

/// Records that depend on `name`.
pub fn whoneeds(index: &RepositoryIndex, name: &str) -> Vec<PackageRecord> {
    index.whoneeds(&name.to_lowercase()).into_iter().cloned().collect()
}

/// Render records as a conda-style table.
pub fn format_records(records: &[PackageRecord]) -> String {
    let mut out = format!("{:<28} {:<16} {:<24} {}\n", "# Name", "Version", "Build", "Channel");
    for record in records {
        out.push_str(&format!(
            "{:<28} {:<16} {:<24} {}\n",
            record.name,
            record.version.to_string(),
            record.build,
            record.channel
        ));
    }
    out
}
