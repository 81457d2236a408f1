use miette::Diagnostic;
use thiserror::Error;

/// Unified error type for all Corral operations.
#[derive(Debug, Error, Diagnostic)]
pub enum CorralError {
    /// I/O operation failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Invalid or unreadable configuration (e.g. `config.toml`).
    #[error("Configuration error: {message}")]
    #[diagnostic(help("Check ~/.corral/config.toml (or $CORRAL_HOME/config.toml) for syntax errors"))]
    Config { message: String },

    /// A match spec or version string could not be parsed.
    #[error("Invalid spec '{spec}': {reason}")]
    #[diagnostic(
        code(corral::invalid_spec),
        help("Specs look like `name`, `name >=1.2,<2`, `name=1.2=py*` or `channel::name[version='>=1']`")
    )]
    InvalidSpec { spec: String, reason: String },

    /// A requested package does not exist in any enabled channel.
    #[error("Packages not found in any channel: {}", specs.join(", "))]
    #[diagnostic(
        code(corral::packages_not_found),
        help("Check the package names or add the channel that provides them with `-c`")
    )]
    PackagesNotFound { specs: Vec<String> },

    /// No combination of records satisfies the request.
    #[error("Unsatisfiable request:\n{explanation}")]
    #[diagnostic(code(corral::unsatisfiable))]
    Unsatisfiable { explanation: String },

    /// The solver ran out of its time budget.
    #[error("Solver timed out after {elapsed_ms} ms (budget {budget_ms} ms)")]
    #[diagnostic(
        code(corral::timeout),
        help("Retry with a larger `--timeout-ms` or relax the requested constraints")
    )]
    Timeout { budget_ms: i64, elapsed_ms: u64 },

    /// An internal index invariant was violated. Never recoverable.
    #[error("Repository index is corrupt: {message}")]
    #[diagnostic(code(corral::index_corrupt))]
    IndexCorrupt { message: String },

    /// Channel repodata is missing or malformed.
    #[error("Channel error: {message}")]
    Channel { message: String },

    /// Network request or download failed.
    #[error("Network error: {message}")]
    Network { message: String },

    /// Catch-all for miscellaneous errors.
    #[error("{message}")]
    Generic { message: String },
}

/// Convenience alias for `miette::Result<T>`.
pub type CorralResult<T> = miette::Result<T>;
