//! Handler for `corral install`.

use miette::Result;

use super::SolveKind;
use crate::cli::SolveFlags;

pub async fn exec(specs: Vec<String>, flags: &SolveFlags) -> Result<()> {
    super::run_solve(specs, flags, false, SolveKind::Install).await
}
