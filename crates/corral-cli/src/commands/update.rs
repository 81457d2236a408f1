//! Handler for `corral update`.

use miette::Result;

use super::SolveKind;
use crate::cli::SolveFlags;

pub async fn exec(specs: Vec<String>, all: bool, flags: &SolveFlags) -> Result<()> {
    super::run_solve(specs, flags, all, SolveKind::Update).await
}
