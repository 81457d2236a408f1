//! Handler for `corral remove`.

use miette::Result;

use super::SolveKind;
use crate::cli::SolveFlags;

pub async fn exec(names: Vec<String>, flags: &SolveFlags) -> Result<()> {
    if !flags.state.is_file() {
        return Err(corral_util::errors::CorralError::Generic {
            message: format!("No environment state at {}", flags.state.display()),
        }
        .into());
    }
    super::run_solve(names, flags, false, SolveKind::Remove).await
}
