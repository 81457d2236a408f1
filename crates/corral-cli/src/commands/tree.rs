//! Handler for `corral tree`.

use std::path::Path;

use miette::Result;

use corral_core::environment::EnvironmentState;
use corral_ops::ops_tree::{self, TreeOptions};
use corral_util::errors::CorralError;

pub fn exec(
    package: Option<String>,
    state: &Path,
    depth: Option<usize>,
    why: Option<String>,
    inverted: bool,
) -> Result<()> {
    if !state.is_file() {
        return Err(CorralError::Generic {
            message: format!("No environment state at {}", state.display()),
        }
        .into());
    }
    let env = EnvironmentState::from_path(state)?;

    let opts = TreeOptions {
        depth,
        why,
        inverted,
        package,
    };
    print!("{}", ops_tree::tree(&env, &opts)?);
    Ok(())
}
