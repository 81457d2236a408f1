//! Handler for `corral check`.

use std::path::PathBuf;

use miette::Result;

use corral_ops::ops_check;
use corral_util::errors::CorralError;
use corral_util::progress;

use crate::cli::ChannelArgs;

pub async fn exec(
    states: &[PathBuf],
    timeout_ms: Option<i64>,
    json: bool,
    channels: &ChannelArgs,
) -> Result<()> {
    let ctx = super::load_context(channels).await?;
    let reports = ops_check::check(&ctx, states, timeout_ms).await?;

    if json {
        super::print_json(&reports)?;
    } else {
        for report in &reports {
            if report.is_ok() {
                println!("{}: ok ({} packages)", report.path.display(), report.packages);
                continue;
            }
            println!("{}: {} issue(s)", report.path.display(), report.issues.len());
            for issue in &report.issues {
                for (i, line) in issue.lines().enumerate() {
                    let lead = if i == 0 { "  - " } else { "    " };
                    println!("{lead}{line}");
                }
            }
        }
    }

    let failed = reports.iter().filter(|r| !r.is_ok()).count();
    if failed > 0 {
        progress::status_warn("Inconsistent", &format!("{failed} of {} environment(s)", reports.len()));
        return Err(CorralError::Generic {
            message: format!("{failed} environment(s) failed the consistency check"),
        }
        .into());
    }
    progress::status("Verified", &format!("{} environment(s)", reports.len()));
    Ok(())
}
