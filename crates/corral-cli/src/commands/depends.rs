//! Handler for `corral depends`.

use miette::Result;

use corral_ops::ops_search;

use crate::cli::ChannelArgs;

pub async fn exec(
    spec: &str,
    resolve: bool,
    timeout_ms: Option<i64>,
    json: bool,
    channels: &ChannelArgs,
) -> Result<()> {
    let ctx = super::load_context(channels).await?;
    let report = ops_search::depends(&ctx, spec, resolve, timeout_ms).await?;
    if json {
        return super::print_json(&report);
    }

    println!("{}", report.record);
    match &report.resolved {
        Some(records) if records.is_empty() => println!("  (no dependencies)"),
        Some(records) => print!("{}", ops_search::format_records(records)),
        None if report.depends.is_empty() => println!("  (no dependencies)"),
        None => {
            for dep in &report.depends {
                println!("  {dep}");
            }
        }
    }
    Ok(())
}
