//! Handler for `corral whoneeds`.

use miette::Result;

use corral_ops::ops_search;

use crate::cli::ChannelArgs;

pub async fn exec(name: &str, json: bool, channels: &ChannelArgs) -> Result<()> {
    let ctx = super::load_context(channels).await?;
    let records = ops_search::whoneeds(&ctx.index, name);
    if json {
        return super::print_json(&records);
    }
    if records.is_empty() {
        println!("No package depends on '{name}'.");
        return Ok(());
    }
    print!("{}", ops_search::format_records(&records));
    Ok(())
}
