//! Handler for `corral search`.

use miette::Result;

use corral_ops::ops_search;

use crate::cli::ChannelArgs;

pub async fn exec(spec: &str, json: bool, channels: &ChannelArgs) -> Result<()> {
    let ctx = super::load_context(channels).await?;
    let records = ops_search::search(&ctx.index, spec)?;
    if json {
        return super::print_json(&records);
    }
    print!("{}", ops_search::format_records(&records));
    Ok(())
}
