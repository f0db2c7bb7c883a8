//! Cache-key command - show how a cache source is deduplicated

use crate::cache::{cache_source_key, CacheOptionsEntry};
use crate::cli::args::CacheKeyArgs;
use crate::config::Config;
use crate::error::BridgeResult;

/// Execute the cache-key command
pub async fn execute(args: CacheKeyArgs, _config: &Config) -> BridgeResult<()> {
    let entry = args
        .attrs
        .into_iter()
        .fold(CacheOptionsEntry::new(args.kind), |entry, (key, value)| {
            entry.with_attr(key, value)
        });
    println!("{}", cache_source_key(&entry)?);
    Ok(())
}
