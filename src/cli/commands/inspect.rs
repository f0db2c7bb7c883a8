//! Inspect command - load a definition without building it

use crate::cli::args::InspectArgs;
use crate::config::Config;
use crate::entitlements::EntitlementSet;
use crate::errdefs::attach_sources;
use crate::error::{BridgeError, BridgeResult};
use crate::graph::{Definition, Platform};
use crate::loader::{self, PrunedCacheIds, Vertex};
use crate::policy::{compose_policies, SourcePolicy};
use crate::ui::{self, UiContext};
use std::sync::Arc;
use tracing::debug;

/// Execute the inspect command
pub async fn execute(args: InspectArgs, config: &Config) -> BridgeResult<()> {
    let ctx = UiContext::detect();
    let def = Definition::load_from_file(&args.definition).await?;

    let mut submitted = Vec::with_capacity(args.policies.len());
    for path in &args.policies {
        submitted.push(Some(SourcePolicy::load_from_file(path).await?));
    }
    let policy = compose_policies(config.ambient_policy().await?, &submitted)?;

    let mut entitlements = config.entitlements()?;
    for ent in EntitlementSet::parse(args.allow.as_slice())?.iter() {
        entitlements = entitlements.with(*ent);
    }

    let platform = match &args.platform {
        Some(p) => Platform::parse(p)?.normalize(),
        None => config.default_platform()?,
    };
    debug!(%platform, ops = def.ops.len(), "loading definition");

    let mut pruned = PrunedCacheIds::new();
    let loaded = loader::load(
        &def,
        policy.as_deref(),
        vec![
            pruned.observer(),
            loader::validate_entitlements(entitlements),
            loader::normalize_runtime_platforms(platform.clone()),
            loader::with_validate_caps(),
        ],
    );
    let edge = loaded.map_err(|e| attach_sources(BridgeError::LoadGraph(Box::new(e)), &def))?;

    ui::section(&ctx, "Vertices");
    let mut count = 0usize;
    edge.walk(&mut |vertex: &Arc<Vertex>| {
        count += 1;
        let mut line = vertex.name.clone();
        if let Some(p) = &vertex.options.platform {
            line.push_str(&format!(" [{}]", p));
        }
        if vertex.options.ignore_cache {
            line.push_str(" (no cache)");
        }
        ui::key_value(&ctx, vertex.digest.short(), &line);
    });

    if !pruned.is_empty() {
        ui::section(&ctx, "Pruned cache mounts");
        for id in pruned.ids() {
            ui::remark(&ctx, &id);
        }
    }

    println!();
    ui::step_ok_detail(
        &ctx,
        "Definition loaded",
        &format!("{} vertices, default platform {}", count, platform),
    );
    Ok(())
}
