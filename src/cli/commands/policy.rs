//! Policy command - validate and evaluate source policies

use crate::cli::args::{PolicyAction, PolicyArgs};
use crate::config::Config;
use crate::error::{BridgeError, BridgeResult};
use crate::graph::SourceOp;
use crate::policy::{validate_source_policy, Engine, SourcePolicy, SourcePolicyEvaluator};
use crate::ui::{self, UiContext};

/// Execute the policy command
pub async fn execute(args: PolicyArgs, _config: &Config) -> BridgeResult<()> {
    match args.action {
        PolicyAction::Check { files } => check(&files).await,
        PolicyAction::Eval { file, identifier } => eval(&file, identifier).await,
    }
}

async fn check(files: &[std::path::PathBuf]) -> BridgeResult<()> {
    let ctx = UiContext::detect();
    let mut failed = 0usize;

    for path in files {
        let checked = match SourcePolicy::load_from_file(path).await {
            Ok(policy) => validate_source_policy(&policy).map(|()| policy.rules.len()),
            Err(e) => Err(e),
        };
        match checked {
            Ok(rules) => ui::step_ok_detail(
                &ctx,
                &path.display().to_string(),
                &format!("{} rules", rules),
            ),
            Err(e) => {
                failed += 1;
                ui::step_error_detail(&ctx, &path.display().to_string(), &e.to_string());
            }
        }
    }

    if failed > 0 {
        return Err(BridgeError::InvalidPolicy(format!(
            "{} of {} policy files are invalid",
            failed,
            files.len()
        )));
    }
    Ok(())
}

async fn eval(path: &std::path::Path, identifier: String) -> BridgeResult<()> {
    let ctx = UiContext::detect();
    let policy = SourcePolicy::load_from_file(path).await?;
    validate_source_policy(&policy)?;
    let engine = Engine::new(vec![policy])?;

    let mut op = SourceOp::new(identifier.clone());
    if engine.evaluate(&mut op)? {
        ui::step_ok_detail(&ctx, "Converted", &op.identifier);
        for (key, value) in &op.attrs {
            ui::key_value(&ctx, key, value);
        }
    } else {
        ui::step_ok(&ctx, &format!("Allowed {}", identifier));
    }
    Ok(())
}
