use std::path::PathBuf;

use crate::cli::commands::ValidateArgs;
use crate::config;
use crate::errors::SandflowError;
use crate::registry::Registry;

pub async fn handle_validate(args: ValidateArgs) -> Result<(), SandflowError> {
    let path = PathBuf::from(&args.config);
    let file = config::parse_config(&path).await?;

    // Resolving tools catches unknown names before a run would.
    let mut registry = Registry::with_builtins();
    file.register_skills(&mut registry);
    let pipeline = file.build(&registry)?;

    println!(
        "Configuration is valid: {} ({} step(s) in pipeline '{}')",
        args.config,
        pipeline.steps.len(),
        pipeline.name
    );
    Ok(())
}
