use serde_json::Value;

use super::format::parse_json_arg;
use crate::cache::{derive_key, make_key_fn};
use crate::cli::commands::KeyArgs;
use crate::errors::SandflowError;

pub fn handle_key(args: KeyArgs) -> Result<(), SandflowError> {
    println!("{}", compute_key(&args)?);
    Ok(())
}

fn compute_key(args: &KeyArgs) -> Result<String, SandflowError> {
    let input = args.input.as_deref().map(parse_json_arg).unwrap_or(Value::Null);
    let config = match args.config.as_deref() {
        Some(text) => serde_json::from_str(text)
            .map_err(|e| SandflowError::Config(format!("--config is not valid JSON: {}", e)))?,
        None => Value::Object(Default::default()),
    };

    Ok(match &args.run_id {
        Some(run_id) => derive_key(&args.step, run_id, &input, &config),
        None => make_key_fn(&args.step, &config).key(&input),
    })
}
