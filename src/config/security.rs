use crate::errors::SandflowError;

/// Shell fragments that have no business in a pipeline step.
const DANGEROUS_COMMAND_PATTERNS: &[&str] = &[
    "rm -rf /",
    "rm -rf ~",
    "rm -rf $home",
    "mkfs",
    "dd if=",
    "> /dev/sd",
    ":(){",
    "chmod -r 777 /",
    "| sh",
    "| bash",
];

/// Patterns that let a name escape its directory when used as a file name
/// or registry key.
const TRAVERSAL_PATTERNS: &[&str] = &["../", "..\\", "\0"];

const NAME_KEYS: &[&str] = &["name", "tool"];

pub fn validate_security_patterns(value: &serde_yaml::Value) -> Result<(), SandflowError> {
    check_value(value, &[])?;
    Ok(())
}

fn check_value(value: &serde_yaml::Value, path: &[String]) -> Result<(), SandflowError> {
    match value {
        serde_yaml::Value::String(s) => {
            let key = path.last().map(String::as_str).unwrap_or("");
            let patterns: &[&str] = if key == "command" {
                DANGEROUS_COMMAND_PATTERNS
            } else if NAME_KEYS.contains(&key) {
                TRAVERSAL_PATTERNS
            } else {
                &[]
            };
            let lower = s.to_lowercase();
            for pattern in patterns {
                if lower.contains(pattern) {
                    let path_str = if path.is_empty() { "root".to_string() } else { path.join(".") };
                    return Err(SandflowError::Config(
                        format!("Dangerous pattern '{}' found at config path: {}", pattern, path_str)
                    ));
                }
            }
            Ok(())
        }
        serde_yaml::Value::Mapping(map) => {
            for (k, v) in map {
                let key = k.as_str().unwrap_or("unknown").to_string();
                let mut new_path = path.to_vec();
                new_path.push(key);
                check_value(v, &new_path)?;
            }
            Ok(())
        }
        serde_yaml::Value::Sequence(seq) => {
            for (i, v) in seq.iter().enumerate() {
                let mut new_path = path.to_vec();
                new_path.push(format!("[{}]", i));
                check_value(v, &new_path)?;
            }
            Ok(())
        }
        _ => Ok(()),
    }
}
