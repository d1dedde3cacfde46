use anyhow::anyhow;
use serde::Serialize;
use wtsc_core::{ConfigError, ConfigSource};

#[derive(Serialize)]
struct ValidationResult<'a> {
    path: String,
    valid: bool,
    invalid_keys: &'a [String],
}

pub fn run(source: &ConfigSource, json: bool) -> anyhow::Result<()> {
    let path = source.path().display().to_string();
    match source.load() {
        Ok(_) => {
            if json {
                report(&ValidationResult {
                    path,
                    valid: true,
                    invalid_keys: &[],
                })?;
            } else {
                println!("{path}: ok");
            }
            Ok(())
        }
        Err(ConfigError::Invalid { keys, .. }) => {
            if json {
                report(&ValidationResult {
                    path: path.clone(),
                    valid: false,
                    invalid_keys: &keys,
                })?;
            } else {
                for key in &keys {
                    println!("invalid: {key}");
                }
            }
            Err(anyhow!("{path}: {} invalid key(s)", keys.len()))
        }
        Err(e) => Err(e.into()),
    }
}

fn report(result: &ValidationResult<'_>) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(result)?);
    Ok(())
}
