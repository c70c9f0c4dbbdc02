use solace_domain::config::{Config, ConfigSeverity};

/// Print every validation issue. Returns `false` when any is an error.
pub fn validate(config: &Config, config_path: &str) -> bool {
    let issues = config.validate();
    if issues.is_empty() {
        println!("Config OK ({config_path})");
        return true;
    }

    for issue in &issues {
        println!("{issue}");
    }
    let errors = issues
        .iter()
        .filter(|i| i.severity == ConfigSeverity::Error)
        .count();
    println!(
        "\n{errors} error(s), {} warning(s) in {config_path}",
        issues.len() - errors
    );
    errors == 0
}

/// Dump the resolved config as TOML. Secrets never live in the file, so
/// nothing needs masking.
pub fn show(config: &Config) -> anyhow::Result<()> {
    let out = toml::to_string_pretty(config)?;
    print!("{out}");
    Ok(())
}
