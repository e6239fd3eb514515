use cx_domain::config::{Config, ConfigSeverity};

const KEYCHAIN_SERVICE: &str = "conflux";

/// Parse and validate the config, printing any issues.
///
/// Returns `true` when the config has no error-severity issues.
pub fn validate(config: &Config, config_path: &str) -> bool {
    let issues = config.validate();

    if issues.is_empty() {
        println!("Config OK ({config_path})");
        return true;
    }

    let error_count = issues
        .iter()
        .filter(|e| e.severity == ConfigSeverity::Error)
        .count();
    let warning_count = issues.len() - error_count;

    for issue in &issues {
        println!("{issue}");
    }

    println!("\n{error_count} error(s), {warning_count} warning(s) in {config_path}");

    error_count == 0
}

/// Dump the resolved config (with all defaults filled in) as TOML.
pub fn show(config: &Config) {
    match toml::to_string_pretty(config) {
        Ok(output) => print!("{output}"),
        Err(e) => {
            eprintln!("Failed to serialize config: {e}");
            std::process::exit(1);
        }
    }
}

/// Store an API key for `provider_id` in the OS keychain, prompting on stdin.
///
/// The provider must exist in config and the key is filed under the
/// service/account pair the provider's `AuthConfig` would look up at
/// runtime (`service`/`account` if set, else `conflux`/`<provider_id>`).
pub fn set_secret(config: &Config, provider_id: &str) -> anyhow::Result<()> {
    let provider = find_provider(config, provider_id)?;
    let (service, account) = keychain_coords(provider_id, provider);

    let key = rpassword::prompt_password(format!("API key for '{provider_id}': "))?;
    if key.trim().is_empty() {
        anyhow::bail!("no key entered, aborting");
    }

    let entry = keyring::Entry::new(&service, &account)?;
    entry.set_password(key.trim())?;

    println!("Stored API key for '{provider_id}' in keychain ({service}/{account}).");
    Ok(())
}

/// Read and display a masked API key from the OS keychain.
pub fn get_secret(config: &Config, provider_id: &str) -> anyhow::Result<()> {
    let provider = find_provider(config, provider_id)?;
    let (service, account) = keychain_coords(provider_id, provider);

    let entry = keyring::Entry::new(&service, &account)?;
    let key = entry
        .get_password()
        .map_err(|e| anyhow::anyhow!("no key stored for '{provider_id}' ({service}/{account}): {e}"))?;

    println!("{provider_id}: {}", mask(&key));
    Ok(())
}

fn find_provider<'a>(
    config: &'a Config,
    provider_id: &str,
) -> anyhow::Result<&'a cx_domain::config::ProviderConfig> {
    config.llm.providers.iter().find(|p| p.id == provider_id).ok_or_else(|| {
        anyhow::anyhow!(
            "provider '{provider_id}' not found in config (available: {})",
            config
                .llm
                .providers
                .iter()
                .map(|p| p.id.as_str())
                .collect::<Vec<_>>()
                .join(", ")
        )
    })
}

fn keychain_coords(provider_id: &str, provider: &cx_domain::config::ProviderConfig) -> (String, String) {
    match (&provider.auth.service, &provider.auth.account) {
        (Some(s), Some(a)) => (s.clone(), a.clone()),
        _ => (KEYCHAIN_SERVICE.to_string(), provider_id.to_string()),
    }
}

fn mask(secret: &str) -> String {
    if secret.len() <= 8 {
        "*".repeat(secret.len())
    } else {
        format!("{}...{}", &secret[..4], &secret[secret.len() - 4..])
    }
}
