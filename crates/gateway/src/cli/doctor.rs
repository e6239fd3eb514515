use cx_domain::config::{Config, ConfigSeverity};

/// Run all diagnostic checks and print a summary.
///
/// Returns `Ok(true)` when every check passes, `Ok(false)` when at least
/// one check failed.
pub async fn run(config: &Config, config_path: &str) -> anyhow::Result<bool> {
    println!("conflux doctor");
    println!("==============\n");

    let mut all_passed = true;

    check_config_file(config_path, &mut all_passed);
    check_config_validation(config, &mut all_passed);
    check_database(config, &mut all_passed).await;
    check_blobstore_dir(config, &mut all_passed);
    check_llm_providers(config, &mut all_passed);
    check_sandbox(config, &mut all_passed);

    println!();
    if all_passed {
        println!("All checks passed.");
    } else {
        println!("Some checks failed. Review the output above.");
    }

    Ok(all_passed)
}

// ── Individual checks ─────────────────────────────────────────────────

fn check_config_file(config_path: &str, all_passed: &mut bool) {
    let exists = std::path::Path::new(config_path).exists();
    print_check(
        "Config file exists",
        exists,
        if exists {
            config_path.to_owned()
        } else {
            format!("{config_path} not found (using defaults)")
        },
    );
    if !exists {
        *all_passed = false;
    }
}

fn check_config_validation(config: &Config, all_passed: &mut bool) {
    let issues = config.validate();
    let error_count = issues.iter().filter(|e| e.severity == ConfigSeverity::Error).count();

    if issues.is_empty() {
        print_check("Config validation", true, "no issues".into());
    } else {
        print_check(
            "Config validation",
            error_count == 0,
            format!("{} issue(s) ({} error(s))", issues.len(), error_count),
        );
        for issue in &issues {
            println!("      {issue}");
        }
        if error_count > 0 {
            *all_passed = false;
        }
    }
}

async fn check_database(config: &Config, all_passed: &mut bool) {
    let reachable = cx_db::pool::connect(&config.database.url, config.database.max_connections)
        .await
        .is_ok();
    print_check(
        "Database reachable",
        reachable,
        if reachable {
            config.database.url.clone()
        } else {
            format!("{} (connect failed)", config.database.url)
        },
    );
    if !reachable {
        *all_passed = false;
    }
}

fn check_blobstore_dir(config: &Config, all_passed: &mut bool) {
    let dir = &config.blobstore.dir;
    if let Err(e) = std::fs::create_dir_all(dir) {
        print_check("Blobstore directory writable", false, format!("{}: {e}", dir.display()));
        *all_passed = false;
        return;
    }

    let probe = dir.join(".conflux_doctor_probe");
    let writable = std::fs::write(&probe, b"probe").is_ok();
    let _ = std::fs::remove_file(&probe);

    print_check(
        "Blobstore directory writable",
        writable,
        if writable {
            format!("{} (writable)", dir.display())
        } else {
            format!("{} (not writable)", dir.display())
        },
    );
    if !writable {
        *all_passed = false;
    }
}

fn check_llm_providers(config: &Config, all_passed: &mut bool) {
    let count = config.llm.providers.len();
    let ok = count > 0;

    print_check(
        "LLM providers configured",
        ok,
        if ok { format!("{count} provider(s)") } else { "none configured".into() },
    );

    if !ok {
        *all_passed = false;
    }
}

fn check_sandbox(config: &Config, all_passed: &mut bool) {
    let staging_root = config.blobstore.dir.join("sandbox-staging");
    let reachable = cx_sandbox::SessionManager::connect_local(config.sandbox.clone(), staging_root).is_ok();

    print_check(
        "Docker daemon reachable",
        reachable,
        if reachable {
            "connected".into()
        } else {
            "unreachable (execute_code tool will fail)".into()
        },
    );
    if !reachable {
        *all_passed = false;
    }
}

// ── Formatting helper ─────────────────────────────────────────────────

fn print_check(name: &str, passed: bool, detail: String) {
    let status = if passed { "PASS" } else { "FAIL" };
    println!("  [{status}] {name}: {detail}");
}
