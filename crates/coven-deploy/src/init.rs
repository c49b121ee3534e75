// ABOUTME: Bootstrap wizard for coven-deploy configuration.
// ABOUTME: Asks for the time unit, modules directory, and the first workload to deploy.

use crate::workloads::Catalog;
use anyhow::{Context, Result};
use coven_deploy_core::{BootstrapConfig, Config};
use std::io::{self, BufRead, Write};

fn prompt(input: &mut impl BufRead, message: &str, default: &str) -> Result<String> {
    print!("{} [{}]: ", message, default);
    io::stdout().flush()?;

    let mut line = String::new();
    input.read_line(&mut line)?;

    let line = line.trim();
    if line.is_empty() {
        Ok(default.to_string())
    } else {
        Ok(line.to_string())
    }
}

fn prompt_choice(
    input: &mut impl BufRead,
    message: &str,
    choices: &[&str],
    default: usize,
) -> Result<usize> {
    println!("{}:", message);
    for (i, choice) in choices.iter().enumerate() {
        let marker = if i == default { "*" } else { " " };
        println!("  {} [{}] {}", marker, i + 1, choice);
    }

    print!("Choice [{}]: ", default + 1);
    io::stdout().flush()?;

    let mut line = String::new();
    input.read_line(&mut line)?;

    let line = line.trim();
    if line.is_empty() {
        Ok(default)
    } else {
        let choice: usize = line.parse().context("Invalid choice")?;
        if choice < 1 || choice > choices.len() {
            anyhow::bail!("Choice must be between 1 and {}", choices.len());
        }
        Ok(choice - 1)
    }
}

fn prompt_number<T>(input: &mut impl BufRead, message: &str, default: T) -> Result<T>
where
    T: std::str::FromStr + std::fmt::Display,
{
    let answer = prompt(input, message, &default.to_string())?;
    answer
        .parse()
        .map_err(|_| anyhow::anyhow!("'{}' is not a valid number", answer))
}

/// Ask every question and build the resulting config.
pub fn ask(input: &mut impl BufRead, existing: &Config) -> Result<Config> {
    let time_unit_ms = prompt_number(input, "Time unit (ms)", existing.time_unit_ms)?;
    let default_timeout_units = prompt_number(
        input,
        "Restart readiness timeout (time units)",
        existing.default_timeout_units,
    )?;
    let modules_dir = prompt(input, "Modules directory", &existing.modules_dir)?;

    let catalog = Catalog::builtin();
    let names = catalog.names();
    let default_module = names
        .iter()
        .position(|name| *name == existing.bootstrap.module)
        .unwrap_or(0);
    let module = prompt_choice(input, "Bootstrap module", &names, default_module)?;
    let argument = prompt(input, "Bootstrap argument", &existing.bootstrap.argument)?;
    let timeout_units = prompt_number(
        input,
        "Bootstrap readiness timeout (time units)",
        existing.bootstrap.timeout_units,
    )?;

    Ok(Config {
        time_unit_ms,
        default_timeout_units,
        modules_dir,
        worker_executable: existing.worker_executable.clone(),
        bootstrap: BootstrapConfig {
            module: names[module].to_string(),
            argument,
            timeout_units,
        },
    })
}

pub fn run_init() -> Result<()> {
    println!("coven-deploy initialization\n");

    let config_path = Config::default_path()?;
    let existing = if config_path.exists() {
        Config::load(&config_path)?
    } else {
        Config::default()
    };

    let stdin = io::stdin();
    let config = ask(&mut stdin.lock(), &existing)?;

    config.save(&config_path)?;
    println!("\nConfig written to {}", config_path.display());

    let modules_dir = config.modules_dir_expanded();
    std::fs::create_dir_all(&modules_dir)
        .with_context(|| format!("Failed to create {}", modules_dir.display()))?;
    println!("Module definitions go in {}", modules_dir.display());

    println!("\nReady to run: coven-deploy supervisor");

    Ok(())
}
