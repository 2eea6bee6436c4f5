//! List the runtime engines in selection order.

use anyhow::{Context, Result};
use colored::Colorize;
use std::fmt::Write as _;

use sandlot::config::Config;
use sandlot::engine::EngineRegistry;

/// Format the registry as a numbered list. Position is selection
/// priority among equal match strengths.
pub fn format_engines(registry: &EngineRegistry) -> String {
    let mut out = String::new();
    writeln!(&mut out, "\n{}", "Registered engines:".bold()).unwrap();
    for (i, engine) in registry.engines().iter().enumerate() {
        writeln!(
            &mut out,
            "  {}. {:<10} {}",
            i + 1,
            engine.name().cyan(),
            engine.kind().to_string().dimmed()
        )
        .unwrap();
    }
    out
}

/// Entry point: prints the registry built from local configuration.
pub async fn run() -> Result<()> {
    let cwd = std::env::current_dir().context("Failed to get current directory")?;
    let config = Config::load(&cwd)?;
    let registry = EngineRegistry::from_config(&config);
    print!("{}", format_engines(&registry));
    Ok(())
}
