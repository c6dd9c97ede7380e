use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

use crate::config::Config;
use crate::pool::EnginePoolService;
use crate::settings::InMemorySettings;
use crate::types::{format_num, json_to_val, GoalLibrary, GoalLibraryFile, Val};

const APP_NAME: &str = "default";

#[derive(Parser)]
#[command(name = "stepwise")]
#[command(about = "Stepwise - run parsed goal files", long_about = None)]
pub struct Cli {
    /// Path to config file (overrides default search)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Log filter used when RUST_LOG is unset (overrides config)
    #[arg(long, global = true)]
    pub log_level: Option<String>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run goals from a parsed goal file (JSON or TOML)
    Run {
        /// Goal file
        file: PathBuf,

        /// Goal to run (repeatable; default goal of the file if omitted)
        #[arg(short = 'g', long = "goal")]
        goals: Vec<String>,

        /// Initial variable as name=value; values are parsed as JSON when possible
        #[arg(long = "var")]
        vars: Vec<String>,

        /// Tolerate unresolvable variable references
        #[arg(long)]
        build_mode: bool,

        /// Default step timeout in milliseconds
        #[arg(long)]
        step_timeout_ms: Option<u64>,
    },

    /// List the goals of a goal file
    Goals {
        /// Goal file
        file: PathBuf,
    },
}

/// Run the CLI by parsing process arguments
pub async fn run_cli() -> Result<()> {
    let cli = Cli::parse();
    run_cli_with_args(cli).await
}

async fn run_cli_with_args(cli: Cli) -> Result<()> {
    let build_mode = matches!(cli.command, Commands::Run { build_mode: true, .. });
    let step_timeout_ms = match &cli.command {
        Commands::Run { step_timeout_ms, .. } => *step_timeout_ms,
        Commands::Goals { .. } => None,
    };

    // Load and validate configuration before any command runs
    let config = Config::builder()
        .config_path(cli.config.clone())
        .log_level(cli.log_level.clone())
        .build_mode(build_mode.then_some(true))
        .step_timeout_ms(step_timeout_ms)
        .build()?;
    init_tracing(&config);

    match cli.command {
        Commands::Run { file, goals, vars, .. } => {
            let library = Arc::new(load_library(&file)?);
            let service = EnginePoolService::new(config);
            service.add_app(APP_NAME, library, Arc::new(InMemorySettings::new()));

            let mut engine = service.rent(APP_NAME).await?;
            for var in &vars {
                let (name, value) = parse_var(var)?;
                engine.memory_mut().put(&name, value)?;
            }

            let names: Vec<&str> = goals.iter().map(String::as_str).collect();
            let result = engine.run(&names).await;
            drop(engine);
            service.shutdown().await;

            match result? {
                Some(value) => println!("{}", render(&value)),
                None => tracing::debug!("run finished without a return value"),
            }
        }

        Commands::Goals { file } => {
            let library = load_library(&file)?;
            let mut names: Vec<&str> = library.names().collect();
            names.sort_unstable();
            for name in names {
                let Some(goal) = library.get(name) else { continue };
                let mut flags = Vec::new();
                if goal.is_setup {
                    flags.push("setup");
                }
                if library.default_goal().is_some_and(|d| d.eq_ignore_ascii_case(name)) {
                    flags.push("default");
                }
                let flags = if flags.is_empty() {
                    String::new()
                } else {
                    format!(" [{}]", flags.join(", "))
                };
                println!("{} ({} steps){}", goal.name, goal.steps.len(), flags);
            }
        }
    }

    Ok(())
}

fn init_tracing(config: &Config) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.logging.level));
    // a subscriber may already be installed by an embedding host
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
}

/// Parse a goal file; `.toml` files as TOML, anything else as JSON
pub fn load_library(path: &Path) -> Result<GoalLibrary> {
    let text = std::fs::read_to_string(path).with_context(|| format!("failed to read {}", path.display()))?;
    let file: GoalLibraryFile = match path.extension().and_then(|e| e.to_str()) {
        Some(ext) if ext.eq_ignore_ascii_case("toml") => {
            toml::from_str(&text).with_context(|| format!("invalid goal file {}", path.display()))?
        }
        _ => serde_json::from_str(&text).with_context(|| format!("invalid goal file {}", path.display()))?,
    };
    Ok(GoalLibrary::from_file(file))
}

/// `name=value`, with the value parsed as JSON when it is valid JSON
fn parse_var(raw: &str) -> Result<(String, Val)> {
    let (name, value) = raw
        .split_once('=')
        .with_context(|| format!("expected name=value, got '{}'", raw))?;
    let value = match serde_json::from_str(value) {
        Ok(json) => json_to_val(&json),
        Err(_) => Val::Str(value.to_string()),
    };
    Ok((name.trim().to_string(), value))
}

fn render(value: &Val) -> String {
    match value {
        Val::Num(n) => format_num(*n),
        Val::List(_) | Val::Obj(_) => {
            serde_json::to_string_pretty(&crate::types::val_to_json(value)).unwrap_or_else(|_| value.to_string())
        }
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_parse_var() {
        assert_eq!(parse_var("n=3").unwrap(), ("n".to_string(), Val::Num(3.0)));
        assert_eq!(parse_var("name=Ada").unwrap(), ("name".to_string(), Val::Str("Ada".into())));
        assert!(parse_var("novalue").is_err());
    }

    #[test]
    fn test_load_toml_library() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(
            file,
            r#"
default_goal = "Main"

[[goals]]
name = "Main"

[[goals.steps]]
module_type = "variable"
text = "set greeting"

[goals.steps.instruction]
function = "set"
parameters = [{{ name = "name", value = "greeting" }}, {{ name = "value", value = "hello" }}]
"#
        )
        .unwrap();

        let library = load_library(file.path()).unwrap();
        let goal = library.get("main").unwrap();
        assert_eq!(goal.steps.len(), 1);
        assert_eq!(goal.steps[0].instruction.function, "set");
        assert_eq!(library.default_goal(), Some("Main"));
    }
}
