use std::io::Read;

use anyhow::{anyhow, bail, Context, Result};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use capshield::config::{self, Config};
use capshield::inject;
use capshield::policy::{self, ShieldProfile};
use capshield::runner::language;
use capshield::sandbox::{LineKind, RunUpdate};
use capshield::session::Session;

fn print_help() {
    println!(
        "\
capshield v{}

Capability policy engine and sandboxed execution host for untrusted scripts.

USAGE:
    capshield [OPTIONS] <COMMAND>

COMMANDS:
    run [LANGUAGE] <FILE>    Run a source file (\"-\" reads stdin). The language
                             defaults to the one matching the file extension
    navigate <URL>           Classify a destination and log its simulated telemetry
    policy [QUERY]           Show the capability policy, optionally filtered
    inject                   Print the override script for the current policy

OPTIONS:
    -c, --config <PATH>      Path to TOML configuration file [default: {}]
    -p, --profile <NAME>     Shield profile: browser or blocker
        --block-all          Block every capability before running the command
        --allow-all          Allow every capability before running the command
    -h, --help               Print this help message and exit
    -V, --version            Print version and exit

ENVIRONMENT VARIABLES:
    Variables are referenced in the config file via ${{VAR_NAME}} syntax.

    RUST_LOG              Log level filter for tracing
                          (e.g. debug, capshield=debug,warn)

EXAMPLES:
    capshield run demo.js                      # JavaScript, default policy
    capshield --allow-all run python main.py   # nothing blocked
    capshield --profile blocker policy sensor  # API blocker, sensor entries
    RUST_LOG=debug capshield navigate facebook.com",
        env!("CARGO_PKG_VERSION"),
        config::DEFAULT_PATH,
    );
}

#[derive(Debug, PartialEq)]
enum Command {
    Run { language: Option<String>, file: String },
    Navigate(String),
    Policy(Option<String>),
    Inject,
}

#[derive(Debug, PartialEq)]
struct Cli {
    config_path: Option<String>,
    profile: Option<ShieldProfile>,
    block_all: bool,
    allow_all: bool,
    command: Command,
}

fn parse_args(args: impl IntoIterator<Item = String>) -> Result<Cli> {
    let mut config_path = None;
    let mut profile = None;
    let mut block_all = false;
    let mut allow_all = false;
    let mut positional = Vec::new();

    let mut args = args.into_iter();
    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--config" | "-c" => {
                config_path = Some(args.next().ok_or_else(|| anyhow!("--config needs a path"))?);
            }
            "--profile" | "-p" => {
                let name = args.next().ok_or_else(|| anyhow!("--profile needs a name"))?;
                profile = Some(
                    ShieldProfile::parse(&name)
                        .ok_or_else(|| anyhow!("unknown profile '{name}' (browser or blocker)"))?,
                );
            }
            "--block-all" => block_all = true,
            "--allow-all" => allow_all = true,
            _ if arg.starts_with('-') && arg != "-" => bail!("unknown option '{arg}'"),
            _ => positional.push(arg),
        }
    }
    if block_all && allow_all {
        bail!("--block-all and --allow-all are mutually exclusive");
    }

    let mut positional = positional.into_iter();
    let command = match positional.next().as_deref() {
        Some("run") => match (positional.next(), positional.next()) {
            (Some(language), Some(file)) => Command::Run {
                language: Some(language),
                file,
            },
            (Some(file), None) => Command::Run {
                language: None,
                file,
            },
            _ => bail!("run needs a source file"),
        },
        Some("navigate") => {
            Command::Navigate(positional.next().ok_or_else(|| anyhow!("navigate needs a URL"))?)
        }
        Some("policy") => Command::Policy(positional.next()),
        Some("inject") => Command::Inject,
        Some(other) => bail!("unknown command '{other}'"),
        None => bail!("no command given (see --help)"),
    };

    Ok(Cli {
        config_path,
        profile,
        block_all,
        allow_all,
        command,
    })
}

#[tokio::main]
async fn main() -> Result<()> {
    // Handle --help / --version before anything else
    for arg in std::env::args().skip(1) {
        match arg.as_str() {
            "--version" | "-V" => {
                println!("capshield v{}", env!("CARGO_PKG_VERSION"));
                std::process::exit(0);
            }
            "--help" | "-h" => {
                print_help();
                std::process::exit(0);
            }
            _ => {}
        }
    }

    // Initialize logging (RUST_LOG=debug for debug mode)
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("capshield=info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = parse_args(std::env::args().skip(1))?;

    eprintln!(
        r#"
                       _     _      _     _
   ___ __ _ _ __  ___| |__ (_) ___| | __| |
  / __/ _` | '_ \/ __| '_ \| |/ _ \ |/ _` |
 | (_| (_| | |_) \__ \ | | | |  __/ | (_| |
  \___\__,_| .__/|___/_| |_|_|\___|_|\__,_|
           |_|                          v{}
"#,
        env!("CARGO_PKG_VERSION")
    );

    // Load configuration
    let mut config = match &cli.config_path {
        Some(path) => {
            info!("Loading configuration from {path}");
            Config::load(path).with_context(|| format!("cannot load {path}"))?
        }
        None => Config::load_or_default(config::DEFAULT_PATH)?,
    };
    if let Some(profile) = cli.profile {
        config.shield.profile = profile;
    }

    let session = Session::new(&config);
    if cli.block_all {
        session.block_all();
    } else if cli.allow_all {
        session.allow_all();
    }

    match cli.command {
        Command::Run { language, file } => run(&session, language.as_deref(), &file).await,
        Command::Navigate(url) => navigate(&session, &url).await,
        Command::Policy(query) => {
            show_policy(&session, query.as_deref());
            Ok(())
        }
        Command::Inject => {
            let script = inject::synthesize(policy::lock(session.policy()).store());
            info!(
                "{} fragments ({} blocked, {} monitored)",
                script.fragment_count(),
                script.blocked.len(),
                script.monitored.len()
            );
            println!("{}", script.source);
            Ok(())
        }
    }
}

async fn run(session: &Session, language: Option<&str>, file: &str) -> Result<()> {
    let source = if file == "-" {
        let mut source = String::new();
        std::io::stdin().read_to_string(&mut source)?;
        source
    } else {
        std::fs::read_to_string(file).with_context(|| format!("cannot read {file}"))?
    };

    let language = match language {
        Some(name) => language::resolve(name).map(|l| l.id).unwrap_or(name).to_string(),
        None => {
            let extension = std::path::Path::new(file)
                .extension()
                .and_then(|e| e.to_str())
                .ok_or_else(|| anyhow!("cannot infer the language of '{file}'"))?;
            language::resolve(extension)
                .map(|l| l.id.to_string())
                .ok_or_else(|| anyhow!("no language uses the .{extension} extension"))?
        }
    };

    let mut handle = session.run_code(&language, &source)?;
    while let Some(update) = handle.next_update().await {
        match update {
            RunUpdate::Line(line) => match line.kind {
                LineKind::Out => println!("{}", line.text),
                kind => println!("[{}] {}", kind.as_str(), line.text),
            },
            RunUpdate::Intercept(event) => {
                eprintln!(
                    "  ⛔ {} ({}, {} risk)",
                    event.display_name,
                    event.status_at_emission,
                    event.risk_tier.label()
                );
            }
            RunUpdate::Finished(result) => {
                info!(
                    "{} run finished: {:?} in {}ms",
                    result.language, result.terminal, result.elapsed_ms
                );
                if let Some(fault) = result.fault {
                    bail!(fault);
                }
                return Ok(());
            }
        }
    }
    warn!("Run ended without a result");
    Ok(())
}

async fn navigate(session: &Session, input: &str) -> Result<()> {
    let outcome = session
        .navigate(input)
        .ok_or_else(|| anyhow!("nothing to navigate to"))?;
    println!("{}  {}", outcome.classification.level.badge(), outcome.navigation.url);
    if let Some(domain) = outcome.classification.matched_domain {
        println!("matched tracker: {domain}");
    }

    let logged = outcome.telemetry.await?;
    println!("{logged} simulated interceptions:");
    for event in session.intercept_log().iter().rev() {
        println!(
            "  {}  {:<28} {:<8} {}",
            event.timestamp.format("%H:%M:%S"),
            event.display_name,
            event.risk_tier.label(),
            event.status_at_emission
        );
    }
    Ok(())
}

fn show_policy(session: &Session, query: Option<&str>) {
    let summary = session.policy_summary();
    println!(
        "{:?} shield: {} capabilities, {} blocked, {} allowed, {} monitored ({}% protected)",
        session.profile(),
        summary.total,
        summary.blocked,
        summary.allowed,
        summary.monitor,
        summary.percent_protected
    );
    for category in &summary.categories {
        println!(
            "  {:<12} {:>2}/{:<2} {}",
            category.category.as_str(),
            category.blocked,
            category.total,
            if category.enforced() { "ON" } else { "OFF" }
        );
    }
    println!();
    for (descriptor, status) in session.search(query.unwrap_or(""), None) {
        println!(
            "  {:<8} {:<30} {:<12} {}",
            status.as_str(),
            descriptor.id,
            descriptor.category.as_str(),
            descriptor.risk_tier.label()
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_parse_run_with_language() {
        let cli = parse_args(args(&["--profile", "blocker", "run", "python", "main.py"])).unwrap();
        assert_eq!(cli.profile, Some(ShieldProfile::Blocker));
        assert_eq!(
            cli.command,
            Command::Run {
                language: Some("python".to_string()),
                file: "main.py".to_string()
            }
        );
    }

    #[test]
    fn test_parse_run_stdin_without_language() {
        let cli = parse_args(args(&["--allow-all", "run", "-"])).unwrap();
        assert!(cli.allow_all);
        assert_eq!(
            cli.command,
            Command::Run {
                language: None,
                file: "-".to_string()
            }
        );
    }

    #[test]
    fn test_parse_policy_and_config() {
        let cli = parse_args(args(&["-c", "my.toml", "policy", "sensor"])).unwrap();
        assert_eq!(cli.config_path.as_deref(), Some("my.toml"));
        assert_eq!(cli.command, Command::Policy(Some("sensor".to_string())));
    }

    #[test]
    fn test_parse_errors() {
        assert!(parse_args(args(&[])).is_err());
        assert!(parse_args(args(&["run"])).is_err());
        assert!(parse_args(args(&["navigate"])).is_err());
        assert!(parse_args(args(&["--profile", "firewall", "inject"])).is_err());
        assert!(parse_args(args(&["--block-all", "--allow-all", "inject"])).is_err());
        assert!(parse_args(args(&["--verbose", "inject"])).is_err());
        assert!(parse_args(args(&["deploy"])).is_err());
    }
}
