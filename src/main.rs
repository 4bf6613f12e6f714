mod capabilities;
mod catalog;
mod detect;
mod document;
mod error;
mod extra;
mod probe;
mod selector;
mod sources;
mod traits;
mod types;
mod url;
mod utils;

use anyhow::Result;
use capabilities::Capabilities;
use catalog::MirrorCatalog;
use clap::Parser;
use error::MirrorError;
use extra::ExtraIndexResolver;
use probe::NetworkProbe;
use selector::SourceSelector;
use sources::{get_writer, Scope, WriteOptions};
use std::ffi::OsString;
use std::process::ExitCode;
use tracing::info;
use tracing_subscriber::EnvFilter;
use types::{ApplyOutcome, ToolTarget};

#[derive(Parser, Debug)]
#[command(name = "pymirror", version)]
#[command(
    about = "Pick a reachable PyPI mirror and write it into pip/poetry/pdm/uv config",
    long_about = None
)]
struct Cli {
    /// Mirror alias (tx, aliyun, hw, ...) or a full index url.
    /// Without it the cloud-internal mirrors are probed first.
    source: Option<String>,

    /// Same as SOURCE
    #[arg(short = 's', long = "source", value_name = "SOURCE", conflicts_with = "source")]
    source_flag: Option<String>,

    /// Tool(s) to configure; detected from the current project when omitted
    #[arg(long, value_enum, value_delimiter = ',')]
    tool: Vec<ToolTarget>,

    /// Replace a different mirror that is already configured
    #[arg(short = 'y', long)]
    replace: bool,

    /// Use the mirror without probing the network
    #[arg(short, long)]
    force: bool,

    /// Print the changes instead of writing them
    #[arg(long)]
    dry_run: bool,

    /// Report every probe and enable debug logging
    #[arg(short, long)]
    verbose: bool,

    /// Write the system-wide config (/etc/pip.conf)
    #[arg(long)]
    etc: bool,

    /// Fail on an unknown alias instead of using the default mirror
    #[arg(long)]
    strict: bool,

    /// List the known mirrors
    #[arg(short, long)]
    list: bool,

    /// Show the index url each tool currently uses
    #[arg(long, conflicts_with_all = ["list", "restore"])]
    status: bool,

    /// Restore each tool's config from its latest backup
    #[arg(long, conflicts_with = "list")]
    restore: bool,

    /// Also point uv's python downloads at a mirror
    #[arg(long)]
    python_mirror: bool,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse_from(cli_args());
    init_logging(cli.verbose);

    match run(cli).await {
        Ok(code) => code,
        Err(e) => {
            eprintln!("Error: {:#}", e);
            let code = e
                .downcast_ref::<MirrorError>()
                .map_or(1, MirrorError::exit_code);
            ExitCode::from(code)
        }
    }
}

/// Process args, or `PYMIRROR_ARGS` when none were given.
fn cli_args() -> Vec<OsString> {
    let mut args: Vec<OsString> = std::env::args_os().collect();
    if args.len() > 1 {
        return args;
    }
    if let Ok(defaults) = std::env::var("PYMIRROR_ARGS") {
        match shlex::split(&defaults) {
            Some(split) => args.extend(split.into_iter().map(OsString::from)),
            None => eprintln!("Ignoring PYMIRROR_ARGS: unbalanced quotes"),
        }
    }
    args
}

fn init_logging(verbose: bool) {
    let default = if verbose { "pymirror=debug" } else { "warn" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

fn env_flag(name: &str) -> bool {
    std::env::var(name)
        .map(|v| matches!(v.trim().to_ascii_lowercase().as_str(), "1" | "true" | "yes"))
        .unwrap_or(false)
}

async fn run(cli: Cli) -> Result<ExitCode> {
    let catalog = MirrorCatalog::load();

    if cli.list {
        handle_list(&catalog);
        return Ok(ExitCode::SUCCESS);
    }

    let caps = Capabilities::detect().await;
    let opts = WriteOptions {
        scope: if cli.etc { Scope::System } else { Scope::User },
        dry_run: cli.dry_run,
        python_mirror: cli
            .python_mirror
            .then(|| catalog.python_install_mirror().to_string()),
    };

    if cli.status {
        let tools = if cli.tool.is_empty() {
            ToolTarget::ALL.to_vec()
        } else {
            cli.tool.clone()
        };
        handle_status(&catalog, &caps, &opts, &tools).await;
        return Ok(ExitCode::SUCCESS);
    }

    let tools = target_tools(&cli.tool).await?;
    if cli.restore {
        return Ok(handle_restore(&caps, &opts, &tools).await);
    }
    handle_apply(&cli, &catalog, &caps, &opts, &tools).await
}

/// Explicit `--tool`s, or the tool the current project uses; plus uv when
/// `PYMIRROR_UV` is set.
async fn target_tools(requested: &[ToolTarget]) -> Result<Vec<ToolTarget>> {
    let mut tools: Vec<ToolTarget> = Vec::new();
    if requested.is_empty() {
        let cwd = std::env::current_dir()?;
        let tool = detect::detect_tool(&cwd).await;
        info!(%tool, "using detected tool");
        tools.push(tool);
    } else {
        for tool in requested {
            if !tools.contains(tool) {
                tools.push(*tool);
            }
        }
    }

    if env_flag("PYMIRROR_UV") && !tools.contains(&ToolTarget::Uv) {
        tools.push(ToolTarget::Uv);
    }
    Ok(tools)
}

// --- Handlers ---

fn handle_list(catalog: &MirrorCatalog) {
    let default = catalog.default_spec().alias.as_str();

    println!("{}", "-".repeat(80));
    println!("{:<10} {:<52} Aliases", "Name", "Index URL");
    println!("{}", "-".repeat(80));
    for spec in catalog.mirrors() {
        let url = catalog
            .url_of(spec)
            .map(|u| u.to_string())
            .unwrap_or_else(|_| spec.host.clone());
        let marker = if spec.alias == default { " (default)" } else { "" };
        println!(
            "{:<10} {:<52} {}{}",
            spec.alias,
            url,
            spec.synonyms.join(", "),
            marker
        );
    }
    println!("{}", "-".repeat(80));
}

async fn handle_status(
    catalog: &MirrorCatalog,
    caps: &Capabilities,
    opts: &WriteOptions,
    tools: &[ToolTarget],
) {
    println!("{}", "-".repeat(80));
    println!("{:<10} {:<52} Status", "Tool", "Current Index URL");
    println!("{}", "-".repeat(80));

    for &tool in tools {
        let writer = get_writer(tool, caps, opts);

        // one unreadable config should not hide the others
        let current = match writer.current_url().await {
            Ok(url) => url,
            Err(e) => {
                info!(%tool, "cannot read current url: {}", e);
                None
            }
        };

        let (url_display, status_display) = match current {
            Some(url) => {
                let known = catalog
                    .mirrors()
                    .iter()
                    .find(|m| {
                        catalog.url_of(m).is_ok_and(|u| {
                            u.to_string().trim_end_matches('/') == url.trim_end_matches('/')
                        })
                    })
                    .map(|m| m.alias.clone())
                    .unwrap_or_else(|| "Custom".to_string());
                (url, format!("[{}]", known))
            }
            None => ("Default".to_string(), "[Official/Default]".to_string()),
        };

        // Truncate URL if too long
        let url_short = if url_display.chars().count() > 50 {
            format!("{}...", url_display.chars().take(47).collect::<String>())
        } else {
            url_display
        };

        println!("{:<10} {:<52} {}", tool, url_short, status_display);
    }
    println!("{}", "-".repeat(80));
}

async fn handle_restore(caps: &Capabilities, opts: &WriteOptions, tools: &[ToolTarget]) -> ExitCode {
    let mut exit = 0u8;
    for &tool in tools {
        let writer = get_writer(tool, caps, opts);
        if writer.requires_sudo() && !caps.is_root {
            eprintln!(
                "Note: Restoring {} config usually requires sudo/root permissions.",
                tool
            );
        }

        println!("Restoring {} configuration...", tool);
        match writer.restore().await {
            Ok(_) => println!("Success! {} configuration restored.", tool),
            Err(e) => {
                eprintln!("Error: {}: {}", tool, e);
                if exit == 0 {
                    exit = e.exit_code();
                }
            }
        }
    }
    ExitCode::from(exit)
}

async fn handle_apply(
    cli: &Cli,
    catalog: &MirrorCatalog,
    caps: &Capabilities,
    opts: &WriteOptions,
    tools: &[ToolTarget],
) -> Result<ExitCode> {
    let probe = NetworkProbe::new(caps);
    let selector = SourceSelector::new(catalog, &probe, cli.strict);

    let requested = cli.source.as_deref().or(cli.source_flag.as_deref());
    let selection = selector.select(requested, cli.force, cli.verbose).await?;
    let extra = ExtraIndexResolver::new(catalog, &probe)
        .resolve(selection.url.dns_host(), cli.force)
        .await;

    let url = &selection.url;
    if let Some(probe) = &selection.probe {
        info!(method = %probe.method, reachable = probe.reachable, "mirror chosen by probe");
    }
    match &selection.alias {
        Some(alias) => println!("Using mirror {} ({})", alias, url),
        None => println!("Using mirror {}", url),
    }
    if let Some(extra) = &extra {
        println!("Extra index: {}", extra.url);
    }

    // keep going after a failure; the exit code reports the first one
    let mut exit = 0u8;
    for &tool in tools {
        let writer = get_writer(tool, caps, opts);
        if writer.requires_sudo() && !caps.is_root {
            eprintln!(
                "Note: Modifying {} config usually requires sudo/root permissions.",
                tool
            );
        }

        let failure = match writer.apply(url, extra.as_ref(), cli.replace).await {
            Ok(ApplyOutcome::Done) => {
                println!("Success! {} is now using {}.", tool, url);
                None
            }
            Ok(ApplyOutcome::Skipped) => {
                println!("{} already uses {}, nothing to do.", tool, url);
                None
            }
            Ok(ApplyOutcome::Planned) => {
                println!("Dry run: {} config left unchanged.", tool);
                None
            }
            Ok(ApplyOutcome::Blocked { existing }) => {
                let path = writer.config_path().unwrap_or_default();
                println!("Current content of {:?}:\n{}", path, existing);
                Some(MirrorError::ConfigBlocked { path })
            }
            Err(e) => Some(e),
        };

        if let Some(e) = failure {
            eprintln!("Error: {}: {}", tool, e);
            if exit == 0 {
                exit = e.exit_code();
            }
        }
    }
    Ok(ExitCode::from(exit))
}
