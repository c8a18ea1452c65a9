use anyhow::{bail, Context, Result};
use gameface_resmap::{
    config::{base_data_dir, ResMapConfig},
    error::Diagnostics,
    fragment::FragmentLoader,
    paths::GamePaths,
    pipeline::{CheckStatus, PassStatus, ResMapPipeline},
    vfs::PackageVfs,
    ReadinessBroker, RecordingRestart,
};
use serde::Serialize;
use std::{path::PathBuf, process::ExitCode};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Exit status telling the launcher to restart the client.
pub const RESTART_EXIT_CODE: u8 = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum OutputFormat {
    Text,
    Json,
}

impl OutputFormat {
    fn parse(value: &str) -> Option<Self> {
        match value {
            "json" => Some(OutputFormat::Json),
            "text" => Some(OutputFormat::Text),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CliCommand {
    Run,
    Check,
    Paths,
    Help,
    Version,
}

#[derive(Debug, Default, PartialEq)]
struct Overrides {
    config: Option<PathBuf>,
    game_root: Option<PathBuf>,
    res_mods: Option<PathBuf>,
    original: Option<PathBuf>,
}

#[derive(Debug, PartialEq)]
struct CliArgs {
    command: CliCommand,
    format: OutputFormat,
    overrides: Overrides,
}

#[derive(Serialize)]
struct RunSummary<'a> {
    status: PassStatus,
    fragments: usize,
    items: usize,
    problems: Vec<String>,
    combined_path: &'a str,
}

#[derive(Serialize)]
struct CheckSummary {
    status: CheckStatus,
    problems: Vec<String>,
}

pub fn run() -> Result<ExitCode> {
    let args: Vec<String> = std::env::args().skip(1).collect();
    let cli = parse_args(&args)?;
    match cli.command {
        CliCommand::Help => {
            print_help();
            return Ok(ExitCode::SUCCESS);
        }
        CliCommand::Version => {
            println!("gameface-resmap v{}", env!("CARGO_PKG_VERSION"));
            return Ok(ExitCode::SUCCESS);
        }
        _ => {}
    }

    let config = load_config(&cli.overrides)?;
    let _guard = init_logging(&config)?;
    let paths = GamePaths::resolve(&config)?;

    match cli.command {
        CliCommand::Paths => {
            print_paths(&paths, cli.format)?;
            Ok(ExitCode::SUCCESS)
        }
        CliCommand::Check => run_check(&config, &paths, cli.format),
        _ => run_pass(&config, &paths, cli.format),
    }
}

fn run_pass(config: &ResMapConfig, paths: &GamePaths, format: OutputFormat) -> Result<ExitCode> {
    let vfs = PackageVfs::mount_dirs(&paths.vfs_dirs);
    let loader = FragmentLoader::new(&paths.game_root, &config.fragment_dir, Some(&vfs));
    let pipeline = ResMapPipeline::new(loader, paths.store(config));
    let broker = ReadinessBroker::new();
    let restart = RecordingRestart::new();

    let outcome = pipeline
        .run(&broker, &restart)
        .context("build res_map")?;
    let problems = problem_lines(outcome.diagnostics);

    match format {
        OutputFormat::Json => {
            let combined = paths.combined_path.to_string_lossy();
            let summary = RunSummary {
                status: outcome.status,
                fragments: outcome.fragment_count,
                items: outcome.item_count,
                problems,
                combined_path: &combined,
            };
            println!("{}", serde_json::to_string_pretty(&summary)?);
        }
        OutputFormat::Text => {
            println!(
                "{}: {} fragment(s), {} item(s)",
                outcome.status.label(),
                outcome.fragment_count,
                outcome.item_count
            );
            for problem in problems {
                println!("  ! {problem}");
            }
        }
    }

    if restart.requested() {
        Ok(ExitCode::from(RESTART_EXIT_CODE))
    } else {
        Ok(ExitCode::SUCCESS)
    }
}

fn run_check(config: &ResMapConfig, paths: &GamePaths, format: OutputFormat) -> Result<ExitCode> {
    let vfs = PackageVfs::mount_dirs(&paths.vfs_dirs);
    let loader = FragmentLoader::new(&paths.game_root, &config.fragment_dir, Some(&vfs));
    let pipeline = ResMapPipeline::new(loader, paths.store(config));
    let (status, diagnostics) = pipeline.check().context("check res_map")?;
    let problems = problem_lines(diagnostics);

    match format {
        OutputFormat::Json => {
            let summary = CheckSummary { status, problems };
            println!("{}", serde_json::to_string_pretty(&summary)?);
        }
        OutputFormat::Text => {
            let label = match status {
                CheckStatus::NoMods => "no mods",
                CheckStatus::NeedsRemoval => "stale res_map would be removed",
                CheckStatus::UpToDate => "up to date",
                CheckStatus::NeedsWrite => "res_map would be rewritten",
            };
            println!("{label}");
            for problem in problems {
                println!("  ! {problem}");
            }
        }
    }

    if status == CheckStatus::UpToDate || status == CheckStatus::NoMods {
        Ok(ExitCode::SUCCESS)
    } else {
        Ok(ExitCode::from(1))
    }
}

fn problem_lines(diagnostics: Diagnostics) -> Vec<String> {
    diagnostics
        .into_errors()
        .into_iter()
        .map(|err| err.to_string())
        .collect()
}

fn print_paths(paths: &GamePaths, format: OutputFormat) -> Result<()> {
    let rows = [
        ("game_root", &paths.game_root),
        ("res_mods", &paths.res_mods_dir),
        ("combined_res_map", &paths.combined_path),
        ("restart_flag", &paths.restart_flag),
        ("packages", &paths.package_dir),
    ];
    match format {
        OutputFormat::Json => {
            let map: serde_json::Map<String, serde_json::Value> = rows
                .iter()
                .map(|(key, path)| (key.to_string(), path.to_string_lossy().into()))
                .collect();
            println!("{}", serde_json::to_string_pretty(&map)?);
        }
        OutputFormat::Text => {
            for (key, path) in rows {
                println!("{key:<18}{}", path.display());
            }
        }
    }
    Ok(())
}

fn load_config(overrides: &Overrides) -> Result<ResMapConfig> {
    let mut config = match &overrides.config {
        Some(path) => ResMapConfig::load_or_create_at(path)?,
        None => ResMapConfig::load_or_create()?,
    };
    if let Some(root) = &overrides.game_root {
        config.game_root = root.clone();
    }
    if let Some(dir) = &overrides.res_mods {
        config.res_mods_dir = Some(dir.clone());
    }
    if let Some(path) = &overrides.original {
        config.original_override = Some(path.clone());
    }
    if config.game_root.as_os_str().is_empty() {
        config.game_root = std::env::current_dir().context("resolve current dir")?;
    }
    Ok(config)
}

fn init_logging(config: &ResMapConfig) -> Result<Option<WorkerGuard>> {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let stderr_layer = tracing_subscriber::fmt::layer().with_writer(std::io::stderr);

    if !config.log_to_file {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(stderr_layer)
            .init();
        return Ok(None);
    }

    let log_dir = base_data_dir()?.join("logs");
    std::fs::create_dir_all(&log_dir).context("create log dir")?;
    let appender = tracing_appender::rolling::never(&log_dir, "resmap.log");
    let (writer, guard) = tracing_appender::non_blocking(appender);
    let file_layer = tracing_subscriber::fmt::layer()
        .with_writer(writer)
        .with_ansi(false);
    tracing_subscriber::registry()
        .with(env_filter)
        .with(stderr_layer)
        .with(file_layer)
        .init();
    Ok(Some(guard))
}

fn parse_args(args: &[String]) -> Result<CliArgs> {
    let mut command = None;
    let mut format = OutputFormat::Text;
    let mut overrides = Overrides::default();
    let mut iter = args.iter();

    while let Some(arg) = iter.next() {
        let (flag, inline) = match arg.split_once('=') {
            Some((flag, value)) if flag.starts_with("--") => (flag, Some(value.to_string())),
            _ => (arg.as_str(), None),
        };
        let mut value = |name: &str| -> Result<String> {
            match inline.clone().or_else(|| iter.next().cloned()) {
                Some(value) => Ok(value),
                None => bail!("{name} requires a value"),
            }
        };
        match flag {
            "--format" => {
                let raw = value("--format")?;
                format = OutputFormat::parse(&raw)
                    .with_context(|| format!("unknown format: {raw} (use 'text' or 'json')"))?;
            }
            "--config" => overrides.config = Some(PathBuf::from(value("--config")?)),
            "--game-root" => overrides.game_root = Some(PathBuf::from(value("--game-root")?)),
            "--res-mods" => overrides.res_mods = Some(PathBuf::from(value("--res-mods")?)),
            "--original" => overrides.original = Some(PathBuf::from(value("--original")?)),
            "--help" | "-h" | "help" => command = Some(CliCommand::Help),
            "--version" | "-V" | "version" => command = Some(CliCommand::Version),
            "run" if command.is_none() => command = Some(CliCommand::Run),
            "check" if command.is_none() => command = Some(CliCommand::Check),
            "paths" if command.is_none() => command = Some(CliCommand::Paths),
            other => bail!("unknown argument: {other}"),
        }
    }

    Ok(CliArgs {
        command: command.unwrap_or(CliCommand::Run),
        format,
        overrides,
    })
}

fn print_help() {
    println!("gameface-resmap");
    println!("  run                 Merge mod res_map fragments (default)");
    println!("  check               Report whether the combined res_map is current");
    println!("  paths               Print resolved game paths");
    println!("  --game-root <path>  Game install directory (default: config or cwd)");
    println!("  --res-mods <path>   Override res_mods detection from paths.xml");
    println!("  --original <path>   Read the original res_map from a file");
    println!("  --config <path>     Use an alternate config file");
    println!("  --format text|json  Output format");
    println!();
    println!("Exit status {RESTART_EXIT_CODE} means the client must restart.");
}
