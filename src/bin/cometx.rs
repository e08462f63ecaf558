use std::process::ExitCode;

use camino::Utf8PathBuf;
use clap::{Args, Parser, Subcommand};
use miette::IntoDiagnostic;
use tracing_subscriber::EnvFilter;

use cometx::app::{
    App, Confirmer, CopyOptions, CopyResult, DeleteAssetsResult, DownloadOptions, DownloadResult,
    ListResult, LogOptions, LogResult, ProgressSink, ReproduceOptions, ReproduceResult,
    ResourceFailure,
};
use cometx::comet::CometHttpClient;
use cometx::config::{ConfigLoader, ResolvedConfig};
use cometx::domain::{CometPath, Identifier, KeyValue, LogType, ResourceName};
use cometx::error::CometxError;
use cometx::output::{ConsoleSink, JsonOutput, OutputMode};

#[derive(Parser)]
#[command(name = "cometx")]
#[command(about = "List, download, copy, log and delete experiment data on Comet")]
#[command(version)]
struct Cli {
    /// Print JSON results on stdout and never prompt.
    #[arg(long, global = true)]
    non_interactive: bool,

    /// JSON config file with api_key, url_override, workspace and user.
    #[arg(long, global = true)]
    config: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    #[command(about = "List workspaces, projects, experiments, artifacts or models")]
    List(ListArgs),
    #[command(about = "Download experiment data into a local mirror")]
    Download(DownloadArgs),
    #[command(about = "Copy mirrored experiments into a workspace or project")]
    Copy(CopyArgs),
    #[command(about = "Log files or values into an experiment")]
    Log(LogArgs),
    #[command(about = "Delete assets of a type from matching experiments")]
    DeleteAssets(DeleteAssetsArgs),
    #[command(about = "Recreate the code and git state of an experiment")]
    Reproduce(ReproduceArgs),
}

#[derive(Args)]
struct ListArgs {
    /// WORKSPACE[/PROJECT[/EXPERIMENT]] or WORKSPACE/artifacts, WORKSPACE/model-registry
    path: Option<String>,
}

#[derive(Args)]
struct DownloadArgs {
    path: Option<String>,

    #[arg(value_enum)]
    resources: Vec<ResourceName>,

    #[arg(long, default_value = ".")]
    output: String,

    #[arg(long, value_enum, value_delimiter = ',')]
    ignore: Vec<ResourceName>,

    #[arg(long)]
    flat: bool,

    #[arg(long)]
    use_name: bool,

    #[arg(long)]
    overwrite: bool,

    #[arg(long)]
    force: bool,
}

#[derive(Args)]
struct CopyArgs {
    source: String,

    destination: String,

    #[arg(long)]
    symlink: bool,

    #[arg(long, value_enum, value_delimiter = ',')]
    ignore: Vec<ResourceName>,

    /// Root of the local mirror holding the source.
    #[arg(long, default_value = ".")]
    root: String,
}

#[derive(Args)]
struct LogArgs {
    path: Option<String>,

    filename: Option<String>,

    #[arg(long = "type", value_enum)]
    log_type: Option<LogType>,

    #[arg(long)]
    set: Vec<String>,
}

#[derive(Args)]
struct DeleteAssetsArgs {
    path: String,

    /// Asset type to delete, or `all`.
    #[arg(long = "type")]
    asset_type: String,

    #[arg(long)]
    force: bool,
}

#[derive(Args)]
struct ReproduceArgs {
    path: String,

    output_dir: String,

    #[arg(long)]
    run: bool,

    #[arg(long, default_value = "python")]
    executable: String,
}

fn main() -> ExitCode {
    if let Err(report) = run() {
        eprintln!("{report:?}");
        if let Some(err) = report.downcast_ref::<CometxError>() {
            return ExitCode::from(map_exit_code(err));
        }
        return ExitCode::from(1);
    }
    ExitCode::SUCCESS
}

fn map_exit_code(error: &CometxError) -> u8 {
    match error {
        CometxError::InvalidPath { .. }
        | CometxError::IncompatibleScope { .. }
        | CometxError::MissingApiKey
        | CometxError::MissingWorkspace
        | CometxError::ConfigRead(_)
        | CometxError::ConfigParse(_)
        | CometxError::InvalidResource(_)
        | CometxError::InvalidSet(_)
        | CometxError::InvalidLogRequest(_)
        | CometxError::MalformedRecord { .. }
        | CometxError::ConfirmationRequired => 2,
        CometxError::Authentication { .. }
        | CometxError::Http(_)
        | CometxError::Status { .. }
        | CometxError::NotFound(_)
        | CometxError::ResourceFetch { .. } => 3,
        _ => 1,
    }
}

fn run() -> miette::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let output_mode = if cli.non_interactive {
        OutputMode::NonInteractive
    } else {
        OutputMode::Interactive
    };

    let config = ConfigLoader::resolve(cli.config.as_deref())?;
    let client = CometHttpClient::new(&config)?;
    tracing::debug!(server = %config.server_url, "resolved configuration");
    let app = App::new(client, config.workspace.clone());

    match cli.command {
        Commands::List(args) => run_list(args, &app, output_mode),
        Commands::Download(args) => run_download(args, &app, &config, output_mode),
        Commands::Copy(args) => run_copy(args, &app, output_mode),
        Commands::Log(args) => run_log(args, &app, output_mode),
        Commands::DeleteAssets(args) => run_delete_assets(args, &app, output_mode),
        Commands::Reproduce(args) => run_reproduce(args, &app, output_mode),
    }
}

fn parse_scope(value: &str) -> Result<Identifier, CometxError> {
    value.parse::<CometPath>()?.into_scope(value)
}

/// Runs `op` with the sink and confirmer that fit the output mode.
fn with_sink<T, F>(output_mode: OutputMode, op: F) -> miette::Result<T>
where
    F: FnOnce(&dyn ProgressSink, Option<&dyn Confirmer>) -> Result<T, CometxError>,
{
    match output_mode {
        OutputMode::NonInteractive => Ok(op(&JsonOutput, None)?),
        OutputMode::Interactive => {
            let sink = ConsoleSink::new();
            let result = op(&sink, Some(&sink));
            sink.finish();
            Ok(result?)
        }
    }
}

fn run_list(
    args: ListArgs,
    app: &App<CometHttpClient>,
    output_mode: OutputMode,
) -> miette::Result<()> {
    let path = args
        .path
        .as_deref()
        .map(str::parse::<CometPath>)
        .transpose()?;
    let result = with_sink(output_mode, |sink, _| app.list(path.as_ref(), sink))?;
    match output_mode {
        OutputMode::NonInteractive => JsonOutput::print(&result).into_diagnostic(),
        OutputMode::Interactive => {
            print_list(&result);
            Ok(())
        }
    }
}

fn run_download(
    args: DownloadArgs,
    app: &App<CometHttpClient>,
    config: &ResolvedConfig,
    output_mode: OutputMode,
) -> miette::Result<()> {
    let path = match args.path.as_deref() {
        Some(value) => value.parse::<CometPath>()?,
        None => CometPath::Scope(Identifier::workspace(&config.workspace_or(None)?)),
    };
    let options = DownloadOptions {
        output: Utf8PathBuf::from(args.output),
        resources: args.resources,
        ignore: args.ignore,
        flat: args.flat,
        use_name: args.use_name,
        overwrite: args.overwrite,
        force: args.force,
    };
    let result = with_sink(output_mode, |sink, confirmer| {
        app.download(&path, &options, sink, confirmer)
    })?;
    match output_mode {
        OutputMode::NonInteractive => JsonOutput::print(&result).into_diagnostic(),
        OutputMode::Interactive => {
            print_download_summary(&result);
            Ok(())
        }
    }
}

fn run_copy(
    args: CopyArgs,
    app: &App<CometHttpClient>,
    output_mode: OutputMode,
) -> miette::Result<()> {
    let source = parse_scope(&args.source)?;
    let destination = parse_scope(&args.destination)?;
    let options = CopyOptions {
        symlink: args.symlink,
        ignore: args.ignore,
        root: Utf8PathBuf::from(args.root),
    };
    let result = with_sink(output_mode, |sink, _| {
        app.copy(&source, &destination, &options, sink)
    })?;
    match output_mode {
        OutputMode::NonInteractive => JsonOutput::print(&result).into_diagnostic(),
        OutputMode::Interactive => {
            print_copy_summary(&result);
            Ok(())
        }
    }
}

fn run_log(
    args: LogArgs,
    app: &App<CometHttpClient>,
    output_mode: OutputMode,
) -> miette::Result<()> {
    let path = args.path.as_deref().map(parse_scope).transpose()?;
    let set = args
        .set
        .iter()
        .map(|value| value.parse::<KeyValue>())
        .collect::<Result<Vec<_>, _>>()?;
    let options = LogOptions {
        file: args.filename.map(Utf8PathBuf::from),
        log_type: args.log_type,
        set,
    };
    let result = with_sink(output_mode, |sink, _| app.log(path.as_ref(), &options, sink))?;
    match output_mode {
        OutputMode::NonInteractive => JsonOutput::print(&result).into_diagnostic(),
        OutputMode::Interactive => {
            print_log_summary(&result);
            Ok(())
        }
    }
}

fn run_delete_assets(
    args: DeleteAssetsArgs,
    app: &App<CometHttpClient>,
    output_mode: OutputMode,
) -> miette::Result<()> {
    let scope = parse_scope(&args.path)?;
    let result = with_sink(output_mode, |sink, confirmer| {
        app.delete_assets(&scope, &args.asset_type, args.force, sink, confirmer)
    })?;
    match output_mode {
        OutputMode::NonInteractive => JsonOutput::print(&result).into_diagnostic(),
        OutputMode::Interactive => {
            print_delete_summary(&result);
            Ok(())
        }
    }
}

fn run_reproduce(
    args: ReproduceArgs,
    app: &App<CometHttpClient>,
    output_mode: OutputMode,
) -> miette::Result<()> {
    let scope = parse_scope(&args.path)?;
    let options = ReproduceOptions {
        output: Utf8PathBuf::from(args.output_dir),
        run: args.run,
        executable: args.executable,
    };
    let result = with_sink(output_mode, |sink, _| app.reproduce(&scope, &options, sink))?;
    match output_mode {
        OutputMode::NonInteractive => JsonOutput::print(&result).into_diagnostic(),
        OutputMode::Interactive => {
            print_reproduce_summary(&result);
            Ok(())
        }
    }
}

const GREEN: &str = "\x1b[32m";
const YELLOW: &str = "\x1b[33m";
const CYAN: &str = "\x1b[36m";
const RESET: &str = "\x1b[0m";

fn print_failures(failures: &[ResourceFailure]) {
    if failures.is_empty() {
        return;
    }
    println!("{YELLOW}Failures: {}{RESET}", failures.len());
    for failure in failures {
        println!(
            "{YELLOW}  {} {}: {}{RESET}",
            failure.experiment, failure.resource, failure.message
        );
    }
}

fn print_list(result: &ListResult) {
    println!("{CYAN}{} {}{RESET}", result.items.len(), result.kind);
    for item in &result.items {
        let mut line = item.name.clone();
        if let Some(key) = item.key.as_deref().filter(|key| *key != item.name) {
            line.push_str(&format!(" ({key})"));
        }
        if let Some(description) = &item.description {
            line.push_str(&format!(" - {description}"));
        }
        if !item.versions.is_empty() {
            line.push_str(&format!(" [{}]", item.versions.join(", ")));
        }
        println!("  {line}");
    }
}

fn print_download_summary(result: &DownloadResult) {
    println!("{CYAN}Downloaded into {}{RESET}", result.root);
    println!(
        "{GREEN}{} experiment(s), {} file(s) written, {} kept{RESET}",
        result.experiments.len(),
        result.written,
        result.skipped
    );
    for experiment in &result.experiments {
        println!("  {} -> {}", experiment.experiment_key, experiment.folder);
    }
    for registry in &result.registries {
        println!(
            "  {} {}/{} -> {}",
            registry.kind, registry.name, registry.version, registry.path
        );
    }
    print_failures(&result.failures);
}

fn print_copy_summary(result: &CopyResult) {
    let verb = if result.symlink { "Linked" } else { "Copied" };
    println!(
        "{GREEN}{verb} {} experiment(s) from {} to {}{RESET}",
        result.experiments.len(),
        result.source,
        result.destination
    );
    for project in &result.created_projects {
        println!("  created project {project}");
    }
    for experiment in &result.experiments {
        println!(
            "  {} -> {}/{}",
            experiment.source, experiment.destination_project, experiment.destination_key
        );
    }
    print_failures(&result.failures);
}

fn print_log_summary(result: &LogResult) {
    println!(
        "{GREEN}Logged {} item(s) of type {} into {}{RESET}",
        result.logged,
        result.log_type,
        result.experiments.join(", ")
    );
    print_failures(&result.failures);
}

fn print_delete_summary(result: &DeleteAssetsResult) {
    println!(
        "{GREEN}Deleted {} {} asset(s) across {} experiment(s){RESET}",
        result.deleted, result.asset_type, result.experiments
    );
    print_failures(&result.failures);
}

fn print_reproduce_summary(result: &ReproduceResult) {
    println!(
        "{GREEN}Reproduced {} into {}{RESET}",
        result.experiment_key, result.output_dir
    );
    println!("  script: {}", result.script);
    if result.ran {
        println!("  script finished successfully");
    }
    print_failures(&result.failures);
}
