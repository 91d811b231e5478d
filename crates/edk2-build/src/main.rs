use clap::Parser;
use std::path::PathBuf;
use std::process::ExitCode;

use edk2_build::config::{self, BuildMatrix, DEFAULT_CONFIG_FILE};
use edk2_build::context::{PackagingIdentity, RunContext};
use edk2_build::driver::{self, Filters};
use edk2_build::executor::{StdoutSink, SystemRunner};
use edk2_build::workspace::WorkspacePaths;
use edk2_build::{Error, Result, builder, environment, rebase};
use tracing_subscriber::EnvFilter;

/// edk2 build helper: runs the builds described in a config file
#[derive(Debug, Parser)]
#[command(name = "edk2-build", author, version, about)]
struct Args {
    /// Read configuration from FILE
    #[arg(short = 'c', long = "config", value_name = "FILE", default_value = DEFAULT_CONFIG_FILE)]
    config: PathBuf,
    /// Change to DIR before building
    #[arg(short = 'C', long, value_name = "DIR")]
    directory: Option<PathBuf>,
    /// Allow up to JOBS parallel build jobs (0 = use CPU count)
    #[arg(short = 'j', long, value_name = "JOBS")]
    jobs: Option<usize>,
    /// Only run builds matching INCLUDE (substring)
    #[arg(short = 'm', long = "match", value_name = "INCLUDE")]
    include: Option<String>,
    /// Skip builds matching EXCLUDE (substring)
    #[arg(short = 'x', long, value_name = "EXCLUDE")]
    exclude: Option<String>,
    /// List build configs available
    #[arg(short = 'l', long)]
    list: bool,
    /// Write build output to logfiles, write to console only on errors
    #[arg(long)]
    silent: bool,
    /// Location of the core edk2 repository (where BaseTools are located)
    #[arg(long, value_name = "DIR")]
    core: Option<String>,
    /// Location(s) of additional packages (can be specified multiple times)
    #[arg(long = "pkg", visible_alias = "package", value_name = "DIR")]
    pkgs: Vec<String>,
    /// Set firmware build version
    #[arg(long, value_name = "VERSION")]
    version_override: Option<String>,
    /// Set firmware build release date (in MM/DD/YYYY format)
    #[arg(long, value_name = "DATE")]
    release_date: Option<String>,
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .without_time()
        .init();

    let args = Args::parse();
    match run(args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("ERROR: {e}");
            let code = u8::try_from(e.exit_code())
                .ok()
                .filter(|c| *c != 0)
                .unwrap_or(1);
            ExitCode::from(code)
        }
    }
}

fn run(args: Args) -> Result<()> {
    if let Some(dir) = args.directory.as_ref() {
        std::env::set_current_dir(dir).map_err(|e| {
            Error::msg(format!("failed to change directory to {}: {e}", dir.display()))
        })?;
    }

    let mut doc = config::load(&args.config)?;
    let sink = StdoutSink::from_env();

    if args.list {
        driver::list_builds(&doc, &sink);
        return Ok(());
    }

    if let Some(core) = args.core {
        doc.set("global", "core", core);
    }
    if !args.pkgs.is_empty() {
        doc.set("global", "pkgs", args.pkgs.join(" "));
    }
    let matrix = BuildMatrix::from_doc(&doc)?;

    let workspace = std::env::current_dir()
        .map_err(|e| Error::msg(format!("cwd error: {e}")))?;
    let rebase = rebase::detect_rebase_state(&workspace)?;
    let mut ctx = RunContext::new(workspace, rebase, args.version_override);
    ctx.version.release_date = args.release_date;
    ctx.packaging = PackagingIdentity::from_env();
    ctx.jobs = args
        .jobs
        .map(|j| if j == 0 { num_cpus::get().max(1) } else { j });
    ctx.silent = args.silent;

    let paths = WorkspacePaths::resolve(&ctx.workspace, &matrix.global);
    let runner = SystemRunner;
    environment::prepare(&ctx, &paths, &runner, &sink)?;
    builder::build_basetools(&ctx, &paths, &runner, &sink)?;

    let filters = Filters {
        include: args.include,
        exclude: args.exclude,
    };
    driver::run_matrix(&ctx, &paths, &matrix, &filters, &runner, &sink)?;
    Ok(())
}
