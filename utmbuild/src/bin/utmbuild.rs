//! utmbuild command-line entry point.

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;
use utmbuild::context::CancelFlag;
use utmbuild::executor::SystemRunner;
use utmbuild::logging::{LoggingOptions, init_logging};
use utmbuild::ui::TracingUi;
use utmbuild::{BuildConfig, BuildError, BuildResult, Builder, Driver};

#[derive(Parser, Debug)]
#[command(name = "utmbuild", version, about = "Build UTM virtual machine images")]
struct Cli {
    /// Also write logs to a daily file in this directory.
    #[arg(long, global = true)]
    log_dir: Option<PathBuf>,
    /// Default log filter when RUST_LOG is unset.
    #[arg(long, global = true, default_value = "info")]
    log_level: String,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run a build described by a JSON configuration file.
    Build {
        #[arg(long, short)]
        config: PathBuf,
    },
    /// Print the installed UTM version and the driver selected for it.
    Version,
    /// Run one bundled control script, e.g. `script remove_drive <vm> <drive>`.
    Script {
        name: String,
        args: Vec<String>,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let _guard = match init_logging(&LoggingOptions {
        default_directive: Some(cli.log_level.clone()),
        log_dir: cli.log_dir.clone(),
    }) {
        Ok(guard) => guard,
        Err(e) => {
            eprintln!("utmbuild: {}", e);
            return ExitCode::FAILURE;
        }
    };

    match run(cli.command).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(BuildError::Cancelled) => {
            tracing::warn!("Build was cancelled");
            ExitCode::from(130)
        }
        Err(e) => {
            tracing::error!(error = %e, "utmbuild failed");
            ExitCode::FAILURE
        }
    }
}

async fn run(command: Commands) -> BuildResult<()> {
    match command {
        Commands::Build { config } => build(config).await,
        Commands::Version => {
            let driver = Driver::detect(Arc::new(SystemRunner::new())).await?;
            let version = driver.version().await?;
            println!("UTM {} (driver {})", version, driver.kind());
            Ok(())
        }
        Commands::Script { name, args } => {
            let driver = Driver::detect(Arc::new(SystemRunner::new())).await?;
            let argv: Vec<String> = std::iter::once(name).chain(args).collect();
            let output = driver.execute_script(&argv).await?;
            if !output.is_empty() {
                println!("{}", output);
            }
            Ok(())
        }
    }
}

async fn build(path: PathBuf) -> BuildResult<()> {
    let config = BuildConfig::from_file(&path)?;
    let runner = SystemRunner::new().with_timeout(config.command_timeout_secs.map(Duration::from_secs));
    let driver = Arc::new(Driver::detect(Arc::new(runner)).await?);

    let cancel = CancelFlag::new();
    let on_signal = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("Interrupt received, cancelling after the current step");
            on_signal.cancel();
        }
    });

    let artifact = Builder::new(config, driver, Arc::new(TracingUi))?
        .with_cancel(cancel)
        .run()
        .await?;

    tracing::info!(
        vm_id = %artifact.vm_id,
        vm_name = %artifact.vm_name,
        total_ms = artifact.metrics.total_duration_ms,
        "Build complete"
    );
    match &artifact.export_path {
        Some(path) => println!("{}", path.display()),
        None => println!("{}", artifact.vm_name),
    }
    Ok(())
}
