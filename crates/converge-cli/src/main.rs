//! Converge CLI - apply Kubernetes manifests one resource at a time

use clap::{Parser, Subcommand};
use converge_kube::PowerState;
use std::path::PathBuf;
use std::process::ExitCode;
use tracing::level_filters::LevelFilter;
use tracing_subscriber::EnvFilter;

mod commands;
mod context;
mod display;
mod error;
mod exit_codes;

use commands::apply::Mode;
use commands::provision::{Notification, parse_credential};
use context::{Context, GlobalArgs};
use display::OutputFormat;
use error::Result;

#[derive(Parser)]
#[command(name = "converge")]
#[command(author = "Converge Contributors")]
#[command(version)]
#[command(about = "Apply Kubernetes manifests one resource at a time", long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    #[command(flatten)]
    global: GlobalArgs,
}

#[derive(Subcommand)]
enum Commands {
    /// Create the resource or patch it to match the manifest
    Apply {
        /// Manifest holding exactly one resource (`-` for stdin)
        #[arg(short = 'f', long = "filename")]
        file: PathBuf,
    },

    /// Create the resource unless it already exists
    Create {
        /// Manifest holding exactly one resource (`-` for stdin)
        #[arg(short = 'f', long = "filename")]
        file: PathBuf,
    },

    /// Create the resource, or always patch it when it exists
    CreateOrUpdate {
        /// Manifest holding exactly one resource (`-` for stdin)
        #[arg(short = 'f', long = "filename")]
        file: PathBuf,
    },

    /// Delete a resource; succeeds when it is already gone
    Delete {
        /// API version, e.g. `v1` or `apps/v1`
        api_version: String,

        /// Kind, e.g. `ConfigMap`
        kind: String,

        /// Resource name
        name: String,
    },

    /// Patch a resource in place
    Patch {
        /// Kind, plural, singular or short name
        kind: String,

        /// Resource name
        name: String,

        /// API version of the kind
        #[arg(long, default_value = "v1")]
        api_version: String,

        /// Patch document (YAML or JSON)
        #[arg(short, long, conflicts_with = "patch_file")]
        patch: Option<String>,

        /// File holding the patch document
        #[arg(long)]
        patch_file: Option<PathBuf>,

        /// Patch type: strategic, merge or json
        #[arg(long = "type", default_value = "strategic")]
        patch_type: String,
    },

    /// Resolve the identity of a manifest
    Info {
        /// Manifest holding exactly one resource (`-` for stdin)
        #[arg(short = 'f', long = "filename")]
        file: PathBuf,

        /// Output format
        #[arg(short, long, value_enum, default_value_t = OutputFormat::Text)]
        output: OutputFormat,
    },

    /// Hibernate a Hive cluster
    Sleep {
        /// ClusterDeployment name
        cluster_id: String,
    },

    /// Resume a hibernating Hive cluster
    Wake {
        /// ClusterDeployment name
        cluster_id: String,
    },

    /// Apply every resource in the given files, then send a notification
    Provision {
        /// Manifest files; documents are applied one by one
        #[arg(required = true)]
        files: Vec<PathBuf>,

        /// Cluster console URL for the notification
        #[arg(long)]
        console_url: Option<String>,

        /// Company name for the notification
        #[arg(long)]
        company: Option<String>,

        /// Cluster identifier for the notification
        #[arg(long)]
        cluster_id: Option<String>,

        /// Timezone of the requester
        #[arg(long)]
        timezone: Option<String>,

        /// Credential link as NAME=URL (repeatable)
        #[arg(long = "credential", value_parser = parse_credential)]
        credentials: Vec<(String, String)>,
    },
}

fn init_tracing(debug: bool) {
    let default = if debug { LevelFilter::DEBUG } else { LevelFilter::WARN };
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            EnvFilter::builder()
                .with_default_directive(default.into())
                .from_env_lossy(),
        )
        .init();
}

async fn run(cli: Cli) -> Result<()> {
    let context = Context::new(&cli.global)?;
    let namespace = cli.global.namespace.as_deref();

    let outcome = match cli.command {
        Commands::Apply { file } => commands::apply::run(&context, &file, Mode::Apply).await,
        Commands::Create { file } => commands::apply::run(&context, &file, Mode::Create).await,
        Commands::CreateOrUpdate { file } => {
            commands::apply::run(&context, &file, Mode::CreateOrUpdate).await
        }

        Commands::Delete {
            api_version,
            kind,
            name,
        } => commands::delete::run(&context, &api_version, &kind, &name, namespace).await,

        Commands::Patch {
            kind,
            name,
            api_version,
            patch,
            patch_file,
            patch_type,
        } => {
            commands::patch::run(
                &context,
                &kind,
                &name,
                &api_version,
                namespace,
                patch.as_deref(),
                patch_file.as_deref(),
                &patch_type,
            )
            .await
        }

        Commands::Info { file, output } => commands::info::run(&context, &file, output).await,

        Commands::Sleep { cluster_id } => {
            commands::power::run(&context, &cluster_id, namespace, PowerState::Hibernating).await
        }
        Commands::Wake { cluster_id } => {
            commands::power::run(&context, &cluster_id, namespace, PowerState::Running).await
        }

        Commands::Provision {
            files,
            console_url,
            company,
            cluster_id,
            timezone,
            credentials,
        } => {
            let notification = Notification {
                console_url,
                company,
                cluster_id,
                timezone,
                credentials,
            };
            commands::provision::run(&context, &files, &notification).await
        }
    };

    context.report_metrics();
    outcome
}

#[tokio::main]
async fn main() -> ExitCode {
    // Setup miette for nice error display
    miette::set_panic_hook();

    let cli = Cli::parse();
    init_tracing(cli.global.debug);

    match run(cli).await {
        Ok(()) => ExitCode::from(exit_codes::SUCCESS),
        Err(err) => {
            let code = err.exit_code();
            eprintln!("{:?}", miette::Report::new(err));
            ExitCode::from(code)
        }
    }
}
