//! Cloudide - per-project sandbox containers behind an HTTP/WebSocket API.
//!
//! Usage:
//!   cloudide serve [--port 3000] [--projects-dir ./projects]

use clap::{Parser, Subcommand};
use cloudide::config::{self, SandboxConfig, ServerConfig};
use cloudide::docker::DockerRuntime;
use cloudide::http_server;
use cloudide::state::AppState;
use std::net::{IpAddr, SocketAddr};
use std::path::PathBuf;
use std::process::exit;
use std::sync::Arc;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "cloudide")]
#[command(about = "Containerized dev sandboxes with a browser terminal and editor")]
struct Args {
    #[command(subcommand)]
    command: Commands,

    /// Enable debug logging
    #[arg(short, long, global = true, env = "CLOUDIDE_VERBOSE")]
    verbose: bool,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Start the HTTP server
    Serve(ServeArgs),
}

#[derive(clap::Args, Debug)]
struct ServeArgs {
    /// Port to listen on
    #[arg(long, env = "CLOUDIDE_PORT", default_value_t = config::DEFAULT_PORT)]
    port: u16,

    /// Address to bind
    #[arg(long, env = "CLOUDIDE_BIND", default_value = "0.0.0.0")]
    bind: IpAddr,

    /// Host directory holding one workspace per project
    #[arg(long, env = "CLOUDIDE_PROJECTS_DIR", default_value = "./projects")]
    projects_dir: PathBuf,

    /// Image every sandbox container is created from
    #[arg(long, env = "CLOUDIDE_SANDBOX_IMAGE", default_value = config::DEFAULT_IMAGE)]
    image: String,

    /// Workspace mount point inside the container
    #[arg(long, env = "CLOUDIDE_APP_DIR", default_value = config::DEFAULT_APP_DIR)]
    app_dir: String,

    /// Dev-server port exposed by the container
    #[arg(long, env = "CLOUDIDE_DEV_SERVER_PORT", default_value_t = config::DEFAULT_DEV_SERVER_PORT)]
    dev_server_port: u16,

    /// User the container shell runs as
    #[arg(long, env = "CLOUDIDE_SANDBOX_USER", default_value = config::DEFAULT_USER)]
    user: String,

    /// Interactive shell started in the container
    #[arg(long, env = "CLOUDIDE_SHELL", default_value = config::DEFAULT_SHELL)]
    shell: String,

    /// Command run in a new workspace to scaffold the project
    #[arg(long, env = "CLOUDIDE_SCAFFOLD_COMMAND", default_value = config::DEFAULT_SCAFFOLD_COMMAND)]
    scaffold_command: String,
}

#[tokio::main]
async fn main() {
    let args = Args::parse();

    let default_filter = if args.verbose {
        "cloudide=debug,tower_http=debug"
    } else {
        "cloudide=info,tower_http=info"
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter)),
        )
        .init();

    match args.command {
        Commands::Serve(serve) => {
            if let Err(e) = run(serve).await {
                error!("{}", e);
                exit(1);
            }
        }
    }
}

async fn run(args: ServeArgs) -> Result<(), Box<dyn std::error::Error>> {
    let projects_dir = config::prepare_projects_dir(&args.projects_dir)
        .map_err(|e| format!("projects dir {}: {}", args.projects_dir.display(), e))?;
    info!(projects_dir = %projects_dir.display(), "Using projects directory");

    let server_config = ServerConfig {
        addr: SocketAddr::new(args.bind, args.port),
        sandbox: SandboxConfig {
            image: args.image,
            projects_dir,
            app_dir: args.app_dir,
            dev_server_port: args.dev_server_port,
            user: args.user,
            shell: args.shell,
            ..Default::default()
        },
        scaffold_command: args.scaffold_command,
    };

    let runtime = DockerRuntime::connect()?;
    if let Err(e) = runtime.ping().await {
        warn!(error = %e, "Container engine is not reachable; terminals will fail until it is");
    }

    let state = AppState::new(server_config, Arc::new(runtime));
    http_server::run_server(state).await?;
    info!("Server stopped");
    Ok(())
}
