mod pull;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use ocisync_client::{
    DEFAULT_MAX_CONCURRENCY, DEFAULT_TOKEN_ENV, EnvCredentials, HttpRegistry, Registry,
    RegistryEndpoint, RepositoryRef, TagLister,
};
use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::{EnvFilter, fmt};

#[derive(Parser)]
#[command(name = "ocisync")]
#[command(version, about = "Pull OCI artifacts by tag into a local content store", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List the tags of a repository
    Tags(TagsArgs),

    /// Resolve a tag to the descriptor it points at
    Resolve(ResolveArgs),

    /// Copy everything a tag references into a local store
    Pull(PullArgs),
}

/// Where the repository lives and how to authenticate.
#[derive(Args)]
struct RemoteArgs {
    /// Repository, e.g. ghcr.io/owner/repo (host optional with --registry)
    #[arg(value_name = "REPO")]
    repo: String,

    /// Registry host or URL (default: host part of REPO)
    #[arg(long, env = "OCISYNC_REGISTRY", value_name = "HOST|URL")]
    registry: Option<String>,

    /// Environment variable holding the bearer token
    #[arg(long, env = "OCISYNC_TOKEN_ENV", default_value = DEFAULT_TOKEN_ENV, value_name = "VAR")]
    token_env: String,
}

#[derive(Parser)]
struct TagsArgs {
    #[command(flatten)]
    remote: RemoteArgs,

    /// Print tags as a JSON array
    #[arg(long)]
    json: bool,
}

#[derive(Parser)]
struct ResolveArgs {
    #[command(flatten)]
    remote: RemoteArgs,

    /// Tag to resolve
    #[arg(value_name = "TAG")]
    tag: String,

    /// Print the manifest itself instead of its descriptor
    #[arg(long)]
    content: bool,
}

#[derive(Parser)]
struct PullArgs {
    #[command(flatten)]
    remote: RemoteArgs,

    /// Tag to pull
    #[arg(value_name = "TAG")]
    tag: String,

    /// Root directory of the local content store
    #[arg(long, env = "OCISYNC_STORE", value_name = "DIR")]
    store: PathBuf,

    /// Maximum number of concurrent fetches
    #[arg(long, default_value_t = DEFAULT_MAX_CONCURRENCY, value_name = "N")]
    concurrency: usize,

    /// Give up after this many seconds
    #[arg(long, value_name = "SECS")]
    timeout: Option<u64>,

    /// Print the copy report as JSON on stdout
    #[arg(long)]
    json: bool,
}

fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    init_tracing();
    let cli = Cli::parse();

    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?
        .block_on(async {
            match cli.command {
                Commands::Tags(args) => tags(args).await,
                Commands::Resolve(args) => resolve(args).await,
                Commands::Pull(args) => pull::pull(args).await,
            }
        })
}

/// Build the registry client for `remote` and the repository it names.
fn connect(remote: &RemoteArgs) -> Result<(HttpRegistry, RepositoryRef)> {
    let (endpoint, repo) = match &remote.registry {
        Some(registry) => {
            let endpoint = RegistryEndpoint::parse(registry)?;
            let repo = RepositoryRef::parse(&remote.repo, Some(&endpoint.registry))?;
            (endpoint, repo)
        }
        None => {
            let repo = RepositoryRef::parse(&remote.repo, None)?;
            (RegistryEndpoint::parse(repo.host())?, repo)
        }
    };
    tracing::debug!(registry = %endpoint.base_url, %repo, "connecting");

    let credentials = Arc::new(EnvCredentials::new(&remote.token_env));
    let registry = HttpRegistry::new(endpoint, credentials)?;
    Ok((registry, repo))
}

async fn tags(args: TagsArgs) -> Result<()> {
    tracing::debug!("executing tags command");

    let (registry, repo) = connect(&args.remote)?;
    let tags = TagLister::new(Arc::new(registry))
        .list(&repo)
        .await
        .with_context(|| format!("failed to list tags of {repo}"))?;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&tags)?);
    } else {
        for tag in &tags {
            println!("{tag}");
        }
    }
    Ok(())
}

async fn resolve(args: ResolveArgs) -> Result<()> {
    tracing::debug!("executing resolve command");

    let (registry, repo) = connect(&args.remote)?;
    let reference = repo.with_tag(&args.tag);

    if args.content {
        let (descriptor, bytes) = registry
            .fetch_manifest(&repo, &args.tag)
            .await
            .with_context(|| format!("failed to fetch manifest of {reference}"))?;
        eprintln!("Resolved: {reference} -> {}", descriptor.digest);
        let mut stdout = std::io::stdout();
        stdout
            .write_all(&bytes)
            .and_then(|()| stdout.flush())
            .context("failed to write to stdout")?;
    } else {
        let descriptor = registry
            .resolve_tag(&repo, &args.tag)
            .await
            .with_context(|| format!("failed to resolve {reference}"))?;
        println!("{}", serde_json::to_string_pretty(&descriptor)?);
    }
    Ok(())
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .compact()
        .init();
}
