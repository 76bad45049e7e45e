use anyhow::{bail, Context, Result};
use clap::{Args as ClapArgs, Parser, Subcommand, ValueEnum};
use cloudnet::azure::AzureHandlers;
use cloudnet::gcp::GcpHandlers;
use cloudnet::model::{SecurityGroupScope, SubnetScope, VpcScope};
use cloudnet::ncp::NcpHandlers;
use cloudnet::{
    Config, Credential, HandlerSet, ListQuery, MemoryCache, NetworkService, Provider,
    ProviderRegistry, RequestContext, ResourceCache, SortOrder,
};
use serde::Serialize;
use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::Level;
use tracing_subscriber::fmt::writer::MakeWriterExt;
use tracing_subscriber::EnvFilter;

/// Version injected at compile time via CLOUDNET_VERSION env var (set by CI/CD),
/// or "dev" for local builds.
pub const VERSION: &str = match option_env!("CLOUDNET_VERSION") {
    Some(v) => v,
    None => "dev",
};

/// Cloud network control plane
#[derive(Parser, Debug)]
#[command(name = "cloudnet", version, about, long_about = None)]
struct Args {
    /// Provider of the credential (aws, gcp, azure, ncp)
    #[arg(short, long)]
    provider: Option<String>,

    /// JSON file holding the provider secrets
    #[arg(short, long)]
    credential: Option<PathBuf>,

    /// Log level for debugging
    #[arg(long, value_enum, default_value = "off")]
    log_level: LogLevel,

    /// Output format
    #[arg(short, long, value_enum, default_value = "json")]
    output: OutputFormat,

    /// Run in read-only mode (block all write operations)
    #[arg(long)]
    readonly: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// List VPCs
    Vpcs {
        #[command(flatten)]
        location: Location,
        #[command(flatten)]
        list: ListArgs,
    },
    /// Show one VPC
    Vpc {
        id: String,
        #[command(flatten)]
        location: Location,
    },
    /// List the subnets of a VPC
    Subnets {
        #[arg(long)]
        vpc: String,
        #[command(flatten)]
        location: Location,
        #[command(flatten)]
        list: ListArgs,
    },
    /// List security groups
    SecurityGroups {
        #[arg(long)]
        vpc: Option<String>,
        #[command(flatten)]
        location: Location,
        #[command(flatten)]
        list: ListArgs,
    },
    /// Delete a VPC with its dependent resources
    DeleteVpc {
        id: String,
        #[command(flatten)]
        location: Location,
    },
    /// Show the providers this build can serve
    Providers,
}

#[derive(ClapArgs, Debug)]
struct Location {
    #[arg(short, long, default_value = "")]
    region: String,

    /// Azure resource group
    #[arg(long)]
    resource_group: Option<String>,
}

#[derive(ClapArgs, Debug)]
struct ListArgs {
    #[arg(short, long, default_value = "")]
    search: String,

    #[arg(long, default_value = "")]
    sort_by: String,

    #[arg(long, default_value = "asc")]
    order: String,

    #[arg(long, default_value_t = 1)]
    page: u32,

    #[arg(long, default_value_t = 0)]
    limit: u32,
}

impl ListArgs {
    fn query(&self) -> ListQuery {
        ListQuery::new()
            .search(&self.search)
            .sort(&self.sort_by, SortOrder::from_str(&self.order))
            .page(self.page, self.limit)
    }
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum LogLevel {
    Off,
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl LogLevel {
    fn to_tracing_level(self) -> Option<Level> {
        match self {
            LogLevel::Off => None,
            LogLevel::Error => Some(Level::ERROR),
            LogLevel::Warn => Some(Level::WARN),
            LogLevel::Info => Some(Level::INFO),
            LogLevel::Debug => Some(Level::DEBUG),
            LogLevel::Trace => Some(Level::TRACE),
        }
    }
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum OutputFormat {
    Json,
    Yaml,
}

fn setup_logging(level: LogLevel) -> Result<Option<tracing_appender::non_blocking::WorkerGuard>> {
    let Some(tracing_level) = level.to_tracing_level() else {
        return Ok(None);
    };

    let log_path = get_log_path();

    if let Some(parent) = log_path.parent() {
        let _ = std::fs::create_dir_all(parent);
    }

    let file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(&log_path)
        .with_context(|| format!("Failed to open log file {}", log_path.display()))?;

    let (non_blocking, guard) = tracing_appender::non_blocking(file);

    // RUST_LOG narrows per target, the flag caps everything
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(tracing_level.as_str().to_lowercase()));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(non_blocking.with_max_level(tracing_level))
        .with_ansi(false)
        .with_target(true)
        .with_thread_ids(false)
        .with_file(true)
        .with_line_number(true)
        .init();

    tracing::info!("cloudnet {} started with log level: {:?}", VERSION, level);
    tracing::info!("Log file: {:?}", log_path);

    Ok(Some(guard))
}

fn get_log_path() -> PathBuf {
    if let Some(config_dir) = Config::config_dir() {
        return config_dir.join("cloudnet.log");
    }
    if let Some(home) = dirs::home_dir() {
        return home.join(".cloudnet").join("cloudnet.log");
    }
    PathBuf::from("cloudnet.log")
}

fn build_registry(config: &Config) -> Result<ProviderRegistry> {
    let gcp = GcpHandlers::new(config.gcp.compute_base_url.clone(), config.operation.poller());
    let azure = AzureHandlers::new(
        &config.azure.management_base_url,
        &config.azure.login_base_url,
    )?;

    let registry = ProviderRegistry::new()
        .with(Provider::Gcp, HandlerSet::from_shared(Arc::new(gcp)))
        .with(Provider::Azure, HandlerSet::from_shared(Arc::new(azure)))
        .with(Provider::Ncp, HandlerSet::from_shared(Arc::new(NcpHandlers)));

    #[cfg(feature = "aws")]
    let registry = {
        use cloudnet::aws::{AwsHandlers, SdkConnector};
        let aws = AwsHandlers::new(Arc::new(SdkConnector));
        registry.with(Provider::Aws, HandlerSet::from_shared(Arc::new(aws)))
    };

    Ok(registry)
}

fn build_cache(config: &Config) -> ResourceCache {
    if config.cache.enabled {
        ResourceCache::new(Arc::new(MemoryCache::new()), config.cache.ttl())
    } else {
        ResourceCache::disabled()
    }
}

fn load_credential(args: &Args, config: &Config) -> Result<Credential> {
    let provider = args
        .provider
        .clone()
        .or_else(|| config.default_provider.clone())
        .context("No provider given. Use --provider or set default_provider in the config")?;
    let path = args
        .credential
        .clone()
        .or_else(|| config.default_credential_file.clone())
        .context("No credential file given. Use --credential or set default_credential_file")?;

    let payload = std::fs::read(&path)
        .with_context(|| format!("Failed to read credential file {}", path.display()))?;
    Ok(Credential::new(provider, payload))
}

fn print<T: Serialize>(value: &T, format: OutputFormat) -> Result<()> {
    let rendered = match format {
        OutputFormat::Json => serde_json::to_string_pretty(value)?,
        OutputFormat::Yaml => serde_yaml::to_string(value)?,
    };
    println!("{}", rendered.trim_end());
    Ok(())
}

fn vpc_scope(location: &Location) -> VpcScope {
    let scope = VpcScope::region(&location.region);
    match &location.resource_group {
        Some(group) => scope.with_resource_group(group),
        None => scope,
    }
}

fn subnet_scope(vpc: &str, location: &Location) -> SubnetScope {
    let scope = SubnetScope::new(vpc, &location.region);
    match &location.resource_group {
        Some(group) => scope.with_resource_group(group),
        None => scope,
    }
}

fn security_group_scope(vpc: Option<&str>, location: &Location) -> SecurityGroupScope {
    let mut scope = SecurityGroupScope::region(&location.region);
    if let Some(vpc) = vpc {
        scope = scope.in_vpc(vpc);
    }
    match &location.resource_group {
        Some(group) => scope.with_resource_group(group),
        None => scope,
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let _log_guard = setup_logging(args.log_level)?;

    let config = Config::load();
    let registry = build_registry(&config)?;

    if let Command::Providers = args.command {
        let providers: Vec<String> = registry
            .providers()
            .iter()
            .map(|p| p.to_string())
            .collect();
        return print(&providers, args.output);
    }

    let credential = load_credential(&args, &config)?;
    let service = NetworkService::builder(registry)
        .cache(build_cache(&config))
        .build();

    // Ctrl-C cancels the in-flight provider call
    let cancel = CancellationToken::new();
    let on_interrupt = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("Interrupted, cancelling");
            on_interrupt.cancel();
        }
    });

    let actor = std::env::var("USER").unwrap_or_else(|_| "cli".to_string());
    let ctx = RequestContext::new().with_actor(actor).with_cancel(cancel);

    let result = run(&service, &ctx, &credential, &args).await;
    if let Err(err) = &result {
        tracing::error!("Command failed: {:#}", err);
    }
    result
}

async fn run(
    service: &NetworkService,
    ctx: &RequestContext,
    credential: &Credential,
    args: &Args,
) -> Result<()> {
    match &args.command {
        Command::Vpcs { location, list } => {
            let page = service
                .list_vpcs(ctx, credential, &vpc_scope(location), &list.query())
                .await?;
            print(&page, args.output)
        }
        Command::Vpc { id, location } => {
            let vpc = service
                .get_vpc(ctx, credential, &vpc_scope(location), id)
                .await?;
            print(&vpc, args.output)
        }
        Command::Subnets {
            vpc,
            location,
            list,
        } => {
            let page = service
                .list_subnets(ctx, credential, &subnet_scope(vpc, location), &list.query())
                .await?;
            print(&page, args.output)
        }
        Command::SecurityGroups {
            vpc,
            location,
            list,
        } => {
            let scope = security_group_scope(vpc.as_deref(), location);
            let page = service
                .list_security_groups(ctx, credential, &scope, &list.query())
                .await?;
            print(&page, args.output)
        }
        Command::DeleteVpc { id, location } => {
            if args.readonly {
                bail!("Read-only mode: refusing to delete VPC {}", id);
            }
            service
                .delete_vpc(ctx, credential, &vpc_scope(location), id)
                .await?;
            eprintln!("Deleted VPC {}", id);
            Ok(())
        }
        Command::Providers => Ok(()),
    }
}
