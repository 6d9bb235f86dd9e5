use std::path::{Path, PathBuf};
use std::str::FromStr;

use anyhow::{Context, Result};
use clap::{ArgAction, Parser, Subcommand, ValueEnum};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use kube::core::DynamicObject;
use serde::de::DeserializeOwned;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use trellis_core::{Integration, IntegrationKit, IntegrationPlatform, TraitProfile, WorkloadKind, IMPORTED_KIND_ANNOTATION};
use trellis_kubehub::{KubeClient, MockClient, SharedClient};
use trellis_pipeline::{is_addon, Catalog, Environment, Registry};

#[derive(Parser, Debug)]
#[command(name = "trellisctl", version, about = "Trellis trait pipeline CLI")]
struct Cli {
    /// Output format
    #[arg(short = 'o', long = "output", value_enum, global = true, default_value_t = Output::Human)]
    output: Output,

    /// Namespace for inputs that do not set one
    #[arg(long = "ns", global = true, env = "TRELLIS_NAMESPACE", default_value = "default")]
    namespace: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, ValueEnum)]
enum Output { Human, Json }

#[derive(Subcommand, Debug)]
enum Commands {
    /// List the trait catalog in execution order
    Traits {
        /// Only traits allowed in this profile (Kubernetes, Knative, OpenShift)
        #[arg(long = "profile")]
        profile: Option<String>,
    },
    /// Run a trait pass over an integration
    Apply {
        /// Integration manifest (YAML)
        #[arg(short = 'f', long = "file")]
        file: PathBuf,
        /// Platform manifest served to the pass
        #[arg(long = "platform")]
        platform: Option<PathBuf>,
        /// Integration kit manifest served to the pass
        #[arg(long = "kit")]
        kit: Option<PathBuf>,
        /// Resolve platform and kit from the current kube context instead
        #[arg(long = "live", action = ArgAction::SetTrue)]
        live: bool,
    },
    /// Replay the pipeline for an integration imported from an existing workload
    Synthetic {
        /// Integration manifest (YAML) carrying the imported-from annotations
        #[arg(short = 'f', long = "file")]
        file: PathBuf,
        /// Workload manifest served as the imported object
        #[arg(long = "workload")]
        workload: Option<PathBuf>,
        /// Fetch the workload from the current kube context instead
        #[arg(long = "live", action = ArgAction::SetTrue)]
        live: bool,
    },
}

fn init_tracing() {
    let env = std::env::var("TRELLIS_LOG").unwrap_or_else(|_| "info".to_string());
    let filter = tracing_subscriber::EnvFilter::from_str(&env).unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).with_target(true).init();
}

fn init_metrics() {
    if let Ok(addr) = std::env::var("TRELLIS_METRICS_ADDR") {
        if let Ok(sock) = addr.parse::<std::net::SocketAddr>() {
            let builder = metrics_exporter_prometheus::PrometheusBuilder::new();
            match builder.with_http_listener(sock).install() {
                Ok(_) => info!(addr = %addr, "Prometheus metrics exporter listening"),
                Err(e) => warn!(error = %e, "failed to install metrics exporter"),
            }
        } else {
            warn!(addr = %addr, "invalid TRELLIS_METRICS_ADDR; expected host:port");
        }
    }
}

fn read_yaml<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let raw = std::fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
    serde_yaml::from_str(&raw).with_context(|| format!("parsing {}", path.display()))
}

fn default_namespace(meta: &mut ObjectMeta, ns: &str) {
    if meta.namespace.is_none() {
        meta.namespace = Some(ns.to_string());
    }
}

/// Cancel the pass on Ctrl-C.
fn cancel_on_interrupt() -> CancellationToken {
    let token = CancellationToken::new();
    let child = token.clone();
    tokio::spawn(async move {
        if signal::ctrl_c().await.is_ok() {
            warn!("interrupted; cancelling pass");
            child.cancel();
        }
    });
    token
}

fn object_key(o: &DynamicObject) -> String {
    let kind = o.types.as_ref().map(|t| t.kind.as_str()).unwrap_or("?");
    match &o.metadata.namespace {
        Some(ns) => format!("{} {}/{}", kind, ns, o.metadata.name.as_deref().unwrap_or("")),
        None => format!("{} {}", kind, o.metadata.name.as_deref().unwrap_or("")),
    }
}

fn print_environment(env: &Environment, integration: Option<&Integration>, output: Output) -> Result<()> {
    match output {
        Output::Human => {
            let executed: Vec<&str> = env.executed_traits.iter().map(|t| t.as_str()).collect();
            println!("profile: {}", env.determine_profile());
            println!("executed: {}", executed.join(", "));
            println!("resources:");
            for o in env.resources.iter() {
                println!("  {}", object_key(o));
            }
            println!("env:");
            for (k, v) in env.env_vars.iter() {
                println!("  {}={}", k, v);
            }
            println!("properties:");
            for (k, v) in env.application_properties.iter() {
                println!("  {}={}", k, v);
            }
            if let Some(it) = integration {
                println!("conditions:");
                for c in &it.status.conditions {
                    println!("  {} {:?} {}: {}", c.type_, c.status, c.reason, c.message);
                }
                println!("status.traits: {}", serde_json::to_string(&it.status.traits)?);
            }
        }
        Output::Json => {
            let resources: Vec<&DynamicObject> = env.resources.iter().collect();
            let env_vars: serde_json::Map<String, serde_json::Value> =
                env.env_vars.iter().map(|(k, v)| (k.to_string(), v.into())).collect();
            let properties: serde_json::Map<String, serde_json::Value> =
                env.application_properties.iter().map(|(k, v)| (k.to_string(), v.into())).collect();
            let executed: Vec<&str> = env.executed_traits.iter().map(|t| t.as_str()).collect();
            let doc = serde_json::json!({
                "profile": env.determine_profile().as_str(),
                "executed": executed,
                "resources": resources,
                "env": env_vars,
                "properties": properties,
                "status": integration.map(|it| &it.status),
            });
            println!("{}", serde_json::to_string_pretty(&doc)?);
        }
    }
    Ok(())
}

fn list_traits(profile: Option<String>, output: Output) -> Result<()> {
    let profile = profile.map(|p| TraitProfile::from_str(&p)).transpose()?;
    let catalog = Catalog::new(&Registry::builtin(), None);
    let traits = match profile {
        Some(p) => catalog.traits_for_profile(p),
        None => catalog.all_traits(),
    };
    match output {
        Output::Human => {
            for t in traits {
                let addon = if is_addon(t.id().as_str()) { "addon" } else { "core" };
                let platform = if t.requires_integration_platform() { "needs platform" } else { "-" };
                println!("{:>5} • {} • {} • {}", t.order(), t.id(), addon, platform);
            }
        }
        Output::Json => {
            let rows: Vec<serde_json::Value> = traits
                .iter()
                .map(|t| {
                    serde_json::json!({
                        "id": t.id().as_str(),
                        "order": t.order(),
                        "addon": is_addon(t.id().as_str()),
                        "requiresPlatform": t.requires_integration_platform(),
                    })
                })
                .collect();
            println!("{}", serde_json::to_string_pretty(&rows)?);
        }
    }
    Ok(())
}

async fn live_client() -> Result<SharedClient> {
    Ok(std::sync::Arc::new(KubeClient::try_default().await?))
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    init_metrics();
    let cli = Cli::parse();
    let registry = Registry::builtin();

    match cli.command {
        Commands::Traits { profile } => list_traits(profile, cli.output)?,
        Commands::Apply { file, platform, kit, live } => {
            let mut integration: Integration = read_yaml(&file)?;
            default_namespace(&mut integration.metadata, &cli.namespace);
            info!(integration = %integration.name(), namespace = %integration.namespace(), live, "apply invoked");

            let client = if live {
                live_client().await?
            } else {
                let mut mock = MockClient::new();
                if let Some(path) = platform {
                    let mut pl: IntegrationPlatform = read_yaml(&path)?;
                    default_namespace(&mut pl.metadata, integration.namespace());
                    mock = mock.with_platform(pl);
                }
                if let Some(path) = kit {
                    let mut k: IntegrationKit = read_yaml(&path)?;
                    default_namespace(&mut k.metadata, integration.namespace());
                    mock = mock.with_kit(k);
                }
                mock.shared()
            };

            let res = trellis_pipeline::apply(cancel_on_interrupt(), client, &registry, Some(&mut integration), None).await;
            match res {
                Ok(env) => print_environment(&env, Some(&integration), cli.output)?,
                Err(e) => {
                    // Conditions are recorded even when the pass fails.
                    for c in &integration.status.conditions {
                        eprintln!("{} {}: {}", c.type_, c.reason, c.message);
                    }
                    return Err(e.into());
                }
            }
        }
        Commands::Synthetic { file, workload, live } => {
            let mut integration: Integration = read_yaml(&file)?;
            default_namespace(&mut integration.metadata, &cli.namespace);
            info!(integration = %integration.name(), live, "synthetic invoked");

            let client = if live {
                live_client().await?
            } else {
                let mut mock = MockClient::new();
                if let Some(path) = workload {
                    let mut obj: DynamicObject = read_yaml(&path)?;
                    default_namespace(&mut obj.metadata, integration.namespace());
                    // Unknown kinds are rejected by the pass itself.
                    if let Some(Ok(kind)) = integration.annotation(IMPORTED_KIND_ANNOTATION).map(WorkloadKind::from_str) {
                        mock = mock.with_workload(kind, obj);
                    }
                }
                mock.shared()
            };

            match trellis_pipeline::new_synthetic_environment(cancel_on_interrupt(), client, &registry, Some(&integration), None)
                .await?
            {
                Some(env) => print_environment(&env, None, cli.output)?,
                None => println!("no result: workload is no longer owned by {}", integration.name()),
            }
        }
    }
    Ok(())
}
