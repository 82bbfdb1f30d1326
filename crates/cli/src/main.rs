use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use clap::{Parser, Subcommand, ValueEnum};
use kube::Client;
use nsward_core::{AddUpdateFilter, CriteriaSet, NamespaceSnapshot};
use nsward_kubehub::KubeNamespaceReader;
use nsward_queue::WorkQueue;
use nsward_reconcile::{run_workers, CriteriaHandle, LogActionHook, NamespaceReader, Reconciler};
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

mod config;

use config::{Overrides, Settings};

#[derive(Parser, Debug)]
#[command(name = "nsward", version, about = "Namespace controller driven by label/annotation criteria")]
struct Cli {
    /// Output format
    #[arg(short = 'o', long = "output", value_enum, global = true, default_value_t = Output::Human)]
    output: Output,

    /// YAML config file (criteria and runtime options)
    #[arg(long = "config", env = "NSWARD_CONFIG", global = true)]
    config: Option<PathBuf>,

    /// Label key to match
    #[arg(long = "label-key", env = "NSWARD_LABEL_KEY", global = true)]
    label_key: Option<String>,

    /// Allowed label values (comma separated)
    #[arg(long = "label-values", env = "NSWARD_LABEL_VALUES", value_delimiter = ',', global = true)]
    label_values: Option<Vec<String>>,

    /// Annotation key to match
    #[arg(long = "annotation-key", env = "NSWARD_ANNOTATION_KEY", global = true)]
    annotation_key: Option<String>,

    /// Allowed annotation values (comma separated)
    #[arg(long = "annotation-values", env = "NSWARD_ANNOTATION_VALUES", value_delimiter = ',', global = true)]
    annotation_values: Option<Vec<String>>,

    /// Timeout for a single namespace read
    #[arg(long = "fetch-timeout-secs", env = "NSWARD_FETCH_TIMEOUT_SECS", global = true)]
    fetch_timeout_secs: Option<u64>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, ValueEnum)]
enum Output { Human, Json }

#[derive(Subcommand, Debug)]
enum Commands {
    /// Watch namespaces and reconcile those matching the criteria
    Run {
        /// Concurrent reconcile workers
        #[arg(long = "workers", env = "NSWARD_WORKERS")]
        workers: Option<usize>,
        /// First retry delay after a failed reconcile
        #[arg(long = "backoff-base-ms", env = "NSWARD_BACKOFF_BASE_MS")]
        backoff_base_ms: Option<u64>,
        /// Upper bound for the retry delay
        #[arg(long = "backoff-max-secs", env = "NSWARD_BACKOFF_MAX_SECS")]
        backoff_max_secs: Option<u64>,
    },
    /// Evaluate the criteria once against a live namespace
    Check {
        /// Namespace name
        name: String,
    },
}

impl Cli {
    fn overrides(&self) -> Overrides {
        let mut o = Overrides {
            label_key: self.label_key.clone(),
            label_values: self.label_values.clone(),
            annotation_key: self.annotation_key.clone(),
            annotation_values: self.annotation_values.clone(),
            fetch_timeout_secs: self.fetch_timeout_secs,
            ..Overrides::default()
        };
        if let Commands::Run { workers, backoff_base_ms, backoff_max_secs } = &self.command {
            o.workers = *workers;
            o.backoff_base_ms = *backoff_base_ms;
            o.backoff_max_secs = *backoff_max_secs;
        }
        o
    }
}

fn init_tracing() {
    let env = std::env::var("NSWARD_LOG").unwrap_or_else(|_| "info".to_string());
    let filter = tracing_subscriber::EnvFilter::from_str(&env).unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).with_target(true).init();
}

fn init_metrics() {
    if let Ok(addr) = std::env::var("NSWARD_METRICS_ADDR") {
        if let Ok(sock) = addr.parse::<std::net::SocketAddr>() {
            let builder = metrics_exporter_prometheus::PrometheusBuilder::new();
            match builder.with_http_listener(sock).install() {
                Ok(_) => info!(addr = %addr, "Prometheus metrics exporter listening"),
                Err(e) => warn!(error = %e, "failed to install metrics exporter"),
            }
        } else {
            warn!(addr = %addr, "invalid NSWARD_METRICS_ADDR; expected host:port");
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    let cli = Cli::parse();
    let overrides = cli.overrides();
    let settings = Settings::load(cli.config.as_deref(), &overrides)?;
    info!(criteria = ?settings.criteria, "settings loaded");

    match &cli.command {
        Commands::Run { .. } => {
            init_metrics();
            run(settings, cli.config.clone(), overrides).await?;
        }
        Commands::Check { name } => check(&settings, name, cli.output).await?,
    }
    Ok(())
}

async fn run(settings: Settings, config_path: Option<PathBuf>, overrides: Overrides) -> Result<()> {
    let client = Client::try_default().await?;
    let criteria = CriteriaHandle::new(CriteriaSet::from_config(&settings.criteria));
    let reader = Arc::new(KubeNamespaceReader::new(client.clone(), settings.fetch_timeout));
    let reconciler = Arc::new(Reconciler::new(reader, Arc::new(LogActionHook), criteria.clone()));
    let queue = WorkQueue::new(settings.backoff);
    let cancel = CancellationToken::new();

    let workers = tokio::spawn(run_workers(Arc::clone(&queue), reconciler, settings.workers, cancel.clone()));
    let mut watcher_handle = tokio::spawn({
        let queue = Arc::clone(&queue);
        async move {
            if let Err(e) = nsward_kubehub::start_watcher(client, Arc::new(AddUpdateFilter), queue).await {
                error!(error = ?e, "watcher failed");
            }
        }
    });
    let reload_handle = config_path.map(|path| tokio::spawn(reload_on_hup(path, overrides, criteria)));

    tokio::select! {
        _ = signal::ctrl_c() => info!("Ctrl-C received; shutting down"),
        _ = &mut watcher_handle => warn!("watcher exited; shutting down"),
    }

    cancel.cancel();
    queue.shutdown();
    watcher_handle.abort();
    if let Some(h) = reload_handle { h.abort(); }
    if tokio::time::timeout(Duration::from_secs(10), workers).await.is_err() {
        warn!("workers did not stop within 10s");
    }
    info!(pending = queue.len(), "controller stopped");
    Ok(())
}

/// Re-read the config file on SIGHUP and swap in the new criteria.
#[cfg(unix)]
async fn reload_on_hup(path: PathBuf, overrides: Overrides, criteria: CriteriaHandle) {
    use tokio::signal::unix::{signal, SignalKind};
    let mut hup = match signal(SignalKind::hangup()) {
        Ok(s) => s,
        Err(e) => {
            warn!(error = %e, "cannot listen for SIGHUP; config reload disabled");
            return;
        }
    };
    while hup.recv().await.is_some() {
        reload(&path, &overrides, &criteria);
    }
}

#[cfg(not(unix))]
async fn reload_on_hup(_path: PathBuf, _overrides: Overrides, _criteria: CriteriaHandle) {}

fn reload(path: &Path, overrides: &Overrides, criteria: &CriteriaHandle) {
    match Settings::load(Some(path), overrides) {
        Ok(s) => {
            info!(criteria = ?s.criteria, "criteria reloaded");
            criteria.replace(CriteriaSet::from_config(&s.criteria));
        }
        Err(e) => warn!(error = ?e, "config reload failed; keeping current criteria"),
    }
}

async fn check(settings: &Settings, name: &str, output: Output) -> Result<()> {
    let client = Client::try_default().await?;
    let reader = KubeNamespaceReader::new(client, settings.fetch_timeout);
    let snapshot = reader.get_namespace(name).await?;
    let criteria = CriteriaSet::from_config(&settings.criteria);
    let matched = criteria.first_match(&snapshot);
    match output {
        Output::Human => {
            match matched {
                Some(c) => println!("{} • match ({})", snapshot.name, c.key()),
                None => println!("{} • no match", snapshot.name),
            }
            print_metadata(&snapshot);
        }
        Output::Json => {
            #[derive(serde::Serialize)]
            struct Row<'a> { namespace: &'a NamespaceSnapshot, matched: bool, criterion: Option<&'a nsward_core::MatchCriterion> }
            let row = Row { namespace: &snapshot, matched: matched.is_some(), criterion: matched };
            println!("{}", serde_json::to_string_pretty(&row)?);
        }
    }
    Ok(())
}

fn print_metadata(s: &NamespaceSnapshot) {
    for (title, kv) in [("labels", &s.labels), ("annotations", &s.annotations)] {
        if kv.is_empty() {
            println!("{}: (none)", title);
        } else {
            let pairs: Vec<_> = kv.iter().map(|(k, v)| format!("{}={}", k, v)).collect();
            println!("{}: {}", title, pairs.join(", "));
        }
    }
}
