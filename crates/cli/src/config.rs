//! Runtime configuration assembled from flags, environment and files.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::Args;
use tracing_subscriber::EnvFilter;

use engine::{LayerProgression, ResolverConfig, RunnerConfig};
use invoker::{HttpMethod, ServiceRegistry};
use queue::QueueConfig;

/// Prefix of the per-service environment variables.
pub const SERVICE_ENV_PREFIX: &str = "WORKFLOW_SERVICE_";

/// Where service base addresses come from.
#[derive(Debug, Args)]
pub struct ServiceArgs {
    /// JSON file mapping service names to base addresses.
    #[arg(long, env = "WORKFLOW_SERVICES")]
    pub services: Option<PathBuf>,

    /// Extra `name=url` entry; wins over the file and the environment.
    #[arg(long = "service", value_name = "NAME=URL", value_parser = parse_service)]
    pub service: Vec<(String, String)>,
}

impl ServiceArgs {
    /// File first, then `WORKFLOW_SERVICE_*` variables, then flags.
    pub fn registry(&self) -> Result<ServiceRegistry> {
        let mut builder = ServiceRegistry::builder();
        if let Some(path) = &self.services {
            let document = std::fs::read_to_string(path)
                .with_context(|| format!("cannot read service file {}", path.display()))?;
            builder = builder
                .merge_json(&document)
                .with_context(|| format!("invalid service file {}", path.display()))?;
        }
        builder = builder.merge_env(SERVICE_ENV_PREFIX, std::env::vars());
        for (name, base) in &self.service {
            builder = builder.service(name.clone(), base.clone());
        }
        Ok(builder.build())
    }
}

fn parse_service(raw: &str) -> Result<(String, String)> {
    let Some((name, url)) = raw.split_once('=') else {
        bail!("expected NAME=URL, got '{raw}'");
    };
    if name.trim().is_empty() || url.trim().is_empty() {
        bail!("expected NAME=URL, got '{raw}'");
    }
    Ok((name.trim().to_owned(), url.trim().to_owned()))
}

/// Request shaping.
#[derive(Debug, Args)]
pub struct ResolverArgs {
    /// HTTP method used for every action call.
    #[arg(long, env = "WORKFLOW_METHOD", default_value = "POST")]
    pub method: HttpMethod,

    /// Per-invocation timeout in milliseconds.
    #[arg(long, env = "WORKFLOW_TIMEOUT_MS", default_value_t = 30_000)]
    pub timeout_ms: u64,
}

impl ResolverArgs {
    pub fn config(&self) -> ResolverConfig {
        ResolverConfig {
            method: self.method,
            invocation_timeout: Some(Duration::from_millis(self.timeout_ms)),
        }
    }
}

/// Worker pool tuning.
#[derive(Debug, Args)]
pub struct QueueArgs {
    #[arg(long, env = "WORKFLOW_WORKERS", default_value_t = 4)]
    pub workers: usize,

    /// Attempts per job before it is dead-lettered.
    #[arg(long, env = "WORKFLOW_MAX_ATTEMPTS", default_value_t = 3)]
    pub max_attempts: u32,

    /// Base of the exponential retry backoff, in milliseconds.
    #[arg(long, env = "WORKFLOW_RETRY_DELAY_MS", default_value_t = 100)]
    pub retry_delay_ms: u64,

    /// A claimed job silent for this long is handed to another worker. Must
    /// exceed every invocation timeout.
    #[arg(long, env = "WORKFLOW_VISIBILITY_TIMEOUT_SECS", default_value_t = 300)]
    pub visibility_timeout_secs: u64,
}

impl QueueArgs {
    pub fn config(&self) -> QueueConfig {
        QueueConfig {
            workers: self.workers,
            max_attempts: self.max_attempts,
            retry_base_delay: Duration::from_millis(self.retry_delay_ms),
            visibility_timeout: Duration::from_secs(self.visibility_timeout_secs),
            ..QueueConfig::default()
        }
    }
}

/// Finished executions are forgotten together with their queued jobs.
pub fn runner_config(first_layer_only: bool, queue: &QueueConfig) -> RunnerConfig {
    let progression = if first_layer_only {
        LayerProgression::FirstLayerOnly
    } else {
        LayerProgression::Continue
    };
    RunnerConfig { progression, retention: queue.retention }
}

/// `RUST_LOG`, defaulting to `info`.
pub fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).with_writer(std::io::stderr).init();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn service_flags_parse() {
        assert_eq!(
            parse_service("dropbox=http://dropbox:9000").unwrap(),
            ("dropbox".to_owned(), "http://dropbox:9000".to_owned())
        );
        assert!(parse_service("dropbox").is_err());
        assert!(parse_service("=http://x").is_err());
    }

    #[test]
    fn flags_override_file_entries() {
        let path = std::env::temp_dir().join(format!("services-{}.json", std::process::id()));
        std::fs::write(&path, r#"{ "dropbox": "http://from-file", "slack": "http://slack" }"#).unwrap();

        let args = ServiceArgs {
            services: Some(path.clone()),
            service: vec![("dropbox".into(), "http://from-flag".into())],
        };
        let registry = args.registry().unwrap();
        std::fs::remove_file(&path).unwrap();

        assert_eq!(registry.base_address("dropbox"), Some("http://from-flag"));
        assert_eq!(registry.base_address("slack"), Some("http://slack"));
    }
}
