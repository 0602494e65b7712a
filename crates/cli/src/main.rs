#![forbid(unsafe_code)]

use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use injector_admission::{Admission, Injector};
use injector_policy::{DecisionEngine, InjectConfig, NamespacePolicy};
use kube::core::admission::{AdmissionRequest, AdmissionReview};
use kube::core::DynamicObject;
use serde_json::Value as Json;
use tracing::{debug, info};

#[derive(Parser, Debug)]
#[command(name = "injectorctl", version, about = "Proxy injector CLI: run admission reviews offline")]
struct Cli {
    /// Output format
    #[arg(short = 'o', long = "output", value_enum, global = true, default_value_t = Output::Human)]
    output: Output,

    /// Injector config YAML (defaults apply when omitted)
    #[arg(long = "config", env = "INJECTOR_CONFIG", global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, ValueEnum)]
enum Output { Human, Json }

#[derive(Subcommand, Debug)]
enum Commands {
    /// Answer an AdmissionReview (JSON or YAML) and print the response review
    Review {
        /// AdmissionReview document
        file: PathBuf,
        /// Namespace object the request targets
        #[arg(long = "namespace")]
        namespace: Option<PathBuf>,
    },
    /// Show the patch an AdmissionReview would receive, or why it is skipped
    Patch {
        /// AdmissionReview document
        file: PathBuf,
        /// Namespace object the request targets
        #[arg(long = "namespace")]
        namespace: Option<PathBuf>,
    },
    /// Print the effective configuration
    Config,
}

fn init_tracing() {
    let env = std::env::var("INJECTOR_LOG").unwrap_or_else(|_| "info".to_string());
    let filter = tracing_subscriber::EnvFilter::from_str(&env).unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).with_target(true).with_writer(std::io::stderr).init();
}

fn init_metrics() {
    if let Ok(addr) = std::env::var("INJECTOR_METRICS_ADDR") {
        if let Ok(sock) = addr.parse::<std::net::SocketAddr>() {
            let builder = metrics_exporter_prometheus::PrometheusBuilder::new();
            match builder.with_http_listener(sock).install() {
                Ok(_) => tracing::info!(addr = %addr, "Prometheus metrics exporter listening"),
                Err(e) => tracing::warn!(error = %e, "failed to install metrics exporter"),
            }
        } else {
            tracing::warn!(addr = %addr, "invalid INJECTOR_METRICS_ADDR; expected host:port");
        }
    }
}

/// YAML is a superset of JSON, so one parser covers both.
fn parse_document(text: &str) -> Result<Json> {
    let doc: Json = serde_yaml::from_str(text).context("parsing document")?;
    Ok(doc)
}

fn read_document(path: &Path) -> Result<Json> {
    let text = std::fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
    parse_document(&text).with_context(|| format!("in {}", path.display()))
}

fn load_config(path: Option<&Path>) -> Result<InjectConfig> {
    match path {
        Some(p) => {
            let cfg = InjectConfig::load(p).with_context(|| format!("loading config {}", p.display()))?;
            info!(path = %p.display(), "config loaded");
            Ok(cfg)
        }
        None => {
            debug!("no config file; using defaults");
            Ok(InjectConfig::default())
        }
    }
}

fn load_namespace(path: Option<&Path>) -> Result<Option<NamespacePolicy>> {
    let Some(p) = path else { return Ok(None) };
    let doc = read_document(p)?;
    let ns = NamespacePolicy::from_value(&doc).with_context(|| format!("namespace in {}", p.display()))?;
    Ok(Some(ns))
}

fn load_review(path: &Path) -> Result<AdmissionReview<DynamicObject>> {
    let doc = read_document(path)?;
    serde_json::from_value(doc).with_context(|| format!("{} is not an AdmissionReview", path.display()))
}

fn print_patch(admission: &Admission, output: Output) -> Result<()> {
    match (admission, output) {
        (Admission::Patched(doc), Output::Json) => println!("{}", serde_json::to_string_pretty(doc)?),
        (Admission::Patched(doc), Output::Human) => {
            for op in doc {
                println!("{} {}", serde_json::to_string(&op.op())?.trim_matches('"'), op.path());
            }
            println!("{} operation(s)", doc.len());
        }
        (Admission::Skipped(reason), Output::Json) => println!("{}", serde_json::json!({"skipped": reason.to_string()})),
        (Admission::Skipped(reason), Output::Human) => println!("skipped: {}", reason),
        (Admission::NoObject, Output::Json) => println!("{}", serde_json::json!({"skipped": "no object"})),
        (Admission::NoObject, Output::Human) => println!("skipped: request carries no object"),
    }
    Ok(())
}

fn main() -> Result<()> {
    init_tracing();
    init_metrics();
    let cli = Cli::parse();

    let config = Arc::new(load_config(cli.config.as_deref())?);
    match cli.command {
        Commands::Config => match cli.output {
            Output::Human => print!("{}", config.to_yaml_string()?),
            Output::Json => println!("{}", serde_json::to_string_pretty(config.as_ref())?),
        },
        Commands::Review { file, namespace } => {
            let ns = load_namespace(namespace.as_deref())?;
            let review = load_review(&file)?;
            let injector = Injector::new(DecisionEngine::from_config(config));
            let out = injector.review(review, ns.as_ref());
            println!("{}", serde_json::to_string_pretty(&out)?);
        }
        Commands::Patch { file, namespace } => {
            let ns = load_namespace(namespace.as_deref())?;
            let req: AdmissionRequest<DynamicObject> = load_review(&file)?
                .try_into()
                .with_context(|| format!("{} has no request", file.display()))?;
            let injector = Injector::new(DecisionEngine::from_config(config));
            let admission = injector.try_admit(&req, ns.as_ref())?;
            print_patch(&admission, cli.output)?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn args_parse() {
        let cli = Cli::try_parse_from(["injectorctl", "-o", "json", "patch", "r.yaml", "--namespace", "ns.yaml"]).unwrap();
        assert_eq!(cli.output, Output::Json);
        match cli.command {
            Commands::Patch { file, namespace } => {
                assert_eq!(file, PathBuf::from("r.yaml"));
                assert_eq!(namespace, Some(PathBuf::from("ns.yaml")));
            }
            other => panic!("unexpected {:?}", other),
        }
        assert!(Cli::try_parse_from(["injectorctl", "review"]).is_err());
    }

    #[test]
    fn yaml_and_json_documents() {
        let a = parse_document("metadata:\n  name: shop\n").unwrap();
        let b = parse_document(r#"{"metadata": {"name": "shop"}}"#).unwrap();
        assert_eq!(a, b);
        assert!(parse_document("metadata: [").is_err());
    }

    #[test]
    fn missing_namespace_file_is_none() {
        assert!(load_namespace(None).unwrap().is_none());
        assert!(load_config(None).unwrap().validate().is_ok());
    }
}
