//! stratus - declarative function provisioning
//!
//! - `template`: assemble a service definition into a resource document
//! - `provision-api`: service one custom resource request (stdin or file)
//! - `serve`: the API provisioner's `bootstrap` loop

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::{Args, Parser, Subcommand};
use tokio::io::AsyncReadExt;
use tracing::info;

use stratus_common::telemetry::{init_telemetry, TelemetryConfig};
use stratus_runtime::aws::{AwsApiGateway, AwsLambda};
use stratus_runtime::protocol::CallbackTarget;
use stratus_runtime::runtime_api::{serve, RuntimeApiClient};
use stratus_runtime::{
    ApiProvisioner, CustomResourceHandler, CustomResourceRequest, HttpResponseSender,
};
use stratus_template::assembler::DEFAULT_FUNCTION_RUNTIME;
use stratus_template::{AssemblerConfig, CodeLocation, ResourceGraphAssembler, ServiceDefinition};

/// stratus - assemble function templates and provision REST API graphs
#[derive(Parser, Debug)]
#[command(name = "stratus", version, about, long_about = None)]
struct Cli {
    /// Emit JSON log lines
    #[arg(long, global = true, env = "STRATUS_LOG_JSON")]
    log_json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Assemble a service definition (YAML or JSON) into a resource document
    Template(TemplateArgs),

    /// Service one provisioning request and deliver its response
    ProvisionApi(ProvisionArgs),

    /// Poll the function Runtime API and service every invocation
    Serve,
}

#[derive(Args, Debug)]
struct TemplateArgs {
    /// Service definition file
    #[arg(short = 'f', long, env = "STRATUS_DEFINITIONS")]
    definitions: PathBuf,

    /// Bucket holding the uploaded code bundle
    #[arg(long, env = "STRATUS_CODE_BUCKET")]
    code_bucket: String,

    /// Object key of the uploaded code bundle
    #[arg(long, env = "STRATUS_CODE_KEY")]
    code_key: String,

    /// Object key of the API provisioner bundle, in the same bucket
    #[arg(long, env = "STRATUS_PROVISIONER_KEY")]
    provisioner_key: Option<String>,

    /// Runtime for service functions
    #[arg(long, env = "STRATUS_FUNCTION_RUNTIME", default_value = DEFAULT_FUNCTION_RUNTIME)]
    function_runtime: String,

    /// Seed for salted logical ids (reproducible output)
    #[arg(long)]
    seed: Option<u64>,

    /// Write the document here instead of stdout
    #[arg(short, long)]
    output: Option<PathBuf>,
}

#[derive(Args, Debug)]
struct ProvisionArgs {
    /// Request file; stdin when omitted
    #[arg(long)]
    request: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    init_telemetry(TelemetryConfig {
        service_name: "stratus".to_string(),
        json: cli.log_json || matches!(cli.command, Commands::Serve),
    })?;

    match cli.command {
        Commands::Template(args) => run_template(args).await,
        Commands::ProvisionApi(args) => run_provision(args).await,
        Commands::Serve => run_serve().await,
    }
}

async fn run_template(args: TemplateArgs) -> anyhow::Result<()> {
    let content = tokio::fs::read_to_string(&args.definitions)
        .await
        .with_context(|| format!("failed to read {}", args.definitions.display()))?;
    // YAML is a superset of JSON, so one parser covers both
    let service: ServiceDefinition = serde_yaml::from_str(&content)
        .with_context(|| format!("failed to parse {}", args.definitions.display()))?;

    let mut config = AssemblerConfig::new(CodeLocation::new(&args.code_bucket, &args.code_key))
        .with_function_runtime(args.function_runtime);
    if let Some(key) = args.provisioner_key {
        config = config.with_provisioner_code(CodeLocation::new(&args.code_bucket, key));
    }

    let mut assembler = ResourceGraphAssembler::new(config);
    if let Some(seed) = args.seed {
        assembler = assembler.with_seed(seed);
    }
    let document = assembler.assemble(&service)?;
    let rendered = document.to_json_pretty()?;

    match args.output {
        Some(path) => {
            tokio::fs::write(&path, rendered)
                .await
                .with_context(|| format!("failed to write {}", path.display()))?;
            info!(path = %path.display(), resources = document.len(), "Wrote resource document");
        }
        None => println!("{rendered}"),
    }
    Ok(())
}

async fn run_provision(args: ProvisionArgs) -> anyhow::Result<()> {
    let body = match &args.request {
        Some(path) => tokio::fs::read(path)
            .await
            .with_context(|| format!("failed to read {}", path.display()))?,
        None => {
            let mut buf = Vec::new();
            tokio::io::stdin().read_to_end(&mut buf).await?;
            buf
        }
    };
    let response = match CustomResourceRequest::from_slice(&body) {
        Ok(request) => build_handler().await.handle(&request).await,
        Err(err) => match CallbackTarget::from_slice(&body) {
            Some(target) => build_handler().await.reject(&target, &err).await,
            None => return Err(err.into()),
        },
    };
    println!("{}", serde_json::to_string_pretty(&response)?);
    Ok(())
}

async fn run_serve() -> anyhow::Result<()> {
    let runtime = RuntimeApiClient::from_env()?;
    let handler = build_handler().await;
    serve(&runtime, &handler).await?;
    Ok(())
}

/// Handler wired to the AWS clients from the ambient SDK configuration
async fn build_handler() -> CustomResourceHandler {
    let sdk = aws_config::load_defaults(aws_config::BehaviorVersion::latest()).await;

    let mut provisioner = ApiProvisioner::new(
        Arc::new(AwsApiGateway::new(&sdk)),
        Arc::new(AwsLambda::new(&sdk)),
    );
    if let Some(region) = sdk.region() {
        provisioner = provisioner.with_region(region.to_string());
    }
    CustomResourceHandler::new(provisioner, Arc::new(HttpResponseSender::new()))
}
