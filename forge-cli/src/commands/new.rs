//! `forge new`: run the generation pipeline and render the object graph.

use anyhow::{bail, Context, Result};
use clap::Args;
use colored::Colorize;
use forge_core::generate::objects::Labels;
use forge_core::{AppConfig, Strategy};
use std::time::Duration;
use tabled::{Table, Tabled};

#[derive(Args)]
pub struct NewArgs {
    /// Images, templates, source repositories, or KEY=VALUE pairs
    pub args: Vec<String>,

    /// Name for the generated objects
    #[arg(long)]
    pub name: Option<String>,

    /// Build strategy: source, docker, or pipeline
    #[arg(long)]
    pub strategy: Option<String>,

    /// Inline Dockerfile content (forces the docker strategy)
    #[arg(long)]
    pub dockerfile: Option<String>,

    /// Sub-directory of the repository to build
    #[arg(long)]
    pub context_dir: Option<String>,

    /// Output image reference for builds
    #[arg(long)]
    pub to: Option<String>,

    /// Push the build output to an external registry reference
    #[arg(long)]
    pub to_docker: bool,

    /// Discard the build output
    #[arg(long)]
    pub no_output: bool,

    /// Environment variables (KEY=VALUE)
    #[arg(short, long)]
    pub env: Vec<String>,

    /// Also apply the environment to build strategies
    #[arg(long)]
    pub env_to_build: bool,

    /// Secrets to mount into builds (NAME[:DESTINATION])
    #[arg(long)]
    pub secret: Vec<String>,

    /// Labels applied to every generated object (KEY=VALUE)
    #[arg(short, long)]
    pub label: Vec<String>,

    /// Image whose content seeds the build context
    #[arg(long)]
    pub source_image: Option<String>,

    /// SOURCE:DESTINATION path pair copied from the source image
    #[arg(long)]
    pub source_image_path: Option<String>,

    /// Tolerate insecure (plain HTTP) registries
    #[arg(long)]
    pub insecure_registry: bool,

    /// Generate builds only, no deployment or service
    #[arg(long)]
    pub no_deploy: bool,

    /// Target namespace
    #[arg(long, default_value = "default")]
    pub namespace: String,

    /// Registry request timeout in seconds
    #[arg(long, default_value = "10")]
    pub timeout: u64,

    /// Basic auth for the registry (USER:PASSWORD)
    #[arg(long)]
    pub registry_auth: Option<String>,

    /// Output format: table, json, or yaml
    #[arg(short, long, default_value = "table")]
    pub output: String,
}

pub async fn run(args: NewArgs) -> Result<()> {
    let labels = parse_labels(&args.label)?;

    let strategy = match &args.strategy {
        Some(s) => Some(s.parse::<Strategy>()?),
        None => None,
    };

    let (docker_searcher, template_files) = super::default_searchers(
        Duration::from_secs(args.timeout),
        args.insecure_registry,
        args.registry_auth.as_deref(),
    )?;

    let mut config = AppConfig {
        name: args.name,
        strategy,
        dockerfile: args.dockerfile,
        context_dir: args.context_dir,
        to: args.to,
        output_docker: args.to_docker,
        no_output: args.no_output,
        deploy: !args.no_deploy,
        insecure_registry: args.insecure_registry,
        add_environment_to_build: args.env_to_build,
        source_image: args.source_image,
        source_image_path: args.source_image_path,
        secrets: args.secret,
        environment: args.env,
        labels,
        namespace: args.namespace,
        docker_searcher: Some(docker_searcher),
        template_file_searcher: Some(template_files),
        ..Default::default()
    };

    let unknown = config.add_arguments(&args.args);
    if !unknown.is_empty() {
        bail!("unable to classify arguments: {}", unknown.join(", "));
    }

    let result = config.run().await.context("generation failed")?;

    for warning in &result.warnings {
        eprintln!("{} {}", "--> WARNING:".yellow().bold(), warning);
    }

    match args.output.as_str() {
        "json" => println!("{}", serde_json::to_string_pretty(&result.objects)?),
        "yaml" => println!("{}", serde_yaml::to_string(&result.objects)?),
        "table" => print_table(&result),
        other => bail!("unknown output format {:?}", other),
    }
    Ok(())
}

fn print_table(result: &forge_core::AppResult) {
    #[derive(Tabled)]
    struct ObjectRow {
        #[tabled(rename = "KIND")]
        kind: String,
        #[tabled(rename = "NAME")]
        name: String,
        #[tabled(rename = "DETAIL")]
        detail: String,
    }

    let rows: Vec<ObjectRow> = result
        .objects
        .objects
        .iter()
        .map(|object| ObjectRow {
            kind: object.kind().to_string(),
            name: object.name().to_string(),
            detail: detail_for(object),
        })
        .collect();

    println!("{} {}", "Generated application".green().bold(), result.name);
    println!("{}", Table::new(rows));
}

fn parse_labels(specs: &[String]) -> Result<Labels> {
    let mut labels = Labels::new();
    for spec in specs {
        let (key, value) = spec
            .split_once('=')
            .ok_or_else(|| anyhow::anyhow!("invalid label {:?}, expected KEY=VALUE", spec))?;
        labels.insert(key.to_string(), value.to_string());
    }
    Ok(labels)
}

fn detail_for(object: &forge_core::GeneratedObject) -> String {
    use forge_core::generate::objects::{BuildStrategy, GeneratedObject};

    match object {
        GeneratedObject::ImageTracker(t) => {
            let tags: Vec<&str> = t.tags.iter().map(|tag| tag.name.as_str()).collect();
            format!("tags: {}", tags.join(", "))
        }
        GeneratedObject::BuildSpec(b) => match &b.strategy {
            BuildStrategy::Source { from, .. } => format!("source build from {}", from.name),
            BuildStrategy::Docker { .. } => "docker build".to_string(),
            BuildStrategy::Pipeline { .. } => "pipeline build".to_string(),
        },
        GeneratedObject::DeploymentSpec(d) => {
            format!("{} container(s)", d.containers.len())
        }
        GeneratedObject::Service(s) => {
            let ports: Vec<String> = s.ports.iter().map(|p| p.port.to_string()).collect();
            format!("port {}", ports.join(", "))
        }
    }
}
