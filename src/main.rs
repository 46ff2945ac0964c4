//! argo-forge CLI - render, validate and plan Argo WorkflowTemplates

use std::fs;
use std::path::PathBuf;

use clap::{Parser, Subcommand};
use colored::Colorize;
use tracing::info;

use argo_forge::catalog;
use argo_forge::config::ForgeConfig;
use argo_forge::error::{FixSuggestion, Result};
use argo_forge::render::{self, OutputFormat};

#[derive(Parser)]
#[command(name = "argo-forge")]
#[command(about = "argo-forge - typed builder for Argo WorkflowTemplates")]
#[command(version)]
struct Cli {
    /// Config file (defaults to ./argo-forge.toml, then the user config dir)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// More logging (-v info, -vv debug); RUST_LOG overrides
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List the built-in workflows
    List,

    /// Render a workflow to a WorkflowTemplate manifest
    Render {
        /// Workflow name (see `list`)
        name: String,

        /// yaml or json
        #[arg(short, long)]
        format: Option<OutputFormat>,

        /// Write to a file instead of stdout
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// metadata.namespace of the rendered template
        #[arg(short, long)]
        namespace: Option<String>,
    },

    /// Check a workflow without rendering it
    Validate {
        /// Workflow name (see `list`)
        name: String,
    },

    /// Show what each steps/DAG template would run
    Plan {
        /// Workflow name (see `list`)
        name: String,

        /// Only this template
        #[arg(short, long)]
        template: Option<String>,
    },
}

fn init_tracing(verbose: u8) {
    let default = match verbose {
        0 => "warn",
        1 => "info",
        _ => "debug",
    };
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn main() {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let result = ForgeConfig::load(cli.config.as_deref())
        .and_then(ForgeConfig::with_env)
        .and_then(|config| run(&config, cli.command));

    if let Err(e) = result {
        eprintln!("{} {}", "Error:".red().bold(), e);
        if let Some(suggestion) = e.fix_suggestion() {
            eprintln!("  {} {}", "Fix:".yellow(), suggestion);
        }
        std::process::exit(1);
    }
}

fn run(config: &ForgeConfig, command: Commands) -> Result<()> {
    match command {
        Commands::List => list(config),
        Commands::Render {
            name,
            format,
            output,
            namespace,
        } => render_workflow(config, &name, format, output, namespace),
        Commands::Validate { name } => validate_workflow(config, &name),
        Commands::Plan { name, template } => plan_workflow(config, &name, template.as_deref()),
    }
}

fn list(config: &ForgeConfig) -> Result<()> {
    let options = config.catalog_options();
    for entry in catalog::entries() {
        let scope = (entry.build)(&options)?;
        println!(
            "{:<22} {:>2} templates  {}",
            entry.name.cyan().bold(),
            scope.templates().count(),
            entry.description
        );
    }
    Ok(())
}

fn render_workflow(
    config: &ForgeConfig,
    name: &str,
    format: Option<OutputFormat>,
    output: Option<PathBuf>,
    namespace: Option<String>,
) -> Result<()> {
    let scope = catalog::build(name, &config.catalog_options())?;
    let mut options = config.render_options();
    if let Some(format) = format {
        options.format = format;
    }
    if namespace.is_some() {
        options.namespace = namespace;
    }

    let text = render::render(&scope, &options)?;
    match output {
        Some(path) => {
            fs::write(&path, &text)?;
            info!(workflow = name, path = %path.display(), "manifest written");
            eprintln!("{} Wrote {}", "✓".green(), path.display());
        }
        None => print!("{}", text),
    }
    Ok(())
}

fn validate_workflow(config: &ForgeConfig, name: &str) -> Result<()> {
    let scope = catalog::build(name, &config.catalog_options())?;
    let report = render::validate(&scope)?;

    println!("{} Workflow '{}' is valid", "✓".green(), name);
    println!(
        "  Entrypoint: {}",
        scope.entrypoint().unwrap_or("(none, library)")
    );
    println!("  Templates: {}", report.templates);
    println!("  Calls: {}", report.calls);
    println!("  Expressions: {}", report.expressions);
    Ok(())
}

fn plan_workflow(config: &ForgeConfig, name: &str, template: Option<&str>) -> Result<()> {
    let scope = catalog::build(name, &config.catalog_options())?;
    let plans = render::plan(&scope, template)?;
    if plans.is_empty() {
        println!("{} '{}' has no steps or dag templates", "→".cyan(), name);
        return Ok(());
    }

    for plan in &plans {
        println!("{} {} ({})", "→".cyan(), plan.template.bold(), plan.body);
        for (i, stage) in plan.stages.iter().enumerate() {
            println!("  stage {}: [{}]", i + 1, stage.join(", "));
        }
        for invocation in &plan.invocations {
            let label = match invocation.iteration {
                Some(i) => format!("{}[{}]", invocation.call, i),
                None => invocation.call.clone(),
            };
            println!("    {} -> {}", label.yellow(), invocation.target);
            for (arg, value) in &invocation.arguments {
                println!("      {} = {}", arg, value);
            }
            if let Some(when) = &invocation.when {
                println!("      when {}", when);
            }
        }
    }
    Ok(())
}
