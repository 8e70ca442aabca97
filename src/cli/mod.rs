//! CLI commands for the controller.
//!
//! Provides operator tooling: inspect a cascade, run the controller, print config.

pub mod inspect;
pub mod runner;

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use async_trait::async_trait;
use clap::{Args, Parser, Subcommand};

use crate::config::Config;
use crate::extensions::{DocumentContext, GraphQlRegistry, RegistryClient, RegistryExtension, StaticRegistry};
use crate::settings::{EditError, EditResult, RawCascade, SettingsEditor, UpdateExtensionSettingsArgs};

#[derive(Parser)]
#[command(name = "nova-controller")]
#[command(about = "Extension control plane", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Use this config file instead of the default one
    #[arg(long, global = true, value_name = "FILE")]
    pub config: Option<PathBuf>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Show configured extensions for a cascade and whether they would activate
    Inspect(EnvironmentArgs),

    /// Run the controller until Ctrl-C
    Run(RunArgs),

    /// Print the effective configuration
    Config,
}

/// Where the settings come from and which document is open.
#[derive(Args, Debug, Clone)]
pub struct EnvironmentArgs {
    /// Cascade description (JSON: `{"subjects": [...], "merged": "..."}`)
    #[arg(long, value_name = "FILE")]
    pub cascade: PathBuf,

    /// Use registry records from a JSON file instead of the remote registry
    #[arg(long, value_name = "FILE")]
    pub registry: Option<PathBuf>,

    /// Language of the current document (e.g. `go`)
    #[arg(long, value_name = "ID")]
    pub language: Option<String>,

    /// Root URI of the current document
    #[arg(long, value_name = "URI")]
    pub root: Option<String>,
}

#[derive(Args, Debug, Clone)]
pub struct RunArgs {
    #[command(flatten)]
    pub environment: EnvironmentArgs,

    /// Serve a settings page over stdin/stdout (newline-delimited JSON)
    #[arg(long)]
    pub page_stdio: bool,
}

impl EnvironmentArgs {
    pub fn document(&self) -> Option<DocumentContext> {
        if self.language.is_none() && self.root.is_none() {
            return None;
        }
        Some(DocumentContext::new(self.language.clone(), self.root.clone()))
    }

    pub fn load_cascade(&self) -> Result<RawCascade> {
        load_cascade(&self.cascade)
    }

    pub fn registry(&self, config: &Config) -> Result<Arc<dyn RegistryClient>> {
        match &self.registry {
            Some(path) => Ok(Arc::new(load_registry(path)?)),
            None => Ok(Arc::new(GraphQlRegistry::new(&config.registry))),
        }
    }
}

pub fn load_cascade(path: &Path) -> Result<RawCascade> {
    let content = fs::read_to_string(path)
        .with_context(|| format!("Failed to read cascade: {}", path.display()))?;
    serde_json::from_str(&content)
        .with_context(|| format!("Invalid cascade description: {}", path.display()))
}

pub fn load_registry(path: &Path) -> Result<StaticRegistry> {
    let content = fs::read_to_string(path)
        .with_context(|| format!("Failed to read registry file: {}", path.display()))?;
    let extensions: Vec<RegistryExtension> = serde_json::from_str(&content)
        .with_context(|| format!("Invalid registry file: {}", path.display()))?;
    Ok(StaticRegistry::new(extensions))
}

/// Settings editor for a cascade loaded from a file. Edits are rejected.
pub struct ReadOnlyEditor;

#[async_trait]
impl SettingsEditor for ReadOnlyEditor {
    async fn update_extension_settings(
        &self,
        subject_id: &str,
        args: UpdateExtensionSettingsArgs,
    ) -> EditResult<()> {
        tracing::warn!(
            subject = subject_id,
            extension = %args.extension_id,
            "Settings are read-only, ignoring edit"
        );
        Err(EditError::Rejected(
            "settings loaded from a file are read-only".to_string(),
        ))
    }
}

/// Run the CLI.
pub async fn run() -> Result<()> {
    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => Config::load_from(path)
            .with_context(|| format!("Failed to load config: {}", path.display()))?,
        None => Config::load(),
    };
    crate::logging::init(&config.logging);

    match cli.command {
        Commands::Inspect(args) => inspect::run_inspect(&config, &args).await,
        Commands::Run(args) => runner::run_controller(&config, &args).await,
        Commands::Config => {
            println!("# {}", Config::config_path().display());
            print!("{}", config.to_toml()?);
            Ok(())
        }
    }
}
