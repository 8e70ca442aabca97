//! Inspect command for `nova-controller inspect`.
//!
//! Resolves a cascade, reconciles it with the registry and reports what would run.

use anyhow::Result;

use super::EnvironmentArgs;
use crate::config::Config;
use crate::extensions::{should_activate, ConfiguredExtension, DocumentContext, Reconciler};
use crate::settings::resolve;

/// Print the configured extensions for a cascade.
pub async fn run_inspect(config: &Config, args: &EnvironmentArgs) -> Result<()> {
    let raw = args.load_cascade()?;
    let cascade = resolve(&raw);

    for configured in &cascade.subjects {
        if let Some(Err(e)) = &configured.settings {
            println!(
                "warning: settings of {} ({:?}) are invalid: {}",
                configured.subject.display_name, configured.subject.kind, e
            );
        }
    }

    let reconciler = Reconciler::new(args.registry(config)?);
    let extensions = reconciler.configured_extensions(&cascade).await?;
    let document = args.document();

    if extensions.is_empty() {
        println!("No extensions configured.");
        return Ok(());
    }

    for extension in &extensions {
        println!("{}", describe(extension, document.as_ref()));
    }
    Ok(())
}

/// One line per extension: id, flags, manifest status, activation.
fn describe(extension: &ConfiguredExtension, document: Option<&DocumentContext>) -> String {
    let manifest = match (&extension.manifest, &extension.registry_extension) {
        (Some(Ok(manifest)), _) => format!("platform={}", manifest.platform.kind()),
        (Some(Err(e)), _) => format!("manifest error: {}", e),
        (None, Some(_)) => "no manifest".to_string(),
        (None, None) => "not in registry".to_string(),
    };
    let activation = if should_activate(extension, document) {
        "active"
    } else {
        "inactive"
    };

    format!(
        "{:<32} added={:<5} enabled={:<5} {:<24} {}",
        extension.extension_id, extension.is_added, extension.is_enabled, activation, manifest
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::extensions::ExtensionManifest;

    fn extension(manifest: Option<&str>) -> ConfiguredExtension {
        ConfiguredExtension {
            extension_id: "acme/go".to_string(),
            settings: None,
            settings_cascade: Vec::new(),
            is_enabled: true,
            is_added: true,
            manifest: manifest.map(ExtensionManifest::parse),
            raw_manifest: manifest.map(str::to_string),
            registry_extension: None,
        }
    }

    #[test]
    fn test_describe() {
        let line = describe(
            &extension(Some(
                r#"{"platform": {"type": "docker", "image": "acme/go"}, "activationEvents": ["onLanguage:go"]}"#,
            )),
            Some(&DocumentContext::new(Some("go".to_string()), None)),
        );
        assert!(line.starts_with("acme/go"));
        assert!(line.contains("enabled=true"));
        assert!(line.contains(" active "));
        assert!(line.ends_with("platform=docker"));

        let line = describe(&extension(None), None);
        assert!(line.contains("inactive"));
        assert!(line.ends_with("not in registry"));

        let line = describe(&extension(Some("{oops")), None);
        assert!(line.contains("manifest error"));
    }
}
