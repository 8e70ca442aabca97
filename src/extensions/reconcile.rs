//! Reconciliation of settings with registry metadata.
//!
//! A [`ConfiguredExtension`] is a purely derived view: it is recomputed
//! whenever the cascade or the registry records change and has no identity
//! beyond its extension id.

use std::sync::Arc;

use super::error::{AggregateError, ExtensionResult};
use super::manifest::ExtensionManifest;
use super::registry::{RegistryClient, RegistryExtension};
use super::ExtensionId;
use crate::settings::{Cascade, ExtensionSettings, ParseError, SettingsOrError, Subject};

/// An extension's settings at one level of the cascade.
#[derive(Debug, Clone, PartialEq)]
pub struct SubjectExtensionSettings {
    pub subject: Subject,
    pub settings: SettingsOrError<ExtensionSettings>,
}

/// Registry fields kept on a configured extension.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegistryExtensionRef {
    pub id: String,
    pub url: String,
    pub viewer_can_administer: bool,
}

/// An extension as seen through the settings cascade and the registry.
#[derive(Debug, Clone, PartialEq)]
pub struct ConfiguredExtension {
    pub extension_id: ExtensionId,

    /// Merged settings for this extension, if it is added.
    pub settings: Option<ExtensionSettings>,

    /// Per-subject settings, in cascade order.
    pub settings_cascade: Vec<SubjectExtensionSettings>,

    /// Added and not disabled.
    pub is_enabled: bool,

    /// An entry exists in the merged `extensions` map.
    pub is_added: bool,

    /// Parsed manifest, parse error, or `None` without a registry manifest.
    pub manifest: SettingsOrError<ExtensionManifest>,

    pub raw_manifest: Option<String>,

    pub registry_extension: Option<RegistryExtensionRef>,
}

impl ConfiguredExtension {
    /// The manifest, if it parsed successfully.
    pub fn parsed_manifest(&self) -> Option<&ExtensionManifest> {
        match &self.manifest {
            Some(Ok(manifest)) => Some(manifest),
            _ => None,
        }
    }

    /// The manifest parse error, if any.
    pub fn manifest_error(&self) -> Option<&ParseError> {
        match &self.manifest {
            Some(Err(e)) => Some(e),
            _ => None,
        }
    }

    pub fn title(&self) -> &str {
        self.parsed_manifest()
            .and_then(|m| m.title.as_deref())
            .unwrap_or(&self.extension_id)
    }
}

/// Extension ids added in the merged settings, in document order.
///
/// Fails if the merged settings are an error. No merged settings means no ids.
pub fn merged_extension_ids(cascade: &Cascade) -> ExtensionResult<Vec<ExtensionId>> {
    match &cascade.merged {
        Some(Err(e)) => Err(e.clone().into()),
        Some(Ok(settings)) => Ok(settings.extension_ids()),
        None => Ok(Vec::new()),
    }
}

/// Build configured extensions for `ids`, in that order.
///
/// Registry records are matched by extension id. Fails as a whole if the
/// merged settings are an error.
pub fn reconcile(
    cascade: &Cascade,
    ids: &[ExtensionId],
    registry: &[RegistryExtension],
) -> ExtensionResult<Vec<ConfiguredExtension>> {
    let merged = match &cascade.merged {
        Some(Err(e)) => return Err(e.clone().into()),
        Some(Ok(settings)) => Some(settings),
        None => None,
    };

    Ok(ids
        .iter()
        .map(|id| {
            let settings = merged.and_then(|m| m.extension(id));
            let is_added = settings.is_some();
            let is_enabled = settings.as_ref().is_some_and(|s| !s.is_disabled());

            let settings_cascade = cascade
                .subjects
                .iter()
                .map(|configured| SubjectExtensionSettings {
                    subject: configured.subject.clone(),
                    settings: match &configured.settings {
                        Some(Ok(s)) => s.extension(id).map(Ok),
                        Some(Err(e)) => Some(Err(e.clone())),
                        None => None,
                    },
                })
                .collect();

            let record = registry.iter().find(|r| &r.extension_id == id);
            let raw_manifest = record.and_then(|r| r.raw_manifest.clone());
            let manifest = raw_manifest.as_deref().map(ExtensionManifest::parse);

            ConfiguredExtension {
                extension_id: id.clone(),
                settings,
                settings_cascade,
                is_enabled,
                is_added,
                manifest,
                raw_manifest,
                registry_extension: record.map(|r| RegistryExtensionRef {
                    id: r.id.clone(),
                    url: r.url.clone(),
                    viewer_can_administer: r.viewer_can_administer,
                }),
            }
        })
        .collect())
}

/// Configured extensions for registry records, in registry order.
pub fn with_configuration(
    cascade: &Cascade,
    registry: &[RegistryExtension],
) -> ExtensionResult<Vec<ConfiguredExtension>> {
    let ids: Vec<ExtensionId> = registry.iter().map(|r| r.extension_id.clone()).collect();
    reconcile(cascade, &ids, registry)
}

/// Search results joined with settings.
#[derive(Debug, Clone, PartialEq)]
pub struct ConfiguredSearchResults {
    pub extensions: Vec<ConfiguredExtension>,

    /// Registry-side error reported alongside the results.
    pub error: Option<String>,
}

/// Joins cascades with records fetched from a [`RegistryClient`].
#[derive(Clone)]
pub struct Reconciler {
    registry: Arc<dyn RegistryClient>,
}

impl Reconciler {
    pub fn new(registry: Arc<dyn RegistryClient>) -> Self {
        Self { registry }
    }

    /// Configured extensions for every id in the merged `extensions` map.
    pub async fn configured_extensions(
        &self,
        cascade: &Cascade,
    ) -> ExtensionResult<Vec<ConfiguredExtension>> {
        let ids = merged_extension_ids(cascade)?;
        if ids.is_empty() {
            return Ok(Vec::new());
        }

        let records = self.registry.extensions(&ids).await?;
        tracing::debug!(
            requested = ids.len(),
            found = records.len(),
            "Fetched registry extensions"
        );
        reconcile(cascade, &ids, &records)
    }

    /// One extension, whether or not it is added.
    pub async fn for_extension_id(
        &self,
        cascade: &Cascade,
        extension_id: &str,
    ) -> ExtensionResult<ConfiguredExtension> {
        merged_extension_ids(cascade)?;
        let record = self.registry.extension(extension_id).await?;
        with_configuration(cascade, std::slice::from_ref(&record))?
            .into_iter()
            .next()
            .ok_or_else(|| AggregateError::single(format!("Extension '{}' not found", extension_id)))
    }

    /// Search the registry, listing added extensions first.
    pub async fn search(
        &self,
        cascade: &Cascade,
        query: &str,
    ) -> ExtensionResult<ConfiguredSearchResults> {
        let prioritize = merged_extension_ids(cascade)?;
        let results = self.registry.search(query, &prioritize).await?;
        Ok(ConfiguredSearchResults {
            extensions: with_configuration(cascade, &results.extensions)?,
            error: results.error,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::extensions::registry::StaticRegistry;
    use crate::settings::{resolve, RawCascade, RawSubject, SubjectKind};
    use pretty_assertions::assert_eq;

    fn cascade(user: Option<&str>, merged: Option<&str>) -> Cascade {
        resolve(&RawCascade {
            subjects: vec![RawSubject {
                subject: Subject::new("u1", SubjectKind::User, "alice"),
                settings: user.map(str::to_string),
            }],
            merged: merged.map(str::to_string),
        })
    }

    fn record(id: &str, manifest: Option<&str>) -> RegistryExtension {
        RegistryExtension {
            id: format!("node-{}", id),
            extension_id: id.to_string(),
            url: format!("/extensions/{}", id),
            raw_manifest: manifest.map(str::to_string),
            viewer_can_administer: true,
        }
    }

    #[test]
    fn test_enabled_added_scenario() {
        let cascade = cascade(
            Some(r#"{"extensions": {"foo": {"disabled": false}}}"#),
            Some(r#"{"extensions": {"foo": {}}}"#),
        );
        let exts = reconcile(&cascade, &["foo".to_string()], &[]).unwrap();

        assert_eq!(exts.len(), 1);
        let foo = &exts[0];
        assert_eq!(foo.extension_id, "foo");
        assert!(foo.is_added);
        assert!(foo.is_enabled);
        assert!(foo.manifest.is_none());
        assert!(foo.raw_manifest.is_none());
        assert_eq!(foo.settings_cascade.len(), 1);
        assert_eq!(foo.settings_cascade[0].subject.id, "u1");
        assert!(matches!(foo.settings_cascade[0].settings, Some(Ok(_))));
    }

    #[test]
    fn test_malformed_merged_fails_whole() {
        let cascade = cascade(
            Some(r#"{"extensions": {"foo": {"disabled": false}}}"#),
            Some("{ extensions: "),
        );
        assert!(cascade.merged_error().is_some());
        let err = reconcile(&cascade, &["foo".to_string()], &[]).unwrap_err();
        assert_eq!(err.errors.len(), 1);
    }

    #[test]
    fn test_disabled_and_absent() {
        let cascade = cascade(None, Some(r#"{"extensions": {"off": {"disabled": true}, "null": null}}"#));
        let ids: Vec<ExtensionId> = ["off", "null", "missing"].iter().map(|s| s.to_string()).collect();
        let exts = reconcile(&cascade, &ids, &[]).unwrap();

        assert!(exts[0].is_added && !exts[0].is_enabled);
        assert!(exts[1].is_added && exts[1].is_enabled);
        assert!(!exts[2].is_added && !exts[2].is_enabled);
        assert!(exts[2].settings.is_none());
    }

    #[test]
    fn test_subject_parse_error_stays_scoped() {
        let cascade = cascade(Some("{ nope"), Some(r#"{"extensions": {"foo": {}}}"#));
        let exts = reconcile(&cascade, &["foo".to_string()], &[]).unwrap();
        assert!(exts[0].is_enabled);
        assert!(matches!(exts[0].settings_cascade[0].settings, Some(Err(_))));
    }

    #[test]
    fn test_manifest_from_registry_record() {
        let cascade = cascade(None, Some(r#"{"extensions": {"good": {}, "bad": {}}}"#));
        let records = vec![
            record("bad", Some("{ not a manifest")),
            record(
                "good",
                Some(r#"{"title": "Good", "platform": {"type": "tcp", "address": "h:1"}}"#),
            ),
        ];
        let exts = reconcile(&cascade, &["good".to_string(), "bad".to_string()], &records).unwrap();

        assert_eq!(exts[0].title(), "Good");
        assert_eq!(exts[0].registry_extension.as_ref().map(|r| r.url.as_str()), Some("/extensions/good"));
        assert!(exts[1].manifest_error().is_some());
        assert_eq!(exts[1].title(), "bad");
    }

    #[test]
    fn test_with_configuration_uses_registry_order() {
        let cascade = cascade(None, Some(r#"{"extensions": {"a": {}}}"#));
        let records = vec![record("b", None), record("a", None)];
        let exts = with_configuration(&cascade, &records).unwrap();
        let ids: Vec<_> = exts.iter().map(|e| e.extension_id.as_str()).collect();
        assert_eq!(ids, vec!["b", "a"]);
        assert!(!exts[0].is_added);
        assert!(exts[1].is_enabled);
    }

    #[tokio::test]
    async fn test_reconciler_default_mode_keeps_settings_order() {
        let registry = StaticRegistry::new(vec![record("a", None), record("z", None)]);
        let reconciler = Reconciler::new(Arc::new(registry));
        let cascade = cascade(None, Some(r#"{"extensions": {"z": {}, "a": {}}}"#));

        let exts = reconciler.configured_extensions(&cascade).await.unwrap();
        let ids: Vec<_> = exts.iter().map(|e| e.extension_id.as_str()).collect();
        assert_eq!(ids, vec!["z", "a"]);
        assert!(exts.iter().all(|e| e.registry_extension.is_some()));
    }

    #[tokio::test]
    async fn test_reconciler_empty_and_errored_merged() {
        let reconciler = Reconciler::new(Arc::new(StaticRegistry::default()));

        let empty = cascade(None, None);
        assert!(reconciler.configured_extensions(&empty).await.unwrap().is_empty());

        let broken = cascade(None, Some("{"));
        assert!(reconciler.configured_extensions(&broken).await.is_err());
        assert!(reconciler.search(&broken, "x").await.is_err());
    }

    #[tokio::test]
    async fn test_reconciler_single_lookup() {
        let registry = StaticRegistry::new(vec![record("a", None)]);
        let reconciler = Reconciler::new(Arc::new(registry));
        let cascade = cascade(None, Some(r#"{"extensions": {}}"#));

        let ext = reconciler.for_extension_id(&cascade, "a").await.unwrap();
        assert!(!ext.is_added);
        assert!(reconciler.for_extension_id(&cascade, "missing").await.is_err());
    }
}
