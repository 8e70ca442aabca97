//! Settings resolver.
//!
//! Turns raw cascade text into [`Cascade`] values and publishes them on a
//! watch channel. A cascade is only published when it differs structurally
//! from the previous one, so subscribers never see two identical cascades in a
//! row. Key order is part of the structure; formatting and comments are not.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::watch;

use super::cascade::{Cascade, ConfiguredSubject, Settings, Subject};

/// A subject and its raw settings text, as supplied by the configuration source.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawSubject {
    pub subject: Subject,

    #[serde(default)]
    pub settings: Option<String>,
}

/// Raw cascade as supplied by the configuration source.
///
/// `merged` is the authoritative pre-merged settings text. It is trusted as-is:
/// subject settings are not re-merged on this side.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawCascade {
    pub subjects: Vec<RawSubject>,

    #[serde(default)]
    pub merged: Option<String>,
}

/// Parse every present settings text in a raw cascade.
///
/// Parse failures are attached in place of the settings they replace.
pub fn resolve(raw: &RawCascade) -> Cascade {
    Cascade {
        subjects: raw
            .subjects
            .iter()
            .map(|s| ConfiguredSubject {
                subject: s.subject.clone(),
                settings: s.settings.as_deref().map(Settings::parse),
            })
            .collect(),
        merged: raw.merged.as_deref().map(Settings::parse),
    }
}

/// Publishes deduplicated cascades.
#[derive(Debug)]
pub struct SettingsResolver {
    cascade: watch::Sender<Option<Arc<Cascade>>>,
    raw: watch::Sender<Option<RawCascade>>,
}

impl Default for SettingsResolver {
    fn default() -> Self {
        Self::new()
    }
}

impl SettingsResolver {
    pub fn new() -> Self {
        let (cascade, _) = watch::channel(None);
        let (raw, _) = watch::channel(None);
        Self { cascade, raw }
    }

    /// Resolve a new raw cascade.
    ///
    /// Returns `true` if a new cascade was published, `false` if it was
    /// structurally identical to the current one.
    pub fn update(&self, raw: RawCascade) -> bool {
        let cascade = resolve(&raw);
        self.raw.send_replace(Some(raw));

        let published = self.cascade.send_if_modified(|current| {
            if current.as_deref() == Some(&cascade) {
                return false;
            }
            *current = Some(Arc::new(cascade));
            true
        });

        if published {
            tracing::debug!("Configuration cascade changed");
        } else {
            tracing::trace!("Configuration cascade unchanged, not publishing");
        }
        published
    }

    /// Subscribe to cascade changes. The current value is marked as seen.
    pub fn subscribe(&self) -> watch::Receiver<Option<Arc<Cascade>>> {
        self.cascade.subscribe()
    }

    /// The most recently published cascade.
    pub fn current(&self) -> Option<Arc<Cascade>> {
        self.cascade.borrow().clone()
    }

    /// The raw merged settings text of the latest update.
    pub fn merged_text(&self) -> Option<String> {
        self.raw
            .borrow()
            .as_ref()
            .and_then(|raw| raw.merged.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::settings::cascade::SubjectKind;

    fn raw(user_settings: Option<&str>, merged: &str) -> RawCascade {
        RawCascade {
            subjects: vec![RawSubject {
                subject: Subject::new("u1", SubjectKind::User, "alice"),
                settings: user_settings.map(str::to_string),
            }],
            merged: Some(merged.to_string()),
        }
    }

    #[test]
    fn test_resolve_attaches_parse_errors() {
        let cascade = resolve(&raw(Some("{ broken"), r#"{"extensions": {}}"#));
        assert!(matches!(cascade.subjects[0].settings, Some(Err(_))));
        assert!(matches!(cascade.merged, Some(Ok(_))));
    }

    #[test]
    fn test_resolve_absent_settings() {
        let cascade = resolve(&RawCascade {
            subjects: vec![RawSubject {
                subject: Subject::new("site", SubjectKind::Site, "Site"),
                settings: None,
            }],
            merged: None,
        });
        assert!(cascade.subjects[0].settings.is_none());
        assert!(cascade.merged.is_none());
    }

    #[test]
    fn test_identical_text_publishes_once() {
        let resolver = SettingsResolver::new();
        let rx = resolver.subscribe();

        assert!(resolver.update(raw(None, r#"{"extensions": {"foo": {}}}"#)));
        assert!(rx.has_changed().unwrap());

        let mut rx = resolver.subscribe();
        assert!(!resolver.update(raw(None, r#"{"extensions": {"foo": {}}}"#)));
        assert!(!rx.has_changed().unwrap());

        // Formatting-only changes are structurally identical too.
        assert!(!resolver.update(raw(None, "{\n  // same\n  \"extensions\": {\"foo\": {}},\n}")));
        assert!(!rx.has_changed().unwrap());

        assert!(resolver.update(raw(None, r#"{"extensions": {"bar": {}}}"#)));
        assert!(rx.has_changed().unwrap());
        let _ = rx.borrow_and_update();
    }

    #[test]
    fn test_reordered_extensions_republish() {
        let resolver = SettingsResolver::new();
        assert!(resolver.update(raw(None, r#"{"extensions": {"a": {}, "b": {}}}"#)));

        let mut rx = resolver.subscribe();
        assert!(resolver.update(raw(None, r#"{"extensions": {"b": {}, "a": {}}}"#)));
        assert!(rx.has_changed().unwrap());

        let cascade = rx.borrow_and_update().clone().unwrap();
        let merged = cascade.merged.clone().unwrap().unwrap();
        assert_eq!(merged.extension_ids(), vec!["b", "a"]);
    }

    #[test]
    fn test_merged_text_tracks_latest_update() {
        let resolver = SettingsResolver::new();
        assert!(resolver.merged_text().is_none());
        resolver.update(raw(None, "{}"));
        resolver.update(raw(None, "{ }"));
        assert_eq!(resolver.merged_text().as_deref(), Some("{ }"));
        assert!(resolver.current().is_some());
    }
}
