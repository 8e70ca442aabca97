//! Extension registry lookups.
//!
//! The registry is a read-only remote source of extension records. Lookups are
//! all-or-nothing: any failure surfaces as one [`AggregateError`].

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::json;

use super::error::{AggregateError, ExtensionResult, RegistryError};
use super::ExtensionId;
use crate::config::RegistryConfig;

/// An extension record from the registry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegistryExtension {
    /// Registry-internal node id.
    pub id: String,

    #[serde(rename = "extensionID")]
    pub extension_id: ExtensionId,

    /// Registry page for the extension.
    pub url: String,

    /// Manifest text as published, if the extension has one.
    #[serde(default)]
    pub raw_manifest: Option<String>,

    #[serde(default)]
    pub viewer_can_administer: bool,
}

/// Results of a free-text registry search.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SearchResults {
    pub extensions: Vec<RegistryExtension>,

    /// Registry-side error reported alongside the results.
    pub error: Option<String>,
}

/// Read-only access to extension records.
#[async_trait]
pub trait RegistryClient: Send + Sync {
    /// Look up extensions by id. Ids the registry doesn't know are omitted.
    async fn extensions(&self, ids: &[ExtensionId]) -> ExtensionResult<Vec<RegistryExtension>>;

    /// Look up one extension. A missing record is an error.
    async fn extension(&self, id: &str) -> ExtensionResult<RegistryExtension>;

    /// Search the registry, listing `prioritize` ids first when they match.
    async fn search(&self, query: &str, prioritize: &[ExtensionId])
        -> ExtensionResult<SearchResults>;
}

const NODE_FIELDS: &str = "id extensionID url manifest { raw } viewerCanAdminister";

/// Registry client speaking GraphQL over HTTP.
pub struct GraphQlRegistry {
    http: reqwest::Client,
    url: String,
    token: Option<String>,
}

impl GraphQlRegistry {
    pub fn new(config: &RegistryConfig) -> Self {
        Self {
            http: reqwest::Client::new(),
            url: config.url.clone(),
            token: config.token.clone(),
        }
    }

    async fn query<T: DeserializeOwned>(
        &self,
        query: &str,
        variables: serde_json::Value,
    ) -> ExtensionResult<T> {
        let mut request = self
            .http
            .post(&self.url)
            .json(&json!({ "query": query, "variables": variables }));
        if let Some(token) = &self.token {
            request = request.header(reqwest::header::AUTHORIZATION, format!("token {}", token));
        }

        let response = request.send().await.map_err(RegistryError::from)?;
        if !response.status().is_success() {
            return Err(RegistryError::Status(response.status()).into());
        }

        let body: GraphQlResponse<T> = response.json().await.map_err(RegistryError::from)?;
        body.into_result()
    }
}

#[async_trait]
impl RegistryClient for GraphQlRegistry {
    async fn extensions(&self, ids: &[ExtensionId]) -> ExtensionResult<Vec<RegistryExtension>> {
        let query = format!(
            "query Extensions($first: Int!, $prioritizeExtensionIDs: [String!]!) {{
                extensionRegistry {{
                    extensions(first: $first, prioritizeExtensionIDs: $prioritizeExtensionIDs) {{
                        nodes {{ {} }}
                    }}
                }}
            }}",
            NODE_FIELDS
        );
        let data: RegistryData<ExtensionsData> = self
            .query(
                &query,
                json!({ "first": ids.len(), "prioritizeExtensionIDs": ids }),
            )
            .await?;

        // The registry returns prioritized ids first and may pad with others.
        Ok(data
            .extension_registry
            .extensions
            .nodes
            .into_iter()
            .map(RegistryExtension::from)
            .filter(|ext| ids.contains(&ext.extension_id))
            .collect())
    }

    async fn extension(&self, id: &str) -> ExtensionResult<RegistryExtension> {
        let query = format!(
            "query Extension($extensionID: String!) {{
                extensionRegistry {{
                    extension(extensionID: $extensionID) {{ {} }}
                }}
            }}",
            NODE_FIELDS
        );
        let data: RegistryData<ExtensionData> =
            self.query(&query, json!({ "extensionID": id })).await?;

        data.extension_registry
            .extension
            .map(RegistryExtension::from)
            .ok_or_else(|| RegistryError::ExtensionNotFound(id.to_string()).into())
    }

    async fn search(
        &self,
        query_text: &str,
        prioritize: &[ExtensionId],
    ) -> ExtensionResult<SearchResults> {
        let query = format!(
            "query SearchExtensions($query: String, $prioritizeExtensionIDs: [String!]!) {{
                extensionRegistry {{
                    extensions(query: $query, prioritizeExtensionIDs: $prioritizeExtensionIDs) {{
                        nodes {{ {} }}
                        error
                    }}
                }}
            }}",
            NODE_FIELDS
        );
        let data: RegistryData<ExtensionsData> = self
            .query(
                &query,
                json!({ "query": query_text, "prioritizeExtensionIDs": prioritize }),
            )
            .await?;

        let connection = data.extension_registry.extensions;
        Ok(SearchResults {
            extensions: connection
                .nodes
                .into_iter()
                .map(RegistryExtension::from)
                .collect(),
            error: connection.error,
        })
    }
}

#[derive(Debug, Deserialize)]
struct GraphQlResponse<T> {
    data: Option<T>,

    #[serde(default)]
    errors: Vec<GraphQlError>,
}

impl<T> GraphQlResponse<T> {
    /// Every reported error becomes one entry of the aggregate.
    fn into_result(self) -> ExtensionResult<T> {
        if !self.errors.is_empty() {
            return Err(AggregateError::new(self.errors.into_iter().map(|e| e.message)));
        }
        self.data.ok_or_else(|| RegistryError::NoData.into())
    }
}

#[derive(Debug, Deserialize)]
struct GraphQlError {
    message: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RegistryData<T> {
    extension_registry: T,
}

#[derive(Debug, Deserialize)]
struct ExtensionsData {
    extensions: ExtensionConnection,
}

#[derive(Debug, Deserialize)]
struct ExtensionData {
    extension: Option<ExtensionNode>,
}

#[derive(Debug, Deserialize)]
struct ExtensionConnection {
    #[serde(default)]
    nodes: Vec<ExtensionNode>,

    #[serde(default)]
    error: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ExtensionNode {
    id: String,

    #[serde(rename = "extensionID")]
    extension_id: String,

    url: String,

    #[serde(default)]
    manifest: Option<ManifestNode>,

    #[serde(default)]
    viewer_can_administer: bool,
}

#[derive(Debug, Deserialize)]
struct ManifestNode {
    raw: Option<String>,
}

impl From<ExtensionNode> for RegistryExtension {
    fn from(node: ExtensionNode) -> Self {
        Self {
            id: node.id,
            extension_id: node.extension_id,
            url: node.url,
            raw_manifest: node.manifest.and_then(|m| m.raw),
            viewer_can_administer: node.viewer_can_administer,
        }
    }
}

/// A registry backed by a fixed list of records.
///
/// Used offline and in tests. Search matches the query as a case-insensitive
/// substring of the extension id.
#[derive(Debug, Clone, Default)]
pub struct StaticRegistry {
    extensions: Vec<RegistryExtension>,
}

impl StaticRegistry {
    pub fn new(extensions: Vec<RegistryExtension>) -> Self {
        Self { extensions }
    }
}

#[async_trait]
impl RegistryClient for StaticRegistry {
    async fn extensions(&self, ids: &[ExtensionId]) -> ExtensionResult<Vec<RegistryExtension>> {
        Ok(self
            .extensions
            .iter()
            .filter(|ext| ids.contains(&ext.extension_id))
            .cloned()
            .collect())
    }

    async fn extension(&self, id: &str) -> ExtensionResult<RegistryExtension> {
        self.extensions
            .iter()
            .find(|ext| ext.extension_id == id)
            .cloned()
            .ok_or_else(|| RegistryError::ExtensionNotFound(id.to_string()).into())
    }

    async fn search(
        &self,
        query: &str,
        prioritize: &[ExtensionId],
    ) -> ExtensionResult<SearchResults> {
        let needle = query.to_lowercase();
        let (mut first, rest): (Vec<_>, Vec<_>) = self
            .extensions
            .iter()
            .filter(|ext| ext.extension_id.to_lowercase().contains(&needle))
            .cloned()
            .partition(|ext| prioritize.contains(&ext.extension_id));
        first.extend(rest);
        Ok(SearchResults {
            extensions: first,
            error: None,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(id: &str) -> RegistryExtension {
        RegistryExtension {
            id: format!("node-{}", id),
            extension_id: id.to_string(),
            url: format!("https://registry.example/{}", id),
            raw_manifest: None,
            viewer_can_administer: false,
        }
    }

    #[test]
    fn test_node_manifest_flattened() {
        let node: ExtensionNode = serde_json::from_value(json!({
            "id": "n1",
            "extensionID": "acme/go",
            "url": "/x",
            "manifest": {"raw": "{}"},
            "viewerCanAdminister": true
        }))
        .unwrap();
        let ext = RegistryExtension::from(node);
        assert_eq!(ext.raw_manifest.as_deref(), Some("{}"));
        assert!(ext.viewer_can_administer);

        let node: ExtensionNode = serde_json::from_value(json!({
            "id": "n2", "extensionID": "acme/py", "url": "/y", "manifest": null
        }))
        .unwrap();
        assert!(RegistryExtension::from(node).raw_manifest.is_none());
    }

    #[test]
    fn test_graphql_errors_decode() {
        let body: GraphQlResponse<RegistryData<ExtensionData>> = serde_json::from_value(json!({
            "data": null,
            "errors": [{"message": "denied"}]
        }))
        .unwrap();
        assert!(body.data.is_none());
        assert_eq!(body.errors[0].message, "denied");
    }

    #[test]
    fn test_graphql_errors_aggregate() {
        let body: GraphQlResponse<serde_json::Value> = serde_json::from_value(json!({
            "data": {"partial": true},
            "errors": [{"message": "denied"}, {"message": "rate limited"}]
        }))
        .unwrap();
        let err = body.into_result().unwrap_err();
        assert_eq!(err.errors, vec!["denied".to_string(), "rate limited".to_string()]);

        let empty: GraphQlResponse<serde_json::Value> =
            serde_json::from_value(json!({"data": null})).unwrap();
        assert_eq!(
            empty.into_result().unwrap_err().to_string(),
            RegistryError::NoData.to_string()
        );
    }

    #[tokio::test]
    async fn test_static_registry_lookups() {
        let registry = StaticRegistry::new(vec![record("a/one"), record("b/two")]);

        let found = registry.extensions(&["b/two".to_string()]).await.unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].extension_id, "b/two");

        let err = registry.extension("c/three").await.unwrap_err();
        assert!(err.to_string().contains("c/three"));

        let results = registry.search("", &["b/two".to_string()]).await.unwrap();
        let ids: Vec<_> = results.extensions.iter().map(|e| e.extension_id.as_str()).collect();
        assert_eq!(ids, vec!["b/two", "a/one"]);
    }
}
