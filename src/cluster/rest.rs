//! Kubernetes REST API client

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Method, StatusCode};
use serde::Deserialize;
use serde_json::Value;
use tracing::debug;

use super::api::{ApiError, ClusterApi, DeploymentState, NamespaceInfo, PodInfo};
use crate::config::{expand_path, ClusterConfig};
use crate::manifest::objects::{LabelSelector, Manifest, ObjectKind};

#[derive(Debug, Deserialize)]
struct ObjectList {
    #[serde(default)]
    items: Vec<Value>,
}

/// Collection path for a kind, e.g. `/apis/apps/v1/namespaces/ns/deployments`
pub fn collection_path(kind: ObjectKind, namespace: Option<&str>) -> String {
    let api_version = kind.api_version();
    let prefix = if api_version.contains('/') {
        format!("/apis/{}", api_version)
    } else {
        format!("/api/{}", api_version)
    };
    match (kind.is_namespaced(), namespace) {
        (true, Some(ns)) => format!("{}/namespaces/{}/{}", prefix, ns, kind.plural()),
        _ => format!("{}/{}", prefix, kind.plural()),
    }
}

/// Item path for a named object
pub fn object_path(kind: ObjectKind, namespace: Option<&str>, name: &str) -> String {
    format!("{}/{}", collection_path(kind, namespace), name)
}

/// Client for a Kubernetes API server with bearer-token auth
#[derive(Clone)]
pub struct RestCluster {
    client: reqwest::Client,
    base_url: String,
    token: Option<String>,
}

impl RestCluster {
    pub fn new(base_url: impl Into<String>, token: Option<String>) -> Result<Self, ApiError> {
        let client = reqwest::Client::builder()
            .build()
            .map_err(|e| ApiError::Http(e.to_string()))?;
        Ok(Self {
            client,
            base_url: base_url.into(),
            token,
        })
    }

    /// Build from the `cluster` config section
    pub fn from_config(config: &ClusterConfig) -> Result<Self, ApiError> {
        let base_url = config
            .api_url
            .clone()
            .ok_or_else(|| ApiError::Config("cluster.apiUrl is not set".to_string()))?;

        let token = match &config.token_file {
            Some(file) => {
                let path = expand_path(file).map_err(|e| ApiError::Config(e.to_string()))?;
                let raw = std::fs::read_to_string(&path).map_err(|e| {
                    ApiError::Config(format!("cannot read token file {}: {}", path.display(), e))
                })?;
                Some(raw.trim().to_string())
            }
            None => std::env::var(&config.token_env).ok(),
        };

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.apply_timeout_secs))
            .danger_accept_invalid_certs(config.insecure_skip_tls_verify)
            .build()
            .map_err(|e| ApiError::Http(e.to_string()))?;

        Ok(Self {
            client,
            base_url,
            token,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    async fn request(
        &self,
        method: Method,
        path: &str,
        query: &[(&str, String)],
        body: Option<&Value>,
        identity: &str,
    ) -> Result<Value, ApiError> {
        let url = format!("{}{}", self.base_url.trim_end_matches('/'), path);
        debug!(%method, %url, "Cluster API request");

        let mut req = self.client.request(method, &url).query(query);
        if let Some(body) = body {
            req = req.json(body);
        }
        if let Some(ref token) = self.token {
            req = req.header("Authorization", format!("Bearer {}", token));
        }

        let response = req.send().await.map_err(|e| ApiError::Http(e.to_string()))?;

        let status = response.status();
        match status {
            StatusCode::CONFLICT => return Err(ApiError::AlreadyExists(identity.to_string())),
            StatusCode::NOT_FOUND => return Err(ApiError::NotFound(identity.to_string())),
            s if !s.is_success() => {
                let text = response
                    .text()
                    .await
                    .unwrap_or_else(|_| "Unknown error".to_string());
                return Err(ApiError::Api {
                    status: status.as_u16(),
                    message: text,
                });
            }
            _ => {}
        }

        let text = response
            .text()
            .await
            .map_err(|e| ApiError::Http(e.to_string()))?;
        if text.trim().is_empty() {
            return Ok(Value::Null);
        }
        serde_json::from_str(&text).map_err(|e| ApiError::Parse(e.to_string()))
    }

    async fn list(
        &self,
        kind: ObjectKind,
        namespace: Option<&str>,
        query: &[(&str, String)],
    ) -> Result<Vec<Value>, ApiError> {
        let path = collection_path(kind, namespace);
        let value = self.request(Method::GET, &path, query, None, &path).await?;
        let list: ObjectList =
            serde_json::from_value(value).map_err(|e| ApiError::Parse(e.to_string()))?;
        Ok(list.items)
    }
}

#[async_trait]
impl ClusterApi for RestCluster {
    async fn create(&self, manifest: &Manifest) -> Result<(), ApiError> {
        let path = collection_path(manifest.kind, manifest.namespace.as_deref());
        self.request(
            Method::POST,
            &path,
            &[],
            Some(&manifest.body),
            &manifest.identity(),
        )
        .await?;
        Ok(())
    }

    async fn replace(&self, manifest: &Manifest) -> Result<(), ApiError> {
        let path = object_path(manifest.kind, manifest.namespace.as_deref(), &manifest.name);
        self.request(
            Method::PUT,
            &path,
            &[],
            Some(&manifest.body),
            &manifest.identity(),
        )
        .await?;
        Ok(())
    }

    async fn get(
        &self,
        kind: ObjectKind,
        namespace: Option<&str>,
        name: &str,
    ) -> Result<Value, ApiError> {
        let path = object_path(kind, namespace, name);
        self.request(Method::GET, &path, &[], None, &path).await
    }

    async fn delete(
        &self,
        kind: ObjectKind,
        namespace: Option<&str>,
        name: &str,
    ) -> Result<(), ApiError> {
        let path = object_path(kind, namespace, name);
        self.request(Method::DELETE, &path, &[], None, &path).await?;
        Ok(())
    }

    async fn list_namespaces(
        &self,
        selector: &LabelSelector,
    ) -> Result<Vec<NamespaceInfo>, ApiError> {
        let query = [("labelSelector", selector.to_query())];
        let items = self.list(ObjectKind::Namespace, None, &query).await?;
        Ok(items.iter().filter_map(NamespaceInfo::from_object).collect())
    }

    async fn list_deployments(&self, namespace: &str) -> Result<Vec<DeploymentState>, ApiError> {
        let items = self
            .list(ObjectKind::Deployment, Some(namespace), &[])
            .await?;
        Ok(items.iter().filter_map(DeploymentState::from_object).collect())
    }

    async fn list_pods(&self, namespace: &str) -> Result<Vec<PodInfo>, ApiError> {
        // Pods are core/v1 but not an ObjectKind this crate creates
        let path = format!("/api/v1/namespaces/{}/pods", namespace);
        let value = self.request(Method::GET, &path, &[], None, &path).await?;
        let list: ObjectList =
            serde_json::from_value(value).map_err(|e| ApiError::Parse(e.to_string()))?;
        Ok(list.items.iter().filter_map(PodInfo::from_object).collect())
    }
}
