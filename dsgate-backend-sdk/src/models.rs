//! # Wire Types Module
//!
//! This module defines the data types exchanged between the gateway and
//! plugin backends: repository manifests describing installable plugins,
//! and the request/response payloads of the backend RPC contract.
//!
//! ## Overview
//!
//! Two families of types live here:
//!
//! - **Manifest types**: `RepositoryManifest`, `PluginDescriptor`,
//!   `PluginVersion` and friends. Manifests are authoritative read-only
//!   inputs fetched from configured repositories; the gateway never writes
//!   them back.
//! - **RPC payloads**: the bodies of the five backend operations
//!   (`GetPluginInfo`, `Query`, `Mutate`, `GetSchema`, `HealthCheck`).
//!
//! ## Opaque Query and Payload Objects
//!
//! The gateway is dialect-agnostic: `QueryRequest.query` and the mutate
//! payloads are structured JSON values forwarded verbatim. Validation of
//! their shape is the backend's job.
//!
//! ## Mutate Operations
//!
//! `MutateOperation` is a tagged one-of over the three concrete shapes a
//! backend accepts. The gateway forwards the tag and payload without
//! introspection:
//!
//! ```rust
//! use dsgate_backend_sdk::models::MutateOperation;
//! use serde_json::json;
//!
//! let op = MutateOperation::Create {
//!     payload: json!({"title": "Dune", "author": "Herbert"}),
//! };
//! let wire = serde_json::to_value(&op).unwrap();
//! assert_eq!(wire["operation"], "create");
//! ```

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;

// ---------------------------------------------------------------------------
// Repository manifest
// ---------------------------------------------------------------------------

/// A repository manifest: the list of plugins one repository offers.
///
/// Fetched from a repository URL by the catalog refresher and decoded as a
/// single JSON document.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RepositoryManifest {
    /// All plugin descriptors published by this repository
    pub plugins: Vec<PluginDescriptor>,
}

/// Descriptor of one installable plugin.
///
/// The `id` is a reverse-DNS string and is the key of the in-memory
/// catalog; descriptors from later-fetched repositories replace earlier
/// ones wholesale.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PluginDescriptor {
    /// Unique plugin identifier (reverse-DNS, e.g. `com.example.sqlite`)
    pub id: String,
    /// Human-readable plugin name
    pub name: String,
    /// Plugin author
    #[serde(default)]
    pub author: String,
    /// Free-form description
    #[serde(default)]
    pub description: String,
    /// Search tags
    #[serde(default)]
    pub tags: Vec<String>,
    /// Business groups this plugin can serve
    #[serde(default)]
    pub supported_biz_names: Vec<String>,
    /// Published versions, newest first by convention
    pub versions: Vec<PluginVersion>,
}

impl PluginDescriptor {
    /// Find a specific version of this plugin.
    pub fn find_version(&self, version: &str) -> Option<&PluginVersion> {
        self.versions.iter().find(|v| v.version == version)
    }
}

/// One published version of a plugin.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PluginVersion {
    /// Version string (e.g. `1.0.0`)
    pub version: String,
    /// Release timestamp
    #[serde(default)]
    pub released_at: Option<DateTime<Utc>>,
    /// Human-readable changelog
    #[serde(default)]
    pub changelog: String,
    /// Minimum gateway version this plugin requires
    #[serde(default)]
    pub min_gateway_version: Option<String>,
    /// Where to fetch the artifact and how to verify it
    pub source: ArtifactSource,
    /// How to run the unpacked artifact
    pub exec: ExecInfo,
}

/// Download location and integrity declaration for an artifact.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArtifactSource {
    /// Artifact URL; the scheme selects the downloader
    pub url: String,
    /// Expected digest of the form `sha256:<hex>`, if declared
    #[serde(default)]
    pub checksum: Option<String>,
}

/// Execution info for a plugin version.
///
/// `args` is a template; the supervisor substitutes `{port}`, `{biz}` and
/// `{instance_dir}` before spawning the child process.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecInfo {
    /// Entrypoint path relative to the unpacked artifact root
    pub entrypoint: String,
    /// Argument template
    #[serde(default)]
    pub args: Vec<String>,
}

// ---------------------------------------------------------------------------
// RPC payloads
// ---------------------------------------------------------------------------

/// Identity a backend reports during the handshake.
///
/// `supported_biz_names` is authoritative: the supervisor refuses to
/// promote an instance whose configured biz is not in the list. The type
/// and version are recorded for logging but not enforced against the
/// manifest.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PluginInfo {
    /// Backend type tag (e.g. `sqlite`, `http-proxy`)
    #[serde(rename = "type")]
    pub plugin_type: String,
    /// Backend version string
    pub version: String,
    /// Business groups this running instance can serve
    pub supported_biz_names: Vec<String>,
}

/// Query request forwarded to a backend.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueryRequest {
    /// Target business group
    pub biz_name: String,
    /// Opaque query object, passed through verbatim
    pub query: Value,
}

/// Result of a backend query.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueryResponse {
    /// Opaque result object
    pub result: Value,
    /// Tag naming the data source that produced the result
    #[serde(default)]
    pub source: String,
}

/// One-of over the concrete mutate shapes.
///
/// Serialized with an `operation` tag and a `payload` field, so additional
/// plugin-defined operations deserialize through the same envelope on the
/// backend side.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "operation", rename_all = "lowercase")]
pub enum MutateOperation {
    /// Insert new rows
    Create { payload: Value },
    /// Update existing rows
    Update { payload: Value },
    /// Delete rows
    Delete { payload: Value },
}

impl MutateOperation {
    /// Build an operation from its wire tag and opaque payload.
    ///
    /// Returns `None` for tags outside the supported set.
    pub fn from_parts(operation: &str, payload: Value) -> Option<Self> {
        match operation {
            "create" => Some(MutateOperation::Create { payload }),
            "update" => Some(MutateOperation::Update { payload }),
            "delete" => Some(MutateOperation::Delete { payload }),
            _ => None,
        }
    }

    /// The wire tag of this operation.
    pub fn tag(&self) -> &'static str {
        match self {
            MutateOperation::Create { .. } => "create",
            MutateOperation::Update { .. } => "update",
            MutateOperation::Delete { .. } => "delete",
        }
    }
}

/// Mutate request forwarded to a backend.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MutateRequest {
    /// Target business group
    pub biz_name: String,
    /// The operation, tagged on the wire
    #[serde(flatten)]
    pub operation: MutateOperation,
}

/// Result of a backend mutation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MutateResponse {
    /// Opaque result object
    pub result: Value,
    /// Tag naming the data source that applied the mutation
    #[serde(default)]
    pub source: String,
}

/// Schema request for one biz, optionally narrowed to one table.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchemaRequest {
    /// Target business group
    pub biz_name: String,
    /// Restrict the response to a single table
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub table_name: Option<String>,
}

/// Schema of the tables a backend exposes for one biz.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SchemaResponse {
    /// Tables keyed by table name
    pub tables: HashMap<String, TableSchema>,
}

/// Physical schema of one table.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TableSchema {
    /// Fields in declaration order
    pub fields: Vec<FieldSchema>,
}

/// One field of a backend table.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FieldSchema {
    /// Field name
    pub name: String,
    /// Declared data type (`string`, `number`, `date`, ...)
    pub data_type: String,
    /// Whether the field may appear in query conditions
    #[serde(default)]
    pub is_searchable: bool,
    /// Whether the field may appear in results
    #[serde(default)]
    pub is_returnable: bool,
    /// Whether the field is part of the primary key
    #[serde(default)]
    pub is_primary: bool,
    /// Free-form description
    #[serde(default)]
    pub description: String,
}

/// Health probe result.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthStatus {
    /// `ok` when the backend considers itself serviceable
    pub status: String,
    /// Optional diagnostic detail
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

impl HealthStatus {
    /// A passing health status.
    pub fn ok() -> Self {
        Self {
            status: "ok".to_string(),
            detail: None,
        }
    }

    /// Whether the probe passed.
    pub fn is_ok(&self) -> bool {
        self.status == "ok"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_mutate_operation_wire_shape() {
        let op = MutateOperation::Update {
            payload: json!({"id": 7, "title": "Dune"}),
        };
        let wire = serde_json::to_value(&op).unwrap();
        assert_eq!(wire["operation"], "update");
        assert_eq!(wire["payload"]["id"], 7);

        let back: MutateOperation = serde_json::from_value(wire).unwrap();
        assert_eq!(back.tag(), "update");
    }

    #[test]
    fn test_mutate_operation_from_parts() {
        assert!(MutateOperation::from_parts("create", json!({})).is_some());
        assert!(MutateOperation::from_parts("delete", json!({})).is_some());
        assert!(MutateOperation::from_parts("truncate", json!({})).is_none());
    }

    #[test]
    fn test_mutate_request_flattens_operation() {
        let req = MutateRequest {
            biz_name: "library".to_string(),
            operation: MutateOperation::Create {
                payload: json!({"title": "Dune"}),
            },
        };
        let wire = serde_json::to_value(&req).unwrap();
        assert_eq!(wire["biz_name"], "library");
        assert_eq!(wire["operation"], "create");
        assert_eq!(wire["payload"]["title"], "Dune");
    }

    #[test]
    fn test_manifest_decoding_defaults() {
        let manifest: RepositoryManifest = serde_json::from_value(json!({
            "plugins": [{
                "id": "com.example.sqlite",
                "name": "SQLite backend",
                "versions": [{
                    "version": "1.0.0",
                    "source": {"url": "file:///tmp/a.zip"},
                    "exec": {"entrypoint": "bin/backend"}
                }]
            }]
        }))
        .unwrap();

        let plugin = &manifest.plugins[0];
        assert_eq!(plugin.id, "com.example.sqlite");
        assert!(plugin.supported_biz_names.is_empty());
        let version = plugin.find_version("1.0.0").unwrap();
        assert!(version.source.checksum.is_none());
        assert!(version.exec.args.is_empty());
        assert!(plugin.find_version("2.0.0").is_none());
    }

    #[test]
    fn test_plugin_info_type_field_rename() {
        let info: PluginInfo = serde_json::from_value(json!({
            "type": "sqlite",
            "version": "1.0.0",
            "supported_biz_names": ["library"]
        }))
        .unwrap();
        assert_eq!(info.plugin_type, "sqlite");
        assert_eq!(
            serde_json::to_value(&info).unwrap()["type"],
            json!("sqlite")
        );
    }

    #[test]
    fn test_health_status() {
        assert!(HealthStatus::ok().is_ok());
        let sick = HealthStatus {
            status: "degraded".to_string(),
            detail: Some("disk full".to_string()),
        };
        assert!(!sick.is_ok());
    }
}
