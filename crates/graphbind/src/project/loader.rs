//! Project Loader
//!
//! Loads the API configuration and response fixtures from disk.

use std::path::{Path, PathBuf};
use std::rc::Rc;

use graphbind_model::{Store, Transport};
use graphbind_schema::{ApiConfig, ConfigError, SchemaRegistry};
use tokio::fs;
use tracing::{debug, info};

/// File looked up when the project path is a directory
pub const MANIFEST_NAME: &str = "graphbind.toml";

/// Error type for project loading
#[derive(Debug, thiserror::Error)]
pub enum LoadError {
    #[error("Project path does not exist: {0}")]
    PathNotFound(PathBuf),

    #[error("Project manifest not found: {0}")]
    ManifestNotFound(PathBuf),

    #[error("Failed to read file: {0}")]
    ReadError(#[from] std::io::Error),

    #[error("Failed to parse TOML: {0}")]
    TomlParseError(#[from] toml::de::Error),

    #[error("Failed to parse JSON: {0}")]
    JsonParseError(#[from] serde_json::Error),

    #[error("Invalid configuration: {0}")]
    Config(#[from] ConfigError),
}

/// A loaded project: its manifest location and checked schemas
#[derive(Debug)]
pub struct Project {
    pub path: PathBuf,
    pub schemas: SchemaRegistry,
}

impl Project {
    /// Store without a transport. Every sync request is rejected
    pub fn into_store(self) -> Store {
        Store::new(self.schemas)
    }

    pub fn into_store_with(self, transport: Rc<dyn Transport>) -> Store {
        Store::with_transport(self.schemas, transport)
    }
}

/// Project loader
pub struct ProjectLoader;

impl ProjectLoader {
    /// Load a project from a manifest file or a directory holding `graphbind.toml`
    ///
    /// Files ending in `.json` are read as JSON, anything else as TOML.
    pub async fn load(path: impl AsRef<Path>) -> Result<Project, LoadError> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(LoadError::PathNotFound(path.to_path_buf()));
        }

        let manifest_path = if path.is_dir() {
            path.join(MANIFEST_NAME)
        } else {
            path.to_path_buf()
        };
        if !manifest_path.exists() {
            return Err(LoadError::ManifestNotFound(manifest_path));
        }

        info!("Loading project from: {}", manifest_path.display());
        let content = fs::read_to_string(&manifest_path).await?;
        let config: ApiConfig = if is_json(&manifest_path) {
            serde_json::from_str(&content)?
        } else {
            toml::from_str(&content)?
        };
        info!(
            "Loaded {} models and {} collections",
            config.models.len(),
            config.collections.len()
        );

        let schemas = SchemaRegistry::from_config(config)?;
        Ok(Project {
            path: manifest_path,
            schemas,
        })
    }

    /// Load a response envelope fixture
    pub async fn load_response(path: impl AsRef<Path>) -> Result<serde_json::Value, LoadError> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(LoadError::PathNotFound(path.to_path_buf()));
        }
        let content = fs::read_to_string(path).await?;
        let body = serde_json::from_str(&content)?;
        debug!("Loaded response from: {}", path.display());
        Ok(body)
    }
}

fn is_json(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| ext.eq_ignore_ascii_case("json"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    const MANIFEST: &str = r#"
base_path = "/api"

[[models]]
name = "User"
endpoint = "/users"

[models.schema]
name = "string"
tags = ["Tag"]

[[models]]
name = "Tag"
endpoint = "/tags"
"#;

    async fn create_test_project(manifest: &str) -> TempDir {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join(MANIFEST_NAME), manifest).await.unwrap();
        dir
    }

    #[tokio::test]
    async fn test_load_project_directory() {
        let dir = create_test_project(MANIFEST).await;
        let project = ProjectLoader::load(dir.path()).await.unwrap();

        assert_eq!(project.path, dir.path().join(MANIFEST_NAME));
        assert_eq!(project.schemas.base_path(), "/api");
        assert!(project.schemas.contains_model("User"));
        assert!(project.schemas.contains_model("Tag"));
    }

    #[tokio::test]
    async fn test_load_json_manifest() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("api.json");
        fs::write(&path, r#"{"models": [{"name": "Post", "endpoint": "/posts"}]}"#)
            .await
            .unwrap();

        let store = ProjectLoader::load(&path).await.unwrap().into_store();
        let post = store
            .hydrate("Post", serde_json::json!({"_id": "p1"}))
            .unwrap();
        assert_eq!(store.entity_endpoint(&post).unwrap(), "/posts/p1");
    }

    #[tokio::test]
    async fn test_missing_paths() {
        let dir = TempDir::new().unwrap();
        assert!(matches!(
            ProjectLoader::load(dir.path().join("nope")).await,
            Err(LoadError::PathNotFound(_))
        ));
        assert!(matches!(
            ProjectLoader::load(dir.path()).await,
            Err(LoadError::ManifestNotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_dangling_reference_is_config_error() {
        let dir = create_test_project(
            r#"
[[models]]
name = "User"
endpoint = "/users"

[models.schema]
manager = "Manager"
"#,
        )
        .await;
        assert!(matches!(
            ProjectLoader::load(dir.path()).await,
            Err(LoadError::Config(ConfigError::DanglingReference { .. }))
        ));
    }

    #[tokio::test]
    async fn test_parse_errors() {
        let dir = create_test_project("models = 3").await;
        assert!(matches!(
            ProjectLoader::load(dir.path()).await,
            Err(LoadError::TomlParseError(_))
        ));

        let response = dir.path().join("response.json");
        fs::write(&response, "{not json").await.unwrap();
        assert!(matches!(
            ProjectLoader::load_response(&response).await,
            Err(LoadError::JsonParseError(_))
        ));
    }
}
