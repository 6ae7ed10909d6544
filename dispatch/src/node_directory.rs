//! Names and radio details of nodes, learned from node info packets.
//!
//! The directory is a JSON object keyed by node hex id. Older files that map
//! ids straight to a long name are still accepted.

use crate::errors::DirectoryError;
use crate::metrics_defs::DIRECTORY_SIZE;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use shared::gauge;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tokio::sync::Mutex;

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct NodeInfo {
    pub long_name: String,
    #[serde(default)]
    pub short_name: String,
    #[serde(default)]
    pub hw_model: i32,
    #[serde(default)]
    pub role: i32,
    /// Largest hop start seen in the packet that carried this info
    #[serde(default)]
    pub hop_start: u32,
    /// Milliseconds since the epoch
    #[serde(default)]
    pub updated_at: u64,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum StoredNode {
    Info(NodeInfo),
    LongName(String),
}

impl From<StoredNode> for NodeInfo {
    fn from(stored: StoredNode) -> Self {
        match stored {
            StoredNode::Info(info) => info,
            StoredNode::LongName(long_name) => NodeInfo {
                long_name,
                ..Default::default()
            },
        }
    }
}

#[derive(Debug, Default)]
pub struct NodeDirectory {
    path: Option<PathBuf>,
    nodes: RwLock<HashMap<String, NodeInfo>>,
    // Serializes writers so the file always reflects the latest update.
    persist: Mutex<()>,
}

impl NodeDirectory {
    /// A directory that is never written to disk.
    pub fn in_memory() -> Self {
        Self::default()
    }

    /// Loads the directory from `path`. A missing file starts an empty
    /// directory that will be created on the first update.
    pub fn load(path: impl Into<PathBuf>) -> Result<Self, DirectoryError> {
        let path = path.into();
        let nodes = match std::fs::read(&path) {
            Ok(bytes) => {
                let stored: HashMap<String, StoredNode> =
                    serde_json::from_slice(&bytes).map_err(|source| DirectoryError::Json {
                        path: path.display().to_string(),
                        source,
                    })?;
                stored.into_iter().map(|(id, node)| (id, node.into())).collect()
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::warn!(path = %path.display(), "node directory not found, starting empty");
                HashMap::new()
            }
            Err(source) => {
                return Err(DirectoryError::Io {
                    path: path.display().to_string(),
                    source,
                });
            }
        };

        tracing::info!(nodes = nodes.len(), "loaded node directory");
        gauge!(DIRECTORY_SIZE, "directory" => "nodes").set(nodes.len() as f64);
        Ok(NodeDirectory {
            path: Some(path),
            nodes: RwLock::new(nodes),
            persist: Mutex::new(()),
        })
    }

    pub fn get(&self, node_hex: &str) -> Option<NodeInfo> {
        self.nodes.read().get(node_hex).cloned()
    }

    pub fn len(&self) -> usize {
        self.nodes.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.read().is_empty()
    }

    /// Stores `info` for `node_hex` and rewrites the directory file.
    ///
    /// The file is written on the blocking pool to a sibling temp file and
    /// renamed into place, so readers never see a partial directory.
    pub async fn update(&self, node_hex: &str, info: NodeInfo) -> Result<(), DirectoryError> {
        let _guard = self.persist.lock().await;
        let snapshot = {
            let mut nodes = self.nodes.write();
            nodes.insert(node_hex.to_string(), info);
            gauge!(DIRECTORY_SIZE, "directory" => "nodes").set(nodes.len() as f64);
            nodes.clone()
        };

        let Some(path) = self.path.clone() else {
            return Ok(());
        };
        let display = path.display().to_string();
        tokio::task::spawn_blocking(move || write_json(&path, &snapshot))
            .await
            .map_err(|e| DirectoryError::Io {
                path: display,
                source: std::io::Error::other(e),
            })?
    }
}

fn write_json(path: &Path, nodes: &HashMap<String, NodeInfo>) -> Result<(), DirectoryError> {
    let io_error = |source| DirectoryError::Io {
        path: path.display().to_string(),
        source,
    };
    let bytes = serde_json::to_vec_pretty(nodes).map_err(|source| DirectoryError::Json {
        path: path.display().to_string(),
        source,
    })?;

    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".tmp");
    std::fs::write(&tmp, bytes).map_err(io_error)?;
    std::fs::rename(&tmp, path).map_err(io_error)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_tmp_file(s: &str) -> tempfile::NamedTempFile {
        let mut tmp = tempfile::NamedTempFile::new().expect("create temp file");
        write!(tmp, "{}", s).expect("write json");

        tmp
    }

    #[test]
    fn test_load_accepts_both_formats() {
        let tmp = write_tmp_file(
            r#"{
                "43b6ff0c": "KK6VSY Base",
                "433ea8d0": {"long_name": "KK6VSY Mobile", "short_name": "MOBL", "hop_start": 3}
            }"#,
        );
        let directory = NodeDirectory::load(tmp.path()).unwrap();
        assert_eq!(directory.len(), 2);
        assert_eq!(directory.get("43b6ff0c").unwrap().long_name, "KK6VSY Base");
        assert_eq!(directory.get("43b6ff0c").unwrap().short_name, "");

        let mobile = directory.get("433ea8d0").unwrap();
        assert_eq!(mobile.short_name, "MOBL");
        assert_eq!(mobile.hop_start, 3);
    }

    #[tokio::test]
    async fn test_update_persists() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nodeDB.json");

        let directory = NodeDirectory::load(&path).unwrap();
        assert!(directory.is_empty());

        let info = NodeInfo {
            long_name: "Ridge Repeater".into(),
            short_name: "RDG".into(),
            hw_model: 9,
            role: 2,
            hop_start: 5,
            updated_at: 1_700_000_000_000,
        };
        directory.update("0a0b0c0d", info.clone()).await.unwrap();

        let reloaded = NodeDirectory::load(&path).unwrap();
        assert_eq!(reloaded.get("0a0b0c0d"), Some(info));
    }

    #[test]
    fn test_invalid_file_is_an_error() {
        let tmp = write_tmp_file("[1, 2");
        assert!(matches!(
            NodeDirectory::load(tmp.path()),
            Err(DirectoryError::Json { .. })
        ));
    }

    #[tokio::test]
    async fn test_in_memory_directory() {
        let directory = NodeDirectory::in_memory();
        directory
            .update("00000001", NodeInfo {
                long_name: "one".into(),
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(directory.get("00000001").unwrap().long_name, "one");
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_concurrent_updates_all_reach_the_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nodeDB.json");
        let directory = std::sync::Arc::new(NodeDirectory::load(&path).unwrap());

        let mut tasks = tokio::task::JoinSet::new();
        for i in 0..16u32 {
            let directory = directory.clone();
            tasks.spawn(async move {
                directory
                    .update(&format!("{i:08x}"), NodeInfo {
                        long_name: format!("node {i}"),
                        ..Default::default()
                    })
                    .await
            });
        }
        while let Some(result) = tasks.join_next().await {
            result.unwrap().unwrap();
        }

        let reloaded = NodeDirectory::load(&path).unwrap();
        assert_eq!(reloaded.len(), 16);
        assert_eq!(reloaded.get("0000000f").unwrap().long_name, "node 15");
        // only the directory itself is left behind
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 1);
    }
}
