use crate::errors::DirectoryError;
use crate::metrics_defs::DIRECTORY_SIZE;
use crate::refresh::{Refresh, fetch_json};
use async_trait::async_trait;
use parking_lot::RwLock;
use shared::gauge;
use std::collections::HashSet;
use std::path::Path;
use url::Url;

/// Nodes whose text messages are never relayed.
#[derive(Debug, Default)]
pub struct IgnoreList {
    url: Option<Url>,
    nodes: RwLock<HashSet<String>>,
}

fn normalize(node: &str) -> String {
    node.trim().trim_start_matches('!').to_ascii_lowercase()
}

impl IgnoreList {
    pub fn new<I, S>(nodes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let list = IgnoreList::default();
        list.replace(nodes);
        list
    }

    /// Reads a JSON array of node ids from `path`. A missing file gives an
    /// empty list. `url`, when set, is where later refreshes load from.
    pub fn load(path: &Path, url: Option<Url>) -> Result<Self, DirectoryError> {
        let nodes: Vec<String> = match std::fs::read(path) {
            Ok(bytes) => serde_json::from_slice(&bytes).map_err(|source| DirectoryError::Json {
                path: path.display().to_string(),
                source,
            })?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::warn!(path = %path.display(), "ignore list not found, starting empty");
                Vec::new()
            }
            Err(source) => {
                return Err(DirectoryError::Io {
                    path: path.display().to_string(),
                    source,
                });
            }
        };

        let list = IgnoreList::new(nodes);
        tracing::info!(entries = list.len(), "loaded ignore list");
        Ok(IgnoreList { url, ..list })
    }

    pub fn url(&self) -> Option<&Url> {
        self.url.as_ref()
    }

    /// Accepts ids with or without the leading `!`.
    pub fn contains(&self, node: &str) -> bool {
        self.nodes.read().contains(&normalize(node))
    }

    pub fn len(&self) -> usize {
        self.nodes.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.read().is_empty()
    }

    pub fn replace<I, S>(&self, nodes: I)
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let nodes: HashSet<String> = nodes.into_iter().map(|n| normalize(n.as_ref())).collect();
        gauge!(DIRECTORY_SIZE, "directory" => "ignore_list").set(nodes.len() as f64);
        *self.nodes.write() = nodes;
    }
}

#[async_trait]
impl Refresh for IgnoreList {
    fn name(&self) -> &'static str {
        "ignore_list"
    }

    async fn refresh(&self, client: &reqwest::Client) -> Result<usize, DirectoryError> {
        let Some(url) = &self.url else {
            return Ok(self.len());
        };
        let nodes: Vec<String> = fetch_json(client, url).await?;
        self.replace(nodes);
        Ok(self.len())
    }
}
