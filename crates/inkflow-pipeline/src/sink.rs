//! Persistence boundary for finished content.

use std::path::PathBuf;

use async_trait::async_trait;
use tokio::io::AsyncWriteExt;

use inkflow_types::{FlowError, Result};

/// Where published content goes. Implementations decide the storage.
#[async_trait]
pub trait ContentSink: Send + Sync {
    /// Persist one item. `kind` groups items (e.g. `blog`), `id` is unique
    /// within a kind. Saving an id that already exists is an error.
    async fn save(&self, kind: &str, id: &str, payload: &serde_json::Value) -> Result<()>;
}

/// Writes each item as pretty-printed JSON to `<root>/<kind>/<id>.json`.
#[derive(Debug, Clone)]
pub struct JsonFileSink {
    root: PathBuf,
}

impl JsonFileSink {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn path_for(&self, kind: &str, id: &str) -> PathBuf {
        self.root.join(kind).join(format!("{id}.json"))
    }
}

fn safe_component(s: &str) -> bool {
    !s.is_empty()
        && s
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
}

#[async_trait]
impl ContentSink for JsonFileSink {
    async fn save(&self, kind: &str, id: &str, payload: &serde_json::Value) -> Result<()> {
        if !safe_component(kind) || !safe_component(id) {
            return Err(FlowError::Other(format!(
                "refusing to write content with kind '{kind}' and id '{id}'"
            )));
        }
        let path = self.path_for(kind, id);
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let body = serde_json::to_vec_pretty(payload)?;
        let mut file = match tokio::fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&path)
            .await
        {
            Ok(file) => file,
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                return Err(FlowError::Other(format!(
                    "{} already exists, refusing to overwrite",
                    path.display()
                )));
            }
            Err(e) => return Err(e.into()),
        };
        file.write_all(&body).await?;
        file.flush().await?;
        tracing::info!(kind = %kind, id = %id, path = %path.display(), "Content saved");
        Ok(())
    }
}

/// Build a filesystem-safe slug from a title.
pub fn slugify(title: &str) -> String {
    let mut slug = String::with_capacity(title.len());
    let mut dash = false;
    for c in title.chars() {
        if c.is_ascii_alphanumeric() {
            slug.push(c.to_ascii_lowercase());
            dash = false;
        } else if !dash && !slug.is_empty() {
            slug.push('-');
            dash = true;
        }
    }
    let slug = slug.trim_end_matches('-');
    let slug: String = slug.chars().take(80).collect();
    let slug = slug.trim_end_matches('-').to_string();
    if slug.is_empty() {
        "untitled".to_string()
    } else {
        slug
    }
}

/// A content id: the slug of `base` plus a short random suffix, so two
/// items with the same title never share a file.
pub fn unique_id(base: &str) -> String {
    let suffix = uuid::Uuid::new_v4().simple().to_string();
    format!("{}-{}", slugify(base), &suffix[..8])
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn writes_pretty_json_under_kind() {
        let dir = tempfile::tempdir().unwrap();
        let sink = JsonFileSink::new(dir.path());
        sink.save("blog", "dns-outage", &json!({"title": "DNS outage"}))
            .await
            .unwrap();

        let text = std::fs::read_to_string(dir.path().join("blog/dns-outage.json")).unwrap();
        assert!(text.contains("\n"));
        let value: serde_json::Value = serde_json::from_str(&text).unwrap();
        assert_eq!(value["title"], "DNS outage");
    }

    #[tokio::test]
    async fn rejects_path_like_ids() {
        let dir = tempfile::tempdir().unwrap();
        let sink = JsonFileSink::new(dir.path());
        assert!(sink.save("blog", "../escape", &json!({})).await.is_err());
        assert!(sink.save("", "x", &json!({})).await.is_err());
    }

    #[tokio::test]
    async fn refuses_to_overwrite_existing_item() {
        let dir = tempfile::tempdir().unwrap();
        let sink = JsonFileSink::new(dir.path());
        sink.save("blog", "two-sum", &json!({"v": 1})).await.unwrap();
        let err = sink.save("blog", "two-sum", &json!({"v": 2})).await.unwrap_err();
        assert!(err.to_string().contains("already exists"), "{err}");

        let text = std::fs::read_to_string(dir.path().join("blog/two-sum.json")).unwrap();
        let value: serde_json::Value = serde_json::from_str(&text).unwrap();
        assert_eq!(value["v"], 1);
    }

    #[test]
    fn unique_ids_share_the_slug_but_differ() {
        let a = unique_id("Two Sum");
        let b = unique_id("Two Sum");
        assert!(a.starts_with("two-sum-"));
        assert_eq!(a.len(), "two-sum-".len() + 8);
        assert_ne!(a, b);
    }

    #[test]
    fn slugify_titles() {
        assert_eq!(slugify("How Acme Fixed DNS!"), "how-acme-fixed-dns");
        assert_eq!(slugify("  --  "), "untitled");
        assert_eq!(slugify("Rust & Tokio: 2024"), "rust-tokio-2024");
        assert!(slugify(&"a".repeat(200)).len() <= 80);
    }
}
