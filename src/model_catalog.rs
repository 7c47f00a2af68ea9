//! Model Catalog (C11): presents the model server's installed models
//! grouped by family, for the `/api/models` facade endpoint
//!
//! Grounded on `model_client::ModelServerClient::list_tags`, the only
//! existing source of model names; this module adds the grouping and
//! validation the spec requires (§4.11) on top of the raw tag list.

use crate::error::{Result, WhereSpaceError};
use crate::model_client::{ModelServerClient, TagInfo};
use std::collections::BTreeMap;

const KNOWN_FAMILIES: &[&str] = &["llama", "mistral", "gemma", "qwen"];

/// A model entry as presented to API clients, with the `:latest` suffix
/// stripped so the UI doesn't show it twice per family
#[derive(Debug, Clone, serde::Serialize)]
pub struct CatalogEntry {
    pub name: String,
    pub family: String,
    pub size: u64,
    pub modified_at: String,
}

/// Models grouped by family, in a stable order (known families first, in
/// `KNOWN_FAMILIES` order, then "other")
#[derive(Debug, Clone, Default, serde::Serialize)]
pub struct ModelCatalog {
    pub families: Vec<(String, Vec<CatalogEntry>)>,
}

/// Fetches and organizes the model server's catalog
pub struct ModelCatalogService {
    client: std::sync::Arc<ModelServerClient>,
}

impl ModelCatalogService {
    pub fn new(client: std::sync::Arc<ModelServerClient>) -> Self {
        Self { client }
    }

    pub async fn fetch(&self) -> Result<ModelCatalog> {
        let tags = self.client.list_tags().await?;
        Ok(Self::group(tags))
    }

    fn group(tags: Vec<TagInfo>) -> ModelCatalog {
        let mut by_family: BTreeMap<String, Vec<CatalogEntry>> = BTreeMap::new();

        for tag in tags {
            let family = family_of(&tag.name);
            let entry = CatalogEntry {
                name: strip_latest(&tag.name),
                family: family.clone(),
                size: tag.size,
                modified_at: tag.modified_at,
            };
            by_family.entry(family).or_default().push(entry);
        }

        let mut families = Vec::new();
        for known in KNOWN_FAMILIES {
            if let Some(entries) = by_family.remove(*known) {
                families.push((known.to_string(), entries));
            }
        }
        if let Some(other) = by_family.remove("other") {
            families.push(("other".to_string(), other));
        }
        // Any family key that slipped through unmatched (shouldn't happen
        // given family_of only returns KNOWN_FAMILIES or "other")
        for (name, entries) in by_family {
            families.push((name, entries));
        }

        ModelCatalog { families }
    }

    /// Validate that `model` is a name the catalog currently contains,
    /// accepting both bare (`llama3.1`) and registry-qualified
    /// (`library/llama3.1:latest`) forms
    pub async fn validate(&self, model: &str) -> Result<()> {
        let catalog = self.fetch().await?;
        let requested = strip_latest(model);
        let requested_bare = requested.rsplit('/').next().unwrap_or(&requested);

        let found = catalog.families.iter().any(|(_, entries)| {
            entries.iter().any(|e| {
                e.name == requested || e.name.rsplit('/').next() == Some(requested_bare)
            })
        });

        if found {
            Ok(())
        } else {
            Err(WhereSpaceError::ModelNotFound(model.to_string()))
        }
    }
}

fn strip_latest(name: &str) -> String {
    name.strip_suffix(":latest").unwrap_or(name).to_string()
}

/// Family prefix before the first `/`, `:`, or digit, lower-cased; falls
/// back to "other" for anything not in `KNOWN_FAMILIES`
fn family_of(name: &str) -> String {
    let bare = name.rsplit('/').next().unwrap_or(name);
    let prefix: String = bare
        .chars()
        .take_while(|c| c.is_ascii_alphabetic())
        .collect::<String>()
        .to_lowercase();

    if KNOWN_FAMILIES.contains(&prefix.as_str()) {
        prefix
    } else {
        "other".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tag(name: &str) -> TagInfo {
        TagInfo {
            name: name.to_string(),
            size: 100,
            modified_at: "2026-01-01T00:00:00Z".to_string(),
        }
    }

    #[test]
    fn test_family_of_known_families() {
        assert_eq!(family_of("llama3.1"), "llama");
        assert_eq!(family_of("mistral:latest"), "mistral");
        assert_eq!(family_of("gemma2"), "gemma");
        assert_eq!(family_of("qwen2.5"), "qwen");
    }

    #[test]
    fn test_family_of_unknown_falls_to_other() {
        assert_eq!(family_of("nomic-embed-text"), "other");
    }

    #[test]
    fn test_strip_latest() {
        assert_eq!(strip_latest("llama3.1:latest"), "llama3.1");
        assert_eq!(strip_latest("llama3.1"), "llama3.1");
    }

    #[test]
    fn test_group_orders_known_families_first() {
        let tags = vec![
            tag("nomic-embed-text"),
            tag("qwen2.5"),
            tag("llama3.1:latest"),
        ];
        let catalog = ModelCatalogService::group(tags);
        let names: Vec<&str> = catalog.families.iter().map(|(n, _)| n.as_str()).collect();
        assert_eq!(names, vec!["llama", "qwen", "other"]);
    }
}
