//! Model catalog
//!
//! The selectable models are compiled in from `builtin_models.toml`, where
//! they are grouped under the provider that serves them. The catalog flattens
//! that tree into a list the model picker and the orchestrator can search.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::LazyLock;
use tracing::{error, warn};

pub const DEFAULT_MODEL: &str = "openai/gpt-4.1-mini";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AvailableModel {
    pub id: String,
    pub name: String,
    pub category: String,
    pub supports_reasoning: bool,
    /// Reasons on its own; never gets the synthetic step-by-step instruction.
    pub native_reasoning: bool,
}

#[derive(Debug, Deserialize)]
struct CatalogFile {
    #[serde(default)]
    providers: BTreeMap<String, ProviderEntry>,
}

#[derive(Debug, Deserialize)]
struct ProviderEntry {
    name: Option<String>,
    #[serde(default)]
    models: Vec<ModelEntry>,
}

#[derive(Debug, Deserialize)]
struct ModelEntry {
    #[serde(default)]
    id: String,
    name: Option<String>,
    #[serde(default)]
    reasoning: bool,
    #[serde(default)]
    native_reasoning: bool,
}

/// Flatten a provider-grouped catalog. Entries without an id are dropped.
pub fn parse_catalog(contents: &str) -> Result<Vec<AvailableModel>, toml::de::Error> {
    let file: CatalogFile = toml::from_str(contents)?;
    let mut models = Vec::new();

    for (provider_key, provider) in file.providers {
        let category = provider
            .name
            .filter(|name| !name.trim().is_empty())
            .unwrap_or_else(|| provider_key.clone());

        for entry in provider.models {
            let id = entry.id.trim();
            if id.is_empty() {
                warn!(provider = %provider_key, "skipping catalog entry without an id");
                continue;
            }
            models.push(AvailableModel {
                id: id.to_string(),
                name: entry.name.unwrap_or_else(|| id.to_string()),
                category: category.clone(),
                supports_reasoning: entry.reasoning || entry.native_reasoning,
                native_reasoning: entry.native_reasoning,
            });
        }
    }

    Ok(models)
}

static BUILTIN_MODELS: LazyLock<Vec<AvailableModel>> = LazyLock::new(|| {
    const CATALOG: &str = include_str!("../builtin_models.toml");
    parse_catalog(CATALOG).unwrap_or_else(|err| {
        error!("failed to parse builtin_models.toml: {err}");
        Vec::new()
    })
});

pub fn list_available_models() -> &'static [AvailableModel] {
    &BUILTIN_MODELS
}

pub fn find_model(id: &str) -> Option<&'static AvailableModel> {
    list_available_models().iter().find(|m| m.id == id)
}
