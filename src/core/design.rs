// src/core/design.rs — Application design and its flattening into work items
//
// Design shape:
//   { "frontend": { "pages": [ { "page_name", "description",
//                                "backend_endpoints": [...] } ] },
//     "backend":  { "endpoints": [ { "endpoint_name", "method", "path" } ] } }
//
// Endpoints may be declared under pages, under backend, or both; they are
// deduplicated by path since a backend component is keyed by its path.

use std::collections::HashSet;
use std::path::Path;

use serde::{Deserialize, Serialize};

use super::types::WorkItem;
use crate::infra::errors::KaizenError;

pub const DEFAULT_PAGE_COST: u64 = 4_000;
pub const DEFAULT_ENDPOINT_COST: u64 = 3_000;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppDesign {
    #[serde(default)]
    pub frontend: FrontendDesign,
    #[serde(default)]
    pub backend: BackendDesign,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FrontendDesign {
    #[serde(default)]
    pub pages: Vec<PageDesign>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BackendDesign {
    #[serde(default)]
    pub endpoints: Vec<EndpointDesign>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PageDesign {
    pub page_name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub requirements: Vec<serde_json::Value>,
    #[serde(default)]
    pub backend_endpoints: Vec<EndpointDesign>,
    #[serde(default)]
    pub estimated_cost: Option<u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EndpointDesign {
    #[serde(default)]
    pub endpoint_name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default = "default_method")]
    pub method: String,
    pub path: String,
    #[serde(default)]
    pub estimated_cost: Option<u64>,
}

fn default_method() -> String {
    "GET".into()
}

impl AppDesign {
    pub fn load(path: &Path) -> Result<Self, KaizenError> {
        let content = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&content)?)
    }
}

/// Pages in design order, then unique endpoints in first-seen order
/// (backend list first, then those only declared under pages).
pub fn flatten_design(design: &AppDesign) -> Vec<WorkItem> {
    let mut items = Vec::new();
    let mut seen_pages = HashSet::new();
    for page in &design.frontend.pages {
        let name = page.page_name.trim();
        if name.is_empty() || !seen_pages.insert(name.to_string()) {
            continue;
        }
        items.push(WorkItem::page(
            name,
            page.estimated_cost.unwrap_or(DEFAULT_PAGE_COST),
        ));
    }

    let mut seen_paths = HashSet::new();
    let endpoints = design
        .backend
        .endpoints
        .iter()
        .chain(design.frontend.pages.iter().flat_map(|p| p.backend_endpoints.iter()));
    for ep in endpoints {
        let path = ep.path.trim();
        if path.is_empty() || !seen_paths.insert(path.to_string()) {
            continue;
        }
        items.push(WorkItem::endpoint(
            path,
            ep.estimated_cost.unwrap_or(DEFAULT_ENDPOINT_COST),
        ));
    }
    items
}
