//! Endpoint catalog, fixture loading and the static exclusion list

use serde::Deserialize;
use std::path::Path;
use tracing::{debug, info};

use contractprobe_common::{BlacklistEntry, EndpointDescriptor, EndpointGroup, FixtureCase, HttpMethod};

use crate::error::{EngineError, EngineResult};

/// Path+method pairs never exercised by any run
const STATIC_BLACKLIST: &[(Option<HttpMethod>, &str)] = &[
    (None, "/health"),
    (None, "/oauth/token"),
    (None, "/auth/token"),
    (Some(HttpMethod::Post), "/auth/logout"),
    (Some(HttpMethod::Delete), "/users/me"),
    (None, "/admin/*"),
];

/// Exclusion list matched against endpoint path templates.
///
/// A path ending in `/*` matches everything below that prefix.
#[derive(Debug, Clone)]
pub struct Blacklist {
    entries: Vec<BlacklistEntry>,
}

impl Default for Blacklist {
    fn default() -> Self {
        Self {
            entries: STATIC_BLACKLIST
                .iter()
                .map(|(method, path)| BlacklistEntry {
                    method: *method,
                    path: path.to_string(),
                })
                .collect(),
        }
    }
}

impl Blacklist {
    /// Built-in entries plus `extra`
    pub fn with_entries(extra: &[BlacklistEntry]) -> Self {
        let mut list = Self::default();
        list.entries.extend(extra.iter().cloned());
        list
    }

    /// An empty list
    pub fn none() -> Self {
        Self { entries: Vec::new() }
    }

    pub fn matches(&self, method: HttpMethod, path: &str) -> bool {
        let path = path.trim_end_matches('/');
        self.entries.iter().any(|entry| {
            if entry.method.map_or(false, |m| m != method) {
                return false;
            }
            match entry.path.strip_suffix("/*") {
                Some(prefix) => path == prefix || path.starts_with(&format!("{}/", prefix)),
                None => entry.path.trim_end_matches('/') == path,
            }
        })
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum CatalogDocument {
    Wrapped { endpoints: Vec<EndpointDescriptor> },
    Bare(Vec<EndpointDescriptor>),
}

/// Endpoints produced by the OpenAPI collaborator
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Catalog {
    endpoints: Vec<EndpointDescriptor>,
}

impl Catalog {
    pub fn new(endpoints: Vec<EndpointDescriptor>) -> Self {
        Self { endpoints }
    }

    /// Parse `{"endpoints": [...]}` or a bare array
    pub fn from_json(json: &str) -> EngineResult<Self> {
        let doc: CatalogDocument = serde_json::from_str(json)?;
        let endpoints = match doc {
            CatalogDocument::Wrapped { endpoints } => endpoints,
            CatalogDocument::Bare(endpoints) => endpoints,
        };
        Ok(Self::new(endpoints))
    }

    pub fn load(path: &Path) -> EngineResult<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            EngineError::Catalog(format!("cannot read {}: {}", path.display(), e))
        })?;
        let catalog = Self::from_json(&content)?;
        info!("Loaded {} endpoint(s) from {}", catalog.len(), path.display());
        Ok(catalog)
    }

    pub fn endpoints(&self) -> &[EndpointDescriptor] {
        &self.endpoints
    }

    pub fn len(&self) -> usize {
        self.endpoints.len()
    }

    pub fn is_empty(&self) -> bool {
        self.endpoints.is_empty()
    }

    /// Drop blacklisted endpoints, returning the filtered catalog and the count removed
    pub fn without(&self, blacklist: &Blacklist) -> (Self, usize) {
        let kept: Vec<EndpointDescriptor> = self
            .endpoints
            .iter()
            .filter(|e| {
                let excluded = blacklist.matches(e.method, &e.path);
                if excluded {
                    debug!("Blacklisted: {}", e.key());
                }
                !excluded
            })
            .cloned()
            .collect();
        let removed = self.endpoints.len() - kept.len();
        (Self::new(kept), removed)
    }

    /// Group by resource, in order of first appearance
    pub fn groups(&self) -> Vec<EndpointGroup> {
        let mut groups: Vec<EndpointGroup> = Vec::new();
        for endpoint in &self.endpoints {
            match groups.iter_mut().find(|g| g.resource == endpoint.resource) {
                Some(group) => group.endpoints.push(endpoint.clone()),
                None => groups.push(EndpointGroup {
                    resource: endpoint.resource.clone(),
                    endpoints: vec![endpoint.clone()],
                }),
            }
        }
        groups
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum FixtureDocument {
    Many(Vec<FixtureCase>),
    One(Box<FixtureCase>),
}

/// Parse one YAML document holding a case or a list of cases
pub fn fixtures_from_yaml(yaml: &str) -> EngineResult<Vec<FixtureCase>> {
    let doc: FixtureDocument = serde_yaml::from_str(yaml)?;
    Ok(match doc {
        FixtureDocument::Many(cases) => cases,
        FixtureDocument::One(case) => vec![*case],
    })
}

/// Load fixture cases from a YAML file or, recursively, a directory.
///
/// Files are read in sorted path order so declaration order is stable.
pub fn load_fixtures(path: &Path) -> EngineResult<Vec<FixtureCase>> {
    if path.is_file() {
        let content = std::fs::read_to_string(path)?;
        return fixtures_from_yaml(&content);
    }

    let mut files = Vec::new();
    for entry in walkdir::WalkDir::new(path).sort_by_file_name() {
        let entry = entry.map_err(|e| {
            EngineError::Catalog(format!("cannot read fixtures under {}: {}", path.display(), e))
        })?;
        let is_yaml = entry
            .path()
            .extension()
            .map(|ext| ext == "yaml" || ext == "yml")
            .unwrap_or(false);
        if is_yaml {
            files.push(entry.into_path());
        }
    }
    files.sort();

    let mut cases = Vec::new();
    for file in files {
        let content = std::fs::read_to_string(&file)?;
        cases.extend(fixtures_from_yaml(&content)?);
    }
    info!("Loaded {} fixture case(s) from {}", cases.len(), path.display());
    Ok(cases)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;
    use test_case::test_case;

    #[test_case(HttpMethod::Get, "/health", true ; "any method on health")]
    #[test_case(HttpMethod::Post, "/auth/logout", true ; "method specific")]
    #[test_case(HttpMethod::Get, "/auth/logout", false ; "other method allowed")]
    #[test_case(HttpMethod::Delete, "/admin/users/{id}", true ; "wildcard prefix")]
    #[test_case(HttpMethod::Get, "/administrators", false ; "wildcard respects segments")]
    #[test_case(HttpMethod::Get, "/widgets/{id}", false ; "ordinary endpoint")]
    fn test_static_blacklist(method: HttpMethod, path: &str, expected: bool) {
        assert_eq!(Blacklist::default().matches(method, path), expected);
    }

    #[test]
    fn test_catalog_groups_and_filter() {
        let json = r#"{"endpoints": [
            {"path": "/widgets/{id}", "method": "GET", "resource": "widgets"},
            {"path": "/health", "method": "GET", "resource": "system"},
            {"path": "/gadgets", "method": "GET", "resource": "gadgets"},
            {"path": "/widgets", "method": "POST", "resource": "widgets"}
        ]}"#;
        let catalog = Catalog::from_json(json).unwrap();
        let (filtered, removed) = catalog.without(&Blacklist::default());
        assert_eq!(removed, 1);

        let groups = filtered.groups();
        assert_eq!(groups.len(), 2);
        assert_eq!(groups[0].resource, "widgets");
        assert_eq!(groups[0].endpoints.len(), 2);
        assert_eq!(groups[1].resource, "gadgets");
    }

    #[test]
    fn test_bare_array_catalog() {
        let catalog = Catalog::from_json(r#"[{"path": "/a", "method": "get", "resource": "a"}]"#);
        // methods are upper-case in the catalog format
        assert!(catalog.is_err());

        let catalog = Catalog::from_json(r#"[{"path": "/a", "method": "GET", "resource": "a"}]"#).unwrap();
        assert_eq!(catalog.len(), 1);
    }

    #[test]
    fn test_load_fixtures_directory_order() {
        let dir = tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("billing")).unwrap();
        std::fs::write(
            dir.path().join("b.yaml"),
            "- id: second\n  endpoint: /b\n- id: third\n  endpoint: /c\n",
        )
        .unwrap();
        std::fs::write(dir.path().join("a.yml"), "id: first\nendpoint: /a\n").unwrap();
        std::fs::write(
            dir.path().join("billing").join("z.yaml"),
            "id: fourth\nendpoint: /invoices\nmodule: billing\n",
        )
        .unwrap();
        std::fs::write(dir.path().join("notes.txt"), "ignored").unwrap();

        let ids: Vec<String> = load_fixtures(dir.path())
            .unwrap()
            .into_iter()
            .map(|c| c.id)
            .collect();
        assert_eq!(ids, vec!["first", "second", "third", "fourth"]);
    }

    #[test]
    fn test_missing_fixture_dir_is_an_error() {
        let dir = tempdir().unwrap();
        let err = load_fixtures(&dir.path().join("absent")).unwrap_err();
        assert!(matches!(err, EngineError::Catalog(_)));
    }
}
