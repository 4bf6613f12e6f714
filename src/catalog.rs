use crate::error::{MirrorError, Result};
use crate::types::{MirrorSpec, ResolvedUrl};
use crate::url::build_index_url;
use directories::ProjectDirs;
use serde::Deserialize;
use std::collections::HashSet;
use std::fs;
use tracing::{debug, warn};

// Include the JSON file at compile time
const MIRRORS_JSON: &str = include_str!("../assets/mirrors.json");

/// A primary host whose vendor also serves a paired secondary index.
#[derive(Debug, Clone, Deserialize)]
pub struct ExtraPairing {
    pub primary: String,
    pub url: String,
}

#[derive(Debug, Deserialize)]
struct CatalogFile {
    default: String,
    mirrors: Vec<MirrorSpec>,
    #[serde(default)]
    inner_priority: Vec<String>,
    #[serde(default)]
    extra_indexes: Vec<ExtraPairing>,
    python_install_mirror: String,
}

/// Immutable table of known mirrors.
///
/// Built once at startup and handed to whatever needs it.
#[derive(Debug, Clone)]
pub struct MirrorCatalog {
    default: String,
    mirrors: Vec<MirrorSpec>,
    inner_priority: Vec<String>,
    extra_indexes: Vec<ExtraPairing>,
    python_install_mirror: String,
}

impl MirrorCatalog {
    /// Load the catalog.
    /// Strategy:
    /// 1. Try the user file (~/.config/pymirror/mirrors.json)
    /// 2. Fallback to built-in assets/mirrors.json
    pub fn load() -> Self {
        if let Some(proj_dirs) = ProjectDirs::from("", "", "pymirror") {
            let config_path = proj_dirs.config_dir().join("mirrors.json");
            if config_path.exists() {
                match fs::read_to_string(&config_path)
                    .map_err(MirrorError::from)
                    .and_then(|content| Self::from_json(&content))
                {
                    Ok(catalog) => {
                        debug!(path = ?config_path, "loaded mirrors from local config");
                        return catalog;
                    }
                    Err(e) => warn!(path = ?config_path, "ignoring local mirrors file: {}", e),
                }
            }
        }
        Self::builtin()
    }

    pub fn builtin() -> Self {
        Self::from_json(MIRRORS_JSON)
            .expect("Failed to parse assets/mirrors.json. This is a compile-time error.")
    }

    pub fn from_json(content: &str) -> Result<Self> {
        let file: CatalogFile = serde_json::from_str(content)?;
        let catalog = Self {
            default: file.default,
            mirrors: file.mirrors,
            inner_priority: file.inner_priority,
            extra_indexes: file.extra_indexes,
            python_install_mirror: file.python_install_mirror,
        };
        catalog.validate()?;
        Ok(catalog)
    }

    fn validate(&self) -> Result<()> {
        let mut seen = HashSet::new();
        for spec in &self.mirrors {
            for name in std::iter::once(&spec.alias).chain(&spec.synonyms) {
                if !seen.insert(name.to_lowercase()) {
                    return Err(MirrorError::Catalog(format!("duplicate alias '{}'", name)));
                }
            }
        }

        let referenced = std::iter::once(&self.default)
            .chain(&self.inner_priority)
            .chain(self.mirrors.iter().filter_map(|m| m.inner.as_ref()));
        for alias in referenced {
            if self.lookup(alias).is_none() {
                return Err(MirrorError::Catalog(format!("unknown alias '{}'", alias)));
            }
        }
        Ok(())
    }

    pub fn mirrors(&self) -> &[MirrorSpec] {
        &self.mirrors
    }

    /// Case-insensitive lookup by alias or synonym.
    pub fn lookup(&self, name: &str) -> Option<&MirrorSpec> {
        self.mirrors.iter().find(|m| {
            m.alias.eq_ignore_ascii_case(name)
                || m.synonyms.iter().any(|s| s.eq_ignore_ascii_case(name))
        })
    }

    pub fn default_spec(&self) -> &MirrorSpec {
        self.lookup(&self.default)
            .expect("default alias is checked when the catalog is built")
    }

    /// The cloud-internal variant paired with `spec`.
    pub fn inner_of(&self, spec: &MirrorSpec) -> Option<&MirrorSpec> {
        spec.inner.as_deref().and_then(|alias| self.lookup(alias))
    }

    /// Whether `spec` is itself a cloud-internal host.
    pub fn is_inner(&self, spec: &MirrorSpec) -> bool {
        self.inner_priority.iter().any(|a| a.eq_ignore_ascii_case(&spec.alias))
            || self
                .mirrors
                .iter()
                .filter_map(|m| m.inner.as_deref())
                .any(|a| a.eq_ignore_ascii_case(&spec.alias))
    }

    /// Internal variants in the order they are tried when no alias was given.
    /// Earlier entries win when several are reachable.
    pub fn inner_candidates(&self) -> Vec<&MirrorSpec> {
        self.inner_priority
            .iter()
            .filter_map(|alias| self.lookup(alias))
            .collect()
    }

    pub fn extra_for(&self, primary_host: &str) -> Option<&ExtraPairing> {
        self.extra_indexes
            .iter()
            .find(|p| p.primary.eq_ignore_ascii_case(primary_host))
    }

    pub fn python_install_mirror(&self) -> &str {
        &self.python_install_mirror
    }

    /// Index url of a catalog entry, with the scheme its network calls for.
    pub fn url_of(&self, spec: &MirrorSpec) -> Result<ResolvedUrl> {
        build_index_url(&spec.host, self.is_inner(spec))
    }

    /// Resolve an alias or url without touching the network.
    ///
    /// Anything starting with `http` is taken verbatim. Unknown aliases fall
    /// back to the default mirror unless `strict` is set.
    pub fn resolve(&self, alias_or_url: &str, strict: bool) -> Result<ResolvedUrl> {
        if alias_or_url.starts_with("http") {
            return ResolvedUrl::parse(alias_or_url);
        }
        let spec = self.lookup_or_default(alias_or_url, strict)?;
        self.url_of(spec)
    }

    pub fn lookup_or_default(&self, name: &str, strict: bool) -> Result<&MirrorSpec> {
        match self.lookup(name) {
            Some(spec) => Ok(spec),
            None if strict => Err(MirrorError::UnknownMirror(name.to_string())),
            None => {
                warn!(
                    "unknown mirror '{}', falling back to '{}'",
                    name, self.default
                );
                Ok(self.default_spec())
            }
        }
    }
}
