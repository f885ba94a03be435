//! Module containing the module-resolution and security-policy seams.
//!
//! The engine itself never touches the network or the filesystem directly;
//! it asks a [`ModuleResolver`] for module source and resource bytes, after
//! the [`SecurityPolicy`] has allowed the URI.

use std::collections::BTreeMap;
use std::path::PathBuf;

/// URI schemes the engine understands for modules.
pub const MODULE_SCHEMES: &[&str] = &[
    "file",
    "http",
    "https",
    "modulepath",
    "pkl",
    "package",
    "projectpackage",
];

/// The scheme of a URI, if it has one.
#[must_use]
pub fn uri_scheme(uri: &str) -> Option<&str> {
    let colon = uri.find(':')?;
    let scheme = &uri[..colon];
    if !scheme.is_empty()
        && scheme
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '+' || c == '-' || c == '.')
        && scheme.chars().next().map_or(false, |c| c.is_ascii_alphabetic())
    {
        Some(scheme)
    } else {
        None
    }
}

/// Resolves module URIs to source text and resource URIs to contents.
pub trait ModuleResolver {
    /// Resolve a module URI to its source text.
    fn resolve_module(&self, uri: &str) -> Result<String, String>;
    /// Read a resource URI to its textual contents.
    fn read_resource(&self, uri: &str) -> Result<String, String>;
    /// Expand a glob pattern to `(uri, contents)` pairs. The default
    /// resolver supports no globbing.
    fn glob_resources(&self, _pattern: &str) -> Vec<(String, String)> {
        Vec::new()
    }
    /// Expand a module glob pattern to the URIs it matches, for `import*`.
    /// The default resolver supports no globbing.
    fn glob_modules(&self, _pattern: &str) -> Vec<String> {
        Vec::new()
    }
}

/// Decides whether module and resource URIs may be accessed.
pub trait SecurityPolicy {
    /// May this module URI be imported?
    fn allows_module(&self, uri: &str) -> bool;
    /// May this resource URI be read?
    fn allows_resource(&self, uri: &str) -> bool;
}

/// A policy that allows everything. The default for embedded use, where the
/// host controls the resolver anyway.
#[derive(Debug, Clone, Default)]
pub struct AllowAllPolicy;

impl SecurityPolicy for AllowAllPolicy {
    #[inline(always)]
    fn allows_module(&self, _uri: &str) -> bool {
        true
    }
    #[inline(always)]
    fn allows_resource(&self, _uri: &str) -> bool {
        true
    }
}

/// A policy driven by URI scheme allow-lists.
#[derive(Debug, Clone)]
pub struct SchemePolicy {
    module_schemes: Vec<String>,
    resource_schemes: Vec<String>,
}

impl SchemePolicy {
    /// A policy allowing the standard module schemes and `file`/`env`
    /// resources.
    #[must_use]
    pub fn standard() -> Self {
        Self {
            module_schemes: MODULE_SCHEMES.iter().map(|s| s.to_string()).collect(),
            resource_schemes: vec!["file".to_string(), "env".to_string()],
        }
    }
    /// Allow an additional module scheme.
    pub fn allow_module_scheme(&mut self, scheme: impl Into<String>) -> &mut Self {
        self.module_schemes.push(scheme.into());
        self
    }
    /// Allow an additional resource scheme.
    pub fn allow_resource_scheme(&mut self, scheme: impl Into<String>) -> &mut Self {
        self.resource_schemes.push(scheme.into());
        self
    }
}

impl SecurityPolicy for SchemePolicy {
    fn allows_module(&self, uri: &str) -> bool {
        match uri_scheme(uri) {
            Some(scheme) => self.module_schemes.iter().any(|s| s == scheme),
            // Bare paths count as `file`.
            None => self.module_schemes.iter().any(|s| s == "file"),
        }
    }
    fn allows_resource(&self, uri: &str) -> bool {
        match uri_scheme(uri) {
            Some(scheme) => self.resource_schemes.iter().any(|s| s == scheme),
            None => self.resource_schemes.iter().any(|s| s == "file"),
        }
    }
}

/// A resolver backed by an in-memory collection of modules and resources.
///
/// Useful for embedding and tests; also serves the synthetic standard
/// library.
#[derive(Debug, Clone, Default)]
pub struct StaticModuleResolver {
    modules: BTreeMap<String, String>,
    resources: BTreeMap<String, String>,
}

impl StaticModuleResolver {
    /// Create an empty resolver.
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
    /// Add a module under a URI.
    pub fn insert(&mut self, uri: impl Into<String>, source: impl Into<String>) -> &mut Self {
        self.modules.insert(uri.into(), source.into());
        self
    }
    /// Add a resource under a URI.
    pub fn insert_resource(
        &mut self,
        uri: impl Into<String>,
        contents: impl Into<String>,
    ) -> &mut Self {
        self.resources.insert(uri.into(), contents.into());
        self
    }
}

impl ModuleResolver for StaticModuleResolver {
    fn resolve_module(&self, uri: &str) -> Result<String, String> {
        self.modules
            .get(uri)
            .cloned()
            .ok_or_else(|| format!("module '{}' is not registered", uri))
    }
    fn read_resource(&self, uri: &str) -> Result<String, String> {
        self.resources
            .get(uri)
            .cloned()
            .ok_or_else(|| format!("resource '{}' is not registered", uri))
    }
    fn glob_resources(&self, pattern: &str) -> Vec<(String, String)> {
        // Only a trailing `*` wildcard is supported.
        match pattern.strip_suffix('*') {
            Some(prefix) => self
                .resources
                .range(prefix.to_string()..)
                .take_while(|(uri, _)| uri.starts_with(prefix))
                .map(|(uri, contents)| (uri.clone(), contents.clone()))
                .collect(),
            None => self
                .resources
                .get(pattern)
                .map(|contents| vec![(pattern.to_string(), contents.clone())])
                .unwrap_or_default(),
        }
    }
    fn glob_modules(&self, pattern: &str) -> Vec<String> {
        // Only a trailing `*` wildcard is supported.
        match pattern.strip_suffix('*') {
            Some(prefix) => self
                .modules
                .range(prefix.to_string()..)
                .take_while(|(uri, _)| uri.starts_with(prefix))
                .map(|(uri, _)| uri.clone())
                .collect(),
            None => self
                .modules
                .contains_key(pattern)
                .then(|| vec![pattern.to_string()])
                .unwrap_or_default(),
        }
    }
}

/// A resolver that loads `file:` modules and bare paths from disk, relative
/// to a base directory.
#[derive(Debug, Clone)]
pub struct FileModuleResolver {
    base: PathBuf,
}

impl FileModuleResolver {
    /// Create a resolver rooted at a base directory.
    #[must_use]
    pub fn new(base: impl Into<PathBuf>) -> Self {
        Self { base: base.into() }
    }

    fn to_path(&self, uri: &str) -> Result<PathBuf, String> {
        let path = match uri.strip_prefix("file://") {
            Some(rest) => PathBuf::from(rest),
            None => match uri.strip_prefix("file:") {
                Some(rest) => PathBuf::from(rest),
                None => {
                    if uri_scheme(uri).is_some() {
                        return Err(format!("unsupported scheme in '{}'", uri));
                    }
                    self.base.join(uri)
                }
            },
        };
        Ok(path)
    }
}

impl ModuleResolver for FileModuleResolver {
    fn resolve_module(&self, uri: &str) -> Result<String, String> {
        let path = self.to_path(uri)?;
        std::fs::read_to_string(&path).map_err(|err| format!("{}: {}", path.display(), err))
    }
    fn read_resource(&self, uri: &str) -> Result<String, String> {
        let path = self.to_path(uri)?;
        std::fs::read_to_string(&path).map_err(|err| format!("{}: {}", path.display(), err))
    }
}
