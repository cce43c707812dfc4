use anyhow::{anyhow, Result};
use semver::{Version, VersionReq};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SpecKind {
    Version,
    Range,
    Tag,
    Local,
    Remote,
    Git,
    Hosted,
}

impl SpecKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Version => "version",
            Self::Range => "range",
            Self::Tag => "tag",
            Self::Local => "local",
            Self::Remote => "remote",
            Self::Git => "git",
            Self::Hosted => "hosted",
        }
    }
}

/// A user-supplied or dependency-declared package identifier, classified.
///
/// `name` is known for registry kinds and for dependency-map entries; locator
/// kinds parsed from a bare argument carry `None` until resolution. `target`
/// is the version, range, tag or locator the fetcher acts on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PackageSpec {
    pub name: Option<String>,
    pub target: String,
    pub raw: String,
    pub kind: SpecKind,
}

impl PackageSpec {
    pub fn parse(raw: &str) -> Result<Self> {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return Err(anyhow!("package spec must not be empty"));
        }

        if let Some(kind) = classify_locator(trimmed) {
            return Ok(Self {
                name: None,
                target: trimmed.to_string(),
                raw: trimmed.to_string(),
                kind,
            });
        }

        let (name, rest) = split_name(trimmed)?;
        if rest.is_none() && looks_hosted(&name) {
            return Ok(Self {
                name: None,
                target: name.clone(),
                raw: trimmed.to_string(),
                kind: SpecKind::Hosted,
            });
        }

        let target = rest.unwrap_or_else(|| "*".to_string());
        let target = target
            .strip_prefix("file:")
            .map(str::to_string)
            .unwrap_or(target);
        if let Some(kind) = classify_locator(&target) {
            return Ok(Self {
                name: Some(name),
                target,
                raw: trimmed.to_string(),
                kind,
            });
        }

        let kind = classify_registry_target(&target)?;
        Ok(Self {
            name: Some(name),
            target,
            raw: trimmed.to_string(),
            kind,
        })
    }

    /// Builds the spec for a dependency-map entry, where the name is always
    /// known and the value may be a range, tag, locator or owner/repo
    /// shorthand.
    pub fn named(name: &str, target: &str) -> Result<Self> {
        if name.trim().is_empty() {
            return Err(anyhow!("dependency name must not be empty"));
        }
        let target = target.trim();
        let target = if target.is_empty() { "*" } else { target };
        let target = target.strip_prefix("file:").unwrap_or(target);

        let kind = if let Some(kind) = classify_locator(target) {
            kind
        } else if looks_hosted(target) {
            SpecKind::Hosted
        } else {
            classify_registry_target(target)?
        };
        Ok(Self {
            name: Some(name.to_string()),
            target: target.to_string(),
            raw: format!("{name}@{target}"),
            kind,
        })
    }

    /// An exact `name@version` spec, as the lockfile inflater issues.
    pub fn exact(name: &str, version: &Version) -> Self {
        Self {
            name: Some(name.to_string()),
            target: version.to_string(),
            raw: format!("{name}@{version}"),
            kind: SpecKind::Version,
        }
    }

    pub fn is_exact(&self) -> bool {
        self.kind == SpecKind::Version
    }
}

fn split_name(input: &str) -> Result<(String, Option<String>)> {
    let at = if let Some(scope_rest) = input.strip_prefix('@') {
        scope_rest.find('@').map(|index| index + 1)
    } else {
        input.find('@')
    };

    let (name, rest) = match at {
        Some(index) => (&input[..index], Some(input[index + 1..].to_string())),
        None => (input, None),
    };
    if name.trim().is_empty() {
        return Err(anyhow!("package name must not be empty in spec '{input}'"));
    }
    if name.starts_with('@') && !name.contains('/') {
        return Err(anyhow!("scoped package name is missing its scope: {input}"));
    }
    Ok((name.to_string(), rest))
}

fn classify_locator(target: &str) -> Option<SpecKind> {
    let lower = target.to_ascii_lowercase();
    if lower.starts_with("git://")
        || lower.starts_with("git+ssh://")
        || lower.starts_with("git+https://")
        || lower.starts_with("git+file://")
        || lower.ends_with(".git")
    {
        return Some(SpecKind::Git);
    }
    if lower.starts_with("http://") || lower.starts_with("https://") {
        return Some(SpecKind::Remote);
    }
    if target == "."
        || target == ".."
        || target.starts_with("./")
        || target.starts_with("../")
        || target.starts_with('/')
        || target.starts_with("~/")
        || lower.ends_with(".tgz")
        || lower.ends_with(".tar.gz")
    {
        return Some(SpecKind::Local);
    }
    None
}

fn looks_hosted(name: &str) -> bool {
    !name.starts_with('@') && name.matches('/').count() == 1
}

fn classify_registry_target(target: &str) -> Result<SpecKind> {
    if Version::parse(target).is_ok() {
        return Ok(SpecKind::Version);
    }
    if VersionReq::parse(target).is_ok() {
        return Ok(SpecKind::Range);
    }
    if target.contains('/') || target.contains(' ') {
        return Err(anyhow!("unrecognized package spec target: {target}"));
    }
    Ok(SpecKind::Tag)
}

/// The normalized descriptor a resolved package carries: what was asked for,
/// how it was classified, and every constraint merged into this node so far.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Requested {
    pub spec: String,
    pub kind: SpecKind,
    pub constraints: Vec<String>,
}

impl Requested {
    pub fn new(spec: impl Into<String>, kind: SpecKind) -> Self {
        let spec = spec.into();
        Self {
            constraints: vec![spec.clone()],
            spec,
            kind,
        }
    }

    pub fn from_spec(spec: &PackageSpec) -> Self {
        Self::new(spec.target.clone(), spec.kind)
    }

    pub fn pinned(version: &Version) -> Self {
        Self::new(version.to_string(), SpecKind::Version)
    }

    /// Folds another satisfied constraint into this descriptor. Differing
    /// specs concatenate and the combined descriptor degrades to a range.
    pub fn merge(&mut self, other: &Requested) {
        if !self.constraints.iter().any(|existing| existing == &other.spec) {
            self.constraints.push(other.spec.clone());
        }
        if self.spec != other.spec {
            self.spec = format!("{} {}", self.spec, other.spec);
            self.kind = SpecKind::Range;
        }
    }
}

pub fn range_satisfies(range: &str, version: &Version) -> bool {
    match VersionReq::parse(range) {
        Ok(requirement) => requirement.matches(version),
        Err(_) => false,
    }
}
