use std::cell::RefCell;
use std::collections::HashMap;
use std::path::Path;

use anyhow::{Context, Result};
use nodepack_core::{Fetcher, PackageSpec, ResolvedPackage};

/// Thin wrapper over the fetcher that memoizes resolutions, so equivalent
/// spec strings resolve identically within one run.
pub struct MetadataResolver<'a> {
    fetcher: &'a dyn Fetcher,
    cache: RefCell<HashMap<String, ResolvedPackage>>,
}

impl<'a> MetadataResolver<'a> {
    pub fn new(fetcher: &'a dyn Fetcher) -> Self {
        Self {
            fetcher,
            cache: RefCell::new(HashMap::new()),
        }
    }

    pub fn resolve(&self, spec: &PackageSpec, context_dir: &Path) -> Result<ResolvedPackage> {
        if let Some(hit) = self.cache.borrow().get(&spec.raw) {
            return Ok(hit.clone());
        }

        let record = self
            .fetcher
            .fetch_metadata(spec, context_dir)
            .with_context(|| format!("failed to resolve '{}'", spec.raw))?;
        self.cache
            .borrow_mut()
            .insert(spec.raw.clone(), record.clone());
        Ok(record)
    }
}
