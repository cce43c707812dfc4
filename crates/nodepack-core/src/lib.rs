mod error;
mod external;
mod manifest;
mod record;
mod spec;

pub use error::InstallError;
pub use external::{Extractor, Fetcher, LifecycleRunner};
pub use manifest::{LockfileEntry, LockfileRoot, PackageManifest};
pub use record::{DistRef, ResolvedPackage};
pub use spec::{range_satisfies, PackageSpec, Requested, SpecKind};
