use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use anyhow::{anyhow, Result};
use nodepack_core::{
    Fetcher, LockfileRoot, PackageManifest, PackageSpec, Requested, ResolvedPackage, SpecKind,
};
use semver::{Version, VersionReq};

use crate::{
    diff_trees, earliest_installable, inflate_lockfile, load_args, load_deps, load_dev_deps,
    validate_tree, ActionKind, MetadataResolver, NodeId, Tree,
};

struct FakeRegistry {
    available: BTreeMap<String, Vec<ResolvedPackage>>,
}

impl FakeRegistry {
    fn new() -> Self {
        Self {
            available: BTreeMap::new(),
        }
    }

    fn publish(&mut self, raw: &str) {
        let manifest = PackageManifest::from_json_str(raw).expect("fixture manifest must parse");
        let record =
            ResolvedPackage::from_manifest(manifest, None, None).expect("fixture record must build");
        self.available
            .entry(record.name.clone())
            .or_default()
            .push(record);
    }
}

impl Fetcher for FakeRegistry {
    fn fetch_metadata(&self, spec: &PackageSpec, _context_dir: &Path) -> Result<ResolvedPackage> {
        let name = spec
            .name
            .as_deref()
            .ok_or_else(|| anyhow!("fake registry only serves named specs: {}", spec.raw))?;
        let versions = self
            .available
            .get(name)
            .ok_or_else(|| anyhow!("package '{name}' was not found in the registry index"))?;

        let selected = match spec.kind {
            SpecKind::Version => {
                let wanted = Version::parse(&spec.target)?;
                versions.iter().find(|record| record.version == wanted)
            }
            SpecKind::Range => {
                let requirement = VersionReq::parse(&spec.target)?;
                versions
                    .iter()
                    .filter(|record| requirement.matches(&record.version))
                    .max_by(|a, b| a.version.cmp(&b.version))
            }
            _ => {
                return Err(anyhow!(
                    "unsupported spec kind in fake registry: {}",
                    spec.raw
                ))
            }
        };

        let mut record = selected
            .ok_or_else(|| anyhow!("no matching version for '{}'", spec.raw))?
            .clone();
        record.requested = Some(Requested::from_spec(spec));
        Ok(record)
    }

    fn fetch_tarball(&self, _package: &ResolvedPackage, _dest: &Path) -> Result<()> {
        Ok(())
    }
}

fn project_tree(manifest_raw: &str) -> Tree {
    let manifest =
        PackageManifest::from_json_str(manifest_raw).expect("project manifest must parse");
    Tree::new(ResolvedPackage::root(manifest), "/project")
}

fn record(name: &str, version: &str) -> ResolvedPackage {
    let manifest = PackageManifest::from_json_str(&format!(
        r#"{{"name": "{name}", "version": "{version}"}}"#
    ))
    .expect("fixture manifest must parse");
    ResolvedPackage::from_manifest(manifest, None, None).expect("fixture record must build")
}

fn child(tree: &Tree, parent: NodeId, name: &str) -> NodeId {
    tree.find_child(parent, name)
        .unwrap_or_else(|| panic!("expected child '{name}'"))
}

#[test]
fn resolves_single_dependency_at_root() {
    let mut registry = FakeRegistry::new();
    registry.publish(r#"{"name": "a", "version": "1.2.3"}"#);
    let resolver = MetadataResolver::new(&registry);

    let mut ideal = project_tree(r#"{"dependencies": {"a": "^1.0.0"}}"#);
    let root = ideal.root();
    load_deps(&mut ideal, &resolver, root).expect("must load");
    validate_tree(&ideal).expect("tree must validate");

    let a = child(&ideal, root, "a");
    assert_eq!(ideal.node(a).package.version.to_string(), "1.2.3");
    assert_eq!(
        ideal.node(a).path,
        PathBuf::from("/project/node_modules/a")
    );
    assert!(ideal.node(a).loaded);

    let current = project_tree(r#"{"dependencies": {"a": "^1.0.0"}}"#);
    let actions = diff_trees(&current, &ideal);
    assert_eq!(actions.len(), 1);
    assert_eq!(actions[0].kind, ActionKind::Add);
    assert_eq!(actions[0].label(), "a@1.2.3");
}

#[test]
fn hoists_first_match_and_nests_conflicts() {
    let mut registry = FakeRegistry::new();
    registry.publish(r#"{"name": "a", "version": "1.0.0", "dependencies": {"b": "^1"}}"#);
    registry.publish(r#"{"name": "b", "version": "1.5.0"}"#);
    registry.publish(r#"{"name": "b", "version": "2.3.0"}"#);
    let resolver = MetadataResolver::new(&registry);

    let manifest = r#"{"dependencies": {"a": "^1", "b": "^2"}}"#;
    let mut ideal = project_tree(manifest);
    let root = ideal.root();
    load_deps(&mut ideal, &resolver, root).expect("must load");
    validate_tree(&ideal).expect("tree must validate");

    let a = child(&ideal, root, "a");
    let b_top = child(&ideal, root, "b");
    assert_eq!(ideal.node(b_top).package.version.to_string(), "2.3.0");
    let b_nested = child(&ideal, a, "b");
    assert_eq!(ideal.node(b_nested).package.version.to_string(), "1.5.0");

    let actions = diff_trees(&project_tree(manifest), &ideal);
    assert_eq!(actions.len(), 3);
    assert!(actions.iter().all(|action| action.kind == ActionKind::Add));
    assert_eq!(
        actions[2].path,
        PathBuf::from("/project/node_modules/a/node_modules/b")
    );
}

#[test]
fn reuses_satisfying_ancestor_instead_of_duplicating() {
    let mut registry = FakeRegistry::new();
    registry.publish(r#"{"name": "a", "version": "1.2.3"}"#);
    registry.publish(r#"{"name": "c", "version": "1.0.0", "dependencies": {"a": "^1"}}"#);
    let resolver = MetadataResolver::new(&registry);

    let mut ideal = project_tree(r#"{"dependencies": {"a": "^1", "c": "^1"}}"#);
    let root = ideal.root();
    load_deps(&mut ideal, &resolver, root).expect("must load");
    validate_tree(&ideal).expect("tree must validate");

    let copies = ideal
        .walk()
        .into_iter()
        .filter(|&id| ideal.name(id) == "a")
        .count();
    assert_eq!(copies, 1);

    let a = child(&ideal, root, "a");
    let c = child(&ideal, root, "c");
    assert!(ideal.node(a).required_by.contains(&root));
    assert!(ideal.node(a).required_by.contains(&c));
    assert!(ideal.find_child(c, "a").is_none());
}

#[test]
fn lockfile_inflation_is_authoritative_and_diffs_top_down() {
    let mut registry = FakeRegistry::new();
    registry.publish(r#"{"name": "a", "version": "1.0.0", "dependencies": {"b": "^1"}}"#);
    registry.publish(r#"{"name": "c", "version": "1.0.0", "dependencies": {"b": "^1"}}"#);
    registry.publish(r#"{"name": "b", "version": "1.0.0"}"#);
    registry.publish(r#"{"name": "b", "version": "2.0.0"}"#);
    let resolver = MetadataResolver::new(&registry);

    let lockfile = LockfileRoot::from_json_str(
        r#"{
  "dependencies": {
    "a": { "version": "1.0.0", "dependencies": { "b": { "version": "1.0.0" } } },
    "c": { "version": "1.0.0", "dependencies": { "b": { "version": "2.0.0" } } }
  }
}"#,
    )
    .expect("lockfile must parse");

    let mut ideal = project_tree("{}");
    let root = ideal.root();
    inflate_lockfile(&mut ideal, &resolver, root, &lockfile.dependencies)
        .expect("must inflate");

    let a = child(&ideal, root, "a");
    let c = child(&ideal, root, "c");
    assert_eq!(
        ideal.node(child(&ideal, a, "b")).package.version.to_string(),
        "1.0.0"
    );
    assert_eq!(
        ideal.node(child(&ideal, c, "b")).package.version.to_string(),
        "2.0.0"
    );
    assert!(ideal.find_child(root, "b").is_none());

    let actions = diff_trees(&project_tree("{}"), &ideal);
    let labels: Vec<String> = actions
        .iter()
        .map(|action| action.path.display().to_string())
        .collect();
    assert_eq!(
        labels,
        vec![
            "/project/node_modules/a",
            "/project/node_modules/c",
            "/project/node_modules/a/node_modules/b",
            "/project/node_modules/c/node_modules/b",
        ]
    );
    assert!(actions.iter().all(|action| action.kind == ActionKind::Add));
}

#[test]
fn requested_descriptor_merges_multiple_constraints() {
    let mut registry = FakeRegistry::new();
    registry.publish(r#"{"name": "a", "version": "1.4.0"}"#);
    registry.publish(r#"{"name": "c", "version": "1.0.0", "dependencies": {"a": ">=1.2.0"}}"#);
    let resolver = MetadataResolver::new(&registry);

    let mut ideal = project_tree(r#"{"dependencies": {"a": "^1.0.0", "c": "^1"}}"#);
    let root = ideal.root();
    load_deps(&mut ideal, &resolver, root).expect("must load");

    let a = child(&ideal, root, "a");
    let requested = ideal.node(a).package.requested.clone().expect("requested");
    assert_eq!(requested.spec, "^1.0.0 >=1.2.0");
    assert_eq!(requested.kind, SpecKind::Range);
    assert_eq!(requested.constraints, vec!["^1.0.0", ">=1.2.0"]);
}

#[test]
fn cloned_node_adopts_requested_when_satisfied() {
    let mut registry = FakeRegistry::new();
    registry.publish(r#"{"name": "a", "version": "1.2.3"}"#);
    let resolver = MetadataResolver::new(&registry);

    let mut current = project_tree(r#"{"dependencies": {"a": "^1.0.0"}}"#);
    let root = current.root();
    current.attach_child(root, record("a", "1.2.3"), &[root]);

    let mut ideal = current.clone();
    load_deps(&mut ideal, &resolver, root).expect("must load");

    let a = child(&ideal, root, "a");
    let requested = ideal.node(a).package.requested.clone().expect("requested");
    assert_eq!(requested.spec, "^1.0.0");

    let actions = diff_trees(&current, &ideal);
    assert!(actions.is_empty(), "unexpected actions: {actions:?}");
}

#[test]
fn stale_copy_is_replaced_and_diffs_to_update() {
    let mut registry = FakeRegistry::new();
    registry.publish(r#"{"name": "x", "version": "2.0.0"}"#);
    let resolver = MetadataResolver::new(&registry);

    let mut current = project_tree(r#"{"dependencies": {"x": "^2"}}"#);
    let root = current.root();
    current.attach_child(root, record("x", "1.0.0"), &[root]);

    let mut ideal = current.clone();
    load_deps(&mut ideal, &resolver, root).expect("must load");
    validate_tree(&ideal).expect("tree must validate");

    let x = child(&ideal, root, "x");
    assert_eq!(ideal.node(x).package.version.to_string(), "2.0.0");

    let actions = diff_trees(&current, &ideal);
    assert_eq!(actions.len(), 1);
    assert_eq!(actions[0].kind, ActionKind::Update);
    assert_eq!(
        actions[0].old_version.as_ref().map(ToString::to_string),
        Some("1.0.0".to_string())
    );
    assert_eq!(actions[0].version.to_string(), "2.0.0");
}

#[test]
fn dev_transitives_stay_inside_the_dev_subtree() {
    let mut registry = FakeRegistry::new();
    registry.publish(r#"{"name": "d", "version": "1.0.0", "dependencies": {"e": "^1"}}"#);
    registry.publish(r#"{"name": "e", "version": "1.1.0"}"#);
    let resolver = MetadataResolver::new(&registry);

    let mut ideal = project_tree(r#"{"devDependencies": {"d": "^1"}}"#);
    let root = ideal.root();
    load_dev_deps(&mut ideal, &resolver).expect("must load dev deps");
    validate_tree(&ideal).expect("tree must validate");

    let d = child(&ideal, root, "d");
    assert_eq!(ideal.node(d).parent, Some(root));
    let e = child(&ideal, d, "e");
    assert_eq!(ideal.node(e).package.version.to_string(), "1.1.0");
    assert!(ideal.find_child(root, "e").is_none());
}

#[test]
fn dev_dependencies_skip_names_covered_by_runtime() {
    let mut registry = FakeRegistry::new();
    registry.publish(r#"{"name": "a", "version": "1.0.0"}"#);
    registry.publish(r#"{"name": "a", "version": "2.0.0"}"#);
    let resolver = MetadataResolver::new(&registry);

    let mut ideal = project_tree(
        r#"{"dependencies": {"a": "^1"}, "devDependencies": {"a": "^2"}}"#,
    );
    let root = ideal.root();
    load_deps(&mut ideal, &resolver, root).expect("must load");
    load_dev_deps(&mut ideal, &resolver).expect("must load dev deps");

    let a = child(&ideal, root, "a");
    assert_eq!(ideal.node(a).package.version.to_string(), "1.0.0");
}

#[test]
fn optional_dependency_failure_skips_the_subtree() {
    let mut registry = FakeRegistry::new();
    registry.publish(r#"{"name": "a", "version": "1.0.0"}"#);
    let resolver = MetadataResolver::new(&registry);

    let mut ideal = project_tree(
        r#"{"dependencies": {"a": "^1"}, "optionalDependencies": {"opt": "^1"}}"#,
    );
    let root = ideal.root();
    load_deps(&mut ideal, &resolver, root).expect("optional failure must not propagate");
    validate_tree(&ideal).expect("tree must validate");

    assert!(ideal.find_child(root, "a").is_some());
    assert!(ideal.find_child(root, "opt").is_none());
}

#[test]
fn explicit_args_install_at_the_root() {
    let mut registry = FakeRegistry::new();
    registry.publish(r#"{"name": "a", "version": "1.0.0", "dependencies": {"b": "^1"}}"#);
    registry.publish(r#"{"name": "b", "version": "1.0.0"}"#);
    let resolver = MetadataResolver::new(&registry);

    let mut ideal = project_tree("{}");
    let root = ideal.root();
    let args = vec![PackageSpec::parse("a@^1").expect("arg must parse")];
    load_args(&mut ideal, &resolver, &args).expect("must install args");
    validate_tree(&ideal).expect("tree must validate");

    let a = child(&ideal, root, "a");
    assert_eq!(ideal.node(a).required_by, vec![root]);
    assert!(ideal.find_child(root, "b").is_some(), "transitive must hoist");
}

#[test]
fn embedded_shrinkwrap_overrides_range_resolution() {
    let mut registry = FakeRegistry::new();
    registry.publish(
        r#"{
  "name": "a",
  "version": "1.0.0",
  "dependencies": {"b": "^1"},
  "shrinkwrap": {"dependencies": {"b": {"version": "1.0.0"}}}
}"#,
    );
    registry.publish(r#"{"name": "b", "version": "1.0.0"}"#);
    registry.publish(r#"{"name": "b", "version": "1.9.0"}"#);
    let resolver = MetadataResolver::new(&registry);

    let mut ideal = project_tree(r#"{"dependencies": {"a": "^1"}}"#);
    let root = ideal.root();
    load_deps(&mut ideal, &resolver, root).expect("must load");

    let a = child(&ideal, root, "a");
    let b = child(&ideal, a, "b");
    assert_eq!(ideal.node(b).package.version.to_string(), "1.0.0");
    assert!(ideal.find_child(root, "b").is_none());
}

#[test]
fn earliest_installable_stops_below_conflicts_and_nests_under_self() {
    let mut tree = project_tree("{}");
    let root = tree.root();
    let a = tree.attach_child(root, record("a", "1.0.0"), &[root]);
    let b = tree.attach_child(a, record("b", "1.0.0"), &[a]);
    tree.attach_child(root, record("x", "1.0.0"), &[root]);

    assert_eq!(earliest_installable(&tree, b, "x"), a);
    assert_eq!(earliest_installable(&tree, b, "y"), root);

    let x_top = child(&tree, root, "x");
    let under_x = tree.attach_child(x_top, record("w", "1.0.0"), &[x_top]);
    assert_eq!(earliest_installable(&tree, under_x, "x"), x_top);
}

#[test]
fn diff_is_deterministic_and_empty_on_identical_trees() {
    let mut tree = project_tree("{}");
    let root = tree.root();
    let a = tree.attach_child(root, record("a", "1.0.0"), &[root]);
    tree.attach_child(a, record("b", "1.0.0"), &[a]);
    tree.attach_child(root, record("c", "1.0.0"), &[root]);

    assert!(diff_trees(&tree, &tree.clone()).is_empty());

    let empty = project_tree("{}");
    let first = diff_trees(&empty, &tree);
    let second = diff_trees(&empty, &tree);
    let as_labels = |actions: &[crate::Action]| {
        actions
            .iter()
            .map(|action| format!("{} {}", action.kind.as_str(), action.path.display()))
            .collect::<Vec<_>>()
    };
    assert_eq!(as_labels(&first), as_labels(&second));
}

#[test]
fn diff_orders_removals_bottom_up_before_additions() {
    let mut current = project_tree("{}");
    let root = current.root();
    let old = current.attach_child(root, record("old", "1.0.0"), &[root]);
    current.attach_child(old, record("inner", "1.0.0"), &[old]);

    let mut ideal = project_tree("{}");
    let ideal_root = ideal.root();
    ideal.attach_child(ideal_root, record("new", "1.0.0"), &[ideal_root]);

    let actions = diff_trees(&current, &ideal);
    let kinds: Vec<ActionKind> = actions.iter().map(|action| action.kind).collect();
    assert_eq!(
        kinds,
        vec![ActionKind::Remove, ActionKind::Remove, ActionKind::Add]
    );
    assert_eq!(
        actions[0].path,
        PathBuf::from("/project/node_modules/old/node_modules/inner")
    );
    assert_eq!(actions[1].path, PathBuf::from("/project/node_modules/old"));
}

#[test]
fn diff_pairs_relocated_packages_into_moves() {
    let mut current = project_tree("{}");
    let root = current.root();
    let a = current.attach_child(root, record("a", "1.0.0"), &[root]);
    current.attach_child(a, record("b", "1.5.0"), &[a]);

    let mut ideal = project_tree("{}");
    let ideal_root = ideal.root();
    ideal.attach_child(ideal_root, record("a", "1.0.0"), &[ideal_root]);
    ideal.attach_child(ideal_root, record("b", "1.5.0"), &[ideal_root]);

    let actions = diff_trees(&current, &ideal);
    assert_eq!(actions.len(), 1);
    assert_eq!(actions[0].kind, ActionKind::Move);
    assert_eq!(
        actions[0].from_path,
        Some(PathBuf::from(
            "/project/node_modules/a/node_modules/b"
        ))
    );
    assert_eq!(actions[0].path, PathBuf::from("/project/node_modules/b"));
}

#[test]
fn validator_rejects_mismatched_paths() {
    let mut tree = project_tree("{}");
    let root = tree.root();
    let a = tree.attach_child(root, record("a", "1.0.0"), &[root]);
    tree.node_mut(a).path = PathBuf::from("/elsewhere/node_modules/a");

    let err = validate_tree(&tree).expect_err("must reject");
    assert!(err.to_string().contains("does not match parent slot"));
}

#[test]
fn validator_rejects_unsatisfied_dependencies() {
    let tree = project_tree(r#"{"dependencies": {"ghost": "^1"}}"#);
    let err = validate_tree(&tree).expect_err("must reject");
    assert!(err.to_string().contains("ghost"));
}

#[test]
fn validator_rejects_non_satisfying_intervening_copy() {
    let mut tree = project_tree("{}");
    let root = tree.root();
    let manifest = PackageManifest::from_json_str(
        r#"{"name": "a", "version": "1.0.0", "dependencies": {"b": "^2"}}"#,
    )
    .expect("manifest must parse");
    let a = tree.attach_child(
        root,
        ResolvedPackage::from_manifest(manifest, None, None).expect("record"),
        &[root],
    );
    tree.attach_child(a, record("b", "1.0.0"), &[a]);

    let err = validate_tree(&tree).expect_err("must reject");
    assert!(err.to_string().contains("non-satisfying"));
}

#[test]
fn validator_rejects_duplicate_child_names() {
    let mut tree = project_tree("{}");
    let root = tree.root();
    tree.attach_child(root, record("a", "1.0.0"), &[root]);
    tree.attach_child(root, record("a", "2.0.0"), &[root]);

    let err = validate_tree(&tree).expect_err("must reject");
    assert!(err.to_string().contains("duplicate child name"));
}

#[test]
fn validator_rejects_missing_dependents() {
    let mut tree = project_tree("{}");
    let root = tree.root();
    tree.attach_child(root, record("a", "1.0.0"), &[]);

    let err = validate_tree(&tree).expect_err("must reject");
    assert!(err.to_string().contains("no dependents"));
}

#[test]
fn metadata_resolution_is_cached_per_spec_string() {
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingFetcher {
        inner: FakeRegistry,
        calls: AtomicUsize,
    }

    impl Fetcher for CountingFetcher {
        fn fetch_metadata(
            &self,
            spec: &PackageSpec,
            context_dir: &Path,
        ) -> Result<ResolvedPackage> {
            self.calls.fetch_add(1, Ordering::Relaxed);
            self.inner.fetch_metadata(spec, context_dir)
        }

        fn fetch_tarball(&self, package: &ResolvedPackage, dest: &Path) -> Result<()> {
            self.inner.fetch_tarball(package, dest)
        }
    }

    let mut registry = FakeRegistry::new();
    registry.publish(r#"{"name": "a", "version": "1.0.0"}"#);
    let fetcher = CountingFetcher {
        inner: registry,
        calls: AtomicUsize::new(0),
    };
    let resolver = MetadataResolver::new(&fetcher);

    let spec = PackageSpec::parse("a@^1").expect("spec must parse");
    resolver.resolve(&spec, Path::new("/project")).expect("must resolve");
    resolver.resolve(&spec, Path::new("/project")).expect("must resolve");
    assert_eq!(fetcher.calls.load(Ordering::Relaxed), 1);
}
