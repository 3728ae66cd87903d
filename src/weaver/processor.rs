//! Walks a source tree, weaves every matching method and writes the result to
//! a mirrored output tree.
//!
//! Units are handled at the JSON level: a type is read without its methods,
//! and each method is parsed on its own, so a method the IR cannot read only
//! fails that method.

use super::injector::{CodeInjector, DefaultCodeInjector, WeaveOptions};
use super::ir::{Method, TypeDecl};
use crate::config::{ConfigLoader, RuleStore};
use crate::error::{LogweaveError, Result};
use serde::Serialize;
use serde_json::Value;
use std::fs;
use std::path::{Component, Path, PathBuf};
use tracing::{debug, info, warn};

pub const UNIT_EXTENSION: &str = "json";

/// A method left unmodified, and why.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct WeaveFailure {
    pub target: String,
    pub reason: String,
}

/// Counters and failures gathered over one [`ProjectProcessor::process`] run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct WeaveReport {
    /// Source units parsed and written
    pub units: usize,
    /// Files copied through unchanged (not units, or unparseable)
    pub copied: usize,
    pub methods_woven: usize,
    /// Methods without a body or without a matching, non-inert rule
    pub methods_skipped: usize,
    pub failures: Vec<WeaveFailure>,
}

impl WeaveReport {
    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }
}

/// Weaves a whole source tree with one [`CodeInjector`].
pub struct ProjectProcessor {
    injector: Box<dyn CodeInjector>,
}

impl Default for ProjectProcessor {
    fn default() -> Self {
        Self::new(DefaultCodeInjector::default())
    }
}

impl ProjectProcessor {
    pub fn new(injector: impl CodeInjector + 'static) -> Self {
        Self {
            injector: Box::new(injector),
        }
    }

    pub fn with_options(options: WeaveOptions) -> Self {
        Self::new(DefaultCodeInjector::new(options))
    }

    /// Weave every unit under `input` into `output`.
    ///
    /// `input` is only read. When `store` is `None` the rules are loaded with
    /// [`ConfigLoader::load_default`].
    ///
    /// # Arguments
    ///
    /// * `input` - Root of the source tree, must be an existing directory
    /// * `output` - Root of the mirrored tree; must not overlap `input`
    /// * `store` - Rules to weave with
    ///
    /// # Errors
    ///
    /// Fails before writing anything when the trees overlap or the input is
    /// missing, and on I/O errors. Methods that cannot be woven are reported
    /// in [`WeaveReport::failures`] instead.
    pub fn process(&self, input: &Path, output: &Path, store: Option<&RuleStore>) -> Result<WeaveReport> {
        let loaded;
        let store = match store {
            Some(store) => store,
            None => {
                loaded = ConfigLoader::load_default()?;
                &loaded
            }
        };

        let (input, output) = check_trees(input, output)?;
        info!("Weaving {} into {}", input.display(), output.display());

        let mut report = WeaveReport::default();
        for source in list_files(&input)? {
            let relative = source
                .strip_prefix(&input)
                .map_err(|e| LogweaveError::Config(format!("{}: {}", source.display(), e)))?;
            let destination = output.join(relative);
            if let Some(parent) = destination.parent() {
                fs::create_dir_all(parent)?;
            }

            let is_unit = source.extension().is_some_and(|ext| ext == UNIT_EXTENSION);
            if !is_unit {
                fs::copy(&source, &destination)?;
                report.copied += 1;
                continue;
            }

            let text = fs::read_to_string(&source)?;
            let mut document = match serde_json::from_str::<Value>(&text) {
                Ok(document) if is_unit_document(&document) => document,
                Ok(_) => {
                    debug!("Copying {} unchanged, no types", source.display());
                    fs::write(&destination, &text)?;
                    report.copied += 1;
                    continue;
                }
                Err(e) => {
                    warn!("Copying {} unchanged, not a source unit: {}", source.display(), e);
                    fs::write(&destination, &text)?;
                    report.copied += 1;
                    continue;
                }
            };

            let woven = self.weave_document(&mut document, store, &mut report);
            if woven > 0 {
                let mut rendered = serde_json::to_string_pretty(&document)?;
                rendered.push('\n');
                fs::write(&destination, rendered)?;
            } else {
                fs::write(&destination, &text)?;
            }
            report.units += 1;
        }

        info!(
            "Wove {} methods in {} units ({} skipped, {} failed, {} files copied)",
            report.methods_woven,
            report.units,
            report.methods_skipped,
            report.failures.len(),
            report.copied
        );
        Ok(report)
    }

    /// Weave the methods of one unit document in place and return how many
    /// changed.
    ///
    /// A method is only parsed once a non-inert rule matches it. A method
    /// that cannot be parsed or woven is left exactly as it was and recorded
    /// in `report`; the rest of the unit is still woven.
    ///
    /// # Arguments
    ///
    /// * `document` - A unit: an object with a `types` array
    /// * `store` - Rules to match method targets against
    /// * `report` - Receives skip counts and failures
    pub fn weave_document(&self, document: &mut Value, store: &RuleStore, report: &mut WeaveReport) -> usize {
        let Some(types) = document.get_mut("types").and_then(Value::as_array_mut) else {
            return 0;
        };

        let mut woven = 0;
        for ty_value in types.iter_mut() {
            let Some(fields) = ty_value.as_object_mut() else {
                warn!("Skipping a type that is not an object");
                continue;
            };
            // The type is parsed without its methods; each method is parsed
            // on its own below.
            let mut methods = fields.remove("methods");
            let ty = match serde_json::from_value::<TypeDecl>(Value::Object(fields.clone())) {
                Ok(ty) => ty,
                Err(e) => {
                    warn!("Skipping a type that cannot be read: {}", e);
                    if let Some(methods) = methods {
                        fields.insert("methods".to_string(), methods);
                    }
                    continue;
                }
            };

            if let Some(list) = methods.as_mut().and_then(Value::as_array_mut) {
                for method in list.iter_mut() {
                    if self.weave_method(&ty, method, store, report) {
                        woven += 1;
                    }
                }
            }
            if let Some(methods) = methods {
                fields.insert("methods".to_string(), methods);
            }
        }
        report.methods_woven += woven;
        woven
    }

    fn weave_method(&self, ty: &TypeDecl, method: &mut Value, store: &RuleStore, report: &mut WeaveReport) -> bool {
        let Some(name) = method.get("name").and_then(Value::as_str) else {
            report.methods_skipped += 1;
            return false;
        };
        let target = ty.target_of(name);
        let has_body = method.get("body").is_some_and(|body| !body.is_null());
        let rule = match store.find_rule(&target) {
            Some(rule) if has_body && !rule.is_inert() => rule,
            _ => {
                report.methods_skipped += 1;
                return false;
            }
        };

        let mut parsed = match serde_json::from_value::<Method>(method.clone()) {
            Ok(parsed) => parsed,
            Err(e) => {
                warn!("Leaving {} unmodified, cannot read its body: {}", target, e);
                report.failures.push(WeaveFailure {
                    target,
                    reason: e.to_string(),
                });
                return false;
            }
        };

        let rendered = self
            .injector
            .inject(ty, &mut parsed, rule)
            .and_then(|()| serde_json::to_value(&parsed).map_err(LogweaveError::from));
        match rendered {
            Ok(value) => {
                debug!("Wove {}", target);
                *method = value;
                true
            }
            Err(e) => {
                warn!("Leaving {} unmodified: {}", target, e);
                let reason = match e {
                    LogweaveError::Weaving { reason, .. } => reason,
                    other => other.to_string(),
                };
                report.failures.push(WeaveFailure { target, reason });
                false
            }
        }
    }
}

fn is_unit_document(document: &Value) -> bool {
    document.get("types").is_some_and(Value::is_array)
}

/// Resolve both roots and reject trees that contain one another.
fn check_trees(input: &Path, output: &Path) -> Result<(PathBuf, PathBuf)> {
    if !input.is_dir() {
        return Err(LogweaveError::Config(format!("Input is not a directory: {}", input.display())));
    }
    let input = input.canonicalize()?;
    let output = resolve(output)?;

    if output.starts_with(&input) || input.starts_with(&output) {
        return Err(LogweaveError::Config(format!(
            "Output {} overlaps input {}",
            output.display(),
            input.display()
        )));
    }
    Ok((input, output))
}

/// Absolute form of a path that may not exist yet: the nearest existing
/// ancestor is canonicalized and the rest is applied lexically, so `..` and
/// symlinks cannot hide an overlap.
fn resolve(path: &Path) -> Result<PathBuf> {
    let absolute = std::path::absolute(path)?;
    let existing = absolute
        .ancestors()
        .find(|ancestor| ancestor.exists())
        .ok_or_else(|| LogweaveError::Config(format!("No existing ancestor for {}", path.display())))?;
    let rest = absolute
        .strip_prefix(existing)
        .map_err(|e| LogweaveError::Config(format!("{}: {}", path.display(), e)))?
        .to_path_buf();

    let mut resolved = existing.canonicalize()?;
    for component in rest.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                resolved.pop();
            }
            other => resolved.push(other),
        }
    }
    Ok(resolved)
}

fn list_files(root: &Path) -> Result<Vec<PathBuf>> {
    let pattern = format!("{}/**/*", glob::Pattern::escape(&root.to_string_lossy()));
    let entries = glob::glob(&pattern).map_err(|e| LogweaveError::Config(format!("Bad source pattern: {}", e)))?;

    let mut files: Vec<PathBuf> = entries.filter_map(|entry| entry.ok()).filter(|p| p.is_file()).collect();
    files.sort();
    Ok(files)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{Rule, TriggerPoint};
    use crate::weaver::injector::LOG_ENTRY;
    use serde_json::json;
    use tempfile::tempdir;

    fn store() -> RuleStore {
        RuleStore::builder()
            .rule(Rule::new("com.shop.ProductService.*", "biz").with_triggers(TriggerPoint::ALL))
            .build()
    }

    fn unit() -> Value {
        json!({
            "language": "java",
            "types": [{
                "name": "ProductService",
                "package": "com.shop",
                "methods": [
                    {
                        "name": "broken",
                        "params": [{"name": "__logweave_ret_0"}],
                        "return_type": "int",
                        "body": [{"kind": "return", "value": {"kind": "var", "name": "__logweave_ret_0"}}]
                    },
                    {
                        "name": "getProductById",
                        "params": [{"name": "id"}],
                        "return_type": "Product",
                        "body": [{"kind": "return", "value": {"kind": "raw", "code": "repo.find(id)"}}]
                    },
                    {"name": "abstractOne", "return_type": "int"}
                ]
            }]
        })
    }

    fn write(path: &Path, value: &Value) {
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, serde_json::to_string_pretty(value).unwrap()).unwrap();
    }

    fn read(path: &Path) -> Value {
        serde_json::from_str(&fs::read_to_string(path).unwrap()).unwrap()
    }

    #[test]
    fn test_failure_in_one_method_does_not_stop_others() {
        let input = tempdir().unwrap();
        let output = tempdir().unwrap();
        let source = input.path().join("com/shop/ProductService.json");
        write(&source, &unit());
        let before = fs::read_to_string(&source).unwrap();

        let report = ProjectProcessor::default()
            .process(input.path(), output.path(), Some(&store()))
            .unwrap();

        assert_eq!(report.units, 1);
        assert_eq!(report.methods_woven, 1);
        assert_eq!(report.methods_skipped, 1);
        assert_eq!(report.failures.len(), 1);
        assert_eq!(report.failures[0].target, "com.shop.ProductService.broken");

        let woven = read(&output.path().join("com/shop/ProductService.json"));
        let original = unit();
        let methods = &woven["types"][0]["methods"];
        assert_eq!(methods[0], original["types"][0]["methods"][0]);
        assert_ne!(methods[1], original["types"][0]["methods"][1]);
        assert_eq!(methods[2], original["types"][0]["methods"][2]);
        assert_eq!(woven["language"], json!("java"));
        assert!(methods[1]["body"].to_string().contains(LOG_ENTRY));

        assert_eq!(fs::read_to_string(&source).unwrap(), before);
    }

    #[test]
    fn test_unreadable_method_fails_alone() {
        let input = tempdir().unwrap();
        let output = tempdir().unwrap();
        let looping = json!({
            "name": "b",
            "body": [{"kind": "for", "init": "int i = 0", "body": []}]
        });
        write(
            &input.path().join("Svc.json"),
            &json!({"types": [{
                "name": "Svc",
                "methods": [
                    {"name": "a", "body": [{"kind": "raw", "code": "work();"}]},
                    looping.clone()
                ]
            }]}),
        );
        let rules = RuleStore::builder()
            .rule(Rule::new("Svc.*", "biz").with_triggers([TriggerPoint::OnEntry]))
            .build();

        let report = ProjectProcessor::default()
            .process(input.path(), output.path(), Some(&rules))
            .unwrap();

        assert_eq!(report.units, 1);
        assert_eq!(report.methods_woven, 1);
        assert_eq!(report.failures.len(), 1);
        assert_eq!(report.failures[0].target, "Svc.b");
        assert!(report.failures[0].reason.contains("for"));

        let woven = read(&output.path().join("Svc.json"));
        let methods = &woven["types"][0]["methods"];
        assert!(methods[0]["body"].to_string().contains(LOG_ENTRY));
        assert_eq!(methods[1], looping);
    }

    #[test]
    fn test_other_files_are_copied_through() {
        let input = tempdir().unwrap();
        let output = tempdir().unwrap();
        fs::write(input.path().join("README.txt"), "notes").unwrap();
        fs::write(input.path().join("broken.json"), "{ not json").unwrap();
        write(
            &input.path().join("Untouched.json"),
            &json!({"types": [{"name": "Util", "methods": [{"name": "m", "body": []}]}]}),
        );
        let untouched = fs::read_to_string(input.path().join("Untouched.json")).unwrap();

        let report = ProjectProcessor::default()
            .process(input.path(), output.path(), Some(&store()))
            .unwrap();

        assert_eq!(report.copied, 2);
        assert_eq!(report.units, 1);
        assert_eq!(report.methods_skipped, 1);
        assert!(report.is_clean());
        assert_eq!(fs::read_to_string(output.path().join("README.txt")).unwrap(), "notes");
        assert_eq!(fs::read_to_string(output.path().join("broken.json")).unwrap(), "{ not json");
        assert_eq!(fs::read_to_string(output.path().join("Untouched.json")).unwrap(), untouched);
    }

    #[test]
    fn test_output_inside_input_is_rejected() {
        let input = tempdir().unwrap();
        let nested = input.path().join("out");

        let result = ProjectProcessor::default().process(input.path(), &nested, Some(&store()));

        assert!(matches!(result, Err(LogweaveError::Config(_))));
        assert!(!nested.exists());
    }

    #[test]
    fn test_parent_segments_cannot_hide_overlap() {
        let base = tempdir().unwrap();
        let input = base.path().join("in");
        write(&input.join("Svc.json"), &unit());
        let sneaky = base.path().join("other").join("..").join("in").join("out");

        let result = ProjectProcessor::default().process(&input, &sneaky, Some(&store()));

        assert!(matches!(result, Err(LogweaveError::Config(_))));
        assert!(!input.join("out").exists());
        assert!(!base.path().join("other").exists());
    }

    #[test]
    fn test_resolve_normalizes_missing_tail() {
        let base = tempdir().unwrap();
        let root = base.path().canonicalize().unwrap();

        assert_eq!(resolve(&base.path().join("a/./b/../c")).unwrap(), root.join("a/c"));
        assert_eq!(resolve(base.path()).unwrap(), root);
    }

    #[test]
    fn test_missing_input_is_an_error() {
        let output = tempdir().unwrap();
        let missing = output.path().join("nope");
        assert!(ProjectProcessor::default()
            .process(&missing, &output.path().join("out"), Some(&store()))
            .is_err());
    }
}
