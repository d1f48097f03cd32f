//! `functiondb`: a function-signature database per version.

use crate::Result;
use crate::metrics::{MetricPayload, RevisionView, SnapshotMetric};
use ohno::IntoAppError;
use ra_ap_syntax::{AstNode, Edition, SourceFile, ast, ast::HasName};
use serde_json::json;
use std::fs;
use std::path::Path;
use walkdir::WalkDir;

/// Log target for the function database metric
const LOG_TARGET: &str = "functiondb";

/// Records every function's name, parameters, and return type for each Rust
/// source file in the revision.
///
/// An unreadable or unparsable file becomes an inline per-file error entry;
/// it never aborts the revision.
#[derive(Debug)]
pub struct FunctionDb;

impl SnapshotMetric for FunctionDb {
    fn compute(&self, revision: &RevisionView<'_>) -> Result<MetricPayload> {
        let mut lookup = serde_json::Map::new();

        let walker = WalkDir::new(revision.path)
            .sort_by_file_name()
            .into_iter()
            .filter_entry(|e| e.file_name() != ".git");
        for entry in walker {
            let entry = entry.into_app_err("Failed to walk working tree")?;
            if !entry.file_type().is_file() || entry.path().extension().is_none_or(|ext| ext != "rs") {
                continue;
            }

            let relative = entry
                .path()
                .strip_prefix(revision.path)
                .unwrap_or(entry.path())
                .display()
                .to_string();

            let record = match fs::read_to_string(entry.path()) {
                Ok(text) => file_record(&text),
                Err(e) => {
                    log::debug!(target: LOG_TARGET, "Skipping unreadable '{relative}': {e}");
                    json!({ "error": e.to_string() })
                }
            };

            let _ = lookup.insert(relative, record);
        }

        Ok(serde_json::Value::Object(lookup))
    }
}

/// Parse one source file into its function-signature record.
fn file_record(text: &str) -> MetricPayload {
    let parse = SourceFile::parse(text, Edition::CURRENT);

    let mut functions = serde_json::Map::new();
    for node in parse.tree().syntax().descendants() {
        let Some(function) = ast::Fn::cast(node) else {
            continue;
        };
        let Some(name) = function.name() else {
            continue;
        };

        let _ = functions.insert(name.text().to_string(), signature(&function));
    }

    let mut record = serde_json::Map::new();
    let _ = record.insert("functions".to_string(), serde_json::Value::Object(functions));

    let errors: Vec<_> = parse.errors().iter().map(|e| json!(e.to_string())).collect();
    if !errors.is_empty() {
        let _ = record.insert("errors".to_string(), json!(errors));
    }

    serde_json::Value::Object(record)
}

fn signature(function: &ast::Fn) -> MetricPayload {
    let mut params = Vec::new();
    if let Some(list) = function.param_list() {
        if let Some(self_param) = list.self_param() {
            params.push(json!(normalize(&self_param.syntax().text().to_string())));
        }
        for param in list.params() {
            params.push(json!(normalize(&param.syntax().text().to_string())));
        }
    }

    let ret = function
        .ret_type()
        .and_then(|r| r.ty())
        .map(|ty| normalize(&ty.syntax().text().to_string()));

    json!({ "params": params, "ret": ret })
}

/// Collapse whitespace runs so multi-line signatures serialize on one line.
fn normalize(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repo::GitRepository;

    fn compute_for(dir: &Path, files: &[(&str, &str)]) -> MetricPayload {
        let repo = GitRepository::init_or_open(dir).unwrap();
        for (name, content) in files {
            let path = repo.workdir().join(name);
            if let Some(parent) = path.parent() {
                fs::create_dir_all(parent).unwrap();
            }
            fs::write(path, content).unwrap();
        }
        repo.commit_snapshot("0.0.1").unwrap();

        let checkout = repo.checkout("0.0.1").unwrap();
        let view = RevisionView {
            tag: "0.0.1",
            path: checkout.path(),
            commit: checkout.info(),
        };
        FunctionDb.compute(&view).unwrap()
    }

    #[test]
    fn records_function_signatures() {
        let dir = tempfile::tempdir().unwrap();
        let payload = compute_for(
            dir.path(),
            &[(
                "src/lib.rs",
                "pub fn add(left: u64, right: u64) -> u64 { left + right }\nfn no_args() {}\n",
            )],
        );

        let record = &payload["src/lib.rs"]["functions"];
        assert_eq!(record["add"]["params"], json!(["left: u64", "right: u64"]));
        assert_eq!(record["add"]["ret"], json!("u64"));
        assert_eq!(record["no_args"]["params"], json!([]));
        assert_eq!(record["no_args"]["ret"], json!(null));
    }

    #[test]
    fn parse_errors_become_inline_entries() {
        let dir = tempfile::tempdir().unwrap();
        let payload = compute_for(dir.path(), &[("bad.rs", "fn broken( {")]);

        assert!(payload["bad.rs"].get("errors").is_some());
    }

    #[test]
    fn non_rust_files_are_ignored() {
        let dir = tempfile::tempdir().unwrap();
        let payload = compute_for(dir.path(), &[("README.md", "# hi\n"), ("src/lib.rs", "fn f() {}\n")]);

        assert!(payload.get("README.md").is_none());
        assert!(payload.get("src/lib.rs").is_some());
    }

    #[test]
    fn self_param_is_recorded() {
        let dir = tempfile::tempdir().unwrap();
        let payload = compute_for(
            dir.path(),
            &[("src/lib.rs", "struct S;\nimpl S {\n    fn get(&self, key: &str) -> bool { true }\n}\n")],
        );

        let record = &payload["src/lib.rs"]["functions"];
        assert_eq!(record["get"]["params"], json!(["&self", "key: &str"]));
    }
}
