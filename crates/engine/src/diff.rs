//! Structural JSON diff
//!
//! Paths are `/`-separated segments without a leading slash (`name`,
//! `address/city`, `tags/0`); the document root is the empty path.
//! Differences are reported in pre-order over the expected document's keys,
//! followed by keys only present in the actual document.

use contractprobe_common::{DiffKind, Difference};
use serde_json::Value;
use std::collections::BTreeSet;

/// Diff with no exclusions
pub fn diff(expected: &Value, actual: &Value) -> Vec<Difference> {
    DiffEngine::default().diff(expected, actual)
}

/// Structural comparator with an optional set of ignored path prefixes
#[derive(Debug, Clone, Default)]
pub struct DiffEngine {
    ignored: BTreeSet<String>,
}

impl DiffEngine {
    pub fn new<I, S>(ignored: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self {
            ignored: ignored
                .into_iter()
                .map(|p| p.as_ref().trim_matches('/').to_string())
                .filter(|p| !p.is_empty())
                .collect(),
        }
    }

    pub fn diff(&self, expected: &Value, actual: &Value) -> Vec<Difference> {
        let mut out = Vec::new();
        self.walk("", expected, actual, &mut out);
        out
    }

    fn is_ignored(&self, path: &str) -> bool {
        self.ignored.iter().any(|prefix| {
            path == prefix
                || (path.starts_with(prefix.as_str()) && path[prefix.len()..].starts_with('/'))
        })
    }

    fn walk(&self, path: &str, expected: &Value, actual: &Value, out: &mut Vec<Difference>) {
        if self.is_ignored(path) {
            return;
        }

        match (expected, actual) {
            (Value::Object(exp), Value::Object(act)) => {
                for (key, exp_value) in exp {
                    let child = join(path, key);
                    match act.get(key) {
                        Some(act_value) => self.walk(&child, exp_value, act_value, out),
                        None => self.push(out, child, Some(exp_value), None, DiffKind::Removed),
                    }
                }
                for (key, act_value) in act {
                    if !exp.contains_key(key) {
                        self.push(out, join(path, key), None, Some(act_value), DiffKind::Added);
                    }
                }
            }
            (Value::Array(exp), Value::Array(act)) => {
                for index in 0..exp.len().max(act.len()) {
                    let child = join(path, &index.to_string());
                    match (exp.get(index), act.get(index)) {
                        (Some(e), Some(a)) => self.walk(&child, e, a, out),
                        (Some(e), None) => self.push(out, child, Some(e), None, DiffKind::Removed),
                        (None, Some(a)) => self.push(out, child, None, Some(a), DiffKind::Added),
                        (None, None) => {}
                    }
                }
            }
            (e, a) if e != a => {
                self.push(out, path.to_string(), Some(e), Some(a), DiffKind::Changed);
            }
            _ => {}
        }
    }

    fn push(
        &self,
        out: &mut Vec<Difference>,
        path: String,
        expected: Option<&Value>,
        actual: Option<&Value>,
        kind: DiffKind,
    ) {
        if self.is_ignored(&path) {
            return;
        }
        out.push(Difference {
            path,
            expected: expected.cloned(),
            actual: actual.cloned(),
            kind,
        });
    }
}

fn join(parent: &str, segment: &str) -> String {
    if parent.is_empty() {
        segment.to_string()
    } else {
        format!("{}/{}", parent, segment)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sample_documents() -> Vec<Value> {
        vec![
            json!(null),
            json!(1),
            json!("foo"),
            json!([1, 2, 3]),
            json!({"id": 1, "name": "foo"}),
            json!({"id": 1, "name": "bar", "tags": ["a", "b"]}),
            json!({"id": 2, "owner": {"name": "x", "roles": [{"r": 1}]}}),
            json!({"owner": {"name": "y"}, "extra": true}),
        ]
    }

    #[test]
    fn test_identical_documents_have_no_differences() {
        for doc in sample_documents() {
            assert!(diff(&doc, &doc).is_empty(), "diff of {} with itself", doc);
        }
    }

    #[test]
    fn test_changed_scalar() {
        let diffs = diff(&json!({"id": 1, "name": "foo"}), &json!({"id": 1, "name": "bar"}));
        assert_eq!(
            diffs,
            vec![Difference {
                path: "name".to_string(),
                expected: Some(json!("foo")),
                actual: Some(json!("bar")),
                kind: DiffKind::Changed,
            }]
        );
    }

    #[test]
    fn test_added_and_removed_keys() {
        let diffs = diff(&json!({"a": 1, "b": 2}), &json!({"b": 2, "c": 3}));
        assert_eq!(diffs.len(), 2);
        assert_eq!(diffs[0].path, "a");
        assert_eq!(diffs[0].kind, DiffKind::Removed);
        assert_eq!(diffs[1].path, "c");
        assert_eq!(diffs[1].kind, DiffKind::Added);
    }

    #[test]
    fn test_nested_and_array_paths() {
        let expected = json!({"owner": {"name": "x"}, "tags": ["a", "b"]});
        let actual = json!({"owner": {"name": "y"}, "tags": ["a", "c", "d"]});
        let paths: Vec<(String, DiffKind)> = diff(&expected, &actual)
            .into_iter()
            .map(|d| (d.path, d.kind))
            .collect();
        assert_eq!(
            paths,
            vec![
                ("owner/name".to_string(), DiffKind::Changed),
                ("tags/1".to_string(), DiffKind::Changed),
                ("tags/2".to_string(), DiffKind::Added),
            ]
        );
    }

    #[test]
    fn test_type_mismatch_is_changed() {
        let diffs = diff(&json!({"a": {"b": 1}}), &json!({"a": [1]}));
        assert_eq!(diffs.len(), 1);
        assert_eq!(diffs[0].path, "a");
        assert_eq!(diffs[0].kind, DiffKind::Changed);
    }

    #[test]
    fn test_root_scalar_difference() {
        let diffs = diff(&json!(1), &json!(2));
        assert_eq!(diffs[0].path, "");
    }

    #[test]
    fn test_symmetry_up_to_relabeling() {
        let docs = sample_documents();
        for a in &docs {
            for b in &docs {
                let forward = diff(a, b);
                let mut backward = diff(b, a);
                assert_eq!(forward.len(), backward.len(), "{} vs {}", a, b);

                backward.sort_by(|x, y| x.path.cmp(&y.path));
                let mut relabeled: Vec<Difference> = forward
                    .into_iter()
                    .map(|d| Difference {
                        path: d.path,
                        expected: d.actual,
                        actual: d.expected,
                        kind: d.kind.inverse(),
                    })
                    .collect();
                relabeled.sort_by(|x, y| x.path.cmp(&y.path));
                assert_eq!(relabeled, backward, "{} vs {}", a, b);
            }
        }
    }

    #[test]
    fn test_ignored_prefixes() {
        let engine = DiffEngine::new(["updatedAt", "/meta/etag"]);
        let expected = json!({"id": 1, "updatedAt": "t1", "meta": {"etag": "x", "v": 1}, "updatedAtLocal": 1});
        let actual = json!({"id": 1, "updatedAt": "t2", "meta": {"etag": "y", "v": 1}, "updatedAtLocal": 2});
        let diffs = engine.diff(&expected, &actual);
        assert_eq!(diffs.len(), 1);
        assert_eq!(diffs[0].path, "updatedAtLocal");
    }

    #[test]
    fn test_ignored_prefix_covers_subtree() {
        let engine = DiffEngine::new(["audit"]);
        let diffs = engine.diff(
            &json!({"audit": {"by": "a", "at": 1}}),
            &json!({"audit": {"by": "b"}, "name": "n"}),
        );
        assert_eq!(diffs.len(), 1);
        assert_eq!(diffs[0].path, "name");
    }
}
