//! In-memory JSON splicing, replacing the source's `jq --argjson` pipeline.
//!
//! The path syntax mirrors the schema docs, e.g. `.iam.policies` or
//! `.network."load-balancers"`: a leading `.`, dotted segments, with
//! segments containing special characters (hyphens, spaces) wrapped in
//! double quotes. Each segment parses once into a `Vec<String>` and is
//! then walked against a `serde_json::Value` tree, creating intermediate
//! objects as needed.

use serde_json::Value;

use crate::error::{OciError, Result};

/// A parsed splice path, e.g. `.network."load-balancers"` → `["network",
/// "load-balancers"]`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JsonPointer {
    segments: Vec<String>,
}

impl JsonPointer {
    /// Parse a dotted path string into a [`JsonPointer`].
    ///
    /// Grammar: `("." (quoted | bare))+` where `quoted` is a
    /// double-quoted segment (no escape handling — segment names never
    /// contain a literal quote) and `bare` is any run of characters other
    /// than `.` or `"`.
    pub fn parse(path: &str) -> Result<Self> {
        let mut segments = Vec::new();
        let mut chars = path.chars().peekable();

        if chars.peek() != Some(&'.') {
            return Err(OciError::InvalidPointer(format!(
                "path must start with '.': {path}"
            )));
        }

        while chars.peek() == Some(&'.') {
            chars.next();
            if chars.peek() == Some(&'"') {
                chars.next();
                let mut seg = String::new();
                let mut closed = false;
                for c in chars.by_ref() {
                    if c == '"' {
                        closed = true;
                        break;
                    }
                    seg.push(c);
                }
                if !closed {
                    return Err(OciError::InvalidPointer(format!(
                        "unterminated quoted segment in: {path}"
                    )));
                }
                segments.push(seg);
            } else {
                let mut seg = String::new();
                while let Some(&c) = chars.peek() {
                    if c == '.' {
                        break;
                    }
                    seg.push(c);
                    chars.next();
                }
                if seg.is_empty() {
                    return Err(OciError::InvalidPointer(format!(
                        "empty segment in: {path}"
                    )));
                }
                segments.push(seg);
            }
        }

        if segments.is_empty() {
            return Err(OciError::InvalidPointer(format!(
                "no segments parsed from: {path}"
            )));
        }

        Ok(Self { segments })
    }

    pub fn segments(&self) -> &[String] {
        &self.segments
    }

    /// Render back to the dotted/quoted string form.
    pub fn render(&self) -> String {
        let mut out = String::new();
        for seg in &self.segments {
            out.push('.');
            if seg.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
                out.push_str(seg);
            } else {
                out.push('"');
                out.push_str(seg);
                out.push('"');
            }
        }
        out
    }

    /// Splice `value` into `root` at this pointer, creating intermediate
    /// objects as needed. Replaces whatever was previously at the
    /// pointer.
    pub fn splice(&self, root: &mut Value, value: Value) -> Result<()> {
        if !root.is_object() {
            *root = Value::Object(Default::default());
        }
        let mut cursor = root;
        for (i, seg) in self.segments.iter().enumerate() {
            let is_last = i == self.segments.len() - 1;
            let obj = cursor.as_object_mut().ok_or_else(|| OciError::SpliceFailed {
                pointer: self.render(),
                reason: format!("segment '{seg}' traverses a non-object"),
            })?;
            if is_last {
                obj.insert(seg.clone(), value);
                return Ok(());
            }
            cursor = obj
                .entry(seg.clone())
                .or_insert_with(|| Value::Object(Default::default()));
        }
        Ok(())
    }

    /// Read the value currently at this pointer, if present.
    pub fn get<'a>(&self, root: &'a Value) -> Option<&'a Value> {
        let mut cursor = root;
        for seg in &self.segments {
            cursor = cursor.as_object()?.get(seg)?;
        }
        Some(cursor)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn parses_simple_dotted_path() {
        let p = JsonPointer::parse(".iam.policies").unwrap();
        assert_eq!(p.segments(), &["iam", "policies"]);
    }

    #[test]
    fn parses_quoted_segment_with_hyphen() {
        let p = JsonPointer::parse(r#".network."load-balancers""#).unwrap();
        assert_eq!(p.segments(), &["network", "load-balancers"]);
    }

    #[test]
    fn rejects_path_without_leading_dot() {
        assert!(JsonPointer::parse("iam.policies").is_err());
    }

    #[test]
    fn render_roundtrips_quoting() {
        let p = JsonPointer::parse(r#".network."load-balancers""#).unwrap();
        assert_eq!(p.render(), r#".network."load-balancers""#);
    }

    #[test]
    fn splice_creates_intermediate_objects() {
        let mut root = json!({});
        let p = JsonPointer::parse(".iam.policies").unwrap();
        p.splice(&mut root, json!([{"id": "p1"}])).unwrap();
        assert_eq!(root["iam"]["policies"], json!([{"id": "p1"}]));
    }

    #[test]
    fn splice_replaces_existing_value() {
        let mut root = json!({"iam": {"policies": [1, 2, 3]}});
        let p = JsonPointer::parse(".iam.policies").unwrap();
        p.splice(&mut root, json!([])).unwrap();
        assert_eq!(root["iam"]["policies"], json!([]));
    }

    #[test]
    fn splice_preserves_sibling_keys() {
        let mut root = json!({"iam": {"tenancy": {"id": "t1"}, "policies": []}});
        let p = JsonPointer::parse(".iam.policies").unwrap();
        p.splice(&mut root, json!([{"id": "p1"}])).unwrap();
        assert_eq!(root["iam"]["tenancy"]["id"], json!("t1"));
        assert_eq!(root["iam"]["policies"], json!([{"id": "p1"}]));
    }

    #[test]
    fn splice_fails_when_segment_traverses_non_object() {
        let mut root = json!({"iam": "not-an-object"});
        let p = JsonPointer::parse(".iam.policies").unwrap();
        assert!(p.splice(&mut root, json!([])).is_err());
    }

    #[test]
    fn get_returns_current_value() {
        let root = json!({"network": {"load-balancers": [{"id": "lb1"}]}});
        let p = JsonPointer::parse(r#".network."load-balancers""#).unwrap();
        assert_eq!(p.get(&root), Some(&json!([{"id": "lb1"}])));
    }

    #[test]
    fn get_returns_none_for_missing_path() {
        let root = json!({"network": {}});
        let p = JsonPointer::parse(".network.vcns").unwrap();
        assert_eq!(p.get(&root), None);
    }
}
