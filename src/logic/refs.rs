use std::collections::BTreeMap;
use std::sync::OnceLock;

use regex::Regex;

use crate::model::ParamMap;

/// Values a `$...` reference can resolve against: the validated request
/// parameters plus the named outputs produced earlier in the same request
/// (pipeline step outputs, multi-query results, or the mapper's `result`
/// bindings).
pub struct RefContext<'a> {
    pub params: &'a ParamMap,
    pub steps: &'a BTreeMap<String, serde_json::Value>,
}

/// Reference grammar: `$params.<name>` reaches the request parameters;
/// `$<name>` reaches a named output. Either head may be followed by
/// `.field` / `[index]` path segments, e.g. `$users[0].cmpny_id`.
const REF_PATTERN: &str = r"\$([A-Za-z_][A-Za-z0-9_]*)((?:\.[A-Za-z0-9_]+|\[[0-9]+\])*)";

fn ref_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(REF_PATTERN).expect("reference pattern compiles"))
}

fn exact_ref_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(&format!("^{}$", REF_PATTERN)).expect("reference pattern compiles")
    })
}

impl<'a> RefContext<'a> {
    pub fn new(params: &'a ParamMap, steps: &'a BTreeMap<String, serde_json::Value>) -> Self {
        Self { params, steps }
    }

    /// Resolve one parsed reference. Returns None when the head or any path
    /// segment is absent.
    fn lookup(&self, head: &str, path: &str) -> Option<serde_json::Value> {
        let mut segments = parse_path(path);
        let root = if head == "params" {
            // The parameter name is the first path segment: $params.name[...]
            let name = match segments.first() {
                Some(Segment::Field(name)) => name.clone(),
                _ => return None,
            };
            segments.remove(0);
            self.params.get(&name)?.to_json()
        } else {
            self.steps.get(head)?.clone()
        };

        let mut current = root;
        for segment in segments {
            current = match segment {
                Segment::Field(name) => current.get(&name)?.clone(),
                Segment::Index(index) => current.get(index)?.clone(),
            };
        }
        Some(current)
    }
}

enum Segment {
    Field(String),
    Index(usize),
}

fn parse_path(path: &str) -> Vec<Segment> {
    let mut segments = Vec::new();
    let mut rest = path;
    while !rest.is_empty() {
        if let Some(stripped) = rest.strip_prefix('.') {
            let end = stripped
                .find(|c: char| c == '.' || c == '[')
                .unwrap_or(stripped.len());
            segments.push(Segment::Field(stripped[..end].to_string()));
            rest = &stripped[end..];
        } else if let Some(stripped) = rest.strip_prefix('[') {
            let end = stripped.find(']').unwrap_or(stripped.len());
            if let Ok(index) = stripped[..end].parse::<usize>() {
                segments.push(Segment::Index(index));
            }
            rest = stripped.get(end + 1..).unwrap_or("");
        } else {
            break;
        }
    }
    segments
}

/// Resolve a template value. Strings that are exactly one reference become the
/// referenced value (keeping its type); strings containing embedded references
/// get textual substitution; arrays and objects recurse. Unresolvable
/// references are left verbatim.
pub fn resolve_template(ctx: &RefContext<'_>, template: &serde_json::Value) -> serde_json::Value {
    match template {
        serde_json::Value::String(text) => {
            if let Some(captures) = exact_ref_regex().captures(text) {
                let head = captures.get(1).map(|m| m.as_str()).unwrap_or_default();
                let path = captures.get(2).map(|m| m.as_str()).unwrap_or_default();
                if let Some(value) = ctx.lookup(head, path) {
                    return value;
                }
                return template.clone();
            }
            serde_json::Value::String(substitute_inline(ctx, text))
        }
        serde_json::Value::Array(items) => serde_json::Value::Array(
            items.iter().map(|item| resolve_template(ctx, item)).collect(),
        ),
        serde_json::Value::Object(map) => serde_json::Value::Object(
            map.iter()
                .map(|(key, value)| (key.clone(), resolve_template(ctx, value)))
                .collect(),
        ),
        other => other.clone(),
    }
}

/// Textual substitution for URL, header and string templates. Scalars insert
/// their plain text; arrays and objects insert compact JSON. Unknown
/// references stay in place.
pub fn substitute_inline(ctx: &RefContext<'_>, text: &str) -> String {
    ref_regex()
        .replace_all(text, |captures: &regex::Captures<'_>| {
            let head = captures.get(1).map(|m| m.as_str()).unwrap_or_default();
            let path = captures.get(2).map(|m| m.as_str()).unwrap_or_default();
            match ctx.lookup(head, path) {
                Some(serde_json::Value::String(s)) => s,
                Some(serde_json::Value::Null) => "null".to_string(),
                Some(other) => other.to_string(),
                None => captures.get(0).map(|m| m.as_str().to_string()).unwrap_or_default(),
            }
        })
        .into_owned()
}

/// Resolve one explicit binding value (a MULTI_QUERY `params` entry): a `$...`
/// string must resolve or the definition is in error; anything else is a
/// literal.
pub fn resolve_binding(
    ctx: &RefContext<'_>,
    value: &serde_json::Value,
) -> Result<serde_json::Value, String> {
    if let serde_json::Value::String(text) = value {
        if let Some(captures) = exact_ref_regex().captures(text) {
            let head = captures.get(1).map(|m| m.as_str()).unwrap_or_default();
            let path = captures.get(2).map(|m| m.as_str()).unwrap_or_default();
            return ctx
                .lookup(head, path)
                .ok_or_else(|| format!("unresolved reference: {}", text));
        }
    }
    Ok(value.clone())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::ParamValue;
    use serde_json::json;

    fn params() -> ParamMap {
        let mut map = ParamMap::new();
        map.insert("name".to_string(), ParamValue::Str("World".to_string()));
        map.insert("limit".to_string(), ParamValue::Int(5));
        map
    }

    fn steps() -> BTreeMap<String, serde_json::Value> {
        let mut map = BTreeMap::new();
        map.insert(
            "users".to_string(),
            json!([{"user_id": 1, "cmpny_id": 42}, {"user_id": 2, "cmpny_id": 43}]),
        );
        map
    }

    #[test]
    fn exact_reference_keeps_value_type() {
        let params = params();
        let steps = steps();
        let ctx = RefContext::new(&params, &steps);
        assert_eq!(resolve_template(&ctx, &json!("$params.limit")), json!(5));
        assert_eq!(
            resolve_template(&ctx, &json!("$users[0].cmpny_id")),
            json!(42)
        );
    }

    #[test]
    fn inline_substitution_into_text() {
        let params = params();
        let steps = steps();
        let ctx = RefContext::new(&params, &steps);
        assert_eq!(
            resolve_template(&ctx, &json!({"message": "Hello, $params.name"})),
            json!({"message": "Hello, World"})
        );
    }

    #[test]
    fn unresolved_references_stay_verbatim() {
        let params = params();
        let steps = steps();
        let ctx = RefContext::new(&params, &steps);
        assert_eq!(
            resolve_template(&ctx, &json!("Hello, $params.missing")),
            json!("Hello, $params.missing")
        );
    }

    #[test]
    fn binding_resolution_fails_on_missing_reference() {
        let params = params();
        let steps = steps();
        let ctx = RefContext::new(&params, &steps);
        assert_eq!(
            resolve_binding(&ctx, &json!("$users[1].cmpny_id")).unwrap(),
            json!(43)
        );
        assert!(resolve_binding(&ctx, &json!("$orders[0].id")).is_err());
        assert_eq!(resolve_binding(&ctx, &json!(7)).unwrap(), json!(7));
    }

    #[test]
    fn nested_template_resolution() {
        let params = params();
        let steps = steps();
        let ctx = RefContext::new(&params, &steps);
        let template = json!({
            "first_user": "$users[0]",
            "greeting": ["Hi $params.name", {"limit": "$params.limit"}]
        });
        assert_eq!(
            resolve_template(&ctx, &template),
            json!({
                "first_user": {"user_id": 1, "cmpny_id": 42},
                "greeting": ["Hi World", {"limit": 5}]
            })
        );
    }
}
