use super::{PriorResult, ShapeContract, Validation, Violation};
use serde_json::{Map, Value, json};

const FALLBACK_ROOT: &str = "fallback";
const MAX_ID_LEN: usize = 128;
const MAX_PRIOR_NODES: usize = 5;
const PREVIEW_CHARS: usize = 200;

/// Contract for UI render specs:
///
/// ```json
/// {"root": "card", "elements": {"card": {"type": "Card", "props": {}, "children": []}}}
/// ```
///
/// `root` must be an identifier (`[A-Za-z0-9_-]+`), `elements` a non-empty
/// map containing `root`, and `elements[root]` a node: an object with a
/// non-empty string `type`, an optional object `props` and an optional array
/// of string `children`.
#[derive(Debug, Clone, Copy, Default)]
pub struct RenderSpecContract;

impl ShapeContract for RenderSpecContract {
    fn name(&self) -> &str {
        "render_spec"
    }

    fn validate(&self, output: &Value) -> Validation {
        let Some(spec) = output.as_object() else {
            return Validation::Invalid(vec![Violation::new(
                "object",
                format!("render spec must be a JSON object, got {}", kind_of(output)),
            )]);
        };

        let mut violations = Vec::new();

        let root = match spec.get("root") {
            Some(Value::String(r)) if is_identifier(r) => Some(r.as_str()),
            Some(Value::String(r)) if r.is_empty() => {
                violations.push(Violation::new("root_identifier", "root is empty"));
                None
            }
            Some(Value::String(r)) => {
                violations.push(Violation::new(
                    "root_identifier",
                    format!("root '{}' is not an identifier", preview(r)),
                ));
                None
            }
            Some(other) => {
                violations.push(Violation::new(
                    "root_identifier",
                    format!("root must be a string, got {}", kind_of(other)),
                ));
                None
            }
            None => {
                violations.push(Violation::new("root_identifier", "root is missing"));
                None
            }
        };

        let elements = match spec.get("elements") {
            Some(Value::Object(map)) if map.is_empty() => {
                violations.push(Violation::new("elements_non_empty", "elements is empty"));
                None
            }
            Some(Value::Object(map)) => Some(map),
            Some(other) => {
                violations.push(Violation::new(
                    "elements_map",
                    format!("elements must be a map of id to node, got {}", kind_of(other)),
                ));
                None
            }
            None => {
                violations.push(Violation::new("elements_map", "elements is missing"));
                None
            }
        };

        if let (Some(root), Some(elements)) = (root, elements) {
            match elements.get(root) {
                None => violations.push(Violation::new(
                    "root_in_elements",
                    format!("root '{root}' is not a key of elements"),
                )),
                Some(node) => {
                    for problem in node_problems(node) {
                        violations.push(Violation::new(
                            "root_node_shape",
                            format!("elements['{root}'] {problem}"),
                        ));
                    }
                }
            }
        }

        Validation::from_violations(violations)
    }

    fn fallback(&self, rejected: &Value, prior: &[PriorResult]) -> Value {
        let requested = rejected
            .get("root")
            .and_then(Value::as_str)
            .filter(|r| is_identifier(r))
            .unwrap_or(FALLBACK_ROOT);
        fallback_render_spec(requested, prior)
    }
}

/// A valid render spec: one warning node with id `root`, plus a text child
/// per earlier result (at most five).
pub fn fallback_render_spec(root: &str, prior: &[PriorResult]) -> Value {
    let root = if is_identifier(root) { root } else { FALLBACK_ROOT };
    let mut elements = Map::new();
    let mut children = Vec::new();

    for (i, result) in prior
        .iter()
        .filter(|r| r.tool != "render_view")
        .take(MAX_PRIOR_NODES)
        .enumerate()
    {
        let id = format!("{root}-prior-{i}");
        elements.insert(
            id.clone(),
            json!({
                "type": "Text",
                "props": {"text": summarize(&result.payload), "source": result.tool},
                "children": [],
            }),
        );
        children.push(Value::String(id));
    }

    elements.insert(
        root.to_string(),
        json!({
            "type": "Alert",
            "props": {
                "variant": "warning",
                "title": "This view could not be displayed",
                "message": "The generated layout was invalid and has been replaced.",
            },
            "children": children,
        }),
    );

    json!({"root": root, "elements": elements})
}

fn is_identifier(s: &str) -> bool {
    !s.is_empty()
        && s.len() <= MAX_ID_LEN
        && s
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
}

fn node_problems(node: &Value) -> Vec<String> {
    let Some(node) = node.as_object() else {
        return vec![format!("must be a node object, got {}", kind_of(node))];
    };
    let mut problems = Vec::new();
    match node.get("type") {
        Some(Value::String(t)) if !t.is_empty() => {}
        _ => problems.push("needs a non-empty string 'type'".to_string()),
    }
    match node.get("props") {
        None | Some(Value::Object(_)) => {}
        Some(other) => problems.push(format!("'props' must be an object, got {}", kind_of(other))),
    }
    match node.get("children") {
        None => {}
        Some(Value::Array(items)) if items.iter().all(Value::is_string) => {}
        Some(_) => problems.push("'children' must be an array of element ids".to_string()),
    }
    problems
}

fn kind_of(v: &Value) -> &'static str {
    match v {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

fn preview(s: &str) -> String {
    let mut out: String = s.chars().take(40).collect();
    if s.chars().count() > 40 {
        out.push_str("...");
    }
    out
}

/// One-line description of an earlier tool payload.
fn summarize(payload: &Value) -> String {
    if let Some(s) = payload.get("summary").and_then(Value::as_str) {
        return truncate(s);
    }
    if let Some(items) = payload.get("items").and_then(Value::as_array) {
        return format!("{} item(s)", items.len());
    }
    if let Some(title) = payload.get("title").and_then(Value::as_str) {
        return truncate(title);
    }
    truncate(&payload.to_string())
}

fn truncate(s: &str) -> String {
    let mut out: String = s.chars().take(PREVIEW_CHARS).collect();
    if s.chars().count() > PREVIEW_CHARS {
        out.push_str("...");
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn invariants(v: &Validation) -> Vec<&'static str> {
        match v {
            Validation::Valid => vec![],
            Validation::Invalid(vs) => vs.iter().map(|v| v.invariant).collect(),
        }
    }

    #[test]
    fn well_formed_spec_is_valid() {
        let spec = json!({
            "root": "card",
            "elements": {
                "card": {"type": "Card", "props": {"title": "Hi"}, "children": ["t"]},
                "t": {"type": "Text", "props": {"text": "body"}}
            }
        });
        assert!(RenderSpecContract.validate(&spec).is_valid());
    }

    #[test]
    fn empty_elements_is_named() {
        let v = RenderSpecContract.validate(&json!({"root": "x", "elements": {}}));
        assert_eq!(invariants(&v), ["elements_non_empty"]);
    }

    #[test]
    fn missing_root_key_is_named() {
        let v = RenderSpecContract.validate(&json!({
            "root": "x",
            "elements": {"y": {"type": "Text"}}
        }));
        assert_eq!(invariants(&v), ["root_in_elements"]);
    }

    #[test]
    fn malformed_root_node_is_named() {
        for node in [json!(null), json!([]), json!({"props": {}}), json!({"type": "A", "children": [1]})] {
            let v = RenderSpecContract.validate(&json!({"root": "x", "elements": {"x": node}}));
            assert_eq!(invariants(&v), ["root_node_shape"], "node: {node}");
        }
    }

    #[test]
    fn bad_root_and_elements_are_both_reported() {
        let v = RenderSpecContract.validate(&json!({"root": "has space", "elements": []}));
        assert_eq!(invariants(&v), ["root_identifier", "elements_map"]);
        let v = RenderSpecContract.validate(&json!("just text"));
        assert_eq!(invariants(&v), ["object"]);
    }

    #[test]
    fn fallback_keeps_requested_root_and_is_valid() {
        let fallback = RenderSpecContract.fallback(&json!({"root": "x", "elements": {}}), &[]);
        assert_eq!(fallback["root"], "x");
        assert!(fallback["elements"].get("x").is_some());
        assert!(RenderSpecContract.validate(&fallback).is_valid());
    }

    #[test]
    fn fallback_uses_default_root_for_bad_ids() {
        let fallback = RenderSpecContract.fallback(&json!({"root": "a b"}), &[]);
        assert_eq!(fallback["root"], FALLBACK_ROOT);
        assert!(RenderSpecContract.validate(&fallback).is_valid());
    }

    #[test]
    fn fallback_includes_prior_results() {
        let prior = vec![
            PriorResult {
                tool: "list_tasks".into(),
                payload: json!({"items": [1, 2, 3]}),
            },
            PriorResult {
                tool: "generate_summary".into(),
                payload: json!({"summary": "Quarterly numbers are up."}),
            },
        ];
        let fallback = fallback_render_spec("view", &prior);
        let children = fallback["elements"]["view"]["children"].as_array().unwrap();
        assert_eq!(children.len(), 2);
        assert_eq!(fallback["elements"]["view-prior-0"]["props"]["text"], "3 item(s)");
        assert_eq!(
            fallback["elements"]["view-prior-1"]["props"]["text"],
            "Quarterly numbers are up."
        );
        assert!(RenderSpecContract.validate(&fallback).is_valid());
    }
}
