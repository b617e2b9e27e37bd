//! Playbook execution context: accumulated step outputs and lookup paths.
//!
//! `ExecutionContext` is the shared state of one run. It is read by every
//! step of a round and only written between rounds, when the round's
//! declared outputs are merged in.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};
use uuid::Uuid;

// ---------------------------------------------------------------------------
// ExecutionContext
// ---------------------------------------------------------------------------

/// Shared state of one playbook run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionContext {
    pub playbook_name: String,
    pub run_id: Uuid,
    /// Plan inputs (`input.*`).
    pub inputs: Map<String, Value>,
    /// Workflow context (`context.*`, `$context.*`).
    pub variables: Map<String, Value>,
    /// Outputs of upstream playbooks keyed by producer ID.
    pub upstream: HashMap<String, Map<String, Value>>,
    /// Declared outputs of completed steps keyed by step ID.
    pub step_outputs: HashMap<String, Map<String, Value>>,
}

impl ExecutionContext {
    pub fn new(
        playbook_name: impl Into<String>,
        run_id: Uuid,
        inputs: Map<String, Value>,
        variables: Map<String, Value>,
        upstream: HashMap<String, Map<String, Value>>,
    ) -> Self {
        Self {
            playbook_name: playbook_name.into(),
            run_id,
            inputs,
            variables,
            upstream,
            step_outputs: HashMap::new(),
        }
    }

    /// Store the declared outputs of a completed step, unmodified.
    pub fn set_step_outputs(&mut self, step_id: &str, outputs: Map<String, Value>) {
        self.step_outputs.insert(step_id.to_string(), outputs);
    }

    pub fn get_step_outputs(&self, step_id: &str) -> Option<&Map<String, Value>> {
        self.step_outputs.get(step_id)
    }

    /// Outputs of a producer: plan steps first, then upstream playbooks.
    pub fn producer_outputs(&self, producer_id: &str) -> Option<&Map<String, Value>> {
        self.step_outputs
            .get(producer_id)
            .or_else(|| self.upstream.get(producer_id))
    }
}

// ---------------------------------------------------------------------------
// Lookup scope
// ---------------------------------------------------------------------------

/// What a template or condition is resolved against: the run context plus
/// the loop element when inside a `for_each` body.
#[derive(Debug, Clone, Copy)]
pub struct Scope<'a> {
    pub ctx: &'a ExecutionContext,
    pub item: Option<&'a Value>,
    pub index: Option<usize>,
}

impl<'a> Scope<'a> {
    pub fn new(ctx: &'a ExecutionContext) -> Self {
        Self {
            ctx,
            item: None,
            index: None,
        }
    }

    pub fn with_item(ctx: &'a ExecutionContext, item: &'a Value, index: usize) -> Self {
        Self {
            ctx,
            item: Some(item),
            index: Some(index),
        }
    }

    /// Resolve a dotted path against the namespaces. `None` when the
    /// namespace, producer or field does not exist.
    pub fn lookup(&self, path: &str) -> Option<Value> {
        let segments = parse_path(path)?;
        let (head, rest) = segments.split_first()?;
        let PathSegment::Key(namespace) = head else {
            return None;
        };

        match namespace.as_str() {
            "input" | "inputs" => walk_map(&self.ctx.inputs, rest),
            "context" => walk_map(&self.ctx.variables, rest),
            "step" | "steps" => {
                let (id, rest) = split_key(rest)?;
                let outputs = self.ctx.get_step_outputs(id)?;
                walk_map(outputs, strip_output_segment(outputs, rest))
            }
            "previous" => {
                let (id, rest) = split_key(rest)?;
                let (marker, rest) = split_key(rest)?;
                if marker != "outputs" {
                    return None;
                }
                walk_map(self.ctx.producer_outputs(id)?, rest)
            }
            "item" => walk(self.item?, rest),
            "index" if rest.is_empty() => self.index.map(|i| json!(i)),
            _ => None,
        }
    }
}

// ---------------------------------------------------------------------------
// Paths
// ---------------------------------------------------------------------------

/// One segment of a lookup path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PathSegment {
    Key(String),
    Index(usize),
}

/// Split `a.b[0].c` into segments. `None` for an empty or malformed path.
pub fn parse_path(path: &str) -> Option<Vec<PathSegment>> {
    let path = path.trim();
    if path.is_empty() {
        return None;
    }

    let mut segments = Vec::new();
    for part in path.split('.') {
        let (key, mut brackets) = match part.find('[') {
            Some(pos) => (&part[..pos], &part[pos..]),
            None => (part, ""),
        };
        if key.is_empty() && segments.is_empty() {
            return None;
        }
        if !key.is_empty() {
            segments.push(PathSegment::Key(key.to_string()));
        } else if brackets.is_empty() {
            return None;
        }
        while !brackets.is_empty() {
            let close = brackets.find(']')?;
            let index = brackets[1..close].trim().parse().ok()?;
            segments.push(PathSegment::Index(index));
            brackets = &brackets[close + 1..];
            if !brackets.is_empty() && !brackets.starts_with('[') {
                return None;
            }
        }
    }
    Some(segments)
}

fn split_key(segments: &[PathSegment]) -> Option<(&str, &[PathSegment])> {
    match segments.split_first()? {
        (PathSegment::Key(k), rest) => Some((k.as_str(), rest)),
        (PathSegment::Index(_), _) => None,
    }
}

/// `step.<id>.output.x` and `step.<id>.outputs.x` address `x` directly,
/// unless the step really declared an output with that name.
fn strip_output_segment<'s>(
    outputs: &Map<String, Value>,
    rest: &'s [PathSegment],
) -> &'s [PathSegment] {
    match rest.first() {
        Some(PathSegment::Key(k)) if (k == "output" || k == "outputs") && !outputs.contains_key(k) => {
            &rest[1..]
        }
        _ => rest,
    }
}

fn walk_map(map: &Map<String, Value>, rest: &[PathSegment]) -> Option<Value> {
    match rest.split_first() {
        None => Some(Value::Object(map.clone())),
        Some((PathSegment::Key(k), rest)) => walk(map.get(k)?, rest),
        Some((PathSegment::Index(_), _)) => None,
    }
}

fn walk(value: &Value, rest: &[PathSegment]) -> Option<Value> {
    let mut current = value;
    for segment in rest {
        current = match (segment, current) {
            (PathSegment::Key(k), Value::Object(map)) => map.get(k)?,
            (PathSegment::Key(k), Value::Array(items)) => items.get(k.parse::<usize>().ok()?)?,
            (PathSegment::Index(i), Value::Array(items)) => items.get(*i)?,
            _ => return None,
        };
    }
    Some(current.clone())
}

/// Convert a JSON value to its display form inside a larger string.
pub fn value_to_string(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => "null".to_string(),
        Value::Bool(b) => b.to_string(),
        Value::Number(n) => n.to_string(),
        _ => serde_json::to_string(value).unwrap_or_default(),
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn obj(value: Value) -> Map<String, Value> {
        value.as_object().cloned().unwrap()
    }

    fn test_context() -> ExecutionContext {
        let mut upstream = HashMap::new();
        upstream.insert("research".to_string(), obj(json!({ "summary": "upstream text" })));
        let mut ctx = ExecutionContext::new(
            "triage",
            Uuid::now_v7(),
            obj(json!({ "repo": "acme/api", "labels": ["bug", "p1"] })),
            obj(json!({ "tenant": "acme" })),
            upstream,
        );
        ctx.set_step_outputs("fetch", obj(json!({ "issues": [{ "number": 7 }], "count": 1 })));
        ctx
    }

    #[test]
    fn parse_path_segments() {
        assert_eq!(
            parse_path("step.fetch.issues[0].number").unwrap(),
            vec![
                PathSegment::Key("step".into()),
                PathSegment::Key("fetch".into()),
                PathSegment::Key("issues".into()),
                PathSegment::Index(0),
                PathSegment::Key("number".into()),
            ]
        );
        assert!(parse_path("").is_none());
        assert!(parse_path("a[x]").is_none());
        assert!(parse_path("a[0]b").is_none());
    }

    #[test]
    fn lookup_namespaces() {
        let ctx = test_context();
        let scope = Scope::new(&ctx);
        assert_eq!(scope.lookup("input.repo"), Some(json!("acme/api")));
        assert_eq!(scope.lookup("inputs.labels[1]"), Some(json!("p1")));
        assert_eq!(scope.lookup("context.tenant"), Some(json!("acme")));
        assert_eq!(scope.lookup("step.fetch.count"), Some(json!(1)));
        assert_eq!(scope.lookup("steps.fetch.output.issues[0].number"), Some(json!(7)));
        assert_eq!(scope.lookup("previous.fetch.outputs.count"), Some(json!(1)));
        assert_eq!(scope.lookup("previous.research.outputs.summary"), Some(json!("upstream text")));
        assert_eq!(scope.lookup("step.missing.count"), None);
        assert_eq!(scope.lookup("previous.fetch.count"), None);
        assert_eq!(scope.lookup("item"), None);
    }

    #[test]
    fn lookup_loop_bindings() {
        let ctx = test_context();
        let item = json!({ "number": 42 });
        let scope = Scope::with_item(&ctx, &item, 3);
        assert_eq!(scope.lookup("item.number"), Some(json!(42)));
        assert_eq!(scope.lookup("index"), Some(json!(3)));
    }

    #[test]
    fn large_outputs_are_stored_whole() {
        let mut ctx = test_context();
        let big = "x".repeat(2 * 1024 * 1024);
        ctx.set_step_outputs("big", obj(json!({ "blob": big, "count": 3 })));

        let scope = Scope::new(&ctx);
        assert_eq!(scope.lookup("step.big.count"), Some(json!(3)));
        assert_eq!(
            scope.lookup("step.big.blob").and_then(|v| v.as_str().map(str::len)),
            Some(2 * 1024 * 1024)
        );
    }

    #[test]
    fn display_strings() {
        assert_eq!(value_to_string(&json!("a")), "a");
        assert_eq!(value_to_string(&json!(null)), "null");
        assert_eq!(value_to_string(&json!({ "a": [1, 2] })), r#"{"a":[1,2]}"#);
    }
}
