//! Dependency graph construction, cycle detection and wave preview.
//!
//! Dependencies are inferred from what a step reads: `previous.<id>.outputs`
//! references anywhere in its inputs or input mapping, `step.<id>` references
//! inside `{{ }}` templates and conditions, a `step.<id>` `for_each` root, and
//! explicit `depends_on` entries. Producers that are not plan steps are
//! external and must be supplied as upstream outputs when the run starts.

use std::collections::{BTreeSet, HashMap};

use playbook_types::playbook::StepDefinition;
use petgraph::algo::toposort;
use petgraph::graph::DiGraph;
use serde_json::Value;

use super::definition::PlaybookError;
use super::expression::Condition;
use super::loop_handler::ForEachSource;

// ---------------------------------------------------------------------------
// Reference extraction
// ---------------------------------------------------------------------------

/// Every producer ID a step reads from, plan-internal or not.
pub fn step_references(step: &StepDefinition) -> BTreeSet<String> {
    let mut refs = BTreeSet::new();

    for value in step.inputs.values() {
        scan_value(value, &mut refs);
    }
    for expression in step.input_mapping.values() {
        scan_string(expression, &mut refs);
    }
    if let Some(ForEachSource::Step { step_id, .. }) =
        step.for_each.as_deref().and_then(ForEachSource::parse)
    {
        refs.insert(step_id);
    }
    if let Some(condition) = step.condition.as_deref().and_then(|c| Condition::parse(c).ok()) {
        for path in condition.paths() {
            if let Some(id) = producer_of(path, true) {
                refs.insert(id.to_string());
            }
        }
    }
    refs.extend(step.depends_on.iter().cloned());
    refs
}

fn scan_value(value: &Value, refs: &mut BTreeSet<String>) {
    match value {
        Value::String(s) => scan_string(s, refs),
        Value::Array(items) => items.iter().for_each(|v| scan_value(v, refs)),
        Value::Object(map) => map.values().for_each(|v| scan_value(v, refs)),
        _ => {}
    }
}

/// `previous.<id>.outputs` counts anywhere; `step.<id>` only inside `{{ }}`.
fn scan_string(s: &str, refs: &mut BTreeSet<String>) {
    for word in words(s) {
        if let Some(id) = producer_of(word, false) {
            refs.insert(id.to_string());
        }
    }

    let mut rest = s;
    while let Some(start) = rest.find("{{") {
        let Some(len) = rest[start + 2..].find("}}") else {
            break;
        };
        let inner = &rest[start + 2..start + 2 + len];
        for word in words(inner) {
            if let Some(id) = producer_of(word, true) {
                refs.insert(id.to_string());
            }
        }
        rest = &rest[start + 2 + len + 2..];
    }
}

fn words(s: &str) -> impl Iterator<Item = &str> {
    s.split(|c: char| !(c.is_alphanumeric() || matches!(c, '_' | '-' | '.' | '[' | ']' | '$')))
        .filter(|w| !w.is_empty())
}

/// The producer a path points at: `previous.<id>.outputs...` always,
/// `step.<id>...` / `steps.<id>...` when `allow_step` is set.
fn producer_of(path: &str, allow_step: bool) -> Option<&str> {
    let path = path.strip_prefix('$').unwrap_or(path);
    let mut parts = path.split('.');
    let namespace = parts.next()?;
    let id = parts.next().map(|p| p.split('[').next().unwrap_or(p))?;
    if id.is_empty() {
        return None;
    }
    match namespace {
        "previous" if parts.next() == Some("outputs") => Some(id),
        "step" | "steps" if allow_step => Some(id),
        _ => None,
    }
}

// ---------------------------------------------------------------------------
// Dependency graph
// ---------------------------------------------------------------------------

/// Plan-internal dependency edges plus the external producers referenced.
#[derive(Debug, Clone, Default)]
pub struct DependencyGraph {
    deps: HashMap<String, BTreeSet<String>>,
    external: Vec<(String, String)>,
}

impl DependencyGraph {
    /// Scan every step and split references into internal edges and
    /// external producers.
    pub fn build(steps: &[StepDefinition]) -> Self {
        let ids: BTreeSet<&str> = steps.iter().map(|s| s.id.as_str()).collect();
        let mut graph = Self::default();

        for step in steps {
            let mut internal = BTreeSet::new();
            for producer in step_references(step) {
                if ids.contains(producer.as_str()) {
                    internal.insert(producer);
                } else {
                    graph.external.push((step.id.clone(), producer));
                }
            }
            graph.deps.insert(step.id.clone(), internal);
        }
        graph
    }

    /// Plan steps that must settle before `step_id` may run.
    pub fn dependencies_of(&self, step_id: &str) -> impl Iterator<Item = &str> {
        self.deps
            .get(step_id)
            .into_iter()
            .flat_map(|deps| deps.iter().map(String::as_str))
    }

    /// `(step_id, producer_id)` pairs naming producers outside the plan.
    pub fn external(&self) -> &[(String, String)] {
        &self.external
    }

    /// Fail on the first external producer `is_known` does not recognise.
    pub fn check_external(&self, is_known: impl Fn(&str) -> bool) -> Result<(), PlaybookError> {
        match self.external.iter().find(|(_, producer)| !is_known(producer)) {
            Some((step_id, producer)) => Err(PlaybookError::UnknownDependency(format!(
                "step '{step_id}' references unknown producer '{producer}'"
            ))),
            None => Ok(()),
        }
    }

    fn to_petgraph<'a>(
        &self,
        steps: &'a [StepDefinition],
    ) -> (DiGraph<&'a str, ()>, Vec<petgraph::graph::NodeIndex>) {
        let mut graph = DiGraph::<&str, ()>::new();
        let nodes: Vec<_> = steps.iter().map(|s| graph.add_node(s.id.as_str())).collect();
        let index_of: HashMap<&str, usize> = steps
            .iter()
            .enumerate()
            .map(|(i, s)| (s.id.as_str(), i))
            .collect();

        for (to, step) in steps.iter().enumerate() {
            for dep in self.dependencies_of(&step.id) {
                if let Some(&from) = index_of.get(dep) {
                    graph.add_edge(nodes[from], nodes[to], ());
                }
            }
        }
        (graph, nodes)
    }

    /// Reject cyclic plans, naming a step on the cycle.
    pub fn check_acyclic(&self, steps: &[StepDefinition]) -> Result<(), PlaybookError> {
        let (graph, _) = self.to_petgraph(steps);
        toposort(&graph, None).map_err(|cycle| {
            let node_id = graph[cycle.node_id()];
            PlaybookError::CycleDetected(format!("cycle detected involving step '{node_id}'"))
        })?;
        Ok(())
    }

    /// Group steps by dependency depth. Every step in a wave depends only on
    /// steps in earlier waves. Diagnostic preview; the scheduler recomputes
    /// readiness each round.
    pub fn execution_waves<'a>(
        &self,
        steps: &'a [StepDefinition],
    ) -> Result<Vec<Vec<&'a StepDefinition>>, PlaybookError> {
        if steps.is_empty() {
            return Ok(vec![]);
        }
        let (graph, _) = self.to_petgraph(steps);
        let sorted = toposort(&graph, None).map_err(|cycle| {
            let node_id = graph[cycle.node_id()];
            PlaybookError::CycleDetected(format!("cycle detected involving step '{node_id}'"))
        })?;

        let mut depths: HashMap<&str, usize> = HashMap::new();
        for node in sorted {
            let step_id = graph[node];
            let depth = self
                .dependencies_of(step_id)
                .map(|dep| depths.get(dep).copied().unwrap_or(0) + 1)
                .max()
                .unwrap_or(0);
            depths.insert(step_id, depth);
        }

        let max_depth = depths.values().copied().max().unwrap_or(0);
        let mut waves: Vec<Vec<&StepDefinition>> = vec![vec![]; max_depth + 1];
        for step in steps {
            waves[depths[step.id.as_str()]].push(step);
        }
        Ok(waves)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
