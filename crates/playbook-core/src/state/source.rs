//! Writer identity tags and the partition write rules built on them.

/// Who is writing, derived from a free-form source tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriterKind {
    /// A tool: `tool`, `tool_*`, `tool:*`, `tool.*`.
    Tool,
    /// The execution context: `execution*`, `executor*`.
    Execution,
    /// A policy: `policy`, `policy_*`, `policy:*`.
    Policy,
    Other,
}

/// Classify a source tag. Matching is case-insensitive and ignores
/// surrounding whitespace.
pub fn classify_source(source: &str) -> WriterKind {
    let tag = source.trim().to_ascii_lowercase();
    if has_prefix_tag(&tag, "tool", &['_', ':', '.']) {
        WriterKind::Tool
    } else if tag.starts_with("execution") || tag.starts_with("executor") {
        WriterKind::Execution
    } else if has_prefix_tag(&tag, "policy", &['_', ':']) {
        WriterKind::Policy
    } else {
        WriterKind::Other
    }
}

fn has_prefix_tag(tag: &str, name: &str, separators: &[char]) -> bool {
    match tag.strip_prefix(name) {
        Some("") => true,
        Some(rest) => rest.starts_with(separators),
        None => false,
    }
}

/// Whether `source` may append to the World partition.
pub fn may_write_world(source: &str) -> bool {
    matches!(classify_source(source), WriterKind::Tool | WriterKind::Execution)
}

/// Whether `source` may record decisions.
pub fn may_write_decision(source: &str) -> bool {
    classify_source(source) == WriterKind::Policy
}

/// The policy identity carried by a policy source tag
/// (`policy:tool-guard` → `tool-guard`). A bare `policy` tag is its own id.
pub fn policy_id_from_source(source: &str) -> String {
    let trimmed = source.trim();
    let lower = trimmed.to_ascii_lowercase();
    if lower.starts_with("policy:") || lower.starts_with("policy_") {
        let id = &trimmed["policy:".len()..];
        if !id.is_empty() {
            return id.to_string();
        }
    }
    trimmed.to_string()
}
