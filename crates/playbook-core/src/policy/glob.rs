//! Anchored wildcard matching for tool allow-lists.
//!
//! `*` matches any run of characters (dots included), `?` matches exactly
//! one character, everything else is literal. The whole tool ID must match.

/// Match `text` against an anchored `*` / `?` pattern.
pub fn glob_match(pattern: &str, text: &str) -> bool {
    let pattern: Vec<char> = pattern.chars().collect();
    let text: Vec<char> = text.chars().collect();

    let (mut pi, mut ti) = (0, 0);
    // Position of the last `*` seen and the text index it is currently
    // absorbing up to, for backtracking.
    let mut star: Option<(usize, usize)> = None;

    while ti < text.len() {
        match pattern.get(pi) {
            Some('*') => {
                star = Some((pi, ti));
                pi += 1;
            }
            Some('?') => {
                pi += 1;
                ti += 1;
            }
            Some(&c) if c == text[ti] => {
                pi += 1;
                ti += 1;
            }
            _ => match star {
                Some((star_pi, star_ti)) => {
                    pi = star_pi + 1;
                    ti = star_ti + 1;
                    star = Some((star_pi, star_ti + 1));
                }
                None => return false,
            },
        }
    }

    pattern[pi..].iter().all(|&c| c == '*')
}

/// Whether any pattern matches. An empty list allows everything.
pub fn allowed_by(patterns: &[String], tool_id: &str) -> bool {
    patterns.is_empty() || patterns.iter().any(|p| glob_match(p.trim(), tool_id))
}
