//! Regex-based placeholder discovery that works without a template parser.
//!
//! Recognised syntaxes:
//!
//! | Syntax                     | Discovered as                                  |
//! |----------------------------|------------------------------------------------|
//! | `{{ name }}`, `{{ a.b }}`  | root identifier, string, required              |
//! | `{{ name\|default("x") }}` | optional, default `x`                          |
//! | `{% if cond %}` / `elif`   | every free identifier in `cond`, boolean       |
//! | `{% for x in items %}`     | `items` iterable; `x` is loop-local            |
//! | `{% set x = ... %}`        | `x` is local                                   |
//! | `${name}`                  | string, required                               |
//!
//! Comments (`{# … #}`) and `{% raw %}` blocks are ignored.

use std::collections::BTreeSet;

use once_cell::sync::Lazy;
use regex::Regex;

use promptlab_core::{DiscoveredParameters, ParameterInfo, ParameterKind};

/// Identifiers that are never parameters: keywords, literals, tests and
/// engine-provided names.
const RESERVED: &[&str] = &[
    "and", "or", "not", "in", "is", "if", "else", "true", "false", "True", "False", "none",
    "None", "null", "loop", "defined", "undefined", "odd", "even", "number", "string",
    "iterable", "object", "divisibleby", "containing", "starting_with", "ending_with",
    "matching", "__tera_context",
];

static COMMENT: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?s)\{#.*?#\}").expect("comment regex must compile"));

static RAW_BLOCK: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?s)\{%-?\s*raw\s*-?%\}.*?\{%-?\s*endraw\s*-?%\}").expect("raw regex must compile")
});

static OUTPUT: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?s)\{\{-?\s*(.*?)\s*-?\}\}").expect("output regex must compile"));

static CONDITION: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?s)\{%-?\s*(?:if|elif)\s+(.*?)\s*-?%\}").expect("condition regex must compile")
});

static FOR_LOOP: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?s)\{%-?\s*for\s+([A-Za-z_]\w*)(?:\s*,\s*([A-Za-z_]\w*))?\s+in\s+(.*?)\s*-?%\}")
        .expect("for regex must compile")
});

static SET: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\{%-?\s*set(?:_global)?\s+([A-Za-z_]\w*)\s*=").expect("set regex must compile")
});

static DOLLAR: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\$\{\s*([A-Za-z_]\w*)\s*\}").expect("dollar regex must compile"));

static LEADING_IDENT: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^([A-Za-z_]\w*)").expect("ident regex must compile"));

static IDENT: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"[A-Za-z_]\w*").expect("ident regex must compile"));

static QUOTED: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#""[^"]*"|'[^']*'"#).expect("quoted regex must compile"));

static DEFAULT_FILTER: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"default\(\s*(?:value\s*=\s*)?(?:"([^"]*)"|'([^']*)'|([^)]*?))\s*\)"#)
        .expect("default regex must compile")
});

/// Discover every placeholder in `template`. Never fails; an unparseable
/// template simply yields fewer names.
pub fn extract_parameters(template: &str) -> DiscoveredParameters {
    let source = strip_ignored(template);
    let locals = bound_names(&source);
    let mut found = DiscoveredParameters::new();

    for caps in FOR_LOOP.captures_iter(&source) {
        if let Some(root) = caps.get(3).and_then(|m| leading_root(m.as_str())) {
            merge(&mut found, root, ParameterInfo::required(ParameterKind::Iterable));
        }
    }

    for caps in OUTPUT.captures_iter(&source) {
        let Some(expr) = caps.get(1).map(|m| m.as_str()) else { continue };
        let (head, filters) = match expr.split_once('|') {
            Some((head, filters)) => (head.trim(), Some(filters)),
            None => (expr.trim(), None),
        };
        let Some(root) = leading_root(head) else { continue };
        let info = match filters.and_then(default_value) {
            Some(default) => ParameterInfo::optional(ParameterKind::String, Some(default)),
            None => ParameterInfo::required(ParameterKind::String),
        };
        merge(&mut found, root, info);
    }

    for caps in CONDITION.captures_iter(&source) {
        let Some(expr) = caps.get(1).map(|m| m.as_str()) else { continue };
        for root in free_identifiers(expr) {
            merge(&mut found, root, ParameterInfo::required(ParameterKind::Boolean));
        }
    }

    for caps in DOLLAR.captures_iter(&source) {
        if let Some(name) = caps.get(1) {
            merge(&mut found, name.as_str(), ParameterInfo::required(ParameterKind::String));
        }
    }

    found.retain(|name, _| !locals.contains(name) && !is_reserved(name));
    found
}

/// Names the template binds itself (loop variables, `set` targets).
pub fn bound_names(template: &str) -> BTreeSet<String> {
    let mut names = BTreeSet::new();
    for caps in FOR_LOOP.captures_iter(template) {
        for idx in [1, 2] {
            if let Some(m) = caps.get(idx) {
                names.insert(m.as_str().to_string());
            }
        }
    }
    for caps in SET.captures_iter(template) {
        if let Some(m) = caps.get(1) {
            names.insert(m.as_str().to_string());
        }
    }
    names
}

pub fn is_reserved(name: &str) -> bool {
    RESERVED.contains(&name)
}

fn strip_ignored(template: &str) -> String {
    let without_raw = RAW_BLOCK.replace_all(template, "");
    COMMENT.replace_all(&without_raw, "").into_owned()
}

/// Root identifier of an expression such as `user.name` or `items[0]`.
/// Literals and function calls yield `None`.
fn leading_root(expr: &str) -> Option<&str> {
    let expr = expr.trim();
    let m = LEADING_IDENT.find(expr)?;
    let rest = expr[m.end()..].trim_start();
    if rest.starts_with('(') {
        return None;
    }
    Some(m.as_str())
}

/// Identifiers in a condition that refer to context variables.
fn free_identifiers(expr: &str) -> Vec<&str> {
    // Blank out string literals so words inside them are not picked up,
    // keeping byte offsets aligned with the original.
    let masked = QUOTED.replace_all(expr, |caps: &regex::Captures<'_>| " ".repeat(caps[0].len()));
    let bytes = masked.as_bytes();

    let mut roots = Vec::new();
    for m in IDENT.find_iter(&masked) {
        let before = masked[..m.start()].trim_end().chars().last();
        if matches!(before, Some('.') | Some('|')) {
            continue;
        }
        // `is defined`, `is odd`, … are tests, not variables.
        if masked[..m.start()].trim_end().ends_with(" is") {
            continue;
        }
        if bytes.get(m.start().wrapping_sub(1)).is_some_and(|b| b.is_ascii_digit()) {
            continue;
        }
        if masked[m.end()..].trim_start().starts_with('(') {
            continue;
        }
        roots.push(&expr[m.start()..m.end()]);
    }
    roots
}

fn default_value(filters: &str) -> Option<String> {
    let caps = DEFAULT_FILTER.captures(filters)?;
    [1, 2, 3]
        .into_iter()
        .find_map(|idx| caps.get(idx))
        .map(|m| m.as_str().trim().to_string())
}

/// Combine repeated sightings: required if any sighting is required, and
/// the richer kind wins (iterable over string over boolean).
fn merge(found: &mut DiscoveredParameters, name: &str, info: ParameterInfo) {
    match found.get_mut(name) {
        None => {
            found.insert(name.to_string(), info);
        }
        Some(existing) => {
            existing.required |= info.required;
            if rank(info.kind) > rank(existing.kind) {
                existing.kind = info.kind;
            }
            if existing.default.is_none() {
                existing.default = info.default;
            }
        }
    }
}

fn rank(kind: ParameterKind) -> u8 {
    match kind {
        ParameterKind::Boolean => 0,
        ParameterKind::String => 1,
        ParameterKind::Iterable => 2,
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    fn names(template: &str) -> Vec<String> {
        extract_parameters(template).into_keys().collect()
    }

    #[rstest]
    #[case("Hello {{name}}!", &["name"])]
    #[case("Hello {{ user.email }}", &["user"])]
    #[case("{{ a }} {{ b }} {{ a }}", &["a", "b"])]
    #[case("{{ name | upper }}", &["name"])]
    #[case("{{ 'literal' }} {{ 42 }}", &[])]
    #[case("{{ now() }}", &[])]
    #[case("Hi ${who}", &["who"])]
    #[case("{# {{ hidden }} #}{{ shown }}", &["shown"])]
    #[case("{% raw %}{{ not_me }}{% endraw %}", &[])]
    #[case("{{ loop.index }}", &[])]
    fn discovers_roots(#[case] template: &str, #[case] expected: &[&str]) {
        assert_eq!(names(template), expected.iter().map(|s| s.to_string()).collect::<Vec<_>>());
    }

    #[test]
    fn loop_variables_are_local() {
        let found = extract_parameters("{% for item in items %}{{ item.name }}{% endfor %}");
        assert_eq!(found.keys().collect::<Vec<_>>(), vec!["items"]);
        assert_eq!(found["items"].kind, ParameterKind::Iterable);
    }

    #[test]
    fn key_value_loops_bind_both_names() {
        let found = extract_parameters("{% for k, v in pairs %}{{ k }}={{ v }}{% endfor %}");
        assert_eq!(found.keys().collect::<Vec<_>>(), vec!["pairs"]);
    }

    #[test]
    fn set_targets_are_local() {
        let found = extract_parameters("{% set greeting = 'hi' %}{{ greeting }} {{ name }}");
        assert_eq!(found.keys().collect::<Vec<_>>(), vec!["name"]);
    }

    #[test]
    fn conditions_yield_boolean_parameters() {
        let found = extract_parameters(
            "{% if is_admin and not banned %}x{% elif role == 'guest' %}y{% endif %}",
        );
        assert_eq!(found.keys().collect::<Vec<_>>(), vec!["banned", "is_admin", "role"]);
        assert_eq!(found["is_admin"].kind, ParameterKind::Boolean);
    }

    #[test]
    fn condition_tests_and_filters_are_not_parameters() {
        let found = extract_parameters("{% if name is defined and tags|length > 2 %}{% endif %}");
        assert_eq!(found.keys().collect::<Vec<_>>(), vec!["name", "tags"]);
    }

    #[test]
    fn default_filter_marks_optional() {
        let found = extract_parameters(r#"{{ title | default("Untitled") }}"#);
        assert_eq!(
            found["title"],
            ParameterInfo::optional(ParameterKind::String, Some("Untitled".into()))
        );
    }

    #[test]
    fn output_usage_upgrades_condition_kind() {
        let found = extract_parameters("{% if name %}{{ name }}{% endif %}");
        assert_eq!(found["name"].kind, ParameterKind::String);
        assert!(found["name"].required);
    }

    #[test]
    fn malformed_template_still_yields_a_map() {
        let found = extract_parameters("{{ unclosed {% if %} }}}}");
        assert!(found.len() <= 1);
    }
}
