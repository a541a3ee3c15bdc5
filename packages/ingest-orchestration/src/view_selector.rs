//! Maps a plan's canonical view names (e.g. `"by category"`) onto the
//! actual view names present in a source database, tolerating the
//! synonyms, locale suffixes, and administrative clutter real
//! Notes/Domino databases carry (§4.3).

use std::collections::HashMap;
use unicode_normalization::UnicodeNormalization;

/// Lowercased-full-form prefixes that exclude a view from consideration
/// regardless of whether it otherwise matches a needle (§4.3 step 4).
const EXCLUDED_PREFIXES: &[&str] = &["..admin", "*help", "*aide", "(lookup"];

/// Default configured pattern strings per canonical view name: the
/// regex-flavored synonym lists an administrator would otherwise supply,
/// reduced to literal substrings by [`literal_needles`]. Real deployments
/// load these from the `IngestionPlan`/`PlanView` configuration; these
/// defaults cover the two canonical names spec.md's scenarios exercise.
fn default_patterns(canonical_name: &str) -> Vec<&'static str> {
    match canonical_name {
        "by category" => vec![r"by\s*categor(y|ies)", r"cat[eé]gorie?s?"],
        "by author" => vec![r"by\s*author", r"(author|auteur)s?"],
        _ => vec![],
    }
}

/// Reduce one configured pattern string to a set of literal substrings:
///
/// 1. Alternations `(a|b|…)` reduce to their first alternative.
/// 2. Character classes `[abc]` reduce to the first alphabetic char in
///    the class, or its first char if none is alphabetic.
/// 3. `{…}` quantifiers are stripped entirely.
/// 4. `\b`, `\s*`, `\t`-style escapes collapse to a space; other regex
///    metacharacters (`*+?^$|`) likewise collapse to a space.
/// 5. Escaped metacharacters (`\.`, `\(`, …) literalize to the escaped
///    character.
/// 6. The result is split on whitespace into tokens, trimmed, lowercased,
///    kept only when at least 3 chars long, and deduplicated in order.
pub fn literal_needles(pattern: &str) -> Vec<String> {
    let reduced = reduce_alternations(pattern);
    let reduced = reduce_char_classes(&reduced);
    let reduced = strip_braces(&reduced);
    let reduced = collapse_escapes_and_metachars(&reduced);
    tokenize(&reduced)
}

fn reduce_alternations(input: &str) -> String {
    let chars: Vec<char> = input.chars().collect();
    let mut out = String::new();
    let mut i = 0;
    while i < chars.len() {
        if chars[i] == '(' {
            let mut depth = 1usize;
            let mut j = i + 1;
            let mut first_alt = String::new();
            let mut seen_pipe = false;
            while j < chars.len() && depth > 0 {
                match chars[j] {
                    '(' => {
                        depth += 1;
                        if !seen_pipe {
                            first_alt.push(chars[j]);
                        }
                    }
                    ')' => {
                        depth -= 1;
                        if depth > 0 && !seen_pipe {
                            first_alt.push(chars[j]);
                        }
                    }
                    '|' if depth == 1 => seen_pipe = true,
                    c => {
                        if !seen_pipe {
                            first_alt.push(c);
                        }
                    }
                }
                j += 1;
            }
            out.push_str(&first_alt);
            i = j;
        } else {
            out.push(chars[i]);
            i += 1;
        }
    }
    out
}

fn reduce_char_classes(input: &str) -> String {
    let mut out = String::new();
    let mut chars = input.chars().peekable();
    while let Some(c) = chars.next() {
        if c == '[' {
            let mut class = String::new();
            for nc in chars.by_ref() {
                if nc == ']' {
                    break;
                }
                class.push(nc);
            }
            let repl = class
                .chars()
                .find(|c| c.is_alphabetic())
                .or_else(|| class.chars().next());
            if let Some(r) = repl {
                out.push(r);
            }
        } else {
            out.push(c);
        }
    }
    out
}

fn strip_braces(input: &str) -> String {
    let mut out = String::new();
    let mut chars = input.chars();
    while let Some(c) = chars.next() {
        if c == '{' {
            for nc in chars.by_ref() {
                if nc == '}' {
                    break;
                }
            }
        } else {
            out.push(c);
        }
    }
    out
}

fn collapse_escapes_and_metachars(input: &str) -> String {
    let mut out = String::new();
    let mut chars = input.chars().peekable();
    while let Some(c) = chars.next() {
        if c == '\\' {
            match chars.peek().copied() {
                Some(nc) if nc.is_ascii_alphabetic() => {
                    chars.next();
                    while matches!(chars.peek(), Some('*') | Some('+') | Some('?')) {
                        chars.next();
                    }
                    out.push(' ');
                }
                Some(nc) => {
                    out.push(nc);
                    chars.next();
                }
                None => {}
            }
        } else if matches!(c, '*' | '+' | '?' | '^' | '$' | '|') {
            out.push(' ');
        } else {
            out.push(c);
        }
    }
    out
}

fn tokenize(input: &str) -> Vec<String> {
    let mut seen = std::collections::HashSet::new();
    let mut out = Vec::new();
    for raw in input.split_whitespace() {
        let trimmed = raw.trim();
        if trimmed.chars().count() < 3 {
            continue;
        }
        let lower = trimmed.to_lowercase();
        if seen.insert(lower.clone()) {
            out.push(lower);
        }
    }
    out
}

/// Lowercase, NFKC-normalize, and strip ASCII punctuation from a view
/// name or override pattern (§4.3 step 1/2).
pub fn normalize_form(raw: &str) -> String {
    let lower = raw.to_lowercase();
    let nfkc: String = lower.nfkc().collect();
    nfkc.chars().filter(|c| !c.is_ascii_punctuation()).collect()
}

/// The last `/`- or `\`-separated component of a view name.
pub fn leaf_of(raw: &str) -> &str {
    raw.rsplit(['/', '\\']).next().unwrap_or(raw)
}

pub struct ViewSelector {
    /// canonical_name -> configured synonym pattern strings (regex-flavored,
    /// reduced to literal needles by [`literal_needles`]).
    patterns: HashMap<String, Vec<String>>,
}

impl ViewSelector {
    pub fn new(patterns: HashMap<String, Vec<String>>) -> Self {
        Self { patterns }
    }

    pub fn with_defaults() -> Self {
        let mut patterns = HashMap::new();
        for name in ["by category", "by author"] {
            patterns.insert(
                name.to_string(),
                default_patterns(name).into_iter().map(String::from).collect(),
            );
        }
        Self::new(patterns)
    }

    /// The needles to search for, given an optional per-plan-view
    /// override. Always includes the canonical name itself, lowercased.
    fn needles_for(&self, canonical_name: &str, regex_override: Option<&str>) -> Vec<String> {
        let mut needles = match regex_override {
            Some(pattern) => vec![normalize_form(pattern)],
            None => self
                .patterns
                .get(canonical_name)
                .map(|patterns| patterns.iter().flat_map(|p| literal_needles(p)).collect())
                .unwrap_or_default(),
        };
        let canonical_lower = canonical_name.to_lowercase();
        if !needles.contains(&canonical_lower) {
            needles.push(canonical_lower);
        }
        needles
    }

    /// Pick the best match for `canonical_name` out of `available` view
    /// names, honoring `regex_override` when the plan view carries one.
    ///
    /// A view matches when any needle is a substring of its full-raw,
    /// leaf-raw, full-normalized, or leaf-normalized form (§4.3 step 3),
    /// excluding administrative/lookup views (step 4). Ties prefer a
    /// candidate whose name signals English (step 5); remaining ties
    /// resolve to the shortest, then lexicographically first, name for
    /// determinism.
    pub fn select<'a>(
        &self,
        canonical_name: &str,
        regex_override: Option<&str>,
        available: &'a [String],
    ) -> Option<&'a str> {
        let needles = self.needles_for(canonical_name, regex_override);
        if needles.is_empty() {
            return None;
        }

        let mut candidates: Vec<&'a str> = available
            .iter()
            .filter(|name| {
                let full_lower = name.to_lowercase();
                if EXCLUDED_PREFIXES.iter().any(|p| full_lower.starts_with(p)) {
                    return false;
                }
                let full_raw = name.as_str();
                let leaf_raw = leaf_of(name);
                let full_norm = normalize_form(name);
                let leaf_norm = normalize_form(leaf_raw);
                needles.iter().any(|needle| {
                    full_raw.to_lowercase().contains(needle.as_str())
                        || leaf_raw.to_lowercase().contains(needle.as_str())
                        || full_norm.contains(needle.as_str())
                        || leaf_norm.contains(needle.as_str())
                })
            })
            .map(|s| s.as_str())
            .collect();

        if candidates.is_empty() {
            return None;
        }

        if let Some(pos) = candidates.iter().position(|c| {
            let lower = c.to_lowercase();
            lower.contains("english") || lower.contains("anglais")
        }) {
            return Some(candidates[pos]);
        }

        candidates.sort_by_key(|c| (c.len(), c.to_lowercase()));
        candidates.into_iter().next()
    }

    /// Diagnostic emitted when nothing in a plan resolved against the
    /// source's views: up to 20 available view names, plus a suggested
    /// override pinning `regex_override` to the first one, so an
    /// administrator has something actionable to paste into the plan's
    /// configuration (§4.3 "Output").
    pub fn no_match_diagnostic(canonical_name: &str, available: &[String]) -> String {
        let sample: Vec<&str> = available.iter().take(20).map(|s| s.as_str()).collect();
        let suggestion = match available.first() {
            Some(first) => format!(
                "UPDATE plan_view SET regex_override = '{}' WHERE canonical_name = '{}';",
                first.replace('\'', "''"),
                canonical_name.replace('\'', "''")
            ),
            None => "-- no views are available on this source at all".to_string(),
        };
        format!(
            "no view matched canonical name {canonical_name:?}. available views ({}{}): {:?}\nsuggested override: {suggestion}",
            sample.len(),
            if available.len() > sample.len() { "+" } else { "" },
            sample
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn views(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn matches_by_substring() {
        let selector = ViewSelector::with_defaults();
        let available = views(&["By Category", "By Author", "($All)"]);
        assert_eq!(
            selector.select("by category", None, &available),
            Some("By Category")
        );
    }

    #[test]
    fn excludes_admin_and_lookup_prefixed_views() {
        let selector = ViewSelector::with_defaults();
        let available = views(&["..Admin By Category", "(Lookup) Category", "All By Category"]);
        assert_eq!(
            selector.select("by category", None, &available),
            Some("All By Category")
        );
    }

    #[test]
    fn prefers_english_marked_view_on_tie() {
        let selector = ViewSelector::with_defaults();
        let available = views(&["By Category (English)", "By Category (Francais)"]);
        assert_eq!(
            selector.select("by category", None, &available),
            Some("By Category (English)")
        );
    }

    #[test]
    fn falls_back_to_shortest_name_when_no_english_match() {
        let selector = ViewSelector::with_defaults();
        let available = views(&["By Category Extended", "By Category"]);
        assert_eq!(
            selector.select("by category", None, &available),
            Some("By Category")
        );
    }

    #[test]
    fn returns_none_when_nothing_matches() {
        let selector = ViewSelector::with_defaults();
        let available = views(&["($All)", "Rooms and Resources"]);
        assert_eq!(selector.select("by category", None, &available), None);
    }

    #[test]
    fn regex_override_replaces_default_needles() {
        let selector = ViewSelector::with_defaults();
        let available = views(&["Custom Listing", "By Category"]);
        assert_eq!(
            selector.select("by category", Some("custom"), &available),
            Some("Custom Listing")
        );
    }

    #[test]
    fn matches_on_leaf_component_of_nested_view_name() {
        let selector = ViewSelector::with_defaults();
        let available = views(&["Folders\\Archive\\By Category"]);
        assert_eq!(
            selector.select("by category", None, &available),
            Some("Folders\\Archive\\By Category")
        );
    }

    #[test]
    fn literal_needles_reduces_alternation_to_first_branch() {
        let needles = literal_needles(r"(category|categories)");
        assert_eq!(needles, vec!["category".to_string()]);
    }

    #[test]
    fn literal_needles_strips_quantifier_braces() {
        let needles = literal_needles(r"cat{1,3}egory");
        assert_eq!(needles, vec!["category".to_string()]);
    }

    #[test]
    fn literal_needles_collapses_whitespace_escapes() {
        let needles = literal_needles(r"by\s*category");
        assert_eq!(needles, vec!["category".to_string()]);
    }

    #[test]
    fn literal_needles_drops_tokens_under_three_chars() {
        let needles = literal_needles(r"by author");
        assert_eq!(needles, vec!["author".to_string()]);
    }

    #[test]
    fn normalize_form_strips_punctuation_and_lowercases() {
        assert_eq!(normalize_form("By-Category!"), "bycategory");
    }

    #[test]
    fn leaf_of_splits_on_either_separator() {
        assert_eq!(leaf_of("Folders/Archive\\By Category"), "By Category");
        assert_eq!(leaf_of("By Category"), "By Category");
    }

    #[test]
    fn no_match_diagnostic_suggests_first_available_view() {
        let available = views(&["($All)", "By Author"]);
        let diagnostic = ViewSelector::no_match_diagnostic("by category", &available);
        assert!(diagnostic.contains("($All)"));
        assert!(diagnostic.contains("regex_override = '($All)'"));
    }
}
