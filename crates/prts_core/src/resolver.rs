use std::sync::LazyLock;

use regex::Regex;

static NON_KEY_CHARS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[^\p{Han}\w]").expect("valid key regex"));

/// Comparison key: everything but CJK ideographs and word characters is dropped.
pub fn normalize_key(value: &str) -> String {
    NON_KEY_CHARS.replace_all(value, "").into_owned()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchKind {
    Exact,
    Normalized,
    Containment,
    Fallback,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resolution {
    pub name: String,
    pub kind: MatchKind,
}

/// Pick the canonical name for `input`. Never fails: when nothing in `names`
/// matches, the input is returned unchanged for the remote side to judge.
pub fn resolve(input: &str, names: &[String]) -> Resolution {
    if let Some(hit) = names.iter().find(|name| name.as_str() == input) {
        return Resolution {
            name: hit.clone(),
            kind: MatchKind::Exact,
        };
    }

    let wanted = normalize_key(input);
    if wanted.is_empty() {
        return fallback(input);
    }

    let keys = names
        .iter()
        .map(|name| normalize_key(name))
        .collect::<Vec<_>>();

    if let Some(position) = keys.iter().position(|key| *key == wanted) {
        return Resolution {
            name: names[position].clone(),
            kind: MatchKind::Normalized,
        };
    }

    // Shortest containing key wins; `min_by_key` keeps the first of equal lengths.
    let shortest = keys
        .iter()
        .enumerate()
        .filter(|(_, key)| key.contains(&wanted))
        .min_by_key(|(_, key)| key.chars().count());
    if let Some((position, _)) = shortest {
        return Resolution {
            name: names[position].clone(),
            kind: MatchKind::Containment,
        };
    }

    fallback(input)
}

fn fallback(input: &str) -> Resolution {
    Resolution {
        name: input.to_string(),
        kind: MatchKind::Fallback,
    }
}

#[cfg(test)]
mod tests {
    use super::{MatchKind, normalize_key, resolve};

    fn names(values: &[&str]) -> Vec<String> {
        values.iter().map(|value| value.to_string()).collect()
    }

    #[test]
    fn exact_match_beats_longer_entries() {
        let index = names(&["源石虫", "源石虫(集群)"]);
        let resolution = resolve("源石虫", &index);
        assert_eq!(resolution.name, "源石虫");
        assert_eq!(resolution.kind, MatchKind::Exact);
    }

    #[test]
    fn substring_prefers_shortest_containing_name() {
        let index = names(&["源石虫(集群)", "源石虫"]);
        let resolution = resolve("石虫", &index);
        assert_eq!(resolution.name, "源石虫");
        assert_eq!(resolution.kind, MatchKind::Containment);
    }

    #[test]
    fn containment_tie_keeps_index_order() {
        let index = names(&["酸液源石虫", "高能源石虫"]);
        assert_eq!(resolve("源石虫", &index).name, "酸液源石虫");
    }

    #[test]
    fn normalized_match_returns_original_entry() {
        let index = names(&["“庞贝”", "Avenger"]);
        let resolution = resolve("庞贝", &index);
        assert_eq!(resolution.name, "“庞贝”");
        assert_eq!(resolution.kind, MatchKind::Normalized);
        assert_eq!(resolve("avenger", &index).kind, MatchKind::Fallback);
        assert_eq!(resolve("Aven ger", &index).name, "Avenger");
    }

    #[test]
    fn unmatched_input_falls_back_unchanged() {
        let index = names(&["源石虫"]);
        let resolution = resolve("1-7", &index);
        assert_eq!(resolution.name, "1-7");
        assert_eq!(resolution.kind, MatchKind::Fallback);
        assert_eq!(resolve("", &index).kind, MatchKind::Fallback);
    }

    #[test]
    fn normalize_key_keeps_ideographs_and_word_chars() {
        assert_eq!(normalize_key("源石虫 (集群)!"), "源石虫集群");
        assert_eq!(normalize_key("H8-4"), "H84");
    }
}
