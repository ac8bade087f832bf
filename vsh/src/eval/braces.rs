//! Brace expansion
//!
//! Works on pattern text where a backslash escapes the next character.
//! Escaped braces and commas never form a group, and escapes are carried
//! through to the output untouched for the glob and unescape phases.

/// Upper bound on words produced from one input word.
pub const DEFAULT_MAX_EXPANSION: usize = 10_000;

/// Expand every brace group of `word`, left to right.
///
/// `file.{js,ts}` gives `file.js file.ts`, `{1..3}` gives `1 2 3` and a group
/// without a comma or range passes its inner value through (`{abc}` -> `abc`).
pub fn expand_braces(word: &str) -> Vec<String> {
    expand_braces_limited(word, DEFAULT_MAX_EXPANSION)
}

pub fn expand_braces_limited(word: &str, limit: usize) -> Vec<String> {
    let chars: Vec<char> = word.chars().collect();
    let mut out = Vec::new();
    let truncated = expand_into(&chars, &mut out, limit.max(1));
    if truncated {
        tracing::warn!(word, limit, "brace expansion truncated");
    }
    out
}

/// Returns true when output was dropped because of `limit`.
fn expand_into(word: &[char], out: &mut Vec<String>, limit: usize) -> bool {
    if out.len() >= limit {
        return true;
    }
    let Some((open, close)) = find_group(word) else {
        out.push(word.iter().collect());
        return false;
    };

    let prefix = &word[..open];
    let inner = &word[open + 1..close];
    let suffix = &word[close + 1..];

    let items = match range_items(inner, limit) {
        Some(items) => items,
        None => split_items(inner),
    };

    let mut truncated = false;
    for item in items {
        let mut combined = Vec::with_capacity(prefix.len() + item.len() + suffix.len());
        combined.extend_from_slice(prefix);
        combined.extend_from_slice(&item);
        combined.extend_from_slice(suffix);
        if expand_into(&combined, out, limit) {
            truncated = true;
            break;
        }
    }
    truncated
}

/// First matched, non-empty top-level `{...}` group. An unmatched `{` is
/// treated as a literal and the search continues after it.
fn find_group(word: &[char]) -> Option<(usize, usize)> {
    let mut from = 0;
    while from < word.len() {
        let mut depth = 0usize;
        let mut open = None;
        let mut i = from;
        while i < word.len() {
            match word[i] {
                '\\' => i += 1,
                '{' => {
                    if depth == 0 {
                        open = Some(i);
                    }
                    depth += 1;
                }
                '}' if depth > 0 => {
                    depth -= 1;
                    if depth == 0 {
                        if let Some(start) = open {
                            if i > start + 1 {
                                return Some((start, i));
                            }
                            open = None;
                        }
                    }
                }
                _ => {}
            }
            i += 1;
        }
        // The outermost open brace never closed
        from = open? + 1;
    }
    None
}

/// Split on top-level, unescaped commas.
fn split_items(inner: &[char]) -> Vec<Vec<char>> {
    let mut items = Vec::new();
    let mut current = Vec::new();
    let mut depth = 0usize;
    let mut i = 0;
    while i < inner.len() {
        let c = inner[i];
        match c {
            '\\' => {
                current.push(c);
                if let Some(&next) = inner.get(i + 1) {
                    current.push(next);
                }
                i += 2;
                continue;
            }
            '{' => depth += 1,
            '}' => depth = depth.saturating_sub(1),
            ',' if depth == 0 => {
                items.push(std::mem::take(&mut current));
                i += 1;
                continue;
            }
            _ => {}
        }
        current.push(c);
        i += 1;
    }
    items.push(current);
    items
}

/// `a..b` or `a..b..step` over integers or single letters.
fn range_items(inner: &[char], limit: usize) -> Option<Vec<Vec<char>>> {
    let text: String = inner.iter().collect();
    let fields: Vec<&str> = text.split("..").collect();
    let (start, end, step) = match fields.as_slice() {
        [start, end] => (*start, *end, None),
        [start, end, step] => (*start, *end, Some(step.parse::<i64>().ok()?)),
        _ => return None,
    };
    let step = step.map_or(1, |s: i64| s.unsigned_abs().max(1));

    if let (Ok(a), Ok(b)) = (start.parse::<i64>(), end.parse::<i64>()) {
        let width = if has_leading_zero(start) || has_leading_zero(end) {
            start.len().max(end.len())
        } else {
            0
        };
        return Some(
            stepped(a, b, step, limit)
                .map(|n| format!("{n:0width$}").chars().collect())
                .collect(),
        );
    }

    let (mut sc, mut ec) = (start.chars(), end.chars());
    match (sc.next(), sc.next(), ec.next(), ec.next()) {
        (Some(a), None, Some(b), None) if a.is_ascii_alphabetic() && b.is_ascii_alphabetic() => {
            Some(
                stepped(i64::from(a as u8), i64::from(b as u8), step, limit)
                    .filter_map(|n| u8::try_from(n).ok())
                    .map(|n| vec![char::from(n)])
                    .collect(),
            )
        }
        _ => None,
    }
}

fn has_leading_zero(s: &str) -> bool {
    let digits = s.trim_start_matches(['-', '+']);
    digits.len() > 1 && digits.starts_with('0')
}

fn stepped(start: i64, end: i64, step: u64, limit: usize) -> impl Iterator<Item = i64> {
    let count = (start.abs_diff(end) / step).saturating_add(1);
    let count = usize::try_from(count).unwrap_or(usize::MAX).min(limit);
    let step = i64::try_from(step).unwrap_or(i64::MAX);
    let step = if start <= end { step } else { -step };
    std::iter::successors(Some(start), move |n| n.checked_add(step)).take(count)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_comma_list_preserves_order() {
        assert_eq!(
            expand_braces("file.{js,ts,tsx}"),
            vec!["file.js", "file.ts", "file.tsx"]
        );
    }

    #[test]
    fn test_zero_padded_range() {
        assert_eq!(expand_braces("{01..03}"), vec!["01", "02", "03"]);
        assert_eq!(expand_braces("{08..10}"), vec!["08", "09", "10"]);
        assert_eq!(expand_braces("{1..3}"), vec!["1", "2", "3"]);
    }

    #[test]
    fn test_empty_alternative() {
        assert_eq!(expand_braces("a{,b}c"), vec!["ac", "abc"]);
    }

    #[test]
    fn test_single_value_passthrough() {
        assert_eq!(expand_braces("{abc}"), vec!["abc"]);
    }

    #[test]
    fn test_descending_and_stepped_ranges() {
        assert_eq!(expand_braces("{3..1}"), vec!["3", "2", "1"]);
        assert_eq!(expand_braces("{1..10..3}"), vec!["1", "4", "7", "10"]);
        assert_eq!(expand_braces("{10..1..4}"), vec!["10", "6", "2"]);
        assert_eq!(expand_braces("{-1..1}"), vec!["-1", "0", "1"]);
    }

    #[test]
    fn test_alpha_range() {
        assert_eq!(expand_braces("{a..e}"), vec!["a", "b", "c", "d", "e"]);
        assert_eq!(expand_braces("{c..a}"), vec!["c", "b", "a"]);
    }

    #[test]
    fn test_nested_groups() {
        assert_eq!(expand_braces("{a,{b,c}}x"), vec!["ax", "bx", "cx"]);
        assert_eq!(
            expand_braces("src/{lib,bin/{a,b}}.rs"),
            vec!["src/lib.rs", "src/bin/a.rs", "src/bin/b.rs"]
        );
    }

    #[test]
    fn test_cartesian_product() {
        assert_eq!(
            expand_braces("{a,b}{1,2}"),
            vec!["a1", "a2", "b1", "b2"]
        );
    }

    #[test]
    fn test_no_braces_and_malformed() {
        assert_eq!(expand_braces("plain"), vec!["plain"]);
        assert_eq!(expand_braces("{}"), vec!["{}"]);
        assert_eq!(expand_braces("{a,b"), vec!["{a,b"]);
        assert_eq!(expand_braces("{x{a,b}"), vec!["{xa", "{xb"]);
        assert_eq!(expand_braces("a}b"), vec!["a}b"]);
    }

    #[test]
    fn test_escaped_braces_are_literal() {
        assert_eq!(expand_braces(r"\{a,b\}"), vec![r"\{a,b\}"]);
        assert_eq!(expand_braces(r"{a\,b,c}"), vec![r"a\,b", "c"]);
    }

    #[test]
    fn test_limit() {
        assert_eq!(expand_braces_limited("{1..1000000}", 5).len(), 5);
        assert_eq!(expand_braces_limited("{a,b,c}{1,2,3}", 4).len(), 4);
    }

    #[test]
    fn test_range_at_integer_bounds() {
        assert_eq!(
            expand_braces("{-9223372036854775808..9223372036854775807..9223372036854775807}"),
            vec!["-9223372036854775808", "-1", "9223372036854775806"]
        );
        assert_eq!(
            expand_braces("{9223372036854775806..9223372036854775807}"),
            vec!["9223372036854775806", "9223372036854775807"]
        );
        assert_eq!(
            expand_braces("{1..3..-9223372036854775808}"),
            vec!["1"]
        );
    }
}
