//! Pathname expansion against the virtual filesystem
//!
//! Patterns arrive in the escaped form produced by word assembly: a
//! backslash makes the next character literal, so quoted `*` never globs.

use crate::vfs::{join_path, resolve_path, FileSystem};

#[derive(Debug, Clone, PartialEq)]
enum Tok {
    Char(char),
    Any,
    Star,
    Class { negated: bool, ranges: Vec<(char, char)> },
}

impl Tok {
    fn matches(&self, c: char) -> bool {
        match self {
            Self::Char(expected) => *expected == c,
            Self::Any => true,
            Self::Star => false,
            Self::Class { negated, ranges } => {
                let hit = ranges.iter().any(|&(lo, hi)| lo <= c && c <= hi);
                hit != *negated
            }
        }
    }
}

/// True when `pattern` holds an unescaped `*`, `?` or `[`.
pub fn has_glob_chars(pattern: &str) -> bool {
    let mut chars = pattern.chars();
    while let Some(c) = chars.next() {
        match c {
            '\\' => {
                chars.next();
            }
            '*' | '?' | '[' => return true,
            _ => {}
        }
    }
    false
}

/// Drop the escaping backslashes.
pub fn unescape(pattern: &str) -> String {
    let mut out = String::with_capacity(pattern.len());
    let mut chars = pattern.chars();
    while let Some(c) = chars.next() {
        if c == '\\' {
            if let Some(next) = chars.next() {
                out.push(next);
            }
        } else {
            out.push(c);
        }
    }
    out
}

fn compile(pattern: &str) -> Vec<Tok> {
    let chars: Vec<char> = pattern.chars().collect();
    let mut toks = Vec::new();
    let mut i = 0;
    while i < chars.len() {
        match chars[i] {
            '\\' => {
                if let Some(&c) = chars.get(i + 1) {
                    toks.push(Tok::Char(c));
                }
                i += 2;
            }
            '*' => {
                if toks.last() != Some(&Tok::Star) {
                    toks.push(Tok::Star);
                }
                i += 1;
            }
            '?' => {
                toks.push(Tok::Any);
                i += 1;
            }
            '[' => match parse_class(&chars, i + 1) {
                Some((tok, next)) => {
                    toks.push(tok);
                    i = next;
                }
                None => {
                    toks.push(Tok::Char('['));
                    i += 1;
                }
            },
            c => {
                toks.push(Tok::Char(c));
                i += 1;
            }
        }
    }
    toks
}

/// Parse a bracket class starting after `[`. `None` when it never closes.
fn parse_class(chars: &[char], start: usize) -> Option<(Tok, usize)> {
    let mut i = start;
    let negated = matches!(chars.get(i), Some('!' | '^'));
    if negated {
        i += 1;
    }
    let mut ranges = Vec::new();
    let mut first = true;
    loop {
        let c = *chars.get(i)?;
        if c == ']' && !first {
            return Some((Tok::Class { negated, ranges }, i + 1));
        }
        first = false;
        let (lo, width) = if c == '\\' {
            (*chars.get(i + 1)?, 2)
        } else {
            (c, 1)
        };
        i += width;
        if chars.get(i) == Some(&'-') && chars.get(i + 1).is_some_and(|&c| c != ']') {
            let (hi, width) = if chars[i + 1] == '\\' {
                (*chars.get(i + 2)?, 3)
            } else {
                (chars[i + 1], 2)
            };
            ranges.push((lo, hi));
            i += width;
        } else {
            ranges.push((lo, lo));
        }
    }
}

fn match_toks(toks: &[Tok], name: &[char]) -> bool {
    let (mut p, mut n) = (0, 0);
    let mut backtrack: Option<(usize, usize)> = None;
    while n < name.len() {
        match toks.get(p) {
            Some(Tok::Star) => {
                backtrack = Some((p, n));
                p += 1;
                continue;
            }
            Some(tok) if tok.matches(name[n]) => {
                p += 1;
                n += 1;
                continue;
            }
            _ => {}
        }
        match backtrack {
            Some((star, from)) => {
                p = star + 1;
                n = from + 1;
                backtrack = Some((star, from + 1));
            }
            None => return false,
        }
    }
    toks[p..].iter().all(|t| *t == Tok::Star)
}

/// Match one path segment against an escaped pattern.
pub fn glob_match(pattern: &str, name: &str) -> bool {
    let name: Vec<char> = name.chars().collect();
    match_toks(&compile(pattern), &name)
}

fn join_display(prefix: &str, name: &str) -> String {
    if prefix.is_empty() {
        name.to_string()
    } else if prefix.ends_with('/') {
        format!("{prefix}{name}")
    } else {
        format!("{prefix}/{name}")
    }
}

/// Expand `pattern` relative to `cwd`. Results keep the pattern's own form
/// (relative or absolute) and are sorted. A pattern without wildcards, or one
/// that matches nothing, yields its literal text.
pub async fn expand_glob(fs: &dyn FileSystem, cwd: &str, pattern: &str) -> Vec<String> {
    if !has_glob_chars(pattern) {
        return vec![unescape(pattern)];
    }

    let absolute = pattern.starts_with('/');
    let dirs_only = pattern.ends_with('/');
    let segments: Vec<&str> = pattern.split('/').filter(|s| !s.is_empty()).collect();

    // (text shown to the user, resolved filesystem path)
    let mut candidates = vec![if absolute {
        ("/".to_string(), "/".to_string())
    } else {
        (String::new(), cwd.to_string())
    }];
    let mut check_literal = false;

    for (index, segment) in segments.iter().enumerate() {
        let last = index + 1 == segments.len();
        let mut next = Vec::new();

        if !has_glob_chars(segment) {
            let literal = unescape(segment);
            for (display, path) in candidates {
                next.push((join_display(&display, &literal), resolve_path(&path, &literal)));
            }
            check_literal = true;
            candidates = next;
            continue;
        }

        let toks = compile(segment);
        let explicit_dot = segment.starts_with('.') || segment.starts_with("\\.");
        for (display, path) in &candidates {
            if check_literal && !fs.exists(path).await {
                continue;
            }
            let Ok(entries) = fs.list_directory(path).await else {
                continue;
            };
            for entry in entries {
                if entry.name.starts_with('.') && !explicit_dot {
                    continue;
                }
                if (!last || dirs_only) && !entry.is_dir {
                    continue;
                }
                let name: Vec<char> = entry.name.chars().collect();
                if match_toks(&toks, &name) {
                    next.push((join_display(display, &entry.name), join_path(path, &entry.name)));
                }
            }
        }
        check_literal = false;
        candidates = next;
        if candidates.is_empty() {
            break;
        }
    }

    let mut matches = Vec::with_capacity(candidates.len());
    for (display, path) in candidates {
        if check_literal && !fs.exists(&path).await {
            continue;
        }
        matches.push(if dirs_only { format!("{display}/") } else { display });
    }

    if matches.is_empty() {
        tracing::trace!(pattern, "glob matched nothing");
        return vec![unescape(pattern)];
    }
    matches.sort();
    matches
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vfs::MemoryFs;

    #[test]
    fn test_glob_match_basics() {
        assert!(glob_match("*.txt", "notes.txt"));
        assert!(!glob_match("*.txt", "notes.md"));
        assert!(glob_match("a?c", "abc"));
        assert!(!glob_match("a?c", "ac"));
        assert!(glob_match("*", ""));
        assert!(glob_match("a*b*c", "aXXbYYc"));
        assert!(!glob_match("a*b*c", "aXXbYY"));
    }

    #[test]
    fn test_glob_match_classes() {
        assert!(glob_match("[abc]x", "bx"));
        assert!(glob_match("[a-c]x", "cx"));
        assert!(!glob_match("[!a-c]x", "cx"));
        assert!(glob_match("[^a-c]x", "dx"));
        assert!(glob_match("[]]", "]"));
        assert!(glob_match("[a-]", "-"));
        assert!(glob_match("[ab", "[ab"));
    }

    #[test]
    fn test_escaped_wildcards_are_literal() {
        assert!(!has_glob_chars(r"\*"));
        assert!(glob_match(r"\*", "*"));
        assert!(!glob_match(r"\*", "abc"));
        assert_eq!(unescape(r"a\*b\\c"), r"a*b\c");
    }

    fn sample_fs() -> MemoryFs {
        let fs = MemoryFs::new();
        fs.insert_file("/w/a.txt", "a").unwrap();
        fs.insert_file("/w/b.txt", "b").unwrap();
        fs.insert_file("/w/c.md", "c").unwrap();
        fs.insert_file("/w/.hidden", "h").unwrap();
        fs.insert_file("/w/sub/d.txt", "d").unwrap();
        fs.insert_file("/w/sub/.e.txt", "e").unwrap();
        fs
    }

    #[tokio::test]
    async fn test_expand_relative_sorted() {
        let fs = sample_fs();
        assert_eq!(expand_glob(&fs, "/w", "*.txt").await, vec!["a.txt", "b.txt"]);
        assert_eq!(
            expand_glob(&fs, "/w", "*").await,
            vec!["a.txt", "b.txt", "c.md", "sub"]
        );
    }

    #[tokio::test]
    async fn test_dotfile_rule() {
        let fs = sample_fs();
        assert_eq!(expand_glob(&fs, "/w", ".*").await, vec![".hidden"]);
        assert_eq!(expand_glob(&fs, "/w", ".hidden").await, vec![".hidden"]);
        assert_eq!(expand_glob(&fs, "/w", "sub/*").await, vec!["sub/d.txt"]);
        assert_eq!(expand_glob(&fs, "/w", "sub/.*").await, vec!["sub/.e.txt"]);
    }

    #[tokio::test]
    async fn test_multi_segment_and_absolute() {
        let fs = sample_fs();
        assert_eq!(expand_glob(&fs, "/", "/w/*/d.txt").await, vec!["/w/sub/d.txt"]);
        assert_eq!(expand_glob(&fs, "/w", "*/").await, vec!["sub/"]);
        assert_eq!(expand_glob(&fs, "/w/sub", "../*.md").await, vec!["../c.md"]);
        assert_eq!(expand_glob(&fs, "/", "/w/*/nope").await, vec!["/w/*/nope"]);
    }

    #[tokio::test]
    async fn test_no_match_returns_literal() {
        let fs = sample_fs();
        assert_eq!(expand_glob(&fs, "/w", "*.rs").await, vec!["*.rs"]);
        assert_eq!(expand_glob(&fs, "/missing", "*").await, vec!["*"]);
    }
}
