//! Decides whether a provider serves a requested model id, and which concrete
//! id goes upstream. Patterns are fnmatch-style globs; they declare a
//! capability and never rewrite the id. Aliases are exact renames.

use crate::config::ModelRule;

/// Resolves `model` against a provider's rules. Returns the id to send
/// upstream, or `None` when no rule matches.
///
/// Order matters: exact pattern equality, then glob, then alias. A provider
/// with an empty rule list serves nothing.
pub fn resolve_model(rules: &[ModelRule], model: &str) -> Option<String> {
    for rule in rules {
        if let ModelRule::Pattern(pattern) = rule
            && pattern == model
        {
            return Some(model.to_string());
        }
    }
    for rule in rules {
        if let ModelRule::Pattern(pattern) = rule
            && glob_match(pattern, model)
        {
            return Some(model.to_string());
        }
    }
    for rule in rules {
        if let ModelRule::Alias { alias, target } = rule
            && alias == model
        {
            return Some(target.clone());
        }
    }
    None
}

pub fn supports_model(rules: &[ModelRule], model: &str) -> bool {
    resolve_model(rules, model).is_some()
}

/// A pattern counts as a concrete model id only when it carries no glob
/// metacharacters; globs are excluded from unified model listings.
pub fn is_glob_pattern(pattern: &str) -> bool {
    pattern.contains(['*', '?', '['])
}

/// fnmatch-style glob match over `*`, `?`, and `[...]` character classes
/// (ranges, and `!` negation; a `]` right after the opening bracket is a
/// literal member). Comparison is case sensitive, like model ids themselves.
pub fn glob_match(pattern: &str, text: &str) -> bool {
    let pattern: Vec<char> = pattern.chars().collect();
    let text: Vec<char> = text.chars().collect();

    let mut p = 0;
    let mut t = 0;
    // Position to resume from when a `*` needs to absorb one more character.
    let mut star: Option<(usize, usize)> = None;

    while t < text.len() {
        if p < pattern.len() {
            match pattern[p] {
                '*' => {
                    star = Some((p, t));
                    p += 1;
                    continue;
                }
                '?' => {
                    p += 1;
                    t += 1;
                    continue;
                }
                '[' => {
                    if let Some((next_p, matched)) = match_class(&pattern, p, text[t]) {
                        if matched {
                            p = next_p;
                            t += 1;
                            continue;
                        }
                    } else if pattern[p] == text[t] {
                        // Unterminated class: treat `[` as a literal.
                        p += 1;
                        t += 1;
                        continue;
                    }
                }
                literal => {
                    if literal == text[t] {
                        p += 1;
                        t += 1;
                        continue;
                    }
                }
            }
        }

        let Some((star_p, star_t)) = star else {
            return false;
        };
        p = star_p + 1;
        t = star_t + 1;
        star = Some((star_p, star_t + 1));
    }

    while p < pattern.len() && pattern[p] == '*' {
        p += 1;
    }
    p == pattern.len()
}

/// Matches `ch` against the class starting at `pattern[open]` (which must be
/// `[`). Returns the index past the closing `]` and the match result, or
/// `None` when the class never closes.
fn match_class(pattern: &[char], open: usize, ch: char) -> Option<(usize, bool)> {
    let mut i = open + 1;
    let negated = matches!(pattern.get(i), Some('!') | Some('^'));
    if negated {
        i += 1;
    }

    let mut matched = false;
    let mut first = true;
    loop {
        let &current = pattern.get(i)?;
        if current == ']' && !first {
            return Some((i + 1, matched != negated));
        }
        first = false;

        if pattern.get(i + 1) == Some(&'-')
            && pattern.get(i + 2).is_some_and(|&end| end != ']')
        {
            let end = pattern[i + 2];
            if current <= ch && ch <= end {
                matched = true;
            }
            i += 3;
        } else {
            if current == ch {
                matched = true;
            }
            i += 1;
        }
    }
}
