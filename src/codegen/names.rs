//! Name Mapping
//!
//! Pure functions from schema names to target-language identifiers. The
//! result depends only on the input name and the [`NamingConfig`].

use super::config::{Casing, NamingConfig};

/// Split an identifier into words at `_`, `-`, spaces, dots and case
/// boundaries. A run of capitals is one word (`HTTPServer` → `HTTP`, `Server`).
pub fn split_words(s: &str) -> Vec<String> {
    let chars: Vec<char> = s.chars().collect();
    let mut words = Vec::new();
    let mut current = String::new();

    for (i, &c) in chars.iter().enumerate() {
        if matches!(c, '_' | '-' | ' ' | '.') {
            if !current.is_empty() {
                words.push(std::mem::take(&mut current));
            }
            continue;
        }

        if let Some(prev) = current.chars().last() {
            let next = chars.get(i + 1).copied();
            let boundary = (prev.is_lowercase() && c.is_uppercase())
                || (prev.is_ascii_digit() && c.is_alphabetic() && c.is_uppercase())
                || (prev.is_uppercase() && c.is_uppercase() && next.map(|n| n.is_lowercase()).unwrap_or(false));
            if boundary {
                words.push(std::mem::take(&mut current));
            }
        }
        current.push(c);
    }
    if !current.is_empty() {
        words.push(current);
    }
    words
}

fn capitalize(word: &str, naming: &NamingConfig) -> String {
    let upper = word.to_uppercase();
    if naming.acronyms.contains(&upper) {
        return upper;
    }
    let mut chars = word.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars.flat_map(char::to_lowercase)).collect(),
        None => String::new(),
    }
}

/// Apply a casing convention
pub fn apply_case(s: &str, casing: Casing, naming: &NamingConfig) -> String {
    let words = split_words(s);
    match casing {
        Casing::Preserve => s.to_string(),
        Casing::PascalCase => words.iter().map(|w| capitalize(w, naming)).collect(),
        Casing::CamelCase => words
            .iter()
            .enumerate()
            .map(|(i, w)| if i == 0 { w.to_lowercase() } else { capitalize(w, naming) })
            .collect(),
        Casing::SnakeCase => words.iter().map(|w| w.to_lowercase()).collect::<Vec<_>>().join("_"),
        Casing::ScreamingSnakeCase => words.iter().map(|w| w.to_uppercase()).collect::<Vec<_>>().join("_"),
    }
}

/// Make an identifier legal: never empty, never starting with a digit,
/// never a reserved word
pub fn escape(name: String, naming: &NamingConfig) -> String {
    if name.is_empty() {
        return naming.escape_suffix.clone();
    }
    let name = if name.starts_with(|c: char| c.is_ascii_digit()) {
        format!("_{}", name)
    } else {
        name
    };
    if naming.is_reserved(&name) {
        format!("{}{}", name, naming.escape_suffix)
    } else {
        name
    }
}

/// Identifier for a named type (short name only)
pub fn type_name(name: &str, naming: &NamingConfig) -> String {
    escape(apply_case(name, naming.type_case, naming), naming)
}

pub fn field_name(name: &str, naming: &NamingConfig) -> String {
    escape(apply_case(name, naming.field_case, naming), naming)
}

pub fn symbol_name(symbol: &str, naming: &NamingConfig) -> String {
    escape(apply_case(symbol, naming.symbol_case, naming), naming)
}

/// Make identifiers that share a scope distinct. An identifier already taken
/// gets the first free numeric suffix joined with `separator`, so `first_name`
/// twice becomes `first_name` and `first_name_2`. Order decides who keeps
/// the plain identifier.
pub fn disambiguate(idents: Vec<String>, separator: &str) -> Vec<String> {
    let mut taken = std::collections::HashSet::new();
    idents
        .into_iter()
        .map(|ident| {
            let mut candidate = ident.clone();
            let mut n = 2;
            while taken.contains(&candidate) {
                candidate = format!("{}{}{}", ident, separator, n);
                n += 1;
            }
            taken.insert(candidate.clone());
            candidate
        })
        .collect()
}

/// Namespace segments as module/package names, each escaped
pub fn namespace_segments(namespace: Option<&str>, casing: Casing, naming: &NamingConfig) -> Vec<String> {
    namespace
        .map(|ns| {
            ns.split('.')
                .filter(|s| !s.is_empty())
                .map(|s| escape(apply_case(s, casing, naming), naming))
                .collect()
        })
        .unwrap_or_default()
}
