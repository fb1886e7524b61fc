//! Naming-convention variants used to find implementations

/// Split a name into lowercase words at separators and case boundaries.
///
/// `getUser`, `get_user`, `get-user` and `GetUser` all give `["get", "user"]`;
/// acronyms stay together (`HTTPServer` gives `["http", "server"]`).
pub fn words(name: &str) -> Vec<String> {
    let chars: Vec<char> = name.chars().collect();
    let mut words = Vec::new();
    let mut current = String::new();

    for (i, &c) in chars.iter().enumerate() {
        if !c.is_alphanumeric() {
            if !current.is_empty() {
                words.push(std::mem::take(&mut current));
            }
            continue;
        }
        if c.is_uppercase() && !current.is_empty() {
            let prev = chars[i - 1];
            let next_is_lower = chars.get(i + 1).is_some_and(|n| n.is_lowercase());
            if prev.is_lowercase() || prev.is_numeric() || (prev.is_uppercase() && next_is_lower) {
                words.push(std::mem::take(&mut current));
            }
        }
        current.extend(c.to_lowercase());
    }
    if !current.is_empty() {
        words.push(current);
    }
    words
}

fn capitalize(word: &str) -> String {
    let mut chars = word.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

pub fn camel_case(name: &str) -> String {
    let words = words(name);
    let mut out = String::new();
    for (i, word) in words.iter().enumerate() {
        if i == 0 {
            out.push_str(word);
        } else {
            out.push_str(&capitalize(word));
        }
    }
    out
}

pub fn pascal_case(name: &str) -> String {
    words(name).iter().map(|w| capitalize(w)).collect()
}

pub fn snake_case(name: &str) -> String {
    words(name).join("_")
}

pub fn screaming_snake_case(name: &str) -> String {
    snake_case(name).to_uppercase()
}

/// Candidate identifiers for a descriptor name, in lookup order: exact,
/// camelCase, PascalCase, snake_case, SCREAMING_SNAKE_CASE. Duplicates and
/// empty forms are dropped.
pub fn variants(name: &str) -> Vec<String> {
    let forms = [
        name.to_string(),
        camel_case(name),
        pascal_case(name),
        snake_case(name),
        screaming_snake_case(name),
    ];
    let mut out: Vec<String> = Vec::new();
    for form in forms {
        if !form.is_empty() && !out.contains(&form) {
            out.push(form);
        }
    }
    out
}
