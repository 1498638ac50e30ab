//! English inflection for link-field names (`city` → `cities___NODE`).
//!
//! Covers regular suffix rules plus a small irregular/uncountable table, which
//! is all entity names coming out of SQL schemas tend to need.

const IRREGULAR: &[(&str, &str)] = &[
    ("person", "people"),
    ("man", "men"),
    ("woman", "women"),
    ("child", "children"),
    ("mouse", "mice"),
    ("goose", "geese"),
    ("foot", "feet"),
    ("tooth", "teeth"),
    ("ox", "oxen"),
    ("leaf", "leaves"),
    ("life", "lives"),
    ("knife", "knives"),
    ("wife", "wives"),
    ("half", "halves"),
    ("shelf", "shelves"),
    ("wolf", "wolves"),
];

const UNCOUNTABLE: &[&str] = &[
    "sheep",
    "fish",
    "deer",
    "series",
    "species",
    "news",
    "information",
    "equipment",
    "metadata",
    "data",
];

/// Plural form of an entity name.
pub fn pluralize(word: &str) -> String {
    if word.is_empty() {
        return String::new();
    }
    let lower = word.to_lowercase();
    if is_uncountable(&lower) {
        return word.to_string();
    }
    if let Some((_, plural)) = IRREGULAR.iter().find(|(s, p)| lower == *s || lower == *p) {
        return match_case(word, plural);
    }

    if ends_with_consonant_y(&lower) {
        return format!("{}ies", &word[..word.len() - 1]);
    }
    if ["sses", "shes", "ches", "xes", "zes", "ies"].iter().any(|suffix| lower.ends_with(suffix)) {
        return word.to_string();
    }
    if ["s", "x", "z", "ch", "sh"].iter().any(|suffix| lower.ends_with(suffix)) {
        return format!("{}es", word);
    }
    format!("{}s", word)
}

/// Singular form of an entity name.
pub fn singularize(word: &str) -> String {
    let lower = word.to_lowercase();
    if is_uncountable(&lower) {
        return word.to_string();
    }
    if let Some((singular, _)) = IRREGULAR.iter().find(|(s, p)| lower == *s || lower == *p) {
        return match_case(word, singular);
    }

    if lower.len() > 3 && lower.ends_with("ies") {
        return format!("{}y", &word[..word.len() - 3]);
    }
    if ["sses", "shes", "ches", "xes", "zes"].iter().any(|suffix| lower.ends_with(suffix)) {
        return word[..word.len() - 2].to_string();
    }
    if ["ss", "us", "is"].iter().any(|suffix| lower.ends_with(suffix)) {
        return word.to_string();
    }
    if lower.ends_with('s') {
        return word[..word.len() - 1].to_string();
    }
    word.to_string()
}

fn is_uncountable(lower: &str) -> bool {
    UNCOUNTABLE.iter().any(|w| lower.ends_with(w))
}

fn ends_with_consonant_y(lower: &str) -> bool {
    let mut chars = lower.chars().rev();
    match (chars.next(), chars.next()) {
        (Some('y'), Some(c)) => !"aeiou".contains(c),
        _ => false,
    }
}

/// Carry the casing of `original` (ALL CAPS or Capitalized) over to `replacement`.
fn match_case(original: &str, replacement: &str) -> String {
    if original.len() > 1 && original.chars().all(|c| !c.is_alphabetic() || c.is_uppercase()) {
        return replacement.to_uppercase();
    }
    let mut chars = replacement.chars();
    match (original.chars().next(), chars.next()) {
        (Some(first), Some(head)) if first.is_uppercase() => {
            head.to_uppercase().chain(chars).collect()
        }
        _ => replacement.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pluralize_regular() {
        assert_eq!(pluralize("city"), "cities");
        assert_eq!(pluralize("country"), "countries");
        assert_eq!(pluralize("countrycapital"), "countrycapitals");
        assert_eq!(pluralize("box"), "boxes");
        assert_eq!(pluralize("church"), "churches");
        assert_eq!(pluralize("day"), "days");
    }

    #[test]
    fn test_pluralize_irregular_and_uncountable() {
        assert_eq!(pluralize("person"), "people");
        assert_eq!(pluralize("Person"), "People");
        assert_eq!(pluralize("people"), "people");
        assert_eq!(pluralize("sheep"), "sheep");
    }

    #[test]
    fn test_pluralize_is_idempotent_on_plurals() {
        assert_eq!(pluralize("cities"), "cities");
        assert_eq!(pluralize("addresses"), "addresses");
    }

    #[test]
    fn test_singularize() {
        assert_eq!(singularize("cities"), "city");
        assert_eq!(singularize("countrycapital"), "countrycapital");
        assert_eq!(singularize("boxes"), "box");
        assert_eq!(singularize("address"), "address");
        assert_eq!(singularize("status"), "status");
        assert_eq!(singularize("people"), "person");
        assert_eq!(singularize("capitals"), "capital");
    }
}
