//! Template rendering — placeholder substitution.
//!
//! Bodies mix named placeholders (`{{cliente}}`) with 1-based positional ones
//! (`{{1}}`, `{{2}}`, …). Each parameter, in insertion order, binds both its
//! name and its position; the position advances once per parameter no matter
//! how many named occurrences it replaced. Substitution is a single pass over
//! the original body, so a replacement value containing placeholder syntax is
//! never itself expanded.

use std::collections::HashMap;
use std::sync::LazyLock;

use regex::Regex;

static PLACEHOLDER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\{\{([^{}]+)\}\}").expect("placeholder regex is valid"));

/// Render a template body against an ordered parameter list.
///
/// Placeholders with no matching parameter are left untouched. Rendering is
/// idempotent once the output contains no placeholders.
pub fn render(body: &str, parameters: &[(String, String)]) -> String {
    let positions: Vec<String> = (1..=parameters.len()).map(|p| p.to_string()).collect();

    let mut bindings: HashMap<&str, &str> = HashMap::new();
    for (key, value) in parameters {
        bindings.entry(key.as_str()).or_insert(value.as_str());
    }
    for (position, (_, value)) in parameters.iter().enumerate() {
        // Named keys win over a colliding positional index.
        bindings
            .entry(positions[position].as_str())
            .or_insert(value.as_str());
    }

    PLACEHOLDER
        .replace_all(body, |caps: &regex::Captures<'_>| {
            match bindings.get(&caps[1]) {
                Some(value) => (*value).to_string(),
                None => caps[0].to_string(),
            }
        })
        .into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params(pairs: &[(&str, &str)]) -> Vec<(String, String)> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn named_placeholder_substituted() {
        let out = render("Hello {{name}}!", &params(&[("name", "Ana")]));
        assert_eq!(out, "Hello Ana!");
    }

    #[test]
    fn positional_placeholder_substituted() {
        let out = render(
            "Order {{1}} ships on {{2}}.",
            &params(&[("order", "123"), ("date", "Friday")]),
        );
        assert_eq!(out, "Order 123 ships on Friday.");
    }

    #[test]
    fn named_and_positional_bind_the_same_parameter() {
        let out = render(
            "{{name}} ({{1}}) confirmed.",
            &params(&[("name", "Ana")]),
        );
        assert_eq!(out, "Ana (Ana) confirmed.");
    }

    #[test]
    fn position_advances_once_per_parameter() {
        // First parameter appears three times by name; the second parameter
        // is still position 2.
        let out = render(
            "{{a}} {{a}} {{a}} then {{2}}",
            &params(&[("a", "x"), ("b", "y")]),
        );
        assert_eq!(out, "x x x then y");
    }

    #[test]
    fn every_occurrence_replaced() {
        let out = render(
            "{{name}}, yes {{name}}, you {{name}}",
            &params(&[("name", "Rui")]),
        );
        assert_eq!(out, "Rui, yes Rui, you Rui");
    }

    #[test]
    fn replacement_value_is_not_re_expanded() {
        // The first value injects placeholder syntax; it must survive verbatim.
        let out = render(
            "{{a}} and {{b}}",
            &params(&[("a", "{{b}}"), ("b", "safe")]),
        );
        assert_eq!(out, "{{b}} and safe");
    }

    #[test]
    fn unknown_placeholder_left_alone() {
        let out = render("Hi {{missing}}!", &params(&[("name", "Ana")]));
        assert_eq!(out, "Hi {{missing}}!");
    }

    #[test]
    fn empty_parameters_is_identity() {
        let out = render("Hi {{name}}", &[]);
        assert_eq!(out, "Hi {{name}}");
    }

    #[test]
    fn rendering_is_idempotent_once_resolved() {
        let p = params(&[("name", "Ana")]);
        let once = render("Hello {{name}}", &p);
        let twice = render(&once, &p);
        assert_eq!(once, twice);
    }

    #[test]
    fn named_key_wins_over_colliding_position() {
        // A parameter literally named "2" shadows the second position.
        let out = render(
            "{{2}}",
            &params(&[("2", "named"), ("other", "positional")]),
        );
        assert_eq!(out, "named");
    }
}
