//! Alternate selector rewrites for element-not-found recovery

use std::sync::OnceLock;

use regex::Regex;

fn attribute_value() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r#"\[\s*[\w:-]+\s*[*^$~|]?=\s*["']?([^"'\]]+?)["']?\s*\]"#).expect("static regex")
    })
}

fn id_or_class() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"[#.]([A-Za-z_][\w-]*)").expect("static regex"))
}

fn bare_ident() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^([A-Za-z_][\w-]*)").expect("static regex"))
}

/// The identifying token of a selector: the attribute value, the last
/// id/class name, or the tag of its last compound, in that order.
pub fn key_token(selector: &str) -> Option<String> {
    let last = selector
        .split(|c: char| c.is_whitespace() || c == '>')
        .filter(|part| !part.is_empty())
        .last()?;

    if let Some(caps) = attribute_value().captures(last) {
        return Some(caps[1].trim().to_string());
    }
    if let Some(caps) = id_or_class().captures_iter(last).last() {
        return Some(caps[1].to_string());
    }
    bare_ident().captures(last).map(|caps| caps[1].to_string())
}

/// Ordered rewrites of `selector`: id-attribute form, class-attribute form,
/// text-contains XPath form. Forms equal to the original are dropped.
pub fn alternatives(selector: &str) -> Vec<String> {
    let Some(token) = key_token(selector) else {
        return Vec::new();
    };
    let candidates = [
        format!("[id=\"{}\"]", token),
        format!("[class*=\"{}\"]", token),
        format!("xpath=//*[contains(text(), \"{}\")]", token),
    ];
    let mut out: Vec<String> = Vec::with_capacity(candidates.len());
    for candidate in candidates {
        if candidate != selector && !out.contains(&candidate) {
            out.push(candidate);
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;

    #[test_case("#login-button", Some("login-button"))]
    #[test_case(".btn.btn-primary", Some("btn-primary"))]
    #[test_case("[data-testid=\"submit\"]", Some("submit"))]
    #[test_case("input[name='email']", Some("email"))]
    #[test_case("form > button", Some("button"))]
    #[test_case("nav a.active", Some("active"))]
    #[test_case("   ", None)]
    fn test_key_token(selector: &str, expected: Option<&str>) {
        assert_eq!(key_token(selector).as_deref(), expected);
    }

    #[test]
    fn test_alternatives_are_ordered() {
        assert_eq!(
            alternatives("#login-button"),
            vec![
                "[id=\"login-button\"]".to_string(),
                "[class*=\"login-button\"]".to_string(),
                "xpath=//*[contains(text(), \"login-button\")]".to_string(),
            ]
        );
    }

    #[test]
    fn test_alternatives_skip_the_original() {
        let alts = alternatives("[id=\"email\"]");
        assert_eq!(alts.len(), 2);
        assert_eq!(alts[0], "[class*=\"email\"]");
    }

    #[test]
    fn test_no_token_no_alternatives() {
        assert!(alternatives("*::").is_empty());
        assert!(alternatives("").is_empty());
    }
}
