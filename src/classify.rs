//! Query classification.
//!
//! Decides whether a query is specific enough to justify the content
//! strategy, which costs one remote call per candidate page.

use once_cell::sync::Lazy;
use regex::Regex;

static SENSITIVE_TERMS: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?i)\b(passwords?|credentials?|config|configuration|setup|templates?|secrets?|tokens?|keys?|login)\b",
    )
    .expect("sensitive-term pattern is valid")
});

static EMAIL: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\b[\w.+-]+@[\w-]+(\.[\w-]+)+\b").expect("email pattern is valid")
});

static DATE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\b(\d{4}-\d{2}-\d{2}|\d{1,2}/\d{1,2}/\d{4})\b").expect("date pattern is valid")
});

/// Minimum whitespace-separated token count that alone marks a query specific.
const MIN_SPECIFIC_TOKENS: usize = 3;

/// True when the query is specific enough to scan page bodies.
pub fn should_search_content(query: &str) -> bool {
    query.split_whitespace().count() >= MIN_SPECIFIC_TOKENS
        || query.contains(['"', '\'', ':', '='])
        || SENSITIVE_TERMS.is_match(query)
        || EMAIL.is_match(query)
        || DATE.is_match(query)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sensitive_term() {
        assert!(should_search_content("password"));
        assert!(should_search_content("API Keys"));
        assert!(should_search_content("login"));
    }

    #[test]
    fn test_plain_single_word_is_not_specific() {
        assert!(!should_search_content("notes"));
        assert!(!should_search_content("roadmap planning"));
        assert!(!should_search_content(""));
    }

    #[test]
    fn test_token_count() {
        assert!(should_search_content("a b c"));
        assert!(!should_search_content("a b"));
    }

    #[test]
    fn test_email_and_dates() {
        assert!(should_search_content("a@b.com"));
        assert!(should_search_content("2024-03-15"));
        assert!(should_search_content("3/7/2024"));
    }

    #[test]
    fn test_structured_characters() {
        assert!(should_search_content("\"q4\""));
        assert!(should_search_content("env=prod"));
        assert!(should_search_content("status:done"));
    }

    #[test]
    fn test_word_boundaries_respected() {
        assert!(!should_search_content("keynote"));
        assert!(!should_search_content("setups2"));
    }

    #[test]
    fn test_order_independent() {
        assert_eq!(
            should_search_content("database password"),
            should_search_content("password database")
        );
    }
}
