//! Turns the user's exception list into one synthetic content-blocker rule.

use std::collections::BTreeSet;

use blocklist_core::ExceptionsList;
use serde_json::{json, Map, Value};

/// Matches any scheme, optional userinfo and any subdomain in front of the
/// escaped host.
const TOP_URL_PREFIX: &str = r"^[a-z][a-z0-9.+-]*:(\/\/)?(([^\/]+@)?[^@:\/\[]+\.)?";
const TOP_URL_SUFFIX: &str = r"[:\/]";

/// Compile `exceptions` into an `ignore-previous-rules` rule.
///
/// Returns `None` for an empty set. For [`ExceptionsList::ExemptList`] the
/// rule fires on the listed sites; for [`ExceptionsList::ProcessList`] it
/// fires everywhere else, so only the listed sites stay filtered.
pub fn compile_exceptions_rule(exceptions: &BTreeSet<String>, list: ExceptionsList) -> Option<Value> {
    let patterns: Vec<String> = exceptions
        .iter()
        .map(|domain| domain.trim().trim_end_matches('.').to_ascii_lowercase())
        .filter(|domain| !domain.is_empty())
        .map(|domain| top_url_pattern(&domain))
        .collect();

    if patterns.is_empty() {
        return None;
    }

    let condition = match list {
        ExceptionsList::ExemptList => "if-top-url",
        ExceptionsList::ProcessList => "unless-top-url",
    };

    let mut trigger = Map::new();
    trigger.insert("url-filter".to_string(), json!(".*"));
    trigger.insert(condition.to_string(), json!(patterns));
    trigger.insert("top-url-filter-is-case-sensitive".to_string(), json!(true));

    Some(json!({
        "action": { "type": "ignore-previous-rules" },
        "trigger": trigger,
    }))
}

fn top_url_pattern(domain: &str) -> String {
    format!("{TOP_URL_PREFIX}{}{TOP_URL_SUFFIX}", regex::escape(domain))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn set(domains: &[&str]) -> BTreeSet<String> {
        domains.iter().map(|d| d.to_string()).collect()
    }

    #[test]
    fn empty_set_compiles_to_none() {
        assert!(compile_exceptions_rule(&BTreeSet::new(), ExceptionsList::ExemptList).is_none());
        assert!(compile_exceptions_rule(&BTreeSet::new(), ExceptionsList::ProcessList).is_none());
    }

    #[test]
    fn blank_entries_are_ignored() {
        assert!(compile_exceptions_rule(&set(&["  ", "."]), ExceptionsList::ExemptList).is_none());
    }

    #[test]
    fn exempt_list_uses_if_top_url() {
        let rule = compile_exceptions_rule(&set(&["example.com"]), ExceptionsList::ExemptList).unwrap();
        assert_eq!(rule["action"]["type"], "ignore-previous-rules");
        let patterns = rule["trigger"]["if-top-url"].as_array().unwrap();
        assert_eq!(patterns.len(), 1);
        assert!(patterns[0].as_str().unwrap().contains(r"example\.com[:\/]"));
        assert!(rule["trigger"].get("unless-top-url").is_none());
    }

    #[test]
    fn process_list_uses_unless_top_url() {
        let rule = compile_exceptions_rule(&set(&["b.org", "a.org"]), ExceptionsList::ProcessList).unwrap();
        let patterns = rule["trigger"]["unless-top-url"].as_array().unwrap();
        // Sorted input gives sorted output.
        assert!(patterns[0].as_str().unwrap().contains(r"a\.org"));
        assert!(patterns[1].as_str().unwrap().contains(r"b\.org"));
    }

    #[test]
    fn compilation_is_deterministic() {
        let exceptions = set(&["x.net", "y.net"]);
        let a = compile_exceptions_rule(&exceptions, ExceptionsList::ExemptList).unwrap();
        let b = compile_exceptions_rule(&exceptions, ExceptionsList::ExemptList).unwrap();
        assert_eq!(serde_json::to_string(&a).unwrap(), serde_json::to_string(&b).unwrap());
    }

    #[test]
    fn domain_characters_are_escaped() {
        assert_eq!(
            top_url_pattern("my-site.example"),
            format!(r"{TOP_URL_PREFIX}my\-site\.example{TOP_URL_SUFFIX}")
        );
        assert!(top_url_pattern("a+b(c)").contains(r"a\+b\(c\)"));
    }

    #[test]
    fn pattern_matches_site_and_subdomains_only() {
        let rule = compile_exceptions_rule(&set(&["My-Site.example."]), ExceptionsList::ExemptList).unwrap();
        let pattern = rule["trigger"]["if-top-url"][0].as_str().unwrap();
        let re = regex::Regex::new(pattern).unwrap();

        assert!(re.is_match("https://my-site.example/"));
        assert!(re.is_match("https://user@www.my-site.example:8080/path"));
        assert!(!re.is_match("https://my-siteXexample/"));
        assert!(!re.is_match("https://notmy-site.example/"));
        assert!(!re.is_match("https://my-site.example.evil/"));
    }
}
