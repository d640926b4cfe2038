/// Turn whatever was typed into an https URL. An empty entry opens `new_tab_url`.
pub fn normalize_address(input: &str, new_tab_url: &str) -> String {
    let input = input.trim();
    if input.is_empty() {
        return new_tab_url.to_string();
    }

    match input.split_once("://") {
        Some((_, rest)) => format!("https://{}", rest),
        None => format!("https://{}", input.trim_start_matches("//")),
    }
}

/// Landing page first, then the requested pages (or a blank new tab).
pub fn tabs(landing_url: &str, new_tab_url: &str, requested: &[String]) -> Vec<String> {
    let mut tabs = vec![landing_url.to_string()];
    if requested.is_empty() {
        tabs.push(new_tab_url.to_string());
    } else {
        tabs.extend(requested.iter().map(|url| normalize_address(url, new_tab_url)));
    }
    tabs
}

#[cfg(test)]
mod tests {
    use super::*;

    const NEW_TAB: &str = "https://ddg.gg";

    #[test]
    fn test_scheme_forced_to_https() {
        assert_eq!(
            normalize_address("http://example.com/a?b=c", NEW_TAB),
            "https://example.com/a?b=c"
        );
        assert_eq!(normalize_address("example.com", NEW_TAB), "https://example.com");
        assert_eq!(normalize_address("//example.com/x", NEW_TAB), "https://example.com/x");
        assert_eq!(normalize_address("  https://ddg.gg  ", NEW_TAB), "https://ddg.gg");
    }

    #[test]
    fn test_empty_address_opens_new_tab() {
        assert_eq!(normalize_address("   ", NEW_TAB), NEW_TAB);
    }

    #[test]
    fn test_tabs_order() {
        let landing = "https://check.torproject.org";
        assert_eq!(tabs(landing, NEW_TAB, &[]), vec![landing, NEW_TAB]);
        assert_eq!(
            tabs(landing, NEW_TAB, &["http://a.example".to_string(), "b.example".to_string()]),
            vec![landing, "https://a.example", "https://b.example"]
        );
    }
}
