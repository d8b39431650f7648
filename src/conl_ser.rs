//! CONL rendering for the crawler config
//!
//! serde_conl can write the struct, but not the comments that make a
//! generated `crawler.conl` self-explanatory, so this writes it by hand.

use crate::config::CrawlConfig;

/// Trait for types that can be serialized to CONL
pub trait ToConl {
    fn to_conl(&self) -> String;
}

/// Escape a string value if needed for CONL
fn escape_value(s: &str) -> String {
    // Values that need quoting: start/end with space, contain = or ;, or newlines
    if s.is_empty()
        || s.starts_with(' ')
        || s.ends_with(' ')
        || s.starts_with('"')
        || s.contains(';')
        || s.contains('=')
        || s.contains('\n')
        || s.contains('\r')
    {
        let escaped = s
            .replace('\\', "\\\\")
            .replace('"', "\\\"")
            .replace('\n', "\\n")
            .replace('\r', "\\r")
            .replace('\t', "\\t");
        format!("\"{}\"", escaped)
    } else {
        s.to_string()
    }
}

impl ToConl for CrawlConfig {
    fn to_conl(&self) -> String {
        let mut lines = vec!["; tapmc-prices crawler settings".to_string(), String::new()];

        lines.push("; Query page of the wholesale price source".to_string());
        lines.push(format!("base_url = {}", escape_value(&self.base_url)));
        lines.push(format!(
            "output = {}",
            escape_value(&self.output.to_string_lossy())
        ));
        lines.push(format!("user_agent = {}", escape_value(&self.user_agent)));
        lines.push(format!("timeout_secs = {}", self.timeout_secs));
        lines.push(String::new());

        lines.push("; Random pause before every query, in milliseconds".to_string());
        lines.push(format!("delay_min_ms = {}", self.delay_min_ms));
        lines.push(format!("delay_max_ms = {}", self.delay_max_ms));
        lines.push(String::new());

        lines.push("; Incremental runs look back this many days from yesterday,".to_string());
        lines.push("; re-fetching the newest refresh_days even when already stored".to_string());
        lines.push(format!("lookback_days = {}", self.lookback_days));
        lines.push(format!("refresh_days = {}", self.refresh_days));
        lines.push(String::new());

        lines.push("; Oldest date a backfill goes to unless --to is given".to_string());
        lines.push(format!("backfill_floor = {}", self.backfill_floor.format("%Y-%m-%d")));
        lines.push(String::new());

        lines.push("; Product codes kept from the result table".to_string());
        lines.push(format!("code_prefix = {}", escape_value(&self.code_prefix)));
        lines.push(String::new());

        lines.push("; Markets to query when the page does not list any (id = name)".to_string());
        lines.push("fallback_markets".to_string());
        for (id, name) in &self.fallback_markets {
            lines.push(format!("  {} = {}", escape_value(id), escape_value(name)));
        }

        lines.join("\n") + "\n"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_escape_value() {
        assert_eq!(escape_value("hello"), "hello");
        assert_eq!(escape_value("第一市場"), "第一市場");
        assert_eq!(escape_value(" leading"), "\" leading\"");
        assert_eq!(escape_value("has;semicolon"), "\"has;semicolon\"");
        assert_eq!(escape_value("has=equals"), "\"has=equals\"");
        assert_eq!(escape_value(""), "\"\"");
    }

    #[test]
    fn test_default_config_renders_commented_sections() {
        let text = CrawlConfig::default().to_conl();
        assert!(text.starts_with("; tapmc-prices crawler settings\n"));
        assert!(text.contains("lookback_days = 7\n"));
        assert!(text.contains("backfill_floor = 2024-01-01\n"));
        assert!(text.contains("fallback_markets\n  1 = 第一市場\n  2 = 第二市場\n"));
        // The user agent carries semicolons and must be quoted
        assert!(text.contains("user_agent = \"Mozilla/5.0 (Windows NT 10.0; Win64; x64)"));
    }

    #[test]
    fn test_rendered_default_parses_back() {
        let config = CrawlConfig::default();
        let parsed = CrawlConfig::parse(&config.to_conl()).unwrap();
        assert_eq!(parsed, config);
    }
}
