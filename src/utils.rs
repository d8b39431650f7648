use std::fs;

/// Create an OSC8 file:// hyperlink for terminal output
pub fn osc8_file_link(path: &str, text: &str) -> String {
    let abs_path = fs::canonicalize(path)
        .map(|p| p.to_string_lossy().to_string())
        .unwrap_or_else(|_| path.to_string());
    format!("\x1b]8;;file://{}\x1b\\{}\x1b]8;;\x1b\\", abs_path, text)
}

/// Parse locale-formatted numeric text ("1,234", " 88 ", "12.5")
/// Anything unparseable, including "-" placeholders, becomes 0
pub fn parse_number(text: &str) -> f64 {
    let cleaned: String = text
        .trim()
        .chars()
        .filter(|c| *c != ',' && !c.is_whitespace())
        .collect();
    match cleaned.parse::<f64>() {
        Ok(v) if v.is_finite() => v,
        _ => 0.0,
    }
}

/// Plain numeric text: whole numbers without a fraction, no grouping
pub fn format_number(value: f64) -> String {
    value.to_string()
}

/// Collapse runs of whitespace (including nbsp and newlines) into single spaces
pub fn clean_text<'a>(fragments: impl Iterator<Item = &'a str>) -> String {
    let mut cleaned = String::new();
    let mut prev_was_space = false;
    for c in fragments.flat_map(str::chars) {
        if c.is_whitespace() {
            if !prev_was_space && !cleaned.is_empty() {
                cleaned.push(' ');
                prev_was_space = true;
            }
        } else {
            cleaned.push(c);
            prev_was_space = false;
        }
    }
    cleaned.trim_end().to_string()
}
