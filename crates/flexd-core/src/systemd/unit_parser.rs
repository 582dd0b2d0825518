//! Unit-file parsing into `section -> key -> ordered[value]`.

use std::collections::BTreeMap;

pub type ParsedUnit = BTreeMap<String, BTreeMap<String, Vec<String>>>;

/// Parse unit-file text. `[Install]` is elided; lines before the first
/// section header and comment lines (`#`, `;`) are ignored. An empty
/// value (`Key=`) clears any values already accumulated for that key,
/// matching systemd's override semantics.
pub fn parse(text: &str) -> ParsedUnit {
    let mut sections: ParsedUnit = BTreeMap::new();
    let mut current: Option<String> = None;

    for raw_line in text.lines() {
        let line = raw_line.trim();
        if line.is_empty() || line.starts_with('#') || line.starts_with(';') {
            continue;
        }
        if let Some(name) = line.strip_prefix('[').and_then(|rest| rest.strip_suffix(']')) {
            current = if name == "Install" { None } else { Some(name.to_string()) };
            if let Some(name) = &current {
                sections.entry(name.clone()).or_default();
            }
            continue;
        }
        let Some(section_name) = &current else { continue };
        let Some((key, value)) = line.split_once('=') else { continue };
        let key = key.trim().to_string();
        let value = value.trim().to_string();

        let section = sections.entry(section_name.clone()).or_default();
        if value.is_empty() {
            section.insert(key, Vec::new());
        } else {
            section.entry(key).or_default().push(value);
        }
    }
    sections
}
