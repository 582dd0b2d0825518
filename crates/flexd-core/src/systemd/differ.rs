//! Semantic comparison of unit files and delta computation between two
//! generations of units.

use std::collections::{BTreeMap, BTreeSet};

use super::unit_parser::{self, ParsedUnit};

pub const UNIT_SUFFIXES: &[&str] = &[
    ".service", ".socket", ".device", ".mount", ".automount", ".swap", ".target", ".path", ".timer", ".slice",
    ".scope",
];

pub fn is_unit_file(name: &str) -> bool {
    UNIT_SUFFIXES.iter().any(|suffix| name.ends_with(suffix))
}

const UNIT_IGNORE_KEYS: &[&str] = &[
    "Description",
    "Documentation",
    "OnFailure",
    "OnSuccess",
    "OnFailureJobMode",
    "IgnoreOnIsolate",
    "StopWhenUnneeded",
    "RefuseManualStart",
    "RefuseManualStop",
    "AllowIsolate",
    "CollectMode",
    "SourcePath",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Comparison {
    Equal,
    NeedsReload,
    NeedsRestart,
}

fn is_ignored_unit_key(section: &str, key: &str) -> bool {
    section == "Unit" && UNIT_IGNORE_KEYS.contains(&key)
}

/// `compare(old, new)`: `Equal`, `NeedsReload`, or `NeedsRestart`, per the
/// `[Unit]`-ignore and `[Mount]`/`Options`-downgrade rules. `old` and `new`
/// are raw unit-file text, parsed internally.
pub fn compare(old_text: &str, new_text: &str) -> Comparison {
    let old = unit_parser::parse(old_text);
    let new = unit_parser::parse(new_text);
    compare_parsed(&old, &new)
}

fn compare_parsed(old: &ParsedUnit, new: &ParsedUnit) -> Comparison {
    let mut result = Comparison::Equal;
    let mut seen_sections = BTreeSet::new();

    for (section_name, old_keys) in old {
        seen_sections.insert(section_name.clone());
        match new.get(section_name) {
            None => {
                let tolerated = section_name == "Unit" && old_keys.keys().all(|k| is_ignored_unit_key(section_name, k));
                if !tolerated {
                    result = result.max(Comparison::NeedsRestart);
                }
            }
            Some(new_keys) => {
                for (key, old_values) in old_keys {
                    let mismatch = match new_keys.get(key) {
                        None => true,
                        Some(new_values) => new_values != old_values,
                    };
                    if !mismatch {
                        continue;
                    }
                    if is_ignored_unit_key(section_name, key) {
                        continue;
                    }
                    if section_name == "Mount" && key == "Options" {
                        result = result.max(Comparison::NeedsReload);
                    } else {
                        result = result.max(Comparison::NeedsRestart);
                    }
                }
            }
        }
    }

    for (section_name, new_keys) in new {
        if seen_sections.contains(section_name) {
            continue;
        }
        let tolerated = section_name == "Unit" && new_keys.keys().all(|k| is_ignored_unit_key(section_name, k));
        if !tolerated {
            result = result.max(Comparison::NeedsRestart);
        }
    }

    result
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Deltas {
    pub to_stop: Vec<String>,
    pub to_start: Vec<String>,
    pub to_restart: Vec<String>,
    pub to_reload: Vec<String>,
}

/// `compute_deltas(old_units, new_units)`: both maps are unit name to raw
/// unit-file text.
pub fn compute_deltas(old_units: &BTreeMap<String, String>, new_units: &BTreeMap<String, String>) -> Deltas {
    let old_names: BTreeSet<&String> = old_units.keys().collect();
    let new_names: BTreeSet<&String> = new_units.keys().collect();

    let mut to_stop: Vec<String> = old_names.difference(&new_names).map(|s| (*s).clone()).collect();
    let mut to_start: Vec<String> = new_names.difference(&old_names).map(|s| (*s).clone()).collect();
    let mut to_restart = Vec::new();
    let mut to_reload = Vec::new();

    for name in old_names.intersection(&new_names) {
        match compare(&old_units[*name], &new_units[*name]) {
            Comparison::Equal => {}
            Comparison::NeedsReload => to_reload.push((*name).clone()),
            Comparison::NeedsRestart => to_restart.push((*name).clone()),
        }
    }

    to_stop.sort();
    to_start.sort();
    to_restart.sort();
    to_reload.sort();
    Deltas {
        to_stop,
        to_start,
        to_restart,
        to_reload,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn install_only_change_is_equal() {
        let old = "[Unit]\nDescription=x\n\n[Install]\nWantedBy=multi-user.target\n";
        let new = "[Unit]\nDescription=x\n\n[Install]\nWantedBy=graphical.target\n";
        assert_eq!(compare(old, new), Comparison::Equal);
    }

    #[test]
    fn unit_ignore_set_does_not_trigger_restart() {
        let old = "[Unit]\nDescription=old\nOnFailure=a.service\n";
        let new = "[Unit]\nDescription=new\nOnFailure=b.service\n";
        assert_eq!(compare(old, new), Comparison::Equal);
    }

    #[test]
    fn mount_options_change_downgrades_to_reload() {
        let old = "[Mount]\nWhat=/dev/sda1\nWhere=/mnt\nOptions=defaults\n";
        let new = "[Mount]\nWhat=/dev/sda1\nWhere=/mnt\nOptions=defaults,noatime\n";
        assert_eq!(compare(old, new), Comparison::NeedsReload);
    }

    #[test]
    fn mount_options_reload_never_upgrades_existing_restart() {
        let old = "[Mount]\nWhat=/dev/sda1\nWhere=/mnt\nOptions=defaults\n[Service]\nExecStart=/bin/a\n";
        let new = "[Mount]\nWhat=/dev/sda1\nWhere=/mnt\nOptions=defaults,noatime\n[Service]\nExecStart=/bin/b\n";
        assert_eq!(compare(old, new), Comparison::NeedsRestart);
    }

    #[test]
    fn missing_non_ignored_key_triggers_restart() {
        let old = "[Service]\nExecStart=/bin/a\nRestart=always\n";
        let new = "[Service]\nExecStart=/bin/a\n";
        assert_eq!(compare(old, new), Comparison::NeedsRestart);
    }

    #[test]
    fn new_section_triggers_restart() {
        let old = "[Unit]\nDescription=x\n";
        let new = "[Unit]\nDescription=x\n[Service]\nExecStart=/bin/a\n";
        assert_eq!(compare(old, new), Comparison::NeedsRestart);
    }

    #[test]
    fn compute_deltas_partitions_and_sorts() {
        let mut old = BTreeMap::new();
        old.insert("kubelet.service".to_string(), "[Service]\nExecStart=/bin/a\n".to_string());
        old.insert("gone.service".to_string(), "[Service]\nExecStart=/bin/g\n".to_string());

        let mut new = BTreeMap::new();
        new.insert("kubelet.service".to_string(), "[Service]\nExecStart=/bin/b\n".to_string());
        new.insert("new.service".to_string(), "[Service]\nExecStart=/bin/n\n".to_string());

        let deltas = compute_deltas(&old, &new);
        assert_eq!(deltas.to_stop, vec!["gone.service".to_string()]);
        assert_eq!(deltas.to_start, vec!["new.service".to_string()]);
        assert_eq!(deltas.to_restart, vec!["kubelet.service".to_string()]);
        assert!(deltas.to_reload.is_empty());
    }

    #[test]
    fn unit_file_suffix_recognition() {
        assert!(is_unit_file("data.mount"));
        assert!(is_unit_file("kubelet.service"));
        assert!(!is_unit_file("config.toml"));
    }
}
