//! Manifest data model: the declarative input describing one generation's
//! packages and systemd units.
//!
//! The wire format is JSON with `camelCase` keys (see the crate-level docs
//! for the canonical example). Field spellings are fixed: `packagesByName`
//! and `systemdUnitsByName` are the only accepted keys for those maps.
//! `#[serde(deny_unknown_fields)]` means an input using the sibling spelling
//! observed in the field (`packageByNames`) is rejected outright rather than
//! silently ignored.

use std::collections::BTreeMap;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{EngineError, Result};

/// The full declarative input for one generation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct Manifest {
    pub version: String,
    #[serde(rename = "packagesByName")]
    pub packages_by_name: BTreeMap<String, PackageDef>,
    #[serde(rename = "systemdUnitsByName", default)]
    pub units_by_name: BTreeMap<String, UnitDef>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct PackageDef {
    pub version: String,
    pub source: SourceDef,
    #[serde(rename = "etcFiles", default)]
    pub etc_files: Vec<EtcFileEntry>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct EtcFileEntry {
    pub source: String,
    pub target: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "lowercase", deny_unknown_fields)]
pub enum SourceDef {
    Url { uri: String },
    #[serde(rename = "url+tar")]
    UrlTar { uri: String },
    #[serde(rename = "url+zip")]
    UrlZip { uri: String },
    #[serde(rename = "url+rpm")]
    UrlRpm { uri: String },
    #[serde(rename = "url+deb")]
    UrlDeb { uri: String },
    File { uri: String },
}

impl SourceDef {
    /// The `"<type>|<uri>"` string used as a fingerprint input and as the
    /// sole element of `Package::sources()` for source packages.
    pub fn fingerprint_input(&self) -> String {
        format!("{}|{}", self.type_str(), self.uri())
    }

    pub fn type_str(&self) -> &'static str {
        match self {
            SourceDef::Url { .. } => "url",
            SourceDef::UrlTar { .. } => "url+tar",
            SourceDef::UrlZip { .. } => "url+zip",
            SourceDef::UrlRpm { .. } => "url+rpm",
            SourceDef::UrlDeb { .. } => "url+deb",
            SourceDef::File { .. } => "file",
        }
    }

    pub fn uri(&self) -> &str {
        match self {
            SourceDef::Url { uri }
            | SourceDef::UrlTar { uri }
            | SourceDef::UrlZip { uri }
            | SourceDef::UrlRpm { uri }
            | SourceDef::UrlDeb { uri }
            | SourceDef::File { uri } => uri,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct UnitDef {
    pub version: String,
    #[serde(default)]
    pub packages: Vec<String>,
    #[serde(rename = "templateFile", default, skip_serializing_if = "Option::is_none")]
    pub template_file: Option<String>,
    #[serde(rename = "templateInline", default, skip_serializing_if = "Option::is_none")]
    pub template_inline: Option<String>,
}

impl UnitDef {
    /// The unit's template text, reading `template_file` from disk when
    /// that variant is used. Exactly one of the two fields must be set;
    /// `Manifest::validate` enforces the XOR before this is ever called.
    pub fn template_text(&self) -> Result<String> {
        match (&self.template_file, &self.template_inline) {
            (Some(path), None) => std::fs::read_to_string(path).map_err(EngineError::Io),
            (None, Some(inline)) => Ok(inline.clone()),
            _ => Err(EngineError::InvalidManifest(
                "unit must set exactly one of templateFile or templateInline".into(),
            )),
        }
    }
}

impl Manifest {
    /// Parse and structurally validate a manifest from JSON bytes.
    pub fn parse(bytes: &[u8]) -> Result<Self> {
        let manifest: Manifest = serde_json::from_slice(bytes)
            .map_err(|e| EngineError::InvalidManifest(e.to_string()))?;
        manifest.validate()?;
        Ok(manifest)
    }

    /// Load and validate a manifest from a file path.
    pub fn load(path: &Path) -> Result<Self> {
        let bytes = std::fs::read(path)?;
        Self::parse(&bytes)
    }

    /// Serialize as indented JSON, matching the on-disk manifest-history
    /// format written by the store manager.
    pub fn to_pretty_json(&self) -> Result<String> {
        serde_json::to_string_pretty(self).map_err(|e| EngineError::InvalidManifest(e.to_string()))
    }

    /// Structural checks beyond what serde already enforces:
    /// - `version` must be non-empty.
    /// - Every unit's `template_file` XOR `template_inline` must hold.
    /// - Every package name referenced by a unit must exist.
    pub fn validate(&self) -> Result<()> {
        if self.version.is_empty() {
            return Err(EngineError::InvalidManifest("version must not be empty".into()));
        }
        for (name, unit) in &self.units_by_name {
            let has_file = unit.template_file.is_some();
            let has_inline = unit.template_inline.is_some();
            if has_file == has_inline {
                return Err(EngineError::InvalidManifest(format!(
                    "unit \"{name}\" must set exactly one of templateFile or templateInline"
                )));
            }
            for pkg_name in &unit.packages {
                if !self.packages_by_name.contains_key(pkg_name) {
                    return Err(EngineError::InvalidManifest(format!(
                        "unit \"{name}\" references unknown package \"{pkg_name}\""
                    )));
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_json() -> &'static str {
        r#"{
            "version": "v1",
            "packagesByName": {
                "containerd": {
                    "version": "1.7",
                    "source": { "type": "file", "uri": "/tmp/cd" },
                    "etcFiles": [{ "source": "containerd/config.toml", "target": "containerd/config.toml" }]
                }
            },
            "systemdUnitsByName": {
                "containerd": {
                    "version": "1.0",
                    "packages": ["containerd"],
                    "templateInline": "[Service]\nExecStart={{ GetPackagePath \"containerd\" \"bin\" \"containerd\" }}"
                }
            }
        }"#
    }

    #[test]
    fn parses_canonical_spelling() {
        let m = Manifest::parse(sample_json().as_bytes()).unwrap();
        assert_eq!(m.version, "v1");
        assert!(m.packages_by_name.contains_key("containerd"));
    }

    #[test]
    fn rejects_alternate_spelling() {
        let bad = sample_json().replace("packagesByName", "packageByNames");
        assert!(Manifest::parse(bad.as_bytes()).is_err());
    }

    #[test]
    fn rejects_empty_version() {
        let bad = sample_json().replace("\"v1\"", "\"\"");
        assert!(Manifest::parse(bad.as_bytes()).is_err());
    }

    #[test]
    fn rejects_unit_with_both_templates() {
        let bad = sample_json().replace(
            "\"packages\": [\"containerd\"],",
            "\"packages\": [\"containerd\"], \"templateFile\": \"/x\",",
        );
        assert!(Manifest::parse(bad.as_bytes()).is_err());
    }

    #[test]
    fn rejects_unknown_package_reference() {
        let bad = sample_json().replace("\"containerd\"]", "\"missing\"]");
        assert!(Manifest::parse(bad.as_bytes()).is_err());
    }

    #[test]
    fn rejects_unknown_source_type() {
        let bad = sample_json().replace("\"type\": \"file\"", "\"type\": \"ftp\"");
        assert!(Manifest::parse(bad.as_bytes()).is_err());
    }

    #[test]
    fn round_trips_through_json() {
        let m = Manifest::parse(sample_json().as_bytes()).unwrap();
        let text = m.to_pretty_json().unwrap();
        let reparsed = Manifest::parse(text.as_bytes()).unwrap();
        assert_eq!(m, reparsed);
    }
}
