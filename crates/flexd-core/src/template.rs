//! Systemd unit template rendering.
//!
//! Templates are plain text with `{{ ... }}` substitution sites; everything
//! outside those sites (shell fragments, systemd directives) is copied
//! byte-for-byte. Three helpers are recognized inside a site:
//!
//! - `GetPathEnv` — all referenced packages' `bin/` paths, sorted, joined by `:`.
//! - `GetPathEnvWithSystemDefaults` — `GetPathEnv` plus the standard system PATH suffix.
//! - `GetPackagePath "name" "sub" ...` — `<state of name>/sub/...`.

use std::collections::BTreeMap;
use std::path::Path;

use regex::Regex;

use crate::error::{EngineError, Result};

const SYSTEM_PATH_SUFFIX: &str = "/usr/local/sbin:/usr/local/bin:/usr/sbin:/usr/bin:/sbin:/bin";

/// The resolved state directories of a unit's dependencies, by package name.
pub struct TemplateContext<'a> {
    pub package_states: &'a BTreeMap<String, &'a Path>,
}

impl<'a> TemplateContext<'a> {
    fn get_path_env(&self) -> String {
        let mut bin_paths: Vec<String> = self
            .package_states
            .values()
            .filter_map(|state| {
                let bin = state.join("bin");
                bin.is_dir().then(|| bin.display().to_string())
            })
            .collect();
        bin_paths.sort();
        bin_paths.join(":")
    }

    fn get_path_env_with_system_defaults(&self) -> String {
        let hermetic = self.get_path_env();
        if hermetic.is_empty() {
            SYSTEM_PATH_SUFFIX.to_string()
        } else {
            format!("{hermetic}:{SYSTEM_PATH_SUFFIX}")
        }
    }

    fn get_package_path(&self, pkg_name: &str, sub_paths: &[String]) -> Result<String> {
        let state = self.package_states.get(pkg_name).ok_or_else(|| {
            EngineError::InvalidManifest(format!(
                "template references package \"{pkg_name}\" which is not a declared dependency"
            ))
        })?;
        let mut path = state.to_path_buf();
        for part in sub_paths {
            path.push(part);
        }
        Ok(path.display().to_string())
    }
}

fn quoted_args(rest: &str) -> Vec<String> {
    let arg_re = Regex::new(r#""([^"]*)""#).unwrap();
    arg_re
        .captures_iter(rest)
        .map(|c| c[1].to_string())
        .collect()
}

/// Render `template` against `ctx`, replacing every `{{ ... }}` site.
pub fn render(template: &str, ctx: &TemplateContext<'_>) -> Result<String> {
    let site_re = Regex::new(r"\{\{\s*(.*?)\s*\}\}").unwrap();
    let mut out = String::with_capacity(template.len());
    let mut last_end = 0;

    for m in site_re.find_iter(template) {
        out.push_str(&template[last_end..m.start()]);
        let expr = &site_re.captures(m.as_str()).unwrap()[1];
        out.push_str(&eval_expr(expr, ctx)?);
        last_end = m.end();
    }
    out.push_str(&template[last_end..]);
    Ok(out)
}

fn eval_expr(expr: &str, ctx: &TemplateContext<'_>) -> Result<String> {
    let expr = expr.trim();
    if expr == "GetPathEnv" {
        return Ok(ctx.get_path_env());
    }
    if expr == "GetPathEnvWithSystemDefaults" {
        return Ok(ctx.get_path_env_with_system_defaults());
    }
    if let Some(rest) = expr.strip_prefix("GetPackagePath") {
        let mut args = quoted_args(rest);
        if args.is_empty() {
            return Err(EngineError::InvalidManifest(
                "GetPackagePath requires at least a package name argument".into(),
            ));
        }
        let pkg_name = args.remove(0);
        return ctx.get_package_path(&pkg_name, &args);
    }
    Err(EngineError::InvalidManifest(format!(
        "unrecognized template expression: {expr}"
    )))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ctx_with<'a>(map: &'a BTreeMap<String, &'a Path>) -> TemplateContext<'a> {
        TemplateContext { package_states: map }
    }

    #[test]
    fn renders_get_package_path() {
        let mut states: BTreeMap<String, &Path> = BTreeMap::new();
        let state_path = Path::new("/aks-flex/states/containerd-ABC123");
        states.insert("containerd".to_string(), state_path);
        let ctx = ctx_with(&states);

        let rendered = render(
            "[Service]\nExecStart={{ GetPackagePath \"containerd\" \"bin\" \"containerd\" }}",
            &ctx,
        )
        .unwrap();
        assert_eq!(
            rendered,
            "[Service]\nExecStart=/aks-flex/states/containerd-ABC123/bin/containerd"
        );
    }

    #[test]
    fn fails_on_unknown_package() {
        let states: BTreeMap<String, &Path> = BTreeMap::new();
        let ctx = ctx_with(&states);
        assert!(render("{{ GetPackagePath \"missing\" }}", &ctx).is_err());
    }

    #[test]
    fn preserves_literal_text_outside_sites() {
        let states: BTreeMap<String, &Path> = BTreeMap::new();
        let ctx = ctx_with(&states);
        let text = "#!/bin/sh\n# single braces like ${FOO} are left untouched\nPATH={{ GetPathEnv }}";
        let rendered = render(text, &ctx).unwrap();
        assert!(rendered.starts_with("#!/bin/sh\n# single braces like ${FOO} are left untouched\nPATH="));
    }

    #[test]
    fn get_path_env_with_system_defaults_appends_suffix() {
        let states: BTreeMap<String, &Path> = BTreeMap::new();
        let ctx = ctx_with(&states);
        let rendered = render("{{ GetPathEnvWithSystemDefaults }}", &ctx).unwrap();
        assert_eq!(
            rendered,
            "/usr/local/sbin:/usr/local/bin:/usr/sbin:/usr/bin:/sbin:/bin"
        );
    }
}
