//! Named argv templates for `execute_system_command` in allowlist mode.
//!
//! File format (YAML), one entry per name:
//!
//! ```yaml
//! disk_space: ["df", "-h"]
//! service_status: ["systemctl", "status", "--no-pager", "{service}"]
//! ```
//!
//! `{placeholder}` tokens are filled from the caller's `args` object. The
//! program (first token) is always literal.

use std::collections::BTreeMap;
use std::path::Path;

use hostgate_core::{ConfigError, GatewayError};
use serde_json::{Map, Value};

use crate::executor::CommandSpec;

#[derive(Debug, Clone)]
pub struct CommandAllowlist {
    templates: BTreeMap<String, Vec<String>>,
}

impl CommandAllowlist {
    pub fn builtin() -> Self {
        let templates = [
            ("disk_space", vec!["df", "-h"]),
            ("cpu_usage_top", vec!["ps", "-eo", "pid,user,%cpu,%mem,comm", "--sort=-%cpu"]),
            ("memory_usage_top", vec!["ps", "-eo", "pid,user,%cpu,%mem,comm", "--sort=-%mem"]),
            ("open_ports", vec!["ss", "-tulnp"]),
            ("uptime", vec!["uptime"]),
        ]
        .into_iter()
        .map(|(name, argv)| (name.to_string(), argv.into_iter().map(str::to_string).collect()))
        .collect();
        Self { templates }
    }

    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_yaml(&raw).map_err(|reason| ConfigError::Allowlist {
            path: path.display().to_string(),
            reason,
        })
    }

    pub fn from_yaml(raw: &str) -> Result<Self, String> {
        let templates: BTreeMap<String, Vec<String>> =
            serde_yaml::from_str(raw).map_err(|e| e.to_string())?;
        if templates.is_empty() {
            return Err("allowlist defines no commands".to_string());
        }
        for (name, argv) in &templates {
            let Some(program) = argv.first() else {
                return Err(format!("command '{name}' has an empty template"));
            };
            if program.contains('{') {
                return Err(format!("command '{name}': program must be literal"));
            }
            for token in argv {
                placeholders(token).map_err(|e| format!("command '{name}': {e}"))?;
            }
        }
        Ok(Self { templates })
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.templates.keys().map(String::as_str)
    }

    /// Resolve `name` to an argv spec, filling placeholders from `args`.
    pub fn render(&self, name: &str, args: Option<&Map<String, Value>>) -> Result<CommandSpec, GatewayError> {
        let template = self.templates.get(name).ok_or_else(|| {
            GatewayError::validation(format!(
                "command '{name}' is not in the allowlist; allowed: {}",
                self.names().collect::<Vec<_>>().join(", ")
            ))
        })?;

        let mut argv: Vec<String> = template
            .iter()
            .map(|token| fill(token, args))
            .collect::<Result<_, _>>()?;
        let program = argv.remove(0);
        Ok(CommandSpec::argv(program, argv))
    }
}

fn arg_value(args: Option<&Map<String, Value>>, key: &str) -> Result<String, GatewayError> {
    let value = match args.and_then(|a| a.get(key)) {
        Some(Value::String(s)) => s.clone(),
        Some(Value::Number(n)) => n.to_string(),
        Some(Value::Bool(b)) => b.to_string(),
        Some(_) => {
            return Err(GatewayError::validation(format!(
                "argument '{key}' must be a string, number or boolean"
            )))
        }
        None => return Err(GatewayError::validation(format!("missing argument '{key}'"))),
    };
    if value.is_empty() || value.starts_with('-') || value.contains(['\0', '\n', '\r']) {
        return Err(GatewayError::validation(format!(
            "argument '{key}' must be non-empty, single-line and must not start with '-'"
        )));
    }
    Ok(value)
}

/// Substitute every placeholder in one left-to-right pass, so text coming
/// from an argument is never scanned for placeholders itself.
fn fill(token: &str, args: Option<&Map<String, Value>>) -> Result<String, GatewayError> {
    let mut out = String::with_capacity(token.len());
    let mut rest = token;
    while let Some(start) = rest.find('{') {
        out.push_str(&rest[..start]);
        let after = &rest[start + 1..];
        let end = after
            .find('}')
            .ok_or_else(|| GatewayError::internal(format!("unclosed placeholder in '{token}'")))?;
        out.push_str(&arg_value(args, &after[..end])?);
        rest = &after[end + 1..];
    }
    out.push_str(rest);
    Ok(out)
}

/// Placeholder names in a token, e.g. `--unit={service}` yields `service`.
fn placeholders(token: &str) -> Result<Vec<String>, String> {
    let mut names = Vec::new();
    let mut rest = token;
    while let Some(start) = rest.find('{') {
        let after = &rest[start + 1..];
        let end = after
            .find('}')
            .ok_or_else(|| format!("unclosed placeholder in '{token}'"))?;
        let name = &after[..end];
        if name.is_empty() || !name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
            return Err(format!("bad placeholder '{{{name}}}' in '{token}'"));
        }
        names.push(name.to_string());
        rest = &after[end + 1..];
    }
    Ok(names)
}
