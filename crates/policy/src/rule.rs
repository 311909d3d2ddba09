//! Static permission rules.
//!
//! A rule is either a bare tool name (`"WebFetch"`) or a tool name with an
//! argument pattern (`"Bash(git status:*)"`, `"Edit(src/*)"`). Patterns use
//! `*` as a wildcard; a trailing `:*` matches any argument starting with the
//! text before it.

use conductor_core::RuleSyntax;
use regex_lite::Regex;
use serde_json::Value;

use crate::PolicyError;

/// Input keys checked, in order, for the argument a pattern is matched against.
const PRIMARY_ARGUMENT_KEYS: &[&str] = &["command", "file_path", "path", "url", "pattern"];

/// A parsed allow or deny rule.
#[derive(Debug, Clone)]
pub struct PermissionRule {
    source: String,
    tool: Regex,
    argument: Option<Regex>,
}

impl PermissionRule {
    pub fn parse(rule: &str) -> Result<Self, PolicyError> {
        let invalid = |reason: &str| PolicyError::InvalidRule {
            rule: rule.to_string(),
            reason: reason.to_string(),
        };

        let syntax = RuleSyntax::parse(rule).map_err(|e| invalid(&e.to_string()))?;
        let tool = glob_to_regex(syntax.tool, false).map_err(|e| invalid(&e.to_string()))?;
        let argument = match syntax.restricting_argument() {
            Some(pattern) => Some(glob_to_regex(pattern, true).map_err(|e| invalid(&e.to_string()))?),
            None => None,
        };

        Ok(Self {
            source: rule.trim().to_string(),
            tool,
            argument,
        })
    }

    /// The rule as written.
    pub fn as_str(&self) -> &str {
        &self.source
    }

    pub fn matches(&self, tool_name: &str, input: &Value) -> bool {
        if !self.tool.is_match(tool_name) {
            return false;
        }
        match &self.argument {
            Some(pattern) => pattern.is_match(&primary_argument(input)),
            None => true,
        }
    }
}

/// The text an argument pattern is tested against.
pub fn primary_argument(input: &Value) -> String {
    PRIMARY_ARGUMENT_KEYS
        .iter()
        .find_map(|key| input.get(*key).and_then(Value::as_str))
        .map(str::to_string)
        .unwrap_or_else(|| input.to_string())
}

fn glob_to_regex(glob: &str, allow_prefix_suffix: bool) -> Result<Regex, regex_lite::Error> {
    let (body, prefix_only) = match glob.strip_suffix(":*") {
        Some(body) if allow_prefix_suffix => (body, true),
        _ => (glob, false),
    };

    let escaped: Vec<String> = body.split('*').map(regex_lite::escape).collect();
    let mut pattern = format!("^{}", escaped.join(".*"));
    if prefix_only {
        pattern.push_str(".*");
    }
    pattern.push('$');
    Regex::new(&pattern)
}
