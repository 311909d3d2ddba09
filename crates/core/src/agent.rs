//! Permission modes and subagent definitions.

use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// Named policy preset controlling default tool authorization.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PermissionMode {
    /// Safe tools run; everything else goes to the decision callback
    #[default]
    Default,
    /// Safe tools and file edits run without asking
    AcceptEdits,
    /// Read-only: safe tools run, everything else is denied
    Plan,
    /// Everything runs (static deny rules still apply)
    BypassPermissions,
}

impl PermissionMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Default => "default",
            Self::AcceptEdits => "accept_edits",
            Self::Plan => "plan",
            Self::BypassPermissions => "bypass_permissions",
        }
    }
}

impl std::fmt::Display for PermissionMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PermissionMode {
    type Err = String;

    /// Accepts snake_case and the camelCase spellings used by settings files.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "default" => Ok(Self::Default),
            "accept_edits" | "acceptEdits" => Ok(Self::AcceptEdits),
            "plan" => Ok(Self::Plan),
            "bypass_permissions" | "bypassPermissions" => Ok(Self::BypassPermissions),
            other => Err(format!("unknown permission mode '{other}'")),
        }
    }
}

/// A named subagent type the model can delegate to.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AgentDefinition {
    /// Shown to the model in the delegation tool's description
    pub description: String,

    /// System prompt for the nested run
    pub prompt: String,

    /// Tool names the subagent may use; `None` inherits the parent's tools
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tools: Option<Vec<String>>,

    /// Model override; `None` uses the parent's model
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mode_defaults_to_default() {
        assert_eq!(PermissionMode::default(), PermissionMode::Default);
    }

    #[test]
    fn mode_parses_both_spellings() {
        assert_eq!("acceptEdits".parse::<PermissionMode>().unwrap(), PermissionMode::AcceptEdits);
        assert_eq!(
            "bypass_permissions".parse::<PermissionMode>().unwrap(),
            PermissionMode::BypassPermissions
        );
        assert!("yolo".parse::<PermissionMode>().is_err());
    }

    #[test]
    fn mode_roundtrips_through_display() {
        for mode in [
            PermissionMode::Default,
            PermissionMode::AcceptEdits,
            PermissionMode::Plan,
            PermissionMode::BypassPermissions,
        ] {
            assert_eq!(mode.to_string().parse::<PermissionMode>().unwrap(), mode);
        }
    }

    #[test]
    fn agent_definition_from_toml_like_json() {
        let def: AgentDefinition = serde_json::from_value(serde_json::json!({
            "description": "Searches the codebase",
            "prompt": "You search.",
            "tools": ["Grep", "Read"]
        }))
        .unwrap();
        assert_eq!(def.tools.as_deref(), Some(&["Grep".to_string(), "Read".to_string()][..]));
        assert!(def.model.is_none());
    }
}
