//! Syntax of permission rule strings.
//!
//! `Tool` or `Tool(pattern)`. Config validation and the policy gate both split
//! rules here; the gate then compiles the globs.

use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum RuleSyntaxError {
    #[error("missing closing parenthesis")]
    UnclosedParen,

    #[error("empty tool name")]
    EmptyToolName,
}

/// A rule split into its tool-name glob and optional argument pattern.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RuleSyntax<'a> {
    pub tool: &'a str,
    pub argument: Option<&'a str>,
}

impl<'a> RuleSyntax<'a> {
    pub fn parse(rule: &'a str) -> Result<Self, RuleSyntaxError> {
        let rule = rule.trim();
        let (tool, argument) = match rule.split_once('(') {
            Some((tool, rest)) => {
                let pattern = rest.strip_suffix(')').ok_or(RuleSyntaxError::UnclosedParen)?;
                (tool.trim(), Some(pattern))
            }
            None => (rule, None),
        };
        if tool.is_empty() {
            return Err(RuleSyntaxError::EmptyToolName);
        }
        Ok(Self { tool, argument })
    }

    /// The argument pattern, unless it matches everything (`*` or empty).
    pub fn restricting_argument(&self) -> Option<&'a str> {
        self.argument.filter(|p| !p.is_empty() && *p != "*")
    }
}
