use std::collections::BTreeMap;
use thiserror::Error;
use tracing::warn;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ClaimParseError {
    #[error("Expected 'Claims[name] > value' but got '{0}'")]
    MissingInstructions(String),

    #[error("Invalid claim selector '{0}'")]
    InvalidClaimSelector(String),

    #[error("Invalid value selector '{0}'")]
    InvalidValueSelector(String),
}

/// Copies a claim value (or one delimited part of it) into a header, claim,
/// query parameter or path placeholder named `target`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClaimToThing {
    pub target: String,
    pub claim: String,
    pub delimiter: Option<String>,
    pub index: usize,
}

impl ClaimToThing {
    /// Parse `Claims[name] > value`, `Claims[name] > value[i] > delimiter`.
    pub fn parse(target: &str, expression: &str) -> Result<Self, ClaimParseError> {
        let parts: Vec<&str> = expression.split('>').map(str::trim).collect();
        if parts.len() < 2 || parts.len() > 3 {
            return Err(ClaimParseError::MissingInstructions(expression.to_string()));
        }

        let claim = parts[0]
            .strip_prefix("Claims[")
            .and_then(|rest| rest.strip_suffix(']'))
            .filter(|name| !name.is_empty())
            .ok_or_else(|| ClaimParseError::InvalidClaimSelector(parts[0].to_string()))?;

        let index = match parts[1] {
            "value" => 0,
            selector => selector
                .strip_prefix("value[")
                .and_then(|rest| rest.strip_suffix(']'))
                .and_then(|i| i.parse().ok())
                .ok_or_else(|| ClaimParseError::InvalidValueSelector(selector.to_string()))?,
        };

        Ok(Self {
            target: target.to_string(),
            claim: claim.to_string(),
            delimiter: parts.get(2).filter(|d| !d.is_empty()).map(|d| d.to_string()),
            index,
        })
    }

    /// Pick the configured part out of a claim value.
    pub fn select<'a>(&self, claim_value: &'a str) -> Option<&'a str> {
        match &self.delimiter {
            Some(delimiter) => claim_value.split(delimiter.as_str()).nth(self.index),
            None if self.index == 0 => Some(claim_value),
            None => None,
        }
    }
}

/// Parse a mapping table, logging and dropping malformed entries.
pub fn claims_to_things(mappings: &BTreeMap<String, String>) -> Vec<ClaimToThing> {
    mappings
        .iter()
        .filter_map(|(target, expression)| match ClaimToThing::parse(target, expression) {
            Ok(thing) => Some(thing),
            Err(e) => {
                warn!("Skipping claims mapping for '{}': {}", target, e);
                None
            }
        })
        .collect()
}

/// All claim transformations of a route.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ClaimsTransforms {
    pub to_headers: Vec<ClaimToThing>,
    pub to_claims: Vec<ClaimToThing>,
    pub to_queries: Vec<ClaimToThing>,
    pub to_downstream_path: Vec<ClaimToThing>,
}
