use regex_lite::Regex;

use crate::config::PermittedOptions;
use crate::error::{Error, Result};

/// Compiled form of a [`PermittedOptions`] entry
#[derive(Debug)]
pub(crate) struct PermittedRule {
    address: Option<String>,
    pattern: Option<Regex>,
    requires_auth: bool,
}

impl PermittedRule {
    fn compile(options: &PermittedOptions) -> Result<Self> {
        let pattern = options
            .address_re
            .as_deref()
            .map(|re| {
                Regex::new(&format!("^(?:{re})$"))
                    .map_err(|e| Error::Config(format!("invalid address_re {re:?}: {e}")))
            })
            .transpose()?;
        Ok(Self {
            address: options.address.clone(),
            pattern,
            requires_auth: options.requires_auth,
        })
    }

    fn matches(&self, address: &str) -> bool {
        if let Some(exact) = &self.address {
            if exact != address {
                return false;
            }
        }
        match &self.pattern {
            Some(pattern) => pattern.is_match(address),
            None => true,
        }
    }

    pub(crate) fn requires_auth(&self) -> bool {
        self.requires_auth
    }
}

/// Ordered rule list; the first matching rule decides
#[derive(Debug, Default)]
pub(crate) struct PermittedRules(Vec<PermittedRule>);

impl PermittedRules {
    pub(crate) fn compile(options: &[PermittedOptions]) -> Result<Self> {
        options
            .iter()
            .map(PermittedRule::compile)
            .collect::<Result<Vec<_>>>()
            .map(Self)
    }

    pub(crate) fn find(&self, address: &str) -> Option<&PermittedRule> {
        self.0.iter().find(|rule| rule.matches(address))
    }
}
