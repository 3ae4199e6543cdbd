use std::collections::{BTreeMap, BTreeSet};

use serde::Serialize;

use crate::error::{CompileError, Location, Result};
use crate::primitives::{EACH, TEMP_SIGNALS};

/// Lexical naming state of a block: user aliases and scratch signals already
/// handed out. Children receive a snapshot, never a shared reference.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Scope {
    pub alias: BTreeMap<String, String>,
    pub reserved: BTreeSet<String>,
}

impl Scope {
    pub fn root() -> Self {
        let mut alias = BTreeMap::new();
        alias.insert("@".to_string(), EACH.to_string());
        Scope {
            alias,
            reserved: BTreeSet::new(),
        }
    }

    pub fn child(&self) -> Self {
        self.clone()
    }

    pub fn resolve(&self, name: &str) -> String {
        self.alias
            .get(name)
            .cloned()
            .unwrap_or_else(|| name.to_string())
    }

    fn is_taken(&self, name: &str) -> bool {
        self.reserved.contains(name)
            || self.alias.contains_key(name)
            || self.alias.values().any(|target| target == name)
    }

    /// Binds `word` to the canonical signal behind `target`.
    pub fn bind_alias(&mut self, word: String, target: &str) -> Result<()> {
        let canonical = self.resolve(target);
        if self.reserved.contains(&canonical) {
            return Err(CompileError::structural(format!(
                "Cannot alias {} to {}: the signal is already used as a temporary",
                word, canonical
            )));
        }
        self.alias.insert(word, canonical);
        Ok(())
    }

    /// Hands out the first free scratch signal and reserves it in this scope.
    pub fn allocate_temp(&mut self, avoid: &BTreeSet<String>) -> Result<String> {
        let temp = TEMP_SIGNALS
            .iter()
            .find(|name| !self.is_taken(name) && !avoid.contains(**name))
            .ok_or(CompileError::ResourceExhausted {
                pool: TEMP_SIGNALS.len(),
                at: Location::unknown(),
            })?
            .to_string();
        self.reserved.insert(temp.clone());
        Ok(temp)
    }
}
