//! Human-readable names for function identities
//!
//! Names are captured when a profiler attaches: the host may release the
//! program image before anyone reads the results.

use crate::function::{Cell, FunctionId, FunctionKind, MAIN_INDEX};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Name tables for one program
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SymbolInfo {
    /// Public function names, by public index
    #[serde(default)]
    pub publics: Vec<String>,
    /// Native function names, by native index
    #[serde(default)]
    pub natives: Vec<String>,
    /// Normal function names keyed by prologue address (from debug symbols)
    #[serde(default)]
    pub functions: BTreeMap<Cell, String>,
}

impl SymbolInfo {
    pub fn new(publics: Vec<String>, natives: Vec<String>) -> Self {
        Self {
            publics,
            natives,
            functions: BTreeMap::new(),
        }
    }

    pub fn with_function(mut self, address: Cell, name: impl Into<String>) -> Self {
        self.functions.insert(address, name.into());
        self
    }

    pub fn has_debug_symbols(&self) -> bool {
        !self.functions.is_empty()
    }

    pub fn name_of(&self, function: FunctionId) -> String {
        match function {
            FunctionId::Native(index) => lookup(&self.natives, index)
                .map(str::to_string)
                .unwrap_or_else(|| function.to_string()),
            FunctionId::Public(MAIN_INDEX) => "main".to_string(),
            FunctionId::Public(index) => lookup(&self.publics, index)
                .map(str::to_string)
                .unwrap_or_else(|| function.to_string()),
            FunctionId::Normal(address) => self
                .functions
                .get(&address)
                .cloned()
                .unwrap_or_else(|| function.to_string()),
        }
    }

    pub fn kind_of(&self, function: FunctionId) -> FunctionKind {
        match function {
            FunctionId::Native(_) => FunctionKind::Native,
            FunctionId::Public(MAIN_INDEX) => FunctionKind::Main,
            FunctionId::Public(_) => FunctionKind::Public,
            FunctionId::Normal(address) if self.functions.contains_key(&address) => {
                FunctionKind::Normal
            }
            FunctionId::Normal(_) => FunctionKind::Unknown,
        }
    }
}

fn lookup(names: &[String], index: Cell) -> Option<&str> {
    usize::try_from(index)
        .ok()
        .and_then(|i| names.get(i))
        .map(String::as_str)
}
