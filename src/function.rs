//! Function identity
//!
//! Every callable thing a monitored program can execute maps to exactly one
//! [`FunctionId`]. Identities are totally ordered (variant first, then the
//! numeric key) so they can key ordered maps and give reproducible output.

use serde::{Deserialize, Serialize};
use std::fmt;

/// A VM cell: the host's native word for addresses, indices and frame pointers
pub type Cell = i32;

/// Public index reserved for the implicit program entry function
pub const MAIN_INDEX: Cell = -1;

/// Identity of a function observed by the profiler
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FunctionId {
    /// Host-provided built-in, keyed by its native table index
    Native(Cell),
    /// Script entry point callable by the host, keyed by public table index
    Public(Cell),
    /// Ordinary script function, keyed by the address of its prologue
    Normal(Cell),
}

impl FunctionId {
    /// The implicit program entry function
    pub const MAIN: FunctionId = FunctionId::Public(MAIN_INDEX);

    pub fn is_public(&self) -> bool {
        matches!(self, FunctionId::Public(_))
    }

    pub fn is_main(&self) -> bool {
        *self == Self::MAIN
    }

    /// Index or address, depending on the variant
    pub fn key(&self) -> Cell {
        match *self {
            FunctionId::Native(key) | FunctionId::Public(key) | FunctionId::Normal(key) => key,
        }
    }
}

impl fmt::Display for FunctionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            FunctionId::Native(index) => write!(f, "native#{}", index),
            FunctionId::Public(MAIN_INDEX) => write!(f, "main"),
            FunctionId::Public(index) => write!(f, "public#{}", index),
            FunctionId::Normal(address) => write!(f, "0x{:x}", address),
        }
    }
}

/// Coarse category reported to consumers alongside a function's name
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FunctionKind {
    Native,
    Public,
    Main,
    /// Normal function with a known symbol
    Normal,
    /// Normal function with no symbol available
    Unknown,
}

impl FunctionKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            FunctionKind::Native => "native",
            FunctionKind::Public => "public",
            FunctionKind::Main => "main",
            FunctionKind::Normal => "normal",
            FunctionKind::Unknown => "unknown",
        }
    }
}

impl fmt::Display for FunctionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeSet;

    #[test]
    fn test_identity_equality_requires_same_tag() {
        assert_eq!(FunctionId::Native(1), FunctionId::Native(1));
        assert_ne!(FunctionId::Native(1), FunctionId::Public(1));
        assert_ne!(FunctionId::Public(1), FunctionId::Normal(1));
    }

    #[test]
    fn test_ordering_is_tag_then_key() {
        let set: BTreeSet<_> = [
            FunctionId::Normal(8),
            FunctionId::Public(2),
            FunctionId::Native(5),
            FunctionId::Public(MAIN_INDEX),
            FunctionId::Native(0),
        ]
        .into_iter()
        .collect();

        let ordered: Vec<_> = set.into_iter().collect();
        assert_eq!(
            ordered,
            vec![
                FunctionId::Native(0),
                FunctionId::Native(5),
                FunctionId::MAIN,
                FunctionId::Public(2),
                FunctionId::Normal(8),
            ]
        );
    }

    #[test]
    fn test_display() {
        assert_eq!(FunctionId::Native(2).to_string(), "native#2");
        assert_eq!(FunctionId::MAIN.to_string(), "main");
        assert_eq!(FunctionId::Public(4).to_string(), "public#4");
        assert_eq!(FunctionId::Normal(0x1a4).to_string(), "0x1a4");
    }

    #[test]
    fn test_predicates() {
        assert!(FunctionId::MAIN.is_public());
        assert!(FunctionId::MAIN.is_main());
        assert!(!FunctionId::Public(0).is_main());
        assert!(!FunctionId::Normal(16).is_public());
        assert_eq!(FunctionId::Normal(16).key(), 16);
    }

    #[test]
    fn test_serde_shape() {
        let json = serde_json::to_string(&FunctionId::Normal(40)).unwrap();
        assert_eq!(json, r#"{"normal":40}"#);
        let back: FunctionId = serde_json::from_str(r#"{"public":-1}"#).unwrap();
        assert_eq!(back, FunctionId::MAIN);
    }
}
