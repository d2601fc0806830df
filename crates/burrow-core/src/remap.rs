//! Per-container program/path substitution tables.
//!
//! A remap table maps a logical program name to a set of
//! `original -> substitute` path pairs. The launcher exports the table as
//! environment variables; the chroot shim consults them when the named
//! program opens one of the original paths.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use burrow_common::error::{BurrowError, Result};

/// Variable listing every program with a remap entry, `;`-separated.
pub const REMAP_PROGS_ENV: &str = "BURROW_REMAP_PROGS";

/// Prefix of the per-program remap variables.
pub const REMAP_ENV_PREFIX: &str = "BURROW_REMAP_";

/// How a `set` request changes the table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RemapKind {
    /// Adds or replaces the given pairs.
    AddMap,
    /// Removes the given originals.
    RemoveMap,
}

impl FromStr for RemapKind {
    type Err = BurrowError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "add_map" => Ok(Self::AddMap),
            "remove_map" => Ok(Self::RemoveMap),
            other => Err(BurrowError::MalformedInput {
                input: other.to_string(),
                message: "expected add_map or remove_map".into(),
            }),
        }
    }
}

impl fmt::Display for RemapKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::AddMap => write!(f, "add_map"),
            Self::RemoveMap => write!(f, "remove_map"),
        }
    }
}

/// Parses `orig:subst;orig2:subst2` into pairs.
///
/// Empty segments (a trailing `;`) are ignored.
///
/// # Errors
///
/// Returns `BurrowError::MalformedInput` if the mapping is empty, a pair
/// lacks the `:` separator, or an original path is empty.
pub fn parse_mapping(mapping: &str) -> Result<Vec<(String, String)>> {
    let malformed = |message: &str| BurrowError::MalformedInput {
        input: mapping.to_string(),
        message: message.to_string(),
    };

    let mut pairs = Vec::new();
    for segment in mapping.split(';').map(str::trim).filter(|s| !s.is_empty()) {
        let (orig, subst) = segment
            .split_once(':')
            .ok_or_else(|| malformed("each pair must be original:substitute"))?;
        if orig.is_empty() {
            return Err(malformed("original path must not be empty"));
        }
        pairs.push((orig.to_string(), subst.to_string()));
    }
    if pairs.is_empty() {
        return Err(malformed("mapping is empty"));
    }
    Ok(pairs)
}

/// Program name to `original -> substitute` pairs.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RemapTable(BTreeMap<String, BTreeMap<String, String>>);

impl RemapTable {
    /// Creates an empty table.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether no program has an entry.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Names of every program with at least one pair.
    pub fn programs(&self) -> impl Iterator<Item = &str> {
        self.0.keys().map(String::as_str)
    }

    /// Applies a `set` request. The mapping is fully parsed before the table
    /// is touched, so a malformed request leaves it unchanged.
    ///
    /// # Errors
    ///
    /// Returns `BurrowError::MalformedInput` for an empty program name, a
    /// malformed mapping, or a name whose variable another program already
    /// exports.
    pub fn apply(&mut self, kind: RemapKind, prog: &str, mapping: &str) -> Result<()> {
        if prog.trim().is_empty() {
            return Err(BurrowError::MalformedInput {
                input: prog.to_string(),
                message: "program name must not be empty".into(),
            });
        }
        let pairs = parse_mapping(mapping)?;

        match kind {
            RemapKind::AddMap => {
                let var = program_env_name(prog);
                let clash = self
                    .programs()
                    .find(|p| *p != prog && program_env_name(p) == var);
                if let Some(other) = clash {
                    return Err(BurrowError::MalformedInput {
                        input: prog.to_string(),
                        message: format!("exported as {var}, already used by `{other}`"),
                    });
                }
                let entry = self.0.entry(prog.to_string()).or_default();
                entry.extend(pairs);
            }
            RemapKind::RemoveMap => {
                if let Some(entry) = self.0.get_mut(prog) {
                    for (orig, _) in &pairs {
                        let _ = entry.remove(orig);
                    }
                    if entry.is_empty() {
                        let _ = self.0.remove(prog);
                    }
                }
            }
        }
        tracing::debug!(prog, %kind, "remap table updated");
        Ok(())
    }

    /// The substitute answering `path` when opened by `prog`, if any.
    #[must_use]
    pub fn resolve(&self, prog: &str, path: &str) -> Option<&str> {
        self.0.get(prog)?.get(path).map(String::as_str)
    }

    /// Encodes one program's pairs back into `orig:subst;...` form.
    #[must_use]
    pub fn encode_program(&self, prog: &str) -> Option<String> {
        let entry = self.0.get(prog)?;
        Some(
            entry
                .iter()
                .map(|(orig, subst)| format!("{orig}:{subst}"))
                .collect::<Vec<_>>()
                .join(";"),
        )
    }

    /// Environment variables exporting the table to the shims.
    #[must_use]
    pub fn to_env(&self) -> Vec<(String, String)> {
        if self.is_empty() {
            return Vec::new();
        }
        let mut env = vec![(
            REMAP_PROGS_ENV.to_string(),
            self.programs().collect::<Vec<_>>().join(";"),
        )];
        for prog in self.programs() {
            if let Some(value) = self.encode_program(prog) {
                env.push((program_env_name(prog), value));
            }
        }
        env
    }
}

/// Variable name carrying one program's pairs.
#[must_use]
pub fn program_env_name(prog: &str) -> String {
    let sanitized: String = prog
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() {
                c.to_ascii_uppercase()
            } else {
                '_'
            }
        })
        .collect();
    format!("{REMAP_ENV_PREFIX}{sanitized}")
}
