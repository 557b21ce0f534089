//! Mapping between RPC procedure identifiers and procedure names.
//!
//! From RFC 5531: the call message has three unsigned-integer fields (remote
//! program number, remote program version number, and remote procedure
//! number) that uniquely identify the procedure to be called.
//!
//! The registry translates such a triple into a `"Type.Method"` name for
//! the server side and back again for the client side. One registry is
//! usually shared (behind an [`Arc`](std::sync::Arc)) by every codec in a
//! process.

use std::collections::HashMap;
use std::fmt;
use std::sync::{PoisonError, RwLock};

use tracing::debug;

use super::error::{Result, RpcError};

/// (program, version, procedure) address of a remote procedure.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ProcedureId {
    pub program: u32,
    pub version: u32,
    pub procedure: u32,
}

impl ProcedureId {
    pub const fn new(program: u32, version: u32, procedure: u32) -> Self {
        Self { program, version, procedure }
    }
}

impl fmt::Display for ProcedureId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.program, self.version, self.procedure)
    }
}

/// A registered procedure.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Procedure {
    pub id: ProcedureId,
    pub name: String,
}

#[derive(Default)]
struct Tables {
    by_id: HashMap<ProcedureId, String>,
    by_name: HashMap<String, ProcedureId>,
}

/// Thread-safe bidirectional procedure table.
#[derive(Default)]
pub struct ProcedureRegistry {
    tables: RwLock<Tables>,
}

impl ProcedureRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Associates `id` with `name`, replacing any earlier name for `id`.
    ///
    /// `name` must be `"Type.Method"` with both parts starting with an
    /// uppercase letter.
    pub fn register(&self, id: ProcedureId, name: impl Into<String>) -> Result<()> {
        let name = name.into();
        if !is_valid_procedure_name(&name) {
            return Err(RpcError::InvalidProcedureName(name));
        }

        let mut tables = self.tables.write().unwrap_or_else(PoisonError::into_inner);
        if let Some(previous) = tables.by_id.insert(id, name.clone()) {
            // Drop the stale reverse entry unless another id claimed the name since.
            if previous != name && tables.by_name.get(&previous) == Some(&id) {
                tables.by_name.remove(&previous);
            }
        }
        tables.by_name.insert(name, id);
        debug!("Registered procedure {} as {}", id, tables.by_id[&id]);
        Ok(())
    }

    /// Name registered for `id`.
    pub fn name_of(&self, id: ProcedureId) -> Option<String> {
        let tables = self.tables.read().unwrap_or_else(PoisonError::into_inner);
        tables.by_id.get(&id).cloned()
    }

    /// Identifier most recently registered under `name`.
    pub fn id_of(&self, name: &str) -> Option<ProcedureId> {
        let tables = self.tables.read().unwrap_or_else(PoisonError::into_inner);
        tables.by_name.get(name).copied()
    }

    /// Snapshot of every registered procedure, in no particular order.
    pub fn dump(&self) -> Vec<Procedure> {
        let tables = self.tables.read().unwrap_or_else(PoisonError::into_inner);
        tables.by_id.iter().map(|(id, name)| Procedure { id: *id, name: name.clone() }).collect()
    }

    pub fn len(&self) -> usize {
        self.tables.read().unwrap_or_else(PoisonError::into_inner).by_id.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl fmt::Debug for ProcedureRegistry {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("ProcedureRegistry").field("procedures", &self.len()).finish()
    }
}

/// An exported name starts with an uppercase letter.
fn is_exported(name: &str) -> bool {
    name.chars().next().is_some_and(char::is_uppercase)
}

fn is_valid_procedure_name(name: &str) -> bool {
    match name.split_once('.') {
        Some((type_name, method)) => {
            !method.contains('.') && is_exported(type_name) && is_exported(method)
        }
        None => false,
    }
}
