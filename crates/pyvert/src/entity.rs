//! Per-conversion context: what is being converted, and the shared ledgers
//! every pass draws from.

use indexmap::IndexMap;

use crate::anno::Annotations;
use crate::ast::{NodeId, NodeIds};
use crate::namespace::Env;
use crate::naming::Namer;
use crate::value::Value;

/// Immutable facts about the entity under conversion.
#[derive(Debug, Clone)]
pub struct EntityInfo {
    /// The recovered source snippet the entity was parsed from.
    pub source_code: String,
    /// Where the snippet came from, for messages only.
    pub source_file: String,
    /// The entity's defining environment (its module globals).
    pub namespace: Env,
    /// Sample argument values, when the caller supplied any.
    pub arg_values: Option<IndexMap<String, Value>>,
    /// Name of the owning type for methods, when known.
    pub owner_type: Option<String>,
}

/// Mutable state shared by every pass of one conversion: the symbol ledger,
/// the node id allocator, and the annotation tables.
///
/// One context exists per conversion and is never shared across conversions;
/// node ids and generated symbols are only meaningful within it.
pub struct EntityContext {
    pub info: EntityInfo,
    pub namer: Namer,
    pub ids: NodeIds,
    pub anno: Annotations,
    /// Enclosing entities of the node currently being visited, outermost
    /// first. Maintained by the transformer framework.
    pub entity_stack: Vec<NodeId>,
}

impl EntityContext {
    pub fn new(info: EntityInfo) -> Self {
        let namer = Namer::new(info.namespace.names());
        Self {
            info,
            namer,
            ids: NodeIds::new(),
            anno: Annotations::default(),
            entity_stack: Vec::new(),
        }
    }
}
