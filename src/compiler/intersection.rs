//! Intersection types: statically countable sets of concrete classes that
//! reach one evaluation point.
//!
//! An intersection exposes only the capabilities every member provides,
//! matched by method name and arity and by field name, never by position.
//! Values are tag-discriminated with `ceil(log2(n))` tag bits.

use crate::compiler::diagnostics::ContractError;
use crate::compiler::ast::Span;
use crate::compiler::types::{Capability, ClassId, ClassInfo, IntersectionId, Ty, TypeTable};
use indexmap::IndexMap;
use serde::Serialize;
use std::collections::BTreeSet;
use std::sync::RwLock;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct IntersectionType {
    pub id: IntersectionId,
    pub members: BTreeSet<ClassId>,
    pub capabilities: BTreeSet<Capability>,
    pub tag_bits: u32,
}

/// Number of tag bits needed to discriminate `n` members.
pub fn tag_bits(n: usize) -> u32 {
    if n <= 1 {
        0
    } else {
        usize::BITS - (n - 1).leading_zeros()
    }
}

/// Position-independent capability intersection of `classes`.
pub fn intersect_capabilities<'a>(
    mut classes: impl Iterator<Item = &'a ClassInfo>,
) -> BTreeSet<Capability> {
    let Some(first) = classes.next() else {
        return BTreeSet::new();
    };
    let mut capabilities = first.capabilities();
    for class in classes {
        capabilities.retain(|cap| class.has(cap));
    }
    capabilities
}

#[derive(Debug, Default)]
struct Registry {
    by_members: IndexMap<BTreeSet<ClassId>, IntersectionId>,
    types: Vec<IntersectionType>,
}

/// Interned intersections, shared by every function's analysis.
#[derive(Debug, Default)]
pub struct IntersectionRegistry {
    inner: RwLock<Registry>,
}

impl IntersectionRegistry {
    /// Return the id for this member set, registering it on first use.
    pub fn intern(
        &self,
        members: BTreeSet<ClassId>,
        capabilities: BTreeSet<Capability>,
    ) -> IntersectionId {
        if let Some(id) = self
            .inner
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .by_members
            .get(&members)
        {
            return *id;
        }
        let mut inner = self.inner.write().unwrap_or_else(|e| e.into_inner());
        if let Some(id) = inner.by_members.get(&members) {
            return *id;
        }
        let id = IntersectionId(inner.types.len() as u32);
        tracing::trace!(?members, "interning intersection");
        inner.types.push(IntersectionType {
            id,
            tag_bits: tag_bits(members.len()),
            members: members.clone(),
            capabilities,
        });
        inner.by_members.insert(members, id);
        id
    }

    pub fn get(&self, id: IntersectionId) -> IntersectionType {
        self.inner.read().unwrap_or_else(|e| e.into_inner()).types[id.0 as usize].clone()
    }

    pub fn all(&self) -> Vec<IntersectionType> {
        self.inner.read().unwrap_or_else(|e| e.into_inner()).types.clone()
    }

    pub fn len(&self) -> usize {
        self.inner.read().unwrap_or_else(|e| e.into_inner()).types.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Builds and checks intersections against the global type table.
pub struct IntersectionResolver<'a> {
    table: &'a TypeTable,
}

impl<'a> IntersectionResolver<'a> {
    pub fn new(table: &'a TypeTable) -> Self {
        Self { table }
    }

    /// Join statically countable contributing types. Nested intersections
    /// are flattened; a single distinct member stays concrete.
    pub fn join(&self, tys: &[Ty]) -> Option<Ty> {
        let members: BTreeSet<ClassId> = tys.iter().flat_map(|ty| self.table.members(ty)).collect();
        self.table.intern_intersection(members)
    }

    /// Members of the intersection lacking `capability`.
    pub fn missing_members(&self, id: IntersectionId, capability: &Capability) -> Vec<ClassId> {
        self.table
            .intersection(id)
            .members
            .into_iter()
            .filter(|m| !self.table.class(*m).has(capability))
            .collect()
    }

    /// Fails with `IntersectionMemberMismatch` unless every member provides
    /// `capability`.
    pub fn require(
        &self,
        id: IntersectionId,
        capability: &Capability,
        span: Span,
    ) -> Result<(), ContractError> {
        let missing = self.missing_members(id, capability);
        if missing.is_empty() {
            return Ok(());
        }
        Err(ContractError::IntersectionMemberMismatch {
            capability: capability.to_string(),
            intersection: self.table.display(&Ty::Intersection(id)),
            missing: missing.iter().map(|m| self.table.name(*m).to_string()).collect(),
            span,
        })
    }

    /// Whether `candidate` may stand wherever the intersection is expected:
    /// its capabilities must be a superset of the intersection's.
    pub fn substitutable(&self, candidate: &Ty, expected: IntersectionId) -> bool {
        let required = self.table.intersection(expected).capabilities;
        self.table
            .members(candidate)
            .iter()
            .all(|m| self.table.class(*m).capabilities().is_superset(&required))
    }
}
