//! Dyn descriptors for values whose contributing types are not statically
//! countable, such as elements of a container that is appended to.
//!
//! A descriptor keeps the usage-derived capability set together with every
//! concrete type that has flowed into it. Both only grow. Type identity is
//! never erased, so casts and operations are checked against the retained
//! types rather than the capability set alone.

use crate::compiler::ast::{NodeId, Span};
use crate::compiler::diagnostics::ContractError;
use crate::compiler::types::{Capability, ClassId, DynId, FunctionId, Ty, TypeTable};
use crate::compiler::usage::BindingId;
use serde::Serialize;
use std::collections::{BTreeSet, HashMap};
use std::sync::RwLock;

/// Where a dyn value is produced: one binding of one function. Every
/// evaluation of that function accumulates into the same descriptor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct DynOrigin {
    pub function: FunctionId,
    pub binding: BindingId,
    pub node: Option<NodeId>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DynDescriptor {
    pub id: DynId,
    pub origin: DynOrigin,
    /// Capabilities required by usage.
    pub capabilities: BTreeSet<Capability>,
    /// Concrete types observed flowing into the value.
    pub retained: BTreeSet<ClassId>,
}

#[derive(Debug, Default)]
struct Registry {
    by_origin: HashMap<(FunctionId, BindingId), DynId>,
    descriptors: Vec<DynDescriptor>,
}

/// All dyn descriptors of the compilation, keyed by origin.
#[derive(Debug, Default)]
pub struct DynRegistry {
    inner: RwLock<Registry>,
}

impl DynRegistry {
    /// Get the descriptor for `origin`, creating an empty one on first use.
    pub fn descriptor(&self, origin: DynOrigin) -> DynId {
        let key = (origin.function, origin.binding);
        if let Some(id) = self
            .inner
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .by_origin
            .get(&key)
        {
            return *id;
        }
        let mut inner = self.inner.write().unwrap_or_else(|e| e.into_inner());
        if let Some(id) = inner.by_origin.get(&key) {
            return *id;
        }
        let id = DynId(inner.descriptors.len() as u32);
        inner.descriptors.push(DynDescriptor {
            id,
            origin,
            capabilities: BTreeSet::new(),
            retained: BTreeSet::new(),
        });
        inner.by_origin.insert(key, id);
        id
    }

    pub fn get(&self, id: DynId) -> DynDescriptor {
        self.inner.read().unwrap_or_else(|e| e.into_inner()).descriptors[id.0 as usize].clone()
    }

    pub fn all(&self) -> Vec<DynDescriptor> {
        self.inner.read().unwrap_or_else(|e| e.into_inner()).descriptors.clone()
    }

    /// Add concrete types to the retained set. Returns whether it grew.
    pub fn retain(&self, id: DynId, types: impl IntoIterator<Item = ClassId>) -> bool {
        let mut inner = self.inner.write().unwrap_or_else(|e| e.into_inner());
        let descriptor = &mut inner.descriptors[id.0 as usize];
        let before = descriptor.retained.len();
        descriptor.retained.extend(types);
        descriptor.retained.len() != before
    }

    /// Record a usage-derived capability. Returns whether it was new.
    pub fn add_capability(&self, id: DynId, capability: Capability) -> bool {
        let mut inner = self.inner.write().unwrap_or_else(|e| e.into_inner());
        inner.descriptors[id.0 as usize].capabilities.insert(capability)
    }
}

/// Creates dyn values and checks operations against retained types.
pub struct DynResolver<'a> {
    table: &'a TypeTable,
}

impl<'a> DynResolver<'a> {
    pub fn new(table: &'a TypeTable) -> Self {
        Self { table }
    }

    /// Flow `tys` into the dyn value produced at `origin`. Members of dyn
    /// inputs are retained individually; their capabilities carry over.
    pub fn flow_into(&self, origin: DynOrigin, tys: &[Ty]) -> Ty {
        let dyns = self.table.dyns();
        let id = dyns.descriptor(origin);
        for ty in tys {
            if *ty == Ty::Dyn(id) {
                continue;
            }
            let members = self.table.members(ty);
            if dyns.retain(id, members.iter().copied()) {
                tracing::trace!(dyn_id = id.0, ?members, "dyn retained set grew");
            }
            if let Ty::Dyn(source) = ty {
                for capability in dyns.get(*source).capabilities {
                    // only carried over when every retained type has it
                    if self.require(id, &capability).is_err() {
                        tracing::trace!(dyn_id = id.0, %capability, "capability not carried over");
                    }
                }
            }
        }
        Ty::Dyn(id)
    }

    /// Require `capability` of the dyn value. It is added to the descriptor
    /// only when every retained type provides it; otherwise the types that
    /// lack it are returned.
    pub fn require(&self, id: DynId, capability: &Capability) -> Result<(), Vec<ClassId>> {
        let missing: Vec<ClassId> = self
            .table
            .dyn_descriptor(id)
            .retained
            .into_iter()
            .filter(|m| !self.table.class(*m).has(capability))
            .collect();
        if !missing.is_empty() {
            return Err(missing);
        }
        self.table.dyns().add_capability(id, capability.clone());
        Ok(())
    }

    /// Casting succeeds only to a type that actually flowed into the value.
    pub fn cast(&self, id: DynId, target: ClassId, span: Span) -> Result<Ty, ContractError> {
        let descriptor = self.table.dyn_descriptor(id);
        if descriptor.retained.contains(&target) {
            return Ok(Ty::Concrete(target));
        }
        Err(ContractError::UncastableDyn {
            target: self.table.name(target).to_string(),
            retained: descriptor
                .retained
                .iter()
                .map(|m| self.table.name(*m).to_string())
                .collect(),
            span,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compiler::types::{BOOL, INT, STR};

    fn origin(binding: u32) -> DynOrigin {
        DynOrigin {
            function: FunctionId(0),
            binding: BindingId(binding),
            node: None,
        }
    }

    #[test]
    fn test_same_origin_shares_descriptor() {
        let table = TypeTable::new();
        let resolver = DynResolver::new(&table);
        let a = resolver.flow_into(origin(1), &[Ty::Concrete(INT)]);
        let b = resolver.flow_into(origin(1), &[Ty::Concrete(STR)]);
        assert_eq!(a, b);
        let Ty::Dyn(id) = a else { panic!("expected dyn") };
        assert_eq!(
            table.dyn_descriptor(id).retained,
            [INT, STR].into_iter().collect()
        );
    }

    #[test]
    fn test_require_checks_every_retained_type() {
        let table = TypeTable::new();
        let resolver = DynResolver::new(&table);
        let Ty::Dyn(id) = resolver.flow_into(origin(2), &[Ty::Concrete(INT), Ty::Concrete(STR)])
        else {
            panic!("expected dyn")
        };
        assert!(resolver.require(id, &Capability::method("format", 1)).is_ok());
        assert_eq!(
            resolver.require(id, &Capability::method("len", 1)),
            Err(vec![INT])
        );
        let caps = table.dyn_descriptor(id).capabilities;
        assert!(caps.contains(&Capability::method("format", 1)));
        assert!(!caps.contains(&Capability::method("len", 1)));
    }

    #[test]
    fn test_cast_outside_retained_set() {
        let table = TypeTable::new();
        let resolver = DynResolver::new(&table);
        let Ty::Dyn(id) = resolver.flow_into(origin(3), &[Ty::Concrete(INT), Ty::Concrete(STR)])
        else {
            panic!("expected dyn")
        };
        assert_eq!(resolver.cast(id, INT, Span::default()), Ok(Ty::Concrete(INT)));
        let err = resolver.cast(id, BOOL, Span::new(7, 3)).unwrap_err();
        assert!(matches!(err, ContractError::UncastableDyn { .. }));
        assert_eq!(err.span(), Span::new(7, 3));
    }
}
