//! Instantiation cache for monomorphised functions and methods.
//!
//! Every distinct (function, argument types) key maps to exactly one
//! [`Instantiation`]. Keys compare structurally:
//! 1. concrete types by class identity
//! 2. intersections by member set
//! 3. dyn values by capability set, so two dyn values with the same
//!    capabilities share one instantiation even if their retained types differ
//!
//! The engine keys a dyn argument by what the callee requires of it rather
//! than by its descriptor, which keeps growing while bodies are evaluated.
//!
//! Methods are keyed with the receiver class as their first argument.

use crate::compiler::resolver::Flow;
use crate::compiler::types::{Capability, ClassId, ClassKind, FunctionId, NIL, Ty, TypeTable};
use serde::Serialize;
use std::collections::{BTreeSet, HashMap};
use std::sync::RwLock;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct InstantiationId(pub u32);

/// The structural identity of one argument type.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub enum TyKey {
    Concrete(u32),
    Intersection(BTreeSet<u32>),
    Dyn(BTreeSet<Capability>),
}

impl TyKey {
    pub fn of(ty: &Ty, table: &TypeTable) -> Self {
        match ty {
            Ty::Concrete(id) => TyKey::Concrete(id.0),
            Ty::Intersection(id) => {
                TyKey::Intersection(table.intersection(*id).members.iter().map(|m| m.0).collect())
            }
            Ty::Dyn(id) => TyKey::Dyn(table.dyn_descriptor(*id).capabilities),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct InstanceKey {
    pub function: FunctionId,
    pub args: Vec<TyKey>,
}

/// Storage annotation of one argument, for the layout pass.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum Layout {
    /// No stored fields.
    Void,
    Scalar,
    Record { fields: Vec<String> },
    Tagged { variants: Vec<String>, tag_bits: u32 },
    Dyn { capabilities: Vec<String> },
}

impl Layout {
    pub fn of(ty: &Ty, table: &TypeTable) -> Self {
        match ty {
            Ty::Concrete(id) if *id == NIL => Layout::Void,
            Ty::Concrete(id) => {
                let class = table.class(*id);
                match class.kind {
                    ClassKind::Primitive => Layout::Scalar,
                    _ if class.fields.is_empty() => Layout::Void,
                    _ => Layout::Record {
                        fields: class.fields.iter().map(|(name, _)| name.clone()).collect(),
                    },
                }
            }
            Ty::Intersection(id) => {
                let intersection = table.intersection(*id);
                Layout::Tagged {
                    variants: intersection
                        .members
                        .iter()
                        .map(|m| table.name(*m).to_string())
                        .collect(),
                    tag_bits: intersection.tag_bits,
                }
            }
            Ty::Dyn(id) => Layout::Dyn {
                capabilities: table
                    .dyn_descriptor(*id)
                    .capabilities
                    .iter()
                    .map(|c| c.to_string())
                    .collect(),
            },
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum InstanceState {
    InProgress,
    Resolved,
    /// Part of a recursive cycle whose root has not converged yet.
    Stale,
    Failed,
}

/// A specialized version of a function for one argument-type tuple. The
/// body itself is shared and referenced through `function`.
#[derive(Debug, Clone, Serialize)]
pub struct Instantiation {
    pub id: InstantiationId,
    pub function: FunctionId,
    pub name: String,
    pub mangled_name: String,
    pub key: InstanceKey,
    /// Argument types of the call that created the instantiation.
    pub args: Vec<Ty>,
    pub layouts: Vec<Layout>,
    pub ret: Flow,
    pub state: InstanceState,
    /// Concrete types retained by the dyn arguments this instantiation has
    /// been validated against.
    pub dyn_witnesses: BTreeSet<ClassId>,
}

impl Instantiation {
    pub fn is_resolved(&self) -> bool {
        self.state == InstanceState::Resolved
    }
}

/// Mangle a qualified function name and its argument types.
/// e.g., `add` with `[int, int]` becomes `add__int_int`
pub fn mangled_name(name: &str, args: &[Ty], table: &TypeTable) -> String {
    let keys: Vec<TyKey> = args.iter().map(|ty| TyKey::of(ty, table)).collect();
    mangle(name, &keys, table)
}

fn mangle(name: &str, keys: &[TyKey], table: &TypeTable) -> String {
    let base = name.replace('.', "_");
    if keys.is_empty() {
        return base;
    }
    let suffix = keys
        .iter()
        .map(|key| mangle_key(key, table))
        .collect::<Vec<_>>()
        .join("_");
    format!("{}__{}", base, suffix)
}

fn mangle_key(key: &TyKey, table: &TypeTable) -> String {
    match key {
        TyKey::Concrete(id) => table.name(ClassId(*id)).to_string(),
        TyKey::Intersection(members) => {
            let members: Vec<&str> = members.iter().map(|m| table.name(ClassId(*m))).collect();
            format!("isect_{}", members.join("_"))
        }
        TyKey::Dyn(capabilities) => mangle_dyn(capabilities),
    }
}

fn mangle_dyn(capabilities: &BTreeSet<Capability>) -> String {
    if capabilities.is_empty() {
        return "dyn".to_string();
    }
    let caps: Vec<String> = capabilities
        .iter()
        .map(|cap| match cap {
            Capability::Method { name, arity } => format!("{}{}", name, arity),
            Capability::Field { name } => format!("f_{}", name),
        })
        .collect();
    format!("dyn_{}", caps.join("_"))
}

/// Concrete types retained by the dyn values among `args`.
pub fn dyn_witnesses(args: &[Ty], table: &TypeTable) -> BTreeSet<ClassId> {
    args.iter()
        .filter(|ty| matches!(ty, Ty::Dyn(_)))
        .flat_map(|ty| table.members(ty))
        .collect()
}

#[derive(Debug, Default)]
struct Cache {
    by_key: HashMap<InstanceKey, InstantiationId>,
    instances: Vec<Instantiation>,
}

/// The single source of truth for which call shapes have been specialized.
#[derive(Debug, Default)]
pub struct InstantiationCache {
    inner: RwLock<Cache>,
}

impl InstantiationCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Return the instantiation for `(function, args)`, creating it in the
    /// `InProgress` state on first use. The flag tells whether it was created.
    pub fn get_or_create(
        &self,
        table: &TypeTable,
        function: FunctionId,
        name: &str,
        args: &[Ty],
    ) -> (InstantiationId, bool) {
        let keys = args.iter().map(|ty| TyKey::of(ty, table)).collect();
        self.get_or_create_keyed(table, function, name, args, keys)
    }

    /// As [`get_or_create`](Self::get_or_create), with the argument keys
    /// already formed by the caller.
    pub fn get_or_create_keyed(
        &self,
        table: &TypeTable,
        function: FunctionId,
        name: &str,
        args: &[Ty],
        keys: Vec<TyKey>,
    ) -> (InstantiationId, bool) {
        let key = InstanceKey { function, args: keys };
        if let Some(id) = self.lookup(&key) {
            return (id, false);
        }

        let mangled = mangle(name, &key.args, table);
        let layouts = args.iter().map(|ty| Layout::of(ty, table)).collect();
        let witnesses = dyn_witnesses(args, table);

        let mut inner = self.inner.write().unwrap_or_else(|e| e.into_inner());
        if let Some(id) = inner.by_key.get(&key) {
            return (*id, false);
        }
        let id = InstantiationId(inner.instances.len() as u32);
        tracing::debug!(instantiation = %mangled, "new instantiation");
        inner.instances.push(Instantiation {
            id,
            function,
            name: name.to_string(),
            mangled_name: mangled,
            key: key.clone(),
            args: args.to_vec(),
            layouts,
            ret: Flow::Pending,
            state: InstanceState::InProgress,
            dyn_witnesses: witnesses,
        });
        inner.by_key.insert(key, id);
        (id, true)
    }

    pub fn lookup(&self, key: &InstanceKey) -> Option<InstantiationId> {
        self.inner
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .by_key
            .get(key)
            .copied()
    }

    pub fn get(&self, id: InstantiationId) -> Instantiation {
        self.inner.read().unwrap_or_else(|e| e.into_inner()).instances[id.0 as usize].clone()
    }

    pub fn by_mangled_name(&self, mangled: &str) -> Option<Instantiation> {
        self.inner
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .instances
            .iter()
            .find(|i| i.mangled_name == mangled)
            .cloned()
    }

    pub fn all(&self) -> Vec<Instantiation> {
        self.inner.read().unwrap_or_else(|e| e.into_inner()).instances.clone()
    }

    pub fn len(&self) -> usize {
        self.inner.read().unwrap_or_else(|e| e.into_inner()).instances.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn state(&self, id: InstantiationId) -> InstanceState {
        self.inner.read().unwrap_or_else(|e| e.into_inner()).instances[id.0 as usize].state
    }

    pub fn ret(&self, id: InstantiationId) -> Flow {
        self.inner.read().unwrap_or_else(|e| e.into_inner()).instances[id.0 as usize].ret
    }

    pub fn set_state(&self, id: InstantiationId, state: InstanceState) {
        let mut inner = self.inner.write().unwrap_or_else(|e| e.into_inner());
        inner.instances[id.0 as usize].state = state;
    }

    pub fn set_ret(&self, id: InstantiationId, ret: Flow) {
        let mut inner = self.inner.write().unwrap_or_else(|e| e.into_inner());
        inner.instances[id.0 as usize].ret = ret;
    }

    /// Record types retained by dyn arguments the instantiation is used
    /// with. Returns whether any was new.
    pub fn add_witnesses(&self, id: InstantiationId, witnesses: impl IntoIterator<Item = ClassId>) -> bool {
        let mut inner = self.inner.write().unwrap_or_else(|e| e.into_inner());
        let instance = &mut inner.instances[id.0 as usize];
        let before = instance.dyn_witnesses.len();
        instance.dyn_witnesses.extend(witnesses);
        instance.dyn_witnesses.len() != before
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compiler::ast::{AstBuilder, Item, Program};
    use crate::compiler::dynamic::{DynOrigin, DynResolver};
    use crate::compiler::types::{FunctionTable, INT, STR};
    use crate::compiler::usage::BindingId;

    fn dyn_of(table: &TypeTable, binding: u32, tys: &[Ty], caps: &[Capability]) -> Ty {
        let resolver = DynResolver::new(table);
        let origin = DynOrigin {
            function: FunctionId(0),
            binding: BindingId(binding),
            node: None,
        };
        let ty = resolver.flow_into(origin, tys);
        if let Ty::Dyn(id) = ty {
            for cap in caps {
                resolver.require(id, cap).unwrap();
            }
        }
        ty
    }

    #[test]
    fn test_get_or_create_is_idempotent() {
        let table = TypeTable::new();
        let cache = InstantiationCache::new();
        let int = Ty::Concrete(INT);
        let (a, created) = cache.get_or_create(&table, FunctionId(0), "add", &[int, int]);
        assert!(created);
        let (b, created) = cache.get_or_create(&table, FunctionId(0), "add", &[int, int]);
        assert!(!created);
        assert_eq!(a, b);
        assert_eq!(cache.len(), 1);
        assert_eq!(cache.get(a).mangled_name, "add__int_int");
    }

    #[test]
    fn test_mangled_names() {
        let table = TypeTable::new();
        let int = Ty::Concrete(INT);
        let both = table
            .intern_intersection([INT, STR].into_iter().collect())
            .unwrap();
        assert_eq!(mangled_name("main", &[], &table), "main");
        assert_eq!(mangled_name("Book.gift", &[int], &table), "Book_gift__int");
        assert_eq!(mangled_name("show", &[both], &table), "show__isect_int_str");

        let format = Capability::method("format", 1);
        let d = dyn_of(&table, 1, &[int, Ty::Concrete(STR)], &[format]);
        assert_eq!(mangled_name("show", &[d], &table), "show__dyn_format1");
    }

    #[test]
    fn test_dyn_with_same_capabilities_share_instantiation() {
        let table = TypeTable::new();
        let cache = InstantiationCache::new();
        let format = Capability::method("format", 1);
        let a = dyn_of(&table, 1, &[Ty::Concrete(INT)], &[format.clone()]);
        let b = dyn_of(&table, 2, &[Ty::Concrete(INT), Ty::Concrete(STR)], &[format]);
        assert_ne!(a, b);
        let (first, _) = cache.get_or_create(&table, FunctionId(3), "show", &[a]);
        let (second, created) = cache.get_or_create(&table, FunctionId(3), "show", &[b]);
        assert!(!created);
        assert_eq!(first, second);
    }

    #[test]
    fn test_zero_field_class_has_void_layout_and_own_instance() {
        let mut b = AstBuilder::new();
        let marker = b.class("Marker", &[], vec![]);
        let point = b.class("Point", &[("x", "int")], vec![]);
        let program = Program {
            items: vec![Item::Class(marker), Item::Class(point)],
        };
        let functions = FunctionTable::from_program(&program);
        let (table, errors) = TypeTable::from_program(&program, &functions);
        assert!(errors.is_empty());
        let marker = Ty::Concrete(table.lookup("Marker").unwrap());
        let point = Ty::Concrete(table.lookup("Point").unwrap());
        assert_eq!(Layout::of(&marker, &table), Layout::Void);
        assert_eq!(
            Layout::of(&point, &table),
            Layout::Record {
                fields: vec!["x".to_string()]
            }
        );

        let cache = InstantiationCache::new();
        let (m, _) = cache.get_or_create(&table, FunctionId(0), "id", &[marker]);
        let (p, _) = cache.get_or_create(&table, FunctionId(0), "id", &[point]);
        assert_ne!(m, p);
        assert_eq!(cache.get(m).layouts, vec![Layout::Void]);
    }

    #[test]
    fn test_keyed_dyn_ignores_later_descriptor_growth() {
        let table = TypeTable::new();
        let cache = InstantiationCache::new();
        let d = dyn_of(&table, 1, &[Ty::Concrete(INT), Ty::Concrete(STR)], &[]);
        let required: BTreeSet<Capability> = [Capability::method("format", 1)].into_iter().collect();

        let (first, _) = cache.get_or_create_keyed(&table, FunctionId(0), "f", &[d], vec![TyKey::Dyn(required.clone())]);
        assert_eq!(cache.get(first).mangled_name, "f__dyn_format1");

        // the descriptor gains a capability; the callee's requirements did not change
        if let Ty::Dyn(id) = d {
            DynResolver::new(&table).require(id, &Capability::method("eq", 2)).unwrap();
        }
        let (second, created) = cache.get_or_create_keyed(&table, FunctionId(0), "f", &[d], vec![TyKey::Dyn(required)]);
        assert!(!created);
        assert_eq!(first, second);
    }

    #[test]
    fn test_witnesses_grow() {
        let table = TypeTable::new();
        let cache = InstantiationCache::new();
        let (id, _) = cache.get_or_create(&table, FunctionId(0), "f", &[Ty::Concrete(INT)]);
        assert!(cache.get(id).dyn_witnesses.is_empty());
        assert!(cache.add_witnesses(id, [STR]));
        assert!(!cache.add_witnesses(id, [STR]));
        assert_eq!(cache.get(id).state, InstanceState::InProgress);
    }
}
