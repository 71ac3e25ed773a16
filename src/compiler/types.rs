//! Type definitions and the global type table.
//!
//! Types are structural: a class is described by its ordered field list and
//! a capability table keyed by method name and arity. Field lookups are by
//! name only, so two classes declaring the same fields in a different order
//! expose the same capabilities.

use crate::compiler::ast::{ClassDef, FnDef, Item, NodeId, Program, Span};
use crate::compiler::diagnostics::ContractError;
use crate::compiler::dynamic::{DynDescriptor, DynRegistry};
use crate::compiler::intersection::{
    IntersectionRegistry, IntersectionResolver, IntersectionType, intersect_capabilities,
};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::fmt;

/// Index of a class (concrete, abstract, variant or primitive) in the type table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct ClassId(pub u32);

/// Index of a function or method in the [`FunctionTable`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct FunctionId(pub u32);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct IntersectionId(pub u32);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct DynId(pub u32);

pub const INT: ClassId = ClassId(0);
pub const FLOAT: ClassId = ClassId(1);
pub const STR: ClassId = ClassId(2);
pub const BOOL: ClassId = ClassId(3);
pub const NIL: ClassId = ClassId(4);
pub const LIST: ClassId = ClassId(5);
pub const STR_ITER: ClassId = ClassId(6);

/// A named requirement, independent of any concrete type.
///
/// Method arity counts the receiver: `a + b` requires `plus/2`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub enum Capability {
    Method { name: String, arity: usize },
    Field { name: String },
}

impl Capability {
    pub fn method(name: impl Into<String>, arity: usize) -> Self {
        Capability::Method {
            name: name.into(),
            arity,
        }
    }

    pub fn field(name: impl Into<String>) -> Self {
        Capability::Field { name: name.into() }
    }

    pub fn name(&self) -> &str {
        match self {
            Capability::Method { name, .. } | Capability::Field { name } => name,
        }
    }
}

impl fmt::Display for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Capability::Method { name, arity } => write!(f, "{}/{}", name, arity),
            Capability::Field { name } => write!(f, ".{}", name),
        }
    }
}

/// A type as written in a signature or field declaration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SigTy {
    /// A concrete, variant or abstract class.
    Class(ClassId),
    /// `A & B`, or an enum with several variants.
    Intersection(IntersectionId),
    /// The receiver's own class.
    SelfType,
    /// Accepts anything; reads produce an open value.
    Any,
    /// Undeclared: determined by instantiating the method body.
    Inferred,
}

/// Signature of one capability of a class. `params` excludes the receiver.
#[derive(Debug, Clone)]
pub struct MethodSig {
    pub params: Vec<SigTy>,
    pub ret: SigTy,
    /// Implementation, absent for builtins and abstract declarations.
    pub body: Option<FunctionId>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum ClassKind {
    Primitive,
    Class,
    Abstract,
    Variant { enum_name: String },
}

/// A class known to the type table.
#[derive(Debug, Clone)]
pub struct ClassInfo {
    pub id: ClassId,
    pub name: String,
    pub kind: ClassKind,
    /// Fields in declaration order.
    pub fields: Vec<(String, SigTy)>,
    /// Methods keyed by (name, arity).
    pub methods: BTreeMap<(String, usize), MethodSig>,
    pub node: Option<NodeId>,
}

impl ClassInfo {
    pub fn is_abstract(&self) -> bool {
        self.kind == ClassKind::Abstract
    }

    pub fn method(&self, name: &str, arity: usize) -> Option<&MethodSig> {
        self.methods.get(&(name.to_string(), arity))
    }

    /// Field type by name, independent of its position.
    pub fn field(&self, name: &str) -> Option<&SigTy> {
        self.fields.iter().find(|(n, _)| n == name).map(|(_, t)| t)
    }

    pub fn capabilities(&self) -> BTreeSet<Capability> {
        let methods = self
            .methods
            .keys()
            .map(|(name, arity)| Capability::method(name.clone(), *arity));
        let fields = self.fields.iter().map(|(name, _)| Capability::field(name.clone()));
        methods.chain(fields).collect()
    }

    pub fn has(&self, capability: &Capability) -> bool {
        match capability {
            Capability::Method { name, arity } => self.method(name, *arity).is_some(),
            Capability::Field { name } => self.field(name).is_some(),
        }
    }
}

/// A resolved type: the element type of an instantiation key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub enum Ty {
    Concrete(ClassId),
    Intersection(IntersectionId),
    Dyn(DynId),
}

/// Type annotation as it appears in the syntax tree.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum TypeAnnotation {
    /// `int`, `Point`, an abstract class, an enum, `any` or `Self`.
    Named(String),
    /// `A & B`
    Intersection(Vec<String>),
}

impl TypeAnnotation {
    pub fn named(name: &str) -> Self {
        TypeAnnotation::Named(name.to_string())
    }

    pub fn intersection(names: &[&str]) -> Self {
        TypeAnnotation::Intersection(names.iter().map(|n| n.to_string()).collect())
    }
}

impl fmt::Display for TypeAnnotation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TypeAnnotation::Named(name) => write!(f, "{}", name),
            TypeAnnotation::Intersection(names) => write!(f, "{}", names.join(" & ")),
        }
    }
}

/// Information about a function or method.
#[derive(Debug, Clone, Serialize)]
pub struct FunctionInfo {
    pub id: FunctionId,
    /// Qualified name: `add` or `Point.norm`.
    pub name: String,
    pub owner: Option<String>,
    pub node: NodeId,
    pub span: Span,
    pub arity: usize,
}

/// The symbol table of callable definitions.
#[derive(Debug, Clone, Default)]
pub struct FunctionTable {
    functions: Vec<FunctionInfo>,
    by_name: HashMap<String, FunctionId>,
    by_node: HashMap<NodeId, FunctionId>,
}

impl FunctionTable {
    /// Register every free function and method body. Abstract declarations
    /// without a body are signatures only and get no entry.
    pub fn from_program(program: &Program) -> Self {
        let mut table = FunctionTable::default();
        for (owner, def) in program.functions() {
            if owner.is_some_and(|c| c.is_abstract) && def.body.statements.is_empty() {
                continue;
            }
            let id = FunctionId(table.functions.len() as u32);
            let name = match owner {
                Some(class) => format!("{}.{}", class.name, def.name),
                None => def.name.clone(),
            };
            let arity = def.params.len() + usize::from(owner.is_some());
            table.functions.push(FunctionInfo {
                id,
                name: name.clone(),
                owner: owner.map(|c| c.name.clone()),
                node: def.id,
                span: def.span,
                arity,
            });
            table.by_name.insert(name, id);
            table.by_node.insert(def.id, id);
        }
        table
    }

    pub fn get(&self, id: FunctionId) -> &FunctionInfo {
        &self.functions[id.0 as usize]
    }

    pub fn lookup(&self, name: &str) -> Option<FunctionId> {
        self.by_name.get(name).copied()
    }

    pub fn by_node(&self, node: NodeId) -> Option<FunctionId> {
        self.by_node.get(&node).copied()
    }

    pub fn len(&self) -> usize {
        self.functions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.functions.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &FunctionInfo> {
        self.functions.iter()
    }
}

/// The global type table: classes, enums, and the interned intersection
/// and dyn registries shared by every function's analysis.
#[derive(Debug)]
pub struct TypeTable {
    classes: Vec<ClassInfo>,
    by_name: HashMap<String, ClassId>,
    enums: IndexMap<String, Vec<ClassId>>,
    intersections: IntersectionRegistry,
    dyns: DynRegistry,
}

impl Default for TypeTable {
    fn default() -> Self {
        Self::new()
    }
}

impl TypeTable {
    /// A table holding only the builtin primitive classes.
    pub fn new() -> Self {
        let mut table = Self {
            classes: Vec::new(),
            by_name: HashMap::new(),
            enums: IndexMap::new(),
            intersections: IntersectionRegistry::default(),
            dyns: DynRegistry::default(),
        };
        table.register_builtins();
        table
    }

    fn register_builtins(&mut self) {
        use SigTy::{Any, Class};
        let arith = |c: ClassId| -> Vec<(&'static str, Vec<SigTy>, SigTy)> {
            let mut methods = Vec::new();
            for name in ["plus", "minus", "times", "divide", "modulo"] {
                methods.push((name, vec![Class(c)], Class(c)));
            }
            for name in ["lt", "le", "gt", "ge", "eq", "ne"] {
                methods.push((name, vec![Class(c)], Class(BOOL)));
            }
            methods.push(("neg", vec![], Class(c)));
            methods.push(("format", vec![], Class(STR)));
            methods
        };

        self.builtin("int", arith(INT));
        self.builtin("float", arith(FLOAT));
        self.builtin(
            "str",
            vec![
                ("plus", vec![Class(STR)], Class(STR)),
                ("eq", vec![Class(STR)], Class(BOOL)),
                ("ne", vec![Class(STR)], Class(BOOL)),
                ("lt", vec![Class(STR)], Class(BOOL)),
                ("len", vec![], Class(INT)),
                ("get", vec![Class(INT)], Class(STR)),
                ("iter", vec![], Class(STR_ITER)),
                ("format", vec![], Class(STR)),
            ],
        );
        self.builtin(
            "bool",
            vec![
                ("and", vec![Class(BOOL)], Class(BOOL)),
                ("or", vec![Class(BOOL)], Class(BOOL)),
                ("not", vec![], Class(BOOL)),
                ("eq", vec![Class(BOOL)], Class(BOOL)),
                ("ne", vec![Class(BOOL)], Class(BOOL)),
                ("format", vec![], Class(STR)),
            ],
        );
        self.builtin(
            "nil",
            vec![
                ("eq", vec![Class(NIL)], Class(BOOL)),
                ("format", vec![], Class(STR)),
            ],
        );
        self.builtin(
            "list",
            vec![
                ("append", vec![Any], Class(NIL)),
                ("push", vec![Any], Class(NIL)),
                ("len", vec![], Class(INT)),
                ("get", vec![Class(INT)], Any),
                ("iter", vec![], Any),
                ("format", vec![], Class(STR)),
            ],
        );
        self.builtin(
            "str_iter",
            vec![
                ("next", vec![], Class(STR)),
                ("iter", vec![], Class(STR_ITER)),
            ],
        );
    }

    fn builtin(&mut self, name: &str, methods: Vec<(&str, Vec<SigTy>, SigTy)>) -> ClassId {
        let id = self.declare(name, ClassKind::Primitive, None);
        let class = &mut self.classes[id.0 as usize];
        for (method, params, ret) in methods {
            let arity = params.len() + 1;
            class.methods.insert(
                (method.to_string(), arity),
                MethodSig {
                    params,
                    ret,
                    body: None,
                },
            );
        }
        id
    }

    fn declare(&mut self, name: &str, kind: ClassKind, node: Option<NodeId>) -> ClassId {
        let id = ClassId(self.classes.len() as u32);
        self.classes.push(ClassInfo {
            id,
            name: name.to_string(),
            kind,
            fields: Vec::new(),
            methods: BTreeMap::new(),
            node,
        });
        self.by_name.insert(name.to_string(), id);
        id
    }

    /// Build the table for a program: builtins plus every class, abstract
    /// class and enum variant. Unknown type names in declarations are
    /// reported and treated as `any`.
    pub fn from_program(program: &Program, functions: &FunctionTable) -> (Self, Vec<(String, ContractError)>) {
        let mut table = Self::new();
        let mut errors = Vec::new();

        let mut defs: Vec<&ClassDef> = Vec::new();
        for item in &program.items {
            match item {
                Item::Class(class) => {
                    let kind = if class.is_abstract {
                        ClassKind::Abstract
                    } else {
                        ClassKind::Class
                    };
                    table.declare(&class.name, kind, Some(class.id));
                    defs.push(class);
                }
                Item::Enum(def) => {
                    let mut variants = Vec::new();
                    for variant in &def.variants {
                        let kind = ClassKind::Variant {
                            enum_name: def.name.clone(),
                        };
                        variants.push(table.declare(&variant.name, kind, Some(variant.id)));
                        defs.push(variant);
                    }
                    table.enums.insert(def.name.clone(), variants);
                }
                Item::Function(_) => {}
            }
        }

        for def in &defs {
            let id = table.by_name[&def.name];
            let mut fields = Vec::new();
            for field in &def.fields {
                let ty = match &field.type_annotation {
                    Some(ann) => table.resolve_or_report(ann, field.span, &def.name, &mut errors),
                    None => SigTy::Any,
                };
                fields.push((field.name.clone(), ty));
            }
            let mut methods = BTreeMap::new();
            for method in &def.methods {
                let sig = table.method_sig(def, method, functions, &mut errors);
                methods.insert((method.name.clone(), method.params.len() + 1), sig);
            }
            let class = &mut table.classes[id.0 as usize];
            class.fields = fields;
            class.methods = methods;
        }

        let mut done = HashSet::new();
        for def in &defs {
            table.inherit(def, &defs, &mut done, &mut Vec::new());
        }

        (table, errors)
    }

    fn method_sig(
        &self,
        owner: &ClassDef,
        method: &FnDef,
        functions: &FunctionTable,
        errors: &mut Vec<(String, ContractError)>,
    ) -> MethodSig {
        let undeclared = if owner.is_abstract { SigTy::Any } else { SigTy::Inferred };
        let params = method
            .params
            .iter()
            .map(|p| match &p.type_annotation {
                Some(ann) => self.resolve_or_report(ann, p.span, &owner.name, errors),
                None => undeclared.clone(),
            })
            .collect();
        let ret = match &method.return_type {
            Some(ann) => self.resolve_or_report(ann, method.span, &owner.name, errors),
            None => undeclared,
        };
        MethodSig {
            params,
            ret,
            body: functions.by_node(method.id),
        }
    }

    fn resolve_or_report(
        &self,
        ann: &TypeAnnotation,
        span: Span,
        owner: &str,
        errors: &mut Vec<(String, ContractError)>,
    ) -> SigTy {
        self.resolve_annotation(ann).unwrap_or_else(|reason| {
            errors.push((
                owner.to_string(),
                ContractError::UnsatisfiableContract {
                    capability: None,
                    reason,
                    span,
                },
            ));
            SigTy::Any
        })
    }

    /// Copy fields and methods of base classes that the class does not define.
    fn inherit(
        &mut self,
        def: &ClassDef,
        defs: &[&ClassDef],
        done: &mut HashSet<String>,
        visiting: &mut Vec<String>,
    ) {
        if done.contains(&def.name) || visiting.contains(&def.name) {
            return;
        }
        visiting.push(def.name.clone());
        let id = self.by_name[&def.name];
        for base in &def.bases {
            if let Some(base_def) = defs.iter().find(|d| &d.name == base) {
                self.inherit(base_def, defs, done, visiting);
            }
            let Some(&base_id) = self.by_name.get(base) else {
                continue;
            };
            let base_class = self.classes[base_id.0 as usize].clone();
            let class = &mut self.classes[id.0 as usize];
            for (name, ty) in base_class.fields {
                if class.field(&name).is_none() {
                    class.fields.push((name, ty));
                }
            }
            for (key, sig) in base_class.methods {
                class.methods.entry(key).or_insert(sig);
            }
        }
        visiting.pop();
        done.insert(def.name.clone());
    }

    pub fn class(&self, id: ClassId) -> &ClassInfo {
        &self.classes[id.0 as usize]
    }

    pub fn classes(&self) -> impl Iterator<Item = &ClassInfo> {
        self.classes.iter()
    }

    pub fn lookup(&self, name: &str) -> Option<ClassId> {
        self.by_name.get(name).copied()
    }

    pub fn name(&self, id: ClassId) -> &str {
        &self.class(id).name
    }

    pub fn enum_variants(&self, name: &str) -> Option<&[ClassId]> {
        self.enums.get(name).map(|v| v.as_slice())
    }

    pub fn intersections(&self) -> &IntersectionRegistry {
        &self.intersections
    }

    pub fn dyns(&self) -> &DynRegistry {
        &self.dyns
    }

    pub fn intersection(&self, id: IntersectionId) -> IntersectionType {
        self.intersections.get(id)
    }

    pub fn dyn_descriptor(&self, id: DynId) -> DynDescriptor {
        self.dyns.get(id)
    }

    /// Intern the intersection of `members`; a single member is just that class.
    pub fn intern_intersection(&self, members: BTreeSet<ClassId>) -> Option<Ty> {
        match members.len() {
            0 => None,
            1 => members.into_iter().next().map(Ty::Concrete),
            _ => {
                let capabilities = intersect_capabilities(members.iter().map(|m| self.class(*m)));
                Some(Ty::Intersection(
                    self.intersections.intern(members, capabilities),
                ))
            }
        }
    }

    /// Convert a type annotation to a signature type, resolving class names.
    pub fn resolve_annotation(&self, ann: &TypeAnnotation) -> Result<SigTy, String> {
        match ann {
            TypeAnnotation::Named(name) => match name.as_str() {
                "any" => Ok(SigTy::Any),
                "Self" => Ok(SigTy::SelfType),
                _ => {
                    if let Some(id) = self.lookup(name) {
                        return Ok(SigTy::Class(id));
                    }
                    if let Some(variants) = self.enum_variants(name) {
                        let members = variants.iter().copied().collect();
                        return match self.intern_intersection(members) {
                            Some(Ty::Concrete(id)) => Ok(SigTy::Class(id)),
                            Some(Ty::Intersection(id)) => Ok(SigTy::Intersection(id)),
                            _ => Err(format!("enum `{}` has no variants", name)),
                        };
                    }
                    Err(format!("unknown type: {}", name))
                }
            },
            TypeAnnotation::Intersection(names) => {
                let mut members = BTreeSet::new();
                for name in names {
                    let id = self
                        .lookup(name)
                        .ok_or_else(|| format!("unknown type: {}", name))?;
                    if self.class(id).is_abstract() {
                        return Err(format!(
                            "abstract class `{}` cannot be an intersection member",
                            name
                        ));
                    }
                    members.insert(id);
                }
                match self.intern_intersection(members) {
                    Some(Ty::Concrete(id)) => Ok(SigTy::Class(id)),
                    Some(Ty::Intersection(id)) => Ok(SigTy::Intersection(id)),
                    _ => Err("empty intersection".to_string()),
                }
            }
        }
    }

    /// The concrete classes a value of this type may actually be.
    pub fn members(&self, ty: &Ty) -> Vec<ClassId> {
        match ty {
            Ty::Concrete(id) => vec![*id],
            Ty::Intersection(id) => self.intersection(*id).members.into_iter().collect(),
            Ty::Dyn(id) => self.dyn_descriptor(*id).retained.into_iter().collect(),
        }
    }

    /// Whether a value of type `actual` may be passed where `expected` is
    /// declared. Concrete classes compare by identity, abstract classes and
    /// intersections structurally by capability superset.
    pub fn accepts(&self, expected: &SigTy, actual: &Ty, receiver: Option<ClassId>) -> bool {
        match expected {
            SigTy::Any | SigTy::Inferred => true,
            SigTy::SelfType => match receiver {
                Some(r) => self.members(actual).iter().all(|m| *m == r),
                None => true,
            },
            SigTy::Class(id) => {
                let class = self.class(*id);
                if class.is_abstract() {
                    let required = class.capabilities();
                    self.members(actual)
                        .iter()
                        .all(|m| self.class(*m).capabilities().is_superset(&required))
                } else {
                    self.members(actual).iter().all(|m| m == id)
                }
            }
            SigTy::Intersection(id) => IntersectionResolver::new(self).substitutable(actual, *id),
        }
    }

    /// Non-abstract classes providing every capability in `required`.
    pub fn concrete_candidates(&self, required: &BTreeSet<Capability>) -> Vec<ClassId> {
        self.classes
            .iter()
            .filter(|c| !c.is_abstract())
            .filter(|c| required.iter().all(|cap| c.has(cap)))
            .map(|c| c.id)
            .collect()
    }

    pub fn display(&self, ty: &Ty) -> String {
        match ty {
            Ty::Concrete(id) => self.name(*id).to_string(),
            Ty::Intersection(id) => self
                .intersection(*id)
                .members
                .iter()
                .map(|m| self.name(*m))
                .collect::<Vec<_>>()
                .join(" & "),
            Ty::Dyn(id) => {
                let caps = self.dyn_descriptor(*id).capabilities;
                let caps: Vec<String> = caps.iter().map(|c| c.to_string()).collect();
                format!("dyn{{{}}}", caps.join(", "))
            }
        }
    }

    pub fn display_sig(&self, sig: &SigTy) -> String {
        match sig {
            SigTy::Class(id) => self.name(*id).to_string(),
            SigTy::Intersection(id) => self.display(&Ty::Intersection(*id)),
            SigTy::SelfType => "Self".to_string(),
            SigTy::Any => "any".to_string(),
            SigTy::Inferred => "_".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compiler::ast::{AstBuilder, Item};

    fn table_for(classes: Vec<ClassDef>) -> TypeTable {
        let program = Program {
            items: classes.into_iter().map(Item::Class).collect(),
        };
        let functions = FunctionTable::from_program(&program);
        let (table, errors) = TypeTable::from_program(&program, &functions);
        assert!(errors.is_empty(), "{:?}", errors);
        table
    }

    #[test]
    fn test_capability_display() {
        assert_eq!(Capability::method("plus", 2).to_string(), "plus/2");
        assert_eq!(Capability::field("x").to_string(), ".x");
    }

    #[test]
    fn test_builtins() {
        let table = TypeTable::new();
        assert_eq!(table.lookup("int"), Some(INT));
        assert_eq!(table.lookup("str_iter"), Some(STR_ITER));
        let int = table.class(INT);
        assert!(int.has(&Capability::method("plus", 2)));
        assert!(!int.has(&Capability::method("iter", 1)));
        assert!(table.class(STR).has(&Capability::method("iter", 1)));
    }

    #[test]
    fn test_field_lookup_is_position_independent() {
        let mut b = AstBuilder::new();
        let a = b.class("A", &[("x", "int"), ("y", "str")], vec![]);
        let bb = b.class("B", &[("y", "str"), ("x", "int")], vec![]);
        let table = table_for(vec![a, bb]);
        let a = table.lookup("A").unwrap();
        let bb = table.lookup("B").unwrap();
        assert_eq!(table.class(a).capabilities(), table.class(bb).capabilities());
        assert_eq!(table.class(bb).field("x"), Some(&SigTy::Class(INT)));
    }

    #[test]
    fn test_accepts_abstract_structurally() {
        let mut b = AstBuilder::new();
        let gift = b.function("gift", &[], vec![]);
        let giver = b.abstract_class("Giver", vec![gift]);
        let body = vec![{
            let s = b.string("x");
            b.ret(s)
        }];
        let impl_gift = b.function("gift", &[], body);
        let book = b.class("Book", &[], vec![impl_gift]);
        let table = table_for(vec![giver, book]);

        let giver = table.lookup("Giver").unwrap();
        let book = table.lookup("Book").unwrap();
        assert!(table.accepts(&SigTy::Class(giver), &Ty::Concrete(book), None));
        assert!(!table.accepts(&SigTy::Class(giver), &Ty::Concrete(INT), None));
        assert!(!table.accepts(&SigTy::Class(book), &Ty::Concrete(INT), None));
    }

    #[test]
    fn test_inherited_methods() {
        let mut b = AstBuilder::new();
        let hello = {
            let s = b.string("hi");
            let r = b.ret(s);
            b.function("hello", &[], vec![r])
        };
        let base = b.abstract_class("Greeter", vec![hello]);
        let mut child = b.class("English", &[], vec![]);
        child.bases = vec!["Greeter".to_string()];
        let table = table_for(vec![base, child]);
        let english = table.lookup("English").unwrap();
        assert!(table.class(english).method("hello", 1).is_some());
    }

    #[test]
    fn test_resolve_annotation() {
        let mut b = AstBuilder::new();
        let a = b.class("A", &[("x", "int")], vec![]);
        let c = b.class("C", &[("x", "int")], vec![]);
        let table = table_for(vec![a, c]);
        assert_eq!(
            table.resolve_annotation(&TypeAnnotation::named("int")),
            Ok(SigTy::Class(INT))
        );
        assert!(matches!(
            table.resolve_annotation(&TypeAnnotation::intersection(&["A", "C"])),
            Ok(SigTy::Intersection(_))
        ));
        assert!(table.resolve_annotation(&TypeAnnotation::named("Nope")).is_err());
    }

    #[test]
    fn test_intern_single_member_collapses() {
        let table = TypeTable::new();
        assert_eq!(
            table.intern_intersection([INT].into_iter().collect()),
            Some(Ty::Concrete(INT))
        );
        let both = table.intern_intersection([INT, STR].into_iter().collect());
        let again = table.intern_intersection([STR, INT].into_iter().collect());
        assert!(matches!(both, Some(Ty::Intersection(_))));
        assert_eq!(both, again);
    }
}
