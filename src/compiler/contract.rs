//! Interface contracts: the minimal structural requirements of a function.
//!
//! Each binding of the usage graph becomes one capability type variable.
//! Receiver and field sites on the same `(name, arity)` merge into one
//! requirement, argument occurrences become position constraints, and
//! results of capabilities, fields and calls become return links from the
//! receiver variable to the result variable.

use crate::compiler::ast::{ClassDef, FnDef, NodeId, Span};
use crate::compiler::diagnostics::ContractError;
use crate::compiler::types::{
    Capability, ClassId, FunctionId, FunctionTable, SigTy, TypeAnnotation, TypeTable,
};
use crate::compiler::usage::{BindingId, BindingKind, FunctionUsage, Origin, SiteKind, UsageCollector};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;

/// A capability type variable. There is exactly one per binding.
pub type TypeVar = BindingId;

/// The usage graph with annotations resolved.
pub type Source = Origin<SigTy>;

#[derive(Debug, Clone)]
pub struct ContractVar {
    pub name: Option<String>,
    pub kind: BindingKind,
    pub source: Source,
    pub node: Option<NodeId>,
    pub span: Span,
    /// Readable description for diagnostics.
    pub description: String,
}

/// A capability required of a variable and the call positions at which
/// the variable occurs for it (0 is the receiver).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Requirement {
    pub capability: Capability,
    pub positions: BTreeSet<usize>,
    /// First site in source order.
    pub span: Span,
}

/// `var : any T.target[position]`: the variable is passed at `position`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PositionConstraint {
    pub var: TypeVar,
    pub target: String,
    pub arity: usize,
    pub position: usize,
    /// Free function or constructor call rather than a capability.
    pub free: bool,
}

/// `receiver.capability returns result`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReturnLink {
    pub receiver: TypeVar,
    pub capability: Capability,
    pub result: TypeVar,
}

/// `callee(args) returns result`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallLink {
    pub callee: String,
    pub args: Vec<TypeVar>,
    pub result: TypeVar,
}

#[derive(Debug, Clone)]
pub struct InterfaceContract {
    pub function: FunctionId,
    pub name: String,
    pub owner: Option<ClassId>,
    pub vars: Vec<ContractVar>,
    pub params: Vec<TypeVar>,
    /// Declared parameter types, by position.
    pub declared: Vec<Option<SigTy>>,
    pub self_var: Option<TypeVar>,
    pub ret: TypeVar,
    pub declared_ret: Option<SigTy>,
    pub requirements: BTreeMap<TypeVar, BTreeMap<Capability, Requirement>>,
    pub positions: Vec<PositionConstraint>,
    pub nodes: Vec<(NodeId, TypeVar)>,
    pub span: Span,
}

impl InterfaceContract {
    pub fn var(&self, var: TypeVar) -> &ContractVar {
        &self.vars[var.index()]
    }

    /// Capabilities required of `var`.
    pub fn capabilities(&self, var: TypeVar) -> BTreeSet<Capability> {
        self.requirements
            .get(&var)
            .map(|reqs| reqs.keys().cloned().collect())
            .unwrap_or_default()
    }

    pub fn param_capabilities(&self, index: usize) -> BTreeSet<Capability> {
        self.params
            .get(index)
            .map(|var| self.capabilities(*var))
            .unwrap_or_default()
    }

    pub fn param_name(&self, index: usize) -> &str {
        self.params
            .get(index)
            .and_then(|var| self.var(*var).name.as_deref())
            .unwrap_or("_")
    }

    /// Whether every parameter has a declared concrete type, so the
    /// return type does not depend on the call site.
    pub fn is_monomorphic(&self) -> bool {
        self.declared.iter().all(|d| matches!(d, Some(SigTy::Class(_))))
    }

    pub fn return_links(&self) -> Vec<ReturnLink> {
        self.vars
            .iter()
            .enumerate()
            .filter_map(|(i, var)| match &var.source {
                Origin::MethodResult {
                    receiver,
                    method,
                    args,
                } => Some(ReturnLink {
                    receiver: *receiver,
                    capability: Capability::method(method.clone(), args.len() + 1),
                    result: BindingId(i as u32),
                }),
                Origin::FieldResult { object, field } => Some(ReturnLink {
                    receiver: *object,
                    capability: Capability::field(field.clone()),
                    result: BindingId(i as u32),
                }),
                _ => None,
            })
            .collect()
    }

    pub fn call_links(&self) -> Vec<CallLink> {
        self.vars
            .iter()
            .enumerate()
            .filter_map(|(i, var)| match &var.source {
                Origin::CallResult { callee, args } => Some(CallLink {
                    callee: callee.clone(),
                    args: args.clone(),
                    result: BindingId(i as u32),
                }),
                _ => None,
            })
            .collect()
    }

    /// Names called as free functions or constructors.
    pub fn callees(&self) -> BTreeSet<String> {
        self.call_links().into_iter().map(|l| l.callee).collect()
    }

    /// The capability chain leading to `var`, starting at the binding the
    /// chain is rooted in: `["giver", "gift/1"]`.
    pub fn chain(&self, var: TypeVar) -> Vec<String> {
        let mut chain = Vec::new();
        let mut current = var;
        loop {
            let v = self.var(current);
            match &v.source {
                Origin::MethodResult {
                    receiver,
                    method,
                    args,
                } => {
                    chain.push(format!("{}/{}", method, args.len() + 1));
                    current = *receiver;
                }
                Origin::FieldResult { object, field } => {
                    chain.push(format!(".{}", field));
                    current = *object;
                }
                Origin::CallResult { callee, .. } => {
                    chain.push(format!("{}()", callee));
                    break;
                }
                _ => {
                    chain.push(v.description.clone());
                    break;
                }
            }
        }
        chain.reverse();
        chain
    }
}

/// A function's contract, or the errors that made it unresolvable.
#[derive(Debug, Clone)]
pub enum ContractState {
    Resolved(Arc<InterfaceContract>),
    Unresolved(Vec<ContractError>),
}

impl ContractState {
    pub fn contract(&self) -> Option<&Arc<InterfaceContract>> {
        match self {
            ContractState::Resolved(contract) => Some(contract),
            ContractState::Unresolved(_) => None,
        }
    }

    pub fn is_resolved(&self) -> bool {
        matches!(self, ContractState::Resolved(_))
    }
}

/// Builds contracts from usage. Holds only shared references, so functions
/// can be built in parallel.
pub struct ContractBuilder<'a> {
    table: &'a TypeTable,
    functions: &'a FunctionTable,
}

impl<'a> ContractBuilder<'a> {
    pub fn new(table: &'a TypeTable, functions: &'a FunctionTable) -> Self {
        Self { table, functions }
    }

    pub fn build_state(&self, function: FunctionId, owner: Option<&ClassDef>, def: &FnDef) -> ContractState {
        match self.build(function, owner, def) {
            Ok(contract) => ContractState::Resolved(Arc::new(contract)),
            Err(errors) => {
                tracing::debug!(
                    function = %self.functions.get(function).name,
                    errors = errors.len(),
                    "contract unresolved"
                );
                ContractState::Unresolved(errors)
            }
        }
    }

    pub fn build(
        &self,
        function: FunctionId,
        owner: Option<&ClassDef>,
        def: &FnDef,
    ) -> Result<InterfaceContract, Vec<ContractError>> {
        let usage = UsageCollector::collect(def, owner.is_some());
        let mut errors = Vec::new();

        let mut resolve = |annotation: &TypeAnnotation, span: Span| match self.table.resolve_annotation(annotation) {
            Ok(sig) => Some(sig),
            Err(reason) => {
                errors.push(ContractError::UnsatisfiableContract {
                    capability: None,
                    reason,
                    span,
                });
                None
            }
        };

        let declared: Vec<Option<SigTy>> = def
            .params
            .iter()
            .map(|p| p.type_annotation.as_ref().and_then(|a| resolve(a, p.span)))
            .collect();
        let declared_ret = def.return_type.as_ref().and_then(|a| resolve(a, def.span));

        let mut vars = Vec::with_capacity(usage.bindings.len());
        for binding in &usage.bindings {
            let source = binding
                .origin
                .map_annotation(|a| resolve(a, binding.span).ok_or(()))
                .unwrap_or(Origin::Unknown);
            vars.push(ContractVar {
                name: binding.name.clone(),
                kind: binding.kind,
                source,
                node: binding.node,
                span: binding.span,
                description: usage.describe(binding.id),
            });
        }

        errors.extend(conflicting_arities(&usage));
        if !errors.is_empty() {
            return Err(errors);
        }

        let (requirements, positions) = self.requirements(&usage, &declared);
        let owner_id = owner.and_then(|c| self.table.lookup(&c.name));

        Ok(InterfaceContract {
            function,
            name: self.functions.get(function).name.clone(),
            owner: owner_id,
            vars,
            params: usage.params.clone(),
            declared,
            self_var: usage.self_binding,
            ret: usage.ret,
            declared_ret,
            requirements,
            positions,
            nodes: usage.nodes.clone(),
            span: def.span,
        })
    }

    /// Merge sites into requirements and position constraints. Parameters
    /// declared with a concrete type or intersection are excluded from
    /// inference; abstract declarations keep their requirements.
    fn requirements(
        &self,
        usage: &FunctionUsage,
        declared: &[Option<SigTy>],
    ) -> (
        BTreeMap<TypeVar, BTreeMap<Capability, Requirement>>,
        Vec<PositionConstraint>,
    ) {
        let mut requirements: BTreeMap<TypeVar, BTreeMap<Capability, Requirement>> = BTreeMap::new();
        let mut positions = Vec::new();

        for binding in &usage.bindings {
            if let BindingKind::Param(i) = binding.kind {
                let excluded = match declared.get(i).and_then(|d| d.as_ref()) {
                    Some(SigTy::Class(c)) => !self.table.class(*c).is_abstract(),
                    Some(SigTy::Intersection(_)) => true,
                    _ => false,
                };
                if excluded {
                    continue;
                }
            }

            let mut sites: Vec<_> = binding.sites.iter().collect();
            sites.sort_by_key(|s| s.span);

            for site in &sites {
                if let Some(capability) = site.capability() {
                    requirements
                        .entry(binding.id)
                        .or_default()
                        .entry(capability.clone())
                        .or_insert_with(|| Requirement {
                            capability,
                            positions: BTreeSet::new(),
                            span: site.span,
                        })
                        .positions
                        .insert(0);
                }
            }
            for site in &sites {
                let free = match site.kind {
                    SiteKind::MethodCall if site.position > 0 => false,
                    SiteKind::FunctionCall => true,
                    _ => continue,
                };
                if !free {
                    let capability = Capability::method(site.target.clone(), site.arity);
                    if let Some(req) = requirements
                        .get_mut(&binding.id)
                        .and_then(|reqs| reqs.get_mut(&capability))
                    {
                        req.positions.insert(site.position);
                    }
                }
                positions.push(PositionConstraint {
                    var: binding.id,
                    target: site.target.clone(),
                    arity: site.arity,
                    position: site.position,
                    free,
                });
            }
        }
        (requirements, positions)
    }
}

/// Report the first site, in source order, that invokes a capability with
/// a different argument count than an earlier site on the same binding.
fn conflicting_arities(usage: &FunctionUsage) -> Vec<ContractError> {
    let mut errors = Vec::new();
    for binding in &usage.bindings {
        let mut sites: Vec<_> = binding
            .sites
            .iter()
            .filter(|s| s.kind == SiteKind::MethodCall && s.position == 0)
            .collect();
        sites.sort_by_key(|s| s.span);

        let mut first: HashMap<&str, usize> = HashMap::new();
        let mut reported = BTreeSet::new();
        for site in sites {
            match first.get(site.target.as_str()) {
                Some(&arity) if arity != site.arity && reported.insert(site.target.as_str()) => {
                    errors.push(ContractError::ConflictingArity {
                        binding: usage.describe(binding.id),
                        name: site.target.clone(),
                        first: arity - 1,
                        second: site.arity - 1,
                        span: site.span,
                    });
                }
                Some(_) => {}
                None => {
                    first.insert(&site.target, site.arity);
                }
            }
        }
    }
    errors
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compiler::ast::{AstBuilder, BinaryOp, Item, Program};
    use crate::compiler::types::INT;

    fn build(program: &Program, index: usize) -> Result<InterfaceContract, Vec<ContractError>> {
        let functions = FunctionTable::from_program(program);
        let (table, _) = TypeTable::from_program(program, &functions);
        let (owner, def) = program.functions().nth(index).unwrap();
        ContractBuilder::new(&table, &functions).build(FunctionId(index as u32), owner, def)
    }

    #[test]
    fn test_add_contract() {
        let mut b = AstBuilder::new();
        let lhs = b.ident("a");
        let rhs = b.ident("b");
        let sum = b.binary(BinaryOp::Add, lhs, rhs);
        let ret = b.ret(sum);
        let add = b.function("add", &["a", "b"], vec![ret]);
        let program = Program {
            items: vec![Item::Function(add)],
        };

        let contract = build(&program, 0).unwrap();
        assert_eq!(
            contract.param_capabilities(0),
            [Capability::method("plus", 2)].into_iter().collect()
        );
        assert!(contract.param_capabilities(1).is_empty());
        let req = &contract.requirements[&contract.params[0]][&Capability::method("plus", 2)];
        assert_eq!(req.positions, [0].into_iter().collect());
        assert!(contract.positions.iter().any(|p| p.var == contract.params[1]
            && p.target == "plus"
            && p.position == 1));
        assert_eq!(contract.return_links().len(), 1);
    }

    #[test]
    fn test_conflicting_arity_cites_first_conflict() {
        let mut b = AstBuilder::new();
        let x = b.ident("x");
        let first = b.method(x, "f", vec![]);
        let s1 = b.stmt(first);
        let x = b.ident("x");
        let one = b.int(1);
        let second = b.method(x, "f", vec![one]);
        let second_span = second.span;
        let s2 = b.stmt(second);
        let x = b.ident("x");
        let two = b.int(2);
        let three = b.int(3);
        let third = b.method(x, "f", vec![two, three]);
        let s3 = b.stmt(third);
        let def = b.function("g", &["x"], vec![s1, s2, s3]);
        let program = Program {
            items: vec![Item::Function(def)],
        };

        let errors = build(&program, 0).unwrap_err();
        assert_eq!(errors.len(), 1);
        match &errors[0] {
            ContractError::ConflictingArity {
                binding,
                first,
                second,
                span,
                ..
            } => {
                assert_eq!(binding, "x");
                assert_eq!((*first, *second), (0, 1));
                assert_eq!(*span, second_span);
            }
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[test]
    fn test_declared_concrete_param_is_excluded() {
        let mut b = AstBuilder::new();
        let n = b.ident("n");
        let neg = b.unary(crate::compiler::ast::UnaryOp::Neg, n);
        let ret = b.ret(neg);
        let param = b.typed_param("n", TypeAnnotation::named("int"));
        let def = b.function_with("negate", vec![param], None, vec![ret]);
        let program = Program {
            items: vec![Item::Function(def)],
        };
        let contract = build(&program, 0).unwrap();
        assert_eq!(contract.declared[0], Some(SigTy::Class(INT)));
        assert!(contract.param_capabilities(0).is_empty());
        assert!(contract.is_monomorphic());
    }

    #[test]
    fn test_unknown_annotation_is_unresolved() {
        let mut b = AstBuilder::new();
        let param = b.typed_param("n", TypeAnnotation::named("Missing"));
        let def = b.function_with("f", vec![param], None, vec![]);
        let program = Program {
            items: vec![Item::Function(def)],
        };
        let errors = build(&program, 0).unwrap_err();
        assert!(matches!(errors[0], ContractError::UnsatisfiableContract { .. }));
    }

    #[test]
    fn test_chain() {
        let mut b = AstBuilder::new();
        let giver = b.ident("giver");
        let gift = b.method(giver, "gift", vec![]);
        let iter = b.method(gift, "iter", vec![]);
        let ret = b.ret(iter);
        let def = b.function("iterate", &["giver"], vec![ret]);
        let program = Program {
            items: vec![Item::Function(def)],
        };
        let contract = build(&program, 0).unwrap();
        let links = contract.return_links();
        let iter_link = links
            .iter()
            .find(|l| l.capability == Capability::method("iter", 1))
            .unwrap();
        assert_eq!(contract.chain(iter_link.receiver), vec!["giver", "gift/1"]);
    }
}
