//! Type resolution: evaluates a contract's variables to types.
//!
//! The same evaluator runs in two modes. Statically, parameters take their
//! declared type or the single concrete candidate satisfying their direct
//! requirements, and calls use other functions' return summaries. When
//! instantiated, parameters are the call-site types and every call is
//! resolved through the instantiation cache. The [`CallResolver`] passed in
//! decides which.
//!
//! Values flow through a small lattice ([`Flow`]). Joins of statically
//! countable types go to the intersection resolver; anything that merges a
//! dyn value, or appended container elements, goes to the dyn resolver.

use crate::compiler::ast::{NodeId, Span};
use crate::compiler::contract::{InterfaceContract, TypeVar};
use crate::compiler::diagnostics::ContractError;
use crate::compiler::dynamic::{DynOrigin, DynResolver};
use crate::compiler::intersection::IntersectionResolver;
use crate::compiler::monomorphise::InstantiationId;
use crate::compiler::types::{
    Capability, ClassId, ClassKind, FunctionId, FunctionTable, LIST, MethodSig, SigTy, Ty, TypeTable,
};
use crate::compiler::usage::{BindingId, Origin};
use serde::Serialize;

/// What is known about a value during evaluation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Flow {
    /// A resolved type.
    Known(Ty),
    /// Some implementor of an abstract class.
    Bound(ClassId),
    /// Unconstrained; operations on it are not checked.
    Open,
    /// Depends on a return type that is still being computed.
    Pending,
}

impl Flow {
    pub fn known(self) -> Option<Ty> {
        match self {
            Flow::Known(ty) => Some(ty),
            _ => None,
        }
    }

    /// The flow of a value declared with `sig`.
    pub fn from_sig(sig: &SigTy, table: &TypeTable, receiver: Option<ClassId>) -> Flow {
        match sig {
            SigTy::Class(id) if table.class(*id).is_abstract() => Flow::Bound(*id),
            SigTy::Class(id) => Flow::Known(Ty::Concrete(*id)),
            SigTy::Intersection(id) => Flow::Known(Ty::Intersection(*id)),
            SigTy::SelfType => match receiver {
                Some(r) if table.class(r).is_abstract() => Flow::Bound(r),
                Some(r) => Flow::Known(Ty::Concrete(r)),
                None => Flow::Open,
            },
            SigTy::Any | SigTy::Inferred => Flow::Open,
        }
    }
}

/// Result of asking a [`CallResolver`] about a call.
#[derive(Debug, Clone, PartialEq)]
pub enum CallOutcome {
    /// The call site is bound to an instantiation.
    Resolved {
        instantiation: InstantiationId,
        ret: Flow,
    },
    /// No instantiation; the callee's return summary.
    Summary(Flow),
    /// The callee's instantiation failed.
    Failed,
    /// The arguments do not satisfy the callee's declared parameters.
    Rejected(ContractError),
    /// The callee's contract is unresolved.
    Unresolved,
}

/// Resolves calls to other functions on behalf of the evaluator.
pub trait CallResolver {
    fn resolve_call(&mut self, function: FunctionId, args: &[Flow], span: Span) -> CallOutcome;

    /// Resolve a user method body with `self` bound to `receiver`.
    fn resolve_method(
        &mut self,
        method: FunctionId,
        receiver: ClassId,
        args: &[Flow],
        span: Span,
    ) -> CallOutcome;
}

/// An error attached to the syntax node it was found at.
#[derive(Debug, Clone, PartialEq)]
pub struct SiteError {
    pub node: Option<NodeId>,
    pub error: ContractError,
}

/// Output of evaluating one function in one mode.
#[derive(Debug, Clone)]
pub struct Evaluation {
    pub flows: Vec<Flow>,
    pub ret: Flow,
    pub node_types: Vec<(NodeId, Ty)>,
    pub call_sites: Vec<(NodeId, InstantiationId)>,
    pub unresolved_sites: Vec<NodeId>,
    pub errors: Vec<SiteError>,
}

impl Evaluation {
    pub fn empty(ret: Flow) -> Self {
        Self {
            flows: Vec::new(),
            ret,
            node_types: Vec::new(),
            call_sites: Vec::new(),
            unresolved_sites: Vec::new(),
            errors: Vec::new(),
        }
    }

    pub fn is_clean(&self) -> bool {
        self.errors.is_empty()
    }
}

/// Check arguments of a free call against the callee's parameter count and
/// declared types. Abstract classes and intersections are matched
/// structurally, concrete classes by identity.
pub fn check_call_args(
    table: &TypeTable,
    contract: &InterfaceContract,
    args: &[Flow],
    span: Span,
) -> Result<(), ContractError> {
    if args.len() != contract.params.len() {
        return Err(ContractError::UnsatisfiableContract {
            capability: None,
            reason: format!(
                "`{}` takes {} arguments but {} were supplied",
                contract.name,
                contract.params.len(),
                args.len()
            ),
            span,
        });
    }
    for (i, (declared, arg)) in contract.declared.iter().zip(args).enumerate() {
        if let (Some(sig), Flow::Known(ty)) = (declared, arg) {
            if !table.accepts(sig, ty, contract.owner) {
                return Err(ContractError::UnsatisfiableContract {
                    capability: None,
                    reason: format!(
                        "parameter `{}` of `{}` expects `{}`, found `{}`",
                        contract.param_name(i),
                        contract.name,
                        table.display_sig(sig),
                        table.display(ty)
                    ),
                    span,
                });
            }
        }
    }
    Ok(())
}

enum Slot {
    Unvisited,
    Visiting,
    Done(Flow),
}

pub struct TypeResolver<'a> {
    table: &'a TypeTable,
    functions: &'a FunctionTable,
    contract: &'a InterfaceContract,
    calls: &'a mut dyn CallResolver,
    slots: Vec<Slot>,
    self_flow: Option<Flow>,
    params: Vec<Flow>,
    out: Evaluation,
}

impl<'a> TypeResolver<'a> {
    pub fn new(
        table: &'a TypeTable,
        functions: &'a FunctionTable,
        contract: &'a InterfaceContract,
        calls: &'a mut dyn CallResolver,
    ) -> Self {
        Self {
            table,
            functions,
            contract,
            calls,
            slots: contract.vars.iter().map(|_| Slot::Unvisited).collect(),
            self_flow: None,
            params: Vec::new(),
            out: Evaluation::empty(Flow::Open),
        }
    }

    /// Evaluate every variable of the contract, in creation order.
    pub fn evaluate(mut self, self_flow: Option<Flow>, params: Vec<Flow>) -> Evaluation {
        self.self_flow = self_flow;
        self.params = params;

        let count = self.contract.vars.len();
        let flows: Vec<Flow> = (0..count).map(|i| self.flow(BindingId(i as u32))).collect();
        let ret = self.return_flow();

        for (node, var) in &self.contract.nodes {
            if let Flow::Known(ty) = flows[var.index()] {
                self.out.node_types.push((*node, ty));
            }
        }
        self.out.flows = flows;
        self.out.ret = ret;
        self.out
    }

    fn flow(&mut self, var: TypeVar) -> Flow {
        match self.slots[var.index()] {
            Slot::Done(flow) => flow,
            Slot::Visiting => {
                tracing::trace!(var = var.0, "cyclic value, treating as open");
                Flow::Open
            }
            Slot::Unvisited => {
                self.slots[var.index()] = Slot::Visiting;
                let flow = self.compute(var);
                self.slots[var.index()] = Slot::Done(flow);
                flow
            }
        }
    }

    fn compute(&mut self, var: TypeVar) -> Flow {
        let contract = self.contract;
        match &contract.var(var).source {
            Origin::Param(i) => self.params.get(*i).copied().unwrap_or(Flow::Open),
            Origin::SelfValue => self.self_flow.unwrap_or(Flow::Open),
            Origin::Literal(class) => Flow::Known(Ty::Concrete(*class)),
            Origin::Unknown => Flow::Open,
            Origin::MethodResult {
                receiver,
                method,
                args,
            } => self.dispatch(var, *receiver, method, args),
            Origin::FieldResult { object, field } => self.read_field(var, *object, field),
            Origin::CallResult { callee, args } => self.call(var, callee, args),
            Origin::Container { .. } => Flow::Known(Ty::Concrete(LIST)),
            Origin::Element { container } => self.element(var, *container),
            Origin::Join(members) => {
                let flows: Vec<Flow> = members.iter().map(|m| self.flow(*m)).collect();
                self.join(var, flows)
            }
            Origin::Cast { value, target } => self.cast(var, *value, target),
            Origin::Declared { value, annotation } => self.declare(var, *value, annotation),
        }
    }

    fn error(&mut self, var: TypeVar, error: ContractError) {
        tracing::debug!(function = %self.contract.name, %error, "contract violation");
        self.out.errors.push(SiteError {
            node: self.contract.var(var).node,
            error,
        });
    }

    fn span(&self, var: TypeVar) -> Span {
        self.contract.var(var).span
    }

    fn origin(&self, var: TypeVar) -> DynOrigin {
        DynOrigin {
            function: self.contract.function,
            binding: var,
            node: self.contract.var(var).node,
        }
    }

    /// Report that `owner` lacks `capability`, required of `receiver` at the
    /// site producing `at`. A receiver that is itself the result of a
    /// capability or call makes this a return-link failure.
    fn missing(&mut self, at: TypeVar, receiver: TypeVar, capability: &Capability, owner: &str) {
        let reason = format!("`{}` does not implement `{}`", owner, capability);
        let span = self.span(at);
        let error = if self.contract.var(receiver).source.is_result() {
            let mut chain = self.contract.chain(receiver);
            chain.push(capability.to_string());
            ContractError::UnsatisfiableReturnContract {
                chain,
                capability: capability.to_string(),
                reason,
                span,
            }
        } else {
            ContractError::UnsatisfiableContract {
                capability: Some(capability.to_string()),
                reason,
                span,
            }
        };
        self.error(at, error);
    }

    /// Check that every possible member of `ty` provides `capability`.
    fn require(&mut self, at: TypeVar, receiver: TypeVar, ty: Ty, capability: &Capability) -> bool {
        match ty {
            Ty::Concrete(class) => {
                if self.table.class(class).has(capability) {
                    return true;
                }
                let owner = self.table.name(class).to_string();
                self.missing(at, receiver, capability, &owner);
                false
            }
            Ty::Intersection(id) => {
                match IntersectionResolver::new(self.table).require(id, capability, self.span(at)) {
                    Ok(()) => true,
                    Err(error) => {
                        self.error(at, error);
                        false
                    }
                }
            }
            Ty::Dyn(id) => match DynResolver::new(self.table).require(id, capability) {
                Ok(()) => true,
                Err(missing) => {
                    let owner = missing
                        .iter()
                        .map(|m| self.table.name(*m))
                        .collect::<Vec<_>>()
                        .join(", ");
                    self.missing(at, receiver, capability, &owner);
                    false
                }
            },
        }
    }

    /// The abstract class or intersection a parameter is declared with.
    fn declared_bound(&self, var: TypeVar) -> Option<&'a SigTy> {
        let contract = self.contract;
        let Origin::Param(index) = &contract.var(var).source else {
            return None;
        };
        match contract.declared.get(*index)?.as_ref()? {
            sig @ SigTy::Class(id) if self.table.class(*id).is_abstract() => Some(sig),
            sig @ SigTy::Intersection(_) => Some(sig),
            _ => None,
        }
    }

    /// A parameter declared with a bound may only be used through what the
    /// bound provides, whatever type the call site passed.
    fn within_bound(&mut self, at: TypeVar, receiver: TypeVar, capability: &Capability) -> bool {
        let table = self.table;
        match self.declared_bound(receiver) {
            Some(SigTy::Class(id)) => {
                let class = table.class(*id);
                if class.has(capability) {
                    return true;
                }
                self.missing(at, receiver, capability, &class.name);
                false
            }
            Some(SigTy::Intersection(id)) => self.require(at, receiver, Ty::Intersection(*id), capability),
            _ => true,
        }
    }

    fn dispatch(&mut self, var: TypeVar, receiver: TypeVar, method: &str, args: &[TypeVar]) -> Flow {
        let capability = Capability::method(method, args.len() + 1);
        let recv = self.flow(receiver);
        let arg_flows: Vec<Flow> = args.iter().map(|a| self.flow(*a)).collect();
        if !self.within_bound(var, receiver, &capability) {
            return Flow::Open;
        }

        match recv {
            Flow::Pending => Flow::Pending,
            Flow::Open => Flow::Open,
            Flow::Bound(abstract_class) => {
                let table = self.table;
                let class = table.class(abstract_class);
                match class.method(method, args.len() + 1) {
                    Some(sig) => {
                        self.check_args(var, sig, &arg_flows, abstract_class, method);
                        Flow::from_sig(&sig.ret, table, Some(abstract_class))
                    }
                    None => {
                        self.missing(var, receiver, &capability, &class.name);
                        Flow::Open
                    }
                }
            }
            Flow::Known(ty) => {
                if !self.require(var, receiver, ty, &capability) {
                    return Flow::Open;
                }
                let table = self.table;
                let mut results = Vec::new();
                let mut accepted = true;
                for member in table.members(&ty) {
                    let Some(sig) = table.class(member).method(method, args.len() + 1) else {
                        continue;
                    };
                    if !self.check_args(var, sig, &arg_flows, member, method) {
                        accepted = false;
                        continue;
                    }
                    let result = match sig.body {
                        Some(body) => {
                            let span = self.span(var);
                            let outcome = self.calls.resolve_method(body, member, &arg_flows, span);
                            let flow = self.call_outcome(var, outcome);
                            match &sig.ret {
                                SigTy::Inferred => flow,
                                ret => Flow::from_sig(ret, table, Some(member)),
                            }
                        }
                        None => Flow::from_sig(&sig.ret, table, Some(member)),
                    };
                    results.push(result);
                }
                if !accepted {
                    return Flow::Open;
                }
                match ty {
                    Ty::Dyn(_) => self.join_uncountable(var, results),
                    _ => self.join(var, results),
                }
            }
        }
    }

    /// Check argument flows against one member's signature. Dyn arguments
    /// are checked against every retained type.
    fn check_args(
        &mut self,
        var: TypeVar,
        sig: &MethodSig,
        args: &[Flow],
        member: ClassId,
        method: &str,
    ) -> bool {
        let mut ok = true;
        for (i, (expected, actual)) in sig.params.iter().zip(args).enumerate() {
            let Flow::Known(ty) = actual else {
                continue;
            };
            if self.table.accepts(expected, ty, Some(member)) {
                continue;
            }
            let capability = Capability::method(method, args.len() + 1);
            let reason = format!(
                "`{}.{}` expects `{}` at position {}, found `{}`",
                self.table.name(member),
                method,
                self.table.display_sig(expected),
                i + 1,
                self.describe_ty(ty)
            );
            let span = self.span(var);
            self.error(
                var,
                ContractError::UnsatisfiableContract {
                    capability: Some(capability.to_string()),
                    reason,
                    span,
                },
            );
            ok = false;
        }
        ok
    }

    fn describe_ty(&self, ty: &Ty) -> String {
        match ty {
            Ty::Dyn(_) => {
                let members: Vec<&str> = self
                    .table
                    .members(ty)
                    .iter()
                    .map(|m| self.table.name(*m))
                    .collect();
                format!("dyn({})", members.join(" | "))
            }
            _ => self.table.display(ty),
        }
    }

    fn read_field(&mut self, var: TypeVar, object: TypeVar, field: &str) -> Flow {
        let capability = Capability::field(field);
        if !self.within_bound(var, object, &capability) {
            return Flow::Open;
        }
        match self.flow(object) {
            Flow::Pending => Flow::Pending,
            Flow::Open => Flow::Open,
            Flow::Bound(abstract_class) => {
                let table = self.table;
                let class = table.class(abstract_class);
                match class.field(field) {
                    Some(sig) => Flow::from_sig(sig, table, Some(abstract_class)),
                    None => {
                        self.missing(var, object, &capability, &class.name);
                        Flow::Open
                    }
                }
            }
            Flow::Known(ty) => {
                if !self.require(var, object, ty, &capability) {
                    return Flow::Open;
                }
                let table = self.table;
                let results: Vec<Flow> = table
                    .members(&ty)
                    .into_iter()
                    .filter_map(|m| table.class(m).field(field).map(|sig| Flow::from_sig(sig, table, Some(m))))
                    .collect();
                match ty {
                    Ty::Dyn(_) => self.join_uncountable(var, results),
                    _ => self.join(var, results),
                }
            }
        }
    }

    fn call(&mut self, var: TypeVar, callee: &str, args: &[TypeVar]) -> Flow {
        let arg_flows: Vec<Flow> = args.iter().map(|a| self.flow(*a)).collect();
        if let Some(class) = self.table.lookup(callee) {
            return self.construct(var, class, &arg_flows);
        }
        let Some(function) = self.functions.lookup(callee) else {
            tracing::debug!(callee, "call to unknown function");
            return Flow::Open;
        };
        let span = self.span(var);
        let outcome = self.calls.resolve_call(function, &arg_flows, span);
        self.call_outcome(var, outcome)
    }

    fn call_outcome(&mut self, var: TypeVar, outcome: CallOutcome) -> Flow {
        let node = self.contract.var(var).node;
        match outcome {
            CallOutcome::Resolved { instantiation, ret } => {
                if let Some(node) = node {
                    self.out.call_sites.push((node, instantiation));
                }
                ret
            }
            CallOutcome::Summary(flow) => flow,
            CallOutcome::Failed | CallOutcome::Unresolved => {
                self.out.unresolved_sites.extend(node);
                Flow::Open
            }
            CallOutcome::Rejected(error) => {
                self.error(var, error);
                self.out.unresolved_sites.extend(node);
                Flow::Open
            }
        }
    }

    /// `A(args…)`: arguments are checked positionally against declared
    /// field types.
    fn construct(&mut self, var: TypeVar, class: ClassId, args: &[Flow]) -> Flow {
        let table = self.table;
        let info = table.class(class);
        let span = self.span(var);
        if matches!(info.kind, ClassKind::Abstract | ClassKind::Primitive) {
            self.error(
                var,
                ContractError::UnsatisfiableContract {
                    capability: None,
                    reason: format!("`{}` cannot be constructed", info.name),
                    span,
                },
            );
            return Flow::Open;
        }
        if args.len() != info.fields.len() {
            self.error(
                var,
                ContractError::UnsatisfiableContract {
                    capability: None,
                    reason: format!(
                        "`{}` has {} fields but {} arguments were supplied",
                        info.name,
                        info.fields.len(),
                        args.len()
                    ),
                    span,
                },
            );
            return Flow::Known(Ty::Concrete(class));
        }
        for ((field, expected), arg) in info.fields.iter().zip(args) {
            if let Flow::Known(ty) = arg {
                if !table.accepts(expected, ty, Some(class)) {
                    let reason = format!(
                        "field `{}` of `{}` expects `{}`, found `{}`",
                        field,
                        info.name,
                        table.display_sig(expected),
                        self.describe_ty(ty)
                    );
                    self.error(
                        var,
                        ContractError::UnsatisfiableContract {
                            capability: Some(format!(".{}", field)),
                            reason,
                            span,
                        },
                    );
                }
            }
        }
        Flow::Known(Ty::Concrete(class))
    }

    /// Element of a list literal: the join of its literal elements, or a dyn
    /// value once anything is appended.
    fn element(&mut self, var: TypeVar, container: TypeVar) -> Flow {
        let contract = self.contract;
        let Origin::Container { elements, appended } = &contract.var(container).source else {
            return Flow::Open;
        };
        let literal: Vec<Flow> = elements.iter().map(|e| self.flow(*e)).collect();
        if appended.is_empty() {
            if literal.is_empty() {
                return Flow::Open;
            }
            return self.join(var, literal);
        }
        let mut flows = literal;
        flows.extend(appended.iter().map(|a| self.flow(*a)));
        let tys: Vec<Ty> = flows.iter().filter_map(|f| f.known()).collect();
        if tys.is_empty() {
            return if flows.contains(&Flow::Pending) {
                Flow::Pending
            } else {
                Flow::Open
            };
        }
        Flow::Known(DynResolver::new(self.table).flow_into(self.origin(var), &tys))
    }

    /// Join of statically countable flows.
    fn join(&mut self, var: TypeVar, flows: Vec<Flow>) -> Flow {
        self.merge(var, flows, false)
    }

    /// Join of per-member results over a dyn receiver: disagreeing members
    /// stay dyn.
    fn join_uncountable(&mut self, var: TypeVar, flows: Vec<Flow>) -> Flow {
        self.merge(var, flows, true)
    }

    fn merge(&mut self, var: TypeVar, flows: Vec<Flow>, uncountable: bool) -> Flow {
        let any_pending = flows.contains(&Flow::Pending);
        let flows: Vec<Flow> = flows.into_iter().filter(|f| *f != Flow::Pending).collect();
        if flows.is_empty() {
            return if any_pending { Flow::Pending } else { Flow::Open };
        }
        if flows.contains(&Flow::Open) {
            return Flow::Open;
        }

        let bounds: Vec<ClassId> = flows
            .iter()
            .filter_map(|f| match f {
                Flow::Bound(c) => Some(*c),
                _ => None,
            })
            .collect();
        if !bounds.is_empty() {
            let first = bounds[0];
            if bounds.len() == flows.len() && bounds.iter().all(|b| *b == first) {
                return Flow::Bound(first);
            }
            return Flow::Open;
        }

        let tys: Vec<Ty> = flows.iter().filter_map(|f| f.known()).collect();
        let has_dyn = tys.iter().any(|t| matches!(t, Ty::Dyn(_)));
        if has_dyn || uncountable {
            if let Some(first) = tys.first() {
                if !has_dyn && tys.iter().all(|t| t == first) {
                    return Flow::Known(*first);
                }
            }
            return Flow::Known(DynResolver::new(self.table).flow_into(self.origin(var), &tys));
        }
        IntersectionResolver::new(self.table)
            .join(&tys)
            .map(Flow::Known)
            .unwrap_or(Flow::Open)
    }

    fn cast(&mut self, var: TypeVar, value: TypeVar, target: &SigTy) -> Flow {
        let table = self.table;
        let flow = self.flow(value);
        let span = self.span(var);
        let target_class = match target {
            SigTy::Class(c) => *c,
            SigTy::Intersection(id) => {
                return match flow {
                    Flow::Known(ty) if !table.accepts(target, &ty, None) => {
                        self.error(
                            var,
                            ContractError::UnsatisfiableContract {
                                capability: None,
                                reason: format!(
                                    "cannot cast `{}` to `{}`",
                                    self.describe_ty(&ty),
                                    table.display_sig(target)
                                ),
                                span,
                            },
                        );
                        Flow::Open
                    }
                    Flow::Pending => Flow::Pending,
                    _ => Flow::Known(Ty::Intersection(*id)),
                };
            }
            SigTy::Any | SigTy::SelfType | SigTy::Inferred => return flow,
        };
        let target_abstract = table.class(target_class).is_abstract();

        match flow {
            Flow::Pending => Flow::Pending,
            Flow::Open => Flow::from_sig(target, table, None),
            Flow::Bound(_) => Flow::from_sig(target, table, None),
            Flow::Known(ty) if target_abstract => {
                if table.accepts(target, &ty, None) {
                    Flow::Known(ty)
                } else {
                    self.error(
                        var,
                        ContractError::UnsatisfiableContract {
                            capability: None,
                            reason: format!(
                                "`{}` does not implement `{}`",
                                self.describe_ty(&ty),
                                table.name(target_class)
                            ),
                            span,
                        },
                    );
                    Flow::Open
                }
            }
            Flow::Known(Ty::Dyn(id)) => match DynResolver::new(table).cast(id, target_class, span) {
                Ok(ty) => Flow::Known(ty),
                Err(error) => {
                    self.error(var, error);
                    Flow::Open
                }
            },
            Flow::Known(Ty::Intersection(id)) => {
                if table.intersection(id).members.contains(&target_class) {
                    Flow::Known(Ty::Concrete(target_class))
                } else {
                    self.error(
                        var,
                        ContractError::IntersectionMemberMismatch {
                            capability: format!("as {}", table.name(target_class)),
                            intersection: table.display(&Ty::Intersection(id)),
                            missing: vec![table.name(target_class).to_string()],
                            span,
                        },
                    );
                    Flow::Open
                }
            }
            Flow::Known(Ty::Concrete(class)) => {
                if class == target_class {
                    Flow::Known(Ty::Concrete(class))
                } else {
                    self.error(
                        var,
                        ContractError::UnsatisfiableContract {
                            capability: None,
                            reason: format!(
                                "cannot cast `{}` to `{}`",
                                table.name(class),
                                table.name(target_class)
                            ),
                            span,
                        },
                    );
                    Flow::Open
                }
            }
        }
    }

    /// `let x: T = value`: the value must be acceptable as `T`; a known value
    /// keeps its precise type.
    fn declare(&mut self, var: TypeVar, value: TypeVar, declared: &SigTy) -> Flow {
        let table = self.table;
        match self.flow(value) {
            Flow::Pending => Flow::Pending,
            Flow::Known(ty) => {
                if table.accepts(declared, &ty, self.contract.owner) {
                    return Flow::Known(ty);
                }
                let name = self
                    .contract
                    .var(var)
                    .name
                    .clone()
                    .unwrap_or_else(|| "value".to_string());
                let reason = format!(
                    "`{}` is declared `{}` but holds `{}`",
                    name,
                    table.display_sig(declared),
                    self.describe_ty(&ty)
                );
                let span = self.span(var);
                self.error(
                    var,
                    ContractError::UnsatisfiableContract {
                        capability: None,
                        reason,
                        span,
                    },
                );
                Flow::from_sig(declared, table, self.contract.owner)
            }
            flow @ (Flow::Open | Flow::Bound(_)) => match declared {
                SigTy::Any | SigTy::Inferred => flow,
                _ => Flow::from_sig(declared, table, self.contract.owner),
            },
        }
    }

    /// The function's return flow, checked against its declared return type.
    fn return_flow(&mut self) -> Flow {
        let contract = self.contract;
        let table = self.table;
        let ret = self.flow(contract.ret);
        let Some(declared) = &contract.declared_ret else {
            return ret;
        };
        match ret {
            Flow::Known(ty) if table.accepts(declared, &ty, contract.owner) => ret,
            Flow::Known(ty) => {
                let reason = format!(
                    "`{}` is declared to return `{}` but returns `{}`",
                    contract.name,
                    table.display_sig(declared),
                    self.describe_ty(&ty)
                );
                self.error(
                    contract.ret,
                    ContractError::UnsatisfiableReturnContract {
                        chain: vec![contract.name.clone(), "return".to_string()],
                        capability: "return".to_string(),
                        reason,
                        span: contract.span,
                    },
                );
                Flow::from_sig(declared, table, contract.owner)
            }
            _ => match declared {
                SigTy::Any | SigTy::Inferred => ret,
                _ => Flow::from_sig(declared, table, contract.owner),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compiler::ast::{AstBuilder, BinaryOp, Item, Program};
    use crate::compiler::contract::ContractBuilder;
    use crate::compiler::types::{BOOL, INT, STR};

    /// Resolves every call to an open summary.
    struct NoCalls;

    impl CallResolver for NoCalls {
        fn resolve_call(&mut self, _: FunctionId, _: &[Flow], _: Span) -> CallOutcome {
            CallOutcome::Summary(Flow::Open)
        }

        fn resolve_method(&mut self, _: FunctionId, _: ClassId, _: &[Flow], _: Span) -> CallOutcome {
            CallOutcome::Summary(Flow::Open)
        }
    }

    fn evaluate(program: &Program, index: usize, params: Vec<Flow>) -> (Evaluation, TypeTable) {
        let functions = FunctionTable::from_program(program);
        let (table, _) = TypeTable::from_program(program, &functions);
        let (owner, def) = program.functions().nth(index).unwrap();
        let contract = ContractBuilder::new(&table, &functions)
            .build(FunctionId(index as u32), owner, def)
            .unwrap();
        let self_flow = contract.owner.map(|c| Flow::Known(Ty::Concrete(c)));
        let evaluation =
            TypeResolver::new(&table, &functions, &contract, &mut NoCalls).evaluate(self_flow, params);
        (evaluation, table)
    }

    fn add_program() -> Program {
        let mut b = AstBuilder::new();
        let lhs = b.ident("a");
        let rhs = b.ident("b");
        let sum = b.binary(BinaryOp::Add, lhs, rhs);
        let ret = b.ret(sum);
        Program {
            items: vec![Item::Function(b.function("add", &["a", "b"], vec![ret]))],
        }
    }

    #[test]
    fn test_add_ints() {
        let int = Flow::Known(Ty::Concrete(INT));
        let (evaluation, _) = evaluate(&add_program(), 0, vec![int, int]);
        assert!(evaluation.is_clean());
        assert_eq!(evaluation.ret, int);
    }

    #[test]
    fn test_add_bools_is_unsatisfiable() {
        let b = Flow::Known(Ty::Concrete(BOOL));
        let (evaluation, _) = evaluate(&add_program(), 0, vec![b, b]);
        assert_eq!(evaluation.errors.len(), 1);
        assert!(matches!(
            evaluation.errors[0].error,
            ContractError::UnsatisfiableContract { .. }
        ));
    }

    #[test]
    fn test_add_mismatched_argument() {
        let (evaluation, _) = evaluate(
            &add_program(),
            0,
            vec![Flow::Known(Ty::Concrete(INT)), Flow::Known(Ty::Concrete(STR))],
        );
        assert_eq!(evaluation.errors.len(), 1);
        assert_eq!(evaluation.ret, Flow::Open);
    }

    #[test]
    fn test_open_params_are_not_checked() {
        let (evaluation, _) = evaluate(&add_program(), 0, vec![Flow::Open, Flow::Open]);
        assert!(evaluation.is_clean());
        assert_eq!(evaluation.ret, Flow::Open);
    }

    #[test]
    fn test_conditional_joins_into_intersection() {
        let mut b = AstBuilder::new();
        let cond = b.bool(true);
        let one = b.int(1);
        let s = b.string("s");
        let pick = b.conditional(cond, one, s);
        let ret = b.ret(pick);
        let program = Program {
            items: vec![Item::Function(b.function("pick", &[], vec![ret]))],
        };
        let (evaluation, table) = evaluate(&program, 0, vec![]);
        let Flow::Known(Ty::Intersection(id)) = evaluation.ret else {
            panic!("expected intersection, got {:?}", evaluation.ret);
        };
        assert_eq!(table.intersection(id).members, [INT, STR].into_iter().collect());
    }

    #[test]
    fn test_appended_list_element_is_dyn() {
        let mut b = AstBuilder::new();
        let one = b.int(1);
        let list = b.list(vec![one]);
        let init = b.let_("xs", list);
        let xs = b.ident("xs");
        let hello = b.string("Hello");
        let append = b.method(xs, "append", vec![hello]);
        let stmt = b.stmt(append);
        let xs = b.ident("xs");
        let zero = b.int(0);
        let first = b.index(xs, zero);
        let ret = b.ret(first);
        let program = Program {
            items: vec![Item::Function(b.function("f", &[], vec![init, stmt, ret]))],
        };
        let (evaluation, table) = evaluate(&program, 0, vec![]);
        let Flow::Known(ty @ Ty::Dyn(_)) = evaluation.ret else {
            panic!("expected dyn, got {:?}", evaluation.ret);
        };
        assert_eq!(table.members(&ty), vec![INT, STR]);
    }
}
