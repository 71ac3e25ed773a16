//! Orchestrates a full analysis run.
//!
//! 1. Build the symbol and type tables, then every function's contract
//!    (in parallel when enabled).
//! 2. Static pass: evaluate each function once, callees first, iterating
//!    recursive components until their return summaries are stable.
//! 3. Instantiate the entry point and roots with their resolved parameter
//!    types. Every call reached from there is instantiated with its
//!    call-site argument types through the instantiation cache.
//! 4. Collect diagnostics: errors for what the roots require, warnings for
//!    the rest.

use crate::compiler::ast::{ClassDef, FnDef, NodeId, Program, Span};
use crate::compiler::callgraph::CallGraph;
use crate::compiler::contract::{ContractBuilder, ContractState, InterfaceContract};
use crate::compiler::diagnostics::{self, ContractError, Diagnostic, Severity};
use crate::compiler::dynamic::{DynDescriptor, DynResolver};
use crate::compiler::intersection::IntersectionType;
use crate::compiler::monomorphise::{
    self, InstanceState, Instantiation, InstantiationCache, InstantiationId, TyKey,
};
use crate::compiler::resolver::{
    CallOutcome, CallResolver, Evaluation, Flow, SiteError, TypeResolver, check_call_args,
};
use crate::compiler::types::{
    Capability, ClassId, FunctionId, FunctionTable, IntersectionId, SigTy, Ty, TypeTable,
};
use crate::config::EngineConfig;
#[cfg(feature = "parallel")]
use rayon::prelude::*;
use serde::Serialize;
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

/// How a parameter was resolved without a call site.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum ParamResolution {
    Concrete(ClassId),
    AbstractBound(ClassId),
    Intersection(IntersectionId),
    /// Left to the call site.
    Open {
        capabilities: BTreeSet<Capability>,
        candidates: Vec<ClassId>,
    },
}

/// Result of the static pass for one function.
#[derive(Debug, Clone)]
pub struct StaticResolution {
    pub params: Vec<ParamResolution>,
    pub ret: Flow,
    pub evaluation: Evaluation,
    /// Parameter and recursion errors; site errors are in `evaluation`.
    pub errors: Vec<SiteError>,
}

impl StaticResolution {
    pub fn all_errors(&self) -> impl Iterator<Item = &SiteError> {
        self.errors.iter().chain(self.evaluation.errors.iter())
    }
}

/// Which evaluation of a function a node's type belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub enum Context {
    Static(FunctionId),
    Instance(InstantiationId),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct NodeKey {
    pub context: Context,
    pub node: NodeId,
}

/// Everything the analysis produced, queryable by syntax-tree node.
#[derive(Debug)]
pub struct Analysis {
    pub table: Arc<TypeTable>,
    pub functions: Arc<FunctionTable>,
    pub contracts: Vec<ContractState>,
    pub statics: Vec<Option<StaticResolution>>,
    pub cache: InstantiationCache,
    pub node_types: HashMap<NodeKey, Ty>,
    pub call_sites: HashMap<NodeKey, InstantiationId>,
    pub unresolved_sites: BTreeSet<NodeKey>,
    pub diagnostics: Vec<Diagnostic>,
}

impl Analysis {
    pub fn function_id(&self, name: &str) -> Option<FunctionId> {
        self.functions.lookup(name)
    }

    pub fn contract(&self, name: &str) -> Option<&InterfaceContract> {
        let id = self.function_id(name)?;
        self.contracts[id.0 as usize].contract().map(|c| c.as_ref())
    }

    pub fn is_unresolved(&self, name: &str) -> bool {
        self.function_id(name)
            .is_some_and(|id| !self.contracts[id.0 as usize].is_resolved())
    }

    pub fn instantiation(&self, mangled: &str) -> Option<Instantiation> {
        self.cache.by_mangled_name(mangled)
    }

    pub fn instantiations_of(&self, name: &str) -> Vec<Instantiation> {
        let Some(id) = self.function_id(name) else {
            return Vec::new();
        };
        self.cache.all().into_iter().filter(|i| i.function == id).collect()
    }

    pub fn static_resolution(&self, name: &str) -> Option<&StaticResolution> {
        let id = self.function_id(name)?;
        self.statics[id.0 as usize].as_ref()
    }

    pub fn param_resolution(&self, name: &str, index: usize) -> Option<&ParamResolution> {
        self.static_resolution(name)?.params.get(index)
    }

    pub fn node_type(&self, context: Context, node: NodeId) -> Option<Ty> {
        self.node_types.get(&NodeKey { context, node }).copied()
    }

    pub fn call_site(&self, context: Context, node: NodeId) -> Option<InstantiationId> {
        self.call_sites.get(&NodeKey { context, node }).copied()
    }

    pub fn dyn_at(&self, context: Context, node: NodeId) -> Option<DynDescriptor> {
        match self.node_type(context, node)? {
            Ty::Dyn(id) => Some(self.table.dyn_descriptor(id)),
            _ => None,
        }
    }

    pub fn intersection_at(&self, context: Context, node: NodeId) -> Option<IntersectionType> {
        match self.node_type(context, node)? {
            Ty::Intersection(id) => Some(self.table.intersection(id)),
            _ => None,
        }
    }

    pub fn errors(&self) -> impl Iterator<Item = &Diagnostic> {
        self.diagnostics.iter().filter(|d| d.is_error())
    }

    pub fn warnings(&self) -> impl Iterator<Item = &Diagnostic> {
        self.diagnostics.iter().filter(|d| !d.is_error())
    }

    pub fn is_success(&self) -> bool {
        self.errors().next().is_none()
    }

    pub fn exit_code(&self) -> i32 {
        if self.is_success() { 0 } else { 1 }
    }

    pub fn display(&self, ty: &Ty) -> String {
        self.table.display(ty)
    }
}

/// Call resolution during the static pass: return summaries only.
struct StaticCalls<'a> {
    table: &'a TypeTable,
    functions: &'a FunctionTable,
    contracts: &'a [ContractState],
    summaries: &'a [Option<Flow>],
}

impl StaticCalls<'_> {
    /// A callee's summary stands for every call only if its parameters are
    /// fixed by declaration.
    fn summary(&self, function: FunctionId) -> CallOutcome {
        let Some(contract) = self.contracts[function.0 as usize].contract() else {
            return CallOutcome::Unresolved;
        };
        if !contract.is_monomorphic() {
            return CallOutcome::Summary(Flow::Open);
        }
        match self.summaries[function.0 as usize] {
            Some(flow @ (Flow::Known(_) | Flow::Pending)) => CallOutcome::Summary(flow),
            _ => CallOutcome::Summary(Flow::Open),
        }
    }
}

impl CallResolver for StaticCalls<'_> {
    fn resolve_call(&mut self, function: FunctionId, args: &[Flow], span: Span) -> CallOutcome {
        if let Some(contract) = self.contracts[function.0 as usize].contract() {
            if let Err(error) = check_call_args(self.table, contract, args, span) {
                return CallOutcome::Rejected(error);
            }
        }
        self.summary(function)
    }

    fn resolve_method(&mut self, method: FunctionId, receiver: ClassId, _: &[Flow], _: Span) -> CallOutcome {
        let owner = self.functions.get(method).owner.as_deref();
        if owner != Some(self.table.name(receiver)) {
            return CallOutcome::Summary(Flow::Open);
        }
        self.summary(method)
    }
}

/// Resolve declared or single-candidate parameter types.
fn resolve_params(
    table: &TypeTable,
    contract: &InterfaceContract,
    is_root: bool,
    errors: &mut Vec<SiteError>,
) -> (Vec<ParamResolution>, Vec<Flow>) {
    let mut resolutions = Vec::new();
    let mut flows = Vec::new();
    for (index, declared) in contract.declared.iter().enumerate() {
        let var = contract.var(contract.params[index]);
        let (resolution, flow) = match declared {
            Some(SigTy::Class(id)) if table.class(*id).is_abstract() => {
                (ParamResolution::AbstractBound(*id), Flow::Bound(*id))
            }
            Some(SigTy::Class(id)) => (ParamResolution::Concrete(*id), Flow::Known(Ty::Concrete(*id))),
            Some(SigTy::Intersection(id)) => (
                ParamResolution::Intersection(*id),
                Flow::Known(Ty::Intersection(*id)),
            ),
            _ => {
                let capabilities = contract.param_capabilities(index);
                let candidates = if capabilities.is_empty() {
                    Vec::new()
                } else {
                    table.concrete_candidates(&capabilities)
                };
                match candidates.as_slice() {
                    [single] => (ParamResolution::Concrete(*single), Flow::Known(Ty::Concrete(*single))),
                    [] if !capabilities.is_empty() => {
                        let required: Vec<String> = capabilities.iter().map(|c| c.to_string()).collect();
                        errors.push(SiteError {
                            node: var.node,
                            error: ContractError::UnsatisfiableContract {
                                capability: None,
                                reason: format!(
                                    "no type implements every capability required of `{}`: {}",
                                    contract.param_name(index),
                                    required.join(", ")
                                ),
                                span: var.span,
                            },
                        });
                        (ParamResolution::Open { capabilities, candidates }, Flow::Open)
                    }
                    _ => {
                        if is_root && candidates.len() > 1 {
                            errors.push(SiteError {
                                node: var.node,
                                error: ContractError::AmbiguousOverloadResolution {
                                    binding: contract.param_name(index).to_string(),
                                    candidates: candidates.iter().map(|c| table.name(*c).to_string()).collect(),
                                    span: var.span,
                                },
                            });
                        }
                        (ParamResolution::Open { capabilities, candidates }, Flow::Open)
                    }
                }
            }
        };
        resolutions.push(resolution);
        flows.push(flow);
    }
    (resolutions, flows)
}

fn self_flow(table: &TypeTable, contract: &InterfaceContract) -> Option<Flow> {
    contract.owner.map(|owner| Flow::from_sig(&SigTy::Class(owner), table, None))
}

fn build_contracts(
    items: &[(FunctionId, Option<&ClassDef>, &FnDef)],
    builder: &ContractBuilder<'_>,
    parallel: bool,
) -> Vec<ContractState> {
    let build = |(id, owner, def): &(FunctionId, Option<&ClassDef>, &FnDef)| builder.build_state(*id, *owner, def);
    #[cfg(feature = "parallel")]
    if parallel {
        return items.par_iter().map(build).collect();
    }
    #[cfg(not(feature = "parallel"))]
    let _ = parallel;
    items.iter().map(build).collect()
}

struct Frame {
    instantiation: InstantiationId,
    /// Lowest stack depth reachable through calls from this frame.
    lowlink: usize,
    /// Some call reached this frame while it was on the stack.
    recursive: bool,
    /// Cycle members evaluated beneath this frame.
    members: Vec<InstantiationId>,
}

pub struct Engine<'c> {
    config: &'c EngineConfig,
    table: Arc<TypeTable>,
    functions: Arc<FunctionTable>,
    contracts: Vec<ContractState>,
    statics: Vec<Option<StaticResolution>>,
    summaries: Vec<Option<Flow>>,
    cache: InstantiationCache,
    stack: Vec<Frame>,
    outputs: HashMap<InstantiationId, Evaluation>,
    requested: BTreeSet<FunctionId>,
    root_errors: Vec<(FunctionId, SiteError)>,
    registration_errors: Vec<(String, ContractError)>,
}

impl<'c> Engine<'c> {
    pub fn new(program: &Program, config: &'c EngineConfig) -> Self {
        let functions = FunctionTable::from_program(program);
        let (table, registration_errors) = TypeTable::from_program(program, &functions);
        tracing::debug!(
            functions = functions.len(),
            classes = table.classes().count(),
            "tables built"
        );

        let items: Vec<(FunctionId, Option<&ClassDef>, &FnDef)> = program
            .functions()
            .filter_map(|(owner, def)| functions.by_node(def.id).map(|id| (id, owner, def)))
            .collect();
        let contracts = build_contracts(&items, &ContractBuilder::new(&table, &functions), config.parallel);

        let count = functions.len();
        Self {
            config,
            table: Arc::new(table),
            functions: Arc::new(functions),
            contracts,
            statics: vec![None; count],
            summaries: vec![None; count],
            cache: InstantiationCache::new(),
            stack: Vec::new(),
            outputs: HashMap::new(),
            requested: BTreeSet::new(),
            root_errors: Vec::new(),
            registration_errors,
        }
    }

    pub fn run(mut self) -> Analysis {
        let mut roots = Vec::new();
        for name in self.config.required() {
            match self.functions.lookup(name) {
                Some(id) => roots.push(id),
                None => tracing::warn!(function = name, "required function not found"),
            }
        }

        self.static_pass(&roots);
        for root in &roots {
            self.instantiate_root(*root);
        }
        self.finish()
    }

    fn static_pass(&mut self, roots: &[FunctionId]) {
        let graph = CallGraph::build(&self.contracts, &self.functions);
        let max = self.config.max_fixpoint_iterations.max(1);
        for component in graph.sccs() {
            if !graph.is_recursive(&component) {
                let function = component[0];
                self.resolve_static(function, roots.contains(&function));
                continue;
            }

            for function in &component {
                if self.contracts[function.0 as usize].is_resolved() {
                    self.summaries[function.0 as usize] = Some(Flow::Pending);
                }
            }
            let mut iterations = 0;
            let mut converged = false;
            while iterations < max {
                iterations += 1;
                let mut changed = false;
                for function in &component {
                    let before = self.summaries[function.0 as usize];
                    self.resolve_static(*function, roots.contains(function));
                    changed |= self.summaries[function.0 as usize] != before;
                }
                tracing::trace!(iteration = iterations, ?component, changed, "recursive component round");
                if !changed {
                    converged = true;
                    break;
                }
            }

            for function in &component {
                let index = function.0 as usize;
                let pending = self.summaries[index] == Some(Flow::Pending);
                if converged && !pending {
                    continue;
                }
                let info = self.functions.get(*function);
                let error = SiteError {
                    node: None,
                    error: ContractError::UnresolvedRecursiveContract {
                        function: info.name.clone(),
                        iterations,
                        span: info.span,
                    },
                };
                if let Some(resolution) = &mut self.statics[index] {
                    resolution.errors.push(error);
                }
            }
        }
    }

    fn resolve_static(&mut self, function: FunctionId, is_root: bool) {
        let index = function.0 as usize;
        let Some(contract) = self.contracts[index].contract().cloned() else {
            return;
        };
        let table = Arc::clone(&self.table);
        let functions = Arc::clone(&self.functions);
        let mut errors = Vec::new();
        let (params, flows) = resolve_params(&table, &contract, is_root, &mut errors);
        let mut calls = StaticCalls {
            table: &table,
            functions: &functions,
            contracts: &self.contracts,
            summaries: &self.summaries,
        };
        let evaluation =
            TypeResolver::new(&table, &functions, &contract, &mut calls).evaluate(self_flow(&table, &contract), flows);
        let ret = evaluation.ret;
        self.summaries[index] = Some(ret);
        self.statics[index] = Some(StaticResolution {
            params,
            ret,
            evaluation,
            errors,
        });
    }

    fn instantiate_root(&mut self, root: FunctionId) {
        self.requested.insert(root);
        let index = root.0 as usize;
        let Some(contract) = self.contracts[index].contract().cloned() else {
            return;
        };
        let Some(resolution) = &self.statics[index] else {
            return;
        };
        let ambiguous: Vec<SiteError> = resolution
            .errors
            .iter()
            .filter(|e| matches!(e.error, ContractError::AmbiguousOverloadResolution { .. }))
            .cloned()
            .collect();
        let args: Option<Vec<Ty>> = resolution
            .params
            .iter()
            .map(|p| match p {
                ParamResolution::Concrete(id) => Some(Ty::Concrete(*id)),
                ParamResolution::Intersection(id) => Some(Ty::Intersection(*id)),
                _ => None,
            })
            .collect();
        self.root_errors.extend(ambiguous.into_iter().map(|e| (root, e)));
        let Some(args) = args else {
            tracing::debug!(function = %contract.name, "root parameters not fixed, not instantiated");
            return;
        };
        let receiver = contract
            .owner
            .filter(|owner| !self.table.class(*owner).is_abstract())
            .map(Ty::Concrete);
        if contract.owner.is_some() && receiver.is_none() {
            return;
        }
        self.instantiate(root, contract, receiver, args);
    }

    fn instantiate(
        &mut self,
        function: FunctionId,
        contract: Arc<InterfaceContract>,
        receiver: Option<Ty>,
        args: Vec<Ty>,
    ) -> CallOutcome {
        let key_args: Vec<Ty> = receiver.iter().copied().chain(args.iter().copied()).collect();
        let receiver_keys = receiver.iter().map(|ty| TyKey::of(ty, &self.table));
        let arg_keys = args.iter().enumerate().map(|(index, ty)| match ty {
            Ty::Dyn(_) => TyKey::Dyn(self.required_capabilities(function, index, &mut BTreeSet::new())),
            _ => TyKey::of(ty, &self.table),
        });
        let keys = receiver_keys.chain(arg_keys).collect();
        let name = self.functions.get(function).name.clone();
        let (id, created) = self
            .cache
            .get_or_create_keyed(&self.table, function, &name, &key_args, keys);
        if created {
            let ret = self.evaluate_instance(id, &contract, receiver, &args, false);
            return self.outcome(id, ret);
        }

        if let Some(depth) = self.stack.iter().position(|f| f.instantiation == id) {
            tracing::trace!(instantiation = id.0, "recursive instantiation");
            self.stack[depth].recursive = true;
            if let Some(top) = self.stack.last_mut() {
                top.lowlink = top.lowlink.min(depth);
            }
            return CallOutcome::Resolved {
                instantiation: id,
                ret: self.cache.ret(id),
            };
        }

        match self.cache.state(id) {
            InstanceState::Stale | InstanceState::InProgress => {
                let ret = self.evaluate_instance(id, &contract, receiver, &args, false);
                self.outcome(id, ret)
            }
            InstanceState::Resolved | InstanceState::Failed => {
                let witnesses = monomorphise::dyn_witnesses(&key_args, &self.table);
                if self.cache.add_witnesses(id, witnesses) {
                    tracing::debug!(instantiation = %name, "dyn witnesses grew, revalidating");
                    let ret = self.evaluate_instance(id, &contract, receiver, &args, true);
                    return self.outcome(id, ret);
                }
                self.outcome(id, self.cache.ret(id))
            }
        }
    }

    fn outcome(&self, id: InstantiationId, ret: Flow) -> CallOutcome {
        match self.cache.state(id) {
            InstanceState::Failed => CallOutcome::Failed,
            _ => CallOutcome::Resolved {
                instantiation: id,
                ret,
            },
        }
    }

    fn evaluate_instance(
        &mut self,
        id: InstantiationId,
        contract: &Arc<InterfaceContract>,
        receiver: Option<Ty>,
        args: &[Ty],
        revalidate: bool,
    ) -> Flow {
        let depth = self.stack.len();
        self.stack.push(Frame {
            instantiation: id,
            lowlink: depth,
            recursive: false,
            members: Vec::new(),
        });
        self.cache.set_state(id, InstanceState::InProgress);

        let max = self.config.max_fixpoint_iterations.max(1);
        let mut iteration = 0;
        let mut recursion_error = None;
        let mut evaluation = loop {
            iteration += 1;
            let evaluation = self.evaluate_once(contract, receiver, args);
            let frame = &self.stack[depth];
            if frame.lowlink < depth || !frame.recursive {
                break evaluation;
            }
            let previous = self.cache.ret(id);
            self.cache.set_ret(id, evaluation.ret);
            tracing::trace!(function = %contract.name, instantiation = id.0, iteration, "recursive instantiation round");
            if evaluation.ret == previous {
                if evaluation.ret == Flow::Pending {
                    recursion_error = Some(iteration);
                }
                break evaluation;
            }
            if iteration >= max {
                recursion_error = Some(iteration);
                break evaluation;
            }
        };

        let Some(frame) = self.stack.pop() else {
            return evaluation.ret;
        };
        if let Some(iterations) = recursion_error {
            evaluation.errors.push(SiteError {
                node: None,
                error: ContractError::UnresolvedRecursiveContract {
                    function: contract.name.clone(),
                    iterations,
                    span: contract.span,
                },
            });
        }
        self.cache.set_ret(id, evaluation.ret);
        let ret = evaluation.ret;
        if revalidate {
            if let Some(previous) = self.outputs.remove(&id) {
                for error in previous.errors {
                    if !evaluation.errors.contains(&error) {
                        evaluation.errors.push(error);
                    }
                }
            }
        }
        self.outputs.insert(id, evaluation);

        if frame.lowlink < depth {
            self.cache.set_state(id, InstanceState::Stale);
            if let Some(parent) = self.stack.last_mut() {
                parent.lowlink = parent.lowlink.min(frame.lowlink);
                parent.members.push(id);
                parent.members.extend(frame.members);
            }
        } else {
            self.settle(id);
            for member in frame.members {
                self.settle(member);
            }
        }
        ret
    }

    fn settle(&mut self, id: InstantiationId) {
        let clean = self.outputs.get(&id).is_none_or(|e| e.is_clean());
        let state = if clean {
            InstanceState::Resolved
        } else {
            InstanceState::Failed
        };
        self.cache.set_state(id, state);
    }

    fn evaluate_once(&mut self, contract: &InterfaceContract, receiver: Option<Ty>, args: &[Ty]) -> Evaluation {
        let table = Arc::clone(&self.table);
        let functions = Arc::clone(&self.functions);
        let self_flow = receiver.map(Flow::Known);
        let params = args.iter().copied().map(Flow::Known).collect();
        TypeResolver::new(&table, &functions, contract, self).evaluate(self_flow, params)
    }

    /// Return summary used when a call cannot be instantiated.
    fn summary(&self, function: FunctionId) -> Flow {
        let index = function.0 as usize;
        match (self.contracts[index].contract(), self.summaries[index]) {
            (Some(contract), Some(flow @ Flow::Known(_))) if contract.is_monomorphic() => flow,
            _ => Flow::Open,
        }
    }

    /// Capabilities required of parameter `index` of `function`, including
    /// those of every free function it is passed on to.
    fn required_capabilities(
        &self,
        function: FunctionId,
        index: usize,
        seen: &mut BTreeSet<(FunctionId, usize)>,
    ) -> BTreeSet<Capability> {
        if !seen.insert((function, index)) {
            return BTreeSet::new();
        }
        let Some(contract) = self.contracts[function.0 as usize].contract() else {
            return BTreeSet::new();
        };
        let mut capabilities = contract.param_capabilities(index);
        let Some(param) = contract.params.get(index) else {
            return capabilities;
        };
        for constraint in contract.positions.iter().filter(|p| p.free && p.var == *param) {
            if self.table.lookup(&constraint.target).is_some() {
                continue;
            }
            if let Some(callee) = self.functions.lookup(&constraint.target) {
                capabilities.extend(self.required_capabilities(callee, constraint.position, seen));
            }
        }
        capabilities
    }

    /// Merge everything the callee requires of its dyn arguments into their
    /// descriptors before the call is instantiated.
    fn merge_dyn_requirements(&self, function: FunctionId, args: &[Ty]) {
        let resolver = DynResolver::new(&self.table);
        for (index, arg) in args.iter().enumerate() {
            let Ty::Dyn(id) = arg else {
                continue;
            };
            for capability in self.required_capabilities(function, index, &mut BTreeSet::new()) {
                // a retained type lacking it fails in the callee's evaluation
                if let Err(missing) = resolver.require(*id, &capability) {
                    tracing::trace!(dyn_id = id.0, %capability, ?missing, "dyn requirement left to the callee");
                }
            }
        }
    }

    fn call(
        &mut self,
        function: FunctionId,
        receiver: Option<ClassId>,
        args: &[Flow],
        span: Span,
    ) -> CallOutcome {
        self.requested.insert(function);
        let Some(contract) = self.contracts[function.0 as usize].contract().cloned() else {
            return CallOutcome::Unresolved;
        };
        if let Err(error) = check_call_args(&self.table, &contract, args, span) {
            return CallOutcome::Rejected(error);
        }
        if args.contains(&Flow::Pending) {
            return CallOutcome::Summary(Flow::Pending);
        }
        let Some(tys) = args.iter().map(|a| a.known()).collect::<Option<Vec<Ty>>>() else {
            return CallOutcome::Summary(self.summary(function));
        };
        self.merge_dyn_requirements(function, &tys);
        self.instantiate(function, contract, receiver.map(Ty::Concrete), tys)
    }

    fn finish(self) -> Analysis {
        let mut diagnostics = Vec::new();
        let function_name = |id: FunctionId| self.functions.get(id).name.clone();

        for (owner, error) in &self.registration_errors {
            diagnostics.push(Diagnostic::new(Severity::Warning, Some(owner.clone()), error.clone()));
        }

        let instantiated: BTreeSet<FunctionId> = self.cache.all().iter().map(|i| i.function).collect();
        for (index, state) in self.contracts.iter().enumerate() {
            let id = FunctionId(index as u32);
            match state {
                ContractState::Unresolved(errors) => {
                    let severity = if self.requested.contains(&id) {
                        Severity::Error
                    } else {
                        Severity::Warning
                    };
                    for error in errors {
                        diagnostics.push(Diagnostic::new(severity, Some(function_name(id)), error.clone()));
                    }
                }
                ContractState::Resolved(_) if instantiated.contains(&id) => {}
                ContractState::Resolved(_) => {
                    if let Some(resolution) = &self.statics[index] {
                        for site in resolution.all_errors() {
                            diagnostics.push(
                                Diagnostic::new(Severity::Warning, Some(function_name(id)), site.error.clone())
                                    .at(site.node),
                            );
                        }
                    }
                }
            }
        }

        for (root, site) in &self.root_errors {
            diagnostics.push(
                Diagnostic::new(Severity::Error, Some(function_name(*root)), site.error.clone()).at(site.node),
            );
        }

        let mut node_types = HashMap::new();
        let mut call_sites = HashMap::new();
        let mut unresolved_sites = BTreeSet::new();
        let mut record = |context: Context, evaluation: &Evaluation| {
            for (node, ty) in &evaluation.node_types {
                node_types.insert(NodeKey { context, node: *node }, *ty);
            }
            for (node, instantiation) in &evaluation.call_sites {
                call_sites.insert(NodeKey { context, node: *node }, *instantiation);
            }
            for node in &evaluation.unresolved_sites {
                unresolved_sites.insert(NodeKey { context, node: *node });
            }
        };
        for (index, resolution) in self.statics.iter().enumerate() {
            if let Some(resolution) = resolution {
                record(Context::Static(FunctionId(index as u32)), &resolution.evaluation);
            }
        }
        for (id, evaluation) in &self.outputs {
            record(Context::Instance(*id), evaluation);
            let function = self.cache.get(*id).function;
            for site in &evaluation.errors {
                diagnostics.push(
                    Diagnostic::new(Severity::Error, Some(function_name(function)), site.error.clone())
                        .at(site.node),
                );
            }
        }

        if !self.config.warn_unreachable {
            diagnostics.retain(|d| d.is_error());
        }
        let diagnostics = diagnostics::normalize(diagnostics);
        tracing::debug!(
            instantiations = self.cache.len(),
            diagnostics = diagnostics.len(),
            "analysis finished"
        );

        Analysis {
            table: self.table,
            functions: self.functions,
            contracts: self.contracts,
            statics: self.statics,
            cache: self.cache,
            node_types,
            call_sites,
            unresolved_sites,
            diagnostics,
        }
    }
}

impl CallResolver for Engine<'_> {
    fn resolve_call(&mut self, function: FunctionId, args: &[Flow], span: Span) -> CallOutcome {
        self.call(function, None, args, span)
    }

    fn resolve_method(&mut self, method: FunctionId, receiver: ClassId, args: &[Flow], span: Span) -> CallOutcome {
        self.call(method, Some(receiver), args, span)
    }
}

/// Analyse a whole program.
pub fn analyze(program: &Program, config: &EngineConfig) -> Analysis {
    Engine::new(program, config).run()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compiler::ast::{AstBuilder, BinaryOp, Item, UnaryOp};
    use crate::compiler::types::{FLOAT, INT};

    fn program(items: Vec<Item>) -> Program {
        Program { items }
    }

    #[test]
    fn test_recursive_factorial_converges() {
        let mut b = AstBuilder::new();
        let n = b.ident("n");
        let one = b.int(1);
        let cond = b.binary(BinaryOp::Lt, n, one);
        let one = b.int(1);
        let base = b.ret(one);
        let check = b.if_(cond, vec![base], None);
        let n = b.ident("n");
        let n2 = b.ident("n");
        let one = b.int(1);
        let dec = b.binary(BinaryOp::Sub, n2, one);
        let rec = b.call("fact", vec![dec]);
        let product = b.binary(BinaryOp::Mul, n, rec);
        let ret = b.ret(product);
        let fact = b.function("fact", &["n"], vec![check, ret]);

        let five = b.int(5);
        let call = b.call("fact", vec![five]);
        let ret = b.ret(call);
        let main = b.function("main", &[], vec![ret]);

        let analysis = analyze(
            &program(vec![Item::Function(fact), Item::Function(main)]),
            &EngineConfig::default(),
        );
        assert!(analysis.is_success(), "{:?}", analysis.diagnostics);
        let instance = analysis.instantiation("fact__int").unwrap();
        assert_eq!(instance.ret, Flow::Known(Ty::Concrete(INT)));
        assert_eq!(instance.state, InstanceState::Resolved);
    }

    #[test]
    fn test_unproductive_recursion_is_reported() {
        let mut b = AstBuilder::new();
        let n = b.ident("n");
        let rec = b.call("spin", vec![n]);
        let ret = b.ret(rec);
        let spin = b.function("spin", &["n"], vec![ret]);
        let one = b.int(1);
        let call = b.call("spin", vec![one]);
        let ret = b.ret(call);
        let main = b.function("main", &[], vec![ret]);

        let analysis = analyze(
            &program(vec![Item::Function(spin), Item::Function(main)]),
            &EngineConfig::default(),
        );
        assert!(!analysis.is_success());
        assert!(analysis.errors().any(|d| matches!(
            d.error,
            ContractError::UnresolvedRecursiveContract { .. }
        )));
    }

    #[test]
    fn test_several_candidates_stay_open() {
        let mut b = AstBuilder::new();
        let x = b.ident("x");
        let neg = b.unary(UnaryOp::Neg, x);
        let x = b.ident("x");
        let div = b.binary(BinaryOp::Div, neg, x);
        let ret = b.ret(div);
        let half = b.function("half", &["x"], vec![ret]);
        let analysis = analyze(&program(vec![Item::Function(half)]), &EngineConfig::library());
        // neg/1 and divide/2 exist on both int and float
        assert_eq!(
            analysis.param_resolution("half", 0),
            Some(&ParamResolution::Open {
                capabilities: [Capability::method("neg", 1), Capability::method("divide", 2)]
                    .into_iter()
                    .collect(),
                candidates: vec![INT, FLOAT],
            })
        );
    }

    #[test]
    fn test_dead_unresolved_function_only_warns() {
        let mut b = AstBuilder::new();
        let x = b.ident("x");
        let a = b.method(x, "size", vec![]);
        let s1 = b.stmt(a);
        let x = b.ident("x");
        let one = b.int(1);
        let c = b.method(x, "size", vec![one]);
        let s2 = b.stmt(c);
        let broken = b.function("broken", &["x"], vec![s1, s2]);
        let one = b.int(1);
        let ret = b.ret(one);
        let main = b.function("main", &[], vec![ret]);

        let analysis = analyze(
            &program(vec![Item::Function(broken), Item::Function(main)]),
            &EngineConfig::default(),
        );
        assert!(analysis.is_success());
        assert!(analysis.is_unresolved("broken"));
        assert_eq!(analysis.warnings().count(), 1);

        let quiet = EngineConfig {
            warn_unreachable: false,
            ..EngineConfig::default()
        };
        let mut b = AstBuilder::new();
        let x = b.ident("x");
        let a = b.method(x, "size", vec![]);
        let s1 = b.stmt(a);
        let x = b.ident("x");
        let one = b.int(1);
        let c = b.method(x, "size", vec![one]);
        let s2 = b.stmt(c);
        let broken = b.function("broken", &["x"], vec![s1, s2]);
        let analysis = analyze(&program(vec![Item::Function(broken)]), &quiet);
        assert!(analysis.diagnostics.is_empty());
    }

    #[test]
    fn test_parallel_and_sequential_contracts_agree() {
        let mut b = AstBuilder::new();
        let lhs = b.ident("a");
        let rhs = b.ident("b");
        let sum = b.binary(BinaryOp::Add, lhs, rhs);
        let ret = b.ret(sum);
        let add = b.function("add", &["a", "b"], vec![ret]);
        let p = program(vec![Item::Function(add)]);
        let sequential = EngineConfig {
            parallel: false,
            ..EngineConfig::library()
        };
        let a = analyze(&p, &EngineConfig::library());
        let b = analyze(&p, &sequential);
        assert_eq!(
            a.contract("add").unwrap().param_capabilities(0),
            b.contract("add").unwrap().param_capabilities(0)
        );
    }
}
