//! Usage collection: walks one function body and records, for every
//! binding, each operation performed on it.
//!
//! Every value gets a binding, including anonymous temporaries such as the
//! result of a call. A binding's [`Origin`] says how its value is produced;
//! its [`UsageSite`]s say what is done with it. Aliases (`let y = x`) share
//! one binding, and reassignment rebinds the name.

use crate::compiler::ast::{Block, Expr, ExprKind, FnDef, NodeId, Span, Statement};
use crate::compiler::types::{BOOL, Capability, ClassId, FLOAT, INT, NIL, STR, TypeAnnotation};
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct BindingId(pub u32);

impl BindingId {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum BindingKind {
    Param(usize),
    SelfParam,
    Local,
    Return,
    Temporary,
}

/// How a binding's value is produced.
///
/// Generic over the annotation type so that the contract builder can carry
/// the same graph with annotations resolved against the type table.
#[derive(Debug, Clone, PartialEq)]
pub enum Origin<A = TypeAnnotation> {
    Param(usize),
    SelfValue,
    Literal(ClassId),
    /// An identifier that is not in scope.
    Unknown,
    MethodResult {
        receiver: BindingId,
        method: String,
        args: Vec<BindingId>,
    },
    FieldResult {
        object: BindingId,
        field: String,
    },
    CallResult {
        callee: String,
        args: Vec<BindingId>,
    },
    /// A list literal. `appended` are values added later through `append`
    /// or `push`; they make the element set uncountable.
    Container {
        elements: Vec<BindingId>,
        appended: Vec<BindingId>,
    },
    Element {
        container: BindingId,
    },
    /// Statically countable merge of branch values.
    Join(Vec<BindingId>),
    Cast {
        value: BindingId,
        target: A,
    },
    Declared {
        value: BindingId,
        annotation: A,
    },
}

impl<A> Origin<A> {
    /// Whether the value is the result of a capability or call, the start
    /// of a return link.
    pub fn is_result(&self) -> bool {
        matches!(
            self,
            Origin::MethodResult { .. } | Origin::FieldResult { .. } | Origin::CallResult { .. }
        )
    }

    /// Convert annotations, keeping the graph shape.
    pub fn map_annotation<B, E>(&self, mut f: impl FnMut(&A) -> Result<B, E>) -> Result<Origin<B>, E> {
        Ok(match self {
            Origin::Param(i) => Origin::Param(*i),
            Origin::SelfValue => Origin::SelfValue,
            Origin::Literal(c) => Origin::Literal(*c),
            Origin::Unknown => Origin::Unknown,
            Origin::MethodResult {
                receiver,
                method,
                args,
            } => Origin::MethodResult {
                receiver: *receiver,
                method: method.clone(),
                args: args.clone(),
            },
            Origin::FieldResult { object, field } => Origin::FieldResult {
                object: *object,
                field: field.clone(),
            },
            Origin::CallResult { callee, args } => Origin::CallResult {
                callee: callee.clone(),
                args: args.clone(),
            },
            Origin::Container { elements, appended } => Origin::Container {
                elements: elements.clone(),
                appended: appended.clone(),
            },
            Origin::Element { container } => Origin::Element {
                container: *container,
            },
            Origin::Join(members) => Origin::Join(members.clone()),
            Origin::Cast { value, target } => Origin::Cast {
                value: *value,
                target: f(target)?,
            },
            Origin::Declared { value, annotation } => Origin::Declared {
                value: *value,
                annotation: f(annotation)?,
            },
        })
    }
}

/// The kind of an observed operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum SiteKind {
    /// Receiver (position 0) or argument of a capability call.
    MethodCall,
    /// Argument of a free function or constructor call.
    FunctionCall,
    FieldAccess,
    Return,
}

/// One observed operation on a binding.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct UsageSite {
    pub kind: SiteKind,
    /// Capability, callee or field name.
    pub target: String,
    /// Argument count of the call, receiver included for capabilities.
    pub arity: usize,
    pub position: usize,
    pub span: Span,
    pub node: NodeId,
}

impl UsageSite {
    /// The capability this site requires of its binding, if any. Only the
    /// receiver of a capability call and the object of a field read are
    /// constrained; arguments are position constraints.
    pub fn capability(&self) -> Option<Capability> {
        match self.kind {
            SiteKind::MethodCall if self.position == 0 => {
                Some(Capability::method(self.target.clone(), self.arity))
            }
            SiteKind::FieldAccess => Some(Capability::field(self.target.clone())),
            _ => None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Binding {
    pub id: BindingId,
    pub name: Option<String>,
    pub kind: BindingKind,
    pub declared: Option<TypeAnnotation>,
    pub origin: Origin,
    pub sites: Vec<UsageSite>,
    /// Expression that produced the value, for temporaries.
    pub node: Option<NodeId>,
    pub span: Span,
}

/// Everything collected from one function body.
#[derive(Debug, Clone)]
pub struct FunctionUsage {
    pub bindings: Vec<Binding>,
    pub params: Vec<BindingId>,
    pub self_binding: Option<BindingId>,
    pub ret: BindingId,
    /// Values reaching a `return` or the implicit return, in source order.
    pub returns: Vec<BindingId>,
    /// Binding read or produced by each expression node.
    pub nodes: Vec<(NodeId, BindingId)>,
}

impl FunctionUsage {
    pub fn binding(&self, id: BindingId) -> &Binding {
        &self.bindings[id.index()]
    }

    /// Readable description of a binding for diagnostics.
    pub fn describe(&self, id: BindingId) -> String {
        let binding = self.binding(id);
        if let Some(name) = &binding.name {
            return name.clone();
        }
        match &binding.origin {
            Origin::MethodResult {
                receiver, method, ..
            } => format!("{}.{}()", self.describe(*receiver), method),
            Origin::FieldResult { object, field } => format!("{}.{}", self.describe(*object), field),
            Origin::CallResult { callee, .. } => format!("{}()", callee),
            Origin::Element { container } => format!("{}[]", self.describe(*container)),
            _ => format!("value at {}", binding.span),
        }
    }
}

/// Walks a function body and builds its [`FunctionUsage`].
pub struct UsageCollector {
    bindings: Vec<Binding>,
    scopes: Vec<HashMap<String, BindingId>>,
    elements: HashMap<BindingId, BindingId>,
    returns: Vec<BindingId>,
    nodes: Vec<(NodeId, BindingId)>,
}

impl UsageCollector {
    fn new() -> Self {
        Self {
            bindings: Vec::new(),
            scopes: vec![HashMap::new()],
            elements: HashMap::new(),
            returns: Vec::new(),
            nodes: Vec::new(),
        }
    }

    /// Collect usage for a function. Methods get an implicit `self` binding.
    pub fn collect(def: &FnDef, is_method: bool) -> FunctionUsage {
        let mut collector = Self::new();

        let self_binding = is_method.then(|| {
            let id = collector.bind(Some("self"), BindingKind::SelfParam, Origin::SelfValue, None, def.span);
            collector.define("self", id);
            id
        });

        let mut params = Vec::new();
        for (i, param) in def.params.iter().enumerate() {
            let id = collector.bind(
                Some(&param.name),
                BindingKind::Param(i),
                Origin::Param(i),
                None,
                param.span,
            );
            collector.bindings[id.index()].declared = param.type_annotation.clone();
            collector.define(&param.name, id);
            params.push(id);
        }

        let has_return = block_has_return(&def.body);
        let count = def.body.statements.len();
        for (i, stmt) in def.body.statements.iter().enumerate() {
            match stmt {
                Statement::Expr { expr, span } if !has_return && i + 1 == count => {
                    let value = collector.expr(expr);
                    collector.returned(value, *span, expr.id);
                }
                _ => collector.statement(stmt),
            }
        }
        if collector.returns.is_empty() {
            let nil = collector.bind(None, BindingKind::Temporary, Origin::Literal(NIL), None, def.span);
            collector.returns.push(nil);
        }

        let ret = collector.bind(
            None,
            BindingKind::Return,
            Origin::Join(collector.returns.clone()),
            None,
            def.span,
        );

        FunctionUsage {
            bindings: collector.bindings,
            params,
            self_binding,
            ret,
            returns: collector.returns,
            nodes: collector.nodes,
        }
    }

    fn bind(
        &mut self,
        name: Option<&str>,
        kind: BindingKind,
        origin: Origin,
        node: Option<NodeId>,
        span: Span,
    ) -> BindingId {
        let id = BindingId(self.bindings.len() as u32);
        self.bindings.push(Binding {
            id,
            name: name.map(|n| n.to_string()),
            kind,
            declared: None,
            origin,
            sites: Vec::new(),
            node,
            span,
        });
        id
    }

    fn temp(&mut self, origin: Origin, expr: &Expr) -> BindingId {
        self.bind(None, BindingKind::Temporary, origin, Some(expr.id), expr.span)
    }

    fn site(&mut self, id: BindingId, kind: SiteKind, target: &str, arity: usize, position: usize, expr: &Expr) {
        self.bindings[id.index()].sites.push(UsageSite {
            kind,
            target: target.to_string(),
            arity,
            position,
            span: expr.span,
            node: expr.id,
        });
    }

    fn define(&mut self, name: &str, id: BindingId) {
        if let Some(scope) = self.scopes.last_mut() {
            scope.insert(name.to_string(), id);
        }
    }

    fn lookup(&self, name: &str) -> Option<BindingId> {
        self.scopes.iter().rev().find_map(|s| s.get(name).copied())
    }

    /// Rebind `name` in the scope that defines it, or define it here.
    fn rebind(&mut self, name: &str, id: BindingId) {
        for scope in self.scopes.iter_mut().rev() {
            if let Some(slot) = scope.get_mut(name) {
                *slot = id;
                return;
            }
        }
        self.define(name, id);
    }

    fn visible(&self) -> BTreeMap<String, BindingId> {
        let mut names = BTreeMap::new();
        for scope in &self.scopes {
            for (name, id) in scope {
                names.insert(name.clone(), *id);
            }
        }
        names
    }

    fn is_container(&self, id: BindingId) -> bool {
        matches!(self.bindings[id.index()].origin, Origin::Container { .. })
    }

    fn element_of(&mut self, container: BindingId) -> BindingId {
        if let Some(id) = self.elements.get(&container) {
            return *id;
        }
        let span = self.bindings[container.index()].span;
        let id = self.bind(None, BindingKind::Temporary, Origin::Element { container }, None, span);
        self.elements.insert(container, id);
        id
    }

    fn returned(&mut self, value: BindingId, span: Span, node: NodeId) {
        self.bindings[value.index()].sites.push(UsageSite {
            kind: SiteKind::Return,
            target: "return".to_string(),
            arity: 0,
            position: 0,
            span,
            node,
        });
        self.returns.push(value);
    }

    fn block(&mut self, block: &Block) {
        self.scopes.push(HashMap::new());
        for stmt in &block.statements {
            self.statement(stmt);
        }
        self.scopes.pop();
    }

    fn statement(&mut self, stmt: &Statement) {
        match stmt {
            Statement::Let {
                name,
                type_annotation,
                init,
                span,
            } => {
                let value = self.expr(init);
                let id = match type_annotation {
                    Some(annotation) => self.bind(
                        Some(name),
                        BindingKind::Local,
                        Origin::Declared {
                            value,
                            annotation: annotation.clone(),
                        },
                        None,
                        *span,
                    ),
                    None => {
                        let binding = &mut self.bindings[value.index()];
                        if binding.kind == BindingKind::Temporary && binding.name.is_none() {
                            binding.name = Some(name.clone());
                            binding.kind = BindingKind::Local;
                        }
                        value
                    }
                };
                self.define(name, id);
            }
            Statement::Assign { name, value, .. } => {
                let value = self.expr(value);
                self.rebind(name, value);
            }
            Statement::Expr { expr, .. } => {
                self.expr(expr);
            }
            Statement::Return { value, span } => {
                let (id, node) = match value {
                    Some(expr) => (self.expr(expr), expr.id),
                    None => (
                        self.bind(None, BindingKind::Temporary, Origin::Literal(NIL), None, *span),
                        NodeId::default(),
                    ),
                };
                self.returned(id, *span, node);
            }
            Statement::If {
                condition,
                then_block,
                else_block,
                span,
            } => {
                self.expr(condition);
                let before = self.visible();

                self.block(then_block);
                let after_then = self.visible();
                for (name, id) in &before {
                    self.rebind(name, *id);
                }

                if let Some(else_block) = else_block {
                    self.block(else_block);
                }
                let after_else = self.visible();

                for (name, id) in &before {
                    let then_id = after_then.get(name).copied().unwrap_or(*id);
                    let else_id = after_else.get(name).copied().unwrap_or(*id);
                    if then_id == *id && else_id == *id {
                        continue;
                    }
                    let merged = if then_id == else_id {
                        then_id
                    } else {
                        self.bind(
                            None,
                            BindingKind::Temporary,
                            Origin::Join(vec![then_id, else_id]),
                            None,
                            *span,
                        )
                    };
                    self.rebind(name, merged);
                }
            }
            Statement::For {
                var,
                iterable,
                body,
                span,
            } => {
                let iterable_id = self.expr(iterable);
                let element = if self.is_container(iterable_id) {
                    self.element_of(iterable_id)
                } else {
                    let iter = self.method_call(iterable_id, "iter", Vec::new(), iterable);
                    self.method_call(iter, "next", Vec::new(), iterable)
                };

                let before = self.visible();
                self.scopes.push(HashMap::new());
                self.define(var, element);
                for stmt in &body.statements {
                    self.statement(stmt);
                }
                self.scopes.pop();
                let after = self.visible();

                for (name, id) in &before {
                    let Some(&after_id) = after.get(name) else {
                        continue;
                    };
                    if after_id != *id {
                        let merged = self.bind(
                            None,
                            BindingKind::Temporary,
                            Origin::Join(vec![*id, after_id]),
                            None,
                            *span,
                        );
                        self.rebind(name, merged);
                    }
                }
            }
        }
    }

    fn method_call(&mut self, receiver: BindingId, method: &str, args: Vec<BindingId>, expr: &Expr) -> BindingId {
        let arity = args.len() + 1;
        self.site(receiver, SiteKind::MethodCall, method, arity, 0, expr);
        for (i, arg) in args.iter().enumerate() {
            self.site(*arg, SiteKind::MethodCall, method, arity, i + 1, expr);
        }
        self.temp(
            Origin::MethodResult {
                receiver,
                method: method.to_string(),
                args,
            },
            expr,
        )
    }

    fn expr(&mut self, expr: &Expr) -> BindingId {
        let id = match &expr.kind {
            ExprKind::Int(_) => self.temp(Origin::Literal(INT), expr),
            ExprKind::Float(_) => self.temp(Origin::Literal(FLOAT), expr),
            ExprKind::Str(_) => self.temp(Origin::Literal(STR), expr),
            ExprKind::Bool(_) => self.temp(Origin::Literal(BOOL), expr),
            ExprKind::Nil => self.temp(Origin::Literal(NIL), expr),
            ExprKind::Ident(name) => match self.lookup(name) {
                Some(id) => id,
                None => {
                    tracing::debug!(name = %name, span = %expr.span, "identifier not in scope");
                    self.temp(Origin::Unknown, expr)
                }
            },
            ExprKind::Binary { op, lhs, rhs } => {
                let lhs = self.expr(lhs);
                let rhs = self.expr(rhs);
                self.method_call(lhs, op.capability(), vec![rhs], expr)
            }
            ExprKind::Unary { op, operand } => {
                let operand = self.expr(operand);
                self.method_call(operand, op.capability(), Vec::new(), expr)
            }
            ExprKind::MethodCall {
                receiver,
                method,
                args,
            } => {
                let receiver = self.expr(receiver);
                let args: Vec<BindingId> = args.iter().map(|a| self.expr(a)).collect();
                if matches!(method.as_str(), "append" | "push")
                    && args.len() == 1
                    && self.is_container(receiver)
                {
                    if let Origin::Container { appended, .. } =
                        &mut self.bindings[receiver.index()].origin
                    {
                        appended.push(args[0]);
                    }
                }
                self.method_call(receiver, method, args, expr)
            }
            ExprKind::Call { callee, args } => {
                let args: Vec<BindingId> = args.iter().map(|a| self.expr(a)).collect();
                for (i, arg) in args.iter().enumerate() {
                    self.site(*arg, SiteKind::FunctionCall, callee, args.len(), i, expr);
                }
                self.temp(
                    Origin::CallResult {
                        callee: callee.clone(),
                        args,
                    },
                    expr,
                )
            }
            ExprKind::Field { object, field } => {
                let object = self.expr(object);
                self.site(object, SiteKind::FieldAccess, field, 0, 0, expr);
                self.temp(
                    Origin::FieldResult {
                        object,
                        field: field.clone(),
                    },
                    expr,
                )
            }
            ExprKind::Index { object, index } => {
                let object = self.expr(object);
                let index = self.expr(index);
                if self.is_container(object) {
                    self.site(object, SiteKind::MethodCall, "get", 2, 0, expr);
                    self.site(index, SiteKind::MethodCall, "get", 2, 1, expr);
                    self.element_of(object)
                } else {
                    self.method_call(object, "get", vec![index], expr)
                }
            }
            ExprKind::List(elements) => {
                let elements = elements.iter().map(|e| self.expr(e)).collect();
                self.temp(
                    Origin::Container {
                        elements,
                        appended: Vec::new(),
                    },
                    expr,
                )
            }
            ExprKind::Conditional {
                condition,
                then_expr,
                else_expr,
            } => {
                self.expr(condition);
                let then_id = self.expr(then_expr);
                let else_id = self.expr(else_expr);
                self.temp(Origin::Join(vec![then_id, else_id]), expr)
            }
            ExprKind::Cast { expr: inner, target } => {
                let value = self.expr(inner);
                self.temp(
                    Origin::Cast {
                        value,
                        target: target.clone(),
                    },
                    expr,
                )
            }
        };
        self.nodes.push((expr.id, id));
        id
    }
}

fn block_has_return(block: &Block) -> bool {
    block.statements.iter().any(|stmt| match stmt {
        Statement::Return { .. } => true,
        Statement::If {
            then_block,
            else_block,
            ..
        } => block_has_return(then_block) || else_block.as_ref().is_some_and(block_has_return),
        Statement::For { body, .. } => block_has_return(body),
        _ => false,
    })
}
