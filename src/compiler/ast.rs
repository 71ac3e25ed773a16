//! Syntax tree consumed by the inference engine.
//!
//! The tree is produced by an upstream parser. It can be deserialized from
//! JSON (node identities are assigned afterwards by [`Program::renumber`]) or
//! built in code with [`AstBuilder`].

use crate::compiler::types::TypeAnnotation;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Source location of a syntax node.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct Span {
    pub line: usize,
    pub column: usize,
}

impl Span {
    pub fn new(line: usize, column: usize) -> Self {
        Self { line, column }
    }
}

impl fmt::Display for Span {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.line, self.column)
    }
}

/// Identity of a syntax node. Unique within one [`Program`].
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct NodeId(pub u32);

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// A complete program: classes, enums and functions.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Program {
    #[serde(default)]
    pub items: Vec<Item>,
}

/// Top-level items in a program.
#[derive(Debug, Clone, Deserialize)]
pub enum Item {
    Class(ClassDef),
    Enum(EnumDef),
    Function(FnDef),
}

/// A class definition. Abstract classes only declare capabilities.
#[derive(Debug, Clone, Deserialize)]
pub struct ClassDef {
    #[serde(default)]
    pub id: NodeId,
    pub name: String,
    #[serde(default)]
    pub is_abstract: bool,
    /// Abstract base classes whose methods are inherited.
    #[serde(default)]
    pub bases: Vec<String>,
    #[serde(default)]
    pub fields: Vec<FieldDef>,
    #[serde(default)]
    pub methods: Vec<FnDef>,
    #[serde(default)]
    pub span: Span,
}

/// A stored field of a class.
#[derive(Debug, Clone, Deserialize)]
pub struct FieldDef {
    pub name: String,
    pub type_annotation: Option<TypeAnnotation>,
    #[serde(default)]
    pub span: Span,
}

/// An enum: a closed set of variant classes.
#[derive(Debug, Clone, Deserialize)]
pub struct EnumDef {
    pub name: String,
    pub variants: Vec<ClassDef>,
    #[serde(default)]
    pub span: Span,
}

/// A function parameter with optional type annotation.
#[derive(Debug, Clone, Deserialize)]
pub struct Param {
    pub name: String,
    pub type_annotation: Option<TypeAnnotation>,
    #[serde(default)]
    pub span: Span,
}

/// A function or method definition. Methods take an implicit `self`.
#[derive(Debug, Clone, Deserialize)]
pub struct FnDef {
    #[serde(default)]
    pub id: NodeId,
    pub name: String,
    #[serde(default)]
    pub params: Vec<Param>,
    pub return_type: Option<TypeAnnotation>,
    pub body: Block,
    #[serde(default)]
    pub span: Span,
}

/// A block of statements.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Block {
    #[serde(default)]
    pub statements: Vec<Statement>,
    #[serde(default)]
    pub span: Span,
}

#[derive(Debug, Clone, Deserialize)]
pub enum Statement {
    Let {
        name: String,
        type_annotation: Option<TypeAnnotation>,
        init: Expr,
        #[serde(default)]
        span: Span,
    },
    Assign {
        name: String,
        value: Expr,
        #[serde(default)]
        span: Span,
    },
    Expr {
        expr: Expr,
        #[serde(default)]
        span: Span,
    },
    Return {
        value: Option<Expr>,
        #[serde(default)]
        span: Span,
    },
    If {
        condition: Expr,
        then_block: Block,
        else_block: Option<Block>,
        #[serde(default)]
        span: Span,
    },
    For {
        var: String,
        iterable: Expr,
        body: Block,
        #[serde(default)]
        span: Span,
    },
}

impl Statement {
    pub fn span(&self) -> Span {
        match self {
            Statement::Let { span, .. }
            | Statement::Assign { span, .. }
            | Statement::Expr { span, .. }
            | Statement::Return { span, .. }
            | Statement::If { span, .. }
            | Statement::For { span, .. } => *span,
        }
    }
}

/// An expression node.
#[derive(Debug, Clone, Deserialize)]
#[serde(from = "ExprKind")]
pub struct Expr {
    pub id: NodeId,
    pub span: Span,
    pub kind: ExprKind,
}

impl From<ExprKind> for Expr {
    fn from(kind: ExprKind) -> Self {
        Self {
            id: NodeId::default(),
            span: Span::default(),
            kind,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub enum ExprKind {
    Int(i64),
    Float(f64),
    Str(String),
    Bool(bool),
    Nil,
    /// Variable read, including `self`.
    Ident(String),
    Binary {
        op: BinaryOp,
        lhs: Box<Expr>,
        rhs: Box<Expr>,
    },
    Unary {
        op: UnaryOp,
        operand: Box<Expr>,
    },
    /// `receiver.method(args)`
    MethodCall {
        receiver: Box<Expr>,
        method: String,
        #[serde(default)]
        args: Vec<Expr>,
    },
    /// `callee(args)`: a free function call or a class constructor.
    Call {
        callee: String,
        #[serde(default)]
        args: Vec<Expr>,
    },
    Field {
        object: Box<Expr>,
        field: String,
    },
    Index {
        object: Box<Expr>,
        index: Box<Expr>,
    },
    /// List literal. Appending to it later makes its element set open.
    List(Vec<Expr>),
    Conditional {
        condition: Box<Expr>,
        then_expr: Box<Expr>,
        else_expr: Box<Expr>,
    },
    Cast {
        expr: Box<Expr>,
        target: TypeAnnotation,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    Lt,
    Le,
    Gt,
    Ge,
    Eq,
    Ne,
    And,
    Or,
}

impl BinaryOp {
    /// Capability invoked on the left operand.
    pub fn capability(self) -> &'static str {
        match self {
            BinaryOp::Add => "plus",
            BinaryOp::Sub => "minus",
            BinaryOp::Mul => "times",
            BinaryOp::Div => "divide",
            BinaryOp::Mod => "modulo",
            BinaryOp::Lt => "lt",
            BinaryOp::Le => "le",
            BinaryOp::Gt => "gt",
            BinaryOp::Ge => "ge",
            BinaryOp::Eq => "eq",
            BinaryOp::Ne => "ne",
            BinaryOp::And => "and",
            BinaryOp::Or => "or",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum UnaryOp {
    Neg,
    Not,
}

impl UnaryOp {
    pub fn capability(self) -> &'static str {
        match self {
            UnaryOp::Neg => "neg",
            UnaryOp::Not => "not",
        }
    }
}

impl Program {
    /// Iterate over all functions, including class and variant methods.
    pub fn functions(&self) -> impl Iterator<Item = (Option<&ClassDef>, &FnDef)> {
        self.items.iter().flat_map(|item| -> Vec<(Option<&ClassDef>, &FnDef)> {
            match item {
                Item::Function(f) => vec![(None, f)],
                Item::Class(c) => c.methods.iter().map(|m| (Some(c), m)).collect(),
                Item::Enum(e) => e
                    .variants
                    .iter()
                    .flat_map(|v| v.methods.iter().map(move |m| (Some(v), m)))
                    .collect(),
            }
        })
    }

    /// Assign fresh, unique node ids to every function, class and expression.
    ///
    /// Deserialized trees carry no identities; this must run before analysis.
    pub fn renumber(&mut self) {
        let mut next = 1u32;
        let mut fresh = || {
            let id = NodeId(next);
            next += 1;
            id
        };
        for item in &mut self.items {
            match item {
                Item::Function(f) => renumber_fn(f, &mut fresh),
                Item::Class(c) => renumber_class(c, &mut fresh),
                Item::Enum(e) => {
                    for v in &mut e.variants {
                        renumber_class(v, &mut fresh);
                    }
                }
            }
        }
    }
}

fn renumber_class(class: &mut ClassDef, fresh: &mut impl FnMut() -> NodeId) {
    class.id = fresh();
    for m in &mut class.methods {
        renumber_fn(m, fresh);
    }
}

fn renumber_fn(f: &mut FnDef, fresh: &mut impl FnMut() -> NodeId) {
    f.id = fresh();
    renumber_block(&mut f.body, fresh);
}

fn renumber_block(block: &mut Block, fresh: &mut impl FnMut() -> NodeId) {
    for stmt in &mut block.statements {
        match stmt {
            Statement::Let { init, .. } => renumber_expr(init, fresh),
            Statement::Assign { value, .. } => renumber_expr(value, fresh),
            Statement::Expr { expr, .. } => renumber_expr(expr, fresh),
            Statement::Return { value, .. } => {
                if let Some(value) = value {
                    renumber_expr(value, fresh);
                }
            }
            Statement::If {
                condition,
                then_block,
                else_block,
                ..
            } => {
                renumber_expr(condition, fresh);
                renumber_block(then_block, fresh);
                if let Some(else_block) = else_block {
                    renumber_block(else_block, fresh);
                }
            }
            Statement::For { iterable, body, .. } => {
                renumber_expr(iterable, fresh);
                renumber_block(body, fresh);
            }
        }
    }
}

fn renumber_expr(expr: &mut Expr, fresh: &mut impl FnMut() -> NodeId) {
    expr.id = fresh();
    match &mut expr.kind {
        ExprKind::Int(_)
        | ExprKind::Float(_)
        | ExprKind::Str(_)
        | ExprKind::Bool(_)
        | ExprKind::Nil
        | ExprKind::Ident(_) => {}
        ExprKind::Binary { lhs, rhs, .. } => {
            renumber_expr(lhs, fresh);
            renumber_expr(rhs, fresh);
        }
        ExprKind::Unary { operand, .. } => renumber_expr(operand, fresh),
        ExprKind::MethodCall { receiver, args, .. } => {
            renumber_expr(receiver, fresh);
            for arg in args {
                renumber_expr(arg, fresh);
            }
        }
        ExprKind::Call { args, .. } | ExprKind::List(args) => {
            for arg in args {
                renumber_expr(arg, fresh);
            }
        }
        ExprKind::Field { object, .. } => renumber_expr(object, fresh),
        ExprKind::Index { object, index } => {
            renumber_expr(object, fresh);
            renumber_expr(index, fresh);
        }
        ExprKind::Conditional {
            condition,
            then_expr,
            else_expr,
        } => {
            renumber_expr(condition, fresh);
            renumber_expr(then_expr, fresh);
            renumber_expr(else_expr, fresh);
        }
        ExprKind::Cast { expr, .. } => renumber_expr(expr, fresh),
    }
}

/// Builds syntax trees in code with unique node ids and distinct spans.
///
/// Every node gets the next line number as its span so diagnostics stay
/// distinguishable in tests and generated programs.
#[derive(Debug, Default)]
pub struct AstBuilder {
    next: u32,
}

impl AstBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    fn next_id(&mut self) -> (NodeId, Span) {
        self.next += 1;
        (NodeId(self.next), Span::new(self.next as usize, 1))
    }

    pub fn expr(&mut self, kind: ExprKind) -> Expr {
        let (id, span) = self.next_id();
        Expr { id, span, kind }
    }

    pub fn int(&mut self, value: i64) -> Expr {
        self.expr(ExprKind::Int(value))
    }

    pub fn float(&mut self, value: f64) -> Expr {
        self.expr(ExprKind::Float(value))
    }

    pub fn string(&mut self, value: &str) -> Expr {
        self.expr(ExprKind::Str(value.to_string()))
    }

    pub fn bool(&mut self, value: bool) -> Expr {
        self.expr(ExprKind::Bool(value))
    }

    pub fn nil(&mut self) -> Expr {
        self.expr(ExprKind::Nil)
    }

    pub fn ident(&mut self, name: &str) -> Expr {
        self.expr(ExprKind::Ident(name.to_string()))
    }

    pub fn binary(&mut self, op: BinaryOp, lhs: Expr, rhs: Expr) -> Expr {
        self.expr(ExprKind::Binary {
            op,
            lhs: Box::new(lhs),
            rhs: Box::new(rhs),
        })
    }

    pub fn unary(&mut self, op: UnaryOp, operand: Expr) -> Expr {
        self.expr(ExprKind::Unary {
            op,
            operand: Box::new(operand),
        })
    }

    pub fn method(&mut self, receiver: Expr, method: &str, args: Vec<Expr>) -> Expr {
        self.expr(ExprKind::MethodCall {
            receiver: Box::new(receiver),
            method: method.to_string(),
            args,
        })
    }

    pub fn call(&mut self, callee: &str, args: Vec<Expr>) -> Expr {
        self.expr(ExprKind::Call {
            callee: callee.to_string(),
            args,
        })
    }

    pub fn field(&mut self, object: Expr, field: &str) -> Expr {
        self.expr(ExprKind::Field {
            object: Box::new(object),
            field: field.to_string(),
        })
    }

    pub fn index(&mut self, object: Expr, index: Expr) -> Expr {
        self.expr(ExprKind::Index {
            object: Box::new(object),
            index: Box::new(index),
        })
    }

    pub fn list(&mut self, elements: Vec<Expr>) -> Expr {
        self.expr(ExprKind::List(elements))
    }

    pub fn conditional(&mut self, condition: Expr, then_expr: Expr, else_expr: Expr) -> Expr {
        self.expr(ExprKind::Conditional {
            condition: Box::new(condition),
            then_expr: Box::new(then_expr),
            else_expr: Box::new(else_expr),
        })
    }

    pub fn cast(&mut self, expr: Expr, target: TypeAnnotation) -> Expr {
        self.expr(ExprKind::Cast {
            expr: Box::new(expr),
            target,
        })
    }

    pub fn let_(&mut self, name: &str, init: Expr) -> Statement {
        let span = init.span;
        Statement::Let {
            name: name.to_string(),
            type_annotation: None,
            init,
            span,
        }
    }

    pub fn let_typed(&mut self, name: &str, ty: TypeAnnotation, init: Expr) -> Statement {
        let span = init.span;
        Statement::Let {
            name: name.to_string(),
            type_annotation: Some(ty),
            init,
            span,
        }
    }

    pub fn assign(&mut self, name: &str, value: Expr) -> Statement {
        let span = value.span;
        Statement::Assign {
            name: name.to_string(),
            value,
            span,
        }
    }

    pub fn stmt(&mut self, expr: Expr) -> Statement {
        let span = expr.span;
        Statement::Expr { expr, span }
    }

    pub fn ret(&mut self, value: Expr) -> Statement {
        let span = value.span;
        Statement::Return {
            value: Some(value),
            span,
        }
    }

    pub fn if_(&mut self, condition: Expr, then_block: Vec<Statement>, else_block: Option<Vec<Statement>>) -> Statement {
        let span = condition.span;
        Statement::If {
            condition,
            then_block: Block {
                statements: then_block,
                span,
            },
            else_block: else_block.map(|statements| Block { statements, span }),
            span,
        }
    }

    pub fn for_(&mut self, var: &str, iterable: Expr, body: Vec<Statement>) -> Statement {
        let span = iterable.span;
        Statement::For {
            var: var.to_string(),
            iterable,
            body: Block {
                statements: body,
                span,
            },
            span,
        }
    }

    pub fn param(&mut self, name: &str) -> Param {
        let (_, span) = self.next_id();
        Param {
            name: name.to_string(),
            type_annotation: None,
            span,
        }
    }

    pub fn typed_param(&mut self, name: &str, ty: TypeAnnotation) -> Param {
        let (_, span) = self.next_id();
        Param {
            name: name.to_string(),
            type_annotation: Some(ty),
            span,
        }
    }

    /// A function whose parameters are all undeclared.
    pub fn function(&mut self, name: &str, params: &[&str], body: Vec<Statement>) -> FnDef {
        let params = params.iter().map(|p| self.param(p)).collect();
        self.function_with(name, params, None, body)
    }

    pub fn function_with(
        &mut self,
        name: &str,
        params: Vec<Param>,
        return_type: Option<TypeAnnotation>,
        body: Vec<Statement>,
    ) -> FnDef {
        let (id, span) = self.next_id();
        FnDef {
            id,
            name: name.to_string(),
            params,
            return_type,
            body: Block {
                statements: body,
                span,
            },
            span,
        }
    }

    /// A concrete class with declared fields.
    pub fn class(&mut self, name: &str, fields: &[(&str, &str)], methods: Vec<FnDef>) -> ClassDef {
        let (id, span) = self.next_id();
        ClassDef {
            id,
            name: name.to_string(),
            is_abstract: false,
            bases: Vec::new(),
            fields: fields
                .iter()
                .map(|(field, ty)| FieldDef {
                    name: field.to_string(),
                    type_annotation: Some(TypeAnnotation::named(ty)),
                    span,
                })
                .collect(),
            methods,
            span,
        }
    }

    pub fn abstract_class(&mut self, name: &str, methods: Vec<FnDef>) -> ClassDef {
        let mut class = self.class(name, &[], methods);
        class.is_abstract = true;
        class
    }

    pub fn enumeration(&mut self, name: &str, variants: Vec<ClassDef>) -> EnumDef {
        let (_, span) = self.next_id();
        EnumDef {
            name: name.to_string(),
            variants,
            span,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_renumber_assigns_unique_ids() {
        let json = r#"{"items": [{"Function": {
            "name": "add",
            "params": [{"name": "a"}, {"name": "b"}],
            "body": {"statements": [{"Return": {"value":
                {"Binary": {"op": "Add", "lhs": {"Ident": "a"}, "rhs": {"Ident": "b"}}}
            }}]}
        }}]}"#;
        let mut program: Program = serde_json::from_str(json).unwrap();
        program.renumber();

        let Item::Function(f) = &program.items[0] else {
            panic!("expected function");
        };
        let Statement::Return { value: Some(ret), .. } = &f.body.statements[0] else {
            panic!("expected return");
        };
        let ExprKind::Binary { lhs, rhs, .. } = &ret.kind else {
            panic!("expected binary");
        };
        let mut ids = vec![f.id, ret.id, lhs.id, rhs.id];
        ids.sort();
        ids.dedup();
        assert_eq!(ids.len(), 4);
        assert!(ids.iter().all(|id| id.0 > 0));
    }

    #[test]
    fn test_builder_spans_are_distinct() {
        let mut b = AstBuilder::new();
        let x = b.ident("x");
        let y = b.ident("y");
        assert_ne!(x.id, y.id);
        assert_ne!(x.span, y.span);
    }

    #[test]
    fn test_program_functions_include_methods() {
        let mut b = AstBuilder::new();
        let area = b.function("area", &[], vec![]);
        let class = b.class("Square", &[("side", "int")], vec![area]);
        let main = b.function("main", &[], vec![]);
        let program = Program {
            items: vec![Item::Class(class), Item::Function(main)],
        };
        let names: Vec<_> = program
            .functions()
            .map(|(owner, f)| (owner.map(|c| c.name.clone()), f.name.clone()))
            .collect();
        assert_eq!(
            names,
            vec![
                (Some("Square".to_string()), "area".to_string()),
                (None, "main".to_string())
            ]
        );
    }

    #[test]
    fn test_operator_capabilities() {
        assert_eq!(BinaryOp::Add.capability(), "plus");
        assert_eq!(BinaryOp::Lt.capability(), "lt");
        assert_eq!(UnaryOp::Not.capability(), "not");
    }
}
