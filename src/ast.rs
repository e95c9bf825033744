// File: src/ast.rs
//
// Abstract Syntax Tree (AST) definitions for EBS scripts.
//
// The parser is an external collaborator: it hands the interpreter a finished,
// type-resolved tree rooted at a top-level Block. The same tree can be built
// in-process with the constructors below or loaded from JSON via serde.
//
// Expressions (Expr) represent values and computations, while statements
// (Stmt) represent actions and control flow. Each node kind has exactly one
// method on StmtVisitor / ExprVisitor, and `accept` dispatches with an
// exhaustive match.

use crate::errors::ErrorType;
use crate::types::TypeSpec;
use ahash::AHashSet;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Binary operators
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    Pow,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    And,
    Or,
}

impl BinaryOp {
    pub fn symbol(self) -> &'static str {
        match self {
            BinaryOp::Add => "+",
            BinaryOp::Sub => "-",
            BinaryOp::Mul => "*",
            BinaryOp::Div => "/",
            BinaryOp::Mod => "%",
            BinaryOp::Pow => "^",
            BinaryOp::Eq => "==",
            BinaryOp::Ne => "!=",
            BinaryOp::Lt => "<",
            BinaryOp::Le => "<=",
            BinaryOp::Gt => ">",
            BinaryOp::Ge => ">=",
            BinaryOp::And => "and",
            BinaryOp::Or => "or",
        }
    }

    pub fn is_comparison(self) -> bool {
        matches!(
            self,
            BinaryOp::Eq | BinaryOp::Ne | BinaryOp::Lt | BinaryOp::Le | BinaryOp::Gt | BinaryOp::Ge
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnaryOp {
    Neg,
    Plus,
    Not,
    TypeOf,
}

/// Literal constants as they appear in source
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Literal {
    Null,
    Int(i32),
    Long(i64),
    Float(f32),
    Double(f64),
    Str(String),
    Bool(bool),
    /// Date literal text, parsed when evaluated
    Date(String),
}

/// A call argument, optionally passed by parameter name
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Argument {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    pub value: Expr,
}

impl Argument {
    pub fn positional(value: Expr) -> Self {
        Argument { name: None, value }
    }

    pub fn named(name: &str, value: Expr) -> Self {
        Argument { name: Some(name.to_lowercase()), value }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Call {
    pub name: String,
    #[serde(default)]
    pub args: Vec<Argument>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Expr {
    Literal(Literal),
    Variable(String),
    Unary {
        op: UnaryOp,
        operand: Box<Expr>,
    },
    Binary {
        left: Box<Expr>,
        op: BinaryOp,
        right: Box<Expr>,
    },
    /// `a < b <= c`: every operand evaluated once, left to right
    Chain {
        operands: Vec<Expr>,
        ops: Vec<BinaryOp>,
    },
    Call(Call),
    Length(Box<Expr>),
    Index {
        target: Box<Expr>,
        index: Box<Expr>,
    },
    ArrayLiteral(Vec<Expr>),
    /// `array.int[5]` style initialiser; no size means a dynamic array
    ArrayInit {
        element: TypeSpec,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        size: Option<Box<Expr>>,
    },
    Property {
        target: Box<Expr>,
        name: String,
    },
    Cast {
        target: TypeSpec,
        expr: Box<Expr>,
    },
    CursorHasNext(String),
    CursorNext(String),
    /// Inline select against the current connection; yields an array of records
    Select {
        sql: String,
        #[serde(default)]
        params: Vec<Argument>,
    },
}

impl Expr {
    pub fn accept<V: ExprVisitor>(&self, visitor: &mut V) -> V::Output {
        match self {
            Expr::Literal(literal) => visitor.visit_literal(literal),
            Expr::Variable(name) => visitor.visit_variable(name),
            Expr::Unary { op, operand } => visitor.visit_unary(*op, operand),
            Expr::Binary { left, op, right } => visitor.visit_binary(left, *op, right),
            Expr::Chain { operands, ops } => visitor.visit_chain(operands, ops),
            Expr::Call(call) => visitor.visit_call(call),
            Expr::Length(target) => visitor.visit_length(target),
            Expr::Index { target, index } => visitor.visit_index(target, index),
            Expr::ArrayLiteral(items) => visitor.visit_array_literal(items),
            Expr::ArrayInit { element, size } => visitor.visit_array_init(element, size.as_deref()),
            Expr::Property { target, name } => visitor.visit_property(target, name),
            Expr::Cast { target, expr } => visitor.visit_cast(target, expr),
            Expr::CursorHasNext(cursor) => visitor.visit_cursor_has_next(cursor),
            Expr::CursorNext(cursor) => visitor.visit_cursor_next(cursor),
            Expr::Select { sql, params } => visitor.visit_select(sql, params),
        }
    }

    pub fn null() -> Expr {
        Expr::Literal(Literal::Null)
    }

    pub fn int(n: i32) -> Expr {
        Expr::Literal(Literal::Int(n))
    }

    pub fn long(n: i64) -> Expr {
        Expr::Literal(Literal::Long(n))
    }

    pub fn double(n: f64) -> Expr {
        Expr::Literal(Literal::Double(n))
    }

    pub fn str(s: &str) -> Expr {
        Expr::Literal(Literal::Str(s.to_string()))
    }

    pub fn bool(b: bool) -> Expr {
        Expr::Literal(Literal::Bool(b))
    }

    pub fn var(name: &str) -> Expr {
        Expr::Variable(name.to_string())
    }

    pub fn binary(left: Expr, op: BinaryOp, right: Expr) -> Expr {
        Expr::Binary { left: Box::new(left), op, right: Box::new(right) }
    }

    pub fn unary(op: UnaryOp, operand: Expr) -> Expr {
        Expr::Unary { op, operand: Box::new(operand) }
    }

    pub fn call(name: &str, args: Vec<Expr>) -> Expr {
        Expr::Call(Call { name: name.to_string(), args: args.into_iter().map(Argument::positional).collect() })
    }

    pub fn call_with(name: &str, args: Vec<Argument>) -> Expr {
        Expr::Call(Call { name: name.to_string(), args })
    }

    pub fn index(target: Expr, index: Expr) -> Expr {
        Expr::Index { target: Box::new(target), index: Box::new(index) }
    }

    pub fn property(target: Expr, name: &str) -> Expr {
        Expr::Property { target: Box::new(target), name: name.to_string() }
    }

    pub fn cast(target: impl Into<TypeSpec>, expr: Expr) -> Expr {
        Expr::Cast { target: target.into(), expr: Box::new(expr) }
    }
}

/// Function or block parameter
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Parameter {
    pub name: String,
    pub spec: TypeSpec,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<Expr>,
    #[serde(default)]
    pub mandatory: bool,
}

impl Parameter {
    pub fn required(name: &str, spec: impl Into<TypeSpec>) -> Self {
        Parameter { name: name.to_lowercase(), spec: spec.into(), default: None, mandatory: true }
    }

    pub fn optional(name: &str, spec: impl Into<TypeSpec>, default: Option<Expr>) -> Self {
        Parameter { name: name.to_lowercase(), spec: spec.into(), default, mandatory: false }
    }
}

/// What a handler catches: one standard category or one custom name
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HandlerTarget {
    Standard(ErrorType),
    Custom(String),
}

impl HandlerTarget {
    /// Standard category if the name is one, otherwise a custom name
    pub fn named(name: &str) -> Self {
        match ErrorType::from_name(name) {
            Some(error_type) => HandlerTarget::Standard(error_type),
            None => HandlerTarget::Custom(name.to_string()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExceptionHandler {
    pub target: HandlerTarget,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_var: Option<String>,
    pub body: Vec<Stmt>,
}

impl ExceptionHandler {
    pub fn new(target: HandlerTarget, error_var: Option<&str>, body: Vec<Stmt>) -> Self {
        ExceptionHandler { target, error_var: error_var.map(str::to_lowercase), body }
    }

    pub fn named(name: &str, error_var: Option<&str>, body: Vec<Stmt>) -> Self {
        Self::new(HandlerTarget::named(name), error_var, body)
    }
}

/// A block of statements, which is also the shape of a function body
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Block {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default)]
    pub statements: Vec<Stmt>,
    #[serde(default)]
    pub params: Vec<Parameter>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub return_type: Option<TypeSpec>,
    #[serde(default)]
    pub handlers: Vec<ExceptionHandler>,
    #[serde(default)]
    pub line: usize,
}

impl Block {
    pub fn new(statements: Vec<Stmt>) -> Self {
        Block { statements, ..Block::default() }
    }

    pub fn function(name: &str, params: Vec<Parameter>, statements: Vec<Stmt>) -> Self {
        Block { name: Some(name.to_lowercase()), statements, params, ..Block::default() }
    }

    // Two-phase fields: set while building, frozen once wrapped in Arc.

    pub fn with_return_type(mut self, spec: impl Into<TypeSpec>) -> Self {
        self.return_type = Some(spec.into());
        self
    }

    pub fn with_handlers(mut self, handlers: Vec<ExceptionHandler>) -> Self {
        self.handlers = handlers;
        self
    }

    pub fn at(mut self, line: usize) -> Self {
        self.line = line;
        self
    }

    pub fn display_name(&self) -> &str {
        self.name.as_deref().unwrap_or("<block>")
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TryStatement {
    pub body: Vec<Stmt>,
    pub handlers: Vec<ExceptionHandler>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RaiseStatement {
    Standard {
        error_type: ErrorType,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        message: Option<Expr>,
    },
    Custom {
        name: String,
        #[serde(default)]
        args: Vec<Expr>,
    },
}

impl RaiseStatement {
    /// Builds a raise from its source name; a standard category takes at
    /// most one parameter
    pub fn named(name: &str, mut args: Vec<Expr>) -> Result<Self, String> {
        match ErrorType::from_name(name) {
            Some(error_type) => {
                if args.len() > 1 {
                    return Err(format!(
                        "raise {} takes at most one parameter, got {}",
                        error_type,
                        args.len()
                    ));
                }
                Ok(RaiseStatement::Standard { error_type, message: args.pop() })
            }
            None => Ok(RaiseStatement::Custom { name: name.to_string(), args }),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VarDecl {
    pub name: String,
    pub spec: TypeSpec,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub init: Option<Expr>,
    #[serde(default)]
    pub constant: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ForLoop {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub init: Option<Box<Stmt>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub condition: Option<Expr>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub update: Option<Box<Stmt>>,
    pub body: Vec<Stmt>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ForEach {
    pub var: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub var_type: Option<TypeSpec>,
    pub iterable: Expr,
    pub body: Vec<Stmt>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StmtKind {
    Block(Arc<Block>),
    VarDecl(VarDecl),
    Assign {
        name: String,
        value: Expr,
    },
    IndexAssign {
        target: String,
        index: Expr,
        value: Expr,
    },
    PropertyAssign {
        target: String,
        property: String,
        value: Expr,
    },
    If {
        condition: Expr,
        then_branch: Vec<Stmt>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        else_branch: Option<Vec<Stmt>>,
    },
    While {
        condition: Expr,
        body: Vec<Stmt>,
    },
    DoWhile {
        body: Vec<Stmt>,
        condition: Expr,
    },
    For(ForLoop),
    Foreach(ForEach),
    Break,
    Continue,
    Return(Option<Expr>),
    Call(Call),
    Print(Expr),
    Connect {
        name: String,
        spec: Expr,
    },
    UseConnection {
        name: String,
        body: Vec<Stmt>,
    },
    CursorDecl {
        name: String,
        sql: String,
    },
    OpenCursor {
        name: String,
        #[serde(default)]
        args: Vec<Argument>,
    },
    CloseCursor(String),
    CloseConnection(String),
    Try(TryStatement),
    Raise(RaiseStatement),
    Typedef {
        name: String,
        spec: TypeSpec,
    },
    Import(String),
    Function(Arc<Block>),
}

/// A statement and the source line it came from
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Stmt {
    #[serde(default)]
    pub line: usize,
    pub kind: StmtKind,
}

impl Stmt {
    pub fn new(kind: StmtKind) -> Self {
        Stmt { line: 0, kind }
    }

    pub fn at(mut self, line: usize) -> Self {
        self.line = line;
        self
    }

    pub fn accept<V: StmtVisitor>(&self, visitor: &mut V) -> V::Output {
        match &self.kind {
            StmtKind::Block(block) => visitor.visit_block(block),
            StmtKind::VarDecl(decl) => visitor.visit_var_decl(decl),
            StmtKind::Assign { name, value } => visitor.visit_assign(name, value),
            StmtKind::IndexAssign { target, index, value } => {
                visitor.visit_index_assign(target, index, value)
            }
            StmtKind::PropertyAssign { target, property, value } => {
                visitor.visit_property_assign(target, property, value)
            }
            StmtKind::If { condition, then_branch, else_branch } => {
                visitor.visit_if(condition, then_branch, else_branch.as_deref())
            }
            StmtKind::While { condition, body } => visitor.visit_while(condition, body),
            StmtKind::DoWhile { body, condition } => visitor.visit_do_while(body, condition),
            StmtKind::For(for_loop) => visitor.visit_for(for_loop),
            StmtKind::Foreach(foreach) => visitor.visit_foreach(foreach),
            StmtKind::Break => visitor.visit_break(),
            StmtKind::Continue => visitor.visit_continue(),
            StmtKind::Return(value) => visitor.visit_return(value.as_ref()),
            StmtKind::Call(call) => visitor.visit_call_stmt(call),
            StmtKind::Print(value) => visitor.visit_print(value),
            StmtKind::Connect { name, spec } => visitor.visit_connect(name, spec),
            StmtKind::UseConnection { name, body } => visitor.visit_use_connection(name, body),
            StmtKind::CursorDecl { name, sql } => visitor.visit_cursor_decl(name, sql),
            StmtKind::OpenCursor { name, args } => visitor.visit_open_cursor(name, args),
            StmtKind::CloseCursor(name) => visitor.visit_close_cursor(name),
            StmtKind::CloseConnection(name) => visitor.visit_close_connection(name),
            StmtKind::Try(try_stmt) => visitor.visit_try(try_stmt),
            StmtKind::Raise(raise) => visitor.visit_raise(raise),
            StmtKind::Typedef { name, spec } => visitor.visit_typedef(name, spec),
            StmtKind::Import(path) => visitor.visit_import(path),
            StmtKind::Function(block) => visitor.visit_function(block),
        }
    }

    pub fn block(block: Block) -> Stmt {
        Stmt::new(StmtKind::Block(Arc::new(block)))
    }

    pub fn var(name: &str, spec: impl Into<TypeSpec>, init: Option<Expr>) -> Stmt {
        Stmt::new(StmtKind::VarDecl(VarDecl {
            name: name.to_string(),
            spec: spec.into(),
            init,
            constant: false,
        }))
    }

    pub fn constant(name: &str, spec: impl Into<TypeSpec>, init: Expr) -> Stmt {
        Stmt::new(StmtKind::VarDecl(VarDecl {
            name: name.to_string(),
            spec: spec.into(),
            init: Some(init),
            constant: true,
        }))
    }

    pub fn assign(name: &str, value: Expr) -> Stmt {
        Stmt::new(StmtKind::Assign { name: name.to_string(), value })
    }

    pub fn if_else(condition: Expr, then_branch: Vec<Stmt>, else_branch: Option<Vec<Stmt>>) -> Stmt {
        Stmt::new(StmtKind::If { condition, then_branch, else_branch })
    }

    pub fn while_loop(condition: Expr, body: Vec<Stmt>) -> Stmt {
        Stmt::new(StmtKind::While { condition, body })
    }

    pub fn foreach(var: &str, iterable: Expr, body: Vec<Stmt>) -> Stmt {
        Stmt::new(StmtKind::Foreach(ForEach { var: var.to_string(), var_type: None, iterable, body }))
    }

    pub fn print(value: Expr) -> Stmt {
        Stmt::new(StmtKind::Print(value))
    }

    pub fn call(name: &str, args: Vec<Expr>) -> Stmt {
        Stmt::new(StmtKind::Call(Call {
            name: name.to_string(),
            args: args.into_iter().map(Argument::positional).collect(),
        }))
    }

    pub fn ret(value: Option<Expr>) -> Stmt {
        Stmt::new(StmtKind::Return(value))
    }

    pub fn try_catch(body: Vec<Stmt>, handlers: Vec<ExceptionHandler>) -> Stmt {
        Stmt::new(StmtKind::Try(TryStatement { body, handlers }))
    }

    pub fn raise(error_type: ErrorType, message: Option<Expr>) -> Stmt {
        Stmt::new(StmtKind::Raise(RaiseStatement::Standard { error_type, message }))
    }

    /// Raise by name; a standard category name raises that category when run
    pub fn raise_custom(name: &str, args: Vec<Expr>) -> Stmt {
        Stmt::new(StmtKind::Raise(RaiseStatement::Custom { name: name.to_string(), args }))
    }

    pub fn function(block: Block) -> Stmt {
        Stmt::new(StmtKind::Function(Arc::new(block)))
    }
}

/// A complete program: the top-level block
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Program {
    pub main: Block,
}

impl Program {
    pub fn new(statements: Vec<Stmt>) -> Self {
        Program { main: Block::new(statements) }
    }

    pub fn from_json(text: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(text)
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }

    /// Static checks that do not need a run: duplicate top-level functions
    /// and repeated parameter names
    pub fn validate(&self) -> Vec<String> {
        let mut problems = Vec::new();
        let mut seen = AHashSet::new();

        for stmt in &self.main.statements {
            if let StmtKind::Function(function) = &stmt.kind {
                let name = function.display_name().to_lowercase();
                if !seen.insert(name.clone()) {
                    problems.push(format!("line {}: function '{}' is declared twice", stmt.line, name));
                }
                let mut params = AHashSet::new();
                for param in &function.params {
                    if !params.insert(param.name.clone()) {
                        problems.push(format!(
                            "line {}: parameter '{}' repeated in '{}'",
                            stmt.line, param.name, name
                        ));
                    }
                }
            }
        }
        problems
    }
}

/// One method per statement kind
pub trait StmtVisitor {
    type Output;

    fn visit_block(&mut self, block: &Arc<Block>) -> Self::Output;
    fn visit_var_decl(&mut self, decl: &VarDecl) -> Self::Output;
    fn visit_assign(&mut self, name: &str, value: &Expr) -> Self::Output;
    fn visit_index_assign(&mut self, target: &str, index: &Expr, value: &Expr) -> Self::Output;
    fn visit_property_assign(&mut self, target: &str, property: &str, value: &Expr) -> Self::Output;
    fn visit_if(&mut self, condition: &Expr, then_branch: &[Stmt], else_branch: Option<&[Stmt]>) -> Self::Output;
    fn visit_while(&mut self, condition: &Expr, body: &[Stmt]) -> Self::Output;
    fn visit_do_while(&mut self, body: &[Stmt], condition: &Expr) -> Self::Output;
    fn visit_for(&mut self, for_loop: &ForLoop) -> Self::Output;
    fn visit_foreach(&mut self, foreach: &ForEach) -> Self::Output;
    fn visit_break(&mut self) -> Self::Output;
    fn visit_continue(&mut self) -> Self::Output;
    fn visit_return(&mut self, value: Option<&Expr>) -> Self::Output;
    fn visit_call_stmt(&mut self, call: &Call) -> Self::Output;
    fn visit_print(&mut self, value: &Expr) -> Self::Output;
    fn visit_connect(&mut self, name: &str, spec: &Expr) -> Self::Output;
    fn visit_use_connection(&mut self, name: &str, body: &[Stmt]) -> Self::Output;
    fn visit_cursor_decl(&mut self, name: &str, sql: &str) -> Self::Output;
    fn visit_open_cursor(&mut self, name: &str, args: &[Argument]) -> Self::Output;
    fn visit_close_cursor(&mut self, name: &str) -> Self::Output;
    fn visit_close_connection(&mut self, name: &str) -> Self::Output;
    fn visit_try(&mut self, try_stmt: &TryStatement) -> Self::Output;
    fn visit_raise(&mut self, raise: &RaiseStatement) -> Self::Output;
    fn visit_typedef(&mut self, name: &str, spec: &TypeSpec) -> Self::Output;
    fn visit_import(&mut self, path: &str) -> Self::Output;
    fn visit_function(&mut self, block: &Arc<Block>) -> Self::Output;
}

/// One method per expression kind
pub trait ExprVisitor {
    type Output;

    fn visit_literal(&mut self, literal: &Literal) -> Self::Output;
    fn visit_variable(&mut self, name: &str) -> Self::Output;
    fn visit_unary(&mut self, op: UnaryOp, operand: &Expr) -> Self::Output;
    fn visit_binary(&mut self, left: &Expr, op: BinaryOp, right: &Expr) -> Self::Output;
    fn visit_chain(&mut self, operands: &[Expr], ops: &[BinaryOp]) -> Self::Output;
    fn visit_call(&mut self, call: &Call) -> Self::Output;
    fn visit_length(&mut self, target: &Expr) -> Self::Output;
    fn visit_index(&mut self, target: &Expr, index: &Expr) -> Self::Output;
    fn visit_array_literal(&mut self, items: &[Expr]) -> Self::Output;
    fn visit_array_init(&mut self, element: &TypeSpec, size: Option<&Expr>) -> Self::Output;
    fn visit_property(&mut self, target: &Expr, name: &str) -> Self::Output;
    fn visit_cast(&mut self, target: &TypeSpec, expr: &Expr) -> Self::Output;
    fn visit_cursor_has_next(&mut self, cursor: &str) -> Self::Output;
    fn visit_cursor_next(&mut self, cursor: &str) -> Self::Output;
    fn visit_select(&mut self, sql: &str, params: &[Argument]) -> Self::Output;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::DataType;

    #[test]
    fn raise_names_pick_standard_or_custom() {
        let standard = RaiseStatement::named("math_error", vec![Expr::str("boom")]).unwrap();
        assert!(matches!(standard, RaiseStatement::Standard { error_type: ErrorType::MathError, .. }));

        let custom = RaiseStatement::named("Overdrawn", vec![Expr::int(1), Expr::int(2)]).unwrap();
        assert!(matches!(custom, RaiseStatement::Custom { ref name, ref args } if name == "Overdrawn" && args.len() == 2));

        assert!(RaiseStatement::named("IO_ERROR", vec![Expr::int(1), Expr::int(2)]).is_err());
    }

    #[test]
    fn handler_targets_resolve_by_name() {
        assert_eq!(HandlerTarget::named("any_error"), HandlerTarget::Standard(ErrorType::AnyError));
        assert_eq!(HandlerTarget::named("Overdrawn"), HandlerTarget::Custom("Overdrawn".into()));
    }

    #[test]
    fn programs_survive_json() {
        let program = Program::new(vec![
            Stmt::var("x", DataType::Integer, Some(Expr::int(1))).at(1),
            Stmt::print(Expr::binary(Expr::var("x"), BinaryOp::Add, Expr::int(2))).at(2),
        ]);
        let json = program.to_json().unwrap();
        assert_eq!(Program::from_json(&json).unwrap(), program);
    }

    #[test]
    fn validate_reports_duplicate_functions() {
        let program = Program::new(vec![
            Stmt::function(Block::function("f", vec![], vec![])).at(1),
            Stmt::function(Block::function("F", vec![], vec![])).at(4),
        ]);
        let problems = program.validate();
        assert_eq!(problems.len(), 1);
        assert!(problems[0].contains("line 4"));
    }
}
