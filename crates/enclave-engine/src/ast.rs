//! Syntax tree produced by the parser

use std::rc::Rc;

#[derive(Debug)]
pub struct Program {
    pub body: Vec<Stmt>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VarKind {
    Var,
    Let,
    Const,
}

#[derive(Debug)]
pub struct Declarator {
    pub name: Rc<str>,
    pub init: Option<Expr>,
}

#[derive(Debug)]
pub struct VarDecl {
    pub kind: VarKind,
    pub declarations: Vec<Declarator>,
}

#[derive(Debug)]
pub struct FunctionNode {
    pub name: Option<Rc<str>>,
    pub params: Vec<Rc<str>>,
    pub body: Vec<Stmt>,
}

#[derive(Debug)]
pub enum ForInit {
    Var(VarDecl),
    Expr(Expr),
}

#[derive(Debug)]
pub enum ForInLeft {
    Declaration(VarKind, Rc<str>),
    /// Identifier or member expression.
    Target(Expr),
}

#[derive(Debug)]
pub struct CatchClause {
    pub param: Option<Rc<str>>,
    pub body: Vec<Stmt>,
}

#[derive(Debug)]
pub enum Stmt {
    Empty,
    Expr(Expr),
    Var(VarDecl),
    Function(Rc<FunctionNode>),
    Block(Vec<Stmt>),
    If {
        test: Expr,
        consequent: Box<Stmt>,
        alternate: Option<Box<Stmt>>,
    },
    While {
        test: Expr,
        body: Box<Stmt>,
    },
    DoWhile {
        body: Box<Stmt>,
        test: Expr,
    },
    For {
        init: Option<ForInit>,
        test: Option<Expr>,
        update: Option<Expr>,
        body: Box<Stmt>,
    },
    ForIn {
        left: ForInLeft,
        right: Expr,
        body: Box<Stmt>,
    },
    Return(Option<Expr>),
    Break,
    Continue,
    Throw(Expr),
    Try {
        block: Vec<Stmt>,
        handler: Option<CatchClause>,
        finalizer: Option<Vec<Stmt>>,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOp {
    Not,
    Minus,
    Plus,
    BitNot,
    TypeOf,
    Void,
    Delete,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateOp {
    Increment,
    Decrement,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    Rem,
    Exp,
    Eq,
    NotEq,
    StrictEq,
    StrictNotEq,
    Lt,
    Gt,
    LtEq,
    GtEq,
    BitAnd,
    BitOr,
    BitXor,
    Shl,
    Shr,
    UShr,
    In,
    InstanceOf,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogicalOp {
    And,
    Or,
    Nullish,
}

#[derive(Debug)]
pub enum MemberKey {
    Static(Rc<str>),
    Computed(Box<Expr>),
}

#[derive(Debug)]
pub enum PropName {
    Static(Rc<str>),
    Computed(Expr),
}

#[derive(Debug)]
pub enum Expr {
    Number(f64),
    String(Rc<str>),
    Bool(bool),
    Null,
    This,
    Ident(Rc<str>),
    Array(Vec<Option<Expr>>),
    Object(Vec<(PropName, Expr)>),
    Function(Rc<FunctionNode>),
    Member {
        object: Box<Expr>,
        property: MemberKey,
    },
    Call {
        callee: Box<Expr>,
        args: Vec<Expr>,
    },
    New {
        callee: Box<Expr>,
        args: Vec<Expr>,
    },
    Unary {
        op: UnaryOp,
        arg: Box<Expr>,
    },
    Update {
        op: UpdateOp,
        prefix: bool,
        target: Box<Expr>,
    },
    Binary {
        op: BinaryOp,
        left: Box<Expr>,
        right: Box<Expr>,
    },
    Logical {
        op: LogicalOp,
        left: Box<Expr>,
        right: Box<Expr>,
    },
    Conditional {
        test: Box<Expr>,
        consequent: Box<Expr>,
        alternate: Box<Expr>,
    },
    Assign {
        /// `None` for plain `=`, the arithmetic operator for compound forms.
        op: Option<BinaryOp>,
        target: Box<Expr>,
        value: Box<Expr>,
    },
    Sequence(Vec<Expr>),
}

impl Expr {
    pub fn is_assignment_target(&self) -> bool {
        matches!(self, Expr::Ident(_) | Expr::Member { .. })
    }
}

/// `var` names declared anywhere in `body`, not descending into nested
/// functions. Order of first appearance, without duplicates.
pub fn var_names(body: &[Stmt]) -> Vec<Rc<str>> {
    let mut names = Vec::new();
    for stmt in body {
        collect_vars(stmt, &mut names);
    }
    names
}

fn push_unique(names: &mut Vec<Rc<str>>, name: &Rc<str>) {
    if !names.iter().any(|n| n == name) {
        names.push(name.clone());
    }
}

fn collect_vars(stmt: &Stmt, names: &mut Vec<Rc<str>>) {
    match stmt {
        Stmt::Var(decl) if decl.kind == VarKind::Var => {
            for d in &decl.declarations {
                push_unique(names, &d.name);
            }
        }
        Stmt::Block(body) => body.iter().for_each(|s| collect_vars(s, names)),
        Stmt::If {
            consequent,
            alternate,
            ..
        } => {
            collect_vars(consequent, names);
            if let Some(alt) = alternate {
                collect_vars(alt, names);
            }
        }
        Stmt::While { body, .. } | Stmt::DoWhile { body, .. } => collect_vars(body, names),
        Stmt::For { init, body, .. } => {
            if let Some(ForInit::Var(decl)) = init {
                if decl.kind == VarKind::Var {
                    for d in &decl.declarations {
                        push_unique(names, &d.name);
                    }
                }
            }
            collect_vars(body, names);
        }
        Stmt::ForIn { left, body, .. } => {
            if let ForInLeft::Declaration(VarKind::Var, name) = left {
                push_unique(names, name);
            }
            collect_vars(body, names);
        }
        Stmt::Try {
            block,
            handler,
            finalizer,
        } => {
            block.iter().for_each(|s| collect_vars(s, names));
            if let Some(h) = handler {
                h.body.iter().for_each(|s| collect_vars(s, names));
            }
            if let Some(f) = finalizer {
                f.iter().for_each(|s| collect_vars(s, names));
            }
        }
        _ => {}
    }
}
