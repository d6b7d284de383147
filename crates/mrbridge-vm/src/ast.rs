//! Syntax tree of the script subset

#![allow(missing_docs)]

/// Expression node with its source line
#[derive(Debug, Clone, PartialEq)]
pub struct Node {
    /// Kind and children
    pub kind: NodeKind,
    /// 1-based line
    pub line: u32,
}

impl Node {
    /// Build a node
    pub fn new(kind: NodeKind, line: u32) -> Self {
        Self { kind, line }
    }
}

/// Node kinds
#[derive(Debug, Clone, PartialEq)]
pub enum NodeKind {
    Nil,
    True,
    False,
    SelfRef,
    Int(i64),
    Float(f64),
    Str(String),
    Sym(String),
    /// Read of a declared local
    LocalGet(String),
    /// Assignment to a local
    LocalSet(String, Box<Node>),
    Const(String),
    /// Method call; `recv == None` calls on self
    Call {
        recv: Option<Box<Node>>,
        name: String,
        args: Vec<Node>,
    },
    And(Box<Node>, Box<Node>),
    Or(Box<Node>, Box<Node>),
    Not(Box<Node>),
    If {
        cond: Box<Node>,
        then_body: Vec<Node>,
        else_body: Vec<Node>,
    },
    While {
        cond: Box<Node>,
        body: Vec<Node>,
    },
    Begin(Box<BeginBlock>),
    /// Method definition; `singleton` for `def self.name`
    Def {
        name: String,
        singleton: bool,
        scope: Box<Scope>,
    },
    Class {
        name: String,
        superclass: Option<Box<Node>>,
        scope: Box<Scope>,
    },
    Module {
        name: String,
        scope: Box<Scope>,
    },
    Return(Option<Box<Node>>),
    /// Array literal
    Array(Vec<Node>),
    /// Parenthesised statement list
    Seq(Vec<Node>),
}

/// `begin ... rescue ... end` body
#[derive(Debug, Clone, PartialEq)]
pub struct BeginBlock {
    pub body: Vec<Node>,
    pub rescues: Vec<RescueClause>,
}

/// One `rescue` clause
#[derive(Debug, Clone, PartialEq)]
pub struct RescueClause {
    /// Exception classes; empty means `StandardError`
    pub classes: Vec<Node>,
    /// `=> var` binding
    pub var: Option<String>,
    pub body: Vec<Node>,
    pub line: u32,
}

/// Local variable scope of a program, method, class or module body
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Scope {
    /// Locals in declaration order; parameters come first
    pub locals: Vec<String>,
    /// Parameter count
    pub nparams: usize,
    pub body: Vec<Node>,
}

impl Scope {
    /// Slot of `name`, counting the receiver as slot 0
    pub fn slot_of(&self, name: &str) -> Option<usize> {
        self.locals.iter().position(|l| l == name).map(|i| i + 1)
    }
}
