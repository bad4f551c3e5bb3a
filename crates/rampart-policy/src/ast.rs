//! Expression tree, runtime values, and static types for the constraint
//! language.

use rampart_types::ParamValue;

/// Unary operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOp {
    /// Logical negation `!`.
    Not,
    /// Arithmetic negation `-`.
    Neg,
}

/// Binary operators, loosest first.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinOp {
    Or,
    And,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    Add,
    Sub,
    Mul,
    Div,
    Rem,
}

impl std::fmt::Display for BinOp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            BinOp::Or => "||",
            BinOp::And => "&&",
            BinOp::Eq => "==",
            BinOp::Ne => "!=",
            BinOp::Lt => "<",
            BinOp::Le => "<=",
            BinOp::Gt => ">",
            BinOp::Ge => ">=",
            BinOp::Add => "+",
            BinOp::Sub => "-",
            BinOp::Mul => "*",
            BinOp::Div => "/",
            BinOp::Rem => "%",
        };
        f.write_str(s)
    }
}

/// Numeric cast targets for the `int(...)` / `double(...)` builtins.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CastKind {
    Int,
    Double,
}

/// A parsed constraint expression.
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Str(String),
    Int(i64),
    Float(f64),
    Bool(bool),
    List(Vec<Expr>),
    /// Reference to a parameter or an `exists` binding.
    Ident(String),
    Unary(UnaryOp, Box<Expr>),
    Binary(BinOp, Box<Expr>, Box<Expr>),
    /// Member call such as `name.size()` or `s.matches('...')`.
    Method {
        recv: Box<Expr>,
        name: String,
        args: Vec<Expr>,
    },
    /// `list.exists(v, predicate)` with `v` bound per element.
    Exists {
        recv: Box<Expr>,
        var: String,
        pred: Box<Expr>,
    },
    /// `int(x)` / `double(x)` coercion.
    Cast(CastKind, Box<Expr>),
}

/// Static type of an expression.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Ty {
    Str,
    Int,
    Float,
    Bool,
    List(Box<Ty>),
    /// Element type of an empty list literal; unifies with anything.
    Unknown,
}

impl std::fmt::Display for Ty {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Ty::Str => f.write_str("string"),
            Ty::Int => f.write_str("int"),
            Ty::Float => f.write_str("double"),
            Ty::Bool => f.write_str("bool"),
            Ty::List(elem) => write!(f, "list<{elem}>"),
            Ty::Unknown => f.write_str("unknown"),
        }
    }
}

/// A runtime value in the constraint language.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Str(String),
    Int(i64),
    Float(f64),
    Bool(bool),
    List(Vec<Value>),
}

impl Value {
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Str(_) => "string",
            Value::Int(_) => "int",
            Value::Float(_) => "double",
            Value::Bool(_) => "bool",
            Value::List(_) => "list",
        }
    }
}

impl From<&ParamValue> for Value {
    /// Number parameters surface as doubles, integer parameters as ints.
    fn from(v: &ParamValue) -> Self {
        match v {
            ParamValue::String(s) => Value::Str(s.clone()),
            ParamValue::Number(f) => Value::Float(*f),
            ParamValue::Integer(i) => Value::Int(*i),
            ParamValue::Boolean(b) => Value::Bool(*b),
        }
    }
}

/// Errors raised while compiling or evaluating a constraint expression.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ExprError {
    /// Lexical or grammatical error, with a byte offset into the source.
    #[error("syntax error at offset {pos}: {message}")]
    Syntax { pos: usize, message: String },

    /// Static type error against the parameter schema.
    #[error("type error: {message}")]
    Type { message: String },

    /// A referenced parameter has no value at evaluation time.
    #[error("unknown parameter '{0}'")]
    UnknownParam(String),

    /// Any other runtime fault (division by zero, bad dynamic regex, ...).
    #[error("evaluation error: {message}")]
    Eval { message: String },
}
