use std::collections::BTreeSet;
use std::fmt;

use oxc_allocator::Allocator;
use oxc_ast::ast::{Expression, Statement};
use oxc_parser::Parser;
use oxc_span::SourceType;
use oxc_syntax::operator::{BinaryOperator, LogicalOperator, UnaryOperator};

use crate::error::{CompileError, Location, Result};
use crate::primitives::{ArithmeticOp, Comparator};

/// Evaluation context of an operator: relational operators only fold under a
/// comparison, logical ones only under a logical operator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Tier {
    Arithmetic,
    Relational,
    Logical,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    Lt,
    Gt,
    Eq,
    Ne,
    Le,
    Ge,
    And,
    Or,
}

impl BinaryOp {
    pub fn tier(self) -> Tier {
        match self {
            BinaryOp::Add | BinaryOp::Sub | BinaryOp::Mul | BinaryOp::Div => Tier::Arithmetic,
            BinaryOp::And | BinaryOp::Or => Tier::Logical,
            _ => Tier::Relational,
        }
    }

    pub fn arithmetic(self) -> Option<ArithmeticOp> {
        match self {
            BinaryOp::Add => Some(ArithmeticOp::Add),
            BinaryOp::Sub => Some(ArithmeticOp::Sub),
            BinaryOp::Mul => Some(ArithmeticOp::Mul),
            BinaryOp::Div => Some(ArithmeticOp::Div),
            _ => None,
        }
    }

    /// Only the three canonical relations map to a decider comparator.
    pub fn comparator(self) -> Option<Comparator> {
        match self {
            BinaryOp::Lt => Some(Comparator::Lt),
            BinaryOp::Gt => Some(Comparator::Gt),
            BinaryOp::Eq => Some(Comparator::Eq),
            _ => None,
        }
    }

    pub fn from_arithmetic(op: ArithmeticOp) -> Self {
        match op {
            ArithmeticOp::Add => BinaryOp::Add,
            ArithmeticOp::Sub => BinaryOp::Sub,
            ArithmeticOp::Mul => BinaryOp::Mul,
            ArithmeticOp::Div => BinaryOp::Div,
        }
    }
}

impl fmt::Display for BinaryOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let symbol = match self {
            BinaryOp::Add => "+",
            BinaryOp::Sub => "-",
            BinaryOp::Mul => "*",
            BinaryOp::Div => "/",
            BinaryOp::Lt => "<",
            BinaryOp::Gt => ">",
            BinaryOp::Eq => "=",
            BinaryOp::Ne => "!=",
            BinaryOp::Le => "<=",
            BinaryOp::Ge => ">=",
            BinaryOp::And => "&&",
            BinaryOp::Or => "||",
        };
        f.write_str(symbol)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOp {
    Not,
    Neg,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Value {
    Int(i32),
    Bool(bool),
}

impl Value {
    pub fn as_int(self) -> i32 {
        match self {
            Value::Int(value) => value,
            Value::Bool(flag) => flag as i32,
        }
    }

    pub fn truthy(self) -> bool {
        self.as_int() != 0
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Int(value) => write!(f, "{}", value),
            Value::Bool(flag) => write!(f, "{}", flag),
        }
    }
}

/// Infix expression tree. `not` on a binary node negates its (boolean) result.
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Literal(Value),
    Identifier(String),
    Binary {
        op: BinaryOp,
        left: Box<Expr>,
        right: Box<Expr>,
        not: bool,
    },
    Unary {
        op: UnaryOp,
        argument: Box<Expr>,
    },
}

impl Default for Expr {
    fn default() -> Self {
        Expr::Literal(Value::Int(0))
    }
}

impl Expr {
    pub fn binary(op: BinaryOp, left: Expr, right: Expr) -> Self {
        Expr::Binary {
            op,
            left: Box::new(left),
            right: Box::new(right),
            not: false,
        }
    }

    pub fn int(value: i32) -> Self {
        Expr::Literal(Value::Int(value))
    }

    pub fn ident(name: &str) -> Self {
        Expr::Identifier(name.to_string())
    }

    pub fn is_binary(&self) -> bool {
        matches!(self, Expr::Binary { .. })
    }

    /// Collects every identifier the expression reads.
    pub fn identifiers(&self, names: &mut BTreeSet<String>) {
        match self {
            Expr::Literal(_) => {}
            Expr::Identifier(name) => {
                names.insert(name.clone());
            }
            Expr::Binary { left, right, .. } => {
                left.identifiers(names);
                right.identifiers(names);
            }
            Expr::Unary { argument, .. } => argument.identifiers(names),
        }
    }
}

/// Scripts write equality as a single `=`; rewrite it to `==` so the JS
/// grammar keeps comparison precedence.
fn normalize_equality(raw: &str) -> String {
    let chars: Vec<char> = raw.chars().collect();
    let mut out = String::with_capacity(raw.len() + 4);
    for (i, &c) in chars.iter().enumerate() {
        out.push(c);
        if c == '=' {
            let prev = i.checked_sub(1).map(|j| chars[j]);
            let next = chars.get(i + 1).copied();
            if !matches!(prev, Some('=' | '<' | '>' | '!')) && next != Some('=') {
                out.push('=');
            }
        }
    }
    out
}

fn binary_op(op: BinaryOperator) -> Option<BinaryOp> {
    Some(match op {
        BinaryOperator::Addition => BinaryOp::Add,
        BinaryOperator::Subtraction => BinaryOp::Sub,
        BinaryOperator::Multiplication => BinaryOp::Mul,
        BinaryOperator::Division => BinaryOp::Div,
        BinaryOperator::LessThan => BinaryOp::Lt,
        BinaryOperator::GreaterThan => BinaryOp::Gt,
        BinaryOperator::LessEqualThan => BinaryOp::Le,
        BinaryOperator::GreaterEqualThan => BinaryOp::Ge,
        BinaryOperator::Equality | BinaryOperator::StrictEquality => BinaryOp::Eq,
        BinaryOperator::Inequality | BinaryOperator::StrictInequality => BinaryOp::Ne,
        _ => return None,
    })
}

fn convert(expr: &Expression<'_>) -> std::result::Result<Expr, String> {
    match expr {
        Expression::NumericLiteral(boxed) => {
            let value = boxed.value;
            if value.fract() != 0.0 || value < i32::MIN as f64 || value > i32::MAX as f64 {
                return Err(format!("Only 32-bit integers are supported, found {}", value));
            }
            Ok(Expr::int(value as i32))
        }
        Expression::BooleanLiteral(boxed) => Ok(Expr::Literal(Value::Bool(boxed.value))),
        Expression::Identifier(boxed) => Ok(Expr::ident(boxed.name.as_str())),
        Expression::ParenthesizedExpression(boxed) => convert(&boxed.expression),
        Expression::UnaryExpression(boxed) => {
            let argument = convert(&boxed.argument)?;
            let op = match boxed.operator {
                UnaryOperator::LogicalNot => UnaryOp::Not,
                UnaryOperator::UnaryNegation => UnaryOp::Neg,
                UnaryOperator::UnaryPlus => return Ok(argument),
                _ => return Err("Only !, - and + unary operators supported".into()),
            };
            Ok(Expr::Unary {
                op,
                argument: Box::new(argument),
            })
        }
        Expression::LogicalExpression(boxed) => {
            let op = match boxed.operator {
                LogicalOperator::And => BinaryOp::And,
                LogicalOperator::Or => BinaryOp::Or,
                _ => return Err("Unsupported logical operator".into()),
            };
            Ok(Expr::binary(op, convert(&boxed.left)?, convert(&boxed.right)?))
        }
        Expression::BinaryExpression(boxed) => {
            let op = binary_op(boxed.operator)
                .ok_or_else(|| format!("Unsupported operator {:?}", boxed.operator))?;
            Ok(Expr::binary(op, convert(&boxed.left)?, convert(&boxed.right)?))
        }
        _ => Err("Unsupported expression".into()),
    }
}

/// Parses a raw expression substring into an [`Expr`] tree.
pub fn parse_expression(raw: &str) -> Result<Expr> {
    let source = normalize_equality(raw);
    let alloc = Allocator::default();
    let ret = Parser::new(&alloc, &source, SourceType::default()).parse();
    let fail = |message: String| {
        CompileError::syntax(format!("{} in `{}`", message, raw), Location::unknown())
    };
    if ret.panicked || !ret.errors.is_empty() {
        return Err(fail(format!("Parse errors: {:?}", ret.errors)));
    }
    let mut statements = ret.program.body.iter();
    match (statements.next(), statements.next()) {
        (Some(Statement::ExpressionStatement(es)), None) => convert(&es.expression).map_err(fail),
        _ => Err(fail("Expected a single expression".into())),
    }
}
