use crate::expr::{BinaryOp, Expr, Tier, UnaryOp, Value};
use std::collections::BTreeMap;

// Simplifier: alias rewriting & const folding & short circuits & negation push-down.
// Returns the value when the whole (sub)tree folded to a literal.
pub fn simplify(expr: &mut Expr, alias: &BTreeMap<String, String>, tier: Tier) -> Option<Value> {
    match expr {
        Expr::Identifier(name) => {
            if let Some(target) = alias.get(name.as_str()) {
                *name = target.clone();
            }
            None
        }
        Expr::Literal(value) => Some(*value),
        Expr::Unary { op, argument } => {
            let op = *op;
            let folded = simplify(argument, alias, tier);
            let argument = std::mem::take(argument.as_mut());
            *expr = match (op, folded) {
                (UnaryOp::Neg, Some(value)) => Expr::int(value.as_int().wrapping_neg()),
                (UnaryOp::Neg, None) => Expr::binary(BinaryOp::Sub, Expr::int(0), argument),
                (UnaryOp::Not, _) => negate(argument),
            };
            literal(expr)
        }
        Expr::Binary {
            op,
            left,
            right,
            not,
        } => {
            // 3-operator relational set
            let canonical = match *op {
                BinaryOp::Ne => Some(BinaryOp::Eq),
                BinaryOp::Le => Some(BinaryOp::Gt),
                BinaryOp::Ge => Some(BinaryOp::Lt),
                _ => None,
            };
            if let Some(canonical) = canonical {
                *op = canonical;
                *not = !*not;
            }
            let (op, negated) = (*op, *not);
            let child_tier = match op.tier() {
                Tier::Relational => Tier::Arithmetic,
                own => own,
            };
            let lhs = simplify(left, alias, child_tier);
            let rhs = simplify(right, alias, child_tier);

            let replacement = match (lhs, rhs) {
                (Some(a), Some(b)) => fold(op, a, b, tier).map(|value| {
                    Expr::Literal(if negated {
                        Value::Bool(!value.truthy())
                    } else {
                        value
                    })
                }),
                (Some(value), None) | (None, Some(value)) if op.tier() == Tier::Logical => {
                    let keep_other = (op == BinaryOp::And) == value.truthy();
                    if keep_other {
                        let other = if lhs.is_some() { right } else { left };
                        let other = std::mem::take(other.as_mut());
                        Some(if negated { negate(other) } else { other })
                    } else {
                        Some(Expr::Literal(Value::Bool((op == BinaryOp::Or) != negated)))
                    }
                }
                _ => None,
            };
            if let Some(replacement) = replacement {
                *expr = replacement;
            }
            literal(expr)
        }
    }
}

fn literal(expr: &Expr) -> Option<Value> {
    match expr {
        Expr::Literal(value) => Some(*value),
        _ => None,
    }
}

fn fold(op: BinaryOp, a: Value, b: Value, tier: Tier) -> Option<Value> {
    if let Some(arith) = op.arithmetic() {
        return Some(Value::Int(arith.apply(a.as_int(), b.as_int())));
    }
    if op.tier() > tier {
        return None;
    }
    let value = match op {
        BinaryOp::And => a.truthy() && b.truthy(),
        BinaryOp::Or => a.truthy() || b.truthy(),
        _ => op.comparator()?.holds(a.as_int(), b.as_int()),
    };
    Some(Value::Bool(value))
}

/// Boolean negation without a unary node: flips `not` on a comparison or
/// logical node, otherwise tests the value against zero.
pub fn negate(expr: Expr) -> Expr {
    match expr {
        Expr::Literal(value) => Expr::Literal(Value::Bool(!value.truthy())),
        Expr::Binary {
            op,
            left,
            right,
            not,
        } if op.tier() != Tier::Arithmetic => Expr::Binary {
            op,
            left,
            right,
            not: !not,
        },
        other => Expr::binary(BinaryOp::Eq, other, Expr::int(0)),
    }
}
