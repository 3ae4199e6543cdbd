//! Lowering of simplified expression trees into three-address steps and
//! boolean comparison nodes.

use std::collections::BTreeSet;

use crate::ast::{Block, Compare, CompareSide, Logic, Node, Step};
use crate::error::{CompileError, Result};
use crate::expr::{BinaryOp, Expr, Tier};
use crate::optimizer::simplify;
use crate::primitives::{ArithmeticOp, Comparator, Operand};
use crate::scope::Scope;

/// Temp allocator bound to the scope that owns the generated steps.
pub struct Temps<'s> {
    scope: &'s mut Scope,
    avoid: BTreeSet<String>,
}

impl<'s> Temps<'s> {
    pub fn new(scope: &'s mut Scope, avoid: BTreeSet<String>) -> Self {
        Temps { scope, avoid }
    }

    pub fn fresh(&mut self) -> Result<String> {
        self.scope.allocate_temp(&self.avoid)
    }
}

fn operand(expr: &Expr) -> Result<Operand> {
    match expr {
        Expr::Literal(value) => Ok(Operand::Constant(value.as_int())),
        Expr::Identifier(name) => Ok(Operand::Signal(name.clone())),
        Expr::Unary { .. } => Err(CompileError::structural(
            "Unary operators must be simplified before decomposition",
        )),
        Expr::Binary { op, .. } => Err(CompileError::structural(format!(
            "Nested `{}` needs a temporary",
            op
        ))),
    }
}

/// Post-order decomposition of an arithmetic tree; the last step writes `out`.
pub fn arithmetic_steps(expr: &Expr, out: &str, temps: &mut Temps) -> Result<Vec<Step>> {
    let mut steps = Vec::new();
    if expr.is_binary() {
        push_steps(expr, out, temps, &mut steps)?;
    } else {
        steps.push(Step::new(
            operand(expr)?,
            ArithmeticOp::Add,
            Operand::Constant(0),
            out,
        ));
    }
    Ok(steps)
}

fn push_steps(expr: &Expr, out: &str, temps: &mut Temps, steps: &mut Vec<Step>) -> Result<()> {
    let Expr::Binary {
        op, left, right, ..
    } = expr
    else {
        return Err(CompileError::structural("Expected a binary expression"));
    };
    let arith = op.arithmetic().ok_or_else(|| {
        CompileError::structural(format!("`{}` can only be used in a condition", op))
    })?;

    let left_temp = if left.is_binary() { Some(temps.fresh()?) } else { None };
    let right_temp = if right.is_binary() { Some(temps.fresh()?) } else { None };
    if let Some(temp) = &left_temp {
        push_steps(left, temp, temps, steps)?;
    }
    if let Some(temp) = &right_temp {
        push_steps(right, temp, temps, steps)?;
    }

    let lhs = match left_temp {
        Some(temp) => Operand::Signal(temp),
        None => operand(left)?,
    };
    let rhs = match right_temp {
        Some(temp) => Operand::Signal(temp),
        None => operand(right)?,
    };
    steps.push(Step::new(lhs, arith, rhs, out));
    Ok(())
}

/// `target * k` or `k * target`, the only shape a scaled self-assignment has.
fn scale_factor(step: &Step, target: &str) -> Option<i32> {
    if step.operator != ArithmeticOp::Mul || step.out != target {
        return None;
    }
    match (&step.left, &step.right) {
        (Operand::Signal(name), Operand::Constant(k))
        | (Operand::Constant(k), Operand::Signal(name))
            if name == target =>
        {
            Some(*k)
        }
        _ => None,
    }
}

/// Lowers `target = expr` to a parallel that forwards every signal, adds the
/// new value of `target` and cancels its old one.
pub fn assignment(target: &str, mut expr: Expr, parent: &Scope) -> Result<Node> {
    let mut series_scope = parent.child();
    simplify(&mut expr, &series_scope.alias, Tier::Arithmetic);

    let mut avoid = BTreeSet::new();
    expr.identifiers(&mut avoid);
    avoid.insert(target.to_string());
    let steps = arithmetic_steps(&expr, target, &mut Temps::new(&mut series_scope, avoid))?;

    let scaled = match steps.as_slice() {
        [step] => scale_factor(step, target),
        _ => None,
    };
    let mut body = vec![Node::Variable(Step::passthrough())];
    match scaled {
        Some(k) => {
            let step = Step::new(
                Operand::signal(target),
                ArithmeticOp::Mul,
                Operand::Constant(k.wrapping_sub(1)),
                target,
            );
            body.push(Node::Series(Block {
                scope: series_scope,
                body: vec![Node::Variable(step)],
            }));
        }
        None => {
            body.push(Node::Series(Block {
                scope: series_scope,
                body: steps.into_iter().map(Node::Variable).collect(),
            }));
            body.push(Node::Variable(Step::new(
                Operand::signal(target),
                ArithmeticOp::Mul,
                Operand::Constant(-1),
                target,
            )));
        }
    }
    Ok(Node::Parallel(Block {
        scope: parent.child(),
        body,
    }))
}

/// Lowers a gating condition. Returns the comparison tree and the signal it
/// writes 1 to when the condition holds.
pub fn condition(mut expr: Expr, scope: &mut Scope) -> Result<(Node, String)> {
    if let Some(value) = simplify(&mut expr, &scope.alias, Tier::Logical) {
        return Err(CompileError::structural(format!(
            "Condition always evaluates to {}",
            value
        )));
    }
    let mut avoid = BTreeSet::new();
    expr.identifiers(&mut avoid);
    let mut temps = Temps::new(scope, avoid);
    let out = temps.fresh()?;

    let mut nodes = Vec::new();
    boolean_nodes(expr, &out, &mut temps, None, &mut nodes)?;
    let node = nodes
        .pop()
        .ok_or_else(|| CompileError::structural("Empty condition"))?;
    Ok((node, out))
}

fn boolean_nodes(
    expr: Expr,
    out: &str,
    temps: &mut Temps,
    parent: Option<BinaryOp>,
    nodes: &mut Vec<Node>,
) -> Result<()> {
    match expr {
        Expr::Binary {
            op,
            left,
            right,
            not,
        } if op.tier() == Tier::Logical => {
            if parent == Some(op) && !not {
                boolean_nodes(*left, out, temps, Some(op), nodes)?;
                return boolean_nodes(*right, out, temps, Some(op), nodes);
            }
            let mut body = Vec::new();
            boolean_nodes(*left, out, temps, Some(op), &mut body)?;
            boolean_nodes(*right, out, temps, Some(op), &mut body)?;
            let logic = Logic {
                not,
                body,
                out: out.to_string(),
            };
            nodes.push(match op {
                BinaryOp::And => Node::And(logic),
                _ => Node::Or(logic),
            });
        }
        Expr::Binary {
            op,
            left,
            right,
            not,
        } if op.tier() == Tier::Relational => {
            let comparator = op.comparator().ok_or_else(|| {
                CompileError::structural(format!("`{}` was not normalized", op))
            })?;
            nodes.push(compare(comparator, not, *left, *right, out, temps)?);
        }
        // a bare value in a boolean position means "non-zero"
        other => nodes.push(compare(Comparator::Eq, true, other, Expr::int(0), out, temps)?),
    }
    Ok(())
}

fn compare(
    operator: Comparator,
    not: bool,
    left: Expr,
    right: Expr,
    out: &str,
    temps: &mut Temps,
) -> Result<Node> {
    // deciders need a signal as the first operand
    let swap = matches!(left, Expr::Literal(_)) && !matches!(right, Expr::Literal(_));
    let (left, right, operator) = if swap {
        (right, left, operator.mirrored())
    } else {
        (left, right, operator)
    };
    Ok(Node::Compare(Compare {
        operator,
        not,
        left: side(left, temps)?,
        right: side(right, temps)?,
        out: out.to_string(),
    }))
}

fn side(expr: Expr, temps: &mut Temps) -> Result<CompareSide> {
    match expr {
        Expr::Literal(value) => Ok(CompareSide::Value(Operand::Constant(value.as_int()))),
        Expr::Identifier(name) => Ok(CompareSide::Value(Operand::Signal(name))),
        Expr::Binary { op, .. } if op.tier() == Tier::Arithmetic => {
            let temp = temps.fresh()?;
            let steps = arithmetic_steps(&expr, &temp, temps)?;
            Ok(CompareSide::Series(Block {
                scope: temps.scope.clone(),
                body: steps.into_iter().map(Node::Variable).collect(),
            }))
        }
        Expr::Binary { op, .. } => Err(CompileError::structural(format!(
            "`{}` can not be used as a comparison operand",
            op
        ))),
        Expr::Unary { .. } => Err(CompileError::structural(
            "Unary operators must be simplified before decomposition",
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::expr::parse_expression;
    use std::collections::HashMap;

    fn read(operand: &Operand, env: &HashMap<String, i32>) -> i32 {
        match operand {
            Operand::Constant(value) => *value,
            Operand::Signal(name) => env.get(name).copied().unwrap_or(0),
        }
    }

    fn run(steps: &[Step], env: &mut HashMap<String, i32>) {
        for step in steps {
            let value = step
                .operator
                .apply(read(&step.left, env), read(&step.right, env));
            env.insert(step.out.clone(), value);
        }
    }

    fn steps_of(source: &str, out: &str, scope: &mut Scope) -> Vec<Step> {
        let expr = parse_expression(source).unwrap();
        let mut avoid = BTreeSet::new();
        expr.identifiers(&mut avoid);
        arithmetic_steps(&expr, out, &mut Temps::new(scope, avoid)).unwrap()
    }

    fn variables(node: &Node) -> Vec<&Step> {
        let Node::Series(block) = node else {
            panic!("expected series, got {:?}", node);
        };
        block
            .body
            .iter()
            .map(|node| match node {
                Node::Variable(step) => step,
                other => panic!("expected variable, got {:?}", other),
            })
            .collect()
    }

    #[test]
    fn test_steps_evaluate_like_the_expression() {
        let mut scope = Scope::root();
        let steps = steps_of("(a + b) * (c - 1)", "out", &mut scope);
        assert_eq!(steps.len(), 3);
        assert_eq!(steps[2].out, "out");

        let mut env = HashMap::from([
            ("a".to_string(), 2),
            ("b".to_string(), 3),
            ("c".to_string(), 5),
        ]);
        run(&steps, &mut env);
        assert_eq!(env["out"], 20);
    }

    #[test]
    fn test_temps_are_unique_and_reserved() {
        let mut scope = Scope::root();
        scope.bind_alias("x".into(), "signal_A").unwrap();
        let steps = steps_of("(a * b + c) * (a - b / c)", "out", &mut scope);
        let temps: Vec<&str> = steps[..steps.len() - 1]
            .iter()
            .map(|step| step.out.as_str())
            .collect();
        let unique: BTreeSet<&str> = temps.iter().copied().collect();
        assert_eq!(unique.len(), temps.len());
        assert!(!unique.contains("signal_A"));
        assert!(temps.iter().all(|temp| scope.reserved.contains(*temp)));
    }

    #[test]
    fn test_temp_pool_exhaustion() {
        let source = vec!["a * b"; 20].join(" + ");
        let expr = parse_expression(&source).unwrap();
        let mut scope = Scope::root();
        let err = arithmetic_steps(&expr, "out", &mut Temps::new(&mut scope, BTreeSet::new()))
            .unwrap_err();
        assert!(matches!(err, CompileError::ResourceExhausted { .. }));
    }

    #[test]
    fn test_assignment_shape() {
        let expr = parse_expression("a + 1").unwrap();
        let Node::Parallel(block) = assignment("x", expr, &Scope::root()).unwrap() else {
            panic!("expected parallel");
        };
        assert_eq!(block.body.len(), 3);
        assert_eq!(block.body[0], Node::Variable(Step::passthrough()));
        let steps = variables(&block.body[1]);
        assert_eq!(
            *steps[0],
            Step::new(
                Operand::signal("a"),
                ArithmeticOp::Add,
                Operand::Constant(1),
                "x"
            )
        );
        assert_eq!(
            block.body[2],
            Node::Variable(Step::new(
                Operand::signal("x"),
                ArithmeticOp::Mul,
                Operand::Constant(-1),
                "x"
            ))
        );
    }

    #[test]
    fn test_literal_assignment_keeps_a_step() {
        let Node::Parallel(block) = assignment("x", Expr::int(1), &Scope::root()).unwrap() else {
            panic!("expected parallel");
        };
        let steps = variables(&block.body[1]);
        assert_eq!(steps.len(), 1);
        assert_eq!(steps[0].left, Operand::Constant(1));
        assert_eq!(steps[0].out, "x");
    }

    #[test]
    fn test_scaled_self_assignment_skips_negation() {
        let expr = Expr::binary(BinaryOp::Mul, Expr::ident("x"), Expr::int(3));
        let Node::Parallel(block) = assignment("x", expr, &Scope::root()).unwrap() else {
            panic!("expected parallel");
        };
        assert_eq!(block.body.len(), 2);
        let steps = variables(&block.body[1]);
        assert_eq!(steps[0].right, Operand::Constant(2));
    }

    #[test]
    fn test_comparison_in_arithmetic_is_rejected() {
        let expr = parse_expression("(a < b) + 1").unwrap();
        let err = assignment("x", expr, &Scope::root()).unwrap_err();
        assert!(err.to_string().contains("can only be used in a condition"));
    }

    #[test]
    fn test_condition_flattens_matching_operators() {
        let mut scope = Scope::root();
        let expr = parse_expression("a < 3 && 1 < b && c = 2").unwrap();
        let (node, out) = condition(expr, &mut scope).unwrap();
        assert_eq!(out, "signal_A");
        let Node::And(logic) = node else {
            panic!("expected and");
        };
        assert_eq!(logic.body.len(), 3);
        let Node::Compare(swapped) = &logic.body[1] else {
            panic!("expected compare");
        };
        assert_eq!(swapped.operator, Comparator::Gt);
        assert_eq!(swapped.left, CompareSide::Value(Operand::signal("b")));
        assert_eq!(swapped.out, "signal_A");
    }

    #[test]
    fn test_condition_keeps_negated_groups() {
        let mut scope = Scope::root();
        let expr = parse_expression("a = 1 || !(b = 2 || c = 3)").unwrap();
        let (node, _) = condition(expr, &mut scope).unwrap();
        let Node::Or(logic) = node else {
            panic!("expected or");
        };
        assert_eq!(logic.body.len(), 2);
        assert!(matches!(&logic.body[1], Node::Or(inner) if inner.not && inner.body.len() == 2));
    }

    #[test]
    fn test_condition_side_series_uses_fresh_temp() {
        let mut scope = Scope::root();
        let expr = parse_expression("(a + 1) * 2 > b").unwrap();
        let (node, out) = condition(expr, &mut scope).unwrap();
        let Node::Compare(compare) = node else {
            panic!("expected compare");
        };
        let left = compare.left.operand();
        assert_ne!(left, Operand::Signal(out));
        assert!(matches!(&compare.left, CompareSide::Series(block) if block.body.len() == 2));
    }

    #[test]
    fn test_bare_value_condition_tests_non_zero() {
        let mut scope = Scope::root();
        let (node, _) = condition(Expr::ident("a"), &mut scope).unwrap();
        assert!(matches!(
            node,
            Node::Compare(Compare { operator: Comparator::Eq, not: true, .. })
        ));
    }

    #[test]
    fn test_constant_condition_is_rejected() {
        let mut scope = Scope::root();
        let expr = parse_expression("1 < 2 || a = 1").unwrap();
        assert!(condition(expr, &mut scope).is_err());
    }
}
