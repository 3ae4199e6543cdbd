use crate::primitives::{ArithmeticOp, Comparator, Operand, EACH};
use crate::scope::Scope;
use serde::Serialize;

/// Parsed program. Never nests, so it is not a [`Node`].
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Script {
    pub scope: Scope,
    pub body: Vec<Node>,
}

impl Script {
    pub fn new() -> Self {
        Script {
            scope: Scope::root(),
            body: Vec::new(),
        }
    }
}

impl Default for Script {
    fn default() -> Self {
        Self::new()
    }
}

/// Scoped, ordered body. Order is wiring order.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Block {
    pub scope: Scope,
    pub body: Vec<Node>,
}

impl Block {
    /// Signal written by the last step of a series, if it ends in one.
    pub fn last_out(&self) -> Option<&str> {
        match self.body.last() {
            Some(Node::Variable(step)) => Some(&step.out),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Node {
    Chain(Block),
    Parallel(Block),
    Series(Block),
    If(Conditional),
    Compare(Compare),
    And(Logic),
    Or(Logic),
    Variable(Step),
}

impl Node {
    /// Nesting depth of the construct, leaves count as 1.
    pub fn depth(&self) -> usize {
        let children = match self {
            Node::Chain(block) | Node::Parallel(block) | Node::Series(block) => {
                block.body.iter().map(Node::depth).max().unwrap_or(0)
            }
            Node::If(cond) => cond
                .body
                .iter()
                .map(Node::depth)
                .chain(std::iter::once(cond.expr.depth()))
                .max()
                .unwrap_or(0),
            Node::Compare(compare) => [&compare.left, &compare.right]
                .iter()
                .map(|side| match side {
                    CompareSide::Series(block) => 1 + block.body.len().min(1),
                    CompareSide::Value(_) => 0,
                })
                .max()
                .unwrap_or(0),
            Node::And(logic) | Node::Or(logic) => {
                logic.body.iter().map(Node::depth).max().unwrap_or(0)
            }
            Node::Variable(_) => 0,
        };
        children + 1
    }
}

/// `if`/`while` block gated by a lowered condition.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Conditional {
    pub is_while: bool,
    pub scope: Scope,
    pub expr: Box<Node>,
    pub out: String,
    pub body: Vec<Node>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Compare {
    pub operator: Comparator,
    pub not: bool,
    pub left: CompareSide,
    pub right: CompareSide,
    pub out: String,
}

/// Operand of a comparison: a plain value, or a series computing a temp.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum CompareSide {
    Value(Operand),
    Series(Block),
}

impl CompareSide {
    /// The operand the decider reads for this side.
    pub fn operand(&self) -> Operand {
        match self {
            CompareSide::Value(operand) => operand.clone(),
            CompareSide::Series(block) => {
                Operand::Signal(block.last_out().unwrap_or(EACH).to_string())
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Logic {
    pub not: bool,
    pub body: Vec<Node>,
    pub out: String,
}

/// Single arithmetic assignment `out = left operator right`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Step {
    pub left: Operand,
    pub operator: ArithmeticOp,
    pub right: Operand,
    pub out: String,
}

impl Step {
    pub fn new(left: Operand, operator: ArithmeticOp, right: Operand, out: &str) -> Self {
        Step {
            left,
            operator,
            right,
            out: out.to_string(),
        }
    }

    /// `each + 0 -> each`, forwards every input signal unchanged.
    pub fn passthrough() -> Self {
        Step::new(Operand::signal(EACH), ArithmeticOp::Add, Operand::Constant(0), EACH)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn variable(out: &str) -> Node {
        Node::Variable(Step::new(
            Operand::signal("a"),
            ArithmeticOp::Add,
            Operand::Constant(1),
            out,
        ))
    }

    #[test]
    fn test_node_serializes_with_type_tag() {
        let node = Node::Series(Block {
            scope: Scope::default(),
            body: vec![variable("x")],
        });
        let json = serde_json::to_value(&node).unwrap();
        assert_eq!(json["type"], "series");
        assert_eq!(json["body"][0]["type"], "variable");
        assert_eq!(json["body"][0]["operator"], "+");
        assert_eq!(json["body"][0]["right"], 1);
    }

    #[test]
    fn test_series_side_reads_last_out() {
        let side = CompareSide::Series(Block {
            scope: Scope::default(),
            body: vec![variable("signal_B"), variable("signal_A")],
        });
        assert_eq!(side.operand(), Operand::signal("signal_A"));
    }

    #[test]
    fn test_depth() {
        let series = Node::Series(Block {
            scope: Scope::default(),
            body: vec![variable("x")],
        });
        let parallel = Node::Parallel(Block {
            scope: Scope::default(),
            body: vec![series, variable("y")],
        });
        assert_eq!(variable("z").depth(), 1);
        assert_eq!(parallel.depth(), 3);
    }
}
