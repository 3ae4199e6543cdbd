use serde::Serialize;
use std::fmt;

pub const EACH: &str = "signal_each";
pub const EVERYTHING: &str = "signal_everything";

/// Scratch signals handed out by the decomposer, in allocation order.
pub const TEMP_SIGNALS: [&str; 36] = [
    "signal_A", "signal_B", "signal_C", "signal_D", "signal_E", "signal_F", "signal_G",
    "signal_H", "signal_I", "signal_J", "signal_K", "signal_L", "signal_M", "signal_N",
    "signal_O", "signal_P", "signal_Q", "signal_R", "signal_S", "signal_T", "signal_U",
    "signal_V", "signal_W", "signal_X", "signal_Y", "signal_Z", "signal_0", "signal_1",
    "signal_2", "signal_3", "signal_4", "signal_5", "signal_6", "signal_7", "signal_8",
    "signal_9",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ArithmeticOp {
    #[serde(rename = "+")]
    Add,
    #[serde(rename = "-")]
    Sub,
    #[serde(rename = "*")]
    Mul,
    #[serde(rename = "/")]
    Div,
}

impl ArithmeticOp {
    pub fn from_char(c: char) -> Option<Self> {
        match c {
            '+' => Some(ArithmeticOp::Add),
            '-' => Some(ArithmeticOp::Sub),
            '*' => Some(ArithmeticOp::Mul),
            '/' => Some(ArithmeticOp::Div),
            _ => None,
        }
    }

    pub fn symbol(self) -> &'static str {
        match self {
            ArithmeticOp::Add => "+",
            ArithmeticOp::Sub => "-",
            ArithmeticOp::Mul => "*",
            ArithmeticOp::Div => "/",
        }
    }

    pub fn from_symbol(symbol: &str) -> Option<Self> {
        symbol.chars().next().and_then(Self::from_char)
    }

    /// Combinator arithmetic: 32-bit wrapping, division by zero yields 0.
    pub fn apply(self, a: i32, b: i32) -> i32 {
        match self {
            ArithmeticOp::Add => a.wrapping_add(b),
            ArithmeticOp::Sub => a.wrapping_sub(b),
            ArithmeticOp::Mul => a.wrapping_mul(b),
            ArithmeticOp::Div => {
                if b == 0 {
                    0
                } else {
                    a.wrapping_div(b)
                }
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Comparator {
    #[serde(rename = "<")]
    Lt,
    #[serde(rename = ">")]
    Gt,
    #[serde(rename = "=")]
    Eq,
}

impl Comparator {
    pub fn symbol(self) -> &'static str {
        match self {
            Comparator::Lt => "<",
            Comparator::Gt => ">",
            Comparator::Eq => "=",
        }
    }

    pub fn from_symbol(symbol: &str) -> Option<Self> {
        match symbol {
            "<" => Some(Comparator::Lt),
            ">" => Some(Comparator::Gt),
            "=" => Some(Comparator::Eq),
            _ => None,
        }
    }

    /// Comparator that holds for swapped operands.
    pub fn mirrored(self) -> Self {
        match self {
            Comparator::Lt => Comparator::Gt,
            Comparator::Gt => Comparator::Lt,
            Comparator::Eq => Comparator::Eq,
        }
    }

    pub fn holds(self, a: i32, b: i32) -> bool {
        match self {
            Comparator::Lt => a < b,
            Comparator::Gt => a > b,
            Comparator::Eq => a == b,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum Operand {
    Signal(String),
    Constant(i32),
}

impl Operand {
    pub fn signal(name: &str) -> Self {
        Operand::Signal(name.to_string())
    }
}

impl fmt::Display for Operand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Operand::Signal(name) => write!(f, "{}", name),
            Operand::Constant(value) => write!(f, "{}", value),
        }
    }
}

/// Payload configured on a combinator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Condition {
    Arithmetic {
        left: Operand,
        op: ArithmeticOp,
        right: Operand,
        out: String,
    },
    Decider {
        left: Operand,
        op: Comparator,
        right: Operand,
        out: String,
        copy_count_from_input: bool,
    },
}

impl Condition {
    pub fn arithmetic(left: Operand, op: ArithmeticOp, right: Operand, out: &str) -> Self {
        Condition::Arithmetic {
            left,
            op,
            right,
            out: out.to_string(),
        }
    }

    pub fn decider(left: Operand, op: Comparator, right: Operand, out: &str) -> Self {
        Condition::Decider {
            left,
            op,
            right,
            out: out.to_string(),
            copy_count_from_input: false,
        }
    }

    /// Decider that forwards the input count of `out` instead of emitting 1.
    pub fn counting(left: Operand, op: Comparator, right: Operand, out: &str) -> Self {
        Condition::Decider {
            left,
            op,
            right,
            out: out.to_string(),
            copy_count_from_input: true,
        }
    }

    pub fn entity_kind(&self) -> EntityKind {
        match self {
            Condition::Arithmetic { .. } => EntityKind::Arithmetic,
            Condition::Decider { .. } => EntityKind::Decider,
        }
    }
}

impl fmt::Display for Condition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Condition::Arithmetic {
                left,
                op,
                right,
                out,
            } => write!(f, "{} {} {} -> {}", left, op.symbol(), right, out),
            Condition::Decider {
                left,
                op,
                right,
                out,
                copy_count_from_input,
            } => {
                let count = if *copy_count_from_input { " (count)" } else { "" };
                write!(f, "{} {} {} -> {}{}", left, op.symbol(), right, out, count)
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntityKind {
    Relay,
    Arithmetic,
    Decider,
}

impl EntityKind {
    pub fn name(self) -> &'static str {
        match self {
            EntityKind::Relay => "medium-electric-pole",
            EntityKind::Arithmetic => "arithmetic-combinator",
            EntityKind::Decider => "decider-combinator",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "medium-electric-pole" => Some(EntityKind::Relay),
            "arithmetic-combinator" => Some(EntityKind::Arithmetic),
            "decider-combinator" => Some(EntityKind::Decider),
            _ => None,
        }
    }

    /// Tile footprint (width, height) for a direction in 0..8.
    pub fn footprint(self, direction: u8) -> (i32, i32) {
        match self {
            EntityKind::Relay => (1, 1),
            EntityKind::Arithmetic | EntityKind::Decider => {
                if direction % 4 == 2 {
                    (2, 1)
                } else {
                    (1, 2)
                }
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum WireColor {
    Red,
    Green,
}

impl WireColor {
    pub fn opposite(self) -> Self {
        match self {
            WireColor::Red => WireColor::Green,
            WireColor::Green => WireColor::Red,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            WireColor::Red => "red",
            WireColor::Green => "green",
        }
    }
}

impl fmt::Display for WireColor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Logical terminal of an entity. Relays only have one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Side {
    In,
    Out,
}

impl Side {
    pub fn circuit_id(self) -> u8 {
        match self {
            Side::In => 1,
            Side::Out => 2,
        }
    }

    pub fn from_circuit_id(id: u8) -> Self {
        if id == 2 {
            Side::Out
        } else {
            Side::In
        }
    }
}

/// Blueprint signal type and dashed name for a canonical signal identifier.
pub fn signal_id(name: &str) -> (&'static str, String) {
    let kind = if name.starts_with("signal_") {
        "virtual"
    } else {
        "item"
    };
    (kind, name.replace('_', "-"))
}

/// Inverse of [`signal_id`].
pub fn signal_name(dashed: &str) -> String {
    dashed.replace('-', "_")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_signal_ids() {
        assert_eq!(signal_id(EACH), ("virtual", "signal-each".to_string()));
        assert_eq!(signal_id("iron_plate"), ("item", "iron-plate".to_string()));
        assert_eq!(signal_name("signal-A"), "signal_A");
    }

    #[test]
    fn test_combinator_footprint_follows_direction() {
        assert_eq!(EntityKind::Arithmetic.footprint(0), (1, 2));
        assert_eq!(EntityKind::Decider.footprint(2), (2, 1));
        assert_eq!(EntityKind::Relay.footprint(2), (1, 1));
    }

    #[test]
    fn test_arithmetic_matches_combinator_semantics() {
        assert_eq!(ArithmeticOp::Div.apply(7, 0), 0);
        assert_eq!(ArithmeticOp::Div.apply(-7, 2), -3);
        assert_eq!(ArithmeticOp::Add.apply(i32::MAX, 1), i32::MIN);
    }

    #[test]
    fn test_temp_pool_is_unique() {
        let mut names = TEMP_SIGNALS.to_vec();
        names.sort();
        names.dedup();
        assert_eq!(names.len(), TEMP_SIGNALS.len());
    }
}
