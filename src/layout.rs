use crate::ast::{Block, Compare, CompareSide, Conditional, Logic, Node, Script, Step};
use crate::blueprint::{Blueprint, EntityId, Position};
use crate::primitives::{
    ArithmeticOp, Comparator, Condition, EntityKind, Operand, Side, WireColor, EACH, EVERYTHING,
};
use std::fmt;
use tracing::debug;

// Axis reach per nesting depth; relay lanes sit further out the deeper they are
const POLE_REACH: [i32; 6] = [7, 7, 7, 6, 5, 3];

/// Reach between relays for a nesting depth; deeper levels reuse the last entry.
fn pole_reach(depth: usize) -> i32 {
    POLE_REACH[depth.clamp(1, POLE_REACH.len()) - 1]
}

/// Something a construct wires its inputs from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Port {
    Entity(EntityId),
    /// Collects the entities of an `if`/`while` body that read the gated bus.
    Request(usize),
}

#[derive(Default)]
struct Context {
    blueprint: Blueprint,
    requests: Vec<Vec<EntityId>>,
}

enum Member {
    Entity(EntityId),
    /// Boundary of a finished nested construct.
    Nested(Vec<EntityId>),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Kind {
    Chain,
    Parallel,
    Series,
    If,
    While,
    Compare,
    And,
    Or,
    Variable,
}

impl Kind {
    fn of(node: &Node) -> Kind {
        match node {
            Node::Chain(_) => Kind::Chain,
            Node::Parallel(_) => Kind::Parallel,
            Node::Series(_) => Kind::Series,
            Node::If(cond) if cond.is_while => Kind::While,
            Node::If(_) => Kind::If,
            Node::Compare(_) => Kind::Compare,
            Node::And(_) => Kind::And,
            Node::Or(_) => Kind::Or,
            Node::Variable(_) => Kind::Variable,
        }
    }

    /// Constructs whose children all read the construct's own inputs.
    fn fans_out(self) -> bool {
        matches!(
            self,
            Kind::Parallel | Kind::And | Kind::Or | Kind::If | Kind::While | Kind::Compare
        )
    }
}

impl fmt::Display for Kind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Kind::Chain => "chain",
            Kind::Parallel => "parallel",
            Kind::Series => "series",
            Kind::If => "if",
            Kind::While => "while",
            Kind::Compare => "compare",
            Kind::And => "and",
            Kind::Or => "or",
            Kind::Variable => "variable",
        };
        f.write_str(name)
    }
}

fn step_condition(step: &Step) -> Condition {
    Condition::arithmetic(step.left.clone(), step.operator, step.right.clone(), &step.out)
}

fn entities(ports: &[Port]) -> Vec<EntityId> {
    ports
        .iter()
        .filter_map(|port| match port {
            Port::Entity(id) => Some(*id),
            Port::Request(_) => None,
        })
        .collect()
}

/// One activation per construct: lays its entities out along `direction`
/// starting at `start` and exposes its boundary once done.
struct Builder<'c> {
    ctx: &'c mut Context,
    kind: Kind,
    start: Position,
    direction: Position,
    rotation: u8,
    in_color: WireColor,
    out_color: WireColor,
    depth: usize,
    offset: Position,
    in_ports: Vec<Port>,
    members: Vec<Member>,
    poles: Vec<EntityId>,
}

impl<'c> Builder<'c> {
    fn root(ctx: &'c mut Context, kind: Kind, start: Position) -> Self {
        Builder {
            ctx,
            kind,
            start,
            direction: Position::new(1, 0),
            rotation: 0,
            in_color: WireColor::Green,
            out_color: WireColor::Red,
            depth: 1,
            offset: Position::default(),
            in_ports: Vec::new(),
            members: Vec::new(),
            poles: Vec::new(),
        }
    }

    fn spawn(&mut self, kind: Kind, inputs: Vec<Port>, turn: bool) -> Builder<'_> {
        let (direction, rotation) = if turn {
            (self.direction.turn_left(), if self.rotation == 0 { 2 } else { 0 })
        } else {
            (self.direction, self.rotation)
        };
        // comparison sides stay on the comparison's network
        let out_color = if self.kind == Kind::Compare {
            self.out_color
        } else {
            self.out_color.opposite()
        };
        Builder {
            ctx: &mut *self.ctx,
            kind,
            start: self.start + self.offset,
            direction,
            rotation,
            in_color: self.out_color,
            out_color,
            depth: self.depth + 1,
            offset: Position::default(),
            in_ports: inputs,
            members: Vec::new(),
            poles: Vec::new(),
        }
    }

    fn position(&self, id: EntityId) -> Position {
        self.ctx
            .blueprint
            .entity(id)
            .map_or(Position::default(), |entity| entity.position)
    }

    fn is_relay(&self, id: EntityId) -> bool {
        self.ctx
            .blueprint
            .entity(id)
            .is_some_and(|entity| entity.kind == EntityKind::Relay)
    }

    /// Predecessors for the next child: the construct's own inputs for
    /// fan-out constructs and series, the previous sibling's boundary otherwise.
    fn mid(&self, last: &[Port]) -> Vec<Port> {
        if self.kind.fans_out() || self.kind == Kind::Series {
            self.in_ports.clone()
        } else {
            last.to_vec()
        }
    }

    fn boundary(&self) -> Vec<EntityId> {
        let members: &[Member] = match self.kind {
            Kind::Parallel => &self.members,
            Kind::While => match self.members.len().checked_sub(2) {
                Some(index) => &self.members[index..index + 1],
                None => &[],
            },
            _ => self.members.last().map_or(&[][..], std::slice::from_ref),
        };
        members
            .iter()
            .flat_map(|member| match member {
                Member::Entity(id) => vec![*id],
                Member::Nested(out) => out.clone(),
            })
            .collect()
    }

    fn variable(&mut self, condition: Condition, connect: &[Port]) -> EntityId {
        let id = self
            .ctx
            .blueprint
            .create_entity(condition.entity_kind(), self.start + self.offset);
        self.ctx.blueprint.set_direction(id, self.rotation);
        self.ctx.blueprint.set_condition(id, condition);
        for port in connect {
            match *port {
                Port::Request(slot) => {
                    if let Some(requested) = self.ctx.requests.get_mut(slot) {
                        requested.push(id);
                    }
                }
                Port::Entity(other) => {
                    let color = if self.is_relay(other) {
                        WireColor::Red
                    } else {
                        WireColor::Green
                    };
                    self.connect(id, other, Side::In, Side::Out, color);
                }
            }
        }
        self.offset = self.offset + self.direction;
        self.members.push(Member::Entity(id));
        id
    }

    /// Colour of the bus that carries earlier series results to later
    /// members; the series inputs arrive on the other one.
    fn temp_bus(&self) -> WireColor {
        if entities(&self.in_ports).into_iter().any(|id| self.is_relay(id)) {
            WireColor::Green
        } else {
            WireColor::Red
        }
    }

    fn relay_at(&mut self, mut slot: Position) -> EntityId {
        let outward = self.direction.turn_right();
        loop {
            if let Some(&pole) = self.poles.iter().find(|&&pole| self.position(pole) == slot) {
                return pole;
            }
            match self.ctx.blueprint.find_entity(slot) {
                Some(id) if self.is_relay(id) => return id,
                // never hang a route on a combinator terminal
                Some(_) => slot = slot + outward,
                None => {
                    let pole = self.ctx.blueprint.create_entity(EntityKind::Relay, slot);
                    self.poles.push(pole);
                    return pole;
                }
            }
        }
    }

    /// Wires two terminals, hopping over relays while the target is out of reach.
    fn connect(
        &mut self,
        from: EntityId,
        to: EntityId,
        from_side: Side,
        to_side: Side,
        color: WireColor,
    ) {
        let (mut source, mut target) = ((from, from_side), (to, to_side));
        let delta = self.position(target.0) - self.position(source.0);
        if delta.x < 0 || delta.y < 0 {
            std::mem::swap(&mut source, &mut target);
        }
        let target_position = self.position(target.0);
        let (mut anchor, mut anchor_position) = (source, self.position(source.0));
        let reach = pole_reach(self.depth);
        let lane = self.direction.turn_right() * (self.depth as i32 + 1);

        loop {
            let remaining = (target_position - anchor_position).along(self.direction);
            if remaining.abs() <= reach {
                break;
            }
            let mut slot = anchor_position + self.direction * (reach * remaining.signum());
            if anchor == source {
                slot = slot + lane;
            }
            let relay = self.relay_at(slot);
            if relay == target.0 || relay == anchor.0 {
                break;
            }
            self.ctx
                .blueprint
                .connect(anchor.0, anchor.1, relay, Side::In, color);
            anchor = (relay, Side::In);
            anchor_position = self.position(relay);
        }
        self.ctx
            .blueprint
            .connect(anchor.0, anchor.1, target.0, target.1, color);
    }

    fn connect_all(
        &mut self,
        from: EntityId,
        to: &[EntityId],
        from_side: Side,
        to_side: Side,
        color: WireColor,
    ) {
        for &other in to {
            self.connect(from, other, from_side, to_side, color);
        }
    }

    /// Runs a nested builder and absorbs its boundary. A turned child is laid
    /// out across this builder's axis; the axis then skips past all of it.
    fn descend(
        &mut self,
        kind: Kind,
        inputs: Vec<Port>,
        turn: bool,
        lower: impl FnOnce(&mut Builder<'_>) -> Vec<EntityId>,
    ) -> Vec<EntityId> {
        let first = self.ctx.blueprint.len();
        let origin = self.start + self.offset;
        let direction = self.direction;
        let (offset, out) = {
            let mut child = self.spawn(kind, inputs, turn);
            let out = lower(&mut child);
            (child.offset, out)
        };
        let advance = if turn {
            direction * self.ctx.blueprint.extent_since(first, origin, direction)
        } else {
            offset
        };
        self.offset = self.offset + advance;
        self.members.push(Member::Nested(out.clone()));
        out
    }

    fn nested(&mut self, node: &Node, inputs: Vec<Port>, turn: bool) -> Vec<EntityId> {
        self.descend(Kind::of(node), inputs, turn, |child| child.lower(node))
    }

    /// Lowers body elements in order and returns the last one's boundary.
    /// Inside a series every member also reads all earlier results.
    fn body(&mut self, nodes: &[Node], mut last: Vec<Port>) -> Vec<Port> {
        let mut earlier: Vec<EntityId> = Vec::new();
        for node in nodes {
            let mut inputs = self.mid(&last);
            last = match node {
                Node::Variable(step) => {
                    let id = self.variable(step_condition(step), &inputs);
                    let color = self.temp_bus();
                    for &prior in &earlier {
                        self.connect(id, prior, Side::In, Side::Out, color);
                    }
                    vec![Port::Entity(id)]
                }
                child => {
                    inputs.extend(earlier.iter().copied().map(Port::Entity));
                    self.nested(child, inputs, false)
                        .into_iter()
                        .map(Port::Entity)
                        .collect()
                }
            };
            if self.kind == Kind::Series {
                earlier.extend(entities(&last));
            }
        }
        last
    }

    fn lower(&mut self, node: &Node) -> Vec<EntityId> {
        debug!(
            kind = %self.kind,
            depth = self.depth,
            in_color = %self.in_color,
            out_color = %self.out_color,
            "lowering"
        );
        match node {
            Node::Variable(step) => {
                let inputs = self.in_ports.clone();
                self.variable(step_condition(step), &inputs);
            }
            Node::Series(block) => {
                let inputs = self.in_ports.clone();
                self.body(&block.body, inputs);
            }
            Node::Parallel(block) => {
                self.body(&block.body, Vec::new());
            }
            Node::Chain(block) => self.chain(block),
            Node::Compare(compare) => self.compare(compare),
            Node::And(logic) | Node::Or(logic) => self.logic(logic),
            Node::If(cond) => self.conditional(cond),
        }
        self.boundary()
    }

    fn chain(&mut self, block: &Block) {
        let head = self
            .ctx
            .blueprint
            .create_entity(EntityKind::Relay, self.start - self.direction);
        let last = self.body(&block.body, vec![Port::Entity(head)]);
        let tail = self
            .ctx
            .blueprint
            .create_entity(EntityKind::Relay, self.start + self.offset);
        self.connect_all(tail, &entities(&last), Side::In, Side::Out, WireColor::Red);
        self.members.push(Member::Entity(tail));
    }

    fn compare(&mut self, compare: &Compare) {
        let mut connect = self.in_ports.clone();
        for side in [&compare.left, &compare.right] {
            if let CompareSide::Series(block) = side {
                let inputs = self.mid(&[]);
                let out = self.descend(Kind::Series, inputs.clone(), false, |child| {
                    child.body(&block.body, inputs);
                    child.boundary()
                });
                connect.extend(out.into_iter().map(Port::Entity));
            }
        }
        let decider = self.variable(
            Condition::decider(
                compare.left.operand(),
                compare.operator,
                compare.right.operand(),
                &compare.out,
            ),
            &connect,
        );
        if compare.not {
            self.variable(
                Condition::decider(
                    Operand::signal(&compare.out),
                    Comparator::Eq,
                    Operand::Constant(0),
                    &compare.out,
                ),
                &[Port::Entity(decider)],
            );
        }
    }

    /// Counts how many children wrote `out` against the threshold of the operator.
    fn logic(&mut self, logic: &Logic) {
        let mut outs = Vec::new();
        for node in &logic.body {
            let inputs = self.mid(&[]);
            outs.extend(self.nested(node, inputs, false).into_iter().map(Port::Entity));
        }
        let (comparator, threshold) = match (self.kind, logic.not) {
            (Kind::And, false) => (Comparator::Eq, logic.body.len() as i32),
            (Kind::And, true) => (Comparator::Lt, logic.body.len() as i32),
            (_, false) => (Comparator::Gt, 0),
            (_, true) => (Comparator::Eq, 0),
        };
        self.variable(
            Condition::decider(
                Operand::signal(&logic.out),
                comparator,
                Operand::Constant(threshold),
                &logic.out,
            ),
            &outs,
        );
    }

    fn conditional(&mut self, cond: &Conditional) {
        let inputs = self.in_ports.clone();
        let expr_out = self.nested(&cond.expr, inputs, true);

        let slot = self.ctx.requests.len();
        self.ctx.requests.push(Vec::new());
        self.in_ports.push(Port::Request(slot));
        let last = entities(&self.body(&cond.body, Vec::new()));
        self.in_ports.pop();
        let requested = self.ctx.requests.pop().unwrap_or_default();

        let out = cond.out.as_str();
        let gated = self.in_ports.clone();
        let (signal, one, minus_one) = (
            Operand::signal(out),
            Operand::Constant(1),
            Operand::Constant(-1),
        );
        let subtract_all = self.variable(
            Condition::arithmetic(
                Operand::signal(EACH),
                ArithmeticOp::Mul,
                minus_one.clone(),
                EACH,
            ),
            &gated,
        );
        let test_expr = self.variable(
            Condition::counting(signal.clone(), Comparator::Eq, one.clone(), out),
            &[],
        );
        let subtract_expr = self.variable(
            Condition::arithmetic(signal.clone(), ArithmeticOp::Mul, minus_one, out),
            &[Port::Entity(test_expr)],
        );
        let one_way = self.variable(step_condition(&Step::passthrough()), &[]);
        let test_all = self.variable(
            Condition::counting(signal, Comparator::Eq, one, EVERYTHING),
            &[],
        );

        let alt = if cond.is_while {
            WireColor::Green
        } else {
            WireColor::Red
        };
        self.connect_all(subtract_all, &last, Side::Out, Side::Out, WireColor::Red);
        self.connect(subtract_expr, test_all, Side::Out, Side::Out, alt);
        self.connect(subtract_all, test_all, Side::Out, Side::In, WireColor::Red);
        self.connect(subtract_all, one_way, Side::In, Side::In, WireColor::Red);
        if !cond.is_while {
            self.connect(one_way, test_all, Side::Out, Side::Out, WireColor::Red);
        }
        let expr_color = self.out_color;
        self.connect_all(test_expr, &expr_out, Side::In, Side::Out, expr_color);
        self.connect(test_expr, test_all, Side::In, Side::In, expr_color);
        if cond.is_while {
            self.connect_all(test_all, &requested, Side::Out, Side::In, alt);
            self.connect_all(test_all, &expr_out, Side::Out, Side::In, WireColor::Red);
        }
    }
}

/// Lowered layout plus the boundary entities of every top-level element.
pub struct Lowering {
    pub blueprint: Blueprint,
    pub outputs: Vec<EntityId>,
}

/// Lowers every top-level element, each on its own row below the previous
/// one with room for its relay lanes.
pub fn lower(script: &Script) -> Lowering {
    let mut ctx = Context::default();
    let mut outputs = Vec::new();
    for node in &script.body {
        let start = match ctx.blueprint.bounds() {
            Some((_, max)) => Position::new(0, max.y + node.depth() as i32 + 2),
            None => Position::default(),
        };
        outputs.extend(Builder::root(&mut ctx, Kind::of(node), start).lower(node));
    }
    Lowering {
        blueprint: ctx.blueprint,
        outputs,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::blueprint::Wire;
    use crate::parser::parse;
    use crate::scope::Scope;
    use std::collections::HashSet;

    fn lower_node(node: &Node) -> Lowering {
        let mut ctx = Context::default();
        let outputs = Builder::root(&mut ctx, Kind::of(node), Position::default()).lower(node);
        Lowering {
            blueprint: ctx.blueprint,
            outputs,
        }
    }

    /// Terminals sharing a network of `color` with `start`.
    fn network(
        blueprint: &Blueprint,
        start: (EntityId, Side),
        color: WireColor,
    ) -> HashSet<(EntityId, Side)> {
        let mut seen = HashSet::from([start]);
        let mut pending = vec![start];
        while let Some(terminal) = pending.pop() {
            for wire in blueprint.wires().filter(|wire| wire.color == color) {
                let a = (wire.a.entity, wire.a.side);
                let b = (wire.b.entity, wire.b.side);
                let next = if a == terminal {
                    b
                } else if b == terminal {
                    a
                } else {
                    continue;
                };
                if seen.insert(next) {
                    pending.push(next);
                }
            }
        }
        seen
    }

    /// Whether `source` is on either network feeding `input`.
    fn feeds(blueprint: &Blueprint, source: (EntityId, Side), input: EntityId) -> bool {
        [WireColor::Red, WireColor::Green]
            .into_iter()
            .any(|color| network(blueprint, (input, Side::In), color).contains(&source))
    }

    fn step(left: &str, right: i32, out: &str) -> Node {
        Node::Variable(Step::new(
            Operand::signal(left),
            ArithmeticOp::Add,
            Operand::Constant(right),
            out,
        ))
    }

    fn block(body: Vec<Node>) -> Block {
        Block {
            scope: Scope::root(),
            body,
        }
    }

    fn relays(blueprint: &Blueprint) -> usize {
        blueprint
            .entities()
            .iter()
            .filter(|entity| entity.kind == EntityKind::Relay)
            .count()
    }

    fn has_wire(
        blueprint: &Blueprint,
        a: (EntityId, Side),
        b: (EntityId, Side),
        color: WireColor,
    ) -> bool {
        blueprint.wires().any(|wire: &Wire| {
            let ends = [(wire.a.entity, wire.a.side), (wire.b.entity, wire.b.side)];
            wire.color == color && ends.contains(&a) && ends.contains(&b)
        })
    }

    fn find_by_out(blueprint: &Blueprint, signal: &str) -> EntityId {
        blueprint
            .entities()
            .iter()
            .find(|entity| match &entity.condition {
                Some(Condition::Arithmetic { out, .. }) | Some(Condition::Decider { out, .. }) => {
                    out == signal
                }
                None => false,
            })
            .map(|entity| entity.id)
            .unwrap()
    }

    #[test]
    fn test_pole_reach_table() {
        assert_eq!(pole_reach(1), 7);
        assert_eq!(pole_reach(4), 6);
        assert_eq!(pole_reach(6), 3);
        assert_eq!(pole_reach(9), 3);
    }

    #[test]
    fn test_routing_within_reach_adds_no_relays() {
        let mut ctx = Context::default();
        let a = ctx.blueprint.create_entity(EntityKind::Arithmetic, Position::new(0, 0));
        let b = ctx.blueprint.create_entity(EntityKind::Arithmetic, Position::new(7, 0));
        let mut builder = Builder::root(&mut ctx, Kind::Series, Position::default());
        builder.connect(b, a, Side::In, Side::Out, WireColor::Green);
        assert_eq!(relays(&ctx.blueprint), 0);
        assert!(has_wire(&ctx.blueprint, (a, Side::Out), (b, Side::In), WireColor::Green));
    }

    #[test]
    fn test_routing_hops_over_relays() {
        let mut ctx = Context::default();
        let a = ctx.blueprint.create_entity(EntityKind::Arithmetic, Position::new(0, 0));
        let b = ctx.blueprint.create_entity(EntityKind::Arithmetic, Position::new(20, 0));
        let mut builder = Builder::root(&mut ctx, Kind::Series, Position::default());
        builder.connect(a, b, Side::Out, Side::In, WireColor::Red);
        // ceil(20 / 7) - 1
        assert_eq!(builder.poles.len(), 2);

        let positions: Vec<Position> = ctx
            .blueprint
            .entities()
            .iter()
            .filter(|entity| entity.kind == EntityKind::Relay)
            .map(|entity| entity.position)
            .collect();
        assert_eq!(positions, vec![Position::new(7, -2), Position::new(14, -2)]);
        // a -> relay -> relay -> b
        assert_eq!(ctx.blueprint.wires().count(), 3);
        assert!(has_wire(&ctx.blueprint, (a, Side::Out), (2, Side::In), WireColor::Red));
        assert!(has_wire(&ctx.blueprint, (2, Side::In), (3, Side::In), WireColor::Red));
        assert!(has_wire(&ctx.blueprint, (3, Side::In), (b, Side::In), WireColor::Red));
    }

    #[test]
    fn test_routing_reach_shrinks_with_depth() {
        let mut ctx = Context::default();
        let a = ctx.blueprint.create_entity(EntityKind::Relay, Position::new(0, 0));
        let b = ctx.blueprint.create_entity(EntityKind::Relay, Position::new(12, 0));
        let mut builder = Builder::root(&mut ctx, Kind::Series, Position::default());
        builder.depth = 5;
        builder.connect(a, b, Side::In, Side::In, WireColor::Green);
        // ceil(12 / 5) - 1
        assert_eq!(builder.poles.len(), 2);
        let lane: Vec<Position> = builder
            .poles
            .iter()
            .map(|&pole| builder.position(pole))
            .collect();
        assert_eq!(lane, vec![Position::new(5, -6), Position::new(10, -6)]);
    }

    #[test]
    fn test_routing_reuses_relays() {
        let mut ctx = Context::default();
        let a = ctx.blueprint.create_entity(EntityKind::Arithmetic, Position::new(0, 0));
        let b = ctx.blueprint.create_entity(EntityKind::Arithmetic, Position::new(20, 0));
        let mut builder = Builder::root(&mut ctx, Kind::Series, Position::default());
        builder.connect(a, b, Side::Out, Side::In, WireColor::Red);
        builder.connect(a, b, Side::Out, Side::In, WireColor::Green);
        assert_eq!(relays(&ctx.blueprint), 2);
        assert_eq!(ctx.blueprint.wires().count(), 6);
    }

    #[test]
    fn test_colors_alternate_except_under_compare() {
        let mut ctx = Context::default();
        let mut chain = Builder::root(&mut ctx, Kind::Chain, Position::default());
        let parallel = chain.spawn(Kind::Parallel, Vec::new(), false);
        assert_eq!((parallel.in_color, parallel.out_color), (WireColor::Red, WireColor::Green));
        assert_eq!(parallel.depth, 2);

        let mut compare = Builder::root(&mut ctx, Kind::Compare, Position::default());
        let side = compare.spawn(Kind::Series, Vec::new(), true);
        assert_eq!((side.in_color, side.out_color), (WireColor::Red, WireColor::Red));
        assert_eq!(side.direction, Position::new(0, 1));
        assert_eq!(side.rotation, 2);
    }

    #[test]
    fn test_parallel_exposes_every_series() {
        let series = |out: &str| Node::Series(block(vec![step("a", 1, out)]));
        let node = Node::Parallel(block(vec![series("x"), series("y"), series("z")]));
        let lowering = lower_node(&node);
        assert_eq!(lowering.outputs.len(), 3);
        assert_eq!(relays(&lowering.blueprint), 0);
    }

    #[test]
    fn test_series_exposes_last_variable() {
        let node = Node::Series(block(vec![
            step("a", 1, "x"),
            step("x", 2, "y"),
            step("y", 3, "z"),
        ]));
        let lowering = lower_node(&node);
        let bp = &lowering.blueprint;
        let (x, y, z) = (0, 1, 2);
        assert_eq!(lowering.outputs, vec![z]);
        assert!(has_wire(bp, (x, Side::Out), (y, Side::In), WireColor::Red));
        assert!(has_wire(bp, (x, Side::Out), (z, Side::In), WireColor::Red));
        assert!(has_wire(bp, (y, Side::Out), (z, Side::In), WireColor::Red));
        assert_eq!(bp.wires().count(), 3);
    }

    #[test]
    fn test_chain_of_two_steps() {
        let script = parse("chain { parallel { series { x = 1; y = x + 2 } } }").unwrap();
        let lowering = lower_node(&script.body[0]);
        let bp = &lowering.blueprint;

        let x = find_by_out(bp, "x");
        let y = find_by_out(bp, "y");
        assert_eq!(bp.len(), 4);
        assert_eq!(relays(bp), 2);
        assert!(has_wire(bp, (x, Side::Out), (y, Side::In), WireColor::Green));
        assert!(has_wire(bp, (0, Side::In), (y, Side::In), WireColor::Red));

        let [tail] = lowering.outputs[..] else {
            panic!("chain exposes one relay");
        };
        assert_eq!(bp.entity(tail).map(|e| e.kind), Some(EntityKind::Relay));
        assert!(has_wire(bp, (tail, Side::In), (y, Side::Out), WireColor::Red));
    }

    #[test]
    fn test_series_steps_read_every_operand() {
        let script = parse("chain { x = (a + b) * (c - 1) }").unwrap();
        let bp = &lower_node(&script.body[0]).blueprint;
        let head = 0;
        let sum = find_by_out(bp, "signal_A");
        let difference = find_by_out(bp, "signal_B");
        let product = bp
            .entities()
            .iter()
            .find(|entity| match &entity.condition {
                Some(Condition::Arithmetic { left, op, .. }) => {
                    *op == ArithmeticOp::Mul && *left == Operand::signal("signal_A")
                }
                _ => false,
            })
            .map(|entity| entity.id)
            .unwrap();

        // a, b and c come in through the chain's head relay
        assert!(feeds(bp, (head, Side::In), sum));
        assert!(feeds(bp, (head, Side::In), difference));
        // the product reads both temporaries
        assert!(feeds(bp, (sum, Side::Out), product));
        assert!(feeds(bp, (difference, Side::Out), product));
        // the new x never loops back into the steps that read the inputs
        assert!(!feeds(bp, (product, Side::Out), sum));
        assert!(!feeds(bp, (product, Side::Out), difference));
        assert!(!feeds(bp, (product, Side::Out), product));
    }

    #[test]
    fn test_negation_forms_lower_identically() {
        let ne = lower(&parse("if (a != b) { x = 1 }").unwrap()).blueprint;
        let not = lower(&parse("if (!(a = b)) { x = 1 }").unwrap()).blueprint;
        assert_eq!(ne.encode().unwrap(), not.encode().unwrap());
        // compare, its negation, three assignment entities, five gate entities
        assert_eq!(ne.len() - relays(&ne), 10);
    }

    #[test]
    fn test_while_skeleton() {
        let lowering = lower_node(&parse("while (a < 10) { a += 1 }").unwrap().body[0]);
        let bp = &lowering.blueprint;
        assert_eq!(bp.len() - relays(bp), 9);

        let [one_way] = lowering.outputs[..] else {
            panic!("while exposes one entity");
        };
        assert_eq!(
            bp.entity(one_way).and_then(|e| e.condition.clone()),
            Some(step_condition(&Step::passthrough()))
        );
        assert_eq!(bp.entity(one_way).map(|e| e.position), Some(Position::new(8, 0)));

        let test_all = find_by_out(bp, EVERYTHING);
        let passthrough = bp
            .entities()
            .iter()
            .find(|entity| entity.position == Position::new(2, 0))
            .map(|entity| entity.id)
            .unwrap();
        assert!(has_wire(bp, (test_all, Side::Out), (passthrough, Side::In), WireColor::Green));
    }

    #[test]
    fn test_top_level_elements_do_not_overlap() {
        let script = parse("x = a * 2\ny = b + 1\nchain { parallel { z = 3 } }").unwrap();
        let lowering = lower(&script);
        let bp = lowering.blueprint;
        // three assignment parallels and the chain's tail relay
        assert_eq!(lowering.outputs.len(), 3 + 3 + 1);
        let mut seen = std::collections::HashSet::new();
        for tile in bp.entities().iter().flat_map(|entity| entity.tiles()) {
            assert!(seen.insert(tile), "tile {} used twice", tile);
        }
    }
}
