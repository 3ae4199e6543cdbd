use crate::error::{CompileError, Result};
use crate::primitives::{
    signal_id, signal_name, ArithmeticOp, Comparator, Condition, EntityKind, Operand, Side,
    WireColor,
};
use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use flate2::read::ZlibDecoder;
use flate2::write::ZlibEncoder;
use flate2::Compression;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fmt;
use std::io::{Read, Write};
use std::ops::{Add, Mul, Neg, Sub};
use tracing::warn;

// Factorio 1.1.110
const VERSION: u64 = (1 << 48) | (1 << 32) | (110 << 16);
const STRING_VERSION: char = '0';

pub type EntityId = usize;

/// Integer tile position, top-left corner of an entity's footprint.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct Position {
    pub x: i32,
    pub y: i32,
}

impl Position {
    pub const fn new(x: i32, y: i32) -> Self {
        Position { x, y }
    }

    /// Quarter turn counter-clockwise (y grows downwards).
    pub fn turn_left(self) -> Self {
        Position::new(-self.y, self.x)
    }

    pub fn turn_right(self) -> Self {
        Position::new(self.y, -self.x)
    }

    /// Projection onto an axis-aligned unit direction.
    pub fn along(self, direction: Position) -> i32 {
        self.x * direction.x + self.y * direction.y
    }
}

impl Add for Position {
    type Output = Position;
    fn add(self, other: Position) -> Position {
        Position::new(self.x + other.x, self.y + other.y)
    }
}

impl Sub for Position {
    type Output = Position;
    fn sub(self, other: Position) -> Position {
        Position::new(self.x - other.x, self.y - other.y)
    }
}

impl Mul<i32> for Position {
    type Output = Position;
    fn mul(self, factor: i32) -> Position {
        Position::new(self.x * factor, self.y * factor)
    }
}

impl Neg for Position {
    type Output = Position;
    fn neg(self) -> Position {
        Position::new(-self.x, -self.y)
    }
}

impl fmt::Display for Position {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {})", self.x, self.y)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Entity {
    pub id: EntityId,
    pub kind: EntityKind,
    pub position: Position,
    pub direction: u8,
    pub condition: Option<Condition>,
}

impl Entity {
    pub fn tiles(&self) -> Vec<Position> {
        let (width, height) = self.kind.footprint(self.direction);
        (0..width)
            .flat_map(|dx| (0..height).map(move |dy| Position::new(dx, dy)))
            .map(|delta| self.position + delta)
            .collect()
    }

    fn center(&self) -> (f64, f64) {
        let (width, height) = self.kind.footprint(self.direction);
        (
            self.position.x as f64 + width as f64 / 2.0,
            self.position.y as f64 + height as f64 / 2.0,
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Terminal {
    pub entity: EntityId,
    pub side: Side,
}

/// Undirected wire; `a` is always the smaller terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Wire {
    pub a: Terminal,
    pub b: Terminal,
    pub color: WireColor,
}

/// Entity store: positioned entities, their spatial index and circuit wires.
#[derive(Debug, Default)]
pub struct Blueprint {
    entities: Vec<Entity>,
    wires: BTreeSet<Wire>,
    grid: HashMap<Position, EntityId>,
    label: Option<String>,
}

impl Blueprint {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }

    pub fn entities(&self) -> &[Entity] {
        &self.entities
    }

    pub fn entity(&self, id: EntityId) -> Option<&Entity> {
        self.entities.get(id)
    }

    pub fn wires(&self) -> impl Iterator<Item = &Wire> {
        self.wires.iter()
    }

    pub fn set_label(&mut self, label: impl Into<String>) {
        self.label = Some(label.into());
    }

    fn register(&mut self, id: EntityId) {
        let tiles = self.entities[id].tiles();
        for tile in tiles {
            if let Some(previous) = self.grid.insert(tile, id) {
                if previous != id {
                    warn!(entity = id, other = previous, "entities overlap at {}", tile);
                }
            }
        }
    }

    fn unregister(&mut self, id: EntityId) {
        for tile in self.entities[id].tiles() {
            if self.grid.get(&tile) == Some(&id) {
                self.grid.remove(&tile);
            }
        }
    }

    pub fn create_entity(&mut self, kind: EntityKind, position: Position) -> EntityId {
        let id = self.entities.len();
        self.entities.push(Entity {
            id,
            kind,
            position,
            direction: 0,
            condition: None,
        });
        self.register(id);
        id
    }

    /// Entity whose footprint covers `position`.
    pub fn find_entity(&self, position: Position) -> Option<EntityId> {
        self.grid.get(&position).copied()
    }

    pub fn set_condition(&mut self, id: EntityId, condition: Condition) {
        if let Some(entity) = self.entities.get_mut(id) {
            entity.condition = Some(condition);
        }
    }

    pub fn set_direction(&mut self, id: EntityId, direction: u8) {
        if id >= self.entities.len() {
            return;
        }
        self.unregister(id);
        self.entities[id].direction = direction % 8;
        self.register(id);
    }

    fn terminal(&self, entity: EntityId, side: Side) -> Terminal {
        let side = match self.entities.get(entity).map(|e| e.kind) {
            Some(EntityKind::Relay) => Side::In,
            _ => side,
        };
        Terminal { entity, side }
    }

    /// Wires two terminals. Returns false when the wire already existed.
    pub fn connect(
        &mut self,
        from: EntityId,
        from_side: Side,
        to: EntityId,
        to_side: Side,
        color: WireColor,
    ) -> bool {
        let first = self.terminal(from, from_side);
        let second = self.terminal(to, to_side);
        if first == second {
            return false;
        }
        let (a, b) = if first < second {
            (first, second)
        } else {
            (second, first)
        };
        self.wires.insert(Wire { a, b, color })
    }

    /// Inclusive top-left and exclusive bottom-right corners of all footprints.
    pub fn bounds(&self) -> Option<(Position, Position)> {
        let mut tiles = self.entities.iter().flat_map(Entity::tiles);
        let first = tiles.next()?;
        let (mut min, mut max) = (first, first);
        for tile in tiles {
            min = Position::new(min.x.min(tile.x), min.y.min(tile.y));
            max = Position::new(max.x.max(tile.x), max.y.max(tile.y));
        }
        Some((min, max + Position::new(1, 1)))
    }

    /// How far along `direction`, measured from `origin`, the entities
    /// created since `first` reach. Zero when there are none.
    pub fn extent_since(&self, first: EntityId, origin: Position, direction: Position) -> i32 {
        self.entities
            .iter()
            .skip(first)
            .flat_map(Entity::tiles)
            .map(|tile| (tile - origin).along(direction) + 1)
            .max()
            .unwrap_or(0)
            .max(0)
    }

    /// Shifts every entity so the layout is centred on the origin.
    pub fn center(&mut self) {
        let Some((min, max)) = self.bounds() else {
            return;
        };
        let shift = -Position::new((min.x + max.x).div_euclid(2), (min.y + max.y).div_euclid(2));
        for entity in &mut self.entities {
            entity.position = entity.position + shift;
        }
        self.grid = self
            .grid
            .drain()
            .map(|(tile, id)| (tile + shift, id))
            .collect();
    }

    pub fn encode(&self) -> Result<String> {
        let envelope = Envelope {
            blueprint: BlueprintJson {
                icons: vec![IconJson {
                    signal: SignalJson {
                        kind: "item".into(),
                        name: EntityKind::Decider.name().into(),
                    },
                    index: 1,
                }],
                entities: self
                    .entities
                    .iter()
                    .map(|entity| self.entity_json(entity))
                    .collect::<Result<_>>()?,
                item: "blueprint".into(),
                label: self.label.clone(),
                version: VERSION,
            },
        };
        let json = serde_json::to_string(&envelope)?;
        let mut encoder = ZlibEncoder::new(Vec::new(), Compression::best());
        encoder.write_all(json.as_bytes()).map_err(CompileError::Codec)?;
        let bytes = encoder.finish().map_err(CompileError::Codec)?;
        Ok(format!("{}{}", STRING_VERSION, BASE64.encode(bytes)))
    }

    pub fn decode(encoded: &str) -> Result<Blueprint> {
        let payload = encoded
            .trim()
            .strip_prefix(STRING_VERSION)
            .ok_or_else(|| CompileError::Blueprint("unsupported blueprint string version".into()))?;
        let bytes = BASE64.decode(payload)?;
        let mut json = String::new();
        ZlibDecoder::new(bytes.as_slice())
            .read_to_string(&mut json)
            .map_err(CompileError::Codec)?;
        let envelope: Envelope = serde_json::from_str(&json)?;
        let source = envelope.blueprint;

        let mut blueprint = Blueprint::new();
        let mut ids = HashMap::new();
        for entry in &source.entities {
            let kind = EntityKind::from_name(&entry.name)
                .ok_or_else(|| CompileError::Blueprint(format!("unknown entity {}", entry.name)))?;
            let (width, height) = kind.footprint(entry.direction);
            let position = Position::new(
                (entry.position.x - width as f64 / 2.0).round() as i32,
                (entry.position.y - height as f64 / 2.0).round() as i32,
            );
            let id = blueprint.create_entity(kind, position);
            blueprint.set_direction(id, entry.direction);
            if let Some(behavior) = &entry.control_behavior {
                blueprint.set_condition(id, behavior.condition()?);
            }
            ids.insert(entry.entity_number, id);
        }
        for entry in &source.entities {
            let from = *ids.get(&entry.entity_number).ok_or_else(|| {
                CompileError::Blueprint(format!("unknown entity number {}", entry.entity_number))
            })?;
            for (circuit, connection) in &entry.connections {
                let side = Side::from_circuit_id(circuit.parse().unwrap_or(1));
                for (color, points) in [
                    (WireColor::Red, &connection.red),
                    (WireColor::Green, &connection.green),
                ] {
                    for point in points {
                        let to = *ids.get(&point.entity_id).ok_or_else(|| {
                            CompileError::Blueprint(format!(
                                "wire to missing entity {}",
                                point.entity_id
                            ))
                        })?;
                        let to_side = Side::from_circuit_id(point.circuit_id.unwrap_or(1));
                        blueprint.connect(from, side, to, to_side, color);
                    }
                }
            }
        }
        blueprint.label = source.label;
        Ok(blueprint)
    }

    fn entity_json(&self, entity: &Entity) -> Result<EntityJson> {
        let (x, y) = entity.center();
        let mut connections: BTreeMap<String, ConnectionJson> = BTreeMap::new();
        for wire in &self.wires {
            for (mine, theirs) in [(wire.a, wire.b), (wire.b, wire.a)] {
                if mine.entity != entity.id {
                    continue;
                }
                let point = PointJson {
                    entity_id: theirs.entity + 1,
                    circuit_id: match self.entities[theirs.entity].kind {
                        EntityKind::Relay => None,
                        _ => Some(theirs.side.circuit_id()),
                    },
                };
                let connection = connections
                    .entry(mine.side.circuit_id().to_string())
                    .or_default();
                match wire.color {
                    WireColor::Red => connection.red.push(point),
                    WireColor::Green => connection.green.push(point),
                }
            }
        }
        Ok(EntityJson {
            entity_number: entity.id + 1,
            name: entity.kind.name().into(),
            position: PositionJson { x, y },
            direction: entity.direction,
            control_behavior: entity
                .condition
                .as_ref()
                .map(ControlJson::from_condition)
                .transpose()?,
            connections,
        })
    }
}

impl fmt::Display for Blueprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for entity in &self.entities {
            write!(
                f,
                "#{} {} at {} dir {}",
                entity.id + 1,
                entity.kind.name(),
                entity.position,
                entity.direction
            )?;
            match &entity.condition {
                Some(condition) => writeln!(f, ": {}", condition)?,
                None => writeln!(f)?,
            }
        }
        for wire in &self.wires {
            writeln!(
                f,
                "{} wire #{}.{} <-> #{}.{}",
                wire.color,
                wire.a.entity + 1,
                wire.a.side.circuit_id(),
                wire.b.entity + 1,
                wire.b.side.circuit_id()
            )?;
        }
        Ok(())
    }
}

// Blueprint string JSON

#[derive(Serialize, Deserialize)]
struct Envelope {
    blueprint: BlueprintJson,
}

#[derive(Serialize, Deserialize)]
struct BlueprintJson {
    #[serde(default)]
    icons: Vec<IconJson>,
    #[serde(default)]
    entities: Vec<EntityJson>,
    item: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    label: Option<String>,
    version: u64,
}

#[derive(Serialize, Deserialize)]
struct IconJson {
    signal: SignalJson,
    index: u32,
}

#[derive(Serialize, Deserialize, Clone)]
struct SignalJson {
    #[serde(rename = "type")]
    kind: String,
    name: String,
}

impl SignalJson {
    fn from_signal(name: &str) -> Self {
        let (kind, name) = signal_id(name);
        SignalJson {
            kind: kind.into(),
            name,
        }
    }
}

#[derive(Serialize, Deserialize)]
struct PositionJson {
    x: f64,
    y: f64,
}

fn is_zero(direction: &u8) -> bool {
    *direction == 0
}

#[derive(Serialize, Deserialize)]
struct EntityJson {
    entity_number: usize,
    name: String,
    position: PositionJson,
    #[serde(default, skip_serializing_if = "is_zero")]
    direction: u8,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    control_behavior: Option<ControlJson>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    connections: BTreeMap<String, ConnectionJson>,
}

#[derive(Serialize, Deserialize, Default)]
struct ConnectionJson {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    red: Vec<PointJson>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    green: Vec<PointJson>,
}

#[derive(Serialize, Deserialize)]
struct PointJson {
    entity_id: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    circuit_id: Option<u8>,
}

#[derive(Serialize, Deserialize)]
struct ControlJson {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    arithmetic_conditions: Option<ArithmeticJson>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    decider_conditions: Option<DeciderJson>,
}

#[derive(Serialize, Deserialize)]
struct ArithmeticJson {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    first_signal: Option<SignalJson>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    first_constant: Option<i32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    second_signal: Option<SignalJson>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    second_constant: Option<i32>,
    operation: String,
    output_signal: SignalJson,
}

#[derive(Serialize, Deserialize)]
struct DeciderJson {
    first_signal: SignalJson,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    second_signal: Option<SignalJson>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    constant: Option<i32>,
    comparator: String,
    output_signal: SignalJson,
    #[serde(default)]
    copy_count_from_input: bool,
}

fn split_operand(operand: &Operand) -> (Option<SignalJson>, Option<i32>) {
    match operand {
        Operand::Signal(name) => (Some(SignalJson::from_signal(name)), None),
        Operand::Constant(value) => (None, Some(*value)),
    }
}

fn join_operand(signal: &Option<SignalJson>, constant: Option<i32>) -> Operand {
    match signal {
        Some(signal) => Operand::Signal(signal_name(&signal.name)),
        None => Operand::Constant(constant.unwrap_or(0)),
    }
}

impl ControlJson {
    fn from_condition(condition: &Condition) -> Result<Self> {
        Ok(match condition {
            Condition::Arithmetic {
                left,
                op,
                right,
                out,
            } => {
                let (first_signal, first_constant) = split_operand(left);
                let (second_signal, second_constant) = split_operand(right);
                ControlJson {
                    arithmetic_conditions: Some(ArithmeticJson {
                        first_signal,
                        first_constant,
                        second_signal,
                        second_constant,
                        operation: op.symbol().into(),
                        output_signal: SignalJson::from_signal(out),
                    }),
                    decider_conditions: None,
                }
            }
            Condition::Decider {
                left,
                op,
                right,
                out,
                copy_count_from_input,
            } => {
                let Operand::Signal(first) = left else {
                    return Err(CompileError::Blueprint(format!(
                        "decider needs a signal as first operand, found {}",
                        left
                    )));
                };
                let (second_signal, constant) = split_operand(right);
                ControlJson {
                    arithmetic_conditions: None,
                    decider_conditions: Some(DeciderJson {
                        first_signal: SignalJson::from_signal(first),
                        second_signal,
                        constant,
                        comparator: op.symbol().into(),
                        output_signal: SignalJson::from_signal(out),
                        copy_count_from_input: *copy_count_from_input,
                    }),
                }
            }
        })
    }

    fn condition(&self) -> Result<Condition> {
        if let Some(arith) = &self.arithmetic_conditions {
            let op = ArithmeticOp::from_symbol(&arith.operation).ok_or_else(|| {
                CompileError::Blueprint(format!("unsupported operation {}", arith.operation))
            })?;
            return Ok(Condition::Arithmetic {
                left: join_operand(&arith.first_signal, arith.first_constant),
                op,
                right: join_operand(&arith.second_signal, arith.second_constant),
                out: signal_name(&arith.output_signal.name),
            });
        }
        if let Some(decider) = &self.decider_conditions {
            let op = Comparator::from_symbol(&decider.comparator).ok_or_else(|| {
                CompileError::Blueprint(format!("unsupported comparator {}", decider.comparator))
            })?;
            return Ok(Condition::Decider {
                left: Operand::Signal(signal_name(&decider.first_signal.name)),
                op,
                right: join_operand(&decider.second_signal, decider.constant),
                out: signal_name(&decider.output_signal.name),
                copy_count_from_input: decider.copy_count_from_input,
            });
        }
        Err(CompileError::Blueprint(
            "control behavior without conditions".into(),
        ))
    }
}
