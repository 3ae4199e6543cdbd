use crate::ast::{Block, Conditional, Node, Script, Step};
use crate::decompose;
use crate::error::{CompileError, Location, Result};
use crate::expr::{parse_expression, BinaryOp, Expr};
use crate::primitives::{ArithmeticOp, Operand};
use crate::scope::Scope;
use crate::stream::{Stream, Word};

enum FrameKind {
    Chain,
    Parallel,
    Series,
    Conditional {
        is_while: bool,
        expr: Node,
        out: String,
    },
}

/// A block that has been opened but not yet closed.
struct Frame {
    kind: FrameKind,
    scope: Scope,
    body: Vec<Node>,
}

impl Frame {
    fn context(&self) -> Context {
        match self.kind {
            FrameKind::Chain => Context::Chain,
            FrameKind::Parallel => Context::Parallel,
            FrameKind::Series => Context::Series,
            FrameKind::Conditional { is_while, .. } => Context::Conditional(is_while),
        }
    }

    fn into_node(self) -> Node {
        let block = Block {
            scope: self.scope,
            body: self.body,
        };
        match self.kind {
            FrameKind::Chain => Node::Chain(block),
            FrameKind::Parallel => Node::Parallel(block),
            FrameKind::Series => Node::Series(block),
            FrameKind::Conditional {
                is_while,
                expr,
                out,
            } => Node::If(Conditional {
                is_while,
                scope: block.scope,
                expr: Box::new(expr),
                out,
                body: block.body,
            }),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Context {
    Script,
    Chain,
    Parallel,
    Series,
    Conditional(bool),
}

impl Context {
    fn name(self) -> &'static str {
        match self {
            Context::Script => "script",
            Context::Chain => "chain",
            Context::Parallel => "parallel",
            Context::Series => "series",
            Context::Conditional(false) => "if",
            Context::Conditional(true) => "while",
        }
    }

    /// Inside parallel and series blocks assignments are single steps.
    fn takes_steps(self) -> bool {
        matches!(self, Context::Parallel | Context::Series)
    }
}

struct Parser {
    stream: Stream,
    script: Script,
    open: Vec<Frame>,
}

impl Parser {
    fn context(&self) -> Context {
        self.open.last().map_or(Context::Script, Frame::context)
    }

    fn scope(&self) -> &Scope {
        self.open
            .last()
            .map_or(&self.script.scope, |frame| &frame.scope)
    }

    fn scope_mut(&mut self) -> &mut Scope {
        match self.open.last_mut() {
            Some(frame) => &mut frame.scope,
            None => &mut self.script.scope,
        }
    }

    fn push_node(&mut self, node: Node) {
        match self.open.last_mut() {
            Some(frame) => frame.body.push(node),
            None => self.script.body.push(node),
        }
    }

    fn run(mut self) -> Result<Script> {
        loop {
            while self.stream.eat_char(';') {}
            if self.stream.end() {
                break;
            }
            let at = self.stream.location();
            if self.stream.eat_char('}') {
                let frame = self.open.pop().ok_or_else(|| {
                    CompileError::structural("Unexpected } because no block is open").located(at)
                })?;
                let node = frame.into_node();
                self.push_node(node);
                continue;
            }
            let keyword = self.stream.next_name()?;
            self.statement(&keyword, at)?;
        }
        if let Some(frame) = self.open.last() {
            return Err(CompileError::syntax(
                format!("Unclosed {} block", frame.context().name()),
                self.stream.location(),
            ));
        }
        Ok(self.script)
    }

    fn statement(&mut self, keyword: &str, at: Location) -> Result<()> {
        let context = self.context();
        match keyword {
            "chain" => self.open_block(FrameKind::Chain, context == Context::Script, at),
            "parallel" => self.open_block(FrameKind::Parallel, context == Context::Chain, at),
            "series" => self.open_block(FrameKind::Series, context == Context::Parallel, at),
            "if" => self.conditional(false),
            "while" => self.conditional(true),
            "alias" => self.alias(at),
            name if context.takes_steps() => self.step(name),
            name => self.assignment(name),
        }
    }

    fn open_block(&mut self, kind: FrameKind, allowed: bool, at: Location) -> Result<()> {
        let frame = Frame {
            kind,
            scope: self.scope().child(),
            body: Vec::new(),
        };
        if !allowed {
            return Err(CompileError::structural(format!(
                "Cannot create {} inside of {}",
                frame.context().name(),
                self.context().name()
            ))
            .located(at));
        }
        self.stream.expect_char('{')?;
        self.open.push(frame);
        Ok(())
    }

    fn conditional(&mut self, is_while: bool) -> Result<()> {
        let mut scope = self.scope().child();
        let (raw, at) = self.stream.next_expression(true)?;
        let expr = parse_expression(&raw).map_err(|err| err.located(at))?;
        let (expr, out) = decompose::condition(expr, &mut scope).map_err(|err| err.located(at))?;
        self.stream.expect_char('{')?;
        self.open.push(Frame {
            kind: FrameKind::Conditional {
                is_while,
                expr,
                out,
            },
            scope,
            body: Vec::new(),
        });
        Ok(())
    }

    fn alias(&mut self, at: Location) -> Result<()> {
        let word = self.stream.next_name()?;
        self.stream.expect_char('=')?;
        let target = self.stream.next_name()?;
        self.scope_mut()
            .bind_alias(word, &target)
            .map_err(|err| err.located(at))
    }

    fn compound_op(&mut self) -> Result<Option<ArithmeticOp>> {
        let Some(c) = self.stream.eat_set("+-*/") else {
            return Ok(None);
        };
        let at = self.stream.location();
        ArithmeticOp::from_char(c)
            .map(Some)
            .ok_or_else(|| CompileError::syntax(format!("Unknown operator {}", c), at))
    }

    /// `=` or `OP=` after an assignment target.
    fn assign_op(&mut self) -> Result<Option<ArithmeticOp>> {
        match self.stream.expect_set("+-*/=")? {
            '=' => Ok(None),
            c => {
                let at = self.stream.location();
                let op = ArithmeticOp::from_char(c)
                    .ok_or_else(|| CompileError::syntax(format!("Unknown operator {}", c), at))?;
                self.stream.expect_char('=')?;
                Ok(Some(op))
            }
        }
    }

    fn operand(&mut self) -> Result<Operand> {
        Ok(match self.stream.next_keyword(true)? {
            Word::Name(name) => Operand::Signal(self.scope().resolve(&name)),
            Word::Number(value) => Operand::Constant(value),
        })
    }

    /// `name = expr` or `name OP= expr`, lowered through the decomposer.
    fn assignment(&mut self, name: &str) -> Result<()> {
        let target = self.scope().resolve(name);
        let compound = self.assign_op()?;
        let (raw, at) = self.stream.next_expression(false)?;
        let mut expr = parse_expression(&raw).map_err(|err| err.located(at))?;
        if let Some(op) = compound {
            expr = Expr::binary(BinaryOp::from_arithmetic(op), Expr::ident(name), expr);
        }
        let node = decompose::assignment(&target, expr, self.scope())
            .map_err(|err| err.located(at))?;
        self.push_node(node);
        Ok(())
    }

    /// `name = a OP b`, `name = a` or `name OP= b`.
    fn step(&mut self, name: &str) -> Result<()> {
        let out = self.scope().resolve(name);
        let step = match self.assign_op()? {
            Some(op) => {
                let right = self.operand()?;
                Step::new(Operand::Signal(out.clone()), op, right, &out)
            }
            None => {
                let left = self.operand()?;
                match self.compound_op()? {
                    Some(op) => Step::new(left, op, self.operand()?, &out),
                    None => Step::new(left, ArithmeticOp::Add, Operand::Constant(0), &out),
                }
            }
        };
        self.push_node(Node::Variable(step));
        Ok(())
    }
}

/// Parses a whole script into its AST.
pub fn parse(source: &str) -> Result<Script> {
    Parser {
        stream: Stream::new(source),
        script: Script::new(),
        open: Vec::new(),
    }
    .run()
}
