//! Compilation of expressions into callable functions.
//!
//! Each output entry becomes a small register program. Structurally equal
//! subexpressions inside one program are computed once.

use crate::expr::{BinaryOp, Expr, Node, UnaryOp};
use derivable_core::derivative::{DerivKind, DerivativeFn};
use derivable_core::error::{Error, Result};
use derivable_core::value::{Shape, Value};
use log::debug;
use rayon::prelude::*;
use std::collections::HashMap;
use std::sync::Arc;

/// A single register instruction; operands are earlier register indices.
#[derive(Debug, Clone, Copy, PartialEq)]
enum Instr {
    Const(f64),
    Var(usize),
    Unary(UnaryOp, usize),
    Binary(BinaryOp, usize, usize),
    Powi(usize, i32),
    Powf(usize, f64),
}

/// Structural key used to merge equal subexpressions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum InstrKey {
    Const(u64),
    Var(usize),
    Unary(UnaryOp, usize),
    Binary(BinaryOp, usize, usize),
    Powi(usize, i32),
    Powf(usize, u64),
}

impl From<Instr> for InstrKey {
    fn from(instr: Instr) -> Self {
        match instr {
            Instr::Const(c) => InstrKey::Const(c.to_bits()),
            Instr::Var(i) => InstrKey::Var(i),
            Instr::Unary(op, a) => InstrKey::Unary(op, a),
            Instr::Binary(op, a, b) => InstrKey::Binary(op, a, b),
            Instr::Powi(a, n) => InstrKey::Powi(a, n),
            Instr::Powf(a, p) => InstrKey::Powf(a, p.to_bits()),
        }
    }
}

/// Register program computing one output entry.
#[derive(Debug, Clone, PartialEq)]
pub struct Program {
    instrs: Vec<Instr>,
    result: usize,
}

impl Program {
    /// Compiles a single expression.
    pub fn compile(expr: &Expr) -> Self {
        let mut builder = ProgramBuilder::default();
        let result = builder.lower(expr);
        Program {
            instrs: builder.instrs,
            result,
        }
    }

    /// Number of instructions after subexpression merging.
    pub fn len(&self) -> usize {
        self.instrs.len()
    }

    /// Returns true for an empty program.
    pub fn is_empty(&self) -> bool {
        self.instrs.is_empty()
    }

    /// Runs the program; `vars` must cover every variable it reads.
    fn run(&self, vars: &[f64], registers: &mut Vec<f64>) -> f64 {
        registers.clear();
        for instr in &self.instrs {
            let value = match *instr {
                Instr::Const(c) => c,
                Instr::Var(i) => vars[i],
                Instr::Unary(op, a) => op.apply(registers[a]),
                Instr::Binary(op, a, b) => op.apply(registers[a], registers[b]),
                Instr::Powi(a, n) => registers[a].powi(n),
                Instr::Powf(a, p) => registers[a].powf(p),
            };
            registers.push(value);
        }
        registers[self.result]
    }
}

#[derive(Default)]
struct ProgramBuilder {
    instrs: Vec<Instr>,
    by_key: HashMap<InstrKey, usize>,
    by_node: HashMap<*const Node, usize>,
}

impl ProgramBuilder {
    fn emit(&mut self, instr: Instr) -> usize {
        let key = InstrKey::from(instr);
        if let Some(&reg) = self.by_key.get(&key) {
            return reg;
        }
        self.instrs.push(instr);
        let reg = self.instrs.len() - 1;
        self.by_key.insert(key, reg);
        reg
    }

    fn lower(&mut self, expr: &Expr) -> usize {
        for e in expr.post_order() {
            if self.by_node.contains_key(&e.key()) {
                continue;
            }
            let reg = |child: &Expr| self.by_node[&child.key()];
            let instr = match e.node() {
                Node::Const(c) => Instr::Const(*c),
                Node::Var(i) => Instr::Var(*i),
                Node::Unary(op, a) => Instr::Unary(*op, reg(a)),
                Node::Binary(op, a, b) => Instr::Binary(*op, reg(a), reg(b)),
                Node::Powi(a, n) => Instr::Powi(reg(a), *n),
                Node::Powf(a, p) => Instr::Powf(reg(a), *p),
            };
            let r = self.emit(instr);
            self.by_node.insert(e.key(), r);
        }
        self.by_node[&expr.key()]
    }
}

/// A compiled array of expressions with fixed input and output shapes.
#[derive(Debug, Clone)]
pub struct CompiledFunction {
    input: Shape,
    output: Shape,
    programs: Arc<Vec<Program>>,
    parallel: bool,
}

impl CompiledFunction {
    /// Compiles `exprs` for inputs of shape `input`.
    pub fn new(exprs: &Value<Expr>, input: Shape, parallel: bool) -> Result<Self> {
        let input = input.normalized();
        let flat = exprs.flatten();
        let n = input.len();
        for (k, e) in flat.iter().enumerate() {
            if let Some(v) = e.max_var() {
                if v >= n {
                    return Err(Error::build(format!(
                        "output entry {} reads x{} but the input {} has only {} entries",
                        k, v, input, n
                    )));
                }
            }
        }
        let programs: Vec<Program> = flat.iter().map(Program::compile).collect();
        debug!(
            "compiled {} outputs into {} instructions",
            programs.len(),
            programs.iter().map(Program::len).sum::<usize>()
        );
        Ok(Self {
            input,
            output: exprs.shape(),
            programs: Arc::new(programs),
            parallel,
        })
    }

    /// Shape of accepted inputs.
    pub fn input_shape(&self) -> &Shape {
        &self.input
    }

    /// Shape of produced outputs.
    pub fn output_shape(&self) -> &Shape {
        &self.output
    }

    /// Total instruction count over all outputs.
    pub fn instruction_count(&self) -> usize {
        self.programs.iter().map(Program::len).sum()
    }

    fn compute(&self, x: &Value<f64>) -> Result<Vec<f64>> {
        let actual = x.shape();
        if actual != self.input {
            return Err(Error::shape_mismatch(&self.input, actual));
        }
        let vars = x.flatten();
        let data = if self.parallel {
            self.programs
                .par_iter()
                .map_init(Vec::new, |registers, program| program.run(&vars, registers))
                .collect()
        } else {
            let mut registers = Vec::new();
            self.programs
                .iter()
                .map(|program| program.run(&vars, &mut registers))
                .collect()
        };
        Ok(data)
    }

    /// Evaluates all outputs, allocating the result.
    pub fn eval(&self, x: &Value<f64>) -> Result<Value<f64>> {
        let data = self.compute(x)?;
        Value::from_flat(&self.output, data)
    }

    /// Evaluates all outputs into `out`.
    pub fn eval_into(&self, out: &mut Value<f64>, x: &Value<f64>) -> Result<()> {
        let actual = out.shape();
        if actual != self.output {
            return Err(Error::shape_mismatch(&self.output, actual));
        }
        let data = self.compute(x)?;
        out.write_flat(&data)
    }
}

/// Options for [`build_callable`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BuildOptions {
    /// Produce the in-place form `f(out, x)`.
    pub in_place: bool,
    /// Evaluate outputs in parallel.
    pub parallel: bool,
}

/// A compiled function in its preferred calling form.
///
/// Both forms accept both calls; the variant records which one the
/// function was built for.
#[derive(Debug, Clone)]
pub enum Callable {
    /// Built for `y = f(x)`.
    Allocating(CompiledFunction),
    /// Built for `f(y, x)`.
    InPlace(CompiledFunction),
}

impl Callable {
    /// The compiled function.
    pub fn compiled(&self) -> &CompiledFunction {
        match self {
            Callable::Allocating(c) | Callable::InPlace(c) => c,
        }
    }

    /// Returns true for the in-place form.
    pub fn is_in_place(&self) -> bool {
        matches!(self, Callable::InPlace(_))
    }

    /// Evaluates, allocating the result.
    pub fn call(&self, x: &Value<f64>) -> Result<Value<f64>> {
        self.compiled().eval(x)
    }

    /// Evaluates into `out`.
    pub fn call_into(&self, out: &mut Value<f64>, x: &Value<f64>) -> Result<()> {
        self.compiled().eval_into(out, x)
    }

    /// Wraps the callable as a derivative of the given kind.
    pub fn into_derivative_fn(self, kind: DerivKind) -> DerivativeFn {
        let in_place = self.is_in_place();
        let compiled = match self {
            Callable::Allocating(c) | Callable::InPlace(c) => c,
        };
        let shape = compiled.output_shape().clone();
        let eval = compiled.clone();
        let df = DerivativeFn::from_fn(kind, move |x| eval.eval(x)).with_result_shape(shape);
        if in_place {
            df.with_in_place(Arc::new(move |out: &mut Value<f64>, x: &Value<f64>| {
                compiled.eval_into(out, x)
            }))
        } else {
            df
        }
    }
}

/// Compiles an array of expressions over inputs of shape `input`.
///
/// Fails with [`Error::Build`] if an expression reads a variable the input
/// does not have.
pub fn build_callable(exprs: &Value<Expr>, input: Shape, options: BuildOptions) -> Result<Callable> {
    let compiled = CompiledFunction::new(exprs, input, options.parallel)?;
    Ok(if options.in_place {
        Callable::InPlace(compiled)
    } else {
        Callable::Allocating(compiled)
    })
}
