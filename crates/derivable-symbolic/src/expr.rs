//! Symbolic expressions.
//!
//! An [`Expr`] is an immutable, reference-counted expression tree over
//! indexed variables. Subtrees are shared rather than copied, so tracing a
//! function that reuses an intermediate value produces a DAG. The smart
//! constructors fold constants and drop neutral elements as nodes are
//! built; no other rewriting takes place.

use derivable_core::error::{Error, Result};
use derivable_core::types::Real;
use num_traits::{One, Zero};
use once_cell::sync::Lazy;
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::ops::{Add, Div, Mul, Neg, Sub};
use std::sync::Arc;

/// Unary operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum UnaryOp {
    /// Negation.
    Neg,
    /// Sine.
    Sin,
    /// Cosine.
    Cos,
    /// Tangent.
    Tan,
    /// Natural exponential.
    Exp,
    /// Natural logarithm.
    Ln,
    /// Square root.
    Sqrt,
    /// Hyperbolic tangent.
    Tanh,
}

impl UnaryOp {
    /// Applies the operator to a number.
    pub fn apply(self, x: f64) -> f64 {
        match self {
            UnaryOp::Neg => -x,
            UnaryOp::Sin => x.sin(),
            UnaryOp::Cos => x.cos(),
            UnaryOp::Tan => x.tan(),
            UnaryOp::Exp => x.exp(),
            UnaryOp::Ln => x.ln(),
            UnaryOp::Sqrt => x.sqrt(),
            UnaryOp::Tanh => x.tanh(),
        }
    }

    fn name(self) -> &'static str {
        match self {
            UnaryOp::Neg => "-",
            UnaryOp::Sin => "sin",
            UnaryOp::Cos => "cos",
            UnaryOp::Tan => "tan",
            UnaryOp::Exp => "exp",
            UnaryOp::Ln => "ln",
            UnaryOp::Sqrt => "sqrt",
            UnaryOp::Tanh => "tanh",
        }
    }
}

/// Binary operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BinaryOp {
    /// Sum.
    Add,
    /// Difference.
    Sub,
    /// Product.
    Mul,
    /// Quotient.
    Div,
}

impl BinaryOp {
    /// Applies the operator to two numbers.
    pub fn apply(self, a: f64, b: f64) -> f64 {
        match self {
            BinaryOp::Add => a + b,
            BinaryOp::Sub => a - b,
            BinaryOp::Mul => a * b,
            BinaryOp::Div => a / b,
        }
    }

    fn symbol(self) -> &'static str {
        match self {
            BinaryOp::Add => "+",
            BinaryOp::Sub => "-",
            BinaryOp::Mul => "*",
            BinaryOp::Div => "/",
        }
    }
}

/// A node of an expression tree.
#[derive(Debug, PartialEq)]
pub enum Node {
    /// A numeric constant.
    Const(f64),
    /// The input coordinate with the given row-major index.
    Var(usize),
    /// A unary operation.
    Unary(UnaryOp, Expr),
    /// A binary operation.
    Binary(BinaryOp, Expr, Expr),
    /// An integer power.
    Powi(Expr, i32),
    /// A constant real power.
    Powf(Expr, f64),
}

impl Node {
    fn children(&self) -> [Option<&Expr>; 2] {
        match self {
            Node::Const(_) | Node::Var(_) => [None, None],
            Node::Unary(_, a) | Node::Powi(a, _) | Node::Powf(a, _) => [Some(a), None],
            Node::Binary(_, a, b) => [Some(a), Some(b)],
        }
    }

    /// Moves uniquely owned children to `pending`, leaving placeholders.
    fn detach_children(&mut self, pending: &mut Vec<Expr>) {
        match self {
            Node::Const(_) | Node::Var(_) => {}
            Node::Unary(_, a) | Node::Powi(a, _) | Node::Powf(a, _) => detach(a, pending),
            Node::Binary(_, a, b) => {
                detach(a, pending);
                detach(b, pending);
            }
        }
    }
}

static DETACHED: Lazy<Arc<Node>> = Lazy::new(|| Arc::new(Node::Const(0.0)));

fn detach(slot: &mut Expr, pending: &mut Vec<Expr>) {
    if Arc::get_mut(&mut slot.0).is_some() {
        pending.push(std::mem::replace(slot, Expr(Arc::clone(&DETACHED))));
    }
}

/// A shared, immutable symbolic expression.
///
/// Traversals, comparison, formatting and drop all use explicit stacks, so
/// the depth of an expression is bounded by memory rather than by the
/// thread's stack.
#[derive(Clone)]
pub struct Expr(Arc<Node>);

impl Expr {
    /// A numeric constant.
    pub fn constant(value: f64) -> Self {
        Expr(Arc::new(Node::Const(value)))
    }

    /// The input coordinate `index`.
    pub fn var(index: usize) -> Self {
        Expr(Arc::new(Node::Var(index)))
    }

    /// The root node.
    pub fn node(&self) -> &Node {
        &self.0
    }

    /// The value if this is a constant.
    pub fn as_constant(&self) -> Option<f64> {
        match *self.0 {
            Node::Const(c) => Some(c),
            _ => None,
        }
    }

    fn is_const(&self, value: f64) -> bool {
        self.as_constant() == Some(value)
    }

    pub(crate) fn key(&self) -> *const Node {
        Arc::as_ptr(&self.0)
    }

    /// Builds a unary node, folding constants.
    pub fn unary(op: UnaryOp, arg: Expr) -> Self {
        if let Some(c) = arg.as_constant() {
            return Expr::constant(op.apply(c));
        }
        if op == UnaryOp::Neg {
            if let Node::Unary(UnaryOp::Neg, inner) = arg.node() {
                return inner.clone();
            }
        }
        Expr(Arc::new(Node::Unary(op, arg)))
    }

    /// Builds a binary node, folding constants and neutral elements.
    pub fn binary(op: BinaryOp, lhs: Expr, rhs: Expr) -> Self {
        if let (Some(a), Some(b)) = (lhs.as_constant(), rhs.as_constant()) {
            return Expr::constant(op.apply(a, b));
        }
        match op {
            BinaryOp::Add if lhs.is_const(0.0) => return rhs,
            BinaryOp::Add | BinaryOp::Sub if rhs.is_const(0.0) => return lhs,
            BinaryOp::Sub if lhs.is_const(0.0) => return Expr::unary(UnaryOp::Neg, rhs),
            BinaryOp::Mul if lhs.is_const(0.0) || rhs.is_const(0.0) => {
                return Expr::constant(0.0)
            }
            BinaryOp::Mul if lhs.is_const(1.0) => return rhs,
            BinaryOp::Mul | BinaryOp::Div if rhs.is_const(1.0) => return lhs,
            BinaryOp::Div if lhs.is_const(0.0) => return Expr::constant(0.0),
            _ => {}
        }
        Expr(Arc::new(Node::Binary(op, lhs, rhs)))
    }

    /// Builds an integer power.
    pub fn pow_int(base: Expr, n: i32) -> Self {
        match n {
            0 => Expr::constant(1.0),
            1 => base,
            _ => match base.as_constant() {
                Some(c) => Expr::constant(c.powi(n)),
                None => Expr(Arc::new(Node::Powi(base, n))),
            },
        }
    }

    /// Builds a constant real power.
    pub fn pow_real(base: Expr, p: f64) -> Self {
        if p == 1.0 {
            return base;
        }
        if p == 0.0 {
            return Expr::constant(1.0);
        }
        match base.as_constant() {
            Some(c) => Expr::constant(c.powf(p)),
            None => Expr(Arc::new(Node::Powf(base, p))),
        }
    }

    /// Highest variable index used, if any.
    pub fn max_var(&self) -> Option<usize> {
        let mut seen = HashSet::new();
        let mut stack = vec![self];
        let mut max = None;
        while let Some(e) = stack.pop() {
            if !seen.insert(e.key()) {
                continue;
            }
            if let Node::Var(i) = e.node() {
                max = Some(max.map_or(*i, |m: usize| m.max(*i)));
            }
            stack.extend(e.node().children().into_iter().flatten());
        }
        max
    }

    /// Nodes reachable from this expression, each once, children first.
    pub(crate) fn post_order(&self) -> Vec<&Expr> {
        let mut order = Vec::new();
        let mut seen = HashSet::new();
        let mut stack = vec![(self, false)];
        while let Some((e, expanded)) = stack.pop() {
            if expanded {
                order.push(e);
                continue;
            }
            if !seen.insert(e.key()) {
                continue;
            }
            stack.push((e, true));
            stack.extend(e.node().children().into_iter().flatten().map(|c| (c, false)));
        }
        order
    }

    /// Evaluates the expression for the given variable values.
    ///
    /// Shared subtrees are evaluated once; compile the expression for
    /// repeated evaluations.
    pub fn eval(&self, vars: &[f64]) -> Result<f64> {
        let mut values: HashMap<*const Node, f64> = HashMap::new();
        for e in self.post_order() {
            let value_of = |child: &Expr| values[&child.key()];
            let value = match e.node() {
                Node::Const(c) => *c,
                Node::Var(i) => *vars.get(*i).ok_or_else(|| {
                    Error::evaluation(format!(
                        "variable x{} is out of range for {} values",
                        i,
                        vars.len()
                    ))
                })?,
                Node::Unary(op, a) => op.apply(value_of(a)),
                Node::Binary(op, a, b) => op.apply(value_of(a), value_of(b)),
                Node::Powi(a, n) => value_of(a).powi(*n),
                Node::Powf(a, p) => value_of(a).powf(*p),
            };
            values.insert(e.key(), value);
        }
        Ok(values[&self.key()])
    }

    /// Partial derivative with respect to variable `var`.
    ///
    /// Each distinct node is differentiated once.
    pub fn diff(&self, var: usize) -> Expr {
        let mut memo: HashMap<*const Node, Expr> = HashMap::new();
        for e in self.post_order() {
            let d = e.diff_node(var, &memo);
            memo.insert(e.key(), d);
        }
        memo.remove(&self.key()).unwrap_or_else(Expr::zero)
    }

    /// Derivative of this node given the derivatives of its children.
    fn diff_node(&self, var: usize, memo: &HashMap<*const Node, Expr>) -> Expr {
        let d = |child: &Expr| memo.get(&child.key()).cloned().unwrap_or_else(Expr::zero);
        match self.node() {
            Node::Const(_) => Expr::zero(),
            Node::Var(i) => {
                if *i == var {
                    Expr::one()
                } else {
                    Expr::zero()
                }
            }
            Node::Unary(op, a) => {
                let da = d(a);
                if da.is_zero() {
                    da
                } else {
                    chain(*op, a, self, da)
                }
            }
            Node::Binary(op, a, b) => {
                let (da, db) = (d(a), d(b));
                match op {
                    BinaryOp::Add => da + db,
                    BinaryOp::Sub => da - db,
                    BinaryOp::Mul => da * b.clone() + a.clone() * db,
                    BinaryOp::Div => da / b.clone() - a.clone() * db / b.clone().powi(2),
                }
            }
            Node::Powi(a, n) => Expr::constant(f64::from(*n)) * a.clone().powi(n - 1) * d(a),
            Node::Powf(a, p) => Expr::constant(*p) * a.clone().powf(p - 1.0) * d(a),
        }
    }
}

/// `seed` times the derivative of `op` at `arg`; `this` is `op(arg)`.
pub(crate) fn chain(op: UnaryOp, arg: &Expr, this: &Expr, seed: Expr) -> Expr {
    let a = arg.clone();
    let outer = match op {
        UnaryOp::Neg => return -seed,
        UnaryOp::Sin => a.cos(),
        UnaryOp::Cos => -a.sin(),
        UnaryOp::Tan => Expr::one() + a.tan().powi(2),
        UnaryOp::Exp => this.clone(),
        UnaryOp::Ln => a.recip(),
        UnaryOp::Sqrt => (Expr::constant(2.0) * this.clone()).recip(),
        UnaryOp::Tanh => Expr::one() - this.clone().powi(2),
    };
    outer * seed
}

impl Drop for Expr {
    fn drop(&mut self) {
        let mut pending = Vec::new();
        if let Some(node) = Arc::get_mut(&mut self.0) {
            node.detach_children(&mut pending);
        }
        while let Some(mut e) = pending.pop() {
            if let Some(node) = Arc::get_mut(&mut e.0) {
                node.detach_children(&mut pending);
            }
        }
    }
}

impl PartialEq for Expr {
    fn eq(&self, other: &Self) -> bool {
        let mut stack = vec![(self, other)];
        while let Some((a, b)) = stack.pop() {
            if Arc::ptr_eq(&a.0, &b.0) {
                continue;
            }
            match (a.node(), b.node()) {
                (Node::Const(x), Node::Const(y)) if x == y => {}
                (Node::Var(i), Node::Var(j)) if i == j => {}
                (Node::Unary(p, x), Node::Unary(q, y)) if p == q => stack.push((x, y)),
                (Node::Binary(p, x1, x2), Node::Binary(q, y1, y2)) if p == q => {
                    stack.push((x1, y1));
                    stack.push((x2, y2));
                }
                (Node::Powi(x, n), Node::Powi(y, m)) if n == m => stack.push((x, y)),
                (Node::Powf(x, p), Node::Powf(y, q)) if p == q => stack.push((x, y)),
                _ => return false,
            }
        }
        true
    }
}

impl Add for Expr {
    type Output = Expr;

    fn add(self, rhs: Expr) -> Expr {
        Expr::binary(BinaryOp::Add, self, rhs)
    }
}

impl Sub for Expr {
    type Output = Expr;

    fn sub(self, rhs: Expr) -> Expr {
        Expr::binary(BinaryOp::Sub, self, rhs)
    }
}

impl Mul for Expr {
    type Output = Expr;

    fn mul(self, rhs: Expr) -> Expr {
        Expr::binary(BinaryOp::Mul, self, rhs)
    }
}

impl Div for Expr {
    type Output = Expr;

    fn div(self, rhs: Expr) -> Expr {
        Expr::binary(BinaryOp::Div, self, rhs)
    }
}

impl Neg for Expr {
    type Output = Expr;

    fn neg(self) -> Expr {
        Expr::unary(UnaryOp::Neg, self)
    }
}

impl Zero for Expr {
    fn zero() -> Self {
        Expr::constant(0.0)
    }

    fn is_zero(&self) -> bool {
        self.is_const(0.0)
    }
}

impl One for Expr {
    fn one() -> Self {
        Expr::constant(1.0)
    }
}

impl Real for Expr {
    fn from_f64(v: f64) -> Self {
        Expr::constant(v)
    }

    fn sin(self) -> Self {
        Expr::unary(UnaryOp::Sin, self)
    }

    fn cos(self) -> Self {
        Expr::unary(UnaryOp::Cos, self)
    }

    fn tan(self) -> Self {
        Expr::unary(UnaryOp::Tan, self)
    }

    fn exp(self) -> Self {
        Expr::unary(UnaryOp::Exp, self)
    }

    fn ln(self) -> Self {
        Expr::unary(UnaryOp::Ln, self)
    }

    fn sqrt(self) -> Self {
        Expr::unary(UnaryOp::Sqrt, self)
    }

    fn tanh(self) -> Self {
        Expr::unary(UnaryOp::Tanh, self)
    }

    fn powi(self, n: i32) -> Self {
        Expr::pow_int(self, n)
    }

    fn powf(self, p: f64) -> Self {
        Expr::pow_real(self, p)
    }
}

enum Piece<'a> {
    Expr(&'a Expr),
    Text(&'static str),
    Op(BinaryOp),
    Int(i32),
    Real(f64),
}

impl fmt::Display for Expr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut stack = vec![Piece::Expr(self)];
        while let Some(piece) = stack.pop() {
            match piece {
                Piece::Text(text) => f.write_str(text)?,
                Piece::Op(op) => write!(f, " {} ", op.symbol())?,
                Piece::Int(n) => write!(f, "{}", n)?,
                Piece::Real(p) => write!(f, "{}", p)?,
                Piece::Expr(e) => match e.node() {
                    Node::Const(c) => write!(f, "{}", c)?,
                    Node::Var(i) => write!(f, "x{}", i)?,
                    Node::Unary(op, a) => {
                        match op {
                            UnaryOp::Neg => f.write_str("-(")?,
                            _ => write!(f, "{}(", op.name())?,
                        }
                        stack.extend([Piece::Text(")"), Piece::Expr(a)]);
                    }
                    Node::Binary(op, a, b) => {
                        f.write_str("(")?;
                        stack.extend([Piece::Text(")"), Piece::Expr(b), Piece::Op(*op), Piece::Expr(a)]);
                    }
                    Node::Powi(a, n) => stack.extend([Piece::Int(*n), Piece::Text("^"), Piece::Expr(a)]),
                    Node::Powf(a, p) => stack.extend([Piece::Real(*p), Piece::Text("^"), Piece::Expr(a)]),
                },
            }
        }
        Ok(())
    }
}

impl fmt::Debug for Expr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Expr({})", self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn x(i: usize) -> Expr {
        Expr::var(i)
    }

    #[test]
    fn test_simplification() {
        assert_eq!(x(0) + Expr::zero(), x(0));
        assert_eq!(x(0) * Expr::one(), x(0));
        assert!((x(0) * Expr::zero()).is_zero());
        assert_eq!(-(-x(1)), x(1));
        assert_eq!(x(0).powi(1), x(0));
        assert_eq!(Expr::constant(2.0) * Expr::constant(3.0), Expr::constant(6.0));
        assert_eq!(Expr::zero() - x(0), -x(0));
    }

    #[test]
    fn test_display() {
        let e = x(0).powi(2) + x(0) * x(1).sin();
        assert_eq!(e.to_string(), "(x0^2 + (x0 * sin(x1)))");
    }

    #[test]
    fn test_eval_and_max_var() {
        let e = x(0) * x(2).exp() - Expr::constant(1.0);
        assert_relative_eq!(e.eval(&[2.0, 0.0, 0.0]).unwrap(), 1.0);
        assert_eq!(e.max_var(), Some(2));
        assert_eq!(Expr::constant(1.0).max_var(), None);
        assert!(e.eval(&[1.0]).is_err());
    }

    #[test]
    fn test_diff_rules() {
        let a = 0.7;
        let cases: Vec<(Expr, f64)> = vec![
            (x(0).sin(), a.cos()),
            (x(0).cos(), -a.sin()),
            (x(0).tan(), 1.0 + a.tan().powi(2)),
            (x(0).exp(), a.exp()),
            (x(0).ln(), 1.0 / a),
            (x(0).sqrt(), 0.5 / a.sqrt()),
            (x(0).tanh(), 1.0 - a.tanh().powi(2)),
            (x(0).powi(3), 3.0 * a * a),
            (x(0).powf(0.5), 0.5 * a.powf(-0.5)),
            (Expr::one() / x(0), -1.0 / (a * a)),
            (x(0) * x(0).sin(), a.sin() + a * a.cos()),
        ];
        for (e, expected) in cases {
            let d = e.diff(0).eval(&[a]).unwrap();
            assert_relative_eq!(d, expected, epsilon = 1e-12);
        }
    }

    #[test]
    fn test_diff_of_square_at_zero_is_zero() {
        let d = x(0).powi(2).diff(0);
        assert_eq!(d.eval(&[0.0]).unwrap(), 0.0);
        assert_eq!(d.to_string(), "(2 * x0)");
    }

    #[test]
    fn test_diff_with_respect_to_absent_variable() {
        assert!(x(0).powi(3).sin().diff(1).is_zero());
    }

    #[test]
    fn test_shared_subtrees_are_differentiated_once() {
        let mut e = x(0);
        for _ in 0..40 {
            e = e.clone() * e.clone().sin();
        }
        // Each level doubles the tree size; differentiation stays linear in
        // the number of distinct nodes.
        let d = e.diff(0);
        assert!(matches!(d.node(), Node::Binary(BinaryOp::Add, _, _)));
    }

    fn left_deep_sum(n: usize) -> Expr {
        (1..n).fold(x(0) * x(0), |acc, i| acc + x(i) * x(i))
    }

    #[test]
    fn test_deep_chains_do_not_recurse() {
        let n = 100_000;
        let e = left_deep_sum(n);
        let vars = vec![1.0; n];
        assert_eq!(e.eval(&vars).unwrap(), n as f64);
        assert_eq!(e.diff(n - 1).eval(&vars).unwrap(), 2.0);
        assert_eq!(e, left_deep_sum(n));
        let text = e.to_string();
        assert!(text.ends_with(&format!(" + (x{m} * x{m}))", m = n - 1)));
        assert!(text.contains("(x0 * x0) + (x1 * x1)"));
        drop(e);
    }
}
