//! Term handles, numeric values, and arithmetic reduction.

use crate::factory::TermFactory;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Interned handle to a term. Two structurally identical terms built through
/// the same factory always compare equal by handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct TermId(pub(crate) u32);

impl TermId {
    /// Stable unique id of the interned term, usable as a map key.
    pub fn unique_id(self) -> u32 {
        self.0
    }
}

/// The three term shapes. A functor with zero children is distinct from a
/// constant of the same name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum TermKind {
    Constant,
    Variable,
    Functor,
}

/// Typed value of a numeric constant.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum Number {
    Int(i64),
    Float(f64),
}

impl Number {
    pub fn as_f64(self) -> f64 {
        match self {
            Number::Int(i) => i as f64,
            Number::Float(f) => f,
        }
    }

    fn add(self, other: Number) -> Number {
        match (self, other) {
            (Number::Int(a), Number::Int(b)) => match a.checked_add(b) {
                Some(v) => Number::Int(v),
                None => Number::Float(a as f64 + b as f64),
            },
            (a, b) => Number::Float(a.as_f64() + b.as_f64()),
        }
    }

    fn sub(self, other: Number) -> Number {
        match (self, other) {
            (Number::Int(a), Number::Int(b)) => match a.checked_sub(b) {
                Some(v) => Number::Int(v),
                None => Number::Float(a as f64 - b as f64),
            },
            (a, b) => Number::Float(a.as_f64() - b.as_f64()),
        }
    }

    fn mul(self, other: Number) -> Number {
        match (self, other) {
            (Number::Int(a), Number::Int(b)) => match a.checked_mul(b) {
                Some(v) => Number::Int(v),
                None => Number::Float(a as f64 * b as f64),
            },
            (a, b) => Number::Float(a.as_f64() * b.as_f64()),
        }
    }

    /// Division stays integral when exact; division by zero fails.
    fn div(self, other: Number) -> Option<Number> {
        match (self, other) {
            (_, Number::Int(0)) => None,
            (Number::Int(a), Number::Int(b)) => {
                if a % b == 0 {
                    Some(Number::Int(a / b))
                } else {
                    Some(Number::Float(a as f64 / b as f64))
                }
            }
            (a, b) => {
                if b.as_f64() == 0.0 {
                    None
                } else {
                    Some(Number::Float(a.as_f64() / b.as_f64()))
                }
            }
        }
    }

    fn numeric_eq(self, other: Number) -> bool {
        match (self, other) {
            (Number::Int(a), Number::Int(b)) => a == b,
            (a, b) => a.as_f64() == b.as_f64(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ArithOp {
    Add,
    Sub,
    Mul,
    Div,
    NumEq,
    NumNe,
    Lt,
    Gt,
    Le,
    Ge,
    Is,
}

impl ArithOp {
    fn from_name(name: &str) -> Option<ArithOp> {
        match name {
            "+" => Some(ArithOp::Add),
            "-" => Some(ArithOp::Sub),
            "*" => Some(ArithOp::Mul),
            "/" => Some(ArithOp::Div),
            "=:=" => Some(ArithOp::NumEq),
            "=\\=" => Some(ArithOp::NumNe),
            "<" => Some(ArithOp::Lt),
            ">" => Some(ArithOp::Gt),
            "<=" | "=<" => Some(ArithOp::Le),
            ">=" => Some(ArithOp::Ge),
            "is" => Some(ArithOp::Is),
            _ => None,
        }
    }

    fn eval(self, factory: &mut TermFactory, left: TermId, right: TermId) -> Option<TermId> {
        let l = factory.number(left)?;
        let r = factory.number(right)?;
        match self {
            ArithOp::Add => Some(factory.number_constant(l.add(r))),
            ArithOp::Sub => Some(factory.number_constant(l.sub(r))),
            ArithOp::Mul => Some(factory.number_constant(l.mul(r))),
            ArithOp::Div => {
                let n = l.div(r)?;
                Some(factory.number_constant(n))
            }
            ArithOp::NumEq | ArithOp::Is => Some(factory.boolean_constant(l.numeric_eq(r))),
            ArithOp::NumNe => Some(factory.boolean_constant(!l.numeric_eq(r))),
            ArithOp::Lt => Some(factory.boolean_constant(l.as_f64() < r.as_f64())),
            ArithOp::Gt => Some(factory.boolean_constant(l.as_f64() > r.as_f64())),
            ArithOp::Le => Some(factory.boolean_constant(l.as_f64() <= r.as_f64())),
            ArithOp::Ge => Some(factory.boolean_constant(l.as_f64() >= r.as_f64())),
        }
    }
}

/// Reduce recognized arithmetic functors over ground numeric subterms to a
/// numeric or boolean constant.
///
/// Unrecognized functor names pass through with their children reduced.
/// Division by zero, a non-numeric argument to a recognized functor, or an
/// unbound variable under one all fail by returning `None`; callers treat
/// that as the term unifying with nothing.
pub fn resolve_arithmetic_terms(factory: &mut TermFactory, term: TermId) -> Option<TermId> {
    match factory.kind_of(term) {
        TermKind::Constant | TermKind::Variable => Some(term),
        TermKind::Functor => {
            let name = factory.symbol_of(term);
            let args: Vec<TermId> = factory.args_of(term).to_vec();
            let mut reduced = Vec::with_capacity(args.len());
            for arg in args.iter() {
                reduced.push(resolve_arithmetic_terms(factory, *arg)?);
            }

            let op = ArithOp::from_name(factory.symbol_name(name));
            match op {
                Some(op) => {
                    if reduced.len() != 2 {
                        return None;
                    }
                    op.eval(factory, reduced[0], reduced[1])
                }
                None => {
                    if reduced == args {
                        Some(term)
                    } else {
                        Some(factory.functor_from_symbol(name, &reduced))
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn integer_arithmetic_stays_integral() {
        let mut f = TermFactory::new();
        let two = f.int_constant(2);
        let three = f.int_constant(3);
        let sum = f.functor("+", &[two, three]);
        let reduced = resolve_arithmetic_terms(&mut f, sum).expect("reduces");
        assert_eq!(f.number(reduced), Some(Number::Int(5)));

        let six = f.int_constant(6);
        let quotient = f.functor("/", &[six, two]);
        let reduced = resolve_arithmetic_terms(&mut f, quotient).expect("reduces");
        assert_eq!(f.number(reduced), Some(Number::Int(3)));
    }

    #[test]
    fn inexact_division_falls_back_to_float() {
        let mut f = TermFactory::new();
        let seven = f.int_constant(7);
        let two = f.int_constant(2);
        let quotient = f.functor("/", &[seven, two]);
        let reduced = resolve_arithmetic_terms(&mut f, quotient).expect("reduces");
        assert_eq!(f.number(reduced), Some(Number::Float(3.5)));
    }

    #[test]
    fn division_by_zero_fails() {
        let mut f = TermFactory::new();
        let one = f.int_constant(1);
        let zero = f.int_constant(0);
        let quotient = f.functor("/", &[one, zero]);
        assert_eq!(resolve_arithmetic_terms(&mut f, quotient), None);
    }

    #[test]
    fn comparison_reduces_to_boolean() {
        let mut f = TermFactory::new();
        let one = f.int_constant(1);
        let two = f.int_constant(2);
        let lt = f.functor("<", &[one, two]);
        let reduced = resolve_arithmetic_terms(&mut f, lt).expect("reduces");
        assert_eq!(f.name_of(reduced), "true");

        let gt = f.functor(">", &[one, two]);
        let reduced = resolve_arithmetic_terms(&mut f, gt).expect("reduces");
        assert_eq!(f.name_of(reduced), "false");
    }

    #[test]
    fn nested_expressions_reduce_bottom_up() {
        let mut f = TermFactory::new();
        let one = f.int_constant(1);
        let two = f.int_constant(2);
        let three = f.int_constant(3);
        let sum = f.functor("+", &[one, two]);
        let product = f.functor("*", &[sum, three]);
        let reduced = resolve_arithmetic_terms(&mut f, product).expect("reduces");
        assert_eq!(f.number(reduced), Some(Number::Int(9)));
    }

    #[test]
    fn unbound_variable_fails_arithmetic() {
        let mut f = TermFactory::new();
        let x = f.variable("x");
        let one = f.int_constant(1);
        let sum = f.functor("+", &[x, one]);
        assert_eq!(resolve_arithmetic_terms(&mut f, sum), None);
    }

    #[test]
    fn unrecognized_functor_passes_through_with_reduced_children() {
        let mut f = TermFactory::new();
        let one = f.int_constant(1);
        let two = f.int_constant(2);
        let sum = f.functor("+", &[one, two]);
        let wrapped = f.functor("at", &[sum]);
        let reduced = resolve_arithmetic_terms(&mut f, wrapped).expect("reduces");
        assert_eq!(f.name_of(reduced), "at");
        let three = f.int_constant(3);
        assert_eq!(f.args_of(reduced), &[three]);
    }

    #[test]
    fn non_numeric_argument_fails() {
        let mut f = TermFactory::new();
        let a = f.constant("a");
        let one = f.int_constant(1);
        let sum = f.functor("+", &[a, one]);
        assert_eq!(resolve_arithmetic_terms(&mut f, sum), None);
    }
}
