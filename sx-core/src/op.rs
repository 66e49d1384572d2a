//! The closed opcode tag set shared by every evaluation sweep.
//!
//! An [`OpCode`] carries a fixed arity and fixed numeric semantics that are shared between
//! double-precision, symbolic, and bit-pattern evaluation (`spec.md` §3 "Opcodes"). Arity and
//! derivative rules are table-driven rather than expressed through a class hierarchy, per the
//! arena-of-indices design in `spec.md` §9.

use num_derive::{FromPrimitive, ToPrimitive};

// OPCODE
// ================================================================================================

/// A single operation tag. `Input`, `Output`, `Const`, `Parameter`, and `Call` are structural;
/// `OutputExtract` is a compile-time pseudo-op that is never emitted into an [`crate::AlgEl`]
/// stream. Everything else is a unary or binary arithmetic/comparison op with shared numeric
/// semantics across all dispatch sweeps.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, FromPrimitive, ToPrimitive)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum OpCode {
    Input,
    Output,
    Const,
    Parameter,
    Call,
    /// Internal only; mutates the parent `CALL`'s `out[]` during emission and is never part of
    /// the emitted instruction stream (`spec.md` invariant 5).
    OutputExtract,

    // Unary
    Neg,
    Sqrt,
    Sq,
    Sin,
    Cos,
    Tan,
    Asin,
    Acos,
    Atan,
    Exp,
    Log,
    Fabs,
    Sign,
    Floor,
    Ceil,
    Not,

    // Binary
    Add,
    Sub,
    Mul,
    Div,
    Pow,
    Fmin,
    Fmax,
    Eq,
    Ne,
    Lt,
    Le,
    And,
    Or,
    /// `IfElseZero(cond, val) = if cond != 0 { val } else { 0 }`.
    IfElseZero,
    Atan2,
}

impl OpCode {
    /// Number of operands this op reads: 0 for structural ops (besides `Call`, whose
    /// dependencies live in the call-table entry, not in `i1`/`i2`), 1 for unary, 2 for binary.
    pub const fn arity(self) -> usize {
        use OpCode::*;
        match self {
            Input | Output | Const | Parameter | Call | OutputExtract => 0,
            Neg | Sqrt | Sq | Sin | Cos | Tan | Asin | Acos | Atan | Exp | Log | Fabs | Sign
            | Floor | Ceil | Not => 1,
            Add | Sub | Mul | Div | Pow | Fmin | Fmax | Eq | Ne | Lt | Le | And | Or
            | IfElseZero | Atan2 => 2,
        }
    }

    /// True for ops handled by a dedicated branch in the emitter/dispatch loop rather than the
    /// generic unary/binary table entry.
    pub const fn is_structural(self) -> bool {
        matches!(
            self,
            OpCode::Input
                | OpCode::Output
                | OpCode::Const
                | OpCode::Parameter
                | OpCode::Call
                | OpCode::OutputExtract
        )
    }

    /// Non-smooth ops: `is_smooth()` (`spec.md` §6) is false iff any instruction uses one of
    /// these.
    pub const fn is_smooth(self) -> bool {
        !matches!(
            self,
            OpCode::Fabs
                | OpCode::Sign
                | OpCode::Floor
                | OpCode::Ceil
                | OpCode::Fmin
                | OpCode::Fmax
                | OpCode::IfElseZero
                | OpCode::Eq
                | OpCode::Ne
                | OpCode::Lt
                | OpCode::Le
                | OpCode::And
                | OpCode::Or
                | OpCode::Not
        )
    }

    /// Double-precision numeric semantics, shared by the double and symbolic-constant-folding
    /// paths. Only meaningful for non-structural ops.
    pub fn eval_f64(self, x: f64, y: f64) -> f64 {
        use OpCode::*;
        match self {
            Neg => -x,
            Sqrt => x.sqrt(),
            Sq => x * x,
            Sin => x.sin(),
            Cos => x.cos(),
            Tan => x.tan(),
            Asin => x.asin(),
            Acos => x.acos(),
            Atan => x.atan(),
            Exp => x.exp(),
            Log => x.ln(),
            Fabs => x.abs(),
            Sign => {
                if x > 0.0 {
                    1.0
                } else if x < 0.0 {
                    -1.0
                } else {
                    0.0
                }
            },
            Floor => x.floor(),
            Ceil => x.ceil(),
            Not => bool_to_f64(x == 0.0),
            Add => x + y,
            Sub => x - y,
            Mul => x * y,
            Div => x / y,
            Pow => x.powf(y),
            Fmin => x.min(y),
            Fmax => x.max(y),
            Eq => bool_to_f64(x == y),
            Ne => bool_to_f64(x != y),
            Lt => bool_to_f64(x < y),
            Le => bool_to_f64(x <= y),
            And => bool_to_f64(x != 0.0 && y != 0.0),
            Or => bool_to_f64(x != 0.0 || y != 0.0),
            IfElseZero => {
                if x != 0.0 {
                    y
                } else {
                    0.0
                }
            },
            Atan2 => x.atan2(y),
            Input | Output | Const | Parameter | Call | OutputExtract => {
                unreachable!("eval_f64 called on structural opcode {self:?}")
            },
        }
    }

    /// Local partial derivatives `(d/dx, d/dy)` evaluated at `(x, y)`, used by the tape builder
    /// (`spec.md` §4.6-4.7). `d1` is unused for unary ops.
    pub fn derivative(self, x: f64, y: f64) -> (f64, f64) {
        use OpCode::*;
        match self {
            Neg => (-1.0, 0.0),
            Sqrt => (0.5 / x.sqrt(), 0.0),
            Sq => (2.0 * x, 0.0),
            Sin => (x.cos(), 0.0),
            Cos => (-x.sin(), 0.0),
            Tan => {
                let c = x.cos();
                (1.0 / (c * c), 0.0)
            },
            Asin => (1.0 / (1.0 - x * x).sqrt(), 0.0),
            Acos => (-1.0 / (1.0 - x * x).sqrt(), 0.0),
            Atan => (1.0 / (1.0 + x * x), 0.0),
            Exp => (x.exp(), 0.0),
            Log => (1.0 / x, 0.0),
            Fabs => (x.signum(), 0.0),
            Sign | Floor | Ceil | Not | Eq | Ne | Lt | Le | And | Or => (0.0, 0.0),
            Add => (1.0, 1.0),
            Sub => (1.0, -1.0),
            Mul => (y, x),
            Div => (1.0 / y, -x / (y * y)),
            Pow => (y * x.powf(y - 1.0), x.powf(y) * x.ln()),
            Fmin => {
                if x <= y {
                    (1.0, 0.0)
                } else {
                    (0.0, 1.0)
                }
            },
            Fmax => {
                if x >= y {
                    (1.0, 0.0)
                } else {
                    (0.0, 1.0)
                }
            },
            IfElseZero => (0.0, bool_to_f64(x != 0.0)),
            Atan2 => {
                let denom = x * x + y * y;
                (y / denom, -x / denom)
            },
            Input | Output | Const | Parameter | Call | OutputExtract => {
                unreachable!("derivative called on structural opcode {self:?}")
            },
        }
    }

    /// Render the op as an infix/prefix expression in matrix-language target syntax
    /// (`spec.md` §4.9). `a`/`b` are already-rendered operand strings.
    pub fn render_matlab(self, a: &str, b: &str) -> String {
        use OpCode::*;
        match self {
            Neg => format!("(-{a})"),
            Sqrt => format!("sqrt({a})"),
            Sq => format!("({a}.^2)"),
            Sin => format!("sin({a})"),
            Cos => format!("cos({a})"),
            Tan => format!("tan({a})"),
            Asin => format!("asin({a})"),
            Acos => format!("acos({a})"),
            Atan => format!("atan({a})"),
            Exp => format!("exp({a})"),
            Log => format!("log({a})"),
            Fabs => format!("abs({a})"),
            Sign => format!("sign({a})"),
            Floor => format!("floor({a})"),
            Ceil => format!("ceil({a})"),
            Not => format!("(~{a})"),
            Add => format!("({a}+{b})"),
            Sub => format!("({a}-{b})"),
            Mul => format!("({a}.*{b})"),
            Div => format!("({a}./{b})"),
            Pow => format!("({a}.^{b})"),
            Fmin => format!("min({a},{b})"),
            Fmax => format!("max({a},{b})"),
            Eq => format!("({a}=={b})"),
            Ne => format!("({a}~={b})"),
            Lt => format!("({a}<{b})"),
            Le => format!("({a}<={b})"),
            And => format!("({a}&{b})"),
            Or => format!("({a}|{b})"),
            IfElseZero => format!("if_else_zero_gen({a},{b})"),
            Atan2 => format!("atan2({a},{b})"),
            Input | Output | Const | Parameter | Call | OutputExtract => {
                unreachable!("render_matlab called on structural opcode {self:?}")
            },
        }
    }

    /// Render the op in C-like target syntax.
    pub fn render_c(self, a: &str, b: &str) -> String {
        use OpCode::*;
        match self {
            Neg => format!("(-{a})"),
            Sqrt => format!("sqrt({a})"),
            Sq => format!("({a}*{a})"),
            Sin => format!("sin({a})"),
            Cos => format!("cos({a})"),
            Tan => format!("tan({a})"),
            Asin => format!("asin({a})"),
            Acos => format!("acos({a})"),
            Atan => format!("atan({a})"),
            Exp => format!("exp({a})"),
            Log => format!("log({a})"),
            Fabs => format!("fabs({a})"),
            Sign => format!("(({a}>0)-({a}<0))"),
            Floor => format!("floor({a})"),
            Ceil => format!("ceil({a})"),
            Not => format!("(!{a})"),
            Add => format!("({a}+{b})"),
            Sub => format!("({a}-{b})"),
            Mul => format!("({a}*{b})"),
            Div => format!("({a}/{b})"),
            Pow => format!("pow({a},{b})"),
            Fmin => format!("fmin({a},{b})"),
            Fmax => format!("fmax({a},{b})"),
            Eq => format!("({a}=={b})"),
            Ne => format!("({a}!={b})"),
            Lt => format!("({a}<{b})"),
            Le => format!("({a}<={b})"),
            And => format!("({a}&&{b})"),
            Or => format!("({a}||{b})"),
            IfElseZero => format!("(({a}!=0)?{b}:0)"),
            Atan2 => format!("atan2({a},{b})"),
            Input | Output | Const | Parameter | Call | OutputExtract => {
                unreachable!("render_c called on structural opcode {self:?}")
            },
        }
    }
}

fn bool_to_f64(b: bool) -> f64 {
    if b {
        1.0
    } else {
        0.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unary_arity_is_one() {
        assert_eq!(OpCode::Sin.arity(), 1);
        assert_eq!(OpCode::Neg.arity(), 1);
    }

    #[test]
    fn binary_arity_is_two() {
        assert_eq!(OpCode::Add.arity(), 2);
        assert_eq!(OpCode::Pow.arity(), 2);
    }

    #[test]
    fn non_smooth_ops_are_flagged() {
        assert!(!OpCode::Fabs.is_smooth());
        assert!(!OpCode::IfElseZero.is_smooth());
        assert!(OpCode::Sin.is_smooth());
        assert!(OpCode::Mul.is_smooth());
    }

    #[test]
    fn add_derivative_is_unit() {
        assert_eq!(OpCode::Add.derivative(3.0, 4.0), (1.0, 1.0));
    }

    #[test]
    fn mul_derivative_is_swapped_operands() {
        assert_eq!(OpCode::Mul.derivative(3.0, 4.0), (4.0, 3.0));
    }
}
