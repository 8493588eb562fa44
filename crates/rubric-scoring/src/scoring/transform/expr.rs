use crate::scoring::domain::ItemBounds;
use crate::scoring::reversal::reverse;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArithOp {
    Add,
    Sub,
    Mul,
    Div,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompareOp {
    Less,
    LessEqual,
    Greater,
    GreaterEqual,
    Equal,
    NotEqual,
}

impl CompareOp {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "<" => Some(Self::Less),
            "<=" => Some(Self::LessEqual),
            ">" => Some(Self::Greater),
            ">=" => Some(Self::GreaterEqual),
            "==" => Some(Self::Equal),
            "!=" => Some(Self::NotEqual),
            _ => None,
        }
    }

    fn holds(self, lhs: f64, rhs: f64) -> bool {
        match self {
            Self::Less => lhs < rhs,
            Self::LessEqual => lhs <= rhs,
            Self::Greater => lhs > rhs,
            Self::GreaterEqual => lhs >= rhs,
            Self::Equal => lhs == rhs,
            Self::NotEqual => lhs != rhs,
        }
    }
}

/// Arithmetic over the item value.
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Value,
    Number(f64),
    Negate(Box<Expr>),
    Binary {
        op: ArithOp,
        lhs: Box<Expr>,
        rhs: Box<Expr>,
    },
    /// `reverse(e)`, bound to the item's own min/max.
    Reverse(Box<Expr>),
}

impl Expr {
    /// Evaluates against one value. Yields NaN when reversal has no bounds.
    pub fn eval(&self, value: f64, bounds: Option<ItemBounds>) -> f64 {
        match self {
            Expr::Value => value,
            Expr::Number(number) => *number,
            Expr::Negate(inner) => -inner.eval(value, bounds),
            Expr::Binary { op, lhs, rhs } => {
                let lhs = lhs.eval(value, bounds);
                let rhs = rhs.eval(value, bounds);
                match op {
                    ArithOp::Add => lhs + rhs,
                    ArithOp::Sub => lhs - rhs,
                    ArithOp::Mul => lhs * rhs,
                    ArithOp::Div => lhs / rhs,
                }
            }
            Expr::Reverse(inner) => match bounds {
                Some(bounds) => reverse(inner.eval(value, Some(bounds)), bounds),
                None => f64::NAN,
            },
        }
    }

    pub fn uses_reverse(&self) -> bool {
        match self {
            Expr::Value | Expr::Number(_) => false,
            Expr::Negate(inner) => inner.uses_reverse(),
            Expr::Binary { lhs, rhs, .. } => lhs.uses_reverse() || rhs.uses_reverse(),
            Expr::Reverse(_) => true,
        }
    }
}

/// Boolean guard over the item value.
#[derive(Debug, Clone, PartialEq)]
pub enum Predicate {
    Compare { lhs: Expr, op: CompareOp, rhs: Expr },
    And(Box<Predicate>, Box<Predicate>),
    Or(Box<Predicate>, Box<Predicate>),
    Not(Box<Predicate>),
}

impl Predicate {
    pub fn eval(&self, value: f64, bounds: Option<ItemBounds>) -> bool {
        match self {
            Predicate::Compare { lhs, op, rhs } => {
                op.holds(lhs.eval(value, bounds), rhs.eval(value, bounds))
            }
            Predicate::And(lhs, rhs) => lhs.eval(value, bounds) && rhs.eval(value, bounds),
            Predicate::Or(lhs, rhs) => lhs.eval(value, bounds) || rhs.eval(value, bounds),
            Predicate::Not(inner) => !inner.eval(value, bounds),
        }
    }

    pub fn uses_reverse(&self) -> bool {
        match self {
            Predicate::Compare { lhs, rhs, .. } => lhs.uses_reverse() || rhs.uses_reverse(),
            Predicate::And(lhs, rhs) | Predicate::Or(lhs, rhs) => {
                lhs.uses_reverse() || rhs.uses_reverse()
            }
            Predicate::Not(inner) => inner.uses_reverse(),
        }
    }
}
