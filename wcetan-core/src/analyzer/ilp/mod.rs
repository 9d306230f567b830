//! In-memory ILP representation.
//!
//! Constraints are built as linear expressions and serialized once, in
//! deterministic order, to the `lp_solve` text format. Building the model
//! in memory instead of by stream concatenation keeps the emitted files
//! diffable between runs.
//!
//! The wire format: an objective line (`max:`/`min:` followed by a linear
//! expression and `;`), one constraint per line with `=`, `<=` or `>=`,
//! domain declarations (`int x;`, `bin x;`), and `//` comments.

pub mod generator;
pub mod solver;

use std::fmt::Write as _;

/// Linear expression: integer-weighted variables plus a constant.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LinearExpr {
    pub terms: Vec<(i64, String)>,
    pub constant: i64,
}

impl LinearExpr {
    pub fn new() -> Self {
        LinearExpr::default()
    }

    pub fn constant(value: i64) -> Self {
        LinearExpr { terms: Vec::new(), constant: value }
    }

    pub fn term(coefficient: i64, variable: impl Into<String>) -> Self {
        LinearExpr { terms: vec![(coefficient, variable.into())], constant: 0 }
    }

    pub fn add_term(&mut self, coefficient: i64, variable: impl Into<String>) -> &mut Self {
        self.terms.push((coefficient, variable.into()));
        self
    }

    pub fn add_constant(&mut self, value: i64) -> &mut Self {
        self.constant += value;
        self
    }

    pub fn is_empty(&self) -> bool {
        self.terms.is_empty() && self.constant == 0
    }

    fn render(&self) -> String {
        let mut out = String::new();
        let mut first = true;
        for (coefficient, variable) in &self.terms {
            if first {
                match *coefficient {
                    1 => write!(out, "{}", variable).unwrap(),
                    -1 => write!(out, "- {}", variable).unwrap(),
                    c => write!(out, "{} {}", c, variable).unwrap(),
                }
                first = false;
            } else {
                match *coefficient {
                    1 => write!(out, " + {}", variable).unwrap(),
                    -1 => write!(out, " - {}", variable).unwrap(),
                    c if c < 0 => write!(out, " - {} {}", -c, variable).unwrap(),
                    c => write!(out, " + {} {}", c, variable).unwrap(),
                }
            }
        }
        if self.constant != 0 || first {
            if first {
                write!(out, "{}", self.constant).unwrap();
            } else if self.constant < 0 {
                write!(out, " - {}", -self.constant).unwrap();
            } else {
                write!(out, " + {}", self.constant).unwrap();
            }
        }
        out
    }
}

/// Comparison operator of a constraint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConstraintOp {
    Eq,
    Le,
    Ge,
}

impl ConstraintOp {
    fn symbol(self) -> &'static str {
        match self {
            ConstraintOp::Eq => "=",
            ConstraintOp::Le => "<=",
            ConstraintOp::Ge => ">=",
        }
    }
}

/// One linear constraint `lhs op rhs`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Constraint {
    pub lhs: LinearExpr,
    pub op: ConstraintOp,
    pub rhs: LinearExpr,
}

impl Constraint {
    pub fn new(lhs: LinearExpr, op: ConstraintOp, rhs: LinearExpr) -> Self {
        Constraint { lhs, op, rhs }
    }

    fn render(&self) -> String {
        format!("{} {} {};", self.lhs.render(), self.op.symbol(), self.rhs.render())
    }
}

/// Objective direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Maximize,
    Minimize,
}

/// A complete problem: objective, commented constraint sections, domains.
#[derive(Debug, Clone)]
pub struct IlpProblem {
    pub direction: Direction,
    pub objective: LinearExpr,
    sections: Vec<(String, Vec<Constraint>)>,
    int_vars: Vec<String>,
    bin_vars: Vec<String>,
}

impl IlpProblem {
    pub fn new(direction: Direction, objective: LinearExpr) -> Self {
        IlpProblem {
            direction,
            objective,
            sections: Vec::new(),
            int_vars: Vec::new(),
            bin_vars: Vec::new(),
        }
    }

    /// Start a commented constraint section; constraints keep their order.
    pub fn add_section(&mut self, comment: impl Into<String>, constraints: Vec<Constraint>) {
        self.sections.push((comment.into(), constraints));
    }

    pub fn declare_int(&mut self, variable: impl Into<String>) {
        let v = variable.into();
        if !self.int_vars.contains(&v) {
            self.int_vars.push(v);
        }
    }

    pub fn declare_bin(&mut self, variable: impl Into<String>) {
        let v = variable.into();
        if !self.bin_vars.contains(&v) {
            self.bin_vars.push(v);
        }
    }

    pub fn constraint_count(&self) -> usize {
        self.sections.iter().map(|(_, c)| c.len()).sum()
    }

    /// Serialize to the `lp_solve` text format.
    pub fn serialize(&self) -> String {
        let mut out = String::new();
        out.push_str("// Objective function:\n");
        match self.direction {
            Direction::Maximize => out.push_str("max: "),
            Direction::Minimize => out.push_str("min: "),
        }
        out.push_str(&self.objective.render());
        out.push_str(";\n");
        for (comment, constraints) in &self.sections {
            out.push('\n');
            out.push_str("// ");
            out.push_str(comment);
            out.push('\n');
            for c in constraints {
                out.push_str(&c.render());
                out.push('\n');
            }
        }
        if !self.int_vars.is_empty() {
            out.push_str("\n// integer domains\n");
            for v in &self.int_vars {
                let _ = writeln!(out, "int {};", v);
            }
        }
        if !self.bin_vars.is_empty() {
            out.push_str("\n// binary domains\n");
            for v in &self.bin_vars {
                let _ = writeln!(out, "bin {};", v);
            }
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_expr_rendering() {
        let mut e = LinearExpr::new();
        e.add_term(3, "f1").add_term(1, "f2").add_term(-2, "f3");
        assert_eq!(e.render(), "3 f1 + f2 - 2 f3");
        assert_eq!(LinearExpr::constant(5).render(), "5");
        assert_eq!(LinearExpr::new().render(), "0");
    }

    #[test]
    fn test_problem_serialization() {
        let mut objective = LinearExpr::new();
        objective.add_term(6, "f1").add_term(4, "f2");
        let mut problem = IlpProblem::new(Direction::Maximize, objective);
        problem.add_section(
            "flow conservation",
            vec![Constraint::new(
                LinearExpr::term(1, "f1"),
                ConstraintOp::Eq,
                LinearExpr::term(1, "f2"),
            )],
        );
        problem.add_section(
            "injection",
            vec![Constraint::new(
                LinearExpr::term(1, "f0"),
                ConstraintOp::Eq,
                LinearExpr::constant(1),
            )],
        );
        problem.declare_int("f0");
        problem.declare_int("f1");
        let text = problem.serialize();
        assert!(text.starts_with("// Objective function:\nmax: 6 f1 + 4 f2;\n"));
        assert!(text.contains("\n// flow conservation\nf1 = f2;\n"));
        assert!(text.contains("f0 = 1;"));
        assert!(text.contains("int f0;\nint f1;\n"));
    }
}
