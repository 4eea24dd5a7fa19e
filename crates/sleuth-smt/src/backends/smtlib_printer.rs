use crate::terms::{SmtSort, SmtTerm};

/// Print an SmtTerm in SMT-LIB2 syntax.
pub fn to_smtlib(term: &SmtTerm) -> String {
    match term {
        SmtTerm::Var(name) => name.clone(),
        SmtTerm::IntLit(n) if *n < 0 => format!("(- {})", n.unsigned_abs()),
        SmtTerm::IntLit(n) => n.to_string(),
        SmtTerm::BoolLit(b) => b.to_string(),
        SmtTerm::Eq(lhs, rhs) => format!("(= {} {})", to_smtlib(lhs), to_smtlib(rhs)),
        SmtTerm::Lt(lhs, rhs) => format!("(< {} {})", to_smtlib(lhs), to_smtlib(rhs)),
        SmtTerm::Le(lhs, rhs) => format!("(<= {} {})", to_smtlib(lhs), to_smtlib(rhs)),
        SmtTerm::And(terms) => nary("and", "true", terms),
        SmtTerm::Or(terms) => nary("or", "false", terms),
        SmtTerm::Not(inner) => format!("(not {})", to_smtlib(inner)),
    }
}

fn nary(op: &str, unit: &str, terms: &[SmtTerm]) -> String {
    match terms {
        [] => unit.to_string(),
        [single] => to_smtlib(single),
        _ => {
            let inner: Vec<String> = terms.iter().map(to_smtlib).collect();
            format!("({op} {})", inner.join(" "))
        }
    }
}

/// Render a standalone QF_LIA script: declarations, assertions, `check-sat`.
pub fn script<'a>(
    declarations: impl IntoIterator<Item = (&'a str, SmtSort)>,
    assertions: impl IntoIterator<Item = &'a SmtTerm>,
) -> String {
    let mut out = String::from("(set-logic QF_LIA)\n");
    for (name, sort) in declarations {
        out.push_str(&format!("(declare-const {name} {sort})\n"));
    }
    for term in assertions {
        out.push_str(&format!("(assert {})\n", to_smtlib(term)));
    }
    out.push_str("(check-sat)\n");
    out
}
