//! Expression tree and its serializer.
//!
//! Every driver text is rendered from an `ExprNode`; length checks run on the
//! rendered text. Numbers are printed with a fixed number of decimals and then
//! trimmed of trailing zeros and a trailing decimal point.

/// `%.{decimals}f` trimmed; negative zero prints as `0`.
pub fn format_number(x: f64, decimals: usize) -> String {
    let mut s = format!("{:.*}", decimals, x);
    if s.contains('.') {
        while s.ends_with('0') {
            s.pop();
        }
        if s.ends_with('.') {
            s.pop();
        }
    }
    if s == "-0" {
        s = "0".to_string();
    }
    s
}

/// `factor*var`, with unit factors folded into the sign. Zero renders as `0`.
pub fn format_coefficient(factor: f64, var: &str, decimals: usize) -> String {
    match format_number(factor, decimals).as_str() {
        "0" => "0".to_string(),
        "1" => var.to_string(),
        "-1" => format!("-{var}"),
        c => format!("{c}*{var}"),
    }
}

fn join_signed(parts: impl IntoIterator<Item = String>) -> String {
    let mut out = String::new();
    for part in parts {
        if !out.is_empty() && !part.starts_with('-') {
            out.push('+');
        }
        out.push_str(&part);
    }
    out
}

/// True when `head` ends in the mantissa and `e` of a numeric literal such as
/// `1e` or `2.5E`, so a following sign belongs to the exponent.
pub(crate) fn in_exponent(head: &str) -> bool {
    let Some(head) = head.strip_suffix(|c: char| c == 'e' || c == 'E') else {
        return false;
    };
    let before = head.trim_end_matches(|c: char| c.is_ascii_digit() || c == '.');
    let mantissa = &head[before.len()..];
    mantissa.chars().any(|c| c.is_ascii_digit())
        && !before.ends_with(|c: char| c.is_ascii_alphanumeric() || c == '_')
}

/// True when `text` is a sum or difference at its outermost level.
pub fn has_top_level_sum(text: &str) -> bool {
    let mut depth = 0i32;
    let mut prev: Option<char> = None;
    for (i, c) in text.char_indices() {
        match c {
            '(' => depth += 1,
            ')' => depth -= 1,
            '+' | '-' if depth == 0 && in_exponent(&text[..i]) => {}
            '+' | '-' if depth == 0 => {
                if matches!(prev, Some(p) if p != '*' && p != '/' && p != '<' && p != '>') {
                    return true;
                }
            }
            ' ' => continue,
            _ => {}
        }
        prev = Some(c);
    }
    false
}

/// Split `M*K*(inner)` into (`M*K*`, `inner`) when the parenthesis opened after
/// the multiplier prefix closes at the very end of the text.
pub fn split_wrapper(text: &str) -> Option<(&str, &str)> {
    let open = text.find('(')?;
    let prefix = &text[..open];
    let factors = prefix.strip_suffix('*')?;
    if factors.is_empty()
        || !factors
            .split('*')
            .all(|f| !f.is_empty() && f.chars().all(|c| c.is_ascii_alphanumeric() || c == '_'))
        || factors.starts_with(|c: char| c.is_ascii_digit())
    {
        return None;
    }
    let mut depth = 0i32;
    for (i, c) in text[open..].char_indices() {
        match c {
            '(' => depth += 1,
            ')' => {
                depth -= 1;
                if depth == 0 {
                    return (open + i == text.len() - 1)
                        .then(|| (prefix, &text[open + 1..text.len() - 1]));
                }
            }
            _ => {}
        }
    }
    None
}

/// Append `+name` to existing text, keeping it inside an outer multiplier wrapper.
pub fn append_term(text: &str, name: &str) -> String {
    if text.is_empty() || text == "0" {
        return name.to_string();
    }
    match split_wrapper(text) {
        Some((prefix, inner)) => format!("{prefix}({})", append_term(inner, name)),
        None => format!("{text}+{name}"),
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct LinearTerm {
    pub var: String,
    pub factor: f64,
}

impl LinearTerm {
    pub fn new(var: impl Into<String>, factor: f64) -> Self {
        Self {
            var: var.into(),
            factor,
        }
    }
}

/// `slope*var+intercept` while `var` is below `bound`.
#[derive(Debug, Clone, PartialEq)]
pub struct Segment {
    pub slope: f64,
    pub intercept: f64,
    pub bound: f64,
}

/// Conditional chain over one variable. `descending` flips the comparison for
/// variables that grow against the curve's input.
#[derive(Debug, Clone, PartialEq)]
pub struct Piecewise {
    pub var: String,
    pub descending: bool,
    pub head: f64,
    pub head_bound: f64,
    pub segments: Vec<Segment>,
    pub tail: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ExprNode {
    Constant(f64),
    Linear(Vec<LinearTerm>),
    Piecewise(Piecewise),
    /// `min(1,max(0,e))`
    Clamped(Box<ExprNode>),
    Product(Vec<ExprNode>),
    Sum(Vec<ExprNode>),
    Ratio {
        numerator: Box<ExprNode>,
        denominator: String,
    },
    /// Text carried over verbatim from an existing driver.
    Opaque(String),
    /// `inner+rest`, appended inside an outer multiplier wrapper if `inner` has one.
    Chain {
        inner: Box<ExprNode>,
        rest: String,
    },
    /// `M*K*(inner)`
    Wrapped {
        multipliers: Vec<String>,
        inner: Box<ExprNode>,
    },
}

impl ExprNode {
    pub fn linear(terms: Vec<LinearTerm>) -> Self {
        ExprNode::Linear(terms)
    }

    pub fn chain(inner: ExprNode, rest: Option<String>) -> Self {
        match rest {
            Some(rest) => ExprNode::Chain {
                inner: Box::new(inner),
                rest,
            },
            None => inner,
        }
    }

    pub fn wrapped(multipliers: Vec<String>, inner: ExprNode) -> Self {
        if multipliers.is_empty() {
            inner
        } else {
            ExprNode::Wrapped {
                multipliers,
                inner: Box::new(inner),
            }
        }
    }

    pub fn is_empty(&self, decimals: usize) -> bool {
        match self {
            ExprNode::Linear(terms) => terms
                .iter()
                .all(|t| format_number(t.factor, decimals) == "0"),
            ExprNode::Sum(children) | ExprNode::Product(children) => {
                children.iter().all(|c| c.is_empty(decimals))
            }
            ExprNode::Opaque(text) => text.is_empty(),
            _ => false,
        }
    }

    pub fn render(&self, decimals: usize) -> String {
        match self {
            ExprNode::Constant(x) => format_number(*x, decimals),
            ExprNode::Linear(terms) => {
                let text = join_signed(
                    terms
                        .iter()
                        .map(|t| format_coefficient(t.factor, &t.var, decimals))
                        .filter(|s| s != "0"),
                );
                if text.is_empty() {
                    "0".to_string()
                } else {
                    text
                }
            }
            ExprNode::Piecewise(p) => render_piecewise(p, decimals),
            ExprNode::Clamped(inner) => format!("min(1,max(0,{}))", inner.render(decimals)),
            ExprNode::Product(children) => children
                .iter()
                .map(|c| parenthesized(c.render(decimals)))
                .collect::<Vec<_>>()
                .join("*"),
            ExprNode::Sum(children) => {
                let text = join_signed(
                    children
                        .iter()
                        .filter(|c| !c.is_empty(decimals))
                        .map(|c| c.render(decimals)),
                );
                if text.is_empty() {
                    "0".to_string()
                } else {
                    text
                }
            }
            ExprNode::Ratio {
                numerator,
                denominator,
            } => format!("{}/{denominator}", parenthesized(numerator.render(decimals))),
            ExprNode::Opaque(text) => text.clone(),
            ExprNode::Chain { inner, rest } => match inner.as_ref() {
                ExprNode::Opaque(text) => append_term(text, rest),
                other if other.is_empty(decimals) => rest.clone(),
                other => format!("{}+{rest}", other.render(decimals)),
            },
            ExprNode::Wrapped { multipliers, inner } => {
                let mut out = String::new();
                for m in multipliers {
                    out.push_str(m);
                    out.push('*');
                }
                out.push('(');
                out.push_str(&inner.render(decimals));
                out.push(')');
                out
            }
        }
    }
}

fn parenthesized(text: String) -> String {
    if has_top_level_sum(&text) {
        format!("({text})")
    } else {
        text
    }
}

fn render_piecewise(p: &Piecewise, decimals: usize) -> String {
    let op = if p.descending { '>' } else { '<' };
    let var = &p.var;
    let mut out = format!(
        "({} if {var}{op}{}",
        format_number(p.head, decimals),
        format_number(p.head_bound, decimals)
    );
    for seg in &p.segments {
        let slope = format_coefficient(seg.slope, var, decimals);
        let intercept = format_number(seg.intercept, decimals);
        let line = match (slope.as_str(), intercept.as_str()) {
            ("0", z) => z.to_string(),
            (s, "0") => s.to_string(),
            (s, z) => join_signed([s.to_string(), z.to_string()]),
        };
        out.push_str(&format!(
            " else {line} if {var}{op}{}",
            format_number(seg.bound, decimals)
        ));
    }
    out.push_str(&format!(" else {})", format_number(p.tail, decimals)));
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn numbers_are_trimmed() {
        assert_eq!(format_number(2.0, 3), "2");
        assert_eq!(format_number(0.25, 3), "0.25");
        assert_eq!(format_number(-1.5, 3), "-1.5");
        assert_eq!(format_number(-0.0001, 3), "0");
        assert_eq!(format_number(12.3456, 3), "12.346");
        assert_eq!(format_number(100.0, 3), "100");
    }

    #[test]
    fn coefficients_fold_unit_factors() {
        assert_eq!(format_coefficient(1.0, "a", 3), "a");
        assert_eq!(format_coefficient(-1.0, "a", 3), "-a");
        assert_eq!(format_coefficient(0.5, "a", 3), "0.5*a");
        assert_eq!(format_coefficient(0.0002, "a", 3), "0");
    }

    #[test]
    fn linear_joins_signs() {
        let node = ExprNode::linear(vec![
            LinearTerm::new("a", 1.0),
            LinearTerm::new("b", -2.0),
            LinearTerm::new("c", 0.5),
        ]);
        assert_eq!(node.render(3), "a-2*b+0.5*c");
        assert_eq!(ExprNode::linear(vec![]).render(3), "0");
    }

    #[test]
    fn wrapped_chain_appends_inside_parentheses() {
        let node = ExprNode::wrapped(
            vec!["M".into(), "K".into()],
            ExprNode::chain(
                ExprNode::linear(vec![LinearTerm::new("a", 2.0)]),
                Some("R".into()),
            ),
        );
        assert_eq!(node.render(3), "M*K*(2*a+R)");

        let opaque = ExprNode::chain(ExprNode::Opaque("M*(a+b)".into()), Some("R".into()));
        assert_eq!(opaque.render(3), "M*(a+b+R)");

        let plain = ExprNode::chain(ExprNode::Opaque("(a+b)*c".into()), Some("R".into()));
        assert_eq!(plain.render(3), "(a+b)*c+R");
    }

    #[test]
    fn wrapper_split_requires_outer_paren() {
        assert_eq!(split_wrapper("M*(a+b)"), Some(("M*", "a+b")));
        assert_eq!(split_wrapper("M*K*(a)"), Some(("M*K*", "a")));
        assert_eq!(split_wrapper("M*(a)+(b)"), None);
        assert_eq!(split_wrapper("2*(a)"), None);
        assert_eq!(split_wrapper("min(1,a)"), None);
    }

    #[test]
    fn piecewise_renders_conditional_chain() {
        let p = Piecewise {
            var: "a".into(),
            descending: false,
            head: 0.0,
            head_bound: 0.0,
            segments: vec![
                Segment {
                    slope: 2.0,
                    intercept: 0.0,
                    bound: 0.5,
                },
                Segment {
                    slope: 0.0,
                    intercept: 1.0,
                    bound: 1.0,
                },
            ],
            tail: 1.0,
        };
        assert_eq!(
            ExprNode::Piecewise(p).render(3),
            "(0 if a<0 else 2*a if a<0.5 else 1 if a<1 else 1)"
        );
    }

    #[test]
    fn ratio_and_clamp() {
        let num = ExprNode::Sum(vec![
            ExprNode::Constant(1.0),
            ExprNode::linear(vec![LinearTerm::new("x", 1.0)]),
        ]);
        let ratio = ExprNode::Ratio {
            numerator: Box::new(num),
            denominator: "p".into(),
        };
        assert_eq!(ratio.render(3), "(1+x)/p");

        let prod = ExprNode::Product(vec![
            ExprNode::Clamped(Box::new(ExprNode::linear(vec![LinearTerm::new("a", 0.5)]))),
            ExprNode::Clamped(Box::new(ExprNode::linear(vec![LinearTerm::new("b", -1.0)]))),
        ]);
        assert_eq!(prod.render(3), "min(1,max(0,0.5*a))*min(1,max(0,-b))");
    }

    #[test]
    fn top_level_sum_detection() {
        assert!(has_top_level_sum("a+b"));
        assert!(!has_top_level_sum("-a"));
        assert!(!has_top_level_sum("(a+b)"));
        assert!(!has_top_level_sum("2*-a"));
        assert!(!has_top_level_sum("1e-05*a"));
        assert!(has_top_level_sum("2.5E+02*a-b"));
        assert!(has_top_level_sum("ae-b"));
        assert!(has_top_level_sum("x1e-b"));
    }
}
