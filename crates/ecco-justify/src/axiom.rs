//! Axioms as functional-syntax terms.
//!
//! The reasoning layer treats axioms as opaque values. All this module
//! guarantees is a stable canonical rendering (used for equality, ordering and
//! hashing) and enough structure to measure how deeply an axiom nests.
//!
//! Grammar (whitespace separates arguments):
//!
//! ```text
//! term   := quoted | name | name "(" term* ")"
//! quoted := '"' chars '"' suffix?          e.g. "42"^^xsd:integer, "cat"@en
//! name   := any run of chars except whitespace, '(', ')' and '"'
//! ```

use std::cmp::Ordering;
use std::collections::BTreeSet;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::str::FromStr;
use std::sync::Arc;

use nom::{
    branch::alt,
    bytes::complete::{escaped, take_while, take_while1},
    character::complete::{char, multispace0, none_of, one_of},
    combinator::{all_consuming, map, opt, recognize},
    multi::many0,
    sequence::{delimited, pair, preceded, terminated},
    IResult,
};
use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// Axiom heads that carry no logical content.
const NON_LOGICAL_HEADS: &[&str] = &[
    "Declaration",
    "AnnotationAssertion",
    "SubAnnotationPropertyOf",
    "AnnotationPropertyDomain",
    "AnnotationPropertyRange",
    "Import",
];

// ============================================================================
// Terms
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Term {
    Atom(String),
    Compound { head: String, args: Vec<Term> },
}

impl Term {
    pub fn as_atom(&self) -> Option<&str> {
        match self {
            Term::Atom(name) => Some(name),
            Term::Compound { .. } => None,
        }
    }

    pub fn head(&self) -> Option<&str> {
        match self {
            Term::Atom(_) => None,
            Term::Compound { head, .. } => Some(head),
        }
    }

    pub fn args(&self) -> &[Term] {
        match self {
            Term::Atom(_) => &[],
            Term::Compound { args, .. } => args,
        }
    }

    /// Number of distinct argument terms below this one, at every depth.
    /// A sub-expression that occurs several times counts once.
    pub fn subterm_count(&self) -> usize {
        let mut seen = BTreeSet::new();
        self.collect_subterms(&mut seen);
        seen.len()
    }

    fn collect_subterms<'t>(&'t self, seen: &mut BTreeSet<&'t Term>) {
        for arg in self.args() {
            if seen.insert(arg) {
                arg.collect_subterms(seen);
            }
        }
    }
}

impl fmt::Display for Term {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Term::Atom(name) => f.write_str(name),
            Term::Compound { head, args } => {
                write!(f, "{head}(")?;
                for (i, arg) in args.iter().enumerate() {
                    if i > 0 {
                        f.write_str(" ")?;
                    }
                    write!(f, "{arg}")?;
                }
                f.write_str(")")
            }
        }
    }
}

// ============================================================================
// Parser
// ============================================================================

fn is_name_char(c: char) -> bool {
    !c.is_whitespace() && c != '(' && c != ')' && c != '"'
}

fn quoted(input: &str) -> IResult<&str, &str> {
    recognize(pair(
        delimited(
            char('"'),
            opt(escaped(none_of("\\\""), '\\', one_of("\\\"nt"))),
            char('"'),
        ),
        take_while(is_name_char),
    ))(input)
}

fn named(input: &str) -> IResult<&str, Term> {
    let (input, name) = take_while1(is_name_char)(input)?;
    let (input, open) = opt(char('('))(input)?;
    if open.is_none() {
        return Ok((input, Term::Atom(name.to_string())));
    }
    let (input, args) = term_list(input)?;
    let (input, _) = char(')')(input)?;
    Ok((
        input,
        Term::Compound {
            head: name.to_string(),
            args,
        },
    ))
}

pub(crate) fn term(input: &str) -> IResult<&str, Term> {
    alt((map(quoted, |s: &str| Term::Atom(s.to_string())), named))(input)
}

/// Whitespace-separated terms, consuming trailing whitespace.
pub(crate) fn term_list(input: &str) -> IResult<&str, Vec<Term>> {
    terminated(many0(preceded(multispace0, term)), multispace0)(input)
}

pub(crate) fn syntax_error(source: &str, err: nom::Err<nom::error::Error<&str>>) -> AxiomParseError {
    let rest = match err {
        nom::Err::Error(e) | nom::Err::Failure(e) => e.input,
        nom::Err::Incomplete(_) => "",
    };
    AxiomParseError::Syntax {
        offset: source.len() - rest.len(),
        near: rest.chars().take(32).collect(),
    }
}

/// Parse a single term, rejecting trailing input.
pub fn parse_term(source: &str) -> Result<Term, AxiomParseError> {
    all_consuming(delimited(multispace0, term, multispace0))(source)
        .map(|(_, t)| t)
        .map_err(|e| syntax_error(source, e))
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AxiomParseError {
    #[error("syntax error at offset {offset} near {near:?}")]
    Syntax { offset: usize, near: String },
    #[error("expected a constructor application, found atom {0:?}")]
    NotCompound(String),
}

// ============================================================================
// Axiom
// ============================================================================

/// An immutable logical statement, compared by its canonical rendering.
#[derive(Clone)]
pub struct Axiom {
    text: Arc<str>,
    term: Arc<Term>,
}

impl Axiom {
    pub fn parse(source: &str) -> Result<Self, AxiomParseError> {
        Self::from_term(parse_term(source)?)
    }

    pub fn from_term(term: Term) -> Result<Self, AxiomParseError> {
        match term {
            Term::Atom(name) => Err(AxiomParseError::NotCompound(name)),
            Term::Compound { head, args } => Ok(Self::compound(&head, args)),
        }
    }

    /// Build `head(args...)` without going through text.
    pub fn compound(head: &str, args: Vec<Term>) -> Self {
        let term = Term::Compound {
            head: head.to_string(),
            args,
        };
        Self {
            text: term.to_string().into(),
            term: Arc::new(term),
        }
    }

    pub fn term(&self) -> &Term {
        &self.term
    }

    pub fn head(&self) -> &str {
        self.term.head().unwrap_or_default()
    }

    pub fn args(&self) -> &[Term] {
        self.term.args()
    }

    pub fn as_str(&self) -> &str {
        &self.text
    }

    /// Structural complexity used for heavy/light routing.
    pub fn nested_expression_count(&self) -> usize {
        self.term.subterm_count()
    }

    pub fn is_logical(&self) -> bool {
        !NON_LOGICAL_HEADS.contains(&self.head())
    }
}

impl PartialEq for Axiom {
    fn eq(&self, other: &Self) -> bool {
        self.text == other.text
    }
}

impl Eq for Axiom {}

impl Hash for Axiom {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.text.hash(state);
    }
}

impl PartialOrd for Axiom {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Axiom {
    fn cmp(&self, other: &Self) -> Ordering {
        self.text.cmp(&other.text)
    }
}

impl fmt::Display for Axiom {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.text)
    }
}

impl fmt::Debug for Axiom {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Axiom({})", self.text)
    }
}

impl FromStr for Axiom {
    type Err = AxiomParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl Serialize for Axiom {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.text)
    }
}

impl<'de> Deserialize<'de> for Axiom {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let text = String::deserialize(deserializer)?;
        Axiom::parse(&text).map_err(serde::de::Error::custom)
    }
}
