//! `Ontology(...)` documents: the text format used for temporary artifacts and
//! for the worker's standard output.

use nom::combinator::all_consuming;

use crate::axiom::{syntax_error, term_list, Axiom, AxiomParseError, Term};
use crate::AxiomSet;

/// Every worker result starts with this marker.
pub const ONTOLOGY_MARKER: &str = "Ontology(";

const ONTOLOGY_HEAD: &str = "Ontology";

#[derive(Debug, thiserror::Error)]
pub enum DocumentError {
    #[error(transparent)]
    Syntax(#[from] AxiomParseError),
    #[error("expected an Ontology(...) document, found {0:?}")]
    NotAnOntology(String),
    #[error("no Ontology(...) document found")]
    Empty,
}

/// Render an axiom set as a single document, one axiom per line.
pub fn render_document(axioms: &AxiomSet) -> String {
    let mut out = String::from(ONTOLOGY_MARKER);
    out.push('\n');
    for axiom in axioms {
        out.push_str(axiom.as_str());
        out.push('\n');
    }
    out.push(')');
    out
}

/// Render several axiom sets as concatenated documents.
pub fn render_documents<'a>(sets: impl IntoIterator<Item = &'a AxiomSet>) -> String {
    sets.into_iter()
        .map(render_document)
        .collect::<Vec<_>>()
        .join("\n")
}

/// Parse every concatenated document in `source`.
pub fn parse_documents(source: &str) -> Result<Vec<AxiomSet>, DocumentError> {
    let (_, terms) = all_consuming(term_list)(source).map_err(|e| syntax_error(source, e))?;
    terms.into_iter().map(ontology_axioms).collect()
}

/// Parse exactly one document.
pub fn parse_document(source: &str) -> Result<AxiomSet, DocumentError> {
    let mut docs = parse_documents(source)?;
    match docs.len() {
        0 => Err(DocumentError::Empty),
        1 => Ok(docs.remove(0)),
        // several documents in one artifact are read as one knowledge base
        _ => Ok(docs.into_iter().flatten().collect()),
    }
}

fn ontology_axioms(term: Term) -> Result<AxiomSet, DocumentError> {
    let Term::Compound { head, args } = term else {
        return Err(DocumentError::NotAnOntology(term.to_string()));
    };
    if head != ONTOLOGY_HEAD {
        return Err(DocumentError::NotAnOntology(head));
    }
    // atoms inside Ontology(...) are the ontology (and version) IRIs
    args.into_iter()
        .filter(|arg| arg.as_atom().is_none())
        .map(|arg| Axiom::from_term(arg).map_err(DocumentError::from))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn set(items: &[&str]) -> AxiomSet {
        items.iter().map(|s| Axiom::parse(s).unwrap()).collect()
    }

    #[test]
    fn rendered_document_starts_with_marker() {
        let doc = render_document(&set(&["SubClassOf(:A :B)", "SubClassOf(:B :C)"]));
        assert!(doc.starts_with(ONTOLOGY_MARKER));
        assert_eq!(doc, "Ontology(\nSubClassOf(:A :B)\nSubClassOf(:B :C)\n)");
    }

    #[test]
    fn parses_ontology_iri_and_axioms() {
        let parsed = parse_document(
            "Ontology(<http://example.org/o>\n  Declaration(Class(:A))\n  SubClassOf(:A :B)\n)",
        )
        .unwrap();
        assert_eq!(
            parsed,
            set(&["Declaration(Class(:A))", "SubClassOf(:A :B)"])
        );
    }

    #[test]
    fn concatenated_documents_stay_separate() {
        let first = set(&["SubClassOf(:A :B)"]);
        let second = set(&["SubClassOf(:A :C)", "SubClassOf(:C :B)"]);
        let text = render_documents([&first, &second]);
        assert_eq!(parse_documents(&text).unwrap(), vec![first, second]);
    }

    #[test]
    fn empty_document_is_an_empty_set() {
        assert!(parse_document("Ontology()").unwrap().is_empty());
    }

    #[test]
    fn rejects_other_documents() {
        assert!(matches!(
            parse_document("Prefix(:=<http://x#>)"),
            Err(DocumentError::NotAnOntology(head)) if head == "Prefix"
        ));
        assert!(matches!(parse_document("   "), Err(DocumentError::Empty)));
        assert!(matches!(
            parse_document("Ontology(SubClassOf(:A :B)"),
            Err(DocumentError::Syntax(_))
        ));
    }
}
