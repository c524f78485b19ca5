//! RDF terms and their classification into kinds and literal groups.

use std::fmt;

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use serde::{Deserialize, Serialize};

use super::ValueCodec;

pub const XSD: &str = "http://www.w3.org/2001/XMLSchema#";
pub const RDF_LANG_STRING: &str = "http://www.w3.org/1999/02/22-rdf-syntax-ns#langString";

/// RDF term as seen by the ingestion pipeline and the read path.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Term {
    /// IRI/URI node.
    Iri(String),
    /// Blank node label (with or without `_:` prefix).
    BNode(String),
    /// Literal with optional datatype or language tag.
    Literal {
        lex: String,
        dt: Option<String>,
        lang: Option<String>,
    },
}

/// Coarse value category.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Kind {
    Iri,
    BNode,
    Literal,
}

impl Kind {
    pub fn dir_name(self) -> &'static str {
        match self {
            Kind::Iri => "iri",
            Kind::BNode => "bnode",
            Kind::Literal => "literal",
        }
    }

    pub fn from_dir_name(s: &str) -> Option<Self> {
        match s {
            "iri" => Some(Kind::Iri),
            "bnode" => Some(Kind::BNode),
            "literal" => Some(Kind::Literal),
            _ => None,
        }
    }
}

impl Term {
    pub fn iri(s: impl Into<String>) -> Self {
        Term::Iri(s.into())
    }

    pub fn bnode(label: impl Into<String>) -> Self {
        Term::BNode(label.into())
    }

    pub fn plain(lex: impl Into<String>) -> Self {
        Term::Literal {
            lex: lex.into(),
            dt: None,
            lang: None,
        }
    }

    pub fn typed(lex: impl Into<String>, dt: impl Into<String>) -> Self {
        Term::Literal {
            lex: lex.into(),
            dt: Some(dt.into()),
            lang: None,
        }
    }

    pub fn kind(&self) -> Kind {
        match self {
            Term::Iri(_) => Kind::Iri,
            Term::BNode(_) => Kind::BNode,
            Term::Literal { .. } => Kind::Literal,
        }
    }

    /// Bytes of an IRI or blank node in the shared IRI dictionary.
    ///
    /// Blank nodes always carry the `_:` prefix there, which no absolute IRI can
    /// start with.
    pub fn node_bytes(&self) -> Option<Vec<u8>> {
        match self {
            Term::Iri(s) => Some(s.as_bytes().to_vec()),
            Term::BNode(label) => {
                if label.starts_with("_:") {
                    Some(label.as_bytes().to_vec())
                } else {
                    let mut v = b"_:".to_vec();
                    v.extend_from_slice(label.as_bytes());
                    Some(v)
                }
            }
            Term::Literal { .. } => None,
        }
    }

    /// Inverse of [`Term::node_bytes`].
    pub fn from_node_bytes(bytes: &[u8]) -> Option<Term> {
        let s = std::str::from_utf8(bytes).ok()?;
        if s.starts_with("_:") {
            Some(Term::BNode(s.to_string()))
        } else {
            Some(Term::Iri(s.to_string()))
        }
    }

    /// Literal group and encoded bytes of a literal; `None` for non-literals.
    pub fn literal_parts(&self) -> Option<(LiteralGroup, Vec<u8>)> {
        let Term::Literal { lex, dt, lang } = self else {
            return None;
        };
        let group = LiteralGroup::classify(lex, dt.as_deref(), lang.as_deref());
        let bytes = group.codec().encode(lex)?;
        Some((group, bytes))
    }
}

impl fmt::Display for Term {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Term::Iri(s) => write!(f, "<{}>", s),
            Term::BNode(s) if s.starts_with("_:") => write!(f, "{}", s),
            Term::BNode(s) => write!(f, "_:{}", s),
            Term::Literal { lex, dt, lang } => match (dt, lang) {
                (_, Some(lang)) => write!(f, "\"{}\"@{}", lex, lang),
                (Some(dt), None) => write!(f, "\"{}\"^^<{}>", lex, dt),
                (None, None) => write!(f, "\"{}\"", lex),
            },
        }
    }
}

/// Built-in XSD datatypes with a dedicated codec.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum XsdDatatype {
    String,
    Boolean,
    Byte,
    Short,
    Int,
    Long,
    Integer,
    Double,
    Float,
    Decimal,
    GYear,
    Date,
    DateTime,
}

const ALL_XSD: [XsdDatatype; 13] = [
    XsdDatatype::String,
    XsdDatatype::Boolean,
    XsdDatatype::Byte,
    XsdDatatype::Short,
    XsdDatatype::Int,
    XsdDatatype::Long,
    XsdDatatype::Integer,
    XsdDatatype::Double,
    XsdDatatype::Float,
    XsdDatatype::Decimal,
    XsdDatatype::GYear,
    XsdDatatype::Date,
    XsdDatatype::DateTime,
];

impl XsdDatatype {
    /// Local name, also used in dictionary file names.
    pub fn name(self) -> &'static str {
        match self {
            XsdDatatype::String => "string",
            XsdDatatype::Boolean => "boolean",
            XsdDatatype::Byte => "byte",
            XsdDatatype::Short => "short",
            XsdDatatype::Int => "int",
            XsdDatatype::Long => "long",
            XsdDatatype::Integer => "integer",
            XsdDatatype::Double => "double",
            XsdDatatype::Float => "float",
            XsdDatatype::Decimal => "decimal",
            XsdDatatype::GYear => "gYear",
            XsdDatatype::Date => "date",
            XsdDatatype::DateTime => "dateTime",
        }
    }

    pub fn iri(self) -> String {
        format!("{}{}", XSD, self.name())
    }

    pub fn from_iri(iri: &str) -> Option<Self> {
        let local = iri.strip_prefix(XSD)?;
        Self::from_name(local)
    }

    pub fn from_name(name: &str) -> Option<Self> {
        ALL_XSD.iter().copied().find(|d| d.name() == name)
    }

    pub fn file_name(self) -> String {
        format!("datatype_{}", self.name())
    }

    pub fn is_fixed_width(self) -> bool {
        self.codec().is_fixed_width()
    }

    pub fn codec(self) -> ValueCodec {
        match self {
            XsdDatatype::String | XsdDatatype::Date | XsdDatatype::DateTime => ValueCodec::Utf8,
            XsdDatatype::Boolean => ValueCodec::Boolean,
            XsdDatatype::Byte => ValueCodec::Int8,
            XsdDatatype::Short => ValueCodec::Int16,
            XsdDatatype::Int => ValueCodec::Int32,
            XsdDatatype::Long | XsdDatatype::Integer => ValueCodec::Int64,
            XsdDatatype::Double => ValueCodec::Double,
            XsdDatatype::Float => ValueCodec::Float,
            XsdDatatype::Decimal => ValueCodec::Decimal,
            XsdDatatype::GYear => ValueCodec::Year,
        }
    }
}

/// Which literal dictionary a literal belongs to.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum LiteralGroup {
    Builtin(XsdDatatype),
    /// Any other datatype, and built-in datatypes whose lexical form is ill-typed.
    Custom(String),
    Lang(String),
}

impl LiteralGroup {
    /// Classify a literal. Ill-typed built-ins land in the custom group of their
    /// datatype IRI so every literal has exactly one group.
    pub fn classify(lex: &str, dt: Option<&str>, lang: Option<&str>) -> Self {
        if let Some(lang) = lang {
            return LiteralGroup::Lang(lang.to_string());
        }
        let Some(dt) = dt else {
            return LiteralGroup::Builtin(XsdDatatype::String);
        };
        match XsdDatatype::from_iri(dt) {
            Some(x) if x.codec().encode(lex).is_some() => LiteralGroup::Builtin(x),
            _ => LiteralGroup::Custom(dt.to_string()),
        }
    }

    pub fn codec(&self) -> ValueCodec {
        match self {
            LiteralGroup::Builtin(x) => x.codec(),
            LiteralGroup::Custom(_) | LiteralGroup::Lang(_) => ValueCodec::Utf8,
        }
    }

    /// Name of the dictionary file for this group.
    pub fn file_name(&self) -> String {
        match self {
            LiteralGroup::Builtin(x) => x.file_name(),
            LiteralGroup::Custom(iri) => {
                format!("datatype_{}", URL_SAFE_NO_PAD.encode(iri.as_bytes()))
            }
            LiteralGroup::Lang(lang) => format!("langString_{}", lang),
        }
    }

    pub fn from_file_name(name: &str) -> Option<Self> {
        if let Some(lang) = name.strip_prefix("langString_") {
            return Some(LiteralGroup::Lang(lang.to_string()));
        }
        let rest = name.strip_prefix("datatype_")?;
        if let Some(x) = XsdDatatype::from_name(rest) {
            return Some(LiteralGroup::Builtin(x));
        }
        let bytes = URL_SAFE_NO_PAD.decode(rest).ok()?;
        String::from_utf8(bytes).ok().map(LiteralGroup::Custom)
    }

    /// Rebuild a term from a canonical lexical form.
    pub fn literal(&self, lex: String) -> Term {
        match self {
            LiteralGroup::Builtin(XsdDatatype::String) => Term::Literal {
                lex,
                dt: None,
                lang: None,
            },
            LiteralGroup::Builtin(x) => Term::Literal {
                lex,
                dt: Some(x.iri()),
                lang: None,
            },
            LiteralGroup::Custom(iri) => Term::Literal {
                lex,
                dt: Some(iri.clone()),
                lang: None,
            },
            LiteralGroup::Lang(lang) => Term::Literal {
                lex,
                dt: None,
                lang: Some(lang.clone()),
            },
        }
    }
}
