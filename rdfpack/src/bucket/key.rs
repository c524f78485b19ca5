use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::codec::{Kind, LiteralGroup, Term, ValueCodec};
use crate::error::{Error, Result};

/// Object side of a bucket key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ObjectKind {
    Iri,
    BNode,
    Literal(LiteralGroup),
}

impl ObjectKind {
    /// Name used for adjacency files and graph files of the bucket.
    pub fn file_name(&self) -> String {
        match self {
            ObjectKind::Iri => "iri".to_string(),
            ObjectKind::BNode => "bnode".to_string(),
            ObjectKind::Literal(group) => group.file_name(),
        }
    }

    pub fn from_file_name(name: &str) -> Option<Self> {
        match name {
            "iri" => Some(ObjectKind::Iri),
            "bnode" => Some(ObjectKind::BNode),
            other => LiteralGroup::from_file_name(other).map(ObjectKind::Literal),
        }
    }

    /// Codec of the dictionary that object ranks refer to.
    pub fn codec(&self) -> ValueCodec {
        match self {
            ObjectKind::Iri | ObjectKind::BNode => ValueCodec::Utf8,
            ObjectKind::Literal(group) => group.codec(),
        }
    }

    /// Objects of IRI and blank-node buckets live in the `iris` dictionary.
    pub fn uses_iri_dictionary(&self) -> bool {
        !matches!(self, ObjectKind::Literal(_))
    }
}

/// Identity of a bucket: two quads share a bucket iff their keys are equal.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct BucketKey {
    /// Predicate id, first-seen order.
    pub predicate: u32,
    pub subject_kind: Kind,
    pub object: ObjectKind,
}

impl BucketKey {
    /// Classify a (subject, object) pair under predicate id `predicate` and
    /// return the key along with the encoded subject and object.
    pub fn classify(predicate: u32, subject: &Term, object: &Term) -> Result<(Self, Vec<u8>, Vec<u8>)> {
        let subject_kind = subject.kind();
        let subject_bytes = subject
            .node_bytes()
            .ok_or(Error::Invalid("literal in subject position"))?;
        let (kind, object_bytes) = match object {
            Term::Iri(_) | Term::BNode(_) => {
                let bytes = object
                    .node_bytes()
                    .ok_or(Error::Invalid("object is not a node"))?;
                let kind = if object.kind() == Kind::Iri {
                    ObjectKind::Iri
                } else {
                    ObjectKind::BNode
                };
                (kind, bytes)
            }
            Term::Literal { .. } => {
                let (group, bytes) = object
                    .literal_parts()
                    .ok_or(Error::Invalid("literal cannot be encoded"))?;
                (ObjectKind::Literal(group), bytes)
            }
        };
        Ok((
            BucketKey {
                predicate,
                subject_kind,
                object: kind,
            },
            subject_bytes,
            object_bytes,
        ))
    }

    pub fn object_file_name(&self) -> String {
        self.object.file_name()
    }

    /// `pred_<n>/<iri|bnode>`, relative to a corpus or work root.
    pub fn relative_dir(&self) -> PathBuf {
        Path::new(&format!("pred_{}", self.predicate)).join(self.subject_kind.dir_name())
    }
}
