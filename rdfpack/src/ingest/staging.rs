//! Per-input quad staging. An input's quads are only routed once the whole
//! file parsed, so a syntax error halfway through leaves no trace in the
//! corpus. Small inputs stay in memory; larger ones spill to a temp list.

use std::fs;
use std::path::{Path, PathBuf};

use log::debug;

use super::Quad;
use crate::codec::varint::{push_uvarint, read_uvarint};
use crate::codec::Term;
use crate::error::{Error, Result};
use crate::run::{TempCodec, ValueListWriter};

const TAG_IRI: u8 = 0;
const TAG_BNODE: u8 = 1;
const TAG_LITERAL: u8 = 2;

const NO_SUFFIX: u8 = 0;
const DATATYPE: u8 = 1;
const LANGUAGE: u8 = 2;

/// Quads of one input, held back until the input is known to be valid.
pub(crate) struct QuadStage {
    path: PathBuf,
    codec: TempCodec,
    limit: usize,
    memory: Vec<Quad>,
    spill: Option<ValueListWriter>,
    spilled: u64,
    buf: Vec<u8>,
}

impl QuadStage {
    /// Keep up to `limit` quads in memory, spilling to `path` after that.
    pub(crate) fn new(path: &Path, limit: usize, codec: TempCodec) -> Self {
        QuadStage {
            path: path.to_path_buf(),
            codec,
            limit,
            memory: Vec::new(),
            spill: None,
            spilled: 0,
            buf: Vec::with_capacity(256),
        }
    }

    pub(crate) fn len(&self) -> u64 {
        self.memory.len() as u64 + self.spilled
    }

    pub(crate) fn push(&mut self, quad: Quad) -> Result<()> {
        if self.spill.is_none() && self.memory.len() < self.limit {
            self.memory.push(quad);
            return Ok(());
        }
        if self.spill.is_none() {
            debug!("spilling staged quads to {}", self.path.display());
            self.spill = Some(self.codec.list_writer(&self.path)?);
        }
        self.buf.clear();
        encode_quad(&quad, &mut self.buf);
        if let Some(w) = self.spill.as_mut() {
            w.write(&self.buf)?;
        }
        self.spilled += 1;
        Ok(())
    }

    /// Hand every staged quad to `sink`, in the order they were pushed.
    pub(crate) fn replay(mut self, sink: &mut dyn FnMut(Quad) -> Result<()>) -> Result<u64> {
        let n = self.len();
        for quad in std::mem::take(&mut self.memory) {
            sink(quad)?;
        }
        if let Some(w) = self.spill.take() {
            let path = w.finish()?;
            for bytes in self.codec.list_reader(&path)? {
                sink(decode_quad(&bytes?).ok_or_else(|| {
                    Error::corrupt(format!("bad staged quad in {}", path.display()))
                })?)?;
            }
        }
        Ok(n)
    }
}

impl Drop for QuadStage {
    fn drop(&mut self) {
        if let Some(w) = self.spill.take() {
            drop(w.finish());
        }
        if self.spilled > 0 {
            if let Err(e) = fs::remove_file(&self.path) {
                debug!("could not remove {}: {}", self.path.display(), e);
            }
        }
    }
}

fn push_str(s: &str, out: &mut Vec<u8>) {
    push_uvarint(s.len() as u64, out);
    out.extend_from_slice(s.as_bytes());
}

fn read_str(buf: &[u8], off: usize) -> Option<(String, usize)> {
    let (len, off) = read_uvarint(buf, off)?;
    let end = off.checked_add(usize::try_from(len).ok()?)?;
    let s = std::str::from_utf8(buf.get(off..end)?).ok()?;
    Some((s.to_string(), end))
}

fn encode_term(term: &Term, out: &mut Vec<u8>) {
    match term {
        Term::Iri(iri) => {
            out.push(TAG_IRI);
            push_str(iri, out);
        }
        Term::BNode(label) => {
            out.push(TAG_BNODE);
            push_str(label, out);
        }
        Term::Literal { lex, dt, lang } => {
            out.push(TAG_LITERAL);
            push_str(lex, out);
            match (dt, lang) {
                (_, Some(lang)) => {
                    out.push(LANGUAGE);
                    push_str(lang, out);
                }
                (Some(dt), None) => {
                    out.push(DATATYPE);
                    push_str(dt, out);
                }
                (None, None) => out.push(NO_SUFFIX),
            }
        }
    }
}

fn decode_term(buf: &[u8], off: usize) -> Option<(Term, usize)> {
    let tag = *buf.get(off)?;
    let (text, off) = read_str(buf, off + 1)?;
    match tag {
        TAG_IRI => Some((Term::Iri(text), off)),
        TAG_BNODE => Some((Term::BNode(text), off)),
        TAG_LITERAL => {
            let suffix = *buf.get(off)?;
            let (dt, lang, off) = match suffix {
                NO_SUFFIX => (None, None, off + 1),
                DATATYPE => {
                    let (dt, off) = read_str(buf, off + 1)?;
                    (Some(dt), None, off)
                }
                LANGUAGE => {
                    let (lang, off) = read_str(buf, off + 1)?;
                    (None, Some(lang), off)
                }
                _ => return None,
            };
            Some((Term::Literal { lex: text, dt, lang }, off))
        }
        _ => None,
    }
}

fn encode_quad(quad: &Quad, out: &mut Vec<u8>) {
    encode_term(&quad.subject, out);
    push_str(&quad.predicate, out);
    encode_term(&quad.object, out);
    push_str(&quad.graph, out);
}

fn decode_quad(buf: &[u8]) -> Option<Quad> {
    let (subject, off) = decode_term(buf, 0)?;
    let (predicate, off) = read_str(buf, off)?;
    let (object, off) = decode_term(buf, off)?;
    let (graph, off) = read_str(buf, off)?;
    (off == buf.len()).then_some(Quad {
        subject,
        predicate,
        object,
        graph,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::run::TempCompression;

    fn quads() -> Vec<Quad> {
        let objects = [
            Term::iri("http://ex/o"),
            Term::bnode("_:f0_b1"),
            Term::typed("7", "http://www.w3.org/2001/XMLSchema#int"),
            Term::Literal {
                lex: "chat".into(),
                dt: None,
                lang: Some("fr".into()),
            },
        ];
        objects
            .into_iter()
            .enumerate()
            .map(|(i, object)| Quad {
                subject: Term::iri(format!("http://ex/s{}", i)),
                predicate: "http://ex/p".into(),
                object,
                graph: "http://ex/g".into(),
            })
            .collect()
    }

    fn collect(stage: QuadStage) -> Vec<Quad> {
        let mut out = Vec::new();
        let n = stage
            .replay(&mut |q| {
                out.push(q);
                Ok(())
            })
            .unwrap();
        assert_eq!(n as usize, out.len());
        out
    }

    #[test]
    fn spilled_quads_replay_in_order() {
        let dir = tempfile::tempdir().unwrap();
        for limit in [0, 2, 100] {
            let path = dir.path().join(format!("stage-{}", limit));
            let mut stage =
                QuadStage::new(&path, limit, TempCodec::new(TempCompression::Zstd, 0));
            for q in quads() {
                stage.push(q).unwrap();
            }
            assert_eq!(stage.len(), 4);
            assert_eq!(collect(stage), quads());
            assert!(!path.exists());
        }
    }

    #[test]
    fn dropped_stage_removes_its_spill_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("stage");
        let mut stage = QuadStage::new(&path, 1, TempCodec::default());
        for q in quads() {
            stage.push(q).unwrap();
        }
        assert!(path.exists());
        drop(stage);
        assert!(!path.exists());
    }
}
