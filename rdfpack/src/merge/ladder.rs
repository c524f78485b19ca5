//! Leveled accumulation of sorted run files.
//!
//! Locally sorted files enter level 0. When a level holds more than `fan_in`
//! files, they are merged into one file at the next level. The ladder only
//! does bookkeeping; the merge itself runs outside any lock as a
//! [`PendingMerge`].

use std::path::{Path, PathBuf};

use super::{merge_runs, remove_all};
use crate::error::Result;
use crate::run::TempCodec;

#[derive(Debug)]
pub struct MergeLadder {
    dir: PathBuf,
    fan_in: usize,
    levels: Vec<Vec<PathBuf>>,
    next_id: u64,
}

/// A batch of same-level files to be merged into one file one level up.
#[derive(Debug)]
pub struct PendingMerge {
    pub level: usize,
    pub inputs: Vec<PathBuf>,
    pub output: PathBuf,
}

impl PendingMerge {
    /// Merge the inputs (distinct) and delete them.
    pub fn run(&self, codec: TempCodec) -> Result<PathBuf> {
        merge_runs(&self.inputs, &self.output, true, codec)?;
        remove_all(&self.inputs);
        Ok(self.output.clone())
    }
}

impl MergeLadder {
    pub fn new(dir: &Path, fan_in: usize) -> Self {
        MergeLadder {
            dir: dir.to_path_buf(),
            fan_in: fan_in.max(2),
            levels: Vec::new(),
            next_id: 0,
        }
    }

    fn next_path(&mut self, level: usize) -> PathBuf {
        let id = self.next_id;
        self.next_id += 1;
        self.dir.join(format!("sorted-{}-{}", level, id))
    }

    /// Register a sorted file at `level`. Returns the merge to run when the
    /// level overflows.
    pub fn add(&mut self, level: usize, path: PathBuf) -> Option<PendingMerge> {
        if self.levels.len() <= level {
            self.levels.resize_with(level + 1, Vec::new);
        }
        self.levels[level].push(path);
        if self.levels[level].len() > self.fan_in {
            let inputs = std::mem::take(&mut self.levels[level]);
            let output = self.next_path(level + 1);
            Some(PendingMerge {
                level: level + 1,
                inputs,
                output,
            })
        } else {
            None
        }
    }

    /// Files currently held, across all levels.
    pub fn len(&self) -> usize {
        self.levels.iter().map(|l| l.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Merge everything left into `output`, in batches of at most `fan_in`
    /// inputs. Returns the number of entries in the final file.
    pub fn finish(mut self, output: &Path, codec: TempCodec) -> Result<u64> {
        let mut level = self.levels.len();
        // merge order does not change the result
        let mut current: Vec<PathBuf> = self.levels.drain(..).rev().flatten().collect();
        while current.len() > self.fan_in {
            let mut next = Vec::new();
            for batch in current.chunks(self.fan_in) {
                let out = self.next_path(level);
                merge_runs(batch, &out, true, codec)?;
                next.push(out);
            }
            remove_all(&current);
            current = next;
            level += 1;
        }
        let n = merge_runs(&current, output, true, codec)?;
        remove_all(&current);
        Ok(n)
    }
}
