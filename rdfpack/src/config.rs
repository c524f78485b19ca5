//! Tunables for an ingestion run.

use std::io::{BufReader, Write};
use std::path::Path;

use derive_builder::Builder;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::run::TempCompression;

const MIB: u64 = 1024 * 1024;

/// Configuration of an ingestion run.
///
/// Every field has a default, so a JSON file only needs the keys it changes.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Builder)]
#[builder(default)]
#[serde(default)]
pub struct IngestConfig {
    /// Elements per section in dictionary files.
    pub section_capacity: u32,
    /// Compress dictionary sections with zstd.
    pub compress_sections: bool,
    /// zstd level for sections and temp files.
    pub zstd_level: i32,
    /// Writer slots per bucket.
    pub writer_slots: usize,
    /// Uncompressed bytes after which a slot's run file is rolled.
    pub roll_threshold: u64,
    /// Files per merge-ladder level before they are merged upward.
    pub fan_in: usize,
    /// Largest distinct-object count that still gets the bitmap encoding.
    pub bitmap_ceiling: u64,
    /// Concurrent input parsers; 0 means one per CPU.
    pub parse_concurrency: usize,
    /// Concurrent sorts and merges; 0 derives it from `memory_budget`.
    pub sort_concurrency: usize,
    /// Concurrent bucket compactions; 0 derives it from `memory_budget`.
    pub compaction_concurrency: usize,
    /// Memory the sort and compaction stages may use together.
    pub memory_budget: u64,
    /// Byte budget of the decompressed-section cache.
    pub cache_budget: u64,
    /// Compression of intermediate run files.
    pub temp_compression: TempCompression,
    /// Quads of one input held in memory until it has parsed; the rest spill
    /// to a staging file.
    pub stage_limit: usize,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            section_capacity: 2048,
            compress_sections: true,
            zstd_level: 0,
            writer_slots: 4,
            roll_threshold: 128 * MIB,
            fan_in: 64,
            bitmap_ceiling: i16::MAX as u64,
            parse_concurrency: 0,
            sort_concurrency: 0,
            compaction_concurrency: 0,
            memory_budget: 2048 * MIB,
            cache_budget: 256 * MIB,
            temp_compression: TempCompression::None,
            stage_limit: 1 << 18,
        }
    }
}

impl IngestConfig {
    pub fn builder() -> IngestConfigBuilder {
        IngestConfigBuilder::default()
    }

    pub fn save_to_file(&self, file: &Path) -> Result<()> {
        let config_str =
            serde_json::to_string_pretty(&self).map_err(|e| Error::Config(e.to_string()))?;
        let mut file = std::fs::File::create(file)?;
        file.write_all(config_str.as_bytes())?;
        Ok(())
    }

    pub fn from_file(file: &Path) -> Result<Self> {
        let file = std::fs::File::open(file)?;
        let reader = BufReader::new(file);
        let config: IngestConfig =
            serde_json::from_reader(reader).map_err(|e| Error::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Reject values no run can work with.
    pub fn validate(&self) -> Result<()> {
        if self.section_capacity == 0 {
            return Err(Error::Config("section_capacity must be positive".into()));
        }
        if self.writer_slots == 0 {
            return Err(Error::Config("writer_slots must be positive".into()));
        }
        if self.fan_in < 2 {
            return Err(Error::Config("fan_in must be at least 2".into()));
        }
        if self.roll_threshold == 0 {
            return Err(Error::Config("roll_threshold must be positive".into()));
        }
        Ok(())
    }

    pub fn parse_permits(&self) -> usize {
        if self.parse_concurrency > 0 {
            return self.parse_concurrency;
        }
        std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1)
    }

    /// A sort holds roughly two copies of one rolled run file in memory.
    pub fn sort_permits(&self) -> usize {
        if self.sort_concurrency > 0 {
            return self.sort_concurrency;
        }
        let per_task = self.roll_threshold.saturating_mul(2).max(1);
        ((self.memory_budget / per_task) as usize).max(1)
    }

    /// A compaction holds one partition of bitmaps plus graph bitmaps.
    pub fn compaction_permits(&self) -> usize {
        if self.compaction_concurrency > 0 {
            return self.compaction_concurrency;
        }
        ((self.memory_budget / (256 * MIB)) as usize).max(1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builder_overrides_defaults() {
        let cfg = IngestConfig::builder()
            .section_capacity(16)
            .bitmap_ceiling(4)
            .build()
            .unwrap();
        assert_eq!(cfg.section_capacity, 16);
        assert_eq!(cfg.bitmap_ceiling, 4);
        assert_eq!(cfg.fan_in, 64);
        assert_eq!(cfg.writer_slots, 4);
    }

    #[test]
    fn file_roundtrip_and_partial_json() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cfg.json");
        let cfg = IngestConfig::builder()
            .temp_compression(TempCompression::Zstd)
            .build()
            .unwrap();
        cfg.save_to_file(&path).unwrap();
        assert_eq!(IngestConfig::from_file(&path).unwrap(), cfg);

        std::fs::write(&path, r#"{"fan_in": 8}"#).unwrap();
        let partial = IngestConfig::from_file(&path).unwrap();
        assert_eq!(partial.fan_in, 8);
        assert_eq!(partial.section_capacity, 2048);

        std::fs::write(&path, r#"{"fan_in": 1}"#).unwrap();
        assert!(matches!(
            IngestConfig::from_file(&path),
            Err(Error::Config(_))
        ));
    }

    #[test]
    fn permits_are_at_least_one() {
        let cfg = IngestConfig::builder().memory_budget(1).build().unwrap();
        assert_eq!(cfg.sort_permits(), 1);
        assert_eq!(cfg.compaction_permits(), 1);
        assert!(cfg.parse_permits() >= 1);
    }
}
