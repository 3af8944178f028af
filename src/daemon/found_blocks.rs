//! Found-block persistence
//!
//! Main-chain blocks won by the pool are appended to `p2pool.blocks`, one
//! whitespace-separated record per line. The file is loaded on startup and
//! tolerates truncation by the user.

use crate::core::{Difficulty, Hash};
use crate::error::Result;
use std::fmt::Write as _;
use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// One main-chain block mined by the pool
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FoundBlock {
    /// Unix time of detection
    pub timestamp: u64,
    /// Main-chain height
    pub height: u64,
    /// Main-chain block id
    pub id: Hash,
    /// Main-chain difficulty at that height
    pub difficulty: Difficulty,
    /// Cumulative side-chain hashes at the time
    pub total_hashes: Difficulty,
}

impl FoundBlock {
    fn to_line(self) -> String {
        let mut line = String::with_capacity(96);
        let _ = write!(
            line,
            "{} {} {} {} {}",
            self.timestamp, self.height, self.id, self.difficulty, self.total_hashes
        );
        line
    }

    fn parse_line(line: &str) -> Option<FoundBlock> {
        let mut parts = line.split_whitespace();
        Some(FoundBlock {
            timestamp: parts.next()?.parse().ok()?,
            height: parts.next()?.parse().ok()?,
            id: Hash::from_hex(parts.next()?).ok()?,
            difficulty: Difficulty::new(parts.next()?.parse().ok()?),
            total_hashes: Difficulty::new(parts.next()?.parse().ok()?),
        })
    }
}

/// Append-only log of found blocks
pub struct FoundBlockLog {
    path: PathBuf,
    blocks: Vec<FoundBlock>,
}

impl FoundBlockLog {
    /// Create an empty log; nothing is read until [`FoundBlockLog::load`]
    pub fn empty(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            blocks: Vec::new(),
        }
    }

    /// Load the log, ignoring malformed trailing records
    pub fn load(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let mut blocks = Vec::new();

        if let Ok(file) = File::open(&path) {
            for line in BufReader::new(file).lines().map_while(|l| l.ok()) {
                if line.trim().is_empty() {
                    continue;
                }
                match FoundBlock::parse_line(&line) {
                    Some(b) => blocks.push(b),
                    None => warn!("skipping malformed found-block record: {:?}", line),
                }
            }
            info!("loaded {} found blocks from {}", blocks.len(), path.display());
        }

        Self { path, blocks }
    }

    /// Record a new found block, appending it to the file
    pub fn append(&mut self, block: FoundBlock) -> Result<()> {
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        writeln!(file, "{}", block.to_line())?;
        self.blocks.push(block);
        Ok(())
    }

    /// The most recent found block
    pub fn last(&self) -> Option<&FoundBlock> {
        self.blocks.last()
    }

    /// Total found blocks
    pub fn len(&self) -> usize {
        self.blocks.len()
    }

    /// Whether any block was found yet
    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }

    /// The most recent `n` blocks, newest first
    pub fn recent(&self, n: usize) -> Vec<FoundBlock> {
        self.blocks.iter().rev().take(n).copied().collect()
    }

    /// Path of the backing file
    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn block(ts: u64, height: u64) -> FoundBlock {
        FoundBlock {
            timestamp: ts,
            height,
            id: Hash::from_bytes([7; 32]),
            difficulty: Difficulty::new(1_000_000),
            total_hashes: Difficulty::new(42_000_000),
        }
    }

    #[test]
    fn test_append_then_reload() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("p2pool.blocks");

        let mut log = FoundBlockLog::load(&path);
        assert!(log.is_empty());
        log.append(block(1_700_000_000, 3000)).unwrap();
        log.append(block(1_700_000_600, 3010)).unwrap();

        let reloaded = FoundBlockLog::load(&path);
        assert_eq!(reloaded.len(), 2);
        assert_eq!(reloaded.blocks[0], block(1_700_000_000, 3000));
        assert_eq!(reloaded.last().unwrap().height, 3010);
    }

    #[test]
    fn test_truncated_file_tolerated() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("p2pool.blocks");
        std::fs::write(
            &path,
            format!(
                "{}\n1700000001 3001 deadbeef\n",
                block(1_700_000_000, 3000).to_line()
            ),
        )
        .unwrap();

        let log = FoundBlockLog::load(&path);
        assert_eq!(log.len(), 1);
        assert_eq!(log.last().unwrap().height, 3000);
    }

    #[test]
    fn test_recent_is_newest_first() {
        let dir = TempDir::new().unwrap();
        let mut log = FoundBlockLog::load(dir.path().join("p2pool.blocks"));
        for i in 0..5 {
            log.append(block(1000 + i, 100 + i)).unwrap();
        }
        let recent = log.recent(3);
        assert_eq!(recent.len(), 3);
        assert_eq!(recent[0].height, 104);
        assert_eq!(recent[2].height, 102);
    }
}
