//! Found-block persistence and status-file emission

use sidepool::api::{FoundBlockRecord, StatusApi};
use sidepool::core::{Difficulty, Hash};
use sidepool::daemon::found_blocks::{FoundBlock, FoundBlockLog};
use tempfile::TempDir;

fn found(ts: u64, height: u64, id_byte: u8) -> FoundBlock {
    FoundBlock {
        timestamp: ts,
        height,
        id: Hash::from_bytes([id_byte; 32]),
        difficulty: Difficulty::new(250_000_000_000),
        total_hashes: Difficulty::new(1_000_000_000),
    }
}

#[test]
fn found_blocks_survive_restart() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("p2pool.blocks");

    let original = found(1_700_000_000, 2_800_000, 0x42);
    {
        let mut log = FoundBlockLog::load(&path);
        log.append(original).unwrap();
    }

    // "restart": a fresh process loads the same file
    let log = FoundBlockLog::load(&path);
    assert_eq!(log.len(), 1);
    assert_eq!(log.recent(10)[0], original);

    // a user-truncated file still loads what is intact
    let content = std::fs::read_to_string(&path).unwrap();
    std::fs::write(&path, &content[..content.len() / 2]).unwrap();
    let log = FoundBlockLog::load(&path);
    assert!(log.len() <= 1);
}

#[test]
fn pool_blocks_json_matches_dashboard_schema() {
    let dir = TempDir::new().unwrap();
    let api = StatusApi::new(dir.path()).unwrap();

    let block = found(1_700_000_000, 2_800_000, 0x42);
    api.set_pool_blocks(&[FoundBlockRecord {
        height: block.height,
        hash: block.id,
        difficulty: block.difficulty,
        total_hashes: block.total_hashes,
        ts: block.timestamp,
    }])
    .unwrap();

    let body = std::fs::read_to_string(dir.path().join("pool/blocks")).unwrap();
    let parsed: serde_json::Value = serde_json::from_str(&body).unwrap();
    let entry = &parsed[0];
    assert_eq!(entry["height"], 2_800_000);
    assert_eq!(entry["hash"], Hash::from_bytes([0x42; 32]).to_hex());
    assert_eq!(entry["difficulty"], 250_000_000_000u64);
    assert_eq!(entry["totalHashes"], 1_000_000_000u64);
    assert_eq!(entry["ts"], 1_700_000_000u64);
}

#[test]
fn appends_accumulate_across_sessions() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("p2pool.blocks");

    for session in 0..3u64 {
        let mut log = FoundBlockLog::load(&path);
        log.append(found(1_700_000_000 + session, 100 + session, session as u8))
            .unwrap();
    }

    let log = FoundBlockLog::load(&path);
    assert_eq!(log.len(), 3);
    let recent = log.recent(2);
    assert_eq!(recent[0].height, 102);
    assert_eq!(recent[1].height, 101);
}
