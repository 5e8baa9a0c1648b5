//! Payload discovery
//!
//! For any set of payload directories on disk, `scan` reports exactly the
//! directories holding a `*payload.elf` file, ordered by name, and fails
//! with `NoPayloads` when there are none.

use std::collections::BTreeSet;
use std::fs;

use chainload::commands::scan;
use chainload::config::ToolConfig;
use chainload::error::ToolError;
use proptest::prelude::*;

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    #[test]
    fn scan_finds_exactly_payload_dirs(
        dirs in proptest::collection::btree_map("[a-z]{1,8}", any::<bool>(), 0..8),
    ) {
        let sd = tempfile::tempdir().unwrap();
        let base = sd.path().join("wiiu/payloads");
        fs::create_dir_all(&base).unwrap();

        for (name, has_payload) in &dirs {
            let dir = base.join(name);
            fs::create_dir_all(&dir).unwrap();
            let file = if *has_payload { "payload.elf" } else { "readme.txt" };
            fs::write(dir.join(file), b"x").unwrap();
        }

        let config = ToolConfig {
            sd_root: sd.path().to_path_buf(),
            ..ToolConfig::default()
        };
        let expected: BTreeSet<&str> = dirs
            .iter()
            .filter(|(_, has)| **has)
            .map(|(name, _)| name.as_str())
            .collect();

        if expected.is_empty() {
            let err = scan::run(&config).unwrap_err();
            let no_payloads = matches!(err, ToolError::NoPayloads { .. });
            prop_assert!(no_payloads);
            return Ok(());
        }
        let summary = scan::run(&config).unwrap();
        let found: Vec<&str> = summary.payloads.iter().map(|p| p.name.as_str()).collect();

        prop_assert_eq!(found, expected.into_iter().collect::<Vec<_>>());
        for payload in &summary.payloads {
            prop_assert_eq!(&payload.path, &format!("wiiu/payloads/{}/payload.elf", payload.name));
        }
    }
}
