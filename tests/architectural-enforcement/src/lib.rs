//! Architectural Enforcement Integration Tests
//!
//! This package contains integration tests that enforce architectural
//! principles of the pool core:
//! - The slot state machine stays pure: no runtime, timers, or spawns
//! - No blocking sleeps in production code
//! - No `unwrap()` outside test modules
//! - Socket I/O stays behind the connector seam
//!
//! These tests are designed to catch violations early in the development
//! cycle.

use std::path::PathBuf;

/// Root of the pool core crate's sources, relative to this package.
pub fn core_src_dir() -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("../../pool/core/src")
}

/// Collect one source file's production code, i.e. everything above its
/// `#[cfg(test)]` module. Test modules sit at the bottom of each file.
pub fn production_code(contents: &str) -> &str {
    match contents.find("#[cfg(test)]") {
        Some(index) => &contents[..index],
        None => contents,
    }
}

#[cfg(test)]
mod tests {
    use std::fs;

    use walkdir::WalkDir;

    use super::{core_src_dir, production_code};

    fn source_files() -> Vec<(String, String)> {
        let mut files = Vec::new();
        for entry in WalkDir::new(core_src_dir()) {
            let entry = entry.expect("walk pool core sources");
            if entry.path().extension().and_then(|e| e.to_str()) != Some("rs") {
                continue;
            }
            let contents = fs::read_to_string(entry.path()).expect("read source file");
            files.push((entry.path().display().to_string(), contents));
        }
        assert!(
            !files.is_empty(),
            "no sources found under {:?}",
            core_src_dir()
        );
        files
    }

    /// The state machine module must stay pure: it may log, but it must
    /// not touch the async runtime, timers, tasks, or the clock.
    #[test]
    fn slot_state_machine_is_pure() {
        let path = core_src_dir().join("slot/state.rs");
        let contents = fs::read_to_string(&path).expect("read slot/state.rs");
        let code = production_code(&contents);

        for forbidden in [
            "tokio::",
            "async fn",
            ".await",
            "spawn",
            "Instant::now",
            "SystemTime",
        ] {
            assert!(
                !code.contains(forbidden),
                "slot/state.rs must stay pure but mentions `{forbidden}`"
            );
        }
    }

    /// Production code never blocks a runtime thread with a sync sleep.
    #[test]
    fn no_blocking_sleeps_in_production_code() {
        for (path, contents) in source_files() {
            assert!(
                !production_code(&contents).contains("std::thread::sleep"),
                "{path} calls std::thread::sleep in production code"
            );
        }
    }

    /// Errors are propagated, not unwrapped, outside of test modules.
    #[test]
    fn no_unwrap_in_production_code() {
        for (path, contents) in source_files() {
            let code = production_code(&contents);
            assert!(
                !code.contains(".unwrap()"),
                "{path} calls unwrap() in production code"
            );
            assert!(
                !code.contains(".expect("),
                "{path} calls expect() in production code"
            );
        }
    }

    /// The dial seam stays external: nothing in the core opens sockets.
    #[test]
    fn core_does_no_socket_io() {
        for (path, contents) in source_files() {
            let code = production_code(&contents);
            for forbidden in ["TcpStream", "std::net::", "tokio::net"] {
                assert!(
                    !code.contains(forbidden),
                    "{path} reaches for sockets (`{forbidden}`); dialing belongs to the Connector"
                );
            }
        }
    }

    #[test]
    fn production_code_split_ignores_missing_test_module() {
        let with = "fn a() {}\n#[cfg(test)]\nmod tests {}\n";
        assert_eq!(production_code(with), "fn a() {}\n");

        let without = "fn a() {}\n";
        assert_eq!(production_code(without), without);
    }

    #[test]
    fn core_src_dir_points_at_the_crate() {
        let dir = core_src_dir();
        assert!(dir.join("lib.rs").exists(), "{dir:?} has no lib.rs");
    }
}
