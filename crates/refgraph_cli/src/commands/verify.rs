//! Verify command implementation.

use super::Store;
use refgraph_storage::VerifyReport;
use std::path::Path;

/// Runs the verify command.
///
/// Fails if any problem is found, so the process exits non-zero.
pub fn run(path: &Path, format: &str) -> Result<(), Box<dyn std::error::Error>> {
    let store = Store::open(path)?;
    let report = store.verify()?;

    match format {
        "json" => println!("{}", serde_json::to_string_pretty(&report)?),
        _ => print_report(path, &report),
    }

    if report.is_ok() {
        Ok(())
    } else {
        Err(format!("Verification failed with {} problem(s)", report.problems.len()).into())
    }
}

fn print_report(path: &Path, report: &VerifyReport) {
    println!("Verifying store at {:?}", path);
    println!();
    println!("  Nodes checked: {}", report.nodes);
    println!("  Problems:      {}", report.problems.len());
    for problem in &report.problems {
        println!("    - {}", problem);
    }
    println!();
    if report.is_ok() {
        println!("✓ Store verification passed");
    } else {
        println!("✗ Store verification failed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commands::test_support::saved_sample;
    use refgraph_storage::{NodeMap, Problem};

    #[test]
    fn sample_store_passes() {
        let saved = saved_sample();
        assert!(run(&saved.path, "text").is_ok());
        assert!(run(&saved.path, "json").is_ok());
    }

    #[test]
    fn broken_snapshot_fails() {
        let saved = saved_sample();
        let mut map = Store::open(&saved.path).unwrap().node_map().unwrap();
        let root = map.roots()[0];
        map.get_mut(&root).unwrap().ref_count = 2;

        let snapshot = saved._dir.path().join("broken.cbor");
        map.save_file(&snapshot).unwrap();

        let report = Store::open(&snapshot).unwrap().verify().unwrap();
        assert!(matches!(
            report.problems.as_slice(),
            [Problem::RefCountMismatch { stored: 2, inbound: 0, .. }]
        ));
        assert!(run(&snapshot, "text").is_err());
        assert_eq!(NodeMap::load_file(&snapshot).unwrap(), map);
    }
}
