//! Dump command implementation.

use refgraph_storage::SqliteReader;
use std::fs;
use std::path::Path;

/// Prints a relational store as a SQL script, or writes it to `output`.
pub fn run(path: &Path, output: Option<&Path>) -> Result<(), Box<dyn std::error::Error>> {
    if super::is_snapshot(path) {
        return Err("Dump needs a relational store; use `inspect --format json` for snapshots".into());
    }
    if !path.exists() {
        return Err(format!("No store found at {:?}", path).into());
    }

    let script = SqliteReader::open(path)?.dump()?;
    match output {
        Some(output) => {
            fs::write(output, &script)?;
            println!("Wrote {} bytes to {:?}", script.len(), output);
        }
        None => print!("{}", script),
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commands::test_support::saved_sample;
    use refgraph_testkit::{load_document, SAMPLE_NODE_COUNT};

    #[test]
    fn dump_file_reloads() {
        let saved = saved_sample();
        let output = saved._dir.path().join("graph.sql");
        run(&saved.path, Some(&output)).unwrap();

        let script = fs::read_to_string(&output).unwrap();
        let reader = SqliteReader::from_dump(&script).unwrap();
        assert_eq!(reader.counts().unwrap().nodes, SAMPLE_NODE_COUNT as u64);
        assert_eq!(load_document(&reader).unwrap().title(), "run 42");
    }
}
