//! Integration tests for the pairsync binary.
//!
//! Tests verify:
//! 1. Only identifiers present in both inputs reach the outputs, pairwise aligned
//! 2. Failed runs leave nothing at the destination paths
//! 3. Reruns on the same inputs are byte-identical
//! 4. Numeric key order compares identifiers by value
//! 5. `verify` accepts synced outputs and rejects unsynced inputs

use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::{Command, Output};
use tempfile::TempDir;

fn pairsync() -> Command {
    Command::new(env!("CARGO_BIN_EXE_pairsync"))
}

fn fastq(ids: &[&str], mate: u8) -> String {
    ids.iter()
        .enumerate()
        .map(|(i, id)| {
            let seq = ["ACGT", "GGCA", "TTAG"][i % 3];
            format!("@{id} {mate}:N:0:ACGT\n{seq}\n+\nIIII\n")
        })
        .collect()
}

/// Scratch directory holding one pair of input files.
struct Workspace {
    dir: TempDir,
}

impl Workspace {
    fn new(a: &[&str], b: &[&str]) -> Self {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("in_R1.fastq"), fastq(a, 1)).unwrap();
        fs::write(dir.path().join("in_R2.fastq"), fastq(b, 2)).unwrap();
        Self { dir }
    }

    fn path(&self, name: &str) -> PathBuf {
        self.dir.path().join(name)
    }

    fn sync(&self, extra: &[&str]) -> Output {
        self.sync_to("out_R1.fastq", "out_R2.fastq", extra)
    }

    fn sync_to(&self, out1: &str, out2: &str, extra: &[&str]) -> Output {
        pairsync()
            .arg("sync")
            .arg(self.path("in_R1.fastq"))
            .arg(self.path("in_R2.fastq"))
            .arg("-o")
            .arg(self.path(out1))
            .arg("-p")
            .arg(self.path(out2))
            .args(extra)
            .output()
            .expect("Failed to run pairsync sync")
    }

    fn verify(&self, r1: &str, r2: &str) -> Output {
        pairsync()
            .arg("verify")
            .arg(self.path(r1))
            .arg(self.path(r2))
            .output()
            .expect("Failed to run pairsync verify")
    }
}

/// Identifiers of a plain FASTQ file, in file order.
fn ids(path: &Path) -> Vec<String> {
    fs::read_to_string(path)
        .unwrap()
        .lines()
        .step_by(4)
        .map(|h| h[1..].split_whitespace().next().unwrap_or("").to_string())
        .collect()
}

fn stderr(output: &Output) -> String {
    String::from_utf8_lossy(&output.stderr).to_string()
}

#[test]
fn test_sync_intersects_identifiers() {
    let ws = Workspace::new(&["id1", "id2", "id3"], &["id2", "id3", "id4"]);
    let output = ws.sync(&[]);
    assert!(output.status.success(), "stderr: {}", stderr(&output));

    assert_eq!(ids(&ws.path("out_R1.fastq")), vec!["id2", "id3"]);
    assert_eq!(ids(&ws.path("out_R2.fastq")), vec!["id2", "id3"]);

    // Mate headers and sequences are carried through untouched
    let r2 = fs::read_to_string(ws.path("out_R2.fastq")).unwrap();
    assert_eq!(r2, "@id2 2:N:0:ACGT\nACGT\n+\nIIII\n@id3 2:N:0:ACGT\nGGCA\n+\nIIII\n");
}

#[test]
fn test_sync_reorders_shuffled_inputs() {
    let ws = Workspace::new(
        &["r05", "r01", "r03", "r04", "r02"],
        &["r02", "r04", "r06", "r01", "r05"],
    );
    assert!(ws.sync(&[]).status.success());

    let expected = vec!["r01", "r02", "r04", "r05"];
    assert_eq!(ids(&ws.path("out_R1.fastq")), expected);
    assert_eq!(ids(&ws.path("out_R2.fastq")), expected);
    assert!(ws.verify("out_R1.fastq", "out_R2.fastq").status.success());
}

#[test]
fn test_sync_empty_input_gives_empty_outputs() {
    let ws = Workspace::new(&[], &["x", "y"]);
    let output = ws.sync(&[]);
    assert!(output.status.success(), "stderr: {}", stderr(&output));

    assert_eq!(fs::read(ws.path("out_R1.fastq")).unwrap().len(), 0);
    assert_eq!(fs::read(ws.path("out_R2.fastq")).unwrap().len(), 0);
}

#[test]
fn test_sync_duplicate_identifier_fails_cleanly() {
    let ws = Workspace::new(&["id1", "id7", "id7"], &["id1", "id7"]);
    let output = ws.sync(&[]);

    assert!(!output.status.success());
    let err = stderr(&output);
    assert!(err.starts_with("Error: "), "stderr: {}", err);
    assert!(err.contains("id7"), "stderr: {}", err);
    assert!(!ws.path("out_R1.fastq").exists());
    assert!(!ws.path("out_R2.fastq").exists());
}

#[test]
fn test_sync_duplicate_keep_first() {
    let ws = Workspace::new(&["id1", "id7", "id7"], &["id1", "id7"]);
    let output = ws.sync(&["--duplicates", "keep-first", "--stats"]);
    assert!(output.status.success(), "stderr: {}", stderr(&output));

    assert_eq!(ids(&ws.path("out_R1.fastq")), vec!["id1", "id7"]);
    // First occurrence of id7 had sequence GGCA, the second TTAG
    let r1 = fs::read_to_string(ws.path("out_R1.fastq")).unwrap();
    assert!(r1.contains("GGCA") && !r1.contains("TTAG"));
    assert!(stderr(&output).contains("Duplicates A: 1"));
}

#[test]
fn test_sync_malformed_input_fails_without_touching_outputs() {
    let ws = Workspace::new(&["a"], &["a"]);
    fs::write(ws.path("in_R1.fastq"), "@a\nAC\n+\nII\nb\nAC\n+\nII\n").unwrap();
    fs::write(ws.path("out_R2.fastq"), "previous run").unwrap();

    let output = ws.sync(&[]);
    assert!(!output.status.success());
    assert!(stderr(&output).contains("line 5"), "stderr: {}", stderr(&output));

    assert!(!ws.path("out_R1.fastq").exists());
    assert_eq!(
        fs::read_to_string(ws.path("out_R2.fastq")).unwrap(),
        "previous run"
    );
}

#[test]
fn test_sync_truncated_input_fails() {
    let ws = Workspace::new(&["a"], &["a"]);
    fs::write(ws.path("in_R2.fastq"), "@a\nAC\n+\nII\n@b\nAC\n").unwrap();

    let output = ws.sync(&[]);
    assert!(!output.status.success());
    assert!(stderr(&output).contains("Truncated"), "stderr: {}", stderr(&output));
    assert!(!ws.path("out_R1.fastq").exists());
}

#[test]
fn test_sync_missing_input_reports_path() {
    let ws = Workspace::new(&["a"], &["a"]);
    fs::remove_file(ws.path("in_R2.fastq")).unwrap();

    let output = ws.sync(&[]);
    assert!(!output.status.success());
    assert!(stderr(&output).contains("in_R2.fastq"));
    assert!(!ws.path("out_R1.fastq").exists());
}

#[test]
fn test_sync_is_deterministic() {
    let a: Vec<String> = (0..500).map(|i| format!("read{}", (i * 7919) % 500)).collect();
    let b: Vec<String> = (0..500)
        .filter(|i| i % 3 != 0)
        .map(|i| format!("read{}", (i * 104729) % 500))
        .collect();
    let a: Vec<&str> = a.iter().map(String::as_str).collect();
    let b: Vec<&str> = b.iter().map(String::as_str).collect();
    let ws = Workspace::new(&a, &b);

    assert!(ws.sync_to("run1_R1.fastq.gz", "run1_R2.fastq.gz", &[]).status.success());
    assert!(ws
        .sync_to(
            "run2_R1.fastq.gz",
            "run2_R2.fastq.gz",
            &["--chunk-records", "64", "--threads", "2"],
        )
        .status
        .success());

    assert_eq!(
        fs::read(ws.path("run1_R1.fastq.gz")).unwrap(),
        fs::read(ws.path("run2_R1.fastq.gz")).unwrap()
    );
    assert_eq!(
        fs::read(ws.path("run1_R2.fastq.gz")).unwrap(),
        fs::read(ws.path("run2_R2.fastq.gz")).unwrap()
    );
}

#[test]
fn test_sync_output_is_intersection_and_paired() {
    let a: Vec<String> = (0..200).rev().map(|i| format!("frag{}", i * 3)).collect();
    let b: Vec<String> = (0..200).map(|i| format!("frag{}", i * 2)).collect();
    let a: Vec<&str> = a.iter().map(String::as_str).collect();
    let b: Vec<&str> = b.iter().map(String::as_str).collect();
    let ws = Workspace::new(&a, &b);
    assert!(ws.sync(&[]).status.success());

    let out_a = ids(&ws.path("out_R1.fastq"));
    let out_b = ids(&ws.path("out_R2.fastq"));
    let in_a: HashSet<&str> = a.iter().copied().collect();
    let in_b: HashSet<&str> = b.iter().copied().collect();

    assert_eq!(out_a, out_b);
    assert_eq!(out_a.len(), in_a.intersection(&in_b).count());
    assert!(out_a.iter().all(|id| in_a.contains(id.as_str()) && in_b.contains(id.as_str())));
    assert!(out_a.windows(2).all(|w| w[0] < w[1]));
}

#[test]
fn test_sync_numeric_key_order() {
    let ws = Workspace::new(&["10", "2", "007", "1"], &["1", "7", "10", "2"]);
    let output = ws.sync(&["--key-order", "numeric"]);
    assert!(output.status.success(), "stderr: {}", stderr(&output));

    // "007" and "7" are different identifiers
    assert_eq!(ids(&ws.path("out_R1.fastq")), vec!["1", "2", "10"]);
    assert_eq!(ids(&ws.path("out_R2.fastq")), vec!["1", "2", "10"]);
}

#[test]
fn test_sync_numeric_rejects_non_digits() {
    let ws = Workspace::new(&["1", "x2"], &["1"]);
    let output = ws.sync(&["--key-order", "numeric"]);
    assert!(!output.status.success());
    assert!(stderr(&output).contains("x2"));
    assert!(!ws.path("out_R1.fastq").exists());
}

#[test]
fn test_sync_rejects_same_output_twice() {
    let ws = Workspace::new(&["a"], &["a"]);
    let output = ws.sync_to("out.fastq", "out.fastq", &[]);
    assert!(!output.status.success());
    assert!(!ws.path("out.fastq").exists());
}

#[test]
fn test_sync_directory_destination_keeps_other_output() {
    let ws = Workspace::new(&["a", "b"], &["a", "b"]);
    fs::create_dir(ws.path("out_R1.fastq")).unwrap();
    fs::write(ws.path("out_R2.fastq"), "previous run").unwrap();

    let output = ws.sync(&[]);
    assert!(!output.status.success());
    assert!(stderr(&output).contains("out_R1.fastq"), "stderr: {}", stderr(&output));
    assert_eq!(
        fs::read_to_string(ws.path("out_R2.fastq")).unwrap(),
        "previous run"
    );
}

/// Names of leftover temporary files in `dir`.
fn temp_leftovers(dir: &Path) -> Vec<String> {
    fs::read_dir(dir)
        .unwrap()
        .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
        .filter(|name| name.starts_with(".pairsync-"))
        .collect()
}

#[cfg(unix)]
#[test]
fn test_sync_write_failure_names_output_file() {
    let ws = Workspace::new(&[], &[]);
    let data = ws.path("data");
    let output = pairsync()
        .args(["generate", "-n", "500", "--seed", "11", "-o"])
        .arg(&data)
        .output()
        .unwrap();
    assert!(output.status.success(), "stderr: {}", stderr(&output));

    // File size limit of a few KB; writes past it fail with EFBIG
    let output = Command::new("sh")
        .arg("-c")
        .arg("trap '' XFSZ; ulimit -f 8; exec \"$0\" \"$@\"")
        .arg(env!("CARGO_BIN_EXE_pairsync"))
        .arg("sync")
        .arg(data.join("reads_R1.fastq.gz"))
        .arg(data.join("reads_R2.fastq.gz"))
        .arg("-o")
        .arg(ws.path("out_R1.fastq"))
        .arg("-p")
        .arg(ws.path("out_R2.fastq"))
        .args(["--compression", "plain"])
        .output()
        .unwrap();

    assert!(!output.status.success());
    let err = stderr(&output);
    assert!(
        err.contains("out_R1.fastq") || err.contains("out_R2.fastq"),
        "stderr: {}",
        err
    );
    assert!(!ws.path("out_R1.fastq").exists());
    assert!(!ws.path("out_R2.fastq").exists());
    assert!(temp_leftovers(ws.dir.path()).is_empty());
}

#[test]
fn test_verify_rejects_unsynced_inputs() {
    let ws = Workspace::new(&["id1", "id2", "id3"], &["id2", "id3", "id4"]);
    let output = ws.verify("in_R1.fastq", "in_R2.fastq");
    assert!(!output.status.success());
    assert!(stderr(&output).contains("out of sync"));
}

#[test]
fn test_generate_then_sync_then_verify() {
    let dir = tempfile::tempdir().unwrap();
    let data = dir.path().join("data");

    let output = pairsync()
        .args(["generate", "-n", "2K", "--shuffle", "--seed", "3", "-o"])
        .arg(&data)
        .output()
        .unwrap();
    assert!(output.status.success(), "stderr: {}", stderr(&output));

    let out1 = dir.path().join("s_R1.fastq.gz");
    let out2 = dir.path().join("s_R2.fastq.gz");
    let output = pairsync()
        .arg("sync")
        .arg(data.join("reads_R1.fastq.gz"))
        .arg(data.join("reads_R2.fastq.gz"))
        .arg("-o")
        .arg(&out1)
        .arg("-p")
        .arg(&out2)
        .output()
        .unwrap();
    assert!(output.status.success(), "stderr: {}", stderr(&output));

    let output = pairsync()
        .arg("verify")
        .arg(&out1)
        .arg(&out2)
        .arg("--stats")
        .output()
        .unwrap();
    assert!(output.status.success(), "stderr: {}", stderr(&output));
    assert!(stderr(&output).contains("In sync: yes"));
}
