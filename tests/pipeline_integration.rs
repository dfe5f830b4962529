//! End-to-end pipeline tests over a small log corpus.
//!
//! Covers:
//! 1. Filtering, date-time replacement, splitting, extraction, and hashing together
//! 2. Hash table output in delimited and SQL form
//! 3. Moving input to the processed directory after parsing
//! 4. Directory fan-out with independent hash state per file

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use logsieve::config::Inputs;
use logsieve::hash::{hash, HashFormat};
use logsieve::parallel::{parse_directory, parse_file, ParseOptions};
use logsieve::rules::RuleSet;

// =============================================================================
// Fixtures
// =============================================================================

const RULES: &str = r##"{
    "InputDelimiter": "\\s\\s+",
    "ExpectedFieldCount": 8,
    "NegativeFilter": "#|negative\\s+filter",
    "HashColumns": [3, 4, 5, 7],
    "Replacements": [
        {
            "Comment": "timestamps to epoch seconds",
            "RegexString": "(\\d{4}-\\d{2}-\\d{2}[ -]\\d{2}:\\d{2}:\\d{2})",
            "Replacement": ""
        }
    ],
    "Extracts": [
        { "Comment": "numbers inside messages" },
        { "Columns": [7], "RegexString": "(\\d+)", "Submatch": 1, "Token": "{}" }
    ]
}"##;

const DATA: &str = "\
# comment line
2023-10-07 12:00:00.00 MDT  0         0         notification  debug          multi word type     sw_a          Debug SW message
2023-10-07 12:00:00.01 MDT  1         001       notification  info           SingleWordType      sw_b          Info SW message
this line has a negative filter  and is dropped
2023-10-07 12:00:00.02 MDT  1         002       status        info           alphanumeric value  sw_a          Message with alphanumberic value abc123def
";

fn rules_from(json: &str) -> Arc<RuleSet> {
    let inputs = Inputs::from_json(json).unwrap();
    Arc::new(RuleSet::new(&inputs).unwrap())
}

fn write_file(dir: &Path, name: &str, contents: &str) -> PathBuf {
    let path = dir.join(name);
    fs::write(&path, contents).unwrap();
    path
}

// =============================================================================
// Tests
// =============================================================================

#[test]
fn test_full_pipeline_delimited() {
    let input_dir = tempfile::tempdir().unwrap();
    let output_dir = tempfile::tempdir().unwrap();
    let data = write_file(input_dir.path(), "test_read.txt", DATA);

    let options = ParseOptions::new(output_dir.path());
    let out = parse_file(rules_from(RULES), &data, &options).unwrap();

    assert_eq!(out.stats.lines_read, 5);
    assert_eq!(out.stats.lines_filtered, 2);
    assert_eq!(out.stats.rows_written, 3);
    assert_eq!(out.stats.field_count_errors, 0);
    assert_eq!(out.stats.extract_errors, 0);
    assert_eq!(out.stats.distinct_hashes, 3);

    let parsed = fs::read_to_string(&out.parsed).unwrap();
    let rows: Vec<&str> = parsed.lines().collect();
    assert_eq!(rows.len(), 3);

    let third_hash = hash(
        "status|info|alphanumeric value|Message with alphanumberic value abc{}def",
        HashFormat::String,
    );
    assert_eq!(
        rows[2],
        format!("1696680000.02 MDT|1|002|{}|sw_a|EXTRACTS|123", third_hash)
    );
    assert!(rows[0].starts_with("1696680000.00 MDT|0|0|'0x"));
    assert!(rows[0].ends_with("|sw_a|EXTRACTS|"));
}

#[test]
fn test_hash_table_delimited() {
    let input_dir = tempfile::tempdir().unwrap();
    let output_dir = tempfile::tempdir().unwrap();
    let data = write_file(input_dir.path(), "test_read.txt", DATA);

    let options = ParseOptions::new(output_dir.path());
    let out = parse_file(rules_from(RULES), &data, &options).unwrap();

    let hashes_path = out.hashes.unwrap();
    assert_eq!(hashes_path, output_dir.path().join("test_read.txt.hashes.txt"));
    let hashes = fs::read_to_string(hashes_path).unwrap();
    let lines: Vec<&str> = hashes.lines().collect();

    // Equal counts keep first-seen order.
    let first_value = "notification|debug|multi word type|Debug SW message";
    assert_eq!(
        lines[0],
        format!("{}|{}", hash(first_value, HashFormat::String), first_value)
    );
    assert_eq!(lines.len(), 3);
}

#[test]
fn test_sql_output() {
    let input_dir = tempfile::tempdir().unwrap();
    let output_dir = tempfile::tempdir().unwrap();
    let data = write_file(input_dir.path(), "test_read.txt", DATA);

    let options = ParseOptions {
        sql_columns: 7,
        ..ParseOptions::new(output_dir.path())
    };
    let out = parse_file(rules_from(RULES), &data, &options).unwrap();

    let parsed = fs::read_to_string(&out.parsed).unwrap();
    let third_hash = hash(
        "status|info|alphanumeric value|Message with alphanumberic value abc{}def",
        HashFormat::Sql,
    );
    assert_eq!(
        parsed.lines().nth(2).unwrap(),
        format!(
            "INSERT OR IGNORE INTO data VALUES(1696680000.02 MDT,1,002,{},sw_a,'123',NULL);",
            third_hash
        )
    );

    let hashes = fs::read_to_string(out.hashes.unwrap()).unwrap();
    for line in hashes.lines() {
        assert!(line.starts_with("INSERT INTO hash VALUES(x'"));
        assert!(line.ends_with("');"));
    }
}

#[test]
fn test_processed_input_is_moved() {
    let input_dir = tempfile::tempdir().unwrap();
    let processed_dir = tempfile::tempdir().unwrap();
    let output_dir = tempfile::tempdir().unwrap();
    let data = write_file(input_dir.path(), "test_read.txt", DATA);

    let mut inputs = Inputs::from_json(RULES).unwrap();
    inputs.processed_input_directory = Some(processed_dir.path().to_path_buf());
    let rules = Arc::new(RuleSet::new(&inputs).unwrap());

    let options = ParseOptions::new(output_dir.path());
    let out = parse_file(rules, &data, &options).unwrap();

    assert_eq!(out.stats.read_errors, 0);
    assert!(!data.exists());
    let moved = fs::read_to_string(processed_dir.path().join("test_read.txt")).unwrap();
    assert_eq!(moved, DATA);
}

#[test]
fn test_field_count_mismatch_is_not_fatal() {
    let input_dir = tempfile::tempdir().unwrap();
    let output_dir = tempfile::tempdir().unwrap();
    let data = write_file(
        input_dir.path(),
        "short.txt",
        "only  three  fields\n2023-10-07 12:00:00.00 MDT  0  0  a  b  c  d  e 7\n",
    );

    let json = r#"{ "InputDelimiter": "\\s\\s+", "ExpectedFieldCount": 8 }"#;
    let options = ParseOptions::new(output_dir.path());
    let out = parse_file(rules_from(json), &data, &options).unwrap();

    assert_eq!(out.stats.field_count_errors, 1);
    assert_eq!(out.stats.rows_written, 2);
    let parsed = fs::read_to_string(&out.parsed).unwrap();
    assert_eq!(parsed.lines().next().unwrap(), "only|three|fields|EXTRACTS|");
}

#[test]
fn test_directory_files_hashed_independently() {
    let input_dir = tempfile::tempdir().unwrap();
    let output_dir = tempfile::tempdir().unwrap();
    write_file(input_dir.path(), "a.txt", DATA);
    write_file(input_dir.path(), "b.txt", DATA);

    let options = ParseOptions::new(output_dir.path());
    let stats = parse_directory(&rules_from(RULES), input_dir.path(), &options).unwrap();

    assert_eq!(stats.lines_read, 10);
    assert_eq!(stats.rows_written, 6);
    assert_eq!(stats.distinct_hashes, 6);
    let a = fs::read_to_string(output_dir.path().join("a.txt.hashes.txt")).unwrap();
    let b = fs::read_to_string(output_dir.path().join("b.txt.hashes.txt")).unwrap();
    assert_eq!(a, b);
}
