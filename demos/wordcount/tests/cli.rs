use assert_cmd::Command;
use predicates::prelude::*;
use std::fs;
use std::path::Path;

fn wordcount() -> Command {
    Command::cargo_bin("wordcount").unwrap()
}

fn read_sorted_output(out: &Path) -> Vec<String> {
    let mut lines = Vec::new();
    for entry in fs::read_dir(out).unwrap() {
        let path = entry.unwrap().path();
        if path.extension().and_then(|e| e.to_str()) == Some("tsv") {
            lines.extend(fs::read_to_string(&path).unwrap().lines().map(String::from));
        }
    }
    lines.sort();
    lines
}

#[test]
fn missing_arguments_exit_with_usage_error() {
    wordcount().assert().failure().code(2).stderr(predicate::str::contains("Usage"));
}

#[test]
fn counts_a_corpus_end_to_end() {
    let dir = tempfile::tempdir().unwrap();
    let input = dir.path().join("input");
    fs::create_dir_all(&input).unwrap();
    fs::write(input.join("a.txt"), "The fox jumps\nthe Fox dog\n").unwrap();
    let out = dir.path().join("out");

    wordcount()
        .current_dir(dir.path())
        .arg(&input)
        .arg(&out)
        .args(["--reducers", "1"])
        .assert()
        .success()
        .stdout(predicate::str::contains("INPUT_WORDS=6"));

    assert_eq!(
        fs::read_to_string(out.join("part-00000.tsv")).unwrap(),
        "dog\t1\nfox\t2\njumps\t1\nthe\t2\n"
    );
}

#[test]
fn skip_file_filters_tokens() {
    let dir = tempfile::tempdir().unwrap();
    let input = dir.path().join("input");
    fs::create_dir_all(&input).unwrap();
    fs::write(input.join("a.txt"), "the fox jumps\n").unwrap();
    let skip = dir.path().join("skip.txt");
    fs::write(&skip, "fox\n").unwrap();
    let out = dir.path().join("out");

    wordcount()
        .current_dir(dir.path())
        .arg(&input)
        .arg(&out)
        .args(["--reducers", "1"])
        .arg("--skip")
        .arg(&skip)
        .assert()
        .success()
        .stdout(predicate::str::contains("INPUT_WORDS=2"));

    assert_eq!(read_sorted_output(&out), ["jumps\t1", "the\t1"]);
}

#[test]
fn existing_output_fails_unless_overwritten() {
    let dir = tempfile::tempdir().unwrap();
    let input = dir.path().join("input");
    fs::create_dir_all(&input).unwrap();
    fs::write(input.join("a.txt"), "the fox\n").unwrap();
    let out = dir.path().join("out");
    fs::create_dir_all(&out).unwrap();

    wordcount()
        .current_dir(dir.path())
        .arg(&input)
        .arg(&out)
        .assert()
        .failure()
        .code(1)
        .stderr(predicate::str::contains("already exists"));

    wordcount()
        .current_dir(dir.path())
        .arg(&input)
        .arg(&out)
        .arg("--overwrite")
        .assert()
        .success();
    assert_eq!(read_sorted_output(&out), ["fox\t1", "the\t1"]);
}

#[test]
fn strict_mode_fails_on_malformed_input() {
    let dir = tempfile::tempdir().unwrap();
    let input = dir.path().join("input");
    fs::create_dir_all(&input).unwrap();
    fs::write(input.join("bad.txt"), b"fine\n\xFF\xFEbroken\n".as_slice()).unwrap();
    let out = dir.path().join("out");

    wordcount()
        .current_dir(dir.path())
        .arg(&input)
        .arg(&out)
        .arg("--strict")
        .assert()
        .failure()
        .stderr(predicate::str::contains("malformed record"));
}

#[test]
fn preview_prints_output_lines() {
    let dir = tempfile::tempdir().unwrap();
    let input = dir.path().join("input");
    fs::create_dir_all(&input).unwrap();
    fs::write(input.join("a.txt"), "b a a\n").unwrap();
    let out = dir.path().join("out");

    wordcount()
        .current_dir(dir.path())
        .arg(&input)
        .arg(&out)
        .args(["--reducers", "1", "--preview", "1"])
        .assert()
        .success()
        .stdout(predicate::str::contains("a\t2"));
}
