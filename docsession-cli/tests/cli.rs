use std::fs;
use std::path::Path;

use assert_cmd::Command;
use predicates::prelude::*;

const TWO_PAGES: &[u8] = b"%PDF-1.4
1 0 obj << /Type /Catalog /Pages 2 0 R >> endobj
2 0 obj << /Type /Pages /Kids [3 0 R 4 0 R] /Count 2 >> endobj
3 0 obj << /Type /Page /Parent 2 0 R >> endobj
4 0 obj << /Type /Page /Parent 2 0 R >> endobj
5 0 obj << /Title (Quarterly Report) >> endobj
trailer << /Root 1 0 R /Info 5 0 R >>
%%EOF";

fn docsession(home: &Path) -> Command {
    let mut cmd = Command::cargo_bin("docsession").unwrap();
    cmd.env("HOME", home)
        .env("XDG_DATA_HOME", home.join("data"))
        .env("XDG_CONFIG_HOME", home.join("config"))
        .env_remove("RUST_LOG");
    cmd
}

#[test]
fn help_lists_options() {
    let home = tempfile::tempdir().unwrap();
    docsession(home.path())
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("--download"))
        .stdout(predicate::str::contains("--viewer-url"));
}

#[test]
fn missing_file_is_reported_and_fails() {
    let home = tempfile::tempdir().unwrap();
    docsession(home.path())
        .args(["--decoder", "scan", "--download"])
        .arg(home.path().join("out"))
        .arg(home.path().join("absent.pdf"))
        .assert()
        .failure()
        .stderr(predicate::str::contains("error: Missing PDF file."));
}

#[test]
fn foreign_origin_is_rejected() {
    let home = tempfile::tempdir().unwrap();
    docsession(home.path())
        .args([
            "--decoder",
            "scan",
            "--viewer-url",
            "https://viewer.example/web/viewer.html",
            "https://other.example/a.pdf",
        ])
        .assert()
        .failure()
        .stderr(predicate::str::contains("file origin does not match viewer's"));
}

#[test]
fn opens_and_saves_a_local_document() {
    let home = tempfile::tempdir().unwrap();
    let source = home.path().join("report.pdf");
    fs::write(&source, TWO_PAGES).unwrap();
    let out = home.path().join("out");

    docsession(home.path())
        .args(["--decoder", "scan", "--download"])
        .arg(&out)
        .arg(&source)
        .assert()
        .success()
        .stdout(predicate::str::contains("Quarterly Report: 2 pages"))
        .stdout(predicate::str::contains("saved "));

    assert_eq!(fs::read(out.join("report.pdf")).unwrap(), TWO_PAGES);
}

#[test]
fn corrupt_file_uses_configured_message() {
    let home = tempfile::tempdir().unwrap();
    let source = home.path().join("broken.pdf");
    fs::write(&source, b"not a pdf").unwrap();
    let config = home.path().join("viewer.toml");
    fs::write(
        &config,
        "[messages]\ninvalid_file_error = \"Fichier PDF invalide.\"\n",
    )
    .unwrap();

    docsession(home.path())
        .args(["--decoder", "scan", "--config"])
        .arg(&config)
        .arg(&source)
        .assert()
        .failure()
        .stderr(predicate::str::contains("error: Fichier PDF invalide."));
}
