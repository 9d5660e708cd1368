use assert_cmd::prelude::*;
use predicates::prelude::*;
use rand::{thread_rng, Rng};
use std::fs;
use std::path::Path;
use std::process::Command;
use tempfile::tempdir;

fn write_random_file(p: &Path, sz: usize) {
    if let Some(parent) = p.parent() {
        fs::create_dir_all(parent).unwrap();
    }
    let mut buf = vec![0u8; sz];
    thread_rng().fill(&mut buf[..]);
    fs::write(p, &buf).unwrap();
}

fn bitum(workdir: &Path) -> Command {
    let mut cmd = Command::cargo_bin("bitum").unwrap();
    cmd.arg("--workdir").arg(workdir);
    for var in ["BITUM_BUCKET", "BITUM_PREFIX", "BITUM_REMOTE_DIR", "BITUM_WORKDIR", "RUST_LOG"] {
        cmd.env_remove(var);
    }
    cmd
}

fn assert_same_tree(a: &Path, b: &Path, files: &[&str]) {
    for rel in files {
        assert_eq!(fs::read(a.join(rel)).unwrap(), fs::read(b.join(rel)).unwrap(), "{rel}");
    }
}

#[test]
fn test_cli_build_diff_extract_cycle() -> Result<(), Box<dyn std::error::Error>> {
    let src = tempdir()?;
    write_random_file(&src.path().join("small.txt"), 100);
    write_random_file(&src.path().join("nested/mid.bin"), 5000);
    write_random_file(&src.path().join("nested/deeper/big.dat"), 300_000);
    let ws = tempdir()?;

    bitum(ws.path())
        .args(["debug", "build", "--dry-run"])
        .arg(src.path())
        .assert()
        .success()
        .stdout(predicate::str::contains("Total: 3 files"));
    assert!(!ws.path().join("bitumen.sqlite3").exists());

    bitum(ws.path())
        .args(["debug", "build"])
        .arg(src.path())
        .assert()
        .success()
        .stdout(predicate::str::contains("tier-256B: 1 files"));
    assert!(ws.path().join("tier-256B.bitumen").exists());
    assert!(ws.path().join("tier-1MiB.bitumen").exists());

    bitum(ws.path())
        .args(["debug", "diff-local"])
        .arg(src.path())
        .assert()
        .success()
        .stdout(predicate::str::contains("No changes"));

    let out = tempdir()?;
    bitum(ws.path()).arg("extract").arg(out.path()).assert().success();
    assert_same_tree(src.path(), out.path(), &["small.txt", "nested/mid.bin", "nested/deeper/big.dat"]);

    bitum(ws.path())
        .args(["debug", "extract-single-file", "nested/mid.bin", "-o"])
        .arg(out.path().join("single"))
        .assert()
        .success();
    assert_eq!(
        fs::read(out.path().join("single/mid.bin"))?,
        fs::read(src.path().join("nested/mid.bin"))?
    );
    Ok(())
}

#[test]
fn test_cli_diff_local_lists_changes() -> Result<(), Box<dyn std::error::Error>> {
    let src = tempdir()?;
    write_random_file(&src.path().join("keep.txt"), 10);
    write_random_file(&src.path().join("change.txt"), 10);
    let ws = tempdir()?;
    bitum(ws.path()).args(["debug", "build"]).arg(src.path()).assert().success();

    write_random_file(&src.path().join("change.txt"), 20);
    write_random_file(&src.path().join("newdir/a"), 1);
    write_random_file(&src.path().join("newdir/b"), 1);

    bitum(ws.path())
        .args(["debug", "diff-local", "--list"])
        .arg(src.path())
        .assert()
        .success()
        .stdout(
            predicate::str::contains("S /change.txt")
                .and(predicate::str::contains("+ /newdir/a"))
                .and(predicate::str::contains("+ /newdir/b")),
        );

    bitum(ws.path())
        .args(["debug", "diff-local", "--list", "--dir-norecurse"])
        .arg(src.path())
        .assert()
        .success()
        .stdout(predicate::str::contains("+ /newdir/").and(predicate::str::contains("/newdir/a").not()));

    let output = bitum(ws.path())
        .args(["debug", "diff-local", "--json", "--skip-sizes", "--skip-hashes"])
        .arg(src.path())
        .output()?;
    assert!(output.status.success());
    let report: serde_json::Value = serde_json::from_slice(&output.stdout)?;
    assert_eq!(report["a"], "local-db");
    assert_eq!(report["changes"].as_array().map(Vec::len), Some(2));
    Ok(())
}

#[test]
fn test_cli_upload_download_roundtrip() -> Result<(), Box<dyn std::error::Error>> {
    let src = tempdir()?;
    write_random_file(&src.path().join("a.txt"), 1234);
    write_random_file(&src.path().join("sub/b.bin"), 40_000);
    let ws = tempdir()?;
    let remote = tempdir()?;

    bitum(ws.path())
        .arg("upload")
        .arg(src.path())
        .arg("--create")
        .arg("--remote-dir")
        .arg(remote.path())
        .assert()
        .success()
        .stdout(predicate::str::contains("Total: 2 files"));
    assert!(remote.path().join("bitumen.sqlite3").exists());

    bitum(ws.path())
        .args(["debug", "check-sizes", "--remote-dir"])
        .arg(remote.path())
        .assert()
        .success()
        .stdout(predicate::str::contains("bitumen.sqlite3: OK"));

    let dest = tempdir()?;
    bitum(ws.path())
        .arg("download")
        .arg(dest.path())
        .arg("--remote-dir")
        .arg(remote.path())
        .assert()
        .success()
        .stdout(predicate::str::contains("Fetched 2 files"));
    assert_same_tree(src.path(), dest.path(), &["a.txt", "sub/b.bin"]);

    write_random_file(&src.path().join("later.txt"), 5);
    bitum(ws.path())
        .args(["debug", "integrity", "remote-db", "local-files", "--list", "--remote-dir"])
        .arg(remote.path())
        .arg(src.path())
        .assert()
        .success()
        .stdout(predicate::str::contains("+ /later.txt"));
    Ok(())
}

#[test]
fn test_cli_upload_all_download_all() -> Result<(), Box<dyn std::error::Error>> {
    let src = tempdir()?;
    write_random_file(&src.path().join("one"), 10);
    write_random_file(&src.path().join("two"), 2000);
    let ws = tempdir()?;
    let remote = tempdir()?;
    bitum(ws.path()).args(["debug", "build"]).arg(src.path()).assert().success();

    bitum(ws.path())
        .args(["debug", "upload-all", "--prefix", "p", "--remote-dir"])
        .arg(remote.path())
        .assert()
        .success()
        .stdout(predicate::str::contains("Uploaded 3 objects"));
    assert!(remote.path().join("p/tier-256B.bitumen").exists());

    let ws2 = tempdir()?;
    bitum(ws2.path())
        .args(["debug", "download-all", "--prefix", "p", "--remote-dir"])
        .arg(remote.path())
        .assert()
        .success();
    let out = tempdir()?;
    bitum(ws2.path()).arg("extract").arg(out.path()).assert().success();
    assert_same_tree(src.path(), out.path(), &["one", "two"]);
    Ok(())
}

#[test]
fn test_cli_upload_without_index_asks_first() -> Result<(), Box<dyn std::error::Error>> {
    let src = tempdir()?;
    write_random_file(&src.path().join("a"), 3);
    let ws = tempdir()?;
    let remote = tempdir()?;

    let mut cmd = assert_cmd::Command::cargo_bin("bitum")?;
    cmd.arg("--workdir")
        .arg(ws.path())
        .arg("upload")
        .arg(src.path())
        .arg("--remote-dir")
        .arg(remote.path())
        .write_stdin("n\n")
        .assert()
        .failure()
        .stdout(predicate::str::contains("do you want to continue?"))
        .stderr(predicate::str::contains("aborted"));
    assert!(!remote.path().join("bitumen.sqlite3").exists());
    Ok(())
}

#[test]
fn test_cli_reports_fatal_errors() -> Result<(), Box<dyn std::error::Error>> {
    let ws = tempdir()?;
    bitum(ws.path())
        .args(["debug", "build"])
        .arg(ws.path().join("missing"))
        .assert()
        .failure()
        .stderr(predicate::str::contains("does not exist"));

    bitum(ws.path())
        .args(["debug", "build", "-e", "("])
        .arg(ws.path())
        .assert()
        .failure()
        .stderr(predicate::str::contains("invalid exclusion pattern"));

    bitum(ws.path())
        .args(["debug", "upload-all"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("no remote configured"));
    Ok(())
}

#[test]
fn test_cli_missing_dir_is_fatal_for_every_command() -> Result<(), Box<dyn std::error::Error>> {
    let src = tempdir()?;
    write_random_file(&src.path().join("a"), 7);
    let ws = tempdir()?;
    let remote = tempdir()?;
    bitum(ws.path()).args(["debug", "build"]).arg(src.path()).assert().success();
    let index_before = fs::read(ws.path().join("bitumen.sqlite3"))?;
    let missing = ws.path().join("typo");

    bitum(ws.path())
        .arg("upload")
        .arg(&missing)
        .arg("--create")
        .arg("--remote-dir")
        .arg(remote.path())
        .assert()
        .failure()
        .stderr(predicate::str::contains("does not exist"));
    assert_eq!(fs::read(ws.path().join("bitumen.sqlite3"))?, index_before);
    assert!(!remote.path().join("bitumen.sqlite3").exists());

    bitum(ws.path()).args(["debug", "upload-all", "--remote-dir"]).arg(remote.path()).assert().success();
    bitum(ws.path())
        .arg("download")
        .arg(&missing)
        .arg("--remote-dir")
        .arg(remote.path())
        .assert()
        .failure()
        .stderr(predicate::str::contains("does not exist"));
    assert!(!missing.exists());

    bitum(ws.path())
        .arg("extract")
        .arg(&missing)
        .assert()
        .failure()
        .stderr(predicate::str::contains("does not exist"));
    assert!(!missing.exists());
    Ok(())
}
