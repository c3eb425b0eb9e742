//! The proxy binary as a launcher and as a CLI, without a host compiler.

#![cfg(unix)]

mod harness;

use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::process::Command;

use harness::{assert_success, PROXY};
use kiln_env::EnvLayer;
use kiln_pack::{PackWrapper, WrapOptions, WrappingService, EXTRA_DIRS_VAR, RESOURCE_DIR_NAME};

fn script(dir: &std::path::Path) -> std::path::PathBuf {
    let path = dir.join("greet");
    fs::write(&path, "#!/bin/sh\necho \"$GREETING $*\"\n").unwrap();
    fs::set_permissions(&path, fs::Permissions::from_mode(0o755)).unwrap();
    path
}

#[test]
fn wrapped_program_gets_its_args_and_env() {
    let dir = tempfile::tempdir().unwrap();
    let program = script(dir.path());
    let out = dir.path().join("out/greet");
    fs::create_dir_all(out.parent().unwrap()).unwrap();

    let options = WrapOptions {
        args: vec!["from".to_string()],
        env: EnvLayer::new().set("GREETING", "hello"),
        ..WrapOptions::default()
    };
    PackWrapper::new(PROXY).wrap(&program, &options, &out).unwrap();
    fs::remove_file(&program).unwrap();

    let run = Command::new(&out).arg("kiln").env("GREETING", "ignored").output().unwrap();
    assert_success(&run, "wrapped script");
    assert_eq!(String::from_utf8_lossy(&run.stdout), "hello from kiln\n");
}

#[test]
fn installed_wrapper_finds_resources_in_its_prefix() {
    let dir = tempfile::tempdir().unwrap();
    let work = dir.path().join("work/build");
    let prefix = dir.path().join("out");
    fs::create_dir_all(&work).unwrap();
    let program = script(dir.path());
    let resources = prefix.join(RESOURCE_DIR_NAME);

    let built = work.join("greet");
    PackWrapper::new(PROXY)
        .with_resource_dir(&resources)
        .wrap(&program, &WrapOptions::default(), &built)
        .unwrap();
    fs::remove_file(&program).unwrap();

    let run = Command::new(&built)
        .arg("build tree")
        .env(EXTRA_DIRS_VAR, &resources)
        .output()
        .unwrap();
    assert_success(&run, "wrapper in the build tree");

    let installed = prefix.join("bin/greet");
    fs::create_dir_all(installed.parent().unwrap()).unwrap();
    fs::copy(&built, &installed).unwrap();
    fs::remove_dir_all(dir.path().join("work")).unwrap();

    let run = Command::new(&installed).arg("installed").env_remove(EXTRA_DIRS_VAR).env_remove("GREETING").output().unwrap();
    assert_success(&run, "installed wrapper");
    assert_eq!(String::from_utf8_lossy(&run.stdout), " installed\n");
}

#[test]
fn unwrap_extracts_the_program() {
    let dir = tempfile::tempdir().unwrap();
    let program = script(dir.path());
    let wrapped = dir.path().join("wrapped");
    PackWrapper::new(PROXY)
        .wrap(&program, &WrapOptions::default(), &wrapped)
        .unwrap();

    let extracted = dir.path().join("extracted");
    let out = Command::new(PROXY)
        .arg("unwrap")
        .arg(&wrapped)
        .arg("-o")
        .arg(&extracted)
        .output()
        .unwrap();
    assert_success(&out, "unwrap");
    assert_eq!(fs::read(&extracted).unwrap(), fs::read(&program).unwrap());
}

#[test]
fn inspect_rejects_plain_files() {
    let dir = tempfile::tempdir().unwrap();
    let program = script(dir.path());
    let out = Command::new(PROXY).arg("inspect").arg(&program).output().unwrap();
    assert!(!out.status.success());
    assert!(String::from_utf8_lossy(&out.stderr).contains("not a wrapped executable"));
}

#[test]
fn proxy_role_without_config_fails_cleanly() {
    let dir = tempfile::tempdir().unwrap();
    let link = dir.path().join("cc");
    std::os::unix::fs::symlink(PROXY, &link).unwrap();
    let out = Command::new(&link).arg("--version").output().unwrap();
    assert_eq!(out.status.code(), Some(1));
    assert!(String::from_utf8_lossy(&out.stderr).contains("kiln-proxy.json"));
}
