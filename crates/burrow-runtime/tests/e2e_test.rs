//! End-to-end tests for the burrow runtime.
//!
//! These run the engine against a temporary data directory with an
//! in-memory settings cache and a `chroot` stand-in that runs commands on
//! the host, so no support bundle is needed:
//! 1. Run from a directory rootfs (passive and launched)
//! 2. Remap settings through the cache
//! 3. Destroy semantics
//! 4. Expose wrappers
//! 5. Commit and create from the committed image

#![allow(clippy::expect_used, clippy::unwrap_used, clippy::panic)]

use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};

use burrow_cache::memory::MemoryCache;
use burrow_common::config::BurrowConfig;
use burrow_common::types::{ContainerId, ContainerStatus};
use burrow_core::remap::RemapKind;
use burrow_core::shim::{CapabilityShim, ChrootShim};
use burrow_image::reference::ImageRef;
use burrow_runtime::container::ContainerBase;
use burrow_runtime::engine::{Engine, RunOptions};
use burrow_runtime::launcher::Launcher;

struct Fixture {
    dir: tempfile::TempDir,
    engine: Engine,
    launcher: Launcher,
}

impl Fixture {
    fn new() -> Self {
        Self::build(true)
    }

    fn without_cache() -> Self {
        Self::build(false)
    }

    fn build(with_cache: bool) -> Self {
        let dir = tempfile::tempdir().expect("tempdir");
        let config = BurrowConfig::with_data_dir(dir.path().join("data"));
        let mut engine = Engine::open(config).expect("open engine");
        if with_cache {
            engine = engine.with_cache(Box::new(MemoryCache::new()));
        }

        let chroot = dir.path().join("fake-chroot");
        fs::write(&chroot, "#!/bin/sh\nshift\nexec \"$@\"\n").expect("write chroot");
        fs::set_permissions(&chroot, fs::Permissions::from_mode(0o755)).expect("chmod");
        let shims: Vec<Box<dyn CapabilityShim>> =
            vec![Box::new(ChrootShim::new(dir.path().join("libfakechroot.so")))];
        let launcher = Launcher::with_shims(dir.path().join("sys"), chroot, shims);

        Self {
            dir,
            engine,
            launcher,
        }
    }

    /// A source directory with a tiny rootfs and the given settings.
    fn source(&self, name: &str, settings: &str) -> PathBuf {
        let src = self.dir.path().join(name);
        fs::create_dir_all(src.join("rootfs/usr/bin")).expect("mkdir");
        fs::create_dir_all(src.join("rootfs/etc")).expect("mkdir");
        fs::write(src.join("rootfs/etc/hostname"), "burrow\n").expect("write");
        fs::write(src.join("rootfs/usr/bin/tool"), "#!/bin/sh\n").expect("write");
        fs::write(src.join("setting.yml"), settings).expect("write settings");
        src
    }

    fn passive(&self, src: &Path) -> RunOptions {
        RunOptions {
            source_dir: src.to_path_buf(),
            config_path: None,
            passive: true,
        }
    }
}

// ── Run ──────────────────────────────────────────────────────────────

#[test]
fn passive_run_registers_once_per_source_directory() {
    let fx = Fixture::new();
    let src = fx.source("app", "rootfs: rootfs\nname: app\n");

    let first = fx
        .engine
        .run(&fx.passive(&src), &fx.launcher, None)
        .expect("first run");
    assert!(first.created);
    assert!(first.exit_code.is_none());
    assert_eq!(first.record.status, ContainerStatus::Created);
    assert_eq!(first.record.name.as_deref(), Some("app"));
    assert!(matches!(first.record.base, ContainerBase::Directory { .. }));

    let second = fx
        .engine
        .run(&fx.passive(&src), &fx.launcher, None)
        .expect("second run");
    assert!(!second.created);
    assert_eq!(second.record.id, first.record.id);
    assert_eq!(fx.engine.list().expect("list").len(), 1);
}

#[test]
fn run_without_settings_file_is_not_found() {
    let fx = Fixture::new();
    let src = fx.dir.path().join("empty");
    fs::create_dir_all(&src).expect("mkdir");
    let err = fx
        .engine
        .run(&fx.passive(&src), &fx.launcher, None)
        .unwrap_err();
    assert_eq!(err.kind(), "not_found");
}

#[test]
fn launched_command_changes_are_captured_into_writable_layer() {
    let fx = Fixture::new();
    let src = fx.source(
        "writer",
        "rootfs: rootfs\ncommand: [/bin/sh, -c, 'echo done > \"$FAKECHROOT_BASE/result\"; rm \"$FAKECHROOT_BASE/etc/hostname\"; exit 7']\n",
    );

    let outcome = fx
        .engine
        .run(
            &RunOptions {
                passive: false,
                ..fx.passive(&src)
            },
            &fx.launcher,
            None,
        )
        .expect("run");

    assert_eq!(outcome.exit_code, Some(7));
    assert_eq!(outcome.record.status, ContainerStatus::Stopped);
    let rw = &outcome.record.writable_path;
    assert_eq!(fs::read_to_string(rw.join("result")).expect("read"), "done\n");
    assert!(rw.join("etc/.wh.hostname").exists());
    assert!(src.join("rootfs/etc/hostname").exists(), "source rootfs untouched");

    let code = fx
        .engine
        .resume(
            &outcome.record.id,
            &["/bin/sh".into(), "-c".into(), "test ! -e \"$FAKECHROOT_BASE/etc/hostname\"".into()],
            &fx.launcher,
        )
        .expect("resume");
    assert_eq!(code, 0, "deletion survives a resume");
}

// ── Settings cache ───────────────────────────────────────────────────

#[test]
fn remap_is_published_and_malformed_mapping_changes_nothing() {
    let fx = Fixture::new();
    let src = fx.source("remap", "rootfs: rootfs\n");
    let id = fx
        .engine
        .run(&fx.passive(&src), &fx.launcher, None)
        .expect("run")
        .record
        .id;

    let table = fx
        .engine
        .set_remap(&id, RemapKind::AddMap, "python3", "/etc/a:/tmp/a;/etc/b:/tmp/b")
        .expect("set");
    assert_eq!(table.resolve("python3", "/etc/b"), Some("/tmp/b"));
    assert_eq!(
        fx.engine.get(&id, "python3").expect("get"),
        "/etc/a:/tmp/a;/etc/b:/tmp/b"
    );

    let err = fx
        .engine
        .set_remap(&id, RemapKind::AddMap, "python3", "/etc/c:/tmp/c;broken")
        .unwrap_err();
    assert_eq!(err.kind(), "malformed_input");
    let stored = fx.engine.container(&id).expect("record").remap_table;
    assert_eq!(stored, table);
    assert_eq!(
        fx.engine.get(&id, "python3").expect("get"),
        "/etc/a:/tmp/a;/etc/b:/tmp/b"
    );

    let _ = fx
        .engine
        .set_remap(&id, RemapKind::RemoveMap, "python3", "/etc/a:/tmp/a;/etc/b:/tmp/b")
        .expect("remove");
    assert_eq!(fx.engine.get(&id, "python3").unwrap_err().kind(), "not_found");
}

#[test]
fn rejected_program_name_leaves_remap_untouched() {
    let fx = Fixture::new();
    let src = fx.source("badprog", "rootfs: rootfs\n");
    let id = fx
        .engine
        .run(&fx.passive(&src), &fx.launcher, None)
        .expect("run")
        .record
        .id;
    let table = fx
        .engine
        .set_remap(&id, RemapKind::AddMap, "python3", "/etc/a:/tmp/a")
        .expect("set");

    let overlong = "p".repeat(260);
    for prog in ["my prog", "remap", overlong.as_str()] {
        let err = fx
            .engine
            .set_remap(&id, RemapKind::AddMap, prog, "/a:/b")
            .unwrap_err();
        assert_eq!(err.kind(), "malformed_input", "{prog}");
        assert_eq!(fx.engine.container(&id).expect("record").remap_table, table);
    }
    assert_eq!(fx.engine.get(&id, "python3").expect("get"), "/etc/a:/tmp/a");
    assert!(fx.engine.get(&id, "remap").expect("table").contains("/etc/a"));
}

#[test]
fn get_and_set_need_the_cache() {
    let fx = Fixture::without_cache();
    let src = fx.source("nocache", "rootfs: rootfs\n");
    let id = fx
        .engine
        .run(&fx.passive(&src), &fx.launcher, None)
        .expect("run")
        .record
        .id;
    assert_eq!(
        fx.engine.get(&id, "x").unwrap_err().kind(),
        "external_service_unavailable"
    );
    assert_eq!(
        fx.engine
            .set_remap(&id, RemapKind::AddMap, "x", "/a:/b")
            .unwrap_err()
            .kind(),
        "external_service_unavailable"
    );
}

// ── Destroy ──────────────────────────────────────────────────────────

#[test]
fn destroy_twice_reports_not_found_and_keeps_other_containers() {
    let fx = Fixture::new();
    let a = fx
        .engine
        .run(&fx.passive(&fx.source("a", "rootfs: rootfs\n")), &fx.launcher, None)
        .expect("run a")
        .record;
    let b = fx
        .engine
        .run(&fx.passive(&fx.source("b", "rootfs: rootfs\n")), &fx.launcher, None)
        .expect("run b")
        .record;

    fx.engine.destroy(&a.id).expect("destroy");
    assert!(!a.writable_path.exists());
    assert_eq!(fx.engine.destroy(&a.id).unwrap_err().kind(), "not_found");

    let remaining = fx.engine.list().expect("list");
    assert_eq!(remaining.len(), 1);
    assert_eq!(remaining[0].id, b.id);
}

#[test]
fn destroy_unknown_id_is_not_found() {
    let fx = Fixture::new();
    let err = fx.engine.destroy(&ContainerId::new("nope")).unwrap_err();
    assert_eq!(err.kind(), "not_found");
}

// ── Expose ───────────────────────────────────────────────────────────

#[test]
fn expose_writes_resume_wrapper() {
    let fx = Fixture::new();
    let id = fx
        .engine
        .run(&fx.passive(&fx.source("exp", "rootfs: rootfs\n")), &fx.launcher, None)
        .expect("run")
        .record
        .id;

    let wrapper = fx.engine.expose(&id, "tool").expect("expose");
    let script = fs::read_to_string(&wrapper).expect("read wrapper");
    assert!(script.contains(&format!("resume {id} '/usr/bin/tool'")));
    let mode = fs::metadata(&wrapper).expect("meta").permissions().mode();
    assert_eq!(mode & 0o777, 0o755);

    assert_eq!(fx.engine.expose(&id, "missing").unwrap_err().kind(), "not_found");
}

// ── Commit ───────────────────────────────────────────────────────────

#[test]
fn commit_then_create_from_image_sees_changes() {
    let fx = Fixture::new();
    let src = fx.source(
        "base",
        "rootfs: rootfs\ncommand: [/bin/sh, -c, 'echo v2 > \"$FAKECHROOT_BASE/etc/version\"']\n",
    );
    let outcome = fx
        .engine
        .run(
            &RunOptions {
                passive: false,
                ..fx.passive(&src)
            },
            &fx.launcher,
            None,
        )
        .expect("run");

    let image = fx
        .engine
        .commit(&outcome.record.id, "snapshot", "1")
        .expect("commit");
    assert_eq!(image.layers.len(), 2);

    let created = fx
        .engine
        .create_from_image(
            &ImageRef::parse("snapshot:1").expect("ref"),
            Some("copy"),
            &fx.launcher,
            None,
        )
        .expect("create");
    let ContainerBase::Image { layer_stack, .. } = &created.record.base else {
        panic!("expected an image-based container");
    };
    assert_eq!(layer_stack.len(), 2);
    assert_eq!(created.exit_code, Some(0));
    assert_eq!(
        fs::read_to_string(created.record.root_path.join("etc/version")).expect("read"),
        "v2\n"
    );
}

#[test]
fn deleted_lower_file_stays_hidden_after_commit() {
    let fx = Fixture::new();
    let src = fx.source("layered", "rootfs: rootfs\ncommand: [/bin/true]\n");
    let base = fx
        .engine
        .run(&fx.passive(&src), &fx.launcher, None)
        .expect("run")
        .record
        .id;
    let _ = fx.engine.commit(&base, "layered", "1").expect("commit base");

    let child = fx
        .engine
        .create_from_image(
            &ImageRef::parse("layered:1").expect("ref"),
            Some("child"),
            &fx.launcher,
            None,
        )
        .expect("create child");
    let ContainerBase::Image { layer_stack, .. } = &child.record.base else {
        panic!("expected an image-based container");
    };
    let bottom = fx.engine.images().store().layer_path(&layer_stack[0]);
    assert_eq!(
        fs::read_to_string(bottom.join("etc/hostname")).expect("read"),
        "burrow\n"
    );

    let args: Vec<String> = ["/bin/sh", "-c", "rm \"$FAKECHROOT_BASE/etc/hostname\""]
        .iter()
        .map(ToString::to_string)
        .collect();
    let code = fx
        .engine
        .resume(&child.record.id, &args, &fx.launcher)
        .expect("resume");
    assert_eq!(code, 0);
    assert!(child.record.writable_path.join("etc/.wh.hostname").exists());

    let derived = fx
        .engine
        .commit(&child.record.id, "derived", "1")
        .expect("commit child");
    assert_eq!(derived.layers.len(), layer_stack.len() + 1);

    let grandchild = fx
        .engine
        .create_from_image(
            &ImageRef::parse("derived:1").expect("ref"),
            Some("grandchild"),
            &fx.launcher,
            None,
        )
        .expect("create grandchild");
    assert!(!grandchild.record.root_path.join("etc/hostname").exists());
    assert!(grandchild.record.root_path.join("usr/bin/tool").exists());
    assert_eq!(
        fs::read_to_string(bottom.join("etc/hostname")).expect("read"),
        "burrow\n"
    );
}
