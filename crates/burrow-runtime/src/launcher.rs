//! Execution emulation launcher.
//!
//! Builds the process for a container launch: the capability shims are
//! activated, their libraries preloaded, and the command is started as
//! `chroot <root> <program> <args>` so the preloaded chroot shim answers
//! the chroot call without privileges.

use std::os::unix::process::{CommandExt, ExitStatusExt};
use std::path::{Path, PathBuf};
use std::process::{Command, ExitStatus, Stdio};

use burrow_common::error::{BurrowError, Result};
use burrow_core::remap::RemapTable;
use burrow_core::shim::{
    self, CapabilityShim, ChrootShim, IdentityShim, IpcShim, ShimContext, ShimSession,
};
use burrow_core::syscheck::ExecutionComponents;

/// One process launch inside a container.
#[derive(Debug, Clone, Copy)]
pub struct LaunchRequest<'a> {
    /// Assembled container root.
    pub root: &'a Path,
    /// Layer roots, highest first (writable layer included).
    pub layers: &'a [PathBuf],
    /// Program to run, as seen inside the root.
    pub program: &'a str,
    /// Program arguments.
    pub args: &'a [String],
    /// Image and container environment.
    pub env: &'a [(String, String)],
    /// Path remapping exported to the shims.
    pub remap: &'a RemapTable,
    /// Working directory inside the root.
    pub working_dir: Option<&'a str>,
}

/// A command ready to spawn, with the shim daemons it depends on.
///
/// The daemons are stopped when the session is dropped, so keep it alive
/// until the process exits.
#[derive(Debug)]
pub struct PreparedCommand {
    /// The process to spawn.
    pub command: Command,
    /// Daemons owned by this launch.
    pub session: ShimSession,
}

impl PreparedCommand {
    /// Configures the command to run detached: own process group, no
    /// stdin, piped output.
    pub fn detach(&mut self) {
        let _ = self
            .command
            .process_group(0)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
    }
}

/// Starts processes inside containers through the capability shims.
///
/// Only buildable from [`ExecutionComponents`], which come from a
/// successful support-bundle check.
#[derive(Debug)]
pub struct Launcher {
    sys_dir: PathBuf,
    chroot: PathBuf,
    shims: Vec<Box<dyn CapabilityShim>>,
}

impl Launcher {
    /// Builds the launcher with the chroot, identity, and IPC shims.
    ///
    /// # Errors
    ///
    /// Returns `BurrowError::MissingDependency` if no `chroot` binary is on
    /// the host `PATH`.
    pub fn new(components: ExecutionComponents) -> Result<Self> {
        let chroot = which::which("chroot").map_err(|e| BurrowError::MissingDependency {
            component: "chroot".into(),
            reason: e.to_string(),
        })?;
        let shims: Vec<Box<dyn CapabilityShim>> = vec![
            Box::new(ChrootShim::new(components.libfakechroot)),
            Box::new(IdentityShim::new(components.libfakeroot)),
            Box::new(IpcShim::new(components.faked)),
        ];
        Ok(Self::with_shims(components.sys_dir, chroot, shims))
    }

    /// Builds a launcher from explicit parts.
    #[must_use]
    pub fn with_shims(
        sys_dir: PathBuf,
        chroot: PathBuf,
        shims: Vec<Box<dyn CapabilityShim>>,
    ) -> Self {
        Self {
            sys_dir,
            chroot,
            shims,
        }
    }

    /// Activates the shims and builds the command for `request`.
    ///
    /// # Errors
    ///
    /// Returns `BurrowError::MalformedInput` for an empty program, or any
    /// shim activation error.
    pub fn prepare(&self, request: &LaunchRequest<'_>) -> Result<PreparedCommand> {
        if request.program.trim().is_empty() {
            return Err(BurrowError::MalformedInput {
                input: String::new(),
                message: "no command to run".into(),
            });
        }
        let ctx = ShimContext {
            root: request.root,
            layers: request.layers,
            sys_dir: &self.sys_dir,
        };
        let activated = shim::activate_all(&self.shims, &ctx)?;

        let mut command = Command::new(&self.chroot);
        let _ = command
            .arg(request.root)
            .arg(request.program)
            .args(request.args);

        let library_path = std::env::var_os("LD_LIBRARY_PATH").map_or_else(
            || self.sys_dir.display().to_string(),
            |existing| format!("{}:{}", self.sys_dir.display(), existing.to_string_lossy()),
        );
        let _ = command
            .env("LD_PRELOAD", activated.preload_var())
            .env("LD_LIBRARY_PATH", library_path);
        set_envs(&mut command, &activated.env);
        set_envs(&mut command, request.env);
        set_envs(&mut command, &request.remap.to_env());

        if let Some(dir) = request.working_dir {
            let inside = request.root.join(dir.trim_start_matches('/'));
            if inside.is_dir() {
                let _ = command.current_dir(inside);
            }
        }

        tracing::info!(
            root = %request.root.display(),
            program = request.program,
            args = ?request.args,
            "prepared container command"
        );
        Ok(PreparedCommand {
            command,
            session: activated.session,
        })
    }

    /// Runs `request` in the foreground with inherited stdio and returns
    /// its exit code.
    ///
    /// # Errors
    ///
    /// Returns an error if the command cannot be prepared or spawned.
    pub fn launch(&self, request: &LaunchRequest<'_>) -> Result<i32> {
        let PreparedCommand {
            mut command,
            session,
        } = self.prepare(request)?;
        let status = command
            .status()
            .map_err(|e| BurrowError::io(&self.chroot, e))?;
        drop(session);
        let code = exit_code(status);
        tracing::info!(program = request.program, code, "container process exited");
        Ok(code)
    }
}

fn set_envs(command: &mut Command, vars: &[(String, String)]) {
    for (key, value) in vars {
        let _ = command.env(key, value);
    }
}

/// Shell-style exit code: the process's own code, or 128 plus the signal
/// that killed it.
#[must_use]
pub fn exit_code(status: ExitStatus) -> i32 {
    status
        .code()
        .unwrap_or_else(|| 128 + status.signal().unwrap_or(0))
}

#[cfg(test)]
mod tests {
    use std::fs;
    use std::os::unix::fs::PermissionsExt;

    use burrow_core::remap::RemapKind;

    use super::*;

    /// A stand-in for `chroot` that ignores the root and runs the command
    /// on the host.
    fn fake_chroot(dir: &Path) -> PathBuf {
        let path = dir.join("fake-chroot");
        fs::write(&path, "#!/bin/sh\nshift\nexec \"$@\"\n").expect("write");
        fs::set_permissions(&path, fs::Permissions::from_mode(0o755)).expect("chmod");
        path
    }

    fn launcher(dir: &Path) -> Launcher {
        let shims: Vec<Box<dyn CapabilityShim>> =
            vec![Box::new(ChrootShim::new(dir.join("libfakechroot.so")))];
        Launcher::with_shims(dir.join("sys"), fake_chroot(dir), shims)
    }

    fn env_of(command: &Command, key: &str) -> Option<String> {
        command
            .get_envs()
            .find(|(k, _)| *k == key)
            .and_then(|(_, v)| v.map(|v| v.to_string_lossy().into_owned()))
    }

    #[test]
    fn prepare_exports_shim_image_and_remap_environment() {
        let dir = tempfile::tempdir().expect("tempdir");
        let root = dir.path().join("root");
        let layers = vec![dir.path().join("rw"), dir.path().join("l1")];
        let mut remap = RemapTable::new();
        remap
            .apply(RemapKind::AddMap, "python3", "/etc/conf:/tmp/conf")
            .expect("remap");
        let env = vec![("LANG".to_string(), "C.UTF-8".to_string())];
        let args = vec!["-c".to_string(), "true".to_string()];

        let prepared = launcher(dir.path())
            .prepare(&LaunchRequest {
                root: &root,
                layers: &layers,
                program: "/bin/sh",
                args: &args,
                env: &env,
                remap: &remap,
                working_dir: None,
            })
            .expect("prepare");
        let cmd = &prepared.command;

        let preload = env_of(cmd, "LD_PRELOAD").expect("preload");
        assert!(preload.ends_with("libfakechroot.so"));
        assert!(env_of(cmd, "LD_LIBRARY_PATH").expect("ld path").starts_with(&dir.path().join("sys").display().to_string()));
        assert_eq!(env_of(cmd, "FAKECHROOT_BASE"), Some(root.display().to_string()));
        assert_eq!(env_of(cmd, "LANG").as_deref(), Some("C.UTF-8"));
        assert_eq!(env_of(cmd, "BURROW_REMAP_PROGS").as_deref(), Some("python3"));
        assert_eq!(
            env_of(cmd, "BURROW_REMAP_PYTHON3").as_deref(),
            Some("/etc/conf:/tmp/conf")
        );
        let argv: Vec<_> = cmd.get_args().map(|a| a.to_string_lossy().into_owned()).collect();
        assert_eq!(argv, vec![root.display().to_string(), "/bin/sh".into(), "-c".into(), "true".into()]);
    }

    #[test]
    fn launch_returns_process_exit_code() {
        let dir = tempfile::tempdir().expect("tempdir");
        let root = dir.path().join("root");
        let args = vec!["-c".to_string(), "exit 3".to_string()];
        let code = launcher(dir.path())
            .launch(&LaunchRequest {
                root: &root,
                layers: &[],
                program: "/bin/sh",
                args: &args,
                env: &[],
                remap: &RemapTable::new(),
                working_dir: None,
            })
            .expect("launch");
        assert_eq!(code, 3);
    }

    #[test]
    fn empty_program_is_rejected() {
        let dir = tempfile::tempdir().expect("tempdir");
        let err = launcher(dir.path())
            .prepare(&LaunchRequest {
                root: dir.path(),
                layers: &[],
                program: " ",
                args: &[],
                env: &[],
                remap: &RemapTable::new(),
                working_dir: None,
            })
            .unwrap_err();
        assert_eq!(err.kind(), "malformed_input");
    }
}
