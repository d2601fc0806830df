//! Capability shims answering privileged calls in user space.
//!
//! Each shim is an external native component (a preload library or a
//! daemon) that the launcher wires into a new process. The launcher only
//! sees the [`CapabilityShim`] trait; the concrete shims describe which
//! library to preload and which environment to set.

use std::fmt;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};

use nix::sys::signal::{self, Signal};
use nix::unistd::Pid;

use burrow_common::error::{BurrowError, Result};

/// Paths the chroot shim must leave untranslated.
pub const DEFAULT_EXCLUDE_PATHS: &[&str] = &["/dev", "/proc", "/sys", "/tmp", "/run"];

/// Variable carrying the layer list to the shims, highest first.
pub const LAYERS_ENV: &str = "BURROW_LAYERS";

/// Which privileged behavior a shim emulates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ShimKind {
    /// `chroot(2)` and path translation.
    Chroot,
    /// uid/gid reporting and ownership changes.
    Identity,
    /// System V IPC backing the identity shim's state.
    Ipc,
}

impl fmt::Display for ShimKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Chroot => write!(f, "chroot"),
            Self::Identity => write!(f, "identity"),
            Self::Ipc => write!(f, "ipc"),
        }
    }
}

/// What a shim needs to know about the launch it joins.
#[derive(Debug, Clone, Copy)]
pub struct ShimContext<'a> {
    /// Assembled container root.
    pub root: &'a Path,
    /// Layer roots, highest first (writable layer included).
    pub layers: &'a [PathBuf],
    /// Support directory.
    pub sys_dir: &'a Path,
}

/// Effect of activating one shim.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ShimActivation {
    /// Library to add to `LD_PRELOAD`.
    pub preload: Option<PathBuf>,
    /// Environment variables to set on the process.
    pub env: Vec<(String, String)>,
    /// Daemon started for this launch, stopped when the session ends.
    pub daemon: Option<i32>,
}

/// A user-space stand-in for a privileged kernel facility.
pub trait CapabilityShim: Send + Sync + fmt::Debug {
    /// The facility this shim emulates.
    fn kind(&self) -> ShimKind;

    /// Prepares the shim for one launch.
    ///
    /// # Errors
    ///
    /// Returns an error if a helper process cannot be started.
    fn activate(&self, ctx: &ShimContext<'_>) -> Result<ShimActivation>;
}

/// Preloads the fake chroot library and points it at the container root.
#[derive(Debug, Clone)]
pub struct ChrootShim {
    library: PathBuf,
}

impl ChrootShim {
    /// Creates the shim for `library`.
    #[must_use]
    pub const fn new(library: PathBuf) -> Self {
        Self { library }
    }
}

impl CapabilityShim for ChrootShim {
    fn kind(&self) -> ShimKind {
        ShimKind::Chroot
    }

    fn activate(&self, ctx: &ShimContext<'_>) -> Result<ShimActivation> {
        let layers = ctx
            .layers
            .iter()
            .map(|p| p.display().to_string())
            .collect::<Vec<_>>()
            .join(":");
        Ok(ShimActivation {
            preload: Some(self.library.clone()),
            env: vec![
                ("FAKECHROOT_BASE".into(), ctx.root.display().to_string()),
                ("FAKECHROOT_EXCLUDE_PATH".into(), DEFAULT_EXCLUDE_PATHS.join(":")),
                (LAYERS_ENV.into(), layers),
            ],
            daemon: None,
        })
    }
}

/// Preloads the fake root library.
#[derive(Debug, Clone)]
pub struct IdentityShim {
    library: PathBuf,
}

impl IdentityShim {
    /// Creates the shim for `library`.
    #[must_use]
    pub const fn new(library: PathBuf) -> Self {
        Self { library }
    }
}

impl CapabilityShim for IdentityShim {
    fn kind(&self) -> ShimKind {
        ShimKind::Identity
    }

    fn activate(&self, _ctx: &ShimContext<'_>) -> Result<ShimActivation> {
        Ok(ShimActivation {
            preload: Some(self.library.clone()),
            env: vec![("FAKEROOTDONTTRYCHOWN".into(), "1".into())],
            daemon: None,
        })
    }
}

/// Starts the System V fake-root daemon and exports its key.
#[derive(Debug, Clone)]
pub struct IpcShim {
    daemon: PathBuf,
}

impl IpcShim {
    /// Creates the shim for the daemon binary at `daemon`.
    #[must_use]
    pub const fn new(daemon: PathBuf) -> Self {
        Self { daemon }
    }
}

impl CapabilityShim for IpcShim {
    fn kind(&self) -> ShimKind {
        ShimKind::Ipc
    }

    fn activate(&self, _ctx: &ShimContext<'_>) -> Result<ShimActivation> {
        let output = Command::new(&self.daemon)
            .stdin(Stdio::null())
            .stderr(Stdio::null())
            .output()
            .map_err(|e| BurrowError::io(&self.daemon, e))?;
        let stdout = String::from_utf8_lossy(&output.stdout);
        let (key, pid) = parse_daemon_handshake(&stdout)?;
        tracing::debug!(key = %key, pid, "fake-root daemon started");
        Ok(ShimActivation {
            preload: None,
            env: vec![("FAKEROOTKEY".into(), key)],
            daemon: Some(pid),
        })
    }
}

/// Parses the `key:pid` line the daemon prints once it is listening.
///
/// # Errors
///
/// Returns `BurrowError::MalformedInput` if the line is absent or malformed.
pub fn parse_daemon_handshake(stdout: &str) -> Result<(String, i32)> {
    let line = stdout.lines().next().unwrap_or_default().trim();
    let malformed = || BurrowError::MalformedInput {
        input: line.to_string(),
        message: "expected key:pid from the fake-root daemon".into(),
    };
    let (key, pid) = line.split_once(':').ok_or_else(malformed)?;
    if key.is_empty() {
        return Err(malformed());
    }
    let pid = pid.parse::<i32>().map_err(|_| malformed())?;
    Ok((key.to_string(), pid))
}

/// Combined effect of activating every shim for one launch.
#[derive(Debug, Default)]
pub struct ActivatedShims {
    /// Libraries to preload, in activation order.
    pub preload: Vec<PathBuf>,
    /// Environment set by the shims.
    pub env: Vec<(String, String)>,
    /// Daemons to stop when the launch ends.
    pub session: ShimSession,
}

impl ActivatedShims {
    /// The `LD_PRELOAD` value.
    #[must_use]
    pub fn preload_var(&self) -> String {
        self.preload
            .iter()
            .map(|p| p.display().to_string())
            .collect::<Vec<_>>()
            .join(":")
    }
}

/// Activates `shims` in order. Daemons already started are stopped if a
/// later shim fails.
///
/// # Errors
///
/// Returns the first activation error.
pub fn activate_all(
    shims: &[Box<dyn CapabilityShim>],
    ctx: &ShimContext<'_>,
) -> Result<ActivatedShims> {
    let mut activated = ActivatedShims::default();
    for shim in shims {
        let activation = shim.activate(ctx)?;
        tracing::debug!(kind = %shim.kind(), "shim activated");
        activated.preload.extend(activation.preload);
        activated.env.extend(activation.env);
        if let Some(pid) = activation.daemon {
            activated.session.daemons.push(pid);
        }
    }
    Ok(activated)
}

/// Daemons started for a launch; terminated on drop.
#[derive(Debug, Default)]
pub struct ShimSession {
    daemons: Vec<i32>,
}

impl ShimSession {
    /// Pids of the daemons owned by this session.
    #[must_use]
    pub fn daemons(&self) -> &[i32] {
        &self.daemons
    }
}

impl Drop for ShimSession {
    fn drop(&mut self) {
        for pid in self.daemons.drain(..).filter(|pid| *pid > 0) {
            if let Err(e) = signal::kill(Pid::from_raw(pid), Signal::SIGTERM) {
                tracing::debug!(pid, error = %e, "shim daemon already gone");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::fs;
    use std::os::unix::fs::PermissionsExt;

    use super::*;

    fn ctx<'a>(root: &'a Path, layers: &'a [PathBuf]) -> ShimContext<'a> {
        ShimContext {
            root,
            layers,
            sys_dir: Path::new("/opt/sys"),
        }
    }

    #[test]
    fn chroot_shim_exports_root_and_layers() {
        let layers = vec![PathBuf::from("/c/rw"), PathBuf::from("/l/aa")];
        let shim = ChrootShim::new(PathBuf::from("/opt/sys/libfakechroot.so"));
        let act = shim.activate(&ctx(Path::new("/c/root"), &layers)).unwrap();
        assert_eq!(act.preload, Some(PathBuf::from("/opt/sys/libfakechroot.so")));
        assert!(act.env.contains(&("FAKECHROOT_BASE".into(), "/c/root".into())));
        assert!(act.env.contains(&(LAYERS_ENV.into(), "/c/rw:/l/aa".into())));
    }

    #[test]
    fn handshake_parses_key_and_pid() {
        assert_eq!(parse_daemon_handshake("1234:567\n").unwrap(), ("1234".into(), 567));
        assert!(parse_daemon_handshake("").is_err());
        assert!(parse_daemon_handshake("1234").is_err());
        assert!(parse_daemon_handshake(":5").is_err());
    }

    #[test]
    fn ipc_shim_reads_daemon_output() {
        let dir = tempfile::tempdir().unwrap();
        let daemon = dir.path().join("faked-sysv");
        fs::write(&daemon, "#!/bin/sh\necho 4242:0\n").unwrap();
        fs::set_permissions(&daemon, fs::Permissions::from_mode(0o755)).unwrap();

        let shims: Vec<Box<dyn CapabilityShim>> = vec![
            Box::new(IpcShim::new(daemon)),
            Box::new(IdentityShim::new(PathBuf::from("/s/libfakeroot.so"))),
        ];
        let activated = activate_all(&shims, &ctx(Path::new("/r"), &[])).unwrap();
        assert!(activated.env.contains(&("FAKEROOTKEY".into(), "4242".into())));
        assert_eq!(activated.preload_var(), "/s/libfakeroot.so");
        assert_eq!(activated.session.daemons(), &[0]);
    }
}
