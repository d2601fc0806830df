//! System-wide constants and default paths.

use std::path::PathBuf;
use std::sync::OnceLock;

/// Environment variable overriding the data directory.
pub const HOME_ENV: &str = "BURROW_HOME";

/// Returns the data directory, preferring `$BURROW_HOME`, then
/// `$HOME/.burrow`, falling back to a directory under the system temp dir.
fn resolve_data_dir() -> PathBuf {
    if let Ok(dir) = std::env::var(HOME_ENV) {
        return PathBuf::from(dir);
    }
    if let Ok(home) = std::env::var("HOME") {
        return PathBuf::from(home).join(".burrow");
    }
    std::env::temp_dir().join("burrow")
}

static DATA_DIR: OnceLock<PathBuf> = OnceLock::new();

/// Returns the resolved data directory for this session.
pub fn data_dir() -> &'static PathBuf {
    DATA_DIR.get_or_init(resolve_data_dir)
}

/// Directory (under the data dir) holding the interposition components.
pub const SYS_DIR_NAME: &str = ".lpmxsys";

/// Suffix of the completeness marker written next to each component.
pub const COMPLETENESS_MARKER_SUFFIX: &str = ".info";

/// Mode every support component must carry.
pub const COMPONENT_MODE: u32 = 0o755;

/// Fake-root daemon answering ownership queries over System V IPC.
pub const FAKED_SYSV: &str = "faked-sysv";

/// Preload library emulating `chroot(2)` and path translation.
pub const LIBFAKECHROOT: &str = "libfakechroot.so";

/// Preload library emulating uid/gid reporting and ownership changes.
pub const LIBFAKEROOT: &str = "libfakeroot.so";

/// Settings cache server binary.
pub const MEMCACHED: &str = "memcached";

/// Components required by every command that launches processes.
pub const EXECUTION_COMPONENTS: [&str; 3] = [FAKED_SYSV, LIBFAKECHROOT, LIBFAKEROOT];

/// Components required only for the settings cache.
pub const CACHE_COMPONENTS: [&str; 1] = [MEMCACHED];

/// Default settings cache address.
pub const DEFAULT_CACHE_ADDR: &str = "127.0.0.1:11211";

/// Default image registry.
pub const DEFAULT_REGISTRY: &str = "docker.io";

/// Run settings file looked up in a container source directory.
pub const SETTINGS_FILE: &str = "setting.yml";

/// Container registry file name under the data dir.
pub const STATE_FILE: &str = "state.json";

/// Prefix of a whiteout entry hiding a lower-layer path.
pub const WHITEOUT_PREFIX: &str = ".wh.";

/// Marker hiding every lower-layer entry of its directory.
pub const WHITEOUT_OPAQUE: &str = ".wh..wh..opq";

/// SHA-256 digest length in hex characters.
pub const SHA256_HEX_LENGTH: usize = 64;

/// Maximum number of layers in an image.
pub const MAX_IMAGE_LAYERS: usize = 128;

/// Upper bound on captured output per stream of a remote task.
pub const MAX_CAPTURED_OUTPUT: usize = 1024 * 1024;

/// Application name used in CLI output and state files.
pub const APP_NAME: &str = "burrow";

/// Version reported by `burrow version`.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
