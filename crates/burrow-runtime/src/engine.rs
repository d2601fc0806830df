//! Runtime engine that orchestrates container lifecycle.
//!
//! Every command builds one [`Engine`] from the invocation's
//! [`BurrowConfig`]. Lifecycle operations on one container are serialized
//! through a [`LifecycleLock`]; registry writes are atomic.

use std::fs::{self, File};
use std::io::Read;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};

use burrow_cache::client::validate_key;
use burrow_cache::server::ensure_running;
use burrow_cache::{
    REMAP_KEY, SERVICE_NAME, SettingsCache, SettingsCacheExt, remap_key, setting_key,
};
use burrow_common::config::BurrowConfig;
use burrow_common::constants::{CACHE_COMPONENTS, EXECUTION_COMPONENTS};
use burrow_common::error::{BurrowError, Result};
use burrow_common::types::{ContainerId, ContainerStatus};
use burrow_core::filesystem::compose::assemble;
use burrow_core::filesystem::diff::capture;
use burrow_core::filesystem::remove_tree;
use burrow_core::filesystem::union::UnionView;
use burrow_core::remap::{RemapKind, RemapTable};
use burrow_core::syscheck::{self, SupportBundle};
use burrow_image::catalog::{ImageEntry, ImageMetadata};
use burrow_image::docker::ImageClient;
use burrow_image::manifest::ImageManifest;
use burrow_image::reference::ImageRef;
use burrow_image::remote::RegistryTransport;

use crate::container::{ContainerBase, ContainerRecord};
use crate::launcher::{LaunchRequest, Launcher, PreparedCommand};
use crate::settings::{self, RunSettings};
use crate::state::{self, LifecycleLock, StateIndex};

/// Directories searched by [`Engine::expose`], in order.
const BIN_DIRS: &[&str] = &[
    "usr/local/bin",
    "usr/bin",
    "bin",
    "usr/local/sbin",
    "usr/sbin",
    "sbin",
];

/// Options of a `run` invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunOptions {
    /// Directory the container is built from.
    pub source_dir: PathBuf,
    /// Settings file; defaults to `setting.yml` in `source_dir`.
    pub config_path: Option<PathBuf>,
    /// Register and assemble the container without launching it.
    pub passive: bool,
}

/// Result of `run` or `docker create`.
#[derive(Debug, Clone)]
pub struct RunOutcome {
    /// The container as registered.
    pub record: ContainerRecord,
    /// Whether this invocation created the container.
    pub created: bool,
    /// Exit code of the launched command, if one was launched.
    pub exit_code: Option<i32>,
}

/// The runtime engine that coordinates all container operations.
pub struct Engine {
    config: BurrowConfig,
    images: ImageClient,
    cache: Option<Box<dyn SettingsCache>>,
}

impl std::fmt::Debug for Engine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Engine")
            .field("data_dir", &self.config.data_dir)
            .field("cache", &self.cache.is_some())
            .finish_non_exhaustive()
    }
}

impl Engine {
    /// Opens the engine for `config`, creating the data directory layout.
    ///
    /// # Errors
    ///
    /// Returns an error if the data directory cannot be created.
    pub fn open(config: BurrowConfig) -> Result<Self> {
        for dir in [config.data_dir.clone(), config.data_dir.join("containers")] {
            fs::create_dir_all(&dir).map_err(|e| BurrowError::io(&dir, e))?;
        }
        let images = ImageClient::open(&config)?;
        Ok(Self {
            config,
            images,
            cache: None,
        })
    }

    /// Uses `cache` as the settings cache.
    #[must_use]
    pub fn with_cache(mut self, cache: Box<dyn SettingsCache>) -> Self {
        self.cache = Some(cache);
        self
    }

    /// Connects to the settings cache, starting the server from the support
    /// bundle if it is not running.
    ///
    /// When `required` is false, a missing component or unreachable server
    /// is logged and the engine continues without a cache.
    ///
    /// # Errors
    ///
    /// Returns the connection error when `required` is set or the error is
    /// not one a command can run without.
    pub fn connect_cache(&mut self, required: bool) -> Result<()> {
        let bundle = SupportBundle::inspect(&self.config.sys_dir());
        let connected = bundle
            .require_cache()
            .and_then(|binary| ensure_running(self.config.cache_addr, &binary));
        match connected {
            Ok(client) => {
                self.cache = Some(Box::new(client));
                Ok(())
            }
            Err(e) if !required && e.is_degradable() => {
                tracing::warn!(error = %e, "{SERVICE_NAME} unavailable, continuing without it");
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    /// The configuration this engine was opened with.
    #[must_use]
    pub const fn config(&self) -> &BurrowConfig {
        &self.config
    }

    /// The image client.
    #[must_use]
    pub const fn images(&self) -> &ImageClient {
        &self.images
    }

    /// Prepares the data directory and installs the support bundle from a
    /// `dependency` tarball. `reset` removes the installed bundle first.
    ///
    /// # Errors
    ///
    /// Returns an error if a directory cannot be created or the tarball
    /// cannot be unpacked.
    pub fn init(&self, reset: bool, dependency: Option<&Path>) -> Result<SupportBundle> {
        let sys_dir = self.config.sys_dir();
        if reset {
            tracing::info!(dir = %sys_dir.display(), "removing installed support bundle");
            remove_tree(&sys_dir)?;
        }
        for dir in [
            sys_dir.clone(),
            self.config.expose_dir(),
            self.config.package_dir(),
        ] {
            fs::create_dir_all(&dir).map_err(|e| BurrowError::io(&dir, e))?;
        }
        if let Some(tarball) = dependency {
            let installed = install_bundle(tarball, &sys_dir)?;
            tracing::info!(installed, tarball = %tarball.display(), "support bundle installed");
        }

        let bundle = SupportBundle::inspect(&sys_dir);
        for (component, state) in bundle.states() {
            tracing::info!(component, state = ?state, "support component");
        }
        Ok(bundle)
    }

    /// Lists every registered container.
    ///
    /// # Errors
    ///
    /// Returns an error if the registry cannot be read.
    pub fn list(&self) -> Result<Vec<ContainerRecord>> {
        Ok(self.load()?.containers)
    }

    /// Looks up one container.
    ///
    /// # Errors
    ///
    /// Returns `BurrowError::NotFound` for an unknown id.
    pub fn container(&self, id: &ContainerId) -> Result<ContainerRecord> {
        self.load()?
            .get(id)
            .cloned()
            .ok_or_else(|| not_found(id))
    }

    /// Creates the container for `opts.source_dir` if none exists, then
    /// launches its default command unless `opts.passive` is set.
    ///
    /// # Errors
    ///
    /// Returns `BurrowError::NotFound` if the source directory, settings
    /// file, or image is missing, or any launch error.
    pub fn run(
        &self,
        opts: &RunOptions,
        launcher: &Launcher,
        transport: Option<&dyn RegistryTransport>,
    ) -> Result<RunOutcome> {
        let source_dir = fs::canonicalize(&opts.source_dir)
            .map_err(|e| BurrowError::io(&opts.source_dir, e))?;
        let settings_path = settings::locate(&source_dir, opts.config_path.as_deref())?;
        let settings = RunSettings::load(&settings_path)?;

        let existing = self
            .load()?
            .find_by_source(&source_dir)
            .filter(|c| c.status != ContainerStatus::Destroyed)
            .cloned();
        let (record, created) = match existing {
            Some(record) => {
                tracing::info!(id = %record.id, "reusing container for source directory");
                (record, false)
            }
            None => (self.create_from_settings(&source_dir, &settings, transport)?, true),
        };

        let exit_code = if opts.passive {
            tracing::info!(id = %record.id, "passive run, not launching");
            None
        } else {
            Some(self.launch_default(&record.id, launcher)?)
        };
        Ok(RunOutcome {
            record: self.container(&record.id)?,
            created,
            exit_code,
        })
    }

    fn create_from_settings(
        &self,
        source_dir: &Path,
        settings: &RunSettings,
        transport: Option<&dyn RegistryTransport>,
    ) -> Result<ContainerRecord> {
        let id = ContainerId::generate();
        let container_dir = self.config.container_dir(id.as_str());
        let mut record = match &settings.image {
            Some(image) => {
                let image = ImageRef::parse_with_registry(image, &self.config.registry)?;
                let entry = self.local_or_download(&image, transport)?;
                self.image_record(id, source_dir.to_path_buf(), &container_dir, &entry, transport)?
            }
            None => {
                let rootfs = settings.rootfs_dir(source_dir);
                if !rootfs.is_dir() {
                    return Err(BurrowError::NotFound {
                        kind: "rootfs directory",
                        id: rootfs.display().to_string(),
                    });
                }
                ContainerRecord::new(
                    id,
                    source_dir.to_path_buf(),
                    &container_dir,
                    ContainerBase::Directory { path: rootfs },
                )
            }
        };

        record.name.clone_from(&settings.name);
        if !settings.command.is_empty() {
            record.command.clone_from(&settings.command);
        }
        record.env.extend(settings.env.clone());
        if settings.working_dir.is_some() {
            record.working_dir.clone_from(&settings.working_dir);
        }
        self.register_new(&record)?;
        Ok(record)
    }

    /// Creates a container from an image (downloading it through
    /// `transport` when not local) and launches its default command.
    ///
    /// # Errors
    ///
    /// Returns `BurrowError::NotFound` for an unknown image, or any launch
    /// error.
    pub fn create_from_image(
        &self,
        image: &ImageRef,
        name: Option<&str>,
        launcher: &Launcher,
        transport: Option<&dyn RegistryTransport>,
    ) -> Result<RunOutcome> {
        let entry = self.local_or_download(image, transport)?;
        let id = ContainerId::generate();
        let container_dir = self.config.container_dir(id.as_str());
        let mut record = self.image_record(id, container_dir.clone(), &container_dir, &entry, transport)?;
        record.name = name.map(str::to_string);
        self.register_new(&record)?;

        let exit_code = self.launch_default(&record.id, launcher)?;
        Ok(RunOutcome {
            record: self.container(&record.id)?,
            created: true,
            exit_code: Some(exit_code),
        })
    }

    fn local_or_download(
        &self,
        image: &ImageRef,
        transport: Option<&dyn RegistryTransport>,
    ) -> Result<ImageEntry> {
        match (self.images.get(&image.catalog_name(), &image.tag), transport) {
            (Ok(entry), _) => Ok(entry),
            (Err(BurrowError::NotFound { .. }), Some(transport)) => {
                self.images.download(transport, image)
            }
            (Err(e), _) => Err(e),
        }
    }

    fn image_record(
        &self,
        id: ContainerId,
        source_dir: PathBuf,
        container_dir: &Path,
        entry: &ImageEntry,
        transport: Option<&dyn RegistryTransport>,
    ) -> Result<ContainerRecord> {
        let resolved = self
            .images
            .resolve_layer_stack(&entry.name, &entry.tag, transport)?;
        let mut record = ContainerRecord::new(
            id,
            source_dir,
            container_dir,
            ContainerBase::Image {
                name: entry.name.clone(),
                tag: entry.tag.clone(),
                layer_stack: resolved.layers,
            },
        );
        record.command = entry.metadata.default_command();
        record.env = entry
            .metadata
            .env
            .iter()
            .filter_map(|kv| kv.split_once('='))
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        record.working_dir.clone_from(&entry.metadata.working_dir);
        Ok(record)
    }

    fn register_new(&self, record: &ContainerRecord) -> Result<()> {
        fs::create_dir_all(&record.writable_path)
            .map_err(|e| BurrowError::io(&record.writable_path, e))?;
        let mut index = self.load()?;
        index.upsert(record.clone());
        self.save(&index)?;
        tracing::info!(id = %record.id, base = %record.base.describe(), "container created");
        Ok(())
    }

    /// Relaunches a container with `args` as the command, or its default
    /// command when `args` is empty.
    ///
    /// # Errors
    ///
    /// Returns `BurrowError::NotFound` for an unknown id, or any launch
    /// error.
    pub fn resume(&self, id: &ContainerId, args: &[String], launcher: &Launcher) -> Result<i32> {
        if args.is_empty() {
            self.launch_default(id, launcher)
        } else {
            self.launch(id, args, launcher)
        }
    }

    fn launch_default(&self, id: &ContainerId, launcher: &Launcher) -> Result<i32> {
        let command = self.container(id)?.command;
        let command = if command.is_empty() {
            vec!["/bin/sh".to_string()]
        } else {
            command
        };
        self.launch(id, &command, launcher)
    }

    /// Assembles the root, runs `command` in the foreground, then captures
    /// the root's changes into the writable layer.
    fn launch(&self, id: &ContainerId, command: &[String], launcher: &Launcher) -> Result<i32> {
        let _lock = self.lock(id)?;
        let mut record = self.container(id)?;
        let view = self.union_view(&record)?;
        let _stats = assemble(&view, &record.root_path)?;
        record.transition(ContainerStatus::Running)?;
        self.update_status(&record)?;

        let layers: Vec<PathBuf> = view.layers_top_down().map(Path::to_path_buf).collect();
        let remap = self.effective_remap(&record);
        let env = record.env_pairs();
        let (program, args) = command
            .split_first()
            .ok_or_else(|| BurrowError::MalformedInput {
                input: String::new(),
                message: "no command to run".into(),
            })?;
        let launched = launcher.launch(&LaunchRequest {
            root: &record.root_path,
            layers: &layers,
            program,
            args,
            env: &env,
            remap: &remap,
            working_dir: record.working_dir.as_deref(),
        });

        let captured = capture(&view, &record.root_path);
        record.transition(ContainerStatus::Stopped)?;
        self.update_status(&record)?;
        let code = launched?;
        let _summary = captured?;
        Ok(code)
    }

    /// Builds a detached command inside a container for remote execution.
    /// The root is assembled only if it does not exist yet, and changes are
    /// not captured.
    ///
    /// # Errors
    ///
    /// Returns `BurrowError::NotFound` for an unknown id, or any shim
    /// activation error.
    pub fn prepare_exec(
        &self,
        id: &ContainerId,
        program: &str,
        args: &[String],
        launcher: &Launcher,
    ) -> Result<PreparedCommand> {
        let record = self.container(id)?;
        if record.status == ContainerStatus::Destroyed {
            return Err(not_found(id));
        }
        let view = self.union_view(&record)?;
        if !record.root_path.is_dir() {
            let _lock = self.lock(id)?;
            let _stats = assemble(&view, &record.root_path)?;
        }
        let layers: Vec<PathBuf> = view.layers_top_down().map(Path::to_path_buf).collect();
        let remap = self.effective_remap(&record);
        let env = record.env_pairs();
        let mut prepared = launcher.prepare(&LaunchRequest {
            root: &record.root_path,
            layers: &layers,
            program,
            args,
            env: &env,
            remap: &remap,
            working_dir: record.working_dir.as_deref(),
        })?;
        prepared.detach();
        Ok(prepared)
    }

    /// Removes a container: writable layer, root, registry record, and
    /// cache keys. A container left half-removed by an earlier attempt is
    /// removed again.
    ///
    /// # Errors
    ///
    /// Returns `BurrowError::NotFound` for an unknown id.
    pub fn destroy(&self, id: &ContainerId) -> Result<()> {
        let _lock = self.lock(id)?;
        let mut record = self.container(id)?;
        record.transition(ContainerStatus::Destroyed)?;
        self.update_status(&record)?;

        remove_tree(record.container_dir())?;

        let mut index = self.load()?;
        let _removed = index.remove(id);
        self.save(&index)?;

        if let Some(cache) = &self.cache {
            let keys = std::iter::once(remap_key(id.as_str())).chain(
                record
                    .remap_table
                    .programs()
                    .map(|prog| setting_key(id.as_str(), prog)),
            );
            for key in keys {
                if let Err(e) = cache.delete(&key) {
                    tracing::warn!(key = %key, error = %e, "could not clear cache key");
                }
            }
        }
        tracing::info!(id = %id, "container destroyed");
        Ok(())
    }

    /// Reads the setting `name` of a container from the settings cache.
    ///
    /// # Errors
    ///
    /// Returns `BurrowError::ExternalServiceUnavailable` without a cache, or
    /// `BurrowError::NotFound` if the key is absent.
    pub fn get(&self, id: &ContainerId, name: &str) -> Result<String> {
        let cache = self.require_cache()?;
        cache
            .get(&setting_key(id.as_str(), name))?
            .ok_or_else(|| BurrowError::NotFound {
                kind: "setting",
                id: setting_key(id.as_str(), name),
            })
    }

    /// Updates a container's remap table and publishes it to the settings
    /// cache. A malformed mapping changes nothing.
    ///
    /// # Errors
    ///
    /// Returns `BurrowError::MalformedInput` for a bad mapping or a program
    /// name that cannot be a cache key, `BurrowError::NotFound` for an
    /// unknown id, or
    /// `BurrowError::ExternalServiceUnavailable` without a cache.
    pub fn set_remap(
        &self,
        id: &ContainerId,
        kind: RemapKind,
        prog: &str,
        mapping: &str,
    ) -> Result<RemapTable> {
        let cache = self.require_cache()?;
        if prog == REMAP_KEY {
            return Err(BurrowError::MalformedInput {
                input: prog.to_string(),
                message: format!("`{REMAP_KEY}` names the remap table itself"),
            });
        }
        let key = setting_key(id.as_str(), prog);
        validate_key(&key)?;

        let mut index = self.load()?;
        let record = index.get(id).cloned().ok_or_else(|| not_found(id))?;

        let mut table = record.remap_table.clone();
        table.apply(kind, prog, mapping)?;

        cache.set_typed(&remap_key(id.as_str()), &table)?;
        match table.encode_program(prog) {
            Some(value) => cache.set(&key, &value)?,
            None => {
                let _existed = cache.delete(&key)?;
            }
        }

        let mut updated = record;
        updated.remap_table = table.clone();
        index.upsert(updated);
        self.save(&index)?;
        tracing::info!(id = %id, prog, %kind, "remap table published");
        Ok(table)
    }

    /// Writes an executable wrapper for `name` into the expose directory
    /// that resumes the container running that program.
    ///
    /// # Errors
    ///
    /// Returns `BurrowError::NotFound` if no bin directory of the container
    /// holds `name`.
    pub fn expose(&self, id: &ContainerId, name: &str) -> Result<PathBuf> {
        if name.is_empty() || name.contains('/') {
            return Err(BurrowError::MalformedInput {
                input: name.to_string(),
                message: "expected a program name".into(),
            });
        }
        let record = self.container(id)?;
        let view = self.union_view(&record)?;
        let mut found = None;
        for dir in BIN_DIRS {
            let inside = Path::new(dir).join(name);
            if view.resolve(&inside)?.is_some() {
                found = Some(Path::new("/").join(inside));
                break;
            }
        }
        let program = found.ok_or_else(|| BurrowError::NotFound {
            kind: "program",
            id: name.to_string(),
        })?;

        let exe = std::env::current_exe().map_err(|e| BurrowError::io("current executable", e))?;
        let expose_dir = self.config.expose_dir();
        fs::create_dir_all(&expose_dir).map_err(|e| BurrowError::io(&expose_dir, e))?;
        let wrapper = expose_dir.join(name);
        let script = format!(
            "#!/bin/sh\nexec {} resume {} {} \"$@\"\n",
            shell_quote(&exe.display().to_string()),
            id,
            shell_quote(&program.display().to_string()),
        );
        fs::write(&wrapper, script).map_err(|e| BurrowError::io(&wrapper, e))?;
        fs::set_permissions(&wrapper, fs::Permissions::from_mode(0o755))
            .map_err(|e| BurrowError::io(&wrapper, e))?;
        tracing::info!(id = %id, program = %program.display(), wrapper = %wrapper.display(), "program exposed");
        Ok(wrapper)
    }

    /// Captures a container's changes and registers them as a new image on
    /// top of the container's base.
    ///
    /// # Errors
    ///
    /// Returns `BurrowError::NotFound` for an unknown id, or an error
    /// packing the layers.
    pub fn commit(&self, id: &ContainerId, name: &str, tag: &str) -> Result<ImageEntry> {
        let _lock = self.lock(id)?;
        let record = self.container(id)?;
        let view = self.union_view(&record)?;
        if record.root_path.is_dir() {
            let _summary = capture(&view, &record.root_path)?;
        }

        let (base, mut metadata) = match &record.base {
            ContainerBase::Image { name, tag, .. } => {
                let entry = self.images.get(name, tag)?;
                let metadata = entry.metadata.clone();
                (Some(entry), metadata)
            }
            ContainerBase::Directory { .. } => (None, ImageMetadata::default()),
        };
        if metadata.default_command() != record.command {
            metadata.entrypoint.clear();
            metadata.cmd.clone_from(&record.command);
        }
        metadata.env = record.env.iter().map(|(k, v)| format!("{k}={v}")).collect();
        metadata.working_dir.clone_from(&record.working_dir);

        let mut layer_dirs: Vec<&Path> = Vec::new();
        if let ContainerBase::Directory { path } = &record.base {
            layer_dirs.push(path);
        }
        layer_dirs.push(&record.writable_path);

        self.images.commit(
            base.as_ref(),
            &layer_dirs,
            name,
            tag,
            metadata,
            format!("commit of container {id}"),
        )
    }

    /// Commits a container as `name:tag` and uploads it to `target`.
    ///
    /// # Errors
    ///
    /// Returns any commit or transport error.
    pub fn push(
        &self,
        transport: &dyn RegistryTransport,
        id: &ContainerId,
        name: &str,
        tag: &str,
        target: &ImageRef,
    ) -> Result<ImageManifest> {
        let entry = self.commit(id, name, tag)?;
        self.images.push(transport, &entry.name, &entry.tag, target)
    }

    fn union_view(&self, record: &ContainerRecord) -> Result<UnionView> {
        let lowers = match &record.base {
            ContainerBase::Image { layer_stack, .. } => layer_stack
                .iter()
                .map(|digest| self.images.store().ensure_extracted(digest))
                .collect::<Result<Vec<_>>>()?,
            ContainerBase::Directory { path } => vec![path.clone()],
        };
        Ok(UnionView::new(lowers, record.writable_path.clone()))
    }

    fn effective_remap(&self, record: &ContainerRecord) -> RemapTable {
        let Some(cache) = &self.cache else {
            return record.remap_table.clone();
        };
        match cache.get_typed::<RemapTable>(&remap_key(record.id.as_str())) {
            Ok(Some(table)) => table,
            Ok(None) => record.remap_table.clone(),
            Err(e) => {
                tracing::warn!(id = %record.id, error = %e, "using stored remap table");
                record.remap_table.clone()
            }
        }
    }

    fn require_cache(&self) -> Result<&dyn SettingsCache> {
        self.cache
            .as_deref()
            .ok_or_else(|| BurrowError::ExternalServiceUnavailable {
                service: SERVICE_NAME,
                message: "not connected".into(),
            })
    }

    fn lock(&self, id: &ContainerId) -> Result<LifecycleLock> {
        LifecycleLock::acquire(&self.config.data_dir.join("locks"), id)
    }

    fn load(&self) -> Result<StateIndex> {
        state::load_state(&self.config.state_file())
    }

    fn save(&self, index: &StateIndex) -> Result<()> {
        state::save_state(&self.config.state_file(), index)
    }

    /// Stores a new status without touching fields other commands may
    /// have changed meanwhile.
    fn update_status(&self, record: &ContainerRecord) -> Result<()> {
        let mut index = self.load()?;
        let mut current = index.get(&record.id).cloned().unwrap_or_else(|| record.clone());
        current.status = record.status;
        index.upsert(current);
        self.save(&index)
    }
}

fn not_found(id: &ContainerId) -> BurrowError {
    BurrowError::NotFound {
        kind: "container",
        id: id.to_string(),
    }
}

fn shell_quote(s: &str) -> String {
    format!("'{}'", s.replace('\'', r"'\''"))
}

/// Unpacks the known components of a gzip tar bundle into `sys_dir`,
/// ignoring directory structure. Returns how many were installed.
fn install_bundle(tarball: &Path, sys_dir: &Path) -> Result<usize> {
    let io_err = |e| BurrowError::io(tarball, e);
    let file = File::open(tarball).map_err(io_err)?;
    let mut archive = tar::Archive::new(flate2::read::GzDecoder::new(file));
    let mut installed = 0;
    for entry in archive.entries().map_err(io_err)? {
        let mut entry = entry.map_err(io_err)?;
        if !entry.header().entry_type().is_file() {
            continue;
        }
        let path = entry.path().map_err(io_err)?.into_owned();
        let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
            continue;
        };
        let Some(component) = EXECUTION_COMPONENTS
            .iter()
            .chain(CACHE_COMPONENTS.iter())
            .find(|c| **c == name)
        else {
            tracing::debug!(path = %path.display(), "skipping bundle entry");
            continue;
        };
        let mut contents = Vec::new();
        let _bytes = entry.read_to_end(&mut contents).map_err(io_err)?;
        syscheck::install_component(sys_dir, component, &contents)?;
        installed += 1;
    }
    Ok(installed)
}
