//! `burrow docker`: image download, packaging, and publishing.

use std::path::PathBuf;

use clap::{Args, Subcommand};

use burrow_common::config::BurrowConfig;
use burrow_common::types::ContainerId;
use burrow_image::remote::RegistryTransport;

use crate::commands::{CacheUse, exit_with, image_ref, launcher, open_engine, registry};
use crate::output::{self, format_age, format_bytes};

/// Arguments for the `docker` command.
#[derive(Args, Debug)]
pub struct DockerArgs {
    /// Operation.
    #[command(subcommand)]
    pub command: DockerCommand,
}

/// Registry account, when the registry needs one.
#[derive(Args, Debug, Clone, Default)]
pub struct Account {
    /// Registry username.
    #[arg(long)]
    pub user: Option<String>,

    /// Registry password or token.
    #[arg(long)]
    pub pass: Option<String>,
}

/// `docker` operations.
#[derive(Subcommand, Debug)]
pub enum DockerCommand {
    /// Download an image and extract its layers.
    Download {
        /// Image reference (`[registry/]name[:tag]`).
        image: String,
        /// Registry account.
        #[command(flatten)]
        account: Account,
    },
    /// Import an image package.
    Add {
        /// Package tarball written by `docker package`.
        tarball: PathBuf,
    },
    /// Write an image and its blobs to a package tarball.
    Package {
        /// Image reference.
        image: String,
        /// Registry account, used when the image must be downloaded.
        #[command(flatten)]
        account: Account,
    },
    /// Save a container's changes as a new image.
    Commit {
        /// Container ID.
        #[arg(long)]
        id: String,
        /// New image name.
        #[arg(long)]
        name: String,
        /// New image tag.
        #[arg(long, default_value = "latest")]
        tag: String,
    },
    /// Create a container from an image and run its default command.
    Create {
        /// Image reference.
        image: String,
        /// Container name.
        #[arg(long)]
        name: Option<String>,
    },
    /// Remove an image and the layers no other image uses.
    Delete {
        /// Image reference.
        image: String,
    },
    /// List a repository's tags.
    Search {
        /// Repository (`[registry/]name`).
        image: String,
    },
    /// List local images.
    List,
    /// Drop an image's extracted layers; blobs are kept.
    Reset {
        /// Image reference.
        image: String,
    },
    /// Commit a container and upload it.
    Push {
        /// Registry account.
        #[command(flatten)]
        account: Account,
        /// Container ID.
        #[arg(long)]
        id: String,
        /// Target image name.
        #[arg(long)]
        name: String,
        /// Target tag.
        #[arg(long, default_value = "latest")]
        tag: String,
    },
}

/// Executes the `docker` command.
///
/// # Errors
///
/// Returns an error if the registry, the image store, or the container
/// operation fails.
pub fn execute(args: DockerArgs, config: &BurrowConfig) -> anyhow::Result<()> {
    match args.command {
        DockerCommand::Download { image, account } => {
            let image = image_ref(config, &image)?;
            let engine = open_engine(config, CacheUse::Unused)?;
            let client = registry(&image, account.user, account.pass)?;
            let entry = engine.images().download(&client, &image)?;
            output::done(&format!(
                "downloaded {} ({} layers, {})",
                entry.reference(),
                entry.layers.len(),
                format_bytes(entry.size_bytes())
            ));
        }
        DockerCommand::Add { tarball } => {
            let engine = open_engine(config, CacheUse::Unused)?;
            let entry = engine.images().add(&tarball)?;
            output::done(&format!("added {}", entry.reference()));
        }
        DockerCommand::Package { image, account } => {
            let image = image_ref(config, &image)?;
            let engine = open_engine(config, CacheUse::Unused)?;
            let client = registry(&image, account.user, account.pass)?;
            let transport: &dyn RegistryTransport = &client;
            let path = engine.images().package(Some(transport), &image)?;
            output::done(&format!("packaged {}", path.display()));
        }
        DockerCommand::Commit { id, name, tag } => {
            let engine = open_engine(config, CacheUse::Unused)?;
            let entry = engine.commit(&ContainerId::new(id), &name, &tag)?;
            output::done(&format!("committed {}", entry.reference()));
        }
        DockerCommand::Create { image, name } => {
            let image = image_ref(config, &image)?;
            let launcher = launcher(config)?;
            let engine = open_engine(config, CacheUse::Optional)?;
            let client = registry(&image, None, None)?;
            let transport: &dyn RegistryTransport = &client;
            let outcome =
                engine.create_from_image(&image, name.as_deref(), &launcher, Some(transport))?;
            output::done(&format!("created container {}", outcome.record.id));
            if let Some(code) = outcome.exit_code {
                exit_with(code);
            }
        }
        DockerCommand::Delete { image } => {
            let image = image_ref(config, &image)?;
            let engine = open_engine(config, CacheUse::Unused)?;
            let entry = engine.images().delete(&image.catalog_name(), &image.tag)?;
            output::done(&format!("deleted {}", entry.reference()));
        }
        DockerCommand::Search { image } => {
            let image = image_ref(config, &image)?;
            let engine = open_engine(config, CacheUse::Unused)?;
            let client = registry(&image, None, None)?;
            for tag in engine.images().search(&client, &image)? {
                println!("{tag}");
            }
        }
        DockerCommand::List => list(config)?,
        DockerCommand::Reset { image } => {
            let image = image_ref(config, &image)?;
            let engine = open_engine(config, CacheUse::Unused)?;
            let removed = engine.images().reset(&image.catalog_name(), &image.tag)?;
            output::done(&format!("removed {removed} extracted layers"));
        }
        DockerCommand::Push {
            account,
            id,
            name,
            tag,
        } => {
            let target = image_ref(config, &format!("{name}:{tag}"))?;
            let engine = open_engine(config, CacheUse::Unused)?;
            let client = registry(&target, account.user, account.pass)?;
            let manifest = engine.push(&client, &ContainerId::new(id), &name, &tag, &target)?;
            output::done(&format!(
                "pushed {} ({} layers)",
                target.full_name(),
                manifest.layers.len()
            ));
        }
    }
    Ok(())
}

fn list(config: &BurrowConfig) -> anyhow::Result<()> {
    let engine = open_engine(config, CacheUse::Unused)?;
    let images = engine.images().list()?;
    if images.is_empty() {
        println!("No images found.");
        return Ok(());
    }
    let now = chrono::Utc::now();
    println!(
        "{:<40} {:<12} {:<8} {:<10} {:<6} {:<20}",
        "NAME", "TAG", "LAYERS", "SIZE", "AGE", "SOURCE"
    );
    for image in &images {
        println!(
            "{:<40} {:<12} {:<8} {:<10} {:<6} {:<20}",
            image.name,
            image.tag,
            image.layers.len(),
            format_bytes(image.size_bytes()),
            format_age(image.created_at, now),
            image.source
        );
    }
    Ok(())
}
