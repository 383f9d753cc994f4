// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! nullfs FUSE Host
//!
//! Mounts a filesystem that keeps the directory tree in memory and discards
//! every byte written to it.

#[cfg(all(feature = "fuse", target_os = "linux"))]
mod adapter;

#[cfg(all(feature = "fuse", target_os = "linux"))]
use adapter::NullFsFuse;
use anyhow::{bail, Result};
use clap::Parser;
use nullfs_core::{FsConfig, RootMetadata};
use nullfs_logging::{CliLogLevel, CliLoggingArgs};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{error, info};

#[derive(Parser, Debug)]
#[command(name = "nullfs-fuse-host", about = "Mount a write-discarding in-memory filesystem")]
struct Args {
    /// Where to mount the file system
    mount_point: PathBuf,

    /// Configuration file (JSON)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Enable debugging output
    #[arg(long)]
    debug: bool,

    /// Log every FUSE request and reply (`fuser` request trace)
    #[arg(long)]
    debug_fuse: bool,

    /// Allow other users to access the filesystem
    #[arg(long)]
    allow_other: bool,

    /// Auto unmount on process exit
    #[arg(long)]
    auto_unmount: bool,

    #[command(flatten)]
    logging: CliLoggingArgs,
}

fn load_config(config_path: Option<&Path>) -> Result<FsConfig> {
    match config_path {
        Some(path) => {
            let content = fs::read_to_string(path)?;
            Ok(FsConfig::from_json_str(&content)?)
        }
        None => Ok(FsConfig::default()),
    }
}

/// Extra filter directives implied by the command line
fn log_directives(args: &Args) -> &'static [&'static str] {
    if args.debug_fuse {
        &["fuser=debug"]
    } else {
        &[]
    }
}

#[cfg(all(feature = "fuse", target_os = "linux"))]
fn mount_options(config: &FsConfig, args: &Args) -> Vec<fuser::MountOption> {
    let mut options = vec![
        fuser::MountOption::FSName(config.fs_name.clone()),
        fuser::MountOption::Subtype("nullfs".to_string()),
    ];

    if args.allow_other {
        options.push(fuser::MountOption::AllowOther);
    }

    if args.auto_unmount {
        options.push(fuser::MountOption::AutoUnmount);
    }

    options
}

fn main() -> Result<()> {
    let args = Args::parse();

    let default_level = if args.debug {
        CliLogLevel::Debug
    } else {
        CliLogLevel::Info
    };
    args.logging
        .clone()
        .init("nullfs-fuse-host", default_level, log_directives(&args))?;

    info!("Starting nullfs FUSE Host");
    info!("Mount point: {}", args.mount_point.display());

    if !args.mount_point.is_dir() {
        error!(mount_point = %args.mount_point.display(), "mount point is not a directory");
        bail!("{} is not a directory", args.mount_point.display());
    }

    let config = load_config(args.config.as_deref())?;
    info!("Configuration loaded: {:?}", config);

    let root = RootMetadata::from_dir(&args.mount_point)?;

    #[cfg(all(feature = "fuse", target_os = "linux"))]
    {
        let options = mount_options(&config, &args);
        let filesystem = NullFsFuse::new(config, &root)?;

        info!("Mounting filesystem...");
        let session = fuser::spawn_mount2(filesystem, &args.mount_point, &options)?;
        info!("nullfs mounted; blocking until unmount");
        session.join();
        info!("Unmounted {}", args.mount_point.display());
    }

    #[cfg(not(all(feature = "fuse", target_os = "linux")))]
    {
        let core = nullfs_core::NullFs::new(config, &root)?;
        tracing::warn!("FUSE support not compiled in. This binary is for testing only.");
        info!(nodes = core.node_count(), "nullfs core initialized");
        info!("To enable FUSE support, compile with: cargo build --features fuse");
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_config_loading_default() {
        let config = load_config(None).unwrap();
        assert_eq!(config.fs_name, "nullfs");
        assert_eq!(config.cache.attr_ttl_ms, 1000);
        assert_eq!(config.block_size, 4096);
    }

    #[test]
    fn test_config_loading_from_file() {
        let mut temp_file = NamedTempFile::new().unwrap();
        let config_json = r#"{
            "fs_name": "scratch",
            "cache": {
                "attr_ttl_ms": 250,
                "entry_ttl_ms": 500
            }
        }"#;
        temp_file.write_all(config_json.as_bytes()).unwrap();
        temp_file.flush().unwrap();

        let config = load_config(Some(temp_file.path())).unwrap();
        assert_eq!(config.fs_name, "scratch");
        assert_eq!(config.cache.attr_ttl_ms, 250);
        assert_eq!(config.cache.entry_ttl_ms, 500);
        assert_eq!(config.block_size, 4096);
    }

    #[test]
    fn test_config_loading_rejects_garbage() {
        let mut temp_file = NamedTempFile::new().unwrap();
        temp_file.write_all(b"not json").unwrap();
        temp_file.flush().unwrap();

        assert!(load_config(Some(temp_file.path())).is_err());
        assert!(load_config(Some(Path::new("/nonexistent/nullfs.json"))).is_err());
    }

    #[test]
    fn test_args_parsing() {
        let args = Args::try_parse_from([
            "nullfs-fuse-host",
            "/mnt/null",
            "--debug",
            "--debug-fuse",
            "--log-format",
            "json",
        ])
        .unwrap();
        assert_eq!(args.mount_point, PathBuf::from("/mnt/null"));
        assert!(args.debug);
        assert!(args.debug_fuse);
        assert!(!args.allow_other);
        assert_eq!(args.logging.log_format, Some(nullfs_logging::LogFormat::Json));

        assert!(Args::try_parse_from(["nullfs-fuse-host"]).is_err());
    }

    #[test]
    fn test_debug_fuse_enables_request_trace() {
        let args = Args::try_parse_from(["nullfs-fuse-host", "/mnt/null", "--debug-fuse"]).unwrap();
        assert_eq!(log_directives(&args), &["fuser=debug"]);

        let args = Args::try_parse_from(["nullfs-fuse-host", "/mnt/null", "--debug"]).unwrap();
        assert!(log_directives(&args).is_empty());
    }

    #[cfg(all(feature = "fuse", target_os = "linux"))]
    #[test]
    fn test_mount_options() {
        let args =
            Args::try_parse_from(["nullfs-fuse-host", "/mnt/null", "--debug-fuse", "--allow-other"])
                .unwrap();
        let options = mount_options(&FsConfig::default(), &args);

        assert!(options.contains(&fuser::MountOption::FSName("nullfs".to_string())));
        assert!(options.contains(&fuser::MountOption::Subtype("nullfs".to_string())));
        assert!(!options.iter().any(|o| matches!(o, fuser::MountOption::CUSTOM(_))));
        assert!(options.contains(&fuser::MountOption::AllowOther));
        assert!(!options.contains(&fuser::MountOption::AutoUnmount));
    }
}
