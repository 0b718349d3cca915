//! `harbormount`: mounts an S3-compatible bucket as a local filesystem.

use std::path::PathBuf;
use std::sync::Arc;
use std::sync::mpsc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use harborfs_core::{
    CoreConfig, HarborFs, ObjectStoreRemote, RemoteConfig, RemoteStore, Scheme, StagingMode,
};
use harborfs_fuse::{HarborFuse, MountConfig, mount};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

/// How often parked content is offered to the bucket again.
const RETRY_INTERVAL: Duration = Duration::from_secs(60);

/// Mount an object-storage bucket with FUSE
#[derive(Parser, Debug)]
#[command(name = "harbormount", version, about)]
struct Args {
    /// Bucket to mount
    bucket: String,

    /// Mountpoint directory
    mountpoint: PathBuf,

    /// Access key for the bucket
    #[arg(env = "HARBOR_ACCESS_KEY", hide_env_values = true)]
    access_key: String,

    /// Secret key for the bucket
    #[arg(env = "HARBOR_SECRET_KEY", hide_env_values = true)]
    secret_key: String,

    /// Endpoint domain of the object store
    #[arg(long, default_value = harborfs_core::config::DEFAULT_ENDPOINT)]
    endpoint: String,

    /// URL scheme used to reach the endpoint (http or https)
    #[arg(long, default_value = "https")]
    scheme: Scheme,

    /// Region used for request signing
    #[arg(long, default_value = harborfs_core::config::DEFAULT_REGION)]
    region: String,

    /// Stage open files in this directory instead of memory
    #[arg(long)]
    staging_dir: Option<PathBuf>,

    /// Timeout in seconds for each remote call
    #[arg(long, default_value_t = 30)]
    timeout: u64,

    /// Largest file size in bytes; bigger writes and truncates fail with EFBIG
    #[arg(long, default_value_t = harborfs_core::config::DEFAULT_MAX_FILE_SIZE)]
    max_file_size: u64,

    /// Mount read-only
    #[arg(long)]
    read_only: bool,

    /// Allow other users to access the mount
    #[arg(long)]
    allow_other: bool,

    /// Serve this local directory instead of the remote bucket
    #[arg(long, value_name = "DIR")]
    local_root: Option<PathBuf>,

    /// Increase log verbosity (-v debug, -vv trace)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

fn init_tracing(verbose: u8) {
    let level = match verbose {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(format!("warn,harborfs_core={level},harborfs_fuse={level},harbormount={level}"))
    });
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn build_store(args: Args, timeout: Duration) -> Result<Arc<dyn RemoteStore>> {
    let store = if let Some(root) = &args.local_root {
        std::fs::create_dir_all(root)
            .with_context(|| format!("Failed to create local root {}", root.display()))?;
        ObjectStoreRemote::local(args.bucket, root).context("Failed to open local root")?
    } else {
        let config = RemoteConfig::new(args.bucket, args.access_key, args.secret_key)
            .scheme(args.scheme)
            .endpoint(args.endpoint)
            .region(args.region);
        ObjectStoreRemote::s3(&config, timeout).context("Failed to configure bucket client")?
    };
    Ok(Arc::new(store))
}

fn current_owner() -> (u32, u32) {
    // SAFETY: getuid/getgid cannot fail and touch no memory
    unsafe { (libc::getuid(), libc::getgid()) }
}

fn main() -> Result<()> {
    let args = Args::parse();
    init_tracing(args.verbose);

    let mountpoint = args.mountpoint.clone();
    let timeout = Duration::from_secs(args.timeout);
    let (uid, gid) = current_owner();

    let mut core = CoreConfig::default()
        .remote_timeout(timeout)
        .owner(uid, gid)
        .max_file_size(args.max_file_size)
        .read_only(args.read_only);
    if let Some(dir) = &args.staging_dir {
        std::fs::create_dir_all(dir)
            .with_context(|| format!("Failed to create staging dir {}", dir.display()))?;
        core = core.staging(StagingMode::Disk(dir.clone()));
    }
    let mount_config = MountConfig::for_bucket(&args.bucket)
        .read_only(args.read_only)
        .allow_other(args.allow_other)
        .bridge_timeout(timeout * 4);

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .thread_name("harborfs-io")
        .build()
        .context("Failed to start async runtime")?;

    let store = build_store(args, timeout)?;
    let fs = Arc::new(HarborFs::new(store, core));

    let retry_fs = Arc::clone(&fs);
    runtime.spawn(async move {
        let mut ticker = tokio::time::interval(RETRY_INTERVAL);
        loop {
            ticker.tick().await;
            if retry_fs.divergent_paths().is_empty() {
                continue;
            }
            let uploaded = retry_fs.retry_divergent().await;
            if uploaded > 0 {
                info!(uploaded, "Uploaded parked content");
            }
        }
    });

    let fuse = HarborFuse::new(Arc::clone(&fs), runtime.handle().clone(), mount_config.clone());
    let handle = mount(fuse, &mountpoint, &mount_config)
        .with_context(|| format!("Failed to mount at {}", mountpoint.display()))?;
    info!(mountpoint = %mountpoint.display(), bucket = fs.bucket(), "Mounted, press Ctrl-C to unmount");

    let (tx, rx) = mpsc::channel();
    ctrlc::set_handler(move || {
        let _ = tx.send(());
    })
    .context("Failed to install signal handler")?;
    let _ = rx.recv();

    handle.unmount();
    let lost = fs.divergent_paths();
    if !lost.is_empty() {
        warn!(paths = ?lost, "Exiting with content that never reached the bucket");
    }
    runtime.shutdown_timeout(Duration::from_secs(5));
    Ok(())
}
