//! Command line client for TNFS servers.

use std::io::Write as _;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context as _, Result};
use clap::{Parser, Subcommand};
use tnfs_client::{
    Client, Config, DEFAULT_PORT, DirOptions, OpenFlags, Protocol, SortKey, SortOptions,
};
use tracing::level_filters::LevelFilter;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "tnfs", version, about = "Command line client for TNFS servers")]
struct Cli {
    /// Host name or IP address of the server.
    host: String,

    /// Server port.
    #[arg(long, default_value_t = DEFAULT_PORT)]
    port: u16,

    /// Connect over TCP instead of UDP.
    #[arg(long)]
    tcp: bool,

    /// Directory to mount.
    #[arg(long, default_value = "/")]
    mount: String,

    /// Mount user name.
    #[arg(long, default_value = "")]
    user: String,

    /// Mount password.
    #[arg(long, default_value = "", env = "TNFS_PASSWORD")]
    password: String,

    /// Receive timeout per attempt, e.g. "1500ms" or "2s".
    #[arg(long, value_parser = humantime::parse_duration)]
    timeout: Option<Duration>,

    #[command(subcommand)]
    command: Cmd,
}

#[derive(Subcommand)]
enum Cmd {
    /// List a directory.
    Ls {
        #[arg(default_value = "/")]
        path: String,

        /// Only show entries matching this glob pattern.
        #[arg(long, default_value = "")]
        pattern: String,

        /// Include hidden entries.
        #[arg(short, long)]
        all: bool,

        /// Include special entries (devices, sockets, ...).
        #[arg(long)]
        special: bool,

        /// Sort key.
        #[arg(long, value_enum, default_value = "name")]
        sort: SortBy,

        /// Sort in descending order.
        #[arg(long)]
        descending: bool,
    },
    /// Print a remote file to stdout.
    Cat { path: String },
    /// Download a remote file.
    Get {
        remote: String,
        /// Local target path; defaults to the remote file name.
        local: Option<PathBuf>,
    },
    /// Upload a local file.
    Put {
        local: PathBuf,
        /// Remote target path; defaults to the local file name.
        remote: Option<String>,
    },
    /// Show metadata of a file or directory.
    Stat { path: String },
    /// Create a directory.
    Mkdir { path: String },
    /// Remove an empty directory.
    Rmdir { path: String },
    /// Delete a file.
    Rm { path: String },
    /// Rename or move within the mounted filesystem.
    Mv { source: String, destination: String },
    /// Change permission bits (octal mode).
    Chmod { mode: String, path: String },
    /// Show total and free space of the mounted filesystem.
    Df,
}

#[derive(Debug, Clone, Copy, clap::ValueEnum)]
enum SortBy {
    Name,
    Modified,
    Size,
    None,
}

#[expect(
    clippy::print_stderr,
    reason = "No logger is active when we are printing this error."
)]
fn main() {
    match try_main() {
        Ok(()) => {}
        Err(e) => {
            // Print the chain of errors manually to avoid it looking like a
            // crash with a stacktrace.
            eprintln!("{e:#}");

            std::process::exit(1);
        }
    }
}

fn try_main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::builder()
                .with_default_directive(LevelFilter::WARN.into())
                .from_env_lossy(),
        )
        .init();

    let cli = Cli::parse();

    let mut config = Config::default();
    if let Some(timeout) = cli.timeout {
        config.timeout = timeout;
    }

    let protocol = if cli.tcp { Protocol::Tcp } else { Protocol::Udp };

    let mut client = Client::connect_with(&cli.host, cli.port, protocol, config)
        .with_context(|| format!("Failed to connect to {}:{}", cli.host, cli.port))?;

    client
        .mount(&cli.mount, &cli.user, &cli.password)
        .with_context(|| format!("Failed to mount {} from {}", cli.mount, cli.host))?;

    let result = run(&mut client, &cli.command);

    if let Err(e) = client.umount() {
        tracing::debug!("Failed to unmount cleanly: {e}");
    }

    result
}

fn run(client: &mut Client, command: &Cmd) -> Result<()> {
    match command {
        Cmd::Ls {
            path,
            pattern,
            all,
            special,
            sort,
            descending,
        } => ls(client, path, pattern, *all, *special, *sort, *descending),
        Cmd::Cat { path } => cat(client, path),
        Cmd::Get { remote, local } => get(client, remote, local.as_deref()),
        Cmd::Put { local, remote } => put(client, local, remote.as_deref()),
        Cmd::Stat { path } => stat(client, path),
        Cmd::Mkdir { path } => {
            client
                .mkdir(path)
                .with_context(|| format!("Failed to create {path}"))?;

            Ok(())
        }
        Cmd::Rmdir { path } => {
            client
                .rmdir(path)
                .with_context(|| format!("Failed to remove {path}"))?;

            Ok(())
        }
        Cmd::Rm { path } => {
            client
                .unlink(path)
                .with_context(|| format!("Failed to delete {path}"))?;

            Ok(())
        }
        Cmd::Mv {
            source,
            destination,
        } => {
            client
                .rename(source, destination)
                .with_context(|| format!("Failed to rename {source} to {destination}"))?;

            Ok(())
        }
        Cmd::Chmod { mode, path } => {
            let mode = u16::from_str_radix(mode, 8)
                .with_context(|| format!("{mode} is not an octal mode"))?;

            client
                .chmod(path, mode)
                .with_context(|| format!("Failed to change mode of {path}"))?;

            Ok(())
        }
        Cmd::Df => df(client),
    }
}

#[expect(
    clippy::print_stdout,
    reason = "The listing is this command's output."
)]
fn ls(
    client: &mut Client,
    path: &str,
    pattern: &str,
    all: bool,
    special: bool,
    sort: SortBy,
    descending: bool,
) -> Result<()> {
    let options = DirOptions {
        include_hidden: all,
        include_special: special,
        ..Default::default()
    };
    let sort = SortOptions {
        key: match sort {
            SortBy::Name => SortKey::Name,
            SortBy::Modified => SortKey::Modified,
            SortBy::Size => SortKey::Size,
            SortBy::None => SortKey::Unsorted,
        },
        descending,
        ..Default::default()
    };

    let mut dir = client
        .opendirx(path, pattern, options, sort)
        .with_context(|| format!("Failed to open directory {path}"))?;

    println!("{}: {} entries", path, dir.total_entries());

    while let Some(entry) = dir.next()? {
        if entry.is_dir() {
            println!("{:>10}  {:16}  {}/", "<dir>", format_time(entry.mtime()), entry.name());
        } else {
            println!(
                "{:>10}  {:16}  {}",
                entry.size(),
                format_time(entry.mtime()),
                entry.name()
            );
        }
    }

    dir.close()?;

    Ok(())
}

fn cat(client: &mut Client, path: &str) -> Result<()> {
    let mut file = client
        .open_file(path, OpenFlags::RDONLY, 0)
        .with_context(|| format!("Failed to open {path}"))?;

    let mut contents = Vec::new();
    file.read_to_end(&mut contents)?;
    file.close()?;

    std::io::stdout().write_all(&contents)?;

    Ok(())
}

#[expect(
    clippy::print_stdout,
    reason = "The transfer summary is this command's output."
)]
fn get(client: &mut Client, remote: &str, local: Option<&Path>) -> Result<()> {
    let target = match local {
        Some(path) => path.to_owned(),
        None => PathBuf::from(remote.rsplit('/').next().unwrap_or(remote)),
    };

    let mut file = client
        .open_file(remote, OpenFlags::RDONLY, 0)
        .with_context(|| format!("Failed to open {remote}"))?;

    let mut contents = Vec::new();
    let read = file.read_to_end(&mut contents)?;
    file.close()?;

    std::fs::write(&target, &contents)
        .with_context(|| format!("Failed to write {}", target.display()))?;

    println!("{read} bytes -> {}", target.display());

    Ok(())
}

#[expect(
    clippy::print_stdout,
    reason = "The transfer summary is this command's output."
)]
fn put(client: &mut Client, local: &Path, remote: Option<&str>) -> Result<()> {
    let contents =
        std::fs::read(local).with_context(|| format!("Failed to read {}", local.display()))?;

    let fallback;
    let target = if let Some(remote) = remote {
        remote
    } else {
        fallback = local
            .file_name()
            .context("Local path has no file name")?
            .to_string_lossy()
            .into_owned();

        &fallback
    };

    let mut file = client
        .open_file(
            target,
            OpenFlags::WRONLY | OpenFlags::CREATE | OpenFlags::TRUNCATE,
            0o644,
        )
        .with_context(|| format!("Failed to create {target}"))?;

    file.write_all(&contents)?;
    file.close()?;

    println!("{} bytes -> {target}", contents.len());

    Ok(())
}

#[expect(
    clippy::print_stdout,
    reason = "The metadata is this command's output."
)]
fn stat(client: &mut Client, path: &str) -> Result<()> {
    let stat = client
        .stat(path)
        .with_context(|| format!("Failed to stat {path}"))?;

    println!("mode:  {:o}", stat.mode);
    println!("uid:   {} ({})", stat.uid, stat.uid_name);
    println!("gid:   {} ({})", stat.gid, stat.gid_name);
    println!("size:  {} bytes", stat.size);
    println!("atime: {}", format_time(stat.atime));
    println!("mtime: {}", format_time(stat.mtime));
    println!("ctime: {}", format_time(stat.ctime));

    Ok(())
}

#[expect(
    clippy::print_stdout,
    reason = "The volume stats are this command's output."
)]
fn df(client: &mut Client) -> Result<()> {
    let total = client
        .size_kb()
        .context("Server does not report volume size")?;
    let free = client
        .free_kb()
        .context("Server does not report free space")?;

    println!("total: {total} KiB");
    println!("free:  {free} KiB");

    Ok(())
}

fn format_time(timestamp: u32) -> String {
    chrono::DateTime::from_timestamp(i64::from(timestamp), 0)
        .map(|time| {
            time.with_timezone(&chrono::Local)
                .format("%Y-%m-%d %H:%M")
                .to_string()
        })
        .unwrap_or_else(|| "-".to_owned())
}
