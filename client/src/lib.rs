//! Client for the TNFS (Trivial Network File System) protocol.
//!
//! TNFS is a small request/response protocol for remote filesystem access,
//! originally designed for 8-bit retrocomputers. Frames travel over UDP
//! (the native transport) or TCP, carry a 4-byte header and little-endian
//! payload fields, and the server answers every request with a status byte.
//! Lost datagrams are handled by retransmitting the identical frame; the
//! server treats a repeated request id as a duplicate, so retries are safe.
//!
//! [`Client`] owns everything one session needs: the transport, the session
//! id assigned on mount, the request counter and the shared frame buffer.
//!
//! ```no_run
//! use tnfs_client::{Client, DirOptions, Protocol, SortOptions, DEFAULT_PORT};
//!
//! # fn main() -> tnfs_client::Result<()> {
//! let mut client = Client::connect("127.0.0.1", DEFAULT_PORT, Protocol::Udp)?;
//! client.mount("/", "", "")?;
//!
//! let mut dir = client.opendirx("/", "", DirOptions::default(), SortOptions::default())?;
//! while let Some(entry) = dir.next()? {
//!     println!("{} ({} bytes)", entry.name(), entry.size());
//! }
//! dir.close()?;
//!
//! client.umount()?;
//! # Ok(())
//! # }
//! ```

#![cfg_attr(test, allow(clippy::unwrap_used))]

mod client;
mod config;
mod dir;
mod error;
mod file;
mod transport;
mod wire;

pub use client::Client;
pub use config::Config;
pub use dir::{DirEntry, DirHandle, DirOptions, DirStream, SortKey, SortOptions};
pub use error::{Error, Result, Status};
pub use file::{FileHandle, FileStat, OpenFlags, RemoteFile};
pub use transport::{DEFAULT_PORT, NetTransport, Protocol, Recv, Transport};
