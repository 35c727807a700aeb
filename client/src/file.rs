//! File handles, open flags and metadata.

use std::io::SeekFrom;
use std::ops::{BitOr, BitOrAssign};

use crate::client::Client;
use crate::error::{Error, Result};
use crate::transport::Transport;

/// Server-assigned handle for an open file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FileHandle(pub(crate) u8);

impl FileHandle {
    pub fn raw(self) -> u8 {
        self.0
    }
}

/// OR-able file open flags.
///
/// One of [`OpenFlags::RDONLY`], [`OpenFlags::WRONLY`] or
/// [`OpenFlags::RDWR`] is required; the rest modify create/append
/// behaviour.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OpenFlags(u16);

impl OpenFlags {
    pub const RDONLY: Self = Self(0x0001);
    pub const WRONLY: Self = Self(0x0002);
    pub const RDWR: Self = Self(0x0003);
    /// Append to the file if it exists (write only).
    pub const APPEND: Self = Self(0x0008);
    /// Create the file if it does not exist.
    pub const CREATE: Self = Self(0x0100);
    /// Truncate the file on open for writing.
    pub const TRUNCATE: Self = Self(0x0200);
    /// With [`OpenFlags::CREATE`], fail if the file exists.
    pub const EXCLUSIVE: Self = Self(0x0400);

    pub fn bits(self) -> u16 {
        self.0
    }

    pub fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }
}

impl BitOr for OpenFlags {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

impl BitOrAssign for OpenFlags {
    fn bitor_assign(&mut self, rhs: Self) {
        self.0 |= rhs.0;
    }
}

/// Metadata of a file or directory, as reported by STAT.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileStat {
    /// Permission bits.
    pub mode: u16,
    pub uid: u16,
    pub gid: u16,
    /// Size in bytes.
    pub size: u32,
    /// Access time, seconds since the epoch.
    pub atime: u32,
    /// Modification time, seconds since the epoch.
    pub mtime: u32,
    /// Time of last status change, seconds since the epoch.
    pub ctime: u32,
    /// Owner name; may be empty if the server does not report one.
    pub uid_name: String,
    /// Group name; may be empty if the server does not report one.
    pub gid_name: String,
}

/// A scoped open file.
///
/// Borrows the client exclusively for its lifetime. Dropping the value
/// closes the server-side handle; a failure to do so is logged, not
/// surfaced. Call [`RemoteFile::close`] to observe the close result.
pub struct RemoteFile<'c, T: Transport> {
    client: &'c mut Client<T>,
    handle: FileHandle,
    closed: bool,
}

impl<'c, T: Transport> RemoteFile<'c, T> {
    pub(crate) fn new(client: &'c mut Client<T>, handle: FileHandle) -> Self {
        Self {
            client,
            handle,
            closed: false,
        }
    }

    pub fn handle(&self) -> FileHandle {
        self.handle
    }

    /// Reads at most `buf.len()` bytes; `Ok(0)` means end of file.
    pub fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        let handle = self.handle;

        self.client.read(handle, buf)
    }

    /// Reads from the current position to the end of the file, appending
    /// to `out`. Returns the number of bytes read.
    pub fn read_to_end(&mut self, out: &mut Vec<u8>) -> Result<usize> {
        let mut chunk = vec![0u8; self.client.max_io_len()];
        let mut total = 0;

        loop {
            let read = self.read(&mut chunk)?;

            if read == 0 {
                return Ok(total);
            }

            out.extend_from_slice(&chunk[..read]);
            total += read;
        }
    }

    /// Writes a prefix of `data`, returning how many bytes the server
    /// accepted.
    pub fn write(&mut self, data: &[u8]) -> Result<usize> {
        let handle = self.handle;

        self.client.write(handle, data)
    }

    /// Writes all of `data`, issuing as many exchanges as needed.
    pub fn write_all(&mut self, mut data: &[u8]) -> Result<()> {
        while !data.is_empty() {
            let written = self.write(data)?;

            if written == 0 {
                return Err(Error::Malformed("server accepted zero bytes"));
            }

            // Cap against a server claiming more than it was sent.
            data = &data[written.min(data.len())..];
        }

        Ok(())
    }

    pub fn seek(&mut self, pos: SeekFrom) -> Result<()> {
        let handle = self.handle;

        self.client.seek(handle, pos)
    }

    /// Closes the server-side handle, surfacing any error.
    pub fn close(mut self) -> Result<()> {
        self.closed = true;
        let handle = self.handle;

        self.client.close(handle)
    }
}

impl<T: Transport> Drop for RemoteFile<'_, T> {
    fn drop(&mut self) {
        if self.closed {
            return;
        }

        if let Err(e) = self.client.close(self.handle) {
            tracing::warn!(handle = self.handle.raw(), "failed to close remote file: {e}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flags_combine() {
        let flags = OpenFlags::WRONLY | OpenFlags::CREATE | OpenFlags::TRUNCATE;

        assert_eq!(flags.bits(), 0x0302);
        assert!(flags.contains(OpenFlags::CREATE));
        assert!(!flags.contains(OpenFlags::EXCLUSIVE));
    }

    #[test]
    fn rdwr_covers_both_directions() {
        assert!(OpenFlags::RDWR.contains(OpenFlags::RDONLY));
        assert!(OpenFlags::RDWR.contains(OpenFlags::WRONLY));
    }
}
