//! Streaming directory enumeration.
//!
//! The extended listing command delivers entries in batches; [`DirStream`]
//! turns those batches into a one-entry-at-a-time stream. Entry names are
//! borrowed straight out of the session buffer, so an entry is only valid
//! until the stream is advanced again.

use std::borrow::Cow;

use crate::client::Client;
use crate::error::Result;
use crate::transport::Transport;
use crate::wire::FrameReader;

/// Entry flag: the entry is a directory.
const ENTRY_DIR: u8 = 0x01;
/// Entry flag: the entry is hidden.
const ENTRY_HIDDEN: u8 = 0x02;
/// Entry flag: the entry is a special file.
const ENTRY_SPECIAL: u8 = 0x04;

/// Directory-status flag: the current batch is the last one.
const DIRSTATUS_EOF: u8 = 0x01;

/// Reply bytes preceding the first entry record of a batch.
const BATCH_HEADER_LEN: usize = 9;

/// Server-assigned handle for an open directory.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DirHandle(pub(crate) u8);

impl DirHandle {
    pub fn raw(self) -> u8 {
        self.0
    }
}

/// Filtering options for extended directory listings.
///
/// The protocol expresses these as opt-outs of the server's defaults
/// (folders first, hidden and special entries skipped); the field names
/// here say what you get instead.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DirOptions {
    /// Do not sort directories before regular files.
    pub no_folders_first: bool,
    /// Include entries the server would consider hidden.
    pub include_hidden: bool,
    /// Include special entries (devices, sockets and the like).
    pub include_special: bool,
    /// Apply the name pattern to directories as well.
    pub pattern_matches_dirs: bool,
}

impl DirOptions {
    pub(crate) fn bits(self) -> u8 {
        let mut bits = 0;

        if self.no_folders_first {
            bits |= 0x01;
        }
        if self.include_hidden {
            bits |= 0x02;
        }
        if self.include_special {
            bits |= 0x04;
        }
        if self.pattern_matches_dirs {
            bits |= 0x08;
        }

        bits
    }
}

/// Sort key for extended directory listings.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum SortKey {
    #[default]
    Name,
    /// No sorting at all; entries arrive in server order.
    Unsorted,
    Modified,
    Size,
}

/// Sort order for extended directory listings.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SortOptions {
    pub key: SortKey,
    pub case_sensitive: bool,
    pub descending: bool,
}

impl SortOptions {
    pub(crate) fn bits(self) -> u8 {
        let mut bits = match self.key {
            SortKey::Name => 0x00,
            SortKey::Unsorted => 0x01,
            SortKey::Modified => 0x08,
            SortKey::Size => 0x10,
        };

        if self.case_sensitive {
            bits |= 0x02;
        }
        if self.descending {
            bits |= 0x04;
        }

        bits
    }
}

/// One directory entry, borrowed from the session buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DirEntry<'a> {
    pub(crate) flags: u8,
    pub(crate) size: u32,
    pub(crate) mtime: u32,
    pub(crate) ctime: u32,
    pub(crate) name: &'a [u8],
}

impl<'a> DirEntry<'a> {
    pub fn is_dir(&self) -> bool {
        self.flags & ENTRY_DIR != 0
    }

    pub fn is_hidden(&self) -> bool {
        self.flags & ENTRY_HIDDEN != 0
    }

    pub fn is_special(&self) -> bool {
        self.flags & ENTRY_SPECIAL != 0
    }

    /// File size in bytes.
    pub fn size(&self) -> u32 {
        self.size
    }

    /// Modification time, seconds since the epoch.
    pub fn mtime(&self) -> u32 {
        self.mtime
    }

    /// Creation (status change) time, seconds since the epoch.
    pub fn ctime(&self) -> u32 {
        self.ctime
    }

    /// The raw entry name. Not guaranteed to be UTF-8; servers export
    /// whatever their filesystem holds.
    pub fn name_bytes(&self) -> &'a [u8] {
        self.name
    }

    /// The entry name, with invalid UTF-8 replaced.
    pub fn name(&self) -> Cow<'a, str> {
        String::from_utf8_lossy(self.name)
    }
}

/// A streaming extended directory listing.
///
/// Created by [`Client::opendirx`]; borrows the client exclusively, so the
/// session cannot be used for anything else until the stream is closed or
/// dropped. Dropping the stream closes the server-side handle and logs (but
/// does not surface) a failure to do so.
pub struct DirStream<'c, T: Transport> {
    client: &'c mut Client<T>,
    handle: DirHandle,
    total_entries: u16,
    batch_count: u8,
    batch_cursor: u8,
    /// Byte offset of the next unparsed entry record in the session buffer.
    parse_offset: usize,
    reply_len: usize,
    dirstatus: u8,
    /// Directory position of the first entry of the current batch, as the
    /// server would report it via TELLDIR.
    batch_dirpos: u16,
    closed: bool,
}

impl<'c, T: Transport> DirStream<'c, T> {
    pub(crate) fn new(client: &'c mut Client<T>, handle: DirHandle, total_entries: u16) -> Self {
        Self {
            client,
            handle,
            total_entries,
            batch_count: 0,
            batch_cursor: 0,
            parse_offset: 0,
            reply_len: 0,
            dirstatus: 0,
            batch_dirpos: 0,
            closed: false,
        }
    }

    pub fn handle(&self) -> DirHandle {
        self.handle
    }

    /// Number of matching entries the server reported when the directory
    /// was opened.
    pub fn total_entries(&self) -> u16 {
        self.total_entries
    }

    /// Directory position of the first entry in the buffered batch.
    pub fn batch_position(&self) -> u16 {
        self.batch_dirpos
    }

    /// Yields the next entry, fetching a new batch from the server when the
    /// buffered one is exhausted. `Ok(None)` marks the end of the listing.
    ///
    /// The returned entry borrows the session buffer and is invalidated by
    /// the next call; copy out what you need to keep.
    pub fn next(&mut self) -> Result<Option<DirEntry<'_>>> {
        if self.batch_cursor >= self.batch_count {
            if self.dirstatus & DIRSTATUS_EOF != 0 {
                return Ok(None);
            }

            let max = self.client.config().max_results_per_batch;

            let Some(batch) = self.client.readdirx(self.handle, max)? else {
                // The server answered the fetch itself with EOF.
                self.dirstatus |= DIRSTATUS_EOF;
                self.batch_count = 0;
                self.batch_cursor = 0;

                return Ok(None);
            };

            self.batch_count = batch.count;
            self.batch_cursor = 0;
            self.dirstatus = batch.dirstatus;
            self.batch_dirpos = batch.dirpos;
            self.reply_len = batch.len;
            self.parse_offset = BATCH_HEADER_LEN;

            if batch.count == 0 {
                // An empty batch ends the stream even without the EOF flag;
                // asking again would loop forever.
                self.dirstatus |= DIRSTATUS_EOF;

                return Ok(None);
            }
        }

        let buf = &self.client.reply_buffer()[..self.reply_len];
        let mut r = FrameReader::new(buf, self.parse_offset);

        let flags = r.u8()?;
        let size = r.u32_le()?;
        let mtime = r.u32_le()?;
        let ctime = r.u32_le()?;
        let name = r.cstr()?;

        self.parse_offset = r.pos();
        self.batch_cursor += 1;

        Ok(Some(DirEntry {
            flags,
            size,
            mtime,
            ctime,
            name,
        }))
    }

    /// Position of the next entry, as reported by the server.
    pub fn tell(&mut self) -> Result<u32> {
        let handle = self.handle;

        self.client.telldir(handle)
    }

    /// Repositions the listing and discards the buffered batch.
    pub fn seek(&mut self, position: u32) -> Result<()> {
        let handle = self.handle;

        self.client.seekdir(handle, position)?;

        self.batch_count = 0;
        self.batch_cursor = 0;
        self.dirstatus = 0;

        Ok(())
    }

    /// Closes the server-side handle, surfacing any error.
    pub fn close(mut self) -> Result<()> {
        self.closed = true;
        let handle = self.handle;

        self.client.closedir(handle)
    }
}

impl<T: Transport> Drop for DirStream<'_, T> {
    fn drop(&mut self) {
        if self.closed {
            return;
        }

        if let Err(e) = self.client.closedir(self.handle) {
            tracing::warn!(
                handle = self.handle.raw(),
                "failed to close remote directory: {e}"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_options_are_zero() {
        assert_eq!(DirOptions::default().bits(), 0);
        assert_eq!(SortOptions::default().bits(), 0);
    }

    #[test]
    fn dir_option_bits_match_the_wire() {
        let options = DirOptions {
            no_folders_first: true,
            include_hidden: true,
            include_special: true,
            pattern_matches_dirs: true,
        };

        assert_eq!(options.bits(), 0x0F);

        let options = DirOptions {
            include_hidden: true,
            ..Default::default()
        };

        assert_eq!(options.bits(), 0x02);
    }

    #[test]
    fn sort_option_bits_match_the_wire() {
        let sort = SortOptions {
            key: SortKey::Unsorted,
            ..Default::default()
        };
        assert_eq!(sort.bits(), 0x01);

        let sort = SortOptions {
            key: SortKey::Modified,
            case_sensitive: true,
            descending: true,
        };
        assert_eq!(sort.bits(), 0x02 | 0x04 | 0x08);

        let sort = SortOptions {
            key: SortKey::Size,
            ..Default::default()
        };
        assert_eq!(sort.bits(), 0x10);
    }
}
