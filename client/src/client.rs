//! Session state and the typed command set.

use std::io::SeekFrom;
use std::time::Duration;

use tracing::Level;

use crate::config::Config;
use crate::dir::{DirHandle, DirOptions, DirStream, SortOptions};
use crate::error::{Error, Result, Status};
use crate::file::{FileHandle, FileStat, OpenFlags, RemoteFile};
use crate::transport::{NetTransport, Protocol, Recv, Transport};
use crate::wire::{FrameReader, FrameWriter, HEADER_LEN, Header, STATUS_OFFSET};

/// Protocol version announced in MOUNT, minor byte first as the wire
/// expects it.
const PROTOCOL_VERSION: [u8; 2] = [0x02, 0x01];

/// Lower bound on the retry time adopted from the server, so a pathological
/// MOUNT reply cannot drive the receive deadline to (near) zero.
const MIN_SERVER_TIMEOUT: Duration = Duration::from_millis(100);

/// Frame bytes besides the data in READ/WRITE exchanges: the header, one
/// handle byte and a u16 length.
const IO_OVERHEAD: usize = 7;

pub(crate) mod opcode {
    pub const MOUNT: u8 = 0x00;
    pub const UMOUNT: u8 = 0x01;
    pub const OPENDIR: u8 = 0x10;
    pub const READDIR: u8 = 0x11;
    pub const CLOSEDIR: u8 = 0x12;
    pub const MKDIR: u8 = 0x13;
    pub const RMDIR: u8 = 0x14;
    pub const TELLDIR: u8 = 0x15;
    pub const SEEKDIR: u8 = 0x16;
    pub const OPENDIRX: u8 = 0x17;
    pub const READDIRX: u8 = 0x18;
    pub const READ: u8 = 0x21;
    pub const WRITE: u8 = 0x22;
    pub const CLOSE: u8 = 0x23;
    pub const STAT: u8 = 0x24;
    pub const LSEEK: u8 = 0x25;
    pub const UNLINK: u8 = 0x26;
    pub const CHMOD: u8 = 0x27;
    pub const RENAME: u8 = 0x28;
    pub const OPEN: u8 = 0x29;
    pub const SIZE: u8 = 0x30;
    pub const FREE: u8 = 0x31;
}

const SEEK_SET: u8 = 0x00;
const SEEK_CUR: u8 = 0x01;
const SEEK_END: u8 = 0x02;

/// A validated reply sitting in the session buffer.
///
/// `status` is always [`Status::Ok`] or [`Status::Eof`]; anything else has
/// already been turned into an error by the engine.
#[derive(Debug, Clone, Copy)]
pub(crate) struct Reply {
    pub len: usize,
    pub status: Status,
}

/// Header and payload of one READDIRX batch; the entry records stay in the
/// session buffer.
pub(crate) struct Batch {
    pub count: u8,
    pub dirstatus: u8,
    pub dirpos: u16,
    pub len: usize,
}

/// A TNFS client session.
///
/// One session maps to one mounted filesystem on one server. All state the
/// protocol needs (the session id assigned on MOUNT, the wrapping request
/// id counter and the shared send/receive buffer) lives in this value, so
/// independent clients coexist freely. Calls on a single client are
/// serialized by `&mut self`; the protocol has no request pipelining.
///
/// A fatal error (transport failure or an exhausted retry budget) poisons
/// the session: every later command fails with [`Error::SessionDead`].
/// Recovery means dropping the client and connecting again.
pub struct Client<T = NetTransport> {
    transport: T,
    config: Config,
    /// Shared scratch region: requests are composed here and replies land
    /// here. Directory iteration parses entries straight out of it.
    buffer: Box<[u8]>,
    /// Verbatim copy of the current outbound frame, kept so retransmissions
    /// are byte-identical even after a stray reply overwrote the buffer.
    pending: Vec<u8>,
    session_id: u16,
    request_id: u8,
    dead: bool,
}

impl Client<NetTransport> {
    /// Connects with the default [`Config`].
    pub fn connect(host: &str, port: u16, protocol: Protocol) -> Result<Self> {
        Self::connect_with(host, port, protocol, Config::default())
    }

    pub fn connect_with(
        host: &str,
        port: u16,
        protocol: Protocol,
        config: Config,
    ) -> Result<Self> {
        config.validate()?;

        let transport = NetTransport::connect(host, port, protocol, config.timeout)?;

        Ok(Self::from_parts(transport, config))
    }
}

impl<T: Transport> Client<T> {
    /// Builds a client on top of an already connected transport.
    ///
    /// This is the seam the test suite uses to script exchanges without a
    /// network; `transport` must already honour `config.timeout`.
    pub fn with_transport(transport: T, config: Config) -> Result<Self> {
        config.validate()?;

        Ok(Self::from_parts(transport, config))
    }

    fn from_parts(transport: T, config: Config) -> Self {
        let buffer = vec![0u8; config.buffer_size].into_boxed_slice();

        Self {
            transport,
            buffer,
            pending: Vec::with_capacity(config.buffer_size),
            config,
            session_id: 0,
            request_id: 0,
            dead: false,
        }
    }

    /// Session id assigned by the server; zero before a successful MOUNT.
    pub fn session_id(&self) -> u16 {
        self.session_id
    }

    pub fn is_mounted(&self) -> bool {
        self.session_id != 0
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Establishes a session for the exported directory `path`.
    ///
    /// On success the server-assigned session id replaces ours, and the
    /// server's minimum retry time becomes the new receive deadline
    /// (bounded below by 100 ms).
    pub fn mount(&mut self, path: &str, user: &str, password: &str) -> Result<()> {
        self.check_path(path)?;

        let mut w = self.prepare_command(opcode::MOUNT);
        w.put_bytes(&PROTOCOL_VERSION)?;
        w.put_cstr(path)?;
        w.put_cstr(user)?;
        w.put_cstr(password)?;
        let len = w.len();

        let reply = self.send_receive(len)?;
        self.expect_ok(reply, opcode::MOUNT)?;

        let mut r = self.body(reply);
        let _server_version = r.take(2)?;
        let retry_ms = r.u16_le()?;

        self.session_id = Header::read_from(&self.buffer).session_id;

        let timeout = Duration::from_millis(u64::from(retry_ms)).max(MIN_SERVER_TIMEOUT);
        self.transport.set_timeout(timeout)?;
        self.config.timeout = timeout;

        tracing::debug!(
            session_id = self.session_id,
            retry_ms,
            "mounted {path}"
        );

        Ok(())
    }

    /// Ends the session. The session id is cleared; file and directory
    /// handles of this session are gone with it.
    pub fn umount(&mut self) -> Result<()> {
        let len = self.prepare_command(opcode::UMOUNT).len();

        let reply = self.send_receive(len)?;
        self.expect_ok(reply, opcode::UMOUNT)?;

        self.session_id = 0;

        Ok(())
    }

    /// Opens a file and returns the raw server handle.
    ///
    /// Prefer [`Client::open_file`] unless you are managing handle
    /// lifetimes yourself: the raw handle is not released on drop.
    pub fn open(&mut self, path: &str, flags: OpenFlags, mode: u16) -> Result<FileHandle> {
        self.check_path(path)?;

        let mut w = self.prepare_command(opcode::OPEN);
        w.put_u16_le(flags.bits())?;
        w.put_u16_le(mode)?;
        w.put_cstr(path)?;
        let len = w.len();

        let reply = self.send_receive(len)?;
        self.expect_ok(reply, opcode::OPEN)?;

        let handle = self.body(reply).u8()?;

        Ok(FileHandle(handle))
    }

    /// Opens a file as a scoped handle that is closed on drop.
    pub fn open_file(
        &mut self,
        path: &str,
        flags: OpenFlags,
        mode: u16,
    ) -> Result<RemoteFile<'_, T>> {
        let handle = self.open(path, flags, mode)?;

        Ok(RemoteFile::new(self, handle))
    }

    /// Reads at most `buf.len()` bytes at the current file position.
    ///
    /// Returns the number of bytes read; `Ok(0)` means end of file. One
    /// call is one protocol exchange, so a single read never returns more
    /// than fits into the session buffer.
    pub fn read(&mut self, handle: FileHandle, buf: &mut [u8]) -> Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }

        let chunk = buf.len().min(self.max_io_len()) as u16;

        let mut w = self.prepare_command(opcode::READ);
        w.put_u8(handle.0)?;
        w.put_u16_le(chunk)?;
        let len = w.len();

        let reply = self.send_receive(len)?;

        if reply.status.is_eof() {
            return Ok(0);
        }

        let mut r = self.body(reply);
        let actual = usize::from(r.u16_le()?);

        if actual > usize::from(chunk) {
            return Err(Error::Malformed("reply carries more data than requested"));
        }

        let data = r.take(actual)?;
        buf[..actual].copy_from_slice(data);

        Ok(actual)
    }

    /// Writes a prefix of `data` at the current file position and returns
    /// how many bytes the server accepted. Like [`Client::read`], one call
    /// is one exchange; loop (or use [`RemoteFile::write_all`]) for more.
    pub fn write(&mut self, handle: FileHandle, data: &[u8]) -> Result<usize> {
        let chunk = data.len().min(self.max_io_len());

        let mut w = self.prepare_command(opcode::WRITE);
        w.put_u8(handle.0)?;
        w.put_u16_le(chunk as u16)?;
        w.put_bytes(&data[..chunk])?;
        let len = w.len();

        let reply = self.send_receive(len)?;
        self.expect_ok(reply, opcode::WRITE)?;

        let written = usize::from(self.body(reply).u16_le()?);

        Ok(written)
    }

    /// Releases an open file handle on the server.
    pub fn close(&mut self, handle: FileHandle) -> Result<()> {
        self.handle_command(opcode::CLOSE, handle.0)
    }

    /// Moves the file position of `handle`.
    ///
    /// The wire offset is 32 bits; relative offsets are encoded two's
    /// complement, absolute ones must fit `u32`.
    pub fn seek(&mut self, handle: FileHandle, pos: SeekFrom) -> Result<()> {
        let (whence, offset) = match pos {
            SeekFrom::Start(n) => {
                let n = u32::try_from(n).map_err(|_| Error::OffsetOutOfRange)?;
                (SEEK_SET, n)
            }
            SeekFrom::Current(n) => {
                let n = i32::try_from(n).map_err(|_| Error::OffsetOutOfRange)?;
                (SEEK_CUR, n as u32)
            }
            SeekFrom::End(n) => {
                let n = i32::try_from(n).map_err(|_| Error::OffsetOutOfRange)?;
                (SEEK_END, n as u32)
            }
        };

        let mut w = self.prepare_command(opcode::LSEEK);
        w.put_u8(handle.0)?;
        w.put_u8(whence)?;
        w.put_u32_le(offset)?;
        let len = w.len();

        let reply = self.send_receive(len)?;
        self.expect_ok(reply, opcode::LSEEK)
    }

    /// Fetches metadata for the file or directory at `path`.
    pub fn stat(&mut self, path: &str) -> Result<FileStat> {
        let reply = self.path_command(opcode::STAT, path)?;
        self.expect_ok(reply, opcode::STAT)?;

        let mut r = self.body(reply);
        let mode = r.u16_le()?;
        let uid = r.u16_le()?;
        let gid = r.u16_le()?;
        let size = r.u32_le()?;
        let atime = r.u32_le()?;
        let mtime = r.u32_le()?;
        let ctime = r.u32_le()?;
        let uid_name = r.cstr()?;
        let gid_name = r.cstr()?;

        Ok(FileStat {
            mode,
            uid,
            gid,
            size,
            atime,
            mtime,
            ctime,
            uid_name: String::from_utf8_lossy(uid_name).into_owned(),
            gid_name: String::from_utf8_lossy(gid_name).into_owned(),
        })
    }

    /// Deletes the file at `path`.
    pub fn unlink(&mut self, path: &str) -> Result<()> {
        let reply = self.path_command(opcode::UNLINK, path)?;
        self.expect_ok(reply, opcode::UNLINK)
    }

    /// Changes the permission bits of `path`.
    pub fn chmod(&mut self, path: &str, mode: u16) -> Result<()> {
        self.check_path(path)?;

        let mut w = self.prepare_command(opcode::CHMOD);
        w.put_u16_le(mode)?;
        w.put_cstr(path)?;
        let len = w.len();

        let reply = self.send_receive(len)?;
        self.expect_ok(reply, opcode::CHMOD)
    }

    /// Renames (or moves) `source` to `destination` within the mounted
    /// filesystem.
    pub fn rename(&mut self, source: &str, destination: &str) -> Result<()> {
        self.check_path(source)?;
        self.check_path(destination)?;

        let mut w = self.prepare_command(opcode::RENAME);
        w.put_cstr(source)?;
        w.put_cstr(destination)?;
        let len = w.len();

        let reply = self.send_receive(len)?;
        self.expect_ok(reply, opcode::RENAME)
    }

    /// Creates a directory.
    pub fn mkdir(&mut self, path: &str) -> Result<()> {
        let reply = self.path_command(opcode::MKDIR, path)?;
        self.expect_ok(reply, opcode::MKDIR)
    }

    /// Removes an empty directory.
    pub fn rmdir(&mut self, path: &str) -> Result<()> {
        let reply = self.path_command(opcode::RMDIR, path)?;
        self.expect_ok(reply, opcode::RMDIR)
    }

    /// Opens a directory with the plain, option-less listing command.
    ///
    /// The resulting listing is unsorted and includes hidden and special
    /// entries; [`Client::opendirx`] is the richer variant.
    pub fn opendir(&mut self, path: &str) -> Result<DirHandle> {
        let reply = self.path_command(opcode::OPENDIR, path)?;
        self.expect_ok(reply, opcode::OPENDIR)?;

        let handle = self.body(reply).u8()?;

        Ok(DirHandle(handle))
    }

    /// Reads the next name from a plain directory listing; `Ok(None)` at
    /// the end.
    pub fn readdir(&mut self, handle: DirHandle) -> Result<Option<String>> {
        let mut w = self.prepare_command(opcode::READDIR);
        w.put_u8(handle.0)?;
        let len = w.len();

        let reply = self.send_receive(len)?;

        if reply.status.is_eof() {
            return Ok(None);
        }

        let name = self.body(reply).cstr()?;

        Ok(Some(String::from_utf8_lossy(name).into_owned()))
    }

    /// Releases a directory handle on the server.
    pub fn closedir(&mut self, handle: DirHandle) -> Result<()> {
        self.handle_command(opcode::CLOSEDIR, handle.0)
    }

    /// Reports the position of the next entry within the directory results.
    pub fn telldir(&mut self, handle: DirHandle) -> Result<u32> {
        let mut w = self.prepare_command(opcode::TELLDIR);
        w.put_u8(handle.0)?;
        let len = w.len();

        let reply = self.send_receive(len)?;
        self.expect_ok(reply, opcode::TELLDIR)?;

        self.body(reply).u32_le()
    }

    /// Moves the directory results to a position previously reported by
    /// [`Client::telldir`] (or an entry index for extended listings).
    pub fn seekdir(&mut self, handle: DirHandle, position: u32) -> Result<()> {
        let mut w = self.prepare_command(opcode::SEEKDIR);
        w.put_u8(handle.0)?;
        w.put_u32_le(position)?;
        let len = w.len();

        let reply = self.send_receive(len)?;
        self.expect_ok(reply, opcode::SEEKDIR)
    }

    /// Opens a directory for extended, streaming enumeration.
    ///
    /// `pattern` filters entries by glob match (empty matches everything);
    /// `options` and `sort` control filtering and ordering server-side. The
    /// returned stream borrows this client exclusively until it is closed
    /// or dropped.
    pub fn opendirx(
        &mut self,
        path: &str,
        pattern: &str,
        options: DirOptions,
        sort: SortOptions,
    ) -> Result<DirStream<'_, T>> {
        self.check_path(path)?;

        let mut w = self.prepare_command(opcode::OPENDIRX);
        w.put_u8(options.bits())?;
        w.put_u8(sort.bits())?;
        // Zero asks the server to report the full match count.
        w.put_u16_le(0)?;
        w.put_cstr(pattern)?;
        w.put_cstr(path)?;
        let len = w.len();

        let reply = self.send_receive(len)?;
        self.expect_ok(reply, opcode::OPENDIRX)?;

        let mut r = self.body(reply);
        let handle = r.u8()?;
        let total_entries = r.u16_le()?;

        Ok(DirStream::new(self, DirHandle(handle), total_entries))
    }

    /// Requests the next batch of extended directory entries.
    ///
    /// `None` means the server answered the request itself with EOF: there
    /// is nothing left to read. Entry records stay in the session buffer at
    /// offset 9 and stay valid until the next command.
    pub(crate) fn readdirx(&mut self, handle: DirHandle, max: u8) -> Result<Option<Batch>> {
        let mut w = self.prepare_command(opcode::READDIRX);
        w.put_u8(handle.0)?;
        w.put_u8(max)?;
        let len = w.len();

        let reply = self.send_receive(len)?;

        if reply.status.is_eof() {
            return Ok(None);
        }

        let mut r = self.body(reply);
        let count = r.u8()?;
        let dirstatus = r.u8()?;
        let dirpos = r.u16_le()?;

        Ok(Some(Batch {
            count,
            dirstatus,
            dirpos,
            len: reply.len,
        }))
    }

    /// Total size of the mounted filesystem in kilobytes.
    pub fn size_kb(&mut self) -> Result<u32> {
        self.volume_command(opcode::SIZE)
    }

    /// Free space on the mounted filesystem in kilobytes.
    pub fn free_kb(&mut self) -> Result<u32> {
        self.volume_command(opcode::FREE)
    }

    pub(crate) fn reply_buffer(&self) -> &[u8] {
        &self.buffer
    }

    /// Largest data chunk a single READ or WRITE exchange can carry.
    pub(crate) fn max_io_len(&self) -> usize {
        (self.config.buffer_size - IO_OVERHEAD).min(usize::from(u16::MAX))
    }

    fn volume_command(&mut self, opcode: u8) -> Result<u32> {
        let len = self.prepare_command(opcode).len();

        let reply = self.send_receive(len)?;
        self.expect_ok(reply, opcode)?;

        self.body(reply).u32_le()
    }

    /// Composes and sends a command whose payload is a single path.
    fn path_command(&mut self, opcode: u8, path: &str) -> Result<Reply> {
        self.check_path(path)?;

        let mut w = self.prepare_command(opcode);
        w.put_cstr(path)?;
        let len = w.len();

        self.send_receive(len)
    }

    /// Composes and sends a command whose payload is a single handle byte.
    fn handle_command(&mut self, opcode: u8, handle: u8) -> Result<()> {
        let mut w = self.prepare_command(opcode);
        w.put_u8(handle)?;
        let len = w.len();

        let reply = self.send_receive(len)?;
        self.expect_ok(reply, opcode)
    }

    fn check_path(&self, path: &str) -> Result<()> {
        if path.len() + 1 > self.config.max_path_len {
            return Err(Error::PathTooLong {
                max: self.config.max_path_len,
            });
        }

        Ok(())
    }

    /// Zero-fills the buffer, writes the header and advances the request id.
    ///
    /// The request id moves at prepare time and never on retransmission, so
    /// the server can recognise a retried request as a duplicate.
    fn prepare_command(&mut self, opcode: u8) -> FrameWriter<'_> {
        self.buffer.fill(0);

        let header = Header {
            session_id: self.session_id,
            request_id: self.request_id,
            opcode,
        };
        header.write_to(&mut self.buffer);

        self.request_id = self.request_id.wrapping_add(1);

        FrameWriter::new(&mut self.buffer, HEADER_LEN)
    }

    /// The send-then-wait engine.
    ///
    /// Sends the prepared frame and waits for a matching reply, up to
    /// `max_retries` attempts in total. Retransmissions are byte-identical.
    /// A transport failure or an exhausted budget poisons the session.
    fn send_receive(&mut self, length: usize) -> Result<Reply> {
        if self.dead {
            return Err(Error::SessionDead);
        }

        let expected = Header::read_from(&self.buffer);

        let result = self.exchange(length, expected);

        if matches!(result, Err(Error::Transport(_)) | Err(Error::Exhausted { .. })) {
            self.dead = true;
        }

        result
    }

    fn exchange(&mut self, length: usize, expected: Header) -> Result<Reply> {
        self.pending.clear();
        self.pending.extend_from_slice(&self.buffer[..length]);

        for attempt in 1..=self.config.max_retries {
            self.transport.send(&self.pending)?;

            if tracing::enabled!(target: "wire", Level::TRACE) {
                tracing::trace!(target: "wire", "sent {}", hex::encode(&self.pending));
            }

            let received = match self.transport.recv(&mut self.buffer)? {
                Recv::Data(received) => received,
                Recv::Timeout => {
                    tracing::debug!(
                        opcode = expected.opcode,
                        attempt,
                        "no reply within deadline, retransmitting"
                    );
                    continue;
                }
            };

            if tracing::enabled!(target: "wire", Level::TRACE) {
                tracing::trace!(target: "wire", "recv {}", hex::encode(&self.buffer[..received]));
            }

            if received <= STATUS_OFFSET {
                tracing::debug!(received, "reply too short for a header, treating as timeout");
                continue;
            }

            let header = Header::read_from(&self.buffer);

            // The server echoes our header. A reply that does not match is
            // a stray (a late retransmission answer, or traffic for another
            // session) and is treated like a timeout. MOUNT is the
            // exception: its reply carries the newly assigned session id.
            let session_matches =
                expected.opcode == opcode::MOUNT || header.session_id == expected.session_id;

            if !session_matches
                || header.request_id != expected.request_id
                || header.opcode != expected.opcode
            {
                tracing::debug!(
                    expected_request_id = expected.request_id,
                    received_request_id = header.request_id,
                    "mismatched reply header, treating as timeout"
                );
                continue;
            }

            let status = Status::from_byte(self.buffer[STATUS_OFFSET]);

            if !status.is_ok() && !status.is_eof() {
                return Err(Error::Server(status));
            }

            return Ok(Reply {
                len: received,
                status,
            });
        }

        Err(Error::Exhausted {
            attempts: self.config.max_retries,
        })
    }

    fn body(&self, reply: Reply) -> FrameReader<'_> {
        FrameReader::new(&self.buffer[..reply.len], STATUS_OFFSET + 1)
    }

    /// EOF is only meaningful on directory and file reads; anywhere else it
    /// is a protocol violation.
    fn expect_ok(&self, reply: Reply, opcode: u8) -> Result<()> {
        if reply.status.is_eof() {
            return Err(Error::UnexpectedEof { opcode });
        }

        Ok(())
    }
}
