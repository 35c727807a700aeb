use std::fmt;
use std::io;

pub type Result<T> = std::result::Result<T, Error>;

/// Response status byte of the TNFS protocol.
///
/// Every response carries one of these at offset 4. The values mirror POSIX
/// errno names but are fixed by the protocol, not by the host platform.
/// [`Status::Eof`] is a terminal condition for directory and file reads, not
/// an error in itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Status {
    Ok,
    Eperm,
    Enoent,
    Eio,
    Enxio,
    E2big,
    Ebadf,
    Eagain,
    Enomem,
    Eacces,
    Ebusy,
    Eexist,
    Enotdir,
    Eisdir,
    Einval,
    Enfile,
    Emfile,
    Efbig,
    Enospc,
    Espipe,
    Erofs,
    Enametoolong,
    Enosys,
    Enotempty,
    Eloop,
    Enodata,
    Enostr,
    Eproto,
    Ebadfd,
    Eusers,
    Enobufs,
    Ealready,
    Estale,
    Eof,
    /// A status byte outside the range defined by the protocol.
    Unknown(u8),
}

impl Status {
    pub fn from_byte(byte: u8) -> Self {
        match byte {
            0x00 => Status::Ok,
            0x01 => Status::Eperm,
            0x02 => Status::Enoent,
            0x03 => Status::Eio,
            0x04 => Status::Enxio,
            0x05 => Status::E2big,
            0x06 => Status::Ebadf,
            0x07 => Status::Eagain,
            0x08 => Status::Enomem,
            0x09 => Status::Eacces,
            0x0A => Status::Ebusy,
            0x0B => Status::Eexist,
            0x0C => Status::Enotdir,
            0x0D => Status::Eisdir,
            0x0E => Status::Einval,
            0x0F => Status::Enfile,
            0x10 => Status::Emfile,
            0x11 => Status::Efbig,
            0x12 => Status::Enospc,
            0x13 => Status::Espipe,
            0x14 => Status::Erofs,
            0x15 => Status::Enametoolong,
            0x16 => Status::Enosys,
            0x17 => Status::Enotempty,
            0x18 => Status::Eloop,
            0x19 => Status::Enodata,
            0x1A => Status::Enostr,
            0x1B => Status::Eproto,
            0x1C => Status::Ebadfd,
            0x1D => Status::Eusers,
            0x1E => Status::Enobufs,
            0x1F => Status::Ealready,
            0x20 => Status::Estale,
            0x21 => Status::Eof,
            other => Status::Unknown(other),
        }
    }

    pub fn as_byte(self) -> u8 {
        match self {
            Status::Ok => 0x00,
            Status::Eperm => 0x01,
            Status::Enoent => 0x02,
            Status::Eio => 0x03,
            Status::Enxio => 0x04,
            Status::E2big => 0x05,
            Status::Ebadf => 0x06,
            Status::Eagain => 0x07,
            Status::Enomem => 0x08,
            Status::Eacces => 0x09,
            Status::Ebusy => 0x0A,
            Status::Eexist => 0x0B,
            Status::Enotdir => 0x0C,
            Status::Eisdir => 0x0D,
            Status::Einval => 0x0E,
            Status::Enfile => 0x0F,
            Status::Emfile => 0x10,
            Status::Efbig => 0x11,
            Status::Enospc => 0x12,
            Status::Espipe => 0x13,
            Status::Erofs => 0x14,
            Status::Enametoolong => 0x15,
            Status::Enosys => 0x16,
            Status::Enotempty => 0x17,
            Status::Eloop => 0x18,
            Status::Enodata => 0x19,
            Status::Enostr => 0x1A,
            Status::Eproto => 0x1B,
            Status::Ebadfd => 0x1C,
            Status::Eusers => 0x1D,
            Status::Enobufs => 0x1E,
            Status::Ealready => 0x1F,
            Status::Estale => 0x20,
            Status::Eof => 0x21,
            Status::Unknown(other) => other,
        }
    }

    pub fn is_ok(self) -> bool {
        self == Status::Ok
    }

    pub fn is_eof(self) -> bool {
        self == Status::Eof
    }

    /// Human-readable description of the status.
    pub fn description(self) -> &'static str {
        match self {
            Status::Ok => "Operation successful",
            Status::Eperm => "Operation not permitted",
            Status::Enoent => "No such file or directory",
            Status::Eio => "I/O error",
            Status::Enxio => "No such device or address",
            Status::E2big => "Argument list too long",
            Status::Ebadf => "Bad file number",
            Status::Eagain => "Try again",
            Status::Enomem => "Out of memory",
            Status::Eacces => "Permission denied",
            Status::Ebusy => "Device or resource busy",
            Status::Eexist => "File exists",
            Status::Enotdir => "Is not a directory",
            Status::Eisdir => "Is a directory",
            Status::Einval => "Invalid argument",
            Status::Enfile => "File table overflow",
            Status::Emfile => "Too many open files",
            Status::Efbig => "File too large",
            Status::Enospc => "No space left on device",
            Status::Espipe => "Attempt to seek on a FIFO or pipe",
            Status::Erofs => "Read only filesystem",
            Status::Enametoolong => "Filename too long",
            Status::Enosys => "Function not implemented",
            Status::Enotempty => "Directory not empty",
            Status::Eloop => "Too many symbolic links encountered",
            Status::Enodata => "No data available",
            Status::Enostr => "Out of streams resources",
            Status::Eproto => "Protocol error",
            Status::Ebadfd => "File descriptor in bad state",
            Status::Eusers => "Too many users",
            Status::Enobufs => "No buffer space available",
            Status::Ealready => "Operation already in progress",
            Status::Estale => "Stale TNFS handle",
            Status::Eof => "End of file",
            Status::Unknown(_) => "Unknown status",
        }
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Status::Unknown(byte) => write!(f, "Unknown status 0x{byte:02X}"),
            other => f.write_str(other.description()),
        }
    }
}

/// Errors surfaced by the client.
///
/// Three layers, per the protocol's failure model: transport failures are
/// fatal to the session, an exhausted retry budget is fatal to the session,
/// and server status errors are per-command. Everything else is local
/// validation that never reaches the wire.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The socket failed or the peer closed the connection.
    #[error("transport failure: {0}")]
    Transport(#[from] io::Error),

    /// The server did not produce a usable reply within the retry budget.
    #[error("server did not respond after {attempts} attempts")]
    Exhausted { attempts: u32 },

    /// The server answered with a non-zero, non-EOF status byte.
    #[error("{0}")]
    Server(Status),

    /// An EOF status on a command where end-of-file has no meaning.
    #[error("unexpected end-of-file status in reply to command 0x{opcode:02X}")]
    UnexpectedEof { opcode: u8 },

    /// The reply did not have the shape the command requires.
    #[error("malformed reply: {0}")]
    Malformed(&'static str),

    /// A composed request does not fit into the session buffer.
    #[error("request does not fit into the {capacity} byte session buffer")]
    FrameTooLarge { capacity: usize },

    /// A path exceeds the configured maximum (including the NUL terminator).
    #[error("path is longer than {max} bytes")]
    PathTooLong { max: usize },

    /// A string argument contains an interior NUL byte.
    #[error("string contains an interior NUL byte")]
    InteriorNul,

    /// A seek offset that cannot be represented in the wire's 32 bits.
    #[error("seek offset does not fit the wire format")]
    OffsetOutOfRange,

    #[error("invalid configuration: {0}")]
    InvalidConfig(&'static str),

    /// The session suffered a fatal error earlier and accepts no further
    /// commands; tear it down and connect again.
    #[error("session is unusable after a previous fatal error")]
    SessionDead,
}

impl Error {
    /// The protocol status byte equivalent of this error, if there is one.
    ///
    /// An exhausted retry budget maps to [`Status::Eproto`], the same code
    /// the engine would have seen from the server.
    pub fn status(&self) -> Option<Status> {
        match self {
            Error::Server(status) => Some(*status),
            Error::Exhausted { .. } => Some(Status::Eproto),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_defined_status_round_trips() {
        for byte in 0x00..=0x21u8 {
            let status = Status::from_byte(byte);
            assert!(!matches!(status, Status::Unknown(_)), "0x{byte:02X}");
            assert_eq!(status.as_byte(), byte);
        }
    }

    #[test]
    fn unknown_status_keeps_its_byte() {
        let status = Status::from_byte(0x7F);
        assert_eq!(status, Status::Unknown(0x7F));
        assert_eq!(status.as_byte(), 0x7F);
        assert_eq!(status.to_string(), "Unknown status 0x7F");
    }

    #[test]
    fn enoent_renders_posix_style() {
        let error = Error::Server(Status::Enoent);
        assert_eq!(error.to_string(), "No such file or directory");
    }

    #[test]
    fn exhaustion_maps_to_eproto() {
        let error = Error::Exhausted { attempts: 5 };
        assert_eq!(error.status(), Some(Status::Eproto));
        assert_eq!(Status::Eproto.as_byte(), 0x1B);
    }
}
