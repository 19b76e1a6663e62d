//! Gearman binary protocol framing
//!
//! Every packet is a 12-byte header followed by `size` bytes of data:
//!
//! ```text
//! +--------+----------+----------+-------------------------+
//! | magic  | type u32 | size u32 | args joined by '\0'     |
//! | \0REQ  |   (BE)   |   (BE)   |                         |
//! | \0RES  |          |          |                         |
//! +--------+----------+----------+-------------------------+
//! ```
//!
//! Only the packets a background-job producer needs are modelled.

use bytes::{BufMut, Bytes, BytesMut};
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

pub const REQ_MAGIC: [u8; 4] = *b"\0REQ";
pub const RES_MAGIC: [u8; 4] = *b"\0RES";
pub const HEADER_LEN: usize = 12;

/// Upper bound on packet data accepted from the wire
pub const MAX_DATA_LEN: u32 = 16 * 1024 * 1024;

/// Framing / decoding failure
#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("bad packet magic {0:?}")]
    BadMagic([u8; 4]),

    #[error("packet data too large: {0} bytes")]
    Oversized(u64),

    /// Argument that cannot be encoded (embedded NUL, empty function name)
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
}

/// Packet types used by this client
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PacketType {
    JobCreated,
    EchoReq,
    EchoRes,
    SubmitJobBg,
    Error,
}

impl PacketType {
    pub fn code(self) -> u32 {
        match self {
            Self::JobCreated => 8,
            Self::EchoReq => 16,
            Self::EchoRes => 17,
            Self::SubmitJobBg => 18,
            Self::Error => 19,
        }
    }

    pub fn from_code(code: u32) -> Option<Self> {
        match code {
            8 => Some(Self::JobCreated),
            16 => Some(Self::EchoReq),
            17 => Some(Self::EchoRes),
            18 => Some(Self::SubmitJobBg),
            19 => Some(Self::Error),
            _ => None,
        }
    }
}

/// Packet direction
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Magic {
    Request,
    Response,
}

impl Magic {
    fn bytes(self) -> [u8; 4] {
        match self {
            Self::Request => REQ_MAGIC,
            Self::Response => RES_MAGIC,
        }
    }

    fn from_bytes(bytes: [u8; 4]) -> Result<Self, ProtocolError> {
        match bytes {
            REQ_MAGIC => Ok(Self::Request),
            RES_MAGIC => Ok(Self::Response),
            other => Err(ProtocolError::BadMagic(other)),
        }
    }
}

/// A decoded packet. `code` is kept raw so unknown types survive decoding.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Packet {
    pub magic: Magic,
    pub code: u32,
    pub data: Bytes,
}

impl Packet {
    pub fn new(magic: Magic, kind: PacketType, args: &[&[u8]]) -> Self {
        let len = args.iter().map(|a| a.len()).sum::<usize>() + args.len().saturating_sub(1);
        let mut data = BytesMut::with_capacity(len);
        for (idx, arg) in args.iter().enumerate() {
            if idx > 0 {
                data.put_u8(0);
            }
            data.put_slice(arg);
        }
        Self {
            magic,
            code: kind.code(),
            data: data.freeze(),
        }
    }

    pub fn request(kind: PacketType, args: &[&[u8]]) -> Self {
        Self::new(Magic::Request, kind, args)
    }

    pub fn response(kind: PacketType, args: &[&[u8]]) -> Self {
        Self::new(Magic::Response, kind, args)
    }

    pub fn kind(&self) -> Option<PacketType> {
        PacketType::from_code(self.code)
    }

    /// Split data into at most `n` NUL-separated arguments.
    /// The last argument keeps any remaining NULs (it is the opaque payload).
    pub fn args(&self, n: usize) -> Vec<&[u8]> {
        if n == 0 {
            return Vec::new();
        }
        self.data.splitn(n, |b| *b == 0).collect()
    }

    pub fn encode(&self) -> Result<Bytes, ProtocolError> {
        let size = u32::try_from(self.data.len())
            .map_err(|_| ProtocolError::Oversized(self.data.len() as u64))?;
        let mut buf = BytesMut::with_capacity(HEADER_LEN + self.data.len());
        buf.put_slice(&self.magic.bytes());
        buf.put_u32(self.code);
        buf.put_u32(size);
        buf.put_slice(&self.data);
        Ok(buf.freeze())
    }
}

/// Build a `SUBMIT_JOB_BG` request.
///
/// An empty `unique` lets the job server assign its own id.
pub fn submit_job_bg(function: &str, unique: &str, payload: &[u8]) -> Result<Packet, ProtocolError> {
    if function.is_empty() {
        return Err(ProtocolError::InvalidArgument(
            "function name cannot be empty".into(),
        ));
    }
    if function.contains('\0') || unique.contains('\0') {
        return Err(ProtocolError::InvalidArgument(
            "function name and unique id cannot contain NUL".into(),
        ));
    }
    if payload.len() as u64 > u64::from(MAX_DATA_LEN) {
        return Err(ProtocolError::Oversized(payload.len() as u64));
    }
    Ok(Packet::request(
        PacketType::SubmitJobBg,
        &[function.as_bytes(), unique.as_bytes(), payload],
    ))
}

/// Read one packet
pub async fn read_packet<R>(reader: &mut R) -> Result<Packet, ProtocolError>
where
    R: AsyncRead + Unpin,
{
    let mut header = [0u8; HEADER_LEN];
    reader.read_exact(&mut header).await?;

    let magic = Magic::from_bytes([header[0], header[1], header[2], header[3]])?;
    let code = u32::from_be_bytes([header[4], header[5], header[6], header[7]]);
    let size = u32::from_be_bytes([header[8], header[9], header[10], header[11]]);
    if size > MAX_DATA_LEN {
        return Err(ProtocolError::Oversized(u64::from(size)));
    }

    let mut data = vec![0u8; size as usize];
    reader.read_exact(&mut data).await?;

    Ok(Packet {
        magic,
        code,
        data: Bytes::from(data),
    })
}

/// Write one packet and flush
pub async fn write_packet<W>(writer: &mut W, packet: &Packet) -> Result<(), ProtocolError>
where
    W: AsyncWrite + Unpin,
{
    let frame = packet.encode()?;
    writer.write_all(&frame).await?;
    writer.flush().await?;
    Ok(())
}
