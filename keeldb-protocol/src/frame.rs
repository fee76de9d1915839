//! Binary frame format for the keeldb connection substrate.
//!
//! Frame layout (40-byte header + up to 5 payload buffers):
//!
//! ```text
//! +------+------------------+-----------------+----------------+
//! | type | 3 session flags  | shard_nodeid    | function_code  |
//! | 1 B  | 3 x 1 B          | 2 bytes         | 2 bytes        |
//! +------+------------------+-----------------+----------------+
//! | tran_index | request_id | num_buffers | buffer_sizes[5]    |
//! | 4 bytes    | 4 bytes    | 4 bytes     | 5 x 4 bytes        |
//! +------------+------------+-------------+--------------------+
//! | <buffer_sizes[0] bytes> <buffer_sizes[1] bytes> ...        |
//! +------------------------------------------------------------+
//! ```
//!
//! All multi-byte integers are transmitted in network byte order;
//! `packet_type` is a single byte.

use crate::error::ProtocolError;
use crate::MAX_BUFFER_SIZE;
use bytes::{Buf, BufMut, Bytes, BytesMut};

/// Size of the fixed frame header in bytes (1+1+1+1+2+2+4+4+4+20 = 40).
pub const HEADER_SIZE: usize = 40;

/// Maximum number of payload buffers per packet.
pub const MAX_PACKET_BUFFERS: usize = 5;

/// Packet type discriminant carried in the first header byte.
///
/// All types are structurally identical on the wire; only the caller's
/// interpretation differs. An ERROR packet always carries exactly one
/// buffer holding an opaque error blob.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum PacketType {
    Command = 1,
    Data = 2,
    Abort = 3,
    Close = 4,
    Error = 5,
}

impl TryFrom<u8> for PacketType {
    type Error = ProtocolError;

    fn try_from(value: u8) -> Result<Self, ProtocolError> {
        match value {
            1 => Ok(PacketType::Command),
            2 => Ok(PacketType::Data),
            3 => Ok(PacketType::Abort),
            4 => Ok(PacketType::Close),
            5 => Ok(PacketType::Error),
            other => Err(ProtocolError::InvalidPacketType(other)),
        }
    }
}

/// HA-routing session flags piggy-backed on every frame header.
///
/// A receiver copies these into its connection entry on every successful
/// receive; they are not separate messages.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SessionFlags {
    /// Server currently holds an open transaction for this connection.
    pub is_server_in_tran: bool,
    /// Connection should be reset to the active node on next commit.
    pub reset_on_commit: bool,
    /// Client declared the transaction read-only.
    pub is_client_ro_tran: bool,
    /// Shard node the server is pinned to (0 = unsharded).
    pub server_shard_nodeid: i16,
}

/// A parsed frame header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FrameHeader {
    /// Packet type discriminant.
    pub packet_type: PacketType,
    /// Piggy-backed HA session flags.
    pub flags: SessionFlags,
    /// Function code; connect-time packets carry a [`crate::ConnectType`] here.
    pub function_code: u16,
    /// Transaction index of the sender (-1 when none).
    pub tran_index: i32,
    /// Request id used for request/response correlation.
    pub request_id: u32,
    /// Declared payload buffer sizes, `num_buffers` of them meaningful.
    sizes: [u32; MAX_PACKET_BUFFERS],
    num_buffers: usize,
}

impl FrameHeader {
    /// Creates a header with no payload buffers and default flags.
    pub fn new(packet_type: PacketType, function_code: u16, request_id: u32) -> Self {
        Self {
            packet_type,
            flags: SessionFlags::default(),
            function_code,
            tran_index: -1,
            request_id,
            sizes: [0; MAX_PACKET_BUFFERS],
            num_buffers: 0,
        }
    }

    pub fn with_flags(mut self, flags: SessionFlags) -> Self {
        self.flags = flags;
        self
    }

    pub fn with_tran_index(mut self, tran_index: i32) -> Self {
        self.tran_index = tran_index;
        self
    }

    /// Declares the payload buffer sizes for this frame.
    pub fn with_buffer_sizes(mut self, sizes: &[u32]) -> Result<Self, ProtocolError> {
        if sizes.len() > MAX_PACKET_BUFFERS {
            return Err(ProtocolError::TooManyBuffers(sizes.len() as u32));
        }
        for &size in sizes {
            if size > MAX_BUFFER_SIZE {
                return Err(ProtocolError::BufferTooLarge {
                    size,
                    max: MAX_BUFFER_SIZE,
                });
            }
        }
        self.sizes = [0; MAX_PACKET_BUFFERS];
        self.sizes[..sizes.len()].copy_from_slice(sizes);
        self.num_buffers = sizes.len();
        Ok(self)
    }

    /// Returns the declared buffer sizes.
    pub fn buffer_sizes(&self) -> &[u32] {
        &self.sizes[..self.num_buffers]
    }

    /// Returns the number of declared payload buffers.
    pub fn num_buffers(&self) -> usize {
        self.num_buffers
    }

    /// Returns the total declared payload length in bytes.
    pub fn payload_len(&self) -> usize {
        self.buffer_sizes().iter().map(|&s| s as usize).sum()
    }

    /// Encodes the header into exactly [`HEADER_SIZE`] bytes.
    pub fn encode(&self) -> BytesMut {
        let mut buf = BytesMut::with_capacity(HEADER_SIZE);
        buf.put_u8(self.packet_type as u8);
        buf.put_u8(self.flags.is_server_in_tran as u8);
        buf.put_u8(self.flags.reset_on_commit as u8);
        buf.put_u8(self.flags.is_client_ro_tran as u8);
        buf.put_i16(self.flags.server_shard_nodeid);
        buf.put_u16(self.function_code);
        buf.put_i32(self.tran_index);
        buf.put_u32(self.request_id);
        buf.put_u32(self.num_buffers as u32);
        for &size in &self.sizes {
            buf.put_u32(size);
        }
        debug_assert_eq!(buf.len(), HEADER_SIZE);
        buf
    }

    /// Decodes a header from a buffer of at least [`HEADER_SIZE`] bytes.
    pub fn decode(src: &[u8]) -> Result<Self, ProtocolError> {
        if src.len() < HEADER_SIZE {
            return Err(ProtocolError::HeaderTooShort { got: src.len() });
        }
        let mut buf = src;

        let packet_type = PacketType::try_from(buf.get_u8())?;
        let flags = SessionFlags {
            is_server_in_tran: buf.get_u8() != 0,
            reset_on_commit: buf.get_u8() != 0,
            is_client_ro_tran: buf.get_u8() != 0,
            server_shard_nodeid: buf.get_i16(),
        };
        let function_code = buf.get_u16();
        let tran_index = buf.get_i32();
        let request_id = buf.get_u32();

        let num_buffers = buf.get_u32();
        if num_buffers as usize > MAX_PACKET_BUFFERS {
            return Err(ProtocolError::TooManyBuffers(num_buffers));
        }

        let mut sizes = [0u32; MAX_PACKET_BUFFERS];
        for slot in sizes.iter_mut() {
            *slot = buf.get_u32();
        }
        for &size in &sizes[..num_buffers as usize] {
            if size > MAX_BUFFER_SIZE {
                return Err(ProtocolError::BufferTooLarge {
                    size,
                    max: MAX_BUFFER_SIZE,
                });
            }
        }

        Ok(Self {
            packet_type,
            flags,
            function_code,
            tran_index,
            request_id,
            sizes,
            num_buffers: num_buffers as usize,
        })
    }
}

/// A frame header plus its payload buffers.
///
/// Allocated on receipt and owned by the receiver until released; buffers
/// can be handed off to the caller without copying via [`Packet::into_buffers`].
#[derive(Debug, Clone)]
pub struct Packet {
    /// Decoded frame header.
    pub header: FrameHeader,
    buffers: Vec<Bytes>,
}

impl Packet {
    /// Assembles a packet from a decoded header and its buffers.
    ///
    /// The buffer count must match the header's declaration.
    pub fn from_parts(header: FrameHeader, buffers: Vec<Bytes>) -> Result<Self, ProtocolError> {
        if buffers.len() != header.num_buffers() {
            return Err(ProtocolError::BufferCountMismatch {
                declared: header.num_buffers() as u32,
                got: buffers.len() as u32,
            });
        }
        Ok(Self { header, buffers })
    }

    /// Returns the payload buffer at `index`, if declared.
    pub fn buffer(&self, index: usize) -> Option<&Bytes> {
        self.buffers.get(index)
    }

    /// Returns all payload buffers.
    pub fn buffers(&self) -> &[Bytes] {
        &self.buffers
    }

    /// Transfers buffer ownership to the caller (zero-copy hand-off).
    pub fn into_buffers(self) -> Vec<Bytes> {
        self.buffers
    }

    /// Returns the opaque error blob of an ERROR packet.
    pub fn error_blob(&self) -> Option<&Bytes> {
        if self.header.packet_type == PacketType::Error {
            self.buffers.first()
        } else {
            None
        }
    }
}
