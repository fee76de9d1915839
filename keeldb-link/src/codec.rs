//! Packet send/receive over a connection entry.
//!
//! Sends issue one vectored write for the header plus up to 5 payload
//! buffers and resume from the exact byte offset on partial progress.
//! Receives read the fixed header first, then each declared buffer,
//! slicing long waits so the liveness checker can run between slices.

use crate::entry::{ConnStatus, ConnectionEntry};
use crate::error::LinkError;
use crate::liveness;
use bytes::BytesMut;
use keeldb_protocol::{FrameHeader, Packet, PacketType, HEADER_SIZE};
use std::io::{self, IoSlice};
use std::time::{Duration, Instant};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// How long a blocking receive waits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Timeout {
    /// Wait indefinitely.
    Infinite,
    /// Poll once; fail with `Timeout` when no data is immediately available.
    NoWait,
    /// Wait at most this long.
    Bounded(Duration),
}

impl Timeout {
    /// Maps the wire convention: a negative count waits forever, zero
    /// polls once.
    pub fn from_millis(ms: i64) -> Self {
        match ms {
            m if m < 0 => Timeout::Infinite,
            0 => Timeout::NoWait,
            m => Timeout::Bounded(Duration::from_millis(m as u64)),
        }
    }
}

/// Deadline carried across the poll slices of one receive call.
#[derive(Debug, Clone, Copy)]
enum Deadline {
    Infinite,
    NoWait,
    At(Instant),
}

impl Deadline {
    fn new(timeout: Timeout) -> Self {
        match timeout {
            Timeout::Infinite => Deadline::Infinite,
            Timeout::NoWait => Deadline::NoWait,
            Timeout::Bounded(d) => Deadline::At(Instant::now() + d),
        }
    }
}

/// Builds the I/O slices still to be flushed, skipping `skip` bytes of
/// already-written prefix across the segment list.
fn remaining_slices<'a>(segments: &[&'a [u8]], mut skip: usize, out: &mut Vec<IoSlice<'a>>) {
    out.clear();
    for seg in segments {
        if skip >= seg.len() {
            skip -= seg.len();
            continue;
        }
        out.push(IoSlice::new(&seg[skip..]));
        skip = 0;
    }
}

impl<S> ConnectionEntry<S>
where
    S: AsyncWrite + Unpin,
{
    /// Sends one packet: header plus up to 5 payload buffers as a single
    /// vectored write, resumed until every byte is flushed.
    ///
    /// Any write error (including broken pipe) transitions the entry to
    /// CLOSED and surfaces as [`LinkError::WriteFailed`].
    pub async fn send(
        &mut self,
        packet_type: PacketType,
        function_code: u16,
        request_id: u32,
        buffers: &[&[u8]],
    ) -> Result<(), LinkError> {
        if self.status == ConnStatus::Closed {
            return Err(LinkError::ConnectionClosed);
        }

        let sizes: Vec<u32> = buffers.iter().map(|b| b.len() as u32).collect();
        let header = FrameHeader::new(packet_type, function_code, request_id)
            .with_tran_index(self.tran_index())
            .with_flags(self.flags)
            .with_buffer_sizes(&sizes)?;
        let header_bytes = header.encode();

        let mut segments: Vec<&[u8]> = Vec::with_capacity(1 + buffers.len());
        segments.push(&header_bytes);
        segments.extend_from_slice(buffers);

        let total: usize = segments.iter().map(|s| s.len()).sum();
        let mut written = 0usize;
        let mut slices = Vec::with_capacity(segments.len());

        while written < total {
            remaining_slices(&segments, written, &mut slices);
            match self.stream.write_vectored(&slices).await {
                Ok(0) => {
                    self.status = ConnStatus::Closed;
                    return Err(LinkError::WriteFailed("wrote zero bytes".to_string()));
                }
                Ok(n) => {
                    written += n;
                    if written < total {
                        tracing::trace!("partial write: {}/{} bytes flushed", written, total);
                    }
                }
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => {
                    self.status = ConnStatus::Closed;
                    return Err(LinkError::WriteFailed(e.to_string()));
                }
            }
        }

        if let Err(e) = self.stream.flush().await {
            self.status = ConnStatus::Closed;
            return Err(LinkError::WriteFailed(e.to_string()));
        }
        Ok(())
    }
}

impl<S> ConnectionEntry<S>
where
    S: AsyncRead + Unpin,
{
    /// Receives one packet, allocating a fresh buffer per declared payload.
    pub async fn receive(&mut self, timeout: Timeout) -> Result<Packet, LinkError> {
        let mut buffers = Vec::new();
        let header = self.receive_into(timeout, &mut buffers).await?;
        let buffers = buffers.into_iter().map(BytesMut::freeze).collect();
        Ok(Packet::from_parts(header, buffers)?)
    }

    /// Receives one packet into caller-supplied destinations.
    ///
    /// A destination with sufficient capacity is reused in place; too-small
    /// or missing destinations are replaced with fresh buffers. On success
    /// `dests` holds exactly the declared buffers and the entry's session
    /// flags are updated from the header.
    pub async fn receive_into(
        &mut self,
        timeout: Timeout,
        dests: &mut Vec<BytesMut>,
    ) -> Result<FrameHeader, LinkError> {
        if self.status == ConnStatus::Closed {
            return Err(LinkError::ConnectionClosed);
        }
        let mut deadline = Deadline::new(timeout);

        let mut header_buf = [0u8; HEADER_SIZE];
        self.read_full(&mut header_buf, &mut deadline, "frame header", true)
            .await?;
        let header = FrameHeader::decode(&header_buf)?;

        for i in 0..header.num_buffers() {
            let size = header.buffer_sizes()[i] as usize;
            let mut buf = if i < dests.len() && dests[i].capacity() >= size {
                let mut reused = std::mem::take(&mut dests[i]);
                reused.clear();
                reused
            } else {
                BytesMut::with_capacity(size)
            };
            buf.resize(size, 0);
            self.read_full(&mut buf, &mut deadline, "payload buffer", false)
                .await?;
            if i < dests.len() {
                dests[i] = buf;
            } else {
                dests.push(buf);
            }
        }
        dests.truncate(header.num_buffers());

        // Session flags piggy-back on every header.
        self.flags = header.flags;
        Ok(header)
    }

    /// Receives the reply correlated to `request_id`, discarding any stray
    /// packet whose id does not match and continuing to wait within the
    /// same deadline. An ABORT frame fails with [`LinkError::PeerAborted`].
    pub async fn receive_reply(
        &mut self,
        request_id: u32,
        timeout: Timeout,
    ) -> Result<Packet, LinkError> {
        let deadline = Deadline::new(timeout);
        loop {
            let per_call = match deadline {
                Deadline::Infinite => Timeout::Infinite,
                Deadline::NoWait => Timeout::NoWait,
                Deadline::At(at) => {
                    let now = Instant::now();
                    if now >= at {
                        return Err(LinkError::Timeout);
                    }
                    Timeout::Bounded(at - now)
                }
            };
            let packet = self.receive(per_call).await?;
            if packet.header.packet_type == PacketType::Abort {
                return Err(LinkError::PeerAborted);
            }
            if packet.header.request_id != request_id {
                tracing::debug!(
                    "discarding stray packet: request_id {} while awaiting {}",
                    packet.header.request_id,
                    request_id
                );
                continue;
            }
            return Ok(packet);
        }
    }

    /// Reads exactly `buf.len()` bytes, resuming on partial reads and
    /// slicing the wait so the peer probe can run between slices.
    ///
    /// `at_boundary` marks a read that starts on a frame boundary, where a
    /// clean EOF is an orderly close rather than a truncated frame.
    async fn read_full(
        &mut self,
        buf: &mut [u8],
        deadline: &mut Deadline,
        what: &'static str,
        at_boundary: bool,
    ) -> Result<(), LinkError> {
        let mut filled = 0;
        while filled < buf.len() {
            let slice = match *deadline {
                Deadline::Infinite => self.config.poll_slice(),
                Deadline::NoWait => Duration::ZERO,
                Deadline::At(at) => {
                    let now = Instant::now();
                    if now >= at {
                        return Err(LinkError::Timeout);
                    }
                    (at - now).min(self.config.poll_slice())
                }
            };

            match tokio::time::timeout(slice, self.stream.read(&mut buf[filled..])).await {
                Err(_elapsed) => {
                    match *deadline {
                        Deadline::NoWait => return Err(LinkError::Timeout),
                        Deadline::At(at) if Instant::now() >= at => {
                            return Err(LinkError::Timeout)
                        }
                        _ => {}
                    }
                    // A slice elapsed with budget left; ask the liveness
                    // checker whether the peer's host is still there.
                    if self.config.alive_check.enabled_for(self.kind) && !self.probe_peer().await
                    {
                        return Err(LinkError::PeerDead);
                    }
                }
                Ok(Ok(0)) => {
                    self.status = ConnStatus::Closed;
                    return Err(if at_boundary && filled == 0 {
                        LinkError::ConnectionClosed
                    } else {
                        LinkError::ReadFailed(format!(
                            "{what} truncated: got {filled} of {} bytes",
                            buf.len()
                        ))
                    });
                }
                Ok(Ok(n)) => {
                    filled += n;
                    // Once data starts arriving the rest of the frame is
                    // stream-ordered; a poll-once receive finishes it.
                    if matches!(*deadline, Deadline::NoWait) {
                        *deadline = Deadline::Infinite;
                    }
                }
                Ok(Err(e)) if e.kind() == io::ErrorKind::Interrupted => continue,
                Ok(Err(e)) => {
                    self.status = ConnStatus::Closed;
                    return Err(LinkError::ReadFailed(e.to_string()));
                }
            }
        }
        Ok(())
    }

    async fn probe_peer(&self) -> bool {
        #[cfg(test)]
        if let Some(alive) = self.probe_override {
            return alive;
        }
        liveness::peer_alive(&self.peer, self.config.alive_probe_timeout()).await
    }
}
