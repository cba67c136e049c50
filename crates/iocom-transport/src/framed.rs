//! Frame-at-a-time reading and writing over any byte stream.
//!
//! Frames are variable length (up to [`Transport::frame_sz`]), so a stream
//! reader cannot know how many bytes to pull off the wire until it has
//! parsed enough of the header. [`FrameReader`] retries
//! [`header::parse_header`] against a growing buffer, topping it up with
//! more bytes whenever parsing reports the buffer is too short, and treats
//! any other parse error as fatal for the link.

use bytes::BytesMut;
use iocom_proto::header::{self, Header, Transport};
use iocom_proto::ProtocolError;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::error::TransportError;

/// One frame pulled off the wire: a data/system frame, or a bare ack.
#[derive(Debug)]
pub enum ReceivedFrame {
    /// A data or system frame, header already parsed.
    Data {
        /// Parsed header.
        header: Header,
        /// Payload bytes, split out of the read buffer (no copy).
        payload: BytesMut,
    },
    /// An acknowledgement of `bytes_received` bytes.
    Ack {
        /// Bytes received, as reported by the peer.
        bytes_received: u16,
    },
}

/// Accumulates bytes from an `AsyncRead` stream and yields whole frames.
pub struct FrameReader {
    transport: Transport,
    buf: BytesMut,
    chunk: Vec<u8>,
}

impl FrameReader {
    /// Creates a reader for `transport`, sized to read at most one
    /// max-size frame per underlying `read` call.
    #[must_use]
    pub fn new(transport: Transport) -> Self {
        Self { transport, buf: BytesMut::new(), chunk: vec![0u8; transport.frame_sz()] }
    }

    /// Reads and returns the next frame, pulling more bytes from `reader`
    /// as needed.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::Closed`] if `reader` hits EOF mid-frame,
    /// [`TransportError::Io`] on a read failure, or
    /// [`TransportError::Protocol`] if the buffered bytes are not a valid
    /// frame (CRC mismatch, corrupt header).
    pub async fn read_frame<R: AsyncRead + Unpin>(
        &mut self,
        reader: &mut R,
    ) -> Result<ReceivedFrame, TransportError> {
        loop {
            if let Some(frame) = self.try_take_frame()? {
                return Ok(frame);
            }
            let n = reader.read(&mut self.chunk).await?;
            if n == 0 {
                return Err(TransportError::Closed);
            }
            self.buf.extend_from_slice(&self.chunk[..n]);
        }
    }

    fn try_take_frame(&mut self) -> Result<Option<ReceivedFrame>, TransportError> {
        let Some(&first) = self.buf.first() else { return Ok(None) };

        if first == header::ACK_SENTINEL {
            let ack_sz = match self.transport {
                Transport::Serial => header::SERIAL_ACK_SZ,
                Transport::Socket => header::SOCKET_ACK_SZ,
            };
            if self.buf.len() < ack_sz {
                return Ok(None);
            }
            let frame = self.buf.split_to(ack_sz);
            let bytes_received = header::parse_ack(&frame)
                .ok_or(ProtocolError::MalformedSystemFrame("invalid ack frame"))?;
            return Ok(Some(ReceivedFrame::Ack { bytes_received }));
        }

        match header::parse_header(self.transport, &self.buf) {
            Ok((parsed, offset)) => {
                let total = offset + usize::from(parsed.payload_size);
                let mut frame = self.buf.split_to(total);
                let payload = frame.split_off(offset);
                Ok(Some(ReceivedFrame::Data { header: parsed, payload }))
            }
            Err(ProtocolError::HeaderTooShort { .. } | ProtocolError::FrameTruncated { .. }) => {
                Ok(None)
            }
            Err(e) => Err(e.into()),
        }
    }
}

/// Builds and writes a single frame to `writer`.
///
/// # Errors
///
/// Returns [`TransportError::Protocol`] if the frame would not fit, or
/// [`TransportError::Io`] if the write fails.
pub async fn write_frame<W: AsyncWrite + Unpin>(
    writer: &mut W,
    transport: Transport,
    header: Header,
    payload: &[u8],
) -> Result<(), TransportError> {
    let mut buf = vec![0u8; transport.frame_sz()];
    let n = header::build_frame(transport, header, payload, &mut buf)?;
    writer.write_all(&buf[..n]).await?;
    Ok(())
}

/// Builds and writes a bare acknowledgement frame.
///
/// # Errors
///
/// Returns [`TransportError::Io`] if the write fails.
pub async fn write_ack<W: AsyncWrite + Unpin>(
    writer: &mut W,
    transport: Transport,
    bytes_received: u16,
) -> Result<(), TransportError> {
    let mut buf = [0u8; header::SOCKET_ACK_SZ];
    let n = header::build_ack(transport, bytes_received, &mut buf);
    writer.write_all(&buf[..n]).await?;
    Ok(())
}

/// Writes raw, already-framed bytes, as returned by
/// `iocom_core::ConnectionAction::SendBytes`.
///
/// # Errors
///
/// Returns [`TransportError::Io`] if the write fails.
pub async fn write_raw<W: AsyncWrite + Unpin>(
    writer: &mut W,
    bytes: &[u8],
) -> Result<(), TransportError> {
    writer.write_all(bytes).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use iocom_proto::header::{ExtraFlags, FrameFlags};
    use std::io::Cursor;

    fn sample_header() -> Header {
        Header {
            frame_nr: 1,
            flags: FrameFlags::empty(),
            extra_flags: ExtraFlags::empty(),
            mblk_id: 3,
            addr: 10,
            payload_size: 0,
        }
    }

    #[tokio::test]
    async fn reads_frame_delivered_across_two_writes() {
        let mut wire = vec![0u8; Transport::Socket.frame_sz()];
        let n = header::build_frame(Transport::Socket, sample_header(), b"hello", &mut wire)
            .unwrap();
        wire.truncate(n);

        let (mut client, mut server) = tokio::io::duplex(1024);
        let half = wire.len() / 2;
        let first = wire[..half].to_vec();
        let second = wire[half..].to_vec();
        let write_task = tokio::spawn(async move {
            client.write_all(&first).await.unwrap();
            tokio::task::yield_now().await;
            client.write_all(&second).await.unwrap();
        });

        let mut framer = FrameReader::new(Transport::Socket);
        let frame = framer.read_frame(&mut server).await.unwrap();
        write_task.await.unwrap();

        let ReceivedFrame::Data { header, payload } = frame else { panic!("expected data frame") };
        assert_eq!(header.mblk_id, 3);
        assert_eq!(&payload[..], b"hello");
    }

    #[tokio::test]
    async fn reads_ack_frame() {
        let mut wire = [0u8; header::SOCKET_ACK_SZ];
        let n = header::build_ack(Transport::Socket, 77, &mut wire);
        let mut reader = Cursor::new(wire[..n].to_vec());
        let mut framer = FrameReader::new(Transport::Socket);
        let frame = framer.read_frame(&mut reader).await.unwrap();
        assert!(matches!(frame, ReceivedFrame::Ack { bytes_received: 77 }));
    }

    #[tokio::test]
    async fn eof_mid_frame_reports_closed() {
        let mut wire = vec![0u8; Transport::Socket.frame_sz()];
        let n = header::build_frame(Transport::Socket, sample_header(), b"hello", &mut wire)
            .unwrap();
        let mut reader = Cursor::new(wire[..n - 1].to_vec());
        let mut framer = FrameReader::new(Transport::Socket);
        assert!(matches!(framer.read_frame(&mut reader).await, Err(TransportError::Closed)));
    }
}
