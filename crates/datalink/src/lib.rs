#![deny(unsafe_code)]
#![deny(missing_docs)]

//! # Overview
//!
//! `datalink` implements the transport collaborator of the transfer
//! session: a blocking TCP client speaking the DataLink protocol.
//!
//! Every DataLink packet starts with the two bytes `DL`, one byte of
//! header length, and the ASCII header itself; commands that carry data
//! append it directly after the header. The client performs the `ID`
//! handshake on connect to learn the server's capabilities, then ships
//! records with `WRITE` commands, optionally waiting for per-record
//! acknowledgements.

use std::io::{Read, Write};
use std::net::TcpStream;
use std::time::Duration;

use session::{Record, ServerInfo, Transport, TransportError};
use tracing::{debug, trace};

const PREAMBLE: &[u8; 2] = b"DL";
const MAX_HEADER_LEN: usize = 255;
const IO_TIMEOUT: Duration = Duration::from_secs(60);

/// Blocking DataLink client over TCP.
///
/// Dropping the client closes the socket; [`Transport::disconnect`] does
/// the same explicitly so the session can reconnect on the same value.
pub struct DataLinkClient {
    address: String,
    client_id: String,
    stream: Option<TcpStream>,
}

impl DataLinkClient {
    /// Creates a client for `address` (host:port), not yet connected.
    ///
    /// `client_id` names this program in the `ID` handshake, in the usual
    /// `program:user:pid:architecture` form.
    #[must_use]
    pub fn new(address: impl Into<String>, client_id: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            client_id: client_id.into(),
            stream: None,
        }
    }

    fn stream(&mut self) -> Result<&mut TcpStream, TransportError> {
        self.stream
            .as_mut()
            .ok_or_else(|| TransportError::Protocol("not connected".into()))
    }

    fn send_packet(&mut self, header: &str, payload: &[u8]) -> Result<(), TransportError> {
        let packet = encode_packet(header, payload)?;
        self.stream()?.write_all(&packet)?;
        Ok(())
    }

    /// Reads one packet header, plus the message payload of `OK` and
    /// `ERROR` replies.
    fn recv_reply(&mut self) -> Result<Reply, TransportError> {
        let stream = self.stream()?;

        let mut preamble = [0u8; 3];
        stream.read_exact(&mut preamble)?;
        if &preamble[0..2] != PREAMBLE {
            return Err(TransportError::Protocol(format!(
                "bad packet preamble {:?}",
                &preamble[0..2]
            )));
        }

        let mut header = vec![0u8; preamble[2] as usize];
        stream.read_exact(&mut header)?;
        let header = String::from_utf8(header)
            .map_err(|_| TransportError::Protocol("non-ASCII packet header".into()))?;
        trace!(header = %header, "received packet");

        let message_len = reply_message_len(&header)?;
        let mut message = vec![0u8; message_len];
        stream.read_exact(&mut message)?;
        let message = String::from_utf8_lossy(&message).trim().to_owned();

        Ok(Reply { header, message })
    }
}

struct Reply {
    header: String,
    message: String,
}

impl Transport for DataLinkClient {
    fn connect(&mut self) -> Result<ServerInfo, TransportError> {
        let stream = TcpStream::connect(&self.address)?;
        stream.set_nodelay(true)?;
        stream.set_read_timeout(Some(IO_TIMEOUT))?;
        stream.set_write_timeout(Some(IO_TIMEOUT))?;
        self.stream = Some(stream);

        let id_command = format!("ID {}", self.client_id);
        self.send_packet(&id_command, &[])?;
        let reply = self.recv_reply()?;
        let writable = parse_id_reply(&reply.header)?;

        debug!(address = %self.address, writable, banner = %reply.header, "connected");
        Ok(ServerInfo {
            endpoint: self.address.clone(),
            writable,
        })
    }

    fn send(&mut self, record: &Record, require_ack: bool) -> Result<(), TransportError> {
        let flags = if require_ack { 'A' } else { 'N' };
        let header = format!(
            "WRITE {} {} {} {} {}",
            record.stream_id,
            record.start_time,
            record.end_time,
            flags,
            record.bytes.len()
        );
        self.send_packet(&header, &record.bytes)?;

        if require_ack {
            let reply = self.recv_reply()?;
            parse_ack(&reply.header, &reply.message)?;
        }
        Ok(())
    }

    fn disconnect(&mut self) {
        if let Some(stream) = self.stream.take() {
            let _ = stream.shutdown(std::net::Shutdown::Both);
        }
    }
}

/// Frames a command header and payload into one DataLink packet.
fn encode_packet(header: &str, payload: &[u8]) -> Result<Vec<u8>, TransportError> {
    let header_len = header.len();
    if header_len > MAX_HEADER_LEN {
        return Err(TransportError::Protocol(format!(
            "command header of {header_len} bytes exceeds the protocol limit"
        )));
    }
    let mut packet = Vec::with_capacity(3 + header_len + payload.len());
    packet.extend_from_slice(PREAMBLE);
    packet.push(header_len as u8);
    packet.extend_from_slice(header.as_bytes());
    packet.extend_from_slice(payload);
    Ok(packet)
}

/// Byte count of the message that follows an `OK` or `ERROR` header.
/// Other reply headers carry no message.
fn reply_message_len(header: &str) -> Result<usize, TransportError> {
    let mut fields = header.split_ascii_whitespace();
    match fields.next() {
        Some("OK") | Some("ERROR") => {
            let size = fields.nth(1).ok_or_else(|| {
                TransportError::Protocol(format!("truncated reply header {header:?}"))
            })?;
            size.parse().map_err(|_| {
                TransportError::Protocol(format!("bad reply size in header {header:?}"))
            })
        }
        _ => Ok(0),
    }
}

/// Extracts write permission from an `ID` handshake reply.
fn parse_id_reply(header: &str) -> Result<bool, TransportError> {
    if !header.starts_with("ID DATALINK") && !header.starts_with("ID DataLink") {
        return Err(TransportError::Protocol(format!(
            "unexpected handshake reply {header:?}"
        )));
    }
    // Capability flags follow the "::" separator.
    let capabilities = header.split("::").nth(1).unwrap_or("");
    Ok(capabilities
        .split_ascii_whitespace()
        .any(|cap| cap == "WRITE"))
}

/// Interprets an acknowledgement reply, surfacing server refusals.
fn parse_ack(header: &str, message: &str) -> Result<(), TransportError> {
    let mut fields = header.split_ascii_whitespace();
    match fields.next() {
        Some("OK") => Ok(()),
        Some("ERROR") => Err(TransportError::Refused(if message.is_empty() {
            header.to_owned()
        } else {
            message.to_owned()
        })),
        _ => Err(TransportError::Protocol(format!(
            "unexpected reply header {header:?}"
        ))),
    }
}
