//! Frames the length-prefixed peer wire protocol and encodes/decodes the
//! fixed handshake and the typed peer messages.

use bytes::{Buf, BufMut, BytesMut};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio_util::codec::{Decoder, Encoder};

use crate::error::{Error, Result};
use crate::{InfoHash, PeerId, PieceIndex};

/// The fixed protocol string advertised in every handshake.
pub const PROTOCOL_STRING: &[u8; 19] = b"BitTorrent protocol";

/// The 68 byte opening exchange that mutually authenticates info hash and
/// identifies peers.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Handshake {
    pub info_hash: InfoHash,
    pub peer_id: PeerId,
}

impl Handshake {
    pub fn new(info_hash: InfoHash, peer_id: PeerId) -> Self {
        Self { info_hash, peer_id }
    }

    /// Serializes the handshake into its exact 68 byte wire layout.
    pub fn encode(&self) -> [u8; 68] {
        let mut buf = [0u8; 68];
        buf[0] = 19;
        buf[1..20].copy_from_slice(PROTOCOL_STRING);
        // bytes 20..28 are the 8 reserved zero bytes, left as-is
        buf[28..48].copy_from_slice(&self.info_hash);
        buf[48..68].copy_from_slice(&self.peer_id);
        buf
    }

    /// Parses a 68 byte handshake frame.
    pub fn decode(buf: &[u8]) -> Result<Self> {
        if buf.len() != 68 {
            return Err(Error::HandshakeMalformed(format!(
                "expected 68 bytes, got {}",
                buf.len()
            )));
        }
        let pstrlen = buf[0];
        if pstrlen != 19 || &buf[1..20] != PROTOCOL_STRING {
            return Err(Error::HandshakeMalformed(
                "unexpected protocol string".into(),
            ));
        }
        let mut info_hash = [0u8; 20];
        info_hash.copy_from_slice(&buf[28..48]);
        let mut peer_id = [0u8; 20];
        peer_id.copy_from_slice(&buf[48..68]);
        Ok(Self { info_hash, peer_id })
    }
}

/// Writes the local handshake and reads the remote's, with no deadline of
/// its own — callers wrap this in `tokio::time::timeout`.
pub async fn exchange_handshake<S>(
    stream: &mut S,
    local: Handshake,
) -> Result<Handshake>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    stream.write_all(&local.encode()).await?;
    let mut buf = [0u8; 68];
    stream.read_exact(&mut buf).await?;
    Handshake::decode(&buf)
}

/// A peer message per spec: one of nine typed ids, or the absence-of-id
/// keep-alive variant.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Message {
    KeepAlive,
    Choke,
    Unchoke,
    Interested,
    NotInterested,
    Have { index: u32 },
    Bitfield(Vec<u8>),
    Request { index: u32, begin: u32, length: u32 },
    Piece { index: u32, begin: u32, data: Vec<u8> },
    Cancel { index: u32, begin: u32, length: u32 },
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u8)]
pub enum MessageId {
    Choke = 0,
    Unchoke = 1,
    Interested = 2,
    NotInterested = 3,
    Have = 4,
    Bitfield = 5,
    Request = 6,
    Piece = 7,
    Cancel = 8,
}

impl Message {
    /// Returns the message's id, or `None` for a keep-alive.
    pub fn id(&self) -> Option<MessageId> {
        match self {
            Message::KeepAlive => None,
            Message::Choke => Some(MessageId::Choke),
            Message::Unchoke => Some(MessageId::Unchoke),
            Message::Interested => Some(MessageId::Interested),
            Message::NotInterested => Some(MessageId::NotInterested),
            Message::Have { .. } => Some(MessageId::Have),
            Message::Bitfield(_) => Some(MessageId::Bitfield),
            Message::Request { .. } => Some(MessageId::Request),
            Message::Piece { .. } => Some(MessageId::Piece),
            Message::Cancel { .. } => Some(MessageId::Cancel),
        }
    }

    /// Encodes the message into its wire representation: a 4 byte big
    /// endian length prefix followed by the id byte and payload (or, for
    /// keep-alive, four zero bytes and nothing else).
    pub fn encode(&self) -> Vec<u8> {
        let payload = self.payload();
        match self.id() {
            None => vec![0, 0, 0, 0],
            Some(id) => {
                let len = payload.len() as u32 + 1;
                let mut buf = Vec::with_capacity(4 + len as usize);
                buf.extend_from_slice(&len.to_be_bytes());
                buf.push(id as u8);
                buf.extend_from_slice(&payload);
                buf
            }
        }
    }

    fn payload(&self) -> Vec<u8> {
        match self {
            Message::KeepAlive
            | Message::Choke
            | Message::Unchoke
            | Message::Interested
            | Message::NotInterested => Vec::new(),
            Message::Have { index } => index.to_be_bytes().to_vec(),
            Message::Bitfield(bytes) => bytes.clone(),
            Message::Request {
                index,
                begin,
                length,
            }
            | Message::Cancel {
                index,
                begin,
                length,
            } => {
                let mut buf = Vec::with_capacity(12);
                buf.extend_from_slice(&index.to_be_bytes());
                buf.extend_from_slice(&begin.to_be_bytes());
                buf.extend_from_slice(&length.to_be_bytes());
                buf
            }
            Message::Piece { index, begin, data } => {
                let mut buf = Vec::with_capacity(8 + data.len());
                buf.extend_from_slice(&index.to_be_bytes());
                buf.extend_from_slice(&begin.to_be_bytes());
                buf.extend_from_slice(data);
                buf
            }
        }
    }

    fn from_id_and_payload(id: u8, payload: Vec<u8>) -> Result<Self> {
        Ok(match id {
            0 => Message::Choke,
            1 => Message::Unchoke,
            2 => Message::Interested,
            3 => Message::NotInterested,
            4 => {
                if payload.len() != 4 {
                    return Err(Error::Protocol(format!(
                        "have: expected 4 byte payload, got {}",
                        payload.len()
                    )));
                }
                Message::Have {
                    index: u32::from_be_bytes(payload[..4].try_into().unwrap()),
                }
            }
            5 => Message::Bitfield(payload),
            6 | 8 => {
                if payload.len() != 12 {
                    return Err(Error::Protocol(format!(
                        "request/cancel: expected 12 byte payload, got {}",
                        payload.len()
                    )));
                }
                let index = u32::from_be_bytes(payload[0..4].try_into().unwrap());
                let begin = u32::from_be_bytes(payload[4..8].try_into().unwrap());
                let length = u32::from_be_bytes(payload[8..12].try_into().unwrap());
                if id == 6 {
                    Message::Request {
                        index,
                        begin,
                        length,
                    }
                } else {
                    Message::Cancel {
                        index,
                        begin,
                        length,
                    }
                }
            }
            7 => {
                if payload.len() < 8 {
                    return Err(Error::Protocol(format!(
                        "piece: expected at least 8 byte payload, got {}",
                        payload.len()
                    )));
                }
                let index = u32::from_be_bytes(payload[0..4].try_into().unwrap());
                let begin = u32::from_be_bytes(payload[4..8].try_into().unwrap());
                Message::Piece {
                    index,
                    begin,
                    data: payload[8..].to_vec(),
                }
            }
            other => {
                return Err(Error::Protocol(format!("unknown message id {other}")))
            }
        })
    }
}

/// Reads exactly one message (or keep-alive) from `reader`. No deadline of
/// its own; callers wrap this in `tokio::time::timeout`.
pub async fn read_message<R>(reader: &mut R) -> Result<Message>
where
    R: AsyncRead + Unpin,
{
    let mut len_buf = [0u8; 4];
    reader.read_exact(&mut len_buf).await?;
    let len = u32::from_be_bytes(len_buf);
    if len == 0 {
        return Ok(Message::KeepAlive);
    }
    let mut body = vec![0u8; len as usize];
    reader.read_exact(&mut body).await?;
    let id = body[0];
    let payload = body[1..].to_vec();
    Message::from_id_and_payload(id, payload)
}

/// Encodes `Request(index, begin, length)`.
pub fn format_request(index: u32, begin: u32, length: u32) -> Message {
    Message::Request {
        index,
        begin,
        length,
    }
}

/// Encodes `Have(index)`.
pub fn format_have(index: u32) -> Message {
    Message::Have { index }
}

/// Parses a `Have` message, failing if the id or payload shape is wrong.
pub fn parse_have(msg: &Message) -> Result<u32> {
    match msg {
        Message::Have { index } => Ok(*index),
        other => Err(Error::Protocol(format!(
            "expected Have message, got {other:?}"
        ))),
    }
}

/// Parses a `Piece` message, copying its data into `buf` at offset `begin`
/// and returning the number of bytes written.
///
/// Fails if the id isn't `Piece`, if the parsed index doesn't match
/// `expected_index`, if `begin` is out of bounds for `buf`, or if the data
/// would overrun `buf`. On failure `buf` is left untouched.
pub fn parse_piece(
    expected_index: PieceIndex,
    buf: &mut [u8],
    msg: &Message,
) -> Result<usize> {
    let (index, begin, data) = match msg {
        Message::Piece { index, begin, data } => (*index as PieceIndex, *begin as usize, data),
        other => {
            return Err(Error::Protocol(format!(
                "expected Piece message, got {other:?}"
            )))
        }
    };
    if index != expected_index {
        return Err(Error::Protocol(format!(
            "piece index mismatch: expected {expected_index}, got {index}"
        )));
    }
    if begin >= buf.len() {
        return Err(Error::Protocol(format!(
            "begin {begin} out of bounds for buffer of length {}",
            buf.len()
        )));
    }
    if begin + data.len() > buf.len() {
        return Err(Error::Protocol(format!(
            "data length {} with begin {begin} exceeds buffer length {}",
            data.len(),
            buf.len()
        )));
    }
    buf[begin..begin + data.len()].copy_from_slice(data);
    Ok(data.len())
}

/// `tokio_util` codec for the fixed-layout handshake frame, used only for
/// the single handshake exchange before the connection switches to
/// [`PeerCodec`].
pub struct HandshakeCodec;

impl Decoder for HandshakeCodec {
    type Item = Handshake;
    type Error = Error;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>> {
        if src.len() < 68 {
            return Ok(None);
        }
        let frame = src.split_to(68);
        Ok(Some(Handshake::decode(&frame)?))
    }
}

impl Encoder<Handshake> for HandshakeCodec {
    type Error = Error;

    fn encode(&mut self, item: Handshake, dst: &mut BytesMut) -> Result<()> {
        dst.extend_from_slice(&item.encode());
        Ok(())
    }
}

/// `tokio_util` codec for the typed peer message stream.
pub struct PeerCodec;

impl Decoder for PeerCodec {
    type Item = Message;
    type Error = Error;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>> {
        if src.len() < 4 {
            return Ok(None);
        }
        let mut len_bytes = [0u8; 4];
        len_bytes.copy_from_slice(&src[..4]);
        let len = u32::from_be_bytes(len_bytes) as usize;

        if len == 0 {
            src.advance(4);
            return Ok(Some(Message::KeepAlive));
        }

        if src.len() < 4 + len {
            src.reserve(4 + len - src.len());
            return Ok(None);
        }

        let id = src[4];
        let payload = src[5..4 + len].to_vec();
        src.advance(4 + len);
        Ok(Some(Message::from_id_and_payload(id, payload)?))
    }
}

impl Encoder<Message> for PeerCodec {
    type Error = Error;

    fn encode(&mut self, item: Message, dst: &mut BytesMut) -> Result<()> {
        let encoded = item.encode();
        dst.reserve(encoded.len());
        dst.put_slice(&encoded);
        Ok(())
    }
}
