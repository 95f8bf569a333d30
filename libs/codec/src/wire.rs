//! Frame encoding
//!
//! ```text
//! ┌────────────┬─────────┬──────────┬──────────────────────────┐
//! │ magic (2B) │ ver (1B)│ kind (1B)│ bincode body (variable)  │
//! └────────────┴─────────┴──────────┴──────────────────────────┘
//! ```
//!
//! The kind byte is an explicit discriminator: the decoder picks the body
//! type from it and never guesses from content. Length-prefix framing is the
//! transport's job, not ours.

use crate::envelope::{
    Envelope, EnvelopeKind, InvocationEnvelope, InvocationResponse, StreamDataEnvelope,
    StreamEndEnvelope, StreamErrorEnvelope, StreamResumeEnvelope, StreamStartEnvelope,
    StreamSubscribeEnvelope,
};
use crate::error::{CodecError, CodecResult};
use byteorder::{BigEndian, ByteOrder, WriteBytesExt};
use bytes::Bytes;
use serde::de::DeserializeOwned;
use serde::Serialize;

/// Wire format constants
pub struct WireFormat;

impl WireFormat {
    pub const MAGIC: u16 = 0xAC7E;
    pub const VERSION: u8 = 1;
    pub const HEADER_SIZE: usize = 4;
}

/// Encode an envelope into a self-describing frame body
pub fn encode(envelope: &Envelope) -> CodecResult<Bytes> {
    let kind = envelope.kind();
    let mut buf = Vec::with_capacity(64);
    buf.write_u16::<BigEndian>(WireFormat::MAGIC)
        .map_err(|e| CodecError::encoding("header", e))?;
    buf.push(WireFormat::VERSION);
    buf.push(kind as u8);

    match envelope {
        Envelope::Invocation(e) => write_body(&mut buf, kind, e)?,
        Envelope::Response(e) => write_body(&mut buf, kind, e)?,
        Envelope::StreamSubscribe(e) => write_body(&mut buf, kind, e)?,
        Envelope::StreamStart(e) => write_body(&mut buf, kind, e)?,
        Envelope::StreamData(e) => write_body(&mut buf, kind, e)?,
        Envelope::StreamEnd(e) => write_body(&mut buf, kind, e)?,
        Envelope::StreamError(e) => write_body(&mut buf, kind, e)?,
        Envelope::StreamResume(e) => write_body(&mut buf, kind, e)?,
    }

    Ok(Bytes::from(buf))
}

/// Decode a frame body produced by [`encode`]
pub fn decode(bytes: &[u8]) -> CodecResult<Envelope> {
    let kind = read_header(bytes)?;
    let body = &bytes[WireFormat::HEADER_SIZE..];

    let envelope = match kind {
        EnvelopeKind::Invocation => Envelope::Invocation(read_body::<InvocationEnvelope>(kind, body)?),
        EnvelopeKind::Response => Envelope::Response(read_body::<InvocationResponse>(kind, body)?),
        EnvelopeKind::StreamSubscribe => {
            Envelope::StreamSubscribe(read_body::<StreamSubscribeEnvelope>(kind, body)?)
        }
        EnvelopeKind::StreamStart => Envelope::StreamStart(read_body::<StreamStartEnvelope>(kind, body)?),
        EnvelopeKind::StreamData => Envelope::StreamData(read_body::<StreamDataEnvelope>(kind, body)?),
        EnvelopeKind::StreamEnd => Envelope::StreamEnd(read_body::<StreamEndEnvelope>(kind, body)?),
        EnvelopeKind::StreamError => Envelope::StreamError(read_body::<StreamErrorEnvelope>(kind, body)?),
        EnvelopeKind::StreamResume => {
            Envelope::StreamResume(read_body::<StreamResumeEnvelope>(kind, body)?)
        }
    };

    Ok(envelope)
}

/// Validate the fixed header and return the envelope kind it announces
pub fn read_header(bytes: &[u8]) -> CodecResult<EnvelopeKind> {
    if bytes.len() < WireFormat::HEADER_SIZE {
        return Err(CodecError::FrameTooSmall {
            need: WireFormat::HEADER_SIZE,
            got: bytes.len(),
        });
    }

    let magic = BigEndian::read_u16(&bytes[0..2]);
    if magic != WireFormat::MAGIC {
        return Err(CodecError::InvalidMagic {
            expected: WireFormat::MAGIC,
            actual: magic,
        });
    }

    let version = bytes[2];
    if version != WireFormat::VERSION {
        return Err(CodecError::UnsupportedVersion {
            version,
            supported: WireFormat::VERSION,
        });
    }

    EnvelopeKind::from_u8(bytes[3]).ok_or(CodecError::UnknownKind { tag: bytes[3] })
}

fn write_body<T: Serialize>(buf: &mut Vec<u8>, kind: EnvelopeKind, body: &T) -> CodecResult<()> {
    bincode::serialize_into(buf, body).map_err(|e| CodecError::encoding(kind.name(), e))
}

fn read_body<T: DeserializeOwned>(kind: EnvelopeKind, body: &[u8]) -> CodecResult<T> {
    bincode::deserialize(body).map_err(|e| CodecError::decoding(kind.name(), e))
}
