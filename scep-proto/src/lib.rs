//! SCEP Protocol - operations, message vocabulary and the envelope codec seam
//!
//! The server and client only talk to envelopes through [`EnvelopeCodec`].
//! [`FramedCodec`] is the bundled implementation.

pub mod codec;
pub mod framed;
pub mod message;
pub mod operation;

pub use codec::{CodecError, Envelope, EnvelopeCodec, IssuerAndSerial, Payload, RequestParams};
pub use framed::FramedCodec;
pub use message::{FailInfo, MessageType, PkiStatus};
pub use operation::{
    content_type, CaType, Capabilities, Operation, UnknownCaType, UnknownOperation,
    DEFAULT_PATH, MAX_PAYLOAD_SIZE,
};
