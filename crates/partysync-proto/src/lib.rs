//! Wire format shared by the relay server and party clients.
//!
//! Every message is one line of UTF-8 text terminated by `\n`. Structured
//! messages are JSON objects; replies from the relay are bare tokens
//! (party code, member count, or an `ERROR` line).

pub mod codec;
pub mod constants;
pub mod error;
pub mod limits;
pub mod messages;

pub use codec::{ServerReply, decode_line, encode_line, encode_raw_line};
pub use error::ProtoError;
pub use messages::{InitialRequest, PartyCode, PlaybackSnapshot};
