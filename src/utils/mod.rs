pub mod mime_decoder;

pub use mime_decoder::{decode_transfer_encoding, DecodeError};
