use base64::{Engine as _, engine::general_purpose::STANDARD as BASE64};
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DecodeError {
    #[error("Invalid base64 content: {0}")]
    Base64(String),
    #[error("Invalid quoted-printable sequence at byte {0}")]
    QuotedPrintable(usize),
    #[error("Unsupported transfer encoding: {0}")]
    Unsupported(String),
}

/// Decode a MIME body part according to its Content-Transfer-Encoding.
///
/// Identity encodings (`7bit`, `8bit`, `binary` or none) return the input
/// unchanged. Unknown encodings are reported so the caller can decide to
/// keep the raw bytes.
pub fn decode_transfer_encoding(input: &[u8], encoding: &str) -> Result<Vec<u8>, DecodeError> {
    match encoding.trim().to_ascii_lowercase().as_str() {
        "base64" => decode_base64(input),
        "quoted-printable" => decode_quoted_printable(input),
        "" | "7bit" | "8bit" | "binary" => Ok(input.to_vec()),
        other => Err(DecodeError::Unsupported(other.to_string())),
    }
}

fn decode_base64(input: &[u8]) -> Result<Vec<u8>, DecodeError> {
    // Encoded bodies are wrapped at 76 columns
    let compact: Vec<u8> = input.iter().copied().filter(|b| !b.is_ascii_whitespace()).collect();
    BASE64.decode(compact).map_err(|e| DecodeError::Base64(e.to_string()))
}

fn decode_quoted_printable(input: &[u8]) -> Result<Vec<u8>, DecodeError> {
    let mut result = Vec::with_capacity(input.len());
    let mut i = 0;

    while i < input.len() {
        if input[i] != b'=' {
            result.push(input[i]);
            i += 1;
            continue;
        }

        // Soft line break: "=\r\n" or "=\n", optionally with trailing whitespace
        let mut j = i + 1;
        while j < input.len() && (input[j] == b' ' || input[j] == b'\t') {
            j += 1;
        }
        if input.get(j) == Some(&b'\r') && input.get(j + 1) == Some(&b'\n') {
            i = j + 2;
            continue;
        }
        if input.get(j) == Some(&b'\n') || j == input.len() {
            i = (j + 1).min(input.len());
            continue;
        }

        match (input.get(i + 1).and_then(hex_value), input.get(i + 2).and_then(hex_value)) {
            (Some(high), Some(low)) => {
                result.push(high << 4 | low);
                i += 3;
            }
            _ => return Err(DecodeError::QuotedPrintable(i)),
        }
    }

    Ok(result)
}

fn hex_value(byte: &u8) -> Option<u8> {
    (*byte as char).to_digit(16).map(|d| d as u8)
}
