use sha2::{Digest, Sha256};

use crate::error::FormatError;
use crate::protocol::frame_codec::{crc16, crc_to_big_endian_bytes, END_MARKER, START_MARKER};

/// Verification frame size in bytes
pub const UPLOAD_FRAME_LEN: usize = 64;
/// SHA-256 digest as hex
pub const DIGEST_HEX_LEN: usize = 64;

const DIGEST_OFFSET: usize = 1;
const END_MARKER_OFFSET: usize = 61;
const CHECKSUM_OFFSET: usize = 62;

/// Build the 64-byte verification frame carrying a 32-byte image digest.
///
/// Layout: `0x2A`, digest (1..33), zero padding (33..61), `0x3C`, then the
/// CRC-16 of bytes 0..62 high byte first. Unlike the handshake frame the
/// checksum is *not* byte-swapped.
pub fn build_upload_frame(digest_hex: &str) -> Result<[u8; UPLOAD_FRAME_LEN], FormatError> {
    if digest_hex.len() != DIGEST_HEX_LEN {
        return Err(FormatError::HexLength {
            expected: DIGEST_HEX_LEN,
            actual: digest_hex.len(),
        });
    }
    let digest = hex::decode(digest_hex)?;

    let mut frame = [0u8; UPLOAD_FRAME_LEN];
    frame[0] = START_MARKER;
    frame[DIGEST_OFFSET..DIGEST_OFFSET + digest.len()].copy_from_slice(&digest);
    frame[END_MARKER_OFFSET] = END_MARKER;

    let crc = crc16(&frame[..CHECKSUM_OFFSET]);
    frame[CHECKSUM_OFFSET..].copy_from_slice(&crc_to_big_endian_bytes(crc));

    Ok(frame)
}

/// SHA-256 of a hex-encoded image, returned as lowercase hex
pub fn generate_hash(hex_data: &str) -> Result<String, FormatError> {
    let image = hex::decode(hex_data.trim())?;
    Ok(hex::encode(Sha256::digest(&image)))
}
