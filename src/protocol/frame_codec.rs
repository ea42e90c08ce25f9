use crate::error::FormatError;

/// Start-of-frame marker ('*')
pub const START_MARKER: u8 = 0x2A;
/// End-of-frame marker ('<')
pub const END_MARKER: u8 = 0x3C;

/// Handshake frame size in bytes
pub const FRAME_LEN: usize = 512;
/// Handshake frame size as a hex string
pub const FRAME_HEX_LEN: usize = FRAME_LEN * 2;

pub const END_MARKER_OFFSET: usize = 509;
pub const CHECKSUM_OFFSET: usize = 510;
/// Firmware major/minor pair used for the encryption-enable decision
pub const FIRMWARE_OFFSET: usize = 393;

const CRC16_POLY: u16 = 0xA001;
const CRC16_INIT: u16 = 0xFFFF;

/// CRC-16 (Modbus/IBM): reflected poly 0xA001, init 0xFFFF, no final xor
pub fn crc16(bytes: &[u8]) -> u16 {
    let mut crc = CRC16_INIT;

    for &byte in bytes {
        crc ^= byte as u16;
        for _ in 0..8 {
            crc = if crc & 0x0001 != 0 {
                (crc >> 1) ^ CRC16_POLY
            } else {
                crc >> 1
            };
        }
    }

    crc
}

/// Encode a CRC the way the handshake frame carries it: bytes swapped, lowercase hex
pub fn crc_to_swapped_hex(crc: u16) -> String {
    format!("{:04x}", crc.swap_bytes())
}

/// Encode a CRC high byte first (upload frame convention)
pub fn crc_to_big_endian_bytes(crc: u16) -> [u8; 2] {
    crc.to_be_bytes()
}

/// Check the start and end markers of a handshake frame
pub fn validate_markers(buffer: &[u8]) -> bool {
    if buffer.len() <= END_MARKER_OFFSET {
        return false;
    }

    buffer[0] == START_MARKER && buffer[END_MARKER_OFFSET] == END_MARKER
}

/// Compare the CRC over bytes 0..510 with the swapped-hex checksum at 510..512
pub fn match_checksum(buffer: &[u8]) -> bool {
    if buffer.len() < FRAME_LEN {
        return false;
    }

    let expected = crc_to_swapped_hex(crc16(&buffer[..CHECKSUM_OFFSET]));
    let received = hex::encode(&buffer[CHECKSUM_OFFSET..FRAME_LEN]);

    expected.eq_ignore_ascii_case(&received)
}

/// One 512-byte handshake frame, either as received or after decryption
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    bytes: Vec<u8>,
}

impl Frame {
    /// Decode exactly `FRAME_HEX_LEN` hex characters into a frame
    pub fn from_hex(hex_frame: &str) -> Result<Self, FormatError> {
        if hex_frame.len() != FRAME_HEX_LEN {
            return Err(FormatError::HexLength {
                expected: FRAME_HEX_LEN,
                actual: hex_frame.len(),
            });
        }

        Ok(Frame {
            bytes: hex::decode(hex_frame)?,
        })
    }

    /// Wrap raw bytes; `None` unless exactly `FRAME_LEN` long
    pub fn from_bytes(bytes: Vec<u8>) -> Option<Self> {
        (bytes.len() == FRAME_LEN).then_some(Frame { bytes })
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn has_valid_markers(&self) -> bool {
        validate_markers(&self.bytes)
    }

    pub fn has_valid_checksum(&self) -> bool {
        match_checksum(&self.bytes)
    }

    /// Firmware version pair at offsets 393..395
    pub fn firmware_version(&self) -> (u8, u8) {
        (self.bytes[FIRMWARE_OFFSET], self.bytes[FIRMWARE_OFFSET + 1])
    }
}
