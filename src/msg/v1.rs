// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Version-1 header layout: the message id is the 16-bit big-endian
//! stream-id field itself, masked to the configured valid range. The type
//! and secondary-header bits sit inside the id field, so they travel with
//! the id value.

use super::{HeaderCodec, MsgId, PRIMARY_HEADER_LEN, VERSION_FLAG};

#[derive(Debug)]
pub(crate) struct V1Codec {
    max_msg_id: u32,
    id_mask: u16,
}

impl V1Codec {
    pub(crate) fn new(max_msg_id: u32) -> Self {
        // Mask covering every bit a valid id can occupy. The ceiling is a
        // platform parameter; the version flag is never part of the id.
        let id_mask = (max_msg_id.next_power_of_two().saturating_sub(1) as u16) & !VERSION_FLAG;
        Self { max_msg_id, id_mask }
    }
}

impl HeaderCodec for V1Codec {
    fn max_msg_id(&self) -> u32 {
        self.max_msg_id
    }

    fn secondary_offset(&self) -> usize {
        PRIMARY_HEADER_LEN
    }

    fn read_msg_id(&self, buf: &[u8]) -> MsgId {
        let stream = u16::from_be_bytes([buf[0], buf[1]]);
        MsgId::new(u32::from(stream & self.id_mask))
    }

    fn write_msg_id(&self, buf: &mut [u8], id: MsgId) {
        let stream = u16::from_be_bytes([buf[0], buf[1]]);
        let stream = (stream & !self.id_mask) | (id.value() as u16 & self.id_mask);
        buf[0..2].copy_from_slice(&stream.to_be_bytes());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_id_mask_from_ceiling() {
        let codec = V1Codec::new(0x1FFF);
        assert_eq!(codec.id_mask, 0x1FFF);

        // A narrower mission ceiling narrows the mask.
        let codec = V1Codec::new(0x07FF);
        assert_eq!(codec.id_mask, 0x07FF);
    }

    #[test]
    fn test_write_preserves_foreign_bits() {
        let codec = V1Codec::new(0x1FFF);
        let mut buf = [0u8; 6];
        // Set bits above the id field (version flag region).
        buf[0] = 0x60;
        codec.write_msg_id(&mut buf, MsgId::new(0x1234));
        assert_eq!(codec.read_msg_id(&buf), MsgId::new(0x1234));
        assert_eq!(buf[0] & 0xE0, 0x60, "bits above the id survive");
    }
}
