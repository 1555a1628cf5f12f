// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Version-2 header layout: the message id is synthesized from three
//! disjoint fields with mission-configurable widths:
//!
//! ```text
//! id = subsystem << (apid_bits + 1) | type << apid_bits | apid
//! ```
//!
//! ApId lives in the low bits of the stream-id word, the type bit maps to
//! the shared type flag, and the subsystem field sits in a 2-byte
//! big-endian extended word directly after the primary header.

use crate::config::MsgIdLayout;

use super::{HeaderCodec, MsgId, PRIMARY_HEADER_LEN, TYPE_FLAG};

/// Byte offset of the extended (subsystem) word.
const EXTENDED_OFFSET: usize = PRIMARY_HEADER_LEN;

#[derive(Debug)]
pub(crate) struct V2Codec {
    layout: MsgIdLayout,
}

impl V2Codec {
    pub(crate) fn new(layout: MsgIdLayout) -> Self {
        debug_assert!(layout.apid_bits >= 1 && layout.apid_bits <= 11);
        debug_assert!(layout.subsystem_bits >= 1 && layout.subsystem_bits <= 9);
        Self { layout }
    }
}

impl HeaderCodec for V2Codec {
    fn max_msg_id(&self) -> u32 {
        self.layout.max_msg_id()
    }

    fn secondary_offset(&self) -> usize {
        EXTENDED_OFFSET + 2
    }

    fn read_msg_id(&self, buf: &[u8]) -> MsgId {
        let stream = u16::from_be_bytes([buf[0], buf[1]]);
        let ext = u16::from_be_bytes([buf[EXTENDED_OFFSET], buf[EXTENDED_OFFSET + 1]]);

        let apid = u32::from(stream) & self.layout.apid_mask();
        let mtype = u32::from(stream & TYPE_FLAG != 0);
        let subsystem = u32::from(ext) & self.layout.subsystem_mask();

        MsgId::new(
            (subsystem << self.layout.subsystem_shift())
                | (mtype << self.layout.type_shift())
                | apid,
        )
    }

    fn write_msg_id(&self, buf: &mut [u8], id: MsgId) {
        let apid = (id.value() & self.layout.apid_mask()) as u16;
        let mtype = (id.value() >> self.layout.type_shift()) & 1;
        let subsystem = ((id.value() >> self.layout.subsystem_shift())
            & self.layout.subsystem_mask()) as u16;

        let mut stream = u16::from_be_bytes([buf[0], buf[1]]);
        stream = (stream & !(self.layout.apid_mask() as u16)) | apid;
        if mtype != 0 {
            stream |= TYPE_FLAG;
        } else {
            stream &= !TYPE_FLAG;
        }
        buf[0..2].copy_from_slice(&stream.to_be_bytes());

        let mut ext = u16::from_be_bytes([buf[EXTENDED_OFFSET], buf[EXTENDED_OFFSET + 1]]);
        ext = (ext & !(self.layout.subsystem_mask() as u16)) | subsystem;
        buf[EXTENDED_OFFSET..EXTENDED_OFFSET + 2].copy_from_slice(&ext.to_be_bytes());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn buf_v2() -> [u8; 12] {
        let mut buf = [0u8; 12];
        buf[0] = 0x80; // version flag
        buf
    }

    #[test]
    fn test_round_trip_default_widths() {
        let codec = V2Codec::new(MsgIdLayout::default());
        let mut buf = buf_v2();
        for raw in [0u32, 0x7F, 0x80, 0x1_0000, 0x1_FFFF, 0x0_A5A5 & 0x1_FFFF] {
            codec.write_msg_id(&mut buf, MsgId::new(raw));
            assert_eq!(codec.read_msg_id(&buf), MsgId::new(raw), "id {:#x}", raw);
        }
    }

    #[test]
    fn test_round_trip_custom_widths() {
        let layout = MsgIdLayout {
            apid_bits: 11,
            subsystem_bits: 4,
        };
        let codec = V2Codec::new(layout);
        let mut buf = buf_v2();
        for raw in [0x0000u32, 0x07FF, 0x0800, 0xF800, 0xFFFF] {
            codec.write_msg_id(&mut buf, MsgId::new(raw));
            assert_eq!(codec.read_msg_id(&buf), MsgId::new(raw), "id {:#x}", raw);
        }
    }

    #[test]
    fn test_fields_land_in_disjoint_words() {
        let layout = MsgIdLayout::default();
        let codec = V2Codec::new(layout);
        let mut buf = buf_v2();

        // Subsystem-only id: stream-id apid bits stay clear.
        codec.write_msg_id(&mut buf, MsgId::new(0x1 << layout.subsystem_shift()));
        let stream = u16::from_be_bytes([buf[0], buf[1]]);
        assert_eq!(u32::from(stream) & layout.apid_mask(), 0);
        let ext = u16::from_be_bytes([buf[6], buf[7]]);
        assert_eq!(ext, 1);

        // ApId-only id: extended word stays clear.
        codec.write_msg_id(&mut buf, MsgId::new(0x55));
        let ext = u16::from_be_bytes([buf[6], buf[7]]);
        assert_eq!(ext, 0);
    }

    #[test]
    fn test_type_bit_maps_to_stream_flag() {
        let layout = MsgIdLayout::default();
        let codec = V2Codec::new(layout);
        let mut buf = buf_v2();

        codec.write_msg_id(&mut buf, MsgId::new(1 << layout.type_shift()));
        let stream = u16::from_be_bytes([buf[0], buf[1]]);
        assert_ne!(stream & TYPE_FLAG, 0, "command bit set");

        codec.write_msg_id(&mut buf, MsgId::new(0x12));
        let stream = u16::from_be_bytes([buf[0], buf[1]]);
        assert_eq!(stream & TYPE_FLAG, 0, "telemetry clears the bit");
    }
}
