// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Message header codec.
//!
//! Translates between routing-relevant fields and raw header bytes for the
//! two co-existing header layouts. The layout is selected per message by a
//! version flag read from the buffer itself, resolved once per access
//! through the [`HeaderCodec`] trait (one implementation per layout, see
//! `v1.rs` and `v2.rs`).
//!
//! Both layouts share the 6-byte big-endian primary header:
//!
//! ```text
//! bytes 0..2  stream id   (bit 15 version flag, bit 12 type, bit 11 secondary-header)
//! bytes 2..4  sequence    (bits 14..16 segmentation flags, bits 0..14 count)
//! bytes 4..6  length      (total message length - 7)
//! ```
//!
//! They diverge in id encoding and secondary-header offset: version 1
//! carries the id directly in the stream-id field; version 2 synthesizes it
//! from ApId / Type / Subsystem bit-fields with mission-configurable widths
//! and inserts a 2-byte extended word after the primary header.

mod v1;
mod v2;

pub(crate) use v1::V1Codec;
pub(crate) use v2::V2Codec;

use crate::config::{BusConfig, MsgIdLayout};
use crate::error::{Error, Result};

/// Version flag bit within the stream-id word (0 = v1, 1 = v2).
pub(crate) const VERSION_FLAG: u16 = 0x8000;
/// Type bit within the stream-id word (1 = command, 0 = telemetry).
pub(crate) const TYPE_FLAG: u16 = 0x1000;
/// Secondary-header-present bit within the stream-id word.
pub(crate) const SECONDARY_FLAG: u16 = 0x0800;

/// Segmentation flags for an unsegmented message (bits 14..16 of sequence).
pub(crate) const SEG_UNSEGMENTED: u16 = 0xC000;
/// Mask covering the 14-bit sequence count.
pub(crate) const SEQUENCE_MASK: u16 = 0x3FFF;

/// Primary header size shared by both layouts.
pub(crate) const PRIMARY_HEADER_LEN: usize = 6;
/// Bias between the wire length field and the total message length.
pub(crate) const LENGTH_BIAS: usize = 7;

/// Command secondary header: function code + checksum.
pub(crate) const CMD_SECONDARY_LEN: usize = 2;
/// Telemetry secondary header: 32-bit seconds + 16-bit subseconds.
pub(crate) const TLM_SECONDARY_LEN: usize = 6;

// ============================================================================
// Core Types
// ============================================================================

/// Routing-significant message identifier.
///
/// Opaque to callers; its bit layout (which encodes the message type and
/// secondary-header presence) is interpreted only by the codec. Values must
/// lie within the configured valid range; every API that accepts one
/// rejects out-of-range values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MsgId(u32);

impl MsgId {
    /// Wrap a raw id value.
    pub const fn new(value: u32) -> Self {
        Self(value)
    }

    /// Raw id value.
    pub const fn value(self) -> u32 {
        self.0
    }
}

impl std::fmt::Display for MsgId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:#06x}", self.0)
    }
}

/// Message type carried in the header type bit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MsgType {
    Command,
    Telemetry,
}

/// Telemetry timestamp: mission seconds plus 2^-16 second subseconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct MsgTime {
    pub seconds: u32,
    pub subseconds: u16,
}

// ============================================================================
// Layout Dispatch
// ============================================================================

/// Per-layout codec surface: the pieces that differ between the two
/// header versions. Everything else (type bit, sequence, length) lives in
/// the shared primary header and is handled by [`MsgCodec`] directly.
pub(crate) trait HeaderCodec {
    /// Highest id this layout can carry.
    fn max_msg_id(&self) -> u32;
    /// Byte offset of the secondary header (after any extended word).
    fn secondary_offset(&self) -> usize;
    /// Read the id from an already length-checked buffer.
    fn read_msg_id(&self, buf: &[u8]) -> MsgId;
    /// Write only the bits that encode `id`, leaving all other bits intact.
    fn write_msg_id(&self, buf: &mut [u8], id: MsgId);
}

fn read_u16(buf: &[u8], off: usize) -> u16 {
    u16::from_be_bytes([buf[off], buf[off + 1]])
}

fn write_u16(buf: &mut [u8], off: usize, value: u16) {
    buf[off..off + 2].copy_from_slice(&value.to_be_bytes());
}

/// Stateless message codec parameterized by the platform configuration.
///
/// Holds one codec per header layout and dispatches on the version flag
/// read from each buffer.
#[derive(Debug)]
pub struct MsgCodec {
    v1: V1Codec,
    v2: V2Codec,
}

impl MsgCodec {
    pub fn new(config: &BusConfig) -> Self {
        Self {
            v1: V1Codec::new(config.max_msg_id_v1),
            v2: V2Codec::new(config.msg_id_layout),
        }
    }

    /// Build a codec from just the layout parameters (tests, tools).
    pub fn with_layout(max_msg_id_v1: u32, layout: MsgIdLayout) -> Self {
        Self {
            v1: V1Codec::new(max_msg_id_v1),
            v2: V2Codec::new(layout),
        }
    }

    /// Resolve the layout for `buf`, validating the primary header length.
    fn layout(&self, buf: &[u8]) -> Result<&dyn HeaderCodec> {
        if buf.len() < PRIMARY_HEADER_LEN {
            return Err(Error::BadArgument(format!(
                "message buffer too short: {} bytes",
                buf.len()
            )));
        }
        if read_u16(buf, 0) & VERSION_FLAG != 0 {
            if buf.len() < self.v2.secondary_offset() {
                return Err(Error::BadArgument(
                    "version-2 message missing extended header".into(),
                ));
            }
            Ok(&self.v2)
        } else {
            Ok(&self.v1)
        }
    }

    // ------------------------------------------------------------------
    // Message id
    // ------------------------------------------------------------------

    /// Read the routing id from the header.
    pub fn msg_id(&self, buf: &[u8]) -> Result<MsgId> {
        Ok(self.layout(buf)?.read_msg_id(buf))
    }

    /// Write the routing id, touching only the bits that encode it.
    ///
    /// Fails with `BadArgument` (buffer unchanged) when `id` exceeds the
    /// ceiling of the buffer's own layout.
    pub fn set_msg_id(&self, buf: &mut [u8], id: MsgId) -> Result<()> {
        let layout = self.layout(buf)?;
        if id.value() > layout.max_msg_id() {
            return Err(Error::BadArgument(format!(
                "message id {} above layout ceiling {:#x}",
                id,
                layout.max_msg_id()
            )));
        }
        layout.write_msg_id(buf, id);
        Ok(())
    }

    /// Classify an id without a sample message: synthesize a minimal
    /// zeroed header, stamp the id, and read the type bit back.
    pub fn msg_type_from_id(&self, id: MsgId) -> Result<MsgType> {
        let mut scratch = [0u8; 8];
        let version2 = id.value() > self.v1.max_msg_id();
        let len = if version2 {
            write_u16(&mut scratch, 0, VERSION_FLAG);
            self.v2.secondary_offset()
        } else {
            PRIMARY_HEADER_LEN
        };
        let buf = &mut scratch[..len];
        self.set_msg_id(buf, id)?;
        self.msg_type(buf)
    }

    // ------------------------------------------------------------------
    // Primary header fields (shared by both layouts)
    // ------------------------------------------------------------------

    /// Message type from the header type bit.
    pub fn msg_type(&self, buf: &[u8]) -> Result<MsgType> {
        self.layout(buf)?;
        Ok(if read_u16(buf, 0) & TYPE_FLAG != 0 {
            MsgType::Command
        } else {
            MsgType::Telemetry
        })
    }

    /// Set the header type bit.
    pub fn set_msg_type(&self, buf: &mut [u8], mtype: MsgType) -> Result<()> {
        self.layout(buf)?;
        let mut stream = read_u16(buf, 0);
        match mtype {
            MsgType::Command => stream |= TYPE_FLAG,
            MsgType::Telemetry => stream &= !TYPE_FLAG,
        }
        write_u16(buf, 0, stream);
        Ok(())
    }

    /// True when the secondary-header bit is set.
    pub fn has_secondary_header(&self, buf: &[u8]) -> Result<bool> {
        self.layout(buf)?;
        Ok(read_u16(buf, 0) & SECONDARY_FLAG != 0)
    }

    /// Total message length in bytes (wire length field + bias).
    pub fn size(&self, buf: &[u8]) -> Result<usize> {
        self.layout(buf)?;
        Ok(usize::from(read_u16(buf, 4)) + LENGTH_BIAS)
    }

    /// Store the total message length.
    pub fn set_size(&self, buf: &mut [u8], size: usize) -> Result<()> {
        self.layout(buf)?;
        let field = size
            .checked_sub(LENGTH_BIAS)
            .filter(|&v| v <= usize::from(u16::MAX))
            .ok_or_else(|| Error::BadArgument(format!("invalid message size {}", size)))?;
        write_u16(buf, 4, field as u16);
        Ok(())
    }

    /// 14-bit sequence count.
    pub fn sequence_count(&self, buf: &[u8]) -> Result<u16> {
        self.layout(buf)?;
        Ok(read_u16(buf, 2) & SEQUENCE_MASK)
    }

    /// Set the 14-bit sequence count, preserving the segmentation flags.
    pub fn set_sequence_count(&self, buf: &mut [u8], count: u16) -> Result<()> {
        self.layout(buf)?;
        let seq = (read_u16(buf, 2) & !SEQUENCE_MASK) | (count & SEQUENCE_MASK);
        write_u16(buf, 2, seq);
        Ok(())
    }

    // ------------------------------------------------------------------
    // Secondary header fields
    // ------------------------------------------------------------------

    /// Command function code. `WrongMessageType` for telemetry or for
    /// messages without a secondary header.
    pub fn function_code(&self, buf: &[u8]) -> Result<u8> {
        let off = self.command_secondary(buf)?;
        Ok(buf[off])
    }

    /// Set the command function code.
    pub fn set_function_code(&self, buf: &mut [u8], fc: u8) -> Result<()> {
        let off = self.command_secondary(buf)?;
        buf[off] = fc;
        Ok(())
    }

    /// Telemetry timestamp. `WrongMessageType` for commands or for
    /// messages without a secondary header.
    pub fn msg_time(&self, buf: &[u8]) -> Result<MsgTime> {
        let off = self.telemetry_secondary(buf)?;
        Ok(MsgTime {
            seconds: u32::from_be_bytes([buf[off], buf[off + 1], buf[off + 2], buf[off + 3]]),
            subseconds: read_u16(buf, off + 4),
        })
    }

    /// Set the telemetry timestamp.
    pub fn set_msg_time(&self, buf: &mut [u8], time: MsgTime) -> Result<()> {
        let off = self.telemetry_secondary(buf)?;
        buf[off..off + 4].copy_from_slice(&time.seconds.to_be_bytes());
        write_u16(buf, off + 4, time.subseconds);
        Ok(())
    }

    /// Compute and store the command checksum (XOR over every byte with
    /// the checksum field zeroed).
    pub fn generate_checksum(&self, buf: &mut [u8]) -> Result<()> {
        let off = self.command_secondary(buf)? + 1;
        buf[off] = 0;
        buf[off] = self.xor_over(buf)?;
        Ok(())
    }

    /// True when the stored checksum matches a recomputation.
    pub fn validate_checksum(&self, buf: &[u8]) -> Result<bool> {
        let off = self.command_secondary(buf)? + 1;
        let stored = buf[off];
        let mut sum = self.xor_over(buf)?;
        // Remove the stored checksum's own contribution.
        sum ^= stored;
        Ok(sum == stored)
    }

    /// Payload bytes of a command message, after the secondary header.
    pub fn command_payload<'a>(&self, buf: &'a [u8]) -> Result<&'a [u8]> {
        let off = self.command_secondary(buf)? + CMD_SECONDARY_LEN;
        let size = self.size(buf)?.min(buf.len());
        Ok(&buf[off.min(size)..size])
    }

    fn xor_over(&self, buf: &[u8]) -> Result<u8> {
        let size = self.size(buf)?.min(buf.len());
        Ok(buf[..size].iter().fold(0u8, |acc, b| acc ^ b))
    }

    /// Offset of a command secondary header, with type/presence checks.
    fn command_secondary(&self, buf: &[u8]) -> Result<usize> {
        let layout = self.layout(buf)?;
        let stream = read_u16(buf, 0);
        if stream & TYPE_FLAG == 0 || stream & SECONDARY_FLAG == 0 {
            return Err(Error::WrongMessageType);
        }
        let off = layout.secondary_offset();
        if buf.len() < off + CMD_SECONDARY_LEN {
            return Err(Error::BadArgument(
                "buffer truncates command secondary header".into(),
            ));
        }
        Ok(off)
    }

    /// Offset of a telemetry secondary header, with type/presence checks.
    fn telemetry_secondary(&self, buf: &[u8]) -> Result<usize> {
        let layout = self.layout(buf)?;
        let stream = read_u16(buf, 0);
        if stream & TYPE_FLAG != 0 || stream & SECONDARY_FLAG == 0 {
            return Err(Error::WrongMessageType);
        }
        let off = layout.secondary_offset();
        if buf.len() < off + TLM_SECONDARY_LEN {
            return Err(Error::BadArgument(
                "buffer truncates telemetry secondary header".into(),
            ));
        }
        Ok(off)
    }

    // ------------------------------------------------------------------
    // Initialization
    // ------------------------------------------------------------------

    /// Zero-fill and stamp a fresh message: id, length, segmentation flags
    /// and, when `total_len` leaves room for one, the secondary-header bit.
    ///
    /// The layout is chosen as the smallest one whose ceiling covers `id`
    /// (version 1 preferred). The wire length field stores `total_len -
    /// LENGTH_BIAS`, so `total_len` must be at least `LENGTH_BIAS` bytes.
    pub fn init_message(&self, buf: &mut [u8], id: MsgId, total_len: usize) -> Result<()> {
        if total_len < LENGTH_BIAS || total_len > buf.len() {
            return Err(Error::BadArgument(format!(
                "init length {} out of range for {}-byte buffer",
                total_len,
                buf.len()
            )));
        }
        let version2 = id.value() > self.v1.max_msg_id();
        let body = &mut buf[..total_len];
        body.fill(0);
        if version2 {
            if total_len < self.v2.secondary_offset() {
                return Err(Error::BadArgument(
                    "version-2 message needs room for the extended header".into(),
                ));
            }
            write_u16(body, 0, VERSION_FLAG);
        }
        self.set_msg_id(body, id)?;
        write_u16(body, 2, SEG_UNSEGMENTED);
        self.set_size(body, total_len)?;

        // Version 1 carries the secondary-header bit inside the id field, so
        // the id alone decides it. Version 2 sets it when there is room.
        if version2 {
            let secondary_len = match self.msg_type(body)? {
                MsgType::Command => CMD_SECONDARY_LEN,
                MsgType::Telemetry => TLM_SECONDARY_LEN,
            };
            if total_len >= self.v2.secondary_offset() + secondary_len {
                let stream = read_u16(body, 0) | SECONDARY_FLAG;
                write_u16(body, 0, stream);
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn codec() -> MsgCodec {
        MsgCodec::with_layout(0x1FFF, MsgIdLayout::default())
    }

    #[test]
    fn test_msg_id_round_trip_v1() {
        let codec = codec();
        for raw in [0u32, 0x0001, 0x0812, 0x1234, 0x1FFF] {
            let mut buf = [0u8; 8];
            codec
                .set_msg_id(&mut buf, MsgId::new(raw))
                .expect("id within v1 ceiling should be accepted");
            let got = codec.msg_id(&buf).expect("primary header is present");
            assert_eq!(got, MsgId::new(raw), "round trip for {:#x}", raw);
        }
    }

    #[test]
    fn test_set_msg_id_locality() {
        let codec = codec();
        let mut buf = [0xFFu8; 8];
        // v1 buffer: clear the version flag first, everything else stays set.
        buf[0] &= 0x7F;
        let before = buf;
        codec
            .set_msg_id(&mut buf, MsgId::new(0x0123))
            .expect("set id on a valid v1 buffer");
        // Bytes outside the stream-id word untouched.
        assert_eq!(&buf[2..], &before[2..]);
        // Version flag untouched.
        assert_eq!(buf[0] & 0x80, before[0] & 0x80);
    }

    #[test]
    fn test_set_msg_id_out_of_range_leaves_buffer() {
        let codec = codec();
        let mut buf = [0u8; 8];
        let before = buf;
        let err = codec.set_msg_id(&mut buf, MsgId::new(0x2000)).unwrap_err();
        assert!(matches!(err, Error::BadArgument(_)));
        assert_eq!(buf, before, "failed set must not alter the buffer");
    }

    #[test]
    fn test_short_buffer_rejected() {
        let codec = codec();
        assert!(matches!(
            codec.msg_id(&[0u8; 3]),
            Err(Error::BadArgument(_))
        ));
        assert!(matches!(
            codec.msg_id(&[]),
            Err(Error::BadArgument(_))
        ));
    }

    #[test]
    fn test_type_bit_classification() {
        let codec = codec();
        let mut buf = [0u8; 8];
        codec
            .set_msg_id(&mut buf, MsgId::new(0x1812))
            .expect("command-range id fits v1");
        assert_eq!(codec.msg_type(&buf).expect("primary ok"), MsgType::Command);

        codec
            .set_msg_id(&mut buf, MsgId::new(0x0812))
            .expect("telemetry-range id fits v1");
        assert_eq!(
            codec.msg_type(&buf).expect("primary ok"),
            MsgType::Telemetry
        );
    }

    #[test]
    fn test_msg_type_from_id_matches_buffer_read() {
        let codec = codec();
        for raw in [0x0001u32, 0x0812, 0x1801, 0x1FFF, 0x1_0081, 0x1_FFFF] {
            let id = MsgId::new(raw);
            let derived = codec.msg_type_from_id(id).expect("id in range");
            // Cross-check against a real initialized message.
            let mut buf = [0u8; 16];
            codec.init_message(&mut buf, id, 14).expect("init");
            assert_eq!(derived, codec.msg_type(&buf).expect("read type"));
        }
    }

    #[test]
    fn test_size_round_trip() {
        let codec = codec();
        let mut buf = [0u8; 8];
        codec.set_size(&mut buf, 1234).expect("size in range");
        assert_eq!(codec.size(&buf).expect("read size"), 1234);
        assert!(codec.set_size(&mut buf, 3).is_err());
    }

    #[test]
    fn test_sequence_count_wraps_at_14_bits() {
        let codec = codec();
        let mut buf = [0u8; 8];
        write_u16(&mut buf, 2, SEG_UNSEGMENTED);
        codec
            .set_sequence_count(&mut buf, 0x4001)
            .expect("set wraps silently");
        assert_eq!(codec.sequence_count(&buf).expect("read"), 1);
        // Segmentation flags preserved.
        assert_eq!(read_u16(&buf, 2) & !SEQUENCE_MASK, SEG_UNSEGMENTED);
    }

    #[test]
    fn test_function_code_requires_command_secondary() {
        let codec = codec();
        let mut tlm = [0u8; 16];
        codec
            .init_message(&mut tlm, MsgId::new(0x0812), 16)
            .expect("telemetry init");
        assert!(matches!(
            codec.function_code(&tlm),
            Err(Error::WrongMessageType)
        ));

        let mut cmd = [0u8; 16];
        codec
            .init_message(&mut cmd, MsgId::new(0x1812), 16)
            .expect("command init");
        codec.set_function_code(&mut cmd, 7).expect("cmd has fc");
        assert_eq!(codec.function_code(&cmd).expect("read fc"), 7);
    }

    #[test]
    fn test_msg_time_requires_telemetry_secondary() {
        let codec = codec();
        let mut cmd = [0u8; 16];
        codec
            .init_message(&mut cmd, MsgId::new(0x1812), 16)
            .expect("command init");
        assert!(matches!(codec.msg_time(&cmd), Err(Error::WrongMessageType)));

        let mut tlm = [0u8; 16];
        codec
            .init_message(&mut tlm, MsgId::new(0x0812), 16)
            .expect("telemetry init");
        let t = MsgTime {
            seconds: 123_456,
            subseconds: 0x8000,
        };
        codec.set_msg_time(&mut tlm, t).expect("tlm has time");
        assert_eq!(codec.msg_time(&tlm).expect("read time"), t);
    }

    #[test]
    fn test_no_secondary_header_means_no_checksum_field() {
        let codec = codec();
        // Command id without the secondary-header bit (0x0800 clear).
        let mut buf = [0u8; 8];
        codec
            .init_message(&mut buf, MsgId::new(0x1012), LENGTH_BIAS)
            .expect("minimal command");
        assert!(!codec.has_secondary_header(&buf).expect("read flag"));
        assert!(matches!(
            codec.validate_checksum(&buf[..LENGTH_BIAS]),
            Err(Error::WrongMessageType)
        ));
    }

    #[test]
    fn test_init_message_floor_matches_length_encoding() {
        let codec = codec();
        let mut buf = [0u8; 8];
        // The length field cannot encode a total below LENGTH_BIAS.
        assert!(matches!(
            codec.init_message(&mut buf, MsgId::new(0x1012), LENGTH_BIAS - 1),
            Err(Error::BadArgument(_))
        ));
        codec
            .init_message(&mut buf, MsgId::new(0x1012), LENGTH_BIAS)
            .expect("minimum length");
        assert_eq!(codec.size(&buf).expect("read size"), LENGTH_BIAS);
    }

    #[test]
    fn test_checksum_self_consistent_and_mutation_sensitive() {
        let codec = codec();
        let mut buf = [0u8; 24];
        codec
            .init_message(&mut buf, MsgId::new(0x1812), 24)
            .expect("command init");
        codec.set_function_code(&mut buf, 3).expect("fc");
        for (i, b) in buf[8..24].iter_mut().enumerate() {
            *b = (i as u8).wrapping_mul(37);
        }
        codec.generate_checksum(&mut buf).expect("generate");
        assert!(codec.validate_checksum(&buf).expect("validate"));

        // Any single-byte payload mutation must invalidate the checksum.
        for i in 8..24 {
            let mut corrupt = buf;
            corrupt[i] ^= 0x40;
            assert!(
                !codec.validate_checksum(&corrupt).expect("validate"),
                "mutation at byte {} went undetected",
                i
            );
        }
    }

    #[test]
    fn test_init_message_sets_length_and_secondary_flag() {
        let codec = codec();
        let mut buf = [0u8; 32];
        codec
            .init_message(&mut buf, MsgId::new(0x0855), 20)
            .expect("init telemetry");
        assert_eq!(codec.size(&buf).expect("size"), 20);
        assert!(codec.has_secondary_header(&buf).expect("flag"));
        assert_eq!(
            codec.msg_id(&buf).expect("id").value() & 0x7FF,
            0x055,
            "id low bits stamped"
        );
    }
}
