//! Log record wire format: a 24-byte packed header, a variant-specific
//! payload, and the 64-byte group footer.
//!
//! All integers are little-endian with no padding between fields: explicit
//! `to_le_bytes`/`from_le_bytes` field-by-field encoding rather than a
//! serde/bincode derive, since this format is specified bit-exactly and is
//! not expected to evolve compatibly.

use std::fmt::{Debug, Formatter, Result as FmtResult};

use thiserror::Error;

use journal_vfs::types::{StripeId, VirtualBlkAddr, VolumeId, WbIndex, WbLsid};

/// Size in bytes of [`LogRecordHeader`] on the wire.
pub const HEADER_SIZE: usize = 24;

/// Size in bytes of [`LogGroupFooter`] on the wire; it occupies the final
/// bytes of every log group.
pub const FOOTER_SIZE: usize = 64;

/// Marks an untouched (zero-filled) meta-page padding gap left behind when a
/// reservation is advanced to the next meta-page boundary (spec §4.1). A real
/// record's `record_type` is never zero, so the replay scanner uses this to
/// tell "padding, skip to the next meta page" apart from "corrupt record".
pub(crate) const PADDING_RECORD_TYPE: u16 = 0;

/// Tag discriminating a [`LogRecordPayload`] variant (spec §3).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u16)]
pub enum RecordType {
    BlockWriteDone   = 1,
    StripeMapUpdated = 2,
    GcBlockWriteDone = 3,
    GcStripeFlushed  = 4,
    VolumeDeleted    = 5,
}

impl RecordType {
    const fn from_u16(value: u16) -> Option<Self> {
        match value {
            1 => Some(Self::BlockWriteDone),
            2 => Some(Self::StripeMapUpdated),
            3 => Some(Self::GcBlockWriteDone),
            4 => Some(Self::GcStripeFlushed),
            5 => Some(Self::VolumeDeleted),
            _ => None,
        }
    }
}

/// The 24-byte common header shared by every log record (spec §6).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LogRecordHeader {
    pub record_type:     RecordType,
    pub log_group_id:    u16,
    pub reserved_size:   u32,
    pub sequence_number: u64,
    pub record_crc:      u64,
}

/// `{volume_id, start_rba, num_blocks, virtual_blk_addr, wb_lsid, write_buffer_index}`
/// (spec §3): a host write landed in a write-buffer stripe.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockWriteDonePayload {
    pub volume_id:         VolumeId,
    pub start_rba:         u64,
    pub num_blocks:        u32,
    pub virtual_blk_addr:  VirtualBlkAddr,
    pub wb_lsid:           WbLsid,
    pub write_buffer_index: WbIndex,
}

/// `{vsid, old_location, new_location}` (spec §3): a stripe transitioned
/// location (e.g. write-buffer-resident to SSD-resident, or unmap).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StripeMapUpdatedPayload {
    pub vsid:         StripeId,
    pub old_location:  VirtualBlkAddr,
    pub new_location:  VirtualBlkAddr,
}

/// `{volume_id, sequence_cutoff}` (spec §3): replay must drop earlier records
/// for this volume.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VolumeDeletedPayload {
    pub volume_id:       VolumeId,
    pub sequence_cutoff: u64,
}

/// A decoded log record's variant payload (spec §3). GC variants carry the
/// same fields as their host-path counterparts; replay treats them the same
/// way structurally but tags them so the journal's own callers (not this
/// crate, since no host-notification hook is in scope here — see `DESIGN.md`)
/// can suppress host-visible side effects.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogRecordPayload {
    BlockWriteDone(BlockWriteDonePayload),
    StripeMapUpdated(StripeMapUpdatedPayload),
    GcBlockWriteDone(BlockWriteDonePayload),
    GcStripeFlushed(StripeMapUpdatedPayload),
    VolumeDeleted(VolumeDeletedPayload),
}

impl LogRecordPayload {
    #[must_use]
    pub fn record_type(&self) -> RecordType {
        match self {
            Self::BlockWriteDone(_)   => RecordType::BlockWriteDone,
            Self::StripeMapUpdated(_) => RecordType::StripeMapUpdated,
            Self::GcBlockWriteDone(_) => RecordType::GcBlockWriteDone,
            Self::GcStripeFlushed(_)  => RecordType::GcStripeFlushed,
            Self::VolumeDeleted(_)    => RecordType::VolumeDeleted,
        }
    }

    fn encode_body(&self, out: &mut Vec<u8>) {
        match self {
            Self::BlockWriteDone(payload) | Self::GcBlockWriteDone(payload) => {
                encode_block_write_done(payload, out);
            }
            Self::StripeMapUpdated(payload) | Self::GcStripeFlushed(payload) => {
                encode_stripe_map_updated(payload, out);
            }
            Self::VolumeDeleted(payload) => encode_volume_deleted(payload, out),
        }
    }
}

fn encode_vsa(vsa: VirtualBlkAddr, out: &mut Vec<u8>) {
    out.extend_from_slice(&vsa.stripe_id.0.to_le_bytes());
    out.extend_from_slice(&vsa.offset.to_le_bytes());
}

fn decode_vsa(input: &[u8]) -> VirtualBlkAddr {
    let stripe_id = u32::from_le_bytes(input[0..4].try_into().expect("4-byte slice"));
    let offset    = u32::from_le_bytes(input[4..8].try_into().expect("4-byte slice"));
    VirtualBlkAddr { stripe_id: StripeId(stripe_id), offset }
}

const VSA_SIZE: usize = 8;

fn encode_block_write_done(payload: &BlockWriteDonePayload, out: &mut Vec<u8>) {
    out.extend_from_slice(&payload.volume_id.0.to_le_bytes());
    out.extend_from_slice(&payload.start_rba.to_le_bytes());
    out.extend_from_slice(&payload.num_blocks.to_le_bytes());
    encode_vsa(payload.virtual_blk_addr, out);
    out.extend_from_slice(&payload.wb_lsid.0.to_le_bytes());
    out.extend_from_slice(&payload.write_buffer_index.0.to_le_bytes());
}

const BLOCK_WRITE_DONE_SIZE: usize = 4 + 8 + 4 + VSA_SIZE + 4 + 4;

fn decode_block_write_done(input: &[u8]) -> Option<BlockWriteDonePayload> {
    if input.len() < BLOCK_WRITE_DONE_SIZE {
        return None;
    }
    let volume_id  = VolumeId(u32::from_le_bytes(input[0..4].try_into().ok()?));
    let start_rba  = u64::from_le_bytes(input[4..12].try_into().ok()?);
    let num_blocks = u32::from_le_bytes(input[12..16].try_into().ok()?);
    let vsa        = decode_vsa(&input[16..24]);
    let wb_lsid    = WbLsid(u32::from_le_bytes(input[24..28].try_into().ok()?));
    let wb_index   = WbIndex(u32::from_le_bytes(input[28..32].try_into().ok()?));
    Some(BlockWriteDonePayload {
        volume_id,
        start_rba,
        num_blocks,
        virtual_blk_addr:   vsa,
        wb_lsid,
        write_buffer_index: wb_index,
    })
}

fn encode_stripe_map_updated(payload: &StripeMapUpdatedPayload, out: &mut Vec<u8>) {
    out.extend_from_slice(&payload.vsid.0.to_le_bytes());
    encode_vsa(payload.old_location, out);
    encode_vsa(payload.new_location, out);
}

const STRIPE_MAP_UPDATED_SIZE: usize = 4 + VSA_SIZE + VSA_SIZE;

fn decode_stripe_map_updated(input: &[u8]) -> Option<StripeMapUpdatedPayload> {
    if input.len() < STRIPE_MAP_UPDATED_SIZE {
        return None;
    }
    let vsid         = StripeId(u32::from_le_bytes(input[0..4].try_into().ok()?));
    let old_location = decode_vsa(&input[4..12]);
    let new_location = decode_vsa(&input[12..20]);
    Some(StripeMapUpdatedPayload { vsid, old_location, new_location })
}

fn encode_volume_deleted(payload: &VolumeDeletedPayload, out: &mut Vec<u8>) {
    out.extend_from_slice(&payload.volume_id.0.to_le_bytes());
    out.extend_from_slice(&payload.sequence_cutoff.to_le_bytes());
}

const VOLUME_DELETED_SIZE: usize = 4 + 8;

fn decode_volume_deleted(input: &[u8]) -> Option<VolumeDeletedPayload> {
    if input.len() < VOLUME_DELETED_SIZE {
        return None;
    }
    let volume_id       = VolumeId(u32::from_le_bytes(input[0..4].try_into().ok()?));
    let sequence_cutoff = u64::from_le_bytes(input[4..12].try_into().ok()?);
    Some(VolumeDeletedPayload { volume_id, sequence_cutoff })
}

/// A fully decoded log record: header plus typed payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LogRecord {
    pub header:  LogRecordHeader,
    pub payload: LogRecordPayload,
}

impl LogRecord {
    /// The wire size of this record (header + payload), matching what must be
    /// reserved from the log buffer before encoding.
    #[must_use]
    pub fn wire_size(&self) -> usize {
        HEADER_SIZE + payload_body_len(&self.payload)
    }

    /// Encodes this record to its bit-exact wire representation, computing
    /// the trailing CRC with `crc32c::crc32c_append` over the header (minus
    /// the CRC field itself) and the payload body.
    #[must_use]
    pub fn encode(&self) -> Vec<u8> {
        let mut body = Vec::with_capacity(payload_body_len(&self.payload));
        self.payload.encode_body(&mut body);

        let mut out = Vec::with_capacity(HEADER_SIZE + body.len());
        out.extend_from_slice(&(self.header.record_type as u16).to_le_bytes());
        out.extend_from_slice(&self.header.log_group_id.to_le_bytes());
        out.extend_from_slice(&self.header.reserved_size.to_le_bytes());
        out.extend_from_slice(&self.header.sequence_number.to_le_bytes());

        let crc = crc32c::crc32c(&out);
        let crc = crc32c::crc32c_append(crc, &body);
        let crc = u64::from(crc);

        out.extend_from_slice(&crc.to_le_bytes());
        out.extend_from_slice(&body);
        out
    }

    /// Decodes a record from `input`, validating its CRC. Returns `None` if
    /// `input` is too short, the record type is unrecognized, the payload
    /// cannot be parsed, or the checksum does not match — all of which the
    /// replay scanner (`crate::replay`) treats as "stop here, this group is
    /// torn from this point on" (spec §4.5 step 1).
    #[must_use]
    pub fn decode(input: &[u8]) -> Option<Self> {
        if input.len() < HEADER_SIZE {
            return None;
        }

        let raw_type = u16::from_le_bytes(input[0..2].try_into().ok()?);
        if raw_type == PADDING_RECORD_TYPE {
            return None;
        }
        let record_type = RecordType::from_u16(raw_type)?;

        let log_group_id    = u16::from_le_bytes(input[2..4].try_into().ok()?);
        let reserved_size   = u32::from_le_bytes(input[4..8].try_into().ok()?);
        let sequence_number = u64::from_le_bytes(input[8..16].try_into().ok()?);
        let record_crc      = u64::from_le_bytes(input[16..24].try_into().ok()?);

        let total_len = usize::try_from(reserved_size).ok()?;
        if total_len < HEADER_SIZE || input.len() < total_len {
            return None;
        }
        let body = &input[HEADER_SIZE..total_len];

        let crc = crc32c::crc32c(&input[0..16]);
        let crc = crc32c::crc32c_append(crc, body);
        if u64::from(crc) != record_crc {
            return None;
        }

        let payload = match record_type {
            RecordType::BlockWriteDone   => LogRecordPayload::BlockWriteDone(decode_block_write_done(body)?),
            RecordType::GcBlockWriteDone => LogRecordPayload::GcBlockWriteDone(decode_block_write_done(body)?),
            RecordType::StripeMapUpdated => LogRecordPayload::StripeMapUpdated(decode_stripe_map_updated(body)?),
            RecordType::GcStripeFlushed  => LogRecordPayload::GcStripeFlushed(decode_stripe_map_updated(body)?),
            RecordType::VolumeDeleted    => LogRecordPayload::VolumeDeleted(decode_volume_deleted(body)?),
        };

        Some(Self {
            header: LogRecordHeader { record_type, log_group_id, reserved_size, sequence_number, record_crc },
            payload,
        })
    }
}

fn payload_body_len(payload: &LogRecordPayload) -> usize {
    match payload {
        LogRecordPayload::BlockWriteDone(_) | LogRecordPayload::GcBlockWriteDone(_) => BLOCK_WRITE_DONE_SIZE,
        LogRecordPayload::StripeMapUpdated(_) | LogRecordPayload::GcStripeFlushed(_) => STRIPE_MAP_UPDATED_SIZE,
        LogRecordPayload::VolumeDeleted(_) => VOLUME_DELETED_SIZE,
    }
}

/// The seal marker stamped into every valid [`LogGroupFooter`]; chosen as a
/// recognizable, non-zero 64-bit pattern so a zero-filled (never-sealed)
/// footer region is unambiguously distinguished from a sealed one.
pub const SEAL_MARKER: u64 = 0x4A4E4C5F5345414C;

/// The final 64 bytes of every log group (spec §3): written only when a
/// group is sealed by [`crate::log_buffer::LogBuffer::roll`]. A group whose
/// footer fails to decode or validate is *torn* (spec §3, §8 scenario 6).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LogGroupFooter {
    pub sequence_range: (u64, u64),
    pub record_count:   u32,
    pub checksum:        u64,
    pub seal_marker:     u64,
}

impl LogGroupFooter {
    #[must_use]
    pub fn sealed(sequence_range: (u64, u64), record_count: u32, checksum: u64) -> Self {
        Self { sequence_range, record_count, checksum, seal_marker: SEAL_MARKER }
    }

    #[must_use]
    pub fn encode(&self) -> [u8; FOOTER_SIZE] {
        let mut out = [0_u8; FOOTER_SIZE];
        out[0..8].copy_from_slice(&self.sequence_range.0.to_le_bytes());
        out[8..16].copy_from_slice(&self.sequence_range.1.to_le_bytes());
        out[16..20].copy_from_slice(&self.record_count.to_le_bytes());
        out[20..28].copy_from_slice(&self.checksum.to_le_bytes());
        out[28..36].copy_from_slice(&self.seal_marker.to_le_bytes());
        out
    }

    /// Decodes and validates a footer. Returns `None` for an all-zero
    /// (never-sealed) region or a seal marker mismatch — both treated as
    /// "torn" by the replay scanner.
    #[must_use]
    pub fn decode(input: &[u8]) -> Option<Self> {
        if input.len() < FOOTER_SIZE {
            return None;
        }
        let seq_lo    = u64::from_le_bytes(input[0..8].try_into().ok()?);
        let seq_hi    = u64::from_le_bytes(input[8..16].try_into().ok()?);
        let record_count = u32::from_le_bytes(input[16..20].try_into().ok()?);
        let checksum  = u64::from_le_bytes(input[20..28].try_into().ok()?);
        let seal_marker = u64::from_le_bytes(input[28..36].try_into().ok()?);

        if seal_marker != SEAL_MARKER {
            return None;
        }

        Some(Self { sequence_range: (seq_lo, seq_hi), record_count, checksum, seal_marker })
    }
}

/// A group's footer failed to decode or its seal marker did not match; the
/// group is truncated at the last well-formed record (spec §3, §7).
#[derive(Debug, Clone, Copy, Error)]
#[error("log group footer is missing or invalid")]
pub struct TornFooterError;

impl Debug for RecordType {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        let name = match self {
            Self::BlockWriteDone   => "BlockWriteDone",
            Self::StripeMapUpdated => "StripeMapUpdated",
            Self::GcBlockWriteDone => "GcBlockWriteDone",
            Self::GcStripeFlushed  => "GcStripeFlushed",
            Self::VolumeDeleted    => "VolumeDeleted",
        };
        f.write_str(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_block_write_done(seq: u64) -> LogRecord {
        LogRecord {
            header: LogRecordHeader {
                record_type:     RecordType::BlockWriteDone,
                log_group_id:    3,
                reserved_size:   (HEADER_SIZE + BLOCK_WRITE_DONE_SIZE) as u32,
                sequence_number: seq,
                record_crc:      0,
            },
            payload: LogRecordPayload::BlockWriteDone(BlockWriteDonePayload {
                volume_id:          VolumeId(7),
                start_rba:          42,
                num_blocks:         4,
                virtual_blk_addr:   VirtualBlkAddr { stripe_id: StripeId(10), offset: 0 },
                wb_lsid:            WbLsid(5),
                write_buffer_index: WbIndex(1),
            }),
        }
    }

    #[test]
    fn round_trips_block_write_done() {
        let record = sample_block_write_done(99);
        let bytes = record.encode();
        assert_eq!(bytes.len(), record.wire_size());

        let decoded = LogRecord::decode(&bytes).expect("valid record decodes");
        assert_eq!(decoded, record);
    }

    #[test]
    fn corrupted_payload_fails_crc_check() {
        let record = sample_block_write_done(1);
        let mut bytes = record.encode();
        let last = bytes.len() - 1;
        bytes[last] ^= 0xFF;
        assert!(LogRecord::decode(&bytes).is_none());
    }

    #[test]
    fn zero_type_is_treated_as_padding() {
        let bytes = vec![0_u8; HEADER_SIZE];
        assert!(LogRecord::decode(&bytes).is_none());
    }

    #[test]
    fn footer_round_trips() {
        let footer = LogGroupFooter::sealed((10, 42), 7, 0xDEAD_BEEF);
        let bytes = footer.encode();
        let decoded = LogGroupFooter::decode(&bytes).expect("valid footer decodes");
        assert_eq!(decoded, footer);
    }

    #[test]
    fn all_zero_footer_is_torn() {
        let bytes = [0_u8; FOOTER_SIZE];
        assert!(LogGroupFooter::decode(&bytes).is_none());
    }
}
