/// Codec for the packed mapping listing returned by the redirection service.
///
/// Layout (all integers little-endian, offsets relative to buffer start, lengths in bytes):
///
/// ```text
/// header   : Size u32 | Status i32 | MappingCount u32
/// entry[i] : VirtRootLength u32 | VirtRootOffset u32 | Flags u32 | NumberOfTargets u32
///            | TargetEntriesOffset u32
/// target[j]: TargetRootLength u32 | TargetRootOffset u32
/// strings  : UTF-16LE, not NUL-terminated
/// ```
use crate::config::types::{BindError, Result};
use crate::kernel::wide;
use crate::mapping::entry::{MappingEntry, MappingQueryResult};
use crate::mapping::flags::MappingFlags;

pub const HEADER_SIZE: usize = 12;
pub const ENTRY_SIZE: usize = 20;
pub const TARGET_ENTRY_SIZE: usize = 8;

/// Decoded listing together with the status word the service stored in the header
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RawListing {
    /// Size word from the header
    pub size: u32,
    /// NTSTATUS reported inside the buffer
    pub status: i32,
    pub result: MappingQueryResult,
}

struct Reader<'a> {
    buf: &'a [u8],
}

impl<'a> Reader<'a> {
    fn u32_at(&self, offset: usize) -> Result<u32> {
        let end = offset
            .checked_add(4)
            .ok_or_else(|| malformed("offset overflow"))?;
        let bytes = self.buf.get(offset..end).ok_or_else(|| {
            malformed(&format!("u32 at {} outside {} bytes", offset, self.buf.len()))
        })?;
        Ok(u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
    }

    fn path_at(&self, offset: u32, length: u32) -> Result<std::path::PathBuf> {
        if length % 2 != 0 {
            return Err(malformed(&format!("odd string length {}", length)));
        }
        let start = offset as usize;
        let end = start
            .checked_add(length as usize)
            .ok_or_else(|| malformed("string overflow"))?;
        let bytes = self
            .buf
            .get(start..end)
            .ok_or_else(|| malformed(&format!("string {}..{} outside buffer", start, end)))?;
        let units: Vec<u16> = bytes
            .chunks_exact(2)
            .map(|c| u16::from_le_bytes([c[0], c[1]]))
            .collect();
        Ok(wide::decode(&units))
    }
}

fn malformed(detail: &str) -> BindError {
    BindError::MalformedListing(detail.to_string())
}

/// Decode a listing buffer filled by the service
pub fn decode(buf: &[u8]) -> Result<RawListing> {
    if buf.len() < HEADER_SIZE {
        return Err(malformed(&format!("{} bytes is shorter than the header", buf.len())));
    }
    let reader = Reader { buf };
    let size = reader.u32_at(0)?;
    let status = reader.u32_at(4)? as i32;
    let count = reader.u32_at(8)? as usize;
    if status != 0 {
        // On failure the size word may describe what the service needed, not what it wrote
        return Ok(RawListing {
            size,
            status,
            result: MappingQueryResult::default(),
        });
    }

    let declared = size as usize;
    if declared < HEADER_SIZE || declared > buf.len() {
        return Err(malformed(&format!(
            "declared size {} does not fit buffer of {} bytes",
            declared,
            buf.len()
        )));
    }
    let reader = Reader { buf: &buf[..declared] };

    let mut entries = Vec::with_capacity(count.min(4096));
    for i in 0..count {
        let base = HEADER_SIZE + i * ENTRY_SIZE;
        let root_len = reader.u32_at(base)?;
        let root_off = reader.u32_at(base + 4)?;
        let flags = MappingFlags::from_bits_retain(reader.u32_at(base + 8)?);
        let target_count = reader.u32_at(base + 12)? as usize;
        let targets_off = reader.u32_at(base + 16)? as usize;

        let mut targets = Vec::with_capacity(target_count.min(256));
        for j in 0..target_count {
            let t = targets_off + j * TARGET_ENTRY_SIZE;
            let len = reader.u32_at(t)?;
            let off = reader.u32_at(t + 4)?;
            targets.push(reader.path_at(off, len)?);
        }

        entries.push(MappingEntry {
            virtual_root: reader.path_at(root_off, root_len)?,
            targets,
            flags,
        });
    }

    Ok(RawListing {
        size,
        status,
        result: MappingQueryResult { entries },
    })
}

/// Bytes needed to encode `entries`
pub fn encoded_size(entries: &[MappingEntry]) -> usize {
    let mut size = HEADER_SIZE + entries.len() * ENTRY_SIZE;
    for entry in entries {
        size += entry.targets.len() * TARGET_ENTRY_SIZE;
        size += wide::encode(&entry.virtual_root).len() * 2;
        for target in &entry.targets {
            size += wide::encode(target).len() * 2;
        }
    }
    size
}

/// Encode entries in the service's packed layout
pub fn encode(entries: &[MappingEntry]) -> Vec<u8> {
    let total = encoded_size(entries);
    let mut out = vec![0u8; total];
    let put = |out: &mut Vec<u8>, at: usize, v: u32| {
        out[at..at + 4].copy_from_slice(&v.to_le_bytes())
    };

    put(&mut out, 0, total as u32);
    put(&mut out, 4, 0);
    put(&mut out, 8, entries.len() as u32);

    let mut target_cursor = HEADER_SIZE + entries.len() * ENTRY_SIZE;
    let mut string_cursor =
        target_cursor + entries.iter().map(|e| e.targets.len() * TARGET_ENTRY_SIZE).sum::<usize>();

    let mut write_string = |out: &mut Vec<u8>, units: Vec<u16>| -> (u32, u32) {
        let offset = string_cursor;
        for (k, unit) in units.iter().enumerate() {
            out[offset + 2 * k..offset + 2 * k + 2].copy_from_slice(&unit.to_le_bytes());
        }
        string_cursor += units.len() * 2;
        ((units.len() * 2) as u32, offset as u32)
    };

    for (i, entry) in entries.iter().enumerate() {
        let base = HEADER_SIZE + i * ENTRY_SIZE;
        let (root_len, root_off) = write_string(&mut out, wide::encode(&entry.virtual_root));
        put(&mut out, base, root_len);
        put(&mut out, base + 4, root_off);
        put(&mut out, base + 8, entry.flags.bits());
        put(&mut out, base + 12, entry.targets.len() as u32);
        put(&mut out, base + 16, target_cursor as u32);

        for target in &entry.targets {
            let (len, off) = write_string(&mut out, wide::encode(target));
            put(&mut out, target_cursor, len);
            put(&mut out, target_cursor + 4, off);
            target_cursor += TARGET_ENTRY_SIZE;
        }
    }

    out
}
