/// Mapping table entries, query snapshots and principal keys
use crate::config::types::{BindError, Result};
use crate::mapping::flags::MappingFlags;
use crate::mapping::path;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

/// One virtual root and its resolution policy
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct MappingEntry {
    /// Path applications observe
    pub virtual_root: PathBuf,
    /// Physical roots, highest priority first
    pub targets: Vec<PathBuf>,
    /// Behavioural flags as reported by the service
    pub flags: MappingFlags,
}

impl MappingEntry {
    pub fn new(
        virtual_root: impl Into<PathBuf>,
        target: impl Into<PathBuf>,
        flags: MappingFlags,
    ) -> Self {
        Self {
            virtual_root: virtual_root.into(),
            targets: vec![target.into()],
            flags,
        }
    }

    /// Whether `candidate` names this entry's virtual root, compared the way Windows
    /// compares paths (case-folded)
    pub fn matches_root(&self, candidate: &Path) -> bool {
        keys_equal(&self.virtual_root, candidate, true)
    }

    /// Whether `candidate` is the same table key as this entry. Keys are case-sensitive
    /// unless the entry carries `CASE_SENSITIVE_PREVENTED`.
    pub fn is_key(&self, candidate: &Path) -> bool {
        keys_equal(&self.virtual_root, candidate, self.flags.case_insensitive())
    }
}

fn keys_equal(a: &Path, b: &Path, case_insensitive: bool) -> bool {
    match (path::key(a, case_insensitive), path::key(b, case_insensitive)) {
        (Ok(a), Ok(b)) => a == b,
        _ => false,
    }
}

/// Point-in-time snapshot of one mapping table
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct MappingQueryResult {
    pub entries: Vec<MappingEntry>,
}

impl MappingQueryResult {
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Entry for `virtual_root`, if present in the snapshot
    pub fn find(&self, virtual_root: &Path) -> Option<&MappingEntry> {
        self.entries.iter().find(|e| e.matches_root(virtual_root))
    }

    pub fn contains(&self, virtual_root: &Path) -> bool {
        self.find(virtual_root).is_some()
    }
}

/// Security principal used as an alternate mapping-table selector.
///
/// Holds the binary SID exactly as the OS expects it.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct Principal {
    sid: Vec<u8>,
}

const SID_REVISION: u8 = 1;
const SID_MAX_SUB_AUTHORITIES: usize = 15;

impl Principal {
    /// Wrap binary SID bytes after validating their layout
    pub fn from_sid_bytes(sid: &[u8]) -> Result<Self> {
        if sid.len() < 8 || sid[0] != SID_REVISION {
            return Err(BindError::InvalidParameter("malformed SID header".to_string()));
        }
        let count = sid[1] as usize;
        if count > SID_MAX_SUB_AUTHORITIES || sid.len() != 8 + 4 * count {
            return Err(BindError::InvalidParameter(format!(
                "SID length {} does not match {} sub-authorities",
                sid.len(),
                count
            )));
        }
        Ok(Self { sid: sid.to_vec() })
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.sid
    }

    fn authority(&self) -> u64 {
        self.sid[2..8].iter().fold(0u64, |acc, b| (acc << 8) | *b as u64)
    }

    fn sub_authorities(&self) -> impl Iterator<Item = u32> + '_ {
        self.sid[8..]
            .chunks_exact(4)
            .map(|c| u32::from_le_bytes([c[0], c[1], c[2], c[3]]))
    }
}

impl FromStr for Principal {
    type Err = BindError;

    /// Parse the `S-1-<authority>-<sub>...` text form
    fn from_str(text: &str) -> Result<Self> {
        let bad = || BindError::InvalidParameter(format!("invalid SID string: {}", text));
        let mut parts = text.trim().split('-');
        if !matches!(parts.next(), Some("S") | Some("s")) {
            return Err(bad());
        }
        let revision: u8 = parts.next().and_then(|p| p.parse().ok()).ok_or_else(bad)?;
        if revision != SID_REVISION {
            return Err(bad());
        }

        let authority_text = parts.next().ok_or_else(bad)?;
        let hex = authority_text
            .strip_prefix("0x")
            .or_else(|| authority_text.strip_prefix("0X"));
        let authority = match hex {
            Some(hex) => u64::from_str_radix(hex, 16).map_err(|_| bad())?,
            None => authority_text.parse::<u64>().map_err(|_| bad())?,
        };
        if authority >= 1 << 48 {
            return Err(bad());
        }

        let subs = parts
            .map(|p| p.parse::<u32>().map_err(|_| bad()))
            .collect::<Result<Vec<_>>>()?;
        if subs.len() > SID_MAX_SUB_AUTHORITIES {
            return Err(bad());
        }

        let mut sid = vec![SID_REVISION, subs.len() as u8];
        sid.extend_from_slice(&authority.to_be_bytes()[2..]);
        for sub in subs {
            sid.extend_from_slice(&sub.to_le_bytes());
        }
        Principal::from_sid_bytes(&sid)
    }
}

impl fmt::Display for Principal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let authority = self.authority();
        if authority >= 1 << 32 {
            write!(f, "S-{}-0x{:012X}", self.sid[0], authority)?;
        } else {
            write!(f, "S-{}-{}", self.sid[0], authority)?;
        }
        for sub in self.sub_authorities() {
            write!(f, "-{}", sub)?;
        }
        Ok(())
    }
}

impl fmt::Debug for Principal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Principal({})", self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_principal_round_trip_text() {
        let p: Principal = "S-1-5-21-1004336348-1177238915-682003330-512".parse().unwrap();
        assert_eq!(p.as_bytes().len(), 8 + 4 * 5);
        assert_eq!(p.to_string(), "S-1-5-21-1004336348-1177238915-682003330-512");
    }

    #[test]
    fn test_principal_rejects_garbage() {
        assert!("X-1-5".parse::<Principal>().is_err());
        assert!("S-2-5-18".parse::<Principal>().is_err());
        assert!("S-1-5-abc".parse::<Principal>().is_err());
        assert!(Principal::from_sid_bytes(&[1, 2, 0, 0, 0, 0, 0, 5]).is_err());
    }

    #[test]
    fn test_local_system_bytes() {
        let p: Principal = "S-1-5-18".parse().unwrap();
        assert_eq!(p.as_bytes(), &[1, 1, 0, 0, 0, 0, 0, 5, 18, 0, 0, 0]);
    }

    #[test]
    fn test_root_lookup_is_case_folded() {
        let entry = MappingEntry::new("D:\\Virt", "D:\\phys", MappingFlags::empty());
        assert!(entry.matches_root(Path::new("D:/Virt")));
        assert!(entry.matches_root(Path::new("d:\\VIRT")));
        assert!(!entry.matches_root(Path::new("d:\\virt\\sub")));

        let listing = MappingQueryResult {
            entries: vec![entry],
        };
        assert!(listing.contains(Path::new("d:\\virt")));
    }

    #[test]
    fn test_table_key_honours_case_flag() {
        let sensitive = MappingEntry::new("D:\\Virt", "D:\\phys", MappingFlags::empty());
        assert!(sensitive.is_key(Path::new("D:/Virt")));
        assert!(!sensitive.is_key(Path::new("d:\\virt")));

        let folded = MappingEntry::new(
            "D:\\Virt",
            "D:\\phys",
            MappingFlags::CASE_SENSITIVE_PREVENTED,
        );
        assert!(folded.is_key(Path::new("d:\\virt")));
    }
}
