//! Mapping flags understood by the redirection service.

use crate::config::types::{BindError, Result};
use bitflags::bitflags;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

bitflags! {
    /// Behavioural flags attached to one mapping entry.
    ///
    /// Bit values are the service's wire values; unknown bits reported by the service are
    /// retained when a listing is decoded.
    #[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
    pub struct MappingFlags: u32 {
        /// Writes through a non-merged mapping are refused
        const READ_ONLY = 0x0000_0001;
        /// Targets accumulate and are presented as one directory
        const MERGED = 0x0000_0002;
        /// Entry lives in the scope's private table
        const USE_SCOPE_LOCAL_TABLE = 0x0000_0004;
        const REPARSE_ON_FILES = 0x0000_0008;
        /// Only valid together with READ_ONLY
        const SKIP_SHARING_CHECK = 0x0000_0010;
        const CLOUD_FILES_EXCEPTION_POINTS = 0x0000_0020;
        /// Installing fails if the mapping would resolve to more than one target
        const SINGLE_TARGET_ONLY = 0x0000_0040;
        /// Backing store is asserted immutable, enabling name caching
        const IMMUTABLE_BACKING = 0x0000_0080;
        /// Key comparison is forced case-insensitive
        const CASE_SENSITIVE_PREVENTED = 0x0000_0100;
        /// Installing fails with PathNotFound unless the parent root is mapped
        const REQUIRE_PARENT_MAPPED = 0x0000_0200;
        const NO_REPARSE_ON_ROOT = 0x1000_0000;
        const BATCHED_REMOVE = 0x2000_0000;
    }
}

const FLAG_NAMES: &[(&str, MappingFlags)] = &[
    ("read_only", MappingFlags::READ_ONLY),
    ("merged", MappingFlags::MERGED),
    ("scope_local", MappingFlags::USE_SCOPE_LOCAL_TABLE),
    ("reparse_on_files", MappingFlags::REPARSE_ON_FILES),
    ("skip_sharing_check", MappingFlags::SKIP_SHARING_CHECK),
    ("cloud_files_ecps", MappingFlags::CLOUD_FILES_EXCEPTION_POINTS),
    ("single_target", MappingFlags::SINGLE_TARGET_ONLY),
    ("immutable_backing", MappingFlags::IMMUTABLE_BACKING),
    ("case_insensitive", MappingFlags::CASE_SENSITIVE_PREVENTED),
    ("require_parent", MappingFlags::REQUIRE_PARENT_MAPPED),
    ("no_reparse_on_root", MappingFlags::NO_REPARSE_ON_ROOT),
    ("batched_remove", MappingFlags::BATCHED_REMOVE),
];

impl MappingFlags {
    /// Parse one flag name, accepting the short aliases used on the command line
    pub fn parse_name(name: &str) -> Result<Self> {
        let name = name.trim().to_ascii_lowercase();
        let alias = match name.as_str() {
            "ro" => "read_only",
            "merge" => "merged",
            "local" => "scope_local",
            "single" => "single_target",
            "nocase" => "case_insensitive",
            other => other,
        };
        FLAG_NAMES
            .iter()
            .find(|(n, _)| *n == alias)
            .map(|(_, f)| *f)
            .ok_or_else(|| BindError::Config(format!("Unknown mapping flag: {}", name)))
    }

    /// Parse a comma-separated flag list
    pub fn parse_list(list: &str) -> Result<Self> {
        let mut flags = MappingFlags::empty();
        for name in list.split(',').filter(|s| !s.trim().is_empty()) {
            flags |= Self::parse_name(name)?;
        }
        Ok(flags)
    }

    /// Names of the known flags set in `self`, in bit order
    pub fn names(&self) -> Vec<&'static str> {
        FLAG_NAMES
            .iter()
            .filter(|(_, f)| self.contains(*f))
            .map(|(n, _)| *n)
            .collect()
    }

    /// Whether keys under this entry compare case-insensitively
    pub fn case_insensitive(&self) -> bool {
        self.contains(MappingFlags::CASE_SENSITIVE_PREVENTED)
    }
}

impl Serialize for MappingFlags {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.collect_seq(self.names())
    }
}

impl<'de> Deserialize<'de> for MappingFlags {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let names = Vec::<String>::deserialize(deserializer)?;
        let mut flags = MappingFlags::empty();
        for name in names {
            flags |= MappingFlags::parse_name(&name).map_err(serde::de::Error::custom)?;
        }
        Ok(flags)
    }
}

bitflags! {
    /// Selector bits for a mapping query; exactly one is set per call
    #[derive(Clone, Copy, Debug, PartialEq, Eq)]
    pub struct QueryFlags: u32 {
        const VOLUME = 0x0000_0001;
        const SCOPE = 0x0000_0002;
        const PRINCIPAL = 0x0000_0004;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_list_with_aliases() {
        let flags = MappingFlags::parse_list("ro,merge").unwrap();
        assert_eq!(flags, MappingFlags::READ_ONLY | MappingFlags::MERGED);
        assert_eq!(flags.bits(), 0x3);
    }

    #[test]
    fn test_unknown_flag_rejected() {
        assert!(MappingFlags::parse_list("ro,bogus").is_err());
    }

    #[test]
    fn test_serde_uses_names() {
        let flags = MappingFlags::MERGED | MappingFlags::NO_REPARSE_ON_ROOT;
        let json = serde_json::to_string(&flags).unwrap();
        assert_eq!(json, r#"["merged","no_reparse_on_root"]"#);
        let back: MappingFlags = serde_json::from_str(&json).unwrap();
        assert_eq!(back, flags);
    }

    #[test]
    fn test_unknown_bits_retained() {
        let flags = MappingFlags::from_bits_retain(0x4000_0001);
        assert!(flags.contains(MappingFlags::READ_ONLY));
        assert_eq!(flags.bits(), 0x4000_0001);
    }
}
