/// Batched mapping configuration.
///
/// The service compiles a raw wide-string configuration into an opaque blob
/// (`GenerateBatch`) which is then installed in one step (`InstallBatch`). The blob is never
/// interpreted by bindbox; only the service that produced it knows its layout.
use crate::config::types::{BindError, Result};
use crate::mapping::entry::MappingEntry;

/// Raw configuration text handed to the service for compilation
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BatchConfig {
    text: String,
}

impl BatchConfig {
    pub fn from_text(text: impl Into<String>) -> Result<Self> {
        let text = text.into();
        if text.trim().is_empty() {
            return Err(BindError::InvalidConfig("empty batch configuration".to_string()));
        }
        if text.contains('\0') {
            return Err(BindError::InvalidConfig("batch configuration contains NUL".to_string()));
        }
        Ok(Self { text })
    }

    /// Render entries in the line form `virtual_root|target[;target...]|flags_hex`
    pub fn from_entries(entries: &[MappingEntry]) -> Result<Self> {
        let lines: Vec<String> = entries
            .iter()
            .map(|e| {
                let targets: Vec<String> = e
                    .targets
                    .iter()
                    .map(|t| t.to_string_lossy().into_owned())
                    .collect();
                format!(
                    "{}|{}|{:08X}",
                    e.virtual_root.to_string_lossy(),
                    targets.join(";"),
                    e.flags.bits()
                )
            })
            .collect();
        Self::from_text(lines.join("\n"))
    }

    pub fn as_str(&self) -> &str {
        &self.text
    }

    /// UTF-16 units as passed to the service (no terminator; the size is explicit)
    pub fn to_wide(&self) -> Vec<u16> {
        self.text.encode_utf16().collect()
    }
}

/// Compiled batch produced by the service
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BatchHandle {
    blob: Vec<u8>,
}

impl BatchHandle {
    pub(crate) fn from_blob(blob: Vec<u8>) -> Self {
        Self { blob }
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.blob
    }

    pub fn len(&self) -> usize {
        self.blob.len()
    }

    pub fn is_empty(&self) -> bool {
        self.blob.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mapping::flags::MappingFlags;

    #[test]
    fn test_from_entries_line_form() {
        let entries = vec![MappingEntry::new("D:\\v", "D:\\p", MappingFlags::READ_ONLY)];
        let config = BatchConfig::from_entries(&entries).unwrap();
        assert_eq!(config.as_str(), "D:\\v|D:\\p|00000001");
    }

    #[test]
    fn test_empty_config_rejected() {
        assert!(matches!(
            BatchConfig::from_text("   "),
            Err(BindError::InvalidConfig(_))
        ));
        assert!(BatchConfig::from_entries(&[]).is_err());
    }
}
