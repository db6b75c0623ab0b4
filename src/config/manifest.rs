/// Launch manifests and mapping specifications
///
/// A manifest is the JSON description of one scoped launch: the command, the mappings to
/// install into the scope, and the loader policy. Mappings can also be written in a compact
/// string form for the command line.
use crate::config::types::{BindError, Result};
use crate::exec::launcher::{ImageCachePolicy, MappingSetup};
use crate::mapping::{path, MappingFlags};
use crate::scope::{CommandSpec, Scope};
use crate::service::{MappingClient, MappingSelector};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// One virtual root and the targets bound to it
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct MappingSpec {
    pub virtual_root: PathBuf,
    /// Installed in order; more than one requires `merged`
    pub targets: Vec<PathBuf>,
    #[serde(default = "MappingFlags::empty")]
    pub flags: MappingFlags,
    #[serde(default)]
    pub exceptions: Vec<PathBuf>,
}

/// Split off a trailing `:flags` suffix. Drive letters also contain ':' so the suffix only
/// counts when it holds no path separator.
fn split_options(text: &str) -> (&str, &str) {
    match text.rsplit_once(':') {
        Some((head, tail))
            if !tail.is_empty() && !tail.contains(['\\', '/']) && head.contains('=') =>
        {
            (head, tail)
        }
        _ => (text, ""),
    }
}

impl MappingSpec {
    /// Parse `virtual=target[;target...][:flag,flag...]`
    pub fn parse(spec: &str) -> Result<Self> {
        let (paths, options) = split_options(spec.trim());
        let (root, targets) = paths.split_once('=').ok_or_else(|| {
            BindError::Config(format!(
                "Invalid mapping '{}'. Use: virtual=target or virtual=target1;target2:flags",
                spec
            ))
        })?;

        let mapping = MappingSpec {
            virtual_root: PathBuf::from(root.trim()),
            targets: targets
                .split(';')
                .map(str::trim)
                .filter(|t| !t.is_empty())
                .map(PathBuf::from)
                .collect(),
            flags: MappingFlags::parse_list(options)?,
            exceptions: Vec::new(),
        };
        mapping.validate()?;
        Ok(mapping)
    }

    pub fn validate(&self) -> Result<()> {
        path::segments(&self.virtual_root)
            .map_err(|e| BindError::Config(format!("virtual root: {}", e)))?;
        if self.targets.is_empty() {
            return Err(BindError::Config(format!(
                "mapping for {} has no target",
                self.virtual_root.display()
            )));
        }
        for target in &self.targets {
            path::segments(target).map_err(|e| BindError::Config(format!("target: {}", e)))?;
        }
        if self.targets.len() > 1 && !self.flags.contains(MappingFlags::MERGED) {
            return Err(BindError::Config(format!(
                "mapping for {} lists {} targets but is not merged",
                self.virtual_root.display(),
                self.targets.len()
            )));
        }
        Ok(())
    }

    /// Install every target, in order, into the selected table
    pub fn install(&self, client: &MappingClient, selector: MappingSelector<'_>) -> Result<()> {
        for target in &self.targets {
            client.install(selector, &self.virtual_root, target, self.flags, &self.exceptions)?;
        }
        Ok(())
    }
}

impl std::str::FromStr for MappingSpec {
    type Err = BindError;

    fn from_str(s: &str) -> Result<Self> {
        MappingSpec::parse(s)
    }
}

/// Mapping setup that installs a fixed list of specs into the launch scope
#[derive(Clone, Debug, Default)]
pub struct MappingPlan {
    pub mappings: Vec<MappingSpec>,
}

impl MappingPlan {
    pub fn new(mappings: Vec<MappingSpec>) -> Self {
        Self { mappings }
    }
}

impl MappingSetup for MappingPlan {
    fn configure(&mut self, scope: &Scope, client: &MappingClient) -> Result<()> {
        for mapping in &self.mappings {
            mapping.install(client, MappingSelector::Scope(scope))?;
        }
        Ok(())
    }
}

/// JSON description of one scoped launch
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct LaunchManifest {
    pub command: CommandSpec,
    #[serde(default)]
    pub mappings: Vec<MappingSpec>,
    #[serde(default)]
    pub image_cache: ImageCachePolicy,
    /// Run even if the loader correction fails
    #[serde(default)]
    pub allow_degraded_loader: bool,
    /// Volumes the filter is attached to before the launch
    #[serde(default)]
    pub attach: Vec<PathBuf>,
    #[serde(default)]
    pub audit_log: Option<PathBuf>,
}

impl LaunchManifest {
    pub fn from_json(text: &str) -> Result<Self> {
        let manifest: LaunchManifest = serde_json::from_str(text)
            .map_err(|e| BindError::Config(format!("Invalid launch manifest: {}", e)))?;
        manifest.validate()?;
        Ok(manifest)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|e| {
            BindError::Config(format!("Failed to read manifest {}: {}", path.display(), e))
        })?;
        Self::from_json(&text)
    }

    pub fn validate(&self) -> Result<()> {
        if self.command.program.as_os_str().is_empty() {
            return Err(BindError::Config("manifest command has no program".to_string()));
        }
        for mapping in &self.mappings {
            mapping.validate()?;
        }
        for volume in &self.attach {
            path::segments(volume).map_err(|e| BindError::Config(format!("attach path: {}", e)))?;
        }
        Ok(())
    }

    pub fn plan(&self) -> MappingPlan {
        MappingPlan::new(self.mappings.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_plain_mapping() {
        let spec = MappingSpec::parse("D:\\virt=D:\\phys").unwrap();
        assert_eq!(spec.virtual_root, PathBuf::from("D:\\virt"));
        assert_eq!(spec.targets, vec![PathBuf::from("D:\\phys")]);
        assert!(spec.flags.is_empty());
    }

    #[test]
    fn test_parse_merged_with_flags() {
        let spec: MappingSpec = "D:\\v=D:\\p1;D:\\p2;D:\\p3:ro,merge".parse().unwrap();
        assert_eq!(spec.targets.len(), 3);
        assert_eq!(spec.flags, MappingFlags::READ_ONLY | MappingFlags::MERGED);
    }

    #[test]
    fn test_parse_rejects_bad_specs() {
        assert!(MappingSpec::parse("D:\\only-a-root").is_err());
        assert!(MappingSpec::parse("D:\\v=").is_err());
        assert!(MappingSpec::parse("D:\\v=D:\\a;D:\\b").is_err());
        assert!(MappingSpec::parse("D:\\v=D:\\a:bogus").is_err());
    }

    #[test]
    fn test_drive_letter_is_not_a_flag_suffix() {
        assert_eq!(split_options("D:\\v=E:\\p"), ("D:\\v=E:\\p", ""));
        assert_eq!(split_options("D:\\v=E:\\p:ro"), ("D:\\v=E:\\p", "ro"));
    }

    #[test]
    fn test_manifest_from_json() {
        let manifest = LaunchManifest::from_json(
            r#"{
                "command": { "program": "C:\\Windows\\System32\\cmd.exe", "args": ["/c", "dir"] },
                "mappings": [
                    { "virtual_root": "D:\\v", "targets": ["D:\\p"], "flags": ["read_only"] }
                ],
                "image_cache": "always"
            }"#,
        )
        .unwrap();
        assert_eq!(manifest.command.args, vec!["/c", "dir"]);
        assert_eq!(manifest.mappings[0].flags, MappingFlags::READ_ONLY);
        assert_eq!(manifest.image_cache, ImageCachePolicy::Always);
        assert!(!manifest.allow_degraded_loader);
    }

    #[test]
    fn test_manifest_rejects_unknown_flag() {
        let err = LaunchManifest::from_json(
            r#"{
                "command": { "program": "a.exe" },
                "mappings": [
                    { "virtual_root": "D:\\v", "targets": ["D:\\p"], "flags": ["sticky"] }
                ]
            }"#,
        )
        .unwrap_err();
        assert!(matches!(err, BindError::Config(_)));
    }
}
