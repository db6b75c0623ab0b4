use crate::config::manifest::{LaunchManifest, MappingSpec};
use crate::exec::{ImageCachePolicy, ScopedLauncher};
use crate::kernel::Platform;
use crate::mapping::{BatchConfig, MappingFlags, Principal};
use crate::scope::CommandSpec;
use crate::service::{MappingClient, MappingSelector, QuerySelector};
use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "bindbox", author, version, about, long_about = None)]
pub struct Cli {
    /// Pretty-print JSON output
    #[arg(long, global = true)]
    pub pretty: bool,
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Attach the redirection filter to a volume
    Attach {
        /// Volume path, e.g. C:\
        path: PathBuf,
    },
    /// Install a mapping into the global or a principal table
    Map {
        /// Mapping (format: virtual=target[;target...][:flags])
        #[arg(value_name = "MAPPING")]
        mapping: MappingSpec,
        /// Paths under the virtual root that stay unredirected
        #[arg(long = "except", value_name = "PATH")]
        exceptions: Vec<PathBuf>,
        /// Install into the table of this SID (S-1-...) instead of the global one
        #[arg(long)]
        principal: Option<Principal>,
    },
    /// Remove a mapping from the global or a principal table
    Unmap {
        virtual_root: PathBuf,
        #[arg(long)]
        principal: Option<Principal>,
    },
    /// List installed mappings
    List {
        /// Global mappings on this volume
        #[arg(long, conflicts_with = "principal", required_unless_present = "principal")]
        volume: Option<PathBuf>,
        /// Mappings of this SID
        #[arg(long)]
        principal: Option<Principal>,
    },
    /// Compile and install a batch configuration file atomically
    Batch {
        /// File with one `virtual_root|target[;target...]|FLAGS_HEX` line per mapping
        file: PathBuf,
        /// Volumes attached as part of the install
        #[arg(long = "attach", value_name = "VOLUME")]
        attach: Vec<PathBuf>,
        #[arg(long)]
        principal: Option<Principal>,
    },
    /// Run a command inside a new scope with private mappings
    Launch {
        /// JSON launch manifest; other launch options are ignored when given
        #[arg(long, conflicts_with_all = ["mappings", "command"])]
        manifest: Option<PathBuf>,
        /// Scope mapping (format: virtual=target[;target...][:flags])
        #[arg(long = "map", value_name = "MAPPING")]
        mappings: Vec<MappingSpec>,
        /// Volumes to attach the filter to first
        #[arg(long = "attach", value_name = "VOLUME")]
        attach: Vec<PathBuf>,
        #[arg(long, value_enum, default_value_t = ImageCachePolicy::Auto)]
        image_cache: ImageCachePolicy,
        /// Run even if the loader correction fails
        #[arg(long)]
        allow_degraded_loader: bool,
        /// Append launch events as JSON lines to this file
        #[arg(long)]
        audit_log: Option<PathBuf>,
        /// Working directory of the launched process
        #[arg(long)]
        cwd: Option<PathBuf>,
        /// Program and arguments
        #[arg(last = true)]
        command: Vec<String>,
    },
}

impl Commands {
    fn command_name(&self) -> &'static str {
        match self {
            Self::Attach { .. } => "attach",
            Self::Map { .. } => "map",
            Self::Unmap { .. } => "unmap",
            Self::List { .. } => "list",
            Self::Batch { .. } => "batch",
            Self::Launch { .. } => "launch",
        }
    }
}

/// What a command printed and the exit code the process should end with
#[derive(Debug)]
pub struct CommandOutput {
    pub json: serde_json::Value,
    pub exit_code: i32,
}

impl CommandOutput {
    fn ok(json: serde_json::Value) -> Self {
        Self { json, exit_code: 0 }
    }
}

fn selector(principal: &Option<Principal>) -> MappingSelector<'_> {
    match principal {
        Some(p) => MappingSelector::Principal(p),
        None => MappingSelector::Global,
    }
}

fn launch_manifest(
    mappings: Vec<MappingSpec>,
    attach: Vec<PathBuf>,
    image_cache: ImageCachePolicy,
    allow_degraded_loader: bool,
    audit_log: Option<PathBuf>,
    cwd: Option<PathBuf>,
    command: Vec<String>,
) -> Result<LaunchManifest> {
    let (program, args) = command
        .split_first()
        .ok_or_else(|| anyhow::anyhow!("launch needs a program after `--`"))?;
    let manifest = LaunchManifest {
        command: CommandSpec {
            program: PathBuf::from(program),
            args: args.to_vec(),
            current_dir: cwd,
        },
        mappings,
        image_cache,
        allow_degraded_loader,
        attach,
        audit_log,
    };
    manifest.validate()?;
    Ok(manifest)
}

/// Execute one parsed command against `platform`
pub fn execute(command: Commands, platform: &Platform) -> Result<CommandOutput> {
    log::debug!("Executing '{}'", command.command_name());
    let client = MappingClient::new(platform.service.clone());

    match command {
        Commands::Attach { path } => {
            let result = client.attach(&path)?;
            Ok(CommandOutput::ok(serde_json::json!({
                "volume": path,
                "already_attached": result.already_attached,
            })))
        }
        Commands::Map {
            mapping,
            exceptions,
            principal,
        } => {
            let mapping = MappingSpec { exceptions, ..mapping };
            mapping.validate()?;
            mapping.install(&client, selector(&principal))?;
            Ok(CommandOutput::ok(serde_json::to_value(&mapping)?))
        }
        Commands::Unmap {
            virtual_root,
            principal,
        } => {
            client.remove(selector(&principal), &virtual_root)?;
            Ok(CommandOutput::ok(serde_json::json!({ "removed": virtual_root })))
        }
        Commands::List { volume, principal } => {
            let query = match (&volume, &principal) {
                (_, Some(p)) => QuerySelector::Principal(p),
                (Some(v), None) => QuerySelector::Volume(v.as_path()),
                (None, None) => anyhow::bail!("list needs --volume or --principal"),
            };
            let listing = client.query_all(query)?;
            Ok(CommandOutput::ok(serde_json::to_value(&listing)?))
        }
        Commands::Batch {
            file,
            attach,
            principal,
        } => {
            let text = std::fs::read_to_string(&file)
                .with_context(|| format!("Failed to read batch file {}", file.display()))?;
            let batch = client.generate_batch(&BatchConfig::from_text(text)?)?;
            client.install_batch(selector(&principal), &batch, MappingFlags::empty(), &attach)?;
            Ok(CommandOutput::ok(serde_json::json!({
                "batch_bytes": batch.len(),
                "attached": attach,
            })))
        }
        Commands::Launch {
            manifest,
            mappings,
            attach,
            image_cache,
            allow_degraded_loader,
            audit_log,
            cwd,
            command,
        } => {
            let manifest = match manifest {
                Some(path) => LaunchManifest::load(&path)?,
                None => launch_manifest(
                    mappings,
                    attach,
                    image_cache,
                    allow_degraded_loader,
                    audit_log,
                    cwd,
                    command,
                )?,
            };
            let launcher =
                ScopedLauncher::new(platform.container.clone(), platform.service.clone());
            let outcome = launcher.launch_manifest(&manifest)?;
            Ok(CommandOutput {
                json: serde_json::to_value(&outcome)?,
                exit_code: outcome.exit_code as i32,
            })
        }
    }
}

pub fn run() -> Result<()> {
    env_logger::init();

    let cli = Cli::parse();
    let platform = crate::kernel::create_platform().context("No usable redirection platform")?;
    log::debug!("Using {:?}", platform);

    let output = execute(cli.command, &platform)?;
    let text = if cli.pretty {
        serde_json::to_string_pretty(&output.json)?
    } else {
        serde_json::to_string(&output.json)?
    };
    println!("{}", text);

    if output.exit_code != 0 {
        std::process::exit(output.exit_code);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::SimulatedHost;
    use std::sync::Arc;

    fn platform(host: &SimulatedHost) -> Platform {
        Platform {
            container: Arc::new(host.clone()),
            service: Arc::new(host.clone()),
        }
    }

    fn run_args(host: &SimulatedHost, args: &[&str]) -> Result<CommandOutput> {
        let cli = Cli::try_parse_from(std::iter::once("bindbox").chain(args.iter().copied()))?;
        execute(cli.command, &platform(host))
    }

    #[test]
    fn test_attach_reports_prior_state() {
        let host = SimulatedHost::new();
        let first = run_args(&host, &["attach", "D:\\"]).unwrap();
        assert_eq!(first.json["already_attached"], false);
        let second = run_args(&host, &["attach", "D:\\"]).unwrap();
        assert_eq!(second.json["already_attached"], true);
    }

    #[test]
    fn test_map_list_unmap() {
        let host = SimulatedHost::new();
        run_args(&host, &["map", "D:\\virt=D:\\phys:ro"]).unwrap();

        let listed = run_args(&host, &["list", "--volume", "D:\\"]).unwrap();
        let entries = listed.json["entries"].as_array().unwrap();
        assert_eq!(entries.len(), 1);

        run_args(&host, &["unmap", "D:\\virt"]).unwrap();
        let listed = run_args(&host, &["list", "--volume", "D:\\"]).unwrap();
        assert!(listed.json["entries"].as_array().unwrap().is_empty());
        assert!(run_args(&host, &["unmap", "D:\\virt"]).is_err());
    }

    #[test]
    fn test_launch_exit_code_propagates() {
        let host = SimulatedHost::new();
        host.add_file("D:\\phys\\data.txt", "hello");
        host.register_program("C:\\tools\\reader.exe", |p| {
            match p.read_file("D:\\virt\\data.txt") {
                Ok(bytes) if bytes == b"hello" => 7,
                _ => 1,
            }
        });

        let output = run_args(
            &host,
            &["launch", "--map", "D:\\virt=D:\\phys", "--", "C:\\tools\\reader.exe"],
        )
        .unwrap();
        assert_eq!(output.exit_code, 7);
        assert_eq!(output.json["exit_code"], 7);
        assert_eq!(host.live_scopes(), 0);
    }

    #[test]
    fn test_launch_requires_program() {
        let host = SimulatedHost::new();
        assert!(run_args(&host, &["launch", "--map", "D:\\virt=D:\\phys"]).is_err());
    }

    #[test]
    fn test_list_needs_selector() {
        assert!(Cli::try_parse_from(["bindbox", "list"]).is_err());
    }
}
