//! mender-artifact CLI
//!
//! Entry point for the `mender-artifact` command-line tool.

use clap::{Parser, Subcommand};
use mender_artifact::commands::{
    self, CommandError, ModifyArgs, ReadArgs, SignArgs, ValidateArgs, WriteRootfsArgs,
    EXIT_INVALID_PARAMETERS, EXIT_OK,
};
use mender_artifact::config::{EffectiveConfig, ToolConfig};
use serde_json::{json, Map, Value};
use std::io;
use std::path::{Path, PathBuf};
use std::process;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "mender-artifact")]
#[command(about = "Mender artifact read/writer", version)]
struct Cli {
    /// Path to a TOML config file
    #[arg(long, global = true, env = "MENDER_ARTIFACT_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Writes artifact file
    Write {
        #[command(subcommand)]
        kind: WriteCommands,
    },

    /// Reads artifact file
    Read {
        /// Artifact to read
        path: PathBuf,

        /// Full path to the public key used to verify the artifact signature
        #[arg(long, short = 'k')]
        key: Option<PathBuf>,
    },

    /// Validates artifact file
    Validate {
        /// Artifact to validate
        path: PathBuf,

        /// Full path to the public key used to verify the artifact signature
        #[arg(long, short = 'k')]
        key: Option<PathBuf>,
    },

    /// Signs existing artifact file
    Sign {
        /// Artifact to sign
        path: PathBuf,

        /// Full path to the private key used to sign the artifact
        #[arg(long, short = 'k')]
        key: Option<PathBuf>,

        /// Full path to the signed artifact; replaces the input when not given
        #[arg(long, short = 'o')]
        output_path: Option<PathBuf>,

        /// Force creating a new signature if the artifact is already signed
        #[arg(long, short = 'f')]
        force: bool,
    },

    /// Modifies image or artifact file
    Modify {
        /// Artifact or image to modify
        path: PathBuf,

        /// Full path to the private key used to sign the artifact after modifying
        #[arg(long, short = 'k')]
        key: Option<PathBuf>,

        /// Server URI replacing the configured one
        #[arg(long, short = 'u')]
        server_uri: Option<String>,

        /// Full path to the certificate the client uses to validate the server
        #[arg(long, short = 'c')]
        server_cert: Option<PathBuf>,

        /// Full path to the public key the client uses to verify artifacts
        #[arg(long, short = 'v')]
        verification_key: Option<PathBuf>,

        /// New name of the artifact
        #[arg(long, short = 'n')]
        name: Option<String>,

        /// Tenant token of the client
        #[arg(long, short = 't')]
        tenant_token: Option<String>,
    },
}

#[derive(Subcommand)]
enum WriteCommands {
    /// Writes a root filesystem image artifact
    RootfsImage {
        /// Update file
        #[arg(long, short = 'u')]
        update: Option<PathBuf>,

        /// Compatible device type; repeat for several devices
        #[arg(long, short = 't')]
        device_type: Vec<String>,

        /// Name of the artifact
        #[arg(long, short = 'n')]
        artifact_name: Option<String>,

        /// Full path to the output artifact file
        #[arg(long, short = 'o')]
        output_path: Option<PathBuf>,

        /// Artifact format version
        #[arg(long = "version", short = 'v')]
        format_version: Option<u32>,

        /// Full path to the private key used to sign the artifact
        #[arg(long, short = 'k')]
        key: Option<PathBuf>,

        /// State script file or directory; repeat for several
        #[arg(long, short = 's')]
        script: Vec<PathBuf>,

        /// Archive compression (gzip, none)
        #[arg(long)]
        compression: Option<String>,
    },
}

fn main() {
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(e) => {
            let code = if e.use_stderr() {
                EXIT_INVALID_PARAMETERS
            } else {
                EXIT_OK
            };
            let _ = e.print();
            process::exit(code);
        }
    };

    init_logging();

    let result = match cli.command {
        Commands::Write { kind } => match kind {
            WriteCommands::RootfsImage {
                update,
                device_type,
                artifact_name,
                output_path,
                format_version,
                key,
                script,
                compression,
            } => {
                let overrides = cli_overrides(output_path.as_deref(), format_version, compression);
                load_config(cli.config.as_deref(), overrides).and_then(|config| {
                    let args = WriteRootfsArgs {
                        update,
                        device_types: device_type,
                        artifact_name,
                        key,
                        scripts: script,
                    };
                    commands::write_rootfs_image(&args, &config).map(|_| ())
                })
            }
        },
        Commands::Read { path, key } => {
            commands::read(&ReadArgs { path, key }, &mut io::stdout().lock()).map(|_| ())
        }
        Commands::Validate { path, key } => {
            commands::validate(&ValidateArgs { path, key }, &mut io::stdout().lock()).map(|_| ())
        }
        Commands::Sign {
            path,
            key,
            output_path,
            force,
        } => load_config(cli.config.as_deref(), None).and_then(|config| {
            let args = SignArgs {
                path,
                key,
                output_path,
                force,
            };
            commands::sign(&args, &config).map(|_| ())
        }),
        Commands::Modify {
            path,
            key,
            server_uri,
            server_cert,
            verification_key,
            name,
            tenant_token,
        } => load_config(cli.config.as_deref(), None).and_then(|config| {
            let args = ModifyArgs {
                path,
                key,
                server_uri,
                server_cert,
                verification_key,
                artifact_name: name,
                tenant_token,
            };
            commands::modify(&args, &config, None).map(|_| ())
        }),
    };

    if let Err(e) = result {
        eprintln!("Error: {}", e);
        process::exit(e.exit_code());
    }
}

fn init_logging() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("mender_artifact=warn,mender_format=warn"));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(io::stderr)
        .init();
}

fn load_config(path: Option<&Path>, overrides: Option<Value>) -> Result<ToolConfig, CommandError> {
    Ok(EffectiveConfig::build(path, overrides)?.resolve()?)
}

/// Config layer holding only the flags that were given
fn cli_overrides(
    output_path: Option<&Path>,
    format_version: Option<u32>,
    compression: Option<String>,
) -> Option<Value> {
    let mut layer = Map::new();
    if let Some(path) = output_path {
        layer.insert("output_path".to_string(), json!(path.to_string_lossy()));
    }
    let mut format = Map::new();
    if let Some(version) = format_version {
        format.insert("version".to_string(), json!(version));
    }
    if let Some(compression) = compression {
        format.insert("compression".to_string(), json!(compression));
    }
    if !format.is_empty() {
        layer.insert("format".to_string(), Value::Object(format));
    }
    (!layer.is_empty()).then_some(Value::Object(layer))
}
