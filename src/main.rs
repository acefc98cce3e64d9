//! enclave-broker: command-line access to Secure Enclave keys
//!
//! Prints one JSON object per command on stdout, in the same shape the
//! helper itself emits. Logs go to stderr.

use std::path::PathBuf;

use anyhow::Context;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use clap::{Parser, Subcommand};
use tracing::info;

use enclave_broker::{
    BrokerConfig, EnclaveBroker, GenerateOptions, InvocationResponse, KeyHandle, SignOptions,
};

#[derive(Parser)]
#[command(name = "enclave-broker")]
#[command(about = "Generate and use Secure Enclave keys through the embedded helper")]
struct Cli {
    /// Path to configuration file
    #[arg(short, long, default_value = "enclave-broker.toml")]
    config: PathBuf,

    /// Root directory for staging the helper (overrides config file)
    #[arg(long, env = "ENCLAVE_BROKER_STAGING_DIR")]
    staging_dir: Option<PathBuf>,

    /// Invocation deadline in seconds, 0 for none (overrides config file)
    #[arg(long, env = "ENCLAVE_BROKER_TIMEOUT_SECS")]
    timeout_secs: Option<u64>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Report whether the Secure Enclave is available
    Available,

    /// Generate a new enclave key
    Generate {
        /// Require biometric confirmation to use the key
        #[arg(long)]
        require_biometry: bool,

        /// Only allow use while the device is unlocked
        #[arg(long)]
        require_unlocked: bool,

        /// Program name shown in consent prompts
        #[arg(long)]
        display_name: Option<String>,
    },

    /// Sign data with a previously generated key
    Sign {
        /// Base64 key handle returned by `generate`
        #[arg(long)]
        key: String,

        /// Base64 data to sign
        #[arg(long, conflicts_with = "data_file", required_unless_present = "data_file")]
        data: Option<String>,

        /// File whose contents are signed
        #[arg(long)]
        data_file: Option<PathBuf>,

        /// Program name shown in consent prompts
        #[arg(long)]
        display_name: Option<String>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("enclave_broker=info".parse()?),
        )
        .init();

    let cli = Cli::parse();

    let mut config = BrokerConfig::load(&cli.config)?;

    // Apply CLI overrides
    if let Some(staging_dir) = cli.staging_dir {
        config.staging_dir = Some(staging_dir);
    }
    if let Some(timeout_secs) = cli.timeout_secs {
        config.timeout_secs = timeout_secs;
    }

    let broker = EnclaveBroker::embedded(config);

    let output = match cli.command {
        Command::Available => {
            let available = broker.is_available().await?;
            info!("Secure Enclave available: {}", available);
            InvocationResponse {
                is_available: available,
                ..Default::default()
            }
        }
        Command::Generate {
            require_biometry,
            require_unlocked,
            display_name,
        } => {
            let options = GenerateOptions {
                require_biometry,
                require_unlocked,
                display_name,
                timeout: None,
            };
            let (handle, public_key) = broker.generate(Some(options)).await?;
            InvocationResponse {
                is_available: true,
                private_key: handle.into_bytes(),
                public_key: public_key.as_der().to_vec(),
                ..Default::default()
            }
        }
        Command::Sign {
            key,
            data,
            data_file,
            display_name,
        } => {
            let handle = KeyHandle::from_base64(&key).context("--key is not valid base64")?;
            let data = match (data, data_file) {
                (Some(encoded), _) => STANDARD
                    .decode(encoded)
                    .context("--data is not valid base64")?,
                (None, Some(path)) => std::fs::read(&path)
                    .with_context(|| format!("Failed to read {}", path.display()))?,
                (None, None) => anyhow::bail!("one of --data or --data-file is required"),
            };

            let mut options = SignOptions::new(handle, data);
            options.display_name = display_name;
            let signature = broker.sign(options).await?;
            InvocationResponse {
                is_available: true,
                signature,
                ..Default::default()
            }
        }
    };

    println!("{}", serde_json::to_string(&output.to_record())?);
    Ok(())
}
