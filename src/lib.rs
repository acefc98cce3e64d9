//! enclave-broker: Secure Enclave keys through an embedded helper
//!
//! Only the helper executable talks to the secure hardware. This crate
//! stages it from an embedded payload for each call, runs it with a fixed
//! argument protocol, decodes the single JSON record it prints, and removes
//! every staged file before returning.
//!
//! ```no_run
//! # async fn demo() -> enclave_broker::Result<()> {
//! use enclave_broker::{EnclaveBroker, BrokerConfig, SignOptions};
//!
//! let broker = EnclaveBroker::embedded(BrokerConfig::default());
//! if broker.is_available().await? {
//!     let (handle, public_key) = broker.generate(None).await?;
//!     let signature = broker.sign(SignOptions::new(handle, b"payload".to_vec())).await?;
//!     assert!(public_key.verify(b"payload", &signature));
//! }
//! # Ok(())
//! # }
//! ```

pub mod broker;
pub mod config;
pub mod decoder;
pub mod error;
pub mod invoker;
pub mod payload;
pub mod staging;

pub use broker::{EnclaveBroker, EnclavePublicKey, GenerateOptions, KeyHandle, SignOptions};
pub use config::{BrokerConfig, ConfigError};
pub use decoder::{HelperRecord, InvocationResponse};
pub use error::{BrokerError, DecodeError, Result, StagingError};
pub use invoker::{HelperInvoker, InvocationRequest, StagedHelper};
pub use payload::HelperPayload;

/// Probe the secure hardware using the embedded helper and default config
pub async fn is_available() -> Result<bool> {
    EnclaveBroker::embedded(BrokerConfig::default())
        .is_available()
        .await
}

/// Generate a key using the embedded helper and default config
pub async fn generate(options: Option<GenerateOptions>) -> Result<(KeyHandle, EnclavePublicKey)> {
    EnclaveBroker::embedded(BrokerConfig::default())
        .generate(options)
        .await
}

/// Sign using the embedded helper and default config
pub async fn sign(options: SignOptions) -> Result<Vec<u8>> {
    EnclaveBroker::embedded(BrokerConfig::default())
        .sign(options)
        .await
}
