//! Capability API
//!
//! `is_available`, `generate` and `sign` build the helper's argument vector,
//! hand it to a [`HelperInvoker`], and turn the decoded record into typed
//! results. The key handle is opaque here; only the helper understands it.

use std::fmt;
use std::time::Duration;

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use p256::ecdsa::signature::Verifier;
use p256::ecdsa::{Signature, VerifyingKey};
use p256::pkcs8::DecodePublicKey;
use tracing::{debug, info};

use crate::config::BrokerConfig;
use crate::error::{BrokerError, Result};
use crate::invoker::{HelperInvoker, InvocationRequest, StagedHelper};
use crate::payload::HelperPayload;
use crate::staging::validate_file_name;

// =============================================================================
// Helper argument protocol
// =============================================================================

pub const ARG_GENERATE: &str = "--generate";
pub const ARG_REQUIRE_BIOMETRY: &str = "--requireBiometry";
pub const ARG_REQUIRE_UNLOCKED: &str = "--requireUnlocked";
pub const ARG_KEY: &str = "--key";
pub const ARG_DATA: &str = "--data";

// =============================================================================
// Types
// =============================================================================

/// Opaque key handle produced by `generate` and presented to `sign`
#[derive(Clone, PartialEq, Eq)]
pub struct KeyHandle(Vec<u8>);

impl KeyHandle {
    pub fn new(bytes: Vec<u8>) -> Self {
        Self(bytes)
    }

    pub fn from_base64(encoded: &str) -> std::result::Result<Self, base64::DecodeError> {
        STANDARD.decode(encoded).map(Self)
    }

    pub fn to_base64(&self) -> String {
        STANDARD.encode(&self.0)
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.0
    }
}

impl From<Vec<u8>> for KeyHandle {
    fn from(bytes: Vec<u8>) -> Self {
        Self(bytes)
    }
}

impl fmt::Debug for KeyHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "KeyHandle({} bytes)", self.0.len())
    }
}

/// P-256 public key of an enclave-held key
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnclavePublicKey {
    key: p256::PublicKey,
    der: Vec<u8>,
}

impl EnclavePublicKey {
    /// Parse a SubjectPublicKeyInfo (PKIX) DER encoding
    pub fn from_der(der: &[u8]) -> std::result::Result<Self, p256::pkcs8::spki::Error> {
        let key = p256::PublicKey::from_public_key_der(der)?;
        Ok(Self {
            key,
            der: der.to_vec(),
        })
    }

    pub fn as_der(&self) -> &[u8] {
        &self.der
    }

    pub fn public_key(&self) -> &p256::PublicKey {
        &self.key
    }

    pub fn verifying_key(&self) -> VerifyingKey {
        VerifyingKey::from(&self.key)
    }

    /// Check a DER-encoded ECDSA P-256/SHA-256 signature over `data`
    pub fn verify(&self, data: &[u8], der_signature: &[u8]) -> bool {
        match Signature::from_der(der_signature) {
            Ok(signature) => self.verifying_key().verify(data, &signature).is_ok(),
            Err(_) => false,
        }
    }
}

/// Key generation policy
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GenerateOptions {
    /// Require biometric confirmation for each use of the key
    pub require_biometry: bool,
    /// Only allow use while the device is unlocked
    pub require_unlocked: bool,
    /// Program name shown in consent prompts
    pub display_name: Option<String>,
    pub timeout: Option<Duration>,
}

/// Signing request
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SignOptions {
    pub private_key_handle: Option<KeyHandle>,
    pub data: Option<Vec<u8>>,
    /// Program name shown in consent prompts
    pub display_name: Option<String>,
    pub timeout: Option<Duration>,
}

impl SignOptions {
    pub fn new(handle: KeyHandle, data: impl Into<Vec<u8>>) -> Self {
        Self {
            private_key_handle: Some(handle),
            data: Some(data.into()),
            ..Default::default()
        }
    }

    pub fn with_display_name(mut self, display_name: impl Into<String>) -> Self {
        self.display_name = Some(display_name.into());
        self
    }
}

// =============================================================================
// Broker
// =============================================================================

/// Entry point for enclave operations
pub struct EnclaveBroker<I = StagedHelper> {
    invoker: I,
}

impl EnclaveBroker<StagedHelper> {
    /// Broker running the helper embedded in this build
    pub fn embedded(config: BrokerConfig) -> Self {
        Self::new(StagedHelper::embedded(config))
    }

    pub fn with_payload(payload: HelperPayload, config: BrokerConfig) -> Self {
        Self::new(StagedHelper::new(payload, config))
    }
}

impl<I: HelperInvoker> EnclaveBroker<I> {
    pub fn new(invoker: I) -> Self {
        Self { invoker }
    }

    pub fn invoker(&self) -> &I {
        &self.invoker
    }

    /// Whether the secure hardware can be used on this machine.
    ///
    /// Missing hardware is `Ok(false)`; only broker failures are errors.
    pub async fn is_available(&self) -> Result<bool> {
        let response = self.invoker.invoke(InvocationRequest::probe()).await?;
        debug!(available = response.is_available, "Probed secure enclave");
        Ok(response.is_available)
    }

    /// Create a new enclave key
    pub async fn generate(
        &self,
        options: Option<GenerateOptions>,
    ) -> Result<(KeyHandle, EnclavePublicKey)> {
        let options = options.unwrap_or_default();
        check_display_name(options.display_name.as_deref())?;

        let request = InvocationRequest::new(generate_args(&options))
            .with_display_name(options.display_name)
            .with_timeout(options.timeout);
        let response = self.invoker.invoke(request).await?;

        let handle = KeyHandle::new(response.require_private_key()?.to_vec());
        let public_key = EnclavePublicKey::from_der(response.require_public_key()?)
            .map_err(BrokerError::KeyParse)?;

        info!(
            handle_bytes = handle.as_bytes().len(),
            require_biometry = options.require_biometry,
            require_unlocked = options.require_unlocked,
            "Generated enclave key"
        );
        Ok((handle, public_key))
    }

    /// Sign `options.data` with the key behind `options.private_key_handle`.
    ///
    /// Returns a DER-encoded ECDSA signature.
    pub async fn sign(&self, options: SignOptions) -> Result<Vec<u8>> {
        let handle = options
            .private_key_handle
            .as_ref()
            .ok_or_else(|| BrokerError::InvalidArgument("private key handle is required".into()))?;
        if handle.as_bytes().is_empty() {
            return Err(BrokerError::InvalidArgument(
                "private key handle is empty".into(),
            ));
        }
        let data = options
            .data
            .as_deref()
            .ok_or_else(|| BrokerError::InvalidArgument("data to sign is required".into()))?;
        check_display_name(options.display_name.as_deref())?;

        let request = InvocationRequest::new(sign_args(handle, data))
            .with_display_name(options.display_name.clone())
            .with_timeout(options.timeout);
        let response = self.invoker.invoke(request).await?;

        let signature = response.require_signature()?.to_vec();
        debug!(data_bytes = data.len(), "Signed with enclave key");
        Ok(signature)
    }
}

fn check_display_name(name: Option<&str>) -> Result<()> {
    match name {
        Some(name) => validate_file_name(name).map_err(BrokerError::InvalidArgument),
        None => Ok(()),
    }
}

fn generate_args(options: &GenerateOptions) -> Vec<String> {
    let mut args = vec![ARG_GENERATE.to_string()];
    if options.require_biometry {
        args.push(ARG_REQUIRE_BIOMETRY.to_string());
    }
    if options.require_unlocked {
        args.push(ARG_REQUIRE_UNLOCKED.to_string());
    }
    args
}

fn sign_args(handle: &KeyHandle, data: &[u8]) -> Vec<String> {
    vec![
        ARG_KEY.to_string(),
        handle.to_base64(),
        ARG_DATA.to_string(),
        STANDARD.encode(data),
    ]
}
