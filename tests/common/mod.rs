//! Shared test doubles for the broker integration tests

#![allow(dead_code)]

use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use p256::ecdsa::signature::Signer;
use p256::ecdsa::{Signature, SigningKey};
use p256::pkcs8::EncodePublicKey;
use rand::rngs::OsRng;

use enclave_broker::{
    BrokerConfig, BrokerError, HelperInvoker, HelperPayload, InvocationRequest,
    InvocationResponse, StagedHelper,
};

/// Valid P-256 SubjectPublicKeyInfo used by the shell helpers
pub const PUBLIC_KEY_DER_B64: &str = "MFkwEwYHKoZIzj0CAQYIKoZIzj0DAQcDQgAEeJtnXJZFbXMUqm7IGYWt+3vEKU22IGRNJXpwsStTeZCipb8HjrhVBz7hhlB/IPp4bJKcFA98bVM0y5HtMIUrIw==";

/// In-process stand-in for the enclave helper.
///
/// Speaks the helper's argument protocol; the key handle is the raw P-256
/// scalar, which the broker treats as opaque bytes.
#[derive(Default)]
pub struct SoftwareEnclave {
    invocations: AtomicUsize,
}

impl SoftwareEnclave {
    pub fn invocations(&self) -> usize {
        self.invocations.load(Ordering::SeqCst)
    }
}

fn helper_failure() -> BrokerError {
    BrokerError::Exit {
        code: Some(1),
        signal: None,
    }
}

fn flag_value<'a>(args: &'a [String], flag: &str) -> Option<&'a str> {
    args.iter()
        .position(|a| a == flag)
        .and_then(|i| args.get(i + 1))
        .map(String::as_str)
}

#[async_trait]
impl HelperInvoker for SoftwareEnclave {
    async fn invoke(&self, request: InvocationRequest) -> enclave_broker::Result<InvocationResponse> {
        self.invocations.fetch_add(1, Ordering::SeqCst);
        let args = &request.args;

        let mut response = InvocationResponse {
            is_available: true,
            ..Default::default()
        };

        if args.first().map(String::as_str) == Some("--generate") {
            let signing_key = SigningKey::random(&mut OsRng);
            response.private_key = signing_key.to_bytes().to_vec();
            response.public_key = signing_key
                .verifying_key()
                .to_public_key_der()
                .map_err(|_| helper_failure())?
                .as_bytes()
                .to_vec();
        } else if let Some(key) = flag_value(args, "--key") {
            let key = STANDARD.decode(key).map_err(|_| helper_failure())?;
            let data = flag_value(args, "--data").ok_or_else(helper_failure)?;
            let data = STANDARD.decode(data).map_err(|_| helper_failure())?;

            let signing_key = SigningKey::from_slice(&key).map_err(|_| helper_failure())?;
            let signature: Signature = signing_key.sign(&data);
            response.signature = signature.to_der().as_bytes().to_vec();
        } else if !args.is_empty() {
            return Err(helper_failure());
        }

        Ok(response)
    }
}

/// Real-process helper running `script` with staging under `root`
pub fn script_helper(script: &str, root: &Path) -> StagedHelper {
    StagedHelper::new(
        HelperPayload::from_bytes(script.as_bytes().to_vec()),
        BrokerConfig {
            staging_dir: Some(root.to_path_buf()),
            ..Default::default()
        },
    )
}

pub fn staging_entries(root: &Path) -> usize {
    std::fs::read_dir(root).unwrap().count()
}
