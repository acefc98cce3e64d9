//! Build script for enclave-broker
//!
//! Embeds the helper executable named by `ENCLAVE_HELPER_BINARY` into the
//! crate. The helper is produced by the platform toolchain outside of cargo.

use std::path::PathBuf;

fn main() {
    let out_dir = PathBuf::from(std::env::var("OUT_DIR").expect("OUT_DIR is set by cargo"));
    let target = out_dir.join("enclave-helper");

    println!("cargo:rerun-if-env-changed=ENCLAVE_HELPER_BINARY");

    match std::env::var("ENCLAVE_HELPER_BINARY") {
        Ok(source) if !source.is_empty() => {
            println!("cargo:rerun-if-changed={}", source);
            std::fs::copy(&source, &target)
                .unwrap_or_else(|e| panic!("Failed to embed helper binary {}: {}", source, e));
        }
        _ => {
            println!(
                "cargo:warning=ENCLAVE_HELPER_BINARY not set; embedding an empty helper payload"
            );
            std::fs::write(&target, b"").expect("Failed to write empty helper payload");
        }
    }
}
