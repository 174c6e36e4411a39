//! Builds a signed update package: a gzip-compressed tarball of the working
//! tree plus an optional detached RSA-PKCS1v15-SHA256 signature
//! (`spec.md` §4.6 step 2, §3 `SignedUpdatePackage`).

use std::path::Path;

use chrono::Utc;
use flate2::write::GzEncoder;
use flate2::Compression;
use xlt_protocol::types::SignedUpdatePackage;
use xlt_security::signing;

use crate::error::{Result, VersionError};
use xlt_protocol::types::WorkerId;

const EXCLUDED_DIR_NAMES: &[&str] = &[".git", "target", "node_modules", "vendor", "dist", "build"];

/// Builds a `.tar.gz` archive of `source_dir` into `output_path`, skipping
/// VCS/build-output/vendor directories, and optionally signs it.
pub fn build_package(
    worker_id: &WorkerId,
    source_dir: &Path,
    output_path: &Path,
    version: &str,
    signing_key: Option<&rsa::RsaPrivateKey>,
) -> Result<SignedUpdatePackage> {
    let tar_gz = std::fs::File::create(output_path)
        .map_err(|source| VersionError::PackageBuild { worker_id: worker_id.clone(), source })?;
    let encoder = GzEncoder::new(tar_gz, Compression::default());
    let mut archive = tar::Builder::new(encoder);

    append_dir(&mut archive, source_dir, source_dir)
        .map_err(|source| VersionError::PackageBuild { worker_id: worker_id.clone(), source })?;

    archive
        .into_inner()
        .and_then(|mut enc| {
            use std::io::Write;
            enc.flush()?;
            enc.finish()
        })
        .map_err(|source| VersionError::PackageBuild { worker_id: worker_id.clone(), source })?;

    let mut signature_path = None;
    let mut public_key_path = None;
    if let Some(private_key) = signing_key {
        let package_bytes = std::fs::read(output_path)
            .map_err(|source| VersionError::PackageBuild { worker_id: worker_id.clone(), source })?;
        let signature = signing::sign(private_key, &package_bytes)
            .map_err(|source| VersionError::Signing { worker_id: worker_id.clone(), source })?;
        let sig_path = output_path.with_extension("tar.gz.sig");
        std::fs::write(&sig_path, &signature)
            .map_err(|source| VersionError::PackageBuild { worker_id: worker_id.clone(), source })?;
        signature_path = Some(sig_path.to_string_lossy().to_string());

        let pub_path = output_path.with_extension("tar.gz.pub");
        let public_key = rsa::RsaPublicKey::from(private_key);
        use rsa::pkcs1::EncodeRsaPublicKey;
        let pem = public_key
            .to_pkcs1_pem(rsa::pkcs8::LineEnding::LF)
            .map_err(|_| VersionError::Signing {
                worker_id: worker_id.clone(),
                source: xlt_security::SecurityError::InvalidSignature,
            })?;
        std::fs::write(&pub_path, pem)
            .map_err(|source| VersionError::PackageBuild { worker_id: worker_id.clone(), source })?;
        public_key_path = Some(pub_path.to_string_lossy().to_string());
    }

    Ok(SignedUpdatePackage {
        package_path: output_path.to_string_lossy().to_string(),
        signature_path,
        public_key_path,
        version: version.to_string(),
        timestamp: Utc::now(),
    })
}

fn append_dir<W: std::io::Write>(
    archive: &mut tar::Builder<W>,
    root: &Path,
    dir: &Path,
) -> std::io::Result<()> {
    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        let path = entry.path();
        let name = entry.file_name();
        let name = name.to_string_lossy();

        if path.is_dir() {
            if EXCLUDED_DIR_NAMES.contains(&name.as_ref()) {
                continue;
            }
            append_dir(archive, root, &path)?;
        } else {
            let relative = path.strip_prefix(root).unwrap_or(&path);
            archive.append_path_with_name(&path, relative)?;
        }
    }
    Ok(())
}
