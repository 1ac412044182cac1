//! SSH host key persistence

use std::path::Path;

use anyhow::{Context, Result};
use russh_keys::key::KeyPair;

/// Load the host key, generating and saving an Ed25519 key on first start
pub async fn load_or_generate_host_key(path: &Path) -> Result<KeyPair> {
    if path.exists() {
        tracing::info!("Loading host key from {:?}", path);
        return russh_keys::load_secret_key(path, None)
            .with_context(|| format!("Failed to load host key from {:?}", path));
    }

    tracing::info!("Generating new host key at {:?}", path);
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent)
            .await
            .with_context(|| format!("Failed to create directory {:?}", parent))?;
    }

    let key = KeyPair::generate_ed25519()
        .ok_or_else(|| anyhow::anyhow!("Failed to generate Ed25519 key"))?;

    let mut pem = Vec::new();
    russh_keys::encode_pkcs8_pem(&key, &mut pem).context("Failed to encode host key")?;
    write_private(path, &pem)
        .await
        .with_context(|| format!("Failed to write host key to {:?}", path))?;

    Ok(key)
}

async fn write_private(path: &Path, contents: &[u8]) -> std::io::Result<()> {
    tokio::fs::write(path, contents).await?;
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        tokio::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600)).await?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_generated_key_is_reused() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("keys").join("host_key");

        let first = load_or_generate_host_key(&path).await.unwrap();
        assert!(path.exists());
        let second = load_or_generate_host_key(&path).await.unwrap();

        assert_eq!(
            first.clone_public_key().unwrap().fingerprint(),
            second.clone_public_key().unwrap().fingerprint()
        );
    }
}
