use super::config::{BlobsiteConfig, LOCAL_CONFIG_FILE};
use blobsite::network::signer::LocalSigner;
use blobsite::network::traits::Signer;
use std::fs;
use std::path::{Path, PathBuf};

/// Write a default configuration file, optionally with a fresh signing key
///
/// Existing files are left alone unless `force` is set. A generated key is
/// referenced from the written config.
pub fn execute(
    output: Option<String>,
    key_file: Option<String>,
    force: bool,
) -> Result<(), Box<dyn std::error::Error>> {
    let config_path = output
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from(LOCAL_CONFIG_FILE));
    refuse_overwrite(&config_path, force)?;

    let key_path = key_file.map(PathBuf::from);
    if let Some(path) = &key_path {
        refuse_overwrite(path, force)?;
    }

    BlobsiteConfig::create_default(&config_path)?;
    println!("📝 Created config: {}", config_path.display());

    if let Some(path) = key_path {
        let address = write_signing_key(&path)?;

        let mut config = BlobsiteConfig::load(&config_path)?;
        config.signer.key_file = Some(path.clone());
        config.signer.owner = Some(address.clone());
        config.save(&config_path)?;

        println!("🔑 Created signing key: {}", path.display());
        println!("   Owner address: {}", address);
        println!("   Keep this file secret; anyone holding it can spend from the account.");
    }

    Ok(())
}

fn refuse_overwrite(path: &Path, force: bool) -> Result<(), Box<dyn std::error::Error>> {
    if path.exists() && !force {
        return Err(format!(
            "'{}' already exists (use --force to overwrite)",
            path.display()
        )
        .into());
    }
    Ok(())
}

/// Generate a key, write its hex seed to `path` and return the owner address
fn write_signing_key(path: &Path) -> Result<String, Box<dyn std::error::Error>> {
    let (signer, seed_hex) = LocalSigner::generate()?;

    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)?;
        }
    }
    fs::write(path, format!("{}\n", seed_hex.as_str()))?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        fs::set_permissions(path, fs::Permissions::from_mode(0o600))?;
    }

    Ok(signer.address().to_string())
}
