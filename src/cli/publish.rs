use super::config::{BlobsiteConfig, Overrides};
use blobsite::network::http::{HttpLedgerClient, HttpStorageClient};
use blobsite::network::signer::{LocalSigner, SIGNER_KEY_ENV};
use blobsite::network::traits::{ObjectId, Signer};
use blobsite::publish::{
    resolve_project_id, Notification, Notifier, Pipeline, PublishMode, PublishOutcome,
    TracingObserver,
};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, warn};

/// Flags of the publish command
#[derive(Debug, Default)]
pub struct PublishArgs {
    pub path: Option<String>,
    pub site_object_id: Option<String>,
    pub epochs: Option<u32>,
    pub retry_limit: Option<u32>,
    pub signer_key_file: Option<String>,
    pub no_notify: bool,
}

impl PublishArgs {
    fn overrides(&self) -> Result<Overrides, Box<dyn std::error::Error>> {
        let site_object_id = self
            .site_object_id
            .as_deref()
            .map(|s| {
                s.parse::<ObjectId>()
                    .map_err(|e| format!("Invalid --site-object-id: {}", e))
            })
            .transpose()?;

        Ok(Overrides {
            path: self.path.as_ref().map(PathBuf::from),
            site_object_id,
            epochs: self.epochs,
            retry_limit: self.retry_limit,
        })
    }
}

/// Publish the configured site directory
///
/// ## Signing Key
///
/// The key is loaded from one of these sources (in order of precedence):
/// 1. `--signer-key-file` flag if provided
/// 2. `signer.key_file` from the config
/// 3. `BLOBSITE_SIGNER_KEY` environment variable
///
/// ## Notification
///
/// When `notify.endpoint` is set, the site address is reported there in the
/// background. The command waits at most `notify.grace` for it; a failed or
/// slow notification never fails the publish.
pub async fn execute(
    config_path: Option<String>,
    log_level: Option<String>,
    args: PublishArgs,
) -> Result<(), Box<dyn std::error::Error>> {
    let mut config = super::prepare(config_path, log_level)?;
    config.apply(&args.overrides()?);

    let signer = load_signer(&config, args.signer_key_file.as_deref())?;
    if let Some(owner) = &config.signer.owner {
        if owner != signer.address() {
            return Err(format!(
                "Signing key belongs to {} but the configured owner is {}",
                signer.address(),
                owner
            )
            .into());
        }
    }

    let settings = config.publish_settings();

    println!("🚀 Publishing {}...", settings.upload_path.display());
    println!();
    println!("Network: {} ({})", config.network.name, config.network.ledger_url);
    println!("Owner: {}", signer.address());
    println!(
        "Mode: {}",
        PublishMode::from_site_object_id(settings.site_object_id)
    );
    println!("Epochs: {}", settings.epochs);
    println!();

    let ledger = Arc::new(HttpLedgerClient::new(
        config.network.ledger_url.clone(),
        config.network.request_timeout,
    ));
    let storage = Arc::new(HttpStorageClient::new());
    let observer = Arc::new(TracingObserver::new());
    info!(run = %observer.run_id(), owner = %signer.address(), "starting publish");

    let outcome = Pipeline::new(ledger, storage, signer, settings)
        .with_observer(observer)
        .run()
        .await?;

    print_outcome(&outcome);

    if args.no_notify {
        return Ok(());
    }
    if let Some(endpoint) = &config.notify.endpoint {
        let notifier = Notifier::new(endpoint.clone(), config.notify.timeout);
        let notification = Notification {
            project_id: resolve_project_id(config.notify.project_id.clone()),
            url: outcome.address.clone(),
        };
        let pending = notifier.spawn(notification);
        if tokio::time::timeout(config.notify.grace, pending)
            .await
            .is_err()
        {
            warn!(endpoint = %endpoint, "notification still pending, not waiting any longer");
        }
    }

    Ok(())
}

fn print_outcome(outcome: &PublishOutcome) {
    let verb = match outcome.mode {
        PublishMode::Create => "created",
        PublishMode::Update(_) => "updated",
    };
    println!("✅ Site {}", verb);
    println!();
    println!("Address: {}", outcome.address);
    println!("Site object: {}", outcome.site_object_id);
    println!(
        "Files: {} in {} blob(s), {} registration(s) reused",
        outcome.files,
        outcome.blobs.len(),
        outcome.reused_registrations
    );
    println!("Registration cost: {}", outcome.registration_cost);
    println!(
        "Resources: {} added, {} replaced, {} unchanged, {} retained",
        outcome.summary.added,
        outcome.summary.replaced,
        outcome.summary.unchanged,
        outcome.summary.retained
    );
}

/// Resolve the signing key from the flag, the config, then the environment
fn load_signer(
    config: &BlobsiteConfig,
    key_file: Option<&str>,
) -> Result<Arc<dyn Signer>, Box<dyn std::error::Error>> {
    let key_file = key_file
        .map(PathBuf::from)
        .or_else(|| config.signer.key_file.clone());

    if let Some(path) = key_file {
        let signer = LocalSigner::from_file(&expand_home(&path))
            .map_err(|e| format!("Failed to load signing key '{}': {}", path.display(), e))?;
        return Ok(Arc::new(signer));
    }

    match LocalSigner::from_env()? {
        Some(signer) => Ok(Arc::new(signer)),
        None => Err(format!(
            "No signing key configured: set signer.key_file, pass --signer-key-file or export {}",
            SIGNER_KEY_ENV
        )
        .into()),
    }
}

/// Expand a leading `~/` to the home directory
fn expand_home(path: &Path) -> PathBuf {
    match (path.strip_prefix("~"), dirs::home_dir()) {
        (Ok(rest), Some(home)) => home.join(rest),
        _ => path.to_path_buf(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_overrides_parse_object_id() {
        let args = PublishArgs {
            site_object_id: Some("0x2a".to_string()),
            epochs: Some(3),
            ..Default::default()
        };

        let overrides = args.overrides().unwrap();
        assert_eq!(overrides.site_object_id, Some("0x2a".parse().unwrap()));
        assert_eq!(overrides.epochs, Some(3));
        assert!(overrides.path.is_none());
    }

    #[test]
    fn test_overrides_reject_bad_object_id() {
        let args = PublishArgs {
            site_object_id: Some("not-an-id".to_string()),
            ..Default::default()
        };

        let err = args.overrides().unwrap_err();
        assert!(err.to_string().contains("--site-object-id"));
    }

    #[test]
    fn test_signer_from_flag_wins_over_config() {
        let temp_dir = TempDir::new().unwrap();
        let flag_key = temp_dir.path().join("flag.key");
        let config_key = temp_dir.path().join("config.key");
        std::fs::write(&flag_key, "11".repeat(32)).unwrap();
        std::fs::write(&config_key, "22".repeat(32)).unwrap();

        let mut config = BlobsiteConfig::default();
        config.signer.key_file = Some(config_key.clone());

        let from_flag = load_signer(&config, flag_key.to_str()).unwrap();
        let expected = LocalSigner::from_seed(&[0x11; 32]).unwrap();
        assert_eq!(from_flag.address(), expected.address());

        let from_config = load_signer(&config, None).unwrap();
        let expected = LocalSigner::from_seed(&[0x22; 32]).unwrap();
        assert_eq!(from_config.address(), expected.address());
    }

    #[test]
    fn test_unreadable_key_file_is_error() {
        let temp_dir = TempDir::new().unwrap();
        let missing = temp_dir.path().join("missing.key");

        let err = load_signer(&BlobsiteConfig::default(), missing.to_str())
            .err()
            .expect("expected an error");
        assert!(err.to_string().contains("Failed to load signing key"));
    }

    #[test]
    fn test_expand_home() {
        assert_eq!(
            expand_home(Path::new("/abs/key")),
            PathBuf::from("/abs/key")
        );
        if let Some(home) = dirs::home_dir() {
            assert_eq!(expand_home(Path::new("~/k")), home.join("k"));
        }
    }
}
