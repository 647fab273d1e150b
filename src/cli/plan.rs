use blobsite::network::traits::Pricing;
use blobsite::publish::{plan, PublishPlan};
use std::path::PathBuf;

/// Show how the site directory would be split into blobs
///
/// Groups and hashes the files exactly as `publish` does, using the default
/// storage unit size. Nothing is sent to the ledger or the storage nodes.
pub async fn execute(
    config_path: Option<String>,
    log_level: Option<String>,
    path: Option<String>,
    json: bool,
) -> Result<(), Box<dyn std::error::Error>> {
    let mut config = super::prepare(config_path, log_level)?;
    if let Some(path) = path {
        config.site.path = PathBuf::from(path);
    }
    let settings = config.publish_settings();

    let plan = plan(&settings, Pricing::default().unit_size).await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&plan)?);
    } else {
        print!("{}", render(&plan));
    }

    Ok(())
}

/// Human-readable plan
fn render(plan: &PublishPlan) -> String {
    let mut out = String::new();
    let files: usize = plan.blobs.iter().map(|b| b.paths.len()).sum();
    out.push_str(&format!(
        "📦 {} file(s) in {} blob(s), {} epoch(s)\n\n",
        files,
        plan.blobs.len(),
        plan.epochs
    ));

    for blob in &plan.blobs {
        out.push_str(&format!(
            "{}  {} bytes, {} unit(s){}\n",
            blob.blob_id,
            blob.size,
            blob.units,
            if blob.duplicate { " (duplicate)" } else { "" }
        ));
        for path in &blob.paths {
            out.push_str(&format!("    {}\n", path));
        }
    }

    out.push_str(&format!("\nStorage: {} unit-epoch(s)\n", plan.unit_epochs()));
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use blobsite::publish::{BlobId, PlannedBlob};

    #[test]
    fn test_render_lists_paths_and_duplicates() {
        let blob_id = BlobId::from_content(b"same");
        let plan = PublishPlan {
            blobs: vec![
                PlannedBlob {
                    blob_id,
                    paths: vec!["/index.html".to_string(), "/style.css".to_string()],
                    size: 4,
                    units: 1,
                    duplicate: false,
                },
                PlannedBlob {
                    blob_id,
                    paths: vec!["/copy.html".to_string()],
                    size: 4,
                    units: 1,
                    duplicate: true,
                },
            ],
            epochs: 5,
        };

        let text = render(&plan);
        assert!(text.contains("3 file(s) in 2 blob(s), 5 epoch(s)"));
        assert!(text.contains("    /style.css"));
        assert!(text.contains("(duplicate)"));
        assert!(text.contains("Storage: 5 unit-epoch(s)"));
    }
}
