use std::sync::Arc;

use apptrack::classify::{Classifier, ClassifierConfig, HttpClassifier};
use apptrack::config::PipelineConfig;
use apptrack::mailbox::MaildirMailbox;
use apptrack::pipeline::{PipelineRunner, PreFilter};
use apptrack::store::{LibSqlStore, Store};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    // Read API key from environment
    let api_key = std::env::var("APPTRACK_API_KEY").unwrap_or_else(|_| {
        eprintln!("Error: APPTRACK_API_KEY not set");
        eprintln!("  export APPTRACK_API_KEY=gsk_...");
        std::process::exit(1);
    });

    let maildir = std::env::var("APPTRACK_MAILDIR").unwrap_or_else(|_| {
        eprintln!("Error: APPTRACK_MAILDIR not set (directory of .eml files)");
        std::process::exit(1);
    });

    let db_path =
        std::env::var("APPTRACK_DB_PATH").unwrap_or_else(|_| "./data/apptrack.db".to_string());

    let mut config = PipelineConfig::default();
    if let Ok(days) = std::env::var("APPTRACK_SCAN_DAYS") {
        config.daily_scan_days = days.parse().unwrap_or(config.daily_scan_days);
    }

    let mut classifier_config = ClassifierConfig::new(secrecy::SecretString::from(api_key));
    if let Ok(model) = std::env::var("APPTRACK_MODEL") {
        classifier_config.model = model;
    }
    if let Ok(base) = std::env::var("APPTRACK_API_BASE") {
        classifier_config.api_base = base;
    }

    eprintln!("apptrack v{}", env!("CARGO_PKG_VERSION"));
    eprintln!("   Model: {}", classifier_config.model);
    eprintln!("   Mailbox: {}", maildir);
    eprintln!("   Database: {}", db_path);

    let store: Arc<dyn Store> = Arc::new(
        LibSqlStore::new_local(std::path::Path::new(&db_path))
            .await
            .unwrap_or_else(|e| {
                eprintln!("Error: Failed to open database at {}: {}", db_path, e);
                std::process::exit(1);
            }),
    );

    let classifier: Arc<dyn Classifier> = Arc::new(HttpClassifier::new(classifier_config));
    let mailbox = MaildirMailbox::new(&maildir);

    let runner = PipelineRunner::new(store.clone(), classifier, PreFilter::default_rules(), config);
    let summary = runner.run_once(&mailbox).await?;

    eprintln!(
        "\nRun finished: {} scanned, {} new, {} updated, {} skipped",
        summary.scanned, summary.new_records, summary.updated_records, summary.skipped
    );
    for (reason, count) in &summary.skip_reasons {
        eprintln!("   {reason}: {count}");
    }

    // Quick view of the most recently touched applications.
    let records = store.all_applications().await?;
    if !records.is_empty() {
        eprintln!("\nTracked applications ({}):", records.len());
        for record in records.iter().take(20) {
            eprintln!(
                "   {} - {} [{}]",
                record.display_company, record.display_role, record.stage
            );
        }
    }

    Ok(())
}
