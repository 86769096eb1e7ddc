//! Restore binary
//! --------------
//! Loads `RestoreConfig` (file named by `SEGBACKUP_CONFIG`, then `SEGBACKUP_*`
//! overrides), restores the requested backup over `tokio-postgres` sessions,
//! prints the run summary as JSON and exits with the run status code.

use std::sync::Arc;

use anyhow::{anyhow, Context, Result};
use tracing::info;
use tracing_subscriber::{fmt, EnvFilter};

use segbackup::config::RestoreConfig;
use segbackup::paths::TimestampKey;
use segbackup::segment::TemplateResolver;
use segbackup::session::PgSessionFactory;
use segbackup::RestoreRun;

#[tokio::main]
async fn main() -> Result<()> {
    let filter = EnvFilter::try_from_default_env().or_else(|_| EnvFilter::try_new("info"))?;
    fmt().with_env_filter(filter).init();

    let config = RestoreConfig::load().context("loading restore config")?;
    let ts_arg = std::env::args().nth(1).or_else(|| config.timestamp.clone());
    let ts_text = ts_arg.ok_or_else(|| anyhow!("usage: segrestore <YYYYMMDDHHMMSS> (or set SEGBACKUP_TIMESTAMP)"))?;
    let ts = TimestampKey::parse(&ts_text)?;
    info!(
        target: "segbackup",
        "segrestore: timestamp={}, data_dir='{}', jobs={}, segments={}",
        ts, config.coordinator_data_dir.display(), config.jobs, config.segments.len()
    );

    let factory = PgSessionFactory::new(&config.dsn, config.search_path.clone())?;
    let run = RestoreRun::new(Arc::new(factory), Arc::new(TemplateResolver), config);
    let summary = run.run(&ts).await;
    println!("{}", serde_json::to_string_pretty(&summary)?);
    std::process::exit(summary.status.exit_code());
}
