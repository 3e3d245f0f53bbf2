use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Context;
use fotodrop_core::FotodropClient;

use crate::upload::engine::{EngineConfig, UploadEngine};
use crate::upload::local_watcher::start_notify_watcher;
use crate::upload::transfer::TransferClient;

const DEFAULT_WATCH_DIR_NAME: &str = "Fotodrop";

#[derive(Clone, Debug)]
pub struct DaemonConfig {
    pub api_base: Option<String>,
    pub api_token: String,
    pub event_id: String,
    pub watch_dir: PathBuf,
    pub engine: EngineConfig,
    pub status_interval: Duration,
}

impl DaemonConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        let api_token =
            std::env::var("FOTODROP_API_TOKEN").context("FOTODROP_API_TOKEN is not set")?;
        let event_id =
            std::env::var("FOTODROP_EVENT_ID").context("FOTODROP_EVENT_ID is not set")?;
        let api_base = std::env::var("FOTODROP_API_BASE").ok();
        let home = dirs::home_dir().context("home directory is unavailable")?;
        let watch_dir = std::env::var("FOTODROP_WATCH_DIR")
            .ok()
            .map(|value| expand_with_home(&value, &home))
            .unwrap_or_else(|| home.join(DEFAULT_WATCH_DIR_NAME));

        let poll_interval =
            Duration::from_millis(read_u64_env("FOTODROP_POLL_INTERVAL_MS", 2_000));
        let engine = EngineConfig {
            max_concurrency: read_u64_env("FOTODROP_MAX_UPLOADS", 5) as usize,
            upload_poll_interval: poll_interval,
            photo_poll_interval: poll_interval,
            removal_delay: Duration::from_millis(read_u64_env(
                "FOTODROP_INDEXED_LINGER_MS",
                3_000,
            )),
        };
        let status_interval =
            Duration::from_millis(read_u64_env("FOTODROP_STATUS_INTERVAL_MS", 1_000));

        Ok(Self {
            api_base,
            api_token,
            event_id,
            watch_dir,
            engine,
            status_interval,
        })
    }
}

pub struct DaemonRuntime {
    config: DaemonConfig,
    engine: UploadEngine,
}

impl DaemonRuntime {
    pub async fn bootstrap(config: DaemonConfig) -> anyhow::Result<Self> {
        tokio::fs::create_dir_all(&config.watch_dir)
            .await
            .with_context(|| format!("failed to create watch dir at {:?}", config.watch_dir))?;

        let api = match &config.api_base {
            Some(base) => FotodropClient::with_base_url(base, &config.api_token)?,
            None => FotodropClient::new(&config.api_token)?,
        };
        let engine = UploadEngine::new(api, TransferClient::new(), &config.event_id, config.engine);

        Ok(Self { config, engine })
    }

    pub async fn run(self) -> anyhow::Result<()> {
        tracing::info!(
            watch_dir = %self.config.watch_dir.display(),
            event_id = %self.config.event_id,
            "fotodropd started"
        );

        // Server-side truth only: anything still processing from a prior
        // session comes back through the listing, never from local state.
        match self.engine.seed().await {
            Ok(seeded) if seeded > 0 => tracing::info!(seeded, "seeded in-flight photos"),
            Ok(_) => {}
            Err(err) => tracing::warn!(error = %err, "seed listing failed"),
        }

        let (watcher, mut file_rx) = start_notify_watcher(&self.config.watch_dir)
            .context("failed to start hot-folder watcher")?;

        let engine_for_ingest = self.engine.clone();
        let ingest_handle = tokio::spawn(async move {
            let mut admitted: HashSet<PathBuf> = HashSet::new();
            while let Some(path) = file_rx.recv().await {
                // The watcher fires several events while a file is written.
                if !admitted.insert(path.clone()) {
                    continue;
                }
                let ids = engine_for_ingest.add_files(&[path]).await;
                if !ids.is_empty() {
                    tracing::info!(count = ids.len(), "admitted new files");
                }
            }
        });

        let engine_for_status = self.engine.clone();
        let status_interval = self.config.status_interval;
        let status_handle = tokio::spawn(async move {
            let mut last_version = 0u64;
            loop {
                tokio::time::sleep(status_interval).await;
                let snapshot = engine_for_status.snapshot();
                if snapshot.version != last_version {
                    tracing::info!(
                        uploading = snapshot.uploading_count,
                        queued = snapshot.queued_count,
                        failed = snapshot.failed.len(),
                        tracked = snapshot.entries.len(),
                        "upload progress"
                    );
                    last_version = snapshot.version;
                }
            }
        });

        let _watcher = watcher;
        tokio::signal::ctrl_c()
            .await
            .context("failed waiting for shutdown signal")?;

        ingest_handle.abort();
        status_handle.abort();

        Ok(())
    }
}

include!("daemon_helpers.rs");

#[cfg(test)]
#[path = "daemon_tests.rs"]
mod tests;
