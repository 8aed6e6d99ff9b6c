//! Concurrent attachment downloads.
//!
//! All fetches for one call run concurrently, capped at `max_in_flight`,
//! and the call returns once every fetch has finished or failed.

use std::path::{Path, PathBuf};

use futures::stream::{self, StreamExt};

use crate::domain::{AppError, MessageRecord, Result};
use crate::infrastructure::{write_atomic, GuildApi};

/// One remote file and where it lands on disk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownloadJob {
    pub url: String,
    pub path: PathBuf,
}

/// Outcome counts of a materialize call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MaterializeReport {
    pub saved: usize,
    pub failed: usize,
}

impl MaterializeReport {
    #[must_use]
    pub const fn total(&self) -> usize {
        self.saved + self.failed
    }
}

/// Fetches remote files into local directories.
pub struct AttachmentMaterializer<'a> {
    api: &'a dyn GuildApi,
    max_in_flight: usize,
}

impl<'a> AttachmentMaterializer<'a> {
    #[must_use]
    pub fn new(api: &'a dyn GuildApi, max_in_flight: usize) -> Self {
        Self {
            api,
            max_in_flight: max_in_flight.max(1),
        }
    }

    /// Jobs for every attachment across `messages`, named
    /// `{message_id}_{index}_{basename}` under `target_dir`.
    #[must_use]
    pub fn plan(messages: &[MessageRecord], target_dir: &Path) -> Vec<DownloadJob> {
        messages
            .iter()
            .flat_map(|msg| {
                msg.attachments
                    .iter()
                    .enumerate()
                    .map(move |(index, attachment)| DownloadJob {
                        url: attachment.url.clone(),
                        path: target_dir.join(attachment.local_name(msg.id, index)),
                    })
            })
            .collect()
    }

    /// Download every attachment referenced by `messages` into `target_dir`.
    ///
    /// The directory is only created when there is something to save.
    ///
    /// # Errors
    /// Returns error only if `target_dir` cannot be created; per-file
    /// failures are logged and counted.
    pub async fn materialize(
        &self,
        messages: &[MessageRecord],
        target_dir: &Path,
    ) -> Result<MaterializeReport> {
        let jobs = Self::plan(messages, target_dir);
        if jobs.is_empty() {
            return Ok(MaterializeReport::default());
        }

        tokio::fs::create_dir_all(target_dir).await.map_err(|e| {
            AppError::io(format!("Failed to create {}", target_dir.display()), e)
        })?;

        Ok(self.download_all(jobs).await)
    }

    /// Run `jobs` with at most `max_in_flight` fetches outstanding.
    pub async fn download_all(&self, jobs: Vec<DownloadJob>) -> MaterializeReport {
        let outcomes: Vec<bool> = stream::iter(jobs)
            .map(|job| self.download(job))
            .buffer_unordered(self.max_in_flight)
            .collect()
            .await;

        let saved = outcomes.iter().filter(|ok| **ok).count();
        let report = MaterializeReport {
            saved,
            failed: outcomes.len() - saved,
        };

        tracing::debug!(
            saved = report.saved,
            failed = report.failed,
            "Downloads finished"
        );

        report
    }

    async fn download(&self, job: DownloadJob) -> bool {
        let result = match self.api.fetch_bytes(&job.url).await {
            Ok(bytes) => write_atomic(&job.path, &bytes).await,
            Err(e) => Err(e),
        };

        match result {
            Ok(()) => true,
            Err(e) => {
                tracing::warn!(
                    url = %job.url,
                    path = %job.path.display(),
                    error = %e,
                    "Download failed; skipping"
                );
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::normalizer::normalize_message;
    use crate::infrastructure::discord::fake::{message, with_attachment, FakeGuild};
    use crate::infrastructure::discord::models::ApiMessage;
    use tempfile::tempdir;

    fn records(raw: &[ApiMessage]) -> Vec<MessageRecord> {
        raw.iter().map(normalize_message).collect()
    }

    #[tokio::test]
    async fn test_same_basename_lands_in_distinct_files() {
        let dir = tempdir().unwrap();
        let mut fake = FakeGuild::new("Test");
        fake.blobs.insert("https://cdn.example.com/a/image.png".into(), b"first".to_vec());
        fake.blobs.insert("https://cdn.example.com/b/image.png?ex=1".into(), b"second".to_vec());

        let messages = records(&[
            with_attachment(message(1, "a", ""), "https://cdn.example.com/a/image.png", "image.png"),
            with_attachment(
                message(2, "b", ""),
                "https://cdn.example.com/b/image.png?ex=1",
                "image.png",
            ),
        ]);

        let target = dir.path().join("chat_attachments");
        let report = AttachmentMaterializer::new(&fake, 4)
            .materialize(&messages, &target)
            .await
            .unwrap();

        assert_eq!(report, MaterializeReport { saved: 2, failed: 0 });
        assert_eq!(std::fs::read(target.join("1_0_image.png")).unwrap(), b"first");
        assert_eq!(std::fs::read(target.join("2_0_image.png")).unwrap(), b"second");
    }

    #[tokio::test]
    async fn test_failed_fetch_does_not_affect_siblings() {
        let dir = tempdir().unwrap();
        let mut fake = FakeGuild::new("Test");
        fake.blobs.insert("https://cdn.example.com/ok.txt".into(), b"ok".to_vec());

        let msg = with_attachment(
            with_attachment(message(3, "a", ""), "https://cdn.example.com/gone.txt", "gone.txt"),
            "https://cdn.example.com/ok.txt",
            "ok.txt",
        );
        let messages = records(&[msg]);

        let report = AttachmentMaterializer::new(&fake, 1)
            .materialize(&messages, dir.path())
            .await
            .unwrap();

        assert_eq!(report.saved, 1);
        assert_eq!(report.failed, 1);
        assert_eq!(report.total(), 2);
        assert!(dir.path().join("3_1_ok.txt").exists());
        assert!(!dir.path().join("3_0_gone.txt").exists());
        assert_eq!(fake.fetched_urls().len(), 2);
    }

    #[tokio::test]
    async fn test_in_flight_fetches_never_exceed_cap() {
        let dir = tempdir().unwrap();
        let mut fake = FakeGuild::new("Test");
        fake.fetch_delay = Some(std::time::Duration::from_millis(10));

        let raw: Vec<_> = (1..=10)
            .map(|id| {
                let url = format!("https://cdn.example.com/{id}/file.bin");
                fake.blobs.insert(url.clone(), vec![1, 2, 3]);
                with_attachment(message(id, "a", ""), &url, "file.bin")
            })
            .collect();

        let report = AttachmentMaterializer::new(&fake, 3)
            .materialize(&records(&raw), dir.path())
            .await
            .unwrap();

        assert_eq!(report.saved, 10);
        assert_eq!(fake.peak_in_flight(), 3);
    }

    #[tokio::test]
    async fn test_no_attachments_creates_nothing() {
        let dir = tempdir().unwrap();
        let fake = FakeGuild::new("Test");
        let target = dir.path().join("chat_attachments");

        let report = AttachmentMaterializer::new(&fake, 8)
            .materialize(&records(&[message(1, "a", "hi")]), &target)
            .await
            .unwrap();

        assert_eq!(report, MaterializeReport::default());
        assert!(!target.exists());
    }
}
