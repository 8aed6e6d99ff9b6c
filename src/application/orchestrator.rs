//! One backup run for one guild.
//!
//! Only failures that make the whole run meaningless propagate: resolving
//! the guild, creating the run root, the structure snapshot and packing.
//! Everything per channel, thread or file is logged and skipped.

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{DateTime, Local};

use crate::domain::{
    AppError, BackupConfig, ChannelKind, EmojiRecord, FormatSet, Result, RunReport, Snowflake,
};
use crate::infrastructure::discord::ApiChannel;
use crate::infrastructure::{pack_directory, write_atomic, ArchivedScope, GuildApi};

use super::collector::{HistoryCollector, HistorySource, SourceKind};
use super::materializer::{AttachmentMaterializer, DownloadJob};
use super::normalizer::normalize_emoji;
use super::renderer::{attachments_dir_name, render};
use super::snapshot::{capture, write_snapshot};

const CHANNELS_DIR: &str = "channels";
const THREADS_DIR: &str = "threads";
const EMOJIS_DIR: &str = "emojis";
const STAMP_FORMAT: &str = "%Y%m%d_%H%M%S";

/// Resolved per-run settings.
#[derive(Debug, Clone)]
pub struct RunOptions {
    pub root: PathBuf,
    pub formats: FormatSet,
    pub download_attachments: bool,
    pub download_emojis: bool,
    pub max_concurrent_downloads: usize,
}

impl From<&BackupConfig> for RunOptions {
    fn from(config: &BackupConfig) -> Self {
        Self {
            root: config.root.clone(),
            formats: config.formats.clone(),
            download_attachments: config.download_attachments,
            download_emojis: config.download_emojis,
            max_concurrent_downloads: config.max_concurrent_downloads,
        }
    }
}

/// Guild display name as a directory name: spaces to `_`, lower-cased.
#[must_use]
pub fn workspace_dir_name(name: &str) -> String {
    let normalized: String = name
        .trim()
        .chars()
        .map(|c| match c {
            ' ' => '_',
            c if is_path_unsafe(c) => '_',
            c => c,
        })
        .collect::<String>()
        .to_lowercase();

    if normalized.is_empty() || normalized.chars().all(|c| c == '.') {
        "guild".to_string()
    } else {
        normalized
    }
}

fn is_path_unsafe(c: char) -> bool {
    matches!(c, '/' | '\\' | ':' | '*' | '?' | '"' | '<' | '>' | '|') || c.is_control()
}

/// Channel or thread name as a file stem.
#[must_use]
pub fn sanitize_stem(name: &str) -> String {
    let stem: String = name
        .trim()
        .chars()
        .map(|c| if is_path_unsafe(c) { '_' } else { c })
        .collect();

    if stem.is_empty() || stem.chars().all(|c| c == '.') {
        "unnamed".to_string()
    } else {
        stem
    }
}

/// Stems already used in one output directory.
#[derive(Debug, Default)]
struct StemRegistry {
    used: HashSet<String>,
}

impl StemRegistry {
    /// Claim an unused stem for `name`.
    ///
    /// A taken stem gets `_{id}` appended, then `_{id}_2`, `_{id}_3`, ...
    fn claim(&mut self, name: &str, id: Snowflake) -> String {
        let base = sanitize_stem(name);
        let mut stem = base.clone();
        let mut attempt = 1u32;
        while self.used.contains(&stem) {
            stem = if attempt == 1 {
                format!("{base}_{id}")
            } else {
                format!("{base}_{id}_{attempt}")
            };
            attempt += 1;
        }
        self.used.insert(stem.clone());
        stem
    }
}

/// Composes snapshot, collection, rendering and downloads for one guild.
pub struct Orchestrator {
    api: Arc<dyn GuildApi>,
    options: RunOptions,
}

impl Orchestrator {
    #[must_use]
    pub fn new(api: Arc<dyn GuildApi>, options: RunOptions) -> Self {
        Self { api, options }
    }

    #[must_use]
    pub const fn options(&self) -> &RunOptions {
        &self.options
    }

    /// Back up `guild_id` stamped with the current local time.
    ///
    /// # Errors
    /// Returns error on fatal run failures; the partial directory is kept.
    pub async fn run(&self, guild_id: Snowflake) -> Result<RunReport> {
        self.run_at(guild_id, Local::now()).await
    }

    /// Back up `guild_id` with an explicit run timestamp.
    ///
    /// # Errors
    /// Returns error on fatal run failures; the partial directory is kept.
    pub async fn run_at(&self, guild_id: Snowflake, started: DateTime<Local>) -> Result<RunReport> {
        let api = self.api.as_ref();
        let guild = api.guild(guild_id).await?;

        let root_name = format!(
            "{}_{}",
            workspace_dir_name(&guild.name),
            started.format(STAMP_FORMAT)
        );
        let output_root = self.options.root.join(&root_name);
        create_run_root(&self.options.root, &output_root).await?;

        tracing::info!(
            guild = %guild.name,
            root = %output_root.display(),
            formats = %self.options.formats,
            "Backup started"
        );

        let channels = api.channels(guild.id).await?;
        let snapshot = capture(api, &guild, &channels).await?;
        write_snapshot(&snapshot, &output_root).await?;

        let channels_dir = output_root.join(CHANNELS_DIR);
        let threads_dir = output_root.join(THREADS_DIR);
        for dir in [&channels_dir, &threads_dir] {
            tokio::fs::create_dir_all(dir)
                .await
                .map_err(|e| AppError::io(format!("Failed to create {}", dir.display()), e))?;
        }

        let text_channels: Vec<&ApiChannel> = snapshot
            .structure
            .channels
            .iter()
            .filter(|c| c.kind == ChannelKind::Text)
            .filter_map(|record| channels.iter().find(|c| c.id == record.id))
            .collect();
        let mut threads = self.collect_threads(guild.id, &text_channels).await;

        let mut report = RunReport {
            guild_name: guild.name.clone(),
            output_root: output_root.clone(),
            ..RunReport::default()
        };
        let mut channel_stems = StemRegistry::default();
        let mut thread_stems = StemRegistry::default();

        for channel in text_channels {
            let source = HistorySource::new(channel.id, channel.display_name(), SourceKind::Channel);
            let stem = channel_stems.claim(&source.name, source.id);
            self.export_source(&source, &stem, &channels_dir, &mut report)
                .await;
            report.channels += 1;

            for thread in threads.remove(&channel.id).unwrap_or_default() {
                let source = HistorySource::new(thread.id, thread.display_name(), SourceKind::Thread);
                let stem = thread_stems.claim(&source.name, source.id);
                self.export_source(&source, &stem, &threads_dir, &mut report)
                    .await;
                report.threads += 1;
            }
        }

        self.export_emojis(guild.id, &output_root).await;

        let source_dir = output_root.clone();
        let archive_path = self.options.root.join(format!("{root_name}.zip"));
        let dest = archive_path.clone();
        report.archive_path = tokio::task::spawn_blocking(move || pack_directory(&source_dir, &dest))
            .await
            .map_err(|e| AppError::archive(&archive_path, format!("Packing task failed: {e}")))??;

        tracing::info!(
            guild = %report.guild_name,
            root = %report.output_root.display(),
            archive = %report.archive_path.display(),
            channels = report.channels,
            threads = report.threads,
            messages = report.messages,
            attachments_saved = report.attachments_saved,
            attachments_failed = report.attachments_failed,
            "Backup finished"
        );

        Ok(report)
    }

    /// Active, archived-public and archived-private threads per parent channel.
    async fn collect_threads(
        &self,
        guild_id: Snowflake,
        text_channels: &[&ApiChannel],
    ) -> HashMap<Snowflake, Vec<ApiChannel>> {
        let api = self.api.as_ref();
        let mut candidates = match api.active_threads(guild_id).await {
            Ok(active) => active,
            Err(e) => {
                tracing::warn!(error = %e, "Active threads unavailable");
                Vec::new()
            }
        };

        for channel in text_channels {
            for scope in [ArchivedScope::Public, ArchivedScope::Private] {
                match api.archived_threads(channel.id, scope).await {
                    Ok(archived) => candidates.extend(archived),
                    Err(e) => tracing::warn!(
                        channel = %channel.display_name(),
                        scope = ?scope,
                        error = %e,
                        "Archived threads unavailable"
                    ),
                }
            }
        }

        let mut seen = HashSet::new();
        let mut by_parent: HashMap<Snowflake, Vec<ApiChannel>> = HashMap::new();
        for thread in candidates {
            let Some(parent) = thread.parent_id else {
                continue;
            };
            if seen.insert(thread.id) {
                by_parent.entry(parent).or_default().push(thread);
            }
        }

        for threads in by_parent.values_mut() {
            threads.sort_by_key(|t| t.id);
        }

        by_parent
    }

    /// Collect, render and download one source. Failures stay local.
    async fn export_source(
        &self,
        source: &HistorySource,
        stem: &str,
        dir: &Path,
        report: &mut RunReport,
    ) {
        let api = self.api.as_ref();
        let messages = HistoryCollector::new(api).collect(source).await;
        report.messages += messages.len();

        let rendered = render(&source.name, stem, &messages, dir, &self.options.formats).await;
        if let Err(e) = rendered {
            tracing::warn!(source = %source.name, error = %e, "Rendering failed");
        }

        if !self.options.download_attachments {
            return;
        }

        let materializer = AttachmentMaterializer::new(api, self.options.max_concurrent_downloads);
        let target = dir.join(attachments_dir_name(stem));
        match materializer.materialize(&messages, &target).await {
            Ok(outcome) => {
                report.attachments_saved += outcome.saved;
                report.attachments_failed += outcome.failed;
            }
            Err(e) => tracing::warn!(source = %source.name, error = %e, "Attachments skipped"),
        }
    }

    /// Write `emojis.json` and optionally the images. Failures stay local.
    async fn export_emojis(&self, guild_id: Snowflake, root: &Path) {
        let emojis: Vec<EmojiRecord> = match self.api.emojis(guild_id).await {
            Ok(raw) => raw.iter().filter_map(normalize_emoji).collect(),
            Err(e) => {
                tracing::warn!(error = %e, "Emoji list unavailable");
                Vec::new()
            }
        };

        let written = match serde_json::to_string_pretty(&emojis) {
            Ok(json) => write_atomic(&root.join("emojis.json"), json.as_bytes()).await,
            Err(e) => Err(AppError::json(e)),
        };
        if let Err(e) = written {
            tracing::warn!(error = %e, "Emoji list not written");
        }

        if !self.options.download_emojis || emojis.is_empty() {
            return;
        }

        let dir = root.join(EMOJIS_DIR);
        if let Err(e) = tokio::fs::create_dir_all(&dir).await {
            tracing::warn!(error = %e, "Emoji directory not created");
            return;
        }

        let mut stems = StemRegistry::default();
        let jobs: Vec<DownloadJob> = emojis
            .iter()
            .map(|emoji| DownloadJob {
                url: emoji.url.clone(),
                path: dir.join(format!(
                    "{}.{}",
                    stems.claim(&emoji.name, emoji.id),
                    emoji.extension()
                )),
            })
            .collect();

        let outcome = AttachmentMaterializer::new(self.api.as_ref(), self.options.max_concurrent_downloads)
            .download_all(jobs)
            .await;
        tracing::info!(
            total = outcome.total(),
            saved = outcome.saved,
            failed = outcome.failed,
            "Emoji images saved"
        );
    }
}

/// Create the run root; an existing directory at that path is an error.
async fn create_run_root(backup_root: &Path, output_root: &Path) -> Result<()> {
    tokio::fs::create_dir_all(backup_root).await.map_err(|e| {
        AppError::io(format!("Failed to create {}", backup_root.display()), e)
    })?;
    tokio::fs::create_dir(output_root).await.map_err(|e| {
        AppError::io(format!("Failed to create run root {}", output_root.display()), e)
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{MessageRecord, OutputFormat};
    use crate::infrastructure::discord::fake::{
        category, message, text_channel, thread, with_attachment, FakeGuild,
    };
    use crate::infrastructure::discord::models::ApiEmoji;
    use chrono::TimeZone;
    use std::fs::File;
    use tempfile::tempdir;

    const CAT_URL: &str = "https://cdn.example.com/attachments/20/3/cat.png?ex=1";

    fn started() -> DateTime<Local> {
        Local.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap()
    }

    fn options(root: &Path) -> RunOptions {
        RunOptions {
            root: root.to_path_buf(),
            formats: FormatSet::new([OutputFormat::Json, OutputFormat::Html]),
            download_attachments: true,
            download_emojis: false,
            max_concurrent_downloads: 4,
        }
    }

    fn test_guild() -> FakeGuild {
        let mut fake = FakeGuild::new("Test Guild");
        fake.channels = vec![category(10, "General"), text_channel(20, "chat", Some(10))];
        fake.histories.insert(
            Snowflake(20),
            vec![
                message(1, "mira", "first"),
                message(2, "kai", "second"),
                with_attachment(message(3, "mira", "third"), CAT_URL, "cat.png"),
            ],
        );
        fake.blobs.insert(CAT_URL.to_string(), b"meow".to_vec());
        fake
    }

    #[test]
    fn test_workspace_dir_name() {
        assert_eq!(workspace_dir_name("My Cool Guild"), "my_cool_guild");
        assert_eq!(workspace_dir_name("a/b:c"), "a_b_c");
        assert_eq!(workspace_dir_name("  "), "guild");
    }

    #[test]
    fn test_stem_registry_suffixes_repeats() {
        let mut stems = StemRegistry::default();
        assert_eq!(stems.claim("ideas", Snowflake(1)), "ideas");
        assert_eq!(stems.claim("ideas", Snowflake(2)), "ideas_2");
        assert_eq!(stems.claim("a/b", Snowflake(3)), "a_b");
        assert_eq!(stems.claim("..", Snowflake(4)), "unnamed");
    }

    #[test]
    fn test_stem_registry_never_reuses_a_suffixed_stem() {
        let mut stems = StemRegistry::default();
        assert_eq!(stems.claim("ideas_5", Snowflake(9)), "ideas_5");
        assert_eq!(stems.claim("ideas", Snowflake(1)), "ideas");
        assert_eq!(stems.claim("ideas", Snowflake(5)), "ideas_5_2");
        assert_eq!(stems.claim("ideas", Snowflake(5)), "ideas_5_3");
    }

    #[tokio::test]
    async fn test_channels_with_colliding_stems_keep_separate_files() {
        let dir = tempdir().unwrap();
        let mut fake = FakeGuild::new("Test Guild");
        let named = [(9, "ideas_5"), (1, "ideas"), (5, "ideas")];
        for (position, (id, name)) in named.into_iter().enumerate() {
            let mut channel = text_channel(id, name, None);
            channel.position = i64::try_from(position).unwrap();
            fake.channels.push(channel);
            fake.histories.insert(
                Snowflake(id),
                vec![message(100 + id, "mira", &format!("from {name} {id}"))],
            );
        }

        let report = Orchestrator::new(Arc::new(fake), options(dir.path()))
            .run_at(Snowflake(1), started())
            .await
            .unwrap();

        assert_eq!(report.channels, 3);
        let channels = report.output_root.join("channels");
        for (stem, text) in [
            ("ideas_5", "from ideas_5 9"),
            ("ideas", "from ideas 1"),
            ("ideas_5_2", "from ideas 5"),
        ] {
            let json = std::fs::read_to_string(channels.join(format!("{stem}.json"))).unwrap();
            assert!(json.contains(text), "{stem}");
        }
    }

    #[tokio::test]
    async fn test_full_run_writes_exports_and_archive() {
        let dir = tempdir().unwrap();
        let orchestrator = Orchestrator::new(Arc::new(test_guild()), options(dir.path()));

        let report = orchestrator.run_at(Snowflake(1), started()).await.unwrap();

        let root = dir.path().join("test_guild_20240501_120000");
        assert_eq!(report.output_root, root);
        assert_eq!(report.archive_path, dir.path().join("test_guild_20240501_120000.zip"));
        assert_eq!(report.channels, 1);
        assert_eq!(report.messages, 3);
        assert_eq!(report.attachments_saved, 1);

        let records: Vec<MessageRecord> = serde_json::from_str(
            &std::fs::read_to_string(root.join("channels/chat.json")).unwrap(),
        )
        .unwrap();
        let contents: Vec<_> = records.iter().map(|r| r.content.as_str()).collect();
        assert_eq!(contents, vec!["first", "second", "third"]);

        let html = std::fs::read_to_string(root.join("channels/chat.html")).unwrap();
        assert_eq!(html.matches("<div class=\"message\"").count(), 3);
        assert!(html.contains("<img src=\"chat_attachments/3_0_cat.png\""));
        assert!(!root.join("channels/chat.txt").exists());

        assert_eq!(
            std::fs::read(root.join("channels/chat_attachments/3_0_cat.png")).unwrap(),
            b"meow"
        );
        for name in ["structure.json", "structure.html", "members.json", "emojis.json"] {
            assert!(root.join(name).exists(), "{name}");
        }

        let mut archive = zip::ZipArchive::new(File::open(&report.archive_path).unwrap()).unwrap();
        assert!(archive.by_name("channels/chat.json").is_ok());
        assert!(archive.by_name("channels/chat_attachments/3_0_cat.png").is_ok());
    }

    #[tokio::test]
    async fn test_failing_channel_yields_empty_file() {
        let dir = tempdir().unwrap();
        let mut fake = test_guild();
        fake.channels.push(text_channel(21, "broken", Some(10)));
        fake.histories
            .insert(Snowflake(21), vec![message(9, "x", "hidden")]);
        fake.fail_after.insert(Snowflake(21), 0);

        let report = Orchestrator::new(Arc::new(fake), options(dir.path()))
            .run_at(Snowflake(1), started())
            .await
            .unwrap();

        let root = report.output_root;
        assert_eq!(
            std::fs::read_to_string(root.join("channels/broken.json")).unwrap(),
            "[]\n"
        );
        assert_eq!(report.channels, 2);
        assert!(report.archive_path.exists());
    }

    #[tokio::test]
    async fn test_threads_are_exported_once_with_unique_stems() {
        let dir = tempdir().unwrap();
        let mut fake = test_guild();
        fake.active_threads = vec![thread(50, "ideas", 20)];
        fake.archived.insert(
            (Snowflake(20), ArchivedScope::Public),
            vec![thread(50, "ideas", 20), thread(51, "ideas", 20)],
        );
        fake.histories
            .insert(Snowflake(50), vec![message(60, "mira", "in thread")]);
        fake.histories
            .insert(Snowflake(51), vec![message(61, "kai", "archived")]);

        let report = Orchestrator::new(Arc::new(fake), options(dir.path()))
            .run_at(Snowflake(1), started())
            .await
            .unwrap();

        assert_eq!(report.threads, 2);
        let threads = report.output_root.join("threads");
        assert!(std::fs::read_to_string(threads.join("ideas.json"))
            .unwrap()
            .contains("in thread"));
        assert!(std::fs::read_to_string(threads.join("ideas_51.json"))
            .unwrap()
            .contains("archived"));
    }

    #[tokio::test]
    async fn test_emoji_export_and_download() {
        let dir = tempdir().unwrap();
        let mut fake = test_guild();
        fake.emojis = vec![
            ApiEmoji {
                id: Some(Snowflake(3)),
                name: Some("dance".into()),
                animated: true,
            },
            ApiEmoji {
                id: Some(Snowflake(4)),
                name: Some("wave".into()),
                animated: false,
            },
        ];
        fake.blobs.insert(
            "https://cdn.discordapp.com/emojis/3.gif".into(),
            b"gif".to_vec(),
        );

        let mut opts = options(dir.path());
        opts.download_emojis = true;
        let report = Orchestrator::new(Arc::new(fake), opts)
            .run_at(Snowflake(1), started())
            .await
            .unwrap();

        let root = report.output_root;
        let emojis: Vec<EmojiRecord> =
            serde_json::from_str(&std::fs::read_to_string(root.join("emojis.json")).unwrap())
                .unwrap();
        assert_eq!(emojis.len(), 2);
        assert!(emojis[0].animated);
        assert!(root.join("emojis/dance.gif").exists());
        assert!(!root.join("emojis/wave.png").exists());
    }

    #[tokio::test]
    async fn test_structure_failure_is_fatal_and_keeps_partial_root() {
        let dir = tempdir().unwrap();
        let mut fake = test_guild();
        fake.fail_structure = true;

        let result = Orchestrator::new(Arc::new(fake), options(dir.path()))
            .run_at(Snowflake(1), started())
            .await;

        assert!(matches!(result, Err(AppError::Http { status: Some(503), .. })));
        assert!(dir.path().join("test_guild_20240501_120000").is_dir());
        assert!(!dir.path().join("test_guild_20240501_120000.zip").exists());
    }

    #[tokio::test]
    async fn test_colliding_run_root_is_fatal() {
        let dir = tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("test_guild_20240501_120000")).unwrap();

        let result = Orchestrator::new(Arc::new(test_guild()), options(dir.path()))
            .run_at(Snowflake(1), started())
            .await;
        assert!(matches!(result, Err(AppError::Io { .. })));
    }

    #[tokio::test]
    async fn test_unknown_guild_is_fatal() {
        let dir = tempdir().unwrap();
        let result = Orchestrator::new(Arc::new(test_guild()), options(dir.path()))
            .run_at(Snowflake(42), started())
            .await;
        assert!(result.is_err());
        assert!(std::fs::read_dir(dir.path()).unwrap().next().is_none());
    }
}
