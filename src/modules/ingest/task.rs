// Copyright © 2025 rustmailer.com
// Licensed under RustMailer License Agreement v1.0
// Unauthorized copying, modification, or distribution is prohibited.

use native_db::*;
use native_model::{native_model, Model};
use serde::{Deserialize, Serialize};
use std::{
    path::{Path, PathBuf},
    sync::{Arc, OnceLock},
};
use tokio::{
    fs::File,
    io::{AsyncReadExt, AsyncSeekExt},
};
use tracing::{debug, info, warn};

use crate::{
    modules::{
        context::Initialize,
        database::{async_find_impl, with_rw_transaction_impl},
        error::{code::ErrorCode, RollupResult},
        ingest::{config::ReverseProxyConfig, converter::LogConverter, VisitEvent},
        settings::cli::SETTINGS,
    },
    raise_error, utc_now,
};

/// Default upper bound on bytes consumed from the log in one run.
pub const MAX_CHUNK_BYTES: u64 = 8 * 1024 * 1024;

static LOG_INGESTOR: OnceLock<LogIngestor> = OnceLock::new();

/// Byte position up to which an access log has been turned into events.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[native_model(id = 4, version = 1)]
#[native_db]
pub struct IngestOffset {
    #[primary_key]
    pub path: String,
    pub offset: u64,
    pub updated_at: i64,
}

/// Events decoded from one chunk of the log and the offset right after the last complete line.
#[derive(Debug, Default)]
pub struct Chunk {
    pub events: Vec<VisitEvent>,
    pub next_offset: u64,
    pub lines: usize,
}

pub struct LogIngestor {
    path: PathBuf,
    converter: LogConverter,
    max_chunk_bytes: u64,
}

impl LogIngestor {
    pub fn new(path: impl Into<PathBuf>, converter: LogConverter) -> Self {
        Self {
            path: path.into(),
            converter,
            max_chunk_bytes: MAX_CHUNK_BYTES,
        }
    }

    /// Limits how much of the log one run reads. A single line longer than this is skipped.
    pub fn with_max_chunk_bytes(mut self, max_chunk_bytes: u64) -> Self {
        self.max_chunk_bytes = max_chunk_bytes.max(1);
        self
    }

    /// The ingestor set up at startup, if an access log is configured.
    pub fn get() -> Option<&'static LogIngestor> {
        LOG_INGESTOR.get()
    }

    fn key(&self) -> String {
        self.path.to_string_lossy().into_owned()
    }

    /// Reads complete lines after `offset`. A log shorter than `offset` was rotated and is read from the start.
    pub async fn read_chunk(&self, offset: u64) -> RollupResult<Chunk> {
        let mut file = File::open(&self.path).await.map_err(|e| {
            raise_error!(
                format!("Failed to open access log {:?}: {}", self.path, e),
                ErrorCode::IngestFailed
            )
        })?;
        let len = file
            .metadata()
            .await
            .map_err(|e| raise_error!(format!("{:#?}", e), ErrorCode::IngestFailed))?
            .len();
        let start = if len < offset {
            warn!(
                "Access log {:?} shrank from {} to {} bytes, reading from the start",
                self.path, offset, len
            );
            0
        } else {
            offset
        };
        if start == len {
            return Ok(Chunk {
                next_offset: start,
                ..Default::default()
            });
        }

        file.seek(std::io::SeekFrom::Start(start))
            .await
            .map_err(|e| raise_error!(format!("{:#?}", e), ErrorCode::IngestFailed))?;
        let mut buffer = Vec::new();
        (&mut file)
            .take(self.max_chunk_bytes)
            .read_to_end(&mut buffer)
            .await
            .map_err(|e| raise_error!(format!("{:#?}", e), ErrorCode::IngestFailed))?;

        let Some(end) = buffer.iter().rposition(|b| *b == b'\n') else {
            if (buffer.len() as u64) < self.max_chunk_bytes {
                // A trailing partial line is left for the next run.
                return Ok(Chunk {
                    next_offset: start,
                    ..Default::default()
                });
            }
            return self
                .skip_oversized_line(&mut file, start, start + buffer.len() as u64)
                .await;
        };
        let complete = &buffer[..=end];
        let now = utc_now!() / 1000;
        let mut chunk = Chunk {
            next_offset: start + complete.len() as u64,
            ..Default::default()
        };
        for line in complete.split(|b| *b == b'\n') {
            if line.is_empty() {
                continue;
            }
            chunk.lines += 1;
            let converted = self.converter.convert(&String::from_utf8_lossy(line));
            let ts = converted.ts.unwrap_or(now);
            chunk
                .events
                .extend(converted.inputs.into_iter().map(|input| input.into_event(ts)));
        }
        Ok(chunk)
    }

    /// Moves past a line that starts at `start` and does not fit in one chunk.
    ///
    /// Returns an empty chunk ending right after its newline, or one ending at
    /// `start` while the line is still being written.
    async fn skip_oversized_line(
        &self,
        file: &mut File,
        start: u64,
        mut position: u64,
    ) -> RollupResult<Chunk> {
        let mut piece = Vec::new();
        loop {
            piece.clear();
            (&mut *file)
                .take(self.max_chunk_bytes)
                .read_to_end(&mut piece)
                .await
                .map_err(|e| raise_error!(format!("{:#?}", e), ErrorCode::IngestFailed))?;
            if piece.is_empty() {
                return Ok(Chunk {
                    next_offset: start,
                    ..Default::default()
                });
            }
            if let Some(newline) = piece.iter().position(|b| *b == b'\n') {
                let next_offset = position + newline as u64 + 1;
                warn!(
                    "Skipped a {} byte line at offset {} of {:?}, longer than the {} byte limit",
                    next_offset - start,
                    start,
                    self.path,
                    self.max_chunk_bytes
                );
                return Ok(Chunk {
                    next_offset,
                    ..Default::default()
                });
            }
            position += piece.len() as u64;
        }
    }

    /// Stores the next chunk of events and the advanced offset in one transaction.
    ///
    /// Returns `None` when the log had nothing new, otherwise the number of events stored.
    pub async fn run_once(&self, database: &Arc<Database<'static>>) -> RollupResult<Option<usize>> {
        let key = self.key();
        let offset = async_find_impl::<IngestOffset>(database, key.clone())
            .await?
            .map(|stored| stored.offset)
            .unwrap_or(0);
        let chunk = self.read_chunk(offset).await?;
        if chunk.next_offset == offset {
            return Ok(None);
        }
        let stored = chunk.events.len();
        debug!(
            "Read {} lines from {:?}, {} visit events",
            chunk.lines, self.path, stored
        );
        let marker = IngestOffset {
            path: key,
            offset: chunk.next_offset,
            updated_at: utc_now!(),
        };
        with_rw_transaction_impl(database, move |rw| {
            for event in chunk.events {
                rw.insert(event)
                    .map_err(|e| raise_error!(format!("{:#?}", e), ErrorCode::StorageError))?;
            }
            rw.upsert(marker)
                .map_err(|e| raise_error!(format!("{:#?}", e), ErrorCode::StorageError))?;
            Ok(())
        })
        .await?;
        Ok(Some(stored))
    }

    /// Ingests until the stored offset has caught up with the end of the log.
    pub async fn drain(&self, database: &Arc<Database<'static>>) -> RollupResult<usize> {
        let mut total = 0;
        while let Some(stored) = self.run_once(database).await? {
            total += stored;
        }
        if total > 0 {
            info!("Stored {} visit events from {:?}", total, self.path);
        }
        Ok(total)
    }
}

impl Initialize for LogIngestor {
    async fn initialize() -> RollupResult<()> {
        let Some(access_log) = SETTINGS.rollup_access_log.as_deref() else {
            info!("No access log configured, visit ingestion disabled");
            return Ok(());
        };
        let config_path = SETTINGS.rollup_reverse_proxy_config.as_deref().ok_or_else(|| {
            raise_error!(
                "'rollup_reverse_proxy_config' is required when an access log is set".into(),
                ErrorCode::MissingConfiguration
            )
        })?;
        let config = ReverseProxyConfig::load(Path::new(config_path)).await?;
        info!(
            "Ingesting visits from {} for {} sites under {}",
            access_log,
            config.sites.len(),
            config.fqdn
        );
        let _ = LOG_INGESTOR.set(LogIngestor::new(access_log, LogConverter::new(config)));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::modules::{
        database::{in_memory_database, list_all_impl},
        ingest::{config::sample_config, VisitKind},
    };
    use std::io::Write;
    use tempfile::NamedTempFile;

    const HOME: &str = r#"{"msg":"handled request","ts":1710511200.5,"request":{"host":"nomad.renaud.test","uri":"/"}}"#;
    const NOISE: &str = r#"{"msg":"handled request","request":{"host":"nomad.renaud.test","uri":"/x.css"}}"#;

    fn ingestor(file: &NamedTempFile) -> LogIngestor {
        LogIngestor::new(file.path(), LogConverter::new(sample_config()))
    }

    #[tokio::test]
    async fn test_partial_line_is_left_for_next_run() {
        let mut file = NamedTempFile::new().unwrap();
        write!(file, "{}\n{}\n{{\"msg\":\"handl", HOME, NOISE).unwrap();
        file.flush().unwrap();

        let chunk = ingestor(&file).read_chunk(0).await.unwrap();
        assert_eq!(chunk.lines, 2);
        assert_eq!(chunk.events.len(), 1);
        assert_eq!(chunk.events[0].ts, 1710511200);
        assert_eq!(chunk.events[0].kind, VisitKind::ContentHome);
        assert_eq!(chunk.next_offset, (HOME.len() + NOISE.len() + 2) as u64);
    }

    #[tokio::test]
    async fn test_offset_is_persisted_with_events() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "{}", HOME).unwrap();
        file.flush().unwrap();
        let db = in_memory_database();
        let ingestor = ingestor(&file);

        assert_eq!(ingestor.run_once(&db).await.unwrap(), Some(1));
        // Nothing new in the log: no duplicate events.
        assert_eq!(ingestor.run_once(&db).await.unwrap(), None);

        writeln!(file, "{}", HOME).unwrap();
        file.flush().unwrap();
        assert_eq!(ingestor.run_once(&db).await.unwrap(), Some(1));

        let events: Vec<VisitEvent> = list_all_impl(&db).await.unwrap();
        assert_eq!(events.len(), 2);
        let offset: Option<IngestOffset> = async_find_impl(&db, ingestor.key()).await.unwrap();
        assert_eq!(offset.unwrap().offset, 2 * (HOME.len() as u64 + 1));
    }

    #[tokio::test]
    async fn test_truncated_log_is_read_from_start() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "{}", HOME).unwrap();
        file.flush().unwrap();

        let chunk = ingestor(&file).read_chunk(10_000).await.unwrap();
        assert_eq!(chunk.events.len(), 1);
        assert_eq!(chunk.next_offset, HOME.len() as u64 + 1);
    }

    #[tokio::test]
    async fn test_oversized_line_is_skipped() {
        let mut file = NamedTempFile::new().unwrap();
        let long = "x".repeat(1000);
        write!(file, "{}\n{}\n", long, HOME).unwrap();
        file.flush().unwrap();
        let ingestor = ingestor(&file).with_max_chunk_bytes(256);

        let skipped = ingestor.read_chunk(0).await.unwrap();
        assert!(skipped.events.is_empty());
        assert_eq!(skipped.next_offset, 1001);

        let chunk = ingestor.read_chunk(skipped.next_offset).await.unwrap();
        assert_eq!(chunk.events.len(), 1);
        assert_eq!(chunk.next_offset, 1001 + HOME.len() as u64 + 1);
    }

    #[tokio::test]
    async fn test_oversized_line_still_being_written_is_kept() {
        let mut file = NamedTempFile::new().unwrap();
        write!(file, "{}", "x".repeat(600)).unwrap();
        file.flush().unwrap();

        let chunk = ingestor(&file)
            .with_max_chunk_bytes(256)
            .read_chunk(0)
            .await
            .unwrap();
        assert_eq!(chunk.next_offset, 0);
        assert!(chunk.events.is_empty());
    }

    #[tokio::test]
    async fn test_drain_does_not_stall_on_oversized_line() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "{}", HOME).unwrap();
        writeln!(file, "{}", "x".repeat(700)).unwrap();
        for _ in 0..4 {
            writeln!(file, "{}", HOME).unwrap();
        }
        file.flush().unwrap();
        let db = in_memory_database();
        let ingestor = ingestor(&file).with_max_chunk_bytes(256);

        assert_eq!(ingestor.drain(&db).await.unwrap(), 5);
        assert_eq!(ingestor.drain(&db).await.unwrap(), 0);
        let events: Vec<VisitEvent> = list_all_impl(&db).await.unwrap();
        assert_eq!(events.len(), 5);
    }

    #[tokio::test]
    async fn test_missing_log_is_an_ingest_error() {
        let ingestor = LogIngestor::new(
            "/nonexistent/access.log",
            LogConverter::new(sample_config()),
        );
        let err = ingestor.read_chunk(0).await.unwrap_err();
        assert_eq!(err.code(), ErrorCode::IngestFailed);
    }
}
