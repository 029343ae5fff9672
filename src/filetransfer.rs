//! Chunked file transfer (C6, §4.6).
//!
//! Two halves share one registry: a per-user receive listener (spawned when
//! a login declares a `fileTcp` port) that drives the
//! `READING_HEADER → WRITING_ACK → READING_FILE_DATA → WRITING_SUCCESS`
//! state machine per accepted connection, and a sender path invoked from the
//! HTTP bridge that dials a peer's listener and pushes a file. Grounded in
//! the teacher's per-connection tokio task shape (`server.rs::tcp_server`)
//! and its "drive the state machine to completion or log and move on"
//! discipline — a connection failing never takes the listener down.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::Serialize;
use tokio::fs::{self, File};
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio_util::sync::CancellationToken;

use crate::error::NexusError;
use crate::statistics::Statistics;

const MAX_HEADER_BYTES: usize = 8 * 1024;
const CHUNK_BYTES: usize = 64 * 1024;

#[derive(Debug)]
enum TransferOutcome {
    Completed,
    Failed(String),
}

struct ProgressEntry {
    transfer_id: String,
    filename: String,
    total_bytes: u64,
    bytes_transferred: AtomicU64,
    sender: String,
    start_time: DateTime<Utc>,
    outcome: RwLock<Option<TransferOutcome>>,
}

#[derive(Serialize)]
pub struct ProgressSnapshot {
    pub transfer_id: String,
    pub filename: String,
    pub total_bytes: u64,
    pub bytes_transferred: u64,
    pub sender: String,
    pub start_time: DateTime<Utc>,
    pub completed: bool,
    pub failed: bool,
    pub error_message: Option<String>,
}

impl ProgressEntry {
    fn snapshot(&self) -> ProgressSnapshot {
        let (completed, failed, error_message) = match &*self.outcome.read() {
            None => (false, false, None),
            Some(TransferOutcome::Completed) => (true, false, None),
            Some(TransferOutcome::Failed(reason)) => (false, true, Some(reason.clone())),
        };
        ProgressSnapshot {
            transfer_id: self.transfer_id.clone(),
            filename: self.filename.clone(),
            total_bytes: self.total_bytes,
            bytes_transferred: self.bytes_transferred.load(Ordering::Relaxed),
            sender: self.sender.clone(),
            start_time: self.start_time,
            completed,
            failed,
            error_message,
        }
    }
}

#[derive(Serialize)]
pub struct DownloadEntry {
    pub filename: String,
    pub size_bytes: u64,
    pub modified_at: DateTime<Utc>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SendOutcome {
    pub success: bool,
    pub transfer_id: String,
    pub filename: String,
    pub filesize: u64,
    pub message: String,
}

/// Owns the downloads sink directory, the per-receiving-user progress logs,
/// and the set of live per-user receive listeners.
pub struct FileTransferRegistry {
    downloads_dir: PathBuf,
    progress: RwLock<HashMap<String, Vec<Arc<ProgressEntry>>>>,
    listeners: RwLock<HashMap<String, CancellationToken>>,
}

impl FileTransferRegistry {
    pub fn new(downloads_dir: String) -> Self {
        let downloads_dir = PathBuf::from(downloads_dir);
        if let Err(e) = std::fs::create_dir_all(&downloads_dir) {
            log::warn!("could not create downloads directory {downloads_dir:?}: {e}");
        }
        Self {
            downloads_dir,
            progress: RwLock::new(HashMap::new()),
            listeners: RwLock::new(HashMap::new()),
        }
    }

    /// Starts (or restarts, on relogin) a receive listener for `username` on
    /// `port`. Accepted connections run the transfer state machine and file
    /// their progress under this username.
    pub fn start_receiver(self: &Arc<Self>, username: String, port: u16, statistics: Arc<Statistics>) {
        self.stop_receiver(&username);

        let cancel = CancellationToken::new();
        self.listeners.write().insert(username.clone(), cancel.clone());

        let registry = self.clone();
        tokio::spawn(async move {
            let listener = match TcpListener::bind(("0.0.0.0", port)).await {
                Ok(listener) => listener,
                Err(e) => {
                    log::warn!("file transfer listener for user={username} port={port} failed to bind: {e}");
                    return;
                }
            };
            log::info!("file transfer listener started: user={username} port={port}");

            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    accepted = listener.accept() => {
                        let Ok((stream, peer)) = accepted else { continue };
                        let registry = registry.clone();
                        let username = username.clone();
                        let statistics = statistics.clone();
                        tokio::spawn(async move {
                            if let Err(e) = registry.drive_connection(stream, &username).await {
                                log::debug!("file transfer from {peer} to user={username} failed: {e}");
                                statistics.file_transfers_failed.fetch_add(1, Ordering::Relaxed);
                            } else {
                                statistics.file_transfers_completed.fetch_add(1, Ordering::Relaxed);
                            }
                        });
                    }
                }
            }
            log::info!("file transfer listener stopped: user={username}");
        });
    }

    pub fn stop_receiver(&self, username: &str) {
        if let Some(cancel) = self.listeners.write().remove(username) {
            cancel.cancel();
        }
    }

    /// Drives one accepted connection through
    /// `READING_HEADER → WRITING_ACK → READING_FILE_DATA → WRITING_SUCCESS`.
    async fn drive_connection(&self, stream: TcpStream, receiver: &str) -> anyhow::Result<()> {
        let mut reader = BufReader::new(stream);
        let mut header_line = String::new();
        let read = reader.take(MAX_HEADER_BYTES as u64).read_line(&mut header_line).await?;
        if read == 0 {
            anyhow::bail!("peer closed before sending a header");
        }

        let header = match parse_send_file_header(header_line.trim_end_matches(['\n', '\r'])) {
            Ok(header) => header,
            Err(e) => {
                let stream = reader.get_mut();
                stream.write_all(format!("ERROR|{e}\n").as_bytes()).await?;
                anyhow::bail!(e);
            }
        };

        let saved_name = match self.reserve_filename(&header.filename) {
            Ok(name) => name,
            Err(e) => {
                reader.get_mut().write_all(format!("ERROR|{e}\n").as_bytes()).await?;
                anyhow::bail!(e);
            }
        };
        let dest_path = self.downloads_dir.join(&saved_name);

        reader
            .get_mut()
            .write_all(format!("OK|{saved_name}\n").as_bytes())
            .await?;

        let progress = Arc::new(ProgressEntry {
            transfer_id: header.transfer_id.clone(),
            filename: saved_name.clone(),
            total_bytes: header.filesize,
            bytes_transferred: AtomicU64::new(0),
            sender: header.sender.clone(),
            start_time: Utc::now(),
            outcome: RwLock::new(None),
        });
        self.progress
            .write()
            .entry(receiver.to_string())
            .or_default()
            .push(progress.clone());

        let result = self.receive_payload(&mut reader, &dest_path, header.filesize, &progress).await;

        let stream = reader.get_mut();
        match &result {
            Ok(()) => {
                *progress.outcome.write() = Some(TransferOutcome::Completed);
                stream.write_all(b"SUCCESS\n").await?;
            }
            Err(e) => {
                *progress.outcome.write() = Some(TransferOutcome::Failed(e.to_string()));
                stream.write_all(format!("ERROR|{e}\n").as_bytes()).await?;
            }
        }
        result
    }

    async fn receive_payload(
        &self,
        reader: &mut BufReader<TcpStream>,
        dest_path: &Path,
        filesize: u64,
        progress: &ProgressEntry,
    ) -> anyhow::Result<()> {
        let mut file = File::create(dest_path).await?;
        let mut remaining = filesize;
        let mut buf = vec![0u8; CHUNK_BYTES];

        while remaining > 0 {
            let want = remaining.min(CHUNK_BYTES as u64) as usize;
            let read = reader.read(&mut buf[..want]).await?;
            if read == 0 {
                anyhow::bail!("connection closed after {} of {filesize} bytes", filesize - remaining);
            }
            file.write_all(&buf[..read]).await?;
            remaining -= read as u64;
            progress
                .bytes_transferred
                .store(filesize - remaining, Ordering::Relaxed);
        }
        file.flush().await?;
        Ok(())
    }

    /// Sanitizes `requested_name` and reserves a collision-free path under
    /// the downloads directory, returning the name actually used.
    fn reserve_filename(&self, requested_name: &str) -> Result<String, NexusError> {
        let sanitized = sanitize_filename(requested_name);
        if sanitized.is_empty() {
            return Err(NexusError::Protocol("empty filename".into()));
        }

        let (stem, ext) = split_stem_ext(&sanitized);
        let mut candidate = sanitized.clone();
        let mut suffix = 0u32;
        while self.downloads_dir.join(&candidate).exists() {
            suffix += 1;
            candidate = match &ext {
                Some(ext) => format!("{stem}_{suffix}.{ext}"),
                None => format!("{stem}_{suffix}"),
            };
        }
        Ok(candidate)
    }

    /// Dials `peer_addr`'s receive listener and pushes `file_path` (§6
    /// `POST /api/filetransfer/send`). The transfer id is minted here, not
    /// accepted from the caller — the client has no way to guarantee
    /// uniqueness across concurrent senders.
    pub async fn send(
        &self,
        peer_addr: (String, u16),
        file_path: &str,
        sender_username: &str,
    ) -> Result<SendOutcome, NexusError> {
        let transfer_id = uuid::Uuid::new_v4().to_string();
        let metadata = fs::metadata(file_path)
            .await
            .map_err(|e| NexusError::NotFound(format!("file {file_path}: {e}")))?;
        let filesize = metadata.len();
        let filename = Path::new(file_path)
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("upload.bin")
            .to_string();

        let mut stream = TcpStream::connect((peer_addr.0.as_str(), peer_addr.1))
            .await
            .map_err(|e| NexusError::Transport(e.to_string()))?;

        let header = format!("SEND_FILE|{transfer_id}|{filename}|{filesize}|{sender_username}\n");
        stream
            .write_all(header.as_bytes())
            .await
            .map_err(|e| NexusError::Transport(e.to_string()))?;

        let mut reader = BufReader::new(&mut stream);
        let mut ack = String::new();
        reader
            .read_line(&mut ack)
            .await
            .map_err(|e| NexusError::Transport(e.to_string()))?;
        let saved_name = parse_ack_line(ack.trim_end_matches(['\n', '\r']))?;

        let mut source = File::open(file_path)
            .await
            .map_err(|e| NexusError::Transport(e.to_string()))?;
        let mut buf = vec![0u8; CHUNK_BYTES];
        loop {
            let read = source
                .read(&mut buf)
                .await
                .map_err(|e| NexusError::Transport(e.to_string()))?;
            if read == 0 {
                break;
            }
            stream
                .write_all(&buf[..read])
                .await
                .map_err(|e| NexusError::Transport(e.to_string()))?;
        }

        let mut outcome = String::new();
        reader
            .read_line(&mut outcome)
            .await
            .map_err(|e| NexusError::Transport(e.to_string()))?;
        if outcome.trim_end_matches(['\n', '\r']) != "SUCCESS" {
            return Err(NexusError::Transport(outcome.trim().to_string()));
        }

        Ok(SendOutcome {
            success: true,
            transfer_id,
            filename: saved_name,
            filesize,
            message: "transfer completed".to_string(),
        })
    }

    pub fn progress_for(&self, username: &str) -> Vec<ProgressSnapshot> {
        self.progress
            .read()
            .get(username)
            .map(|entries| entries.iter().map(|e| e.snapshot()).collect())
            .unwrap_or_default()
    }

    pub async fn downloads_listing(&self) -> anyhow::Result<Vec<DownloadEntry>> {
        let mut listing = Vec::new();
        let mut entries = fs::read_dir(&self.downloads_dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            let metadata = entry.metadata().await?;
            if !metadata.is_file() {
                continue;
            }
            let modified: DateTime<Utc> = metadata.modified()?.into();
            listing.push(DownloadEntry {
                filename: entry.file_name().to_string_lossy().into_owned(),
                size_bytes: metadata.len(),
                modified_at: modified,
            });
        }
        Ok(listing)
    }

    pub fn download_path(&self, filename: &str) -> Option<PathBuf> {
        let sanitized = sanitize_filename(filename);
        let path = self.downloads_dir.join(&sanitized);
        path.is_file().then_some(path)
    }
}

struct SendFileHeader {
    transfer_id: String,
    filename: String,
    filesize: u64,
    sender: String,
}

fn parse_send_file_header(line: &str) -> Result<SendFileHeader, String> {
    let mut parts = line.splitn(5, '|');
    let (Some(tag), Some(transfer_id), Some(filename), Some(filesize_str), Some(sender)) =
        (parts.next(), parts.next(), parts.next(), parts.next(), parts.next())
    else {
        return Err("malformed SEND_FILE header".into());
    };
    if tag != "SEND_FILE" {
        return Err(format!("unexpected header tag '{tag}'"));
    }
    let filesize = filesize_str.parse::<u64>().map_err(|_| "filesize must be a non-negative integer".to_string())?;
    if filename.is_empty() || sender.is_empty() {
        return Err("filename and senderUsername must be non-empty".into());
    }
    Ok(SendFileHeader {
        transfer_id: transfer_id.to_string(),
        filename: filename.to_string(),
        filesize,
        sender: sender.to_string(),
    })
}

fn parse_ack_line(line: &str) -> Result<String, NexusError> {
    let mut parts = line.splitn(2, '|');
    match (parts.next(), parts.next()) {
        (Some("OK"), Some(saved_name)) => Ok(saved_name.to_string()),
        (Some("ERROR"), Some(reason)) => Err(NexusError::Protocol(reason.to_string())),
        _ => Err(NexusError::Protocol("malformed ack line".into())),
    }
}

/// Replaces path separators with `_` and any character outside
/// `[A-Za-z0-9._-]` with `_` (§4.6 invariants).
fn sanitize_filename(name: &str) -> String {
    name.chars()
        .map(|c| if c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-') { c } else { '_' })
        .collect()
}

fn split_stem_ext(name: &str) -> (String, Option<String>) {
    match name.rsplit_once('.') {
        Some((stem, ext)) if !stem.is_empty() => (stem.to_string(), Some(ext.to_string())),
        _ => (name.to_string(), None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sanitizes_path_separators_and_odd_characters() {
        assert_eq!(sanitize_filename("../../etc/passwd"), "..__.._etc_passwd");
        assert_eq!(sanitize_filename("report (final).pdf"), "report__final_.pdf");
    }

    #[test]
    fn header_parse_rejects_negative_and_non_numeric_filesize() {
        assert!(parse_send_file_header("SEND_FILE|t1|a.txt|-5|alice").is_err());
        assert!(parse_send_file_header("SEND_FILE|t1|a.txt|notanumber|alice").is_err());
    }

    #[test]
    fn header_parse_accepts_zero_byte_transfer() {
        let header = parse_send_file_header("SEND_FILE|t1|empty.txt|0|alice").unwrap();
        assert_eq!(header.filesize, 0);
    }

    #[test]
    fn reserve_filename_suffixes_on_collision() {
        let dir = std::env::temp_dir().join(format!("nexus-filetransfer-test-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(dir.join("report.pdf"), b"x").unwrap();

        let registry = FileTransferRegistry::new(dir.to_string_lossy().into_owned());
        let reserved = registry.reserve_filename("report.pdf").unwrap();
        assert_eq!(reserved, "report_1.pdf");

        std::fs::remove_dir_all(&dir).unwrap();
    }
}
