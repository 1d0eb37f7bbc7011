//! Append-only per-device session files with rotation
//!
//! Layout under the storage root:
//!
//! ```text
//! <root>/<device_dir>/<device_dir>_<session:04>_<part:03>.log
//! ```
//!
//! Every part starts with a `#` header block, holds one line per record and
//! ends with a `#` footer that states the size of the part before the footer.

use std::collections::HashMap;
use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Component, Path, PathBuf};
use std::time::SystemTime;

use btlogger_core::{DeviceAddress, DeviceIdentity, LogRecord, StorageConfig, StorageError};
use chrono::{Local, SecondsFormat};
use serde::Serialize;
use tracing::{debug, info, warn};

const FILE_EXTENSION: &str = "log";

// ----------------------------------------------------------------------------
// Open Sessions
// ----------------------------------------------------------------------------

/// The open part of one device's session
#[derive(Debug)]
pub struct Session {
    owner: DeviceIdentity,
    device_dir: String,
    file_path: PathBuf,
    file: File,
    bytes_written: u64,
    records: u64,
    session_number: u32,
    sequence_number: u32,
}

impl Session {
    pub fn owner(&self) -> &DeviceIdentity {
        &self.owner
    }

    pub fn file_path(&self) -> &Path {
        &self.file_path
    }

    pub fn bytes_written(&self) -> u64 {
        self.bytes_written
    }

    /// Records in the current part
    pub fn records(&self) -> u64 {
        self.records
    }

    pub fn session_number(&self) -> u32 {
        self.session_number
    }

    /// Part number within the session, starting at 1
    pub fn sequence_number(&self) -> u32 {
        self.sequence_number
    }

    fn write_line(&mut self, line: &str) -> std::io::Result<()> {
        self.file.write_all(line.as_bytes())?;
        self.file.flush()?;
        self.bytes_written += line.len() as u64;
        Ok(())
    }

    /// Write the footer and release the file
    fn finish(mut self) -> Result<PathBuf, StorageError> {
        let footer = format!(
            "# Closed: {}\n# Size: {} bytes\n",
            timestamp(),
            self.bytes_written
        );
        self.file
            .write_all(footer.as_bytes())
            .and_then(|_| self.file.flush())
            .map_err(|e| StorageError::io(&self.file_path, e))?;
        Ok(self.file_path)
    }
}

/// A session file found on disk
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SessionFileInfo {
    /// Path relative to the storage root, `/` separated
    pub path: String,
    pub device_dir: String,
    pub session_number: u32,
    pub part_number: u32,
    pub size: u64,
    #[serde(skip)]
    pub modified: Option<SystemTime>,
    /// Whether the file is still being written
    pub open: bool,
}

// ----------------------------------------------------------------------------
// Session Log
// ----------------------------------------------------------------------------

pub struct SessionLog {
    config: StorageConfig,
    available: bool,
    sessions: HashMap<DeviceAddress, Session>,
}

impl SessionLog {
    /// Open the store, creating the root directory if needed. A root that
    /// cannot be created leaves the store unavailable rather than failing.
    pub fn new(config: StorageConfig) -> Self {
        let available = match fs::create_dir_all(&config.root) {
            Ok(()) => true,
            Err(e) => {
                warn!(
                    "Log storage at {} unavailable, records will not be saved: {}",
                    config.root.display(),
                    e
                );
                false
            }
        };

        Self {
            config,
            available,
            sessions: HashMap::new(),
        }
    }

    pub fn is_available(&self) -> bool {
        self.available
    }

    pub fn root(&self) -> &Path {
        &self.config.root
    }

    pub fn open_session(&self, address: &DeviceAddress) -> Option<&Session> {
        self.sessions.get(address)
    }

    pub fn open_session_count(&self) -> usize {
        self.sessions.len()
    }

    fn unavailable(&self) -> StorageError {
        StorageError::Unavailable {
            root: self.config.root.display().to_string(),
        }
    }

    // ------------------------------------------------------------------------
    // Writing
    // ------------------------------------------------------------------------

    /// Open a session for the device unless one is already open
    pub fn start_session(&mut self, device: &DeviceIdentity) -> Result<PathBuf, StorageError> {
        if !self.available {
            return Err(self.unavailable());
        }
        if let Some(session) = self.sessions.get(&device.address) {
            return Ok(session.file_path.clone());
        }

        let device_dir = device_dir_name(device);
        let dir = self.config.root.join(&device_dir);
        fs::create_dir_all(&dir).map_err(|e| StorageError::io(&dir, e))?;

        let session_number = next_session_number(&dir, &device_dir)?;
        let session = self.open_part(device.clone(), device_dir, session_number, 1)?;
        let path = session.file_path.clone();
        info!("Started session {} for {} at {}", session_number, device, path.display());

        self.sessions.insert(device.address.clone(), session);
        Ok(path)
    }

    fn open_part(
        &self,
        owner: DeviceIdentity,
        device_dir: String,
        session_number: u32,
        sequence_number: u32,
    ) -> Result<Session, StorageError> {
        let file_name = format!(
            "{}_{:04}_{:03}.{}",
            device_dir, session_number, sequence_number, FILE_EXTENSION
        );
        let file_path = self.config.root.join(&device_dir).join(file_name);

        let file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .open(&file_path)
            .map_err(|e| StorageError::io(&file_path, e))?;

        let mut session = Session {
            owner,
            device_dir,
            file_path,
            file,
            bytes_written: 0,
            records: 0,
            session_number,
            sequence_number,
        };

        let header = format!(
            "# BTLogger session\n# Device: {}\n# Session: {} Part: {}\n# Started: {}\n# Format: v1 timestamp_ms,level,tag,message\n",
            session.owner, session_number, sequence_number,
            timestamp()
        );
        session
            .write_line(&header)
            .map_err(|e| StorageError::io(&session.file_path, e))?;
        Ok(session)
    }

    /// Append one record, opening or rotating the device's session as needed
    pub fn append(&mut self, device: &DeviceIdentity, record: &LogRecord) -> Result<(), StorageError> {
        if !self.available {
            return Err(self.unavailable());
        }
        if !self.sessions.contains_key(&device.address) {
            self.start_session(device)?;
        }

        let line = format_record_line(record);
        let needs_rotation = self.sessions.get(&device.address).is_some_and(|session| {
            session.records > 0
                && session.bytes_written + line.len() as u64 > self.config.rotation_threshold
        });
        if needs_rotation {
            self.rotate(&device.address)?;
        }

        let Some(session) = self.sessions.get_mut(&device.address) else {
            return Err(self.unavailable());
        };
        match session.write_line(&line) {
            Ok(()) => {
                session.records += 1;
                Ok(())
            }
            Err(e) => {
                let err = StorageError::io(&session.file_path, e);
                // Stop writing to this file; the next record starts a new session
                if let Some(session) = self.sessions.remove(&device.address) {
                    warn!("Closing session {} after write failure", session.file_path.display());
                    if let Err(e) = session.finish() {
                        warn!("Failed to close session: {}", e);
                    }
                }
                Err(err)
            }
        }
    }

    fn rotate(&mut self, address: &DeviceAddress) -> Result<(), StorageError> {
        let Some(session) = self.sessions.remove(address) else {
            return Ok(());
        };

        let owner = session.owner.clone();
        let device_dir = session.device_dir.clone();
        let session_number = session.session_number;
        let next_part = session.sequence_number + 1;
        let closed = session.finish()?;

        if let Some(max_files) = self.config.max_files_per_session {
            if next_part > max_files {
                warn!("Session {} for {} reached {} files", session_number, owner, max_files);
                return Err(StorageError::RotationLimit {
                    device: owner.to_string(),
                    max_files,
                });
            }
        }

        let successor = self.open_part(owner, device_dir, session_number, next_part)?;
        debug!(
            "Rotated {} to {}",
            closed.display(),
            successor.file_path.display()
        );
        self.sessions.insert(address.clone(), successor);
        Ok(())
    }

    /// Close the device's session. Returns whether one was open.
    pub fn end_session(&mut self, address: &DeviceAddress) -> Result<bool, StorageError> {
        match self.sessions.remove(address) {
            Some(session) => {
                let path = session.finish()?;
                info!("Closed session {}", path.display());
                Ok(true)
            }
            None => Ok(false),
        }
    }

    pub fn close_all(&mut self) {
        for (_, session) in self.sessions.drain() {
            match session.finish() {
                Ok(path) => debug!("Closed session {}", path.display()),
                Err(e) => warn!("Failed to close session: {}", e),
            }
        }
    }

    // ------------------------------------------------------------------------
    // Browsing
    // ------------------------------------------------------------------------

    /// Every session file under the root, sorted by device, session and part
    pub fn list_sessions(&self) -> Vec<SessionFileInfo> {
        let mut files = Vec::new();
        let Ok(devices) = fs::read_dir(&self.config.root) else {
            return files;
        };

        for device in devices.flatten() {
            let device_path = device.path();
            if !device_path.is_dir() {
                continue;
            }
            let Some(device_dir) = device_path.file_name().and_then(|n| n.to_str()).map(str::to_string) else {
                continue;
            };
            let Ok(entries) = fs::read_dir(&device_path) else {
                continue;
            };

            for entry in entries.flatten() {
                let path = entry.path();
                let Some(file_name) = path.file_name().and_then(|n| n.to_str()) else {
                    continue;
                };
                let Some((session_number, part_number)) = parse_file_name(file_name, &device_dir) else {
                    continue;
                };
                let metadata = entry.metadata().ok();
                let open = self.sessions.values().any(|s| s.file_path == path);

                files.push(SessionFileInfo {
                    path: format!("{}/{}", device_dir, file_name),
                    device_dir: device_dir.clone(),
                    session_number,
                    part_number,
                    size: metadata.as_ref().map(|m| m.len()).unwrap_or(0),
                    modified: metadata.and_then(|m| m.modified().ok()),
                    open,
                });
            }
        }

        files.sort_by(|a, b| {
            (&a.device_dir, a.session_number, a.part_number).cmp(&(
                &b.device_dir,
                b.session_number,
                b.part_number,
            ))
        });
        files
    }

    /// Non-empty lines of a session file, capped at the configured count
    pub fn load_session(&self, relative: &str) -> Result<Vec<String>, StorageError> {
        if !self.available {
            return Ok(Vec::new());
        }
        let path = self.resolve(relative)?;
        if !path.is_file() {
            return Err(StorageError::NotFound {
                path: relative.to_string(),
            });
        }

        let content = fs::read(&path).map_err(|e| StorageError::io(&path, e))?;
        Ok(String::from_utf8_lossy(&content)
            .lines()
            .filter(|line| !line.trim().is_empty())
            .take(self.config.max_loaded_lines)
            .map(str::to_string)
            .collect())
    }

    /// Delete a closed session file. Returns whether a file was removed.
    pub fn delete_file(&mut self, relative: &str) -> Result<bool, StorageError> {
        if !self.available {
            return Ok(false);
        }
        let path = self.resolve(relative)?;
        if self.sessions.values().any(|s| s.file_path == path) {
            return Err(StorageError::FileInUse {
                path: relative.to_string(),
            });
        }
        if !path.is_file() {
            return Ok(false);
        }

        fs::remove_file(&path).map_err(|e| StorageError::io(&path, e))?;
        info!("Deleted {}", path.display());
        Ok(true)
    }

    /// Total size of all session files
    pub fn used_bytes(&self) -> u64 {
        self.list_sessions().iter().map(|f| f.size).sum()
    }

    /// Map a root-relative path onto the filesystem, refusing anything that
    /// could leave the root
    fn resolve(&self, relative: &str) -> Result<PathBuf, StorageError> {
        let candidate = Path::new(relative);
        let contained = !relative.is_empty()
            && candidate
                .components()
                .all(|component| matches!(component, Component::Normal(_)));
        if !contained {
            return Err(StorageError::OutsideRoot {
                path: relative.to_string(),
            });
        }
        Ok(self.config.root.join(candidate))
    }
}

impl Drop for SessionLog {
    fn drop(&mut self) {
        self.close_all();
    }
}

// ----------------------------------------------------------------------------
// Formatting
// ----------------------------------------------------------------------------

/// Directory name for a device: its display name restricted to `[A-Za-z0-9_-]`
pub fn device_dir_name(device: &DeviceIdentity) -> String {
    device
        .display_name()
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '_' || c == '-' { c } else { '_' })
        .collect()
}

/// `timestamp_ms,LEVEL,tag,message` terminated by a newline
pub fn format_record_line(record: &LogRecord) -> String {
    format!(
        "{},{},{},{}\n",
        record.timestamp(),
        record.level(),
        escape_line_breaks(record.tag()).replace(',', ";"),
        escape_line_breaks(record.message())
    )
}

fn escape_line_breaks(text: &str) -> String {
    text.replace('\r', "\\r").replace('\n', "\\n")
}

fn timestamp() -> String {
    Local::now().to_rfc3339_opts(SecondsFormat::Secs, false)
}

/// `(session, part)` from `<device_dir>_<session>_<part>.log`
fn parse_file_name(file_name: &str, device_dir: &str) -> Option<(u32, u32)> {
    let stem = file_name.strip_suffix(".log")?;
    let numbers = stem.strip_prefix(device_dir)?.strip_prefix('_')?;
    let (session, part) = numbers.split_once('_')?;
    Some((session.parse().ok()?, part.parse().ok()?))
}

fn next_session_number(dir: &Path, device_dir: &str) -> Result<u32, StorageError> {
    let entries = fs::read_dir(dir).map_err(|e| StorageError::io(dir, e))?;
    let highest = entries
        .flatten()
        .filter_map(|entry| {
            let name = entry.file_name();
            parse_file_name(name.to_str()?, device_dir).map(|(session, _)| session)
        })
        .max()
        .unwrap_or(0);
    Ok(highest + 1)
}
