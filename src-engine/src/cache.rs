//! Frame cache on local disk.
//!
//! Each captured frame is persisted as one binary entry so frames never
//! accumulate in memory during a recording. Entries are named
//! `frame_{seq:04}.rrf`, which keeps lexical order equal to capture order.
//!
//! Entry layout (little endian):
//!
//! | Offset | Size | Field |
//! |--------|------|-------|
//! | 0  | 4 | magic `RRF1` |
//! | 4  | 4 | width |
//! | 8  | 4 | height |
//! | 12 | 1 | pixel layout (0 = RGBA, 1 = BGRA) |
//! | 13 | 8 | capture time, ms since epoch |
//! | 21 | 4 | sequence number |
//! | 25 | w*h*4 | samples |

use crate::error::CacheError;
use chrono::{Local, TimeZone};
use directories::ProjectDirs;
use reviewrec_common::logging::APP_NAME;
use reviewrec_common::{CapturedFrame, PixelLayout};
use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, error, info, warn};

/// Extension of cache entries.
pub const CACHE_EXT: &str = "rrf";

/// Extension of entries still being written.
const PARTIAL_EXT: &str = "part";

const MAGIC: &[u8; 4] = b"RRF1";

/// Size of the fixed entry header in bytes.
pub const HEADER_LEN: usize = 25;

/// Process-local cache root, `<cache dir>/screen_recorder`.
pub fn cache_root() -> PathBuf {
    match ProjectDirs::from("", "", APP_NAME) {
        Some(dirs) => dirs.cache_dir().join("screen_recorder"),
        None => std::env::temp_dir().join(APP_NAME).join("screen_recorder"),
    }
}

/// Per-session subdirectory of the cache root.
pub fn session_dir(root: &Path, clip_name: &str) -> PathBuf {
    root.join(clip_name)
}

/// Create a folder (and parents) if it does not exist yet.
pub fn create_folder(path: &Path) -> Result<(), CacheError> {
    if path.is_dir() {
        return Ok(());
    }
    fs::create_dir_all(path).map_err(|e| CacheError::Unavailable {
        path: path.to_path_buf(),
        reason: e.to_string(),
    })
}

/// Path of the cache entry for a sequence number.
pub fn entry_path(dir: &Path, sequence: u32) -> PathBuf {
    dir.join(format!("frame_{:04}.{}", sequence, CACHE_EXT))
}

/// Sequence number encoded in an entry file name.
pub fn parse_sequence(path: &Path) -> Option<u32> {
    path.file_stem()?
        .to_str()?
        .strip_prefix("frame_")?
        .parse()
        .ok()
}

/// Build the fixed-size entry header.
fn encode_header(frame: &CapturedFrame) -> [u8; HEADER_LEN] {
    let mut header = [0u8; HEADER_LEN];
    header[0..4].copy_from_slice(MAGIC);
    header[4..8].copy_from_slice(&frame.width.to_le_bytes());
    header[8..12].copy_from_slice(&frame.height.to_le_bytes());
    header[12] = frame.layout.as_u8();
    header[13..21].copy_from_slice(&frame.captured_at.timestamp_millis().to_le_bytes());
    header[21..25].copy_from_slice(&frame.sequence.to_le_bytes());
    header
}

/// Persist a frame as the entry for its sequence number.
///
/// The entry is written under a temporary name and renamed into place, so a
/// reader never observes a partially written frame.
pub fn write_frame(dir: &Path, frame: &CapturedFrame) -> Result<PathBuf, CacheError> {
    let final_path = entry_path(dir, frame.sequence);
    let expected = CapturedFrame::expected_len(frame.width, frame.height);
    if frame.data.len() != expected {
        return Err(CacheError::Corrupt {
            path: final_path,
            reason: format!(
                "frame holds {} bytes, {}x{} needs {}",
                frame.data.len(),
                frame.width,
                frame.height,
                expected
            ),
        });
    }

    let partial_path = final_path.with_extension(format!("{}.{}", CACHE_EXT, PARTIAL_EXT));
    let io_err = |path: &Path| {
        let path = path.to_path_buf();
        move |source| CacheError::Io { path, source }
    };

    let file = File::create(&partial_path).map_err(io_err(&partial_path))?;
    let mut writer = BufWriter::new(file);
    let written = writer
        .write_all(&encode_header(frame))
        .and_then(|_| writer.write_all(&frame.data))
        .and_then(|_| writer.flush());
    if let Err(source) = written {
        let _ = fs::remove_file(&partial_path);
        return Err(CacheError::Io {
            path: partial_path,
            source,
        });
    }
    drop(writer);

    fs::rename(&partial_path, &final_path).map_err(io_err(&final_path))?;
    Ok(final_path)
}

/// Read and validate one cache entry.
pub fn read_frame(path: &Path) -> Result<CapturedFrame, CacheError> {
    let bytes = fs::read(path).map_err(|source| CacheError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    let corrupt = |reason: String| CacheError::Corrupt {
        path: path.to_path_buf(),
        reason,
    };

    if bytes.len() < HEADER_LEN || &bytes[0..4] != MAGIC {
        return Err(corrupt("missing entry header".to_string()));
    }

    let u32_at = |offset: usize| {
        let mut buf = [0u8; 4];
        buf.copy_from_slice(&bytes[offset..offset + 4]);
        u32::from_le_bytes(buf)
    };
    let width = u32_at(4);
    let height = u32_at(8);
    let layout = PixelLayout::from_u8(bytes[12])
        .ok_or_else(|| corrupt(format!("unknown pixel layout {}", bytes[12])))?;
    let mut millis = [0u8; 8];
    millis.copy_from_slice(&bytes[13..21]);
    let captured_at = Local
        .timestamp_millis_opt(i64::from_le_bytes(millis))
        .single()
        .ok_or_else(|| corrupt("invalid capture timestamp".to_string()))?;
    let sequence = u32_at(21);

    let expected = CapturedFrame::expected_len(width, height);
    let payload = &bytes[HEADER_LEN..];
    if payload.len() != expected {
        return Err(corrupt(format!(
            "payload is {} bytes, {}x{} needs {}",
            payload.len(),
            width,
            height,
            expected
        )));
    }

    Ok(CapturedFrame {
        sequence,
        width,
        height,
        layout,
        data: payload.to_vec(),
        captured_at,
    })
}

/// Files in `folder` with extension `ext`, sorted lexically.
///
/// A missing folder yields an empty list.
pub fn collect_files(folder: &Path, ext: &str) -> Vec<PathBuf> {
    info!("Collecting files in folder: {:?}", folder);

    let entries = match fs::read_dir(folder) {
        Ok(entries) => entries,
        Err(e) => {
            warn!("Cannot list {:?}: {}", folder, e);
            return Vec::new();
        }
    };

    let mut files: Vec<PathBuf> = entries
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.path())
        .filter(|path| path.is_file())
        .filter(|path| path.extension().and_then(|e| e.to_str()) == Some(ext))
        .collect();
    files.sort();
    files
}

/// Cache entries of a session in capture order.
///
/// Sorted by the sequence in the file name so runs longer than the padded
/// width still come back in order.
pub fn collect_frames(folder: &Path) -> Vec<PathBuf> {
    let mut frames = collect_files(folder, CACHE_EXT);
    frames.sort_by_key(|path| (parse_sequence(path).unwrap_or(u32::MAX), path.clone()));
    frames
}

/// Remove one session directory.
pub fn clean_session(dir: &Path) -> Result<(), CacheError> {
    if !dir.exists() {
        return Ok(());
    }
    info!("Removing session cache {:?}", dir);
    fs::remove_dir_all(dir).map_err(|source| CacheError::Io {
        path: dir.to_path_buf(),
        source,
    })
}

/// Remove every session directory under the cache root.
///
/// Failures are logged and skipped. Returns the number of sessions removed.
pub fn clean_cache_folder(root: &Path) -> usize {
    let entries = match fs::read_dir(root) {
        Ok(entries) => entries,
        Err(e) => {
            debug!("Nothing to clean in {:?}: {}", root, e);
            return 0;
        }
    };

    let folders: Vec<PathBuf> = entries
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.path())
        .filter(|path| path.is_dir())
        .collect();
    info!("Cleaning cache folder: {} session(s)", folders.len());

    let mut removed = 0;
    for folder in folders {
        match fs::remove_dir_all(&folder) {
            Ok(()) => removed += 1,
            Err(e) => error!("Error removing folder {:?}: {}", folder, e),
        }
    }
    removed
}
