use anyhow::{anyhow, Context};
use rusqlite::{Connection, OpenFlags};
use serde_json::json;
use sha2::{Digest, Sha256};
use std::fs::File;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};
use zip::write::FileOptions;
use zip::{CompressionMethod, ZipArchive, ZipWriter};

const MANIFEST_ENTRY: &str = "manifest.json";
const DB_FILE_NAME: &str = "presenced.sqlite3";
const DB_ENTRY: &str = "db/presenced.sqlite3";
pub const BUNDLE_FORMAT_V1: &str = "presenced-workspace-v1";
pub const RAW_SQLITE_FORMAT: &str = "raw-sqlite3";

#[derive(Debug, Clone)]
pub struct ExportSummary {
    pub bundle_format: String,
    pub entry_count: usize,
    pub db_sha256: String,
}

#[derive(Debug, Clone)]
pub struct ImportSummary {
    pub bundle_format_detected: String,
}

fn sha256_file(path: &Path) -> anyhow::Result<String> {
    let mut f = File::open(path)
        .with_context(|| format!("failed to open {}", path.to_string_lossy()))?;
    let mut hasher = Sha256::new();
    std::io::copy(&mut f, &mut hasher).context("failed to hash file")?;
    Ok(hex::encode(hasher.finalize()))
}

pub fn export_workspace_bundle(
    workspace_path: &Path,
    out_path: &Path,
) -> anyhow::Result<ExportSummary> {
    let db_path = workspace_path.join(DB_FILE_NAME);
    if !db_path.is_file() {
        return Err(anyhow!(
            "workspace database not found: {}",
            db_path.to_string_lossy()
        ));
    }

    if let Some(parent) = out_path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("failed to create directory {}", parent.to_string_lossy()))?;
    }

    let db_sha256 = sha256_file(&db_path)?;

    let out_file = File::create(out_path).with_context(|| {
        format!(
            "failed to create output file {}",
            out_path.to_string_lossy()
        )
    })?;
    let mut zip = ZipWriter::new(out_file);
    let opts = FileOptions::default().compression_method(CompressionMethod::Deflated);

    let exported_at = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs();
    let manifest = json!({
        "format": BUNDLE_FORMAT_V1,
        "appVersion": env!("CARGO_PKG_VERSION"),
        "exportedAt": exported_at,
        "dbSha256": db_sha256,
    });
    zip.start_file(MANIFEST_ENTRY, opts)
        .context("failed to start manifest entry")?;
    zip.write_all(
        serde_json::to_string_pretty(&manifest)
            .context("failed to serialize manifest")?
            .as_bytes(),
    )
    .context("failed to write manifest entry")?;

    zip.start_file(DB_ENTRY, opts)
        .context("failed to start database entry")?;
    let mut db_file = File::open(&db_path)
        .with_context(|| format!("failed to open database {}", db_path.to_string_lossy()))?;
    std::io::copy(&mut db_file, &mut zip).context("failed to write database entry")?;

    zip.finish().context("failed to finalize zip bundle")?;
    tracing::info!(out = %out_path.display(), "workspace bundle exported");

    Ok(ExportSummary {
        bundle_format: BUNDLE_FORMAT_V1.to_string(),
        entry_count: 2,
        db_sha256,
    })
}

const SQLITE_HEADER: &[u8; 16] = b"SQLite format 3\0";

fn importing_path(workspace_path: &Path) -> PathBuf {
    workspace_path.join("presenced.sqlite3.importing")
}

/// Where the replaced database waits until the workspace reopens cleanly.
pub fn previous_db_path(workspace_path: &Path) -> PathBuf {
    workspace_path.join("presenced.sqlite3.previous")
}

pub fn import_workspace_bundle(
    in_path: &Path,
    workspace_path: &Path,
) -> anyhow::Result<ImportSummary> {
    std::fs::create_dir_all(workspace_path).with_context(|| {
        format!(
            "failed to create workspace {}",
            workspace_path.to_string_lossy()
        )
    })?;
    let tmp_dst = importing_path(workspace_path);
    if tmp_dst.exists() {
        let _ = std::fs::remove_file(&tmp_dst);
    }

    let format = match read_signature(in_path)? {
        Signature::Zip => {
            if let Err(e) = extract_bundle_db(in_path, &tmp_dst) {
                let _ = std::fs::remove_file(&tmp_dst);
                return Err(e);
            }
            BUNDLE_FORMAT_V1
        }
        Signature::Sqlite => {
            std::fs::copy(in_path, &tmp_dst).with_context(|| {
                format!(
                    "failed to copy sqlite file from {} to {}",
                    in_path.to_string_lossy(),
                    tmp_dst.to_string_lossy()
                )
            })?;
            RAW_SQLITE_FORMAT
        }
        Signature::Other => {
            return Err(anyhow!(
                "{} is neither a workspace bundle nor a sqlite database",
                in_path.to_string_lossy()
            ))
        }
    };

    if let Err(e) = check_sqlite_integrity(&tmp_dst) {
        let _ = std::fs::remove_file(&tmp_dst);
        return Err(e);
    }

    let dst = workspace_path.join(DB_FILE_NAME);
    let previous = previous_db_path(workspace_path);
    if dst.is_file() {
        std::fs::copy(&dst, &previous).with_context(|| {
            format!(
                "failed to keep previous database at {}",
                previous.to_string_lossy()
            )
        })?;
    }
    std::fs::rename(&tmp_dst, &dst).with_context(|| {
        format!(
            "failed to move imported database to {}",
            dst.to_string_lossy()
        )
    })?;
    tracing::info!(bundle = %in_path.display(), format, "workspace bundle imported");

    Ok(ImportSummary {
        bundle_format_detected: format.to_string(),
    })
}

/// Puts the database saved by the last import back in place.
pub fn restore_previous_db(workspace_path: &Path) -> anyhow::Result<bool> {
    let previous = previous_db_path(workspace_path);
    if !previous.is_file() {
        return Ok(false);
    }
    let dst = workspace_path.join(DB_FILE_NAME);
    std::fs::rename(&previous, &dst).with_context(|| {
        format!(
            "failed to restore previous database to {}",
            dst.to_string_lossy()
        )
    })?;
    tracing::warn!(workspace = %workspace_path.display(), "previous database restored");
    Ok(true)
}

pub fn discard_previous_db(workspace_path: &Path) {
    let previous = previous_db_path(workspace_path);
    if previous.is_file() {
        let _ = std::fs::remove_file(previous);
    }
}

fn extract_bundle_db(in_path: &Path, tmp_dst: &Path) -> anyhow::Result<()> {
    let in_file = File::open(in_path)
        .with_context(|| format!("failed to open bundle {}", in_path.to_string_lossy()))?;
    let mut archive = ZipArchive::new(in_file).context("invalid zip archive")?;

    let mut manifest_text = String::new();
    archive
        .by_name(MANIFEST_ENTRY)
        .context("bundle missing manifest.json")?
        .read_to_string(&mut manifest_text)
        .context("failed to read manifest.json")?;
    let manifest: serde_json::Value =
        serde_json::from_str(&manifest_text).context("manifest.json is invalid JSON")?;
    let format = manifest
        .get("format")
        .and_then(|v| v.as_str())
        .unwrap_or("");
    if format != BUNDLE_FORMAT_V1 {
        return Err(anyhow!("unsupported bundle format: {}", format));
    }
    let expected_sha = manifest
        .get("dbSha256")
        .and_then(|v| v.as_str())
        .map(|s| s.to_ascii_lowercase());

    let mut db_out = File::create(tmp_dst).with_context(|| {
        format!(
            "failed to create temp database {}",
            tmp_dst.to_string_lossy()
        )
    })?;
    {
        let mut db_entry = archive
            .by_name(DB_ENTRY)
            .context("bundle missing db/presenced.sqlite3")?;
        std::io::copy(&mut db_entry, &mut db_out).context("failed to extract database entry")?;
    }
    db_out
        .flush()
        .context("failed to flush extracted database")?;
    drop(db_out);

    if let Some(expected) = expected_sha {
        let actual = sha256_file(tmp_dst)?;
        if actual != expected {
            let _ = std::fs::remove_file(tmp_dst);
            return Err(anyhow!(
                "database checksum mismatch (expected {}, got {})",
                expected,
                actual
            ));
        }
    }
    Ok(())
}

fn check_sqlite_integrity(path: &Path) -> anyhow::Result<()> {
    if read_signature(path)? != Signature::Sqlite {
        return Err(anyhow!("imported file is not a sqlite database"));
    }
    let conn = Connection::open_with_flags(path, OpenFlags::SQLITE_OPEN_READ_ONLY)
        .context("failed to open imported database")?;
    let verdict: String = conn
        .query_row("PRAGMA integrity_check", [], |r| r.get(0))
        .context("integrity check failed to run")?;
    if verdict != "ok" {
        return Err(anyhow!("imported database failed integrity check: {}", verdict));
    }
    Ok(())
}

#[derive(Debug, PartialEq, Eq)]
enum Signature {
    Zip,
    Sqlite,
    Other,
}

fn read_signature(path: &Path) -> anyhow::Result<Signature> {
    let mut f = File::open(path)
        .with_context(|| format!("failed to open input file {}", path.to_string_lossy()))?;
    let mut head = Vec::with_capacity(SQLITE_HEADER.len());
    Read::take(&mut f, SQLITE_HEADER.len() as u64)
        .read_to_end(&mut head)
        .context("failed to read file signature")?;
    if head.starts_with(&[0x50, 0x4B, 0x03, 0x04]) {
        Ok(Signature::Zip)
    } else if head.as_slice() == SQLITE_HEADER {
        Ok(Signature::Sqlite)
    } else {
        Ok(Signature::Other)
    }
}
