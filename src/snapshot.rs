/// Snapshot documents for bulk export and import
///
/// A snapshot is a JSON object with two fields, `defaults` and `rules`.
/// Exported rules carry their `id` for reference; import ignores it and the
/// store assigns fresh identifiers.
///
/// ```json
/// {
///   "defaults": { "input_policy": "drop", "forward_policy": "drop",
///                 "output_policy": "accept", "log_prefix": "" },
///   "rules": [
///     { "id": 1, "chain": "input", "protocol": "tcp", "action": "accept",
///       "ports": [22], "enabled": true }
///   ]
/// }
/// ```
use crate::core::error::{Error, Result};
use crate::core::firewall::{Snapshot, SnapshotDraft};
use std::io::Write;
use std::path::Path;
use tempfile::NamedTempFile;
use tracing::info;

/// Pretty-printed JSON for a snapshot.
pub fn to_json(snapshot: &Snapshot) -> Result<String> {
    let mut json = serde_json::to_string_pretty(snapshot)?;
    json.push('\n');
    Ok(json)
}

/// Parses a snapshot document without validating its values.
pub fn from_json(json: &str) -> Result<SnapshotDraft> {
    Ok(serde_json::from_str(json)?)
}

/// Writes `snapshot` to `path` using an atomic write pattern.
/// 1. Writes to a temporary file in the target directory (mode 0o600).
/// 2. Flushes it to disk.
/// 3. Atomically renames it over the target path.
///
/// # Errors
///
/// Returns `Err` if serialization fails or the file cannot be written.
pub fn write_snapshot(path: &Path, snapshot: &Snapshot) -> Result<()> {
    let json = to_json(snapshot)?;
    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };

    // NamedTempFile is created with 0600 permissions on Unix
    let mut temp = NamedTempFile::new_in(dir)?;
    temp.write_all(json.as_bytes())?;
    temp.as_file().sync_all()?;

    temp.persist(path).map_err(|e| {
        if e.error.kind() == std::io::ErrorKind::StorageFull {
            Error::Io(std::io::Error::new(
                std::io::ErrorKind::StorageFull,
                "Disk full: cannot save snapshot. Free up space and try again.",
            ))
        } else {
            Error::Io(e.error)
        }
    })?;

    info!(
        path = %path.display(),
        rules = snapshot.rules.len(),
        "Wrote snapshot"
    );
    Ok(())
}

/// Reads a snapshot document from `path`.
///
/// # Errors
///
/// Returns `Err` if the file cannot be read or is not a snapshot document.
pub fn read_snapshot(path: &Path) -> Result<SnapshotDraft> {
    let json = std::fs::read_to_string(path)?;
    from_json(&json)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::firewall::{Action, Protocol};
    use crate::core::test_helpers::{rule, server_defaults, ssh_rule};

    fn sample() -> Snapshot {
        let mut icmp = rule(Protocol::Icmp);
        icmp.id = 4;
        icmp.icmp_types = vec![8];
        icmp.action = Action::Drop;
        Snapshot {
            defaults: server_defaults(),
            rules: vec![ssh_rule(), icmp],
        }
    }

    #[test]
    fn test_written_snapshot_reads_back_as_drafts() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("policy.json");
        let snapshot = sample();

        write_snapshot(&path, &snapshot).unwrap();
        let draft = read_snapshot(&path).unwrap();

        assert_eq!(draft, SnapshotDraft::from(&snapshot));
    }

    #[test]
    fn test_export_carries_ids_and_lowercase_names() {
        let json = to_json(&sample()).unwrap();
        let value: serde_json::Value = serde_json::from_str(&json).unwrap();

        assert_eq!(value["defaults"]["input_policy"], "drop");
        assert_eq!(value["rules"][0]["id"], 1);
        assert_eq!(value["rules"][1]["protocol"], "icmp");
        assert_eq!(value["rules"][1]["icmp_types"][0], 8);
    }

    #[test]
    fn test_overwrite_replaces_previous_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("policy.json");
        write_snapshot(&path, &sample()).unwrap();

        let empty = Snapshot {
            defaults: server_defaults(),
            rules: Vec::new(),
        };
        write_snapshot(&path, &empty).unwrap();

        assert!(read_snapshot(&path).unwrap().rules.is_empty());
        let leftovers = std::fs::read_dir(dir.path()).unwrap().count();
        assert_eq!(leftovers, 1);
    }

    #[cfg(unix)]
    #[test]
    fn test_snapshot_file_is_private() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("policy.json");
        write_snapshot(&path, &sample()).unwrap();

        let mode = std::fs::metadata(&path).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o600);
    }

    #[test]
    fn test_minimal_document_parses() {
        let draft = from_json(
            r#"{"defaults": {"input_policy": "DROP", "forward_policy": "drop", "output_policy": "accept"},
                "rules": [{"chain": "lan", "proto": "tcp", "action": "accept"}]}"#,
        )
        .unwrap();

        assert_eq!(draft.defaults.input_policy, "DROP");
        assert_eq!(draft.defaults.log_prefix, "");
        assert_eq!(draft.rules[0].chain, "lan");
    }

    #[test]
    fn test_malformed_document_is_serialization_error() {
        let err = from_json(r#"{"rules": []}"#).unwrap_err();
        assert!(matches!(err, Error::Serialization(_)));
    }
}
