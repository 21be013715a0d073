//! Utility functions for directory management and system integration
//!
//! Per-user configuration follows the XDG Base Directory specification
//! (`~/.config/netfence/`). The database and lock file default to
//! system-wide locations because every operator on the host shares one
//! policy.
//!
//! # Example
//!
//! ```
//! use netfence::utils::get_config_dir;
//!
//! if let Some(config_dir) = get_config_dir() {
//!     let _file = config_dir.join("config.json");
//! }
//! ```

use crate::core::error::{Error, Result};
use directories::ProjectDirs;
use network_interface::{NetworkInterface, NetworkInterfaceConfig};
use std::path::{Path, PathBuf};

pub fn get_config_dir() -> Option<PathBuf> {
    ProjectDirs::from("com", "netfence", "netfence").map(|pd| pd.config_dir().to_path_buf())
}

/// Creates the parent directory of `path` (mode 0700 on Unix) if missing.
pub fn ensure_parent_dir(path: &Path) -> std::io::Result<()> {
    let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) else {
        return Ok(());
    };
    if parent.exists() {
        return Ok(());
    }

    #[cfg(unix)]
    {
        use std::fs::DirBuilder;
        use std::os::unix::fs::DirBuilderExt;

        DirBuilder::new().mode(0o700).recursive(true).create(parent)
    }

    #[cfg(not(unix))]
    {
        std::fs::create_dir_all(parent)
    }
}

/// Names of the network interfaces present on this host, sorted.
pub fn list_interfaces() -> Result<Vec<String>> {
    let interfaces = NetworkInterface::show()
        .map_err(|e| Error::Internal(format!("Failed to list network interfaces: {e}")))?;

    let mut names: Vec<String> = interfaces.into_iter().map(|iface| iface.name).collect();
    names.sort();
    names.dedup();
    Ok(names)
}

/// Returns `true` if an interface called `name` exists on this host.
pub fn interface_exists(name: &str) -> Result<bool> {
    Ok(list_interfaces()?.iter().any(|iface| iface == name))
}

/// Truncates a string to a maximum length and adds an ellipsis if needed
pub fn truncate_string(s: &str, max_len: usize) -> String {
    if s.len() <= max_len {
        s.to_string()
    } else {
        // Find the nearest character boundary to avoid splitting multi-byte characters
        let end = s
            .char_indices()
            .map(|(idx, _)| idx)
            .take_while(|&idx| idx <= max_len.saturating_sub(3))
            .last()
            .unwrap_or(0);
        format!("{}...", &s[..end])
    }
}
