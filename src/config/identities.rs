//! Per-worker identity assignment.
//!
//! Each worker gets one identity token, unique within a run. The core never
//! interprets the token; it only hands it to the session driver.

use crate::error::{Error, Result};
use crate::model::Identity;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IdentityAssignment {
    /// Worker `i` (1-based) gets `root/profile_{base + i - 1:02}`.
    Sequential { base: u32, root: PathBuf },
    /// Worker `i` gets the `i`-th listed token.
    Explicit(Vec<String>),
}

impl IdentityAssignment {
    /// Identities for `count` workers, in worker order.
    pub fn assign(&self, count: usize) -> Result<Vec<Identity>> {
        match self {
            IdentityAssignment::Sequential { base, root } => Ok((1..=count)
                .map(|worker| Identity {
                    worker,
                    token: profile_dir(root, base + worker as u32 - 1)
                        .display()
                        .to_string(),
                })
                .collect()),
            IdentityAssignment::Explicit(tokens) => {
                if tokens.len() < count {
                    return Err(Error::Config(format!(
                        "{count} workers need {count} identities, only {} configured",
                        tokens.len()
                    )));
                }
                Ok(tokens
                    .iter()
                    .take(count)
                    .enumerate()
                    .map(|(i, token)| Identity {
                        worker: i + 1,
                        token: token.clone(),
                    })
                    .collect())
            }
        }
    }

    /// Create the profile directories for `count` sequential identities.
    /// Explicit identities are left alone.
    pub fn create_dirs(&self, count: usize) -> Result<Vec<PathBuf>> {
        let IdentityAssignment::Sequential { base, root } = self else {
            return Ok(Vec::new());
        };
        let mut created = Vec::with_capacity(count);
        for offset in 0..count as u32 {
            let dir = profile_dir(root, base + offset);
            std::fs::create_dir_all(&dir)?;
            debug!(dir = %dir.display(), "profile directory ready");
            created.push(dir);
        }
        info!(count = created.len(), root = %root.display(), "profile directories created");
        Ok(created)
    }

    /// Remove the profile directories for `count` sequential identities.
    /// Missing directories are skipped.
    pub fn clear_dirs(&self, count: usize) -> Result<Vec<PathBuf>> {
        let IdentityAssignment::Sequential { base, root } = self else {
            return Ok(Vec::new());
        };
        let mut removed = Vec::new();
        for offset in 0..count as u32 {
            let dir = profile_dir(root, base + offset);
            if dir.is_dir() {
                std::fs::remove_dir_all(&dir)?;
                removed.push(dir);
            }
        }
        info!(count = removed.len(), root = %root.display(), "profile directories cleared");
        Ok(removed)
    }
}

/// `root/profile_NN`.
pub fn profile_dir(root: &Path, id: u32) -> PathBuf {
    root.join(format!("profile_{id:02}"))
}
