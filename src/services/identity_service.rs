use std::{
    fs,
    io::{self, ErrorKind},
    path::{Path, PathBuf},
};

use tracing::{info, warn};

use crate::state::session::ParticipantId;

/// Durable, self-asserted participant identity of this device.
#[derive(Debug, Clone)]
pub struct IdentityProvider {
    path: PathBuf,
}

impl IdentityProvider {
    /// Provider persisting the identity at `path`.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Return the stored identity, generating and persisting one on first use.
    ///
    /// Never fails: when the file cannot be read or written a fresh id is
    /// returned and only lives as long as the process.
    pub fn get_or_create(&self) -> ParticipantId {
        match read_identity(&self.path) {
            Ok(Some(id)) => return id,
            Ok(None) => {}
            Err(err) => {
                warn!(
                    path = %self.path.display(),
                    error = %err,
                    "failed to read participant id; generating a new one"
                );
            }
        }

        let id = ParticipantId::generate();
        match write_identity(&self.path, &id) {
            Ok(()) => info!(path = %self.path.display(), participant = %id, "stored new participant id"),
            Err(err) => warn!(
                path = %self.path.display(),
                error = %err,
                "failed to persist participant id; it will not survive a restart"
            ),
        }
        id
    }
}

fn read_identity(path: &Path) -> io::Result<Option<ParticipantId>> {
    match fs::read_to_string(path) {
        Ok(contents) => {
            let id = ParticipantId::new(contents.trim());
            if id.is_addressable() {
                Ok(Some(id))
            } else {
                Err(io::Error::new(
                    ErrorKind::InvalidData,
                    "stored participant id is not usable",
                ))
            }
        }
        Err(err) if err.kind() == ErrorKind::NotFound => Ok(None),
        Err(err) => Err(err),
    }
}

fn write_identity(path: &Path, id: &ParticipantId) -> io::Result<()> {
    if let Some(parent) = path.parent().filter(|parent| !parent.as_os_str().is_empty()) {
        fs::create_dir_all(parent)?;
    }
    fs::write(path, id.as_str())
}
