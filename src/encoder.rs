use std::{
    path::{Path, PathBuf},
    sync::RwLock,
};

use serde::Serialize;
use tracing::{debug, info};

use crate::{
    outside::{run_command, Capture},
    utils::RwLockUtils,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct EncoderStatus {
    pub installed: bool,
}

/// Cached answer to "can the encoder be executed?".
///
/// The probe runs at most once until [`invalidate`](Self::invalidate) or
/// [`recheck`](Self::recheck) is called. Many readers may query it concurrently.
#[derive(Debug)]
pub struct EncoderAvailability {
    program: PathBuf,
    cached: RwLock<Option<bool>>,
}

impl EncoderAvailability {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            cached: RwLock::new(None),
        }
    }

    pub fn program(&self) -> &Path {
        &self.program
    }

    /// Whether the encoder can be executed. Never fails: any problem means `false`.
    pub fn check_installed(&self) -> bool {
        if let Some(installed) = self.cached.with_read(|cached| *cached) {
            return installed;
        }

        self.cached.with_write(|mut cached| {
            // Another thread may have probed while we were waiting for the lock
            *cached.get_or_insert_with(|| self.probe())
        })
    }

    pub fn status(&self) -> EncoderStatus {
        EncoderStatus {
            installed: self.check_installed(),
        }
    }

    /// Forget the cached answer. The next check probes the encoder again.
    pub fn invalidate(&self) {
        debug!("Invalidating encoder availability cache");
        self.cached.with_write(|mut cached| *cached = None);
    }

    /// Invalidate then check again
    pub fn recheck(&self) -> bool {
        self.invalidate();
        self.check_installed()
    }

    fn probe(&self) -> bool {
        let installed = match run_command(
            self.program.as_os_str(),
            |cmd| cmd.arg("-version"),
            Capture::empty(),
        ) {
            Ok(output) => output.status.success(),
            Err(err) => {
                debug!("Could not execute '{}': {err}", self.program.display());
                false
            }
        };

        info!(
            "Encoder '{}' {}",
            self.program.display(),
            if installed { "is available" } else { "is not available" }
        );
        installed
    }
}
