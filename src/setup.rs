use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::info;

use crate::error::Result;
use crate::media::MediaToolkit;
use crate::transcribe::Transcriber;

/// Working directory for logs, relative to where the tool is run
pub const APP_DIR: &str = ".mediaprep";

/// External programs a command cannot run without
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Requirement {
    MediaToolkit,
    Transcriber,
}

pub struct SetupManager {
    toolkit: Arc<dyn MediaToolkit>,
    transcriber: Arc<dyn Transcriber>,
}

impl SetupManager {
    pub fn new(toolkit: Arc<dyn MediaToolkit>, transcriber: Arc<dyn Transcriber>) -> Self {
        Self {
            toolkit,
            transcriber,
        }
    }

    /// Verify every requirement before any file is touched.
    ///
    /// The first missing program aborts with `MissingDependency`.
    pub async fn ensure(&self, requirements: &[Requirement]) -> Result<()> {
        for requirement in requirements {
            match requirement {
                Requirement::MediaToolkit => {
                    info!("Checking media toolkit...");
                    self.toolkit.check_availability().await?;
                }
                Requirement::Transcriber => {
                    info!("Checking whisper ({} model)...", self.transcriber.model());
                    self.transcriber.check_availability().await?;
                }
            }
        }
        Ok(())
    }
}

/// `.mediaprep/log` under `base`
pub fn log_dir(base: &Path) -> PathBuf {
    base.join(APP_DIR).join("log")
}
