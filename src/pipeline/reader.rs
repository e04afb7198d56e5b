use std::fs::File;
use std::path::{Path, PathBuf};

use log::debug;
use symphonia::core::io::MediaSource;

use super::cipher::{CipherKey, CipherReader};
use super::element::{next_element_id, ElementId};
use crate::error::PipelineError;

/// Decrypting filter slot between the file reader and the decoder
#[derive(Debug)]
pub struct CipherFilter {
    id: ElementId,
}

impl CipherFilter {
    fn new() -> Self {
        Self { id: next_element_id() }
    }

    pub fn id(&self) -> ElementId {
        self.id
    }
}

/// File source element, optionally followed by the cipher filter
#[derive(Debug)]
pub struct ReaderElement {
    id: ElementId,
    uri: PathBuf,
    cipher: Option<CipherFilter>,
}

impl ReaderElement {
    pub fn new(uri: PathBuf, encrypted: bool) -> Self {
        Self {
            id: next_element_id(),
            uri,
            cipher: encrypted.then(CipherFilter::new),
        }
    }

    pub fn id(&self) -> ElementId {
        self.id
    }

    pub fn uri(&self) -> &Path {
        &self.uri
    }

    pub fn is_encrypted(&self) -> bool {
        self.cipher.is_some()
    }

    pub fn cipher_id(&self) -> Option<ElementId> {
        self.cipher.as_ref().map(CipherFilter::id)
    }

    /// Point the reader at new content, linking or unlinking the cipher filter to match.
    pub fn redirect(&mut self, uri: PathBuf, encrypted: bool) {
        match (self.cipher.is_some(), encrypted) {
            (false, true) => {
                self.cipher = Some(CipherFilter::new());
                debug!("Cipher filter linked for {}", uri.display());
            }
            (true, false) => {
                self.cipher = None;
                debug!("Cipher filter unlinked for {}", uri.display());
            }
            _ => {}
        }
        self.uri = uri;
    }

    /// Extension hint for the format probe
    pub fn extension(&self) -> Option<&str> {
        self.uri.extension().and_then(|ext| ext.to_str())
    }

    pub fn open(&self, key: &CipherKey) -> Result<Box<dyn MediaSource>, PipelineError> {
        let file = File::open(&self.uri).map_err(|source| PipelineError::ReaderOpen {
            path: self.uri.clone(),
            source,
        })?;

        if self.cipher.is_none() {
            return Ok(Box::new(file));
        }

        let reader = CipherReader::new(file, *key).map_err(|source| PipelineError::ReaderOpen {
            path: self.uri.clone(),
            source,
        })?;
        Ok(Box::new(reader))
    }
}
