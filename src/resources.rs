// Resource blobs loaded once at startup
//
// A fixed, ordered collection of opaque byte buffers. Nothing here knows
// what a blob contains; by load order index 0 is the vertex shader bytecode
// and index 1 the fragment shader bytecode.

use anyhow::{Context, Result};
use std::path::{Path, PathBuf};

use crate::error::Stage;

pub const VERTEX_SHADER: usize = 0;
pub const FRAGMENT_SHADER: usize = 1;

/// Minimum number of blobs the renderer consumes
pub const REQUIRED_RESOURCES: usize = 2;

#[derive(Debug)]
pub struct Resource {
    path: PathBuf,
    bytes: Box<[u8]>,
}

impl Resource {
    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn size(&self) -> usize {
        self.bytes.len()
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[derive(Debug)]
pub struct Resources {
    blobs: Box<[Resource]>,
}

impl Resources {
    /// Read every blob up-front. Any unreadable file fails the whole load.
    pub fn load<P: AsRef<Path>>(paths: &[P]) -> Result<Self> {
        if paths.len() < REQUIRED_RESOURCES {
            return Err(anyhow::Error::new(Stage::ResourcesLoad)).with_context(|| {
                format!(
                    "Expected at least {} resources, got {}",
                    REQUIRED_RESOURCES,
                    paths.len()
                )
            });
        }

        let blobs = paths
            .iter()
            .map(|path| {
                let path = path.as_ref();
                let bytes = std::fs::read(path)
                    .with_context(|| format!("Failed to read resource {:?}", path))
                    .context(Stage::ResourcesLoad)?;
                log::debug!("Loaded resource {:?} ({} bytes)", path, bytes.len());
                Ok(Resource {
                    path: path.to_path_buf(),
                    bytes: bytes.into_boxed_slice(),
                })
            })
            .collect::<Result<Vec<_>>>()?;

        log::info!("Loaded {} resources", blobs.len());

        Ok(Self {
            blobs: blobs.into_boxed_slice(),
        })
    }

    pub fn get(&self, index: usize) -> Option<&Resource> {
        self.blobs.get(index)
    }

    pub fn len(&self) -> usize {
        self.blobs.len()
    }

    /// Blob at `index`, or a resources failure naming what was expected there
    pub fn require(&self, index: usize, what: &str) -> Result<&Resource> {
        self.get(index)
            .with_context(|| format!("No {} at resource index {}", what, index))
            .context(Stage::ResourcesLoad)
    }
}

impl Drop for Resources {
    fn drop(&mut self) {
        log::debug!("Releasing {} resources", self.len());
    }
}
