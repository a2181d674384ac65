//! Capacidad mínima de almacenamiento de archivos: guardar y leer por
//! referencia. El master sólo la usa en el paso de combinación final.

use std::path::{Component, Path, PathBuf};

use async_trait::async_trait;

use crate::error::StorageError;

#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Guarda `data` con el nombre `name` y devuelve su referencia.
    async fn save(&self, data: &[u8], name: &str) -> Result<String, StorageError>;

    async fn load(&self, reference: &str) -> Result<Vec<u8>, StorageError>;
}

/// Archivos en un directorio local. Las referencias son relativas a `root`.
#[derive(Debug, Clone)]
pub struct LocalStore {
    root: PathBuf,
}

impl LocalStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn resolve(&self, reference: &str) -> Result<PathBuf, StorageError> {
        let rel = Path::new(reference);
        // nada de rutas absolutas ni ".." fuera de root
        let ok = rel
            .components()
            .all(|c| matches!(c, Component::Normal(_) | Component::CurDir));
        if reference.is_empty() || !ok {
            return Err(StorageError::InvalidReference(reference.to_string()));
        }
        Ok(self.root.join(rel))
    }
}

#[async_trait]
impl ObjectStore for LocalStore {
    async fn save(&self, data: &[u8], name: &str) -> Result<String, StorageError> {
        let path = self.resolve(name)?;
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(&path, data).await?;
        Ok(name.to_string())
    }

    async fn load(&self, reference: &str) -> Result<Vec<u8>, StorageError> {
        let path = self.resolve(reference)?;
        Ok(tokio::fs::read(path).await?)
    }
}
