// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license

//! Process-wide holder of the active model and its class-name table.
//!
//! The pair lives in an immutable [`ModelSnapshot`] behind a single swappable slot.
//! Readers clone the `Arc` once per request and keep using it even if a swap happens
//! meanwhile; a swap only ever replaces the slot, never the contents of a snapshot.

use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock};

use tracing::info;

use crate::error::{Result, ServeError};
use crate::model::{ModelLoader, Segmenter};
use crate::names::ClassNames;

/// An immutable `(model, class names)` pair.
pub struct ModelSnapshot {
    name: String,
    generation: u64,
    model: Arc<dyn Segmenter>,
    class_names: ClassNames,
}

impl ModelSnapshot {
    /// Name the model was registered under.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Monotonic counter, 0 for the startup model and +1 per successful swap.
    #[must_use]
    pub const fn generation(&self) -> u64 {
        self.generation
    }

    /// The model handle.
    #[must_use]
    pub fn model(&self) -> &Arc<dyn Segmenter> {
        &self.model
    }

    /// Class names the model was loaded with.
    #[must_use]
    pub const fn class_names(&self) -> &ClassNames {
        &self.class_names
    }
}

impl std::fmt::Debug for ModelSnapshot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModelSnapshot")
            .field("name", &self.name)
            .field("generation", &self.generation)
            .field("num_classes", &self.model.num_classes())
            .field("class_names", &self.class_names.len())
            .finish()
    }
}

/// Swappable slot holding the current [`ModelSnapshot`].
pub struct ModelRegistry {
    current: RwLock<Arc<ModelSnapshot>>,
    generation: AtomicU64,
}

impl ModelRegistry {
    /// Create a registry around the startup model.
    ///
    /// # Errors
    ///
    /// Returns [`ServeError::ClassNames`] if the table doesn't fit the model.
    pub fn new(name: &str, model: Arc<dyn Segmenter>, class_names: ClassNames) -> Result<Self> {
        check_class_names(model.as_ref(), &class_names)?;
        let snapshot = ModelSnapshot {
            name: name.to_string(),
            generation: 0,
            model,
            class_names,
        };
        Ok(Self {
            current: RwLock::new(Arc::new(snapshot)),
            generation: AtomicU64::new(0),
        })
    }

    /// The snapshot in effect right now.
    #[must_use]
    pub fn current(&self) -> Arc<ModelSnapshot> {
        // The slot only ever holds a complete Arc, so a poisoned lock is still consistent.
        Arc::clone(&self.current.read().unwrap_or_else(PoisonError::into_inner))
    }

    /// Load a model from `source` through `loader` and make it current together with
    /// `class_names`.
    ///
    /// Loading happens before the slot is touched; on any error the current snapshot
    /// stays in effect.
    ///
    /// # Errors
    ///
    /// Returns the loader's error, or [`ServeError::ClassNames`] on a table mismatch.
    pub fn replace(
        &self,
        name: &str,
        source: &str,
        class_names: ClassNames,
        loader: &dyn ModelLoader,
    ) -> Result<Arc<ModelSnapshot>> {
        let model = loader.load(name, source)?;
        self.install(name, model, class_names)
    }

    /// Make an already constructed model current.
    ///
    /// # Errors
    ///
    /// Returns [`ServeError::ClassNames`] on a table mismatch, leaving the current
    /// snapshot in place.
    pub fn install(
        &self,
        name: &str,
        model: Arc<dyn Segmenter>,
        class_names: ClassNames,
    ) -> Result<Arc<ModelSnapshot>> {
        check_class_names(model.as_ref(), &class_names)?;

        let snapshot = Arc::new(ModelSnapshot {
            name: name.to_string(),
            generation: self.generation.fetch_add(1, Ordering::Relaxed) + 1,
            model,
            class_names,
        });

        {
            let mut slot = self.current.write().unwrap_or_else(PoisonError::into_inner);
            *slot = Arc::clone(&snapshot);
        }

        info!(
            "Model swapped to '{}' (generation {}, {} class names)",
            snapshot.name,
            snapshot.generation,
            snapshot.class_names.len()
        );
        Ok(snapshot)
    }
}

impl std::fmt::Debug for ModelRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModelRegistry")
            .field("current", &self.current())
            .finish()
    }
}

/// Class names for a freshly loaded model: `file` if given, else the names embedded in
/// the model, else COCO.
///
/// # Errors
///
/// Returns [`ServeError::Config`] if `file` can't be read.
pub fn resolve_class_names(file: Option<&Path>, model: &dyn Segmenter) -> Result<ClassNames> {
    match file {
        Some(path) => ClassNames::from_file(path),
        None => Ok(model.class_names().unwrap_or_else(ClassNames::coco)),
    }
}

/// A table must hold exactly one background entry plus one name per model class.
fn check_class_names(model: &dyn Segmenter, class_names: &ClassNames) -> Result<()> {
    match model.num_classes() {
        Some(n) if class_names.len() != n + 1 => Err(ServeError::ClassNames(format!(
            "model has {n} classes, expected {} class names (background included), got {}",
            n + 1,
            class_names.len()
        ))),
        _ => Ok(()),
    }
}
