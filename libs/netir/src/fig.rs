//! Named figures and ordered, name-keyed collections.

use arcstr::ArcStr;
use indexmap::IndexMap;
use regex::Regex;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// A named object stored in a [`FigCollection`].
pub trait Fig {
    /// The name of this figure.
    fn name(&self) -> &ArcStr;
    /// Overwrites the name of this figure.
    ///
    /// Renaming a figure stored in a collection must go through
    /// [`FigCollection::rename`] so the collection key stays in sync.
    fn set_name(&mut self, name: ArcStr);
}

/// An error mutating a [`FigCollection`].
#[derive(Debug, Clone, Error)]
pub enum CollectionError {
    /// The requested name is already taken.
    #[error("name `{0}` already exists in collection")]
    NameExists(ArcStr),
    /// The requested figure does not exist.
    #[error("no figure named `{0}` in collection")]
    NotFound(ArcStr),
    /// An invalid search pattern.
    #[error("invalid search pattern: {0}")]
    Pattern(#[from] regex::Error),
}

/// An insertion-ordered collection of figures keyed by name.
///
/// Iteration yields figures in insertion order. Renaming a figure re-keys
/// it and moves it to the end of the iteration order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FigCollection<T> {
    figs: IndexMap<ArcStr, T>,
}

impl<T> Default for FigCollection<T> {
    fn default() -> Self {
        Self {
            figs: IndexMap::new(),
        }
    }
}

impl<T: Fig> FigCollection<T> {
    /// Creates a new, empty collection.
    #[inline]
    pub fn new() -> Self {
        Self::default()
    }

    /// The number of figures in this collection.
    #[inline]
    pub fn len(&self) -> usize {
        self.figs.len()
    }

    /// Returns `true` if this collection contains no figures.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.figs.is_empty()
    }

    /// Returns `true` if a figure with the given name exists.
    #[inline]
    pub fn contains(&self, name: &str) -> bool {
        self.figs.contains_key(name)
    }

    /// Gets the figure with the given name.
    #[inline]
    pub fn get(&self, name: &str) -> Option<&T> {
        self.figs.get(name)
    }

    /// Gets a mutable reference to the figure with the given name.
    ///
    /// Mutating the figure's name through this reference desynchronizes
    /// the collection; use [`FigCollection::rename`] instead.
    #[inline]
    pub fn get_mut(&mut self, name: &str) -> Option<&mut T> {
        self.figs.get_mut(name)
    }

    /// Gets the figure at the given position in insertion order.
    #[inline]
    pub fn get_index(&self, index: usize) -> Option<&T> {
        self.figs.get_index(index).map(|(_, fig)| fig)
    }

    /// Inserts a figure, replacing any existing figure with the same name.
    ///
    /// Replacement keeps the original position; a new name lands at the end.
    pub fn push(&mut self, fig: T) {
        self.figs.insert(fig.name().clone(), fig);
    }

    /// Inserts a figure, failing if the name is already taken.
    pub fn try_push(&mut self, fig: T) -> Result<(), CollectionError> {
        if self.contains(fig.name()) {
            return Err(CollectionError::NameExists(fig.name().clone()));
        }
        self.push(fig);
        Ok(())
    }

    /// Removes and returns the figure with the given name.
    ///
    /// The relative order of the remaining figures is preserved.
    pub fn remove(&mut self, name: &str) -> Option<T> {
        self.figs.shift_remove(name)
    }

    /// Renames the figure `from` to `to`.
    ///
    /// The figure is re-keyed and moves to the end of the iteration order.
    /// Fails if `from` does not exist or `to` is already taken.
    pub fn rename(&mut self, from: &str, to: impl Into<ArcStr>) -> Result<(), CollectionError> {
        let to = to.into();
        if !self.contains(from) {
            return Err(CollectionError::NotFound(ArcStr::from(from)));
        }
        if to.as_str() != from && self.contains(&to) {
            return Err(CollectionError::NameExists(to));
        }
        let mut fig = self.figs.shift_remove(from).ok_or_else(|| {
            CollectionError::NotFound(ArcStr::from(from))
        })?;
        fig.set_name(to.clone());
        self.figs.insert(to, fig);
        Ok(())
    }

    /// Finds all figures whose full name matches the given regex pattern.
    ///
    /// The pattern is anchored: `data` matches only a figure named `data`,
    /// not `data[0]`. Results come back in insertion order.
    pub fn find(&self, pattern: &str) -> Result<Vec<&T>, CollectionError> {
        let re = Regex::new(&format!("^(?:{pattern})$"))?;
        Ok(self
            .figs
            .iter()
            .filter(|(name, _)| re.is_match(name))
            .map(|(_, fig)| fig)
            .collect())
    }

    /// Removes all figures from this collection.
    pub fn clear(&mut self) {
        self.figs.clear();
    }

    /// Iterates over figures in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = &T> {
        self.figs.values()
    }

    /// Iterates over figures mutably, in insertion order.
    ///
    /// Names must not be changed through this iterator.
    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut T> {
        self.figs.values_mut()
    }

    /// Iterates over figure names in insertion order.
    pub fn names(&self) -> impl Iterator<Item = &ArcStr> {
        self.figs.keys()
    }
}

impl<T: Fig> FromIterator<T> for FigCollection<T> {
    fn from_iter<I: IntoIterator<Item = T>>(iter: I) -> Self {
        let mut collection = Self::new();
        for fig in iter {
            collection.push(fig);
        }
        collection
    }
}

impl<'a, T: Fig> IntoIterator for &'a FigCollection<T> {
    type Item = &'a T;
    type IntoIter = indexmap::map::Values<'a, ArcStr, T>;
    fn into_iter(self) -> Self::IntoIter {
        self.figs.values()
    }
}

impl<T: Fig> IntoIterator for FigCollection<T> {
    type Item = T;
    type IntoIter = indexmap::map::IntoValues<ArcStr, T>;
    fn into_iter(self) -> Self::IntoIter {
        self.figs.into_values()
    }
}
