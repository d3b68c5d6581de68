//! Entity to vector extraction.

use std::fmt;

/// Extracts the vector of an entity.
///
/// An *embedded* vectorizer reads a vector that lives inside the entity, so
/// the index reads vectors straight from the entity store. A *computed*
/// vectorizer derives the vector, and the index keeps its own
/// [`VectorStore`](crate::store::VectorStore) of results.
pub trait Vectorizer<E>: Send + Sync {
    /// Returns the vector of `entity`, or `None` if it has none.
    fn vectorize(&self, entity: &E) -> Option<Vec<f32>>;

    /// Returns true if the vector is stored inside the entity.
    fn is_embedded(&self) -> bool {
        false
    }
}

/// Closure-backed [`Vectorizer`].
pub struct FnVectorizer<F> {
    f: F,
    embedded: bool,
}

impl<F> FnVectorizer<F> {
    /// Vectorizer reading a vector embedded in the entity.
    pub fn embedded(f: F) -> Self {
        Self { f, embedded: true }
    }

    /// Vectorizer computing a vector that the index stores separately.
    pub fn computed(f: F) -> Self {
        Self { f, embedded: false }
    }
}

impl<F> fmt::Debug for FnVectorizer<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FnVectorizer")
            .field("embedded", &self.embedded)
            .finish_non_exhaustive()
    }
}

impl<E, F> Vectorizer<E> for FnVectorizer<F>
where
    F: Fn(&E) -> Option<Vec<f32>> + Send + Sync,
{
    fn vectorize(&self, entity: &E) -> Option<Vec<f32>> {
        (self.f)(entity)
    }

    fn is_embedded(&self) -> bool {
        self.embedded
    }
}
