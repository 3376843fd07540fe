//! Embedding provider seams consumed by the scorer.
//!
//! Two call shapes: one image per call ([`Embedder`]) and many images per
//! call ([`BatchEmbedder`]). Plain closures implement both.

use std::error::Error;

/// Maps one image to one embedding vector.
pub trait Embedder<I: ?Sized> {
    type Error: Error + Send + Sync + 'static;

    fn embed(&mut self, image: &I) -> Result<Vec<f32>, Self::Error>;
}

/// Maps a batch of images to embeddings in the same order.
pub trait BatchEmbedder<I> {
    type Error: Error + Send + Sync + 'static;

    fn embed_batch(&mut self, images: &[&I]) -> Result<Vec<Vec<f32>>, Self::Error>;
}

impl<I, E, F> Embedder<I> for F
where
    I: ?Sized,
    E: Error + Send + Sync + 'static,
    F: FnMut(&I) -> Result<Vec<f32>, E>,
{
    type Error = E;

    fn embed(&mut self, image: &I) -> Result<Vec<f32>, E> {
        self(image)
    }
}

/// Adapts a single-image [`Embedder`] to the batch call shape by
/// embedding each image in turn.
pub struct Sequential<E>(pub E);

impl<I, E: Embedder<I>> BatchEmbedder<I> for Sequential<E> {
    type Error = E::Error;

    fn embed_batch(&mut self, images: &[&I]) -> Result<Vec<Vec<f32>>, Self::Error> {
        images.iter().map(|img| self.0.embed(img)).collect()
    }
}

/// Wraps a closure taking a whole batch so it can be used as a [`BatchEmbedder`].
pub struct BatchFn<F>(pub F);

impl<I, E, F> BatchEmbedder<I> for BatchFn<F>
where
    E: Error + Send + Sync + 'static,
    F: FnMut(&[&I]) -> Result<Vec<Vec<f32>>, E>,
{
    type Error = E;

    fn embed_batch(&mut self, images: &[&I]) -> Result<Vec<Vec<f32>>, E> {
        (self.0)(images)
    }
}
