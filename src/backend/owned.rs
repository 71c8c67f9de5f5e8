// Exclusive ownership of a GPU resource
//
// Buffers, images and image views all go through `Owned<R>`: the wrapped
// resource knows how to tear itself down (`Release`) and the wrapper makes
// sure that happens exactly once. `Owned::default()` is the empty state;
// dropping it touches nothing, so `std::mem::take` is the explicit "move out
// and leave a null handle behind" operation.

/// A GPU resource that knows how to destroy itself.
///
/// `release` consumes the resource: dependent objects first, the API object
/// next, backing memory last.
pub trait Release {
    fn release(self);
}

/// Exclusive owner of one releasable resource. Not `Clone`.
#[derive(Debug)]
pub struct Owned<R: Release> {
    inner: Option<R>,
}

impl<R: Release> Owned<R> {
    pub fn new(resource: R) -> Self {
        Self { inner: Some(resource) }
    }

    /// Empty handle that owns nothing.
    pub fn empty() -> Self {
        Self { inner: None }
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_none()
    }

    pub fn get(&self) -> Option<&R> {
        self.inner.as_ref()
    }

    pub fn get_mut(&mut self) -> Option<&mut R> {
        self.inner.as_mut()
    }

    /// Give up ownership without releasing. The handle becomes empty.
    pub fn into_inner(mut self) -> Option<R> {
        self.inner.take()
    }

    /// Release the current resource now (if any) and become empty.
    pub fn reset(&mut self) {
        if let Some(resource) = self.inner.take() {
            resource.release();
        }
    }
}

impl<R: Release> Default for Owned<R> {
    fn default() -> Self {
        Self::empty()
    }
}

impl<R: Release> Drop for Owned<R> {
    fn drop(&mut self) {
        self.reset();
    }
}
