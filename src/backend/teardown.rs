// Owned handle collections, destroyed newest first
//
// Framebuffers and image views are created one per swapchain image. If the
// k-th creation fails, exactly the handles 0..k exist and must be released,
// in reverse, before the error propagates.

use anyhow::Result;

/// Handles of one kind sharing a destroy routine. Dropping the stack destroys
/// every handle it still owns, in reverse creation order.
pub struct HandleStack<H: Copy> {
    handles: Vec<H>,
    destroy: Box<dyn FnMut(H)>,
}

impl<H: Copy> HandleStack<H> {
    pub fn new(destroy: impl FnMut(H) + 'static) -> Self {
        Self {
            handles: Vec::new(),
            destroy: Box::new(destroy),
        }
    }

    /// One handle per source, in source order. Stops at the first failure,
    /// and the handles created so far are destroyed with the stack.
    pub fn build<S, F>(sources: &[S], destroy: impl FnMut(H) + 'static, create: F) -> Result<Self>
    where
        F: FnMut(&S) -> Result<H>,
    {
        let mut stack = Self::new(destroy);
        stack.try_extend(sources, create)?;
        Ok(stack)
    }

    pub fn try_extend<S, F>(&mut self, sources: &[S], mut create: F) -> Result<()>
    where
        F: FnMut(&S) -> Result<H>,
    {
        self.handles.reserve(sources.len());
        for source in sources {
            let handle = create(source)?;
            self.handles.push(handle);
        }
        Ok(())
    }

    pub fn get(&self, index: usize) -> Option<H> {
        self.handles.get(index).copied()
    }

    pub fn as_slice(&self) -> &[H] {
        &self.handles
    }

    pub fn len(&self) -> usize {
        self.handles.len()
    }

    /// Destroy everything now, newest first. Later drops touch nothing.
    pub fn clear(&mut self) {
        while let Some(handle) = self.handles.pop() {
            (self.destroy)(handle);
        }
    }
}

impl<H: Copy> Drop for HandleStack<H> {
    fn drop(&mut self) {
        self.clear();
    }
}
