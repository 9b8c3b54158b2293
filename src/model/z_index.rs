/// Issues stacking-order tokens for floating windows.
///
/// Each manager owns its own allocator; nothing is shared between instances.
#[derive(Debug, Clone)]
pub struct ZIndexAllocator {
    base: i64,
    ceiling: i64,
    current: i64,
}

impl Default for ZIndexAllocator {
    fn default() -> Self { Self::new(10, 10_000) }
}

impl ZIndexAllocator {
    pub fn new(base: i64, ceiling: i64) -> Self {
        let ceiling = ceiling.max(base + 1);
        Self { base, ceiling, current: base }
    }

    /// Returns a token strictly greater than every token issued since the
    /// last wrap. Past the ceiling the counter restarts at `base + 1`.
    pub fn next(&mut self) -> i64 {
        if self.would_wrap() {
            tracing::debug!(ceiling = self.ceiling, "z-index ceiling reached, wrapping");
            self.current = self.base;
        }
        self.current += 1;
        self.current
    }

    /// The last issued token, or `base` if none has been issued.
    pub fn current(&self) -> i64 { self.current }

    pub fn reset(&mut self) { self.current = self.base; }

    /// True when the next call to [`next`](Self::next) would wrap.
    pub fn would_wrap(&self) -> bool { self.current + 1 > self.ceiling }

    pub fn base(&self) -> i64 { self.base }

    pub fn ceiling(&self) -> i64 { self.ceiling }
}
