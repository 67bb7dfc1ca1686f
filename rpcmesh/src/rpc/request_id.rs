//! Request id allocation.

/// Largest request id before the counter wraps back to 1.
pub const MAX_REQUEST_ID: u32 = 99_999_999;

/// Wrapping request id counter. Id 0 is never produced.
#[derive(Debug)]
pub(crate) struct RequestIds {
    next: u32,
}

impl Default for RequestIds {
    fn default() -> Self {
        Self { next: 1 }
    }
}

impl RequestIds {
    /// Next id for which `in_use` is false.
    pub(crate) fn allocate(&mut self, in_use: impl Fn(u32) -> bool) -> u32 {
        loop {
            let id = self.next;
            self.next = if id >= MAX_REQUEST_ID { 1 } else { id + 1 };
            if !in_use(id) {
                return id;
            }
        }
    }
}
