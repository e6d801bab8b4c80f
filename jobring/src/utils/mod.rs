mod io_uring;
pub(crate) use io_uring::CompletionFlags;

pub(crate) mod scope_guard;
pub(crate) use scope_guard::ScopeGuard;

#[cfg(test)]
pub(crate) mod thread;
