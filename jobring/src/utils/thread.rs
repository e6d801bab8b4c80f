use std::ffi::CStr;

/// pthread names are capped at 16 bytes, terminator included.
const MAX_PTHREAD_NAME_LEN: usize = 16;

/// Name of the calling thread as the kernel sees it, truncated to 15 bytes.
#[cfg(target_os = "linux")]
pub(crate) fn current_thread_name() -> Option<String> {
    let mut buf: [libc::c_char; MAX_PTHREAD_NAME_LEN] = [0; MAX_PTHREAD_NAME_LEN];

    // SAFETY: `buf` is writable for MAX_PTHREAD_NAME_LEN bytes.
    let ret = unsafe { libc::pthread_getname_np(libc::pthread_self(), buf.as_mut_ptr(), buf.len()) };
    if ret != 0 {
        return None;
    }

    // SAFETY: zero-initialised and written by the kernel with a terminator.
    let name = unsafe { CStr::from_ptr(buf.as_ptr()) };
    name.to_str().ok().map(str::to_owned)
}

#[cfg(not(target_os = "linux"))]
pub(crate) fn current_thread_name() -> Option<String> {
    std::thread::current().name().map(str::to_owned)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_spawned_thread_name_visible() {
        let name = std::thread::Builder::new()
            .name("jobring-test".into())
            .spawn(current_thread_name)
            .unwrap()
            .join()
            .unwrap();

        assert_eq!(name.as_deref(), Some("jobring-test"));
    }
}
