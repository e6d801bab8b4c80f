#![warn(
    missing_debug_implementations,
    missing_docs,
    rust_2018_idioms,
    unreachable_pub
)]
#![doc(test(
    no_crate_inject,
    attr(deny(warnings, rust_2018_idioms), allow(dead_code, unused_variables))
))]

//! Entry-point attributes for the jobring runtime.

mod entry;
mod parse;

/// Runs an `async fn main` on a freshly built jobring runtime.
///
/// The body becomes the main task; `main` returns whatever the body
/// evaluates to. A panic inside the body is resumed on the calling thread.
///
/// # Flavors
///
/// `flavor = "multi"` (the default) builds a worker pool. Its size is set
/// with `worker_threads` and defaults to the available parallelism.
///
/// ```no_run
/// #[jobring::main(flavor = "multi", worker_threads = 4)]
/// async fn main() {
///     let answer = jobring::spawn(async { 6 * 7 }).await.unwrap();
///     println!("{answer}");
/// }
/// ```
///
/// `flavor = "inline"` runs every task on the calling thread and rejects
/// `worker_threads`.
///
/// ```
/// #[jobring::main(flavor = "inline")]
/// async fn main() {
///     println!("hello");
/// }
/// ```
///
/// The inline example is equivalent to
///
/// ```
/// fn main() {
///     jobring::runtime::Builder::new_inline()
///         .try_build()
///         .expect("failed to build the jobring runtime")
///         .block_on(async {
///             println!("hello");
///         })
/// }
/// ```
///
/// The function must be `async` and take no arguments.
#[proc_macro_attribute]
pub fn main(
    args: proc_macro::TokenStream,
    item: proc_macro::TokenStream,
) -> proc_macro::TokenStream {
    entry::main(args.into(), item.into()).into()
}

/// Turns an `async fn` into a `#[test]` driven by its own runtime.
///
/// Tests default to `flavor = "inline"`. Pass `flavor = "multi"` and
/// optionally `worker_threads` to exercise the pool.
///
/// ```no_run
/// #[jobring::test]
/// async fn runs_inline() {
///     assert_eq!(jobring::spawn(async { 1 }).await.unwrap(), 1);
/// }
///
/// #[jobring::test(flavor = "multi", worker_threads = 2)]
/// async fn runs_on_two_workers() {
///     let h = jobring::spawn_blocking(|| 3);
///     assert_eq!(h.await.unwrap(), 3);
/// }
/// ```
///
/// The body must be `Send` since it runs as a task.
#[proc_macro_attribute]
pub fn test(
    args: proc_macro::TokenStream,
    item: proc_macro::TokenStream,
) -> proc_macro::TokenStream {
    entry::test(args.into(), item.into()).into()
}
