/*!
 * Integration tests for livetree.
 *
 * Most suites drive several documents against one `ServerStorage` through the
 * deterministic network in `helpers`, so every interleaving is explicit. The
 * `room` suite runs the async driver against the in-process `LocalServer`.
 */

use tracing_subscriber::EnvFilter;

#[ctor::ctor]
fn init_test_tracing() {
    // Default to "livetree=info" but let RUST_LOG override per test run
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::from_default_env().add_directive("livetree=info".parse().unwrap()),
        )
        .with_test_writer()
        .try_init();
}

mod dict;
mod helpers;
mod history;
mod list;
mod position;
mod record;
