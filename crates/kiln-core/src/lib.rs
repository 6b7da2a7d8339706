// SPDX-License-Identifier: CEPL-1.0
#![deny(unsafe_op_in_unsafe_fn)]
use tracing::error;

pub fn init_tracing() {
    use tracing_subscriber::{fmt, EnvFilter};
    let _ = fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_target(false)
        .compact()
        .try_init();
}

/// Terminates the process after logging `err` and its cause chain.
///
/// Used for unrecoverable GPU failures (device lost, out of memory, a
/// rejected queue submission). The process aborts instead of unwinding so
/// no destructor ever runs against GPU objects in an unknown state.
pub fn fatal(err: &anyhow::Error) -> ! {
    error!("fatal: {err}");
    for cause in err.chain().skip(1) {
        error!("  caused by: {cause}");
    }
    std::process::abort()
}
