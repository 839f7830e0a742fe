//! A small `tracing-subscriber` init helper, so embedding applications
//! don't each have to rediscover the right `EnvFilter` incantation.

use tracing_subscriber::{fmt, EnvFilter};

/// Installs a global `tracing` subscriber reading its filter from
/// `RUST_LOG`, defaulting to `info` when unset.
///
/// Safe to call more than once; later calls are ignored. Intended for
/// binaries and examples embedding the scheduler directly — library
/// consumers that already manage their own subscriber should skip this.
pub fn init_default_subscriber() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = fmt().with_env_filter(filter).try_init();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn init_does_not_panic_when_called_twice() {
        init_default_subscriber();
        init_default_subscriber();
    }
}
