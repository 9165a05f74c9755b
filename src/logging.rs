/// Installs the `env_logger` backend. `RUST_LOG` overrides the `info` default;
/// repeated calls are ignored.
pub fn init() {
    let _ = env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .format_timestamp_millis()
        .try_init();
}
