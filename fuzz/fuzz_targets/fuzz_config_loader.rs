#![no_main]
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &str| {
    // Arbitrary TOML may fail to parse or validate, but must not panic.
    if let Ok(cfg) = toml::from_str::<filler_config::Config>(data) {
        let _ = cfg.validate();
    }
});
