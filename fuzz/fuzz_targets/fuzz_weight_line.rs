#![no_main]
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &str| {
    // Any accepted reading must be finite and inside the sane window.
    if let Ok(w) = filler_hardware::parse_weight_line(data) {
        assert!(w.is_finite());
        assert!((filler_hardware::serial::SENSOR_MIN..=filler_hardware::serial::SENSOR_MAX).contains(&w));
    }
});
