#![no_main]

use libfuzzer_sys::fuzz_target;
use pam_fingwit::{ModuleArgs, Settings};

fuzz_target!(|args: Vec<String>| {
    // Parsing arbitrary stack lines must never panic
    if let Ok(parsed) = ModuleArgs::parse(&args) {
        let mut settings = Settings::default();
        settings.apply(&parsed);
        if settings.validate().is_ok() {
            assert!(settings.capture.max_tries >= 1);
            let _ = settings.overall_timeout();
        }
    }
});
