#![no_main]

use fingwit_core::{Scan, FEATURE_DIM};
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    if let Ok(scan) = Scan::from_json(data) {
        assert_eq!(scan.features().as_slice().len(), FEATURE_DIM);
        assert!(scan.features().norm().is_finite());

        let reserialized = scan.to_json().unwrap();
        let scan2 = Scan::from_json(&reserialized).unwrap();
        assert_eq!(scan.captured_at(), scan2.captured_at());
    }
});
