#![no_main]

use fingwit_core::{TemplateRecord, UserId, FEATURE_DIM, MAX_TEMPLATES_PER_USER};
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    let owner = UserId::new("alice").unwrap();

    if let Ok(record) = TemplateRecord::from_json(data, &owner) {
        // Anything accepted must satisfy the record invariants
        assert_eq!(record.owner(), &owner);
        assert!(record.len() <= MAX_TEMPLATES_PER_USER);
        for template in record.templates() {
            assert_eq!(template.features().as_slice().len(), FEATURE_DIM);
            assert!(template.features().as_slice().iter().all(|v| v.is_finite()));
        }

        // Round-trip
        let reserialized = record.to_json().unwrap();
        let record2 = TemplateRecord::from_json(&reserialized, &owner).unwrap();
        assert_eq!(record.checksum(), record2.checksum());
        assert_eq!(record.fingers(), record2.fingers());
    }
});
