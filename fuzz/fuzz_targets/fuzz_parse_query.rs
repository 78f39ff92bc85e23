#![no_main]

use blocks_core::parse_query;
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    let Ok(text) = std::str::from_utf8(data) else {
        return;
    };
    let calls = parse_query(text);
    for call in &calls {
        assert!(!call.name.is_empty());
        assert!(call.params.iter().all(|param| !param.trim().is_empty()));
    }
    assert_eq!(calls, parse_query(text));
});
