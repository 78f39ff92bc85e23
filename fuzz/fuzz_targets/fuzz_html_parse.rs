#![no_main]

use blocks_dom::Document;
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    let Ok(markup) = std::str::from_utf8(data) else {
        return;
    };
    let document = Document::new();
    let host = document.create_element("div");
    document.set_inner_html(host, markup);
    let once = document.inner_html(host);

    // Serialized markup parses back to itself.
    let again = document.create_element("div");
    document.set_inner_html(again, &once);
    assert_eq!(document.inner_html(again), once);
});
