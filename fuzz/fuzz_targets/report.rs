#![no_main]

use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    if let Ok(rd) = hid_rd_viewer::report::fuzz_parse(data) {
        // Every byte belongs to exactly one item
        let reencoded: Vec<u8> = rd.items().iter().flat_map(|i| i.to_bytes()).collect();
        assert_eq!(reencoded, data);
        std::hint::black_box(rd.to_string());
    }
});
