#![no_main]

use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    for config in hid_rd_viewer::descriptors::fuzz_parse_concatenated_config_descriptors(data) {
        let config = hid_rd_viewer::descriptors::Configuration::new(config);
        let s = format!("{config:?}");
        std::hint::black_box(s);
        std::hint::black_box(config.hid_interface_numbers());
    }
});
