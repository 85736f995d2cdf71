#![no_main]

use airscan_escl::ScanSettings;
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    if let Ok(xml) = std::str::from_utf8(data) {
        let _ = ScanSettings::parse(xml);
    }
});
