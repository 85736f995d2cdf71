#![no_main]

use std::sync::{Arc, OnceLock};

use airscan_core::config::DeviceConfig;
use airscan_escl::{
    Method, RegistryOptions, Request, Router, ScannerRegistry, SimulatedBackend, control_channel,
};
use arbitrary::Arbitrary;
use libfuzzer_sys::fuzz_target;

#[derive(Debug, Arbitrary)]
struct FuzzRequest {
    method: String,
    path: String,
    body: Vec<u8>,
    airscan_client: bool,
}

fn router() -> &'static Router {
    static ROUTER: OnceLock<Router> = OnceLock::new();
    ROUTER.get_or_init(|| {
        let backend = Arc::new(SimulatedBackend::new([DeviceConfig {
            page_bytes: 64,
            ..DeviceConfig::default()
        }]));
        let registry = ScannerRegistry::enumerate(backend, None, &RegistryOptions::default());
        let (control, _rx) = control_channel();
        Router::new(Arc::new(registry), control, "*")
    })
}

fuzz_target!(|input: FuzzRequest| {
    let mut request = Request::new(Method::parse(&input.method), input.path).with_body(input.body);
    if input.airscan_client {
        request = request.with_header("User-Agent", "AirScanScanner/1.0");
    }
    let response = router().handle(&request);
    assert!((200..600).contains(&response.status));
});
