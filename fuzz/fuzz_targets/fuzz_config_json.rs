//! Fuzz target: JSON configuration
//!
//! Parses arbitrary bytes as a `BmuConfig` and, when that succeeds and
//! the result validates, builds the application service from it:
//! - No panics in parsing or validation
//! - A validated configuration always constructs a service
//!
//! cargo fuzz run fuzz_config_json

#![no_main]

use bmu::app::service::AppService;
use bmu::config::BmuConfig;
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    let Ok(config) = serde_json::from_slice::<BmuConfig>(data) else {
        return;
    };
    if config.validate().is_err() {
        assert!(AppService::new(config).is_err());
        return;
    }
    assert!(AppService::new(config).is_ok(), "validated config rejected");
});
