//! Utility functions for identifiers

use bech32::Bech32m;
use uuid7::uuid7;

pub const REQUEST_HRP: &str = "request_";
pub const USER_HRP: &str = "user_";

// construct a unique id then encode using bech32
pub fn new_uuid_to_bech32(hrp: &str) -> anyhow::Result<String> {
    let hrp = bech32::Hrp::parse(hrp)?;
    let encode = bech32::encode::<Bech32m>(hrp, uuid7().as_bytes())?;
    Ok(encode)
}

/// Fresh purchase request identifier, e.g. `request_1...`
pub fn new_request_id() -> anyhow::Result<String> {
    new_uuid_to_bech32(REQUEST_HRP)
}

/// Fresh user identifier, e.g. `user_1...`
pub fn new_user_id() -> anyhow::Result<String> {
    new_uuid_to_bech32(USER_HRP)
}
