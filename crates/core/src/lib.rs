#![deny(warnings)]

pub mod cache;
pub mod config;
pub mod fingerprint;
pub mod profile;
pub mod provider;
pub mod session;
pub mod stream;
pub mod synth;
pub mod util;
