//! LmsComplete command-line shell: load a course page (fixture or live
//! browser) and run discovery and completion against it.

#[cfg(feature = "chromium")]
pub mod chromium;
pub mod config;
pub mod fixture;

pub use config::{find_chromium, resolve_fixture_path};
pub use fixture::{Fixture, FixtureError};
