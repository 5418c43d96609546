//! Fixtures shared by the unit tests: synthesized libraries and fake external tools.

mod fixture;

pub use fixture::FixtureBuilder;
#[cfg(unix)]
pub use tools::{failing_tool, fake_toolchain, FakeToolchain};
