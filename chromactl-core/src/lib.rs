// chromactl-core: shared library for the chromactl tools.

pub mod config;
pub mod document;
pub mod embedding;
pub mod chroma;
pub mod manager;
pub mod dispatch;
pub mod launcher;

// Test doubles shared by the binaries' tests.
pub mod testutil;
