//! Integration testing module
//!
//! - Synthesised media fixtures
//! - End-to-end transcodes through the FFmpeg backend
