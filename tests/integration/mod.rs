//! Integration test suite for drover.
//!
//! These tests drive the library end to end with scripted pane captures and
//! a manual clock, so no tmux server is needed.
//!
//! # Test Categories
//!
//! - `classification`: velocity, patterns and hysteresis over several polls
//! - `routing`: scoring classified panes and routing between them
//! - `terse`: fleet summaries and their string form

mod fixtures;

mod classification;
mod routing;
mod terse;
