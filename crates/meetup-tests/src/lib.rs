//! Integration test helpers for meetup end-to-end scenarios.
//!
//! [`harness::backend::TestBackend`] serves the JSON API and the cable
//! WebSocket in-process, so flows run against real sockets without a
//! Rails server.

pub mod harness;
