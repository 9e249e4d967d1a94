//! Store integration tests against the in-memory server.

mod support;
mod editing;
mod fetching;
mod saving;
