//! Shared test doubles for the end-to-end journey tests.

pub mod mocks;
