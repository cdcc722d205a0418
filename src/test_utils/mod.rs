//! Fakes and helpers shared by the unit tests
mod common;
mod fake_backend;

pub(crate) use common::*;
pub(crate) use fake_backend::*;
