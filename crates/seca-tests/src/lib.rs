//! Integration tests for SECA live in `tests/`; this crate exists to anchor
//! them in the workspace.
