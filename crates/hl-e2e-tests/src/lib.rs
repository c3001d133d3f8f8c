//! Test-only crate; the scenarios live under `tests/`.
