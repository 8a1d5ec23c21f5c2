//! Tests for the in-memory KeyDir
