//! Unit tests for vulnlab configuration types.
//!
//! This module contains tests organised into:
//! - [`helpers`] - Shared fixtures and helper functions
//! - [`types_tests`] - Type, serialisation and conversion tests
//! - [`layer_precedence_tests`] - `MergeComposer` layer precedence tests

mod helpers;
