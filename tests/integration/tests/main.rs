//! End-to-End Integration Tests
//!
//! These tests run a scripted IdP and the SP engine against each other over
//! every binding, with artifact resolution going through live axum SOAP
//! endpoints on ephemeral ports.

mod common;
mod artifact;
mod logout_flow;
mod sso_flow;
