//! Sinout gateway - an authenticated relay between a browser capture client
//! and a facial-analysis service.
//!
//! # Overview
//!
//! The gateway accepts a facial image (multipart upload or base64 JSON),
//! forwards it to the inference service, normalizes whichever response shape
//! that service returns, optionally stores the reading with the history
//! service, and answers with one stable JSON contract.
//!
//! # Modules
//!
//! - [`config`]: Environment-driven configuration
//! - [`error`]: The failure taxonomy and its JSON rendering
//! - [`model`]: Request/response contracts and the defensive upstream reader
//! - [`auth`]: Bearer token validation and identity claim lookup
//! - [`clients`]: Inference and history service clients
//! - [`gateway`]: The analysis relay, health probe and model listing
//! - [`api`]: HTTP API handlers and router

pub mod api;
pub mod auth;
pub mod clients;
pub mod config;
pub mod error;
pub mod gateway;
pub mod model;
