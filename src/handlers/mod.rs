//! HTTP request handlers
//!
//! Thin translation layers between the HTTP surface and the model/service
//! modules. Admission is handled by the extractors from `auth::extract`;
//! handlers only express what each endpoint does.

pub mod admin;
pub mod auth;
pub mod entities;
pub mod healthcheck;
pub mod progress;
