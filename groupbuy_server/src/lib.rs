//! # Group-buy marketplace server
//!
//! A thin HTTP layer over the group-buy engine. It is responsible for:
//! * Exposing stock reservation, campaigns, point wallets, orders, payments and refunds as a JSON API.
//! * Receiving payment gateway webhooks and handing them to the payment reconciler.
//! * Closing campaigns once their deadline passes.
//! * Relaying engine events to the notification collaborator.
//!
//! ## Configuration
//! The server is configured via environment variables. See [config](config/index.html) for more information.
//!
//! ## Routes
//! * `/health`: A health check route that returns a 200 OK response.
//! * `/api/...`: The JSON API. See [routes](routes/index.html).
//! * `/webhook/payment`: Inbound payment gateway webhooks.
pub mod campaign_sweeper;
pub mod cli;
pub mod config;
pub mod data_objects;
pub mod errors;
pub mod helpers;
pub mod integrations;
pub mod routes;
pub mod server;

#[cfg(test)]
mod endpoint_tests;
