//! CSI driver for VPC block storage volumes.
//!
//! A single [`driver::Driver`] implements the identity, controller and node
//! services; [`server::serve`] exposes the ones the configured
//! [`cli::Mode`] asks for.

pub mod cli;
pub mod controller;
pub mod driver;
pub mod env;
pub mod ids;
pub mod locks;
pub mod node;
pub mod params;
pub mod reconciler;
pub mod server;
pub mod status;

#[cfg(test)]
mod testing;
