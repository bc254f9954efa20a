//! Client for the travel planner REST API.

mod client;

pub use client::{HttpRemote, RemoteApi, RemoteError};
