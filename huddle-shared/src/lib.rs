#![cfg_attr(not(test), forbid(unsafe_code))]
#![warn(clippy::pedantic)]
#![allow(clippy::multiple_crate_versions)]

//! Types and configuration shared between the Huddle engine and its hosts.

pub mod config;
pub mod models;
