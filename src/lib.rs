// src/lib.rs

//! Media relay library
//!
//! Turns links posted into a chat into the media they point at: metadata is
//! extracted, classified, downloaded through a ladder of strategies and
//! delivered back to the chat, with a secondary storage link when the primary
//! upload path gives out.

pub mod config;
pub mod error;
pub mod models;
pub mod pipeline;
pub mod services;
pub mod storage;
pub mod utils;

#[cfg(test)]
pub(crate) mod testing;
