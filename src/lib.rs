// src/lib.rs

pub mod actions;
pub mod backend;
pub mod config;
pub mod engine;
pub mod error;
pub mod lifecycle;
pub mod quality;
pub mod retry;
pub mod transcript;
pub mod wine;

mod detect;
mod enrich;
mod identify;
mod present;
mod resolve;
