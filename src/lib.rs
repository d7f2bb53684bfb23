//! Mocri Server Library
//!
//! OCR over HTTP: model inventory, binarization, line segmentation and text
//! recognition. The server binary is in main.rs.
//!
//! # Modules
//!
//! - `inventory`: known recognition models, loaded once at startup
//! - `models`: locating and downloading model files
//! - `geometry`: line boxes exchanged between segmentation and recognition
//! - `engine`: the OCR engine contract and the built-in engine
//! - `pipeline`: the four client-facing operations
//! - `routes`: HTTP facade

pub mod config;
pub mod engine;
pub mod error;
pub mod geometry;
pub mod inventory;
pub mod models;
pub mod pipeline;
pub mod routes;
pub mod state;
