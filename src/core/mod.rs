pub mod align;
pub mod archive;
pub mod axml;
pub mod config;
pub mod error;
pub mod pipeline;
pub mod sign;
pub mod tools;
