//! Appointment relay — buffers channel conversations, packages them on a
//! trigger word, and nags a reviewer until each package is accepted or cancelled.

pub mod config;
pub mod error;
pub mod packaging;
pub mod service;
pub mod transport;
