//! # Kernel Logging Backend
//!
//! A `log::Log` implementation for the kernel core. Every crate in the core
//! logs through the `log` facade (`info!`, `debug!`, ...); this crate routes
//! those records to whatever byte sink the platform provides (serial port,
//! debug console, framebuffer text renderer).
//!
//! ## Output Mechanism
//! ```text
//! log::info!(..)
//!     ↓
//! KernelLogger (level filter)
//!     ↓
//! SinkWriter (fmt::Write, no allocation)
//!     ↓
//! LogSink::write_bytes → console driver
//! ```
//!
//! Records are formatted as `[LEVEL] target: message\n`.
//!
//! ## Usage
//! ```rust,no_run
//! use kernel_log::{KernelLogger, LogSink};
//! use log::LevelFilter;
//!
//! struct Serial;
//! impl LogSink for Serial {
//!     fn write_bytes(&self, bytes: &[u8]) { /* out to UART */ }
//! }
//!
//! static LOGGER: KernelLogger<Serial> = KernelLogger::new(Serial, LevelFilter::Debug);
//! LOGGER.init().expect("logger initialization");
//! log::info!("kernel core online");
//! ```

#![cfg_attr(not(any(test, doctest)), no_std)]

mod logger;
mod sink;

pub use logger::KernelLogger;
pub use sink::{LogSink, SinkWriter};
