//! Message catalogue shared by the Courier shell and its presentation layer.
//!
//! The presentation layer runs untrusted UI code, so the set of requests it
//! may make of the shell is closed: [`ShellCommand`] enumerates every command
//! the shell accepts and [`ShellEvent`] every event the shell pushes back.
//! Anything that does not decode into one of these types is rejected at the
//! boundary.

pub mod command;
pub mod event;

pub use command::ShellCommand;
pub use event::ShellEvent;

