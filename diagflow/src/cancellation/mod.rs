//! Cooperative cancellation for in-flight bundle work.
//!
//! Each registered bundle owns a [`CancellationToken`]. Deleting the bundle
//! cancels it, which abandons any polling round still running for it.

mod token;

pub use token::CancellationToken;
