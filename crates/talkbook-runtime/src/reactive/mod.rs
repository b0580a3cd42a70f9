#![forbid(unsafe_code)]

//! Change-notifying values for derived views.

pub mod observable;

pub use observable::{Observable, Subscription};
