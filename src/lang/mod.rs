//! # Kiln values
//!
//! Runtime values are what the operand stack, scope bindings and lists hold.
//!
//! ## Conventions
//!
//! - Numbers are `f64`; integral numbers display without a fraction.
//! - Text is owned and copied on push.
//! - Lists, routines and scopes are reference-counted and shared.

pub mod value;
