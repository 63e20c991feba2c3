//! Decision core of trusted broadcasting.
//!
//! Everything in here is synchronous and free of side effects except for the
//! chain queries the resolver is handed:
//! - [`gate`] decides whether a request's height has been reached.
//! - [`resolver`] turns a script's history into candidate coins.
//! - [`rebinder`] turns a template and a coin into a final transaction.

pub mod gate;
pub mod rebinder;
pub mod resolver;


pub use gate::eligible;
pub use rebinder::rebind;
pub use resolver::{matching_coins, resolve};
