//! Session lifecycle: one task per connected channel, created and torn
//! down by the controller in response to channel events.

pub mod controller;
pub mod greeting;
pub mod task;

pub use controller::{SessionController, SessionFactory};
pub use greeting::{Clock, FixedClock, GreetingPolicy, SystemClock};
pub use task::{SessionState, SessionTask};
