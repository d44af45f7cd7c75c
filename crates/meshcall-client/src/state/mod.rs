pub mod call_state;

pub use call_state::*;
