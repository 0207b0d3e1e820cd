mod dot;
pub mod error;
pub mod nn;
mod op;
mod rc_term;
pub mod tape;
mod topo;

pub use error::GradError;
pub use op::Op;
pub use rc_term::RcTerm;
pub use tape::{Tape, TapeTerm};
