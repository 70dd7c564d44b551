pub mod errors;
pub mod run;
pub mod spec;

pub use errors::*;
pub use run::*;
pub use spec::*;
