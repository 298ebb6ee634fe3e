pub mod run;
pub mod validate;
pub mod visualize;

pub use run::{RunArgs, handle_run};
pub use validate::{ValidateArgs, handle_validate};
pub use visualize::{VisualizeArgs, handle_visualize};
