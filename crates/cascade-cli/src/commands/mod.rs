pub mod compile;
pub mod list;
pub mod run;

pub use compile::CompileCommand;
pub use list::ListCommand;
pub use run::{RunArgs, RunCommand};
