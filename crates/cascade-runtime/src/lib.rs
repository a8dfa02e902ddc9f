//! Action compiler, argument composer, sub-action walker and transactional executor
//!
//! ```ignore
//! let action = cascade_runtime::compile(&definition)?;
//! let executor = Executor::new(registry);
//! let response = executor.execute(&action, &args, &session, ExecuteOptions::default()).await;
//! ```

pub mod compiler;
pub mod compose;
pub mod dispatch;
pub mod error;
pub mod executor;
pub mod template;
pub mod walker;

pub use compiler::{compile, MAIN_KEY};
pub use compose::{compose, is_compose, ComposeContext, ComposeExpr, Operand, RootBindings, RootView};
pub use dispatch::{Dispatcher, ProviderBinding, Step, TEMPLATE_CONTEXT_FIELD};
pub use error::{RuntimeError, RuntimeResult};
pub use executor::{ActionResponse, ExecuteOptions, Executor};
pub use template::{PlaceholderTemplate, StatementTemplate};
pub use walker::{Walker, CHILDS_KEY};
