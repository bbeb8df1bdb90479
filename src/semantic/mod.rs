//! Semantic layer: loading imported files and binding them into a model.
//!
//! ```text
//! root source --load()--> Program (parsed files + import graph)
//!             --bind()--> Model   (concepts, joint keys, datasources)
//! ```
//!
//! Imports are resolved through a caller-supplied [`SourceResolver`]; the
//! compiler itself performs no I/O.

pub mod binder;
pub mod error;
pub mod infer;
pub mod loader;
pub mod resolver;

pub use binder::bind;
pub use error::{BindError, BindResult};
pub use infer::infer_type;
pub use loader::{load, LoadError, ParsedFile, Program};
pub use resolver::{
    roots_for_file, FnResolver, FsResolver, InMemoryResolver, ResolveError, SourceResolver,
};

use crate::model::Model;

/// Load a root file with its imports and bind the result.
pub fn load_and_bind(
    root_path: &str,
    root_source: &str,
    resolver: &dyn SourceResolver,
) -> Result<Model, LoadError> {
    let program = load(root_path, root_source, resolver)?;
    Ok(bind(&program)?)
}
