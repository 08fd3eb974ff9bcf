//! # Zenith Components
//!
//! Reusable template components for a small reactive DOM runtime.
//!
//! ## Instance Invariants
//!
//! 1. **One Instance, One Root**: every matched element is replaced by exactly one
//!    template root, backed by exactly one fresh state `Store`. The original
//!    element never survives a match, even when instantiation fails.
//!
//! 2. **One-Way Props**: `:prop="expr"` is evaluated in the parent state and written
//!    into the child. It re-runs when a value it read changes and at no other time.
//!    The child never writes back.
//!
//! 3. **Events Flow Up**: `@event="handler"` is resolved once, when the instance is
//!    created, into `Handler::Named` or `Handler::Inline`. `emit` with no listener
//!    is a reported no-op.
//!
//! 4. **Slot Content Belongs to the Parent**: projected children are compiled
//!    against the parent scope before they are moved into the instance.
//!
//! 5. **Additive Attributes**: `class` and `style` extend the root's own values.
//!
//! 6. **No Panics Across the Hook**: every failure becomes a `Z-ERR-*` diagnostic
//!    plus removal of the offending instance (or a no-op for registration).
//!
//! ## Example
//!
//! ```
//! use zenith_components::{ComponentDefinition, Components, Runtime, Store};
//!
//! let runtime = Runtime::new();
//! let components = Components::install(&runtime);
//! components
//!     .register("card", ComponentDefinition::new(r#"<div class="box"><slot/></div>"#))
//!     .unwrap();
//!
//! let doc = runtime.mount(r#"<z-card class="big">hi</z-card>"#, Store::new());
//! assert_eq!(doc.html(), r#"<div class="box big">hi</div>"#);
//! ```

pub mod attrs;
pub mod component;
pub mod config;
pub mod diagnostics;
pub mod dom;
pub mod error;
pub mod expr;
pub mod handler;
pub mod host;
pub mod reactive;
pub mod scope;
pub mod value;


pub use component::{ComponentDefinition, Components, Emitter, Registry, Setup, SetupContext};
pub use config::ResolverConfig;
pub use diagnostics::{Diagnostic, Diagnostics, Severity};
pub use error::{ComponentError, EvalError, EvalResult};
pub use handler::Handler;
pub use host::{Flow, HookPoint, Mounted, Runtime};
pub use reactive::{watch_effect, Effect, Store};
pub use scope::CompileScope;
pub use value::{Function, Value};
