//! Disguise Layer
//!
//! Controls how host machinery presents itself to introspection:
//! - Callables stringify as built-ins (`mask`)
//! - Exception stacks hide runtime frames and map the target script onto
//!   its public URL (`StackRewriter`)

pub mod mask;
pub mod stack;

pub use mask::{mask, native, native_source, presents_native, NATIVE_MARKER};
pub use stack::{FrameAction, FrameRule, StackRewriter, StackRules};
