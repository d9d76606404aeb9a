//! Product Resolver (C3) and Template Resolver (C4), spec §4.3/§4.4.
//!
//! Grounded on `claw-provision`'s `ProviderRegistry::select_provider`
//! fallback-search structure, generalized from
//! "provider selection across a process-registered set" to "region
//! selection against a priority-ordered fixed list with one preferred
//! fallback region".

#![forbid(unsafe_code)]

mod error;
mod product;
mod template;

pub use error::{ResolverError, Result};
pub use product::ProductResolver;
pub use template::TemplateResolver;
